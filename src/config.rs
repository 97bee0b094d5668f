//! Configuration types.

use std::path::PathBuf;
use std::time::Duration;

use crate::retry::CallPolicy;

/// Orchestrator tuning knobs.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// How long a session stays alive after its last transition.
    pub session_ttl: Duration,
    /// Consecutive failures of one step before the session fails.
    pub max_step_errors: u32,
    /// Rejections at the approval gate before the session fails.
    pub max_plan_revisions: u32,
    /// Steps a single call may traverse before the run is aborted.
    pub max_steps_per_run: usize,
    /// Events returned by `inspect`.
    pub inspect_event_limit: usize,
    /// Limit used by `list` when the caller gives none.
    pub default_list_limit: usize,
    /// Timeout and retry budget for collaborator calls.
    pub call_policy: CallPolicy,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            session_ttl: Duration::from_secs(7 * 24 * 3600), // 7 days
            max_step_errors: 3,
            max_plan_revisions: 3,
            max_steps_per_run: 16,
            inspect_event_limit: 20,
            default_list_limit: 50,
            call_policy: CallPolicy::default(),
        }
    }
}

impl OrchestratorConfig {
    /// Defaults overridden by `ONBOARD_*` environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            session_ttl: Duration::from_secs(env_parse(
                "ONBOARD_SESSION_TTL_SECS",
                defaults.session_ttl.as_secs(),
            )),
            max_step_errors: env_parse("ONBOARD_MAX_STEP_ERRORS", defaults.max_step_errors),
            max_plan_revisions: env_parse(
                "ONBOARD_MAX_PLAN_REVISIONS",
                defaults.max_plan_revisions,
            ),
            max_steps_per_run: env_parse("ONBOARD_MAX_STEPS_PER_RUN", defaults.max_steps_per_run),
            inspect_event_limit: env_parse(
                "ONBOARD_INSPECT_EVENT_LIMIT",
                defaults.inspect_event_limit,
            ),
            default_list_limit: env_parse("ONBOARD_LIST_LIMIT", defaults.default_list_limit),
            call_policy: CallPolicy {
                timeout: Duration::from_secs(env_parse(
                    "ONBOARD_CALL_TIMEOUT_SECS",
                    defaults.call_policy.timeout.as_secs(),
                )),
                retries: env_parse("ONBOARD_CALL_RETRIES", defaults.call_policy.retries),
                base_backoff: Duration::from_millis(env_parse(
                    "ONBOARD_CALL_BACKOFF_MS",
                    defaults.call_policy.base_backoff.as_millis() as u64,
                )),
            },
        }
    }
}

/// Process-level settings for the HTTP server binary.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub db_path: PathBuf,
    /// How often the expired-session sweep runs.
    pub sweep_interval: Duration,
    /// Directory for rolling log files; stderr only when unset.
    pub log_dir: Option<PathBuf>,
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self {
            port: env_parse("ONBOARD_PORT", 8080),
            db_path: std::env::var("ONBOARD_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./data/onboarding.db")),
            sweep_interval: Duration::from_secs(env_parse("ONBOARD_SWEEP_INTERVAL_SECS", 300)),
            log_dir: std::env::var("ONBOARD_LOG_DIR").ok().map(PathBuf::from),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_bounded() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.max_step_errors, 3);
        assert_eq!(config.max_plan_revisions, 3);
        assert!(config.max_steps_per_run >= 7, "must fit the whole graph");
        assert_eq!(config.session_ttl, Duration::from_secs(604_800));
    }

    #[test]
    fn env_parse_falls_back_on_garbage() {
        assert_eq!(env_parse("ONBOARD_TEST_UNSET_KEY_FOR_CONFIG", 42u32), 42);
    }
}
