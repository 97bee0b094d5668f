//! Bounded calls to slow external collaborators: per-attempt timeout plus a
//! small retry budget with jittered exponential backoff.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

use crate::error::{LlmError, ProvisionError};

/// Timeout and retry budget for one collaborator call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallPolicy {
    /// Limit for a single attempt.
    pub timeout: Duration,
    /// Extra attempts after the first one fails.
    pub retries: u32,
    /// Delay before the first retry; doubled on each further retry.
    pub base_backoff: Duration,
}

impl Default for CallPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            retries: 2,
            base_backoff: Duration::from_millis(500),
        }
    }
}

impl CallPolicy {
    /// Backoff before retry number `attempt` (1-based), with up to 25% jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = self
            .base_backoff
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)));
        let jitter_ms = (exp.as_millis() as u64) / 4;
        if jitter_ms == 0 {
            return exp;
        }
        exp + Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
    }
}

/// Errors that know whether another attempt might succeed.
pub trait Transient: std::fmt::Display {
    fn is_transient(&self) -> bool;
    fn timed_out(after: Duration) -> Self;
}

impl Transient for LlmError {
    fn is_transient(&self) -> bool {
        matches!(
            self,
            LlmError::RequestFailed { .. } | LlmError::RateLimited { .. } | LlmError::Timeout(_)
        )
    }

    fn timed_out(after: Duration) -> Self {
        LlmError::Timeout(after)
    }
}

impl Transient for ProvisionError {
    fn is_transient(&self) -> bool {
        match self {
            ProvisionError::RequestFailed(_) | ProvisionError::Timeout(_) => true,
            ProvisionError::Rejected { status, .. } => *status >= 500 || *status == 429,
            ProvisionError::InvalidResponse(_) => false,
        }
    }

    fn timed_out(after: Duration) -> Self {
        ProvisionError::Timeout(after)
    }
}

/// Run `op` under `policy`, retrying transient failures.
pub async fn call_with_retry<T, E, F, Fut>(policy: CallPolicy, label: &str, mut op: F) -> Result<T, E>
where
    E: Transient,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 0;
    loop {
        let result = match tokio::time::timeout(policy.timeout, op()).await {
            Ok(result) => result,
            Err(_) => Err(E::timed_out(policy.timeout)),
        };

        match result {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < policy.retries => {
                attempt += 1;
                let delay = policy.backoff(attempt);
                warn!(call = label, attempt, error = %e, delay_ms = delay.as_millis() as u64, "Collaborator call failed, retrying");
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}
