use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use onboard_orchestrator::audit::TracingAuditSink;
use onboard_orchestrator::config::{OrchestratorConfig, ServerConfig};
use onboard_orchestrator::llm::{LlmConfig, create_generator};
use onboard_orchestrator::onboarding::{
    OnboardingRouteState, Orchestrator, onboarding_routes, spawn_expiry_task,
};
use onboard_orchestrator::provisioning::{HttpProvisioner, ProvisioningConfig};
use onboard_orchestrator::store::{LibSqlBackend, SessionRegistry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let server_config = ServerConfig::from_env();

    // Initialize tracing; the guard must live as long as the process.
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _log_guard = match &server_config.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "onboard.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_target(false))
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(writer),
                )
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .init();
            None
        }
    };

    let orchestrator_config = OrchestratorConfig::from_env();
    let llm_config = LlmConfig::from_env().context("text generation is not configured")?;
    let provisioning_config =
        ProvisioningConfig::from_env().context("provisioning is not configured")?;

    eprintln!("Onboard Orchestrator v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Model: {}", llm_config.model);
    eprintln!("   Database: {}", server_config.db_path.display());
    eprintln!("   API: http://0.0.0.0:{}/api/onboarding/sessions", server_config.port);

    // ── Database ─────────────────────────────────────────────────────────
    let registry: Arc<dyn SessionRegistry> = Arc::new(
        LibSqlBackend::new_local(&server_config.db_path)
            .await
            .with_context(|| {
                format!("failed to open database at {}", server_config.db_path.display())
            })?,
    );

    // ── Collaborators ────────────────────────────────────────────────────
    let generator = create_generator(&llm_config)?;
    let provisioner = HttpProvisioner::shared(provisioning_config);
    let audit = Arc::new(TracingAuditSink);

    let orchestrator = Arc::new(Orchestrator::new(
        registry,
        generator,
        provisioner,
        audit,
        orchestrator_config,
    ));

    let _sweep_handle = spawn_expiry_task(Arc::clone(&orchestrator), server_config.sweep_interval);

    // ── HTTP server ──────────────────────────────────────────────────────
    let app = onboarding_routes(OnboardingRouteState { orchestrator });
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", server_config.port))
        .await
        .with_context(|| format!("failed to bind port {}", server_config.port))?;
    tracing::info!(port = server_config.port, "Onboarding API started");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutting down");
        })
        .await
        .context("server error")?;

    Ok(())
}
