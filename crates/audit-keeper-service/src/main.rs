//! # Audit-Keeper Service
//!
//! Binary entry point for the audit intake and replay service.
//!
//! This executable:
//! - Loads configuration from files and the environment
//! - Initializes structured logging
//! - Wires the status store, broker transport, health checker, intake,
//!   replay scheduler and consumers
//! - Runs the background loops and the HTTP server until a shutdown signal
//!
//! Exit codes: 1 bind failure, 2 server failure, 3 configuration error,
//! 4 startup failure.

mod background;
mod wiring;

use audit_keeper_api::{load_config, shutdown_signal, start_server, LoggingConfig, ServiceError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_FILTER: &str =
    "audit_keeper_service=info,audit_keeper_api=info,audit_keeper_core=info,tower_http=debug";

#[tokio::main]
async fn main() {
    let loaded = load_config();

    let logging = loaded
        .as_ref()
        .map(|config| config.logging.clone())
        .unwrap_or_default();
    init_tracing(&logging);

    info!("Starting Audit-Keeper Service");

    // -------------------------------------------------------------------------
    // Load configuration
    //
    // A malformed file or an environment variable that cannot be coerced is
    // a hard error; an absent file is not.
    // -------------------------------------------------------------------------
    let service_config = match loaded {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Failed to load service configuration; aborting");
            std::process::exit(3);
        }
    };

    if let Err(e) = service_config.validate() {
        error!(error = %e, "Service configuration is invalid; aborting");
        std::process::exit(3);
    }

    if let Err(e) = run(service_config).await {
        error!("Service failed: {}", e);

        let exit_code = match e {
            ServiceError::BindFailed { .. } => 1,
            ServiceError::ServerFailed { .. } => 2,
            ServiceError::Configuration(_) => 3,
            ServiceError::StartupFailed { .. } => 4,
        };

        std::process::exit(exit_code);
    }
}

async fn run(config: audit_keeper_api::ServiceConfig) -> Result<(), ServiceError> {
    let shutdown_timeout = Duration::from_secs(config.server.shutdown_timeout_seconds);
    let cancel = CancellationToken::new();

    let mut service = wiring::build(config).await?;

    let recovered = service
        .state
        .scheduler
        .recover_on_startup()
        .await
        .map_err(|e| ServiceError::StartupFailed {
            message: format!("replay recovery failed: {}", e),
        })?;
    if recovered > 0 {
        warn!(recovered, "Audit replays interrupted by restart are now STOPPED");
    }

    // Poll once so the intake health gate is open before the first request.
    let healthy = service.state.broker_health.run_health_check().await;
    if !healthy {
        service.state.broker_health.recover().await;
        service.state.broker_health.run_health_check().await;
    }

    let mut tasks = background::spawn_all(&mut service, cancel.clone());

    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_cancel.cancel();
    });

    let result = start_server(service.state.clone(), cancel.clone().cancelled_owned()).await;

    // -------------------------------------------------------------------------
    // Shutdown: stop replay workers so progress is flushed, stop the loops,
    // then publish any partially written sink files.
    // -------------------------------------------------------------------------
    cancel.cancel();
    if tokio::time::timeout(shutdown_timeout, service.state.scheduler.shutdown())
        .await
        .is_err()
    {
        warn!(
            timeout_seconds = shutdown_timeout.as_secs(),
            "Replay workers did not stop in time"
        );
    }
    while tasks.join_next().await.is_some() {}
    service.close_sinks().await;

    info!("Audit-Keeper Service stopped");
    result
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if logging.level.contains('=') {
            logging.level.clone().into()
        } else {
            format!("{},{}", DEFAULT_FILTER, logging.level).into()
        }
    });

    let registry = tracing_subscriber::registry().with(filter);
    if logging.json_format {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}
