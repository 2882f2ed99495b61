//! # Audit-Keeper HTTP Service
//!
//! HTTP surface of the audit intake and replay service.
//!
//! This crate provides:
//! - The audit intake endpoint, forwarding records to the broker
//! - Replay control endpoints (create, start, stop, resume, update, delete,
//!   status, and their bulk forms)
//! - The peer endpoint receiving remote replay commands
//! - Health, readiness and Prometheus metrics endpoints

pub mod config;
pub mod errors;
pub mod metrics;

pub use config::{load_config, LoggingConfig, ServiceConfig, StatusStoreBackend, TransportMode};
pub use errors::{ApiError, ConfigError, ServiceError};
pub use metrics::ServiceMetrics;

use audit_keeper_core::{
    AuditIntake, AuditParameters, BrokerTopologyChecker, BulkOutcome, CreateReplay, Delivery,
    RemoteCommand, RemoteCommandHandler, ReplayError, ReplayId, ReplayScheduler, ReplayStatus,
    Timestamp, ValidationError,
};
use axum::{
    body::Bytes,
    extract::{Path, RawQuery, Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Json, Response},
    routing::{delete, get, post, put},
    Router,
};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, future::Future, sync::Arc, time::Instant};
use tower::ServiceBuilder;
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info, instrument};

// ============================================================================
// Application State
// ============================================================================

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServiceConfig>,

    /// Publishes audits with retry and file fallback
    pub intake: Arc<AuditIntake>,

    pub scheduler: Arc<ReplayScheduler>,

    /// Applies replay commands sent by peer instances
    pub remote: RemoteCommandHandler,

    pub broker_health: Arc<BrokerTopologyChecker>,

    pub metrics: Arc<ServiceMetrics>,
}

impl AppState {
    pub fn new(
        config: ServiceConfig,
        intake: Arc<AuditIntake>,
        scheduler: Arc<ReplayScheduler>,
        broker_health: Arc<BrokerTopologyChecker>,
        metrics: Arc<ServiceMetrics>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            intake,
            remote: RemoteCommandHandler::new(scheduler.clone()),
            scheduler,
            broker_health,
            metrics,
        }
    }
}

// ============================================================================
// HTTP Server
// ============================================================================

/// Create HTTP router with all endpoints
pub fn create_router(state: AppState) -> Router {
    let audit_routes = Router::new().route("/v1/audit", post(handle_audit));

    let replay_routes = Router::new()
        .route("/v1/replay/create", post(create_replay))
        .route("/v1/replay/createAndStart", post(create_and_start_replay))
        .route("/v1/replay/{id}/start", put(start_replay))
        .route("/v1/replay/{id}/stop", put(stop_replay))
        .route("/v1/replay/{id}/resume", put(resume_replay))
        .route("/v1/replay/{id}/update", put(update_replay))
        .route("/v1/replay/{id}/delete", delete(delete_replay))
        .route("/v1/replay/{id}/status", get(replay_status))
        .route("/v1/replay/startAll", put(start_all_replays))
        .route("/v1/replay/stopAll", put(stop_all_replays))
        .route("/v1/replay/resumeAll", put(resume_all_replays))
        .route("/v1/replay/updateAll", put(update_all_replays))
        .route("/v1/replay/deleteAll", delete(delete_all_replays))
        .route("/v1/replay/statusAll", get(all_replay_status))
        .route("/v1/replay/remote", post(handle_remote_command));

    let health_routes = Router::new()
        .route("/health", get(handle_health_check))
        .route("/health/broker", get(handle_broker_health))
        .route("/health/ready", get(handle_readiness_check));

    let observability_routes = Router::new().route("/metrics", get(metrics_endpoint));

    let mut router = Router::new()
        .merge(audit_routes)
        .merge(replay_routes)
        .merge(health_routes)
        .merge(observability_routes);

    if state.config.server.enable_cors {
        router = router.layer(CorsLayer::permissive());
    }
    if state.config.server.enable_compression {
        router = router.layer(CompressionLayer::new());
    }

    router
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(middleware::from_fn_with_state(
                    state.clone(),
                    metrics_middleware,
                ))
                .into_inner(),
        )
        .with_state(state)
}

/// Start HTTP server and serve until `shutdown` resolves
pub async fn start_server<F>(state: AppState, shutdown: F) -> Result<(), ServiceError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let address = format!("{}:{}", state.config.server.host, state.config.server.port);
    let listener =
        tokio::net::TcpListener::bind(&address)
            .await
            .map_err(|e| ServiceError::BindFailed {
                address: address.clone(),
                message: e.to_string(),
            })?;

    info!(address = %address, "Starting HTTP server");

    // In-flight requests complete; new connections are refused once
    // `shutdown` resolves.
    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| ServiceError::ServerFailed {
            message: e.to_string(),
        })?;

    info!("HTTP server shutdown complete");
    Ok(())
}

/// Resolve on SIGINT or SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C signal handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT (Ctrl+C), initiating graceful shutdown"),
        _ = terminate => info!("Received SIGTERM, initiating graceful shutdown"),
    }
}

// ============================================================================
// Request Parameters
// ============================================================================

/// Multi-valued parameters from the query string and a form-encoded body
fn collect_params(query: Option<&str>, body: &[u8]) -> HashMap<String, Vec<String>> {
    let mut params: HashMap<String, Vec<String>> = HashMap::new();
    let query_pairs = url::form_urlencoded::parse(query.unwrap_or_default().as_bytes());
    let body_pairs = url::form_urlencoded::parse(body);
    for (key, value) in query_pairs.chain(body_pairs) {
        params
            .entry(key.into_owned())
            .or_default()
            .push(value.into_owned());
    }
    params
}

/// The single value of `field`, if present
fn single<'a>(
    params: &'a HashMap<String, Vec<String>>,
    field: &str,
) -> Result<Option<&'a str>, ValidationError> {
    match params.get(field).map(Vec::as_slice) {
        None | Some([]) => Ok(None),
        Some([value]) => Ok(Some(value.as_str())),
        Some(_) => Err(ValidationError::SingleValue {
            field: field.to_string(),
        }),
    }
}

fn required<'a>(
    params: &'a HashMap<String, Vec<String>>,
    field: &str,
) -> Result<&'a str, ValidationError> {
    single(params, field)?
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| ValidationError::Required {
            field: field.to_string(),
        })
}

fn parse_send_rate(params: &HashMap<String, Vec<String>>) -> Result<i64, ValidationError> {
    let raw = required(params, "sendRate")?;
    raw.parse().map_err(|_| ValidationError::InvalidFormat {
        field: "sendRate".to_string(),
        message: format!("'{}' is not an integer", raw),
    })
}

fn parse_create_request(params: &HashMap<String, Vec<String>>) -> Result<CreateReplay, ValidationError> {
    let path_uri = required(params, "pathUri")?;
    let send_rate = parse_send_rate(params)?;
    let replay_unfinished_files = match single(params, "replayUnfinishedFiles")? {
        None => false,
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ValidationError::InvalidFormat {
                field: "replayUnfinishedFiles".to_string(),
                message: format!("'{}' is not a boolean", raw),
            })?,
    };

    Ok(CreateReplay::new(path_uri, send_rate).with_unfinished_files(replay_unfinished_files))
}

fn parse_replay_id(id: &str) -> Result<ReplayId, ReplayError> {
    id.parse().map_err(|_| ReplayError::NotFound { id: id.to_string() })
}

/// Count a replay control operation and convert its error
fn observe<T>(state: &AppState, action: &str, result: Result<T, ReplayError>) -> Result<T, ApiError> {
    state.metrics.record_replay_operation(action, result.is_ok());
    result.map_err(ApiError::from)
}

// ============================================================================
// Audit Handler
// ============================================================================

/// Accept an audit record and return its id once it is stored durably
#[instrument(skip(state, query, body))]
async fn handle_audit(
    State(state): State<AppState>,
    RawQuery(query): RawQuery,
    body: Bytes,
) -> Result<String, ApiError> {
    let params = collect_params(query.as_deref(), &body);
    let parameters = match AuditParameters::from_params(&params) {
        Ok(parameters) => parameters,
        Err(e) => {
            state.metrics.record_audit(false, false);
            return Err(e.into());
        }
    };

    match state.intake.audit(&parameters).await {
        Ok(delivery) => {
            state
                .metrics
                .record_audit(true, delivery == Delivery::Fallback);
            Ok(parameters.audit_id)
        }
        Err(e) => {
            state.metrics.record_audit(false, false);
            Err(e.into())
        }
    }
}

// ============================================================================
// Replay Handlers
// ============================================================================

#[instrument(skip(state, query, body))]
async fn create_replay(
    State(state): State<AppState>,
    RawQuery(query): RawQuery,
    body: Bytes,
) -> Result<String, ApiError> {
    let request = parse_create_request(&collect_params(query.as_deref(), &body))?;
    let id = observe(&state, "create", state.scheduler.create(request).await)?;
    Ok(id.to_string())
}

#[instrument(skip(state, query, body))]
async fn create_and_start_replay(
    State(state): State<AppState>,
    RawQuery(query): RawQuery,
    body: Bytes,
) -> Result<String, ApiError> {
    let request = parse_create_request(&collect_params(query.as_deref(), &body))?;
    let id = observe(
        &state,
        "create_and_start",
        state.scheduler.create_and_start(request).await,
    )?;
    Ok(id.to_string())
}

#[instrument(skip(state))]
async fn start_replay(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let result = match parse_replay_id(&id) {
        Ok(id) => state.scheduler.start(&id).await,
        Err(e) => Err(e),
    };
    observe(&state, "start", result)?;
    Ok(StatusCode::OK)
}

#[instrument(skip(state))]
async fn stop_replay(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let result = match parse_replay_id(&id) {
        Ok(id) => state.scheduler.stop(&id).await,
        Err(e) => Err(e),
    };
    observe(&state, "stop", result)?;
    Ok(StatusCode::OK)
}

#[instrument(skip(state))]
async fn resume_replay(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let result = match parse_replay_id(&id) {
        Ok(id) => state.scheduler.resume(&id).await,
        Err(e) => Err(e),
    };
    observe(&state, "resume", result)?;
    Ok(StatusCode::OK)
}

#[instrument(skip(state, query, body))]
async fn update_replay(
    State(state): State<AppState>,
    Path(id): Path<String>,
    RawQuery(query): RawQuery,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let send_rate = parse_send_rate(&collect_params(query.as_deref(), &body))?;
    let result = match parse_replay_id(&id) {
        Ok(id) => state.scheduler.update(&id, send_rate).await,
        Err(e) => Err(e),
    };
    observe(&state, "update", result)?;
    Ok(StatusCode::OK)
}

#[instrument(skip(state))]
async fn delete_replay(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let result = match parse_replay_id(&id) {
        Ok(id) => state.scheduler.delete(&id).await,
        Err(e) => Err(e),
    };
    observe(&state, "delete", result)?;
    Ok(StatusCode::OK)
}

#[instrument(skip(state))]
async fn replay_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ReplayStatus>, ApiError> {
    let id = parse_replay_id(&id)?;
    Ok(Json(state.scheduler.status(&id).await?))
}

#[instrument(skip(state))]
async fn start_all_replays(State(state): State<AppState>) -> Result<Json<BulkOutcome>, ApiError> {
    let outcome = observe(&state, "start_all", state.scheduler.start_all().await)?;
    Ok(Json(outcome))
}

#[instrument(skip(state))]
async fn stop_all_replays(State(state): State<AppState>) -> Result<Json<BulkOutcome>, ApiError> {
    let outcome = observe(&state, "stop_all", state.scheduler.stop_all().await)?;
    Ok(Json(outcome))
}

#[instrument(skip(state))]
async fn resume_all_replays(State(state): State<AppState>) -> Result<Json<BulkOutcome>, ApiError> {
    let outcome = observe(&state, "resume_all", state.scheduler.resume_all().await)?;
    Ok(Json(outcome))
}

#[instrument(skip(state, query, body))]
async fn update_all_replays(
    State(state): State<AppState>,
    RawQuery(query): RawQuery,
    body: Bytes,
) -> Result<Json<BulkOutcome>, ApiError> {
    let send_rate = parse_send_rate(&collect_params(query.as_deref(), &body))?;
    let outcome = observe(
        &state,
        "update_all",
        state.scheduler.update_all(send_rate).await,
    )?;
    Ok(Json(outcome))
}

#[instrument(skip(state))]
async fn delete_all_replays(State(state): State<AppState>) -> Result<Json<BulkOutcome>, ApiError> {
    let outcome = observe(&state, "delete_all", state.scheduler.delete_all().await)?;
    Ok(Json(outcome))
}

#[instrument(skip(state))]
async fn all_replay_status(
    State(state): State<AppState>,
) -> Result<Json<Vec<ReplayStatus>>, ApiError> {
    Ok(Json(state.scheduler.status_all().await?))
}

/// Apply a stop or update broadcast by a peer instance
#[instrument(skip(state))]
async fn handle_remote_command(
    State(state): State<AppState>,
    Json(command): Json<RemoteCommand>,
) -> Result<StatusCode, ApiError> {
    observe(&state, "remote", state.remote.handle(command).await)?;
    Ok(StatusCode::OK)
}

// ============================================================================
// Health Check Handlers
// ============================================================================

/// Overall service health
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub broker_healthy: bool,
    pub local_replays: usize,
    pub version: String,
    pub timestamp: Timestamp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    pub timestamp: Timestamp,
}

/// Basic health check endpoint
#[instrument(skip(state))]
async fn handle_health_check(State(state): State<AppState>) -> Response {
    let broker_healthy = state.broker_health.is_healthy().await;
    state.metrics.set_broker_healthy(broker_healthy);

    let response = HealthResponse {
        status: if broker_healthy { "UP" } else { "DOWN" }.to_string(),
        broker_healthy,
        local_replays: state.scheduler.local_jobs(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Timestamp::now(),
    };

    let status = if broker_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(response)).into_response()
}

/// Broker topology health with outage details and queue depths
#[instrument(skip(state))]
async fn handle_broker_health(State(state): State<AppState>) -> Response {
    let healthy = state.broker_health.is_healthy().await;
    state.metrics.set_broker_healthy(healthy);
    let report = state.broker_health.health().await;

    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(report)).into_response()
}

/// Readiness check for orchestrators
#[instrument(skip(state))]
async fn handle_readiness_check(State(state): State<AppState>) -> Response {
    let ready = state.broker_health.is_healthy().await;

    let response = ReadinessResponse {
        ready,
        timestamp: Timestamp::now(),
    };
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(response)).into_response()
}

// ============================================================================
// Observability
// ============================================================================

/// Prometheus metrics endpoint
#[instrument(skip_all)]
async fn metrics_endpoint(State(state): State<AppState>) -> Result<String, StatusCode> {
    state.metrics.encode().map_err(|e| {
        error!(error = %e, "Failed to encode metrics");
        StatusCode::INTERNAL_SERVER_ERROR
    })
}

async fn metrics_middleware(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let method = request.method().to_string();
    let start = Instant::now();

    let response = next.run(request).await;

    state
        .metrics
        .record_http_request(&method, response.status().as_u16(), start.elapsed());
    response
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
