use std::sync::Arc;
use std::time::Instant;

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::StreamExt;
use tracing::error;

use crate::config::AppConfig;
use crate::domain::batch::{self, PreconditionError, ResetScope};
use crate::domain::directory::{Directory, LocationRecord};
use crate::domain::events::{BufferSink, ChannelSink, EventKind, EventSink, ProgressEvent};
use crate::domain::probe::{PingProber, Prober};
use crate::domain::types::{DaemonHealth, OutcomeKind, ReachabilityEntry};

/// Shared application state for all API handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(config: Arc<AppConfig>) -> Self {
        Self {
            config,
            started_at: Instant::now(),
        }
    }
}

/// Response envelope every mutating operation answers with: an overall
/// success flag, a human-readable summary, and the structured detail.
#[derive(Debug, Serialize)]
pub struct ApiResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl ApiResponse {
    pub fn ok(message: impl Into<String>, data: Option<serde_json::Value>) -> Self {
        Self {
            success: true,
            message: message.into(),
            data,
        }
    }

    pub fn fail(message: impl Into<String>, data: Option<serde_json::Value>) -> Self {
        Self {
            success: false,
            message: message.into(),
            data,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct BatchRequest {
    pub timeout: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct LocationRequest {
    pub location: String,
    pub timeout: Option<u64>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/locations", get(locations))
        .route("/api/v1/reachability", get(reachability))
        .route("/api/v1/ping", post(ping))
        .route("/api/v1/ping/stream", post(ping_stream))
        .route("/api/v1/reset/location", post(reset_location))
        .route("/api/v1/reset/all", post(reset_all))
        .route("/api/v1/reset/down", post(reset_down))
        .route("/api/v1/reset/all/stream", post(reset_all_stream))
        .route("/api/v1/reset/down/stream", post(reset_down_stream))
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Json<DaemonHealth> {
    Json(DaemonHealth {
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        directory_file: state.config.directory_file.display().to_string(),
        credentials_configured: state.config.credentials.is_some(),
    })
}

async fn locations(
    State(state): State<AppState>,
) -> Result<Json<Vec<LocationRecord>>, (StatusCode, Json<ApiResponse>)> {
    let directory = load_directory(&state).await?;
    Ok(Json(directory.records().to_vec()))
}

/// Probe every location sequentially and return the snapshot. Slow by
/// design; the stream variants exist for anything interactive.
async fn reachability(
    State(state): State<AppState>,
) -> Result<Json<Vec<ReachabilityEntry>>, (StatusCode, Json<ApiResponse>)> {
    let config = state.config.clone();
    let directory = load_directory(&state).await?;

    let snapshot = tokio::task::spawn_blocking(move || {
        let prober = PingProber::new(config.probe_count);
        directory
            .records()
            .iter()
            .map(|record| ReachabilityEntry {
                location: record.location.clone(),
                address: record.address.clone(),
                reachable: prober.probe(&record.address, config.default_timeout_secs),
            })
            .collect::<Vec<_>>()
    })
    .await
    .map_err(internal_error)?;

    Ok(Json(snapshot))
}

async fn ping(
    State(state): State<AppState>,
    Json(request): Json<LocationRequest>,
) -> Result<Json<ApiResponse>, (StatusCode, Json<ApiResponse>)> {
    let timeout = validated_timeout(&state, request.timeout)?;
    let directory = load_directory(&state).await?;

    let Some(record) = directory
        .records()
        .iter()
        .find(|r| r.location == request.location)
        .cloned()
    else {
        return Err(not_found(&request.location));
    };

    let config = state.config.clone();
    let report = tokio::task::spawn_blocking(move || {
        PingProber::new(config.probe_count).probe_detailed(&record.address, timeout)
    })
    .await
    .map_err(internal_error)?;

    let message = format!(
        "{} ({}) is {}",
        request.location,
        report.address,
        if report.reachable { "reachable" } else { "unreachable" }
    );
    Ok(Json(ApiResponse::ok(message, to_value(&report))))
}

async fn ping_stream(
    State(state): State<AppState>,
    Json(request): Json<LocationRequest>,
) -> Result<Response, (StatusCode, Json<ApiResponse>)> {
    let timeout = validated_timeout(&state, request.timeout)?;
    let directory = load_directory(&state).await?;

    let Some(record) = directory
        .records()
        .iter()
        .find(|r| r.location == request.location)
        .cloned()
    else {
        return Err(not_found(&request.location));
    };

    let config = state.config.clone();
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::task::spawn_blocking(move || {
        let sink = ChannelSink::new(tx);
        sink.emit(
            ProgressEvent::new(
                EventKind::Start,
                format!("Pinging {} ({})", record.location, record.address),
            )
            .at(&record.location, &record.address),
        );

        let report =
            PingProber::new(config.probe_count).probe_detailed(&record.address, timeout);
        sink.emit(
            ProgressEvent::new(
                EventKind::PingResult,
                format!(
                    "{} is {}",
                    report.address,
                    if report.reachable { "reachable" } else { "unreachable" }
                ),
            )
            .at(&record.location, &record.address),
        );
        sink.emit(ProgressEvent::new(EventKind::Complete, "Ping finished"));
    });

    Ok(ndjson_response(rx))
}

async fn reset_location(
    State(state): State<AppState>,
    Json(request): Json<LocationRequest>,
) -> Result<Json<ApiResponse>, (StatusCode, Json<ApiResponse>)> {
    let timeout = validated_timeout(&state, request.timeout)?;
    require_credentials(&state)?;

    let config = state.config.clone();
    let location = request.location.clone();
    let outcome = tokio::task::spawn_blocking(move || {
        let sink = BufferSink::new();
        batch::execute_single(&config, &location, timeout, &sink)
    })
    .await
    .map_err(internal_error)?
    .map_err(precondition_response)?;

    match outcome.outcome {
        OutcomeKind::ResetSucceeded => Ok(Json(ApiResponse::ok(
            format!("Port reset completed for {}", request.location),
            to_value(&outcome),
        ))),
        OutcomeKind::ConfigurationMissing => Err((
            StatusCode::NOT_FOUND,
            Json(ApiResponse::fail(
                format!("No port assignment for {}", request.location),
                to_value(&outcome),
            )),
        )),
        _ => Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiResponse::fail(outcome.detail.clone(), to_value(&outcome))),
        )),
    }
}

async fn reset_all(
    state: State<AppState>,
    request: Option<Json<BatchRequest>>,
) -> Result<Json<ApiResponse>, (StatusCode, Json<ApiResponse>)> {
    run_batch(state, request, ResetScope::Full).await
}

async fn reset_down(
    state: State<AppState>,
    request: Option<Json<BatchRequest>>,
) -> Result<Json<ApiResponse>, (StatusCode, Json<ApiResponse>)> {
    run_batch(state, request, ResetScope::DownOnly).await
}

async fn reset_all_stream(
    state: State<AppState>,
    request: Option<Json<BatchRequest>>,
) -> Result<Response, (StatusCode, Json<ApiResponse>)> {
    run_batch_stream(state, request, ResetScope::Full).await
}

async fn reset_down_stream(
    state: State<AppState>,
    request: Option<Json<BatchRequest>>,
) -> Result<Response, (StatusCode, Json<ApiResponse>)> {
    run_batch_stream(state, request, ResetScope::DownOnly).await
}

/// Buffered batch: events are collected while the sweep runs and the caller
/// gets only the final aggregate.
async fn run_batch(
    State(state): State<AppState>,
    request: Option<Json<BatchRequest>>,
    scope: ResetScope,
) -> Result<Json<ApiResponse>, (StatusCode, Json<ApiResponse>)> {
    let request = request.map(|Json(r)| r).unwrap_or_default();
    let timeout = validated_timeout(&state, request.timeout)?;
    require_credentials(&state)?;

    let config = state.config.clone();
    let run = tokio::task::spawn_blocking(move || {
        let sink = BufferSink::new();
        batch::execute(&config, scope, timeout, &sink)
    })
    .await
    .map_err(internal_error)?
    .map_err(precondition_response)?;

    let message = run.summary();
    let data = to_value(&run);
    if run.success {
        Ok(Json(ApiResponse::ok(message, data)))
    } else {
        // Partial failure stays visible: full detail, top-level failure.
        Ok(Json(ApiResponse::fail(message, data)))
    }
}

/// Streaming batch: NDJSON event frames in emission order, one per line.
async fn run_batch_stream(
    State(state): State<AppState>,
    request: Option<Json<BatchRequest>>,
    scope: ResetScope,
) -> Result<Response, (StatusCode, Json<ApiResponse>)> {
    let request = request.map(|Json(r)| r).unwrap_or_default();
    let timeout = validated_timeout(&state, request.timeout)?;
    require_credentials(&state)?;

    let config = state.config.clone();
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::task::spawn_blocking(move || {
        let sink = ChannelSink::new(tx);
        if let Err(e) = batch::execute(&config, scope, timeout, &sink) {
            // Directory failures surface as a terminal error frame.
            sink.emit(ProgressEvent::new(EventKind::Error, e.to_string()));
        }
    });

    Ok(ndjson_response(rx))
}

fn ndjson_response(rx: mpsc::UnboundedReceiver<ProgressEvent>) -> Response {
    let stream = UnboundedReceiverStream::new(rx).filter_map(|event| {
        match serde_json::to_string(&event) {
            Ok(mut line) => {
                line.push('\n');
                Some(Ok::<Bytes, std::convert::Infallible>(Bytes::from(line)))
            }
            Err(e) => {
                error!(error = %e, "dropping unserializable event frame");
                None
            }
        }
    });

    (
        [(header::CONTENT_TYPE, "application/x-ndjson")],
        Body::from_stream(stream),
    )
        .into_response()
}

async fn load_directory(
    state: &AppState,
) -> Result<Directory, (StatusCode, Json<ApiResponse>)> {
    let path = state.config.directory_file.clone();
    tokio::task::spawn_blocking(move || Directory::load(&path))
        .await
        .map_err(internal_error)?
        .map_err(|e| {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::fail(format!("{e:#}"), None)),
            )
        })
}

fn validated_timeout(
    state: &AppState,
    requested: Option<u64>,
) -> Result<u64, (StatusCode, Json<ApiResponse>)> {
    let timeout = requested.unwrap_or(state.config.default_timeout_secs);
    batch::validate_timeout(timeout).map_err(|e| {
        (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::fail(e.to_string(), None)),
        )
    })?;
    Ok(timeout)
}

fn require_credentials(state: &AppState) -> Result<(), (StatusCode, Json<ApiResponse>)> {
    if state.config.credentials.is_none() {
        return Err(precondition_response(PreconditionError::MissingCredentials));
    }
    Ok(())
}

fn precondition_response(error: PreconditionError) -> (StatusCode, Json<ApiResponse>) {
    let status = match error {
        PreconditionError::InvalidTimeout(_) => StatusCode::BAD_REQUEST,
        PreconditionError::MissingCredentials => StatusCode::INTERNAL_SERVER_ERROR,
        PreconditionError::Directory(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(ApiResponse::fail(error.to_string(), None)))
}

fn not_found(location: &str) -> (StatusCode, Json<ApiResponse>) {
    (
        StatusCode::NOT_FOUND,
        Json(ApiResponse::fail(
            format!("Location '{location}' not found"),
            None,
        )),
    )
}

fn internal_error(e: tokio::task::JoinError) -> (StatusCode, Json<ApiResponse>) {
    error!(error = %e, "blocking task failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ApiResponse::fail("internal processing error", None)),
    )
}

fn to_value<T: Serialize>(value: &T) -> Option<serde_json::Value> {
    serde_json::to_value(value).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_skips_absent_data() {
        let json = serde_json::to_value(ApiResponse::fail("nope", None)).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["message"], "nope");
        assert!(json.get("data").is_none());

        let json =
            serde_json::to_value(ApiResponse::ok("done", Some(serde_json::json!({"n": 1}))))
                .unwrap();
        assert_eq!(json["data"]["n"], 1);
    }

    #[test]
    fn batch_request_timeout_is_optional() {
        let request: BatchRequest = serde_json::from_str("{}").unwrap();
        assert_eq!(request.timeout, None);

        let request: BatchRequest = serde_json::from_str(r#"{"timeout": 30}"#).unwrap();
        assert_eq!(request.timeout, Some(30));

        // Non-numeric timeouts are rejected at the serde boundary.
        assert!(serde_json::from_str::<BatchRequest>(r#"{"timeout": "soon"}"#).is_err());
    }
}
