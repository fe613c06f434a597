use super::{system, AppState};
use crate::metrics::MetricsSnapshot;
use crate::preview::jpeg_response;
use crate::session::{SessionCoordinator, SessionError, MAX_RECORDING_FPS, MIN_RECORDING_FPS};
use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

/// Error body returned by every API route: `{"error": kind, "detail": message}`.
#[derive(Debug)]
pub enum ApiError {
    Session(SessionError),
    BadRequest(String),
    Forbidden(String),
    NotFound(String),
    Conflict(String),
    Internal(String),
}

impl From<SessionError> for ApiError {
    fn from(e: SessionError) -> Self {
        ApiError::Session(e)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(e: JsonRejection) -> Self {
        ApiError::BadRequest(e.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind, detail) = match self {
            ApiError::Session(e) => {
                let status = match &e {
                    SessionError::InvalidParameter(_) | SessionError::NotRecording => {
                        StatusCode::BAD_REQUEST
                    }
                    SessionError::OutOfRange(_) => StatusCode::UNPROCESSABLE_ENTITY,
                    SessionError::Busy(_) => StatusCode::CONFLICT,
                    SessionError::DeviceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
                    SessionError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, e.kind(), e.to_string())
            }
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "invalid_request", msg),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, "forbidden", msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "busy", msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "internal", msg),
        };

        if status.is_server_error() {
            tracing::warn!(%status, kind, %detail, "Request failed");
        } else {
            tracing::debug!(%status, kind, %detail, "Request rejected");
        }

        (status, Json(json!({ "error": kind, "detail": detail }))).into_response()
    }
}

/// Runs a coordinator call on the blocking pool.
pub(super) async fn blocking<T, F>(session: &Arc<SessionCoordinator>, f: F) -> Result<T, ApiError>
where
    F: FnOnce(&SessionCoordinator) -> T + Send + 'static,
    T: Send + 'static,
{
    let session = Arc::clone(session);
    tokio::task::spawn_blocking(move || f(&session))
        .await
        .map_err(|e| ApiError::Internal(format!("worker task failed: {e}")))
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

pub(super) async fn health() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

pub(super) async fn metrics(State(state): State<AppState>) -> Response {
    let stats = match blocking(&state.session, |s| s.stats()).await {
        Ok(stats) => stats,
        Err(e) => return e.into_response(),
    };
    let temperature = tokio::task::spawn_blocking(system::cpu_temperature)
        .await
        .ok()
        .flatten();

    state.metrics.update(&MetricsSnapshot::from_components(
        &stats,
        &state.preview,
        temperature,
    ));

    match state.metrics.encode() {
        Ok(output) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            output,
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            format!("Failed to encode metrics: {e}"),
        )
            .into_response(),
    }
}

pub(super) async fn stream(State(state): State<AppState>) -> Response {
    let subscriber = state.preview.subscribe();
    let initial = state.session.latest_preview();
    tracing::debug!(viewers = state.preview.subscriber_count(), "Viewer connected");
    subscriber.into_response(Some(initial))
}

pub(super) async fn snapshot(State(state): State<AppState>) -> Result<Response, ApiError> {
    let frame = blocking(&state.session, |s| s.next_preview_frame()).await?;
    Ok(jpeg_response(frame.jpeg))
}

pub(super) async fn get_settings(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let snapshot = blocking(&state.session, |s| s.snapshot()).await?;
    let session = &state.session;
    let presets: Vec<_> = session.presets().iter().collect();

    Ok(Json(json!({
        "settings": snapshot.state.values,
        "meta": session.registry().describe(),
        "presets": presets,
        "active_preset": snapshot.state.active_preset,
        "phase": snapshot.phase,
        "is_recording": snapshot.state.recording,
        "recording": snapshot.recording,
        "interrupted": snapshot.interrupted,
        "source": session.capabilities(),
    })))
}

#[derive(Debug, Deserialize)]
pub(super) struct SettingsRequest {
    #[serde(default)]
    settings: BTreeMap<String, Value>,
}

pub(super) async fn post_settings(
    State(state): State<AppState>,
    payload: Result<Json<SettingsRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(request) = payload?;
    let updated = blocking(&state.session, move |s| s.apply_settings(&request.settings)).await??;
    Ok(Json(json!({
        "settings": updated.values,
        "active_preset": updated.active_preset,
    })))
}

#[derive(Debug, Deserialize)]
pub(super) struct PresetRequest {
    preset: String,
}

pub(super) async fn apply_preset(
    State(state): State<AppState>,
    payload: Result<Json<PresetRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(request) = payload?;
    let updated = blocking(&state.session, move |s| s.apply_preset(&request.preset)).await??;
    Ok(Json(json!({
        "settings": updated.values,
        "preset": updated.active_preset,
    })))
}

/// Reads a JSON body that the client may leave out.
///
/// Only a request without a JSON body falls back to the defaults; a body
/// that is present but does not parse is rejected.
fn optional_body<T: Default>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    match payload {
        Ok(Json(body)) => Ok(body),
        Err(JsonRejection::MissingJsonContentType(_)) => Ok(T::default()),
        Err(e) => Err(e.into()),
    }
}

#[derive(Debug, Default, Deserialize)]
pub(super) struct CaptureRequest {
    #[serde(default)]
    raw: bool,
}

pub(super) async fn capture(
    State(state): State<AppState>,
    payload: Result<Json<CaptureRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let raw = optional_body(payload)?.raw;
    let record = blocking(&state.session, move |s| s.capture(raw)).await??;
    let files: Vec<String> = record.files.iter().map(|p| file_name(p)).collect();
    Ok(Json(json!({
        "files": files,
        "created_at": record.created_at.to_rfc3339(),
    })))
}

const DEFAULT_FPS: i64 = 25;

fn default_fps() -> i64 {
    DEFAULT_FPS
}

#[derive(Debug, Deserialize)]
pub(super) struct VideoRequest {
    /// Signed so that negative rates reach the range check.
    #[serde(default = "default_fps")]
    fps: i64,
}

impl Default for VideoRequest {
    fn default() -> Self {
        Self { fps: DEFAULT_FPS }
    }
}

pub(super) async fn start_video(
    State(state): State<AppState>,
    payload: Result<Json<VideoRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let requested = optional_body(payload)?.fps;
    let fps = u32::try_from(requested).map_err(|_| {
        SessionError::OutOfRange(format!(
            "fps must be between {MIN_RECORDING_FPS} and {MAX_RECORDING_FPS}, got {requested}"
        ))
    })?;
    let session = blocking(&state.session, move |s| s.start_recording(fps)).await??;
    Ok(Json(json!({
        "file": file_name(&session.path),
        "fps": session.fps,
        "started_at": session.started_at.to_rfc3339(),
        "recording": true,
    })))
}

pub(super) async fn stop_video(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let summary = blocking(&state.session, |s| s.stop_recording()).await??;
    Ok(Json(json!({
        "file": file_name(&summary.path),
        "recording": false,
        "frames": summary.frames,
        "fps": summary.fps,
        "duration_secs": summary.duration.as_secs_f64(),
    })))
}
