//! HTTP interface.
//!
//! JSON control API, the MJPEG live view, capture file management and the
//! Prometheus endpoint, all served from one axum router.

mod files;
mod handlers;
mod system;

pub use files::{is_safe_name, FileEntry, FileKind};
pub use handlers::ApiError;
pub use system::{cpu_temperature, disk_usage, DiskUsage, SystemInfo};

use crate::metrics::MetricsRegistry;
use crate::preview::PreviewBroadcaster;
use crate::session::SessionCoordinator;
use axum::{
    routing::{get, post},
    Router,
};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tower_http::cors::CorsLayer;

/// Errors that can occur while running the HTTP server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind to address: {0}")]
    Bind(#[from] std::io::Error),

    #[error("server error: {0}")]
    Server(String),
}

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub session: Arc<SessionCoordinator>,
    pub preview: Arc<PreviewBroadcaster>,
    pub metrics: Arc<MetricsRegistry>,
}

/// Builds the complete router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
        .route("/stream", get(handlers::stream))
        .route("/api/snapshot", get(handlers::snapshot))
        .route(
            "/api/settings",
            get(handlers::get_settings).post(handlers::post_settings),
        )
        .route("/api/preset", post(handlers::apply_preset))
        .route("/api/capture", post(handlers::capture))
        .route("/api/video/start", post(handlers::start_video))
        .route("/api/video/stop", post(handlers::stop_video))
        .route("/api/files", get(files::list))
        .route(
            "/api/files/:name",
            get(files::download).delete(files::delete),
        )
        .route("/api/system", get(system::info))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// The camera service's HTTP server.
pub struct ApiServer {
    bind_addr: SocketAddr,
    state: AppState,
}

impl ApiServer {
    pub fn new(bind_addr: SocketAddr, state: AppState) -> Self {
        Self { bind_addr, state }
    }

    /// Serves requests until `shutdown` resolves, then drains open connections.
    pub async fn run<F>(self, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let app = router(self.state);
        let listener = tokio::net::TcpListener::bind(self.bind_addr).await?;

        tracing::info!(addr = %self.bind_addr, "HTTP server listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| ServerError::Server(e.to_string()))?;

        tracing::info!("HTTP server shut down");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CameraConfig, Resolution, VideoConfig};
    use crate::controls::{ControlRegistry, PresetTable};
    use crate::pipeline::CapturePipeline;
    use crate::source::SyntheticSource;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request, StatusCode};
    use serde_json::{json, Value};
    use tempfile::TempDir;
    use tower::ServiceExt;

    fn test_state() -> (AppState, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let camera = CameraConfig {
            preview_size: Resolution::new(64, 48),
            still_size: Resolution::new(96, 72),
            video_size: Resolution::new(64, 48),
            ..CameraConfig::default()
        };
        let registry = ControlRegistry::hq_camera();
        let presets = PresetTable::load(&registry, &[]).unwrap();
        let session = SessionCoordinator::new(
            registry,
            presets,
            Box::new(SyntheticSource::new(&camera)),
            CapturePipeline::new(dir.path(), VideoConfig::default()).unwrap(),
        );
        let state = AppState {
            session: Arc::new(session),
            preview: Arc::new(PreviewBroadcaster::new(4)),
            metrics: Arc::new(MetricsRegistry::new().unwrap()),
        };
        (state, dir)
    }

    async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut request = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(json) => {
                request = request.header(header::CONTENT_TYPE, "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        let response = app
            .clone()
            .oneshot(request.body(body).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }

    #[tokio::test]
    async fn test_health() {
        let (state, _dir) = test_state();
        let response = router(state)
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_get_settings() {
        let (state, _dir) = test_state();
        let app = router(state);
        let (status, body) = send(&app, "GET", "/api/settings", None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["settings"]["ExposureTime"], 10_000);
        assert_eq!(body["meta"]["AnalogueGain"]["type"], "float");
        assert_eq!(body["is_recording"], false);
        assert_eq!(body["source"]["kind"], "synthetic");
        assert!(body["presets"].as_array().unwrap().len() >= 4);
    }

    #[tokio::test]
    async fn test_out_of_range_maps_to_422() {
        let (state, _dir) = test_state();
        let app = router(state);
        let (status, body) = send(
            &app,
            "POST",
            "/api/settings",
            Some(json!({"settings": {"AnalogueGain": 999}})),
        )
        .await;

        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["error"], "out_of_range");
        let (_, settings) = send(&app, "GET", "/api/settings", None).await;
        assert_eq!(settings["settings"]["AnalogueGain"], 1.0);
    }

    #[tokio::test]
    async fn test_unknown_parameter_maps_to_400() {
        let (state, _dir) = test_state();
        let app = router(state);
        let (status, body) = send(
            &app,
            "POST",
            "/api/settings",
            Some(json!({"settings": {"Foo": 1}})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "invalid_parameter");
    }

    #[tokio::test]
    async fn test_malformed_body_rejected() {
        let (state, _dir) = test_state();
        let app = router(state);
        let (status, body) = send(&app, "POST", "/api/settings", Some(json!([1, 2]))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "invalid_request");
    }

    #[tokio::test]
    async fn test_apply_preset() {
        let (state, _dir) = test_state();
        let app = router(state);
        let (status, body) =
            send(&app, "POST", "/api/preset", Some(json!({"preset": "deep_sky"}))).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["preset"], "deep_sky");
        assert_eq!(body["settings"]["ExposureTime"], 30_000_000);
        assert_eq!(body["settings"]["AnalogueGain"], 8.0);
    }

    #[tokio::test]
    async fn test_recording_flow() {
        let (state, _dir) = test_state();
        let app = router(state);

        let (status, started) =
            send(&app, "POST", "/api/video/start", Some(json!({"fps": 25}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(started["recording"], true);

        let (status, body) = send(&app, "POST", "/api/capture", Some(json!({}))).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "busy");

        let file = started["file"].as_str().unwrap().to_string();
        let (status, _) = send(&app, "DELETE", &format!("/api/files/{file}"), None).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, stopped) = send(&app, "POST", "/api/video/stop", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(stopped["recording"], false);
        assert_eq!(stopped["file"], file.as_str());
        assert!(stopped["frames"].as_u64().unwrap() >= 1);

        let (status, body) = send(&app, "POST", "/api/video/stop", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "not_recording");
    }

    #[tokio::test]
    async fn test_fps_out_of_range() {
        let (state, _dir) = test_state();
        let app = router(state);
        let (status, _) = send(&app, "POST", "/api/video/start", Some(json!({"fps": 120}))).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_invalid_fps_never_starts_recording() {
        let (state, _dir) = test_state();
        let session = Arc::clone(&state.session);
        let app = router(state);

        let (status, body) = send(&app, "POST", "/api/video/start", Some(json!({"fps": -1}))).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["error"], "out_of_range");

        let (status, body) = send(
            &app,
            "POST",
            "/api/video/start",
            Some(json!({"fps": 5_000_000_000u64})),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["error"], "out_of_range");

        let (status, body) =
            send(&app, "POST", "/api/video/start", Some(json!({"fps": "fast"}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "invalid_request");

        assert_eq!(session.phase(), crate::session::Phase::Idle);
    }

    #[tokio::test]
    async fn test_start_without_body_uses_default_fps() {
        let (state, _dir) = test_state();
        let app = router(state);

        let (status, started) = send(&app, "POST", "/api/video/start", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(started["fps"], 25);

        let (status, _) = send(&app, "POST", "/api/video/stop", None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_non_boolean_raw_rejected() {
        let (state, dir) = test_state();
        let app = router(state);

        let (status, body) = send(&app, "POST", "/api/capture", Some(json!({"raw": "yes"}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "invalid_request");
        assert!(std::fs::read_dir(dir.path()).unwrap().next().is_none());

        let (status, body) = send(&app, "POST", "/api/capture", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["files"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_capture_list_download_delete() {
        let (state, _dir) = test_state();
        let app = router(state);

        let (status, body) = send(&app, "POST", "/api/capture", Some(json!({"raw": true}))).await;
        assert_eq!(status, StatusCode::OK);
        let files = body["files"].as_array().unwrap();
        assert_eq!(files.len(), 2);
        let jpeg = files[0].as_str().unwrap().to_string();
        assert!(jpeg.ends_with(".jpg"));

        let (status, listing) = send(&app, "GET", "/api/files", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(listing["files"].as_array().unwrap().len(), 2);

        let response = app
            .clone()
            .oneshot(
                Request::get(format!("/api/files/{jpeg}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "image/jpeg");
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);

        let (status, _) = send(&app, "DELETE", &format!("/api/files/{jpeg}"), None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = send(&app, "DELETE", &format!("/api/files/{jpeg}"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_path_traversal_forbidden() {
        let (state, _dir) = test_state();
        let app = router(state);
        let (status, body) = send(&app, "GET", "/api/files/..%2Fsecret", None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"], "forbidden");
        let (status, _) = send(&app, "DELETE", "/api/files/.hidden", None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_snapshot_is_jpeg() {
        let (state, _dir) = test_state();
        let response = router(state)
            .oneshot(Request::get("/api/snapshot").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "image/jpeg");
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let (state, _dir) = test_state();
        let app = router(state);
        send(&app, "POST", "/api/capture", Some(json!({}))).await;

        let response = app
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8_lossy(&bytes);
        assert!(text.contains("hqastrocam_captures_total 1"));
    }

    #[tokio::test]
    async fn test_system_info() {
        let (state, _dir) = test_state();
        let app = router(state);
        let (status, body) = send(&app, "GET", "/api/system", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["captures"]["files"], 0);
        assert!(body["captures_dir"].is_string());
    }
}
