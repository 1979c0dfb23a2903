//! HTTP re-broadcast of the live stream.
//!
//! Serves a small viewer page and re-encodes the latest frame as JPEG into a
//! `multipart/x-mixed-replace` stream, the format browsers render natively
//! from a plain `<img>` tag. Runs on its own port, independent of the TCP
//! stream port, and also exposes the rotate/record/snapshot controls.

use std::convert::Infallible;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_stream::{wrappers::IntervalStream, StreamExt};
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::{debug, info};

use crate::config::ReceiverConfig;
use crate::distributor::{DistributorStats, FrameDistributor};
use crate::recorder::{self, RecorderHandle};
use crate::state::{ConnectionState, StatusRx};

/// Boundary separating frames in the multipart stream. Arbitrary, but must
/// never occur inside JPEG data.
const MJPEG_BOUNDARY: &str = "mjpeg-link-frame";

const INDEX_HTML: &str = r#"<!DOCTYPE html>
<html>
<head>
    <title>Camera Stream</title>
    <style>
        body { text-align: center; font-family: Arial, sans-serif; background: #f0f0f0; }
        img { max-width: 100%; background: #000; }
        button { margin: 10px 4px 0; padding: 8px 16px; font-size: 16px; cursor: pointer;
                 background-color: #007bff; color: white; border: none; border-radius: 5px; }
    </style>
</head>
<body>
    <h2>Camera Stream</h2>
    <img id="stream" src="/video" width="640" />
    <br>
    <button onclick="document.getElementById('stream').requestFullscreen()">Full View</button>
    <button onclick="fetch('/rotate', {method: 'POST'})">Rotate</button>
    <button onclick="fetch('/snapshot', {method: 'POST'})">Save Snapshot</button>
    <button onclick="fetch('/record/start', {method: 'POST'})">Record</button>
    <button onclick="fetch('/record/stop', {method: 'POST'})">Stop</button>
</body>
</html>
"#;

#[derive(Clone)]
pub struct AppState {
    distributor: Arc<FrameDistributor>,
    recorder: RecorderHandle,
    status: StatusRx,
    frame_interval: Duration,
    quality: u8,
    record_dir: PathBuf,
}

/// Starts the re-broadcast server; returns when cancelled.
pub async fn run_server(
    config: &ReceiverConfig,
    distributor: Arc<FrameDistributor>,
    recorder: RecorderHandle,
    status: StatusRx,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let state = AppState {
        distributor,
        recorder,
        status,
        frame_interval: Duration::from_millis(config.frame_interval_ms),
        quality: config.jpeg_quality,
        record_dir: config.record_dir.clone(),
    };

    let app = Router::new()
        .route("/", get(index_handler))
        .route("/video", get(video_handler))
        .route("/snapshot", get(snapshot_handler).post(save_snapshot_handler))
        .route("/rotate", post(rotate_handler))
        .route("/record/start", post(record_start_handler))
        .route("/record/stop", post(record_stop_handler))
        .route("/recordings", get(recordings_handler))
        .route("/status", get(status_handler))
        .route("/health", get(health_handler))
        .layer(CorsLayer::permissive())
        .with_state(state);

    let addr = format!("{}:{}", config.listen_addr, config.http_port);
    let listener = TcpListener::bind(&addr).await?;
    info!(addr = %listener.local_addr()?, "re-broadcast server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;

    info!("re-broadcast server stopped");
    Ok(())
}

async fn index_handler() -> Html<&'static str> {
    Html(INDEX_HTML)
}

/// Streams the latest frame at a fixed cadence. Each client is an
/// independent reader of the single slot: no queue, a slow client just sees
/// fewer (always fresh) frames.
async fn video_handler(State(state): State<AppState>) -> Response {
    let distributor = Arc::clone(&state.distributor);
    let quality = state.quality;

    let interval = tokio::time::interval(state.frame_interval);
    let stream = IntervalStream::new(interval).filter_map(move |_| {
        let frame = distributor.read()?;
        match frame.encode_jpeg(quality) {
            Ok(jpeg) => Some(Ok::<_, Infallible>(multipart_part(&jpeg))),
            Err(e) => {
                debug!(error = %e, "re-encode for broadcast failed");
                None
            }
        }
    });

    Response::builder()
        .status(StatusCode::OK)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/x-mixed-replace; boundary={MJPEG_BOUNDARY}"),
        )
        .header(header::CACHE_CONTROL, "no-cache, no-store, must-revalidate")
        .body(Body::from_stream(stream))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

/// One boundary-delimited part of the multipart stream.
fn multipart_part(jpeg: &Bytes) -> Bytes {
    let headers = format!(
        "--{MJPEG_BOUNDARY}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
        jpeg.len()
    );

    let mut part = Vec::with_capacity(headers.len() + jpeg.len() + 2);
    part.extend_from_slice(headers.as_bytes());
    part.extend_from_slice(jpeg);
    part.extend_from_slice(b"\r\n");
    Bytes::from(part)
}

async fn snapshot_handler(State(state): State<AppState>) -> Response {
    let Some(frame) = state.distributor.read() else {
        return (StatusCode::SERVICE_UNAVAILABLE, "no frame available").into_response();
    };

    match frame.encode_jpeg(state.quality) {
        Ok(jpeg) => ([(header::CONTENT_TYPE, "image/jpeg")], jpeg).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

#[derive(Serialize)]
struct RotateResponse {
    rotation_degrees: u32,
}

async fn rotate_handler(State(state): State<AppState>) -> Json<RotateResponse> {
    let rotation = state.distributor.rotate_90();
    info!(degrees = %rotation.degrees(), "view rotated");
    Json(RotateResponse {
        rotation_degrees: rotation.degrees(),
    })
}

async fn save_snapshot_handler(State(state): State<AppState>) -> StatusCode {
    state.recorder.snapshot().await;
    StatusCode::ACCEPTED
}

async fn record_start_handler(State(state): State<AppState>) -> StatusCode {
    state.recorder.start().await;
    StatusCode::ACCEPTED
}

async fn record_stop_handler(State(state): State<AppState>) -> StatusCode {
    state.recorder.stop().await;
    StatusCode::ACCEPTED
}

async fn recordings_handler(State(state): State<AppState>) -> Response {
    match recorder::list_outputs(&state.record_dir).await {
        Ok(paths) => {
            let names: Vec<String> = paths
                .iter()
                .filter_map(|p| p.file_name())
                .map(|n| n.to_string_lossy().into_owned())
                .collect();
            Json(names).into_response()
        }
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

#[derive(Serialize)]
struct StatusResponse {
    state: ConnectionState,
    stats: DistributorStats,
}

async fn status_handler(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        state: *state.status.borrow(),
        stats: state.distributor.stats(),
    })
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multipart_part_wraps_jpeg_with_boundary_and_length() {
        let jpeg = Bytes::from_static(&[0xFF, 0xD8, 0x00, 0xFF, 0xD9]);
        let part = multipart_part(&jpeg);
        let text = String::from_utf8_lossy(&part);

        assert!(text.starts_with(&format!("--{MJPEG_BOUNDARY}\r\n")));
        assert!(text.contains("Content-Type: image/jpeg\r\n"));
        assert!(text.contains("Content-Length: 5\r\n"));
        assert!(part.ends_with(b"\r\n"));

        // The raw JPEG bytes sit between the blank line and trailing CRLF.
        let body_start = part
            .windows(4)
            .position(|w| w == b"\r\n\r\n")
            .map(|p| p + 4)
            .unwrap();
        assert_eq!(&part[body_start..body_start + jpeg.len()], &jpeg[..]);
    }
}
