use crate::frame::Frame;
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
};
use bytes::Bytes;
use std::sync::Arc;
use tracing::{debug, info, trace};

use super::server::ServerState;
use super::stats::StreamCounters;

pub(crate) const BOUNDARY: &str = "FRAME";

/// Decrements the client count when the response stream is dropped
struct ClientGuard(Arc<StreamCounters>);

impl Drop for ClientGuard {
    fn drop(&mut self) {
        let remaining = self.0.disconnect();
        info!("MJPEG client disconnected ({} remaining)", remaining);
    }
}

/// One multipart part: headers, JPEG bytes and the trailing CRLF
pub(crate) fn multipart_part(frame: &Frame) -> Bytes {
    let header = format!(
        "--{}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
        BOUNDARY,
        frame.data.len()
    );
    let mut part = Vec::with_capacity(header.len() + frame.data.len() + 2);
    part.extend_from_slice(header.as_bytes());
    part.extend_from_slice(&frame.data);
    part.extend_from_slice(b"\r\n");
    Bytes::from(part)
}

/// Handler for MJPEG streaming endpoint
pub async fn mjpeg_stream_handler(State(state): State<ServerState>) -> Response {
    let clients = state.counters.connect();
    info!("New MJPEG stream client connected ({} active)", clients);
    // Owned by the body from here, so a response dropped unpolled still disconnects
    let guard = ClientGuard(Arc::clone(&state.counters));

    let mut frames = state.frame_source.watch();
    let counters = Arc::clone(&state.counters);
    let shutdown = state.shutdown.clone();

    let stream = async_stream::stream! {
        let _guard = guard;
        let mut last_seq = None;

        loop {
            let frame = frames.borrow_and_update().clone();
            if let Some(frame) = frame {
                if last_seq != Some(frame.seq) {
                    last_seq = Some(frame.seq);
                    trace!("Streaming frame {} ({} bytes)", frame.seq, frame.data.len());
                    counters.record_frame(frame.data.len());
                    yield Ok::<_, std::io::Error>(multipart_part(&frame));
                }
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                changed = frames.changed() => {
                    if changed.is_err() {
                        debug!("Frame source closed; ending stream");
                        break;
                    }
                }
            }
        }
    };

    Response::builder()
        .status(StatusCode::OK)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/x-mixed-replace; boundary={}", BOUNDARY),
        )
        .header(header::CACHE_CONTROL, "no-cache, private")
        .header(header::PRAGMA, "no-cache")
        .body(axum::body::Body::from_stream(stream))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

/// Handler for health check endpoint
pub async fn health_handler(State(state): State<ServerState>) -> impl IntoResponse {
    let camera = state.frame_source.stats();
    let stream = state.counters.snapshot();

    let health_info = serde_json::json!({
        "status": if camera.connected { "healthy" } else { "degraded" },
        "camera": {
            "connected": camera.connected,
            "frames_produced": camera.frames_produced,
            "frames_dropped": camera.frames_dropped,
            "read_errors": camera.read_errors,
            "last_seq": camera.last_seq,
            "subscribers": camera.subscribers,
        },
        "stream": {
            "clients": stream.active_connections,
            "total_connections": stream.total_connections,
            "frames_streamed": stream.frames_streamed,
        },
        "uptime_seconds": state.started.elapsed().as_secs(),
    });

    (StatusCode::OK, axum::Json(health_info))
}

/// Minimal page embedding the stream
pub async fn stream_page_handler() -> impl IntoResponse {
    Html(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="utf-8">
    <meta name="viewport" content="width=device-width, initial-scale=1">
    <title>Doorcam Stream</title>
    <style>
        :root { color-scheme: dark; }
        body {
            margin: 0;
            background: #000;
            display: flex;
            align-items: center;
            justify-content: center;
            min-height: 100vh;
        }
        img.stream {
            display: block;
            max-width: 100vw;
            max-height: 100vh;
            object-fit: contain;
        }
    </style>
</head>
<body>
    <img class="stream" src="/stream.mjpg" alt="Doorcam stream">
</body>
</html>
"#,
    )
}
