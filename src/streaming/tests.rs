use super::handlers::multipart_part;
use super::server::StreamServerBuilder;
use crate::camera::FrameSource;
use crate::config::{DoorcamConfig, StreamConfig};
use crate::frame::Frame;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

fn stream_config() -> StreamConfig {
    let mut config = DoorcamConfig::default().stream;
    config.ip = "127.0.0.1".to_string();
    config.port = 0;
    config
}

fn server_with_source() -> (super::StreamServer, Arc<FrameSource>) {
    let source = Arc::new(FrameSource::new(30, 8, None));
    let server = StreamServerBuilder::new()
        .config(stream_config())
        .frame_source(Arc::clone(&source))
        .build()
        .unwrap();
    (server, source)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[test]
fn test_builder_requires_parts() {
    assert!(StreamServerBuilder::new().config(stream_config()).build().is_err());

    let source = Arc::new(FrameSource::new(30, 8, None));
    assert!(StreamServerBuilder::new().frame_source(source).build().is_err());
}

#[test]
fn test_multipart_part_layout() {
    let frame = Frame::new(3, vec![0xFF, 0xD8, 0x01, 0xFF, 0xD9], 1, 1);
    let part = multipart_part(&frame);

    let expected_header = b"--FRAME\r\nContent-Type: image/jpeg\r\nContent-Length: 5\r\n\r\n";
    assert!(part.starts_with(expected_header));
    assert!(part.ends_with(b"\xFF\xD9\r\n"));
    assert_eq!(part.len(), expected_header.len() + 5 + 2);
}

#[tokio::test]
async fn test_index_embeds_stream() {
    let (server, _source) = server_with_source();
    let response = server.router().oneshot(get("/")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let html = String::from_utf8(body.to_vec()).unwrap();
    assert!(html.contains("/stream.mjpg"));
}

#[tokio::test]
async fn test_health_reports_camera_counters() {
    let (server, source) = server_with_source();
    source.publish(vec![0xFF, 0xD8, 0xFF, 0xD9], 1, 1);

    let response = server.router().oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["camera"]["frames_produced"], 1);
    assert_eq!(json["camera"]["last_seq"], 0);
    assert_eq!(json["stream"]["clients"], 0);
    assert!(json["uptime_seconds"].is_u64());
}

#[tokio::test]
async fn test_stream_delivers_new_frames() {
    let (server, source) = server_with_source();
    source.publish(vec![0xFF, 0xD8, 0x00, 0xFF, 0xD9], 1, 1);

    let response = server.router().oneshot(get("/stream.mjpg")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "multipart/x-mixed-replace; boundary=FRAME"
    );
    assert_eq!(response.headers()[header::CACHE_CONTROL], "no-cache, private");
    assert_eq!(response.headers()[header::PRAGMA], "no-cache");
    assert_eq!(server.stats().active_connections, 1);

    let mut body = response.into_body().into_data_stream();

    // The current frame goes out immediately
    let first = body.next().await.unwrap().unwrap();
    assert!(first.ends_with(b"\xFF\xD8\x00\xFF\xD9\r\n"));

    // Then each new frame once
    source.publish(vec![0xFF, 0xD8, 0x01, 0xFF, 0xD9], 1, 1);
    let second = tokio::time::timeout(Duration::from_secs(2), body.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert!(second.ends_with(b"\xFF\xD8\x01\xFF\xD9\r\n"));

    drop(body);
    assert_eq!(server.stats().active_connections, 0);
    assert_eq!(server.stats().frames_streamed, 2);
}

#[tokio::test]
async fn test_client_released_when_response_dropped_unread() {
    let (server, _source) = server_with_source();

    let response = server.router().oneshot(get("/stream.mjpg")).await.unwrap();
    assert_eq!(server.stats().active_connections, 1);

    drop(response);
    let stats = server.stats();
    assert_eq!(stats.active_connections, 0);
    assert_eq!(stats.total_connections, 1);
    assert_eq!(stats.frames_streamed, 0);
}

#[tokio::test]
async fn test_shutdown_ends_open_streams() {
    let (server, _source) = server_with_source();
    let response = server.router().oneshot(get("/stream.mjpg")).await.unwrap();
    let mut body = response.into_body().into_data_stream();

    server.shutdown();
    let end = tokio::time::timeout(Duration::from_secs(2), body.next())
        .await
        .unwrap();
    assert!(end.is_none());
}

#[tokio::test]
async fn test_serves_over_tcp_until_shutdown() {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let (server, _source) = server_with_source();
    let server = Arc::new(server);
    let listener = server.bind().await.unwrap();
    let addr = listener.local_addr().unwrap();

    let serving = Arc::clone(&server);
    let task = tokio::spawn(async move { serving.serve(listener).await });

    let mut socket = tokio::net::TcpStream::connect(addr).await.unwrap();
    socket
        .write_all(b"GET /health HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();
    let mut response = String::new();
    socket.read_to_string(&mut response).await.unwrap();
    assert!(response.starts_with("HTTP/1.1 200"));
    assert!(response.contains("uptime_seconds"));

    server.shutdown();
    tokio::time::timeout(Duration::from_secs(2), task)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_bind_conflict_is_reported() {
    let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let mut config = stream_config();
    config.port = taken.local_addr().unwrap().port();

    let source = Arc::new(FrameSource::new(30, 8, None));
    let server = StreamServerBuilder::new()
        .config(config)
        .frame_source(source)
        .build()
        .unwrap();

    let err = server.bind().await.unwrap_err();
    assert!(matches!(
        err,
        crate::error::DoorcamError::Stream(crate::error::StreamError::BindFailed { .. })
    ));
}
