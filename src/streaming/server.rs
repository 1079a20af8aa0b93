use crate::{
    camera::FrameSource,
    config::StreamConfig,
    error::{DoorcamError, Result, StreamError},
};
use axum::{routing::get, Router};
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::info;

use super::handlers::{health_handler, mjpeg_stream_handler, stream_page_handler};
use super::stats::{StreamCounters, StreamStats};

/// Shared state for the Axum server
#[derive(Clone)]
pub struct ServerState {
    pub(crate) frame_source: Arc<FrameSource>,
    pub(crate) counters: Arc<StreamCounters>,
    pub(crate) started: Instant,
    /// Ends every open stream on shutdown
    pub(crate) shutdown: CancellationToken,
}

/// MJPEG streaming server that serves camera frames over HTTP
pub struct StreamServer {
    pub(crate) config: StreamConfig,
    state: ServerState,
}

impl StreamServer {
    pub fn new(config: StreamConfig, frame_source: Arc<FrameSource>) -> Self {
        Self {
            config,
            state: ServerState {
                frame_source,
                counters: Arc::new(StreamCounters::default()),
                started: Instant::now(),
                shutdown: CancellationToken::new(),
            },
        }
    }

    /// Routes, without binding a socket
    pub fn router(&self) -> Router {
        Router::new()
            .route("/", get(stream_page_handler))
            .route("/stream.mjpg", get(mjpeg_stream_handler))
            .route("/health", get(health_handler))
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.config.ip, self.config.port)
    }

    /// Bind the configured address; failing here is a startup error
    pub async fn bind(&self) -> Result<TcpListener> {
        let addr = self.address();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| StreamError::BindFailed {
                address: addr.clone(),
                source: e,
            })?;
        info!("MJPEG server listening on {}", addr);
        Ok(listener)
    }

    /// Serve on an already bound listener until [`StreamServer::shutdown`] is called
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        let shutdown = self.state.shutdown.clone();
        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
            .map_err(|e| StreamError::Http {
                details: format!("Server error: {}", e),
            })?;

        info!("MJPEG server stopped");
        Ok(())
    }

    /// Bind and serve
    pub async fn run(&self) -> Result<()> {
        info!("Starting MJPEG streaming server on {}", self.address());
        let listener = self.bind().await?;
        self.serve(listener).await
    }

    /// Close open streams and stop accepting connections
    pub fn shutdown(&self) {
        self.state.shutdown.cancel();
    }

    pub fn stats(&self) -> StreamStats {
        self.state.counters.snapshot()
    }
}

/// Stream server builder for configuration
#[derive(Default)]
pub struct StreamServerBuilder {
    config: Option<StreamConfig>,
    frame_source: Option<Arc<FrameSource>>,
}

impl StreamServerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: StreamConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn frame_source(mut self, frame_source: Arc<FrameSource>) -> Self {
        self.frame_source = Some(frame_source);
        self
    }

    pub fn build(self) -> Result<StreamServer> {
        let config = self.config.ok_or_else(|| {
            DoorcamError::Stream(StreamError::StartupFailed {
                details: "Stream configuration is required".to_string(),
            })
        })?;

        let frame_source = self.frame_source.ok_or_else(|| {
            DoorcamError::Stream(StreamError::StartupFailed {
                details: "Frame source is required".to_string(),
            })
        })?;

        Ok(StreamServer::new(config, frame_source))
    }
}
