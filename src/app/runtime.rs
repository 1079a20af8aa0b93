use super::{DoorcamOrchestrator, ShutdownReason};
use crate::error::{EventBusError, Result};
use crate::events::{DoorcamEvent, EventBus, EventFilter};
use tokio::signal;
use tracing::{info, warn};

impl DoorcamOrchestrator {
    /// Run until SIGINT, SIGTERM or a `ShutdownRequested` event, then shut down.
    /// Returns the process exit code.
    pub async fn run(&mut self) -> Result<i32> {
        info!("Doorcam system is running");
        let reason = wait_for_shutdown(self.event_bus.clone()).await;
        info!("Shutdown initiated: {:?}", reason);
        self.shutdown().await
    }
}

/// Resolves on SIGINT, SIGTERM or a `ShutdownRequested` event on the bus
pub(crate) async fn wait_for_shutdown(event_bus: EventBus) -> ShutdownReason {
    let mut requests = event_bus.subscribe_filtered(
        EventFilter::EventTypes(vec!["shutdown_requested"]),
        "orchestrator",
    );

    let bus_request = async move {
        loop {
            match requests.recv().await {
                Ok(DoorcamEvent::ShutdownRequested { reason, .. }) => {
                    return ShutdownReason::UserRequest(reason)
                }
                Ok(_) => {}
                Err(EventBusError::Lagged { skipped }) => {
                    warn!("Shutdown listener lagged by {} events", skipped);
                }
                Err(_) => return ShutdownReason::EventBusClosed,
            }
        }
    };

    tokio::select! {
        reason = bus_request => reason,
        _ = signal::ctrl_c() => ShutdownReason::Signal("SIGINT"),
        _ = terminate() => ShutdownReason::Signal("SIGTERM"),
    }
}

#[cfg(unix)]
async fn terminate() {
    match signal::unix::signal(signal::unix::SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            warn!("Failed to register SIGTERM handler: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate() {
    std::future::pending::<()>().await;
}
