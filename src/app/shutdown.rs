use super::{ComponentState, DoorcamOrchestrator};
use crate::error::{DoorcamError, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{error, info, warn};

impl DoorcamOrchestrator {
    /// Stop components in reverse start order. Returns the process exit code:
    /// 0 when everything stopped cleanly, 1 otherwise.
    pub async fn shutdown(&mut self) -> Result<i32> {
        info!("Beginning graceful shutdown");
        let limit = self.stop_timeout;
        let states = &self.component_states;
        let mut clean = true;

        if let Some(keyboard) = self.keyboard.as_mut() {
            clean &= stop_component(states, "keyboard", limit, keyboard.stop()).await;
        }

        if let Some(retention) = self.retention.as_mut() {
            clean &= stop_component(states, "storage", limit, retention.stop()).await;
        }

        // Seals the open event; the recorder owns the last queue handle
        if let Some(mut recorder) = self.recorder.take() {
            clean &= stop_component(states, "capture", limit, recorder.stop()).await;
        }

        if let Some(worker) = self.post_worker.take() {
            let abort = worker.abort_handle();
            let drained = stop_component(states, "postprocess", limit, async move {
                worker
                    .await
                    .map_err(|e| DoorcamError::component("postprocess", e.to_string()))
            })
            .await;
            if !drained {
                warn!("Abandoning unfinished post-processing jobs");
                abort.abort();
            }
            clean &= drained;
        }

        #[cfg(all(feature = "touch", target_os = "linux"))]
        if let Some(touch) = self.touch.as_mut() {
            clean &= stop_component(states, "touch", limit, touch.stop()).await;
        }

        if let Some(display) = self.display.as_mut() {
            clean &= stop_component(states, "display", limit, display.stop()).await;
        }

        if let Some(analyzer) = self.analyzer.as_mut() {
            clean &= stop_component(states, "analyzer", limit, analyzer.stop()).await;
        }

        #[cfg(feature = "streaming")]
        if let Some(server) = self.stream_server.as_ref() {
            server.shutdown();
            if let Some(task) = self.stream_task.take() {
                clean &= stop_component(states, "streaming", limit, async move {
                    task.await
                        .map_err(|e| DoorcamError::component("streaming", e.to_string()))?
                })
                .await;
            }
        }

        if self.device.is_none() {
            clean &= stop_component(states, "camera", limit, self.frame_source.close()).await;
        }

        let exit_code = if clean { 0 } else { 1 };
        info!("Graceful shutdown completed with exit code: {}", exit_code);
        Ok(exit_code)
    }
}

/// Run one component's stop under a time limit, tracking its state.
/// Returns true when it stopped cleanly.
async fn stop_component<F>(
    states: &Mutex<HashMap<String, ComponentState>>,
    component: &str,
    limit: Duration,
    stop: F,
) -> bool
where
    F: Future<Output = Result<()>>,
{
    info!("Stopping {} component", component);
    states
        .lock()
        .insert(component.to_string(), ComponentState::Stopping);

    let (state, clean) = match timeout(limit, stop).await {
        Ok(Ok(())) => {
            info!("{} component stopped", component);
            (ComponentState::Stopped, true)
        }
        Ok(Err(e)) => {
            error!("Error stopping {} component: {}", component, e);
            (ComponentState::Failed, false)
        }
        Err(_) => {
            error!("{} component stop timed out after {:?}", component, limit);
            (ComponentState::Failed, false)
        }
    };

    states.lock().insert(component.to_string(), state);
    clean
}
