use super::{ComponentState, DoorcamOrchestrator};
use crate::capture::EventRecorder;
use crate::error::{DoorcamError, Result};
use crate::postprocess::PostProcessQueue;
use std::sync::Arc;
use tracing::{error, info};

impl DoorcamOrchestrator {
    /// Start every configured component, camera first.
    ///
    /// The first component that fails to start is marked `Failed` and its
    /// error is returned; components already running are left for
    /// [`DoorcamOrchestrator::shutdown`].
    pub async fn start(&mut self) -> Result<()> {
        info!("Starting Doorcam system");

        self.set_component_state("camera", ComponentState::Starting);
        let device = self
            .device
            .take()
            .ok_or_else(|| DoorcamError::system("Camera device already started"))?;
        let started = self.frame_source.start(device);
        self.record_start("camera", started)?;

        #[cfg(feature = "streaming")]
        if let Some(server) = self.stream_server.clone() {
            self.set_component_state("streaming", ComponentState::Starting);
            let listener = server.bind().await;
            let listener = self.record_start("streaming", listener)?;
            self.stream_task = Some(tokio::spawn(async move {
                let result = server.serve(listener).await;
                if let Err(e) = &result {
                    error!("Stream server error: {}", e);
                }
                result
            }));
        }

        if let Some(analyzer) = self.analyzer.as_mut() {
            self.component_states
                .lock()
                .insert("analyzer".to_string(), ComponentState::Starting);
            let started = analyzer.start();
            self.record_start("analyzer", started)?;
        }

        if let Some(display) = self.display.as_mut() {
            self.component_states
                .lock()
                .insert("display".to_string(), ComponentState::Starting);
            let started = display.start();
            self.record_start("display", started)?;
        }

        #[cfg(all(feature = "touch", target_os = "linux"))]
        if let Some(touch) = self.touch.as_mut() {
            self.component_states
                .lock()
                .insert("touch".to_string(), ComponentState::Starting);
            let started = touch.start();
            self.record_start("touch", started)?;
        }

        if let Some(processor) = self.post_processor.as_ref().map(Arc::clone) {
            self.set_component_state("postprocess", ComponentState::Starting);
            let (queue, worker) = PostProcessQueue::start(processor, Some(self.event_bus.clone()));
            self.post_worker = Some(worker);
            self.set_component_state("postprocess", ComponentState::Running);

            self.set_component_state("capture", ComponentState::Starting);
            let mut recorder = EventRecorder::new(
                self.config.capture.clone(),
                self.config.event.clone(),
                self.config.camera.max_fps,
                Arc::clone(&self.frame_source),
                self.event_bus.clone(),
                Some(queue),
            );
            let started = recorder.start().await;
            self.recorder = Some(recorder);
            self.record_start("capture", started)?;
        }

        if let Some(retention) = self.retention.as_mut() {
            retention.start();
            self.set_component_state("storage", ComponentState::Running);
        }

        if let Some(keyboard) = self.keyboard.as_mut() {
            self.component_states
                .lock()
                .insert("keyboard".to_string(), ComponentState::Starting);
            let started = keyboard.start();
            self.record_start("keyboard", started)?;
        }

        info!("Doorcam system started");
        Ok(())
    }

    fn record_start<T>(&self, component: &str, result: Result<T>) -> Result<T> {
        match result {
            Ok(value) => {
                self.set_component_state(component, ComponentState::Running);
                info!("{} started", component);
                Ok(value)
            }
            Err(e) => {
                self.set_component_state(component, ComponentState::Failed);
                error!("Failed to start {}: {}", component, e);
                Err(e)
            }
        }
    }
}
