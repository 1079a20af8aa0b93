use super::backoff::RetryBackoff;
use crate::config::DisplayConfig;
use crate::error::{DoorcamError, Result, TouchError};
use crate::events::{DoorcamEvent, EventBus};
use evdev::{Device, EventType, InputEvent, InputEventKind, Key};
use std::time::SystemTime;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Key presses that count as a touch
pub fn is_touch_press(event: &InputEvent) -> bool {
    match event.kind() {
        InputEventKind::Key(Key::BTN_TOUCH | Key::BTN_LEFT | Key::BTN_RIGHT) => event.value() == 1,
        _ => false,
    }
}

/// Publishes `TouchDetected` for every press on the configured evdev device
pub struct TouchInputHandler {
    device_path: String,
    event_bus: EventBus,
    backoff: RetryBackoff,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl TouchInputHandler {
    pub fn new(config: &DisplayConfig, event_bus: EventBus) -> Self {
        Self {
            device_path: config.touch_device.clone(),
            event_bus,
            backoff: RetryBackoff::default(),
            cancel: CancellationToken::new(),
            task: None,
        }
    }

    pub fn with_backoff(mut self, backoff: RetryBackoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn start(&mut self) -> Result<()> {
        if self.task.is_some() {
            warn!("Touch input handler is already running");
            return Ok(());
        }

        info!("Starting touch input handler on {}", self.device_path);
        self.cancel = CancellationToken::new();
        let monitor = TouchMonitor {
            device_path: self.device_path.clone(),
            event_bus: self.event_bus.clone(),
            backoff: self.backoff.clone(),
        };
        self.task = Some(tokio::spawn(monitor.run(self.cancel.clone())));
        Ok(())
    }

    pub async fn stop(&mut self) -> Result<()> {
        let Some(task) = self.task.take() else {
            return Ok(());
        };
        self.cancel.cancel();
        task.await
            .map_err(|e| DoorcamError::component("touch", e.to_string()))?;
        info!("Touch input handler stopped");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.task.is_some()
    }
}

struct TouchMonitor {
    device_path: String,
    event_bus: EventBus,
    backoff: RetryBackoff,
}

impl TouchMonitor {
    async fn run(mut self, cancel: CancellationToken) {
        loop {
            let result = tokio::select! {
                _ = cancel.cancelled() => break,
                result = self.monitor() => result,
            };

            let error = match result {
                Ok(()) => return,
                Err(e) => e,
            };

            let delay = self.backoff.next_delay();
            warn!(
                "Touch device {} failed (attempt {}): {}; retrying in {:?}",
                self.device_path,
                self.backoff.attempts(),
                error,
                delay
            );
            if self.backoff.attempts() == 1 {
                self.event_bus.publish(DoorcamEvent::SystemError {
                    component: "touch".to_string(),
                    error: error.to_string(),
                });
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }
        debug!("Touch monitor exited");
    }

    async fn monitor(&mut self) -> Result<()> {
        let device = Device::open(&self.device_path).map_err(|e| TouchError::DeviceOpen {
            device: self.device_path.clone(),
            details: e.to_string(),
        })?;
        validate(&device, &self.device_path)?;
        info!(
            "Touch device {} opened ({})",
            self.device_path,
            device.name().unwrap_or("unnamed")
        );

        let mut events = device.into_event_stream().map_err(|e| TouchError::DeviceRead {
            details: e.to_string(),
        })?;

        loop {
            let event = events.next_event().await.map_err(|e| {
                error!("Touch read failed: {}", e);
                TouchError::DeviceRead {
                    details: e.to_string(),
                }
            })?;

            if is_touch_press(&event) {
                // A working read resets the retry schedule
                self.backoff.reset();
                debug!("Touch press on {}", self.device_path);
                self.event_bus.publish(DoorcamEvent::TouchDetected {
                    timestamp: SystemTime::now(),
                });
            }
        }
    }
}

fn validate(device: &Device, path: &str) -> Result<()> {
    if !device.supported_events().contains(EventType::KEY) {
        return Err(TouchError::UnsupportedDevice(format!("{} reports no key events", path)).into());
    }

    let has_touch_keys = device.supported_keys().map_or(false, |keys| {
        keys.contains(Key::BTN_TOUCH) || keys.contains(Key::BTN_LEFT) || keys.contains(Key::BTN_RIGHT)
    });
    if !has_touch_keys {
        warn!("{} has no touch buttons; listening anyway", path);
    }
    Ok(())
}
