use super::converter::DisplayConverter;
use super::devices::{Backlight, FrameSink, FramebufferSink, SysfsBacklight};
use super::stats::DisplayStats;
use super::window::ActivationWindow;
use crate::camera::FrameSource;
use crate::config::DisplayConfig;
use crate::error::{DoorcamError, EventBusError, Result};
use crate::events::{DoorcamEvent, EventBus, EventFilter, EventReceiver};
use crate::frame::Frame;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

struct Renderer {
    converter: DisplayConverter,
    backlight: Box<dyn Backlight>,
    sink: Box<dyn FrameSink>,
}

impl Renderer {
    fn render(&mut self, frame: &Frame) -> Result<()> {
        let rgb565 = self.converter.convert(&frame.data)?;
        self.sink.write_frame(&rgb565)
    }

    /// Off blanks the panel before the backlight goes dark
    fn set_power(&mut self, on: bool) -> Result<()> {
        if on {
            return self.backlight.set_power(true);
        }
        let blank = vec![0u8; self.converter.frame_len()];
        let blanked = self.sink.write_frame(&blank);
        self.backlight.set_power(false)?;
        blanked
    }
}

/// Local screen: wakes on triggers, shows live frames, sleeps after the
/// activation period
pub struct DisplayController {
    config: DisplayConfig,
    frame_source: Arc<FrameSource>,
    event_bus: EventBus,
    renderer: Arc<Mutex<Renderer>>,
    stats: Arc<Mutex<DisplayStats>>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl DisplayController {
    /// Controller for the configured framebuffer and backlight devices
    pub fn new(config: DisplayConfig, frame_source: Arc<FrameSource>, event_bus: EventBus) -> Self {
        let backlight = Box::new(SysfsBacklight::new(&config.backlight_device));
        let sink = Box::new(FramebufferSink::new(&config.framebuffer_device));
        Self::with_devices(config, frame_source, event_bus, backlight, sink)
    }

    pub fn with_devices(
        config: DisplayConfig,
        frame_source: Arc<FrameSource>,
        event_bus: EventBus,
        backlight: Box<dyn Backlight>,
        sink: Box<dyn FrameSink>,
    ) -> Self {
        let converter = DisplayConverter::new(config.resolution, config.rotation);
        Self {
            config,
            frame_source,
            event_bus,
            renderer: Arc::new(Mutex::new(Renderer {
                converter,
                backlight,
                sink,
            })),
            stats: Arc::new(Mutex::new(DisplayStats::default())),
            cancel: CancellationToken::new(),
            task: None,
        }
    }

    pub fn start(&mut self) -> Result<()> {
        if self.task.is_some() {
            warn!("Display controller is already running");
            return Ok(());
        }

        info!(
            "Starting display controller on {} ({}x{}, {}s activation)",
            self.config.framebuffer_device,
            self.config.resolution.0,
            self.config.resolution.1,
            self.config.activation_period_seconds
        );

        self.cancel = CancellationToken::new();
        let display = DisplayLoop {
            window: ActivationWindow::new(Duration::from_secs(
                self.config.activation_period_seconds as u64,
            )),
            renderer: Arc::clone(&self.renderer),
            stats: Arc::clone(&self.stats),
        };

        let frames = self.frame_source.watch();
        let triggers = self
            .event_bus
            .subscribe_filtered(EventFilter::Triggers, "display_controller");
        self.task = Some(tokio::spawn(display.run(frames, triggers, self.cancel.clone())));
        Ok(())
    }

    /// Stop the loop, blank the panel and switch the backlight off
    pub async fn stop(&mut self) -> Result<()> {
        let Some(task) = self.task.take() else {
            return Ok(());
        };
        self.cancel.cancel();
        task.await
            .map_err(|e| DoorcamError::component("display", e.to_string()))?;
        info!("Display controller stopped");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.task.is_some()
    }

    pub fn is_active(&self) -> bool {
        self.stats.lock().active
    }

    pub fn stats(&self) -> DisplayStats {
        self.stats.lock().clone()
    }

    pub fn config(&self) -> &DisplayConfig {
        &self.config
    }
}

struct DisplayLoop {
    window: ActivationWindow,
    renderer: Arc<Mutex<Renderer>>,
    stats: Arc<Mutex<DisplayStats>>,
}

impl DisplayLoop {
    async fn run(
        mut self,
        mut frames: watch::Receiver<Option<Frame>>,
        mut triggers: EventReceiver,
        cancel: CancellationToken,
    ) {
        debug!("Display loop started");
        self.set_power(false).await;

        loop {
            let deadline = self.window.deadline();
            let mut render = false;
            let mut power = None;

            tokio::select! {
                _ = cancel.cancelled() => break,
                event = triggers.recv() => match event {
                    Ok(event) => {
                        if self.on_trigger(&event) {
                            power = Some(true);
                            render = true;
                        }
                    }
                    Err(EventBusError::Lagged { skipped }) => {
                        warn!("Display missed {} events", skipped);
                    }
                    Err(e) => {
                        warn!("Event bus unavailable for display: {}", e);
                        break;
                    }
                },
                changed = frames.changed() => {
                    if changed.is_err() {
                        debug!("Frame source closed; display loop stopping");
                        break;
                    }
                    render = self.window.is_active(Instant::now());
                },
                _ = sleep_until_deadline(deadline) => {
                    if self.window.poll(Instant::now()) {
                        info!("Display activation period elapsed");
                        self.stats.lock().active = false;
                        power = Some(false);
                    }
                }
            }

            if let Some(on) = power {
                self.set_power(on).await;
            }
            if render {
                self.render_latest(&mut frames).await;
            }
        }

        self.set_power(false).await;
        self.stats.lock().active = false;
        debug!("Display loop stopped");
    }

    /// Returns true when the trigger switched the display on
    fn on_trigger(&mut self, event: &DoorcamEvent) -> bool {
        if !self.window.activate(Instant::now()) {
            trace!("Display activation extended by {}", event.event_type());
            return false;
        }

        info!("Display activated by {}", event.event_type());
        {
            let mut stats = self.stats.lock();
            stats.active = true;
            stats.activations += 1;
        }
        true
    }

    async fn render_latest(&mut self, frames: &mut watch::Receiver<Option<Frame>>) {
        let Some(frame) = frames.borrow_and_update().clone() else {
            return;
        };

        let renderer = Arc::clone(&self.renderer);
        let seq = frame.seq;
        let result = tokio::task::spawn_blocking(move || renderer.lock().render(&frame))
            .await
            .map_err(|e| DoorcamError::component("display", e.to_string()))
            .and_then(|result| result);

        let mut stats = self.stats.lock();
        match result {
            Ok(()) => {
                stats.frames_rendered += 1;
                trace!("Rendered frame {}", seq);
            }
            Err(e) => {
                stats.render_errors += 1;
                warn!("Skipping frame {} on display: {}", seq, e);
            }
        }
    }

    async fn set_power(&self, on: bool) {
        let renderer = Arc::clone(&self.renderer);
        let result = tokio::task::spawn_blocking(move || renderer.lock().set_power(on))
            .await
            .map_err(|e| DoorcamError::component("display", e.to_string()))
            .and_then(|result| result);

        if let Err(e) = result {
            self.stats.lock().power_errors += 1;
            warn!("Display power control failed: {}", e);
        }
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
