//! Frame distribution and motion-triggered capture for an always-on door camera.
//!
//! One camera feeds a [`FrameSource`]. Motion analysis, event recording,
//! live streaming and the local display all read from it independently, and
//! recorded events are post-processed and pruned in the background.

pub mod core;
pub use self::core::{config, error, events, frame};

pub mod analyzer;
pub mod app;
pub mod camera;
pub mod capture;
pub mod display;
pub mod postprocess;
pub mod storage;
pub mod touch;

#[cfg(feature = "streaming")]
pub mod streaming;

pub use analyzer::{MotionAnalyzerOrchestrator, MotionDetector, MotionResult};
pub use app::{ComponentState, DoorcamOrchestrator, KeyboardInputHandler, ShutdownReason};
pub use camera::{CameraDevice, FrameSource, FrameSourceBuilder, FrameSubscription};
pub use capture::{CaptureStats, EventRecorder, PrerollBuffer, RecordingWindow};
pub use config::{DoorcamConfig, Rotation};
pub use display::{DisplayController, DisplayStats};
pub use error::{DoorcamError, Result};
pub use events::{DoorcamEvent, EventBus, EventFilter, EventReceiver};
pub use frame::Frame;
pub use postprocess::{PostProcessQueue, PostProcessor};
pub use storage::{RetentionPolicy, RetentionWorker, TrimReport};

#[cfg(feature = "streaming")]
pub use streaming::{StreamServer, StreamServerBuilder, StreamStats};

#[cfg(all(feature = "touch", target_os = "linux"))]
pub use touch::TouchInputHandler;
