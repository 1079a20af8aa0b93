use std::time::Duration;
use thiserror::Error;

/// Main error type for the doorcam pipeline
#[derive(Error, Debug)]
pub enum DoorcamError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Deserialization error: {0}")]
    Deserialization(#[from] toml::de::Error),

    #[error("Camera error: {0}")]
    Camera(#[from] CameraError),

    #[error("Motion analysis error: {0}")]
    Analyzer(#[from] AnalyzerError),

    #[error("Stream server error: {0}")]
    Stream(#[from] StreamError),

    #[error("Display error: {0}")]
    Display(#[from] DisplayError),

    #[error("Touch input error: {0}")]
    Touch(#[from] TouchError),

    #[error("Capture error: {0}")]
    Capture(#[from] CaptureError),

    #[error("Post-processing error: {0}")]
    PostProcess(#[from] PostProcessError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Event bus error: {0}")]
    EventBus(#[from] EventBusError),

    #[error("System error: {message}")]
    System { message: String },

    #[error("Component error in {component}: {message}")]
    Component { component: String, message: String },
}

/// Camera device errors
#[derive(Error, Debug, Clone)]
pub enum CameraError {
    #[error("Failed to open camera device {device}: {details}")]
    DeviceOpen { device: String, details: String },

    #[error("Failed to configure camera: {details}")]
    Configuration { details: String },

    #[error("Capture stream error: {details}")]
    CaptureStream { details: String },

    #[error("Camera not available (feature disabled or platform unsupported)")]
    NotAvailable,

    #[error("Camera disconnected")]
    Disconnected,

    #[error("Frame timeout after {timeout:?}")]
    FrameTimeout { timeout: Duration },
}

/// Motion analyzer errors
#[derive(Error, Debug)]
pub enum AnalyzerError {
    #[error("Frame decode failed: {details}")]
    Decode { details: String },

    #[error("Frame processing failed: {details}")]
    FrameProcessing { details: String },

    #[error("Analysis timed out after {timeout:?}")]
    Timeout { timeout: Duration },
}

/// Stream server errors
#[derive(Error, Debug)]
pub enum StreamError {
    #[error("Failed to bind to {address}: {source}")]
    BindFailed {
        address: String,
        source: std::io::Error,
    },

    #[error("Server startup failed: {details}")]
    StartupFailed { details: String },

    #[error("HTTP server error: {details}")]
    Http { details: String },
}

/// Display errors
#[derive(Error, Debug)]
pub enum DisplayError {
    #[error("Failed to open framebuffer device {device}: {source}")]
    FramebufferOpen {
        device: String,
        source: std::io::Error,
    },

    #[error("Framebuffer write failed: {details}")]
    Framebuffer { details: String },

    #[error("Backlight control error on {device}: {source}")]
    Backlight {
        device: String,
        source: std::io::Error,
    },

    #[error("Display format conversion failed: {details}")]
    FormatConversion { details: String },
}

/// Touch input errors
#[derive(Error, Debug, Clone)]
pub enum TouchError {
    #[error("Failed to open touch device {device}: {details}")]
    DeviceOpen { device: String, details: String },

    #[error("Touch device read error: {details}")]
    DeviceRead { details: String },

    #[error("Unsupported device: {0}")]
    UnsupportedDevice(String),
}

/// Event recording errors
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Failed to create capture directory {path}: {source}")]
    DirectoryCreation {
        path: String,
        source: std::io::Error,
    },

    #[error("Frame save failed for {path}: {source}")]
    FrameSave {
        path: String,
        source: std::io::Error,
    },

    #[error("Metadata write failed: {details}")]
    MetadataWrite { details: String },
}

/// Post-processing errors
#[derive(Error, Debug)]
pub enum PostProcessError {
    #[error("No images found in {path}")]
    NoImages { path: String },

    #[error("Image annotation failed for {path}: {details}")]
    Annotation { path: String, details: String },

    #[error("Video encoding failed: {details}")]
    VideoEncoding { details: String },

    #[error("Encoder '{program}' could not be started: {source}")]
    EncoderUnavailable {
        program: String,
        source: std::io::Error,
    },

    #[error("Post-process queue closed")]
    QueueClosed,
}

/// Retention and storage errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Directory scan failed for {path}: {source}")]
    DirectoryScan {
        path: String,
        source: std::io::Error,
    },

    #[error("Directory deletion failed for {path}: {source}")]
    Deletion {
        path: String,
        source: std::io::Error,
    },

    #[error("Refusing to delete {path}: {reason}")]
    UnsafeDeletion { path: String, reason: String },
}

/// Event bus errors
#[derive(Error, Debug)]
pub enum EventBusError {
    #[error("Failed to publish event: {details}")]
    PublishFailed { details: String },

    #[error("Receiver lagged behind by {skipped} events")]
    Lagged { skipped: u64 },

    #[error("Event channel closed")]
    ChannelClosed,
}

impl DoorcamError {
    /// Create a system error with a message
    pub fn system<S: Into<String>>(message: S) -> Self {
        Self::System {
            message: message.into(),
        }
    }

    /// Create a component error with component name and message
    pub fn component<C: Into<String>, M: Into<String>>(component: C, message: M) -> Self {
        Self::Component {
            component: component.into(),
            message: message.into(),
        }
    }

    /// Transient errors that the owning loop retries rather than escalates
    pub fn is_recoverable(&self) -> bool {
        match self {
            DoorcamError::Camera(CameraError::Disconnected) => true,
            DoorcamError::Camera(CameraError::DeviceOpen { .. }) => true,
            DoorcamError::Camera(CameraError::CaptureStream { .. }) => true,
            DoorcamError::Camera(CameraError::FrameTimeout { .. }) => true,
            DoorcamError::Analyzer(_) => true,
            DoorcamError::Touch(TouchError::DeviceOpen { .. }) => true,
            DoorcamError::Touch(TouchError::DeviceRead { .. }) => true,
            DoorcamError::Display(DisplayError::FramebufferOpen { .. }) => true,
            DoorcamError::Display(DisplayError::Framebuffer { .. }) => true,
            DoorcamError::Display(DisplayError::Backlight { .. }) => true,
            DoorcamError::Capture(CaptureError::FrameSave { .. }) => true,
            DoorcamError::PostProcess(_) => true,
            DoorcamError::EventBus(EventBusError::Lagged { .. }) => true,
            DoorcamError::Io(_) => true,
            _ => false,
        }
    }

    /// Get the component name associated with this error
    pub fn component_name(&self) -> String {
        match self {
            DoorcamError::Camera(_) => "camera".to_string(),
            DoorcamError::Analyzer(_) => "analyzer".to_string(),
            DoorcamError::Stream(_) => "stream".to_string(),
            DoorcamError::Display(_) => "display".to_string(),
            DoorcamError::Touch(_) => "touch".to_string(),
            DoorcamError::Capture(_) => "capture".to_string(),
            DoorcamError::PostProcess(_) => "postprocess".to_string(),
            DoorcamError::Storage(_) => "storage".to_string(),
            DoorcamError::EventBus(_) => "event_bus".to_string(),
            DoorcamError::Config(_) | DoorcamError::Deserialization(_) => "config".to_string(),
            DoorcamError::Component { component, .. } => component.clone(),
            _ => "system".to_string(),
        }
    }

    /// Get error severity level for logging
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            DoorcamError::Camera(CameraError::NotAvailable) => ErrorSeverity::Warning,
            DoorcamError::Config(_) | DoorcamError::Deserialization(_) => ErrorSeverity::Critical,
            DoorcamError::Capture(CaptureError::DirectoryCreation { .. }) => ErrorSeverity::Error,
            _ if self.is_recoverable() => ErrorSeverity::Warning,
            _ => ErrorSeverity::Error,
        }
    }
}

/// Error severity levels for structured logging
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

impl ErrorSeverity {
    /// Convert to tracing level
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            ErrorSeverity::Info => tracing::Level::INFO,
            ErrorSeverity::Warning => tracing::Level::WARN,
            ErrorSeverity::Error | ErrorSeverity::Critical => tracing::Level::ERROR,
        }
    }
}

/// Convenience type alias for Results
pub type Result<T> = std::result::Result<T, DoorcamError>;
