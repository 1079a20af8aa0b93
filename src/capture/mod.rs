mod event;
mod metadata;
mod preroll;
mod recorder;
mod window;
mod writer;

pub use event::{
    format_timestamp, parse_timestamp, resolve_timezone, CaptureEvent, IMAGES_DIR, METADATA_FILE,
    PROCESSED_DIR, TIMESTAMP_FORMAT,
};
pub use metadata::{CaptureMetadata, CaptureStats};
pub use preroll::PrerollBuffer;
pub use recorder::EventRecorder;
pub use window::{RecordingWindow, WindowTransition};
