//! Post-processing of sealed capture events
//!
//! Events leave the recorder through [`PostProcessQueue`] and are handled one
//! at a time: images are rotated and stamped, encoded to a video, and the
//! intermediate images are removed unless they are meant to be kept.

mod encode;
mod overlay;
mod processor;
mod queue;

pub use encode::{EncodeFrame, FfmpegEncoder, VideoEncoder};
pub use overlay::Annotator;
pub use processor::PostProcessor;
pub use queue::{JobHandler, PostProcessJob, PostProcessOutcome, PostProcessQueue};
