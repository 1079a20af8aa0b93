mod builder;
mod device;
#[cfg(all(feature = "camera", target_os = "linux"))]
mod interface;
mod source;
#[cfg(test)]
mod tests;

pub use builder::{calculate_preroll_capacity, FrameSourceBuilder};
pub use device::{create_device, CameraDevice, RawFrame, SyntheticCamera};
#[cfg(all(feature = "camera", target_os = "linux"))]
pub use interface::GstCamera;
pub use source::{FrameSource, FrameSourceStats, FrameSubscription};

#[cfg(test)]
pub(crate) use device::scripted::ScriptedCamera;
