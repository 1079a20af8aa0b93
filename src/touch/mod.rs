//! Touch panel trigger

mod backoff;
#[cfg(all(feature = "touch", target_os = "linux"))]
mod handler;

pub use backoff::RetryBackoff;
#[cfg(all(feature = "touch", target_os = "linux"))]
pub use handler::{is_touch_press, TouchInputHandler};
