//! Local screen presenter

mod controller;
mod converter;
mod devices;
mod stats;
mod window;

pub use controller::DisplayController;
pub use converter::DisplayConverter;
pub use devices::{Backlight, FrameSink, FramebufferSink, SysfsBacklight};
pub use stats::DisplayStats;
pub use window::ActivationWindow;
