use serde::Serialize;

/// Presenter counters
#[derive(Debug, Clone, Default, Serialize)]
pub struct DisplayStats {
    pub active: bool,
    pub activations: u64,
    pub frames_rendered: u64,
    pub render_errors: u64,
    /// Failed backlight or blanking writes
    pub power_errors: u64,
}

impl DisplayStats {
    pub fn render_success_rate(&self) -> f64 {
        let attempts = self.frames_rendered + self.render_errors;
        if attempts == 0 {
            0.0
        } else {
            self.frames_rendered as f64 / attempts as f64
        }
    }
}
