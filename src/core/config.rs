use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DoorcamConfig {
    pub camera: CameraConfig,
    pub analyzer: AnalyzerConfig,
    pub event: EventConfig,
    pub capture: CaptureConfig,
    pub stream: StreamConfig,
    pub display: DisplayConfig,
    pub system: SystemConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CameraConfig {
    /// Where frames come from
    #[serde(default = "default_camera_source")]
    pub source: CameraSource,

    /// Camera device path (e.g. /dev/video0)
    #[serde(default = "default_camera_device")]
    pub device: String,

    /// Camera resolution (width, height)
    #[serde(default = "default_camera_resolution")]
    pub resolution: (u32, u32),

    /// Target capture rate
    #[serde(default = "default_camera_fps")]
    pub max_fps: u32,

    /// Video format requested from the device
    #[serde(default = "default_camera_format")]
    pub format: String,

    /// How long a single device read may block before it counts as a failure
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CameraSource {
    Camera,
    Synthetic,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AnalyzerConfig {
    /// Maximum analysis rate; always at or below the capture rate
    #[serde(default = "default_analyzer_fps")]
    pub max_fps: u32,

    /// Per-pixel difference against the background that counts as change
    #[serde(default = "default_delta_threshold")]
    pub delta_threshold: u8,

    /// Minimum connected region area, in camera pixels, that counts as activity
    #[serde(default = "default_contour_min_area")]
    pub contour_min_area: f64,

    /// Analysis downscale factor (1=full, 2=1/2, 4=1/4)
    #[serde(default = "default_decode_scale")]
    pub decode_scale: u32,

    /// Gaussian blur sigma applied at analysis resolution
    #[serde(default = "default_blur_sigma")]
    pub blur_sigma: f32,

    /// Weight of the newest frame in the running background
    #[serde(default = "default_background_alpha")]
    pub background_alpha: f32,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct EventConfig {
    /// Preroll duration in seconds
    #[serde(default = "default_preroll_seconds")]
    pub preroll_seconds: u32,

    /// Postroll duration in seconds
    #[serde(default = "default_postroll_seconds")]
    pub postroll_seconds: u32,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CaptureConfig {
    /// Record motion events to disk
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Base path for storing captures
    #[serde(default = "default_capture_path")]
    pub path: String,

    /// Stamp each image with its capture time during post-processing
    #[serde(default = "default_timestamp_overlay")]
    pub timestamp_overlay: bool,

    /// Path to TrueType font file for timestamp overlay
    #[serde(default = "default_timestamp_font_path")]
    pub timestamp_font_path: String,

    /// Font size for timestamp overlay
    #[serde(default = "default_timestamp_font_size")]
    pub timestamp_font_size: f32,

    /// IANA timezone for the overlay text; names on disk are always UTC
    #[serde(default = "default_timestamp_timezone")]
    pub timestamp_timezone: String,

    /// Encode each event to an mp4
    #[serde(default = "default_video_encoding")]
    pub video_encoding: bool,

    /// External encoder executable
    #[serde(default = "default_encoder_path")]
    pub encoder_path: String,

    /// Upper bound on a single encode
    #[serde(default = "default_encoder_timeout_seconds")]
    pub encoder_timeout_seconds: u64,

    /// Keep individual JPEG images after encoding
    #[serde(default = "default_keep_images")]
    pub keep_images: bool,

    /// Save a metadata JSON file with each capture event
    #[serde(default = "default_save_metadata")]
    pub save_metadata: bool,

    /// Rotation applied during post-processing
    pub rotation: Option<Rotation>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct StreamConfig {
    /// Serve the MJPEG endpoint
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// IP address to bind to
    #[serde(default = "default_stream_ip")]
    pub ip: String,

    /// Port to listen on
    #[serde(default = "default_stream_port")]
    pub port: u16,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DisplayConfig {
    /// Drive the local screen
    #[serde(default = "default_false")]
    pub enabled: bool,

    /// Framebuffer device path
    #[serde(default = "default_framebuffer_device")]
    pub framebuffer_device: String,

    /// Backlight power control file (0 = on, 1 = off)
    #[serde(default = "default_backlight_device")]
    pub backlight_device: String,

    /// Touch input device path
    #[serde(default = "default_touch_device")]
    pub touch_device: String,

    /// How long the screen stays on after the last trigger
    #[serde(default = "default_activation_period")]
    pub activation_period_seconds: u32,

    /// Display resolution (width, height)
    #[serde(default = "default_display_resolution")]
    pub resolution: (u32, u32),

    /// Display rotation
    pub rotation: Option<Rotation>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SystemConfig {
    /// Enable automatic trimming of old events
    #[serde(default = "default_trim_old")]
    pub trim_old: bool,

    /// Retention horizon in days
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,

    /// Seconds between retention passes
    #[serde(default = "default_trim_interval_seconds")]
    pub trim_interval_seconds: u64,

    /// Event bus capacity
    #[serde(default = "default_event_bus_capacity")]
    pub event_bus_capacity: usize,

    /// Per-subscriber frame queue depth
    #[serde(default = "default_subscriber_capacity")]
    pub subscriber_capacity: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
pub enum Rotation {
    Rotate90,
    Rotate180,
    Rotate270,
}

impl Rotation {
    /// True when the rotation swaps width and height
    pub fn swaps_dimensions(&self) -> bool {
        matches!(self, Rotation::Rotate90 | Rotation::Rotate270)
    }
}

impl CameraConfig {
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.max_fps.max(1) as f64)
    }
}

impl AnalyzerConfig {
    pub fn analysis_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.max_fps.max(1) as f64)
    }
}

impl EventConfig {
    pub fn preroll(&self) -> Duration {
        Duration::from_secs(self.preroll_seconds as u64)
    }

    pub fn postroll(&self) -> Duration {
        Duration::from_secs(self.postroll_seconds as u64)
    }
}

impl SystemConfig {
    pub fn retention_horizon(&self) -> Duration {
        Duration::from_secs(self.retention_days as u64 * 24 * 60 * 60)
    }
}

impl DoorcamConfig {
    /// Load configuration from default sources (file + environment variables)
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_file("doorcam.toml")
    }

    /// Load configuration from a specific file path
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().to_string_lossy();
        debug!("Loading configuration from: {}", path_str);

        let defaults = Self::default();
        let settings = Config::builder()
            .add_source(Config::try_from(&defaults)?)
            .add_source(File::with_name(&path_str).required(false))
            // DOORCAM_CAPTURE__KEEP_IMAGES=true style overrides
            .add_source(
                Environment::with_prefix("DOORCAM")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: DoorcamConfig = settings.try_deserialize()?;
        config.validate()?;

        info!("Configuration loaded successfully");
        debug!("Final configuration: {:#?}", config);

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.camera.resolution.0 == 0 || self.camera.resolution.1 == 0 {
            return Err(ConfigError::Message(
                "Camera resolution must be greater than 0".to_string(),
            ));
        }

        if self.camera.max_fps == 0 {
            return Err(ConfigError::Message(
                "Camera max_fps must be greater than 0".to_string(),
            ));
        }

        if self.analyzer.max_fps == 0 {
            return Err(ConfigError::Message(
                "Analyzer max_fps must be greater than 0".to_string(),
            ));
        }

        if self.analyzer.max_fps > self.camera.max_fps {
            return Err(ConfigError::Message(format!(
                "Analyzer max_fps ({}) cannot exceed camera max_fps ({})",
                self.analyzer.max_fps, self.camera.max_fps
            )));
        }

        if self.analyzer.decode_scale == 0 {
            return Err(ConfigError::Message(
                "Analyzer decode_scale must be greater than 0".to_string(),
            ));
        }

        if !(self.analyzer.background_alpha > 0.0 && self.analyzer.background_alpha <= 1.0) {
            return Err(ConfigError::Message(
                "Analyzer background_alpha must be in (0, 1]".to_string(),
            ));
        }

        if self.event.preroll_seconds == 0 {
            return Err(ConfigError::Message(
                "Event preroll_seconds must be greater than 0".to_string(),
            ));
        }

        if self.event.postroll_seconds == 0 {
            return Err(ConfigError::Message(
                "Event postroll_seconds must be greater than 0".to_string(),
            ));
        }

        if self.capture.timestamp_timezone.parse::<chrono_tz::Tz>().is_err() {
            return Err(ConfigError::Message(format!(
                "Unknown capture timestamp_timezone '{}'",
                self.capture.timestamp_timezone
            )));
        }

        if self.stream.enabled && self.stream.ip.parse::<IpAddr>().is_err() {
            return Err(ConfigError::Message(format!(
                "Invalid stream ip '{}'",
                self.stream.ip
            )));
        }

        if self.display.enabled
            && (self.display.resolution.0 == 0 || self.display.resolution.1 == 0)
        {
            return Err(ConfigError::Message(
                "Display resolution must be greater than 0".to_string(),
            ));
        }

        if self.system.trim_old && self.system.retention_days == 0 {
            return Err(ConfigError::Message(
                "System retention_days must be greater than 0 when trim_old is set".to_string(),
            ));
        }

        if self.system.trim_interval_seconds == 0 {
            return Err(ConfigError::Message(
                "System trim_interval_seconds must be greater than 0".to_string(),
            ));
        }

        if self.system.event_bus_capacity == 0 || self.system.subscriber_capacity == 0 {
            return Err(ConfigError::Message(
                "Event bus and subscriber capacities must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

impl Default for DoorcamConfig {
    fn default() -> Self {
        Self {
            camera: CameraConfig {
                source: default_camera_source(),
                device: default_camera_device(),
                resolution: default_camera_resolution(),
                max_fps: default_camera_fps(),
                format: default_camera_format(),
                read_timeout_ms: default_read_timeout_ms(),
            },
            analyzer: AnalyzerConfig {
                max_fps: default_analyzer_fps(),
                delta_threshold: default_delta_threshold(),
                contour_min_area: default_contour_min_area(),
                decode_scale: default_decode_scale(),
                blur_sigma: default_blur_sigma(),
                background_alpha: default_background_alpha(),
            },
            event: EventConfig {
                preroll_seconds: default_preroll_seconds(),
                postroll_seconds: default_postroll_seconds(),
            },
            capture: CaptureConfig {
                enabled: true,
                path: default_capture_path(),
                timestamp_overlay: default_timestamp_overlay(),
                timestamp_font_path: default_timestamp_font_path(),
                timestamp_font_size: default_timestamp_font_size(),
                timestamp_timezone: default_timestamp_timezone(),
                video_encoding: default_video_encoding(),
                encoder_path: default_encoder_path(),
                encoder_timeout_seconds: default_encoder_timeout_seconds(),
                keep_images: default_keep_images(),
                save_metadata: default_save_metadata(),
                rotation: None,
            },
            stream: StreamConfig {
                enabled: true,
                ip: default_stream_ip(),
                port: default_stream_port(),
            },
            display: DisplayConfig {
                enabled: false,
                framebuffer_device: default_framebuffer_device(),
                backlight_device: default_backlight_device(),
                touch_device: default_touch_device(),
                activation_period_seconds: default_activation_period(),
                resolution: default_display_resolution(),
                rotation: None,
            },
            system: SystemConfig {
                trim_old: default_trim_old(),
                retention_days: default_retention_days(),
                trim_interval_seconds: default_trim_interval_seconds(),
                event_bus_capacity: default_event_bus_capacity(),
                subscriber_capacity: default_subscriber_capacity(),
            },
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_false() -> bool {
    false
}

fn default_camera_source() -> CameraSource {
    if cfg!(feature = "camera") {
        CameraSource::Camera
    } else {
        CameraSource::Synthetic
    }
}
fn default_camera_device() -> String {
    "/dev/video0".to_string()
}
fn default_camera_resolution() -> (u32, u32) {
    (640, 480)
}
fn default_camera_fps() -> u32 {
    30
}
fn default_camera_format() -> String {
    "MJPG".to_string()
}
fn default_read_timeout_ms() -> u64 {
    2000
}

fn default_analyzer_fps() -> u32 {
    5
}
fn default_delta_threshold() -> u8 {
    5
}
fn default_contour_min_area() -> f64 {
    5000.0
}
fn default_decode_scale() -> u32 {
    4
}
fn default_blur_sigma() -> f32 {
    2.0
}
fn default_background_alpha() -> f32 {
    0.5
}

fn default_preroll_seconds() -> u32 {
    5
}
fn default_postroll_seconds() -> u32 {
    5
}

fn default_capture_path() -> String {
    "./captures".to_string()
}
fn default_timestamp_overlay() -> bool {
    true
}
fn default_timestamp_font_path() -> String {
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf".to_string()
}
fn default_timestamp_font_size() -> f32 {
    24.0
}
fn default_timestamp_timezone() -> String {
    "UTC".to_string()
}
fn default_video_encoding() -> bool {
    true
}
fn default_encoder_path() -> String {
    "ffmpeg".to_string()
}
fn default_encoder_timeout_seconds() -> u64 {
    600
}
fn default_keep_images() -> bool {
    false
}
fn default_save_metadata() -> bool {
    true
}

fn default_stream_ip() -> String {
    "0.0.0.0".to_string()
}
fn default_stream_port() -> u16 {
    8080
}

fn default_framebuffer_device() -> String {
    "/dev/fb0".to_string()
}
fn default_backlight_device() -> String {
    "/sys/class/backlight/rpi_backlight/bl_power".to_string()
}
fn default_touch_device() -> String {
    "/dev/input/event0".to_string()
}
fn default_activation_period() -> u32 {
    30
}
fn default_display_resolution() -> (u32, u32) {
    (800, 480)
}

fn default_trim_old() -> bool {
    true
}
fn default_retention_days() -> u32 {
    30
}
fn default_trim_interval_seconds() -> u64 {
    24 * 60 * 60
}
fn default_event_bus_capacity() -> usize {
    100
}
fn default_subscriber_capacity() -> usize {
    64
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = DoorcamConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.analyzer.contour_min_area, 5000.0);
        assert_eq!(config.analyzer.background_alpha, 0.5);
        assert_eq!(config.event.preroll(), Duration::from_secs(5));
    }

    #[test]
    fn test_load_from_toml_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[camera]
resolution = [1280, 720]
max_fps = 15

[event]
preroll_seconds = 3
postroll_seconds = 8

[capture]
path = "/tmp/doorcam-test"
rotation = "Rotate90"
keep_images = true
"#
        )
        .unwrap();

        let config = DoorcamConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.camera.resolution, (1280, 720));
        assert_eq!(config.camera.max_fps, 15);
        assert_eq!(config.event.preroll_seconds, 3);
        assert_eq!(config.event.postroll(), Duration::from_secs(8));
        assert_eq!(config.capture.rotation, Some(Rotation::Rotate90));
        assert!(config.capture.keep_images);
        // Untouched sections keep their defaults
        assert_eq!(config.analyzer.delta_threshold, 5);
    }

    #[test]
    fn test_environment_variable_override() {
        std::env::set_var("DOORCAM_SYSTEM__RETENTION_DAYS", "12");

        let config = DoorcamConfig::load_from_file("/nonexistent/doorcam.toml").unwrap();
        assert_eq!(config.system.retention_days, 12);

        std::env::remove_var("DOORCAM_SYSTEM__RETENTION_DAYS");
    }

    #[test]
    fn test_config_validation() {
        let mut config = DoorcamConfig::default();

        config.camera.resolution = (0, 0);
        assert!(config.validate().is_err());
        config.camera.resolution = (640, 480);
        assert!(config.validate().is_ok());

        config.analyzer.max_fps = 60;
        assert!(config.validate().is_err());
        config.analyzer.max_fps = 5;

        config.analyzer.background_alpha = 0.0;
        assert!(config.validate().is_err());
        config.analyzer.background_alpha = 0.5;

        config.capture.timestamp_timezone = "Mars/Olympus".to_string();
        assert!(config.validate().is_err());
        config.capture.timestamp_timezone = "America/New_York".to_string();
        assert!(config.validate().is_ok());

        config.system.retention_days = 0;
        assert!(config.validate().is_err());
        config.system.trim_old = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_file_is_rejected() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[event]\npostroll_seconds = 0").unwrap();
        assert!(DoorcamConfig::load_from_file(file.path()).is_err());
    }

    #[test]
    fn test_rotation_dimensions() {
        assert!(Rotation::Rotate90.swaps_dimensions());
        assert!(!Rotation::Rotate180.swaps_dimensions());
    }
}
