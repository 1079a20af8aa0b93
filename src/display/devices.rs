use crate::error::{DisplayError, Result};
use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::PathBuf;
use tracing::{debug, info};

/// Panel backlight power
pub trait Backlight: Send + 'static {
    fn set_power(&mut self, on: bool) -> Result<()>;
}

/// Backlight driven through a sysfs `bl_power` file (`0` = on, `1` = off)
pub struct SysfsBacklight {
    path: PathBuf,
    /// Last state written successfully; `None` forces the next write
    state: Option<bool>,
}

impl SysfsBacklight {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            state: None,
        }
    }
}

impl Backlight for SysfsBacklight {
    fn set_power(&mut self, on: bool) -> Result<()> {
        if self.state == Some(on) {
            return Ok(());
        }

        let value = if on { "0" } else { "1" };
        let result = OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(&self.path)
            .and_then(|mut file| file.write_all(value.as_bytes()));

        match result {
            Ok(()) => {
                self.state = Some(on);
                debug!("Backlight {}", if on { "on" } else { "off" });
                Ok(())
            }
            Err(e) => {
                self.state = None;
                Err(DisplayError::Backlight {
                    device: self.path.display().to_string(),
                    source: e,
                }
                .into())
            }
        }
    }
}

/// Destination for converted frames
pub trait FrameSink: Send + 'static {
    fn write_frame(&mut self, rgb565: &[u8]) -> Result<()>;
}

/// Linux framebuffer device, written from offset zero for each frame
pub struct FramebufferSink {
    path: PathBuf,
    file: Option<File>,
}

impl FramebufferSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            file: None,
        }
    }

    fn open(&mut self) -> Result<&mut File> {
        if self.file.is_none() {
            let file = OpenOptions::new()
                .write(true)
                .open(&self.path)
                .map_err(|e| DisplayError::FramebufferOpen {
                    device: self.path.display().to_string(),
                    source: e,
                })?;
            info!("Framebuffer {} opened", self.path.display());
            self.file = Some(file);
        }

        self.file.as_mut().ok_or_else(|| {
            DisplayError::Framebuffer {
                details: "framebuffer not open".to_string(),
            }
            .into()
        })
    }
}

impl FrameSink for FramebufferSink {
    fn write_frame(&mut self, rgb565: &[u8]) -> Result<()> {
        let file = self.open()?;
        let result = file
            .seek(SeekFrom::Start(0))
            .and_then(|_| file.write_all(rgb565))
            .and_then(|_| file.flush());

        if let Err(e) = result {
            // Reopen on the next frame
            self.file = None;
            return Err(DisplayError::Framebuffer {
                details: format!("{}: {}", self.path.display(), e),
            }
            .into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backlight_writes_only_on_change() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bl_power");
        std::fs::write(&path, "1").unwrap();
        let mut backlight = SysfsBacklight::new(&path);

        backlight.set_power(true).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "0");

        // Unchanged state is not rewritten
        std::fs::write(&path, "x").unwrap();
        backlight.set_power(true).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "x");

        backlight.set_power(false).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "1");
    }

    #[test]
    fn test_backlight_failure_retries_next_time() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("bl_power");
        let mut backlight = SysfsBacklight::new(&path);

        assert!(backlight.set_power(true).is_err());

        // sysfs attributes exist up front; the backlight never creates one
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "1").unwrap();
        backlight.set_power(true).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "0");
    }

    #[test]
    fn test_framebuffer_overwrites_from_start() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fb0");
        std::fs::write(&path, [0u8; 8]).unwrap();
        let mut sink = FramebufferSink::new(&path);

        sink.write_frame(&[1, 2, 3, 4]).unwrap();
        sink.write_frame(&[5, 6]).unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), vec![5, 6, 3, 4, 0, 0, 0, 0]);
    }

    #[test]
    fn test_framebuffer_open_failure() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = FramebufferSink::new(dir.path().join("missing"));
        let err = sink.write_frame(&[0, 0]).unwrap_err();
        assert!(matches!(
            err,
            crate::error::DoorcamError::Display(DisplayError::FramebufferOpen { .. })
        ));
    }
}
