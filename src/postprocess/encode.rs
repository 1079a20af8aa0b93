use crate::error::{PostProcessError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// One image in the sequence handed to an encoder
#[derive(Debug, Clone)]
pub struct EncodeFrame {
    pub path: PathBuf,
    /// Capture time recovered from the file name, if it parsed
    pub captured_at: Option<DateTime<Utc>>,
}

/// Turns an ordered JPEG sequence into a video file
#[async_trait]
pub trait VideoEncoder: Send + Sync + 'static {
    async fn encode(&self, frames: &[EncodeFrame], output: &Path, fps: u32) -> Result<()>;
}

/// Encodes through an external `ffmpeg` process using the concat demuxer
pub struct FfmpegEncoder {
    program: String,
    timeout: Duration,
}

impl FfmpegEncoder {
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }

    fn command(&self, list: &Path, output: &Path, fps: u32) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(["-y", "-hide_banner", "-loglevel", "error"])
            .args(["-f", "concat", "-safe", "0", "-i"])
            .arg(list)
            .arg("-vf")
            .arg(format!("fps={},format=yuv420p", fps.max(1)))
            .args(["-c:v", "libx264", "-preset", "veryfast"])
            .args(["-movflags", "+faststart", "-f", "mp4"])
            .arg(output)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl VideoEncoder for FfmpegEncoder {
    async fn encode(&self, frames: &[EncodeFrame], output: &Path, fps: u32) -> Result<()> {
        if frames.is_empty() {
            return Err(PostProcessError::VideoEncoding {
                details: "no frames to encode".to_string(),
            }
            .into());
        }

        let list_path = output.with_extension("ffconcat");
        let partial = output.with_extension("mp4.part");
        tokio::fs::write(&list_path, concat_list(frames, fps))
            .await
            .map_err(|e| PostProcessError::VideoEncoding {
                details: format!("failed to write {}: {}", list_path.display(), e),
            })?;

        info!(
            "Encoding {} frames at {} fps into {}",
            frames.len(),
            fps,
            output.display()
        );

        let result = self.run(&list_path, &partial, fps).await;
        let _ = tokio::fs::remove_file(&list_path).await;

        match result {
            Ok(()) => {
                tokio::fs::rename(&partial, output)
                    .await
                    .map_err(|e| PostProcessError::VideoEncoding {
                        details: format!("failed to finalize {}: {}", output.display(), e),
                    })?;
                Ok(())
            }
            Err(e) => {
                let _ = tokio::fs::remove_file(&partial).await;
                Err(e)
            }
        }
    }
}

impl FfmpegEncoder {
    async fn run(&self, list: &Path, output: &Path, fps: u32) -> Result<()> {
        let child = self
            .command(list, output, fps)
            .spawn()
            .map_err(|e| PostProcessError::EncoderUnavailable {
                program: self.program.clone(),
                source: e,
            })?;

        #[cfg(target_os = "linux")]
        {
            use libc::{setpriority, PRIO_PROCESS};
            // Keep the encoder from starving capture
            if let Some(pid) = child.id() {
                if unsafe { setpriority(PRIO_PROCESS as u32, pid, 10) } != 0 {
                    debug!("Could not lower encoder priority for pid {}", pid);
                }
            }
        }

        // Dropping the child on timeout kills it
        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| PostProcessError::VideoEncoding {
                details: format!("{} timed out after {:?}", self.program, self.timeout),
            })?
            .map_err(|e| PostProcessError::VideoEncoding {
                details: format!("failed waiting for {}: {}", self.program, e),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!("{} exited with {}: {}", self.program, output.status, stderr.trim());
            return Err(PostProcessError::VideoEncoding {
                details: format!("{} exited with {}", self.program, output.status),
            }
            .into());
        }

        Ok(())
    }
}

/// Build an ffconcat script that holds each image until the next one was captured
pub(crate) fn concat_list(frames: &[EncodeFrame], fps: u32) -> String {
    let nominal = 1.0 / fps.max(1) as f64;
    let mut script = String::from("ffconcat version 1.0\n");

    for (i, frame) in frames.iter().enumerate() {
        let duration = match (frame.captured_at, frames.get(i + 1).and_then(|f| f.captured_at)) {
            (Some(this), Some(next)) => {
                let gap = (next - this).num_milliseconds() as f64 / 1000.0;
                if gap > 0.0 {
                    gap
                } else {
                    nominal
                }
            }
            _ => nominal,
        };

        let _ = writeln!(script, "file '{}'", escape_path(&frame.path));
        let _ = writeln!(script, "duration {:.3}", duration);
    }

    // The demuxer ignores the duration of the final entry unless it is repeated
    if let Some(last) = frames.last() {
        let _ = writeln!(script, "file '{}'", escape_path(&last.path));
    }

    script
}

fn escape_path(path: &Path) -> String {
    path.display().to_string().replace('\'', "'\\''")
}
