//! Video encoders fed with JPEG frames.

use super::PipelineError;
use crate::config::{EncoderKind, VideoConfig};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};

/// A sink that turns a sequence of JPEG frames into a video file.
pub trait VideoEncoder: Send {
    /// Appends one JPEG frame.
    fn write_frame(&mut self, jpeg: &[u8]) -> Result<(), PipelineError>;

    /// Flushes and closes the output.
    fn finish(self: Box<Self>) -> Result<(), PipelineError>;
}

/// Opens the encoder selected by `config`, writing to `path`.
pub fn open_encoder(
    config: &VideoConfig,
    path: &Path,
    fps: u32,
) -> Result<Box<dyn VideoEncoder>, PipelineError> {
    match config.encoder {
        EncoderKind::Mjpeg => Ok(Box::new(MjpegEncoder::create(path)?)),
        EncoderKind::Ffmpeg => Ok(Box::new(FfmpegEncoder::spawn(config, path, fps)?)),
    }
}

/// File extension produced by an encoder kind.
pub fn extension(kind: EncoderKind) -> &'static str {
    match kind {
        EncoderKind::Mjpeg => "mjpeg",
        EncoderKind::Ffmpeg => "mp4",
    }
}

/// Motion-JPEG elementary stream: frames written back to back.
pub struct MjpegEncoder {
    writer: BufWriter<File>,
    path: PathBuf,
}

impl MjpegEncoder {
    pub fn create(path: &Path) -> Result<Self, PipelineError> {
        let file = File::create(path).map_err(|e| PipelineError::io(path, e))?;
        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
        })
    }
}

impl VideoEncoder for MjpegEncoder {
    fn write_frame(&mut self, jpeg: &[u8]) -> Result<(), PipelineError> {
        self.writer
            .write_all(jpeg)
            .map_err(|e| PipelineError::io(&self.path, e))
    }

    fn finish(self: Box<Self>) -> Result<(), PipelineError> {
        let path = self.path;
        let file = self
            .writer
            .into_inner()
            .map_err(|e| PipelineError::io(&path, e.into_error()))?;
        file.sync_all().map_err(|e| PipelineError::io(&path, e))
    }
}

/// H.264/MP4 through an `ffmpeg` child reading JPEGs from stdin.
pub struct FfmpegEncoder {
    child: Child,
    stdin: Option<ChildStdin>,
    path: PathBuf,
}

impl FfmpegEncoder {
    pub fn spawn(config: &VideoConfig, path: &Path, fps: u32) -> Result<Self, PipelineError> {
        let mut child = Command::new(&config.ffmpeg_path)
            .args(["-hide_banner", "-loglevel", "error", "-y"])
            .args(["-f", "image2pipe", "-c:v", "mjpeg"])
            .args(["-framerate", &fps.to_string(), "-i", "-"])
            .args(["-c:v", "libx264", "-preset", "ultrafast", "-pix_fmt", "yuv420p"])
            .args(["-b:v", &config.bitrate.to_string(), "-f", "mp4"])
            .arg(path)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| {
                PipelineError::Encoder(format!("failed to start {}: {e}", config.ffmpeg_path))
            })?;

        let stdin = child.stdin.take();
        tracing::debug!(path = %path.display(), fps, "ffmpeg encoder started");

        Ok(Self {
            child,
            stdin,
            path: path.to_path_buf(),
        })
    }
}

impl VideoEncoder for FfmpegEncoder {
    fn write_frame(&mut self, jpeg: &[u8]) -> Result<(), PipelineError> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| PipelineError::Encoder("ffmpeg stdin closed".to_string()))?;
        stdin
            .write_all(jpeg)
            .map_err(|e| PipelineError::Encoder(format!("ffmpeg write failed: {e}")))
    }

    fn finish(mut self: Box<Self>) -> Result<(), PipelineError> {
        // Closing stdin signals end of input.
        drop(self.stdin.take());
        let status = self
            .child
            .wait()
            .map_err(|e| PipelineError::Encoder(format!("ffmpeg wait failed: {e}")))?;
        if !status.success() {
            return Err(PipelineError::Encoder(format!(
                "ffmpeg exited with {status} while writing {}",
                self.path.display()
            )));
        }
        Ok(())
    }
}

impl Drop for FfmpegEncoder {
    fn drop(&mut self) {
        if self.stdin.is_some() {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}
