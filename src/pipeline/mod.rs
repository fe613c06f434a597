//! Persisting captures and recordings.
//!
//! Every file is first written under a hidden `.<name>.part` temporary
//! name in the captures directory and renamed into place only once it is
//! complete, so a failed write never leaves a partial file under the
//! final name.

mod encoder;
mod naming;

pub use encoder::{extension, open_encoder, FfmpegEncoder, MjpegEncoder, VideoEncoder};
pub use naming::FileNamer;

use crate::config::VideoConfig;
use crate::source::Frame;
use chrono::{DateTime, Local};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors that can occur while writing output files.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("video encoder error: {0}")]
    Encoder(String),
}

impl PipelineError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        PipelineError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Files written by one still capture.
#[derive(Debug, Clone)]
pub struct CaptureRecord {
    /// JPEG first, then the raw companion if requested.
    pub files: Vec<PathBuf>,
    pub created_at: DateTime<Local>,
}

/// An open video file receiving frames.
pub struct VideoHandle {
    path: PathBuf,
    temp_path: PathBuf,
    encoder: Box<dyn VideoEncoder>,
    fps: u32,
    frames: u64,
}

impl VideoHandle {
    /// Final path of the video once finalized.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn fps(&self) -> u32 {
        self.fps
    }

    /// Frames written so far.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Appends one JPEG frame to the video.
    pub fn push_frame(&mut self, frame: &Frame) -> Result<(), PipelineError> {
        self.encoder.write_frame(frame.data())?;
        self.frames += 1;
        Ok(())
    }
}

impl std::fmt::Debug for VideoHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VideoHandle")
            .field("path", &self.path)
            .field("fps", &self.fps)
            .field("frames", &self.frames)
            .finish()
    }
}

/// Writes stills and videos into the captures directory.
#[derive(Debug)]
pub struct CapturePipeline {
    dir: PathBuf,
    video: VideoConfig,
    namer: FileNamer,
}

impl CapturePipeline {
    /// Creates the pipeline, creating `dir` if needed.
    pub fn new(dir: impl Into<PathBuf>, video: VideoConfig) -> Result<Self, PipelineError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| PipelineError::io(&dir, e))?;
        Ok(Self {
            dir,
            video,
            namer: FileNamer::new(),
        })
    }

    pub fn captures_dir(&self) -> &Path {
        &self.dir
    }

    /// Writes a still and its optional raw companion under one shared stem.
    ///
    /// Either every file is written or none is left behind.
    pub fn write_capture(
        &self,
        jpeg: &Frame,
        raw: Option<&Frame>,
    ) -> Result<CaptureRecord, PipelineError> {
        let stem = self.namer.next_stem("photo");
        let mut files = Vec::with_capacity(2);

        for frame in std::iter::once(jpeg).chain(raw) {
            let path = self
                .dir
                .join(format!("{stem}.{}", frame.format().extension()));
            if let Err(e) = write_atomic(&path, frame.data()) {
                for written in &files {
                    let _ = std::fs::remove_file(written);
                }
                return Err(e);
            }
            files.push(path);
        }

        info!(files = ?files, "Capture written");
        Ok(CaptureRecord {
            files,
            created_at: Local::now(),
        })
    }

    /// Reserves a new, unused video path.
    pub fn allocate_video_path(&self) -> PathBuf {
        let stem = self.namer.next_stem("video");
        self.dir
            .join(format!("{stem}.{}", extension(self.video.encoder)))
    }

    /// Opens the video encoder for `path`.
    pub fn begin_video(&self, path: PathBuf, fps: u32) -> Result<VideoHandle, PipelineError> {
        if path.exists() {
            return Err(PipelineError::io(
                &path,
                std::io::Error::new(std::io::ErrorKind::AlreadyExists, "file exists"),
            ));
        }
        let temp_path = temp_path_for(&path);
        let encoder = open_encoder(&self.video, &temp_path, fps)?;
        debug!(path = %path.display(), fps, "Video started");
        Ok(VideoHandle {
            path,
            temp_path,
            encoder,
            fps,
            frames: 0,
        })
    }

    /// Finalizes the encoder and moves the video under its final name.
    pub fn end_video(&self, handle: VideoHandle) -> Result<PathBuf, PipelineError> {
        let VideoHandle {
            path,
            temp_path,
            encoder,
            frames,
            ..
        } = handle;

        let finished = encoder
            .finish()
            .and_then(|()| std::fs::rename(&temp_path, &path).map_err(|e| PipelineError::io(&path, e)));

        if let Err(e) = finished {
            warn!(path = %path.display(), error = %e, "Video finalization failed");
            let _ = std::fs::remove_file(&temp_path);
            return Err(e);
        }

        info!(path = %path.display(), frames, "Video finalized");
        Ok(path)
    }

    /// Discards an unfinished video and its temporary file.
    pub fn abort_video(&self, handle: VideoHandle) {
        let VideoHandle {
            path,
            temp_path,
            encoder,
            ..
        } = handle;
        drop(encoder);
        let _ = std::fs::remove_file(&temp_path);
        debug!(path = %path.display(), "Video aborted");
    }
}

fn temp_path_for(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{name}.part"))
}

/// Writes `data` to a temporary file, syncs it, then renames it to `path`.
fn write_atomic(path: &Path, data: &[u8]) -> Result<(), PipelineError> {
    if path.exists() {
        return Err(PipelineError::io(
            path,
            std::io::Error::new(std::io::ErrorKind::AlreadyExists, "file exists"),
        ));
    }
    let temp = temp_path_for(path);

    let result = (|| {
        let mut file = File::create(&temp)?;
        file.write_all(data)?;
        file.sync_all()?;
        std::fs::rename(&temp, path)
    })();

    result.map_err(|e| {
        let _ = std::fs::remove_file(&temp);
        PipelineError::io(path, e)
    })
}
