//! Raspberry Pi HQ Camera source driven through the `rpicam-apps` tools.
//!
//! Preview and video frames come from a long-running `rpicam-vid` child
//! writing Motion-JPEG to stdout; full-resolution stills (and their DNG
//! companions) are taken with `rpicam-still`. Control changes restart the
//! streaming child, so this source cannot reconfigure mid-recording.

use super::{
    Frame, FrameFormat, FrameRequest, FrameSource, SourceCapabilities, SourceError, SourceKind,
};
use crate::config::{CameraConfig, Resolution};
use crate::controls::{
    ControlValue, ControlValues, AE_ENABLE, AF_MODE, ANALOGUE_GAIN, AWB_ENABLE, BRIGHTNESS,
    COLOUR_GAINS, CONTRAST, EXPOSURE_TIME, LENS_POSITION, NOISE_REDUCTION_MODE, SATURATION,
    SHARPNESS,
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Names of the vendor camera tools.
///
/// Older Raspberry Pi OS releases ship them as `libcamera-*`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraCommand {
    pub still: String,
    pub vid: String,
    pub hello: String,
}

impl Default for CameraCommand {
    fn default() -> Self {
        Self {
            still: "rpicam-still".to_string(),
            vid: "rpicam-vid".to_string(),
            hello: "rpicam-hello".to_string(),
        }
    }
}

/// Lists attached cameras and returns the first sensor model found.
pub fn probe_hardware(command: &CameraCommand) -> Result<String, SourceError> {
    let output = Command::new(&command.hello)
        .arg("--list-cameras")
        .stdin(Stdio::null())
        .output()
        .map_err(|e| SourceError::NotDetected(format!("{}: {e}", command.hello)))?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    parse_camera_list(&stdout)
        .ok_or_else(|| SourceError::NotDetected("no cameras listed".to_string()))
}

/// Extracts the sensor model from `--list-cameras` output,
/// e.g. `0 : imx477 [4056x3040 12-bit RGGB] (/base/soc/i2c0mux/...)`.
fn parse_camera_list(output: &str) -> Option<String> {
    output.lines().find_map(|line| {
        let (index, rest) = line.split_once(':')?;
        index.trim().parse::<u32>().ok()?;
        rest.split_whitespace().next().map(str::to_string)
    })
}

/// Translates control values into `rpicam-*` command-line options.
pub fn control_args(values: &ControlValues) -> Vec<String> {
    let mut args = Vec::new();
    let get = |id: &str| values.get(id).copied();
    let flag = |id: &str| get(id).and_then(|v| v.as_bool()).unwrap_or(false);

    if !flag(AE_ENABLE) {
        if let Some(us) = get(EXPOSURE_TIME).and_then(|v| v.as_int()) {
            args.extend(["--shutter".to_string(), us.to_string()]);
        }
        if let Some(gain) = get(ANALOGUE_GAIN).and_then(|v| v.as_float()) {
            args.extend(["--gain".to_string(), gain.to_string()]);
        }
    }

    if flag(AWB_ENABLE) {
        args.extend(["--awb".to_string(), "auto".to_string()]);
    } else if let Some([r, b]) = get(COLOUR_GAINS).and_then(|v| v.as_pair()) {
        args.extend(["--awbgains".to_string(), format!("{r},{b}")]);
    }

    for (id, option) in [
        (BRIGHTNESS, "--brightness"),
        (CONTRAST, "--contrast"),
        (SATURATION, "--saturation"),
        (SHARPNESS, "--sharpness"),
    ] {
        if let Some(v) = get(id).and_then(|v| v.as_float()) {
            args.extend([option.to_string(), v.to_string()]);
        }
    }

    if let Some(mode) = get(NOISE_REDUCTION_MODE).and_then(|v| v.as_int()) {
        let denoise = match mode {
            0 => "off",
            1 | 3 => "cdn_fast",
            _ => "cdn_hq",
        };
        args.extend(["--denoise".to_string(), denoise.to_string()]);
    }

    match get(AF_MODE) {
        Some(ControlValue::Int(1)) => {
            args.extend(["--autofocus-mode".to_string(), "auto".to_string()]);
        }
        Some(ControlValue::Int(2)) => {
            args.extend(["--autofocus-mode".to_string(), "continuous".to_string()]);
        }
        _ => {
            if let Some(pos) = get(LENS_POSITION).and_then(|v| v.as_float()) {
                args.extend(["--lens-position".to_string(), pos.to_string()]);
            }
        }
    }

    args
}

/// Splits a Motion-JPEG byte stream into individual JPEG images.
#[derive(Debug, Default)]
pub struct JpegSplitter {
    buf: Vec<u8>,
}

impl JpegSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends stream bytes and returns every JPEG completed by them.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Bytes> {
        self.buf.extend_from_slice(chunk);
        let mut frames = Vec::new();

        loop {
            let Some(start) = find_marker(&self.buf, 0, 0xD8) else {
                // Keep a trailing 0xFF in case the marker straddles chunks.
                let keep = usize::from(self.buf.last() == Some(&0xFF));
                self.buf.drain(..self.buf.len() - keep);
                break;
            };
            let Some(end) = find_marker(&self.buf, start + 2, 0xD9) else {
                self.buf.drain(..start);
                break;
            };
            frames.push(Bytes::copy_from_slice(&self.buf[start..end + 2]));
            self.buf.drain(..end + 2);
        }

        frames
    }
}

fn find_marker(buf: &[u8], from: usize, marker: u8) -> Option<usize> {
    buf.get(from..)?
        .windows(2)
        .position(|w| w[0] == 0xFF && w[1] == marker)
        .map(|i| i + from)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamMode {
    Preview,
    Video { fps: u32 },
}

struct Stream {
    mode: StreamMode,
    child: Child,
    frames: Receiver<Bytes>,
    reader: Option<JoinHandle<()>>,
}

impl Stream {
    fn stop(mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
        if let Some(reader) = self.reader.take() {
            let _ = reader.join();
        }
    }
}

/// The Raspberry Pi HQ Camera (IMX477) behind `rpicam-apps`.
pub struct RpiCamera {
    command: CameraCommand,
    capabilities: SourceCapabilities,
    jpeg_quality: u8,
    preview_fps: u32,
    controls: ControlValues,
    stream: Option<Stream>,
    /// DNG captured alongside the most recent still.
    pending_raw: Option<Frame>,
    scratch_dir: PathBuf,
    sequence: u64,
}

impl RpiCamera {
    pub fn new(config: &CameraConfig, model: String) -> Self {
        info!(model = %model, "Camera started (hardware mode)");
        Self {
            command: config.command.clone(),
            capabilities: SourceCapabilities {
                name: model,
                kind: SourceKind::Hardware,
                preview_size: config.preview_size,
                still_size: config.still_size,
                video_size: config.video_size,
                live_controls: false,
            },
            jpeg_quality: config.jpeg_quality,
            preview_fps: config.preview_fps,
            controls: ControlValues::new(),
            stream: None,
            pending_raw: None,
            scratch_dir: std::env::temp_dir(),
            sequence: 0,
        }
    }

    /// Longest wait for one streamed frame under the current exposure.
    fn frame_timeout(&self) -> Duration {
        let exposure_us = self
            .controls
            .get(EXPOSURE_TIME)
            .and_then(|v| v.as_int())
            .unwrap_or(0)
            .max(0) as u64;
        Duration::from_secs(2) + Duration::from_micros(exposure_us) * 2
    }

    fn size_for(&self, mode: StreamMode) -> Resolution {
        match mode {
            StreamMode::Preview => self.capabilities.preview_size,
            StreamMode::Video { .. } => self.capabilities.video_size,
        }
    }

    fn start_stream(&mut self, mode: StreamMode) -> Result<(), SourceError> {
        let size = self.size_for(mode);
        let fps = match mode {
            StreamMode::Preview => self.preview_fps,
            StreamMode::Video { fps } => fps,
        };

        let mut args = vec![
            "-t".to_string(),
            "0".to_string(),
            "-n".to_string(),
            "--codec".to_string(),
            "mjpeg".to_string(),
            "--width".to_string(),
            size.width.to_string(),
            "--height".to_string(),
            size.height.to_string(),
            "--framerate".to_string(),
            fps.to_string(),
            "-q".to_string(),
            self.jpeg_quality.to_string(),
            "--flush".to_string(),
            "-o".to_string(),
            "-".to_string(),
        ];
        args.extend(control_args(&self.controls));

        info!(?mode, width = size.width, height = size.height, fps, "Starting {}", self.command.vid);
        debug!("{} args: {:?}", self.command.vid, args);

        let mut child = Command::new(&self.command.vid)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| {
                SourceError::DeviceUnavailable(format!("failed to spawn {}: {e}", self.command.vid))
            })?;

        let stdout = child.stdout.take().ok_or_else(|| {
            SourceError::DeviceUnavailable(format!("no stdout from {}", self.command.vid))
        })?;

        let (tx, rx) = mpsc::sync_channel(2);
        let reader = std::thread::Builder::new()
            .name("rpicam-reader".to_string())
            .spawn(move || read_mjpeg(stdout, tx))
            .map_err(|e| SourceError::DeviceUnavailable(e.to_string()))?;

        self.stream = Some(Stream {
            mode,
            child,
            frames: rx,
            reader: Some(reader),
        });
        Ok(())
    }

    fn stop_stream(&mut self) {
        if let Some(stream) = self.stream.take() {
            debug!(mode = ?stream.mode, "Stopping camera stream");
            stream.stop();
        }
    }

    fn streamed_frame(&mut self, mode: StreamMode) -> Result<Frame, SourceError> {
        if self.stream.as_ref().map(|s| s.mode) != Some(mode) {
            self.stop_stream();
            self.start_stream(mode)?;
        }

        let timeout = self.frame_timeout();
        let received = match &self.stream {
            Some(stream) => stream.frames.recv_timeout(timeout),
            None => Err(RecvTimeoutError::Disconnected),
        };

        match received {
            Ok(jpeg) => {
                self.sequence += 1;
                let size = self.size_for(mode);
                Ok(Frame::new(jpeg, FrameFormat::Jpeg, size.width, size.height, self.sequence))
            }
            Err(e) => {
                self.stop_stream();
                let reason = match e {
                    RecvTimeoutError::Timeout => format!("no frame within {timeout:?}"),
                    RecvTimeoutError::Disconnected => format!("{} exited", self.command.vid),
                };
                Err(SourceError::DeviceUnavailable(reason))
            }
        }
    }

    /// `rpicam-still` options for one exposure written to `jpeg_path`.
    ///
    /// With `raw` the tool also writes a DNG next to the JPEG.
    fn still_args(&self, jpeg_path: &Path, raw: bool) -> Vec<String> {
        let size = self.capabilities.still_size;
        let mut args = vec!["-n".to_string(), "--immediate".to_string()];
        if raw {
            args.push("--raw".to_string());
        }
        args.extend([
            "--width".to_string(),
            size.width.to_string(),
            "--height".to_string(),
            size.height.to_string(),
            "-q".to_string(),
            self.jpeg_quality.to_string(),
            "-o".to_string(),
            jpeg_path.to_string_lossy().into_owned(),
        ]);
        args.extend(control_args(&self.controls));
        args
    }

    fn capture_still(&mut self, raw: bool) -> Result<Frame, SourceError> {
        // The sensor can only run one pipeline at a time.
        self.stop_stream();
        self.pending_raw = None;
        self.sequence += 1;

        let size = self.capabilities.still_size;
        let jpeg_path = self
            .scratch_dir
            .join(format!("hqastrocam-{}-{}.jpg", std::process::id(), self.sequence));
        let dng_path = jpeg_path.with_extension("dng");
        let args = self.still_args(&jpeg_path, raw);

        info!(width = size.width, height = size.height, raw, "Capturing still");
        let status = Command::new(&self.command.still)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map_err(|e| {
                SourceError::DeviceUnavailable(format!("failed to spawn {}: {e}", self.command.still))
            })?;

        let jpeg = std::fs::read(&jpeg_path);
        let dng = if raw {
            std::fs::read(&dng_path).ok()
        } else {
            None
        };
        let _ = std::fs::remove_file(&jpeg_path);
        if raw {
            let _ = std::fs::remove_file(&dng_path);
        }

        if !status.success() {
            return Err(SourceError::DeviceUnavailable(format!(
                "{} exited with {status}",
                self.command.still
            )));
        }
        let jpeg = jpeg.map_err(|e| {
            SourceError::DeviceUnavailable(format!("still capture produced no image: {e}"))
        })?;

        self.pending_raw = dng.map(|data| {
            Frame::new(data, FrameFormat::Dng, size.width, size.height, self.sequence)
        });
        Ok(Frame::new(jpeg, FrameFormat::Jpeg, size.width, size.height, self.sequence))
    }
}

impl FrameSource for RpiCamera {
    fn capabilities(&self) -> &SourceCapabilities {
        &self.capabilities
    }

    fn configure(&mut self, values: &ControlValues) -> Result<(), SourceError> {
        if *values == self.controls {
            return Ok(());
        }
        self.controls = values.clone();

        // Restart a running stream so the new options take effect.
        if let Some(mode) = self.stream.as_ref().map(|s| s.mode) {
            self.stop_stream();
            self.start_stream(mode)?;
        }
        Ok(())
    }

    fn next_frame(&mut self, request: FrameRequest) -> Result<Frame, SourceError> {
        match request {
            FrameRequest::Preview => self.streamed_frame(StreamMode::Preview),
            FrameRequest::Video { fps } => self.streamed_frame(StreamMode::Video { fps }),
            FrameRequest::Still { with_raw } => self.capture_still(with_raw),
            FrameRequest::Raw => {
                if self.pending_raw.is_none() {
                    self.capture_still(true)?;
                }
                self.pending_raw.take().ok_or_else(|| {
                    SourceError::DeviceUnavailable("sensor produced no DNG".to_string())
                })
            }
        }
    }

    fn close(&mut self) {
        self.stop_stream();
        info!("Camera closed");
    }
}

impl Drop for RpiCamera {
    fn drop(&mut self) {
        self.stop_stream();
    }
}

fn read_mjpeg<R: Read>(mut reader: R, tx: SyncSender<Bytes>) {
    let mut splitter = JpegSplitter::new();
    let mut buf = vec![0u8; 64 * 1024];
    let mut dropped = 0u64;

    loop {
        match reader.read(&mut buf) {
            Ok(0) => {
                debug!("Camera stream ended (EOF)");
                break;
            }
            Ok(n) => {
                for jpeg in splitter.push(&buf[..n]) {
                    match tx.try_send(jpeg) {
                        Ok(()) => {}
                        Err(TrySendError::Full(_)) => dropped += 1,
                        Err(TrySendError::Disconnected(_)) => return,
                    }
                }
            }
            Err(e) => {
                warn!("Error reading camera stream: {}", e);
                break;
            }
        }
    }

    if dropped > 0 {
        debug!(dropped, "Camera stream frames dropped by slow consumer");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controls::ControlRegistry;

    #[test]
    fn test_parse_camera_list() {
        let output = "Available cameras\n-----------------\n\
                      0 : imx477 [4056x3040 12-bit RGGB] (/base/soc/i2c0mux/i2c@1/imx477@1a)\n";
        assert_eq!(parse_camera_list(output).as_deref(), Some("imx477"));
        assert_eq!(parse_camera_list("No cameras available!"), None);
    }

    #[test]
    fn test_default_control_args() {
        let args = control_args(&ControlRegistry::hq_camera().defaults());
        let joined = args.join(" ");
        assert!(joined.contains("--shutter 10000"));
        assert!(joined.contains("--gain 1"));
        assert!(joined.contains("--awbgains 1.5,1.5"));
        assert!(joined.contains("--denoise cdn_hq"));
        assert!(joined.contains("--lens-position 0"));
    }

    #[test]
    fn test_auto_modes_omit_manual_args() {
        let mut values = ControlRegistry::hq_camera().defaults();
        values.insert(AE_ENABLE.to_string(), ControlValue::Bool(true));
        values.insert(AWB_ENABLE.to_string(), ControlValue::Bool(true));
        let joined = control_args(&values).join(" ");
        assert!(!joined.contains("--shutter"));
        assert!(!joined.contains("--awbgains"));
        assert!(joined.contains("--awb auto"));
    }

    #[test]
    fn test_still_requests_dng_only_when_asked() {
        let camera = RpiCamera::new(&CameraConfig::default(), "imx477".to_string());
        let path = Path::new("/tmp/still.jpg");

        let jpeg_only = camera.still_args(path, false);
        assert!(!jpeg_only.iter().any(|a| a == "--raw"));
        assert!(jpeg_only.iter().any(|a| a == "/tmp/still.jpg"));

        let with_raw = camera.still_args(path, true);
        assert!(with_raw.iter().any(|a| a == "--raw"));
    }

    #[test]
    fn test_splitter_across_chunks() {
        let mut splitter = JpegSplitter::new();
        let stream = [
            0xFF, 0xD8, 1, 2, 3, 0xFF, 0xD9, // frame 1
            0xFF, 0xD8, 4, 5, 0xFF, 0xD9, // frame 2
        ];

        let mut frames = splitter.push(&stream[..4]);
        assert!(frames.is_empty());
        frames.extend(splitter.push(&stream[4..8]));
        frames.extend(splitter.push(&stream[8..]));

        assert_eq!(frames.len(), 2);
        assert_eq!(&frames[0][..], &[0xFF, 0xD8, 1, 2, 3, 0xFF, 0xD9]);
        assert_eq!(&frames[1][..], &[0xFF, 0xD8, 4, 5, 0xFF, 0xD9]);
    }

    #[test]
    fn test_splitter_discards_garbage() {
        let mut splitter = JpegSplitter::new();
        let frames = splitter.push(&[0x00, 0x11, 0xFF, 0xD8, 0x42, 0xFF, 0xD9, 0x00]);
        assert_eq!(frames.len(), 1);
        assert_eq!(&frames[0][..], &[0xFF, 0xD8, 0x42, 0xFF, 0xD9]);
    }

    #[test]
    fn test_missing_tool_is_not_detected() {
        let command = CameraCommand {
            hello: "hqastrocam-no-such-tool".to_string(),
            ..CameraCommand::default()
        };
        assert!(matches!(
            probe_hardware(&command),
            Err(SourceError::NotDetected(_))
        ));
    }
}
