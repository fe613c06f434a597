use super::cache::{no_signal_jpeg, FrameCache, PreviewFrame};
use super::error::SessionError;
use super::persist::StateStore;
use super::recorder::{Device, Recorder, SharedDevice, SharedTarget, Target, WorkerOutcome};
use super::state::{
    InterruptedRecording, Phase, RecordingSession, RecordingStatus, RecordingSummary,
    SessionSnapshot, SessionState, SessionStats,
};
use crate::controls::{ControlRegistry, PresetTable};
use crate::pipeline::{CaptureRecord, CapturePipeline};
use crate::source::{FrameRequest, FrameSource, SourceCapabilities};
use bytes::Bytes;
use chrono::Local;
use parking_lot::{Mutex, MutexGuard};
use serde_json::Value;
use std::collections::BTreeMap;
use std::ffi::OsStr;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Lowest accepted recording frame rate.
pub const MIN_RECORDING_FPS: u32 = 5;
/// Highest accepted recording frame rate.
pub const MAX_RECORDING_FPS: u32 = 60;

/// How long a settings change waits for the camera before deferring.
const DEVICE_WAIT: Duration = Duration::from_millis(250);

struct Control {
    phase: Phase,
    state: SessionState,
    recorder: Option<Recorder>,
    /// Bumped on every change to `state.values`.
    revision: u64,
    stats: SessionStats,
    /// Recording that ended on its own, with the error that ended it.
    interrupted: Option<(InterruptedRecording, SessionError)>,
}

/// A joined recording worker and its finalized video.
struct Finished {
    summary: Result<RecordingSummary, SessionError>,
    failure: Option<SessionError>,
}

/// Single owner of the camera and the session state.
///
/// All operations take `&self` and may be called from any thread. Lock order
/// is always control state first, device second; the recording worker only
/// ever takes the device lock. The control lock never waits on the device
/// for longer than a short bounded time, so a long exposure cannot stall
/// status queries.
pub struct SessionCoordinator {
    registry: ControlRegistry,
    presets: PresetTable,
    capabilities: SourceCapabilities,
    pipeline: CapturePipeline,
    store: Option<StateStore>,
    control: Mutex<Control>,
    device: SharedDevice,
    /// Latest control values, picked up by whoever holds the device next.
    target: SharedTarget,
    cache: Arc<FrameCache>,
    placeholder: Bytes,
    preview_frames: AtomicU64,
    preview_failing: AtomicBool,
}

impl SessionCoordinator {
    /// Takes ownership of `source` and configures it with the registry defaults.
    pub fn new(
        registry: ControlRegistry,
        presets: PresetTable,
        source: Box<dyn FrameSource>,
        pipeline: CapturePipeline,
    ) -> Self {
        let capabilities = source.capabilities().clone();
        let state = SessionState::new(registry.defaults());
        info!(
            source = %capabilities.name,
            kind = ?capabilities.kind,
            live_controls = capabilities.live_controls,
            "Session coordinator ready"
        );

        let target = Target {
            values: state.values.clone(),
            revision: 1,
        };
        let coordinator = Self {
            registry,
            presets,
            capabilities,
            pipeline,
            store: None,
            control: Mutex::new(Control {
                phase: Phase::Idle,
                state,
                recorder: None,
                revision: target.revision,
                stats: SessionStats::default(),
                interrupted: None,
            }),
            device: Arc::new(Mutex::new(Device::new(source))),
            target: Arc::new(Mutex::new(target)),
            cache: Arc::new(FrameCache::default()),
            placeholder: no_signal_jpeg(),
            preview_frames: AtomicU64::new(0),
            preview_failing: AtomicBool::new(false),
        };
        coordinator.sync_device();
        coordinator
    }

    /// Restores settings from `store` and saves every later change to it.
    pub fn with_state_store(mut self, store: StateStore) -> Self {
        if let Some(restored) = store.load(&self.registry) {
            let control = self.control.get_mut();
            control.state.values.extend(restored.values);
            control.state.active_preset = restored
                .active_preset
                .filter(|id| self.presets.get(id).is_some());
            control.revision += 1;
            publish(&self.target, control);
        }
        self.store = Some(store);
        self.sync_device();
        self
    }

    pub fn registry(&self) -> &ControlRegistry {
        &self.registry
    }

    pub fn presets(&self) -> &PresetTable {
        &self.presets
    }

    pub fn capabilities(&self) -> &SourceCapabilities {
        &self.capabilities
    }

    pub fn captures_dir(&self) -> &Path {
        self.pipeline.captures_dir()
    }

    /// Current state, phase and recording progress.
    pub fn snapshot(&self) -> SessionSnapshot {
        let control = self.lock_control();
        SessionSnapshot {
            phase: control.phase,
            state: control.state.clone(),
            recording: control.recorder.as_ref().map(|r| RecordingStatus {
                session: r.session().clone(),
                frames: r.frames(),
                elapsed_secs: r.elapsed().as_secs_f64(),
            }),
            interrupted: control.interrupted.as_ref().map(|(info, _)| info.clone()),
        }
    }

    pub fn phase(&self) -> Phase {
        self.lock_control().phase
    }

    /// Counters for the metrics endpoint.
    pub fn stats(&self) -> SessionStats {
        let control = self.lock_control();
        let mut stats = control.stats;
        stats.recording_active = control.phase == Phase::Recording;
        if let Some(recorder) = &control.recorder {
            stats.recorded_frames += recorder.frames();
        }
        stats.preview_frames = self.preview_frames.load(Ordering::Relaxed);
        stats
    }

    /// Whether `name` is the file of the recording in progress.
    pub fn is_recording_file(&self, name: &str) -> bool {
        let control = self.lock_control();
        control
            .state
            .recording_path
            .as_deref()
            .and_then(Path::file_name)
            .is_some_and(|current| current == OsStr::new(name))
    }

    /// Validates and applies a partial update of control values.
    ///
    /// Nothing changes unless every entry is valid. Outside of Idle the
    /// values are stored and reach the camera once it returns to Idle,
    /// unless the source accepts controls while recording.
    pub fn apply_settings(
        &self,
        updates: &BTreeMap<String, Value>,
    ) -> Result<SessionState, SessionError> {
        let validated = self.registry.validate_all(updates)?;
        let mut control = self.lock_control();
        if validated.is_empty() {
            return Ok(control.state.clone());
        }

        let previous = control.state.clone();
        control.state.values.extend(validated);
        control.state.active_preset = None;
        self.commit(&mut control, previous)?;

        info!(changed = updates.len(), "Settings applied");
        Ok(control.state.clone())
    }

    /// Applies every override of the named preset.
    pub fn apply_preset(&self, id: &str) -> Result<SessionState, SessionError> {
        let preset = self
            .presets
            .get(id)
            .ok_or_else(|| SessionError::InvalidParameter(format!("unknown preset: {id}")))?;

        let mut control = self.lock_control();
        let previous = control.state.clone();
        control.state.values.extend(preset.effective_values());
        control.state.active_preset = Some(preset.id.clone());
        self.commit(&mut control, previous)?;

        info!(preset = %preset.id, "Preset applied");
        Ok(control.state.clone())
    }

    /// Takes a full-resolution still, plus a raw frame if asked.
    pub fn capture(&self, raw: bool) -> Result<CaptureRecord, SessionError> {
        {
            let mut control = self.lock_control();
            check_idle(&control)?;
            control.phase = Phase::Capturing;
        }
        debug!(raw, "Capture started");

        let result = self.run_capture(raw);
        {
            let mut control = self.lock_control();
            control.phase = Phase::Idle;
            match &result {
                Ok(_) => control.stats.captures += 1,
                Err(_) => control.stats.capture_failures += 1,
            }
        }
        if let Err(e) = &result {
            warn!(error = %e, "Capture failed");
        }

        self.sync_device();
        result
    }

    fn run_capture(&self, raw: bool) -> Result<CaptureRecord, SessionError> {
        let (still, raw_frame) = {
            let mut device = self.device.lock();
            device.sync(&self.target)?;
            let still = device
                .source
                .next_frame(FrameRequest::Still { with_raw: raw })?;
            let raw_frame = if raw {
                Some(device.source.next_frame(FrameRequest::Raw)?)
            } else {
                None
            };
            (still, raw_frame)
        };
        Ok(self.pipeline.write_capture(&still, raw_frame.as_ref())?)
    }

    /// Starts recording video at `fps` frames per second.
    pub fn start_recording(&self, fps: u32) -> Result<RecordingSession, SessionError> {
        {
            let mut control = self.lock_control();
            check_idle(&control)?;
            if !(MIN_RECORDING_FPS..=MAX_RECORDING_FPS).contains(&fps) {
                return Err(SessionError::OutOfRange(format!(
                    "fps must be between {MIN_RECORDING_FPS} and {MAX_RECORDING_FPS}, got {fps}"
                )));
            }
            control.phase = Phase::Recording;
            control.interrupted = None;
        }

        let started = self.begin_recording(fps);
        let mut control = self.control.lock();
        match started {
            Ok(recorder) => {
                let session = recorder.session().clone();
                control.state.recording = true;
                control.state.recording_path = Some(session.path.clone());
                control.recorder = Some(recorder);
                Ok(session)
            }
            Err(e) => {
                control.phase = Phase::Idle;
                drop(control);
                warn!(error = %e, "Failed to start recording");
                self.sync_device();
                Err(e)
            }
        }
    }

    fn begin_recording(&self, fps: u32) -> Result<Recorder, SessionError> {
        let path = self.pipeline.allocate_video_path();
        let mut video = self.pipeline.begin_video(path.clone(), fps)?;

        // The first frame is taken here so a dead source fails the start.
        let first = {
            let mut device = self.device.lock();
            device
                .sync(&self.target)
                .and_then(|()| device.source.next_frame(FrameRequest::Video { fps }))
        };
        let primed = first.map_err(SessionError::from).and_then(|frame| {
            video.push_frame(&frame)?;
            self.cache.store(&frame);
            Ok(())
        });
        if let Err(e) = primed {
            self.pipeline.abort_video(video);
            return Err(e);
        }

        let session = RecordingSession {
            path,
            fps,
            started_at: Local::now(),
        };
        let live_target = self
            .capabilities
            .live_controls
            .then(|| Arc::clone(&self.target));
        Recorder::start(
            session,
            Arc::clone(&self.device),
            live_target,
            Arc::clone(&self.cache),
            video,
        )
        .map_err(|e| SessionError::DeviceUnavailable(format!("failed to spawn recorder: {e}")))
    }

    /// Stops the recording and finalizes its file.
    ///
    /// A recording that already ended because of a camera or storage failure
    /// is reported here once, with the error that ended it.
    pub fn stop_recording(&self) -> Result<RecordingSummary, SessionError> {
        let recorder = {
            let mut control = self.lock_control();
            if control.phase != Phase::Recording {
                return match control.interrupted.take() {
                    Some((_, cause)) => Err(cause),
                    None => Err(SessionError::NotRecording),
                };
            }
            control
                .recorder
                .take()
                .ok_or(SessionError::Busy("recording is starting or stopping"))?
        };

        let Finished { summary, failure } = self.finalize(recorder);
        end_recording(&mut self.control.lock(), &summary);

        match &summary {
            Ok(summary) => info!(
                path = %summary.path.display(),
                frames = summary.frames,
                secs = summary.duration.as_secs_f64(),
                "Recording stopped"
            ),
            Err(e) => warn!(error = %e, "Recording could not be finalized"),
        }

        self.sync_device();
        match failure {
            Some(cause) => {
                warn!(error = %cause, "Recording had already ended early");
                Err(cause)
            }
            None => summary,
        }
    }

    /// Returns the frame to show in the live view.
    ///
    /// Fresh frames are only pulled from the source while Idle; during a
    /// capture or recording the most recent frame is returned, or a
    /// placeholder if none exists yet. Never blocks on an exclusive
    /// operation.
    pub fn next_preview_frame(&self) -> PreviewFrame {
        if self.lock_control().phase != Phase::Idle {
            return self.latest_preview();
        }

        let Some(mut device) = self.device.try_lock() else {
            return self.latest_preview();
        };
        let result = device
            .sync(&self.target)
            .and_then(|()| device.source.next_frame(FrameRequest::Preview));
        drop(device);

        match result {
            Ok(frame) => {
                if self.preview_failing.swap(false, Ordering::Relaxed) {
                    info!("Preview recovered");
                }
                match self.cache.store(&frame) {
                    Some(preview) => {
                        self.preview_frames.fetch_add(1, Ordering::Relaxed);
                        preview
                    }
                    None => self.latest_preview(),
                }
            }
            Err(e) => {
                if !self.preview_failing.swap(true, Ordering::Relaxed) {
                    warn!(error = %e, "Preview acquisition failed");
                }
                self.latest_preview()
            }
        }
    }

    /// Most recent frame without touching the source.
    pub fn latest_preview(&self) -> PreviewFrame {
        match self.cache.latest() {
            Some(mut frame) => {
                frame.live = false;
                frame
            }
            None => PreviewFrame {
                jpeg: self.placeholder.clone(),
                sequence: 0,
                live: false,
            },
        }
    }

    /// Stops any recording and releases the camera.
    pub fn shutdown(&self) {
        if self.phase() == Phase::Recording {
            if let Err(e) = self.stop_recording() {
                warn!(error = %e, "Failed to stop recording during shutdown");
            }
        }
        self.device.lock().source.close();
        info!("Session closed");
    }

    /// Locks the control state, first retiring a recording whose worker
    /// exited on its own.
    fn lock_control(&self) -> MutexGuard<'_, Control> {
        let mut control = self.control.lock();
        let ended = control.recorder.as_ref().is_some_and(Recorder::has_ended);
        if ended {
            if let Some(recorder) = control.recorder.take() {
                self.retire(&mut control, recorder);
            }
        }
        control
    }

    /// Finalizes a recording that stopped without `stop_recording` and
    /// returns the coordinator to Idle.
    fn retire(&self, control: &mut Control, recorder: Recorder) {
        let frames = recorder.frames();
        let Finished { summary, failure } = self.finalize(recorder);
        end_recording(control, &summary);

        let path = summary.as_ref().ok().map(|s| s.path.clone());
        let cause = match (failure, summary) {
            (Some(cause), _) => cause,
            (None, Err(e)) => e,
            (None, Ok(_)) => {
                SessionError::DeviceUnavailable("recording ended without being stopped".into())
            }
        };
        warn!(error = %cause, frames, path = ?path, "Recording interrupted");

        let info = InterruptedRecording {
            path,
            frames,
            reason: cause.to_string(),
        };
        control.interrupted = Some((info, cause));
    }

    /// Joins the recording worker and finalizes its video.
    fn finalize(&self, recorder: Recorder) -> Finished {
        let session = recorder.session().clone();
        let duration = recorder.elapsed();
        let Some(WorkerOutcome { video, failure }) = recorder.stop() else {
            return Finished {
                summary: Err(SessionError::DeviceUnavailable(
                    "recording worker stopped unexpectedly".into(),
                )),
                failure: None,
            };
        };

        let frames = video.frames();
        let summary = self
            .pipeline
            .end_video(video)
            .map(|path| RecordingSummary {
                path,
                fps: session.fps,
                frames,
                started_at: session.started_at,
                duration,
            })
            .map_err(SessionError::from);
        Finished { summary, failure }
    }

    /// Pushes the new state to the camera when allowed, otherwise defers it.
    ///
    /// A camera busy with a long exposure is not waited for; the change is
    /// left for whoever acquires the device next.
    fn commit(&self, control: &mut Control, previous: SessionState) -> Result<(), SessionError> {
        control.revision += 1;
        let immediate = match control.phase {
            Phase::Idle => true,
            Phase::Recording => self.capabilities.live_controls,
            Phase::Capturing => false,
        };

        let device = if immediate {
            self.device.try_lock_for(DEVICE_WAIT)
        } else {
            None
        };
        match device {
            Some(mut device) => {
                if let Err(e) = device.configure(&control.state.values, control.revision) {
                    warn!(error = %e, "Camera rejected settings, rolling back");
                    control.state = previous;
                    // Forces the previous values back onto the device later.
                    control.revision += 1;
                    publish(&self.target, control);
                    return Err(e.into());
                }
            }
            None => debug!(phase = ?control.phase, "Settings deferred"),
        }
        publish(&self.target, control);

        control.stats.settings_changes += 1;
        self.persist(&control.state);
        Ok(())
    }

    /// Applies settings that were deferred while the camera was busy.
    fn sync_device(&self) {
        if self.lock_control().phase != Phase::Idle {
            return;
        }
        // A current holder of the device applies the target itself.
        let Some(mut device) = self.device.try_lock() else {
            return;
        };
        if let Err(e) = device.sync(&self.target) {
            warn!(error = %e, "Failed to apply pending settings, will retry");
        }
    }

    fn persist(&self, state: &SessionState) {
        if let Some(store) = &self.store {
            if let Err(e) = store.save(&state.values, state.active_preset.as_deref()) {
                warn!(path = %store.path().display(), error = %e, "Failed to save state");
            }
        }
    }
}

fn publish(target: &Mutex<Target>, control: &Control) {
    *target.lock() = Target {
        values: control.state.values.clone(),
        revision: control.revision,
    };
}

fn end_recording(control: &mut Control, summary: &Result<RecordingSummary, SessionError>) {
    control.phase = Phase::Idle;
    control.state.recording = false;
    control.state.recording_path = None;
    if let Ok(summary) = summary {
        control.stats.recordings += 1;
        control.stats.recorded_frames += summary.frames;
    }
}

fn check_idle(control: &Control) -> Result<(), SessionError> {
    match control.phase {
        Phase::Idle => Ok(()),
        Phase::Capturing => Err(SessionError::Busy("capture in progress")),
        Phase::Recording => Err(SessionError::Busy("recording in progress")),
    }
}

impl std::fmt::Debug for SessionCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCoordinator")
            .field("source", &self.capabilities.name)
            .field("phase", &self.control.try_lock().map(|c| c.phase))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CameraConfig, Resolution, VideoConfig};
    use crate::controls::{ControlValue, ControlValues, AE_ENABLE, ANALOGUE_GAIN, EXPOSURE_TIME};
    use crate::source::{Frame, SourceError, SyntheticSource};
    use serde_json::json;
    use std::time::Duration;
    use tempfile::{tempdir, TempDir};

    fn small_camera() -> CameraConfig {
        CameraConfig {
            preview_size: Resolution::new(64, 48),
            still_size: Resolution::new(96, 72),
            video_size: Resolution::new(64, 48),
            ..CameraConfig::default()
        }
    }

    fn coordinator_with(source: Box<dyn FrameSource>) -> (SessionCoordinator, TempDir) {
        let dir = tempdir().unwrap();
        let registry = ControlRegistry::hq_camera();
        let presets = PresetTable::load(&registry, &[]).unwrap();
        let pipeline = CapturePipeline::new(dir.path(), VideoConfig::default()).unwrap();
        (
            SessionCoordinator::new(registry, presets, source, pipeline),
            dir,
        )
    }

    fn synthetic() -> (SessionCoordinator, TempDir) {
        coordinator_with(Box::new(SyntheticSource::new(&small_camera())))
    }

    fn updates(pairs: &[(&str, Value)]) -> BTreeMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    /// Shared views into a [`ScriptedSource`] after it moved into the coordinator.
    struct SourceHandles {
        configured: Arc<Mutex<Vec<ControlValues>>>,
        reject_configure: Arc<AtomicBool>,
    }

    /// Synthetic source that records every configuration it receives and
    /// misbehaves on request.
    struct ScriptedSource {
        inner: SyntheticSource,
        caps: SourceCapabilities,
        configured: Arc<Mutex<Vec<ControlValues>>>,
        reject_configure: Arc<AtomicBool>,
        video_frames_left: Option<u32>,
        preview_delay: Duration,
    }

    impl ScriptedSource {
        fn new(live_controls: bool) -> (Self, SourceHandles) {
            let inner = SyntheticSource::new(&small_camera());
            let mut caps = inner.capabilities().clone();
            caps.live_controls = live_controls;
            let handles = SourceHandles {
                configured: Arc::new(Mutex::new(Vec::new())),
                reject_configure: Arc::new(AtomicBool::new(false)),
            };
            let source = Self {
                inner,
                caps,
                configured: Arc::clone(&handles.configured),
                reject_configure: Arc::clone(&handles.reject_configure),
                video_frames_left: None,
                preview_delay: Duration::ZERO,
            };
            (source, handles)
        }

        /// The video stream dies after `frames` frames.
        fn video_fails_after(mut self, frames: u32) -> Self {
            self.video_frames_left = Some(frames);
            self
        }

        fn slow_preview(mut self, exposure: Duration) -> Self {
            self.preview_delay = exposure;
            self
        }
    }

    impl FrameSource for ScriptedSource {
        fn capabilities(&self) -> &SourceCapabilities {
            &self.caps
        }

        fn configure(&mut self, values: &ControlValues) -> Result<(), SourceError> {
            if self.reject_configure.load(Ordering::SeqCst) {
                return Err(SourceError::DeviceUnavailable("pipeline restart failed".into()));
            }
            self.configured.lock().push(values.clone());
            self.inner.configure(values)
        }

        fn next_frame(&mut self, request: FrameRequest) -> Result<Frame, SourceError> {
            match request {
                FrameRequest::Preview => std::thread::sleep(self.preview_delay),
                FrameRequest::Video { .. } => {
                    if let Some(left) = self.video_frames_left.as_mut() {
                        if *left == 0 {
                            return Err(SourceError::DeviceUnavailable("stream stalled".into()));
                        }
                        *left -= 1;
                    }
                }
                _ => {}
            }
            self.inner.next_frame(request)
        }
    }

    /// A camera that has been unplugged.
    struct DeadSource {
        caps: SourceCapabilities,
    }

    impl FrameSource for DeadSource {
        fn capabilities(&self) -> &SourceCapabilities {
            &self.caps
        }

        fn configure(&mut self, _values: &ControlValues) -> Result<(), SourceError> {
            Ok(())
        }

        fn next_frame(&mut self, _request: FrameRequest) -> Result<Frame, SourceError> {
            Err(SourceError::DeviceUnavailable("unplugged".into()))
        }
    }

    fn dead() -> (SessionCoordinator, TempDir) {
        let caps = SyntheticSource::new(&small_camera()).capabilities().clone();
        coordinator_with(Box::new(DeadSource { caps }))
    }

    fn visible_files(dir: &Path) -> Vec<String> {
        std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|name| !name.starts_with('.'))
            .collect()
    }

    #[test]
    fn test_starts_idle_with_defaults() {
        let (session, _dir) = synthetic();
        let snapshot = session.snapshot();
        assert_eq!(snapshot.phase, Phase::Idle);
        assert_eq!(snapshot.state.values, session.registry().defaults());
        assert!(snapshot.state.active_preset.is_none());
        assert!(snapshot.recording.is_none());
    }

    #[test]
    fn test_deep_sky_preset() {
        let (session, _dir) = synthetic();
        let state = session.apply_preset("deep_sky").unwrap();

        assert_eq!(state.values[EXPOSURE_TIME], ControlValue::Int(30_000_000));
        assert_eq!(state.values[ANALOGUE_GAIN], ControlValue::Float(8.0));
        assert_eq!(state.values[AE_ENABLE], ControlValue::Bool(false));
        assert_eq!(state.active_preset.as_deref(), Some("deep_sky"));
    }

    #[test]
    fn test_unknown_preset_rejected() {
        let (session, _dir) = synthetic();
        let err = session.apply_preset("comet").unwrap_err();
        assert!(matches!(err, SessionError::InvalidParameter(_)));
    }

    #[test]
    fn test_out_of_range_gain_leaves_state_unchanged() {
        let (session, _dir) = synthetic();
        let before = session.snapshot().state;

        let err = session
            .apply_settings(&updates(&[
                (EXPOSURE_TIME, json!(20_000)),
                (ANALOGUE_GAIN, json!(999)),
            ]))
            .unwrap_err();

        assert!(matches!(err, SessionError::OutOfRange(_)));
        assert_eq!(session.snapshot().state, before);
    }

    #[test]
    fn test_unknown_parameter_rejected() {
        let (session, _dir) = synthetic();
        let err = session
            .apply_settings(&updates(&[("Foo", json!(1))]))
            .unwrap_err();
        assert!(matches!(err, SessionError::InvalidParameter(_)));
    }

    #[test]
    fn test_manual_change_clears_preset() {
        let (session, _dir) = synthetic();
        session.apply_preset("planetary").unwrap();
        let state = session
            .apply_settings(&updates(&[(ANALOGUE_GAIN, json!(2.5))]))
            .unwrap();
        assert!(state.active_preset.is_none());
        assert_eq!(state.values[ANALOGUE_GAIN], ControlValue::Float(2.5));
    }

    #[test]
    fn test_empty_update_is_a_no_op() {
        let (session, _dir) = synthetic();
        session.apply_preset("planetary").unwrap();
        let state = session.apply_settings(&BTreeMap::new()).unwrap();
        assert_eq!(state.active_preset.as_deref(), Some("planetary"));
    }

    #[test]
    fn test_capture_writes_jpeg_and_raw() {
        let (session, dir) = synthetic();
        let record = session.capture(true).unwrap();

        assert_eq!(record.files.len(), 2);
        assert!(record.files.iter().all(|f| f.exists()));
        assert_eq!(record.files[0].extension().unwrap(), "jpg");
        assert_eq!(session.phase(), Phase::Idle);
        assert_eq!(visible_files(dir.path()).len(), 2);
        assert_eq!(session.stats().captures, 1);
    }

    #[test]
    fn test_capture_failure_rolls_back_to_idle() {
        let (session, dir) = dead();
        let err = session.capture(false).unwrap_err();

        assert!(matches!(err, SessionError::DeviceUnavailable(_)));
        assert_eq!(session.phase(), Phase::Idle);
        assert!(visible_files(dir.path()).is_empty());
        assert_eq!(session.stats().capture_failures, 1);
    }

    #[test]
    fn test_recording_start_failure_rolls_back() {
        let (session, dir) = dead();
        let err = session.start_recording(25).unwrap_err();

        assert!(matches!(err, SessionError::DeviceUnavailable(_)));
        assert_eq!(session.phase(), Phase::Idle);
        assert!(!session.snapshot().state.recording);
        assert!(std::fs::read_dir(dir.path()).unwrap().next().is_none());
    }

    #[test]
    fn test_recording_excludes_other_operations() {
        let (session, _dir) = synthetic();
        session.start_recording(25).unwrap();

        assert!(matches!(
            session.capture(false),
            Err(SessionError::Busy(_))
        ));
        assert!(matches!(
            session.start_recording(15),
            Err(SessionError::Busy(_))
        ));
        assert!(session.snapshot().state.recording);

        session.stop_recording().unwrap();
        assert_eq!(session.phase(), Phase::Idle);
    }

    #[test]
    fn test_stop_without_recording() {
        let (session, _dir) = synthetic();
        assert!(matches!(
            session.stop_recording(),
            Err(SessionError::NotRecording)
        ));
    }

    #[test]
    fn test_fps_out_of_range() {
        let (session, _dir) = synthetic();
        assert!(matches!(
            session.start_recording(2),
            Err(SessionError::OutOfRange(_))
        ));
        assert!(matches!(
            session.start_recording(61),
            Err(SessionError::OutOfRange(_))
        ));
        assert_eq!(session.phase(), Phase::Idle);
    }

    #[test]
    fn test_recording_produces_file() {
        let (session, dir) = synthetic();
        let started = session.start_recording(25).unwrap();
        assert!(session.is_recording_file(
            started.path.file_name().unwrap().to_str().unwrap()
        ));

        std::thread::sleep(Duration::from_millis(200));
        let summary = session.stop_recording().unwrap();

        assert_eq!(summary.path, started.path);
        assert!(summary.frames >= 1);
        assert!(summary.path.exists());
        assert_eq!(visible_files(dir.path()).len(), 1);

        let state = session.snapshot().state;
        assert!(!state.recording);
        assert!(state.recording_path.is_none());
        assert_eq!(session.stats().recordings, 1);
    }

    #[test]
    fn test_settings_deferred_while_recording() {
        let (source, handles) = ScriptedSource::new(false);
        let (session, _dir) = coordinator_with(Box::new(source));
        let configured = handles.configured;
        let initial = configured.lock().len();

        session.start_recording(10).unwrap();
        let state = session
            .apply_settings(&updates(&[(ANALOGUE_GAIN, json!(4.0))]))
            .unwrap();
        assert_eq!(state.values[ANALOGUE_GAIN], ControlValue::Float(4.0));
        assert_eq!(configured.lock().len(), initial);

        session.stop_recording().unwrap();
        let applied = configured.lock();
        assert_eq!(applied.len(), initial + 1);
        assert_eq!(
            applied.last().unwrap()[ANALOGUE_GAIN],
            ControlValue::Float(4.0)
        );
    }

    #[test]
    fn test_live_controls_apply_while_recording() {
        let (source, handles) = ScriptedSource::new(true);
        let (session, _dir) = coordinator_with(Box::new(source));
        let configured = handles.configured;
        let initial = configured.lock().len();

        session.start_recording(10).unwrap();
        session
            .apply_settings(&updates(&[(ANALOGUE_GAIN, json!(4.0))]))
            .unwrap();
        assert_eq!(configured.lock().len(), initial + 1);
        session.stop_recording().unwrap();
    }

    #[test]
    fn test_preview_is_live_when_idle() {
        let (session, _dir) = synthetic();
        let first = session.next_preview_frame();
        let second = session.next_preview_frame();

        assert!(first.live);
        assert_eq!(&first.jpeg[..2], &[0xFF, 0xD8]);
        assert!(second.sequence > first.sequence);
        assert_eq!(session.stats().preview_frames, 2);
    }

    #[test]
    fn test_preview_falls_back_to_placeholder() {
        let (session, _dir) = dead();
        let frame = session.next_preview_frame();
        assert!(!frame.live);
        assert_eq!(frame.sequence, 0);
        assert_eq!(&frame.jpeg[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn test_preview_during_recording_uses_recorded_frames() {
        let (session, _dir) = synthetic();
        session.start_recording(25).unwrap();
        let frame = session.next_preview_frame();
        session.stop_recording().unwrap();

        assert!(!frame.live);
        assert!(frame.sequence >= 1);
    }

    #[test]
    fn test_state_survives_restart() {
        let dir = tempdir().unwrap();
        let state_file = dir.path().join("state.toml");

        let (session, _captures) = synthetic();
        let session = session.with_state_store(StateStore::new(&state_file));
        session.apply_preset("deep_sky").unwrap();
        drop(session);

        let (restored, _captures) = synthetic();
        let restored = restored.with_state_store(StateStore::new(&state_file));
        let state = restored.snapshot().state;
        assert_eq!(state.active_preset.as_deref(), Some("deep_sky"));
        assert_eq!(state.values[EXPOSURE_TIME], ControlValue::Int(30_000_000));
    }

    #[test]
    fn test_shutdown_finalizes_recording() {
        let (session, dir) = synthetic();
        session.start_recording(25).unwrap();
        session.shutdown();

        assert_eq!(session.phase(), Phase::Idle);
        assert_eq!(visible_files(dir.path()).len(), 1);
    }

    #[test]
    fn test_source_failure_mid_recording_returns_to_idle() {
        let (source, _handles) = ScriptedSource::new(false);
        let (session, dir) = coordinator_with(Box::new(source.video_fails_after(3)));

        session.start_recording(30).unwrap();
        std::thread::sleep(Duration::from_millis(500));

        let snapshot = session.snapshot();
        assert_eq!(snapshot.phase, Phase::Idle);
        assert!(!snapshot.state.recording);
        assert!(snapshot.recording.is_none());
        let interrupted = snapshot.interrupted.unwrap();
        assert_eq!(interrupted.frames, 3);
        assert!(interrupted.path.as_ref().unwrap().exists());
        assert!(interrupted.reason.contains("stream stalled"));

        // The camera is free again.
        session.capture(false).unwrap();

        let err = session.stop_recording().unwrap_err();
        assert!(matches!(err, SessionError::DeviceUnavailable(_)));
        assert!(matches!(
            session.stop_recording(),
            Err(SessionError::NotRecording)
        ));
        assert!(session.snapshot().interrupted.is_none());
        assert_eq!(visible_files(dir.path()).len(), 2);
    }

    #[test]
    fn test_new_recording_clears_interruption() {
        let (source, _handles) = ScriptedSource::new(false);
        let (session, _dir) = coordinator_with(Box::new(source.video_fails_after(1)));

        session.start_recording(30).unwrap();
        std::thread::sleep(Duration::from_millis(300));
        assert_eq!(session.phase(), Phase::Idle);
        assert!(session.snapshot().interrupted.is_some());

        // The source keeps failing, so the new start fails but still clears the old report.
        assert!(session.start_recording(30).is_err());
        assert!(session.snapshot().interrupted.is_none());
    }

    #[test]
    fn test_capture_applies_settings_left_pending() {
        let (source, handles) = ScriptedSource::new(false);
        let (session, _dir) = coordinator_with(Box::new(source));

        session.start_recording(10).unwrap();
        session
            .apply_settings(&updates(&[(ANALOGUE_GAIN, json!(4.0))]))
            .unwrap();
        handles.reject_configure.store(true, Ordering::SeqCst);
        session.stop_recording().unwrap();
        assert_ne!(
            handles.configured.lock().last().unwrap()[ANALOGUE_GAIN],
            ControlValue::Float(4.0)
        );

        handles.reject_configure.store(false, Ordering::SeqCst);
        session.capture(false).unwrap();
        assert_eq!(
            handles.configured.lock().last().unwrap()[ANALOGUE_GAIN],
            ControlValue::Float(4.0)
        );
    }

    #[test]
    fn test_settings_do_not_wait_for_a_long_exposure() {
        let (source, handles) = ScriptedSource::new(false);
        let source = source.slow_preview(Duration::from_millis(1500));
        let (session, _dir) = coordinator_with(Box::new(source));
        let session = Arc::new(session);

        let exposing = {
            let session = Arc::clone(&session);
            std::thread::spawn(move || session.next_preview_frame())
        };
        std::thread::sleep(Duration::from_millis(200));

        let started = std::time::Instant::now();
        let state = session
            .apply_settings(&updates(&[(ANALOGUE_GAIN, json!(4.0))]))
            .unwrap();
        assert_eq!(state.values[ANALOGUE_GAIN], ControlValue::Float(4.0));
        assert_eq!(session.phase(), Phase::Idle);
        assert!(started.elapsed() < Duration::from_millis(1000));

        exposing.join().unwrap();
        session.next_preview_frame();
        assert_eq!(
            handles.configured.lock().last().unwrap()[ANALOGUE_GAIN],
            ControlValue::Float(4.0)
        );
    }
}
