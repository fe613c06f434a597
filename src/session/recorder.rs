//! Background worker that feeds video frames into the encoder.

use super::cache::FrameCache;
use super::error::SessionError;
use super::state::RecordingSession;
use crate::controls::ControlValues;
use crate::pipeline::VideoHandle;
use crate::source::{Frame, FrameRequest, FrameSource, SourceError};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Control values the camera should hold, tagged with their revision.
///
/// Whoever holds the device lock next brings the source up to date.
#[derive(Debug, Clone, Default)]
pub(crate) struct Target {
    pub values: ControlValues,
    pub revision: u64,
}

pub(crate) type SharedTarget = Arc<Mutex<Target>>;

/// The frame source together with the settings revision it was last configured with.
pub(crate) struct Device {
    pub source: Box<dyn FrameSource>,
    pub revision: u64,
}

impl Device {
    pub fn new(source: Box<dyn FrameSource>) -> Self {
        Self {
            source,
            revision: 0,
        }
    }

    /// Configures the source unless it already holds `revision` or newer.
    pub fn configure(&mut self, values: &ControlValues, revision: u64) -> Result<(), SourceError> {
        if self.revision >= revision {
            return Ok(());
        }
        self.source.configure(values)?;
        self.revision = revision;
        Ok(())
    }

    /// Applies `target` if it is newer than what the source holds.
    pub fn sync(&mut self, target: &Mutex<Target>) -> Result<(), SourceError> {
        let pending = {
            let target = target.lock();
            (target.revision > self.revision).then(|| target.clone())
        };
        match pending {
            Some(target) => self.configure(&target.values, target.revision),
            None => Ok(()),
        }
    }
}

pub(crate) type SharedDevice = Arc<Mutex<Device>>;

/// What the worker hands back once it exits.
pub(crate) struct WorkerOutcome {
    pub video: VideoHandle,
    /// Why acquisition stopped early, if it did.
    pub failure: Option<SessionError>,
}

/// A running recording.
pub(crate) struct Recorder {
    session: RecordingSession,
    started: Instant,
    stop: Arc<AtomicBool>,
    frames: Arc<AtomicU64>,
    worker: JoinHandle<WorkerOutcome>,
}

impl Recorder {
    /// Spawns the worker for an already opened video.
    ///
    /// With `live_controls` the worker applies settings changes between
    /// frames; otherwise they wait until the recording ends.
    pub fn start(
        session: RecordingSession,
        device: SharedDevice,
        target: Option<SharedTarget>,
        cache: Arc<FrameCache>,
        video: VideoHandle,
    ) -> std::io::Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let frames = Arc::new(AtomicU64::new(video.frames()));
        let fps = session.fps;

        let worker = {
            let stop = Arc::clone(&stop);
            let frames = Arc::clone(&frames);
            let feed = Feed {
                device,
                target,
                cache,
                fps,
            };
            std::thread::Builder::new()
                .name("recorder".into())
                .spawn(move || record_loop(feed, video, &stop, &frames))?
        };

        info!(path = %session.path.display(), fps, "Recording started");
        Ok(Self {
            session,
            started: Instant::now(),
            stop,
            frames,
            worker,
        })
    }

    pub fn session(&self) -> &RecordingSession {
        &self.session
    }

    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Whether the worker exited without being asked to.
    pub fn has_ended(&self) -> bool {
        self.worker.is_finished() && !self.stop.load(Ordering::Acquire)
    }

    /// Signals the worker and waits for it to hand back the video.
    ///
    /// Returns `None` if the worker panicked.
    pub fn stop(self) -> Option<WorkerOutcome> {
        self.stop.store(true, Ordering::Release);
        match self.worker.join() {
            Ok(outcome) => Some(outcome),
            Err(_) => {
                error!(path = %self.session.path.display(), "Recording worker panicked");
                None
            }
        }
    }
}

struct Feed {
    device: SharedDevice,
    target: Option<SharedTarget>,
    cache: Arc<FrameCache>,
    fps: u32,
}

impl Feed {
    fn next_frame(&self) -> Result<Frame, SourceError> {
        let mut device = self.device.lock();
        if let Some(target) = &self.target {
            if let Err(e) = device.sync(target) {
                warn!(error = %e, "Failed to apply settings while recording");
            }
        }
        device.source.next_frame(FrameRequest::Video { fps: self.fps })
    }
}

fn record_loop(
    feed: Feed,
    mut video: VideoHandle,
    stop: &AtomicBool,
    frames: &AtomicU64,
) -> WorkerOutcome {
    let fps = feed.fps;
    let interval = Duration::from_secs_f64(1.0 / f64::from(fps.max(1)));
    let mut next_tick = Instant::now() + interval;
    let mut failure: Option<SessionError> = None;

    while !stop.load(Ordering::Acquire) {
        let frame = match feed.next_frame() {
            Ok(frame) => frame,
            Err(e) => {
                error!(error = %e, "Frame source failed during recording");
                failure = Some(e.into());
                break;
            }
        };

        if let Err(e) = video.push_frame(&frame) {
            error!(error = %e, "Failed to write video frame");
            failure = Some(e.into());
            break;
        }
        frames.store(video.frames(), Ordering::Relaxed);
        feed.cache.store(&frame);

        let now = Instant::now();
        if next_tick > now {
            std::thread::sleep(next_tick - now);
            next_tick += interval;
        } else {
            // Behind schedule, do not try to catch up.
            next_tick = now + interval;
        }
    }

    debug!(frames = video.frames(), "Recording worker exiting");
    WorkerOutcome { video, failure }
}
