//! Live view fan-out.
//!
//! A single producer thread pulls frames from the [`SessionCoordinator`]
//! and publishes them to every connected viewer over a broadcast channel.
//! Viewers that fall behind skip frames instead of slowing the others
//! down, and no frames are pulled at all while nobody is watching.
//!
//! The stream is served as `multipart/x-mixed-replace`, which browsers
//! render natively from a plain `<img src="/stream">`.

use crate::session::{PreviewFrame, SessionCoordinator};
use axum::{
    body::Body,
    http::header,
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tracing::{debug, info};

const BOUNDARY: &str = "astrocam_frame";
const STREAM_CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=astrocam_frame";

/// How long the producer waits between checks while nobody is watching.
const IDLE_POLL: Duration = Duration::from_millis(100);

/// Unchanged frames are re-sent this often so new viewers see something.
const KEEPALIVE: Duration = Duration::from_secs(1);

/// Fans preview frames out to any number of viewers.
///
/// Closing the broadcaster ends every open stream, which lets the HTTP
/// server drain its connections on shutdown.
pub struct PreviewBroadcaster {
    tx: RwLock<Option<broadcast::Sender<PreviewFrame>>>,
    published: AtomicU64,
}

impl PreviewBroadcaster {
    /// `capacity` frames are buffered per viewer before it starts skipping.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx: RwLock::new(Some(tx)),
            published: AtomicU64::new(0),
        }
    }

    /// Sends `frame` to every viewer and returns how many received it.
    pub fn publish(&self, frame: PreviewFrame) -> usize {
        let tx = self.tx.read();
        let Some(tx) = tx.as_ref() else {
            return 0;
        };
        self.published.fetch_add(1, Ordering::Relaxed);
        tx.send(frame).unwrap_or(0)
    }

    /// Subscribes a new viewer. After [`close`](Self::close) the stream is empty.
    pub fn subscribe(&self) -> PreviewSubscriber {
        let rx = match self.tx.read().as_ref() {
            Some(tx) => tx.subscribe(),
            None => broadcast::channel(1).1,
        };
        PreviewSubscriber { rx }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx
            .read()
            .as_ref()
            .map_or(0, broadcast::Sender::receiver_count)
    }

    /// Ends all streams and refuses further frames.
    pub fn close(&self) {
        if self.tx.write().take().is_some() {
            info!("Live view closed");
        }
    }

    /// Frames published since startup.
    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }
}

impl Default for PreviewBroadcaster {
    fn default() -> Self {
        Self::new(4)
    }
}

/// One viewer's end of the broadcast.
pub struct PreviewSubscriber {
    rx: broadcast::Receiver<PreviewFrame>,
}

impl PreviewSubscriber {
    /// Streams frames as an MJPEG response, starting with `initial` if given.
    pub fn into_response(self, initial: Option<PreviewFrame>) -> Response {
        let live = BroadcastStream::new(self.rx).filter_map(|result| match result {
            Ok(frame) => Some(frame),
            // Lagged: the viewer simply skips ahead.
            Err(_) => None,
        });
        let stream = tokio_stream::iter(initial)
            .chain(live)
            .map(|frame| Ok::<_, std::convert::Infallible>(multipart_chunk(&frame.jpeg)));

        (
            [
                (header::CONTENT_TYPE, STREAM_CONTENT_TYPE),
                (header::CACHE_CONTROL, "no-cache, no-store, must-revalidate"),
                (header::PRAGMA, "no-cache"),
            ],
            Body::from_stream(stream),
        )
            .into_response()
    }
}

fn multipart_chunk(jpeg: &Bytes) -> Bytes {
    let head = format!(
        "--{BOUNDARY}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
        jpeg.len()
    );
    let mut chunk = Vec::with_capacity(head.len() + jpeg.len() + 2);
    chunk.extend_from_slice(head.as_bytes());
    chunk.extend_from_slice(jpeg);
    chunk.extend_from_slice(b"\r\n");
    Bytes::from(chunk)
}

/// A single JPEG response.
pub fn jpeg_response(jpeg: Bytes) -> Response {
    (
        [
            (header::CONTENT_TYPE, "image/jpeg"),
            (header::CACHE_CONTROL, "no-cache, no-store, must-revalidate"),
        ],
        jpeg,
    )
        .into_response()
}

/// Background thread feeding the broadcaster.
pub struct PreviewProducer {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl PreviewProducer {
    /// Starts publishing at up to `fps` frames per second.
    pub fn spawn(
        session: Arc<SessionCoordinator>,
        broadcaster: Arc<PreviewBroadcaster>,
        fps: u32,
    ) -> std::io::Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let handle = {
            let stop = Arc::clone(&stop);
            std::thread::Builder::new()
                .name("preview".into())
                .spawn(move || produce(&session, &broadcaster, fps, &stop))?
        };
        info!(fps, "Preview producer started");
        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    /// Stops the thread and waits for it to exit.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for PreviewProducer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn produce(
    session: &SessionCoordinator,
    broadcaster: &PreviewBroadcaster,
    fps: u32,
    stop: &AtomicBool,
) {
    let interval = Duration::from_secs_f64(1.0 / f64::from(fps.max(1)));
    let mut last_sequence = None;
    let mut last_sent = Instant::now();

    while !stop.load(Ordering::Acquire) {
        if broadcaster.subscriber_count() == 0 {
            std::thread::sleep(IDLE_POLL);
            continue;
        }

        let started = Instant::now();
        let frame = session.next_preview_frame();
        if last_sequence != Some(frame.sequence) || last_sent.elapsed() >= KEEPALIVE {
            last_sequence = Some(frame.sequence);
            last_sent = Instant::now();
            let viewers = broadcaster.publish(frame);
            if viewers == 0 {
                debug!("Last viewer disconnected");
            }
        }

        if let Some(rest) = interval.checked_sub(started.elapsed()) {
            std::thread::sleep(rest);
        }
    }
    debug!("Preview producer exiting");
}
