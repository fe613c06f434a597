use crate::source::{Frame, FrameFormat};
use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::{GrayImage, Luma};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::warn;

const PLACEHOLDER_WIDTH: u32 = 320;
const PLACEHOLDER_HEIGHT: u32 = 180;

/// A JPEG ready to be shown in the live view.
#[derive(Debug, Clone)]
pub struct PreviewFrame {
    pub jpeg: Bytes,
    /// Increases by one for every frame that entered the cache.
    pub sequence: u64,
    /// False when the frame is a cached or placeholder image.
    pub live: bool,
}

/// Most recent displayable frame, shared with the recording worker.
#[derive(Debug, Default)]
pub(crate) struct FrameCache {
    latest: RwLock<Option<PreviewFrame>>,
    counter: AtomicU64,
}

impl FrameCache {
    /// Remembers `frame` if it is a JPEG and returns it as a live preview frame.
    pub fn store(&self, frame: &Frame) -> Option<PreviewFrame> {
        if frame.format() != FrameFormat::Jpeg {
            return None;
        }
        let preview = PreviewFrame {
            jpeg: frame.data().clone(),
            sequence: self.counter.fetch_add(1, Ordering::Relaxed) + 1,
            live: true,
        };
        *self.latest.write() = Some(preview.clone());
        Some(preview)
    }

    pub fn latest(&self) -> Option<PreviewFrame> {
        self.latest.read().clone()
    }
}

/// Dark frame served before any real frame exists.
pub(crate) fn no_signal_jpeg() -> Bytes {
    let image = GrayImage::from_fn(PLACEHOLDER_WIDTH, PLACEHOLDER_HEIGHT, |x, y| {
        let border = x < 2 || y < 2 || x >= PLACEHOLDER_WIDTH - 2 || y >= PLACEHOLDER_HEIGHT - 2;
        let diagonal = (x * PLACEHOLDER_HEIGHT).abs_diff(y * PLACEHOLDER_WIDTH) < PLACEHOLDER_WIDTH;
        Luma([if border || diagonal { 64 } else { 12 }])
    });

    let mut buf = Vec::new();
    match JpegEncoder::new_with_quality(&mut buf, 70).encode_image(&image) {
        Ok(()) => Bytes::from(buf),
        Err(e) => {
            warn!(error = %e, "Failed to encode placeholder frame");
            Bytes::new()
        }
    }
}
