//! Encoded frame type produced by every frame source.

use bytes::Bytes;
use chrono::{DateTime, Local};

/// Encoding of a frame's payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameFormat {
    /// Baseline JPEG.
    Jpeg,
    /// Adobe DNG as written by the sensor pipeline.
    Dng,
    /// Little-endian 16-bit luminance samples, row-major.
    Raw16,
}

impl FrameFormat {
    /// File extension used when the frame is persisted.
    pub fn extension(self) -> &'static str {
        match self {
            FrameFormat::Jpeg => "jpg",
            FrameFormat::Dng => "dng",
            FrameFormat::Raw16 => "raw",
        }
    }
}

/// A single frame from a [`FrameSource`](super::FrameSource).
///
/// The payload is reference counted so the same frame can be cached,
/// broadcast to viewers and fed to an encoder without copying.
#[derive(Clone)]
pub struct Frame {
    data: Bytes,
    format: FrameFormat,
    width: u32,
    height: u32,
    /// Wall-clock acquisition time.
    timestamp: DateTime<Local>,
    /// Monotonic per-source sequence number.
    sequence: u64,
}

impl Frame {
    /// Creates a new frame stamped with the current time.
    pub fn new(
        data: impl Into<Bytes>,
        format: FrameFormat,
        width: u32,
        height: u32,
        sequence: u64,
    ) -> Self {
        Self {
            data: data.into(),
            format,
            width,
            height,
            timestamp: Local::now(),
            sequence,
        }
    }

    /// Returns the encoded payload.
    #[inline]
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    #[inline]
    pub fn format(&self) -> FrameFormat {
        self.format
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    #[inline]
    pub fn timestamp(&self) -> DateTime<Local> {
        self.timestamp
    }

    #[inline]
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Checks the payload's magic bytes against the declared format.
    pub fn is_valid(&self) -> bool {
        match self.format {
            FrameFormat::Jpeg => self.data.starts_with(&[0xFF, 0xD8]),
            FrameFormat::Dng => {
                self.data.starts_with(b"II*\0") || self.data.starts_with(b"MM\0*")
            }
            FrameFormat::Raw16 => {
                self.data.len() == (self.width as usize) * (self.height as usize) * 2
            }
        }
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("format", &self.format)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("sequence", &self.sequence)
            .field("bytes", &self.data.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_creation() {
        let frame = Frame::new(vec![0xFF, 0xD8, 0x00], FrameFormat::Jpeg, 640, 480, 1);

        assert_eq!(frame.width(), 640);
        assert_eq!(frame.height(), 480);
        assert_eq!(frame.sequence(), 1);
        assert!(frame.is_valid());
    }

    #[test]
    fn test_raw_frame_invalid_size() {
        let frame = Frame::new(vec![0u8; 100], FrameFormat::Raw16, 640, 480, 1);
        assert!(!frame.is_valid());
    }

    #[test]
    fn test_extensions() {
        assert_eq!(FrameFormat::Jpeg.extension(), "jpg");
        assert_eq!(FrameFormat::Dng.extension(), "dng");
        assert_eq!(FrameFormat::Raw16.extension(), "raw");
    }
}
