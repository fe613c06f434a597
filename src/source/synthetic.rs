//! Synthetic star-field source for running without camera hardware.
//!
//! Frames look like a dark sky: a fixed field of stars, faint sensor
//! noise that changes every frame, and a pulsing star in the centre so
//! the live view visibly updates. Control values are recorded but do not
//! influence the image.

use super::{
    Frame, FrameFormat, FrameRequest, FrameSource, SourceCapabilities, SourceError, SourceKind,
};
use crate::config::{CameraConfig, Resolution};
use crate::controls::ControlValues;
use image::codecs::jpeg::JpegEncoder;
use image::{Rgb, RgbImage};
use rand_chacha::ChaCha8Rng;
use rand_core::{RngCore, SeedableRng};

const STAR_SEED: u64 = 42;
const STAR_COUNT: usize = 300;
const SKY: [u8; 3] = [2, 2, 12];
/// Frame rate used to animate the centre star.
const ANIMATION_FPS: f64 = 25.0;

/// A star placed in normalized coordinates so every resolution shows the same field.
#[derive(Debug, Clone, Copy)]
struct Star {
    x: f64,
    y: f64,
    brightness: u8,
    radius: u32,
}

/// Deterministic star-field generator implementing [`FrameSource`].
pub struct SyntheticSource {
    capabilities: SourceCapabilities,
    stars: Vec<Star>,
    jpeg_quality: u8,
    sequence: u64,
    controls: Option<ControlValues>,
    configure_count: u64,
}

impl SyntheticSource {
    pub fn new(config: &CameraConfig) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(STAR_SEED);
        let stars = (0..STAR_COUNT)
            .map(|_| Star {
                x: unit(&mut rng),
                y: unit(&mut rng),
                brightness: 100 + (rng.next_u32() % 156) as u8,
                radius: [1, 1, 1, 2, 2, 3][(rng.next_u32() % 6) as usize],
            })
            .collect();

        tracing::info!("Camera started (demo mode)");

        Self {
            capabilities: SourceCapabilities {
                name: "Synthetic star field".to_string(),
                kind: SourceKind::Synthetic,
                preview_size: config.preview_size,
                still_size: config.still_size,
                video_size: config.video_size,
                live_controls: true,
            },
            stars,
            jpeg_quality: config.jpeg_quality,
            sequence: 0,
            controls: None,
            configure_count: 0,
        }
    }

    /// Control values from the most recent [`FrameSource::configure`] call.
    pub fn controls(&self) -> Option<&ControlValues> {
        self.controls.as_ref()
    }

    /// Number of successful `configure` calls.
    pub fn configure_count(&self) -> u64 {
        self.configure_count
    }

    /// Renders the star field for a given frame number.
    pub fn render(&self, size: Resolution, sequence: u64) -> RgbImage {
        let (width, height) = (size.width, size.height);
        let mut img = RgbImage::from_pixel(width, height, Rgb(SKY));

        // Sensor noise: cheap hash so large stills stay fast to render.
        for (i, pixel) in img.pixels_mut().enumerate() {
            let n = (noise_hash(i as u64, sequence) % 6) as u8;
            pixel.0 = [SKY[0] + n, SKY[1] + n, SKY[2] + n];
        }

        let scale = (width as f64 / 1280.0).max(0.25);
        for star in &self.stars {
            let cx = (star.x * (width - 1) as f64) as i64;
            let cy = (star.y * (height - 1) as f64) as i64;
            let r = ((star.radius as f64) * scale).round().max(1.0) as i64;
            let b = star.brightness;
            draw_disc(&mut img, cx, cy, r, Rgb([b, b, b]));
        }

        let t = sequence as f64 / ANIMATION_FPS;
        let glow = 128.0 + 127.0 * (t * 2.0).sin();
        let (cx, cy) = ((width / 2) as i64, (height / 2) as i64);
        let mut r = 12;
        while r > 0 {
            let alpha = (glow - (r * 15) as f64).clamp(0.0, 255.0) as u8;
            let scaled = ((r as f64) * scale).round().max(1.0) as i64;
            draw_disc(&mut img, cx, cy, scaled, Rgb([alpha, alpha / 2, 0]));
            r -= 3;
        }

        img
    }

    fn encode_jpeg(&self, img: &RgbImage) -> Result<Vec<u8>, SourceError> {
        let mut buf = Vec::new();
        JpegEncoder::new_with_quality(&mut buf, self.jpeg_quality)
            .encode_image(img)
            .map_err(|e| SourceError::Encode(e.to_string()))?;
        Ok(buf)
    }

    fn size_for(&self, request: FrameRequest) -> Resolution {
        match request {
            FrameRequest::Preview => self.capabilities.preview_size,
            FrameRequest::Still { .. } | FrameRequest::Raw => self.capabilities.still_size,
            FrameRequest::Video { .. } => self.capabilities.video_size,
        }
    }
}

impl FrameSource for SyntheticSource {
    fn capabilities(&self) -> &SourceCapabilities {
        &self.capabilities
    }

    fn configure(&mut self, values: &ControlValues) -> Result<(), SourceError> {
        self.controls = Some(values.clone());
        self.configure_count += 1;
        tracing::debug!(count = self.configure_count, "Synthetic source configured");
        Ok(())
    }

    fn next_frame(&mut self, request: FrameRequest) -> Result<Frame, SourceError> {
        self.sequence += 1;
        let size = self.size_for(request);
        let img = self.render(size, self.sequence);

        let (data, format) = match request {
            FrameRequest::Raw => {
                let raw: Vec<u8> = img
                    .pixels()
                    .flat_map(|p| {
                        let luma = (p.0[0] as u16 + p.0[1] as u16 + p.0[2] as u16) / 3;
                        (luma * 257).to_le_bytes()
                    })
                    .collect();
                (raw, FrameFormat::Raw16)
            }
            _ => (self.encode_jpeg(&img)?, FrameFormat::Jpeg),
        };

        Ok(Frame::new(data, format, size.width, size.height, self.sequence))
    }

    fn close(&mut self) {
        tracing::info!("Synthetic source closed");
    }
}

fn unit(rng: &mut ChaCha8Rng) -> f64 {
    rng.next_u32() as f64 / u32::MAX as f64
}

fn noise_hash(index: u64, sequence: u64) -> u64 {
    let mut h = index.wrapping_mul(0x9E37_79B9_7F4A_7C15) ^ sequence.wrapping_mul(0xC2B2_AE3D_27D4_EB4F);
    h ^= h >> 31;
    h.wrapping_mul(0xBF58_476D_1CE4_E5B9) >> 33
}

fn draw_disc(img: &mut RgbImage, cx: i64, cy: i64, r: i64, color: Rgb<u8>) {
    let (w, h) = (img.width() as i64, img.height() as i64);
    for y in (cy - r).max(0)..=(cy + r).min(h - 1) {
        for x in (cx - r).max(0)..=(cx + r).min(w - 1) {
            let (dx, dy) = (x - cx, y - cy);
            if dx * dx + dy * dy <= r * r {
                img.put_pixel(x as u32, y as u32, color);
            }
        }
    }
}
