//! Decoded frames.
//!
//! - `Frame`: owned RGB8 image plus the monotonic instant it was captured.
//! - `DetectionMode`: whether a session analyses a still image or a stream.
//!
//! Frames are produced by the ingestion layer, lent to detectors by shared
//! reference, and copied (never mutated in place) by the annotator.

use anyhow::{anyhow, Result};
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;

/// A decoded RGB frame (height × width × 3).
#[derive(Clone)]
pub struct Frame {
    image: RgbImage,
    captured_at: Instant,
}

impl Frame {
    /// Wrap a decoded image, stamping it with the current instant.
    pub fn new(image: RgbImage) -> Self {
        Self {
            image,
            captured_at: Instant::now(),
        }
    }

    /// Build a frame from packed RGB24 bytes.
    pub fn from_rgb(width: u32, height: u32, pixels: Vec<u8>) -> Result<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(3))
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        if pixels.len() != expected {
            return Err(anyhow!(
                "RGB frame length mismatch: expected {}, got {}",
                expected,
                pixels.len()
            ));
        }
        let image = RgbImage::from_raw(width, height, pixels)
            .ok_or_else(|| anyhow!("RGB buffer does not fit {}x{}", width, height))?;
        Ok(Self::new(image))
    }

    /// Solid-colour frame. Mostly useful for tests and synthetic sources.
    pub fn filled(width: u32, height: u32, rgb: [u8; 3]) -> Self {
        Self::new(RgbImage::from_pixel(width, height, image::Rgb(rgb)))
    }

    /// Override the capture instant (replayed or scripted streams).
    pub fn with_captured_at(mut self, captured_at: Instant) -> Self {
        self.captured_at = captured_at;
        self
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn captured_at(&self) -> Instant {
        self.captured_at
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    /// Packed RGB24 pixel bytes, row-major.
    pub fn pixels(&self) -> &[u8] {
        self.image.as_raw()
    }

    pub(crate) fn image_mut(&mut self) -> &mut RgbImage {
        &mut self.image
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width())
            .field("height", &self.height())
            .finish_non_exhaustive()
    }
}

/// Kind of source a session analyses. Persisted with every event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectionMode {
    Image,
    Video,
}

impl DetectionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Video => "video",
        }
    }

    /// File name prefix for persisted snapshots.
    pub fn file_prefix(&self) -> &'static str {
        match self {
            Self::Image => "detect",
            Self::Video => "video_frame",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "image" => Some(Self::Image),
            "video" => Some(Self::Video),
            _ => None,
        }
    }
}

impl fmt::Display for DetectionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_rgb_validates_length() {
        assert!(Frame::from_rgb(2, 2, vec![0u8; 12]).is_ok());
        assert!(Frame::from_rgb(2, 2, vec![0u8; 11]).is_err());
    }

    #[test]
    fn clone_is_independent() {
        let frame = Frame::filled(4, 3, [10, 20, 30]);
        let mut copy = frame.clone();
        copy.image_mut().put_pixel(0, 0, image::Rgb([255, 255, 255]));
        assert_eq!(frame.image().get_pixel(0, 0).0, [10, 20, 30]);
        assert_eq!(copy.width(), 4);
        assert_eq!(copy.height(), 3);
    }

    #[test]
    fn mode_round_trips_through_str() {
        for mode in [DetectionMode::Image, DetectionMode::Video] {
            assert_eq!(DetectionMode::parse(mode.as_str()), Some(mode));
        }
        assert_eq!(DetectionMode::parse("audio"), None);
    }
}
