//! Frame sources.
//!
//! A source locator picks the backend:
//! - digits: camera device index (feature: ingest-v4l2)
//! - `stub://name`: synthetic frames, for demos and tests
//! - still image extension (jpg, jpeg, png, bmp, tif, tiff): one-frame source
//! - anything else: local video file (feature: ingest-file-ffmpeg)
//!
//! Every source yields owned RGB `Frame`s stamped with their capture instant
//! and reports the end of the stream as `Ok(None)`.

#[cfg(feature = "ingest-file-ffmpeg")]
mod file_ffmpeg;
#[cfg(feature = "ingest-v4l2")]
mod normalize;
mod still;
mod synthetic;
#[cfg(feature = "ingest-v4l2")]
mod v4l2;

use anyhow::{anyhow, Result};
use std::collections::VecDeque;
use std::path::PathBuf;

use crate::frame::{DetectionMode, Frame};

#[cfg(feature = "ingest-file-ffmpeg")]
use file_ffmpeg::FfmpegFileSource;
use still::StillImageSource;
pub use synthetic::SyntheticConfig;
use synthetic::SyntheticSource;
#[cfg(feature = "ingest-v4l2")]
use v4l2::V4l2Source;

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "tif", "tiff"];

/// Parsed source locator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SourceLocator {
    Camera(u32),
    Synthetic(String),
    Image(PathBuf),
    Video(PathBuf),
}

impl SourceLocator {
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(anyhow!("empty source locator"));
        }
        if raw.bytes().all(|b| b.is_ascii_digit()) {
            let index = raw
                .parse::<u32>()
                .map_err(|_| anyhow!("camera index out of range: {}", raw))?;
            return Ok(Self::Camera(index));
        }
        if let Some(name) = raw.strip_prefix("stub://") {
            return Ok(Self::Synthetic(name.to_string()));
        }
        if raw.contains("://") {
            return Err(anyhow!(
                "network sources are not supported (local paths only): {}",
                raw
            ));
        }
        let path = PathBuf::from(raw);
        let is_image = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
            .unwrap_or(false);
        if is_image {
            Ok(Self::Image(path))
        } else {
            Ok(Self::Video(path))
        }
    }

    /// Rows persisted from a still image are tagged `image`; all others `video`.
    pub fn mode(&self) -> DetectionMode {
        match self {
            Self::Image(_) => DetectionMode::Image,
            _ => DetectionMode::Video,
        }
    }
}

impl std::fmt::Display for SourceLocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Camera(index) => write!(f, "camera {}", index),
            Self::Synthetic(name) => write!(f, "stub://{}", name),
            Self::Image(path) | Self::Video(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Frame source selected by locator.
pub struct FrameSource {
    backend: SourceBackend,
    description: String,
    mode: DetectionMode,
    frames_captured: u64,
    released: bool,
}

enum SourceBackend {
    Still(StillImageSource),
    Synthetic(SyntheticSource),
    Scripted(VecDeque<Frame>),
    #[cfg(feature = "ingest-file-ffmpeg")]
    Ffmpeg(FfmpegFileSource),
    #[cfg(feature = "ingest-v4l2")]
    Device(V4l2Source),
}

impl FrameSource {
    /// Parse `locator` and open the backend it names.
    pub fn open(locator: &str) -> Result<Self> {
        let locator = SourceLocator::parse(locator)?;
        Self::open_locator(&locator)
    }

    pub fn open_locator(locator: &SourceLocator) -> Result<Self> {
        let backend = match locator {
            SourceLocator::Image(path) => SourceBackend::Still(StillImageSource::open(path)?),
            SourceLocator::Synthetic(name) => {
                SourceBackend::Synthetic(SyntheticSource::new(SyntheticConfig::parse(name)?))
            }
            #[cfg(feature = "ingest-file-ffmpeg")]
            SourceLocator::Video(path) => SourceBackend::Ffmpeg(FfmpegFileSource::open(path)?),
            #[cfg(not(feature = "ingest-file-ffmpeg"))]
            SourceLocator::Video(_) => {
                return Err(anyhow!(
                    "video file ingestion requires the ingest-file-ffmpeg feature"
                ))
            }
            #[cfg(feature = "ingest-v4l2")]
            SourceLocator::Camera(index) => SourceBackend::Device(V4l2Source::open(*index)?),
            #[cfg(not(feature = "ingest-v4l2"))]
            SourceLocator::Camera(_) => {
                return Err(anyhow!(
                    "camera ingestion requires the ingest-v4l2 feature"
                ))
            }
        };
        log::info!("FrameSource: opened {}", locator);
        Ok(Self {
            backend,
            description: locator.to_string(),
            mode: locator.mode(),
            frames_captured: 0,
            released: false,
        })
    }

    /// In-memory source that yields `frames` in order, then ends.
    pub fn scripted(frames: Vec<Frame>) -> Self {
        Self {
            backend: SourceBackend::Scripted(frames.into()),
            description: "scripted".to_string(),
            mode: DetectionMode::Video,
            frames_captured: 0,
            released: false,
        }
    }

    /// Next frame, or `None` at end of stream or after `release`.
    pub fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.released {
            return Ok(None);
        }
        let frame = match &mut self.backend {
            SourceBackend::Still(source) => source.next_frame(),
            SourceBackend::Synthetic(source) => source.next_frame(),
            SourceBackend::Scripted(frames) => frames.pop_front(),
            #[cfg(feature = "ingest-file-ffmpeg")]
            SourceBackend::Ffmpeg(source) => source.next_frame()?,
            #[cfg(feature = "ingest-v4l2")]
            SourceBackend::Device(source) => Some(source.next_frame()?),
        };
        if frame.is_some() {
            self.frames_captured += 1;
        }
        Ok(frame)
    }

    /// Close the underlying device or file. Idempotent.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        match &mut self.backend {
            SourceBackend::Scripted(frames) => frames.clear(),
            #[cfg(feature = "ingest-v4l2")]
            SourceBackend::Device(source) => source.release(),
            _ => {}
        }
        log::info!(
            "FrameSource: released {} after {} frames",
            self.description,
            self.frames_captured
        );
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    pub fn mode(&self) -> DetectionMode {
        self.mode
    }

    pub fn describe(&self) -> &str {
        &self.description
    }

    pub fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frames_captured,
            source: self.description.clone(),
        }
    }
}

impl Drop for FrameSource {
    fn drop(&mut self) {
        self.release();
    }
}

/// Statistics for a frame source.
#[derive(Clone, Debug)]
pub struct SourceStats {
    pub frames_captured: u64,
    pub source: String,
}
