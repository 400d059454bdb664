//! Synthetic source (`stub://`) for demos and tests.
//!
//! `stub://<name>[?frames=N][&fps=N][&size=WxH]` produces a moving gradient
//! pattern. Without `frames` the stream never ends, like a camera.

use anyhow::{anyhow, Result};
use image::RgbImage;
use std::time::{Duration, Instant};

use crate::frame::Frame;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyntheticConfig {
    pub name: String,
    /// Stop after this many frames.
    pub frames: Option<u64>,
    /// Pace output to this rate; 0 means as fast as possible.
    pub target_fps: u32,
    pub width: u32,
    pub height: u32,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            name: "demo".to_string(),
            frames: None,
            target_fps: 10,
            width: 640,
            height: 480,
        }
    }
}

impl SyntheticConfig {
    /// Parse the part of a locator after `stub://`.
    pub fn parse(spec: &str) -> Result<Self> {
        let (name, query) = match spec.split_once('?') {
            Some((name, query)) => (name, Some(query)),
            None => (spec, None),
        };
        let mut config = Self {
            name: name.to_string(),
            ..Self::default()
        };
        for pair in query.into_iter().flat_map(|q| q.split('&')) {
            if pair.is_empty() {
                continue;
            }
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| anyhow!("stub source option without value: {}", pair))?;
            match key {
                "frames" => {
                    config.frames = Some(
                        value
                            .parse()
                            .map_err(|_| anyhow!("stub source frames must be an integer"))?,
                    )
                }
                "fps" => {
                    config.target_fps = value
                        .parse()
                        .map_err(|_| anyhow!("stub source fps must be an integer"))?
                }
                "size" => {
                    let (w, h) = value
                        .split_once('x')
                        .ok_or_else(|| anyhow!("stub source size must be WxH"))?;
                    config.width = w.parse().map_err(|_| anyhow!("bad stub width"))?;
                    config.height = h.parse().map_err(|_| anyhow!("bad stub height"))?;
                    if config.width == 0 || config.height == 0 {
                        return Err(anyhow!("stub source size must be non-zero"));
                    }
                }
                other => return Err(anyhow!("unknown stub source option '{}'", other)),
            }
        }
        Ok(config)
    }
}

pub(super) struct SyntheticSource {
    config: SyntheticConfig,
    frame_count: u64,
    scene_state: u8,
    last_frame_at: Option<Instant>,
}

impl SyntheticSource {
    pub(super) fn new(config: SyntheticConfig) -> Self {
        log::info!(
            "SyntheticSource: stub://{} ({}x{} @ {} fps)",
            config.name,
            config.width,
            config.height,
            config.target_fps
        );
        Self {
            config,
            frame_count: 0,
            scene_state: 0,
            last_frame_at: None,
        }
    }

    pub(super) fn next_frame(&mut self) -> Option<Frame> {
        if let Some(limit) = self.config.frames {
            if self.frame_count >= limit {
                return None;
            }
        }
        self.pace();
        self.frame_count += 1;
        if self.frame_count % 50 == 0 {
            self.scene_state = self.scene_state.wrapping_add(1);
        }
        let offset = self.frame_count + self.scene_state as u64;
        let image = RgbImage::from_fn(self.config.width, self.config.height, |x, y| {
            let v = ((x as u64 + y as u64 + offset) % 256) as u8;
            image::Rgb([v, v.wrapping_add(85), v.wrapping_add(170)])
        });
        let now = Instant::now();
        self.last_frame_at = Some(now);
        Some(Frame::new(image).with_captured_at(now))
    }

    fn pace(&self) {
        if self.config.target_fps == 0 {
            return;
        }
        let Some(last) = self.last_frame_at else {
            return;
        };
        let period = Duration::from_millis(1000 / self.config.target_fps as u64);
        let elapsed = last.elapsed();
        if elapsed < period {
            std::thread::sleep(period - elapsed);
        }
    }
}
