//! Still image source: one frame, then end of stream.

use anyhow::{Context, Result};
use std::path::Path;

use crate::frame::Frame;

pub(super) struct StillImageSource {
    frame: Option<Frame>,
}

impl StillImageSource {
    pub(super) fn open(path: &Path) -> Result<Self> {
        let image = image::open(path)
            .with_context(|| format!("decode image {}", path.display()))?
            .to_rgb8();
        log::info!(
            "StillImageSource: loaded {} ({}x{})",
            path.display(),
            image.width(),
            image.height()
        );
        Ok(Self {
            frame: Some(Frame::new(image)),
        })
    }

    pub(super) fn next_frame(&mut self) -> Option<Frame> {
        self.frame.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    #[test]
    fn yields_the_image_once() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("bag.png");
        RgbImage::from_pixel(6, 4, Rgb([1, 2, 3])).save(&path)?;

        let mut source = StillImageSource::open(&path)?;
        let frame = source.next_frame().context("first frame")?;
        assert_eq!((frame.width(), frame.height()), (6, 4));
        assert_eq!(&frame.pixels()[..3], &[1, 2, 3]);
        assert!(source.next_frame().is_none());
        Ok(())
    }

    #[test]
    fn undecodable_file_is_an_error() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("broken.jpg");
        std::fs::write(&path, b"not an image")?;
        assert!(StillImageSource::open(&path).is_err());
        Ok(())
    }
}
