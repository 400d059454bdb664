//! Camera device source (V4L2).
//!
//! A camera index `N` maps to `/dev/videoN`. RGB24 is requested; devices that
//! refuse it are read as YUYV and converted.

use anyhow::{anyhow, Context, Result};
use ouroboros::self_referencing;
use std::time::Instant;

use super::normalize::{normalize_to_rgb, PixelFormat};
use crate::frame::Frame;

const PREFERRED_WIDTH: u32 = 640;
const PREFERRED_HEIGHT: u32 = 480;
const BUFFER_COUNT: u32 = 4;

pub(super) struct V4l2Source {
    device_path: String,
    state: Option<DeviceState>,
    width: u32,
    height: u32,
    format: PixelFormat,
    frame_count: u64,
}

#[self_referencing]
struct DeviceState {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

impl V4l2Source {
    pub(super) fn open(index: u32) -> Result<Self> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let device_path = format!("/dev/video{}", index);
        let mut device = v4l::Device::new(index as usize)
            .with_context(|| format!("open camera {}", device_path))?;
        let mut format = device.format().context("read v4l2 format")?;
        format.width = PREFERRED_WIDTH;
        format.height = PREFERRED_HEIGHT;
        format.fourcc = v4l::FourCC::new(b"RGB3");

        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!(
                    "V4l2Source: failed to set RGB3 on {}: {}",
                    device_path,
                    err
                );
                device
                    .format()
                    .context("read v4l2 format after set failure")?
            }
        };
        let pixel_format = match &format.fourcc.repr {
            b"RGB3" => PixelFormat::Rgb24,
            b"YUYV" => PixelFormat::Yuyv,
            other => {
                return Err(anyhow!(
                    "camera {} uses unsupported pixel format {}",
                    device_path,
                    String::from_utf8_lossy(other)
                ))
            }
        };

        let state = DeviceStateTryBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, BUFFER_COUNT)
                    .map_err(|err| anyhow::Error::new(err).context("create v4l2 buffer stream"))
            },
        }
        .try_build()?;

        log::info!(
            "V4l2Source: connected to {} ({}x{} {:?})",
            device_path,
            format.width,
            format.height,
            pixel_format
        );
        Ok(Self {
            device_path,
            state: Some(state),
            width: format.width,
            height: format.height,
            format: pixel_format,
            frame_count: 0,
        })
    }

    pub(super) fn next_frame(&mut self) -> Result<Frame> {
        use v4l::io::traits::CaptureStream;

        let state = self
            .state
            .as_mut()
            .with_context(|| format!("camera {} is released", self.device_path))?;
        let raw = state
            .with_mut(|fields| fields.stream.next().map(|(buf, _meta)| buf.to_vec()))
            .map_err(|err| anyhow::Error::new(err).context("capture v4l2 frame"))?;
        let captured_at = Instant::now();
        let pixels = normalize_to_rgb(&raw, self.width, self.height, self.format)?;
        self.frame_count += 1;
        Ok(Frame::from_rgb(self.width, self.height, pixels)?.with_captured_at(captured_at))
    }

    /// Stop streaming and close the device node.
    pub(super) fn release(&mut self) {
        if self.state.take().is_some() {
            log::info!(
                "V4l2Source: closed {} after {} frames",
                self.device_path,
                self.frame_count
            );
        }
    }
}
