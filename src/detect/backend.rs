use anyhow::Result;

use crate::detect::result::Detection;
use crate::frame::Frame;

/// Object detection model capability.
///
/// Backends are owned by exactly one session thread and are never called
/// concurrently, so `detect` takes `&mut self` and implementations may keep
/// scratch buffers between calls.
///
/// Implementations must treat the frame as read-only and must not retain
/// it past the call.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on a frame.
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
