use crate::detect::backend::DetectorBackend;
use crate::detect::result::Detection;
use crate::error::StreamError;
use crate::frame::Frame;

/// Failure-absorbing front of a detector backend.
///
/// A backend error degrades to "no detections" for that frame and is
/// logged; it never reaches the processing loop. Detections whose box does
/// not fit inside the frame are dropped.
pub struct Detector {
    backend: Box<dyn DetectorBackend>,
    frames_seen: u64,
    failures: u64,
}

impl Detector {
    pub fn new(backend: Box<dyn DetectorBackend>) -> Self {
        Self {
            backend,
            frames_seen: 0,
            failures: 0,
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Warm the backend up. Failures are logged, not returned.
    pub fn warm_up(&mut self) {
        if let Err(e) = self.backend.warm_up() {
            log::warn!("detector {}: warm-up failed: {:#}", self.backend.name(), e);
        }
    }

    pub fn detect(&mut self, frame: &Frame) -> Vec<Detection> {
        self.frames_seen += 1;
        match self.backend.detect(frame) {
            Ok(detections) => {
                let (width, height) = (frame.width() as i32, frame.height() as i32);
                let total = detections.len();
                let kept: Vec<Detection> = detections
                    .into_iter()
                    .filter(|det| {
                        let b = det.bounding_box();
                        b.x2 > 0 && b.y2 > 0 && b.x1 < width && b.y1 < height
                    })
                    .collect();
                if kept.len() != total {
                    log::debug!(
                        "detector {}: dropped {} detections outside the {}x{} frame",
                        self.backend.name(),
                        total - kept.len(),
                        width,
                        height
                    );
                }
                kept
            }
            Err(e) => {
                self.failures += 1;
                let err = StreamError::Detector {
                    frame: self.frames_seen,
                    reason: format!("{:#}", e),
                };
                log::warn!("detector {}: {}", self.backend.name(), err);
                Vec::new()
            }
        }
    }

    pub fn frames_seen(&self) -> u64 {
        self.frames_seen
    }

    pub fn failures(&self) -> u64 {
        self.failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::result::BoundingBox;
    use anyhow::{anyhow, Result};

    struct FlakyBackend {
        calls: u32,
    }

    impl DetectorBackend for FlakyBackend {
        fn name(&self) -> &'static str {
            "flaky"
        }

        fn detect(&mut self, _frame: &Frame) -> Result<Vec<Detection>> {
            self.calls += 1;
            if self.calls % 2 == 0 {
                return Err(anyhow!("model error"));
            }
            Ok(vec![
                Detection::new(BoundingBox::new(1, 1, 5, 5)?, 0.9, "Gun")?,
                Detection::new(BoundingBox::new(50, 50, 60, 60)?, 0.9, "Wrench")?,
            ])
        }
    }

    #[test]
    fn failures_become_empty_results() {
        let mut detector = Detector::new(Box::new(FlakyBackend { calls: 0 }));
        let frame = Frame::filled(16, 16, [0, 0, 0]);

        let first = detector.detect(&frame);
        assert_eq!(first.len(), 1, "off-frame detection is dropped");
        assert_eq!(first[0].class_label(), "Gun");

        assert!(detector.detect(&frame).is_empty());
        assert_eq!(detector.failures(), 1);

        assert_eq!(detector.detect(&frame).len(), 1);
        assert_eq!(detector.frames_seen(), 3);
    }
}
