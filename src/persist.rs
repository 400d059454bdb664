//! Rate-limited persistence of detection events.

use anyhow::{Context, Result};
use image::ImageFormat;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::detect::Detection;
use crate::error::StreamError;
use crate::frame::{DetectionMode, Frame};
use crate::storage::{DetectionEvent, DetectionStore};

/// Admits at most one persisted event per interval.
#[derive(Clone, Debug)]
pub struct PersistenceGate {
    interval: Duration,
    last: Option<Instant>,
}

impl PersistenceGate {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn last_admitted(&self) -> Option<Instant> {
        self.last
    }

    /// True when `has_detections` and more than `interval` has passed since
    /// the previous admission. An admission records `now`.
    pub fn admit(&mut self, now: Instant, has_detections: bool) -> bool {
        if !has_detections {
            return false;
        }
        let due = match self.last {
            None => true,
            Some(last) => now.saturating_duration_since(last) > self.interval,
        };
        if due {
            self.last = Some(now);
        }
        due
    }
}

/// Writes admitted frames: annotated JPEG, detection row, audit entry.
pub struct PersistenceWriter {
    results_dir: PathBuf,
    store: Box<dyn DetectionStore>,
    operator: String,
    role: String,
    mode: DetectionMode,
    failures: u64,
}

impl PersistenceWriter {
    pub fn new(
        results_dir: impl Into<PathBuf>,
        store: Box<dyn DetectionStore>,
        operator: impl Into<String>,
        role: impl Into<String>,
        mode: DetectionMode,
    ) -> Self {
        Self {
            results_dir: results_dir.into(),
            store,
            operator: operator.into(),
            role: role.into(),
            mode,
            failures: 0,
        }
    }

    pub fn failures(&self) -> u64 {
        self.failures
    }

    /// Persist one admitted frame. Failures are logged, never returned.
    /// Returns whether the detection row was stored.
    pub fn persist(&mut self, annotated: &Frame, detections: &[Detection]) -> bool {
        let image_path = match self.write_image(annotated) {
            Ok(path) => path,
            Err(e) => {
                self.fail(self.results_dir.display().to_string(), &e);
                return false;
            }
        };
        let image_path = image_path.to_string_lossy().to_string();

        let event = DetectionEvent::from_detections(
            detections,
            image_path.clone(),
            self.mode,
            self.operator.clone(),
            self.role.clone(),
        );
        if let Err(e) = self.store.insert(&event) {
            self.fail("detections".to_string(), &e);
            return false;
        }
        log::info!(
            "persist: saved {} ({})",
            image_path,
            event.class_labels.join(", ")
        );

        let message = format!(
            "{} detection saved: [{}]",
            self.mode,
            event.class_labels.join(", ")
        );
        if let Err(e) = self.store.log(&self.operator, &message) {
            self.fail("logs".to_string(), &e);
        }
        true
    }

    fn write_image(&self, frame: &Frame) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.results_dir).with_context(|| {
            format!("create results directory {}", self.results_dir.display())
        })?;
        let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S").to_string();
        let path = unique_path(&self.results_dir, self.mode.file_prefix(), &stamp);
        frame
            .image()
            .save_with_format(&path, ImageFormat::Jpeg)
            .with_context(|| format!("write {}", path.display()))?;
        Ok(path)
    }

    fn fail(&mut self, target: String, err: &anyhow::Error) {
        self.failures += 1;
        let err = StreamError::PersistenceWrite {
            target,
            reason: format!("{:#}", err),
        };
        log::warn!("persist: {}", err);
    }
}

/// `<dir>/<prefix>_<stamp>.jpg`, or the first free `_<n>` variant.
fn unique_path(dir: &Path, prefix: &str, stamp: &str) -> PathBuf {
    let base = dir.join(format!("{}_{}.jpg", prefix, stamp));
    if !base.exists() {
        return base;
    }
    let mut n = 1u32;
    loop {
        let candidate = dir.join(format!("{}_{}_{}.jpg", prefix, stamp, n));
        if !candidate.exists() {
            return candidate;
        }
        n += 1;
    }
}
