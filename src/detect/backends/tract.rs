#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::imageops::{self, FilterType};
use tract_onnx::prelude::*;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{BoundingBox, Detection};
use crate::frame::Frame;

/// Tract-based backend for YOLO-layout ONNX models.
///
/// The model takes a `[1, 3, H, W]` RGB tensor scaled to `0..1` and emits
/// `[1, 4 + C, N]` rows of `cx, cy, w, h` followed by C class scores. A
/// transposed `[1, N, 4 + C]` output is accepted too.
pub struct TractBackend {
    model: TypedRunnableModel<TypedModel>,
    width: u32,
    height: u32,
    class_names: Vec<String>,
    confidence_threshold: f32,
    iou_threshold: f32,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(
        model_path: P,
        width: u32,
        height: u32,
        class_names: Vec<String>,
    ) -> Result<Self> {
        let model_path = model_path.as_ref();
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(1, 3, height as usize, width as usize),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        log::info!(
            "tract: loaded {} ({}x{}, {} classes)",
            model_path.display(),
            width,
            height,
            class_names.len()
        );

        Ok(Self {
            model,
            width,
            height,
            class_names,
            confidence_threshold: 0.25,
            iou_threshold: 0.45,
        })
    }

    /// Override the default confidence threshold.
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.confidence_threshold = threshold;
        self
    }

    /// Override the default NMS IoU threshold.
    pub fn with_iou_threshold(mut self, threshold: f32) -> Self {
        self.iou_threshold = threshold;
        self
    }

    fn build_input(&self, frame: &Frame) -> Tensor {
        let resized = imageops::resize(frame.image(), self.width, self.height, FilterType::Triangle);
        let input = tract_ndarray::Array4::from_shape_fn(
            (1, 3, self.height as usize, self.width as usize),
            |(_, channel, y, x)| resized.get_pixel(x as u32, y as u32)[channel] as f32 / 255.0,
        );
        input.into_tensor()
    }

    fn class_name(&self, class_id: usize) -> String {
        self.class_names
            .get(class_id)
            .cloned()
            .unwrap_or_else(|| format!("class_{}", class_id))
    }

    fn decode(&self, outputs: TVec<TValue>, frame: &Frame) -> Result<Vec<Detection>> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        let shape = view.shape().to_vec();
        if shape.len() != 3 || shape[0] != 1 {
            return Err(anyhow!("unexpected model output shape {:?}", shape));
        }
        // Attributes (4 + classes) are fewer than candidate rows in practice.
        let transposed = shape[1] > shape[2];
        let (attrs, rows) = if transposed {
            (shape[2], shape[1])
        } else {
            (shape[1], shape[2])
        };
        if attrs <= 4 {
            return Err(anyhow!("model output has no class scores: {:?}", shape));
        }
        let at = |attr: usize, row: usize| -> f32 {
            if transposed {
                view[[0, row, attr]]
            } else {
                view[[0, attr, row]]
            }
        };

        let sx = frame.width() as f32 / self.width as f32;
        let sy = frame.height() as f32 / self.height as f32;
        let max_x = frame.width() as i32;
        let max_y = frame.height() as i32;

        let mut candidates: Vec<(usize, f32, BoundingBox)> = Vec::new();
        for row in 0..rows {
            let (class_id, score) = (4..attrs)
                .map(|attr| (attr - 4, at(attr, row)))
                .fold((0, f32::NEG_INFINITY), |best, cur| {
                    if cur.1 > best.1 {
                        cur
                    } else {
                        best
                    }
                });
            if !score.is_finite() || score < self.confidence_threshold {
                continue;
            }
            let (cx, cy, w, h) = (at(0, row), at(1, row), at(2, row), at(3, row));
            let x1 = (((cx - w / 2.0) * sx).round() as i32).clamp(0, max_x);
            let y1 = (((cy - h / 2.0) * sy).round() as i32).clamp(0, max_y);
            let x2 = (((cx + w / 2.0) * sx).round() as i32).clamp(0, max_x);
            let y2 = (((cy + h / 2.0) * sy).round() as i32).clamp(0, max_y);
            let Ok(bbox) = BoundingBox::new(x1, y1, x2, y2) else {
                continue;
            };
            candidates.push((class_id, score.min(1.0), bbox));
        }

        candidates.sort_by(|a, b| b.1.total_cmp(&a.1));
        let mut kept: Vec<(usize, f32, BoundingBox)> = Vec::new();
        for cand in candidates {
            let suppressed = kept
                .iter()
                .any(|k| k.0 == cand.0 && k.2.iou(&cand.2) > self.iou_threshold);
            if !suppressed {
                kept.push(cand);
            }
        }

        kept.into_iter()
            .map(|(class_id, score, bbox)| Detection::new(bbox, score, self.class_name(class_id)))
            .collect()
    }
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        let input = self.build_input(frame);
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        self.decode(outputs, frame)
    }

    fn warm_up(&mut self) -> Result<()> {
        let blank = Frame::filled(self.width, self.height, [0, 0, 0]);
        self.detect(&blank).map(|_| ())
    }
}
