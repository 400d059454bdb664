use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Axis-aligned box in integer pixel coordinates, `x1 < x2` and `y1 < y2`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl BoundingBox {
    pub fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Result<Self> {
        if x1 >= x2 || y1 >= y2 {
            return Err(anyhow!(
                "degenerate bounding box ({}, {}, {}, {})",
                x1,
                y1,
                x2,
                y2
            ));
        }
        Ok(Self { x1, y1, x2, y2 })
    }

    // Measured in wider integers: corners may sit anywhere in i32.
    pub fn width(&self) -> i64 {
        self.x2 as i64 - self.x1 as i64
    }

    pub fn height(&self) -> i64 {
        self.y2 as i64 - self.y1 as i64
    }

    pub fn area(&self) -> i128 {
        self.width() as i128 * self.height() as i128
    }

    /// Intersection over union with another box.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let ix1 = self.x1.max(other.x1) as i64;
        let iy1 = self.y1.max(other.y1) as i64;
        let ix2 = self.x2.min(other.x2) as i64;
        let iy2 = self.y2.min(other.y2) as i64;
        if ix1 >= ix2 || iy1 >= iy2 {
            return 0.0;
        }
        let inter = (ix2 - ix1) as i128 * (iy2 - iy1) as i128;
        let union = self.area() + other.area() - inter;
        if union <= 0 {
            0.0
        } else {
            (inter as f64 / union as f64) as f32
        }
    }

    pub fn as_array(&self) -> [i32; 4] {
        [self.x1, self.y1, self.x2, self.y2]
    }
}

impl fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}, {}, {}]", self.x1, self.y1, self.x2, self.y2)
    }
}

/// One detected object. Immutable once built.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    bounding_box: BoundingBox,
    confidence: f32,
    class_label: String,
}

impl Detection {
    pub fn new(
        bounding_box: BoundingBox,
        confidence: f32,
        class_label: impl Into<String>,
    ) -> Result<Self> {
        if !(0.0..=1.0).contains(&confidence) {
            return Err(anyhow!("confidence {} outside [0, 1]", confidence));
        }
        let class_label = class_label.into();
        if class_label.trim().is_empty() {
            return Err(anyhow!("detection has an empty class label"));
        }
        Ok(Self {
            bounding_box,
            confidence,
            class_label,
        })
    }

    pub fn bounding_box(&self) -> BoundingBox {
        self.bounding_box
    }

    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    pub fn class_label(&self) -> &str {
        &self.class_label
    }

    /// Overlay caption, e.g. `Gun 0.92`.
    pub fn caption(&self) -> String {
        format!("{} {:.2}", self.class_label, self.confidence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_degenerate_boxes() {
        assert!(BoundingBox::new(10, 10, 10, 20).is_err());
        assert!(BoundingBox::new(10, 30, 20, 20).is_err());
        assert!(BoundingBox::new(0, 0, 1, 1).is_ok());
    }

    #[test]
    fn rejects_out_of_range_confidence() {
        let bbox = BoundingBox::new(0, 0, 5, 5).unwrap();
        assert!(Detection::new(bbox, 1.2, "Gun").is_err());
        assert!(Detection::new(bbox, -0.1, "Gun").is_err());
        assert!(Detection::new(bbox, f32::NAN, "Gun").is_err());
        assert!(Detection::new(bbox, 0.5, " ").is_err());
    }

    #[test]
    fn caption_uses_two_decimals() {
        let bbox = BoundingBox::new(0, 0, 5, 5).unwrap();
        let det = Detection::new(bbox, 0.916, "Gun").unwrap();
        assert_eq!(det.caption(), "Gun 0.92");
    }

    #[test]
    fn iou_of_disjoint_and_identical_boxes() {
        let a = BoundingBox::new(0, 0, 10, 10).unwrap();
        let b = BoundingBox::new(20, 20, 30, 30).unwrap();
        let c = BoundingBox::new(5, 0, 15, 10).unwrap();
        assert_eq!(a.iou(&b), 0.0);
        assert_eq!(a.iou(&a), 1.0);
        assert!((a.iou(&c) - 50.0 / 150.0).abs() < 1e-6);
    }

    #[test]
    fn extreme_boxes_measure_without_overflow() {
        let full = BoundingBox::new(i32::MIN, i32::MIN, i32::MAX, i32::MAX).unwrap();
        assert_eq!(full.width(), u32::MAX as i64);
        assert_eq!(full.height(), u32::MAX as i64);
        assert_eq!(full.area(), (u32::MAX as i128) * (u32::MAX as i128));
        assert_eq!(full.iou(&full), 1.0);

        let tall = BoundingBox::new(0, i32::MIN, 10, 10).unwrap();
        assert_eq!(tall.height(), 10 - i32::MIN as i64);
        let small = BoundingBox::new(0, 0, 10, 10).unwrap();
        let iou = small.iou(&full);
        assert!(iou > 0.0 && iou < 1e-9);
        assert!((tall.iou(&small) - 100.0 / tall.area() as f32).abs() < 1e-9);
    }
}
