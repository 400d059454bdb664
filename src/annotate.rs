//! Detection overlay.
//!
//! `FrameAnnotator::annotate` returns a copy of the frame with every
//! detection drawn as a tier-colored rectangle and a `label confidence`
//! caption. The caller's frame is never touched.

use font8x8::{UnicodeFonts, BASIC_FONTS};
use image::{Rgb, RgbImage};

use crate::danger::TierTable;
use crate::detect::Detection;
use crate::frame::Frame;

const BOX_THICKNESS: u32 = 2;
const GLYPH_SIZE: u32 = 8;
const CAPTION_SCALE: u32 = 2;
const CAPTION_GAP: u32 = 4;

#[derive(Clone, Debug)]
pub struct FrameAnnotator {
    tiers: TierTable,
}

impl FrameAnnotator {
    pub fn new(tiers: TierTable) -> Self {
        Self { tiers }
    }

    /// Draw `detections` in list order onto a copy of `frame`. Later entries
    /// overdraw earlier ones where they overlap.
    pub fn annotate(&self, frame: &Frame, detections: &[Detection]) -> Frame {
        let mut out = frame.clone();
        let image = out.image_mut();
        for det in detections {
            let color = Rgb(self.tiers.color_for_label(det.class_label()));
            let b = det.bounding_box();
            draw_rect(image, b.x1, b.y1, b.x2, b.y2, color);

            let caption_height = (GLYPH_SIZE * CAPTION_SCALE) as i64;
            let above = b.y1 as i64 - caption_height - CAPTION_GAP as i64;
            let caption_y = if above >= 0 {
                above
            } else {
                b.y1 as i64 + BOX_THICKNESS as i64 + 1
            };
            draw_text(image, b.x1 as i64, caption_y, &det.caption(), color);
        }
        out
    }
}

fn put(image: &mut RgbImage, x: i64, y: i64, color: Rgb<u8>) {
    if x < 0 || y < 0 || x >= image.width() as i64 || y >= image.height() as i64 {
        return;
    }
    image.put_pixel(x as u32, y as u32, color);
}

fn draw_rect(image: &mut RgbImage, x1: i32, y1: i32, x2: i32, y2: i32, color: Rgb<u8>) {
    let (x1, y1, x2, y2) = (x1 as i64, y1 as i64, x2 as i64, y2 as i64);
    for t in 0..BOX_THICKNESS as i64 {
        let (left, top, right, bottom) = (x1 + t, y1 + t, x2 - t, y2 - t);
        if left > right || top > bottom {
            break;
        }
        // Clip the runs to the image so huge boxes stay cheap.
        let x_from = left.max(0);
        let x_to = right.min(image.width() as i64 - 1);
        for x in x_from..=x_to {
            put(image, x, top, color);
            put(image, x, bottom, color);
        }
        let y_from = top.max(0);
        let y_to = bottom.min(image.height() as i64 - 1);
        for y in y_from..=y_to {
            put(image, left, y, color);
            put(image, right, y, color);
        }
    }
}

fn draw_text(image: &mut RgbImage, x: i64, y: i64, text: &str, color: Rgb<u8>) {
    let advance = (GLYPH_SIZE * CAPTION_SCALE) as i64;
    let scale = CAPTION_SCALE as i64;
    for (index, ch) in text.chars().enumerate() {
        let Some(glyph) = BASIC_FONTS.get(ch) else {
            continue;
        };
        let origin_x = x + index as i64 * advance;
        if origin_x >= image.width() as i64 {
            break;
        }
        for (row, bits) in glyph.iter().enumerate() {
            for col in 0..GLYPH_SIZE {
                if *bits & (1u8 << col) == 0 {
                    continue;
                }
                for dy in 0..scale {
                    for dx in 0..scale {
                        put(
                            image,
                            origin_x + col as i64 * scale + dx,
                            y + row as i64 * scale + dy,
                            color,
                        );
                    }
                }
            }
        }
    }
}
