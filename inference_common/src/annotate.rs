//! Draws detection overlays (boxes + labels) onto a copy of the source frame.

use std::path::Path;

use ab_glyph::{FontArc, PxScale};
use image::{DynamicImage, Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;

use crate::detection::Detection;

const LABEL_FONT_SIZE: f32 = 16.0;
const LABEL_HEIGHT: u32 = 18;
// Rough average glyph advance, only used to size the label background bar.
const LABEL_CHAR_WIDTH: f32 = 8.0;
const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
// One color per class index, same order as `classes::NAMES`.
const CLASS_COLORS: [[u8; 3]; 2] = [[255, 140, 0], [46, 160, 67]];

fn class_color(class_idx: usize) -> Rgb<u8> {
    Rgb(CLASS_COLORS[class_idx % CLASS_COLORS.len()])
}

/// Overlay renderer with an optional label typeface.
///
/// The font is an on-disk asset; when it is absent we still draw boxes and
/// label bars, just without text.
pub struct Annotator {
    font: Option<FontArc>,
}

impl Annotator {
    pub fn new(font: Option<FontArc>) -> Self {
        Self { font }
    }

    pub fn from_font_file(path: Option<&Path>) -> Self {
        let font = match path {
            Some(path) if path.exists() => match std::fs::read(path) {
                Ok(bytes) => match FontArc::try_from_vec(bytes) {
                    Ok(font) => {
                        log::info!("Loaded label font from {path:?}");
                        Some(font)
                    }
                    Err(e) => {
                        log::warn!("Could not parse font {path:?}: {e}, drawing boxes only");
                        None
                    }
                },
                Err(e) => {
                    log::warn!("Could not read font {path:?}: {e}, drawing boxes only");
                    None
                }
            },
            Some(path) => {
                log::warn!("Font path {path:?} does not exist, drawing boxes only");
                None
            }
            None => None,
        };
        Self { font }
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    /// Renders every detection onto a copy of `image` and returns it.
    pub fn annotate(&self, image: &DynamicImage, detections: &[Detection]) -> RgbImage {
        let mut canvas = image.to_rgb8();
        let (img_w, img_h) = (canvas.width(), canvas.height());
        if img_w == 0 || img_h == 0 {
            return canvas;
        }

        for detection in detections {
            let color = class_color(detection.class_idx);
            let bbox = &detection.bbox;

            let x1 = (bbox.xmin.floor().max(0.0) as u32).min(img_w - 1);
            let y1 = (bbox.ymin.floor().max(0.0) as u32).min(img_h - 1);
            let x2 = (bbox.xmax.ceil().max(0.0) as u32).min(img_w - 1);
            let y2 = (bbox.ymax.ceil().max(0.0) as u32).min(img_h - 1);
            if x2 <= x1 || y2 <= y1 {
                continue;
            }
            let (w, h) = (x2 - x1, y2 - y1);

            // 2px border: outer rect plus a 1px inset.
            draw_hollow_rect_mut(
                &mut canvas,
                Rect::at(x1 as i32, y1 as i32).of_size(w, h),
                color,
            );
            if w > 2 && h > 2 {
                draw_hollow_rect_mut(
                    &mut canvas,
                    Rect::at(x1 as i32 + 1, y1 as i32 + 1).of_size(w - 2, h - 2),
                    color,
                );
            }

            let label = format!("{} {:.2}", detection.class_name, detection.confidence);
            let bar_w = ((label.len() as f32 * LABEL_CHAR_WIDTH) as u32).clamp(1, img_w - x1);
            let bar_y = y1.saturating_sub(LABEL_HEIGHT);
            draw_filled_rect_mut(
                &mut canvas,
                Rect::at(x1 as i32, bar_y as i32).of_size(bar_w, LABEL_HEIGHT),
                color,
            );

            if let Some(font) = &self.font {
                draw_text_mut(
                    &mut canvas,
                    TEXT_COLOR,
                    x1 as i32 + 2,
                    bar_y as i32 + 1,
                    PxScale::from(LABEL_FONT_SIZE),
                    font,
                    &label,
                );
            }
        }

        canvas
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bbox::Bbox;

    fn detection(xmin: f32, ymin: f32, xmax: f32, ymax: f32) -> Detection {
        Detection::new(
            0,
            Bbox {
                xmin,
                ymin,
                xmax,
                ymax,
                confidence: 0.8,
            },
        )
    }

    #[test]
    fn annotate_draws_box_border() {
        let image = DynamicImage::new_rgb8(64, 64);
        let annotator = Annotator::new(None);
        let annotated = annotator.annotate(&image, &[detection(10.0, 30.0, 40.0, 60.0)]);
        assert_eq!(*annotated.get_pixel(10, 30), class_color(0));
        assert_eq!(*annotated.get_pixel(40, 45), class_color(0));
        // Interior stays untouched.
        assert_eq!(*annotated.get_pixel(25, 45), Rgb([0, 0, 0]));
    }

    #[test]
    fn annotate_tolerates_out_of_bounds_boxes() {
        let image = DynamicImage::new_rgb8(32, 32);
        let annotator = Annotator::new(None);
        let detections = [
            detection(-20.0, -20.0, 100.0, 100.0),
            detection(500.0, 500.0, 600.0, 600.0),
        ];
        let annotated = annotator.annotate(&image, &detections);
        assert_eq!(annotated.dimensions(), (32, 32));
    }

    #[test]
    fn annotate_without_detections_is_a_plain_copy() {
        let image = DynamicImage::new_rgb8(16, 16);
        let annotator = Annotator::new(None);
        let annotated = annotator.annotate(&image, &[]);
        assert!(annotated.pixels().all(|p| *p == Rgb([0, 0, 0])));
    }

    #[test]
    fn missing_font_file_falls_back_to_boxes_only() {
        let annotator = Annotator::from_font_file(Some(Path::new("/nonexistent/font.ttf")));
        assert!(!annotator.has_font());
    }
}
