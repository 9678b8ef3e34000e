//! ONNX Runtime engine for the YOLO mango ripeness model.
//!
//! Expects a YOLOv8-style export: input `(1, 3, s, s)` RGB normalized to
//! `[0, 1]`, output `(1, 4 + nc, candidates)` with `cx, cy, w, h` rows
//! followed by per-class scores.

use std::cmp::Ordering;
use std::path::Path;

use anyhow::{bail, Context};
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, RgbImage};
use ndarray::{s, ArrayViewD, Axis, Ix2, IxDyn};
use ort::session::builder::{GraphOptimizationLevel, SessionBuilder};
use ort::session::Session;
use ort::value::Value;

use inference_common::bbox::{non_max_suppression, Bbox, BboxesByClass};
use inference_common::classes;
use inference_common::params::DetectParams;
use inference_common::ObjectDetector;

pub struct YoloSession {
    session: Session,
}

impl YoloSession {
    /// Loads the model from disk. A missing file is an error here so the
    /// caller can refuse to start rather than fail on the first request.
    pub fn from_file(model_path: &Path) -> anyhow::Result<Self> {
        if !model_path.exists() {
            bail!("model file not found: {model_path:?}");
        }
        let session = SessionBuilder::new()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .commit_from_file(model_path)
            .with_context(|| format!("failed to load model from {model_path:?}"))?;
        log::debug!("{session:?}");
        Ok(Self { session })
    }
}

/// Resizes to `size`x`size` and lays pixels out as NCHW f32 in `[0, 1]`.
fn preprocess(rgb: &RgbImage, size: u32) -> Vec<f32> {
    let resized = image::imageops::resize(rgb, size, size, FilterType::Nearest);
    let plane = (size * size) as usize;
    let mut data = vec![0f32; 3 * plane];
    for (x, y, pixel) in resized.enumerate_pixels() {
        let idx = (y * size + x) as usize;
        data[idx] = pixel[0] as f32 / 255.0;
        data[plane + idx] = pixel[1] as f32 / 255.0;
        data[2 * plane + idx] = pixel[2] as f32 / 255.0;
    }
    data
}

impl ObjectDetector for YoloSession {
    fn detect(&mut self, image: &DynamicImage, params: &DetectParams) -> anyhow::Result<BboxesByClass> {
        let (orig_w, orig_h) = image.dimensions();
        let size = params.input_size;
        let data = preprocess(&image.to_rgb8(), size);

        let input = Value::from_array((vec![1i64, 3, size as i64, size as i64], data))?;
        let outputs = self.session.run(ort::inputs![input])?;
        let (shape, raw) = outputs[0].try_extract_tensor::<f32>()?;
        let dims: Vec<usize> = shape.into_iter().map(|&d| d as usize).collect();

        let view = ArrayViewD::from_shape(IxDyn(&dims), raw)?;
        let preds = view
            .index_axis(Axis(0), 0)
            .into_dimensionality::<Ix2>()
            .context("model output is not a (1, rows, candidates) tensor")?;

        let num_classes = classes::NAMES.len();
        // Some exports emit (candidates, 4 + nc) instead; normalize to rows-first.
        let preds = if preds.shape()[0] == 4 + num_classes {
            preds
        } else if preds.shape()[1] == 4 + num_classes {
            preds.reversed_axes()
        } else {
            bail!("unexpected model output shape {dims:?} for {num_classes} classes");
        };

        let candidates = preds.shape()[1];
        let sx = orig_w as f32 / size as f32;
        let sy = orig_h as f32 / size as f32;

        let mut bboxes: BboxesByClass = vec![Vec::new(); num_classes];
        for i in 0..candidates {
            let scores = preds.slice(s![4.., i]);
            let (class_idx, &confidence) = scores
                .indexed_iter()
                .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(Ordering::Equal))
                .context("model output has no class scores")?;
            if confidence < params.conf_threshold {
                continue;
            }
            let cx = preds[[0, i]];
            let cy = preds[[1, i]];
            let w = preds[[2, i]];
            let h = preds[[3, i]];
            bboxes[class_idx].push(Bbox {
                xmin: (cx - w / 2.0) * sx,
                ymin: (cy - h / 2.0) * sy,
                xmax: (cx + w / 2.0) * sx,
                ymax: (cy + h / 2.0) * sy,
                confidence,
            });
        }

        non_max_suppression(&mut bboxes, params.iou_threshold);
        Ok(bboxes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn from_file_rejects_missing_model() {
        let err = YoloSession::from_file(Path::new("/nonexistent/best.onnx")).unwrap_err();
        assert!(err.to_string().contains("model file not found"));
    }

    #[test]
    fn preprocess_produces_planar_normalized_layout() {
        let mut rgb = RgbImage::new(4, 4);
        for pixel in rgb.pixels_mut() {
            *pixel = Rgb([255, 0, 51]);
        }
        let data = preprocess(&rgb, 4);
        assert_eq!(data.len(), 3 * 16);
        // R plane all ones, G plane all zeros, B plane all 0.2.
        assert!(data[..16].iter().all(|&v| (v - 1.0).abs() < 1e-6));
        assert!(data[16..32].iter().all(|&v| v == 0.0));
        assert!(data[32..].iter().all(|&v| (v - 0.2).abs() < 1e-6));
    }

    #[test]
    fn preprocess_resizes_to_requested_size() {
        let rgb = RgbImage::new(10, 7);
        let data = preprocess(&rgb, 8);
        assert_eq!(data.len(), 3 * 8 * 8);
    }
}
