use serde::{Deserialize, Serialize};

/// A bounding box in source-frame pixel coordinates, plus the model's
/// reported confidence for it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bbox {
    pub xmin: f32,
    pub ymin: f32,
    pub xmax: f32,
    pub ymax: f32,
    pub confidence: f32,
}

/// Boxes grouped per class index, `bboxes[class_idx]` holding every surviving
/// box for that class.
pub type BboxesByClass = Vec<Vec<Bbox>>;

impl Bbox {
    pub fn area(&self) -> f32 {
        (self.xmax - self.xmin).max(0.0) * (self.ymax - self.ymin).max(0.0)
    }

    /// Intersection over union with another box.
    pub fn iou(&self, other: &Bbox) -> f32 {
        let x1 = self.xmin.max(other.xmin);
        let y1 = self.ymin.max(other.ymin);
        let x2 = self.xmax.min(other.xmax);
        let y2 = self.ymax.min(other.ymax);
        let inter = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
        if inter <= 0.0 {
            return 0.0;
        }
        inter / (self.area() + other.area() - inter + f32::EPSILON)
    }
}

/// Per-class non-max suppression. Within each class, boxes are ordered by
/// descending confidence and any box overlapping an already-kept box above
/// `iou_threshold` is dropped.
pub fn non_max_suppression(bboxes: &mut BboxesByClass, iou_threshold: f32) {
    for class_bboxes in bboxes.iter_mut() {
        class_bboxes.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        let mut kept: Vec<Bbox> = Vec::with_capacity(class_bboxes.len());
        for bbox in class_bboxes.iter() {
            if kept.iter().all(|k| k.iou(bbox) <= iou_threshold) {
                kept.push(*bbox);
            }
        }
        *class_bboxes = kept;
    }
}
