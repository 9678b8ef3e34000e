use serde::{Deserialize, Serialize};

use crate::bbox::{Bbox, BboxesByClass};
use crate::classes;

/// A single detection as reported to callers: resolved class name plus the
/// raw box and confidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub class_idx: usize,
    pub class_name: String,
    pub confidence: f32,
    pub bbox: Bbox,
}

impl Detection {
    pub fn new(class_idx: usize, bbox: Bbox) -> Self {
        Self {
            class_idx,
            class_name: classes::name(class_idx).to_string(),
            confidence: bbox.confidence,
            bbox,
        }
    }
}

/// Flattens per-class boxes into one list, preserving the engine's native
/// ordering (class index ascending, confidence descending within a class).
pub fn flatten(bboxes: &BboxesByClass) -> Vec<Detection> {
    let mut detections = Vec::new();
    for (class_idx, class_bboxes) in bboxes.iter().enumerate() {
        for bbox in class_bboxes {
            detections.push(Detection::new(class_idx, *bbox));
        }
    }
    detections
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flatten_preserves_class_then_confidence_order() {
        let bboxes: BboxesByClass = vec![
            vec![Bbox {
                xmin: 0.0,
                ymin: 0.0,
                xmax: 5.0,
                ymax: 5.0,
                confidence: 0.8,
            }],
            vec![Bbox {
                xmin: 10.0,
                ymin: 10.0,
                xmax: 20.0,
                ymax: 20.0,
                confidence: 0.3,
            }],
        ];
        let detections = flatten(&bboxes);
        assert_eq!(detections.len(), 2);
        assert_eq!(detections[0].class_name, "ripe mango");
        assert_eq!(detections[1].class_name, "unripe mango");
        assert_eq!(detections[1].confidence, 0.3);
    }

    #[test]
    fn flatten_of_empty_classes_is_empty() {
        let bboxes: BboxesByClass = vec![vec![], vec![]];
        assert!(flatten(&bboxes).is_empty());
    }
}
