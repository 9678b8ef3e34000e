/// Inference tuning knobs shared by every endpoint.
///
/// The defaults favor recall over precision for this dataset: a low
/// confidence cutoff with a slightly tightened IoU cutoff.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectParams {
    /// Minimum model-reported probability for a detection to be kept.
    pub conf_threshold: f32,
    /// IoU cutoff used to suppress duplicate overlapping detections.
    pub iou_threshold: f32,
    /// Square pixel dimension the input is resized to before inference.
    pub input_size: u32,
}

impl Default for DetectParams {
    fn default() -> Self {
        Self {
            conf_threshold: 0.15,
            iou_threshold: 0.4,
            input_size: 640,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_recall_favoring() {
        let params = DetectParams::default();
        assert_eq!(params.conf_threshold, 0.15);
        assert_eq!(params.iou_threshold, 0.4);
        assert_eq!(params.input_size, 640);
    }
}
