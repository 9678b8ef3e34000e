pub mod annotate;
pub mod bbox;
pub mod classes;
pub mod detection;
pub mod params;

use image::DynamicImage;

use crate::bbox::BboxesByClass;
use crate::params::DetectParams;

/// Seam between the HTTP layer and the loaded model.
///
/// A single instance is constructed at startup and shared across requests;
/// `detect` takes `&mut self` because the underlying session requires
/// exclusive access while running.
pub trait ObjectDetector: Send {
    fn detect(&mut self, image: &DynamicImage, params: &DetectParams) -> anyhow::Result<BboxesByClass>;
}
