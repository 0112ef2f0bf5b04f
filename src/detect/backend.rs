use anyhow::Result;
use image::RgbImage;

use crate::detect::result::{ClassNames, DetectionCandidate};

/// Object detector backend.
///
/// Backends receive a decoded RGB image and return every candidate they
/// produce, in model order. Confidence filtering against the classification
/// threshold is not the backend's job; a backend may still apply its own
/// model-level pre-filter and NMS.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Class-id to class-name table for this model.
    fn class_names(&self) -> &ClassNames;

    /// Run detection on a decoded image.
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<DetectionCandidate>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
