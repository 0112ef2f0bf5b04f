use std::collections::HashMap;

use anyhow::{anyhow, Result};
use image::RgbImage;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{ClassNames, DetectionCandidate};

/// Scripted backend for testing and dry runs.
///
/// Returns a fixed candidate list for every image, unless a script was
/// registered for the image's dimensions.
pub struct StubBackend {
    class_names: ClassNames,
    default_candidates: Vec<DetectionCandidate>,
    by_dimensions: HashMap<(u32, u32), Vec<DetectionCandidate>>,
    fail_with: Option<String>,
    calls: usize,
}

impl StubBackend {
    pub fn new() -> Self {
        Self {
            class_names: ClassNames::new(crate::model::KnownClass::ALL.map(|c| c.as_str())),
            default_candidates: Vec::new(),
            by_dimensions: HashMap::new(),
            fail_with: None,
            calls: 0,
        }
    }

    pub fn with_class_names(mut self, class_names: ClassNames) -> Self {
        self.class_names = class_names;
        self
    }

    /// Candidates returned for any image without a dimension-specific script.
    pub fn with_candidates(mut self, candidates: Vec<DetectionCandidate>) -> Self {
        self.default_candidates = candidates;
        self
    }

    /// Candidates returned for images of exactly `width` x `height`.
    pub fn with_script(
        mut self,
        width: u32,
        height: u32,
        candidates: Vec<DetectionCandidate>,
    ) -> Self {
        self.by_dimensions.insert((width, height), candidates);
        self
    }

    /// Make every `detect` call fail with the given message.
    pub fn failing(mut self, message: &str) -> Self {
        self.fail_with = Some(message.to_string());
        self
    }

    /// Number of `detect` calls served so far.
    pub fn calls(&self) -> usize {
        self.calls
    }
}

impl Default for StubBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl DetectorBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn class_names(&self) -> &ClassNames {
        &self.class_names
    }

    fn detect(&mut self, image: &RgbImage) -> Result<Vec<DetectionCandidate>> {
        self.calls += 1;
        if let Some(message) = &self.fail_with {
            return Err(anyhow!("{}", message));
        }
        let candidates = self
            .by_dimensions
            .get(&image.dimensions())
            .unwrap_or(&self.default_candidates);
        Ok(candidates.clone())
    }
}
