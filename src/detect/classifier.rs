use crate::detect::result::{ClassNames, DetectionCandidate};
use crate::model::{ClassifiedDetection, FailureReason, KnownClass, ObjectCounts};

/// Default acceptance threshold for detector confidence.
pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.8;

/// Success/failure decision for one image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verdict {
    Success,
    Failed(FailureReason),
}

/// Output of [`DetectionClassifier::classify`].
#[derive(Clone, Debug, PartialEq)]
pub struct Classification {
    pub verdict: Verdict,
    /// Accepted detections in detector order.
    pub detections: Vec<ClassifiedDetection>,
    pub object_counts: ObjectCounts,
    /// Boxes of accepted candidates, same order as `detections`.
    pub accepted: Vec<DetectionCandidate>,
}

/// Applies the confidence threshold and tallies known classes.
///
/// Pure: the same candidates, threshold and class table always produce the
/// same classification.
#[derive(Clone, Copy, Debug)]
pub struct DetectionClassifier {
    threshold: f32,
}

impl DetectionClassifier {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }

    pub fn classify(
        &self,
        candidates: &[DetectionCandidate],
        class_names: &ClassNames,
    ) -> Classification {
        let accepted: Vec<DetectionCandidate> = candidates
            .iter()
            .filter(|c| c.confidence >= self.threshold)
            .copied()
            .collect();

        let mut detections = Vec::with_capacity(accepted.len());
        let mut object_counts = ObjectCounts::default();
        for candidate in &accepted {
            let class_name = class_names.resolve(candidate.class_id);
            if let Some(class) = KnownClass::from_name(&class_name) {
                object_counts.increment(class);
            }
            detections.push(ClassifiedDetection {
                class_name,
                confidence_percent: candidate.confidence * 100.0,
                bbox: candidate.bbox,
            });
        }

        let verdict = if candidates.is_empty() {
            Verdict::Failed(FailureReason::NoObjectsDetected)
        } else if accepted.is_empty() {
            Verdict::Failed(FailureReason::BelowThreshold)
        } else {
            Verdict::Success
        };

        Classification {
            verdict,
            detections,
            object_counts,
            accepted,
        }
    }
}

impl Default for DetectionClassifier {
    fn default() -> Self {
        Self::new(DEFAULT_CONFIDENCE_THRESHOLD)
    }
}
