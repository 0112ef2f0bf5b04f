//! Batch detection pipeline.
//!
//! For every requested identifier: look the image up, decode it, run the
//! detector, classify the candidates, annotate, and persist exactly one
//! result. Missing or malformed identifiers are skipped without a result.
//! Only images the detector actually ran on count towards `image_count`.

mod writer;

pub use writer::ResultWriter;

use anyhow::{anyhow, Context, Result};

use crate::annotate::{decode_image, AnnotationStyle, Annotator};
use crate::detect::{
    BoundingBox, Classification, DetectionClassifier, SharedDetector, Verdict,
    DEFAULT_CONFIDENCE_THRESHOLD,
};
use crate::model::{
    FailedResult, FailureReason, ImageId, ImageResult, ObjectCounts, SuccessResult,
};
use crate::storage::{ImageStore, RawImage, ResultStore};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PipelineSettings {
    pub confidence_threshold: f32,
    pub annotation: AnnotationStyle,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            annotation: AnnotationStyle::default(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SkipReason {
    NotFound,
    MalformedId,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SkippedImage {
    pub image_id: String,
    pub reason: SkipReason,
}

/// Outcome of one batch.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BatchSummary {
    pub requested: usize,
    /// Images that were decoded and run through the detector. Decode and
    /// detector failures still persist a result but are not counted here.
    pub image_count: usize,
    pub skipped: Vec<SkippedImage>,
    /// Persisted results in request order.
    pub results: Vec<ImageResult>,
}

/// One found image after the per-image pipeline.
struct Processed {
    result: ImageResult,
    /// The detector returned candidates for this image.
    detected: bool,
}

impl BatchSummary {
    pub fn success_count(&self) -> usize {
        self.results
            .iter()
            .filter(|r| matches!(r, ImageResult::Success(_)))
            .count()
    }

    pub fn failed_count(&self) -> usize {
        self.results.len() - self.success_count()
    }
}

/// Drives the per-image pipeline over a list of identifiers.
pub struct BatchOrchestrator<'a, S: ImageStore + ResultStore> {
    store: &'a mut S,
    detector: SharedDetector,
    classifier: DetectionClassifier,
    annotator: Annotator,
}

impl<'a, S: ImageStore + ResultStore> BatchOrchestrator<'a, S> {
    pub fn new(store: &'a mut S, detector: SharedDetector, settings: PipelineSettings) -> Self {
        Self {
            store,
            detector,
            classifier: DetectionClassifier::new(settings.confidence_threshold),
            annotator: Annotator::new(settings.annotation),
        }
    }

    /// Process `image_ids` in order.
    ///
    /// Per-image problems (missing record, malformed id, undecodable bytes,
    /// detector error) never abort the batch. Store I/O errors, persistence
    /// errors and an unusable detector do; results written before the error
    /// stay persisted.
    pub fn run<I: AsRef<str>>(&mut self, image_ids: &[I]) -> Result<BatchSummary> {
        let mut summary = BatchSummary {
            requested: image_ids.len(),
            ..BatchSummary::default()
        };

        for raw_id in image_ids {
            let raw_id = raw_id.as_ref();
            let id = match ImageId::parse(raw_id) {
                Ok(id) => id,
                Err(err) => {
                    log::warn!("skipping malformed image id: {}", err);
                    summary.skipped.push(SkippedImage {
                        image_id: raw_id.to_string(),
                        reason: SkipReason::MalformedId,
                    });
                    continue;
                }
            };

            let Some(image) = self
                .store
                .find_image(&id)
                .with_context(|| format!("failed to look up image {}", id))?
            else {
                log::warn!("image {} not found; skipping", id);
                summary.skipped.push(SkippedImage {
                    image_id: raw_id.to_string(),
                    reason: SkipReason::NotFound,
                });
                continue;
            };

            log::info!("processing image {} ({})", image.filename, id);
            let Processed { result, detected } = self.process(&image).with_context(|| {
                format!(
                    "batch aborted at image {} after {} persisted result(s)",
                    id,
                    summary.results.len()
                )
            })?;

            ResultWriter::new(&mut *self.store)
                .write(&result)
                .with_context(|| {
                    format!(
                        "batch aborted after {} persisted result(s)",
                        summary.results.len()
                    )
                })?;

            match &result {
                ImageResult::Success(r) => log::info!(
                    "image {} success: {} detection(s), counts deer={} pig={} racoon={}",
                    r.image_id,
                    r.detections.len(),
                    r.object_counts.deer,
                    r.object_counts.pig,
                    r.object_counts.racoon
                ),
                ImageResult::Failed(r) => {
                    log::info!("image {} failed: {}", r.image_id, r.reason)
                }
            }

            if detected {
                summary.image_count += 1;
            }
            summary.results.push(result);
        }

        log::info!(
            "batch done: requested={} processed={} persisted={} skipped={}",
            summary.requested,
            summary.image_count,
            summary.results.len(),
            summary.skipped.len()
        );
        Ok(summary)
    }

    /// Produce the result for one found image.
    fn process(&self, image: &RawImage) -> Result<Processed> {
        let decoded = match decode_image(&image.data) {
            Ok(decoded) => decoded,
            Err(err) => {
                log::warn!("image {} could not be decoded: {:#}", image.id, err);
                return Ok(Processed {
                    result: failed(image, None, FailureReason::DecodeError),
                    detected: false,
                });
            }
        };

        // The guard is released before any encoding work.
        let outcome = {
            let mut detector = self
                .detector
                .lock()
                .map_err(|_| anyhow!("detector lock poisoned"))?;
            detector.detect(&decoded).map(|candidates| {
                for candidate in &candidates {
                    log::debug!(
                        "candidate class_id={} confidence={:.4}",
                        candidate.class_id,
                        candidate.confidence
                    );
                }
                self.classifier.classify(&candidates, detector.class_names())
            })
        };

        let classification = match outcome {
            Ok(classification) => classification,
            Err(err) => {
                log::warn!("detector failed on image {}: {:#}", image.id, err);
                let copy = self
                    .annotator
                    .encode(&decoded)
                    .with_context(|| format!("failed to encode image {}", image.id))?;
                return Ok(Processed {
                    result: failed(image, Some(copy), FailureReason::DetectorError),
                    detected: false,
                });
            }
        };

        let Classification {
            verdict,
            detections,
            object_counts,
            accepted,
        } = classification;

        let result = match verdict {
            Verdict::Success => {
                let boxes: Vec<BoundingBox> = accepted.iter().map(|c| c.bbox).collect();
                let annotated_image = self
                    .annotator
                    .annotate(&decoded, &boxes)
                    .with_context(|| format!("failed to annotate image {}", image.id))?;
                ImageResult::Success(SuccessResult {
                    image_id: image.id.as_str().to_string(),
                    filename: image.filename.clone(),
                    annotated_image,
                    detections,
                    object_counts,
                })
            }
            Verdict::Failed(reason) => {
                let copy = self
                    .annotator
                    .encode(&decoded)
                    .with_context(|| format!("failed to encode image {}", image.id))?;
                failed(image, Some(copy), reason)
            }
        };
        Ok(Processed {
            result,
            detected: true,
        })
    }
}

fn failed(
    image: &RawImage,
    annotated_image: Option<Vec<u8>>,
    reason: FailureReason,
) -> ImageResult {
    ImageResult::Failed(FailedResult {
        image_id: image.id.as_str().to_string(),
        filename: image.filename.clone(),
        annotated_image,
        object_counts: ObjectCounts::default(),
        reason,
    })
}
