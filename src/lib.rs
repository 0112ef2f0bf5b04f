//! Wildlife detection over stored images.
//!
//! A batch request names stored images by identifier. Each found image is
//! decoded, run through an object detector, filtered against a confidence
//! threshold and persisted as exactly one result document: into the success
//! collection when at least one detection was accepted, otherwise into the
//! failure collection with a reason.
//!
//! # Module Structure
//!
//! - `detect`: detector backends, registry, and the confidence classifier
//! - `model`: per-image result types (`ImageResult`, `ObjectCounts`, ...)
//! - `annotate`: decode and box drawing
//! - `storage`: raw image and result stores (SQLite, in-memory)
//! - `pipeline`: batch orchestration and result routing
//! - `api`: HTTP surface (`POST /detect`)
//! - `config`: file + environment configuration

pub mod annotate;
pub mod api;
pub mod config;
pub mod detect;
pub mod model;
pub mod pipeline;
pub mod storage;

pub use annotate::{decode_image, AnnotationStyle, Annotator};
pub use detect::{
    BackendRegistry, BoundingBox, ClassNames, Classification, DetectionCandidate,
    DetectionClassifier, DetectorBackend, SharedDetector, StubBackend, Verdict,
    DEFAULT_CONFIDENCE_THRESHOLD,
};
pub use model::{
    ClassifiedDetection, FailedResult, FailureReason, ImageId, ImageResult, KnownClass,
    ObjectCounts, Status, SuccessResult,
};
pub use pipeline::{
    BatchOrchestrator, BatchSummary, PipelineSettings, ResultWriter, SkipReason, SkippedImage,
};
pub use storage::{
    shared_memory_uri, ImageStore, InMemoryStore, RawImage, ResultCollection, ResultStore,
    SqliteStore,
};
