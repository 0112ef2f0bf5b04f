mod backend;
mod backends;
mod classifier;
mod registry;
mod result;

pub use backend::DetectorBackend;
pub use backends::{StubBackend, DEFAULT_NMS_IOU_THRESHOLD, DEFAULT_SCORE_THRESHOLD};
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use classifier::{Classification, DetectionClassifier, Verdict, DEFAULT_CONFIDENCE_THRESHOLD};
pub use registry::{BackendRegistry, SharedDetector};
pub use result::{BoundingBox, ClassNames, DetectionCandidate};
