pub mod stub;

/// Model-level score pre-filter applied before NMS.
pub const DEFAULT_SCORE_THRESHOLD: f32 = 0.25;
/// IoU above which same-class boxes are suppressed.
pub const DEFAULT_NMS_IOU_THRESHOLD: f32 = 0.45;

#[cfg(feature = "backend-tract")]
pub mod tract;

pub use stub::StubBackend;

#[cfg(feature = "backend-tract")]
pub use tract::TractBackend;
