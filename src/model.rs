//! Per-image outcome types.
//!
//! `ImageResult` is the persisted unit: one document per processed image,
//! written once into either the success or the failure collection.

use std::fmt;
use std::str::FromStr;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use crate::detect::BoundingBox;

/// Length of a hex-encoded image identifier (12 bytes).
pub const IMAGE_ID_HEX_LEN: usize = 24;

/// Caller-supplied image identifier.
///
/// Keeps the caller's spelling verbatim; lookups go through [`ImageId::key`].
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ImageId {
    raw: String,
    key: String,
}

impl ImageId {
    /// Validate an identifier: exactly 24 hex characters.
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.len() != IMAGE_ID_HEX_LEN {
            return Err(anyhow!(
                "image id '{}' must be {} hex characters",
                raw,
                IMAGE_ID_HEX_LEN
            ));
        }
        hex::decode(raw).map_err(|e| anyhow!("image id '{}' is not hex: {}", raw, e))?;
        Ok(Self {
            raw: raw.to_string(),
            key: raw.to_ascii_lowercase(),
        })
    }

    /// Build an identifier from 12 raw bytes.
    pub fn from_bytes(bytes: [u8; 12]) -> Self {
        let key = hex::encode(bytes);
        Self {
            raw: key.clone(),
            key,
        }
    }

    /// The identifier exactly as supplied.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Canonical lowercase form used as the storage key.
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl fmt::Display for ImageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Classes tallied in [`ObjectCounts`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum KnownClass {
    Deer,
    Pig,
    Racoon,
}

impl KnownClass {
    pub const ALL: [KnownClass; 3] = [KnownClass::Deer, KnownClass::Pig, KnownClass::Racoon];

    pub fn as_str(self) -> &'static str {
        match self {
            KnownClass::Deer => "deer",
            KnownClass::Pig => "pig",
            KnownClass::Racoon => "racoon",
        }
    }

    /// Exact-match lookup; anything else is not a known class.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|class| class.as_str() == name)
    }
}

/// Accepted-detection count per known class.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectCounts {
    pub deer: u32,
    pub pig: u32,
    pub racoon: u32,
}

impl ObjectCounts {
    pub fn increment(&mut self, class: KnownClass) {
        match class {
            KnownClass::Deer => self.deer += 1,
            KnownClass::Pig => self.pig += 1,
            KnownClass::Racoon => self.racoon += 1,
        }
    }

    pub fn get(&self, class: KnownClass) -> u32 {
        match class {
            KnownClass::Deer => self.deer,
            KnownClass::Pig => self.pig,
            KnownClass::Racoon => self.racoon,
        }
    }

    pub fn total(&self) -> u32 {
        self.deer + self.pig + self.racoon
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

/// Detection that passed the confidence threshold.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClassifiedDetection {
    pub class_name: String,
    /// Confidence rescaled to `[0, 100]`.
    pub confidence_percent: f32,
    pub bbox: BoundingBox,
}

/// Why an image ended up in the failure collection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureReason {
    NoObjectsDetected,
    BelowThreshold,
    DecodeError,
    DetectorError,
}

impl FailureReason {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureReason::NoObjectsDetected => "no objects detected",
            FailureReason::BelowThreshold => "no detections above confidence threshold",
            FailureReason::DecodeError => "decode error",
            FailureReason::DetectorError => "detector error",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FailureReason {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        [
            FailureReason::NoObjectsDetected,
            FailureReason::BelowThreshold,
            FailureReason::DecodeError,
            FailureReason::DetectorError,
        ]
        .into_iter()
        .find(|reason| reason.as_str() == s)
        .ok_or_else(|| anyhow!("unknown failure reason '{}'", s))
    }
}

impl Serialize for FailureReason {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for FailureReason {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Outcome for an image with at least one accepted detection.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SuccessResult {
    pub image_id: String,
    pub filename: String,
    #[serde(with = "base64_bytes")]
    pub annotated_image: Vec<u8>,
    pub detections: Vec<ClassifiedDetection>,
    pub object_counts: ObjectCounts,
}

/// Outcome for an image with no accepted detection, or one that could not be processed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FailedResult {
    pub image_id: String,
    pub filename: String,
    /// Re-encoded copy of the image; absent when the image never decoded.
    #[serde(with = "base64_bytes::option", default)]
    pub annotated_image: Option<Vec<u8>>,
    pub object_counts: ObjectCounts,
    pub reason: FailureReason,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    Success,
    Failed,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Success => "Success",
            Status::Failed => "Failed",
        }
    }
}

/// Persisted per-image outcome.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status")]
pub enum ImageResult {
    Success(SuccessResult),
    Failed(FailedResult),
}

impl ImageResult {
    pub fn status(&self) -> Status {
        match self {
            ImageResult::Success(_) => Status::Success,
            ImageResult::Failed(_) => Status::Failed,
        }
    }

    pub fn image_id(&self) -> &str {
        match self {
            ImageResult::Success(r) => &r.image_id,
            ImageResult::Failed(r) => &r.image_id,
        }
    }

    pub fn filename(&self) -> &str {
        match self {
            ImageResult::Success(r) => &r.filename,
            ImageResult::Failed(r) => &r.filename,
        }
    }

    /// Accepted detections; always empty for failed results.
    pub fn detections(&self) -> &[ClassifiedDetection] {
        match self {
            ImageResult::Success(r) => &r.detections,
            ImageResult::Failed(_) => &[],
        }
    }

    pub fn object_counts(&self) -> ObjectCounts {
        match self {
            ImageResult::Success(r) => r.object_counts,
            ImageResult::Failed(r) => r.object_counts,
        }
    }

    pub fn annotated_image(&self) -> Option<&[u8]> {
        match self {
            ImageResult::Success(r) => Some(&r.annotated_image),
            ImageResult::Failed(r) => r.annotated_image.as_deref(),
        }
    }

    pub fn failure_reason(&self) -> Option<FailureReason> {
        match self {
            ImageResult::Success(_) => None,
            ImageResult::Failed(r) => Some(r.reason),
        }
    }
}

/// Binary payloads as standard base64 in text formats.
pub(crate) mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }

    pub mod option {
        use super::*;

        pub fn serialize<S: Serializer>(
            bytes: &Option<Vec<u8>>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match bytes {
                Some(bytes) => serializer.serialize_some(&STANDARD.encode(bytes)),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<Vec<u8>>, D::Error> {
            let encoded: Option<String> = Option::deserialize(deserializer)?;
            encoded
                .map(|s| STANDARD.decode(s.as_bytes()))
                .transpose()
                .map_err(serde::de::Error::custom)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_id_keeps_caller_spelling() {
        let id = ImageId::parse("678DEF6F3D9346A8A2D5302C").unwrap();
        assert_eq!(id.as_str(), "678DEF6F3D9346A8A2D5302C");
        assert_eq!(id.key(), "678def6f3d9346a8a2d5302c");
    }

    #[test]
    fn image_id_rejects_malformed_input() {
        assert!(ImageId::parse("not-an-id").is_err());
        assert!(ImageId::parse("678def6f3d9346a8a2d5302").is_err());
        assert!(ImageId::parse("678def6f3d9346a8a2d5302z").is_err());
    }

    #[test]
    fn known_class_lookup_is_exact() {
        assert_eq!(KnownClass::from_name("deer"), Some(KnownClass::Deer));
        assert_eq!(KnownClass::from_name("Deer"), None);
        assert_eq!(KnownClass::from_name("raccoon"), None);
    }

    #[test]
    fn failure_reason_strings_round_trip() {
        for reason in [
            FailureReason::NoObjectsDetected,
            FailureReason::BelowThreshold,
            FailureReason::DecodeError,
            FailureReason::DetectorError,
        ] {
            assert_eq!(reason.as_str().parse::<FailureReason>().unwrap(), reason);
        }
        assert!("oops".parse::<FailureReason>().is_err());
    }

    #[test]
    fn json_exposes_binary_as_base64() {
        let result = ImageResult::Failed(FailedResult {
            image_id: "678def6f3d9346a8a2d5302c".to_string(),
            filename: "cam1.jpg".to_string(),
            annotated_image: Some(vec![0xff, 0xd8, 0xff]),
            object_counts: ObjectCounts::default(),
            reason: FailureReason::NoObjectsDetected,
        });
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["status"], "Failed");
        assert_eq!(value["annotated_image"], "/9j/");
        assert_eq!(value["reason"], "no objects detected");

        let back: ImageResult = serde_json::from_value(value).unwrap();
        assert_eq!(back, result);
    }
}
