use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::annotate::AnnotationStyle;
use crate::detect::{
    BackendRegistry, ClassNames, StubBackend, DEFAULT_CONFIDENCE_THRESHOLD,
    DEFAULT_NMS_IOU_THRESHOLD, DEFAULT_SCORE_THRESHOLD,
};
use crate::model::KnownClass;
use crate::pipeline::PipelineSettings;

const DEFAULT_DB_PATH: &str = "images.db";
const DEFAULT_API_ADDR: &str = "127.0.0.1:5000";
const DEFAULT_BACKEND: &str = "stub";
const DEFAULT_INPUT_SIZE: u32 = 640;

#[derive(Debug, Deserialize, Default)]
struct DetectdConfigFile {
    db_path: Option<String>,
    api: Option<ApiConfigFile>,
    detector: Option<DetectorConfigFile>,
    classifier: Option<ClassifierConfigFile>,
    annotation: Option<AnnotationConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct ApiConfigFile {
    addr: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    backend: Option<String>,
    model_path: Option<PathBuf>,
    input_size: Option<u32>,
    class_names: Option<Vec<String>>,
    score_threshold: Option<f32>,
    iou_threshold: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct ClassifierConfigFile {
    confidence_threshold: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct AnnotationConfigFile {
    color: Option<[u8; 3]>,
    thickness: Option<u32>,
    jpeg_quality: Option<u8>,
}

#[derive(Debug, Clone)]
pub struct DetectdConfig {
    pub db_path: String,
    pub api_addr: String,
    pub detector: DetectorSettings,
    pub confidence_threshold: f32,
    pub annotation: AnnotationStyle,
}

#[derive(Debug, Clone)]
pub struct DetectorSettings {
    pub backend: String,
    pub model_path: Option<PathBuf>,
    pub input_size: u32,
    pub class_names: Vec<String>,
    /// Model-level pre-filter, distinct from the classifier's acceptance threshold.
    pub score_threshold: f32,
    pub iou_threshold: f32,
}

impl DetectorSettings {
    pub fn class_table(&self) -> ClassNames {
        ClassNames::new(self.class_names.iter().cloned())
    }

    /// Build a registry whose default backend is the configured one.
    pub fn build_registry(&self) -> Result<BackendRegistry> {
        let mut registry = BackendRegistry::new();
        match self.backend.as_str() {
            "stub" => {
                registry.register(StubBackend::new().with_class_names(self.class_table()));
            }
            "tract" => self.register_tract(&mut registry)?,
            other => return Err(anyhow!("unknown detector backend '{}'", other)),
        }
        registry.set_default(&self.backend)?;
        Ok(registry)
    }

    #[cfg(feature = "backend-tract")]
    fn register_tract(&self, registry: &mut BackendRegistry) -> Result<()> {
        let model_path = self
            .model_path
            .as_ref()
            .ok_or_else(|| anyhow!("detector backend 'tract' requires model_path"))?;
        let backend =
            crate::detect::TractBackend::new(model_path, self.input_size, self.class_table())?
                .with_score_threshold(self.score_threshold)
                .with_iou_threshold(self.iou_threshold);
        registry.register(backend);
        Ok(())
    }

    #[cfg(not(feature = "backend-tract"))]
    fn register_tract(&self, _registry: &mut BackendRegistry) -> Result<()> {
        Err(anyhow!(
            "detector backend 'tract' requires building with --features backend-tract"
        ))
    }
}

impl DetectdConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("DETECT_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            confidence_threshold: self.confidence_threshold,
            annotation: self.annotation,
        }
    }

    fn from_file(file: DetectdConfigFile) -> Self {
        let db_path = file.db_path.unwrap_or_else(|| DEFAULT_DB_PATH.to_string());
        let api_addr = file
            .api
            .and_then(|api| api.addr)
            .unwrap_or_else(|| DEFAULT_API_ADDR.to_string());
        let detector_file = file.detector.unwrap_or_default();
        let detector = DetectorSettings {
            backend: detector_file
                .backend
                .unwrap_or_else(|| DEFAULT_BACKEND.to_string()),
            model_path: detector_file.model_path,
            input_size: detector_file.input_size.unwrap_or(DEFAULT_INPUT_SIZE),
            class_names: detector_file.class_names.unwrap_or_else(|| {
                KnownClass::ALL
                    .iter()
                    .map(|class| class.as_str().to_string())
                    .collect()
            }),
            score_threshold: detector_file
                .score_threshold
                .unwrap_or(DEFAULT_SCORE_THRESHOLD),
            iou_threshold: detector_file
                .iou_threshold
                .unwrap_or(DEFAULT_NMS_IOU_THRESHOLD),
        };
        let confidence_threshold = file
            .classifier
            .and_then(|classifier| classifier.confidence_threshold)
            .unwrap_or(DEFAULT_CONFIDENCE_THRESHOLD);
        let defaults = AnnotationStyle::default();
        let annotation_file = file.annotation.unwrap_or_default();
        let annotation = AnnotationStyle {
            color: annotation_file.color.unwrap_or(defaults.color),
            thickness: annotation_file.thickness.unwrap_or(defaults.thickness),
            jpeg_quality: annotation_file.jpeg_quality.unwrap_or(defaults.jpeg_quality),
        };
        Self {
            db_path,
            api_addr,
            detector,
            confidence_threshold,
            annotation,
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(path) = std::env::var("DETECT_DB_PATH") {
            if !path.trim().is_empty() {
                self.db_path = path;
            }
        }
        if let Ok(addr) = std::env::var("DETECT_API_ADDR") {
            if !addr.trim().is_empty() {
                self.api_addr = addr;
            }
        }
        if let Ok(backend) = std::env::var("DETECT_BACKEND") {
            if !backend.trim().is_empty() {
                self.detector.backend = backend.trim().to_string();
            }
        }
        if let Ok(path) = std::env::var("DETECT_MODEL_PATH") {
            if !path.trim().is_empty() {
                self.detector.model_path = Some(PathBuf::from(path));
            }
        }
        if let Ok(threshold) = std::env::var("DETECT_CONFIDENCE_THRESHOLD") {
            self.confidence_threshold = threshold.trim().parse().map_err(|_| {
                anyhow!("DETECT_CONFIDENCE_THRESHOLD must be a number between 0 and 1")
            })?;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(anyhow!(
                "confidence threshold {} must be within [0, 1]",
                self.confidence_threshold
            ));
        }
        if !(1..=100).contains(&self.annotation.jpeg_quality) {
            return Err(anyhow!("annotation jpeg_quality must be within 1..=100"));
        }
        if self.detector.input_size == 0 {
            return Err(anyhow!("detector input_size must be greater than zero"));
        }
        if !(0.0..=1.0).contains(&self.detector.score_threshold) {
            return Err(anyhow!("detector score_threshold must be within [0, 1]"));
        }
        if !(0.0..=1.0).contains(&self.detector.iou_threshold) {
            return Err(anyhow!("detector iou_threshold must be within [0, 1]"));
        }
        if self.detector.class_names.is_empty() {
            return Err(anyhow!("detector class_names must not be empty"));
        }
        match self.detector.backend.as_str() {
            "stub" => {}
            "tract" => {
                if self.detector.model_path.is_none() {
                    return Err(anyhow!("detector backend 'tract' requires model_path"));
                }
            }
            other => return Err(anyhow!("unknown detector backend '{}'", other)),
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<DetectdConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}
