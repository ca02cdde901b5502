use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::detect::{ClassTable, YoloParams};
use crate::display::WindowSettings;
use crate::ingest::{CaptureSettings, SourceSpec};
use crate::provision::{FailurePolicy, ModelOrigin, ModelSpec};

const DEFAULT_MODEL_PATH: &str = "yolov8n-face.onnx";
const DEFAULT_SOURCE: &str = "0";
const DEFAULT_CONFIDENCE: f32 = 0.4;
const DEFAULT_IOU: f32 = 0.7;
const DEFAULT_INPUT_SIZE: u32 = 640;
const DEFAULT_MAX_DETECTIONS: usize = 300;
const DEFAULT_WINDOW_TITLE: &str = "facecam";
const DEFAULT_BACKEND: &str = "tract";

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct AppConfigFile {
    model: Option<ModelConfigFile>,
    detector: Option<DetectorConfigFile>,
    source: Option<SourceConfigFile>,
    window: Option<WindowConfigFile>,
    max_frames: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ModelConfigFile {
    path: Option<PathBuf>,
    url: Option<String>,
    sha256: Option<String>,
    on_download_failure: Option<String>,
    fallback_path: Option<PathBuf>,
    fallback_labels: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct DetectorConfigFile {
    backend: Option<String>,
    confidence: Option<f32>,
    iou_threshold: Option<f32>,
    input_size: Option<u32>,
    max_detections: Option<usize>,
    labels: Option<Vec<String>>,
    labels_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct SourceConfigFile {
    uri: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    target_fps: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct WindowConfigFile {
    title: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    headless: Option<bool>,
}

/// Where class labels come from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LabelSource {
    Inline(Vec<String>),
    File(PathBuf),
    /// The built-in 80-class COCO table.
    Coco,
}

#[derive(Clone, Debug, PartialEq)]
pub struct DetectorSettings {
    pub backend: String,
    pub confidence: f32,
    pub iou_threshold: f32,
    pub input_size: u32,
    pub max_detections: usize,
    pub labels: LabelSource,
}

#[derive(Clone, Debug, PartialEq)]
pub struct AppConfig {
    pub model: ModelSpec,
    /// Labels for the fallback model, which is usually a stock COCO export.
    pub fallback_labels: LabelSource,
    pub detector: DetectorSettings,
    pub source: String,
    pub capture: CaptureSettings,
    pub window: WindowSettings,
    pub max_frames: Option<u64>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            model: ModelSpec::local(DEFAULT_MODEL_PATH),
            fallback_labels: LabelSource::Coco,
            detector: DetectorSettings {
                backend: DEFAULT_BACKEND.to_string(),
                confidence: DEFAULT_CONFIDENCE,
                iou_threshold: DEFAULT_IOU,
                input_size: DEFAULT_INPUT_SIZE,
                max_detections: DEFAULT_MAX_DETECTIONS,
                labels: LabelSource::Inline(vec![crate::detect::FALLBACK_LABEL.to_string()]),
            },
            source: DEFAULT_SOURCE.to_string(),
            capture: CaptureSettings::default(),
            window: WindowSettings {
                title: DEFAULT_WINDOW_TITLE.to_string(),
                size: None,
                headless: false,
            },
            max_frames: None,
        }
    }
}

impl AppConfig {
    /// Load from `path`, or from `FACECAM_CONFIG` when no path is given,
    /// then apply environment overrides and validate.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let env_path = std::env::var("FACECAM_CONFIG").ok().map(PathBuf::from);
        let file_cfg = match path.map(Path::to_path_buf).or(env_path) {
            Some(path) => Some(read_config_file(&path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: AppConfigFile) -> Result<Self> {
        let mut cfg = Self::default();

        if let Some(model) = file.model {
            if let Some(path) = model.path {
                cfg.model.path = path;
            }
            if let Some(policy) = model.on_download_failure {
                cfg.model.on_failure = policy.parse()?;
            }
            cfg.model.url = model.url;
            cfg.model.sha256 = model.sha256;
            cfg.model.fallback_path = model.fallback_path;
            if let Some(labels) = model.fallback_labels {
                if labels.is_empty() {
                    return Err(anyhow!("model.fallback_labels must not be empty"));
                }
                cfg.fallback_labels = parse_label_list(labels);
            }
        }

        if let Some(det) = file.detector {
            match (det.labels, det.labels_path) {
                (Some(_), Some(_)) => {
                    return Err(anyhow!(
                        "detector.labels and detector.labels_path are exclusive"
                    ))
                }
                (Some(labels), None) => cfg.detector.labels = parse_label_list(labels),
                (None, Some(path)) => cfg.detector.labels = LabelSource::File(path),
                (None, None) => {}
            }
            if let Some(backend) = det.backend {
                cfg.detector.backend = backend;
            }
            cfg.detector.confidence = det.confidence.unwrap_or(cfg.detector.confidence);
            cfg.detector.iou_threshold = det.iou_threshold.unwrap_or(cfg.detector.iou_threshold);
            cfg.detector.input_size = det.input_size.unwrap_or(cfg.detector.input_size);
            cfg.detector.max_detections =
                det.max_detections.unwrap_or(cfg.detector.max_detections);
        }

        if let Some(src) = file.source {
            if let Some(uri) = src.uri {
                cfg.source = uri;
            }
            cfg.capture.width = src.width.unwrap_or(cfg.capture.width);
            cfg.capture.height = src.height.unwrap_or(cfg.capture.height);
            cfg.capture.target_fps = src.target_fps.unwrap_or(cfg.capture.target_fps);
        }

        if let Some(win) = file.window {
            cfg.window.size = match (win.width, win.height) {
                (Some(w), Some(h)) => Some((w, h)),
                (None, None) => None,
                _ => {
                    return Err(anyhow!(
                        "window.width and window.height must be set together"
                    ))
                }
            };
            if let Some(title) = win.title {
                cfg.window.title = title;
            }
            cfg.window.headless = win.headless.unwrap_or(false);
        }

        cfg.max_frames = file.max_frames;
        Ok(cfg)
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(source) = std::env::var("FACECAM_SOURCE") {
            if !source.trim().is_empty() {
                self.source = source;
            }
        }
        if let Ok(path) = std::env::var("FACECAM_MODEL_PATH") {
            if !path.trim().is_empty() {
                self.model.path = PathBuf::from(path);
            }
        }
        if let Ok(url) = std::env::var("FACECAM_MODEL_URL") {
            if !url.trim().is_empty() {
                self.model.url = Some(url);
            }
        }
        if let Ok(confidence) = std::env::var("FACECAM_CONFIDENCE") {
            self.detector.confidence = confidence
                .trim()
                .parse()
                .map_err(|_| anyhow!("FACECAM_CONFIDENCE must be a number in [0, 1]"))?;
        }
        if let Ok(labels) = std::env::var("FACECAM_LABELS") {
            let parsed = split_csv(&labels);
            if !parsed.is_empty() {
                self.detector.labels = parse_label_list(parsed);
            }
        }
        Ok(())
    }

    /// Check cross-field constraints. Call again after CLI overrides.
    pub fn validate(&mut self) -> Result<()> {
        crate::detect::validate_threshold(self.detector.confidence)?;
        if !(0.0..=1.0).contains(&self.detector.iou_threshold) {
            return Err(anyhow!(
                "detector.iou_threshold must be within [0, 1], got {}",
                self.detector.iou_threshold
            ));
        }
        if self.detector.input_size == 0 || self.detector.input_size % 32 != 0 {
            return Err(anyhow!(
                "detector.input_size must be a positive multiple of 32, got {}",
                self.detector.input_size
            ));
        }
        if self.detector.max_detections == 0 {
            return Err(anyhow!("detector.max_detections must be greater than zero"));
        }
        self.detector.backend = self.detector.backend.trim().to_lowercase();
        if !matches!(self.detector.backend.as_str(), "tract" | "stub") {
            return Err(anyhow!(
                "unknown detector backend '{}'; expected tract or stub",
                self.detector.backend
            ));
        }
        if self.max_frames == Some(0) {
            return Err(anyhow!("max_frames must be greater than zero when set"));
        }
        if self.model.on_failure == FailurePolicy::Fallback && self.model.fallback_path.is_none() {
            return Err(anyhow!(
                "model.on_download_failure = \"fallback\" requires model.fallback_path"
            ));
        }
        if let Some(sha) = &self.model.sha256 {
            let decoded = hex::decode(sha.trim())
                .map_err(|_| anyhow!("model.sha256 must be hex encoded"))?;
            if decoded.len() != 32 {
                return Err(anyhow!("model.sha256 must be 64 hex characters"));
            }
            self.model.sha256 = Some(sha.trim().to_lowercase());
        }
        if let Some(url) = &self.model.url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(anyhow!("model.url must be an http(s) URL, got '{}'", url));
            }
        }
        self.source_spec()?;
        Ok(())
    }

    pub fn source_spec(&self) -> Result<SourceSpec> {
        self.source
            .parse()
            .with_context(|| format!("invalid source '{}'", self.source))
    }

    pub fn model_spec(&self) -> ModelSpec {
        self.model.clone()
    }

    pub fn class_table(&self) -> Result<ClassTable> {
        load_labels(&self.detector.labels)
    }

    /// Class table for the model that was actually provisioned.
    pub fn class_table_for(&self, origin: &ModelOrigin) -> Result<ClassTable> {
        match origin {
            ModelOrigin::Fallback { .. } => load_labels(&self.fallback_labels),
            ModelOrigin::Local | ModelOrigin::Downloaded { .. } => self.class_table(),
        }
    }

    /// Decoder parameters. `num_classes` follows the class table so face
    /// models with trailing keypoint channels decode correctly.
    pub fn yolo_params(&self, classes: &ClassTable) -> YoloParams {
        YoloParams {
            iou_threshold: self.detector.iou_threshold,
            max_detections: self.detector.max_detections,
            num_classes: Some(classes.len()),
        }
    }
}

fn read_config_file(path: &Path) -> Result<AppConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("toml"))
        .unwrap_or(false);
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn load_labels(source: &LabelSource) -> Result<ClassTable> {
    match source {
        LabelSource::Inline(names) => Ok(ClassTable::new(names.iter().cloned())),
        LabelSource::File(path) => ClassTable::from_file(path),
        LabelSource::Coco => Ok(ClassTable::coco()),
    }
}

fn parse_label_list(labels: Vec<String>) -> LabelSource {
    if labels.len() == 1 && labels[0].eq_ignore_ascii_case("coco") {
        LabelSource::Coco
    } else {
        LabelSource::Inline(labels)
    }
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.model.path, PathBuf::from("yolov8n-face.onnx"));
        assert_eq!(cfg.model.url, None);
        assert_eq!(cfg.model.on_failure, FailurePolicy::Abort);
        assert_eq!(cfg.source, "0");
        assert_eq!(cfg.detector.confidence, 0.4);
        assert_eq!(cfg.detector.iou_threshold, 0.7);
        assert_eq!(cfg.detector.input_size, 640);
        assert_eq!(cfg.detector.max_detections, 300);
        assert_eq!(cfg.window.title, "facecam");
        assert_eq!(
            cfg.detector.labels,
            LabelSource::Inline(vec!["face".to_string()])
        );
    }

    #[test]
    fn coco_keyword_selects_builtin_table() -> Result<()> {
        assert_eq!(parse_label_list(vec!["COCO".into()]), LabelSource::Coco);
        let mut cfg = AppConfig::default();
        cfg.detector.labels = LabelSource::Coco;
        assert_eq!(cfg.class_table()?.len(), 80);
        assert_eq!(cfg.yolo_params(&cfg.class_table()?).num_classes, Some(80));
        Ok(())
    }

    #[test]
    fn fallback_model_gets_its_own_class_table() -> Result<()> {
        use crate::detect::preprocess::Letterbox;
        use crate::detect::yolo;

        let cfg = AppConfig::default();
        let primary = cfg.class_table_for(&ModelOrigin::Local)?;
        assert_eq!(primary.len(), 1);
        assert_eq!(
            cfg.class_table_for(&ModelOrigin::Downloaded { bytes: 1 })?.len(),
            1
        );

        let fallback = cfg.class_table_for(&ModelOrigin::Fallback {
            reason: "offline".into(),
        })?;
        assert_eq!(fallback.len(), 80);

        // COCO output: 4 box rows + 80 class rows, one car anchor.
        let anchors = 100;
        let mut data = vec![0.0f32; 84 * anchors];
        for (row, value) in [(0, 320.0), (1, 320.0), (2, 64.0), (3, 48.0), (4 + 2, 0.95)] {
            data[row * anchors] = value;
        }
        let geometry = Letterbox::for_frame(640, 640, 640);

        let dets = yolo::decode(
            &[1, 84, anchors],
            &data,
            &geometry,
            0.4,
            &cfg.yolo_params(&fallback),
        )?;
        assert_eq!(dets.len(), 1);
        assert_eq!(dets[0].class_index, 2);
        assert_eq!(fallback.label(dets[0].class_index), "car");

        let misread = yolo::decode(
            &[1, 84, anchors],
            &data,
            &geometry,
            0.4,
            &cfg.yolo_params(&primary),
        )?;
        assert!(misread.is_empty());
        Ok(())
    }

    #[test]
    fn validate_rejects_bad_values() {
        let mut cfg = AppConfig::default();
        cfg.detector.confidence = 1.2;
        assert!(cfg.validate().is_err());

        let mut cfg = AppConfig::default();
        cfg.detector.input_size = 600;
        assert!(cfg.validate().is_err());

        let mut cfg = AppConfig::default();
        cfg.model.on_failure = FailurePolicy::Fallback;
        assert!(cfg.validate().is_err());

        let mut cfg = AppConfig::default();
        cfg.model.sha256 = Some("abcd".into());
        assert!(cfg.validate().is_err());

        let mut cfg = AppConfig::default();
        cfg.source = "rtsp://camera".into();
        assert!(cfg.validate().is_err());
    }
}
