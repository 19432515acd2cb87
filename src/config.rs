use std::path::Path;

use serde::Deserialize;

use crate::classes::{ClassRegistry, ViolationClass};
use crate::error::{Error, Result};
use crate::filter::FilterConfig;
use crate::track::TrackerConfig;

const DEFAULT_DB_PATH: &str = "citywatch.db";
const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.5;
const DEFAULT_IOU_THRESHOLD: f32 = 0.45;

#[derive(Debug, Deserialize, Default)]
struct CitywatchConfigFile {
    db_path: Option<String>,
    thresholds: Option<ThresholdConfigFile>,
    tracker: Option<TrackerConfigFile>,
    classes: Option<Vec<ViolationClass>>,
}

#[derive(Debug, Deserialize, Default)]
struct ThresholdConfigFile {
    confidence: Option<f32>,
    iou: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct TrackerConfigFile {
    association_iou: Option<f32>,
    confirm_hits: Option<u32>,
    max_gap_frames: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct CitywatchConfig {
    pub db_path: String,
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
    pub tracker: TrackerConfig,
    pub classes: Vec<ViolationClass>,
}

impl CitywatchConfig {
    /// Load from the file named by `CITYWATCH_CONFIG` (when set), then apply
    /// env overrides, then validate.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("CITYWATCH_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: CitywatchConfigFile) -> Self {
        let defaults = TrackerConfig::default();
        let tracker = TrackerConfig {
            association_iou: file
                .tracker
                .as_ref()
                .and_then(|t| t.association_iou)
                .unwrap_or(defaults.association_iou),
            confirm_hits: file
                .tracker
                .as_ref()
                .and_then(|t| t.confirm_hits)
                .unwrap_or(defaults.confirm_hits),
            max_gap_frames: file
                .tracker
                .as_ref()
                .and_then(|t| t.max_gap_frames)
                .unwrap_or(defaults.max_gap_frames),
        };
        Self {
            db_path: file.db_path.unwrap_or_else(|| DEFAULT_DB_PATH.to_string()),
            confidence_threshold: file
                .thresholds
                .as_ref()
                .and_then(|t| t.confidence)
                .unwrap_or(DEFAULT_CONFIDENCE_THRESHOLD),
            iou_threshold: file
                .thresholds
                .as_ref()
                .and_then(|t| t.iou)
                .unwrap_or(DEFAULT_IOU_THRESHOLD),
            tracker,
            classes: file.classes.unwrap_or_else(ClassRegistry::default_classes),
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(path) = std::env::var("CITYWATCH_DB_PATH") {
            if !path.trim().is_empty() {
                self.db_path = path;
            }
        }
        if let Ok(raw) = std::env::var("CITYWATCH_CONFIDENCE_THRESHOLD") {
            self.confidence_threshold = raw.parse().map_err(|_| {
                Error::Config("CITYWATCH_CONFIDENCE_THRESHOLD must be a float".to_string())
            })?;
        }
        if let Ok(raw) = std::env::var("CITYWATCH_IOU_THRESHOLD") {
            self.iou_threshold = raw
                .parse()
                .map_err(|_| Error::Config("CITYWATCH_IOU_THRESHOLD must be a float".to_string()))?;
        }
        if let Ok(raw) = std::env::var("CITYWATCH_CONFIRM_HITS") {
            self.tracker.confirm_hits = raw
                .parse()
                .map_err(|_| Error::Config("CITYWATCH_CONFIRM_HITS must be an integer".to_string()))?;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        self.filter_config().validate()?;
        self.tracker.validate()?;
        // Surfaces duplicate ids and empty names early.
        ClassRegistry::new(self.classes.clone())?;
        Ok(())
    }

    pub fn filter_config(&self) -> FilterConfig {
        FilterConfig {
            confidence_threshold: self.confidence_threshold,
            iou_threshold: self.iou_threshold,
        }
    }

    pub fn class_registry(&self) -> Result<ClassRegistry> {
        ClassRegistry::new(self.classes.clone())
    }
}

fn read_config_file(path: &Path) -> Result<CitywatchConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("failed to read config file {}: {}", path.display(), e)))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| Error::Config(format!("invalid config file {}: {}", path.display(), e)))?;
    Ok(cfg)
}
