//! Inspection rules and the per-product rule files they are loaded from.
//!
//! One CSV row describes one inspection zone. Rows that fail to parse are
//! skipped with a warning; the rest of the file still loads.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{Result, StationError};
use crate::models::Rect;

/// Angle check between two keypoints, all angles in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KeypointAngleSpec {
    pub idx1: usize,
    pub idx2: usize,
    pub expected_angle: f64,
    pub tolerance: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RuleKind {
    /// Region containment only.
    DetectionOnly,
    /// Region containment plus the keypoint angle check.
    KeypointAngle(KeypointAngleSpec),
}

#[derive(Debug, Clone, PartialEq)]
pub struct InspectionRule {
    pub rule_id: String,
    pub camera: String,
    pub model_name: String,
    pub class_id: u32,
    pub class_name: String,
    pub detect_region: Rect,
    pub compare_region: Rect,
    pub confidence: f32,
    pub kind: RuleKind,
}

impl InspectionRule {
    pub fn keypoint_spec(&self) -> Option<&KeypointAngleSpec> {
        match &self.kind {
            RuleKind::DetectionOnly => None,
            RuleKind::KeypointAngle(spec) => Some(spec),
        }
    }
}

/// Raw CSV row, before validation.
#[derive(Debug, Deserialize)]
struct RuleRecord {
    roi_id: String,
    camera: String,
    model_name: String,
    class_id: u32,
    class_name: String,
    detect_x_min: i32,
    detect_y_min: i32,
    detect_x_max: i32,
    detect_y_max: i32,
    compare_x_min: i32,
    compare_y_min: i32,
    compare_x_max: i32,
    compare_y_max: i32,
    confidence: f32,
    #[serde(default)]
    keypoint_idx_1: Option<usize>,
    #[serde(default)]
    keypoint_idx_2: Option<usize>,
    #[serde(default)]
    expected_angle: Option<f64>,
    #[serde(default)]
    angle_tolerance: Option<f64>,
}

impl RuleRecord {
    fn into_rule(self, line: usize) -> Result<InspectionRule> {
        let parse_err = |message: String| StationError::RuleParse { line, message };

        if self.roi_id.is_empty() || self.camera.is_empty() || self.model_name.is_empty() {
            return Err(parse_err("roi_id, camera and model_name are required".into()));
        }

        let detect_region = Rect::new(
            self.detect_x_min,
            self.detect_y_min,
            self.detect_x_max,
            self.detect_y_max,
        );
        let compare_region = Rect::new(
            self.compare_x_min,
            self.compare_y_min,
            self.compare_x_max,
            self.compare_y_max,
        );
        if !detect_region.is_valid() {
            return Err(parse_err(format!("inverted detect region {}", detect_region)));
        }
        if !compare_region.is_valid() {
            return Err(parse_err(format!("inverted compare region {}", compare_region)));
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(parse_err(format!(
                "confidence {} outside [0, 1]",
                self.confidence
            )));
        }

        let kind = match (
            self.keypoint_idx_1,
            self.keypoint_idx_2,
            self.expected_angle,
            self.angle_tolerance,
        ) {
            (None, None, None, None) => RuleKind::DetectionOnly,
            (Some(idx1), Some(idx2), Some(expected_angle), Some(tolerance)) => {
                RuleKind::KeypointAngle(KeypointAngleSpec {
                    idx1,
                    idx2,
                    expected_angle,
                    tolerance,
                })
            }
            _ => {
                return Err(parse_err(
                    "keypoint_idx_1, keypoint_idx_2, expected_angle and angle_tolerance must be set together".into(),
                ));
            }
        };

        if !detect_region.contains_rect(&compare_region) {
            warn!(
                "rule {}: compare region {} is not inside detect region {}",
                self.roi_id, compare_region, detect_region
            );
        }

        Ok(InspectionRule {
            rule_id: self.roi_id,
            camera: self.camera,
            model_name: self.model_name,
            class_id: self.class_id,
            class_name: self.class_name,
            detect_region,
            compare_region,
            confidence: self.confidence,
            kind,
        })
    }
}

/// Ordered rules of one product, partitioned by camera name.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<InspectionRule>,
}

impl RuleSet {
    pub fn new(rules: Vec<InspectionRule>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &[InspectionRule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Rules owned by `camera`, in file order.
    pub fn for_camera<'a>(&'a self, camera: &'a str) -> impl Iterator<Item = &'a InspectionRule> + 'a {
        self.rules.iter().filter(move |r| r.camera == camera)
    }

    /// Camera names in order of first appearance.
    pub fn cameras(&self) -> Vec<String> {
        let mut cameras: Vec<String> = Vec::new();
        for rule in &self.rules {
            if !cameras.iter().any(|c| c == &rule.camera) {
                cameras.push(rule.camera.clone());
            }
        }
        cameras
    }

    /// Load a rule file. A missing or unreadable file is a `Config` error;
    /// individual bad rows are skipped.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(StationError::config(path, "rule file not found"));
        }

        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_path(path)
            .map_err(|e| StationError::config(path, e))?;

        let mut rules = Vec::new();
        for (index, record) in reader.deserialize::<RuleRecord>().enumerate() {
            // Header is line 1
            let line = index + 2;
            let parsed = record
                .map_err(|e| StationError::RuleParse {
                    line,
                    message: e.to_string(),
                })
                .and_then(|r| r.into_rule(line));

            match parsed {
                Ok(rule) => rules.push(rule),
                Err(e) => warn!("{}: skipping {}", path.display(), e),
            }
        }

        debug!("{}: loaded {} rules", path.display(), rules.len());
        Ok(Self { rules })
    }
}

/// Source of rule sets, keyed by product code.
pub trait RuleStore: Send {
    fn load(&self, product_code: &str) -> Result<RuleSet>;

    /// Where rules for `product_code` come from, for log lines.
    fn describe(&self, product_code: &str) -> String;
}

/// Rule files on disk, one per product, located through a `{code}` path template.
#[derive(Debug, Clone)]
pub struct CsvRuleStore {
    pub path_template: String,
}

impl CsvRuleStore {
    pub fn new(path_template: impl Into<String>) -> Self {
        Self {
            path_template: path_template.into(),
        }
    }

    pub fn path_for(&self, product_code: &str) -> PathBuf {
        PathBuf::from(self.path_template.replace("{code}", product_code))
    }
}

impl RuleStore for CsvRuleStore {
    fn load(&self, product_code: &str) -> Result<RuleSet> {
        RuleSet::load(&self.path_for(product_code))
    }

    fn describe(&self, product_code: &str) -> String {
        self.path_for(product_code).display().to_string()
    }
}
