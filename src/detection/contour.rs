//! Classical edge-contour detector used as the built-in detection backend.
//!
//! A "model" is a small TOML file under the models directory describing the
//! preprocessing and, per class id, which edge components count as that class.

use std::path::PathBuf;
use std::sync::Arc;

use image::DynamicImage;
use serde::Deserialize;
use tracing::debug;

use super::{Detector, ModelLoader, contours, preprocessing};
use crate::error::{Result, StationError};
use crate::models::{Contour, DetectionResult};

/// Size and shape window for one class.
#[derive(Debug, Clone, Deserialize)]
pub struct ClassFilter {
    pub id: u32,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub min_width: u32,
    #[serde(default = "unbounded")]
    pub max_width: u32,
    #[serde(default)]
    pub min_height: u32,
    #[serde(default = "unbounded")]
    pub max_height: u32,
    #[serde(default)]
    pub min_aspect: f32,
    #[serde(default = "unbounded_aspect")]
    pub max_aspect: f32,
}

fn unbounded() -> u32 {
    u32::MAX
}

fn unbounded_aspect() -> f32 {
    f32::MAX
}

impl ClassFilter {
    pub fn any(id: u32) -> Self {
        Self {
            id,
            name: String::new(),
            min_width: 0,
            max_width: u32::MAX,
            min_height: 0,
            max_height: u32::MAX,
            min_aspect: 0.0,
            max_aspect: f32::MAX,
        }
    }

    pub fn matches(&self, contour: &Contour) -> bool {
        let (w, h) = (contour.width(), contour.height());
        let aspect = contour.aspect_ratio();
        w >= self.min_width
            && w <= self.max_width
            && h >= self.min_height
            && h <= self.max_height
            && aspect >= self.min_aspect
            && aspect <= self.max_aspect
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContourParams {
    #[serde(default = "default_sigma")]
    pub blur_sigma: f32,
    #[serde(default = "default_low")]
    pub low_threshold: f32,
    #[serde(default = "default_high")]
    pub high_threshold: f32,
    /// Components with fewer edge pixels are noise.
    #[serde(default = "default_min_pixels")]
    pub min_pixels: u32,
    #[serde(default)]
    pub classes: Vec<ClassFilter>,
}

fn default_sigma() -> f32 {
    1.5
}

fn default_low() -> f32 {
    50.0
}

fn default_high() -> f32 {
    100.0
}

fn default_min_pixels() -> u32 {
    10
}

impl Default for ContourParams {
    fn default() -> Self {
        Self {
            blur_sigma: default_sigma(),
            low_threshold: default_low(),
            high_threshold: default_high(),
            min_pixels: default_min_pixels(),
            classes: Vec::new(),
        }
    }
}

pub struct ContourDetector {
    params: ContourParams,
}

impl ContourDetector {
    pub fn new(params: ContourParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &ContourParams {
        &self.params
    }

    fn class_filter(&self, class_id: u32) -> Result<ClassFilter> {
        if self.params.classes.is_empty() {
            return Ok(ClassFilter::any(class_id));
        }
        self.params
            .classes
            .iter()
            .find(|c| c.id == class_id)
            .cloned()
            .ok_or_else(|| StationError::Detection(format!("class {} not defined by model", class_id)))
    }
}

impl Detector for ContourDetector {
    fn detect(
        &self,
        image: &DynamicImage,
        class_id: u32,
        confidence: f32,
        offset: (i32, i32),
    ) -> Result<DetectionResult> {
        let filter = self.class_filter(class_id)?;

        let edges = preprocessing::edge_map(
            image,
            self.params.blur_sigma,
            self.params.low_threshold,
            self.params.high_threshold,
        );
        let found = contours::find_contours(&edges, self.params.min_pixels);

        let best = found
            .iter()
            .filter(|c| filter.matches(c))
            .filter(|c| c.edge_coverage() >= confidence)
            .max_by_key(|c| c.area());

        debug!(
            "contour detector: {} components, class {} match: {}",
            found.len(),
            class_id,
            best.is_some()
        );

        Ok(match best {
            Some(contour) => DetectionResult::found(contour.to_rect(offset), contour.edge_coverage()),
            None => DetectionResult::not_found(),
        })
    }
}

/// Loads `<dir>/<model_name>.toml` as a [`ContourDetector`].
#[derive(Debug, Clone)]
pub struct ContourModelLoader {
    pub dir: PathBuf,
}

impl ContourModelLoader {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl ModelLoader for ContourModelLoader {
    fn load(&self, model_name: &str) -> Result<Arc<dyn Detector>> {
        let path = self.dir.join(format!("{}.toml", model_name));
        if !path.exists() {
            return Err(StationError::ModelNotFound(path));
        }
        let text = std::fs::read_to_string(&path)?;
        let params: ContourParams =
            toml::from_str(&text).map_err(|e| StationError::config(&path, e))?;
        Ok(Arc::new(ContourDetector::new(params)))
    }
}
