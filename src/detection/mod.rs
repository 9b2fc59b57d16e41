pub mod contour;
pub mod contours;
pub mod preprocessing;

use std::collections::HashMap;
use std::sync::Arc;

use image::DynamicImage;
use tracing::{debug, info};

use crate::error::{Result, StationError};
use crate::models::{DetectionResult, Rect};

pub use contour::{ClassFilter, ContourDetector, ContourModelLoader, ContourParams};

/// Object detection capability.
///
/// `image` is the crop of the detect region; `offset` is that region's
/// top-left corner and must be added to every crop-local coordinate so the
/// result is in the uncropped image's space.
pub trait Detector: Send + Sync {
    fn detect(
        &self,
        image: &DynamicImage,
        class_id: u32,
        confidence: f32,
        offset: (i32, i32),
    ) -> Result<DetectionResult>;
}

/// Resolves a model name to a detector.
pub trait ModelLoader: Send {
    fn load(&self, model_name: &str) -> Result<Arc<dyn Detector>>;
}

/// Load-once cache of detectors keyed by model name. Nothing is ever evicted.
pub struct ModelCache {
    loader: Box<dyn ModelLoader>,
    models: HashMap<String, Arc<dyn Detector>>,
}

impl ModelCache {
    pub fn new(loader: Box<dyn ModelLoader>) -> Self {
        Self {
            loader,
            models: HashMap::new(),
        }
    }

    pub fn get(&mut self, model_name: &str) -> Result<Arc<dyn Detector>> {
        if let Some(model) = self.models.get(model_name) {
            debug!("model '{}' from cache", model_name);
            return Ok(model.clone());
        }

        let model = self.loader.load(model_name)?;
        info!("model '{}' loaded", model_name);
        self.models.insert(model_name.to_string(), model.clone());
        Ok(model)
    }

    pub fn cached_models(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.models.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

/// Crop `region` out of `image`. The region must lie inside the image.
pub fn crop_region(image: &DynamicImage, region: &Rect) -> Result<DynamicImage> {
    let (width, height) = (image.width() as i64, image.height() as i64);
    let inside = region.is_valid()
        && region.x1 >= 0
        && region.y1 >= 0
        && region.x2 as i64 <= width
        && region.y2 as i64 <= height;
    if !inside {
        return Err(StationError::Image(format!(
            "detect region {} outside {}x{} image",
            region, width, height
        )));
    }

    Ok(image.crop_imm(
        region.x1 as u32,
        region.y1 as u32,
        region.width() as u32,
        region.height() as u32,
    ))
}
