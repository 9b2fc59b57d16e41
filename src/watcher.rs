//! Per-camera image drop folder watcher.
//!
//! Files are tracked by name only. Whatever is in the folder when the watcher
//! is created is treated as already seen, so a restart never replays old images.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::error::Result;

const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

/// One newly arrived image, copied out of the drop folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraImageSample {
    pub camera: String,
    pub file_name: String,
    pub source_path: PathBuf,
    pub temp_path: PathBuf,
}

pub fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.iter().any(|known| ext.eq_ignore_ascii_case(known)))
        .unwrap_or(false)
}

/// Non-blocking watcher over one camera's drop folder.
#[derive(Debug)]
pub struct ImageWatcher {
    camera: String,
    watch_folder: PathBuf,
    temp_folder: PathBuf,
    seen: HashSet<String>,
}

impl ImageWatcher {
    /// Create both folders if needed and mark their current images as seen.
    pub fn new(
        camera: impl Into<String>,
        watch_folder: impl Into<PathBuf>,
        temp_folder: impl Into<PathBuf>,
    ) -> Result<Self> {
        let mut watcher = Self {
            camera: camera.into(),
            watch_folder: watch_folder.into(),
            temp_folder: temp_folder.into(),
            seen: HashSet::new(),
        };
        std::fs::create_dir_all(&watcher.watch_folder)?;
        std::fs::create_dir_all(&watcher.temp_folder)?;
        watcher.mark_existing();

        info!(
            "watching {} for camera {} (temp: {})",
            watcher.watch_folder.display(),
            watcher.camera,
            watcher.temp_folder.display()
        );
        Ok(watcher)
    }

    pub fn camera(&self) -> &str {
        &self.camera
    }

    pub fn seen_count(&self) -> usize {
        self.seen.len()
    }

    fn list_images(&self) -> std::io::Result<Vec<(String, PathBuf)>> {
        let mut images = Vec::new();
        for entry in std::fs::read_dir(&self.watch_folder)? {
            let entry = entry?;
            let path = entry.path();
            if !path.is_file() || !is_image_file(&path) {
                continue;
            }
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                images.push((name.to_string(), path.clone()));
            }
        }
        images.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(images)
    }

    fn mark_existing(&mut self) {
        match self.list_images() {
            Ok(existing) => {
                if !existing.is_empty() {
                    info!(
                        "camera {}: ignoring {} existing files",
                        self.camera,
                        existing.len()
                    );
                }
                self.seen.extend(existing.into_iter().map(|(name, _)| name));
            }
            Err(e) => warn!("camera {}: cannot scan {}: {}", self.camera, self.watch_folder.display(), e),
        }
    }

    /// Return every image that appeared since the last call, each exactly once.
    /// A file whose copy fails is forgotten again so the next poll retries it.
    pub fn poll_new(&mut self) -> Vec<CameraImageSample> {
        let images = match self.list_images() {
            Ok(images) => images,
            Err(e) => {
                warn!("camera {}: scan failed: {}", self.camera, e);
                return Vec::new();
            }
        };

        let mut samples = Vec::new();
        for (name, source_path) in images {
            if !self.seen.insert(name.clone()) {
                continue;
            }

            let temp_path = self.temp_folder.join(&name);
            match std::fs::copy(&source_path, &temp_path) {
                Ok(_) => {
                    debug!("camera {}: new image {}", self.camera, name);
                    samples.push(CameraImageSample {
                        camera: self.camera.clone(),
                        file_name: name,
                        source_path,
                        temp_path,
                    });
                }
                Err(e) => {
                    warn!("camera {}: copy failed for {}: {}", self.camera, name, e);
                    self.seen.remove(&name);
                }
            }
        }
        samples
    }

    /// Remove the isolated copy of a sample.
    pub fn cleanup(&self, sample: &CameraImageSample) {
        if sample.temp_path.exists() {
            if let Err(e) = std::fs::remove_file(&sample.temp_path) {
                warn!("camera {}: cleanup of {} failed: {}", self.camera, sample.temp_path.display(), e);
            }
        }
    }

    /// Forget everything and re-mark the folder's current content as seen.
    pub fn reset(&mut self) {
        self.seen.clear();
        self.mark_existing();
        info!("camera {}: watcher reset", self.camera);
    }
}
