//! Batch synchronizer and the station's main loop.
//!
//! One iteration: check for a product change, poll the cameras that still owe
//! an image, refresh the display, and run the batch once every required camera
//! has contributed exactly one image.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use image::DynamicImage;
use time::OffsetDateTime;
use tracing::{debug, error, info, warn};

use crate::aggregate::aggregate;
use crate::detection::{ModelCache, crop_region};
use crate::display::{DisplayAction, DisplaySink};
use crate::error::Result;
use crate::evaluator::evaluate;
use crate::models::{BatchMeta, RuleOutcome, Verdict};
use crate::profile::{ProductProfile, ProfileChange, ProfileManager};
use crate::report::{AnnotatedImageWriter, ResultLog, batch_stamp};
use crate::rules::InspectionRule;
use crate::serial::{ProductCodeReader, SerialOutput};
use crate::watcher::{CameraImageSample, ImageWatcher};

/// Image accepted into the current batch.
#[derive(Debug, Clone)]
pub struct CapturedImage {
    pub sample: CameraImageSample,
    pub image: Arc<DynamicImage>,
}

/// Collects one image per required camera.
#[derive(Debug, Default)]
pub struct BatchSynchronizer {
    required: Vec<String>,
    images: HashMap<String, CapturedImage>,
}

impl BatchSynchronizer {
    pub fn new(required: Vec<String>) -> Self {
        Self {
            required,
            images: HashMap::new(),
        }
    }

    pub fn required(&self) -> &[String] {
        &self.required
    }

    /// Required cameras that have not contributed an image yet, in order.
    pub fn missing(&self) -> Vec<&str> {
        self.required
            .iter()
            .filter(|c| !self.images.contains_key(c.as_str()))
            .map(String::as_str)
            .collect()
    }

    pub fn has_image(&self, camera: &str) -> bool {
        self.images.contains_key(camera)
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    /// Accept `image` for `camera`. Returns `false`, leaving state untouched,
    /// when the camera is not required or already has an image.
    pub fn offer(&mut self, camera: &str, image: CapturedImage) -> bool {
        if !self.required.iter().any(|c| c == camera) || self.images.contains_key(camera) {
            return false;
        }
        self.images.insert(camera.to_string(), image);
        true
    }

    pub fn is_ready(&self) -> bool {
        !self.required.is_empty() && self.images.len() == self.required.len()
    }

    /// Hand out the complete batch in required-camera order and start over.
    pub fn take_batch(&mut self) -> Option<Vec<(String, CapturedImage)>> {
        if !self.is_ready() {
            return None;
        }
        let mut images = std::mem::take(&mut self.images);
        Some(
            self.required
                .iter()
                .filter_map(|camera| images.remove(camera).map(|img| (camera.clone(), img)))
                .collect(),
        )
    }

    /// Drop accumulated images and switch to a new camera set.
    pub fn reset(&mut self, required: Vec<String>) -> Vec<CapturedImage> {
        self.required = required;
        self.images.drain().map(|(_, img)| img).collect()
    }

    pub fn clear(&mut self) -> Vec<CapturedImage> {
        self.images.drain().map(|(_, img)| img).collect()
    }
}

/// Everything a finished batch produced.
#[derive(Debug, Clone)]
pub struct BatchReport {
    pub outcomes: Vec<RuleOutcome>,
    pub verdict: Verdict,
    pub meta: BatchMeta,
    pub delivered: bool,
}

#[derive(Debug, Clone)]
pub enum StepOutcome {
    Waiting,
    BatchCompleted(BatchReport),
    Quit,
}

/// Run every rule of one camera's image. Per-rule failures become failing
/// outcomes; the remaining rules still run.
pub fn inspect_camera(
    models: &mut ModelCache,
    camera: &str,
    image: &DynamicImage,
    rules: &[&InspectionRule],
) -> Vec<RuleOutcome> {
    rules
        .iter()
        .map(|rule| match run_rule(models, image, rule) {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("  {}: error: {}", rule.rule_id, e);
                RuleOutcome::error(&rule.rule_id, camera, e)
            }
        })
        .collect()
}

fn run_rule(models: &mut ModelCache, image: &DynamicImage, rule: &InspectionRule) -> Result<RuleOutcome> {
    let crop = crop_region(image, &rule.detect_region)?;
    let detector = models.get(&rule.model_name)?;
    let offset = (rule.detect_region.x1, rule.detect_region.y1);
    let detection = detector.detect(&crop, rule.class_id, rule.confidence, offset)?;
    let (passed, reason) = evaluate(rule, &detection);

    info!(
        "  {}: {} ({})",
        rule.rule_id,
        if passed { "OK" } else { "NG" },
        reason
    );
    Ok(RuleOutcome {
        rule_id: rule.rule_id.clone(),
        camera: rule.camera.clone(),
        passed,
        reason,
        detection: Some(detection),
    })
}

#[derive(Debug, Clone, Copy)]
pub struct StationSettings {
    pub display_wait: Duration,
    pub cleanup_temp: bool,
}

impl Default for StationSettings {
    fn default() -> Self {
        Self {
            display_wait: Duration::from_millis(30),
            cleanup_temp: true,
        }
    }
}

pub struct Station {
    settings: StationSettings,
    profiles: ProfileManager,
    profile: Arc<ProductProfile>,
    sync: BatchSynchronizer,
    watchers: HashMap<String, ImageWatcher>,
    models: ModelCache,
    display: Box<dyn DisplaySink>,
    output: SerialOutput,
    input: Option<ProductCodeReader>,
    results: Option<ResultLog>,
    annotations: Option<AnnotatedImageWriter>,
    batch_num: u64,
    paused: bool,
}

impl Station {
    /// Start the product code reader (if any), load the initial profile and
    /// set up watchers for its cameras. A profile that cannot be loaded is fatal.
    pub fn new(
        settings: StationSettings,
        mut profiles: ProfileManager,
        models: ModelCache,
        display: Box<dyn DisplaySink>,
        output: SerialOutput,
        mut input: Option<ProductCodeReader>,
    ) -> Result<Self> {
        if let Some(reader) = input.as_mut() {
            reader.start();
        }
        let live_code = input.as_ref().and_then(|r| r.current());
        let profile = profiles.initialize(live_code.as_deref())?;

        let mut station = Self {
            settings,
            profiles,
            sync: BatchSynchronizer::new(profile.required_cameras.clone()),
            profile,
            watchers: HashMap::new(),
            models,
            display,
            output,
            input,
            results: None,
            annotations: None,
            batch_num: 0,
            paused: false,
        };
        station.ensure_watchers();
        info!("waiting for images from {:?}", station.sync.required());
        Ok(station)
    }

    pub fn with_result_log(mut self, log: ResultLog) -> Self {
        self.results = Some(log);
        self
    }

    pub fn with_annotated_images(mut self, writer: AnnotatedImageWriter) -> Self {
        self.annotations = Some(writer);
        self
    }

    pub fn profile(&self) -> &Arc<ProductProfile> {
        &self.profile
    }

    pub fn synchronizer(&self) -> &BatchSynchronizer {
        &self.sync
    }

    pub fn batch_count(&self) -> u64 {
        self.batch_num
    }

    pub fn output(&self) -> &SerialOutput {
        &self.output
    }

    pub fn models(&self) -> &ModelCache {
        &self.models
    }

    pub fn input(&self) -> Option<&ProductCodeReader> {
        self.input.as_ref()
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    fn ensure_watchers(&mut self) {
        for camera in &self.profile.required_cameras {
            if self.watchers.contains_key(camera) {
                continue;
            }
            let created = self
                .profiles
                .cameras()
                .get(camera)
                .and_then(|cfg| ImageWatcher::new(camera.clone(), &cfg.input_folder, &cfg.temp_folder));
            match created {
                Ok(watcher) => {
                    self.watchers.insert(camera.clone(), watcher);
                }
                Err(e) => error!("camera {}: {}", camera, e),
            }
        }
    }

    fn discard(&mut self, images: Vec<CapturedImage>) {
        if !self.settings.cleanup_temp {
            return;
        }
        for captured in images {
            if let Some(watcher) = self.watchers.get(&captured.sample.camera) {
                watcher.cleanup(&captured.sample);
            }
        }
    }

    fn check_product_change(&mut self) {
        let live_code = self.input.as_ref().and_then(|r| r.current());
        match self.profiles.refresh(live_code.as_deref()) {
            ProfileChange::Swapped { profile, .. } => {
                let previous = self.sync.required().to_vec();
                let stale = self.sync.reset(profile.required_cameras.clone());
                if !stale.is_empty() {
                    info!("discarding {} images from the previous product", stale.len());
                }
                self.discard(stale);

                // Files that landed while a camera was not required belong to no batch
                for camera in &profile.required_cameras {
                    if previous.contains(camera) {
                        continue;
                    }
                    if let Some(watcher) = self.watchers.get_mut(camera) {
                        watcher.reset();
                    }
                }
                self.profile = profile;
                self.ensure_watchers();
                info!("waiting for images from {:?}", self.sync.required());
            }
            ProfileChange::Unchanged | ProfileChange::LoadFailed { .. } => {}
        }
    }

    fn poll_cameras(&mut self) {
        let missing: Vec<String> = self.sync.missing().into_iter().map(str::to_string).collect();
        for camera in missing {
            let Some(watcher) = self.watchers.get_mut(&camera) else {
                continue;
            };
            let mut samples = watcher.poll_new().into_iter();
            let Some(sample) = samples.next() else {
                continue;
            };
            for extra in samples {
                debug!("camera {}: batch slot taken, skipping {}", camera, extra.file_name);
                if self.settings.cleanup_temp {
                    watcher.cleanup(&extra);
                }
            }

            match image::open(&sample.temp_path) {
                Ok(image) => {
                    info!(
                        "camera {}: image received {} ({}x{})",
                        camera,
                        sample.file_name,
                        image.width(),
                        image.height()
                    );
                    self.sync.offer(
                        &camera,
                        CapturedImage {
                            sample,
                            image: Arc::new(image),
                        },
                    );
                }
                Err(e) => {
                    warn!("camera {}: cannot decode {}: {}", camera, sample.file_name, e);
                    if self.settings.cleanup_temp {
                        watcher.cleanup(&sample);
                    }
                }
            }
        }
    }

    fn run_batch(&mut self, batch: Vec<(String, CapturedImage)>) -> BatchReport {
        self.batch_num += 1;
        let batch_num = self.batch_num;
        let started = Instant::now();
        info!("all cameras ready, processing batch #{}", batch_num);

        let profile = self.profile.clone();
        let mut outcomes = Vec::new();
        for (camera, captured) in &batch {
            info!(
                "[batch {}] {} - {}x{}",
                batch_num,
                camera,
                captured.image.width(),
                captured.image.height()
            );
            let rules: Vec<&InspectionRule> = profile.rules.for_camera(camera).collect();
            outcomes.extend(inspect_camera(&mut self.models, camera, &captured.image, &rules));
        }

        let verdict = aggregate(&outcomes);
        let meta = BatchMeta {
            batch_num,
            product_code: profile.product_code.clone(),
            batch_time: started.elapsed(),
            finished_at: OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc()),
        };

        let delivered = self.output.send(verdict, None);
        if !delivered {
            warn!("batch #{}: verdict {} not delivered", batch_num, verdict);
        }
        self.display.update(&outcomes, verdict, &meta);
        if let Some(log) = &self.results {
            if let Err(e) = log.append(&outcomes, verdict, &meta) {
                warn!("cannot append to {}: {}", log.path().display(), e);
            }
        }
        if let Some(writer) = &self.annotations {
            let stamp = batch_stamp(&meta);
            for outcome in &outcomes {
                let rule = profile
                    .rules
                    .for_camera(&outcome.camera)
                    .find(|r| r.rule_id == outcome.rule_id);
                let image = batch.iter().find(|(camera, _)| *camera == outcome.camera);
                let (Some(rule), Some((_, captured))) = (rule, image) else {
                    continue;
                };
                if let Err(e) = writer.write(&captured.image, rule, outcome, &stamp) {
                    warn!("cannot save annotated image for {}: {}", outcome.rule_id, e);
                }
            }
        }

        info!("[batch {}] completed - result: {}", batch_num, verdict);
        self.discard(batch.into_iter().map(|(_, img)| img).collect());
        info!("waiting for images from {:?}", self.sync.required());

        BatchReport {
            outcomes,
            verdict,
            meta,
            delivered,
        }
    }

    /// One non-blocking loop iteration.
    pub fn step(&mut self) -> StepOutcome {
        self.check_product_change();
        self.poll_cameras();

        match self.display.show(self.settings.display_wait) {
            DisplayAction::Quit => {
                info!("quit requested");
                return StepOutcome::Quit;
            }
            DisplayAction::Pause => {
                info!("display paused");
                self.paused = true;
            }
            DisplayAction::Resume => {
                info!("display resumed");
                self.paused = false;
            }
            DisplayAction::None => {}
        }

        match self.sync.take_batch() {
            Some(batch) => StepOutcome::BatchCompleted(self.run_batch(batch)),
            None => StepOutcome::Waiting,
        }
    }

    /// Loop until the display asks to quit, then shut down.
    pub fn run(mut self) -> u64 {
        while !matches!(self.step(), StepOutcome::Quit) {}
        let batches = self.batch_num;
        self.shutdown();
        batches
    }

    /// Close the display, the verdict channel, and the product code reader, in
    /// that order.
    pub fn shutdown(&mut self) {
        info!("shutting down after {} batches", self.batch_num);
        self.display.close();
        self.output.close();
        if let Some(reader) = self.input.as_mut() {
            reader.stop();
        }
        let leftover = self.sync.clear();
        self.discard(leftover);
    }
}
