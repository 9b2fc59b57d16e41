use std::collections::{HashMap, VecDeque};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use image::{DynamicImage, ImageBuffer, Luma, Rgb};
use parking_lot::Mutex;

use vision_gate::config::{CameraConfig, CameraTable};
use vision_gate::detection::{Detector, ModelLoader};
use vision_gate::display::{DisplayAction, DisplaySink};
use vision_gate::error::{Result, StationError};
use vision_gate::models::{BatchMeta, DetectionResult, Rect, RuleOutcome, Verdict};
use vision_gate::rules::{InspectionRule, KeypointAngleSpec, RuleKind};
use vision_gate::serial::{Connector, Link};

pub const RULE_HEADER: &str = "roi_id,camera,model_name,class_id,class_name,\
detect_x_min,detect_y_min,detect_x_max,detect_y_max,\
compare_x_min,compare_y_min,compare_x_max,compare_y_max,confidence,\
keypoint_idx_1,keypoint_idx_2,expected_angle,angle_tolerance";

/// Writes a solid gray `width`x`height` PNG.
pub fn write_image(path: &Path, width: u32, height: u32) {
    let img = ImageBuffer::from_fn(width, height, |_, _| Rgb([128u8, 128u8, 128u8]));
    img.save_with_format(path, image::ImageFormat::Png)
        .expect("Failed to save test image");
}

/// Black image with a filled white rectangle covering `rect` (exclusive end).
pub fn rectangle_image(width: u32, height: u32, rect: Rect) -> DynamicImage {
    let img = ImageBuffer::from_fn(width, height, |x, y| {
        let (x, y) = (x as i32, y as i32);
        let inside = x >= rect.x1 && x < rect.x2 && y >= rect.y1 && y < rect.y2;
        Luma([if inside { 255u8 } else { 0u8 }])
    });
    DynamicImage::ImageLuma8(img)
}

pub fn detection_rule(rule_id: &str, camera: &str, detect: Rect, compare: Rect) -> InspectionRule {
    InspectionRule {
        rule_id: rule_id.to_string(),
        camera: camera.to_string(),
        model_name: "model".to_string(),
        class_id: 0,
        class_name: "part".to_string(),
        detect_region: detect,
        compare_region: compare,
        confidence: 0.5,
        kind: RuleKind::DetectionOnly,
    }
}

pub fn angle_rule(idx1: usize, idx2: usize, expected_angle: f64, tolerance: f64) -> InspectionRule {
    let region = Rect::new(0, 0, 1000, 1000);
    InspectionRule {
        kind: RuleKind::KeypointAngle(KeypointAngleSpec {
            idx1,
            idx2,
            expected_angle,
            tolerance,
        }),
        ..detection_rule("angle", "cam1", region, region)
    }
}

/// Rule row for a whole-image rule on `camera`, detect and compare covering `(0, 0, 100, 100)`.
pub fn rule_row(rule_id: &str, camera: &str, model_name: &str) -> String {
    format!("{rule_id},{camera},{model_name},0,part,0,0,100,100,0,0,100,100,0.5,,,,")
}

/// Writes `<dir>/<code>.csv` and returns the `{code}` path template for the directory.
pub fn write_rules(dir: &Path, code: &str, rows: &[String]) -> String {
    let mut text = String::from(RULE_HEADER);
    for row in rows {
        text.push('\n');
        text.push_str(row);
    }
    text.push('\n');
    std::fs::write(dir.join(format!("{code}.csv")), text).expect("Failed to write rule file");
    dir.join("{code}.csv").display().to_string()
}

/// Camera table with `<root>/<name>/in` and `<root>/<name>/tmp` folders.
pub fn camera_table(root: &Path, names: &[&str]) -> CameraTable {
    CameraTable::new(names.iter().map(|name| CameraConfig {
        camera_name: name.to_string(),
        input_folder: input_folder(root, name),
        temp_folder: root.join(name).join("tmp"),
        enabled: true,
    }))
}

pub fn input_folder(root: &Path, camera: &str) -> PathBuf {
    root.join(camera).join("in")
}

pub fn temp_folder(root: &Path, camera: &str) -> PathBuf {
    root.join(camera).join("tmp")
}

pub fn count_files(dir: &Path) -> usize {
    std::fs::read_dir(dir).map(|entries| entries.count()).unwrap_or(0)
}

/// Polls `cond` every few milliseconds until it holds or `timeout` runs out.
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    cond()
}

/// Detector that always reports the same result and records every call.
pub struct ScriptedDetector {
    pub result: DetectionResult,
    pub calls: Mutex<Vec<(u32, (i32, i32), u32, u32)>>,
}

impl ScriptedDetector {
    pub fn new(result: DetectionResult) -> Arc<Self> {
        Arc::new(Self {
            result,
            calls: Mutex::new(Vec::new()),
        })
    }
}

impl Detector for ScriptedDetector {
    fn detect(
        &self,
        image: &DynamicImage,
        class_id: u32,
        _confidence: f32,
        offset: (i32, i32),
    ) -> Result<DetectionResult> {
        self.calls
            .lock()
            .push((class_id, offset, image.width(), image.height()));
        Ok(self.result.clone())
    }
}

/// Model loader backed by a fixed table; counts how often it is asked.
#[derive(Default)]
pub struct ScriptedLoader {
    pub models: HashMap<String, Arc<dyn Detector>>,
    pub loads: Arc<AtomicUsize>,
}

impl ScriptedLoader {
    pub fn with_model(mut self, name: &str, detector: Arc<dyn Detector>) -> Self {
        self.models.insert(name.to_string(), detector);
        self
    }
}

impl ModelLoader for ScriptedLoader {
    fn load(&self, model_name: &str) -> Result<Arc<dyn Detector>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        self.models
            .get(model_name)
            .cloned()
            .ok_or_else(|| StationError::ModelNotFound(PathBuf::from(model_name)))
    }
}

/// Shared state behind [`ScriptedConnector`] and the links it hands out.
#[derive(Debug, Default)]
pub struct SerialScript {
    pub connect_failures: u32,
    pub write_failures: u32,
    pub read_errors: u32,
    pub connects: u32,
    pub written: Vec<String>,
    pub incoming: VecDeque<Vec<u8>>,
}

pub type SharedScript = Arc<Mutex<SerialScript>>;

pub fn serial_script() -> SharedScript {
    Arc::new(Mutex::new(SerialScript::default()))
}

pub struct ScriptedConnector {
    pub script: SharedScript,
}

impl ScriptedConnector {
    pub fn boxed(script: &SharedScript) -> Box<dyn Connector> {
        Box::new(Self {
            script: script.clone(),
        })
    }
}

impl Connector for ScriptedConnector {
    fn connect(&mut self) -> Result<Box<dyn Link>> {
        let mut script = self.script.lock();
        if script.connect_failures > 0 {
            script.connect_failures -= 1;
            return Err(StationError::SerialConnect {
                port: "TEST".to_string(),
                message: "no such device".to_string(),
            });
        }
        script.connects += 1;
        Ok(Box::new(ScriptedLink {
            script: self.script.clone(),
        }))
    }

    fn endpoint(&self) -> String {
        "TEST@9600".to_string()
    }
}

pub struct ScriptedLink {
    script: SharedScript,
}

impl Link for ScriptedLink {
    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        let mut script = self.script.lock();
        if script.write_failures > 0 {
            script.write_failures -= 1;
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "cable unplugged"));
        }
        script.written.push(String::from_utf8_lossy(data).into_owned());
        Ok(())
    }

    fn read_line(&mut self) -> io::Result<Option<Vec<u8>>> {
        let mut script = self.script.lock();
        if script.read_errors > 0 {
            script.read_errors -= 1;
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "cable unplugged"));
        }
        Ok(script.incoming.pop_front())
    }
}

/// What a [`ScriptedDisplay`] has been shown.
#[derive(Debug, Default)]
pub struct DisplayLog {
    pub shows: AtomicUsize,
    pub closed: AtomicBool,
    pub batches: Mutex<Vec<(u64, Verdict, usize)>>,
}

/// Display sink that asks to quit after `quit_after` calls to `show`.
pub struct ScriptedDisplay {
    pub log: Arc<DisplayLog>,
    pub quit_after: Option<usize>,
}

impl ScriptedDisplay {
    pub fn new(quit_after: Option<usize>) -> (Self, Arc<DisplayLog>) {
        let log = Arc::new(DisplayLog::default());
        (
            Self {
                log: log.clone(),
                quit_after,
            },
            log,
        )
    }
}

impl DisplaySink for ScriptedDisplay {
    fn update(&mut self, outcomes: &[RuleOutcome], verdict: Verdict, meta: &BatchMeta) {
        self.log
            .batches
            .lock()
            .push((meta.batch_num, verdict, outcomes.len()));
    }

    fn show(&mut self, _wait: Duration) -> DisplayAction {
        let shows = self.log.shows.fetch_add(1, Ordering::SeqCst) + 1;
        match self.quit_after {
            Some(limit) if shows >= limit => DisplayAction::Quit,
            _ => DisplayAction::None,
        }
    }

    fn close(&mut self) {
        self.log.closed.store(true, Ordering::SeqCst);
    }
}

/// Collects formatted log lines from a scoped subscriber.
#[derive(Clone, Default)]
pub struct CapturedLog(Arc<Mutex<Vec<u8>>>);

impl CapturedLog {
    pub fn subscriber(&self) -> impl tracing::Subscriber + Send + Sync + 'static {
        let writer = self.clone();
        tracing_subscriber::fmt()
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish()
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }
}

impl io::Write for CapturedLog {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
