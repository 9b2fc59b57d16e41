use std::fmt;

use time::OffsetDateTime;

/// Axis-aligned rectangle in absolute image coordinates, `(x1, y1)` top-left and
/// `(x2, y2)` bottom-right.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl Rect {
    pub const fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> i32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> i32 {
        self.y2 - self.y1
    }

    pub fn is_valid(&self) -> bool {
        self.x2 > self.x1 && self.y2 > self.y1
    }

    pub fn center(&self) -> (f64, f64) {
        (
            (self.x1 as f64 + self.x2 as f64) / 2.0,
            (self.y1 as f64 + self.y2 as f64) / 2.0,
        )
    }

    /// Inclusive on every edge.
    pub fn contains_point(&self, x: f64, y: f64) -> bool {
        x >= self.x1 as f64 && x <= self.x2 as f64 && y >= self.y1 as f64 && y <= self.y2 as f64
    }

    pub fn contains_rect(&self, other: &Rect) -> bool {
        other.x1 >= self.x1 && other.y1 >= self.y1 && other.x2 <= self.x2 && other.y2 <= self.y2
    }

    pub fn translate(&self, dx: i32, dy: i32) -> Rect {
        Rect::new(self.x1 + dx, self.y1 + dy, self.x2 + dx, self.y2 + dy)
    }
}

impl fmt::Display for Rect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {}, {})", self.x1, self.y1, self.x2, self.y2)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Keypoint {
    pub x: f64,
    pub y: f64,
    pub confidence: f64,
}

impl Keypoint {
    pub fn new(x: f64, y: f64, confidence: f64) -> Self {
        Self { x, y, confidence }
    }
}

/// What the detection capability reports for one rule.
/// Coordinates are always in the uncropped image's space.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DetectionResult {
    pub found: bool,
    pub bbox: Option<Rect>,
    pub confidence: f32,
    pub keypoints: Option<Vec<Keypoint>>,
}

impl DetectionResult {
    pub fn not_found() -> Self {
        Self::default()
    }

    pub fn found(bbox: Rect, confidence: f32) -> Self {
        Self {
            found: true,
            bbox: Some(bbox),
            confidence,
            keypoints: None,
        }
    }

    pub fn with_keypoints(mut self, keypoints: Vec<Keypoint>) -> Self {
        self.keypoints = Some(keypoints);
        self
    }
}

/// Why a rule passed or failed.
#[derive(Debug, Clone, PartialEq)]
pub enum Reason {
    Ok,
    NotFound,
    InvalidBbox,
    OutOfCompareRoi,
    NoKeypoints,
    KeypointIndexOutOfRange,
    WrongAngle(f64),
    Error(String),
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reason::Ok => write!(f, "OK"),
            Reason::NotFound => write!(f, "NOT_FOUND"),
            Reason::InvalidBbox => write!(f, "INVALID_BBOX"),
            Reason::OutOfCompareRoi => write!(f, "OUT_OF_COMPARE_ROI"),
            Reason::NoKeypoints => write!(f, "NO_KEYPOINTS"),
            Reason::KeypointIndexOutOfRange => write!(f, "KEYPOINT_INDEX_OUT_OF_RANGE"),
            Reason::WrongAngle(measured) => write!(f, "WRONG_ANGLE({:.1})", measured),
            Reason::Error(message) => write!(f, "ERROR:{}", message),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RuleOutcome {
    pub rule_id: String,
    pub camera: String,
    pub passed: bool,
    pub reason: Reason,
    /// `None` when the rule never reached the detector.
    pub detection: Option<DetectionResult>,
}

impl RuleOutcome {
    pub fn error(rule_id: &str, camera: &str, message: impl fmt::Display) -> Self {
        Self {
            rule_id: rule_id.to_string(),
            camera: camera.to_string(),
            passed: false,
            reason: Reason::Error(message.to_string()),
            detection: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Ok,
    Ng,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Ok => "OK",
            Verdict::Ng => "NG",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bookkeeping handed to the display sink and result log with every batch.
#[derive(Debug, Clone)]
pub struct BatchMeta {
    pub batch_num: u64,
    pub product_code: String,
    pub batch_time: std::time::Duration,
    pub finished_at: OffsetDateTime,
}

/// Connected edge component found by the contour detector.
#[derive(Debug, Clone)]
pub struct Contour {
    pub label: u32,
    pub min_x: u32,
    pub min_y: u32,
    pub max_x: u32,
    pub max_y: u32,
    pub pixel_count: u32,
}

impl Contour {
    pub fn width(&self) -> u32 {
        self.max_x - self.min_x + 1
    }

    pub fn height(&self) -> u32 {
        self.max_y - self.min_y + 1
    }

    pub fn area(&self) -> u32 {
        self.width() * self.height()
    }

    /// Outline length of the bounding box, not of the traced edge.
    pub fn perimeter(&self) -> f32 {
        2.0 * (self.width() as f32 + self.height() as f32)
    }

    pub fn aspect_ratio(&self) -> f32 {
        let w = self.width() as f32;
        let h = self.height() as f32;
        if h == 0.0 {
            return 0.0;
        }
        w / h
    }

    /// Fraction of the bounding-box outline covered by edge pixels, capped at 1.
    pub fn edge_coverage(&self) -> f32 {
        let perimeter = self.perimeter();
        if perimeter == 0.0 {
            return 0.0;
        }
        (self.pixel_count as f32 / perimeter).min(1.0)
    }

    /// Bounding box as an exclusive-end rectangle, shifted by `offset`.
    pub fn to_rect(&self, offset: (i32, i32)) -> Rect {
        Rect::new(
            self.min_x as i32 + offset.0,
            self.min_y as i32 + offset.1,
            self.max_x as i32 + 1 + offset.0,
            self.max_y as i32 + 1 + offset.1,
        )
    }
}
