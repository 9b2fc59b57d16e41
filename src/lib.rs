pub mod aggregate;
pub mod config;
pub mod detection;
pub mod display;
pub mod error;
pub mod evaluator;
pub mod models;
pub mod profile;
pub mod report;
pub mod rules;
pub mod serial;
pub mod station;
pub mod watcher;

pub use aggregate::aggregate;
pub use config::{CameraConfig, CameraTable, ProductMode, StationConfig};
pub use detection::{Detector, ModelCache, ModelLoader};
pub use display::{ConsoleDisplay, DisplayAction, DisplaySink};
pub use error::{Result, StationError};
pub use evaluator::evaluate;
pub use models::{
    BatchMeta, DetectionResult, Keypoint, Reason, Rect, RuleOutcome, Verdict,
};
pub use profile::{ProductProfile, ProfileChange, ProfileManager};
pub use report::{AnnotatedImageWriter, ResultLog};
pub use rules::{CsvRuleStore, InspectionRule, KeypointAngleSpec, RuleKind, RuleSet, RuleStore};
pub use serial::{ProductCodeReader, ReaderSettings, RetryPolicy, SerialOutput};
pub use station::{BatchSynchronizer, Station, StationSettings, StepOutcome};
pub use watcher::{CameraImageSample, ImageWatcher};
