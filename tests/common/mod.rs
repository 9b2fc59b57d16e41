#![allow(dead_code)]

mod fixtures;
pub use fixtures::*;

// Re-export commonly used types from vision_gate for tests
pub use vision_gate::models::{DetectionResult, Keypoint, Reason, Rect, RuleOutcome, Verdict};
pub use vision_gate::rules::{InspectionRule, RuleKind};
