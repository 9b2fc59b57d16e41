//! Pass/fail decision for one rule given what the detector reported.

use crate::models::{DetectionResult, Keypoint, Reason, Rect};
use crate::rules::{InspectionRule, KeypointAngleSpec};

/// Pass iff the bbox center lies inside `compare_region`, edges included.
pub fn check_region(detection: &DetectionResult, compare_region: &Rect) -> Result<(), Reason> {
    if !detection.found {
        return Err(Reason::NotFound);
    }
    let bbox = detection.bbox.ok_or(Reason::InvalidBbox)?;
    let (cx, cy) = bbox.center();
    if compare_region.contains_point(cx, cy) {
        Ok(())
    } else {
        Err(Reason::OutOfCompareRoi)
    }
}

/// Direction of the vector `from -> to`, in degrees within `[0, 360)`.
pub fn keypoint_angle(from: &Keypoint, to: &Keypoint) -> f64 {
    let angle = (to.y - from.y).atan2(to.x - from.x).to_degrees();
    let normalized = angle.rem_euclid(360.0);
    // rem_euclid can round up to exactly 360 for tiny negative inputs
    if normalized >= 360.0 { 0.0 } else { normalized }
}

/// Shortest distance between two angles around the circle, in `[0, 180]`.
pub fn angle_difference(measured: f64, expected: f64) -> f64 {
    let diff = (measured - expected).abs().rem_euclid(360.0);
    if diff > 180.0 { 360.0 - diff } else { diff }
}

pub fn check_angle(measured: f64, spec: &KeypointAngleSpec) -> Result<(), Reason> {
    if angle_difference(measured, spec.expected_angle) <= spec.tolerance {
        Ok(())
    } else {
        Err(Reason::WrongAngle(measured))
    }
}

/// Measure the keypoint angle and compare it against `spec`.
pub fn check_keypoints(detection: &DetectionResult, spec: &KeypointAngleSpec) -> Result<(), Reason> {
    let keypoints = match &detection.keypoints {
        Some(kps) if !kps.is_empty() => kps,
        _ => return Err(Reason::NoKeypoints),
    };
    let (Some(p1), Some(p2)) = (keypoints.get(spec.idx1), keypoints.get(spec.idx2)) else {
        return Err(Reason::KeypointIndexOutOfRange);
    };
    check_angle(keypoint_angle(p1, p2), spec)
}

/// AND of every check the rule is configured with. The first failing check
/// supplies the reason.
pub fn evaluate(rule: &InspectionRule, detection: &DetectionResult) -> (bool, Reason) {
    let verdict = check_region(detection, &rule.compare_region).and_then(|_| match rule.keypoint_spec() {
        Some(spec) => check_keypoints(detection, spec),
        None => Ok(()),
    });

    match verdict {
        Ok(()) => (true, Reason::Ok),
        Err(reason) => (false, reason),
    }
}
