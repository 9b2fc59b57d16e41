use crate::models::{RuleOutcome, Verdict};

/// `OK` iff there is at least one outcome and all of them passed.
/// An empty batch carries no evidence and is `NG`.
pub fn aggregate(outcomes: &[RuleOutcome]) -> Verdict {
    if !outcomes.is_empty() && outcomes.iter().all(|o| o.passed) {
        Verdict::Ok
    } else {
        Verdict::Ng
    }
}
