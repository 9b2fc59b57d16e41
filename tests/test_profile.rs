//! Product profile resolution and hot-swap.

mod common;

use tempfile::TempDir;
use vision_gate::config::ProductMode;
use vision_gate::profile::{ProductProfile, ProfileChange, ProfileManager};
use vision_gate::rules::{CsvRuleStore, RuleSet};

use common::*;

fn manager(dir: &TempDir, mode: ProductMode, code: &str) -> ProfileManager {
    let template = dir.path().join("{code}.csv").display().to_string();
    ProfileManager::new(
        mode,
        code,
        "DEFAULT",
        Box::new(CsvRuleStore::new(template)),
        camera_table(dir.path(), &["cam1", "cam2", "cam3"]),
    )
}

#[test]
fn test_required_cameras_follow_rules() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let rules = RuleSet::new(vec![
        detection_rule("r1", "cam2", Rect::new(0, 0, 10, 10), Rect::new(0, 0, 10, 10)),
        detection_rule("r2", "cam1", Rect::new(0, 0, 10, 10), Rect::new(0, 0, 10, 10)),
        detection_rule("r3", "cam2", Rect::new(0, 0, 10, 10), Rect::new(0, 0, 10, 10)),
        detection_rule("r4", "cam9", Rect::new(0, 0, 10, 10), Rect::new(0, 0, 10, 10)),
    ]);
    let cameras = camera_table(dir.path(), &["cam1", "cam2"]);

    let profile = ProductProfile::build("P1", rules, &cameras);
    // cam9 has no folder configuration and is dropped
    assert_eq!(profile.required_cameras, vec!["cam2".to_string(), "cam1".to_string()]);
    assert_eq!(profile.rules.len(), 4);
    Ok(())
}

#[test]
fn test_wanted_code_by_mode() -> anyhow::Result<()> {
    let dir = TempDir::new()?;

    let fixed = manager(&dir, ProductMode::Static, "P1");
    assert_eq!(fixed.wanted_code(Some("P2")), "P1");

    let live = manager(&dir, ProductMode::Live, "P1");
    assert_eq!(live.wanted_code(None), "DEFAULT");
    assert_eq!(live.wanted_code(Some("")), "DEFAULT");
    assert_eq!(live.wanted_code(Some("P2")), "P2");
    Ok(())
}

#[test]
fn test_initial_load_failure_is_fatal() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let mut profiles = manager(&dir, ProductMode::Static, "MISSING");

    assert!(profiles.initialize(None).is_err());
    assert!(profiles.active().is_none());
    Ok(())
}

#[test]
fn test_swap_on_code_change() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    write_rules(
        dir.path(),
        "DEFAULT",
        &[rule_row("a", "cam1", "m"), rule_row("b", "cam2", "m"), rule_row("c", "cam3", "m")],
    );
    write_rules(dir.path(), "P2", &[rule_row("x", "cam1", "m")]);

    let mut profiles = manager(&dir, ProductMode::Live, "unused");
    let initial = profiles.initialize(None)?;
    assert_eq!(initial.product_code, "DEFAULT");
    assert_eq!(initial.required_cameras.len(), 3);

    assert!(matches!(profiles.refresh(None), ProfileChange::Unchanged));
    assert!(matches!(profiles.refresh(Some("DEFAULT")), ProfileChange::Unchanged));

    match profiles.refresh(Some("P2")) {
        ProfileChange::Swapped { previous, profile } => {
            assert_eq!(previous.as_deref(), Some("DEFAULT"));
            assert_eq!(profile.product_code, "P2");
            assert_eq!(profile.required_cameras, vec!["cam1".to_string()]);
        }
        other => panic!("expected a swap, got {other:?}"),
    }
    assert_eq!(profiles.active_code(), Some("P2"));
    Ok(())
}

#[test]
fn test_failed_reload_keeps_previous_profile() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    write_rules(dir.path(), "DEFAULT", &[rule_row("a", "cam1", "m")]);

    let mut profiles = manager(&dir, ProductMode::Live, "unused");
    profiles.initialize(None)?;

    for _ in 0..3 {
        match profiles.refresh(Some("P3")) {
            ProfileChange::LoadFailed { wanted } => assert_eq!(wanted, "P3"),
            other => panic!("expected a load failure, got {other:?}"),
        }
        assert_eq!(profiles.active_code(), Some("DEFAULT"));
    }

    // Retried on the next call once the file shows up
    write_rules(dir.path(), "P3", &[rule_row("z", "cam2", "m")]);
    assert!(matches!(profiles.refresh(Some("P3")), ProfileChange::Swapped { .. }));
    assert_eq!(profiles.active_code(), Some("P3"));
    Ok(())
}
