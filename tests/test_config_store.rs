//! Integration tests for configuration persistence.
//!
//! Tests cover:
//! - Defaults when the file is missing
//! - Update, persist and reload
//! - Per-key defaults for partial files
//! - Rejected updates leaving file and snapshot untouched
//! - Every parameter surviving a save and reload

mod common;

use common::*;

#[test]
fn test_missing_file_gives_defaults() -> anyhow::Result<()> {
    let dir = tempfile::TempDir::new()?;
    let path = dir.path().join("config.json");

    let store = ConfigStore::open(&path)?;
    assert_eq!(*store.snapshot(), Configuration::default());
    assert!(!path.exists());

    Ok(())
}

#[test]
fn test_update_round_trips_through_file() -> anyhow::Result<()> {
    let dir = tempfile::TempDir::new()?;
    let path = dir.path().join("config.json");
    let store = ConfigStore::open(&path)?;

    let update = ConfigUpdate::from_assignments(["gaussian_blur=7", "entropy_threshold=0.5"])?;
    let updated = store.update(&update)?;
    assert_eq!(updated.gaussian_blur, 7);
    assert_eq!(updated.entropy_threshold, 0.5);
    assert_eq!(updated.canny_threshold1, 50.0);
    assert_eq!(store.revision(), 1);

    // The whole file is rewritten, so a fresh store sees the same values
    let reopened = ConfigStore::open(&path)?;
    assert_eq!(*reopened.snapshot(), *updated);

    let text = std::fs::read_to_string(&path)?;
    for key in banknote_inspect::config::CONFIG_KEYS {
        assert!(text.contains(key), "{key} missing from persisted file");
    }

    Ok(())
}

#[test]
fn test_partial_file_uses_per_key_defaults() -> anyhow::Result<()> {
    let dir = tempfile::TempDir::new()?;
    let path = dir.path().join("config.json");
    std::fs::write(&path, r#"{ "watermark_threshold": 250 }"#)?;

    let config = ConfigStore::open(&path)?.snapshot();
    assert_eq!(config.watermark_threshold, 250);
    assert_eq!(config.gaussian_blur, 5);
    assert_eq!(config.histogram_tile_size, 8);

    Ok(())
}

#[test]
fn test_malformed_file_is_input_error() -> anyhow::Result<()> {
    let dir = tempfile::TempDir::new()?;
    let path = dir.path().join("config.json");

    std::fs::write(&path, "{ not json")?;
    assert!(ConfigStore::open(&path).unwrap_err().is_input_error());

    std::fs::write(&path, r#"{ "gaussian_blur": 4 }"#)?;
    assert!(ConfigStore::open(&path).unwrap_err().is_input_error());

    Ok(())
}

#[test]
fn test_rejected_update_leaves_state_untouched() -> anyhow::Result<()> {
    let dir = tempfile::TempDir::new()?;
    let path = dir.path().join("config.json");
    let store = ConfigStore::open(&path)?;
    store.update(&ConfigUpdate::from_assignments(["canny_threshold2=120"])?)?;
    let before = std::fs::read(&path)?;

    let bad = ConfigUpdate::from_assignments(["canny_threshold1=60", "gaussian_blur=2"])?;
    let err = store.update(&bad).unwrap_err();
    assert!(err.is_input_error());

    assert_eq!(std::fs::read(&path)?, before);
    assert_eq!(store.snapshot().canny_threshold1, 50.0);
    assert_eq!(store.snapshot().canny_threshold2, 120.0);
    assert_eq!(store.revision(), 1);

    Ok(())
}

#[test]
fn test_unknown_key_is_rejected() {
    let err = ConfigUpdate::from_assignments(["sharpen=3"]).unwrap_err();
    assert!(err.is_input_error());
}

#[test]
fn test_snapshot_is_not_affected_by_later_updates() -> anyhow::Result<()> {
    let store = ConfigStore::in_memory(Configuration::default())?;
    let held = store.snapshot();

    store.update(&ConfigUpdate::from_assignments(["gaussian_blur=9"])?)?;
    assert_eq!(held.gaussian_blur, 5);
    assert_eq!(store.snapshot().gaussian_blur, 9);

    Ok(())
}

#[test]
fn test_every_parameter_round_trips() -> anyhow::Result<()> {
    let dir = tempfile::TempDir::new()?;
    let path = dir.path().join("config.json");
    let store = ConfigStore::open(&path)?;
    assert_eq!(store.path(), Some(path.as_path()));

    let wanted = Configuration {
        canny_threshold1: 37.5,
        canny_threshold2: 212.25,
        gaussian_blur: 9,
        histogram_clip_limit: 3.75,
        histogram_tile_size: 12,
        watermark_threshold: 4321,
        entropy_threshold: 0.625,
    };
    let update = ConfigUpdate::full(&wanted);
    assert!(!update.is_empty());
    assert_eq!(*store.update(&update)?, wanted);

    // Fractional values survive the file unchanged
    let reopened = ConfigStore::open(&path)?;
    assert_eq!(*reopened.snapshot(), wanted);
    assert_ne!(wanted, Configuration::default());

    Ok(())
}
