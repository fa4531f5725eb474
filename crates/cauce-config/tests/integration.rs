//! Integration tests for cauce-config.
//!
//! These tests exercise loading and saving settings files on disk.

use cauce_config::{ConfigError, Settings, ValidationError};
use tempfile::TempDir;

#[test]
fn save_then_load() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("cauce.toml");

    let mut settings = Settings::default();
    settings.clock.rate = 44100;
    settings.clock.quantum = 512;
    settings.resample.quality = 10;
    settings.node.pause_on_idle = false;
    settings.save(&path).unwrap();

    let loaded = Settings::from_file(&path).unwrap();
    assert_eq!(loaded, settings);
    assert!(loaded.validate().is_ok());
}

#[test]
fn missing_file_is_read_error() {
    let dir = TempDir::new().unwrap();
    let err = Settings::from_file(dir.path().join("absent.toml")).unwrap_err();
    assert!(matches!(err, ConfigError::ReadFile { .. }));
}

#[test]
fn load_or_default_without_file() {
    let dir = TempDir::new().unwrap();
    let settings = Settings::load_or_default(dir.path().join("absent.toml")).unwrap();
    assert_eq!(settings, Settings::default());
}

#[test]
fn load_or_default_rejects_invalid_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("cauce.toml");
    std::fs::write(&path, "[clock]\nquantum = 100000\n").unwrap();

    let err = Settings::load_or_default(&path).unwrap_err();
    match err {
        ConfigError::Validation(ValidationError::Multiple(_) | ValidationError::QuantumBounds { .. }) => {}
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn malformed_file_is_parse_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("cauce.toml");
    std::fs::write(&path, "[clock\nrate = 1").unwrap();
    assert!(matches!(
        Settings::from_file(&path),
        Err(ConfigError::TomlParse(_))
    ));
}
