use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use haul_config::{ConfigError, HaulConfig, LogOutput, RemoteConnectionMode};

fn no_env(_: &str) -> Option<String> {
    None
}

#[test]
fn loads_file_then_applies_environment() -> Result<(), Box<dyn std::error::Error>> {
    let mut file = tempfile::NamedTempFile::new()?;
    write!(
        file,
        r#"{{
            "download_root": "/data/in",
            "logging": {{"level": "debug", "format": "pretty"}},
            "controller": {{"add_attempts": 3, "backoff_initial": 0.5}},
            "torrent": {{"base_url": "http://qbit.local:8080", "category": "haul"}},
            "remote": {{"package_prefix": "bot"}}
        }}"#
    )?;

    let config = HaulConfig::load_with(Some(file.path()), |key| {
        (key == "HAUL_JD_URL").then(|| "https://jd.local:3129".to_string())
    })?;

    assert_eq!(config.download_root, PathBuf::from("/data/in"));
    assert_eq!(config.logging.format, LogOutput::Pretty);
    assert_eq!(config.controller.add_attempts, 3);
    assert_eq!(config.controller.backoff_initial, Duration::from_millis(500));
    assert_eq!(config.torrent.category.as_deref(), Some("haul"));
    assert_eq!(config.remote.base_url, "https://jd.local:3129");
    assert_eq!(config.remote.package_prefix.as_deref(), Some("bot"));
    assert_eq!(config.remote.connection, RemoteConnectionMode::Direct);
    Ok(())
}

#[test]
fn missing_file_is_an_io_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("absent.json");
    let err = HaulConfig::load_with(Some(&path), no_env).expect_err("missing file");
    assert!(matches!(err, ConfigError::Io { operation: "config.read", .. }));
}

#[test]
fn malformed_file_is_a_parse_error() -> Result<(), Box<dyn std::error::Error>> {
    let mut file = tempfile::NamedTempFile::new()?;
    write!(file, "{{ not json")?;
    let err = HaulConfig::load_with(Some(file.path()), no_env).expect_err("bad json");
    assert!(matches!(err, ConfigError::Parse { .. }));
    Ok(())
}

#[test]
fn invalid_values_fail_validation() -> Result<(), Box<dyn std::error::Error>> {
    let mut file = tempfile::NamedTempFile::new()?;
    write!(file, r#"{{"controller": {{"unstable_threshold": 0}}}}"#)?;
    let err = HaulConfig::load_with(Some(file.path()), no_env).expect_err("invalid policy");
    assert!(matches!(
        err,
        ConfigError::InvalidField {
            section: "controller",
            field: "unstable_threshold",
            ..
        }
    ));
    Ok(())
}

#[test]
fn defaults_load_without_file() -> Result<(), ConfigError> {
    let config = HaulConfig::load_with(None, no_env)?;
    assert_eq!(config, HaulConfig::default());
    Ok(())
}
