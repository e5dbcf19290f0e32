//! Configuration loading from an optional JSON file plus environment overrides.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{ConfigError, ConfigResult};
use crate::model::{HaulConfig, LogOutput, RemoteConnectionMode};
use crate::validate;

/// Prefix shared by every environment override.
pub const ENV_PREFIX: &str = "HAUL_";

impl HaulConfig {
    /// Load configuration from `path` (when given), apply `HAUL_*` environment
    /// overrides, then validate the result.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] or [`ConfigError::Parse`] when the file
    /// cannot be read, and [`ConfigError::InvalidField`] when validation fails.
    pub fn load(path: Option<&Path>) -> ConfigResult<Self> {
        Self::load_with(path, |key| std::env::var(key).ok())
    }

    /// Like [`HaulConfig::load`], reading overrides through `lookup`.
    ///
    /// # Errors
    ///
    /// See [`HaulConfig::load`].
    pub fn load_with<F>(path: Option<&Path>, lookup: F) -> ConfigResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_overrides(lookup)?;
        validate::validate(&config)?;
        Ok(config)
    }

    fn from_file(path: &Path) -> ConfigResult<Self> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            operation: "config.read",
            path: path.to_path_buf(),
            source,
        })?;
        let config = serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), "loaded configuration file");
        Ok(config)
    }

    /// Apply `HAUL_*` overrides on top of the current values.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidField`] for overrides that cannot be parsed
    /// or that only supply half of an account credential pair.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> ConfigResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(&format!("{ENV_PREFIX}{name}")).filter(|v| !v.is_empty());

        if let Some(root) = var("DOWNLOAD_ROOT") {
            self.download_root = PathBuf::from(root);
        }
        if let Some(level) = var("LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = var("LOG_FORMAT") {
            self.logging.format = parse_log_output(&format)?;
        }
        if let Some(url) = var("QBIT_URL") {
            self.torrent.base_url = url;
        }
        if let Some(username) = var("QBIT_USERNAME") {
            self.torrent.username = Some(username);
        }
        if let Some(password) = var("QBIT_PASSWORD") {
            self.torrent.password = Some(password);
        }
        if let Some(url) = var("JD_URL") {
            self.remote.base_url = url;
        }
        match (var("JD_USERNAME"), var("JD_PASSWORD")) {
            (Some(username), Some(password)) => {
                self.remote.connection = RemoteConnectionMode::Account { username, password };
            }
            (None, None) => {}
            (Some(_), None) => {
                return Err(ConfigError::invalid(
                    "remote",
                    "password",
                    None,
                    "HAUL_JD_USERNAME requires HAUL_JD_PASSWORD",
                ));
            }
            (None, Some(_)) => {
                return Err(ConfigError::invalid(
                    "remote",
                    "username",
                    None,
                    "HAUL_JD_PASSWORD requires HAUL_JD_USERNAME",
                ));
            }
        }
        Ok(())
    }
}

fn parse_log_output(value: &str) -> ConfigResult<LogOutput> {
    match value.trim().to_ascii_lowercase().as_str() {
        "auto" => Ok(LogOutput::Auto),
        "pretty" => Ok(LogOutput::Pretty),
        "json" => Ok(LogOutput::Json),
        _ => Err(ConfigError::invalid(
            "logging",
            "format",
            Some(value.to_string()),
            "expected auto, pretty, or json",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn overrides_replace_file_values() {
        let mut config = HaulConfig::default();
        config
            .apply_overrides(env(&[
                ("HAUL_DOWNLOAD_ROOT", "/srv/downloads"),
                ("HAUL_LOG_FORMAT", "JSON"),
                ("HAUL_QBIT_URL", "http://qbit:8080"),
                ("HAUL_QBIT_USERNAME", "admin"),
                ("HAUL_JD_USERNAME", "jd"),
                ("HAUL_JD_PASSWORD", "secret"),
            ]))
            .expect("apply overrides");
        assert_eq!(config.download_root, PathBuf::from("/srv/downloads"));
        assert_eq!(config.logging.format, LogOutput::Json);
        assert_eq!(config.torrent.base_url, "http://qbit:8080");
        assert_eq!(config.torrent.username.as_deref(), Some("admin"));
        assert_eq!(
            config.remote.connection,
            RemoteConnectionMode::Account {
                username: "jd".into(),
                password: "secret".into()
            }
        );
    }

    #[test]
    fn half_credentials_are_rejected() {
        let mut config = HaulConfig::default();
        let err = config
            .apply_overrides(env(&[("HAUL_JD_USERNAME", "jd")]))
            .expect_err("missing password");
        assert!(matches!(
            err,
            ConfigError::InvalidField {
                section: "remote",
                field: "password",
                ..
            }
        ));
    }

    #[test]
    fn unknown_log_format_is_rejected() {
        let mut config = HaulConfig::default();
        assert!(
            config
                .apply_overrides(env(&[("HAUL_LOG_FORMAT", "xml")]))
                .is_err()
        );
    }
}
