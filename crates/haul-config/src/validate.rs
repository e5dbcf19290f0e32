//! Structural validation for loaded configuration documents.

use std::time::Duration;

use url::Url;

use crate::error::{ConfigError, ConfigResult};
use crate::model::{ControllerPolicy, HaulConfig, RemoteConnectionMode};

/// Validate a fully merged configuration.
///
/// # Errors
///
/// Returns the first [`ConfigError::InvalidField`] encountered.
pub fn validate(config: &HaulConfig) -> ConfigResult<()> {
    if config.download_root.as_os_str().is_empty() {
        return Err(ConfigError::invalid(
            "root",
            "download_root",
            None,
            "must not be empty",
        ));
    }
    if config.logging.level.trim().is_empty() {
        return Err(ConfigError::invalid(
            "logging",
            "level",
            None,
            "must not be empty",
        ));
    }
    validate_policy(&config.controller)?;
    positive("native", "chunk_timeout", config.native.chunk_timeout)?;
    positive("native", "connect_timeout", config.native.connect_timeout)?;

    parse_http_url("torrent", "base_url", &config.torrent.base_url)?;
    positive("torrent", "request_timeout", config.torrent.request_timeout)?;
    if config.torrent.username.is_some() != config.torrent.password.is_some() {
        return Err(ConfigError::invalid(
            "torrent",
            "password",
            None,
            "username and password must be set together",
        ));
    }

    parse_http_url("remote", "base_url", &config.remote.base_url)?;
    positive("remote", "request_timeout", config.remote.request_timeout)?;
    if let RemoteConnectionMode::Account { username, .. } = &config.remote.connection
        && username.trim().is_empty()
    {
        return Err(ConfigError::invalid(
            "remote",
            "username",
            None,
            "must not be empty in account mode",
        ));
    }
    Ok(())
}

/// Validate controller retry and polling policy.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidField`] naming the offending policy field.
pub fn validate_policy(policy: &ControllerPolicy) -> ConfigResult<()> {
    const SECTION: &str = "controller";
    if policy.add_attempts == 0 {
        return Err(ConfigError::invalid(
            SECTION,
            "add_attempts",
            Some(policy.add_attempts.to_string()),
            "must be at least 1",
        ));
    }
    positive(SECTION, "backoff_initial", policy.backoff_initial)?;
    if policy.backoff_max < policy.backoff_initial {
        return Err(ConfigError::invalid(
            SECTION,
            "backoff_max",
            Some(format!("{:?}", policy.backoff_max)),
            "must not be shorter than backoff_initial",
        ));
    }
    if !(0.0..=1.0).contains(&policy.backoff_jitter) {
        return Err(ConfigError::invalid(
            SECTION,
            "backoff_jitter",
            Some(policy.backoff_jitter.to_string()),
            "must be between 0 and 1",
        ));
    }
    if policy.unstable_threshold == 0 {
        return Err(ConfigError::invalid(
            SECTION,
            "unstable_threshold",
            Some(policy.unstable_threshold.to_string()),
            "must be at least 1",
        ));
    }
    positive(SECTION, "poll_interval.native", policy.poll_interval.native)?;
    positive(SECTION, "poll_interval.torrent", policy.poll_interval.torrent)?;
    positive(SECTION, "poll_interval.remote", policy.poll_interval.remote)?;
    positive(SECTION, "emit_backoff_max", policy.emit_backoff_max)?;
    if policy.history_capacity == 0 {
        return Err(ConfigError::invalid(
            SECTION,
            "history_capacity",
            Some("0".into()),
            "must be at least 1",
        ));
    }
    Ok(())
}

/// Parse a base URL that must use the `http` or `https` scheme.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidField`] when the URL does not parse or uses
/// another scheme.
pub fn parse_http_url(section: &'static str, field: &'static str, raw: &str) -> ConfigResult<Url> {
    let url = Url::parse(raw)
        .map_err(|_| ConfigError::invalid(section, field, Some(raw.to_string()), "invalid URL"))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::invalid(
            section,
            field,
            Some(raw.to_string()),
            "scheme must be http or https",
        ));
    }
    Ok(url)
}

fn positive(section: &'static str, field: &'static str, value: Duration) -> ConfigResult<()> {
    if value.is_zero() {
        return Err(ConfigError::invalid(
            section,
            field,
            Some("0".into()),
            "must be greater than zero",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(validate(&HaulConfig::default()).is_ok());
    }

    #[test]
    fn rejects_non_http_urls() {
        let mut config = HaulConfig::default();
        config.torrent.base_url = "ftp://127.0.0.1".into();
        assert!(matches!(
            validate(&config),
            Err(ConfigError::InvalidField {
                section: "torrent",
                field: "base_url",
                reason: "scheme must be http or https",
                ..
            })
        ));
    }

    #[test]
    fn rejects_bad_policy_values() {
        let mut policy = ControllerPolicy {
            add_attempts: 0,
            ..ControllerPolicy::default()
        };
        assert!(validate_policy(&policy).is_err());

        policy.add_attempts = 3;
        policy.backoff_jitter = 1.5;
        assert!(validate_policy(&policy).is_err());

        policy.backoff_jitter = 0.2;
        policy.poll_interval.remote = Duration::ZERO;
        assert!(matches!(
            validate_policy(&policy),
            Err(ConfigError::InvalidField {
                field: "poll_interval.remote",
                ..
            })
        ));
    }
}
