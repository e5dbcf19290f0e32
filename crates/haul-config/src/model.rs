//! Typed configuration models.
//!
//! # Design
//! - Pure data carriers; every section has a `Default` so partial documents load.
//! - Durations are written as (fractional) seconds in JSON.

use std::path::PathBuf;
use std::time::Duration;

use haul_core::BackendKind;
use serde::{Deserialize, Serialize};

use crate::defaults;

/// Root configuration document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HaulConfig {
    /// Directory downloads land in when a request does not name one.
    pub download_root: PathBuf,
    /// Logging setup.
    pub logging: LoggingSettings,
    /// Retry, polling, and reporting policy for transfer controllers.
    pub controller: ControllerPolicy,
    /// In-process stream copy backend.
    pub native: NativeConfig,
    /// Torrent client connection.
    pub torrent: TorrentConfig,
    /// Remote link-manager connection.
    pub remote: RemoteConfig,
}

impl Default for HaulConfig {
    fn default() -> Self {
        Self {
            download_root: PathBuf::from(defaults::DOWNLOAD_ROOT),
            logging: LoggingSettings::default(),
            controller: ControllerPolicy::default(),
            native: NativeConfig::default(),
            torrent: TorrentConfig::default(),
            remote: RemoteConfig::default(),
        }
    }
}

/// Output format selection for logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    /// Pretty in debug builds, JSON in release builds.
    #[default]
    Auto,
    /// Human-oriented multi-line output.
    Pretty,
    /// Structured JSON lines.
    Json,
}

/// Logging configuration section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// Output format.
    pub format: LogOutput,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: defaults::LOG_LEVEL.to_string(),
            format: LogOutput::Auto,
        }
    }
}

/// Poll cadence per backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollIntervals {
    /// Native stream copies.
    #[serde(with = "secs")]
    pub native: Duration,
    /// Torrent client.
    #[serde(with = "secs")]
    pub torrent: Duration,
    /// Remote link manager.
    #[serde(with = "secs")]
    pub remote: Duration,
}

impl PollIntervals {
    /// Interval used for the given backend.
    #[must_use]
    pub const fn for_backend(&self, kind: BackendKind) -> Duration {
        match kind {
            BackendKind::Native => self.native,
            BackendKind::Torrent => self.torrent,
            BackendKind::Remote => self.remote,
        }
    }
}

impl Default for PollIntervals {
    fn default() -> Self {
        Self {
            native: defaults::POLL_NATIVE,
            torrent: defaults::POLL_TORRENT,
            remote: defaults::POLL_REMOTE,
        }
    }
}

/// Retry, polling, and reporting policy applied by every controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerPolicy {
    /// Attempts for `add`/`promote` before giving up on an unreachable backend.
    pub add_attempts: u32,
    /// First backoff delay.
    #[serde(with = "secs")]
    pub backoff_initial: Duration,
    /// Backoff ceiling.
    #[serde(with = "secs")]
    pub backoff_max: Duration,
    /// Random spread applied to each delay, as a fraction in `[0, 1]`.
    pub backoff_jitter: f64,
    /// Consecutive failed polls tolerated before the transfer fails.
    pub unstable_threshold: u32,
    /// Poll cadence per backend.
    pub poll_interval: PollIntervals,
    /// Retries for a terminal status emission that hit a rate limit.
    pub emit_retry_limit: u32,
    /// Longest wait honoured for a single emission retry.
    #[serde(with = "secs")]
    pub emit_backoff_max: Duration,
    /// Minimum spacing between forwarded running updates.
    #[serde(with = "secs")]
    pub report_interval: Duration,
    /// Terminal statuses kept queryable after controllers exit.
    pub history_capacity: usize,
}

impl Default for ControllerPolicy {
    fn default() -> Self {
        Self {
            add_attempts: defaults::ADD_ATTEMPTS,
            backoff_initial: defaults::BACKOFF_INITIAL,
            backoff_max: defaults::BACKOFF_MAX,
            backoff_jitter: defaults::BACKOFF_JITTER,
            unstable_threshold: defaults::UNSTABLE_THRESHOLD,
            poll_interval: PollIntervals::default(),
            emit_retry_limit: defaults::EMIT_RETRY_LIMIT,
            emit_backoff_max: defaults::EMIT_BACKOFF_MAX,
            report_interval: defaults::REPORT_INTERVAL,
            history_capacity: defaults::HISTORY_CAPACITY,
        }
    }
}

/// In-process stream copy settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NativeConfig {
    /// Longest wait for the next chunk before the copy fails.
    #[serde(with = "secs")]
    pub chunk_timeout: Duration,
    /// Connect timeout for HTTP sources.
    #[serde(with = "secs")]
    pub connect_timeout: Duration,
    /// User agent sent with HTTP requests.
    pub user_agent: String,
}

impl Default for NativeConfig {
    fn default() -> Self {
        Self {
            chunk_timeout: defaults::CHUNK_TIMEOUT,
            connect_timeout: defaults::CONNECT_TIMEOUT,
            user_agent: defaults::USER_AGENT.to_string(),
        }
    }
}

/// Torrent client web API settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TorrentConfig {
    /// Base URL of the web UI, e.g. `http://127.0.0.1:8080`.
    pub base_url: String,
    /// Login name; anonymous access when unset.
    pub username: Option<String>,
    /// Login password.
    pub password: Option<String>,
    /// Category assigned to added torrents.
    pub category: Option<String>,
    /// Per-request timeout.
    #[serde(with = "secs")]
    pub request_timeout: Duration,
}

impl Default for TorrentConfig {
    fn default() -> Self {
        Self {
            base_url: defaults::TORRENT_URL.to_string(),
            username: None,
            password: None,
            category: None,
            request_timeout: defaults::REQUEST_TIMEOUT,
        }
    }
}

/// How the remote link manager is reached.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum RemoteConnectionMode {
    /// Unauthenticated local API.
    #[default]
    Direct,
    /// API protected with account credentials.
    Account {
        /// Account name.
        username: String,
        /// Account password.
        password: String,
    },
}

/// Remote link-manager settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Base URL of the manager API.
    pub base_url: String,
    /// Connection mode.
    pub connection: RemoteConnectionMode,
    /// Prefix applied to package names created for transfers.
    pub package_prefix: Option<String>,
    /// Per-request timeout.
    #[serde(with = "secs")]
    pub request_timeout: Duration,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: defaults::REMOTE_URL.to_string(),
            connection: RemoteConnectionMode::Direct,
            package_prefix: None,
            request_timeout: defaults::REQUEST_TIMEOUT,
        }
    }
}

mod secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer, de::Error as _};

    pub(super) fn serialize<S: Serializer>(
        value: &Duration,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs)
            .map_err(|_| D::Error::custom("duration must be a non-negative number of seconds"))
    }
}
