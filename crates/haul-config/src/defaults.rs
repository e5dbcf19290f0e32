//! Default values for configuration documents.
//!
//! # Design
//! - Centralize defaults so serde, docs, and tests agree.
//! - Time-based defaults are explicit seconds for auditability.

use std::time::Duration;

pub(crate) const DOWNLOAD_ROOT: &str = "downloads";
pub(crate) const LOG_LEVEL: &str = "info";

pub(crate) const ADD_ATTEMPTS: u32 = 5;
pub(crate) const BACKOFF_INITIAL: Duration = Duration::from_secs(1);
pub(crate) const BACKOFF_MAX: Duration = Duration::from_secs(30);
pub(crate) const BACKOFF_JITTER: f64 = 0.1;
pub(crate) const UNSTABLE_THRESHOLD: u32 = 5;
pub(crate) const POLL_NATIVE: Duration = Duration::from_secs(5);
pub(crate) const POLL_TORRENT: Duration = Duration::from_secs(5);
pub(crate) const POLL_REMOTE: Duration = Duration::from_secs(10);
pub(crate) const EMIT_RETRY_LIMIT: u32 = 3;
pub(crate) const EMIT_BACKOFF_MAX: Duration = Duration::from_secs(60);
/// Running updates are forwarded at most this often.
pub(crate) const REPORT_INTERVAL: Duration = Duration::from_secs(10);
pub(crate) const HISTORY_CAPACITY: usize = 256;

pub(crate) const CHUNK_TIMEOUT: Duration = Duration::from_secs(60);
pub(crate) const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);
pub(crate) const USER_AGENT: &str = concat!("haul/", env!("CARGO_PKG_VERSION"));

pub(crate) const TORRENT_URL: &str = "http://127.0.0.1:8080";
pub(crate) const REMOTE_URL: &str = "http://127.0.0.1:3128";
pub(crate) const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
