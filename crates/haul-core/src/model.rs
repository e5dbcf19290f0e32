//! Domain types shared by adapters, the runtime, and callers.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use haul_events::TransferPhase;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{FailureReason, TransferError, TransferResult};

/// Identifier of a logical transfer, stable across backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransferId(Uuid);

impl TransferId {
    /// Generate a fresh random identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing UUID supplied by the caller.
    #[must_use]
    pub const fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// Underlying UUID value.
    #[must_use]
    pub const fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for TransferId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for TransferId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Backend family that owns a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Direct stream copy performed in-process.
    Native,
    /// BitTorrent client reached over its web API.
    Torrent,
    /// Remote download manager with a link collector stage.
    Remote,
}

impl BackendKind {
    /// All supported backends.
    pub const ALL: [Self; 3] = [Self::Native, Self::Torrent, Self::Remote];

    /// Stable lowercase label used in logs, metrics, and events.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Native => "native",
            Self::Torrent => "torrent",
            Self::Remote => "remote",
        }
    }

    /// Whether the backend requires a promote step between add and polling.
    #[must_use]
    pub const fn requires_promotion(self) -> bool {
        matches!(self, Self::Remote)
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = TransferError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "native" => Ok(Self::Native),
            "torrent" => Ok(Self::Torrent),
            "remote" => Ok(Self::Remote),
            _ => Err(TransferError::InvalidRequest {
                field: "backend",
                reason: "unknown backend kind",
            }),
        }
    }
}

/// Immutable description of a transfer supplied by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRequest {
    id: TransferId,
    source: String,
    destination: PathBuf,
    backend: BackendKind,
    deadline: Option<Duration>,
    tag: Option<String>,
}

impl TransferRequest {
    /// Build a request with a generated identifier and no deadline or tag.
    #[must_use]
    pub fn new(
        source: impl Into<String>,
        destination: impl Into<PathBuf>,
        backend: BackendKind,
    ) -> Self {
        Self {
            id: TransferId::new(),
            source: source.into(),
            destination: destination.into(),
            backend,
            deadline: None,
            tag: None,
        }
    }

    /// Use a caller-chosen identifier.
    #[must_use]
    pub const fn with_id(mut self, id: TransferId) -> Self {
        self.id = id;
        self
    }

    /// Bound the total transfer time.
    #[must_use]
    pub const fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Attach a free-form tag forwarded to the backend.
    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    /// Transfer identifier.
    #[must_use]
    pub const fn id(&self) -> TransferId {
        self.id
    }

    /// Source reference (URL, magnet, or local path).
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Destination directory or file path.
    #[must_use]
    pub fn destination(&self) -> &Path {
        &self.destination
    }

    /// Backend chosen for the transfer.
    #[must_use]
    pub const fn backend(&self) -> BackendKind {
        self.backend
    }

    /// Optional wall-clock budget.
    #[must_use]
    pub const fn deadline(&self) -> Option<Duration> {
        self.deadline
    }

    /// Optional tag.
    #[must_use]
    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    /// Validate structural requirements before the request reaches a backend.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::InvalidRequest`] naming the offending field.
    pub fn validate(&self) -> TransferResult<()> {
        if self.source.trim().is_empty() {
            return Err(TransferError::InvalidRequest {
                field: "source",
                reason: "must not be empty",
            });
        }
        if self.destination.as_os_str().is_empty() {
            return Err(TransferError::InvalidRequest {
                field: "destination",
                reason: "must not be empty",
            });
        }
        if self.deadline.is_some_and(|deadline| deadline.is_zero()) {
            return Err(TransferError::InvalidRequest {
                field: "deadline",
                reason: "must be greater than zero",
            });
        }
        if let Some(tag) = &self.tag
            && tag.trim().is_empty()
        {
            return Err(TransferError::InvalidRequest {
                field: "tag",
                reason: "must not be blank when provided",
            });
        }
        Ok(())
    }
}

/// Stage of a remote link-manager transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteStage {
    /// Links sit in the collector and are not downloading yet.
    Collected,
    /// Links were moved to the download list.
    Downloading,
}

/// Backend-specific identifiers returned by `add`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum TransferHandle {
    /// In-process stream task key.
    Native {
        /// Task identifier inside the native adapter.
        task_id: Uuid,
    },
    /// Torrent tracked by a per-transfer tag inside the client.
    Torrent {
        /// Tag attached to the torrent at add time.
        tag: String,
        /// Lower-case hex info-hash once known.
        hash: Option<String>,
    },
    /// Link-collecting job and the packages it produced.
    Remote {
        /// Collector job identifier returned when links were submitted.
        job_id: i64,
        /// Packages created for the job; empty until links are collected.
        package_ids: Vec<i64>,
        /// Links inside those packages.
        link_ids: Vec<i64>,
        /// Whether the links are still in the collector.
        stage: RemoteStage,
    },
}

impl TransferHandle {
    /// Backend that issued the handle.
    #[must_use]
    pub const fn kind(&self) -> BackendKind {
        match self {
            Self::Native { .. } => BackendKind::Native,
            Self::Torrent { .. } => BackendKind::Torrent,
            Self::Remote { .. } => BackendKind::Remote,
        }
    }
}

impl fmt::Display for TransferHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Native { task_id } => write!(f, "native:{task_id}"),
            Self::Torrent {
                hash: Some(hash), ..
            } => write!(f, "torrent:{hash}"),
            Self::Torrent { tag, hash: None } => write!(f, "torrent:{tag}"),
            Self::Remote { job_id, stage, .. } => write!(f, "remote:{job_id}:{stage:?}"),
        }
    }
}

/// Lifecycle of an in-process stream copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NativeState {
    /// Opening the source.
    Connecting,
    /// Copying bytes.
    Streaming,
    /// Copy finished and the file was flushed.
    Completed,
    /// Copy stopped on an error.
    Failed,
    /// Copy was aborted locally.
    Aborted,
}

/// Progress snapshot produced by the native adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NativeRawStatus {
    /// Destination file name.
    pub name: Option<String>,
    /// Copy state.
    pub state: NativeState,
    /// Bytes written.
    pub bytes_done: u64,
    /// Content length when the source advertised one.
    pub bytes_total: Option<u64>,
    /// Average throughput since the copy started.
    pub speed_bps: f64,
    /// Error detail for failed copies.
    pub error: Option<String>,
}

/// Torrent entry as reported by the client's web API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TorrentRawStatus {
    /// Torrent name.
    pub name: Option<String>,
    /// Client state keyword (`downloading`, `stalledUP`, ...).
    pub state: String,
    /// Completion fraction in `[0, 1]`.
    pub progress: f64,
    /// Selected size in bytes; absent until metadata is known.
    pub size: Option<u64>,
    /// Bytes downloaded.
    pub downloaded: u64,
    /// Download speed in bytes per second.
    pub dlspeed: u64,
    /// Seconds remaining; the client uses a sentinel for "unknown".
    pub eta: Option<i64>,
}

/// Aggregated package status from the remote link manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteRawStatus {
    /// Package name.
    pub name: Option<String>,
    /// Total bytes when known.
    pub bytes_total: Option<u64>,
    /// Bytes loaded.
    pub bytes_loaded: u64,
    /// Speed in bytes per second.
    pub speed: Option<u64>,
    /// Seconds remaining.
    pub eta: Option<i64>,
    /// Free-form status text.
    pub status: Option<String>,
    /// Whether the manager flags the package as finished.
    pub finished: bool,
    /// Whether the package is actively downloading.
    pub running: bool,
}

/// Raw status payload tagged with the backend that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum RawStatus {
    /// Native stream copy.
    Native(NativeRawStatus),
    /// Torrent client entry.
    Torrent(TorrentRawStatus),
    /// Remote link-manager package.
    Remote(RemoteRawStatus),
}

impl RawStatus {
    /// Backend that produced the payload.
    #[must_use]
    pub const fn kind(&self) -> BackendKind {
        match self {
            Self::Native(_) => BackendKind::Native,
            Self::Torrent(_) => BackendKind::Torrent,
            Self::Remote(_) => BackendKind::Remote,
        }
    }
}

/// Canonical status snapshot for a transfer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferStatus {
    /// Display name reported by the backend.
    pub name: Option<String>,
    /// Total bytes; zero when unknown.
    pub bytes_total: u64,
    /// Bytes transferred.
    pub bytes_done: u64,
    /// Throughput in bytes per second.
    pub speed_bps: f64,
    /// Estimated seconds remaining.
    pub eta_seconds: Option<i64>,
    /// Lifecycle phase.
    pub phase: TransferPhase,
    /// Failure classification for failed transfers.
    pub failure: Option<FailureReason>,
    /// Human-readable error detail.
    pub error_message: Option<String>,
    /// Time the snapshot was produced.
    pub updated_at: DateTime<Utc>,
}

impl TransferStatus {
    /// Status of a transfer that has not produced data yet.
    #[must_use]
    pub fn pending() -> Self {
        Self {
            name: None,
            bytes_total: 0,
            bytes_done: 0,
            speed_bps: 0.0,
            eta_seconds: None,
            phase: TransferPhase::Pending,
            failure: None,
            error_message: None,
            updated_at: Utc::now(),
        }
    }

    /// Completion percentage, or `None` while the total is unknown.
    #[allow(clippy::cast_precision_loss)]
    #[must_use]
    pub fn percent(&self) -> Option<f64> {
        if self.bytes_total == 0 {
            return None;
        }
        Some((self.bytes_done as f64 / self.bytes_total as f64 * 100.0).clamp(0.0, 100.0))
    }

    /// Whether the phase is terminal.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        self.phase.is_terminal()
    }

    /// Replace this snapshot with `next` unless this snapshot is already terminal.
    ///
    /// The display name is carried forward when `next` does not report one.
    /// Returns whether the update was applied.
    pub fn advance(&mut self, mut next: Self) -> bool {
        if self.is_terminal() {
            return false;
        }
        if next.name.is_none() {
            next.name = self.name.take();
        }
        *self = next;
        true
    }

    /// Move into a terminal phase while keeping the last observed counters.
    ///
    /// Returns whether the transition was applied; terminal snapshots never change.
    pub fn terminate(
        &mut self,
        phase: TransferPhase,
        failure: Option<FailureReason>,
        message: Option<String>,
    ) -> bool {
        if self.is_terminal() || !phase.is_terminal() {
            return false;
        }
        self.phase = phase;
        self.failure = failure;
        self.error_message = message;
        self.speed_bps = 0.0;
        self.eta_seconds = None;
        if phase == TransferPhase::Finished && self.bytes_total > 0 {
            self.bytes_done = self.bytes_total;
        }
        self.updated_at = Utc::now();
        true
    }
}

impl Default for TransferStatus {
    fn default() -> Self {
        Self::pending()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_validation_rejects_blank_fields() {
        let blank_source = TransferRequest::new("  ", "/tmp", BackendKind::Native);
        assert!(matches!(
            blank_source.validate(),
            Err(TransferError::InvalidRequest {
                field: "source",
                ..
            })
        ));

        let zero_deadline =
            TransferRequest::new("https://example.invalid/a", "/tmp", BackendKind::Native)
                .with_deadline(Duration::ZERO);
        assert!(matches!(
            zero_deadline.validate(),
            Err(TransferError::InvalidRequest {
                field: "deadline",
                ..
            })
        ));

        let ok = TransferRequest::new("magnet:?xt=urn:btih:abc", "/tmp", BackendKind::Torrent)
            .with_tag("anime")
            .with_deadline(Duration::from_secs(60));
        assert!(ok.validate().is_ok());
        assert_eq!(ok.tag(), Some("anime"));
    }

    #[test]
    fn percent_is_indeterminate_without_total() {
        let mut status = TransferStatus::pending();
        assert_eq!(status.percent(), None);
        status.bytes_total = 200;
        status.bytes_done = 50;
        assert_eq!(status.percent(), Some(25.0));
    }

    #[test]
    fn terminal_status_never_regresses() {
        let mut status = TransferStatus::pending();
        status.bytes_total = 10;
        status.bytes_done = 4;
        assert!(status.terminate(
            TransferPhase::Failed,
            Some(FailureReason::PollingUnstable),
            Some("unstable".into())
        ));

        let mut running = TransferStatus::pending();
        running.phase = TransferPhase::Running;
        assert!(!status.advance(running));
        assert!(!status.terminate(TransferPhase::Finished, None, None));
        assert_eq!(status.phase, TransferPhase::Failed);
        assert_eq!(status.bytes_done, 4);
    }

    #[test]
    fn advance_keeps_known_name() {
        let mut status = TransferStatus::pending();
        status.name = Some("movie.mkv".into());
        let mut next = TransferStatus::pending();
        next.phase = TransferPhase::Running;
        assert!(status.advance(next));
        assert_eq!(status.name.as_deref(), Some("movie.mkv"));
        assert_eq!(status.phase, TransferPhase::Running);
    }

    #[test]
    fn backend_kind_parses_labels() {
        assert_eq!("Torrent".parse::<BackendKind>().ok(), Some(BackendKind::Torrent));
        assert!("ftp".parse::<BackendKind>().is_err());
        assert!(BackendKind::Remote.requires_promotion());
        assert!(!BackendKind::Native.requires_promotion());
    }
}
