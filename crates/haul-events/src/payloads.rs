//! Event payload types carried across the workspace.

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Identifier assigned to each event emitted by the bus.
pub type EventId = u64;

/// Default buffer size for the in-memory replay ring.
pub const DEFAULT_REPLAY_CAPACITY: usize = 1_024;

/// Canonical lifecycle stage of a transfer, independent of backend vocabulary.
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum TransferPhase {
    /// Accepted by the backend but not yet moving bytes.
    #[default]
    Pending,
    /// Bytes are flowing.
    Running,
    /// All bytes have been written to the destination.
    Finished,
    /// The transfer stopped because of an error.
    Failed,
    /// The transfer was cancelled by the caller.
    Cancelled,
}

impl TransferPhase {
    /// Whether the phase ends the transfer lifecycle.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Failed | Self::Cancelled)
    }

    /// Stable lowercase label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Finished => "finished",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for TransferPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed domain events surfaced across the system.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A transfer was registered and its controller started.
    TransferAdded {
        /// Identifier for the transfer.
        transfer_id: Uuid,
        /// Backend kind label (`native`, `torrent`, `remote`).
        backend: String,
        /// Source reference supplied by the caller.
        source: String,
    },
    /// Periodic progress update emitted while a transfer is active.
    Progress {
        /// Identifier for the transfer.
        transfer_id: Uuid,
        /// Display name reported by the backend, when known.
        name: Option<String>,
        /// Bytes written so far.
        bytes_done: u64,
        /// Total bytes expected; zero when unknown.
        bytes_total: u64,
        /// Current throughput in bytes per second.
        speed_bps: f64,
        /// Estimated seconds until completion.
        eta_seconds: Option<i64>,
    },
    /// Transfer moved into a new phase.
    PhaseChanged {
        /// Identifier for the transfer.
        transfer_id: Uuid,
        /// Updated phase.
        phase: TransferPhase,
    },
    /// Transfer finished and its files are in place.
    Finished {
        /// Identifier for the transfer.
        transfer_id: Uuid,
        /// Destination path of the downloaded payload.
        destination: String,
    },
    /// Transfer reached a failed terminal state.
    Failed {
        /// Identifier for the transfer.
        transfer_id: Uuid,
        /// Machine-readable failure reason.
        reason: String,
        /// Human-readable detail forwarded from the backend when available.
        message: Option<String>,
    },
    /// Transfer was cancelled by the caller.
    Cancelled {
        /// Identifier for the transfer.
        transfer_id: Uuid,
    },
    /// Transfer controller released its registry slot.
    Removed {
        /// Identifier for the transfer.
        transfer_id: Uuid,
    },
}

impl Event {
    /// Machine-friendly discriminator for subscribers and metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::TransferAdded { .. } => "transfer_added",
            Self::Progress { .. } => "progress",
            Self::PhaseChanged { .. } => "phase_changed",
            Self::Finished { .. } => "finished",
            Self::Failed { .. } => "failed",
            Self::Cancelled { .. } => "cancelled",
            Self::Removed { .. } => "removed",
        }
    }

    /// Transfer the event refers to.
    #[must_use]
    pub const fn transfer_id(&self) -> Uuid {
        match self {
            Self::TransferAdded { transfer_id, .. }
            | Self::Progress { transfer_id, .. }
            | Self::PhaseChanged { transfer_id, .. }
            | Self::Finished { transfer_id, .. }
            | Self::Failed { transfer_id, .. }
            | Self::Cancelled { transfer_id }
            | Self::Removed { transfer_id } => *transfer_id,
        }
    }
}

/// Metadata wrapper around events. Each envelope tracks the event id and
/// emission timestamp.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq)]
pub struct EventEnvelope {
    /// Sequential identifier assigned by the bus.
    pub id: EventId,
    /// Time the event was published.
    pub timestamp: DateTime<Utc>,
    /// Event payload.
    pub event: Event,
}
