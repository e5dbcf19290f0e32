//! Error taxonomy for transfer operations.

use std::error::Error;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{BackendKind, TransferId};

/// Message attached to transfers that ran past their deadline.
pub const DEADLINE_MESSAGE: &str =
    "download took longer than the specified time limit and has been cancelled";

/// Primary error type for transfer operations.
#[derive(Debug, Error)]
pub enum TransferError {
    /// Backend could not be reached; retryable with backoff.
    #[error("backend unavailable")]
    BackendUnavailable {
        /// Backend that failed.
        backend: BackendKind,
        /// Operation identifier.
        operation: &'static str,
        /// Underlying failure.
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
    /// Handle or identifier is unknown to the backend or registry.
    #[error("transfer resource not found")]
    NotFound {
        /// Kind of resource that was looked up.
        resource: &'static str,
        /// Identifier that was looked up.
        id: String,
    },
    /// A transfer with the same identifier is already active.
    #[error("transfer identifier already active")]
    DuplicateId {
        /// Conflicting identifier.
        transfer_id: TransferId,
    },
    /// Transfer exceeded its wall-clock budget.
    #[error("transfer deadline exceeded")]
    DeadlineExceeded {
        /// Affected transfer.
        transfer_id: TransferId,
        /// Configured budget.
        deadline: Duration,
    },
    /// Status polling failed on too many consecutive cycles.
    #[error("status polling unstable")]
    PollingUnstable {
        /// Affected transfer.
        transfer_id: TransferId,
        /// Consecutive failed cycles observed.
        consecutive_errors: u32,
    },
    /// Backend marked the transfer as failed.
    #[error("backend reported failure")]
    BackendReportedFailure {
        /// Backend that reported the failure.
        backend: BackendKind,
        /// Message forwarded from the backend.
        message: Option<String>,
    },
    /// Request failed structural validation.
    #[error("invalid transfer request")]
    InvalidRequest {
        /// Offending field.
        field: &'static str,
        /// Machine-readable reason.
        reason: &'static str,
    },
    /// Local filesystem operation failed.
    #[error("transfer I/O failed")]
    Io {
        /// Operation identifier.
        operation: &'static str,
        /// Path involved in the failure.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

impl TransferError {
    /// Construct a [`TransferError::BackendUnavailable`] from any error source.
    pub fn unavailable(
        backend: BackendKind,
        operation: &'static str,
        source: impl Into<Box<dyn Error + Send + Sync>>,
    ) -> Self {
        Self::BackendUnavailable {
            backend,
            operation,
            source: source.into(),
        }
    }

    /// Construct a [`TransferError::NotFound`] for a backend handle or registry id.
    pub fn not_found(resource: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            resource,
            id: id.into(),
        }
    }

    /// Whether the controller may retry the failed call with backoff.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::BackendUnavailable { .. })
    }

    /// Terminal classification recorded in the final status.
    #[must_use]
    pub const fn failure_reason(&self) -> FailureReason {
        match self {
            Self::BackendUnavailable { .. } => FailureReason::BackendUnreachable,
            Self::DeadlineExceeded { .. } => FailureReason::DeadlineExceeded,
            Self::PollingUnstable { .. } => FailureReason::PollingUnstable,
            Self::BackendReportedFailure { .. } | Self::NotFound { .. } | Self::Io { .. } => {
                FailureReason::BackendReportedFailure
            }
            Self::DuplicateId { .. } | Self::InvalidRequest { .. } => FailureReason::Rejected,
        }
    }

    /// Message surfaced to callers in the terminal status.
    #[must_use]
    pub fn status_message(&self) -> String {
        match self {
            Self::DeadlineExceeded { .. } => DEADLINE_MESSAGE.to_string(),
            Self::BackendReportedFailure {
                message: Some(message),
                ..
            } => message.clone(),
            Self::BackendUnavailable { source, .. } => format!("{self}: {source}"),
            Self::Io { source, path, .. } => format!("{self} ({}): {source}", path.display()),
            Self::NotFound { resource, id } => format!("{resource} {id} not found"),
            Self::InvalidRequest { field, reason } => format!("{field} {reason}"),
            _ => self.to_string(),
        }
    }
}

/// Convenience alias for transfer operation results.
pub type TransferResult<T> = Result<T, TransferError>;

/// Serializable classification of a failed transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// Backend stayed unreachable through every start attempt.
    BackendUnreachable,
    /// Transfer ran past its deadline.
    DeadlineExceeded,
    /// Status polling kept failing.
    PollingUnstable,
    /// Backend flagged the transfer as failed.
    BackendReportedFailure,
    /// Backend or runtime refused the request outright.
    Rejected,
}

impl FailureReason {
    /// Stable label used in events and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::BackendUnreachable => "backend_unreachable",
            Self::DeadlineExceeded => "deadline_exceeded",
            Self::PollingUnstable => "polling_unstable",
            Self::BackendReportedFailure => "backend_reported_failure",
            Self::Rejected => "rejected",
        }
    }
}
