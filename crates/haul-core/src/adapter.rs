//! Capability surface implemented by every backend.

use async_trait::async_trait;

use crate::error::TransferResult;
use crate::model::{BackendKind, RawStatus, TransferHandle, TransferRequest};

/// Result of a promote attempt on a staged backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Promotion {
    /// Links are not collected yet; try again on the next cycle.
    Pending,
    /// Transfer is in the active queue; poll with the returned handle.
    Promoted(TransferHandle),
}

/// Result of a status query.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutcome {
    /// Handle is not visible yet; the backend is still catching up.
    Pending,
    /// Backend returned a raw status payload.
    Status(RawStatus),
}

/// Uniform backend capability set driven by the transfer controller.
///
/// Implementations own their connection lifecycle. Connection failures must
/// surface as [`crate::TransferError::BackendUnavailable`] so callers can
/// retry with backoff.
#[async_trait]
pub trait BackendAdapter: Send + Sync {
    /// Backend family served by this adapter.
    fn kind(&self) -> BackendKind;

    /// Establish or refresh the backend session.
    async fn ensure_connected(&self) -> TransferResult<()> {
        Ok(())
    }

    /// Admit a transfer and return the backend handle.
    ///
    /// Repeating a call for the same request must not create duplicate
    /// backend entries.
    async fn add(&self, request: &TransferRequest) -> TransferResult<TransferHandle>;

    /// Move a staged transfer into the active queue. Backends without a
    /// staging area return the handle unchanged.
    async fn promote(&self, handle: &TransferHandle) -> TransferResult<Promotion> {
        Ok(Promotion::Promoted(handle.clone()))
    }

    /// Fetch the current raw status.
    async fn query_status(&self, handle: &TransferHandle) -> TransferResult<QueryOutcome>;

    /// Stop the transfer. Best-effort; terminal transfers are not an error.
    async fn cancel(&self, handle: &TransferHandle) -> TransferResult<()>;

    /// Drop backend bookkeeping, deleting payload files when requested.
    /// Removing an unknown or already-removed handle succeeds.
    async fn remove(&self, handle: &TransferHandle, delete_files: bool) -> TransferResult<()>;
}
