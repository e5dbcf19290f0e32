//! Boundary towards whatever presents progress to users.

use std::error::Error;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::model::{TransferId, TransferStatus};

/// Failure signalled by a reporter. Never affects the transfer itself.
#[derive(Debug, Error)]
pub enum ReportError {
    /// Presentation layer asked to slow down.
    #[error("progress reporting rate limited")]
    RateLimited {
        /// Minimum wait before the next emission.
        retry_after: Duration,
    },
    /// Presentation layer is unavailable.
    #[error("progress reporter unavailable")]
    Unavailable {
        /// Underlying failure.
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
}

/// Receives normalized status updates for transfers.
#[async_trait]
pub trait ProgressReporter: Send + Sync {
    /// Deliver a status snapshot. Implementations may format, throttle, or drop.
    ///
    /// # Errors
    ///
    /// Returns [`ReportError::RateLimited`] when the caller should back off
    /// emissions, or [`ReportError::Unavailable`] when delivery failed.
    async fn emit(&self, transfer_id: TransferId, status: &TransferStatus)
    -> Result<(), ReportError>;
}
