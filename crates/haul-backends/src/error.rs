//! # Design
//!
//! - Centralize backend error context without leaking transport types.
//! - Keep error messages constant; store operational context in fields.
//! - Classify failures into the retry taxonomy in one place ([`op_failed`]).

use std::path::PathBuf;

use haul_core::{BackendKind, TransferError};
use reqwest::StatusCode;
use thiserror::Error;

/// Internal error details shared by the HTTP-backed adapters.
#[derive(Debug, Error)]
pub(crate) enum BackendError {
    /// Request never produced a response.
    #[error("backend transport failure")]
    Transport {
        /// Underlying HTTP client error.
        #[source]
        source: reqwest::Error,
    },
    /// Response carried an unexpected HTTP status.
    #[error("backend returned unexpected status")]
    Status {
        /// HTTP status code.
        status: StatusCode,
        /// Response body, truncated.
        body: String,
    },
    /// Credentials were rejected.
    #[error("backend authentication rejected")]
    Auth {
        /// Detail reported by the backend.
        detail: String,
    },
    /// Backend API answered with an application-level error.
    #[error("backend API error")]
    Api {
        /// Message reported by the backend.
        message: String,
    },
}

impl From<reqwest::Error> for BackendError {
    fn from(source: reqwest::Error) -> Self {
        Self::Transport { source }
    }
}

const MAX_BODY: usize = 512;

/// Capture a failed response as [`BackendError::Status`].
pub(crate) async fn status_error(response: reqwest::Response) -> BackendError {
    let status = response.status();
    let mut body = response.text().await.unwrap_or_default();
    if body.len() > MAX_BODY {
        let cut = (0..=MAX_BODY)
            .rev()
            .find(|idx| body.is_char_boundary(*idx))
            .unwrap_or(0);
        body.truncate(cut);
    }
    BackendError::Status { status, body }
}

/// Map a backend failure onto the transfer error taxonomy.
///
/// Connection failures, timeouts, and server-side errors are transient;
/// `404` becomes [`TransferError::NotFound`]; everything else is reported as a
/// backend failure with the detail forwarded.
pub(crate) fn op_failed(
    backend: BackendKind,
    operation: &'static str,
    subject: &str,
    err: BackendError,
) -> TransferError {
    match err {
        BackendError::Transport { source } if source.is_decode() => {
            TransferError::BackendReportedFailure {
                backend,
                message: Some(format!("{operation}: malformed response from backend")),
            }
        }
        BackendError::Transport { source } => {
            TransferError::unavailable(backend, operation, source)
        }
        BackendError::Status { status, .. } if status == StatusCode::NOT_FOUND => {
            TransferError::not_found(operation, subject)
        }
        BackendError::Status { status, .. }
            if status.is_server_error()
                || status == StatusCode::TOO_MANY_REQUESTS
                || status == StatusCode::REQUEST_TIMEOUT =>
        {
            TransferError::unavailable(backend, operation, err)
        }
        BackendError::Status { status, body } => TransferError::BackendReportedFailure {
            backend,
            message: Some(if body.is_empty() {
                format!("{operation} rejected with HTTP {}", status.as_u16())
            } else {
                format!("{operation} rejected with HTTP {}: {body}", status.as_u16())
            }),
        },
        BackendError::Auth { detail } => TransferError::BackendReportedFailure {
            backend,
            message: Some(format!("{operation}: authentication rejected ({detail})")),
        },
        BackendError::Api { message } => TransferError::BackendReportedFailure {
            backend,
            message: Some(format!("{operation}: {message}")),
        },
    }
}

/// Build a [`TransferError::Io`] for local filesystem failures.
pub(crate) fn io_failed(
    operation: &'static str,
    path: impl Into<PathBuf>,
    source: std::io::Error,
) -> TransferError {
    TransferError::Io {
        operation,
        path: path.into(),
        source,
    }
}
