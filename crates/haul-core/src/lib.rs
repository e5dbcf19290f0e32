#![forbid(unsafe_code)]
#![deny(
    warnings,
    dead_code,
    unused,
    unused_imports,
    unused_must_use,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]

//! Backend-agnostic transfer interfaces and DTOs.
//!
//! # Design
//! - Backends are selected once per request through [`BackendKind`] and never re-inspected.
//! - Raw backend payloads stay typed per backend; [`normalize`] is the only place that maps them
//!   onto the canonical [`TransferStatus`].
//! - Errors carry the retry classification used by the runtime controller.

pub mod adapter;
pub mod error;
pub mod format;
pub mod model;
pub mod normalize;
pub mod reporter;

pub use adapter::{BackendAdapter, Promotion, QueryOutcome};
pub use error::{DEADLINE_MESSAGE, FailureReason, TransferError, TransferResult};
pub use haul_events::TransferPhase;
pub use model::{
    BackendKind, NativeRawStatus, NativeState, RawStatus, RemoteRawStatus, RemoteStage,
    TorrentRawStatus, TransferHandle, TransferId, TransferRequest, TransferStatus,
};
pub use normalize::normalize;
pub use reporter::{ProgressReporter, ReportError};
