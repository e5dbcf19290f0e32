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
#![allow(clippy::module_name_repetitions)]

//! Transfer orchestration runtime.
//!
//! # Design
//! - [`TransferRegistry`] owns the id → record map; its locks never span an
//!   adapter call.
//! - One [`TransferController`] task drives each transfer through
//!   `Created → Starting → Promoting → Polling → terminal` and is the only
//!   writer of its record's status.
//! - [`TransferService`] is the caller-facing facade: start, cancel, inspect,
//!   and shut down transfers.
//! - Reporters in [`reporter`] adapt the progress stream for presentation
//!   (throttling, event bus, logs).

pub mod backoff;
pub mod controller;
pub mod registry;
pub mod reporter;
pub mod service;

pub use backoff::Backoff;
pub use controller::{ControllerState, TransferController};
pub use registry::{RecordSnapshot, TransferRecord, TransferRegistry};
pub use reporter::{EventBusReporter, FanoutReporter, ThrottledReporter, TracingReporter};
pub use service::TransferService;
