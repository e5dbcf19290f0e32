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

//! Event bus for transfer lifecycle notifications.
//!
//! # Design
//! - Events carry sequential identifiers so subscribers can resume from a cursor.
//! - A bounded replay ring backs late subscribers; the oldest entries drop first.
//! - Live delivery uses `tokio::broadcast`; lagging subscribers skip ahead instead of
//!   blocking publishers.

pub mod payloads;
pub mod routing;

pub use payloads::{DEFAULT_REPLAY_CAPACITY, Event, EventEnvelope, EventId, TransferPhase};
pub use routing::{EventBus, EventStream};
