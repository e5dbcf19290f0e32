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

//! Backend adapters implementing [`haul_core::BackendAdapter`].
//!
//! # Design
//! - [`NativeAdapter`] streams HTTP or local sources in-process.
//! - [`TorrentAdapter`] drives a torrent client over its web API.
//! - [`RemoteAdapter`] hands links to a remote link manager and promotes them
//!   from its collector to the download list.
//! - Transport failures map to `BackendUnavailable` in one place so the
//!   controller can retry them uniformly.

mod error;
pub mod native;
pub mod remote;
pub mod torrent;

pub use native::NativeAdapter;
pub use remote::RemoteAdapter;
pub use torrent::TorrentAdapter;
