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

//! Haul application wiring.
//!
//! Layout: `cli.rs` (argument parsing), `bootstrap.rs` (config, logging, and
//! service wiring), `console.rs` (progress line rendering), `error.rs`.

/// Application bootstrap and the fetch command.
pub mod bootstrap;
/// Command-line definitions.
pub mod cli;
/// Console progress rendering.
pub mod console;
/// Application error types.
pub mod error;

pub use bootstrap::{App, build, exit_code, run_fetch};
pub use cli::{Cli, Command, FetchArgs};
pub use error::{AppError, AppResult};
