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

//! File and environment backed configuration for the transfer runtime.
//!
//! Layout: `model.rs` (typed config models), `defaults.rs` (default values),
//! `loader.rs` (JSON file + `HAUL_*` environment overrides), `validate.rs`
//! (structural checks run after every load).

mod defaults;
pub mod error;
pub mod loader;
pub mod model;
pub mod validate;

pub use error::{ConfigError, ConfigResult};
pub use loader::ENV_PREFIX;
pub use model::{
    ControllerPolicy, HaulConfig, LogOutput, LoggingSettings, NativeConfig, PollIntervals,
    RemoteConfig, RemoteConnectionMode, TorrentConfig,
};
