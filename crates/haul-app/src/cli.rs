//! Command-line surface of the `haul` binary.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};
use haul_core::{BackendKind, TransferRequest};

use crate::error::{AppError, AppResult};

/// Top-level arguments.
#[derive(Debug, Parser)]
#[command(name = "haul", about = "Fetch files through native, torrent, or remote backends")]
pub struct Cli {
    /// Optional JSON configuration file.
    #[arg(long, global = true, env = "HAUL_CONFIG")]
    pub config: Option<PathBuf>,
    /// Command to run.
    #[command(subcommand)]
    pub command: Command,
}

/// Supported commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Download one resource and follow its progress until it ends.
    Fetch(FetchArgs),
}

/// Arguments of `haul fetch`.
#[derive(Debug, Clone, Args)]
pub struct FetchArgs {
    /// URL, magnet link, `.torrent` file, or local path.
    #[arg(help = "URL, magnet link, .torrent file, or local path")]
    pub source: String,
    /// Backend override; inferred from the source when omitted.
    #[arg(long, value_enum)]
    pub backend: Option<BackendArg>,
    /// Destination directory; defaults to the configured download root.
    #[arg(long)]
    pub dest: Option<PathBuf>,
    /// Wall-clock budget in seconds.
    #[arg(long)]
    pub deadline: Option<u64>,
    /// Tag attached to the transfer on the backend.
    #[arg(long)]
    pub tag: Option<String>,
}

/// Backend names accepted on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BackendArg {
    /// In-process stream copy.
    Native,
    /// qBittorrent WebUI.
    Torrent,
    /// Remote link manager.
    Remote,
}

impl From<BackendArg> for BackendKind {
    fn from(value: BackendArg) -> Self {
        match value {
            BackendArg::Native => Self::Native,
            BackendArg::Torrent => Self::Torrent,
            BackendArg::Remote => Self::Remote,
        }
    }
}

/// Pick a backend for `source` when none was requested.
///
/// Magnet links and `.torrent` files go to the torrent client; anything else is
/// copied natively.
#[must_use]
pub fn infer_backend(source: &str) -> BackendKind {
    let trimmed = source.trim();
    let lowered = trimmed.to_ascii_lowercase();
    if lowered.starts_with("magnet:") {
        return BackendKind::Torrent;
    }
    let path = lowered.split(['?', '#']).next().unwrap_or_default();
    if path.ends_with(".torrent") {
        return BackendKind::Torrent;
    }
    BackendKind::Native
}

impl FetchArgs {
    /// Build the transfer request, falling back to `download_root` for the destination.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::InvalidArgument`] for a zero deadline or blank tag.
    pub fn to_request(&self, download_root: &std::path::Path) -> AppResult<TransferRequest> {
        let backend = self
            .backend
            .map_or_else(|| infer_backend(&self.source), BackendKind::from);
        let destination = self
            .dest
            .clone()
            .unwrap_or_else(|| download_root.to_path_buf());
        let mut request = TransferRequest::new(self.source.trim(), destination, backend);
        if let Some(secs) = self.deadline {
            if secs == 0 {
                return Err(AppError::InvalidArgument {
                    field: "deadline",
                    reason: "zero",
                    value: Some(secs.to_string()),
                });
            }
            request = request.with_deadline(Duration::from_secs(secs));
        }
        if let Some(tag) = &self.tag {
            let tag = tag.trim();
            if tag.is_empty() {
                return Err(AppError::InvalidArgument {
                    field: "tag",
                    reason: "blank",
                    value: None,
                });
            }
            request = request.with_tag(tag);
        }
        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn parse(args: &[&str]) -> FetchArgs {
        let cli = Cli::try_parse_from(args).expect("valid arguments");
        match cli.command {
            Command::Fetch(args) => args,
        }
    }

    #[test]
    fn backend_is_inferred_from_source() {
        assert_eq!(
            infer_backend("magnet:?xt=urn:btih:abcdef"),
            BackendKind::Torrent
        );
        assert_eq!(
            infer_backend("https://example.invalid/ubuntu.torrent?token=1"),
            BackendKind::Torrent
        );
        assert_eq!(infer_backend("/tmp/local.TORRENT"), BackendKind::Torrent);
        assert_eq!(
            infer_backend("https://example.invalid/file.zip"),
            BackendKind::Native
        );
        assert_eq!(infer_backend("./notes.txt"), BackendKind::Native);
    }

    #[test]
    fn fetch_builds_request_with_overrides() {
        let args = parse(&[
            "haul",
            "fetch",
            "https://hoster.example.invalid/f/1",
            "--backend",
            "remote",
            "--dest",
            "/data",
            "--deadline",
            "90",
            "--tag",
            "movies",
        ]);
        let request = args.to_request(Path::new("/downloads")).expect("request");
        assert_eq!(request.backend(), BackendKind::Remote);
        assert_eq!(request.destination(), Path::new("/data"));
        assert_eq!(request.deadline(), Some(Duration::from_secs(90)));
        assert_eq!(request.tag(), Some("movies"));
    }

    #[test]
    fn fetch_defaults_to_download_root() {
        let args = parse(&["haul", "fetch", "magnet:?xt=urn:btih:abc"]);
        let request = args.to_request(Path::new("/downloads")).expect("request");
        assert_eq!(request.backend(), BackendKind::Torrent);
        assert_eq!(request.destination(), Path::new("/downloads"));
        assert_eq!(request.deadline(), None);
    }

    #[test]
    fn zero_deadline_is_rejected() {
        let args = parse(&["haul", "fetch", "https://a.invalid/x", "--deadline", "0"]);
        assert!(matches!(
            args.to_request(Path::new("/d")),
            Err(AppError::InvalidArgument { field: "deadline", .. })
        ));
    }

    #[test]
    fn unknown_backend_is_a_parse_error() {
        assert!(Cli::try_parse_from(["haul", "fetch", "x", "--backend", "ftp"]).is_err());
    }
}
