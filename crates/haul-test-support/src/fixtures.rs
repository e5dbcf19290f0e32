//! Builders for requests and raw backend payloads.

use std::time::Duration;

use haul_core::{
    BackendKind, NativeRawStatus, NativeState, QueryOutcome, RawStatus, RemoteRawStatus,
    TorrentRawStatus, TransferRequest,
};

/// Request for `kind` with a throwaway source and destination.
#[must_use]
pub fn request(kind: BackendKind) -> TransferRequest {
    let source = match kind {
        BackendKind::Native => "https://files.example.invalid/payload.bin",
        BackendKind::Torrent => "magnet:?xt=urn:btih:0123456789abcdef0123456789abcdef01234567",
        BackendKind::Remote => "https://hoster.example.invalid/file/abc",
    };
    TransferRequest::new(source, "/srv/haul", kind)
}

/// Request for `kind` bounded by `deadline`.
#[must_use]
pub fn request_with_deadline(kind: BackendKind, deadline: Duration) -> TransferRequest {
    request(kind).with_deadline(deadline)
}

/// Native stream snapshot.
#[must_use]
pub fn native(done: u64, total: Option<u64>, state: NativeState) -> QueryOutcome {
    QueryOutcome::Status(RawStatus::Native(NativeRawStatus {
        name: Some("payload.bin".into()),
        state,
        bytes_done: done,
        bytes_total: total,
        speed_bps: if state == NativeState::Streaming { 125.0 } else { 0.0 },
        error: None,
    }))
}

/// Torrent snapshot in client vocabulary.
#[must_use]
pub fn torrent(state: &str, progress: f64, size: u64) -> QueryOutcome {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    let downloaded = (progress * size as f64) as u64;
    QueryOutcome::Status(RawStatus::Torrent(TorrentRawStatus {
        name: Some("ubuntu.iso".into()),
        state: state.to_string(),
        progress,
        size: Some(size),
        downloaded,
        dlspeed: 1024,
        eta: Some(30),
    }))
}

/// Link-manager package snapshot.
#[must_use]
pub fn remote(loaded: u64, total: u64, finished: bool) -> QueryOutcome {
    QueryOutcome::Status(RawStatus::Remote(RemoteRawStatus {
        name: Some("archive.rar".into()),
        bytes_total: Some(total),
        bytes_loaded: loaded,
        speed: Some(2048),
        eta: None,
        status: Some(if finished { "Finished" } else { "Downloading" }.into()),
        finished,
        running: !finished,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requests_validate() {
        for kind in BackendKind::ALL {
            let request = request_with_deadline(kind, Duration::from_secs(5));
            assert_eq!(request.backend(), kind);
            assert!(request.validate().is_ok());
        }
    }

    #[test]
    fn torrent_fixture_derives_downloaded_bytes() {
        let QueryOutcome::Status(RawStatus::Torrent(raw)) = torrent("downloading", 0.5, 1000)
        else {
            panic!("torrent payload expected");
        };
        assert_eq!(raw.downloaded, 500);
    }
}
