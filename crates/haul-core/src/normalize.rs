//! Mapping of backend status payloads onto [`TransferStatus`].
//!
//! # Design
//! - One table per backend holds its vocabulary; adding a backend means adding a table.
//! - Missing totals become `0` so the percentage stays indeterminate.
//! - Byte counters are clamped so `bytes_done <= bytes_total` whenever the total is known.

use chrono::Utc;
use haul_events::TransferPhase;

use crate::error::FailureReason;
use crate::model::{
    BackendKind, NativeRawStatus, NativeState, RawStatus, RemoteRawStatus, TorrentRawStatus,
    TransferStatus,
};

/// Torrent client state keywords and the phase each maps to.
const TORRENT_STATES: &[(&str, TransferPhase)] = &[
    ("error", TransferPhase::Failed),
    ("missingFiles", TransferPhase::Failed),
    ("uploading", TransferPhase::Finished),
    ("stalledUP", TransferPhase::Finished),
    ("pausedUP", TransferPhase::Finished),
    ("stoppedUP", TransferPhase::Finished),
    ("forcedUP", TransferPhase::Finished),
    ("queuedUP", TransferPhase::Finished),
    ("checkingUP", TransferPhase::Finished),
    ("downloading", TransferPhase::Running),
    ("forcedDL", TransferPhase::Running),
    ("stalledDL", TransferPhase::Running),
    ("metaDL", TransferPhase::Running),
    ("forcedMetaDL", TransferPhase::Running),
    ("queuedDL", TransferPhase::Pending),
    ("checkingDL", TransferPhase::Pending),
    ("pausedDL", TransferPhase::Pending),
    ("stoppedDL", TransferPhase::Pending),
    ("allocating", TransferPhase::Pending),
    ("checkingResumeData", TransferPhase::Pending),
    ("moving", TransferPhase::Pending),
];

/// Sentinel the torrent client reports for an unknown ETA (100 days).
const TORRENT_ETA_UNKNOWN: i64 = 8_640_000;

/// Lower-case fragments of remote manager status text that mean failure.
const REMOTE_FAILURE_MARKERS: &[&str] = &[
    "failed",
    "file not found",
    "offline",
    "error",
    "skipped",
    "aborted",
];

/// Normalise a raw backend payload into the canonical status.
///
/// A payload that does not match `kind` yields a failed status rather than
/// being interpreted with the wrong vocabulary.
#[must_use]
pub fn normalize(kind: BackendKind, raw: &RawStatus) -> TransferStatus {
    match (kind, raw) {
        (BackendKind::Native, RawStatus::Native(status)) => native(status),
        (BackendKind::Torrent, RawStatus::Torrent(status)) => torrent(status),
        (BackendKind::Remote, RawStatus::Remote(status)) => remote(status),
        (expected, other) => {
            let mut status = TransferStatus::pending();
            let _ = status.terminate(
                TransferPhase::Failed,
                Some(FailureReason::BackendReportedFailure),
                Some(format!(
                    "{} backend returned a {} status payload",
                    expected,
                    other.kind()
                )),
            );
            status
        }
    }
}

fn native(raw: &NativeRawStatus) -> TransferStatus {
    let (phase, total, message) = match raw.state {
        NativeState::Connecting => (TransferPhase::Pending, raw.bytes_total, None),
        NativeState::Streaming if raw.bytes_done == 0 => {
            (TransferPhase::Pending, raw.bytes_total, None)
        }
        NativeState::Streaming => (TransferPhase::Running, raw.bytes_total, None),
        // A completed copy without a content length knows its size now.
        NativeState::Completed => (
            TransferPhase::Finished,
            raw.bytes_total.or(Some(raw.bytes_done)),
            None,
        ),
        NativeState::Failed => (
            TransferPhase::Failed,
            raw.bytes_total,
            raw.error.clone().or_else(|| Some("stream copy failed".into())),
        ),
        NativeState::Aborted => (TransferPhase::Cancelled, raw.bytes_total, None),
    };
    let eta = eta_from_rate(total, raw.bytes_done, raw.speed_bps);
    canonical(Parts {
        name: raw.name.clone(),
        total,
        done: raw.bytes_done,
        speed: raw.speed_bps,
        eta,
        phase,
        message,
    })
}

fn torrent(raw: &TorrentRawStatus) -> TransferStatus {
    let phase = TORRENT_STATES
        .iter()
        .find(|(state, _)| *state == raw.state)
        .map_or(TransferPhase::Pending, |(_, phase)| *phase);
    let total = raw.size.filter(|size| *size > 0);
    let done = match total {
        Some(size) if raw.progress.is_finite() => fraction_of(size, raw.progress),
        _ => raw.downloaded,
    };
    let message = (phase == TransferPhase::Failed)
        .then(|| format!("torrent client reported state {}", raw.state));
    #[allow(clippy::cast_precision_loss)]
    let speed = raw.dlspeed as f64;
    canonical(Parts {
        name: raw.name.clone(),
        total,
        done,
        speed,
        eta: raw.eta.filter(|eta| *eta != TORRENT_ETA_UNKNOWN),
        phase,
        message,
    })
}

fn remote(raw: &RemoteRawStatus) -> TransferStatus {
    let failure_text = raw.status.as_deref().filter(|text| {
        let lowered = text.to_ascii_lowercase();
        REMOTE_FAILURE_MARKERS
            .iter()
            .any(|marker| lowered.contains(marker))
    });
    let (phase, total) = if raw.finished {
        (
            TransferPhase::Finished,
            raw.bytes_total.or(Some(raw.bytes_loaded)),
        )
    } else if failure_text.is_some() {
        (TransferPhase::Failed, raw.bytes_total)
    } else if raw.running || raw.bytes_loaded > 0 {
        (TransferPhase::Running, raw.bytes_total)
    } else {
        (TransferPhase::Pending, raw.bytes_total)
    };
    #[allow(clippy::cast_precision_loss)]
    let speed = raw.speed.unwrap_or(0) as f64;
    canonical(Parts {
        name: raw.name.clone(),
        total,
        done: raw.bytes_loaded,
        speed,
        eta: raw.eta,
        phase,
        message: failure_text.filter(|_| phase == TransferPhase::Failed).map(str::to_string),
    })
}

struct Parts {
    name: Option<String>,
    total: Option<u64>,
    done: u64,
    speed: f64,
    eta: Option<i64>,
    phase: TransferPhase,
    message: Option<String>,
}

fn canonical(parts: Parts) -> TransferStatus {
    let total = parts.total.unwrap_or(0);
    let mut done = if total > 0 {
        parts.done.min(total)
    } else {
        parts.done
    };
    if parts.phase == TransferPhase::Finished && total > 0 {
        done = total;
    }
    let speed = if parts.speed.is_finite() && parts.speed > 0.0 {
        parts.speed
    } else {
        0.0
    };
    let active = !parts.phase.is_terminal();
    TransferStatus {
        name: parts.name,
        bytes_total: total,
        bytes_done: done,
        speed_bps: if active { speed } else { 0.0 },
        eta_seconds: parts.eta.filter(|eta| active && *eta >= 0),
        phase: parts.phase,
        failure: (parts.phase == TransferPhase::Failed)
            .then_some(FailureReason::BackendReportedFailure),
        error_message: parts.message,
        updated_at: Utc::now(),
    }
}

#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
fn fraction_of(total: u64, fraction: f64) -> u64 {
    (total as f64 * fraction.clamp(0.0, 1.0)).round() as u64
}

#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
fn eta_from_rate(total: Option<u64>, done: u64, speed: f64) -> Option<i64> {
    let total = total.filter(|total| *total > 0)?;
    if !speed.is_finite() || speed <= 0.0 {
        return None;
    }
    let remaining = total.saturating_sub(done) as f64;
    Some((remaining / speed).ceil() as i64)
}
