//! Human-readable rendering helpers for progress output.

use std::fmt::Write as _;
use std::time::Duration;

use crate::model::TransferStatus;

const UNITS: [&str; 6] = ["KiB", "MiB", "GiB", "TiB", "PiB", "EiB"];

/// Number of cells drawn by [`progress_bar`].
pub const BAR_CELLS: usize = 10;

/// Glyphs used to draw a progress bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BarStyle {
    /// Glyph for completed cells.
    pub filled: char,
    /// Glyph for remaining cells.
    pub empty: char,
}

impl Default for BarStyle {
    fn default() -> Self {
        Self {
            filled: '█',
            empty: '░',
        }
    }
}

/// Format a byte count with binary units, e.g. `1.50 MiB`.
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn human_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = UNITS[0];
    for next in &UNITS[1..] {
        if value < 1024.0 {
            break;
        }
        value /= 1024.0;
        unit = next;
    }
    format!("{value:.2} {unit}")
}

/// Format a duration as compact components, e.g. `1h 2m 3s`.
#[must_use]
pub fn human_duration(duration: Duration) -> String {
    let mut secs = duration.as_secs();
    if secs == 0 {
        return "0s".to_string();
    }
    let mut out = String::new();
    for (unit, size) in [("d", 86_400), ("h", 3_600), ("m", 60), ("s", 1)] {
        let count = secs / size;
        secs %= size;
        if count > 0 {
            if !out.is_empty() {
                out.push(' ');
            }
            let _ = write!(out, "{count}{unit}");
        }
    }
    out
}

/// Draw a fixed-width bar; unknown percentages render as all-empty.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
#[must_use]
pub fn progress_bar(percent: Option<f64>, style: BarStyle) -> String {
    let filled = percent.map_or(0, |pct| {
        ((pct.clamp(0.0, 100.0) / 100.0) * BAR_CELLS as f64).floor() as usize
    });
    let mut bar = String::with_capacity(BAR_CELLS * 3);
    bar.extend(std::iter::repeat_n(style.filled, filled));
    bar.extend(std::iter::repeat_n(style.empty, BAR_CELLS - filled));
    bar
}

/// One-line summary of a status snapshot.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
#[must_use]
pub fn progress_line(status: &TransferStatus) -> String {
    let name = status.name.as_deref().unwrap_or("transfer");
    let percent = status
        .percent()
        .map_or_else(|| "--".to_string(), |pct| format!("{pct:.2}%"));
    let total = if status.bytes_total == 0 {
        "?".to_string()
    } else {
        human_bytes(status.bytes_total)
    };
    let eta = status
        .eta_seconds
        .and_then(|eta| u64::try_from(eta).ok())
        .map_or_else(|| "-".to_string(), |eta| human_duration(Duration::from_secs(eta)));
    format!(
        "{name} [{}] {percent} {} of {total} at {}/s eta {eta} ({})",
        progress_bar(status.percent(), BarStyle::default()),
        human_bytes(status.bytes_done),
        human_bytes(status.speed_bps.max(0.0) as u64),
        status.phase,
    )
}
