//! Turns event bus traffic for one transfer into printable progress lines.

use haul_core::TransferStatus;
use haul_core::format::progress_line;
use haul_events::{Event, TransferPhase};
use uuid::Uuid;

/// Follows the events of a single transfer and renders a line per update.
#[derive(Debug)]
pub struct ConsoleRenderer {
    transfer_id: Uuid,
    status: TransferStatus,
}

impl ConsoleRenderer {
    /// Renderer bound to `transfer_id`; events for other transfers are ignored.
    #[must_use]
    pub fn new(transfer_id: Uuid) -> Self {
        Self {
            transfer_id,
            status: TransferStatus::pending(),
        }
    }

    /// Line to print for `event`, if any.
    pub fn render(&mut self, event: &Event) -> Option<String> {
        if event.transfer_id() != self.transfer_id {
            return None;
        }
        match event {
            Event::TransferAdded {
                backend, source, ..
            } => Some(format!("queued {source} on {backend}")),
            Event::Progress {
                name,
                bytes_done,
                bytes_total,
                speed_bps,
                eta_seconds,
                ..
            } => {
                if name.is_some() {
                    self.status.name.clone_from(name);
                }
                self.status.bytes_done = *bytes_done;
                self.status.bytes_total = *bytes_total;
                self.status.speed_bps = *speed_bps;
                self.status.eta_seconds = *eta_seconds;
                Some(progress_line(&self.status))
            }
            Event::PhaseChanged { phase, .. } => {
                self.status.phase = *phase;
                (!phase.is_terminal() && *phase != TransferPhase::Pending)
                    .then(|| progress_line(&self.status))
            }
            Event::Finished { destination, .. } => {
                Some(format!("finished: saved to {destination}"))
            }
            Event::Failed {
                reason, message, ..
            } => Some(message.as_ref().map_or_else(
                || format!("failed: {reason}"),
                |message| format!("failed: {message} ({reason})"),
            )),
            Event::Cancelled { .. } => Some("cancelled".to_string()),
            Event::Removed { .. } => None,
        }
    }
}
