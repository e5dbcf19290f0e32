//! Progress reporter implementations shipped with the runtime.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use haul_core::format::progress_line;
use haul_core::{ProgressReporter, ReportError, TransferId, TransferPhase, TransferStatus};
use haul_events::{Event, EventBus};
use haul_telemetry::Metrics;
use tokio::time::Instant;
use tracing::info;

/// Forwards phase changes and terminal statuses at once and lets through at most one
/// running update per interval.
pub struct ThrottledReporter {
    inner: Arc<dyn ProgressReporter>,
    interval: Duration,
    last: Mutex<HashMap<TransferId, (TransferPhase, Instant)>>,
}

impl ThrottledReporter {
    /// Wrap `inner`, spacing running updates by `interval`.
    #[must_use]
    pub fn new(inner: Arc<dyn ProgressReporter>, interval: Duration) -> Self {
        Self {
            inner,
            interval,
            last: Mutex::new(HashMap::new()),
        }
    }

    fn should_forward(&self, transfer_id: TransferId, status: &TransferStatus) -> bool {
        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        if status.is_terminal() {
            last.remove(&transfer_id);
            return true;
        }
        let now = Instant::now();
        let forward = last.get(&transfer_id).is_none_or(|(phase, sent)| {
            *phase != status.phase || now.duration_since(*sent) >= self.interval
        });
        if forward {
            last.insert(transfer_id, (status.phase, now));
        }
        drop(last);
        forward
    }
}

#[async_trait]
impl ProgressReporter for ThrottledReporter {
    async fn emit(
        &self,
        transfer_id: TransferId,
        status: &TransferStatus,
    ) -> Result<(), ReportError> {
        if !self.should_forward(transfer_id, status) {
            return Ok(());
        }
        self.inner.emit(transfer_id, status).await
    }
}

/// Publishes statuses on the event bus as `Progress` and `PhaseChanged` events.
pub struct EventBusReporter {
    events: EventBus,
    metrics: Metrics,
    phases: Mutex<HashMap<TransferId, TransferPhase>>,
}

impl EventBusReporter {
    /// Reporter publishing to `events`.
    #[must_use]
    pub fn new(events: EventBus, metrics: Metrics) -> Self {
        Self {
            events,
            metrics,
            phases: Mutex::new(HashMap::new()),
        }
    }

    fn publish(&self, event: Event) {
        self.metrics.inc_event(event.kind());
        let _ = self.events.publish(event);
    }

    /// Terminal phases stay recorded, so a retried terminal status is not republished.
    fn phase_changed(&self, transfer_id: TransferId, phase: TransferPhase) -> bool {
        self.phases
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(transfer_id, phase)
            != Some(phase)
    }
}

#[async_trait]
impl ProgressReporter for EventBusReporter {
    async fn emit(
        &self,
        transfer_id: TransferId,
        status: &TransferStatus,
    ) -> Result<(), ReportError> {
        let uuid = transfer_id.as_uuid();
        if self.phase_changed(transfer_id, status.phase) {
            self.publish(Event::PhaseChanged {
                transfer_id: uuid,
                phase: status.phase,
            });
        }
        if !status.is_terminal() {
            self.publish(Event::Progress {
                transfer_id: uuid,
                name: status.name.clone(),
                bytes_done: status.bytes_done,
                bytes_total: status.bytes_total,
                speed_bps: status.speed_bps,
                eta_seconds: status.eta_seconds,
            });
        }
        Ok(())
    }
}

/// Writes one log line per status.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

#[async_trait]
impl ProgressReporter for TracingReporter {
    async fn emit(
        &self,
        transfer_id: TransferId,
        status: &TransferStatus,
    ) -> Result<(), ReportError> {
        info!(
            transfer_id = %transfer_id,
            phase = %status.phase,
            progress = %progress_line(status),
            "transfer progress"
        );
        Ok(())
    }
}

/// Sends every status to each sink in order.
///
/// All sinks are attempted. The longest rate limit wins; otherwise the first
/// delivery failure is returned.
#[derive(Default)]
pub struct FanoutReporter {
    sinks: Vec<Arc<dyn ProgressReporter>>,
}

impl FanoutReporter {
    /// Fan-out with no sinks.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a sink.
    #[must_use]
    pub fn with(mut self, sink: Arc<dyn ProgressReporter>) -> Self {
        self.sinks.push(sink);
        self
    }
}

#[async_trait]
impl ProgressReporter for FanoutReporter {
    async fn emit(
        &self,
        transfer_id: TransferId,
        status: &TransferStatus,
    ) -> Result<(), ReportError> {
        let mut longest: Option<Duration> = None;
        let mut failure: Option<ReportError> = None;
        for sink in &self.sinks {
            match sink.emit(transfer_id, status).await {
                Ok(()) => {}
                Err(ReportError::RateLimited { retry_after }) => {
                    longest = Some(longest.map_or(retry_after, |current| current.max(retry_after)));
                }
                Err(err) => {
                    if failure.is_none() {
                        failure = Some(err);
                    }
                }
            }
        }
        if let Some(retry_after) = longest {
            return Err(ReportError::RateLimited { retry_after });
        }
        failure.map_or(Ok(()), Err)
    }
}
