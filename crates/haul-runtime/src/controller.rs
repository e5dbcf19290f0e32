//! Per-transfer state machine.
//!
//! # Design
//! - `Created → Starting → Promoting → Polling → {Finished | Failed | Cancelled}`;
//!   `Promoting` only runs for staged backends.
//! - Every sleep is a [`TransferController::pause`], which wakes early on cancellation
//!   and never overshoots the deadline. Cancellation wins over the deadline, which
//!   wins over a terminal backend phase.
//! - Cleanup runs once on every terminal path where a handle exists, and its
//!   failure is logged rather than surfaced.
//! - Reporting problems never touch the transfer itself; see [`Emitter`].

use std::sync::Arc;
use std::time::Duration;

use haul_config::ControllerPolicy;
use haul_core::{
    BackendAdapter, BackendKind, ProgressReporter, Promotion, QueryOutcome, ReportError,
    TransferError, TransferHandle, TransferId, TransferPhase, TransferStatus, normalize,
};
use haul_telemetry::{Metrics, TransferOutcome};
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::{Instant, sleep_until};
use tracing::{Instrument, debug, info, info_span, warn};

use crate::backoff::Backoff;
use crate::registry::TransferRecord;

/// Lifecycle position of a controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ControllerState {
    /// Registered, task not running yet.
    Created,
    /// Submitting the request to the backend.
    Starting,
    /// Waiting for a staged backend to accept the transfer into its queue.
    Promoting,
    /// Polling the backend for status.
    Polling,
    /// Payload delivered.
    Finished,
    /// Stopped by an error.
    Failed,
    /// Stopped by the caller.
    Cancelled,
}

impl ControllerState {
    /// Stable lowercase label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Starting => "starting",
            Self::Promoting => "promoting",
            Self::Polling => "polling",
            Self::Finished => "finished",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Whether the controller has exited.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Failed | Self::Cancelled)
    }

    const fn from_phase(phase: TransferPhase) -> Self {
        match phase {
            TransferPhase::Finished => Self::Finished,
            TransferPhase::Cancelled => Self::Cancelled,
            TransferPhase::Pending | TransferPhase::Running | TransferPhase::Failed => {
                Self::Failed
            }
        }
    }
}

impl std::fmt::Display for ControllerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why the lifecycle stopped.
#[derive(Debug)]
enum Exit {
    /// Backend reported a terminal phase.
    Completed(TransferStatus),
    Failed(TransferError),
    Cancelled,
}

type Step<T> = Result<T, Exit>;

/// Drives one transfer from admission to cleanup.
pub struct TransferController {
    record: Arc<TransferRecord>,
    adapter: Arc<dyn BackendAdapter>,
    policy: ControllerPolicy,
    metrics: Metrics,
    cancel: watch::Receiver<bool>,
    deadline: Option<Instant>,
    emitter: Emitter,
}

impl TransferController {
    /// Bind a controller to its record and adapter. The deadline clock starts here.
    #[must_use]
    pub fn new(
        record: Arc<TransferRecord>,
        adapter: Arc<dyn BackendAdapter>,
        reporter: Arc<dyn ProgressReporter>,
        policy: ControllerPolicy,
        metrics: Metrics,
    ) -> Self {
        let cancel = record.subscribe_cancel();
        let deadline = record
            .request()
            .deadline()
            .and_then(|budget| Instant::now().checked_add(budget));
        let emitter = Emitter::new(record.id(), reporter, &policy, metrics.clone());
        Self {
            record,
            adapter,
            policy,
            metrics,
            cancel,
            deadline,
            emitter,
        }
    }

    /// Run the state machine to completion and return the terminal status.
    pub async fn run(mut self) -> TransferStatus {
        let span = info_span!(
            "transfer",
            transfer_id = %self.record.id(),
            backend = %self.kind()
        );
        async move {
            let initial = self.record.status();
            self.emitter.emit(&initial).await;
            let exit = match self.lifecycle().await {
                Ok(exit) | Err(exit) => exit,
            };
            self.finish(exit).await
        }
        .instrument(span)
        .await
    }

    fn kind(&self) -> BackendKind {
        self.record.backend()
    }

    fn id(&self) -> TransferId {
        self.record.id()
    }

    async fn lifecycle(&mut self) -> Step<Exit> {
        self.record.set_state(ControllerState::Starting);
        let mut handle = self.start().await?;
        self.record.set_handle(handle.clone());
        info!(%handle, "transfer admitted");

        if self.kind().requires_promotion() {
            self.record.set_state(ControllerState::Promoting);
            handle = self.promote(handle).await?;
            self.record.set_handle(handle.clone());
            info!(%handle, "transfer promoted");
        }

        self.record.set_state(ControllerState::Polling);
        self.poll(&handle).await
    }

    async fn start(&mut self) -> Step<TransferHandle> {
        let attempts = self.policy.add_attempts.max(1);
        let mut backoff = Backoff::from_policy(&self.policy);
        let mut attempt = 0;
        loop {
            self.check()?;
            attempt += 1;
            match self.try_add().await {
                Ok(handle) => return Ok(handle),
                Err(err) if err.is_transient() && attempt < attempts => {
                    let delay = backoff.next_delay();
                    warn!(
                        attempt,
                        delay_ms = delay.as_millis(),
                        error = %err,
                        "backend unavailable; retrying add"
                    );
                    self.metrics.inc_retry(self.kind().as_str(), "add");
                    self.pause(delay).await?;
                }
                Err(err) => return Err(Exit::Failed(err)),
            }
        }
    }

    async fn try_add(&self) -> Result<TransferHandle, TransferError> {
        self.adapter.ensure_connected().await?;
        self.adapter.add(self.record.request()).await
    }

    async fn promote(&mut self, handle: TransferHandle) -> Step<TransferHandle> {
        let attempts = self.policy.add_attempts.max(1);
        let interval = self.policy.poll_interval.for_backend(self.kind());
        let mut backoff = Backoff::from_policy(&self.policy);
        let mut failures = 0;
        loop {
            self.check()?;
            match self.adapter.promote(&handle).await {
                Ok(Promotion::Promoted(promoted)) => return Ok(promoted),
                Ok(Promotion::Pending) => {
                    failures = 0;
                    backoff.reset();
                    debug!("links still collecting");
                    self.pause(interval).await?;
                }
                Err(err) if err.is_transient() && failures + 1 < attempts => {
                    failures += 1;
                    let delay = backoff.next_delay();
                    warn!(
                        attempt = failures,
                        delay_ms = delay.as_millis(),
                        error = %err,
                        "backend unavailable; retrying promote"
                    );
                    self.metrics.inc_retry(self.kind().as_str(), "promote");
                    self.pause(delay).await?;
                }
                Err(err) => return Err(Exit::Failed(err)),
            }
        }
    }

    async fn poll(&mut self, handle: &TransferHandle) -> Step<Exit> {
        let interval = self.policy.poll_interval.for_backend(self.kind());
        let mut consecutive_errors = 0_u32;
        loop {
            self.pause(interval).await?;
            let outcome = self.adapter.query_status(handle).await;
            self.check()?;
            match outcome {
                Ok(QueryOutcome::Pending) => {
                    consecutive_errors = 0;
                    debug!("status not visible yet");
                }
                Ok(QueryOutcome::Status(raw)) => {
                    consecutive_errors = 0;
                    let status = normalize(self.kind(), &raw);
                    if status.is_terminal() {
                        return Ok(Exit::Completed(status));
                    }
                    if self.record.update_status(status) {
                        let current = self.record.status();
                        self.emitter.emit(&current).await;
                    }
                }
                Err(err @ TransferError::NotFound { .. }) => return Ok(Exit::Failed(err)),
                Err(err) => {
                    consecutive_errors += 1;
                    self.metrics.inc_poll_error(self.kind().as_str());
                    warn!(consecutive_errors, error = %err, "status query failed");
                    if consecutive_errors >= self.policy.unstable_threshold.max(1) {
                        return Ok(Exit::Failed(TransferError::PollingUnstable {
                            transfer_id: self.id(),
                            consecutive_errors,
                        }));
                    }
                }
            }
        }
    }

    /// Sleep for `delay`, waking early on cancellation and never past the deadline.
    async fn pause(&mut self, delay: Duration) -> Step<()> {
        self.check()?;
        let wake = Instant::now()
            .checked_add(delay)
            .unwrap_or_else(Instant::now);
        let until = self.deadline.map_or(wake, |deadline| wake.min(deadline));
        tokio::select! {
            () = sleep_until(until) => {}
            _ = self.cancel.changed() => {}
        }
        self.check()
    }

    fn check(&self) -> Step<()> {
        let cancelled = *self.cancel.borrow();
        if cancelled {
            return Err(Exit::Cancelled);
        }
        if let Some(deadline) = self.deadline
            && Instant::now() >= deadline
        {
            return Err(Exit::Failed(TransferError::DeadlineExceeded {
                transfer_id: self.id(),
                deadline: self.record.request().deadline().unwrap_or_default(),
            }));
        }
        Ok(())
    }

    async fn finish(&mut self, exit: Exit) -> TransferStatus {
        let handle = self.record.handle();
        let (phase, failure, message, observed) = match exit {
            Exit::Completed(status) => {
                (status.phase, status.failure, status.error_message.clone(), Some(status))
            }
            Exit::Failed(err) => {
                warn!(error = %err, reason = err.failure_reason().as_str(), "transfer failed");
                (
                    TransferPhase::Failed,
                    Some(err.failure_reason()),
                    Some(err.status_message()),
                    None,
                )
            }
            Exit::Cancelled => {
                info!("transfer cancelled");
                (TransferPhase::Cancelled, None, None, None)
            }
        };

        if let Some(handle) = &handle {
            if phase == TransferPhase::Cancelled
                && let Err(err) = self.adapter.cancel(handle).await
            {
                warn!(%handle, error = %err, "backend cancel failed");
            }
            let delete_files = phase != TransferPhase::Finished;
            match self.adapter.remove(handle, delete_files).await {
                Ok(()) => debug!(%handle, delete_files, "backend entry removed"),
                Err(err) => warn!(%handle, delete_files, error = %err, "backend cleanup failed"),
            }
        }

        let status = match observed {
            Some(status) => {
                let _ = self.record.update_status(status);
                self.record.status()
            }
            None => self.record.terminate(phase, failure, message),
        };
        self.record.set_state(ControllerState::from_phase(status.phase));
        self.metrics
            .inc_finished(self.kind().as_str(), outcome(status.phase));
        info!(phase = %status.phase, "transfer finished");
        self.emitter.emit(&status).await;
        status
    }
}

const fn outcome(phase: TransferPhase) -> TransferOutcome {
    match phase {
        TransferPhase::Finished => TransferOutcome::Finished,
        TransferPhase::Cancelled => TransferOutcome::Cancelled,
        TransferPhase::Pending | TransferPhase::Running | TransferPhase::Failed => {
            TransferOutcome::Failed
        }
    }
}

/// Delivers statuses to the reporter without letting it stall or fail the transfer.
///
/// A rate limit suspends non-terminal emissions until it expires; those updates are
/// dropped, not queued. Terminal statuses wait out the limit and are retried.
struct Emitter {
    transfer_id: TransferId,
    reporter: Arc<dyn ProgressReporter>,
    retry_limit: u32,
    backoff_max: Duration,
    paused_until: Option<Instant>,
    metrics: Metrics,
}

impl Emitter {
    fn new(
        transfer_id: TransferId,
        reporter: Arc<dyn ProgressReporter>,
        policy: &ControllerPolicy,
        metrics: Metrics,
    ) -> Self {
        Self {
            transfer_id,
            reporter,
            retry_limit: policy.emit_retry_limit,
            backoff_max: policy.emit_backoff_max,
            paused_until: None,
            metrics,
        }
    }

    async fn emit(&mut self, status: &TransferStatus) {
        if status.is_terminal() {
            self.emit_terminal(status).await;
            return;
        }
        if self
            .paused_until
            .is_some_and(|until| Instant::now() < until)
        {
            debug!(phase = %status.phase, "reporter rate limited; update skipped");
            return;
        }
        self.paused_until = None;
        match self.reporter.emit(self.transfer_id, status).await {
            Ok(()) => {}
            Err(ReportError::RateLimited { retry_after }) => self.throttle(retry_after),
            Err(err @ ReportError::Unavailable { .. }) => {
                warn!(error = %err, "progress update not delivered");
            }
        }
    }

    async fn emit_terminal(&mut self, status: &TransferStatus) {
        for attempt in 0..=self.retry_limit {
            if let Some(until) = self.paused_until.take() {
                sleep_until(until).await;
            }
            match self.reporter.emit(self.transfer_id, status).await {
                Ok(()) => return,
                Err(ReportError::RateLimited { retry_after }) => {
                    debug!(attempt, "terminal status rate limited");
                    self.throttle(retry_after);
                }
                Err(err @ ReportError::Unavailable { .. }) => {
                    warn!(error = %err, "terminal status not delivered");
                    self.metrics.inc_report_failure();
                    return;
                }
            }
        }
        warn!(
            attempts = self.retry_limit + 1,
            "terminal status dropped after repeated rate limits"
        );
        self.metrics.inc_report_failure();
    }

    fn throttle(&mut self, retry_after: Duration) {
        let wait = retry_after.min(self.backoff_max);
        self.paused_until = Instant::now().checked_add(wait);
        self.metrics.inc_report_throttled();
        debug!(wait_ms = wait.as_millis(), "reporter asked to slow down");
    }
}
