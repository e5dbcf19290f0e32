//! Fake backend and reporter used by runtime tests.

use std::collections::{HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use haul_core::{
    BackendAdapter, BackendKind, ProgressReporter, Promotion, QueryOutcome, RemoteStage,
    ReportError, TransferError, TransferHandle, TransferId, TransferPhase, TransferRequest,
    TransferResult, TransferStatus,
};
use tokio::sync::Notify;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Counters for every adapter call observed by a [`ScriptedAdapter`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallLog {
    /// `ensure_connected` calls.
    pub connect: u32,
    /// `add` calls, including failed attempts.
    pub add: u32,
    /// `promote` calls.
    pub promote: u32,
    /// `query_status` calls.
    pub query: u32,
    /// `cancel` calls.
    pub cancel: u32,
    /// `delete_files` flag of every `remove` call, in order.
    pub remove: Vec<bool>,
}

#[derive(Default)]
struct Script {
    add: VecDeque<TransferResult<TransferHandle>>,
    promote: VecDeque<TransferResult<Promotion>>,
    query: VecDeque<TransferResult<QueryOutcome>>,
    last_query: Option<QueryOutcome>,
    removed: HashSet<TransferHandle>,
    remove_effects: u32,
}

/// Backend whose responses are queued up front by the test.
///
/// Unscripted calls fall back to benign defaults: `add` returns a handle
/// derived from the request id, `promote` moves remote handles to the
/// download stage, and `query_status` repeats the last scripted outcome
/// (or `Pending` when nothing was scripted).
pub struct ScriptedAdapter {
    kind: BackendKind,
    add_delay: Option<Duration>,
    script: Mutex<Script>,
    calls: Mutex<CallLog>,
}

impl ScriptedAdapter {
    /// Adapter impersonating `kind` with an empty script.
    #[must_use]
    pub fn new(kind: BackendKind) -> Self {
        Self {
            kind,
            add_delay: None,
            script: Mutex::new(Script::default()),
            calls: Mutex::new(CallLog::default()),
        }
    }

    /// Make every `add` call take `delay` before answering.
    #[must_use]
    pub const fn with_add_delay(mut self, delay: Duration) -> Self {
        self.add_delay = Some(delay);
        self
    }

    /// Queue the result of the next unscripted `add`.
    #[must_use]
    pub fn then_add(self, result: TransferResult<TransferHandle>) -> Self {
        lock(&self.script).add.push_back(result);
        self
    }

    /// Queue `count` transient `add` failures.
    #[must_use]
    pub fn add_unavailable(self, count: usize) -> Self {
        for _ in 0..count {
            lock(&self.script)
                .add
                .push_back(Err(unavailable(self.kind, "add")));
        }
        self
    }

    /// Queue the result of the next `promote`.
    #[must_use]
    pub fn then_promote(self, result: TransferResult<Promotion>) -> Self {
        lock(&self.script).promote.push_back(result);
        self
    }

    /// Keep answering `Promotion::Pending` for `count` promote calls.
    #[must_use]
    pub fn promote_pending(self, count: usize) -> Self {
        for _ in 0..count {
            lock(&self.script).promote.push_back(Ok(Promotion::Pending));
        }
        self
    }

    /// Queue the result of the next `query_status`.
    #[must_use]
    pub fn then_query(self, result: TransferResult<QueryOutcome>) -> Self {
        lock(&self.script).query.push_back(result);
        self
    }

    /// Snapshot of the calls seen so far.
    #[must_use]
    pub fn calls(&self) -> CallLog {
        lock(&self.calls).clone()
    }

    /// Number of `remove` calls that actually dropped something.
    #[must_use]
    pub fn remove_effects(&self) -> u32 {
        lock(&self.script).remove_effects
    }

    fn default_handle(&self, request: &TransferRequest) -> TransferHandle {
        match self.kind {
            BackendKind::Native => TransferHandle::Native {
                task_id: request.id().as_uuid(),
            },
            BackendKind::Torrent => TransferHandle::Torrent {
                tag: format!("haul-{}", request.id()),
                hash: None,
            },
            BackendKind::Remote => TransferHandle::Remote {
                job_id: 1,
                package_ids: Vec::new(),
                link_ids: Vec::new(),
                stage: RemoteStage::Collected,
            },
        }
    }
}

/// Transient failure as an adapter would report it.
#[must_use]
pub fn unavailable(kind: BackendKind, operation: &'static str) -> TransferError {
    TransferError::unavailable(
        kind,
        operation,
        std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "connection refused"),
    )
}

#[async_trait]
impl BackendAdapter for ScriptedAdapter {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    async fn ensure_connected(&self) -> TransferResult<()> {
        lock(&self.calls).connect += 1;
        Ok(())
    }

    async fn add(&self, request: &TransferRequest) -> TransferResult<TransferHandle> {
        lock(&self.calls).add += 1;
        if let Some(delay) = self.add_delay {
            tokio::time::sleep(delay).await;
        }
        let scripted = lock(&self.script).add.pop_front();
        scripted.unwrap_or_else(|| Ok(self.default_handle(request)))
    }

    async fn promote(&self, handle: &TransferHandle) -> TransferResult<Promotion> {
        lock(&self.calls).promote += 1;
        let scripted = lock(&self.script).promote.pop_front();
        if let Some(scripted) = scripted {
            return scripted;
        }
        let promoted = match handle.clone() {
            TransferHandle::Remote {
                job_id,
                package_ids,
                link_ids,
                ..
            } => TransferHandle::Remote {
                job_id,
                package_ids,
                link_ids,
                stage: RemoteStage::Downloading,
            },
            other => other,
        };
        Ok(Promotion::Promoted(promoted))
    }

    async fn query_status(&self, _handle: &TransferHandle) -> TransferResult<QueryOutcome> {
        lock(&self.calls).query += 1;
        let mut script = lock(&self.script);
        match script.query.pop_front() {
            Some(Ok(outcome)) => {
                script.last_query = Some(outcome.clone());
                Ok(outcome)
            }
            Some(Err(err)) => Err(err),
            None => Ok(script.last_query.clone().unwrap_or(QueryOutcome::Pending)),
        }
    }

    async fn cancel(&self, _handle: &TransferHandle) -> TransferResult<()> {
        lock(&self.calls).cancel += 1;
        Ok(())
    }

    async fn remove(&self, handle: &TransferHandle, delete_files: bool) -> TransferResult<()> {
        lock(&self.calls).remove.push(delete_files);
        let mut script = lock(&self.script);
        if script.removed.insert(handle.clone()) {
            script.remove_effects += 1;
        }
        drop(script);
        Ok(())
    }
}

#[derive(Default)]
struct Recorded {
    statuses: Vec<(TransferId, TransferStatus)>,
    rate_limits: VecDeque<Duration>,
    attempts: u32,
}

/// Reporter that keeps every status it accepts.
#[derive(Default)]
pub struct RecordingReporter {
    inner: Mutex<Recorded>,
    changed: Notify,
}

impl RecordingReporter {
    /// Empty reporter accepting every emission.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject the next `count` emissions with a rate limit of `retry_after`.
    pub fn rate_limit_next(&self, count: usize, retry_after: Duration) {
        let mut inner = lock(&self.inner);
        inner
            .rate_limits
            .extend(std::iter::repeat_n(retry_after, count));
    }

    /// Accepted statuses for `id`, oldest first.
    #[must_use]
    pub fn statuses(&self, id: TransferId) -> Vec<TransferStatus> {
        lock(&self.inner)
            .statuses
            .iter()
            .filter(|(owner, _)| *owner == id)
            .map(|(_, status)| status.clone())
            .collect()
    }

    /// Phases of the accepted statuses for `id`, consecutive repeats collapsed.
    #[must_use]
    pub fn phases(&self, id: TransferId) -> Vec<TransferPhase> {
        let mut phases: Vec<TransferPhase> = self
            .statuses(id)
            .into_iter()
            .map(|status| status.phase)
            .collect();
        phases.dedup();
        phases
    }

    /// Emission attempts, including rejected ones.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        lock(&self.inner).attempts
    }

    /// Wait until a terminal status for `id` has been accepted.
    pub async fn wait_terminal(&self, id: TransferId) -> TransferStatus {
        loop {
            let notified = self.changed.notified();
            if let Some(status) = self
                .statuses(id)
                .into_iter()
                .find(TransferStatus::is_terminal)
            {
                return status;
            }
            notified.await;
        }
    }
}

#[async_trait]
impl ProgressReporter for RecordingReporter {
    async fn emit(
        &self,
        transfer_id: TransferId,
        status: &TransferStatus,
    ) -> Result<(), ReportError> {
        {
            let mut inner = lock(&self.inner);
            inner.attempts += 1;
            if let Some(retry_after) = inner.rate_limits.pop_front() {
                return Err(ReportError::RateLimited { retry_after });
            }
            inner.statuses.push((transfer_id, status.clone()));
        }
        self.changed.notify_waiters();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripted_results_are_consumed_in_order() {
        let adapter = ScriptedAdapter::new(BackendKind::Torrent).add_unavailable(2);
        let request = TransferRequest::new("magnet:?xt=urn:btih:abc", "/tmp", BackendKind::Torrent);

        assert!(adapter.add(&request).await.is_err());
        assert!(adapter.add(&request).await.is_err());
        let handle = adapter.add(&request).await.expect("default handle");
        assert!(matches!(handle, TransferHandle::Torrent { .. }));
        assert_eq!(adapter.calls().add, 3);
    }

    #[tokio::test]
    async fn repeated_remove_has_one_effect() {
        let adapter = ScriptedAdapter::new(BackendKind::Native);
        let handle = TransferHandle::Native {
            task_id: TransferId::new().as_uuid(),
        };
        adapter.remove(&handle, true).await.expect("first remove");
        adapter.remove(&handle, true).await.expect("second remove");
        assert_eq!(adapter.calls().remove, vec![true, true]);
        assert_eq!(adapter.remove_effects(), 1);
    }

    #[tokio::test]
    async fn reporter_rejects_then_records() {
        let reporter = RecordingReporter::new();
        let id = TransferId::new();
        reporter.rate_limit_next(1, Duration::from_secs(2));

        let status = TransferStatus::pending();
        assert!(matches!(
            reporter.emit(id, &status).await,
            Err(ReportError::RateLimited { .. })
        ));
        reporter.emit(id, &status).await.expect("accepted");
        assert_eq!(reporter.attempts(), 2);
        assert_eq!(reporter.phases(id), vec![TransferPhase::Pending]);
    }
}
