//! Caller-facing entry point: start, cancel, inspect, and await transfers.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use haul_config::ControllerPolicy;
use haul_core::{
    BackendAdapter, BackendKind, FailureReason, ProgressReporter, TransferError, TransferId,
    TransferPhase, TransferRequest, TransferResult, TransferStatus,
};
use haul_events::{Event, EventBus};
use haul_telemetry::Metrics;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::controller::TransferController;
use crate::registry::{RecordSnapshot, TransferRecord, TransferRegistry};

/// Owns the registry, the adapter set, and the controller tasks.
pub struct TransferService {
    policy: ControllerPolicy,
    reporter: Arc<dyn ProgressReporter>,
    metrics: Metrics,
    events: Option<EventBus>,
    adapters: HashMap<BackendKind, Arc<dyn BackendAdapter>>,
    registry: Arc<TransferRegistry>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl TransferService {
    /// Service with no adapters and no event bus.
    #[must_use]
    pub fn new(
        policy: ControllerPolicy,
        reporter: Arc<dyn ProgressReporter>,
        metrics: Metrics,
    ) -> Self {
        let registry = Arc::new(TransferRegistry::new(policy.history_capacity));
        Self {
            policy,
            reporter,
            metrics,
            events: None,
            adapters: HashMap::new(),
            registry,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Serve the adapter's backend kind with `adapter`, replacing any previous one.
    #[must_use]
    pub fn with_adapter(mut self, adapter: Arc<dyn BackendAdapter>) -> Self {
        self.adapters.insert(adapter.kind(), adapter);
        self
    }

    /// Publish lifecycle events on `events`.
    #[must_use]
    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    /// Validate, register, and spawn a controller for `request`.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::InvalidRequest`] for malformed requests or an
    /// unconfigured backend, and [`TransferError::DuplicateId`] if the id is active.
    pub fn start_transfer(&self, request: TransferRequest) -> TransferResult<TransferId> {
        request.validate()?;
        let kind = request.backend();
        let adapter = self.adapters.get(&kind).cloned().ok_or(
            TransferError::InvalidRequest {
                field: "backend",
                reason: "no adapter configured",
            },
        )?;

        let record = Arc::new(TransferRecord::new(request));
        self.registry.register(Arc::clone(&record))?;
        let transfer_id = record.id();
        self.metrics.inc_started(kind.as_str());
        self.metrics.set_active_transfers(self.registry.active_count());
        publish(
            self.events.as_ref(),
            &self.metrics,
            Event::TransferAdded {
                transfer_id: transfer_id.as_uuid(),
                backend: kind.as_str().to_string(),
                source: record.request().source().to_string(),
            },
        );
        info!(transfer_id = %transfer_id, backend = %kind, "transfer started");

        let controller = TransferController::new(
            Arc::clone(&record),
            adapter,
            Arc::clone(&self.reporter),
            self.policy.clone(),
            self.metrics.clone(),
        );
        let registry = Arc::clone(&self.registry);
        let metrics = self.metrics.clone();
        let events = self.events.clone();
        let task = tokio::spawn(async move {
            let status = controller.run().await;
            let _ = registry.unregister(transfer_id);
            metrics.set_active_transfers(registry.active_count());
            if let Some(event) = terminal_event(&record, &status) {
                publish(events.as_ref(), &metrics, event);
            }
            publish(
                events.as_ref(),
                &metrics,
                Event::Removed {
                    transfer_id: transfer_id.as_uuid(),
                },
            );
            record.mark_done();
        });
        self.track(task);
        Ok(transfer_id)
    }

    /// Ask the controller for `id` to stop.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::NotFound`] if the transfer is not active.
    pub fn cancel_transfer(&self, id: TransferId) -> TransferResult<()> {
        let record = self.registry.lookup(id)?;
        if record.request_cancel() {
            info!(transfer_id = %id, "cancellation requested");
        }
        Ok(())
    }

    /// Latest status for `id`, including recently finished transfers.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::NotFound`] if the id is unknown.
    pub fn get_status(&self, id: TransferId) -> TransferResult<TransferStatus> {
        self.registry.status(id)
    }

    /// Snapshots of every active transfer.
    #[must_use]
    pub fn list_active(&self) -> Vec<RecordSnapshot> {
        self.registry
            .list_active()
            .iter()
            .map(|record| record.snapshot())
            .collect()
    }

    /// Wait for `id` to finish and return its terminal status.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::NotFound`] if the id is neither active nor remembered.
    pub async fn wait(&self, id: TransferId) -> TransferResult<TransferStatus> {
        if let Ok(record) = self.registry.lookup(id) {
            record.wait_done().await;
        }
        self.registry.status(id)
    }

    /// Registry backing the service.
    #[must_use]
    pub fn registry(&self) -> &TransferRegistry {
        &self.registry
    }

    /// Cancel every active transfer and wait for all controllers to exit.
    pub async fn shutdown(&self) {
        for record in self.registry.list_active() {
            let _ = record.request_cancel();
        }
        let tasks: Vec<JoinHandle<()>> = std::mem::take(
            &mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner),
        );
        for task in tasks {
            if let Err(err) = task.await {
                warn!(error = %err, "transfer task ended abnormally");
            }
        }
    }

    fn track(&self, task: JoinHandle<()>) {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        tasks.retain(|existing| !existing.is_finished());
        tasks.push(task);
    }
}

fn terminal_event(record: &TransferRecord, status: &TransferStatus) -> Option<Event> {
    let transfer_id = record.id().as_uuid();
    match status.phase {
        TransferPhase::Finished => Some(Event::Finished {
            transfer_id,
            destination: record.request().destination().display().to_string(),
        }),
        TransferPhase::Failed => Some(Event::Failed {
            transfer_id,
            reason: status
                .failure
                .map_or("unknown", FailureReason::as_str)
                .to_string(),
            message: status.error_message.clone(),
        }),
        TransferPhase::Cancelled => Some(Event::Cancelled { transfer_id }),
        TransferPhase::Pending | TransferPhase::Running => None,
    }
}

fn publish(events: Option<&EventBus>, metrics: &Metrics, event: Event) {
    if let Some(events) = events {
        metrics.inc_event(event.kind());
        let _ = events.publish(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reporter::TracingReporter;
    use haul_test_support::{ScriptedAdapter, fixtures};

    fn service() -> TransferService {
        TransferService::new(
            ControllerPolicy::default(),
            Arc::new(TracingReporter),
            Metrics::new().expect("metrics"),
        )
    }

    #[tokio::test]
    async fn missing_adapter_is_rejected() {
        let service = service();
        let err = service
            .start_transfer(fixtures::request(BackendKind::Torrent))
            .expect_err("no adapter");
        assert!(matches!(
            err,
            TransferError::InvalidRequest { field: "backend", .. }
        ));
    }

    #[tokio::test]
    async fn invalid_request_is_not_registered() {
        let service = service().with_adapter(Arc::new(ScriptedAdapter::new(BackendKind::Native)));
        let request = TransferRequest::new(" ", "/srv/haul", BackendKind::Native);
        assert!(service.start_transfer(request).is_err());
        assert!(service.list_active().is_empty());
    }

    #[tokio::test]
    async fn unknown_ids_are_not_found() {
        let service = service();
        let id = TransferId::new();
        assert!(matches!(
            service.cancel_transfer(id),
            Err(TransferError::NotFound { .. })
        ));
        assert!(matches!(
            service.get_status(id),
            Err(TransferError::NotFound { .. })
        ));
        assert!(service.wait(id).await.is_err());
    }

    #[test]
    fn terminal_events_follow_phase() {
        let record = TransferRecord::new(fixtures::request(BackendKind::Native));
        let failed = record.terminate(
            TransferPhase::Failed,
            Some(FailureReason::DeadlineExceeded),
            Some(haul_core::DEADLINE_MESSAGE.into()),
        );
        match terminal_event(&record, &failed) {
            Some(Event::Failed { reason, message, .. }) => {
                assert_eq!(reason, "deadline_exceeded");
                assert_eq!(message.as_deref(), Some(haul_core::DEADLINE_MESSAGE));
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert!(terminal_event(&record, &TransferStatus::pending()).is_none());
    }
}
