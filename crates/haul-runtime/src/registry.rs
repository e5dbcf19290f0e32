//! Process-wide map of active transfers plus a bounded history of finished ones.
//!
//! # Design
//! - The map lock only guards membership; it is never held across an adapter call.
//! - Each record owns its status snapshot. Only the controller task writes it; every
//!   reader receives a copy.
//! - Cancellation and completion are `watch` channels so waiters never miss a signal
//!   sent before they subscribed.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use haul_core::{
    BackendKind, FailureReason, TransferError, TransferHandle, TransferId, TransferPhase,
    TransferRequest, TransferResult, TransferStatus,
};
use serde::Serialize;
use tokio::sync::watch;

use crate::controller::ControllerState;

/// Shared state of one transfer, owned by the registry and its controller.
#[derive(Debug)]
pub struct TransferRecord {
    request: TransferRequest,
    started_at: DateTime<Utc>,
    state: RwLock<ControllerState>,
    status: RwLock<TransferStatus>,
    handle: RwLock<Option<TransferHandle>>,
    cancel: watch::Sender<bool>,
    done: watch::Sender<bool>,
}

impl TransferRecord {
    /// Fresh record in the `Created` state with a pending status.
    #[must_use]
    pub fn new(request: TransferRequest) -> Self {
        let (cancel, _) = watch::channel(false);
        let (done, _) = watch::channel(false);
        Self {
            request,
            started_at: Utc::now(),
            state: RwLock::new(ControllerState::Created),
            status: RwLock::new(TransferStatus::pending()),
            handle: RwLock::new(None),
            cancel,
            done,
        }
    }

    /// Transfer identifier.
    #[must_use]
    pub const fn id(&self) -> TransferId {
        self.request.id()
    }

    /// Request the transfer was started with.
    #[must_use]
    pub const fn request(&self) -> &TransferRequest {
        &self.request
    }

    /// Backend serving the transfer.
    #[must_use]
    pub const fn backend(&self) -> BackendKind {
        self.request.backend()
    }

    /// Registration time.
    #[must_use]
    pub const fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Copy of the latest status snapshot.
    #[must_use]
    pub fn status(&self) -> TransferStatus {
        self.status
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Current controller state.
    #[must_use]
    pub fn state(&self) -> ControllerState {
        *self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Backend handle, once `add` succeeded.
    #[must_use]
    pub fn handle(&self) -> Option<TransferHandle> {
        self.handle
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Raise the cancellation flag. Returns `false` if it was already raised.
    pub fn request_cancel(&self) -> bool {
        !self.cancel.send_replace(true)
    }

    /// Whether cancellation has been requested.
    #[must_use]
    pub fn cancel_requested(&self) -> bool {
        *self.cancel.borrow()
    }

    /// Receiver that observes the cancellation flag.
    #[must_use]
    pub fn subscribe_cancel(&self) -> watch::Receiver<bool> {
        self.cancel.subscribe()
    }

    /// Wait until the controller has exited and released the registry slot.
    pub async fn wait_done(&self) {
        let mut done = self.done.subscribe();
        let _ = done.wait_for(|finished| *finished).await;
    }

    /// Serializable view of the record.
    #[must_use]
    pub fn snapshot(&self) -> RecordSnapshot {
        RecordSnapshot {
            transfer_id: self.id(),
            backend: self.backend(),
            source: self.request.source().to_string(),
            destination: self.request.destination().to_path_buf(),
            tag: self.request.tag().map(str::to_string),
            started_at: self.started_at,
            state: self.state(),
            handle: self.handle(),
            status: self.status(),
        }
    }

    /// Apply a non-terminal or terminal snapshot produced by the backend.
    /// Returns whether the snapshot changed.
    pub(crate) fn update_status(&self, next: TransferStatus) -> bool {
        self.status
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .advance(next)
    }

    /// Move the snapshot into a terminal phase and return the result.
    pub(crate) fn terminate(
        &self,
        phase: TransferPhase,
        failure: Option<FailureReason>,
        message: Option<String>,
    ) -> TransferStatus {
        let mut status = self.status.write().unwrap_or_else(PoisonError::into_inner);
        let _ = status.terminate(phase, failure, message);
        status.clone()
    }

    pub(crate) fn set_state(&self, state: ControllerState) {
        *self.state.write().unwrap_or_else(PoisonError::into_inner) = state;
    }

    pub(crate) fn set_handle(&self, handle: TransferHandle) {
        *self.handle.write().unwrap_or_else(PoisonError::into_inner) = Some(handle);
    }

    pub(crate) fn mark_done(&self) {
        let _ = self.done.send_replace(true);
    }
}

/// Point-in-time copy of a [`TransferRecord`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordSnapshot {
    /// Transfer identifier.
    pub transfer_id: TransferId,
    /// Backend serving the transfer.
    pub backend: BackendKind,
    /// Source reference.
    pub source: String,
    /// Destination directory.
    pub destination: PathBuf,
    /// Caller-supplied tag.
    pub tag: Option<String>,
    /// Registration time.
    pub started_at: DateTime<Utc>,
    /// Controller state.
    pub state: ControllerState,
    /// Backend handle, when known.
    pub handle: Option<TransferHandle>,
    /// Latest status.
    pub status: TransferStatus,
}

#[derive(Debug)]
struct History {
    capacity: usize,
    order: VecDeque<TransferId>,
    statuses: HashMap<TransferId, TransferStatus>,
}

impl History {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity.min(1_024)),
            statuses: HashMap::new(),
        }
    }

    fn record(&mut self, id: TransferId, status: TransferStatus) {
        if self.capacity == 0 {
            return;
        }
        if self.statuses.insert(id, status).is_some() {
            self.order.retain(|existing| *existing != id);
        }
        self.order.push_back(id);
        while self.order.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.statuses.remove(&evicted);
            }
        }
    }

    fn get(&self, id: TransferId) -> Option<TransferStatus> {
        self.statuses.get(&id).cloned()
    }
}

/// Registry of active transfers keyed by id.
#[derive(Debug)]
pub struct TransferRegistry {
    active: RwLock<HashMap<TransferId, Arc<TransferRecord>>>,
    history: Mutex<History>,
}

impl TransferRegistry {
    /// Empty registry keeping up to `history_capacity` finished statuses.
    #[must_use]
    pub fn new(history_capacity: usize) -> Self {
        Self {
            active: RwLock::new(HashMap::new()),
            history: Mutex::new(History::new(history_capacity)),
        }
    }

    /// Admit a record.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::DuplicateId`] if a record with the same id is active.
    pub fn register(&self, record: Arc<TransferRecord>) -> TransferResult<()> {
        let transfer_id = record.id();
        let mut active = self.active.write().unwrap_or_else(PoisonError::into_inner);
        if active.contains_key(&transfer_id) {
            return Err(TransferError::DuplicateId { transfer_id });
        }
        active.insert(transfer_id, record);
        Ok(())
    }

    /// Active record for `id`.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::NotFound`] if no active record matches.
    pub fn lookup(&self, id: TransferId) -> TransferResult<Arc<TransferRecord>> {
        self.active
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
            .ok_or_else(|| TransferError::not_found("transfer", id.to_string()))
    }

    /// Release the slot for `id`, keeping its final status in history.
    ///
    /// History is written before the active slot is released, so a concurrent
    /// [`status`](Self::status) sees the transfer in one place or the other.
    pub fn unregister(&self, id: TransferId) -> Option<Arc<TransferRecord>> {
        let mut active = self.active.write().unwrap_or_else(PoisonError::into_inner);
        let removed = active.remove(&id);
        if let Some(record) = &removed {
            self.history
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .record(id, record.status());
        }
        drop(active);
        removed
    }

    /// Every active record.
    #[must_use]
    pub fn list_active(&self) -> Vec<Arc<TransferRecord>> {
        self.active
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    /// Number of active records.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.active
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Latest status for `id` from the active map, then from history.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::NotFound`] if the id is neither active nor remembered.
    pub fn status(&self, id: TransferId) -> TransferResult<TransferStatus> {
        // Lock order is always active, then history.
        let active = self.active.read().unwrap_or_else(PoisonError::into_inner);
        if let Some(record) = active.get(&id) {
            return Ok(record.status());
        }
        let remembered = self
            .history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id);
        drop(active);
        remembered.ok_or_else(|| TransferError::not_found("transfer", id.to_string()))
    }
}

impl Default for TransferRegistry {
    fn default() -> Self {
        Self::new(256)
    }
}
