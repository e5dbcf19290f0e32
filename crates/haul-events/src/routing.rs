//! Event bus routing helpers.

use crate::payloads::{DEFAULT_REPLAY_CAPACITY, Event, EventEnvelope, EventId};
use chrono::Utc;
use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use tokio::sync::broadcast::{self, Sender};
use tokio_stream::Stream;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;

struct BusState {
    replay: VecDeque<EventEnvelope>,
    next_id: EventId,
}

/// Shared event bus built on top of `tokio::broadcast` with a bounded replay
/// ring for late subscribers.
#[derive(Clone)]
pub struct EventBus {
    sender: Sender<EventEnvelope>,
    state: Arc<Mutex<BusState>>,
    replay_capacity: usize,
}

impl EventBus {
    /// Construct a bus with a custom replay capacity.
    #[must_use]
    pub fn with_capacity(replay_capacity: usize) -> Self {
        let capacity = replay_capacity.max(1);
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            state: Arc::new(Mutex::new(BusState {
                replay: VecDeque::with_capacity(capacity),
                next_id: 1,
            })),
            replay_capacity: capacity,
        }
    }

    /// Construct a bus with the default replay capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_REPLAY_CAPACITY)
    }

    /// Publish a new event to all subscribers and return its identifier.
    pub fn publish(&self, event: Event) -> EventId {
        // Id assignment and broadcast happen under the same lock so live
        // subscribers observe ids in ascending order.
        let mut state = self.lock_state();
        let id = state.next_id;
        state.next_id = state.next_id.saturating_add(1);
        let envelope = EventEnvelope {
            id,
            timestamp: Utc::now(),
            event,
        };
        if state.replay.len() == self.replay_capacity {
            let _ = state.replay.pop_front();
        }
        state.replay.push_back(envelope.clone());
        let _ = self.sender.send(envelope);
        id
    }

    /// Subscribe to the bus. When `last_event_id` is supplied, buffered events
    /// newer than that id are yielded before live events.
    #[must_use]
    pub fn subscribe(&self, last_event_id: Option<EventId>) -> EventStream {
        let state = self.lock_state();
        let live = BroadcastStream::new(self.sender.subscribe());
        let backlog = last_event_id.map_or_else(VecDeque::new, |last| {
            state
                .replay
                .iter()
                .filter(|env| env.id > last)
                .cloned()
                .collect()
        });
        drop(state);
        EventStream {
            backlog,
            live,
            last_seen: last_event_id.unwrap_or(0),
            missed: 0,
        }
    }

    /// Last event id observed in the replay buffer.
    #[must_use]
    pub fn last_event_id(&self) -> Option<EventId> {
        self.lock_state().replay.back().map(|env| env.id)
    }

    /// Collect a backlog of events emitted after the specified id.
    #[must_use]
    pub fn backlog_since(&self, id: EventId) -> Vec<EventEnvelope> {
        self.lock_state()
            .replay
            .iter()
            .filter(|env| env.id > id)
            .cloned()
            .collect()
    }

    /// Number of live subscribers currently attached.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    fn lock_state(&self) -> MutexGuard<'_, BusState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Subscriber stream that drains the replay backlog before switching to
/// live events. Lagged gaps are skipped and counted.
pub struct EventStream {
    backlog: VecDeque<EventEnvelope>,
    live: BroadcastStream<EventEnvelope>,
    last_seen: EventId,
    missed: u64,
}

impl EventStream {
    /// Number of live events dropped because the subscriber lagged behind.
    #[must_use]
    pub const fn missed(&self) -> u64 {
        self.missed
    }
}

impl Stream for EventStream {
    type Item = EventEnvelope;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        if let Some(env) = this.backlog.pop_front() {
            this.last_seen = env.id;
            return Poll::Ready(Some(env));
        }
        loop {
            match Pin::new(&mut this.live).poll_next(cx) {
                Poll::Ready(Some(Ok(env))) => {
                    if env.id <= this.last_seen {
                        continue;
                    }
                    this.last_seen = env.id;
                    return Poll::Ready(Some(env));
                }
                Poll::Ready(Some(Err(BroadcastStreamRecvError::Lagged(skipped)))) => {
                    this.missed = this.missed.saturating_add(skipped);
                }
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payloads::TransferPhase;
    use tokio_stream::StreamExt;
    use uuid::Uuid;

    fn phase(id: Uuid, phase: TransferPhase) -> Event {
        Event::PhaseChanged {
            transfer_id: id,
            phase,
        }
    }

    #[tokio::test]
    async fn publish_and_replay_from_id() {
        let bus = EventBus::with_capacity(4);
        let id = Uuid::new_v4();
        let first = bus.publish(phase(id, TransferPhase::Pending));
        let second = bus.publish(phase(id, TransferPhase::Running));

        assert_eq!(bus.last_event_id(), Some(second));
        let backlog = bus.backlog_since(first);
        assert_eq!(backlog.len(), 1);
        assert_eq!(backlog[0].id, second);
    }

    #[tokio::test]
    async fn replay_ring_drops_oldest_entries() {
        let bus = EventBus::with_capacity(2);
        let id = Uuid::new_v4();
        for _ in 0..5 {
            let _ = bus.publish(Event::Cancelled { transfer_id: id });
        }
        let backlog = bus.backlog_since(0);
        let ids: Vec<_> = backlog.iter().map(|env| env.id).collect();
        assert_eq!(ids, vec![4, 5]);
    }

    #[tokio::test]
    async fn subscriber_sees_backlog_then_live_events() {
        let bus = EventBus::new();
        let id = Uuid::new_v4();
        let first = bus.publish(phase(id, TransferPhase::Pending));
        let _ = bus.publish(phase(id, TransferPhase::Running));

        let mut stream = bus.subscribe(Some(first));
        let _ = bus.publish(Event::Finished {
            transfer_id: id,
            destination: "/tmp/out.bin".into(),
        });

        let replayed = stream.next().await.expect("backlog event");
        assert_eq!(replayed.id, first + 1);
        let live = stream.next().await.expect("live event");
        assert_eq!(live.event.kind(), "finished");
        assert_eq!(live.id, first + 2);
    }

    #[tokio::test]
    async fn subscriber_without_cursor_only_receives_new_events() {
        let bus = EventBus::new();
        let id = Uuid::new_v4();
        let _ = bus.publish(phase(id, TransferPhase::Pending));
        let mut stream = bus.subscribe(None);
        assert_eq!(bus.subscriber_count(), 1);
        let published = bus.publish(Event::Removed { transfer_id: id });
        let received = stream.next().await.expect("live event");
        assert_eq!(received.id, published);
        assert_eq!(stream.missed(), 0);
    }
}
