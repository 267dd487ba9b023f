//! Per-event publish/subscribe fan-out for the live telemetry stream.
//!
//! Each racing event gets its own [`EventBus`]: a bounded replay ring
//! plus a `tokio::broadcast` channel. SSE handlers reconnecting with a
//! `Last-Event-ID` replay anything missed from the ring before joining
//! the live broadcast. Heartbeats travel a separate channel and never
//! consume a sequence id or occupy a ring slot — a client that only
//! ever sees heartbeats should never see "gaps" in its event ids.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;
use tracing::error;

use crate::streamctl::StreamTransition;
use crate::types::{CheckpointCrossing, PositionSample, TelemetrySample};

/// Sequence id assigned to each buffered event.
pub type EventId = u64;

/// Default replay ring size, holding roughly the last few seconds of
/// updates across all vehicles in an event.
pub const DEFAULT_REPLAY_CAPACITY: usize = 1_000;

/// Domain events fanned out to subscribers of a single racing event.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TelemetryEvent {
    /// A vehicle's smoothed position changed.
    Position {
        vehicle_id: String,
        sample: PositionSample,
    },
    /// A vehicle's latest telemetry sample changed.
    Telemetry {
        vehicle_id: String,
        sample: TelemetrySample,
    },
    /// A vehicle crossed a checkpoint.
    CheckpointCrossed { crossing: CheckpointCrossing },
    /// A vehicle's stream control state changed.
    StreamStateChanged { transition: StreamTransition },
}

/// A sequenced, timestamped event ready to hand to a subscriber.
#[derive(Debug, Clone, serde::Serialize)]
pub struct EventEnvelope {
    pub id: EventId,
    pub timestamp: DateTime<Utc>,
    pub event: TelemetryEvent,
}

/// Item yielded by [`EventStream::next`] — either a sequenced event or
/// an unsequenced keep-alive.
#[derive(Debug, Clone)]
pub enum StreamItem {
    Event(EventEnvelope),
    Heartbeat,
}

/// Per-event broadcast bus with bounded replay.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<EventEnvelope>,
    heartbeat: broadcast::Sender<()>,
    buffer: Arc<Mutex<VecDeque<EventEnvelope>>>,
    next_id: Arc<AtomicU64>,
    replay_capacity: usize,
}

impl EventBus {
    /// # Panics
    /// Panics if `capacity` is zero.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity > 0, "event bus capacity must be positive");
        let (sender, _) = broadcast::channel(capacity);
        let (heartbeat, _) = broadcast::channel(4);
        Self {
            sender,
            heartbeat,
            buffer: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            next_id: Arc::new(AtomicU64::new(1)),
            replay_capacity: capacity,
        }
    }

    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_REPLAY_CAPACITY)
    }

    /// Publishes an event, assigning it the next sequence id and
    /// pushing it into the replay ring.
    pub fn publish(&self, event: TelemetryEvent) -> EventId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let envelope = EventEnvelope {
            id,
            timestamp: Utc::now(),
            event,
        };

        {
            let mut buffer = self.lock_buffer();
            if buffer.len() == self.replay_capacity {
                buffer.pop_front();
            }
            buffer.push_back(envelope.clone());
        }

        let _ = self.sender.send(envelope);
        id
    }

    /// Sends a keep-alive, bypassing the sequence counter and replay
    /// ring entirely.
    pub fn publish_heartbeat(&self) {
        let _ = self.heartbeat.send(());
    }

    /// Subscribes to the bus, replaying any buffered events newer than
    /// `since_id` (for SSE `Last-Event-ID` reconnects) before the
    /// stream switches to live delivery.
    #[must_use]
    pub fn subscribe(&self, since_id: Option<EventId>) -> EventStream {
        let mut backlog = VecDeque::new();
        if let Some(since) = since_id {
            let buffer = self.lock_buffer();
            for item in buffer.iter() {
                if item.id > since {
                    backlog.push_back(item.clone());
                }
            }
        }

        EventStream {
            backlog,
            receiver: self.sender.subscribe(),
            heartbeat: self.heartbeat.subscribe(),
        }
    }

    #[must_use]
    pub fn last_event_id(&self) -> Option<EventId> {
        self.lock_buffer().back().map(|e| e.id)
    }

    /// True if `since_id` is older than the oldest buffered event, i.e.
    /// replaying from it would skip events the ring has already
    /// evicted. Callers should fall back to a fresh snapshot instead of
    /// a backlog replay in that case.
    #[must_use]
    pub fn has_gap_since(&self, since_id: EventId) -> bool {
        match self.lock_buffer().front() {
            Some(oldest) => since_id + 1 < oldest.id,
            None => false,
        }
    }

    fn lock_buffer(&self) -> MutexGuard<'_, VecDeque<EventEnvelope>> {
        match self.buffer.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                error!("event buffer mutex poisoned; continuing with recovered guard");
                poisoned.into_inner()
            }
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Stream handed to an individual SSE connection.
pub struct EventStream {
    backlog: VecDeque<EventEnvelope>,
    receiver: broadcast::Receiver<EventEnvelope>,
    heartbeat: broadcast::Receiver<()>,
}

impl EventStream {
    /// Drains the replay backlog first, then races the live event
    /// channel against the heartbeat channel.
    pub async fn next(&mut self) -> Option<StreamItem> {
        if let Some(event) = self.backlog.pop_front() {
            return Some(StreamItem::Event(event));
        }

        tokio::select! {
            biased;
            result = self.receiver.recv() => match result {
                Ok(event) => Some(StreamItem::Event(event)),
                Err(broadcast::error::RecvError::Lagged(_)) => {
                    match self.receiver.recv().await {
                        Ok(event) => Some(StreamItem::Event(event)),
                        Err(_) => None,
                    }
                }
                Err(broadcast::error::RecvError::Closed) => None,
            },
            result = self.heartbeat.recv() => match result {
                Ok(()) => Some(StreamItem::Heartbeat),
                Err(broadcast::error::RecvError::Lagged(_)) => Some(StreamItem::Heartbeat),
                Err(broadcast::error::RecvError::Closed) => None,
            },
        }
    }
}

/// Registry handing out one [`EventBus`] per racing event, created
/// lazily on first access.
#[derive(Clone)]
pub struct PubSubRegistry {
    buses: Arc<DashMap<String, EventBus>>,
    replay_capacity: usize,
}

impl PubSubRegistry {
    #[must_use]
    pub fn new(replay_capacity: usize) -> Self {
        Self {
            buses: Arc::new(DashMap::new()),
            replay_capacity,
        }
    }

    #[must_use]
    pub fn bus_for(&self, event_id: &str) -> EventBus {
        self.buses
            .entry(event_id.to_string())
            .or_insert_with(|| EventBus::with_capacity(self.replay_capacity))
            .clone()
    }

    pub fn remove(&self, event_id: &str) {
        self.buses.remove(event_id);
    }
}

impl Default for PubSubRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_REPLAY_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_position_event(n: i64) -> TelemetryEvent {
        TelemetryEvent::Position {
            vehicle_id: "veh-1".to_string(),
            sample: PositionSample {
                ts_ms: n,
                lat: 40.0,
                lon: -86.0,
                speed_mps: 30.0,
                heading_deg: 90.0,
                altitude_m: 200.0,
                hdop: 1.0,
                satellites: 9,
            },
        }
    }

    #[tokio::test]
    async fn sequential_ids_and_replay_since() {
        let bus = EventBus::with_capacity(16);
        let mut last_id = 0;
        for i in 0..5 {
            last_id = bus.publish(sample_position_event(i));
        }
        assert_eq!(last_id, 5);

        let mut stream = bus.subscribe(Some(2));
        let mut ids = Vec::new();
        for _ in 0..3 {
            match stream.next().await {
                Some(StreamItem::Event(e)) => ids.push(e.id),
                other => panic!("expected buffered event, got {other:?}"),
            }
        }
        assert_eq!(ids, vec![3, 4, 5]);
    }

    #[tokio::test]
    async fn heartbeat_does_not_consume_sequence_ids() {
        let bus = EventBus::with_capacity(16);
        bus.publish_heartbeat();
        let mut stream = bus.subscribe(None);
        bus.publish_heartbeat();
        let item = stream.next().await;
        assert!(matches!(item, Some(StreamItem::Heartbeat)));
        assert_eq!(bus.last_event_id(), None);
    }

    #[tokio::test]
    async fn registry_returns_same_bus_for_same_event() {
        let registry = PubSubRegistry::new(8);
        let bus_a = registry.bus_for("evt-1");
        let id = bus_a.publish(sample_position_event(1));
        let bus_b = registry.bus_for("evt-1");
        assert_eq!(bus_b.last_event_id(), Some(id));
    }

    #[tokio::test]
    async fn registry_isolates_different_events() {
        let registry = PubSubRegistry::new(8);
        registry.bus_for("evt-1").publish(sample_position_event(1));
        let other = registry.bus_for("evt-2");
        assert_eq!(other.last_event_id(), None);
    }

    #[tokio::test]
    async fn has_gap_since_detects_evicted_history() {
        let bus = EventBus::with_capacity(3);
        for i in 0..5 {
            bus.publish(sample_position_event(i));
        }
        // Buffer now holds ids 3, 4, 5; id 1 fell off the ring.
        assert!(bus.has_gap_since(1));
        assert!(!bus.has_gap_since(3));
    }

    #[tokio::test]
    async fn has_gap_since_is_false_for_empty_buffer() {
        let bus = EventBus::with_capacity(4);
        assert!(!bus.has_gap_since(0));
    }

    #[tokio::test]
    async fn stream_ends_when_bus_dropped() {
        let mut stream = {
            let bus = EventBus::with_capacity(4);
            let stream = bus.subscribe(None);
            drop(bus);
            stream
        };
        let item = stream.next().await;
        assert!(item.is_none());
    }
}
