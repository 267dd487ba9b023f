//! Pub/Sub Replay Integration Tests
//!
//! Drives `PubSubRegistry`/`EventBus` the way the SSE handler does:
//! publish while disconnected, reconnect with a `Last-Event-ID`, and
//! confirm either full replay or a gap is reported.

use raceline::pubsub::{PubSubRegistry, StreamItem, TelemetryEvent};
use raceline::types::PositionSample;

fn position_event(ts_ms: i64) -> TelemetryEvent {
    TelemetryEvent::Position {
        vehicle_id: "veh-1".to_string(),
        sample: PositionSample {
            ts_ms,
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
async fn reconnect_with_recent_last_event_id_replays_exactly_the_gap() {
    let registry = PubSubRegistry::new(100);
    let bus = registry.bus_for("evt-1");

    let mut seen_ids = Vec::new();
    for i in 0..3 {
        seen_ids.push(bus.publish(position_event(i)));
    }
    let last_seen = *seen_ids.last().unwrap();

    // Client disconnects here; more events happen while it's away.
    for i in 3..6 {
        bus.publish(position_event(i));
    }

    let mut stream = bus.subscribe(Some(last_seen));
    let mut replayed = Vec::new();
    for _ in 0..3 {
        match stream.next().await {
            Some(StreamItem::Event(e)) => replayed.push(e.id),
            other => panic!("expected a replayed event, got {other:?}"),
        }
    }
    assert_eq!(replayed, vec![last_seen + 1, last_seen + 2, last_seen + 3]);
}

#[tokio::test]
async fn reconnect_past_ring_eviction_reports_a_gap() {
    let registry = PubSubRegistry::new(4);
    let bus = registry.bus_for("evt-1");

    let first_id = bus.publish(position_event(0));
    for i in 1..10 {
        bus.publish(position_event(i));
    }

    assert!(
        bus.has_gap_since(first_id),
        "the first published event should have fallen off a 4-slot ring after 10 publishes"
    );
}

#[tokio::test]
async fn events_published_after_subscribe_arrive_live() {
    let registry = PubSubRegistry::new(16);
    let bus = registry.bus_for("evt-2");
    let mut stream = bus.subscribe(None);

    let id = bus.publish(position_event(42));
    match stream.next().await {
        Some(StreamItem::Event(e)) => assert_eq!(e.id, id),
        other => panic!("expected a live event, got {other:?}"),
    }
}

#[tokio::test]
async fn different_events_do_not_cross_streams() {
    let registry = PubSubRegistry::new(16);
    let bus_a = registry.bus_for("evt-a");
    let bus_b = registry.bus_for("evt-b");

    bus_a.publish(position_event(1));
    assert_eq!(bus_b.last_event_id(), None);
}
