//! `GET /events/{id}/stream` — server-sent event fan-out.

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use crate::auth::{resolve_auth_info, viewer_access};
use crate::cloud::CloudState;
use crate::error::RacelineError;
use crate::permissions::{policy_for, project_snapshot, vehicle_meta_for};
use crate::pubsub::{EventId, StreamItem, TelemetryEvent};
use crate::types::ViewerAccess;

#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    #[serde(rename = "lastEventId")]
    last_event_id: Option<EventId>,
}

#[derive(Debug, Serialize)]
struct ConnectedFrame {
    server_ts_ms: i64,
    access: ViewerAccess,
}

#[derive(Debug, Serialize)]
struct SnapshotFrame {
    reason: &'static str,
    positions: Vec<serde_json::Value>,
}

fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

fn to_sse_event(name: &str, payload: &impl Serialize) -> Event {
    let body = serde_json::to_string(payload).unwrap_or_else(|_| "{}".to_string());
    Event::default().event(name).data(body)
}

async fn latest_positions_snapshot(
    state: &Arc<CloudState>,
    event_id: &str,
    access: ViewerAccess,
) -> Result<Vec<serde_json::Value>, RacelineError> {
    let rows: Vec<(String, i64, f64, f64, f64, f64, f64, f64, u32)> = sqlx::query_as(
        "SELECT DISTINCT ON (vehicle_id) vehicle_id, ts_ms, lat, lon, speed_mps, \
         heading_deg, altitude_m, hdop, satellites \
         FROM positions WHERE event_id = $1 ORDER BY vehicle_id, ts_ms DESC",
    )
    .bind(event_id)
    .fetch_all(&state.db)
    .await?;

    let mut snapshots = Vec::with_capacity(rows.len());
    for (vehicle_id, ts_ms, lat, lon, speed_mps, heading_deg, altitude_m, hdop, satellites) in rows {
        let policy = policy_for(&state.db, &state.policy_cache, event_id, &vehicle_id).await?;
        let meta = vehicle_meta_for(&state.db, &state.vehicle_meta_cache, &vehicle_id).await?;
        let position = crate::types::PositionSample {
            ts_ms,
            lat,
            lon,
            speed_mps,
            heading_deg,
            altitude_m,
            hdop,
            satellites,
        };
        snapshots.push(project_snapshot(
            &vehicle_id,
            event_id,
            &meta,
            "position",
            Some(&position),
            None,
            access,
            &policy,
        ));
    }
    Ok(snapshots)
}

/// Streams live telemetry for an event as server-sent events, replaying
/// buffered history since `Last-Event-ID`/`?lastEventId=` and falling
/// back to a fresh positions snapshot when that history has already
/// been evicted from the replay ring. A `heartbeat` frame is sent
/// whenever the bus publishes one, independent of the event sequence.
pub async fn stream_events(
    State(state): State<Arc<CloudState>>,
    Path(event_id): Path<String>,
    Query(query): Query<StreamQuery>,
    headers: HeaderMap,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, RacelineError> {
    let auth = resolve_auth_info(&headers, Some(&event_id), &state.db, &state.admin_creds).await?;
    let access = viewer_access(&event_id, &auth, &state.db).await?;

    let requested_since = headers
        .get("last-event-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<EventId>().ok())
        .or(query.last_event_id);

    let bus = state.pubsub.bus_for(&event_id);

    let mut lead_frames = vec![to_sse_event(
        "connected",
        &ConnectedFrame {
            server_ts_ms: now_ms(),
            access,
        },
    )];

    let since = match requested_since {
        Some(since) if bus.has_gap_since(since) => {
            let snapshot = latest_positions_snapshot(&state, &event_id, access).await?;
            lead_frames.push(to_sse_event(
                "snapshot",
                &SnapshotFrame {
                    reason: "replay_history_evicted",
                    positions: snapshot,
                },
            ));
            None
        }
        other => other,
    };

    let live = bus.subscribe(since);
    let pending: std::collections::VecDeque<Event> = lead_frames.into_iter().collect();
    let initial = StreamCursor {
        pending,
        live,
        closed: false,
        state,
        event_id,
        access,
    };

    let body = stream::unfold(initial, |mut cursor| async move {
        if let Some(frame) = cursor.pending.pop_front() {
            return Some((Ok(frame), cursor));
        }
        if cursor.closed {
            return None;
        }
        loop {
            match cursor.live.next().await {
                Some(StreamItem::Heartbeat) => {
                    return Some((Ok(Event::default().event("heartbeat").data("{}")), cursor));
                }
                Some(StreamItem::Event(envelope)) => {
                    if let Some(frame) = project_event(&cursor, envelope).await {
                        return Some((Ok(frame), cursor));
                    }
                    continue;
                }
                None => {
                    cursor.closed = true;
                    return None;
                }
            }
        }
    });

    Ok(Sse::new(body).keep_alive(KeepAlive::new().interval(Duration::from_secs(15))))
}

struct StreamCursor {
    pending: std::collections::VecDeque<Event>,
    live: crate::pubsub::EventStream,
    closed: bool,
    state: Arc<CloudState>,
    event_id: String,
    access: ViewerAccess,
}

async fn project_event(cursor: &StreamCursor, envelope: crate::pubsub::EventEnvelope) -> Option<Event> {
    let db = &cursor.state.db;
    let policy_cache = &cursor.state.policy_cache;
    let event_id = &cursor.event_id;
    let access = cursor.access;

    let vehicle_meta_cache = &cursor.state.vehicle_meta_cache;

    match envelope.event {
        TelemetryEvent::Position { vehicle_id, sample } => {
            let policy = policy_for(db, policy_cache, event_id, &vehicle_id).await.ok()?;
            let meta = vehicle_meta_for(db, vehicle_meta_cache, &vehicle_id).await.ok()?;
            let projected = project_snapshot(&vehicle_id, event_id, &meta, "position", Some(&sample), None, access, &policy);
            Some(with_event_id(to_sse_event("position", &projected), envelope.id))
        }
        TelemetryEvent::Telemetry { vehicle_id, sample } => {
            let policy = policy_for(db, policy_cache, event_id, &vehicle_id).await.ok()?;
            let meta = vehicle_meta_for(db, vehicle_meta_cache, &vehicle_id).await.ok()?;
            let projected = project_snapshot(&vehicle_id, event_id, &meta, "telemetry", None, Some(&sample), access, &policy);
            Some(with_event_id(to_sse_event("telemetry", &projected), envelope.id))
        }
        TelemetryEvent::CheckpointCrossed { crossing } => {
            Some(with_event_id(to_sse_event("checkpoint", &crossing), envelope.id))
        }
        TelemetryEvent::StreamStateChanged { transition } => {
            // Stream control state is operationally relevant to every
            // viewer tier, unlike raw telemetry fields.
            Some(with_event_id(to_sse_event("stream_state", &transition), envelope.id))
        }
    }
}

fn with_event_id(event: Event, id: EventId) -> Event {
    event.id(id.to_string())
}
