//! `POST /telemetry/ingest`, `POST /telemetry/heartbeat`, `GET /truck/me`.

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

use crate::auth::resolve_truck_token;
use crate::checkpoint::detect_crossings;
use crate::cloud::CloudState;
use crate::error::RacelineError;
use crate::pubsub::TelemetryEvent;
use crate::types::{CheckpointCrossing, PositionSample, TelemetrySample};

/// Samples older than this, relative to wall clock, are rejected.
const MAX_SAMPLE_AGE_MS: i64 = 60_000;

#[derive(Debug, Deserialize)]
pub struct IngestRequest {
    #[serde(default)]
    pub positions: Vec<PositionSample>,
    #[serde(default)]
    pub telemetry: Vec<TelemetrySample>,
    /// Carried at the batch level — one uploader batch always comes
    /// from a single vehicle's sources, which are either all-real or
    /// all-simulated for a given run.
    #[serde(default)]
    pub is_simulated: bool,
}

#[derive(Debug, Serialize)]
pub struct IngestResponse {
    pub accepted: u32,
    pub rejected: u32,
    pub checkpoint_crossings: Vec<CheckpointCrossing>,
}

fn truck_token(headers: &HeaderMap) -> Result<&str, RacelineError> {
    headers
        .get("x-truck-token")
        .and_then(|v| v.to_str().ok())
        .ok_or(RacelineError::Unauthenticated)
}

fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// `POST /api/v1/telemetry/ingest`
pub async fn ingest(
    State(state): State<Arc<CloudState>>,
    headers: HeaderMap,
    Json(request): Json<IngestRequest>,
) -> Result<Json<IngestResponse>, RacelineError> {
    let token = truck_token(&headers)?;
    let Some(entry) = resolve_truck_token(&state.db, &state.token_cache, token).await? else {
        return Err(RacelineError::Unauthenticated);
    };
    let vehicle_id = entry.vehicle_id;
    let event_id = entry.event_id;

    let now = now_ms();
    let mut accepted = 0u32;
    let mut rejected = 0u32;
    let mut crossings = Vec::new();
    let bus = state.pubsub.bus_for(&event_id);

    for sample in &request.positions {
        if now - sample.ts_ms > MAX_SAMPLE_AGE_MS {
            rejected += 1;
            continue;
        }

        let smoothed = state.kalman_cache.smooth(
            &vehicle_id,
            sample.lat,
            sample.lon,
            sample.ts_ms,
            Some(sample.speed_mps),
            Some(sample.heading_deg),
        );
        if smoothed.is_outlier {
            // The filter's predicted state already advanced; nothing
            // further to persist for this sample.
            continue;
        }

        let smoothed_sample = PositionSample {
            ts_ms: sample.ts_ms,
            lat: smoothed.lat,
            lon: smoothed.lon,
            speed_mps: smoothed.speed_mps,
            heading_deg: smoothed.heading_deg,
            altitude_m: sample.altitude_m,
            hdop: sample.hdop,
            satellites: sample.satellites,
        };

        let inserted = sqlx::query(
            "INSERT INTO positions (event_id, vehicle_id, ts_ms, lat, lon, speed_mps, \
             heading_deg, altitude_m, hdop, satellites, is_simulated) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) \
             ON CONFLICT (event_id, vehicle_id, ts_ms) DO NOTHING",
        )
        .bind(&event_id)
        .bind(&vehicle_id)
        .bind(smoothed_sample.ts_ms)
        .bind(smoothed_sample.lat)
        .bind(smoothed_sample.lon)
        .bind(smoothed_sample.speed_mps)
        .bind(smoothed_sample.heading_deg)
        .bind(smoothed_sample.altitude_m)
        .bind(smoothed_sample.hdop)
        .bind(smoothed_sample.satellites)
        .bind(request.is_simulated)
        .execute(&state.db)
        .await?;

        if inserted.rows_affected() == 0 {
            // Duplicate delivery from a retried batch — neither accepted nor rejected.
            continue;
        }
        accepted += 1;

        sqlx::query(
            "UPDATE vehicles SET last_seen_ms = $2 WHERE vehicle_id = $1",
        )
        .bind(&vehicle_id)
        .bind(sample.ts_ms)
        .execute(&state.db)
        .await?;

        bus.publish(TelemetryEvent::Position {
            vehicle_id: vehicle_id.clone(),
            sample: smoothed_sample.clone(),
        });

        let new_crossings = detect_crossings(
            &state.db,
            &event_id,
            &vehicle_id,
            smoothed_sample.lat,
            smoothed_sample.lon,
            smoothed_sample.ts_ms,
        )
        .await?;
        for crossing in &new_crossings {
            bus.publish(TelemetryEvent::CheckpointCrossed {
                crossing: crossing.clone(),
            });
        }
        crossings.extend(new_crossings);
    }

    for sample in &request.telemetry {
        if now - sample.ts_ms > MAX_SAMPLE_AGE_MS {
            rejected += 1;
            continue;
        }

        let inserted = sqlx::query(
            "INSERT INTO telemetry (event_id, vehicle_id, ts_ms, rpm, gear, throttle_pct, \
             coolant_temp_c, oil_pressure_psi, fuel_pressure_psi, speed_mph, heart_rate, \
             heart_rate_zone, is_simulated) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13) \
             ON CONFLICT (event_id, vehicle_id, ts_ms) DO NOTHING",
        )
        .bind(&event_id)
        .bind(&vehicle_id)
        .bind(sample.ts_ms)
        .bind(sample.rpm)
        .bind(sample.gear)
        .bind(sample.throttle_pct)
        .bind(sample.coolant_temp_c)
        .bind(sample.oil_pressure_psi)
        .bind(sample.fuel_pressure_psi)
        .bind(sample.speed_mph)
        .bind(sample.heart_rate)
        .bind(sample.heart_rate_zone)
        .bind(request.is_simulated)
        .execute(&state.db)
        .await?;

        if inserted.rows_affected() == 0 {
            continue;
        }
        accepted += 1;

        bus.publish(TelemetryEvent::Telemetry {
            vehicle_id: vehicle_id.clone(),
            sample: sample.clone(),
        });
    }

    Ok(Json(IngestResponse {
        accepted,
        rejected,
        checkpoint_crossings: crossings,
    }))
}

#[derive(Debug, Serialize)]
pub struct HeartbeatResponse {
    pub vehicle_id: String,
    pub event_id: Option<String>,
    pub event_status: Option<String>,
    pub server_ts_ms: i64,
}

/// `POST /api/v1/telemetry/heartbeat` — accepted regardless of event status.
pub async fn heartbeat(
    State(state): State<Arc<CloudState>>,
    headers: HeaderMap,
) -> Result<Json<HeartbeatResponse>, RacelineError> {
    let token = truck_token(&headers)?;
    let row: Option<(String,)> = sqlx::query_as("SELECT vehicle_id FROM vehicles WHERE truck_token = $1")
        .bind(token)
        .fetch_optional(&state.db)
        .await?;
    let Some((vehicle_id,)) = row else {
        return Err(RacelineError::Unauthenticated);
    };

    let event_row: Option<(String, String)> = sqlx::query_as(
        "SELECT e.event_id, e.status FROM events e \
         JOIN event_vehicles ev ON ev.event_id = e.event_id \
         WHERE ev.vehicle_id = $1 ORDER BY e.event_id DESC LIMIT 1",
    )
    .bind(&vehicle_id)
    .fetch_optional(&state.db)
    .await?;

    let (event_id, event_status) = match event_row {
        Some((id, status)) => (Some(id), Some(status)),
        None => (None, None),
    };

    if let Err(error) = sqlx::query("UPDATE vehicles SET last_seen_ms = $2 WHERE vehicle_id = $1")
        .bind(&vehicle_id)
        .bind(now_ms())
        .execute(&state.db)
        .await
    {
        warn!(%error, vehicle_id, "failed to record heartbeat last_seen");
    }

    Ok(Json(HeartbeatResponse {
        vehicle_id,
        event_id,
        event_status,
        server_ts_ms: now_ms(),
    }))
}

#[derive(Debug, Serialize)]
pub struct TruckMeResponse {
    pub vehicle_id: String,
    pub event_id: Option<String>,
    pub event_status: Option<String>,
}

/// `GET /api/v1/truck/me`
pub async fn truck_me(
    State(state): State<Arc<CloudState>>,
    headers: HeaderMap,
) -> Result<Json<TruckMeResponse>, RacelineError> {
    let token = truck_token(&headers)?;
    let row: Option<(String,)> = sqlx::query_as("SELECT vehicle_id FROM vehicles WHERE truck_token = $1")
        .bind(token)
        .fetch_optional(&state.db)
        .await?;
    let Some((vehicle_id,)) = row else {
        return Err(RacelineError::Unauthenticated);
    };

    let event_row: Option<(String, String)> = sqlx::query_as(
        "SELECT e.event_id, e.status FROM events e \
         JOIN event_vehicles ev ON ev.event_id = e.event_id \
         WHERE ev.vehicle_id = $1 ORDER BY e.event_id DESC LIMIT 1",
    )
    .bind(&vehicle_id)
    .fetch_optional(&state.db)
    .await?;

    let (event_id, event_status) = match event_row {
        Some((id, status)) => (Some(id), Some(status)),
        None => (None, None),
    };

    Ok(Json(TruckMeResponse {
        vehicle_id,
        event_id,
        event_status,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn age_gate_rejects_samples_older_than_threshold() {
        let now = 1_000_000i64;
        let sample_ts = now - MAX_SAMPLE_AGE_MS - 1;
        assert!(now - sample_ts > MAX_SAMPLE_AGE_MS);
    }

    #[test]
    fn age_gate_accepts_samples_within_threshold() {
        let now = 1_000_000i64;
        let sample_ts = now - MAX_SAMPLE_AGE_MS + 1;
        assert!(now - sample_ts <= MAX_SAMPLE_AGE_MS);
    }
}
