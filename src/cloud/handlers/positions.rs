//! `GET /events/{id}/positions/latest` — all vehicles' latest positions,
//! field-filtered for the requesting viewer's access tier.

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::Serialize;
use std::sync::Arc;

use crate::auth::{resolve_auth_info, viewer_access};
use crate::cloud::CloudState;
use crate::error::RacelineError;
use crate::permissions::{policy_for, project_snapshot, vehicle_meta_for};
use crate::types::PositionSample;

#[derive(Debug, Serialize)]
pub struct LatestPositionsResponse {
    pub event_id: String,
    pub positions: Vec<serde_json::Value>,
}

pub async fn latest_positions(
    State(state): State<Arc<CloudState>>,
    Path(event_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<LatestPositionsResponse>, RacelineError> {
    let auth = resolve_auth_info(&headers, Some(&event_id), &state.db, &state.admin_creds).await?;
    let access = viewer_access(&event_id, &auth, &state.db).await?;

    let rows: Vec<(String, i64, f64, f64, f64, f64, f64, f64, u32)> = sqlx::query_as(
        "SELECT DISTINCT ON (p.vehicle_id) p.vehicle_id, p.ts_ms, p.lat, p.lon, p.speed_mps, \
         p.heading_deg, p.altitude_m, p.hdop, p.satellites \
         FROM positions p \
         JOIN event_vehicles ev ON ev.event_id = p.event_id AND ev.vehicle_id = p.vehicle_id \
         WHERE p.event_id = $1 AND ev.visible = true \
         ORDER BY p.vehicle_id, p.ts_ms DESC",
    )
    .bind(&event_id)
    .fetch_all(&state.db)
    .await?;

    let mut positions = Vec::with_capacity(rows.len());
    for (vehicle_id, ts_ms, lat, lon, speed_mps, heading_deg, altitude_m, hdop, satellites) in rows {
        let policy = policy_for(&state.db, &state.policy_cache, &event_id, &vehicle_id).await?;
        let meta = vehicle_meta_for(&state.db, &state.vehicle_meta_cache, &vehicle_id).await?;
        let sample = PositionSample {
            ts_ms,
            lat,
            lon,
            speed_mps,
            heading_deg,
            altitude_m,
            hdop,
            satellites,
        };
        positions.push(project_snapshot(
            &vehicle_id,
            &event_id,
            &meta,
            "position",
            Some(&sample),
            None,
            access,
            &policy,
        ));
    }

    Ok(Json(LatestPositionsResponse { event_id, positions }))
}
