//! Checkpoint crossing detection and lap advancement.
//!
//! A position is only accepted as a crossing of the *next expected*
//! checkpoint for that vehicle — out-of-order hits (a checkpoint the
//! vehicle already passed, or one further ahead than the next one) are
//! ignored. This keeps GPS noise near a checkpoint boundary from
//! generating duplicate or out-of-sequence crossings.

use crate::error::RacelineError;
use crate::geo::haversine_distance_m;
use crate::types::{CheckpointCrossing, VehicleLapState};

struct CheckpointRow {
    checkpoint_id: String,
    checkpoint_number: i32,
    lat: f64,
    lon: f64,
    radius_m: f64,
    name: Option<String>,
}

fn generate_crossing_id() -> String {
    format!("cx_{}", uuid::Uuid::new_v4())
}

async fn load_lap_state(
    db: &sqlx::PgPool,
    event_id: &str,
    vehicle_id: &str,
) -> Result<VehicleLapState, RacelineError> {
    let row: Option<(i32, i32)> = sqlx::query_as(
        "SELECT current_lap, last_checkpoint FROM vehicle_lap_state \
         WHERE event_id = $1 AND vehicle_id = $2",
    )
    .bind(event_id)
    .bind(vehicle_id)
    .fetch_optional(db)
    .await?;

    if let Some((current_lap, last_checkpoint)) = row {
        return Ok(VehicleLapState {
            current_lap: current_lap as u32,
            last_checkpoint: last_checkpoint as u32,
        });
    }

    let default = VehicleLapState::default();
    sqlx::query(
        "INSERT INTO vehicle_lap_state (event_id, vehicle_id, current_lap, last_checkpoint) \
         VALUES ($1, $2, $3, $4) ON CONFLICT (event_id, vehicle_id) DO NOTHING",
    )
    .bind(event_id)
    .bind(vehicle_id)
    .bind(default.current_lap as i32)
    .bind(default.last_checkpoint as i32)
    .execute(db)
    .await?;

    Ok(default)
}

async fn save_lap_state(
    db: &sqlx::PgPool,
    event_id: &str,
    vehicle_id: &str,
    state: VehicleLapState,
) -> Result<(), RacelineError> {
    sqlx::query(
        "UPDATE vehicle_lap_state SET current_lap = $3, last_checkpoint = $4 \
         WHERE event_id = $1 AND vehicle_id = $2",
    )
    .bind(event_id)
    .bind(vehicle_id)
    .bind(state.current_lap as i32)
    .bind(state.last_checkpoint as i32)
    .execute(db)
    .await?;
    Ok(())
}

/// Detects and records any checkpoint crossings implied by a single
/// smoothed position, advancing the vehicle's lap state for each one
/// actually recorded.
///
/// Checkpoints are evaluated in ascending `checkpoint_number` order, so
/// if a noisy fix happens to sit inside two checkpoints' radii at
/// once, the earlier one (the one actually expected next) wins the
/// tie.
pub async fn detect_crossings(
    db: &sqlx::PgPool,
    event_id: &str,
    vehicle_id: &str,
    lat: f64,
    lon: f64,
    ts_ms: i64,
) -> Result<Vec<CheckpointCrossing>, RacelineError> {
    let total_laps: Option<(i32,)> =
        sqlx::query_as("SELECT total_laps FROM events WHERE event_id = $1")
            .bind(event_id)
            .fetch_optional(db)
            .await?;
    let Some((total_laps,)) = total_laps else {
        return Ok(Vec::new());
    };
    let total_laps = total_laps.max(1) as u32;

    let checkpoint_rows: Vec<(String, i32, f64, f64, f64, Option<String>)> = sqlx::query_as(
        "SELECT checkpoint_id, checkpoint_number, lat, lon, radius_m, name \
         FROM checkpoints WHERE event_id = $1 ORDER BY checkpoint_number ASC",
    )
    .bind(event_id)
    .fetch_all(db)
    .await?;
    if checkpoint_rows.is_empty() {
        return Ok(Vec::new());
    }
    let checkpoints: Vec<CheckpointRow> = checkpoint_rows
        .into_iter()
        .map(
            |(checkpoint_id, checkpoint_number, lat, lon, radius_m, name)| CheckpointRow {
                checkpoint_id,
                checkpoint_number,
                lat,
                lon,
                radius_m,
                name,
            },
        )
        .collect();
    let max_checkpoint = checkpoints
        .iter()
        .map(|c| c.checkpoint_number)
        .max()
        .unwrap_or(0) as u32;

    let mut lap_state = load_lap_state(db, event_id, vehicle_id).await?;
    let mut new_crossings = Vec::new();

    for checkpoint in &checkpoints {
        let distance = haversine_distance_m(lat, lon, checkpoint.lat, checkpoint.lon);
        if distance > checkpoint.radius_m {
            continue;
        }

        let mut current_lap = lap_state.current_lap;
        let mut expected_next = lap_state.last_checkpoint + 1;
        if expected_next > max_checkpoint {
            expected_next = 1;
            if lap_state.current_lap < total_laps {
                current_lap = lap_state.current_lap + 1;
            }
        }

        if checkpoint.checkpoint_number as u32 != expected_next {
            continue;
        }

        let crossing_id = generate_crossing_id();
        let inserted = sqlx::query(
            "INSERT INTO checkpoint_crossings \
             (crossing_id, event_id, vehicle_id, checkpoint_id, checkpoint_number, lap, ts_ms) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             ON CONFLICT (event_id, vehicle_id, checkpoint_id, lap) DO NOTHING",
        )
        .bind(&crossing_id)
        .bind(event_id)
        .bind(vehicle_id)
        .bind(&checkpoint.checkpoint_id)
        .bind(checkpoint.checkpoint_number)
        .bind(current_lap as i32)
        .bind(ts_ms)
        .execute(db)
        .await?;

        // A concurrent request already recorded this exact crossing —
        // the race loser skips the lap-state update too, since the
        // winner already applied it.
        if inserted.rows_affected() == 0 {
            continue;
        }

        lap_state.last_checkpoint = checkpoint.checkpoint_number as u32;
        if current_lap > lap_state.current_lap {
            lap_state.current_lap = current_lap;
        }

        new_crossings.push(CheckpointCrossing {
            crossing_id,
            event_id: event_id.to_string(),
            vehicle_id: vehicle_id.to_string(),
            checkpoint_id: checkpoint.checkpoint_id.clone(),
            checkpoint_number: checkpoint.checkpoint_number as u32,
            lap: current_lap,
            ts_ms,
        });
    }

    if !new_crossings.is_empty() {
        save_lap_state(db, event_id, vehicle_id, lap_state).await?;
    }

    Ok(new_crossings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrap_advances_lap_when_under_total() {
        let lap_state = VehicleLapState {
            current_lap: 1,
            last_checkpoint: 3,
        };
        let max_checkpoint = 3u32;
        let total_laps = 3u32;
        let mut expected_next = lap_state.last_checkpoint + 1;
        let mut current_lap = lap_state.current_lap;
        if expected_next > max_checkpoint {
            expected_next = 1;
            if lap_state.current_lap < total_laps {
                current_lap = lap_state.current_lap + 1;
            }
        }
        assert_eq!(expected_next, 1);
        assert_eq!(current_lap, 2);
    }

    #[test]
    fn wrap_does_not_advance_past_total_laps() {
        let lap_state = VehicleLapState {
            current_lap: 3,
            last_checkpoint: 3,
        };
        let max_checkpoint = 3u32;
        let total_laps = 3u32;
        let mut current_lap = lap_state.current_lap;
        let mut expected_next = lap_state.last_checkpoint + 1;
        if expected_next > max_checkpoint {
            expected_next = 1;
            if lap_state.current_lap < total_laps {
                current_lap = lap_state.current_lap + 1;
            }
        }
        assert_eq!(expected_next, 1);
        assert_eq!(current_lap, 3);
    }
}
