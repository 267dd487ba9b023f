//! Race standings computed from the checkpoint crossing table, plus
//! per-checkpoint split times.

use crate::error::RacelineError;
use crate::geo::{format_time_delta_ms, progress_along_course};
use crate::types::Course;
use serde::Serialize;
use std::collections::HashMap;

const METERS_PER_MILE: f64 = 1609.344;

#[derive(Debug, Clone, Serialize)]
pub struct LeaderboardEntry {
    pub position: u32,
    pub vehicle_id: String,
    pub vehicle_number: i32,
    pub team_name: String,
    pub driver_name: String,
    pub last_checkpoint: u32,
    pub last_checkpoint_name: String,
    pub delta_to_leader_ms: i64,
    pub delta_formatted: String,
    pub lap: u32,
    pub progress_miles: f64,
    pub miles_remaining: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct LeaderboardResponse {
    pub event_id: String,
    pub entries: Vec<LeaderboardEntry>,
}

struct VehicleRow {
    vehicle_id: String,
    vehicle_number: i32,
    team_name: String,
    driver_name: String,
}

struct CrossingRow {
    vehicle_id: String,
    checkpoint_number: i32,
    lap: i32,
    ts_ms: i64,
}

/// Ranks vehicles by `(lap desc, checkpoint desc, crossing time asc)`,
/// appending registered-but-not-yet-crossed vehicles at the bottom as
/// "Not Started", ordered by vehicle number.
pub async fn calculate_leaderboard(
    db: &sqlx::PgPool,
    event_id: &str,
) -> Result<LeaderboardResponse, RacelineError> {
    let vehicle_rows: Vec<(String, i32, String, String)> = sqlx::query_as(
        "SELECT v.vehicle_id, v.vehicle_number, v.team_name, v.driver_name \
         FROM vehicles v \
         JOIN event_vehicles ev ON ev.vehicle_id = v.vehicle_id \
         WHERE ev.event_id = $1 AND ev.visible = true",
    )
    .bind(event_id)
    .fetch_all(db)
    .await?;
    let vehicles: HashMap<String, VehicleRow> = vehicle_rows
        .into_iter()
        .map(
            |(vehicle_id, vehicle_number, team_name, driver_name)| {
                (
                    vehicle_id.clone(),
                    VehicleRow {
                        vehicle_id,
                        vehicle_number,
                        team_name,
                        driver_name,
                    },
                )
            },
        )
        .collect();

    if vehicles.is_empty() {
        return Ok(LeaderboardResponse {
            event_id: event_id.to_string(),
            entries: Vec::new(),
        });
    }

    let crossing_rows: Vec<(String, i32, i32, i64)> = sqlx::query_as(
        "SELECT vehicle_id, checkpoint_number, lap, ts_ms FROM checkpoint_crossings \
         WHERE event_id = $1 ORDER BY lap DESC, checkpoint_number DESC, ts_ms ASC",
    )
    .bind(event_id)
    .fetch_all(db)
    .await?;
    let crossings: Vec<CrossingRow> = crossing_rows
        .into_iter()
        .map(|(vehicle_id, checkpoint_number, lap, ts_ms)| CrossingRow {
            vehicle_id,
            checkpoint_number,
            lap,
            ts_ms,
        })
        .collect();

    let checkpoint_name_rows: Vec<(i32, Option<String>)> = sqlx::query_as(
        "SELECT checkpoint_number, name FROM checkpoints WHERE event_id = $1",
    )
    .bind(event_id)
    .fetch_all(db)
    .await?;
    let checkpoint_names: HashMap<i32, Option<String>> = checkpoint_name_rows.into_iter().collect();

    let course_row: Option<(serde_json::Value,)> =
        sqlx::query_as("SELECT course_json FROM events WHERE event_id = $1")
            .bind(event_id)
            .fetch_optional(db)
            .await?;
    let course: Course = course_row
        .and_then(|(json,)| serde_json::from_value(json).ok())
        .unwrap_or_default();
    let total_course_miles = course.distance_m() / METERS_PER_MILE;

    let latest_position_rows: Vec<(String, f64, f64)> = sqlx::query_as(
        "SELECT DISTINCT ON (vehicle_id) vehicle_id, lat, lon FROM positions \
         WHERE event_id = $1 ORDER BY vehicle_id, ts_ms DESC",
    )
    .bind(event_id)
    .fetch_all(db)
    .await?;
    let latest_positions: HashMap<String, (f64, f64)> = latest_position_rows
        .into_iter()
        .map(|(vehicle_id, lat, lon)| (vehicle_id, (lat, lon)))
        .collect();

    let progress_miles_for = |vehicle_id: &str| -> f64 {
        latest_positions
            .get(vehicle_id)
            .map(|(lat, lon)| progress_along_course(&course, *lat, *lon) / METERS_PER_MILE)
            .unwrap_or(0.0)
    };

    // Best (highest lap, highest checkpoint, earliest time) crossing per vehicle.
    let mut vehicle_best: HashMap<String, &CrossingRow> = HashMap::new();
    for crossing in &crossings {
        match vehicle_best.get(&crossing.vehicle_id) {
            None => {
                vehicle_best.insert(crossing.vehicle_id.clone(), crossing);
            }
            Some(current) => {
                let better = (crossing.lap, crossing.checkpoint_number)
                    > (current.lap, current.checkpoint_number)
                    || ((crossing.lap, crossing.checkpoint_number)
                        == (current.lap, current.checkpoint_number)
                        && crossing.ts_ms < current.ts_ms);
                if better {
                    vehicle_best.insert(crossing.vehicle_id.clone(), crossing);
                }
            }
        }
    }

    let mut with_crossings: Vec<(&String, &CrossingRow)> = vehicle_best
        .iter()
        .filter(|(vid, _)| vehicles.contains_key(*vid))
        .map(|(vid, c)| (vid, *c))
        .collect();
    with_crossings.sort_by(|(_, a), (_, b)| {
        b.lap
            .cmp(&a.lap)
            .then(b.checkpoint_number.cmp(&a.checkpoint_number))
            .then(a.ts_ms.cmp(&b.ts_ms))
    });

    let mut leader_times: HashMap<(i32, i32), i64> = HashMap::new();
    for (_, crossing) in &with_crossings {
        leader_times
            .entry((crossing.lap, crossing.checkpoint_number))
            .or_insert(crossing.ts_ms);
    }

    let mut entries = Vec::new();
    for (position, (vid, crossing)) in with_crossings.iter().enumerate() {
        let Some(vehicle) = vehicles.get(*vid) else {
            continue;
        };
        let leader_time = leader_times
            .get(&(crossing.lap, crossing.checkpoint_number))
            .copied()
            .unwrap_or(crossing.ts_ms);
        let delta_ms = crossing.ts_ms - leader_time;
        let cp_name = checkpoint_names
            .get(&crossing.checkpoint_number)
            .cloned()
            .flatten();
        let cp_display = if crossing.lap > 1 {
            format!(
                "Lap {} - {}",
                crossing.lap,
                cp_name.unwrap_or_else(|| format!("CP{}", crossing.checkpoint_number))
            )
        } else {
            cp_name.unwrap_or_else(|| format!("CP{}", crossing.checkpoint_number))
        };

        let progress_miles = progress_miles_for(&vehicle.vehicle_id);
        entries.push(LeaderboardEntry {
            position: position as u32 + 1,
            vehicle_id: vehicle.vehicle_id.clone(),
            vehicle_number: vehicle.vehicle_number,
            team_name: vehicle.team_name.clone(),
            driver_name: vehicle.driver_name.clone(),
            last_checkpoint: crossing.checkpoint_number as u32,
            last_checkpoint_name: cp_display,
            delta_to_leader_ms: delta_ms,
            delta_formatted: format_time_delta_ms(delta_ms),
            lap: crossing.lap as u32,
            progress_miles,
            miles_remaining: (total_course_miles - progress_miles).max(0.0),
        });
    }

    let mut not_started: Vec<&VehicleRow> = vehicles
        .values()
        .filter(|v| !vehicle_best.contains_key(&v.vehicle_id))
        .collect();
    not_started.sort_by_key(|v| v.vehicle_number);

    let start_position = entries.len() as u32 + 1;
    for (i, vehicle) in not_started.into_iter().enumerate() {
        let progress_miles = progress_miles_for(&vehicle.vehicle_id);
        entries.push(LeaderboardEntry {
            position: start_position + i as u32,
            vehicle_id: vehicle.vehicle_id.clone(),
            vehicle_number: vehicle.vehicle_number,
            team_name: vehicle.team_name.clone(),
            driver_name: vehicle.driver_name.clone(),
            last_checkpoint: 0,
            last_checkpoint_name: "Not Started".to_string(),
            delta_to_leader_ms: 0,
            delta_formatted: "\u{2014}".to_string(),
            lap: 1,
            progress_miles,
            miles_remaining: (total_course_miles - progress_miles).max(0.0),
        });
    }

    Ok(LeaderboardResponse {
        event_id: event_id.to_string(),
        entries,
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct SplitEntry {
    pub checkpoint_number: u32,
    pub checkpoint_name: Option<String>,
    pub vehicle_id: String,
    pub vehicle_number: i32,
    pub lap: u32,
    pub ts_ms: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SplitsResponse {
    pub event_id: String,
    pub splits: Vec<SplitEntry>,
}

/// Every recorded crossing for the event, ordered by checkpoint then
/// by time within that checkpoint.
pub async fn calculate_splits(db: &sqlx::PgPool, event_id: &str) -> Result<SplitsResponse, RacelineError> {
    let rows: Vec<(i32, Option<String>, String, i32, i32, i64)> = sqlx::query_as(
        "SELECT cc.checkpoint_number, c.name, cc.vehicle_id, v.vehicle_number, cc.lap, cc.ts_ms \
         FROM checkpoint_crossings cc \
         JOIN vehicles v ON v.vehicle_id = cc.vehicle_id \
         LEFT JOIN checkpoints c ON c.checkpoint_id = cc.checkpoint_id \
         WHERE cc.event_id = $1 \
         ORDER BY cc.checkpoint_number ASC, cc.ts_ms ASC",
    )
    .bind(event_id)
    .fetch_all(db)
    .await?;

    let splits = rows
        .into_iter()
        .map(
            |(checkpoint_number, checkpoint_name, vehicle_id, vehicle_number, lap, ts_ms)| SplitEntry {
                checkpoint_number: checkpoint_number as u32,
                checkpoint_name,
                vehicle_id,
                vehicle_number,
                lap: lap as u32,
                ts_ms,
            },
        )
        .collect();

    Ok(SplitsResponse {
        event_id: event_id.to_string(),
        splits,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn best_crossing_prefers_higher_lap_then_checkpoint_then_earlier_time() {
        let a = CrossingRow {
            vehicle_id: "v1".to_string(),
            checkpoint_number: 2,
            lap: 1,
            ts_ms: 2000,
        };
        let b = CrossingRow {
            vehicle_id: "v1".to_string(),
            checkpoint_number: 2,
            lap: 2,
            ts_ms: 1000,
        };
        let better = (b.lap, b.checkpoint_number) > (a.lap, a.checkpoint_number);
        assert!(better);
    }

    #[test]
    fn not_started_delta_uses_em_dash() {
        assert_eq!(format_time_delta_ms(0), "0.0s");
    }
}
