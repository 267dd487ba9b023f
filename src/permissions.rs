//! Field-level permission projection for outbound telemetry.
//!
//! Every position/telemetry update sent to a viewer is built by
//! [`project_snapshot`] from a per-(event, vehicle) [`TelemetryPolicy`],
//! never forwarded verbatim — this is the only place client-visible
//! telemetry payloads are assembled.

use crate::error::RacelineError;
use crate::types::{PositionSample, TelemetryPolicy, TelemetrySample, ViewerAccess};
use dashmap::DashMap;
use serde_json::{Map, Value};
use std::time::{Duration, Instant};

struct CachedPolicy {
    policy: TelemetryPolicy,
    expires_at: Instant,
}

/// TTL'd cache of per-(event, vehicle) telemetry sharing policies.
pub struct PolicyCache {
    entries: DashMap<(String, String), CachedPolicy>,
    ttl: Duration,
}

impl Default for PolicyCache {
    fn default() -> Self {
        Self::new(Duration::from_secs(60))
    }
}

impl PolicyCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    pub fn invalidate(&self, event_id: &str, vehicle_id: &str) {
        self.entries
            .remove(&(event_id.to_string(), vehicle_id.to_string()));
    }

    fn get(&self, event_id: &str, vehicle_id: &str) -> Option<TelemetryPolicy> {
        let key = (event_id.to_string(), vehicle_id.to_string());
        let entry = self.entries.get(&key)?;
        if entry.expires_at > Instant::now() {
            Some(entry.policy.clone())
        } else {
            None
        }
    }

    fn insert(&self, event_id: &str, vehicle_id: &str, policy: TelemetryPolicy) {
        self.entries.insert(
            (event_id.to_string(), vehicle_id.to_string()),
            CachedPolicy {
                policy,
                expires_at: Instant::now() + self.ttl,
            },
        );
    }
}

/// Loads the sharing policy for a vehicle, through the cache, falling
/// back to [`TelemetryPolicy::default`] (GPS-only, production-only) if
/// none has been configured.
pub async fn policy_for(
    db: &sqlx::PgPool,
    cache: &PolicyCache,
    event_id: &str,
    vehicle_id: &str,
) -> Result<TelemetryPolicy, RacelineError> {
    if let Some(policy) = cache.get(event_id, vehicle_id) {
        return Ok(policy);
    }

    let rows: Vec<(String, bool, bool)> = sqlx::query_as(
        "SELECT field_name, allow_production, allow_fans FROM telemetry_policy \
         WHERE event_id = $1 AND vehicle_id = $2",
    )
    .bind(event_id)
    .bind(vehicle_id)
    .fetch_all(db)
    .await?;

    let policy = if rows.is_empty() {
        TelemetryPolicy::default()
    } else {
        let mut allow_production = std::collections::HashSet::new();
        let mut allow_fans = std::collections::HashSet::new();
        for (field, prod, fans) in rows {
            if prod {
                allow_production.insert(field.clone());
            }
            if fans {
                allow_fans.insert(field);
            }
        }
        TelemetryPolicy::new(allow_production, allow_fans)
    };

    cache.insert(event_id, vehicle_id, policy.clone());
    Ok(policy)
}

fn insert_if_allowed(map: &mut Map<String, Value>, allowed: &std::collections::HashSet<String>, name: &str, value: Option<Value>) {
    if let Some(value) = value {
        if allowed.contains(name) {
            map.insert(name.to_string(), value);
        }
    }
}

/// A vehicle's display identity, looked up alongside its telemetry
/// policy since both are needed to build a client-visible snapshot.
#[derive(Debug, Clone)]
pub struct VehicleMeta {
    pub vehicle_number: u32,
    pub team_name: String,
}

struct CachedVehicleMeta {
    meta: VehicleMeta,
    expires_at: Instant,
}

/// TTL'd cache of per-vehicle display metadata (number, team name).
/// Changes rarely but is read on every projected snapshot, so it gets
/// the same cache-in-front-of-Postgres treatment as [`PolicyCache`].
pub struct VehicleMetaCache {
    entries: DashMap<String, CachedVehicleMeta>,
    ttl: Duration,
}

impl Default for VehicleMetaCache {
    fn default() -> Self {
        Self::new(Duration::from_secs(60))
    }
}

impl VehicleMetaCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    fn get(&self, vehicle_id: &str) -> Option<VehicleMeta> {
        let entry = self.entries.get(vehicle_id)?;
        if entry.expires_at > Instant::now() {
            Some(entry.meta.clone())
        } else {
            None
        }
    }

    fn insert(&self, vehicle_id: &str, meta: VehicleMeta) {
        self.entries.insert(
            vehicle_id.to_string(),
            CachedVehicleMeta {
                meta,
                expires_at: Instant::now() + self.ttl,
            },
        );
    }
}

/// Loads a vehicle's display number and team name, through the cache.
/// Falls back to `(0, "")` if the vehicle row is somehow missing rather
/// than failing the whole snapshot over a cosmetic field.
pub async fn vehicle_meta_for(
    db: &sqlx::PgPool,
    cache: &VehicleMetaCache,
    vehicle_id: &str,
) -> Result<VehicleMeta, RacelineError> {
    if let Some(meta) = cache.get(vehicle_id) {
        return Ok(meta);
    }

    let row: Option<(i32, String)> =
        sqlx::query_as("SELECT vehicle_number, team_name FROM vehicles WHERE vehicle_id = $1")
            .bind(vehicle_id)
            .fetch_optional(db)
            .await?;

    let meta = match row {
        Some((vehicle_number, team_name)) => VehicleMeta {
            vehicle_number: vehicle_number as u32,
            team_name,
        },
        None => VehicleMeta {
            vehicle_number: 0,
            team_name: String::new(),
        },
    };

    cache.insert(vehicle_id, meta.clone());
    Ok(meta)
}

/// Projects a position (and optional latest telemetry) down to the
/// fields `viewer_access` is allowed to see under `policy`. Metadata
/// (`vehicle_id`, `vehicle_number`, `team_name`, `event_id`, `type`,
/// `ts_ms`) is always present regardless of tier; everything else is
/// opt-in per field.
#[allow(clippy::too_many_arguments)]
pub fn project_snapshot(
    vehicle_id: &str,
    event_id: &str,
    vehicle_meta: &VehicleMeta,
    record_type: &str,
    position: Option<&PositionSample>,
    telemetry: Option<&TelemetrySample>,
    viewer_access: ViewerAccess,
    policy: &TelemetryPolicy,
) -> Value {
    let allowed = policy.allowed_for(viewer_access);
    let ts_ms = position
        .map(|p| p.ts_ms)
        .or_else(|| telemetry.map(|t| t.ts_ms))
        .unwrap_or(0);

    let mut map = Map::new();
    map.insert("vehicle_id".to_string(), Value::String(vehicle_id.to_string()));
    map.insert("vehicle_number".to_string(), Value::from(vehicle_meta.vehicle_number));
    map.insert("team_name".to_string(), Value::String(vehicle_meta.team_name.clone()));
    map.insert("event_id".to_string(), Value::String(event_id.to_string()));
    map.insert("type".to_string(), Value::String(record_type.to_string()));
    map.insert("ts_ms".to_string(), Value::from(ts_ms));

    if let Some(position) = position {
        insert_if_allowed(&mut map, allowed, "lat", Some(Value::from(position.lat)));
        insert_if_allowed(&mut map, allowed, "lon", Some(Value::from(position.lon)));
        insert_if_allowed(
            &mut map,
            allowed,
            "speed_mps",
            Some(Value::from(position.speed_mps)),
        );
        insert_if_allowed(
            &mut map,
            allowed,
            "heading_deg",
            Some(Value::from(position.heading_deg)),
        );
        insert_if_allowed(
            &mut map,
            allowed,
            "altitude_m",
            Some(Value::from(position.altitude_m)),
        );
        insert_if_allowed(&mut map, allowed, "hdop", Some(Value::from(position.hdop)));
        insert_if_allowed(
            &mut map,
            allowed,
            "satellites",
            Some(Value::from(position.satellites)),
        );
    }

    if let Some(telemetry) = telemetry {
        insert_if_allowed(&mut map, allowed, "rpm", telemetry.rpm.map(Value::from));
        insert_if_allowed(&mut map, allowed, "gear", telemetry.gear.map(Value::from));
        insert_if_allowed(
            &mut map,
            allowed,
            "throttle_pct",
            telemetry.throttle_pct.map(Value::from),
        );
        insert_if_allowed(
            &mut map,
            allowed,
            "coolant_temp_c",
            telemetry.coolant_temp_c.map(Value::from),
        );
        insert_if_allowed(
            &mut map,
            allowed,
            "oil_pressure_psi",
            telemetry.oil_pressure_psi.map(Value::from),
        );
        insert_if_allowed(
            &mut map,
            allowed,
            "fuel_pressure_psi",
            telemetry.fuel_pressure_psi.map(Value::from),
        );
        insert_if_allowed(
            &mut map,
            allowed,
            "speed_mph",
            telemetry.speed_mph.map(Value::from),
        );
        insert_if_allowed(
            &mut map,
            allowed,
            "heart_rate",
            telemetry.heart_rate.map(Value::from),
        );
        insert_if_allowed(
            &mut map,
            allowed,
            "heart_rate_zone",
            telemetry.heart_rate_zone.map(Value::from),
        );
    }

    Value::Object(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn position() -> PositionSample {
        PositionSample {
            ts_ms: 1000,
            lat: 40.0,
            lon: -86.0,
            speed_mps: 30.0,
            heading_deg: 90.0,
            altitude_m: 200.0,
            hdop: 1.0,
            satellites: 9,
        }
    }

    fn telemetry() -> TelemetrySample {
        TelemetrySample {
            ts_ms: 1000,
            heart_rate: Some(150),
            rpm: Some(6000.0),
            ..TelemetrySample::default()
        }
    }

    fn meta() -> VehicleMeta {
        VehicleMeta {
            vehicle_number: 42,
            team_name: "Acme Racing".to_string(),
        }
    }

    #[test]
    fn public_viewer_sees_only_fan_allowed_fields() {
        let policy = TelemetryPolicy::new(
            ["lat", "lon", "rpm", "heart_rate"]
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
            ["lat", "lon"].iter().map(|s| (*s).to_string()).collect(),
        );
        let snapshot = project_snapshot(
            "veh-1",
            "evt-1",
            &meta(),
            "position",
            Some(&position()),
            Some(&telemetry()),
            ViewerAccess::Public,
            &policy,
        );
        let obj = snapshot.as_object().unwrap();
        assert!(obj.contains_key("lat"));
        assert!(!obj.contains_key("rpm"));
        assert!(!obj.contains_key("heart_rate"));
    }

    #[test]
    fn team_viewer_sees_production_fields() {
        let policy = TelemetryPolicy::new(
            ["lat", "lon", "rpm", "heart_rate"]
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
            HashSet::new(),
        );
        let snapshot = project_snapshot(
            "veh-1",
            "evt-1",
            &meta(),
            "position",
            Some(&position()),
            Some(&telemetry()),
            ViewerAccess::Team,
            &policy,
        );
        let obj = snapshot.as_object().unwrap();
        assert!(obj.contains_key("rpm"));
        assert!(obj.contains_key("heart_rate"));
    }

    #[test]
    fn metadata_always_present_even_with_empty_policy() {
        let policy = TelemetryPolicy::new(HashSet::new(), HashSet::new());
        let snapshot = project_snapshot(
            "veh-1",
            "evt-1",
            &meta(),
            "position",
            Some(&position()),
            None,
            ViewerAccess::Public,
            &policy,
        );
        let obj = snapshot.as_object().unwrap();
        assert_eq!(obj.get("vehicle_id").unwrap(), "veh-1");
        assert_eq!(obj.get("vehicle_number").unwrap(), 42);
        assert_eq!(obj.get("team_name").unwrap(), "Acme Racing");
        assert_eq!(obj.get("event_id").unwrap(), "evt-1");
        assert_eq!(obj.get("type").unwrap(), "position");
        assert!(!obj.contains_key("lat"));
    }
}
