//! Core data model: events, vehicles, checkpoints, lap state, and the
//! telemetry sample/policy shapes shared by ingest and fan-out.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Event lifecycle status. Monotonically advances — no skipping backward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Draft,
    Scheduled,
    InProgress,
    Completed,
}

impl EventStatus {
    fn rank(self) -> u8 {
        match self {
            Self::Draft => 0,
            Self::Scheduled => 1,
            Self::InProgress => 2,
            Self::Completed => 3,
        }
    }

    /// True if `self -> next` is a valid monotonic advance (or a no-op).
    pub fn can_advance_to(self, next: Self) -> bool {
        next.rank() >= self.rank()
    }
}

/// A single (lat, lon) course vertex with its cumulative distance from
/// the start, in meters. `cumulative_m` is monotone nondecreasing across
/// the polyline.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CoursePoint {
    pub lat: f64,
    pub lon: f64,
    pub cumulative_m: f64,
}

/// Ordered course geometry with a precomputed cumulative-distance array.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Course {
    pub points: Vec<CoursePoint>,
}

impl Course {
    /// Total course distance in meters (cumulative distance of the last point).
    pub fn distance_m(&self) -> f64 {
        self.points.last().map(|p| p.cumulative_m).unwrap_or(0.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub event_id: String,
    pub name: String,
    pub status: EventStatus,
    pub total_laps: u32,
    pub course: Course,
}

impl Event {
    pub fn course_distance_m(&self) -> f64 {
        self.course.distance_m()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vehicle {
    pub vehicle_id: String,
    pub vehicle_number: u32,
    pub team_name: String,
    pub driver_name: String,
    /// Sole ingest credential for this vehicle. Never logged, never
    /// returned from a read endpoint.
    pub truck_token: String,
}

/// A vehicle's registration for a specific event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventVehicle {
    pub event_id: String,
    pub vehicle_id: String,
    /// Suppresses the vehicle from public projections; ingest is unaffected.
    pub visible: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum CheckpointType {
    Start,
    Finish,
    Timing,
    Pit,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub checkpoint_id: String,
    pub event_id: String,
    pub checkpoint_number: u32,
    pub lat: f64,
    pub lon: f64,
    pub radius_m: f64,
    pub checkpoint_type: CheckpointType,
    pub name: Option<String>,
}

/// Per-(event, vehicle) lap progression. Initialized `(1, 0)`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct VehicleLapState {
    pub current_lap: u32,
    pub last_checkpoint: u32,
}

impl Default for VehicleLapState {
    fn default() -> Self {
        Self {
            current_lap: 1,
            last_checkpoint: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointCrossing {
    pub crossing_id: String,
    pub event_id: String,
    pub vehicle_id: String,
    pub checkpoint_id: String,
    pub checkpoint_number: u32,
    pub lap: u32,
    pub ts_ms: i64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct PositionSample {
    pub ts_ms: i64,
    pub lat: f64,
    pub lon: f64,
    pub speed_mps: f64,
    pub heading_deg: f64,
    pub altitude_m: f64,
    pub hdop: f64,
    pub satellites: u32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq)]
pub struct TelemetrySample {
    pub ts_ms: i64,
    pub rpm: Option<f64>,
    pub gear: Option<i32>,
    pub throttle_pct: Option<f64>,
    pub coolant_temp_c: Option<f64>,
    pub oil_pressure_psi: Option<f64>,
    pub fuel_pressure_psi: Option<f64>,
    pub speed_mph: Option<f64>,
    pub heart_rate: Option<u32>,
    pub heart_rate_zone: Option<u32>,
}

/// Canonical telemetry field names, used by the permission filter and by
/// policy storage. Kept as a fixed list rather than an open string set so
/// the `allow_fans ⊆ allow_production` check is cheap.
pub const TELEMETRY_FIELDS: &[&str] = &[
    "lat",
    "lon",
    "speed_mps",
    "heading_deg",
    "altitude_m",
    "hdop",
    "satellites",
    "rpm",
    "gear",
    "throttle_pct",
    "coolant_temp_c",
    "oil_pressure_psi",
    "fuel_pressure_psi",
    "speed_mph",
    "heart_rate",
    "heart_rate_zone",
];

/// Per-(event, vehicle) telemetry sharing policy.
///
/// Invariant: `allow_fans ⊆ allow_production`, enforced on every
/// construction path via [`TelemetryPolicy::new`] rather than trusted
/// from the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryPolicy {
    allow_production: HashSet<String>,
    allow_fans: HashSet<String>,
}

impl Default for TelemetryPolicy {
    fn default() -> Self {
        Self {
            allow_production: ["lat", "lon", "speed_mps", "heading_deg"]
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
            allow_fans: HashSet::new(),
        }
    }
}

impl TelemetryPolicy {
    /// Builds a policy, intersecting `allow_fans` down to a subset of
    /// `allow_production` when the caller's input would otherwise
    /// violate that invariant.
    pub fn new(allow_production: HashSet<String>, allow_fans: HashSet<String>) -> Self {
        let allow_fans = allow_fans
            .intersection(&allow_production)
            .cloned()
            .collect();
        Self {
            allow_production,
            allow_fans,
        }
    }

    pub fn allow_production(&self) -> &HashSet<String> {
        &self.allow_production
    }

    pub fn allow_fans(&self) -> &HashSet<String> {
        &self.allow_fans
    }

    /// Fields visible to a viewer holding `viewer_access`.
    pub fn allowed_for(&self, viewer_access: ViewerAccess) -> &HashSet<String> {
        match viewer_access {
            ViewerAccess::Team => &self.allow_production,
            ViewerAccess::Public | ViewerAccess::Premium => &self.allow_fans,
        }
    }
}

/// Server-derived viewer access tier. Never constructed from client input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewerAccess {
    Public,
    Premium,
    Team,
}

impl std::fmt::Display for ViewerAccess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Public => "public",
            Self::Premium => "premium",
            Self::Team => "team",
        };
        write!(f, "{s}")
    }
}
