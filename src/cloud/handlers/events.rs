//! Organizer-role-gated CRUD for events, checkpoints, and vehicle
//! registration. Every handler here requires at least [`Role::Organizer`].

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::auth::{require_role, resolve_auth_info, Role};
use crate::cloud::CloudState;
use crate::error::RacelineError;
use crate::types::{Course, Event, EventStatus, Vehicle};

async fn require_organizer(
    state: &CloudState,
    headers: &HeaderMap,
    event_id: Option<&str>,
) -> Result<(), RacelineError> {
    let auth = resolve_auth_info(headers, event_id, &state.db, &state.admin_creds).await?;
    require_role(&auth, Role::Organizer)
}

#[derive(Debug, Deserialize)]
pub struct CreateEventRequest {
    pub name: String,
    pub total_laps: u32,
    #[serde(default)]
    pub course: Course,
}

/// `POST /api/v1/events`
pub async fn create_event(
    State(state): State<Arc<CloudState>>,
    headers: HeaderMap,
    Json(request): Json<CreateEventRequest>,
) -> Result<Json<Event>, RacelineError> {
    require_organizer(&state, &headers, None).await?;

    let event_id = format!("evt_{}", Uuid::new_v4());
    let course_json = serde_json::to_value(&request.course)?;

    sqlx::query(
        "INSERT INTO events (event_id, name, status, total_laps, course_json) \
         VALUES ($1, $2, 'draft', $3, $4)",
    )
    .bind(&event_id)
    .bind(&request.name)
    .bind(request.total_laps as i32)
    .bind(&course_json)
    .execute(&state.db)
    .await?;

    Ok(Json(Event {
        event_id,
        name: request.name,
        status: EventStatus::Draft,
        total_laps: request.total_laps,
        course: request.course,
    }))
}

#[derive(Debug, Deserialize)]
pub struct UpdateEventStatusRequest {
    pub status: EventStatus,
}

/// `PATCH /api/v1/events/{id}/status` — enforces monotonic advance.
pub async fn update_event_status(
    State(state): State<Arc<CloudState>>,
    headers: HeaderMap,
    Path(event_id): Path<String>,
    Json(request): Json<UpdateEventStatusRequest>,
) -> Result<Json<Event>, RacelineError> {
    require_organizer(&state, &headers, Some(&event_id)).await?;

    let current = load_event(&state, &event_id).await?;
    if !current.status.can_advance_to(request.status) {
        return Err(RacelineError::InvalidInput(format!(
            "cannot move event from {:?} back to {:?}",
            current.status, request.status
        )));
    }

    sqlx::query("UPDATE events SET status = $2 WHERE event_id = $1")
        .bind(&event_id)
        .bind(request.status)
        .execute(&state.db)
        .await?;

    Ok(Json(Event {
        status: request.status,
        ..current
    }))
}

async fn load_event(state: &CloudState, event_id: &str) -> Result<Event, RacelineError> {
    let row: Option<(String, String, EventStatus, i32, serde_json::Value)> = sqlx::query_as(
        "SELECT event_id, name, status, total_laps, course_json FROM events WHERE event_id = $1",
    )
    .bind(event_id)
    .fetch_optional(&state.db)
    .await?;
    let Some((event_id, name, status, total_laps, course_json)) = row else {
        return Err(RacelineError::NotFound(format!("event {event_id}")));
    };
    let course: Course = serde_json::from_value(course_json).unwrap_or_default();
    Ok(Event {
        event_id,
        name,
        status,
        total_laps: total_laps as u32,
        course,
    })
}

/// `GET /api/v1/events/{id}` — organizer detail view (includes full course geometry).
pub async fn get_event(
    State(state): State<Arc<CloudState>>,
    headers: HeaderMap,
    Path(event_id): Path<String>,
) -> Result<Json<Event>, RacelineError> {
    require_organizer(&state, &headers, Some(&event_id)).await?;
    Ok(Json(load_event(&state, &event_id).await?))
}

#[derive(Debug, Deserialize)]
pub struct RegisterVehicleRequest {
    pub vehicle_number: u32,
    pub team_name: String,
    pub driver_name: String,
}

#[derive(Debug, Serialize)]
pub struct RegisterVehicleResponse {
    pub vehicle_id: String,
    pub truck_token: String,
}

/// `POST /api/v1/events/{id}/vehicles` — creates the vehicle (if new)
/// and registers it for the event, minting a fresh truck token.
pub async fn register_vehicle(
    State(state): State<Arc<CloudState>>,
    headers: HeaderMap,
    Path(event_id): Path<String>,
    Json(request): Json<RegisterVehicleRequest>,
) -> Result<Json<RegisterVehicleResponse>, RacelineError> {
    require_organizer(&state, &headers, Some(&event_id)).await?;

    let vehicle_id = format!("veh_{}", Uuid::new_v4());
    let truck_token = format!("trk_{}", Uuid::new_v4().simple());

    sqlx::query(
        "INSERT INTO vehicles (vehicle_id, vehicle_number, team_name, driver_name, truck_token) \
         VALUES ($1, $2, $3, $4, $5)",
    )
    .bind(&vehicle_id)
    .bind(request.vehicle_number as i32)
    .bind(&request.team_name)
    .bind(&request.driver_name)
    .bind(&truck_token)
    .execute(&state.db)
    .await?;

    sqlx::query(
        "INSERT INTO event_vehicles (event_id, vehicle_id, visible) VALUES ($1, $2, true)",
    )
    .bind(&event_id)
    .bind(&vehicle_id)
    .execute(&state.db)
    .await?;

    Ok(Json(RegisterVehicleResponse {
        vehicle_id,
        truck_token,
    }))
}

#[derive(Debug, Deserialize)]
pub struct CreateCheckpointRequest {
    pub checkpoint_number: u32,
    pub lat: f64,
    pub lon: f64,
    pub radius_m: f64,
    pub checkpoint_type: crate::types::CheckpointType,
    pub name: Option<String>,
}

/// `POST /api/v1/events/{id}/checkpoints`
pub async fn create_checkpoint(
    State(state): State<Arc<CloudState>>,
    headers: HeaderMap,
    Path(event_id): Path<String>,
    Json(request): Json<CreateCheckpointRequest>,
) -> Result<Json<crate::types::Checkpoint>, RacelineError> {
    require_organizer(&state, &headers, Some(&event_id)).await?;

    let checkpoint_id = format!("cp_{}", Uuid::new_v4());
    sqlx::query(
        "INSERT INTO checkpoints \
         (checkpoint_id, event_id, checkpoint_number, lat, lon, radius_m, checkpoint_type, name) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
    )
    .bind(&checkpoint_id)
    .bind(&event_id)
    .bind(request.checkpoint_number as i32)
    .bind(request.lat)
    .bind(request.lon)
    .bind(request.radius_m)
    .bind(request.checkpoint_type)
    .bind(&request.name)
    .execute(&state.db)
    .await?;

    Ok(Json(crate::types::Checkpoint {
        checkpoint_id,
        event_id,
        checkpoint_number: request.checkpoint_number,
        lat: request.lat,
        lon: request.lon,
        radius_m: request.radius_m,
        checkpoint_type: request.checkpoint_type,
        name: request.name,
    }))
}

/// `GET /api/v1/events/{id}/vehicles` — organizer roster view, including
/// vehicles an organizer has hidden from public projections.
pub async fn list_vehicles(
    State(state): State<Arc<CloudState>>,
    headers: HeaderMap,
    Path(event_id): Path<String>,
) -> Result<Json<Vec<Vehicle>>, RacelineError> {
    require_organizer(&state, &headers, Some(&event_id)).await?;

    let rows: Vec<(String, i32, String, String, String)> = sqlx::query_as(
        "SELECT v.vehicle_id, v.vehicle_number, v.team_name, v.driver_name, v.truck_token \
         FROM vehicles v \
         JOIN event_vehicles ev ON ev.vehicle_id = v.vehicle_id \
         WHERE ev.event_id = $1 ORDER BY v.vehicle_number ASC",
    )
    .bind(&event_id)
    .fetch_all(&state.db)
    .await?;

    let vehicles = rows
        .into_iter()
        .map(|(vehicle_id, vehicle_number, team_name, driver_name, truck_token)| Vehicle {
            vehicle_id,
            vehicle_number: vehicle_number as u32,
            team_name,
            driver_name,
            truck_token,
        })
        .collect();

    Ok(Json(vehicles))
}
