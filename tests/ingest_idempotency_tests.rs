//! Ingest Idempotency Integration Tests
//!
//! In-process tests that build the full cloud router via `build_router`
//! and exercise `/api/v1/telemetry/ingest` with `tower::ServiceExt::oneshot()`
//! — no binary spawn, no network port. Requires a live database (see
//! checkpoint_tests.rs); skips when DATABASE_URL isn't set.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use raceline::cloud::routes::build_router;
use raceline::cloud::CloudState;
use raceline::config::CloudConfig;
use raceline::db::{create_pool, run_migrations};
use serde_json::json;
use sqlx::PgPool;
use std::sync::Arc;
use tower::ServiceExt;

async fn test_state() -> Option<Arc<CloudState>> {
    let url = std::env::var("DATABASE_URL").ok()?;
    let pool = create_pool(&url, 5).await.ok()?;
    run_migrations(&pool).await.ok()?;
    let config = CloudConfig {
        database_url: url,
        admin_jwt_secret: "test-secret".to_string(),
        ..CloudConfig::default()
    };
    Some(CloudState::new(pool, config))
}

async fn seed_in_progress_event_with_vehicle(pool: &PgPool, event_id: &str, vehicle_id: &str, token: &str) {
    sqlx::query("INSERT INTO events (event_id, name, status, total_laps, course_json) VALUES ($1, 'Test', 'in_progress', 1, '{}'::jsonb)")
        .bind(event_id)
        .execute(pool)
        .await
        .expect("insert event");
    sqlx::query("INSERT INTO vehicles (vehicle_id, vehicle_number, team_name, driver_name, truck_token) VALUES ($1, 1, 'Team', 'Driver', $2)")
        .bind(vehicle_id)
        .bind(token)
        .execute(pool)
        .await
        .expect("insert vehicle");
    sqlx::query("INSERT INTO event_vehicles (event_id, vehicle_id, visible) VALUES ($1, $2, true)")
        .bind(event_id)
        .bind(vehicle_id)
        .execute(pool)
        .await
        .expect("register vehicle");
}

fn ingest_request(token: &str, body: &serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/v1/telemetry/ingest")
        .header("content-type", "application/json")
        .header("x-truck-token", token)
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn resubmitting_the_same_batch_does_not_double_count() {
    let Some(state) = test_state().await else {
        eprintln!("skipping: DATABASE_URL not set");
        return;
    };
    let event_id = format!("evt_{}", uuid::Uuid::new_v4());
    let vehicle_id = format!("veh_{}", uuid::Uuid::new_v4());
    let token = format!("trk_{}", uuid::Uuid::new_v4());
    seed_in_progress_event_with_vehicle(&state.db, &event_id, &vehicle_id, &token).await;

    let now_ms = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as i64;
    let body = json!({
        "positions": [{
            "ts_ms": now_ms,
            "lat": 40.0,
            "lon": -86.0,
            "speed_mps": 30.0,
            "heading_deg": 90.0,
            "altitude_m": 200.0,
            "hdop": 1.0,
            "satellites": 9
        }],
        "telemetry": [],
        "is_simulated": true
    });

    let app = build_router(Arc::clone(&state));
    let first = app.oneshot(ingest_request(&token, &body)).await.unwrap();
    assert_eq!(first.status(), StatusCode::OK);
    let first_bytes = axum::body::to_bytes(first.into_body(), usize::MAX).await.unwrap();
    let first_json: serde_json::Value = serde_json::from_slice(&first_bytes).unwrap();
    assert_eq!(first_json["accepted"], 1);

    let app = build_router(Arc::clone(&state));
    let second = app.oneshot(ingest_request(&token, &body)).await.unwrap();
    assert_eq!(second.status(), StatusCode::OK);
    let second_bytes = axum::body::to_bytes(second.into_body(), usize::MAX).await.unwrap();
    let second_json: serde_json::Value = serde_json::from_slice(&second_bytes).unwrap();
    assert_eq!(second_json["accepted"], 0, "duplicate (event_id, vehicle_id, ts_ms) must not be re-accepted");
    assert_eq!(second_json["rejected"], 0, "a duplicate is silently absorbed, not counted as rejected");
}

#[tokio::test]
async fn missing_truck_token_is_unauthenticated() {
    let Some(state) = test_state().await else {
        eprintln!("skipping: DATABASE_URL not set");
        return;
    };
    let app = build_router(state);
    let request = Request::builder()
        .method("POST")
        .uri("/api/v1/telemetry/ingest")
        .header("content-type", "application/json")
        .body(Body::from(json!({"positions": [], "telemetry": []}).to_string()))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn stale_sample_is_rejected_not_accepted() {
    let Some(state) = test_state().await else {
        eprintln!("skipping: DATABASE_URL not set");
        return;
    };
    let event_id = format!("evt_{}", uuid::Uuid::new_v4());
    let vehicle_id = format!("veh_{}", uuid::Uuid::new_v4());
    let token = format!("trk_{}", uuid::Uuid::new_v4());
    seed_in_progress_event_with_vehicle(&state.db, &event_id, &vehicle_id, &token).await;

    let body = json!({
        "positions": [{
            "ts_ms": 1_000i64,
            "lat": 40.0,
            "lon": -86.0,
            "speed_mps": 30.0,
            "heading_deg": 90.0,
            "altitude_m": 200.0,
            "hdop": 1.0,
            "satellites": 9
        }],
        "telemetry": [],
        "is_simulated": true
    });

    let app = build_router(state);
    let response = app.oneshot(ingest_request(&token, &body)).await.unwrap();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let parsed: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(parsed["accepted"], 0);
    assert_eq!(parsed["rejected"], 1);
}
