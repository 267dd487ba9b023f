//! Health check endpoint.

use crate::cloud::CloudState;
use axum::extract::State;
use axum::Json;
use serde::Serialize;
use std::sync::Arc;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub db_connected: bool,
}

pub async fn get_health(State(state): State<Arc<CloudState>>) -> Json<HealthResponse> {
    let db_ok = sqlx::query("SELECT 1").fetch_one(&state.db).await.is_ok();

    Json(HealthResponse {
        status: if db_ok { "healthy".to_string() } else { "degraded".to_string() },
        db_connected: db_ok,
    })
}
