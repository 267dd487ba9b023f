//! `GET /events/{id}/leaderboard` and `GET /events/{id}/splits`.

use axum::extract::{Path, State};
use axum::Json;
use std::sync::Arc;

use crate::cloud::CloudState;
use crate::error::RacelineError;
use crate::leaderboard::{calculate_leaderboard, calculate_splits, LeaderboardResponse, SplitsResponse};

/// `GET /api/v1/events/{id}/leaderboard` — public, no field filtering:
/// standings are derived from checkpoint crossings, which carry no
/// sharing-policy restriction.
pub async fn leaderboard(
    State(state): State<Arc<CloudState>>,
    Path(event_id): Path<String>,
) -> Result<Json<LeaderboardResponse>, RacelineError> {
    let response = calculate_leaderboard(&state.db, &event_id).await?;
    Ok(Json(response))
}

/// `GET /api/v1/events/{id}/splits`
pub async fn splits(
    State(state): State<Arc<CloudState>>,
    Path(event_id): Path<String>,
) -> Result<Json<SplitsResponse>, RacelineError> {
    let response = calculate_splits(&state.db, &event_id).await?;
    Ok(Json(response))
}
