//! Cloud API route registration.

use crate::cloud::handlers::{events, health, ingest, leaderboard, positions, stream};
use crate::cloud::CloudState;
use axum::Router;
use std::sync::Arc;
use tower_governor::governor::GovernorConfigBuilder;
use tower_governor::GovernorLayer;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

/// Batched position/telemetry uploads are small JSON, never compressed
/// on the wire, but a misbehaving or malicious truck could still send
/// an oversized body — cap it well above any real batch.
const MAX_INGEST_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Builds the complete cloud API router.
///
/// Rate limiting splits into two tiers: truck ingest traffic (high,
/// sustained-rate budget — a truck uploads on a tight interval and
/// must never be the thing that drops a lap) and public API reads
/// (lower, burstable budget suited to dashboard polling).
pub fn build_router(state: Arc<CloudState>) -> Router {
    // Truck ingest: high sustained-rate budget, a truck uploads on a
    // tight interval and must never be the thing that drops a lap.
    let ingest_governor_config = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(50)
            .burst_size(100)
            .finish()
            .expect("valid governor config"),
    );
    // Public reads: lower, burstable budget suited to dashboard polling.
    let public_governor_config = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(10)
            .burst_size(30)
            .finish()
            .expect("valid governor config"),
    );

    let ingest_routes = Router::new()
        .route("/telemetry/ingest", axum::routing::post(ingest::ingest))
        .route("/telemetry/heartbeat", axum::routing::post(ingest::heartbeat))
        .route("/truck/me", axum::routing::get(ingest::truck_me))
        .layer(RequestBodyLimitLayer::new(MAX_INGEST_BODY_BYTES))
        .layer(GovernorLayer {
            config: ingest_governor_config,
        });

    let organizer_routes = Router::new()
        .route("/events", axum::routing::post(events::create_event))
        .route("/events/{id}", axum::routing::get(events::get_event))
        .route(
            "/events/{id}/status",
            axum::routing::patch(events::update_event_status),
        )
        .route(
            "/events/{id}/vehicles",
            axum::routing::post(events::register_vehicle).get(events::list_vehicles),
        )
        .route(
            "/events/{id}/checkpoints",
            axum::routing::post(events::create_checkpoint),
        );

    let public_routes = Router::new()
        .route(
            "/events/{id}/leaderboard",
            axum::routing::get(leaderboard::leaderboard),
        )
        .route("/events/{id}/splits", axum::routing::get(leaderboard::splits))
        .route(
            "/events/{id}/positions/latest",
            axum::routing::get(positions::latest_positions),
        )
        .route("/events/{id}/stream", axum::routing::get(stream::stream_events))
        .layer(GovernorLayer {
            config: public_governor_config,
        });

    let api_routes = Router::new()
        .merge(ingest_routes)
        .merge(organizer_routes)
        .merge(public_routes);

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/health", axum::routing::get(health::get_health))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
