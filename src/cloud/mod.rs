//! Cloud ingest and fan-out service.
//!
//! ## Modules
//!
//! - `routes` — axum router wiring
//! - `handlers` — HTTP route handlers

pub mod handlers;
pub mod routes;

use crate::auth::{AdminCredentials, TokenCache};
use crate::config::CloudConfig;
use crate::kalman::FilterCache;
use crate::permissions::{PolicyCache, VehicleMetaCache};
use crate::pubsub::PubSubRegistry;
use crate::streamctl::StreamControlRegistry;
use std::sync::Arc;
use std::time::Duration;

/// Shared cloud application state.
pub struct CloudState {
    pub db: sqlx::PgPool,
    pub config: CloudConfig,
    pub admin_creds: AdminCredentials,
    pub token_cache: TokenCache,
    pub policy_cache: PolicyCache,
    pub vehicle_meta_cache: VehicleMetaCache,
    pub kalman_cache: FilterCache,
    pub pubsub: PubSubRegistry,
    pub stream_control: StreamControlRegistry,
}

impl CloudState {
    #[must_use]
    pub fn new(db: sqlx::PgPool, config: CloudConfig) -> Arc<Self> {
        let admin_creds = AdminCredentials {
            tokens: config.admin_tokens.clone(),
            token_sha256: config.admin_token_sha256.clone(),
            jwt_secret: config.admin_jwt_secret.clone(),
        };
        let token_cache = TokenCache::new(Duration::from_secs(config.token_cache_ttl_secs));
        let policy_cache = PolicyCache::new(Duration::from_secs(config.policy_cache_ttl_secs));
        let vehicle_meta_cache = VehicleMetaCache::new(Duration::from_secs(config.policy_cache_ttl_secs));
        let pubsub = PubSubRegistry::new(config.replay_capacity);

        Arc::new(Self {
            db,
            admin_creds,
            token_cache,
            policy_cache,
            vehicle_meta_cache,
            kalman_cache: FilterCache::default(),
            pubsub,
            stream_control: StreamControlRegistry::new(),
            config,
        })
    }
}
