//! Edge and cloud configuration — environment variables with CLI
//! overrides, following the same load order for both binaries: CLI
//! flag, then environment variable, then a documented default.

use clap::Parser;
use std::collections::HashSet;
use tracing::warn;

/// `raceline-edge` CLI flags.
#[derive(Parser, Debug, Clone)]
#[command(name = "raceline-edge")]
#[command(about = "Edge telemetry collector and store-and-forward uploader")]
#[command(version)]
pub struct EdgeCliArgs {
    /// Vehicle identifier this edge unit belongs to. Overrides
    /// `RACELINE_VEHICLE_ID`.
    #[arg(long, env = "RACELINE_VEHICLE_ID")]
    pub vehicle_id: Option<String>,

    /// Cloud ingest base URL. Overrides `RACELINE_CLOUD_URL`.
    #[arg(long, env = "RACELINE_CLOUD_URL")]
    pub cloud_url: Option<String>,

    /// Truck/team token used to authenticate uploads. Overrides
    /// `RACELINE_TRUCK_TOKEN`.
    #[arg(long, env = "RACELINE_TRUCK_TOKEN")]
    pub truck_token: Option<String>,

    /// Path to the sled durable queue database directory.
    #[arg(long, env = "RACELINE_QUEUE_PATH")]
    pub queue_path: Option<String>,

    /// Run against simulated GPS/CAN/heart-rate sources instead of
    /// real hardware.
    #[arg(long)]
    pub simulate: bool,
}

/// Edge unit configuration, resolved from CLI args and environment.
#[derive(Debug, Clone)]
pub struct EdgeConfig {
    pub vehicle_id: String,
    pub cloud_url: String,
    pub truck_token: String,
    pub queue_path: String,
    pub queue_max_records: usize,
    pub queue_max_bytes: u64,
    pub simulate: bool,
}

impl Default for EdgeConfig {
    fn default() -> Self {
        Self {
            vehicle_id: String::new(),
            cloud_url: "http://localhost:8080".to_string(),
            truck_token: String::new(),
            queue_path: "./data/queue".to_string(),
            queue_max_records: 100_000,
            queue_max_bytes: 50 * 1024 * 1024,
            simulate: false,
        }
    }
}

impl EdgeConfig {
    /// Resolves config from CLI args, falling back to environment
    /// variables and finally to the documented defaults.
    ///
    /// `vehicle_id`, `cloud_url`, and `truck_token` are mandatory —
    /// the edge unit cannot do anything useful without them.
    pub fn from_args(args: EdgeCliArgs) -> anyhow::Result<Self> {
        let mut config = Self::default();

        config.vehicle_id = args
            .vehicle_id
            .or_else(|| std::env::var("RACELINE_VEHICLE_ID").ok())
            .ok_or_else(|| anyhow::anyhow!("RACELINE_VEHICLE_ID is not set"))?;

        config.cloud_url = args
            .cloud_url
            .or_else(|| std::env::var("RACELINE_CLOUD_URL").ok())
            .unwrap_or(config.cloud_url);

        config.truck_token = args
            .truck_token
            .or_else(|| std::env::var("RACELINE_TRUCK_TOKEN").ok())
            .ok_or_else(|| anyhow::anyhow!("RACELINE_TRUCK_TOKEN is not set"))?;

        if let Some(path) = args.queue_path.or_else(|| std::env::var("RACELINE_QUEUE_PATH").ok()) {
            config.queue_path = path;
        }

        if let Ok(v) = std::env::var("RACELINE_QUEUE_MAX_RECORDS") {
            if let Ok(n) = v.parse() {
                config.queue_max_records = n;
            }
        }
        if let Ok(v) = std::env::var("RACELINE_QUEUE_MAX_BYTES") {
            if let Ok(n) = v.parse() {
                config.queue_max_bytes = n;
            }
        }

        config.simulate = args.simulate || std::env::var("RACELINE_SIMULATE").is_ok();

        Ok(config)
    }
}

/// `raceline-cloud` CLI flags.
#[derive(Parser, Debug, Clone)]
#[command(name = "raceline-cloud")]
#[command(about = "Cloud ingest, checkpoint detection, and SSE fan-out")]
#[command(version)]
pub struct CloudCliArgs {
    /// PostgreSQL connection URL. Overrides `DATABASE_URL`.
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: Option<String>,

    /// HTTP bind address, e.g. "0.0.0.0:8080".
    #[arg(short, long)]
    pub bind_address: Option<String>,

    /// Shorthand for `--bind-address 0.0.0.0:<port>`.
    #[arg(short, long)]
    pub port: Option<u16>,
}

/// Cloud service configuration.
#[derive(Debug, Clone)]
pub struct CloudConfig {
    pub database_url: String,
    pub bind_address: String,
    pub max_db_connections: u32,
    pub admin_tokens: HashSet<String>,
    pub admin_token_sha256: Option<String>,
    pub admin_jwt_secret: String,
    pub replay_capacity: usize,
    pub policy_cache_ttl_secs: u64,
    pub token_cache_ttl_secs: u64,
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            database_url: String::new(),
            bind_address: "0.0.0.0:8080".to_string(),
            max_db_connections: 20,
            admin_tokens: HashSet::new(),
            admin_token_sha256: None,
            admin_jwt_secret: String::new(),
            replay_capacity: crate::pubsub::DEFAULT_REPLAY_CAPACITY,
            policy_cache_ttl_secs: 60,
            token_cache_ttl_secs: 24 * 3600,
        }
    }
}

impl CloudConfig {
    /// Resolves config from CLI args and environment variables.
    ///
    /// In release builds, a missing `RACELINE_ADMIN_JWT_SECRET` is a
    /// hard startup error — running with an empty JWT secret would let
    /// anyone mint a valid admin session. In debug builds it falls
    /// back to a dev secret with a warning, matching the precedent for
    /// other development-only default credentials.
    pub fn from_args(args: CloudCliArgs) -> anyhow::Result<Self> {
        let mut config = Self::default();

        config.database_url = args
            .database_url
            .or_else(|| std::env::var("DATABASE_URL").ok())
            .ok_or_else(|| anyhow::anyhow!("DATABASE_URL is not set"))?;

        if let Some(addr) = args.bind_address {
            config.bind_address = addr;
        } else if let Some(port) = args.port {
            config.bind_address = format!("0.0.0.0:{port}");
        }

        if let Ok(v) = std::env::var("RACELINE_MAX_DB_CONNECTIONS") {
            if let Ok(n) = v.parse() {
                config.max_db_connections = n;
            }
        }

        if let Ok(v) = std::env::var("RACELINE_ADMIN_TOKENS") {
            config.admin_tokens = v.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect();
        }
        config.admin_token_sha256 = std::env::var("RACELINE_ADMIN_TOKEN_SHA256").ok();

        config.admin_jwt_secret = match std::env::var("RACELINE_ADMIN_JWT_SECRET") {
            Ok(secret) => secret,
            Err(_) => {
                if cfg!(debug_assertions) {
                    warn!("RACELINE_ADMIN_JWT_SECRET not set, using dev default — do NOT use in production");
                    "dev-admin-jwt-secret".to_string()
                } else {
                    anyhow::bail!(
                        "RACELINE_ADMIN_JWT_SECRET is not set. The cloud service cannot \
                         start in release mode without an admin JWT secret."
                    );
                }
            }
        };

        if let Ok(v) = std::env::var("RACELINE_REPLAY_CAPACITY") {
            if let Ok(n) = v.parse() {
                config.replay_capacity = n;
            }
        }
        if let Ok(v) = std::env::var("RACELINE_POLICY_CACHE_TTL_SECS") {
            if let Ok(n) = v.parse() {
                config.policy_cache_ttl_secs = n;
            }
        }
        if let Ok(v) = std::env::var("RACELINE_TOKEN_CACHE_TTL_SECS") {
            if let Ok(n) = v.parse() {
                config.token_cache_ttl_secs = n;
            }
        }

        Ok(config)
    }
}
