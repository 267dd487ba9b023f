//! Cloud ingest and fan-out server.
//!
//! ## Environment variables
//!
//! | Variable                        | Required     | Description                        |
//! |----------------------------------|--------------|-------------------------------------|
//! | `DATABASE_URL`                   | Yes          | PostgreSQL connection string        |
//! | `RACELINE_ADMIN_JWT_SECRET`      | In release   | Admin session JWT signing secret    |
//! | `RACELINE_ADMIN_TOKENS`          | No           | Comma-separated raw admin tokens    |
//! | `RACELINE_BIND_ADDRESS` / `--port` | No         | Listen address                      |

use clap::Parser;
use raceline::cloud::routes::build_router;
use raceline::cloud::CloudState;
use raceline::config::{CloudCliArgs, CloudConfig};
use raceline::db::{create_pool, run_migrations};
use std::net::SocketAddr;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,raceline=debug")),
        )
        .init();

    let args = CloudCliArgs::parse();
    let config = CloudConfig::from_args(args)?;

    info!(bind = %config.bind_address, "starting raceline cloud service");

    let pool = create_pool(&config.database_url, config.max_db_connections).await?;
    run_migrations(&pool).await?;

    let state = CloudState::new(pool, config.clone());

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    info!(address = %config.bind_address, "raceline cloud listening");

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("raceline cloud shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("failed to install Ctrl+C handler");
    info!("shutdown signal received");
}
