//! Edge uplink — runs on the in-vehicle unit: collects GPS/CAN/heart-rate
//! readings, durably queues them on disk, and uploads them to the cloud.
//!
//! ## Environment variables
//!
//! | Variable                 | Required | Description                          |
//! |---------------------------|----------|--------------------------------------|
//! | `RACELINE_VEHICLE_ID`     | Yes      | This vehicle's id                    |
//! | `RACELINE_TRUCK_TOKEN`    | Yes      | Ingest credential for this vehicle   |
//! | `RACELINE_CLOUD_URL`      | No       | Cloud ingest base URL                |
//! | `RACELINE_QUEUE_PATH`     | No       | Durable queue directory              |
//! | `RACELINE_SIMULATE`       | No       | Run simulated sources instead of real sensors |

use clap::Parser;
use raceline::collector::sources::{SimulatedCanSource, SimulatedGpsSource, SimulatedHeartRateSource};
use raceline::collector::SourceCollector;
use raceline::config::{EdgeCliArgs, EdgeConfig};
use raceline::queue::{DurableQueue, QueueLimits};
use raceline::uploader::{run_uploader, IngestClient};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,raceline=debug")),
        )
        .init();

    let args = EdgeCliArgs::parse();
    let config = EdgeConfig::from_args(args)?;

    info!(vehicle_id = %config.vehicle_id, cloud_url = %config.cloud_url, simulate = config.simulate, "starting edge uplink");

    let queue = Arc::new(DurableQueue::open(
        &config.queue_path,
        QueueLimits {
            max_records: config.queue_max_records,
            max_bytes: config.queue_max_bytes,
        },
    )?);
    info!(pending = queue.pending_count(), "durable queue opened");

    let collector = SourceCollector::new(config.vehicle_id.clone());
    let (tx, mut rx) = mpsc::channel(256);

    if config.simulate {
        warn!("running with simulated sensor sources");
        collector.spawn_source(Box::new(SimulatedGpsSource::new(40.0, -86.0)), Duration::from_millis(200), true, tx.clone());
        collector.spawn_source(Box::new(SimulatedCanSource::new()), Duration::from_millis(100), true, tx.clone());
        collector.spawn_source(Box::new(SimulatedHeartRateSource::new()), Duration::from_secs(1), true, tx.clone());
    } else {
        anyhow::bail!("no real sensor drivers are wired up yet; pass --simulate to run with simulated sources");
    }
    drop(tx);

    let enqueue_queue = Arc::clone(&queue);
    tokio::spawn(async move {
        while let Some(record) = rx.recv().await {
            if let Err(err) = enqueue_queue.enqueue(record) {
                warn!(error = %err, "failed to enqueue record");
            }
        }
    });

    let client = IngestClient::new(&config.cloud_url, &config.truck_token);

    let heartbeat_client = client.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(HEARTBEAT_INTERVAL);
        loop {
            ticker.tick().await;
            if let Err(err) = heartbeat_client.heartbeat().await {
                warn!(error = %err, "heartbeat failed");
            }
        }
    });

    run_uploader(queue, client).await;

    info!("edge uplink shut down");
    Ok(())
}
