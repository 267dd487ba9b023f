//! Batches queued records and uploads them to the cloud ingest
//! endpoint, with exponential backoff on transient failures.

pub mod client;

pub use client::{IngestClient, UploadError};

use crate::queue::DurableQueue;
use std::sync::Arc;
use std::time::Duration;

const BATCH_SIZE: usize = 50;
const BATCH_TIMEOUT: Duration = Duration::from_secs(1);
const MIN_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Runs the upload loop until the process exits. Ticks at
/// `BATCH_TIMEOUT`, draining up to `BATCH_SIZE` records from `queue`
/// each pass.
///
/// - 2xx: acked records are removed and backoff resets to `MIN_BACKOFF`.
/// - 401: treated as fatal for this run — halts the loop so a bad
///   token doesn't spin forever; the caller decides whether to restart.
/// - 429: backoff doubles (capped at `MAX_BACKOFF`), records retained.
/// - network/timeout/5xx: same backoff treatment, records retained.
pub async fn run_uploader(queue: Arc<DurableQueue>, client: IngestClient) {
    let mut backoff = MIN_BACKOFF;
    loop {
        tokio::time::sleep(BATCH_TIMEOUT).await;

        let batch = match queue.dequeue_batch(BATCH_SIZE) {
            Ok(batch) => batch,
            Err(err) => {
                tracing::error!(error = %err, "failed to read from durable queue");
                continue;
            }
        };
        if batch.is_empty() {
            continue;
        }

        let records: Vec<_> = batch.iter().map(|e| e.record.clone()).collect();
        match client.upload_batch(&records).await {
            Ok(()) => {
                let ids: Vec<u64> = batch.iter().map(|e| e.id).collect();
                if let Err(err) = queue.remove(&ids) {
                    tracing::error!(error = %err, "failed to ack uploaded records");
                }
                backoff = MIN_BACKOFF;
            }
            Err(UploadError::Unauthorized) => {
                tracing::error!("truck token rejected by cloud; halting uploader");
                break;
            }
            Err(UploadError::RateLimited) => {
                tracing::warn!(backoff_secs = backoff.as_secs(), "rate limited by cloud");
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(MAX_BACKOFF);
            }
            Err(err) => {
                tracing::warn!(error = %err, backoff_secs = backoff.as_secs(), "upload failed, retrying");
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(MAX_BACKOFF);
            }
        }
    }
}
