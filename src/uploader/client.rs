//! HTTPS client for the edge → cloud ingest POST.

use crate::queue::QueueRecord;
use crate::types::{PositionSample, TelemetrySample};
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("authentication rejected by cloud")]
    Unauthorized,
    #[error("rate limited by cloud")]
    RateLimited,
    #[error("cloud server error: {0}")]
    Server(reqwest::StatusCode),
}

#[derive(Debug, Serialize)]
struct IngestBatch<'a> {
    positions: Vec<&'a PositionSample>,
    telemetry: Vec<&'a TelemetrySample>,
    is_simulated: bool,
}

#[derive(Clone)]
pub struct IngestClient {
    http: reqwest::Client,
    cloud_url: String,
    truck_token: String,
}

impl IngestClient {
    pub fn new(cloud_url: &str, truck_token: &str) -> Self {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .expect("failed to build HTTP client");
        Self {
            http,
            cloud_url: cloud_url.trim_end_matches('/').to_string(),
            truck_token: truck_token.to_string(),
        }
    }

    /// Uploads one batch of records, split into positions/telemetry
    /// arrays. `is_simulated` is carried at the batch level since a
    /// single uploader batch always comes from one vehicle's sources,
    /// which are either all-real or all-simulated for a given run.
    pub async fn upload_batch(&self, records: &[QueueRecord]) -> Result<(), UploadError> {
        let positions: Vec<&PositionSample> = records
            .iter()
            .filter_map(|r| match r {
                QueueRecord::Position { sample, .. } => Some(sample),
                QueueRecord::Telemetry { .. } => None,
            })
            .collect();
        let telemetry: Vec<&TelemetrySample> = records
            .iter()
            .filter_map(|r| match r {
                QueueRecord::Telemetry { sample, .. } => Some(sample),
                QueueRecord::Position { .. } => None,
            })
            .collect();
        let is_simulated = records.iter().any(|r| match r {
            QueueRecord::Position { is_simulated, .. }
            | QueueRecord::Telemetry { is_simulated, .. } => *is_simulated,
        });

        let batch = IngestBatch {
            positions,
            telemetry,
            is_simulated,
        };

        let resp = self
            .http
            .post(format!("{}/api/v1/telemetry/ingest", self.cloud_url))
            .header("X-Truck-Token", &self.truck_token)
            .json(&batch)
            .send()
            .await?;

        match resp.status() {
            status if status.is_success() => Ok(()),
            reqwest::StatusCode::UNAUTHORIZED => Err(UploadError::Unauthorized),
            reqwest::StatusCode::TOO_MANY_REQUESTS => Err(UploadError::RateLimited),
            status => Err(UploadError::Server(status)),
        }
    }

    pub async fn heartbeat(&self) -> Result<(), UploadError> {
        let resp = self
            .http
            .post(format!("{}/api/v1/telemetry/heartbeat", self.cloud_url))
            .header("X-Truck-Token", &self.truck_token)
            .send()
            .await?;
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(UploadError::Server(resp.status()))
        }
    }
}
