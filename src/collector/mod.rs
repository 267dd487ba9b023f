//! Fans GPS, CAN, and heart-rate sources into a single record stream,
//! tracking per-source liveness and whether each reading came from a
//! simulation so that fact can propagate all the way to the cloud.

pub mod sources;

use crate::queue::QueueRecord;
use crate::types::{PositionSample, TelemetrySample};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{mpsc, RwLock};

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("source not connected")]
    NotConnected,
    #[error("source read timed out")]
    Timeout,
    #[error("source io error: {0}")]
    Io(String),
}

/// A single reading from one source, pre-tagged so the collector never
/// needs to downcast.
#[derive(Debug, Clone)]
pub enum SourceReading {
    Position {
        ts_ms: i64,
        lat: f64,
        lon: f64,
        speed_mps: f64,
        heading_deg: f64,
        altitude_m: f64,
        hdop: f64,
        satellites: u32,
    },
    Telemetry {
        ts_ms: i64,
        rpm: Option<f64>,
        gear: Option<i32>,
        throttle_pct: Option<f64>,
        coolant_temp_c: Option<f64>,
        oil_pressure_psi: Option<f64>,
        fuel_pressure_psi: Option<f64>,
        speed_mph: Option<f64>,
        heart_rate: Option<u32>,
        heart_rate_zone: Option<u32>,
    },
}

impl SourceReading {
    fn into_queue_record(self, vehicle_id: &str, is_simulated: bool) -> QueueRecord {
        match self {
            Self::Position {
                ts_ms,
                lat,
                lon,
                speed_mps,
                heading_deg,
                altitude_m,
                hdop,
                satellites,
            } => QueueRecord::Position {
                vehicle_id: vehicle_id.to_string(),
                sample: PositionSample {
                    ts_ms,
                    lat,
                    lon,
                    speed_mps,
                    heading_deg,
                    altitude_m,
                    hdop,
                    satellites,
                },
                is_simulated,
            },
            Self::Telemetry {
                ts_ms,
                rpm,
                gear,
                throttle_pct,
                coolant_temp_c,
                oil_pressure_psi,
                fuel_pressure_psi,
                speed_mph,
                heart_rate,
                heart_rate_zone,
            } => QueueRecord::Telemetry {
                vehicle_id: vehicle_id.to_string(),
                sample: TelemetrySample {
                    ts_ms,
                    rpm,
                    gear,
                    throttle_pct,
                    coolant_temp_c,
                    oil_pressure_psi,
                    fuel_pressure_psi,
                    speed_mph,
                    heart_rate,
                    heart_rate_zone,
                },
                is_simulated,
            },
        }
    }
}

/// A pluggable source of position or telemetry readings.
#[async_trait]
pub trait SensorSource: Send + Sync {
    async fn connect(&mut self) -> Result<(), SourceError>;
    async fn disconnect(&mut self) -> Result<(), SourceError>;
    async fn read(&mut self) -> Result<SourceReading, SourceError>;
    fn is_connected(&self) -> bool;
    fn source_name(&self) -> &'static str;
}

/// Liveness bucket for a single source, derived from how long it's been
/// since its last successful read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Liveness {
    Active,
    Stale,
    NoData,
}

const STALE_THRESHOLD: Duration = Duration::from_secs(15);

/// Human-facing device status, distinct from `Liveness`: a simulated
/// source is always reported as `simulated` regardless of how recently
/// it produced data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceStatus {
    Connected,
    Missing,
    Simulated,
    Timeout,
}

struct SourceState {
    last_read_at: Option<Instant>,
    connected: bool,
    is_simulated: bool,
}

impl SourceState {
    fn liveness(&self) -> Liveness {
        match self.last_read_at {
            None => Liveness::NoData,
            Some(at) if at.elapsed() <= STALE_THRESHOLD => Liveness::Active,
            Some(_) => Liveness::Stale,
        }
    }

    fn device_status(&self) -> DeviceStatus {
        if self.is_simulated {
            return DeviceStatus::Simulated;
        }
        if !self.connected {
            return DeviceStatus::Missing;
        }
        match self.liveness() {
            Liveness::Active => DeviceStatus::Connected,
            Liveness::Stale | Liveness::NoData => DeviceStatus::Timeout,
        }
    }
}

/// Runs each configured source on its own poll loop and fans every
/// reading into one channel, tagged with the vehicle id and simulation
/// flag.
pub struct SourceCollector {
    vehicle_id: String,
    states: Arc<RwLock<HashMap<&'static str, SourceState>>>,
}

impl SourceCollector {
    pub fn new(vehicle_id: impl Into<String>) -> Self {
        Self {
            vehicle_id: vehicle_id.into(),
            states: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Spawns a poll loop for `source` at `interval`, forwarding each
    /// reading (tagged with `is_simulated`) onto `tx`. Read errors mark
    /// the source stale in the liveness map but never stop the loop —
    /// a dead sensor shouldn't take down the others.
    pub fn spawn_source(
        &self,
        mut source: Box<dyn SensorSource>,
        interval: Duration,
        is_simulated: bool,
        tx: mpsc::Sender<QueueRecord>,
    ) -> tokio::task::JoinHandle<()> {
        let vehicle_id = self.vehicle_id.clone();
        let states = Arc::clone(&self.states);
        let name = source.source_name();
        tokio::spawn(async move {
            if let Err(err) = source.connect().await {
                tracing::warn!(source = name, error = %err, "source failed to connect");
            }
            {
                let mut states = states.write().await;
                states.insert(
                    name,
                    SourceState {
                        last_read_at: None,
                        connected: source.is_connected(),
                        is_simulated,
                    },
                );
            }
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                match source.read().await {
                    Ok(reading) => {
                        let record = reading.into_queue_record(&vehicle_id, is_simulated);
                        if tx.send(record).await.is_err() {
                            break;
                        }
                        let mut states = states.write().await;
                        if let Some(state) = states.get_mut(name) {
                            state.last_read_at = Some(Instant::now());
                            state.connected = source.is_connected();
                        }
                    }
                    Err(err) => {
                        tracing::debug!(source = name, error = %err, "source read failed");
                        let mut states = states.write().await;
                        if let Some(state) = states.get_mut(name) {
                            state.connected = source.is_connected();
                        }
                    }
                }
            }
        })
    }

    pub async fn device_status(&self) -> HashMap<&'static str, DeviceStatus> {
        self.states
            .read()
            .await
            .iter()
            .map(|(name, state)| (*name, state.device_status()))
            .collect()
    }

    pub async fn liveness(&self) -> HashMap<&'static str, Liveness> {
        self.states
            .read()
            .await
            .iter()
            .map(|(name, state)| (*name, state.liveness()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_data_liveness_before_first_read() {
        let state = SourceState {
            last_read_at: None,
            connected: true,
            is_simulated: false,
        };
        assert_eq!(state.liveness(), Liveness::NoData);
        assert_eq!(state.device_status(), DeviceStatus::Timeout);
    }

    #[test]
    fn simulated_source_always_reports_simulated() {
        let state = SourceState {
            last_read_at: Some(Instant::now()),
            connected: true,
            is_simulated: true,
        };
        assert_eq!(state.device_status(), DeviceStatus::Simulated);
    }

    #[test]
    fn recent_read_is_active_and_connected() {
        let state = SourceState {
            last_read_at: Some(Instant::now()),
            connected: true,
            is_simulated: false,
        };
        assert_eq!(state.liveness(), Liveness::Active);
        assert_eq!(state.device_status(), DeviceStatus::Connected);
    }

    #[tokio::test]
    async fn collector_spawns_and_receives_readings() {
        let collector = SourceCollector::new("veh-1");
        let (tx, mut rx) = mpsc::channel(16);
        let source = Box::new(sources::SimulatedGpsSource::new(40.0, -86.0));
        let handle =
            collector.spawn_source(source, Duration::from_millis(5), true, tx);

        let record = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("did not receive a reading in time")
            .expect("channel closed");
        assert!(matches!(record, QueueRecord::Position { .. }));
        handle.abort();
    }
}
