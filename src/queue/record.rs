//! Wire/storage shape for a single queued upload record.

use crate::types::{PositionSample, TelemetrySample};
use serde::{Deserialize, Serialize};

/// One pending upload, tagged with the vehicle it came from and whether
/// the source that produced it was a simulation (propagated end-to-end
/// so the cloud side never has to guess).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum QueueRecord {
    Position {
        vehicle_id: String,
        sample: PositionSample,
        is_simulated: bool,
    },
    Telemetry {
        vehicle_id: String,
        sample: TelemetrySample,
        is_simulated: bool,
    },
}

impl QueueRecord {
    pub fn vehicle_id(&self) -> &str {
        match self {
            Self::Position { vehicle_id, .. } | Self::Telemetry { vehicle_id, .. } => vehicle_id,
        }
    }

    pub fn ts_ms(&self) -> i64 {
        match self {
            Self::Position { sample, .. } => sample.ts_ms,
            Self::Telemetry { sample, .. } => sample.ts_ms,
        }
    }
}

/// A record plus the monotonic sequence id it was stored under. The id
/// is what [`super::DurableQueue::remove`] takes, not a position in the
/// returned batch, so callers can ack out of order.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedEntry {
    pub id: u64,
    pub record: QueueRecord,
}
