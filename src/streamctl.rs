//! Per-vehicle stream control state machine.
//!
//! Governs transitions for live video/RTMP streaming per vehicle.
//! Starting the actual encoder process (FFmpeg or otherwise) is a
//! collaborator concern outside this module — `start` only issues a
//! command with a fresh id and transitions state; the edge side is
//! expected to ack it.

use std::collections::HashMap;
use std::sync::Mutex;

use thiserror::Error;
use uuid::Uuid;

/// Threshold for "recent enough" heartbeats when clearing an error.
pub const HEARTBEAT_FRESH_THRESHOLD_MS: i64 = 30_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamState {
    Disconnected,
    Idle,
    Starting,
    Streaming,
    Stopping,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamErrorReason {
    EdgeTimeout,
    EdgeAckFailure { detail: String },
}

/// Which console issued the active command — lets an operator UI show
/// who is driving the stream when production and pit-crew consoles
/// share control of the same vehicle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamSource {
    Production,
    PitCrew,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StreamControlError {
    #[error("command not valid in state {state:?}")]
    InvalidTransition { state: StreamState },
}

/// A state transition, returned by every command so the caller can
/// publish a `stream_state_changed` event without this module needing
/// to know about the pub/sub bus.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct StreamTransition {
    pub vehicle_id: String,
    pub state: StreamState,
    pub command_id: Option<String>,
    pub reason: Option<StreamErrorReason>,
    pub issued_by: Option<StreamSource>,
}

/// Per-vehicle stream control state.
#[derive(Debug, Clone)]
pub struct VehicleStreamControl {
    vehicle_id: String,
    state: StreamState,
    source_id: Option<String>,
    command_id: Option<String>,
    error_reason: Option<StreamErrorReason>,
    last_heartbeat_ms: Option<i64>,
    issued_by: Option<StreamSource>,
}

impl VehicleStreamControl {
    #[must_use]
    pub fn new(vehicle_id: impl Into<String>) -> Self {
        Self {
            vehicle_id: vehicle_id.into(),
            state: StreamState::Disconnected,
            source_id: None,
            command_id: None,
            error_reason: None,
            last_heartbeat_ms: None,
            issued_by: None,
        }
    }

    #[must_use]
    pub fn state(&self) -> StreamState {
        self.state
    }

    #[must_use]
    pub fn command_id(&self) -> Option<&str> {
        self.command_id.as_deref()
    }

    pub fn note_heartbeat(&mut self, now_ms: i64) {
        self.last_heartbeat_ms = Some(now_ms);
        if self.state == StreamState::Disconnected {
            self.state = StreamState::Idle;
        }
    }

    fn transition(&self, state: StreamState) -> StreamTransition {
        StreamTransition {
            vehicle_id: self.vehicle_id.clone(),
            state,
            command_id: self.command_id.clone(),
            reason: self.error_reason.clone(),
            issued_by: self.issued_by,
        }
    }

    /// Issues a start command. Only valid from `Idle`. `source_id`
    /// names the video source (e.g. a camera id); `issued_by`
    /// identifies which console is driving the stream.
    pub fn start(
        &mut self,
        source_id: impl Into<String>,
        issued_by: StreamSource,
    ) -> Result<StreamTransition, StreamControlError> {
        if self.state != StreamState::Idle {
            return Err(StreamControlError::InvalidTransition { state: self.state });
        }
        self.source_id = Some(source_id.into());
        self.command_id = Some(format!("cmd_{}", Uuid::new_v4()));
        self.error_reason = None;
        self.issued_by = Some(issued_by);
        self.state = StreamState::Starting;
        Ok(self.transition(self.state))
    }

    /// Issues a stop command. Valid from any active state, regardless
    /// of which controller originally started the stream — production
    /// can stop what pit-crew started and vice versa.
    pub fn stop(&mut self, issued_by: StreamSource) -> Result<StreamTransition, StreamControlError> {
        match self.state {
            StreamState::Starting | StreamState::Streaming => {
                self.command_id = Some(format!("cmd_{}", Uuid::new_v4()));
                self.issued_by = Some(issued_by);
                self.state = StreamState::Stopping;
                Ok(self.transition(self.state))
            }
            _ => Err(StreamControlError::InvalidTransition { state: self.state }),
        }
    }

    /// Edge-side acknowledgement of the outstanding command.
    pub fn edge_ack(&mut self, success: bool, failure_detail: Option<String>) -> Result<StreamTransition, StreamControlError> {
        let next = match (self.state, success) {
            (StreamState::Starting, true) => StreamState::Streaming,
            (StreamState::Stopping, true) => StreamState::Idle,
            (StreamState::Starting | StreamState::Stopping, false) => StreamState::Error,
            _ => return Err(StreamControlError::InvalidTransition { state: self.state }),
        };
        if next == StreamState::Error {
            self.error_reason = Some(StreamErrorReason::EdgeAckFailure {
                detail: failure_detail.unwrap_or_else(|| "edge rejected command".to_string()),
            });
        } else {
            self.error_reason = None;
            self.source_id = None;
        }
        self.state = next;
        Ok(self.transition(self.state))
    }

    /// A command poller gave up waiting for an ack.
    pub fn timeout(&mut self) -> Result<StreamTransition, StreamControlError> {
        match self.state {
            StreamState::Starting | StreamState::Stopping => {
                self.error_reason = Some(StreamErrorReason::EdgeTimeout);
                self.state = StreamState::Error;
                Ok(self.transition(self.state))
            }
            _ => Err(StreamControlError::InvalidTransition { state: self.state }),
        }
    }

    /// Clears an `Error` state, falling back to `Idle` if a heartbeat
    /// was seen within [`HEARTBEAT_FRESH_THRESHOLD_MS`], else
    /// `Disconnected`.
    pub fn retry(&mut self, now_ms: i64) -> Result<StreamTransition, StreamControlError> {
        if self.state != StreamState::Error {
            return Err(StreamControlError::InvalidTransition { state: self.state });
        }
        self.error_reason = None;
        self.command_id = None;
        let fresh = self
            .last_heartbeat_ms
            .is_some_and(|last| now_ms - last <= HEARTBEAT_FRESH_THRESHOLD_MS);
        self.state = if fresh {
            StreamState::Idle
        } else {
            StreamState::Disconnected
        };
        Ok(self.transition(self.state))
    }
}

/// Registry of stream control state machines, one per vehicle,
/// guarded by a single lock since transitions are infrequent and
/// cheap relative to lock overhead from a sharded map.
#[derive(Default)]
pub struct StreamControlRegistry {
    vehicles: Mutex<HashMap<String, VehicleStreamControl>>,
}

impl StreamControlRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_vehicle<T>(
        &self,
        vehicle_id: &str,
        f: impl FnOnce(&mut VehicleStreamControl) -> T,
    ) -> T {
        let mut guard = self.vehicles.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let entry = guard
            .entry(vehicle_id.to_string())
            .or_insert_with(|| VehicleStreamControl::new(vehicle_id));
        f(entry)
    }

    #[must_use]
    pub fn state_of(&self, vehicle_id: &str) -> StreamState {
        self.with_vehicle(vehicle_id, |v| v.state())
    }
}
