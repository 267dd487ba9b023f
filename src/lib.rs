//! Raceline: live motorsport telemetry.
//!
//! ## Architecture
//!
//! - **Edge uplink** (`collector`, `queue`, `uploader`, `config::EdgeConfig`):
//!   runs on the in-vehicle unit, collecting GPS/CAN/heart-rate readings,
//!   durably queuing them on disk, and uploading them to the cloud.
//! - **Cloud ingest and fan-out** (`cloud`, `kalman`, `checkpoint`,
//!   `leaderboard`, `pubsub`, `permissions`, `auth`, `streamctl`,
//!   `config::CloudConfig`): receives edge uploads, smooths and
//!   checkpoints positions, computes standings, and distributes
//!   telemetry to viewers over server-sent events with field-level
//!   permission filtering.

pub mod auth;
pub mod checkpoint;
pub mod cloud;
pub mod collector;
pub mod config;
pub mod db;
pub mod error;
pub mod geo;
pub mod kalman;
pub mod leaderboard;
pub mod permissions;
pub mod pubsub;
pub mod queue;
pub mod streamctl;
pub mod types;
pub mod uploader;

pub use error::RacelineError;
