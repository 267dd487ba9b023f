//! Concrete sensor sources: simulated generators and passthrough stubs
//! for the real hardware integrations (NMEA GPS, CAN/DBC, ANT+ heart
//! rate) that live outside this crate's reach in production.

use super::{SensorSource, SourceError, SourceReading};
use async_trait::async_trait;
use rand::Rng;
use std::time::{SystemTime, UNIX_EPOCH};

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Generates a synthetic GPS track: a vehicle circling a fixed center
/// point at a roughly constant speed, with light jitter so Kalman
/// smoothing has something to do.
pub struct SimulatedGpsSource {
    center_lat: f64,
    center_lon: f64,
    radius_deg: f64,
    angle: f64,
    connected: bool,
}

impl SimulatedGpsSource {
    pub fn new(center_lat: f64, center_lon: f64) -> Self {
        Self {
            center_lat,
            center_lon,
            radius_deg: 0.01,
            angle: 0.0,
            connected: false,
        }
    }
}

#[async_trait]
impl SensorSource for SimulatedGpsSource {
    async fn connect(&mut self) -> Result<(), SourceError> {
        self.connected = true;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), SourceError> {
        self.connected = false;
        Ok(())
    }

    async fn read(&mut self) -> Result<SourceReading, SourceError> {
        if !self.connected {
            return Err(SourceError::NotConnected);
        }
        let mut rng = rand::thread_rng();
        self.angle += 0.02;
        let jitter = || rng.gen_range(-0.00002..0.00002);
        let lat = self.center_lat + self.radius_deg * self.angle.cos() + jitter();
        let lon = self.center_lon + self.radius_deg * self.angle.sin() + jitter();
        let heading = (self.angle.to_degrees() + 90.0).rem_euclid(360.0);
        Ok(SourceReading::Position {
            ts_ms: now_ms(),
            lat,
            lon,
            speed_mps: 35.0 + rng.gen_range(-2.0..2.0),
            heading_deg: heading,
            altitude_m: 200.0,
            hdop: 0.9,
            satellites: 10,
        })
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn source_name(&self) -> &'static str {
        "gps-simulated"
    }
}

/// Generates synthetic CAN/ECU telemetry correlated loosely with a
/// simulated throttle cycle.
pub struct SimulatedCanSource {
    connected: bool,
    tick: u64,
}

impl SimulatedCanSource {
    pub fn new() -> Self {
        Self {
            connected: false,
            tick: 0,
        }
    }
}

impl Default for SimulatedCanSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SensorSource for SimulatedCanSource {
    async fn connect(&mut self) -> Result<(), SourceError> {
        self.connected = true;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), SourceError> {
        self.connected = false;
        Ok(())
    }

    async fn read(&mut self) -> Result<SourceReading, SourceError> {
        if !self.connected {
            return Err(SourceError::NotConnected);
        }
        self.tick = self.tick.wrapping_add(1);
        let throttle = 40.0 + 30.0 * ((self.tick as f64 * 0.05).sin());
        let rpm = 3000.0 + 2500.0 * ((self.tick as f64 * 0.05).sin());
        Ok(SourceReading::Telemetry {
            ts_ms: now_ms(),
            rpm: Some(rpm),
            gear: Some(((rpm / 1500.0) as i32).clamp(1, 6)),
            throttle_pct: Some(throttle),
            coolant_temp_c: Some(92.0),
            oil_pressure_psi: Some(55.0),
            fuel_pressure_psi: Some(58.0),
            speed_mph: Some(throttle * 0.7),
            heart_rate: None,
            heart_rate_zone: None,
        })
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn source_name(&self) -> &'static str {
        "can-simulated"
    }
}

/// Generates a synthetic driver heart rate at roughly 1 Hz, the same
/// cadence as the real ANT+ strap integration.
pub struct SimulatedHeartRateSource {
    connected: bool,
    baseline_bpm: u32,
}

impl SimulatedHeartRateSource {
    pub fn new() -> Self {
        Self {
            connected: false,
            baseline_bpm: 140,
        }
    }
}

impl Default for SimulatedHeartRateSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SensorSource for SimulatedHeartRateSource {
    async fn connect(&mut self) -> Result<(), SourceError> {
        self.connected = true;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), SourceError> {
        self.connected = false;
        Ok(())
    }

    async fn read(&mut self) -> Result<SourceReading, SourceError> {
        if !self.connected {
            return Err(SourceError::NotConnected);
        }
        let mut rng = rand::thread_rng();
        let bpm = self.baseline_bpm as i32 + rng.gen_range(-5..5);
        let zone = match bpm {
            bpm if bpm < 120 => 1,
            bpm if bpm < 150 => 2,
            bpm if bpm < 170 => 3,
            bpm if bpm < 185 => 4,
            _ => 5,
        };
        Ok(SourceReading::Telemetry {
            ts_ms: now_ms(),
            rpm: None,
            gear: None,
            throttle_pct: None,
            coolant_temp_c: None,
            oil_pressure_psi: None,
            fuel_pressure_psi: None,
            speed_mph: None,
            heart_rate: Some(bpm.max(0) as u32),
            heart_rate_zone: Some(zone),
        })
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn source_name(&self) -> &'static str {
        "heart-rate-simulated"
    }
}
