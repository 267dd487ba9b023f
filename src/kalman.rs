//! Per-vehicle GPS smoothing.
//!
//! A constant-velocity Kalman filter operating in a local tangent plane
//! (meters, not degrees) so position noise and the nonlinearity of
//! lat/lon don't fight each other. One filter per vehicle, kept in an
//! LRU-bounded cache so a long-lived cloud process doesn't accumulate
//! filters for vehicles that stopped reporting.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

const METERS_PER_DEGREE_LAT: f64 = 111_320.0;
const DEFAULT_PROCESS_NOISE: f64 = 1.0;
const DEFAULT_MEASUREMENT_NOISE: f64 = 5.0;
const DEFAULT_OUTLIER_THRESHOLD_M: f64 = 50.0;
const MAX_DT_SECONDS: f64 = 10.0;

/// Smoothed output of a single [`GpsKalmanFilter::update`] call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SmoothedFix {
    pub lat: f64,
    pub lon: f64,
    pub speed_mps: f64,
    pub heading_deg: f64,
    pub is_outlier: bool,
}

#[derive(Debug, Clone, Copy)]
struct KalmanState {
    x: f64,
    y: f64,
    vx: f64,
    vy: f64,
    p_x: f64,
    p_y: f64,
    p_vx: f64,
    p_vy: f64,
    last_ts_ms: i64,
}

/// Constant-velocity GPS filter for a single vehicle.
#[derive(Debug)]
pub struct GpsKalmanFilter {
    process_noise: f64,
    measurement_noise: f64,
    outlier_threshold_m: f64,
    ref_lat: Option<f64>,
    ref_lon: Option<f64>,
    state: Option<KalmanState>,
}

impl Default for GpsKalmanFilter {
    fn default() -> Self {
        Self {
            process_noise: DEFAULT_PROCESS_NOISE,
            measurement_noise: DEFAULT_MEASUREMENT_NOISE,
            outlier_threshold_m: DEFAULT_OUTLIER_THRESHOLD_M,
            ref_lat: None,
            ref_lon: None,
            state: None,
        }
    }
}

impl GpsKalmanFilter {
    pub fn new() -> Self {
        Self::default()
    }

    fn latlon_to_local(&self, lat: f64, lon: f64) -> (f64, f64) {
        let Some(ref_lat) = self.ref_lat else {
            return (0.0, 0.0);
        };
        let ref_lon = self.ref_lon.unwrap_or(0.0);
        let meters_per_deg_lon = METERS_PER_DEGREE_LAT * ref_lat.to_radians().cos();
        let x = (lon - ref_lon) * meters_per_deg_lon;
        let y = (lat - ref_lat) * METERS_PER_DEGREE_LAT;
        (x, y)
    }

    fn local_to_latlon(&self, x: f64, y: f64) -> (f64, f64) {
        let Some(ref_lat) = self.ref_lat else {
            return (0.0, 0.0);
        };
        let ref_lon = self.ref_lon.unwrap_or(0.0);
        let meters_per_deg_lon = METERS_PER_DEGREE_LAT * ref_lat.to_radians().cos();
        let lat = ref_lat + y / METERS_PER_DEGREE_LAT;
        let lon = ref_lon + x / meters_per_deg_lon;
        (lat, lon)
    }

    /// Processes one GPS measurement and returns the smoothed fix.
    ///
    /// On an outlier, the filter's position is advanced to the
    /// predicted (not measured) point and its timestamp is still moved
    /// forward, so a single bad fix can't wedge the filter in the past.
    pub fn update(
        &mut self,
        lat: f64,
        lon: f64,
        ts_ms: i64,
        speed_mps: Option<f64>,
        heading_deg: Option<f64>,
    ) -> SmoothedFix {
        if self.ref_lat.is_none() {
            self.ref_lat = Some(lat);
            self.ref_lon = Some(lon);
        }

        let (z_x, z_y) = self.latlon_to_local(lat, lon);

        let Some(state) = self.state else {
            let (vx, vy) = match (speed_mps, heading_deg) {
                (Some(speed), Some(heading)) => {
                    (speed * heading.to_radians().sin(), speed * heading.to_radians().cos())
                }
                _ => (0.0, 0.0),
            };
            self.state = Some(KalmanState {
                x: z_x,
                y: z_y,
                vx,
                vy,
                p_x: self.measurement_noise.powi(2),
                p_y: self.measurement_noise.powi(2),
                p_vx: 10.0,
                p_vy: 10.0,
                last_ts_ms: ts_ms,
            });
            return SmoothedFix {
                lat,
                lon,
                speed_mps: speed_mps.unwrap_or(0.0),
                heading_deg: heading_deg.unwrap_or(0.0),
                is_outlier: false,
            };
        };

        let dt = (ts_ms - state.last_ts_ms) as f64 / 1000.0;
        if dt <= 0.0 {
            return SmoothedFix {
                lat,
                lon,
                speed_mps: speed_mps.unwrap_or(0.0),
                heading_deg: heading_deg.unwrap_or(0.0),
                is_outlier: true,
            };
        }
        let dt = dt.min(MAX_DT_SECONDS);

        // Predict.
        let pred_x = state.x + state.vx * dt;
        let pred_y = state.y + state.vy * dt;
        let pred_vx = state.vx;
        let pred_vy = state.vy;

        let q = self.process_noise * dt.powi(2);
        let pred_p_x = state.p_x + state.p_vx * dt.powi(2) + q;
        let pred_p_y = state.p_y + state.p_vy * dt.powi(2) + q;
        let pred_p_vx = state.p_vx + q;
        let pred_p_vy = state.p_vy + q;

        // Innovation.
        let innov_x = z_x - pred_x;
        let innov_y = z_y - pred_y;
        let innov_dist = (innov_x.powi(2) + innov_y.powi(2)).sqrt();

        if innov_dist > self.outlier_threshold_m {
            let (pred_lat, pred_lon) = self.local_to_latlon(pred_x, pred_y);
            let speed = (pred_vx.powi(2) + pred_vy.powi(2)).sqrt();
            let heading = pred_vx.atan2(pred_vy).to_degrees().rem_euclid(360.0);
            self.state = Some(KalmanState {
                x: pred_x,
                y: pred_y,
                last_ts_ms: ts_ms,
                ..state
            });
            return SmoothedFix {
                lat: pred_lat,
                lon: pred_lon,
                speed_mps: speed,
                heading_deg: heading,
                is_outlier: true,
            };
        }

        // Update.
        let r = self.measurement_noise.powi(2);
        let k_x = pred_p_x / (pred_p_x + r);
        let k_y = pred_p_y / (pred_p_y + r);
        let k_vx = pred_p_vx / (pred_p_vx + r) * 0.5;
        let k_vy = pred_p_vy / (pred_p_vy + r) * 0.5;

        let new_x = pred_x + k_x * innov_x;
        let new_y = pred_y + k_y * innov_y;
        let mut new_vx = if dt > 0.01 {
            pred_vx + k_vx * (innov_x / dt)
        } else {
            pred_vx
        };
        let mut new_vy = if dt > 0.01 {
            pred_vy + k_vy * (innov_y / dt)
        } else {
            pred_vy
        };

        if let (Some(speed), Some(heading)) = (speed_mps, heading_deg) {
            let meas_vx = speed * heading.to_radians().sin();
            let meas_vy = speed * heading.to_radians().cos();
            new_vx = 0.5 * new_vx + 0.5 * meas_vx;
            new_vy = 0.5 * new_vy + 0.5 * meas_vy;
        }

        self.state = Some(KalmanState {
            x: new_x,
            y: new_y,
            vx: new_vx,
            vy: new_vy,
            p_x: (1.0 - k_x) * pred_p_x,
            p_y: (1.0 - k_y) * pred_p_y,
            p_vx: (1.0 - k_vx) * pred_p_vx,
            p_vy: (1.0 - k_vy) * pred_p_vy,
            last_ts_ms: ts_ms,
        });

        let (smooth_lat, smooth_lon) = self.local_to_latlon(new_x, new_y);
        let smooth_speed = (new_vx.powi(2) + new_vy.powi(2)).sqrt();
        let smooth_heading = new_vx.atan2(new_vy).to_degrees().rem_euclid(360.0);

        SmoothedFix {
            lat: smooth_lat,
            lon: smooth_lon,
            speed_mps: smooth_speed,
            heading_deg: smooth_heading,
            is_outlier: false,
        }
    }

    pub fn reset(&mut self) {
        self.ref_lat = None;
        self.ref_lon = None;
        self.state = None;
    }
}

/// Maximum number of per-vehicle filters retained before LRU eviction.
const MAX_FILTERS: usize = 500;

/// LRU-bounded cache of per-vehicle Kalman filters.
///
/// Guarded by a single mutex rather than `dashmap`: updates mutate both
/// the filter and the recency order together, so a sharded map would
/// buy nothing here.
pub struct FilterCache {
    inner: Mutex<FilterCacheInner>,
}

struct FilterCacheInner {
    filters: HashMap<String, GpsKalmanFilter>,
    order: VecDeque<String>,
    max_filters: usize,
}

impl Default for FilterCache {
    fn default() -> Self {
        Self::new(MAX_FILTERS)
    }
}

impl FilterCache {
    pub fn new(max_filters: usize) -> Self {
        Self {
            inner: Mutex::new(FilterCacheInner {
                filters: HashMap::new(),
                order: VecDeque::new(),
                max_filters,
            }),
        }
    }

    /// Smooths one fix for `vehicle_id`, creating its filter on first use
    /// and evicting the least-recently-used filter if the cache is full.
    #[allow(clippy::too_many_arguments)]
    pub fn smooth(
        &self,
        vehicle_id: &str,
        lat: f64,
        lon: f64,
        ts_ms: i64,
        speed_mps: Option<f64>,
        heading_deg: Option<f64>,
    ) -> SmoothedFix {
        let mut inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if !inner.filters.contains_key(vehicle_id) {
            inner
                .filters
                .insert(vehicle_id.to_string(), GpsKalmanFilter::new());
            inner.order.push_back(vehicle_id.to_string());
            while inner.filters.len() > inner.max_filters {
                if let Some(oldest) = inner.order.pop_front() {
                    inner.filters.remove(&oldest);
                }
            }
        } else {
            inner.order.retain(|id| id != vehicle_id);
            inner.order.push_back(vehicle_id.to_string());
        }
        let filter = inner
            .filters
            .get_mut(vehicle_id)
            .expect("just inserted or already present");
        filter.update(lat, lon, ts_ms, speed_mps, heading_deg)
    }

    /// Drops a vehicle's filter, e.g. at the start of a new session.
    pub fn reset(&self, vehicle_id: &str) {
        let mut inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        inner.filters.remove(vehicle_id);
        inner.order.retain(|id| id != vehicle_id);
    }

    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .filters
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_fix_passes_through_unsmoothed() {
        let mut kf = GpsKalmanFilter::new();
        let fix = kf.update(40.0, -86.0, 1000, Some(10.0), Some(90.0));
        assert!(!fix.is_outlier);
        assert_eq!(fix.lat, 40.0);
        assert_eq!(fix.lon, -86.0);
    }

    #[test]
    fn smooth_fix_stays_near_measurement() {
        let mut kf = GpsKalmanFilter::new();
        kf.update(40.0, -86.0, 1000, Some(10.0), Some(0.0));
        let fix = kf.update(40.0001, -86.0, 2000, Some(10.0), Some(0.0));
        assert!(!fix.is_outlier);
        assert!((fix.lat - 40.0001).abs() < 0.001);
    }

    #[test]
    fn large_jump_is_flagged_as_outlier() {
        let mut kf = GpsKalmanFilter::new();
        kf.update(40.0, -86.0, 1000, Some(10.0), Some(0.0));
        let fix = kf.update(41.0, -86.0, 2000, Some(10.0), Some(0.0));
        assert!(fix.is_outlier);
    }

    #[test]
    fn backwards_timestamp_is_outlier_and_passthrough() {
        let mut kf = GpsKalmanFilter::new();
        kf.update(40.0, -86.0, 2000, None, None);
        let fix = kf.update(40.0, -86.0, 1000, None, None);
        assert!(fix.is_outlier);
    }

    #[test]
    fn reset_clears_state() {
        let mut kf = GpsKalmanFilter::new();
        kf.update(40.0, -86.0, 1000, None, None);
        kf.reset();
        let fix = kf.update(10.0, 10.0, 1500, None, None);
        assert!(!fix.is_outlier);
    }

    #[test]
    fn cache_evicts_least_recently_used() {
        let cache = FilterCache::new(2);
        cache.smooth("a", 40.0, -86.0, 1000, None, None);
        cache.smooth("b", 40.0, -86.0, 1000, None, None);
        cache.smooth("c", 40.0, -86.0, 1000, None, None);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn cache_reset_removes_single_vehicle() {
        let cache = FilterCache::new(10);
        cache.smooth("a", 40.0, -86.0, 1000, None, None);
        cache.reset("a");
        assert_eq!(cache.len(), 0);
    }
}
