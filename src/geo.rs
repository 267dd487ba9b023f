//! Great-circle distance, GPS speed-outlier gating, course-progress
//! snapping, and split-time formatting shared by the Kalman filter,
//! checkpoint detector, and leaderboard.

use crate::types::Course;

/// Mean Earth radius in meters, per the haversine convention used
/// throughout the ingest pipeline.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Snaps `(lat, lon)` to the nearest point on the course polyline and
/// returns that point's precomputed cumulative distance, in meters.
/// Returns `0.0` for a course with no points.
pub fn progress_along_course(course: &Course, lat: f64, lon: f64) -> f64 {
    course
        .points
        .iter()
        .map(|p| (haversine_distance_m(lat, lon, p.lat, p.lon), p.cumulative_m))
        .min_by(|a, b| a.0.total_cmp(&b.0))
        .map(|(_, cumulative_m)| cumulative_m)
        .unwrap_or(0.0)
}

/// Great-circle distance between two lat/lon points, in meters.
pub fn haversine_distance_m(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let (lat1, lon1, lat2, lon2) = (
        lat1.to_radians(),
        lon1.to_radians(),
        lat2.to_radians(),
        lon2.to_radians(),
    );
    let dlat = lat2 - lat1;
    let dlon = lon2 - lon1;
    let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().asin();
    EARTH_RADIUS_M * c
}

/// Rejects a new fix whose implied speed from the previous fix exceeds
/// `max_speed_mps`, or whose timestamp doesn't move forward. The first
/// fix for a vehicle (no previous point) is always valid.
pub fn is_plausible_speed(
    new_lat: f64,
    new_lon: f64,
    new_ts_ms: i64,
    prev: Option<(f64, f64, i64)>,
    max_speed_mps: f64,
) -> bool {
    let Some((old_lat, old_lon, old_ts_ms)) = prev else {
        return true;
    };
    let dt_seconds = (new_ts_ms - old_ts_ms) as f64 / 1000.0;
    if dt_seconds <= 0.0 {
        return false;
    }
    let distance_m = haversine_distance_m(new_lat, new_lon, old_lat, old_lon);
    distance_m / dt_seconds <= max_speed_mps
}

/// Formats a millisecond time delta the way the leaderboard renders gaps:
/// `"0.0s"` for zero, `"+Ss.s"` under a minute, `"+M:SS.s"` under an hour,
/// `"+H:MM:SS.s"` beyond that.
pub fn format_time_delta_ms(delta_ms: i64) -> String {
    if delta_ms == 0 {
        return "0.0s".to_string();
    }
    let seconds = delta_ms as f64 / 1000.0;
    if seconds < 60.0 {
        format!("+{seconds:.1}s")
    } else if seconds < 3600.0 {
        let minutes = (seconds / 60.0) as i64;
        let remaining = seconds % 60.0;
        format!("+{minutes}:{remaining:04.1}")
    } else {
        let hours = (seconds / 3600.0) as i64;
        let minutes = ((seconds % 3600.0) / 60.0) as i64;
        let remaining = seconds % 60.0;
        format!("+{hours}:{minutes:02}:{remaining:04.1}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn haversine_zero_distance_for_identical_points() {
        let d = haversine_distance_m(40.0, -86.0, 40.0, -86.0);
        assert!(d.abs() < 1e-6);
    }

    #[test]
    fn haversine_matches_known_distance() {
        // Roughly 1 degree of longitude at the equator is ~111.2 km.
        let d = haversine_distance_m(0.0, 0.0, 0.0, 1.0);
        assert!((d - 111_195.0).abs() < 200.0);
    }

    #[test]
    fn first_fix_is_always_plausible() {
        assert!(is_plausible_speed(40.0, -86.0, 1000, None, 100.0));
    }

    #[test]
    fn backwards_timestamp_is_implausible() {
        assert!(!is_plausible_speed(
            40.0,
            -86.0,
            1000,
            Some((40.0, -86.0, 2000)),
            100.0
        ));
    }

    #[test]
    fn teleport_exceeds_max_speed() {
        // ~111km jump in 1 second is not a plausible race car speed.
        assert!(!is_plausible_speed(
            1.0,
            0.0,
            2000,
            Some((0.0, 0.0, 1000)),
            120.0
        ));
    }

    #[test]
    fn format_delta_zero() {
        assert_eq!(format_time_delta_ms(0), "0.0s");
    }

    #[test]
    fn format_delta_sub_minute() {
        assert_eq!(format_time_delta_ms(1500), "+1.5s");
    }

    #[test]
    fn format_delta_sub_hour() {
        assert_eq!(format_time_delta_ms(65_400), "+1:05.4");
    }

    #[test]
    fn format_delta_over_hour() {
        assert_eq!(format_time_delta_ms(3_725_600), "+1:02:05.6");
    }

    #[test]
    fn progress_along_course_snaps_to_nearest_point() {
        use crate::types::CoursePoint;
        let course = Course {
            points: vec![
                CoursePoint { lat: 0.0, lon: 0.0, cumulative_m: 0.0 },
                CoursePoint { lat: 0.0, lon: 1.0, cumulative_m: 111_195.0 },
                CoursePoint { lat: 0.0, lon: 2.0, cumulative_m: 222_390.0 },
            ],
        };
        let progress = progress_along_course(&course, 0.0, 0.99);
        assert!((progress - 111_195.0).abs() < 1.0);
    }

    #[test]
    fn progress_along_course_empty_is_zero() {
        let course = Course::default();
        assert_eq!(progress_along_course(&course, 0.0, 0.0), 0.0);
    }
}
