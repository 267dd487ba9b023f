//! Permission Filter Integration Tests
//!
//! Exercises `permissions::project_snapshot` across all three viewer
//! tiers against a single realistic policy, the way the SSE stream and
//! positions/latest handlers actually use it.

use raceline::permissions::{project_snapshot, VehicleMeta};
use raceline::types::{PositionSample, TelemetryPolicy, TelemetrySample, ViewerAccess};
use std::collections::HashSet;

fn set(fields: &[&str]) -> HashSet<String> {
    fields.iter().map(|s| (*s).to_string()).collect()
}

fn meta() -> VehicleMeta {
    VehicleMeta {
        vehicle_number: 7,
        team_name: "Blue Thunder".to_string(),
    }
}

fn policy() -> TelemetryPolicy {
    TelemetryPolicy::new(
        set(&["lat", "lon", "speed_mps", "rpm", "heart_rate", "coolant_temp_c"]),
        set(&["lat", "lon", "speed_mps"]),
    )
}

fn position() -> PositionSample {
    PositionSample {
        ts_ms: 5000,
        lat: 40.5,
        lon: -86.5,
        speed_mps: 42.0,
        heading_deg: 180.0,
        altitude_m: 210.0,
        hdop: 0.8,
        satellites: 11,
    }
}

fn telemetry() -> TelemetrySample {
    TelemetrySample {
        ts_ms: 5000,
        rpm: Some(7200.0),
        heart_rate: Some(165),
        coolant_temp_c: Some(98.0),
        ..TelemetrySample::default()
    }
}

#[test]
fn public_and_premium_viewers_see_identical_fan_fields() {
    let policy = policy();
    let public = project_snapshot("veh-1", "evt-1", &meta(), "position", Some(&position()), Some(&telemetry()), ViewerAccess::Public, &policy);
    let premium = project_snapshot("veh-1", "evt-1", &meta(), "position", Some(&position()), Some(&telemetry()), ViewerAccess::Premium, &policy);
    assert_eq!(public, premium, "premium has no extra field access over public in this policy");
}

#[test]
fn team_viewer_sees_everything_allowed_for_production() {
    let policy = policy();
    let snapshot = project_snapshot("veh-1", "evt-1", &meta(), "position", Some(&position()), Some(&telemetry()), ViewerAccess::Team, &policy);
    let obj = snapshot.as_object().unwrap();
    assert!(obj.contains_key("rpm"));
    assert!(obj.contains_key("heart_rate"));
    assert!(obj.contains_key("coolant_temp_c"));
}

#[test]
fn fan_viewer_never_sees_production_only_fields() {
    let policy = policy();
    let snapshot = project_snapshot("veh-1", "evt-1", &meta(), "position", Some(&position()), Some(&telemetry()), ViewerAccess::Public, &policy);
    let obj = snapshot.as_object().unwrap();
    assert!(!obj.contains_key("rpm"));
    assert!(!obj.contains_key("heart_rate"));
    assert!(!obj.contains_key("coolant_temp_c"));
    // Fields opted into allow_fans still come through.
    assert!(obj.contains_key("lat"));
    assert!(obj.contains_key("speed_mps"));
}

#[test]
fn metadata_fields_always_present_regardless_of_tier() {
    let policy = TelemetryPolicy::new(HashSet::new(), HashSet::new());
    for tier in [ViewerAccess::Public, ViewerAccess::Premium, ViewerAccess::Team] {
        let snapshot = project_snapshot("veh-9", "evt-1", &meta(), "position", Some(&position()), None, tier, &policy);
        let obj = snapshot.as_object().unwrap();
        assert_eq!(obj.get("vehicle_id").unwrap(), "veh-9");
        assert_eq!(obj.get("vehicle_number").unwrap(), 7);
        assert_eq!(obj.get("team_name").unwrap(), "Blue Thunder");
        assert_eq!(obj.get("event_id").unwrap(), "evt-1");
        assert_eq!(obj.get("type").unwrap(), "position");
        assert_eq!(obj.get("ts_ms").unwrap(), 5000);
    }
}

#[test]
fn policy_cannot_leak_fan_fields_not_present_in_production() {
    // new() intersects allow_fans into allow_production, so this is
    // actually unreachable via the constructor, but worth pinning down
    // as a regression guard on that invariant.
    let policy = TelemetryPolicy::new(set(&["lat"]), set(&["lat", "rpm"]));
    assert!(!policy.allow_fans().contains("rpm"));
}
