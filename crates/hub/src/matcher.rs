//! Zone to moisture-sensor matching.
//!
//! Sensor naming is free-form, so matching is a heuristic with three tiers,
//! tried in order against the snapshot's readings:
//!
//! 1. direct: the sensor id contains the zone id, or the zone id contains
//!    the sensor id
//! 2. token: any `_`-separated token of the zone id appears in the sensor id
//!    (case-insensitive)
//! 3. fallback: the first reading in the snapshot, whatever it belongs to
//!
//! Only an empty snapshot yields no reading.

use serde::Serialize;

use crate::snapshot::{MoistureReading, Snapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchKind {
    Direct,
    Token,
    Fallback,
}

/// Resolve the reading that applies to `zone_id`.
pub fn resolve<'a>(zone_id: &str, snapshot: &'a Snapshot) -> Option<&'a MoistureReading> {
    resolve_with_kind(zone_id, snapshot).map(|(_, r)| r)
}

/// Like [`resolve`], also reporting which tier produced the match.
pub fn resolve_with_kind<'a>(
    zone_id: &str,
    snapshot: &'a Snapshot,
) -> Option<(MatchKind, &'a MoistureReading)> {
    let readings = &snapshot.moisture;

    if let Some(r) = readings
        .iter()
        .find(|r| r.sensor_id.contains(zone_id) || zone_id.contains(r.sensor_id.as_str()))
    {
        return Some((MatchKind::Direct, r));
    }

    let zone_lower = zone_id.to_lowercase();
    let tokens: Vec<&str> = zone_lower.split('_').filter(|t| !t.is_empty()).collect();
    if let Some(r) = readings.iter().find(|r| {
        let sensor = r.sensor_id.to_lowercase();
        tokens.iter().any(|t| sensor.contains(t))
    }) {
        return Some((MatchKind::Token, r));
    }

    readings.first().map(|r| (MatchKind::Fallback, r))
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::WeatherSnapshot;
    use std::collections::BTreeMap;
    use time::OffsetDateTime;

    fn snapshot(readings: &[(&str, f64)]) -> Snapshot {
        Snapshot {
            captured_at: OffsetDateTime::UNIX_EPOCH,
            zones: BTreeMap::new(),
            moisture: readings
                .iter()
                .map(|(id, level)| MoistureReading {
                    sensor_id: id.to_string(),
                    level: *level,
                    unit: "%".into(),
                    stale: false,
                })
                .collect(),
            weather: WeatherSnapshot::default(),
        }
    }

    #[test]
    fn sensor_containing_zone_id_matches_directly() {
        let snap = snapshot(&[("sensor.other", 80.0), ("sensor.lawn_front_moisture", 15.0)]);
        let (kind, r) = resolve_with_kind("lawn_front", &snap).unwrap();
        assert_eq!(kind, MatchKind::Direct);
        assert_eq!(r.sensor_id, "sensor.lawn_front_moisture");
    }

    #[test]
    fn zone_id_containing_sensor_id_matches_directly() {
        let snap = snapshot(&[("x", 1.0), ("front", 15.0)]);
        // "x" is not in "lawn_front", "front" is.
        let (kind, r) = resolve_with_kind("lawn_front", &snap).unwrap();
        assert_eq!(kind, MatchKind::Direct);
        assert_eq!(r.sensor_id, "front");
    }

    #[test]
    fn direct_match_preferred_over_earlier_token_match() {
        let snap = snapshot(&[("sensor.lawn_back", 50.0), ("sensor.lawn_front", 15.0)]);
        let (kind, r) = resolve_with_kind("lawn_front", &snap).unwrap();
        assert_eq!(kind, MatchKind::Direct);
        assert_eq!(r.sensor_id, "sensor.lawn_front");
    }

    #[test]
    fn token_overlap_matches() {
        let snap = snapshot(&[("sensor.beds", 70.0), ("sensor.moisture_front", 15.0)]);
        let (kind, r) = resolve_with_kind("lawn_front", &snap).unwrap();
        assert_eq!(kind, MatchKind::Token);
        assert_eq!(r.sensor_id, "sensor.moisture_front");
    }

    #[test]
    fn token_overlap_is_case_insensitive() {
        let snap = snapshot(&[("sensor.Moisture_FRONT", 15.0)]);
        let (kind, _) = resolve_with_kind("Lawn_Front", &snap).unwrap();
        assert_eq!(kind, MatchKind::Token);
    }

    #[test]
    fn empty_tokens_do_not_match_everything() {
        let snap = snapshot(&[("sensor.beds", 70.0), ("sensor.roses", 10.0)]);
        // "_lawn__" splits into "", "lawn", "", ""; only "lawn" counts.
        let (kind, r) = resolve_with_kind("_lawn__", &snap).unwrap();
        assert_eq!(kind, MatchKind::Fallback);
        assert_eq!(r.sensor_id, "sensor.beds");
    }

    #[test]
    fn fallback_uses_first_reading() {
        let snap = snapshot(&[("sensor.beds", 70.0), ("sensor.roses", 10.0)]);
        let (kind, r) = resolve_with_kind("lawn", &snap).unwrap();
        assert_eq!(kind, MatchKind::Fallback);
        assert_eq!(r.sensor_id, "sensor.beds");
    }

    #[test]
    fn fallback_is_deterministic() {
        let snap = snapshot(&[("a", 1.0), ("b", 2.0), ("c", 3.0)]);
        let first = resolve("zzz", &snap).map(|r| r.sensor_id.clone());
        for _ in 0..10 {
            assert_eq!(resolve("zzz", &snap).map(|r| r.sensor_id.clone()), first);
        }
    }

    #[test]
    fn no_readings_resolves_none() {
        let snap = snapshot(&[]);
        assert!(resolve("lawn_front", &snap).is_none());
    }
}
