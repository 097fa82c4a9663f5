//! Per-cycle snapshot of zone, moisture and weather readings.
//!
//! [`capture`] reads everything the decision pass needs from a
//! [`StateProvider`] in one go. The matcher and policy only ever look at a
//! single [`Snapshot`], never at live state.

use serde::Serialize;
use std::collections::BTreeMap;
use time::OffsetDateTime;

use crate::config::IrrigationConfig;

/// Sentinel states a host reports when a sensor has no usable value.
const UNAVAILABLE_STATES: &[&str] = &["unavailable", "unknown"];

const DEFAULT_UNIT: &str = "%";

// ---------------------------------------------------------------------------
// Provider interface
// ---------------------------------------------------------------------------

/// Zone actuator state as reported by the host.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ZoneStatus {
    pub on: bool,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_watered: Option<OffsetDateTime>,
    pub duration_min: u32,
}

/// Moisture entity exactly as the host stores it. `state` is not parsed yet.
#[derive(Debug, Clone, PartialEq)]
pub struct RawMoisture {
    pub state: String,
    pub unit: Option<String>,
}

/// Read side of the host platform. Every lookup may come back empty.
pub trait StateProvider {
    fn zone_state(&self, zone_id: &str) -> Option<ZoneStatus>;
    fn moisture(&self, sensor_id: &str) -> Option<RawMoisture>;
    fn weather(&self) -> Option<WeatherSnapshot>;
}

// ---------------------------------------------------------------------------
// Snapshot types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MoistureReading {
    pub sensor_id: String,
    pub level: f64,
    pub unit: String,
    /// Set when the host had no usable value; `level` is then 0.
    pub stale: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeatherSnapshot {
    pub condition: String,
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    /// Millimetres; 0 when the station does not report it.
    pub precipitation: f64,
}

impl Default for WeatherSnapshot {
    fn default() -> Self {
        Self {
            condition: "unknown".to_string(),
            temperature: None,
            humidity: None,
            precipitation: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    #[serde(with = "time::serde::rfc3339")]
    pub captured_at: OffsetDateTime,
    pub zones: BTreeMap<String, ZoneStatus>,
    /// In configured sensor order.
    pub moisture: Vec<MoistureReading>,
    pub weather: WeatherSnapshot,
}

impl Snapshot {
    #[cfg(test)]
    pub fn reading(&self, sensor_id: &str) -> Option<&MoistureReading> {
        self.moisture.iter().find(|r| r.sensor_id == sensor_id)
    }

    /// Zones whose actuator is currently reported on.
    pub fn active_zones(&self) -> Vec<&str> {
        self.zones
            .iter()
            .filter(|(_, z)| z.on)
            .map(|(id, _)| id.as_str())
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Capture
// ---------------------------------------------------------------------------

/// Read one consistent snapshot. Missing zones and sensors are left out;
/// a missing weather report becomes [`WeatherSnapshot::default`].
pub fn capture<P: StateProvider + ?Sized>(provider: &P, config: &IrrigationConfig) -> Snapshot {
    let zones = config
        .zones
        .iter()
        .filter_map(|id| provider.zone_state(id).map(|z| (id.clone(), z)))
        .collect();

    let moisture = config
        .moisture_sensors
        .iter()
        .filter_map(|id| {
            let raw = provider.moisture(id)?;
            let (level, stale) = parse_level(&raw.state);
            if stale {
                tracing::debug!(sensor = %id, state = %raw.state, "moisture value unusable, using 0");
            }
            Some(MoistureReading {
                sensor_id: id.clone(),
                level,
                unit: raw.unit.unwrap_or_else(|| DEFAULT_UNIT.to_string()),
                stale,
            })
        })
        .collect();

    Snapshot {
        captured_at: OffsetDateTime::now_utc(),
        zones,
        moisture,
        weather: provider.weather().unwrap_or_default(),
    }
}

/// Interpret a host state string as a moisture level. Returns the level and
/// whether it was stale (unavailable, unknown or not a number).
pub fn parse_level(state: &str) -> (f64, bool) {
    let state = state.trim();
    if UNAVAILABLE_STATES
        .iter()
        .any(|s| state.eq_ignore_ascii_case(s))
    {
        return (0.0, true);
    }
    match state.parse::<f64>() {
        Ok(v) if v.is_finite() => (v, false),
        _ => (0.0, true),
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[derive(Default)]
    struct FakeHost {
        zones: HashMap<String, ZoneStatus>,
        moisture: HashMap<String, RawMoisture>,
        weather: Option<WeatherSnapshot>,
    }

    impl StateProvider for FakeHost {
        fn zone_state(&self, zone_id: &str) -> Option<ZoneStatus> {
            self.zones.get(zone_id).cloned()
        }
        fn moisture(&self, sensor_id: &str) -> Option<RawMoisture> {
            self.moisture.get(sensor_id).cloned()
        }
        fn weather(&self) -> Option<WeatherSnapshot> {
            self.weather.clone()
        }
    }

    fn raw(state: &str) -> RawMoisture {
        RawMoisture {
            state: state.into(),
            unit: None,
        }
    }

    fn config(zones: &[&str], sensors: &[&str]) -> IrrigationConfig {
        IrrigationConfig {
            zones: zones.iter().map(|s| s.to_string()).collect(),
            moisture_sensors: sensors.iter().map(|s| s.to_string()).collect(),
            watering_duration_min: 30,
            moisture_threshold: 30.0,
            rain_threshold_mm: 5.0,
        }
    }

    // -- parse_level --------------------------------------------------------

    #[test]
    fn parse_level_number() {
        assert_eq!(parse_level("42.5"), (42.5, false));
        assert_eq!(parse_level(" 7 "), (7.0, false));
    }

    #[test]
    fn parse_level_unavailable_sentinels() {
        assert_eq!(parse_level("unavailable"), (0.0, true));
        assert_eq!(parse_level("Unknown"), (0.0, true));
    }

    #[test]
    fn parse_level_garbage_is_zero() {
        assert_eq!(parse_level("wet-ish"), (0.0, true));
        assert_eq!(parse_level(""), (0.0, true));
        assert_eq!(parse_level("NaN"), (0.0, true));
    }

    // -- capture ------------------------------------------------------------

    #[test]
    fn capture_omits_missing_entities() {
        let mut host = FakeHost::default();
        host.zones.insert(
            "lawn".into(),
            ZoneStatus {
                on: true,
                last_watered: None,
                duration_min: 30,
            },
        );
        host.moisture.insert("s1".into(), raw("12"));

        let snap = capture(&host, &config(&["lawn", "ghost"], &["s1", "s-missing"]));

        assert_eq!(snap.zones.len(), 1);
        assert!(snap.zones["lawn"].on);
        assert_eq!(snap.moisture.len(), 1);
        assert_eq!(snap.moisture[0].level, 12.0);
        assert_eq!(snap.active_zones(), vec!["lawn"]);
    }

    #[test]
    fn capture_keeps_configured_sensor_order() {
        let mut host = FakeHost::default();
        host.moisture.insert("b".into(), raw("1"));
        host.moisture.insert("a".into(), raw("2"));
        host.moisture.insert("c".into(), raw("3"));

        let snap = capture(&host, &config(&[], &["c", "a", "b"]));
        let ids: Vec<_> = snap.moisture.iter().map(|r| r.sensor_id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
    }

    #[test]
    fn capture_marks_unavailable_sensor_stale() {
        let mut host = FakeHost::default();
        host.moisture.insert(
            "s1".into(),
            RawMoisture {
                state: "unavailable".into(),
                unit: Some("%".into()),
            },
        );

        let snap = capture(&host, &config(&[], &["s1"]));
        let r = snap.reading("s1").unwrap();
        assert_eq!(r.level, 0.0);
        assert!(r.stale);
    }

    #[test]
    fn capture_defaults_unit_and_weather() {
        let mut host = FakeHost::default();
        host.moisture.insert("s1".into(), raw("55"));

        let snap = capture(&host, &config(&[], &["s1"]));
        assert_eq!(snap.reading("s1").unwrap().unit, "%");
        assert_eq!(snap.weather, WeatherSnapshot::default());
        assert_eq!(snap.weather.precipitation, 0.0);
    }

    #[test]
    fn capture_copies_weather() {
        let host = FakeHost {
            weather: Some(WeatherSnapshot {
                condition: "rainy".into(),
                temperature: Some(14.0),
                humidity: Some(91.0),
                precipitation: 8.5,
            }),
            ..Default::default()
        };
        let snap = capture(&host, &config(&[], &[]));
        assert_eq!(snap.weather.condition, "rainy");
        assert_eq!(snap.weather.precipitation, 8.5);
    }
}
