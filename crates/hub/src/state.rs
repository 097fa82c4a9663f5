use serde::Serialize;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;
use time::OffsetDateTime;
use tokio::sync::RwLock;

use crate::mqtt::{MoistureMsg, WeatherMsg};
use crate::snapshot::{RawMoisture, StateProvider, WeatherSnapshot, ZoneStatus};

/// Maximum number of events retained in the ring buffer.
const MAX_EVENTS: usize = 200;

// ---------------------------------------------------------------------------
// Public type alias
// ---------------------------------------------------------------------------

pub type SharedState = Arc<RwLock<SystemState>>;

// ---------------------------------------------------------------------------
// Core types
// ---------------------------------------------------------------------------

/// Everything the hub has heard from the outside world. This is the host
/// state store the controller snapshots each cycle.
pub struct SystemState {
    pub started_at: Instant,
    pub mqtt_connected: bool,
    pub zones: BTreeMap<String, ZoneState>,
    pub sensors: HashMap<String, SensorState>,
    pub weather: Option<WeatherState>,
    pub events: VecDeque<SystemEvent>,
}

#[derive(Clone, Serialize)]
pub struct ZoneState {
    pub on: bool,
    pub gpio_pin: u8,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_watered: Option<OffsetDateTime>,
    pub duration_min: u32,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_changed: Option<OffsetDateTime>,
}

#[derive(Clone, Serialize)]
pub struct SensorState {
    pub state: String,
    pub unit: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub last_seen: OffsetDateTime,
}

#[derive(Clone, Serialize)]
pub struct WeatherState {
    pub station: String,
    pub condition: String,
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub precipitation: f64,
    #[serde(with = "time::serde::rfc3339")]
    pub last_seen: OffsetDateTime,
}

#[derive(Clone, Debug, Serialize)]
pub struct SystemEvent {
    #[serde(with = "time::serde::rfc3339")]
    pub ts: OffsetDateTime,
    pub kind: EventKind,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Reading,
    Weather,
    Valve,
    Scheduler,
    Error,
    System,
}

// ---------------------------------------------------------------------------
// JSON response (what the API returns)
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct StatusResponse {
    pub uptime_secs: u64,
    pub mqtt_connected: bool,
    pub zones: BTreeMap<String, ZoneState>,
    pub sensors: HashMap<String, SensorState>,
    pub weather: Option<WeatherState>,
    pub events: Vec<SystemEvent>,
}

// ---------------------------------------------------------------------------
// Construction & mutation
// ---------------------------------------------------------------------------

impl SystemState {
    pub fn new(zone_to_gpio: &[(String, u8)]) -> Self {
        let mut zones = BTreeMap::new();
        for (zone_id, pin) in zone_to_gpio {
            zones.insert(
                zone_id.clone(),
                ZoneState {
                    on: false,
                    gpio_pin: *pin,
                    last_watered: None,
                    duration_min: 0,
                    last_changed: None,
                },
            );
        }

        Self {
            started_at: Instant::now(),
            mqtt_connected: false,
            zones,
            sensors: HashMap::new(),
            weather: None,
            events: VecDeque::with_capacity(MAX_EVENTS),
        }
    }

    pub fn shared(zone_to_gpio: &[(String, u8)]) -> SharedState {
        Arc::new(RwLock::new(Self::new(zone_to_gpio)))
    }

    /// Record a telemetry message from a node. Sensor ids are qualified
    /// with the node id (`node-a/moisture_front`).
    pub fn record_moisture(&mut self, node_id: &str, readings: &[MoistureMsg]) {
        let detail = format!(
            "{node_id}: {}",
            readings
                .iter()
                .map(|r| format!("{}={}", r.sensor_id, r.value_state()))
                .collect::<Vec<_>>()
                .join(", ")
        );

        for r in readings {
            self.set_sensor(&format!("{node_id}/{}", r.sensor_id), &r.value_state(), r.unit.clone());
        }

        self.push_event(EventKind::Reading, detail);
    }

    /// Store a single sensor's raw state.
    pub fn set_sensor(&mut self, sensor_id: &str, state: &str, unit: Option<String>) {
        self.sensors.insert(
            sensor_id.to_string(),
            SensorState {
                state: state.to_string(),
                unit,
                last_seen: OffsetDateTime::now_utc(),
            },
        );
    }

    /// Record a weather report from a station.
    pub fn record_weather(&mut self, station: &str, msg: &WeatherMsg) {
        self.weather = Some(WeatherState {
            station: station.to_string(),
            condition: msg.condition.clone(),
            temperature: msg.temperature,
            humidity: msg.humidity,
            precipitation: msg.precipitation,
            last_seen: OffsetDateTime::now_utc(),
        });
        self.push_event(
            EventKind::Weather,
            format!(
                "{station}: {} precipitation={}mm",
                msg.condition, msg.precipitation
            ),
        );
    }

    /// Record a valve state change.
    pub fn record_valve(&mut self, zone_id: &str, on: bool) {
        if let Some(zone) = self.zones.get_mut(zone_id) {
            let now = OffsetDateTime::now_utc();
            zone.on = on;
            zone.last_changed = Some(now);
            if on {
                zone.last_watered = Some(now);
            }
        }

        let state_str = if on { "ON" } else { "OFF" };
        self.push_event(EventKind::Valve, format!("{zone_id} set {state_str}"));
    }

    /// Remember the duration of the most recent automatic run of a zone.
    pub fn record_watering(&mut self, zone_id: &str, duration_min: u32) {
        if let Some(zone) = self.zones.get_mut(zone_id) {
            zone.duration_min = duration_min;
        }
        self.push_event(
            EventKind::Scheduler,
            format!("{zone_id}: watering for {duration_min}min"),
        );
    }

    /// Record a scheduler decision.
    pub fn record_scheduler(&mut self, detail: String) {
        self.push_event(EventKind::Scheduler, detail);
    }

    /// Record an error event.
    pub fn record_error(&mut self, detail: String) {
        self.push_event(EventKind::Error, detail);
    }

    /// Record a generic system event.
    pub fn record_system(&mut self, detail: String) {
        self.push_event(EventKind::System, detail);
    }

    /// Build the JSON-serialisable status snapshot.
    pub fn to_status(&self) -> StatusResponse {
        StatusResponse {
            uptime_secs: self.started_at.elapsed().as_secs(),
            mqtt_connected: self.mqtt_connected,
            zones: self.zones.clone(),
            sensors: self.sensors.clone(),
            weather: self.weather.clone(),
            events: self.events.iter().rev().cloned().collect(),
        }
    }

    fn push_event(&mut self, kind: EventKind, detail: String) {
        if self.events.len() >= MAX_EVENTS {
            self.events.pop_front();
        }
        self.events.push_back(SystemEvent {
            ts: OffsetDateTime::now_utc(),
            kind,
            detail,
        });
    }
}

impl StateProvider for SystemState {
    fn zone_state(&self, zone_id: &str) -> Option<ZoneStatus> {
        self.zones.get(zone_id).map(|z| ZoneStatus {
            on: z.on,
            last_watered: z.last_watered,
            duration_min: z.duration_min,
        })
    }

    fn moisture(&self, sensor_id: &str) -> Option<RawMoisture> {
        self.sensors.get(sensor_id).map(|s| RawMoisture {
            state: s.state.clone(),
            unit: s.unit.clone(),
        })
    }

    fn weather(&self) -> Option<WeatherSnapshot> {
        self.weather.as_ref().map(|w| WeatherSnapshot {
            condition: w.condition.clone(),
            temperature: w.temperature,
            humidity: w.humidity,
            precipitation: w.precipitation,
        })
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn state() -> SystemState {
        SystemState::new(&[("lawn".to_string(), 17), ("beds".to_string(), 27)])
    }

    #[test]
    fn new_registers_zones_off() {
        let st = state();
        assert_eq!(st.zones.len(), 2);
        assert!(st.zones.values().all(|z| !z.on && z.last_watered.is_none()));
    }

    #[test]
    fn record_valve_on_sets_last_watered() {
        let mut st = state();
        st.record_valve("lawn", true);
        let z = &st.zones["lawn"];
        assert!(z.on);
        assert!(z.last_watered.is_some());

        st.record_valve("lawn", false);
        let z = &st.zones["lawn"];
        assert!(!z.on);
        assert!(z.last_watered.is_some(), "turning off keeps last_watered");
    }

    #[test]
    fn record_valve_unknown_zone_only_logs_event() {
        let mut st = state();
        st.record_valve("ghost", true);
        assert_eq!(st.zones.len(), 2);
        assert_eq!(st.events.len(), 1);
    }

    #[test]
    fn record_moisture_qualifies_sensor_ids() {
        let mut st = state();
        let readings: Vec<MoistureMsg> = serde_json::from_value(json!([
            {"sensor_id": "moisture_front", "value": 21.5, "unit": "%"},
            {"sensor_id": "moisture_back", "value": "unavailable"}
        ]))
        .unwrap();
        st.record_moisture("node-a", &readings);

        let front = st.moisture("node-a/moisture_front").unwrap();
        assert_eq!(front.state, "21.5");
        assert_eq!(front.unit.as_deref(), Some("%"));
        assert_eq!(st.moisture("node-a/moisture_back").unwrap().state, "unavailable");
        assert!(st.moisture("moisture_front").is_none());
    }

    #[test]
    fn record_weather_feeds_provider() {
        let mut st = state();
        assert!(st.weather().is_none());

        let msg: WeatherMsg =
            serde_json::from_value(json!({"condition": "rainy", "precipitation": 6.0})).unwrap();
        st.record_weather("home", &msg);

        let w = st.weather().unwrap();
        assert_eq!(w.condition, "rainy");
        assert_eq!(w.precipitation, 6.0);
        assert_eq!(w.temperature, None);
    }

    #[test]
    fn record_watering_updates_duration() {
        let mut st = state();
        st.record_watering("lawn", 15);
        assert_eq!(st.zone_state("lawn").unwrap().duration_min, 15);
        assert_eq!(st.events.back().unwrap().kind, EventKind::Scheduler);
    }

    #[test]
    fn event_ring_is_bounded() {
        let mut st = state();
        for i in 0..(MAX_EVENTS + 10) {
            st.record_system(format!("event {i}"));
        }
        assert_eq!(st.events.len(), MAX_EVENTS);
        assert_eq!(st.events.front().unwrap().detail, "event 10");
    }

    #[test]
    fn status_lists_newest_event_first() {
        let mut st = state();
        st.record_system("first".into());
        st.record_system("second".into());
        let status = st.to_status();
        assert_eq!(status.events[0].detail, "second");
    }
}
