use serde::Deserialize;
use serde_json::Value;

// ---------------------------------------------------------------------------
// MQTT message types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub(crate) struct MoistureMsg {
    pub(crate) sensor_id: String,
    /// Number, numeric string, or a sentinel such as `"unavailable"`.
    #[serde(default)]
    pub(crate) value: Value,
    #[serde(default)]
    pub(crate) unit: Option<String>,
}

impl MoistureMsg {
    /// The value as the host state string the snapshot reader interprets.
    pub(crate) fn value_state(&self) -> String {
        match &self.value {
            Value::String(s) => s.clone(),
            Value::Null => "unknown".to_string(),
            other => other.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct ReadingMsg {
    pub(crate) ts: i64,
    pub(crate) readings: Vec<MoistureMsg>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WeatherMsg {
    pub(crate) condition: String,
    #[serde(default)]
    pub(crate) temperature: Option<f64>,
    #[serde(default)]
    pub(crate) humidity: Option<f64>,
    #[serde(default)]
    pub(crate) precipitation: f64,
}

// ---------------------------------------------------------------------------
// Topic / payload helpers
// ---------------------------------------------------------------------------

/// Middle segment of a `<prefix>/<id>/<suffix>` topic.
fn topic_id<'a>(topic: &'a str, prefix: &str, suffix: &str) -> Option<&'a str> {
    let parts: Vec<&str> = topic.split('/').collect();
    if parts.len() == 3 && parts[0] == prefix && parts[2] == suffix && !parts[1].is_empty() {
        Some(parts[1])
    } else {
        None
    }
}

/// Extract node_id from "tele/<node_id>/reading".
pub(crate) fn extract_node_id(topic: &str) -> Option<&str> {
    topic_id(topic, "tele", "reading")
}

/// Extract station from "weather/<station>/report".
pub(crate) fn extract_station(topic: &str) -> Option<&str> {
    topic_id(topic, "weather", "report")
}

/// Extract zone_id from "valve/<zone_id>/set".
pub(crate) fn extract_zone_id(topic: &str) -> Option<&str> {
    topic_id(topic, "valve", "set")
}

pub(crate) fn valve_topic(zone_id: &str) -> String {
    format!("valve/{zone_id}/set")
}

pub(crate) fn valve_payload(on: bool) -> &'static [u8] {
    if on {
        b"ON"
    } else {
        b"OFF"
    }
}

/// Parse an "ON"/"OFF" payload into a bool (case-insensitive, trims whitespace).
pub(crate) fn parse_valve_command(payload: &[u8]) -> Result<bool, String> {
    let s = String::from_utf8_lossy(payload).trim().to_uppercase();
    match s.as_str() {
        "ON" => Ok(true),
        "OFF" => Ok(false),
        _ => Err(format!("unknown valve command '{s}'")),
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    // -- topics -------------------------------------------------------------

    #[test]
    fn extract_node_id_valid_topic() {
        assert_eq!(extract_node_id("tele/node-a/reading"), Some("node-a"));
    }

    #[test]
    fn extract_node_id_rejects_other_shapes() {
        assert_eq!(extract_node_id("foo/node-a/reading"), None);
        assert_eq!(extract_node_id("tele/node-a/status"), None);
        assert_eq!(extract_node_id("tele/reading"), None);
        assert_eq!(extract_node_id("tele/node-a/sub/reading"), None);
        assert_eq!(extract_node_id("tele//reading"), None);
        assert_eq!(extract_node_id(""), None);
    }

    #[test]
    fn extract_station_valid_topic() {
        assert_eq!(extract_station("weather/home/report"), Some("home"));
        assert_eq!(extract_station("weather/home/forecast"), None);
    }

    #[test]
    fn extract_zone_id_valid_topic() {
        assert_eq!(extract_zone_id("valve/lawn_front/set"), Some("lawn_front"));
        assert_eq!(extract_zone_id("pump/zone1/set"), None);
        assert_eq!(extract_zone_id("valve/set"), None);
    }

    #[test]
    fn valve_topic_round_trips_through_extract() {
        let topic = valve_topic("lawn_front");
        assert_eq!(extract_zone_id(&topic), Some("lawn_front"));
        assert_eq!(parse_valve_command(valve_payload(true)), Ok(true));
        assert_eq!(parse_valve_command(valve_payload(false)), Ok(false));
    }

    // -- parse_valve_command ------------------------------------------------

    #[test]
    fn parse_valve_command_case_and_whitespace() {
        assert_eq!(parse_valve_command(b"on"), Ok(true));
        assert_eq!(parse_valve_command(b"oFf"), Ok(false));
        assert_eq!(parse_valve_command(b"\tOFF\n"), Ok(false));
    }

    #[test]
    fn parse_valve_command_garbage() {
        assert!(parse_valve_command(b"TOGGLE").is_err());
        assert!(parse_valve_command(b"").is_err());
    }

    // -- payloads -----------------------------------------------------------

    #[test]
    fn reading_msg_accepts_numbers_and_strings() {
        let json = r#"{"ts":1700000000,"readings":[
            {"sensor_id":"a","value":21.5,"unit":"%"},
            {"sensor_id":"b","value":"33"},
            {"sensor_id":"c","value":"unavailable"},
            {"sensor_id":"d"}
        ]}"#;
        let msg: ReadingMsg = serde_json::from_str(json).unwrap();
        assert_eq!(msg.ts, 1700000000);
        let states: Vec<String> = msg.readings.iter().map(|r| r.value_state()).collect();
        assert_eq!(states, vec!["21.5", "33", "unavailable", "unknown"]);
        assert_eq!(msg.readings[0].unit.as_deref(), Some("%"));
        assert_eq!(msg.readings[1].unit, None);
    }

    #[test]
    fn reading_msg_missing_readings_fails() {
        assert!(serde_json::from_str::<ReadingMsg>(r#"{"ts":1}"#).is_err());
    }

    #[test]
    fn weather_msg_precipitation_defaults_to_zero() {
        let msg: WeatherMsg = serde_json::from_str(r#"{"condition":"sunny","temperature":24.0}"#).unwrap();
        assert_eq!(msg.precipitation, 0.0);
        assert_eq!(msg.temperature, Some(24.0));
        assert_eq!(msg.humidity, None);
    }
}
