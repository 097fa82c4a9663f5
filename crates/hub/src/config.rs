//! TOML config file loading and validation for zones, moisture sensors and
//! the irrigation thresholds.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashSet;

pub const DEFAULT_WATERING_DURATION_MIN: u32 = 30;
pub const DEFAULT_MOISTURE_THRESHOLD: f64 = 30.0;
pub const DEFAULT_RAIN_THRESHOLD_MM: f64 = 5.0;
pub const DEFAULT_POLL_INTERVAL_MIN: u64 = 5;
pub const MAX_POLL_INTERVAL_MIN: i64 = 24 * 60;

// ---------------------------------------------------------------------------
// Config file structures
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub irrigation: IrrigationSection,
    #[serde(default)]
    pub weather: WeatherSection,
    #[serde(default)]
    pub zones: Vec<ZoneEntry>,
    #[serde(default)]
    pub moisture_sensors: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct IrrigationSection {
    pub watering_duration_min: i64,
    pub moisture_threshold: f64,
    pub rain_threshold_mm: f64,
    pub poll_interval_min: i64,
}

impl Default for IrrigationSection {
    fn default() -> Self {
        Self {
            watering_duration_min: DEFAULT_WATERING_DURATION_MIN as i64,
            moisture_threshold: DEFAULT_MOISTURE_THRESHOLD,
            rain_threshold_mm: DEFAULT_RAIN_THRESHOLD_MM,
            poll_interval_min: DEFAULT_POLL_INTERVAL_MIN as i64,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct WeatherSection {
    pub station: String,
}

impl Default for WeatherSection {
    fn default() -> Self {
        Self {
            station: "home".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ZoneEntry {
    pub zone_id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub valve_gpio_pin: i64,
}

impl ZoneEntry {
    /// Configured name, or one derived from the identifier
    /// (`switch.lawn_front` -> `Lawn Front`).
    pub fn display_name(&self) -> String {
        match self.name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => derive_zone_name(&self.zone_id),
        }
    }
}

fn derive_zone_name(zone_id: &str) -> String {
    zone_id
        .strip_prefix("switch.")
        .unwrap_or(zone_id)
        .split('_')
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

// ---------------------------------------------------------------------------
// Validated, immutable controller configuration
// ---------------------------------------------------------------------------

/// What the controller is built from. Only produced from a validated
/// [`Config`], so the controller never re-checks ranges.
#[derive(Debug, Clone, PartialEq)]
pub struct IrrigationConfig {
    pub zones: Vec<String>,
    pub moisture_sensors: Vec<String>,
    pub watering_duration_min: u32,
    pub moisture_threshold: f64,
    pub rain_threshold_mm: f64,
}

// ---------------------------------------------------------------------------
// GPIO whitelist
// ---------------------------------------------------------------------------

/// BCM GPIO pins available on the Raspberry Pi 40-pin header for general
/// use. GPIO 0-1 are reserved for the ID EEPROM and must never be used.
/// GPIO 28+ are not exposed on the standard header.
const VALID_GPIO_PINS: &[i64] = &[
    2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20, 21, 22, 23, 24, 25, 26, 27,
];

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl Config {
    /// Validate all config entries. Returns `Ok(())` or an error describing
    /// every violation found (not just the first one).
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        self.validate_irrigation(&mut errors);
        self.validate_zones(&mut errors);
        self.validate_sensors(&mut errors);

        if self.weather.station.trim().is_empty() {
            errors.push("weather: station is empty".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            bail!(
                "config validation failed ({} error{}):\n  - {}",
                errors.len(),
                if errors.len() == 1 { "" } else { "s" },
                errors.join("\n  - ")
            );
        }
    }

    fn validate_irrigation(&self, errors: &mut Vec<String>) {
        let irr = &self.irrigation;

        if !(1..=120).contains(&irr.watering_duration_min) {
            errors.push(format!(
                "irrigation: watering_duration_min {} out of range [1, 120]",
                irr.watering_duration_min
            ));
        }
        if !(0.0..=100.0).contains(&irr.moisture_threshold) {
            errors.push(format!(
                "irrigation: moisture_threshold {} out of range [0, 100]",
                irr.moisture_threshold
            ));
        }
        if !(0.0..=50.0).contains(&irr.rain_threshold_mm) {
            errors.push(format!(
                "irrigation: rain_threshold_mm {} out of range [0, 50]",
                irr.rain_threshold_mm
            ));
        }
        if irr.poll_interval_min <= 0 {
            errors.push(format!(
                "irrigation: poll_interval_min must be positive, got {}",
                irr.poll_interval_min
            ));
        } else if irr.poll_interval_min > MAX_POLL_INTERVAL_MIN {
            errors.push(format!(
                "irrigation: poll_interval_min {} exceeds {MAX_POLL_INTERVAL_MIN}",
                irr.poll_interval_min
            ));
        }
    }

    fn validate_zones(&self, errors: &mut Vec<String>) {
        if self.zones.is_empty() {
            errors.push("no zones configured".to_string());
            return;
        }

        let mut seen_ids: HashSet<&str> = HashSet::new();
        let mut seen_pins: HashSet<i64> = HashSet::new();

        for (i, z) in self.zones.iter().enumerate() {
            let ctx = || {
                if z.zone_id.is_empty() {
                    format!("zones[{i}]")
                } else {
                    format!("zone '{}'", z.zone_id)
                }
            };

            if z.zone_id.trim().is_empty() {
                errors.push(format!("{}: zone_id is empty", ctx()));
            } else if !seen_ids.insert(&z.zone_id) {
                errors.push(format!("{}: duplicate zone_id", ctx()));
            }

            if !VALID_GPIO_PINS.contains(&z.valve_gpio_pin) {
                errors.push(format!(
                    "{}: valve_gpio_pin {} is not a valid BCM GPIO pin (allowed: 2-27)",
                    ctx(),
                    z.valve_gpio_pin
                ));
            } else if !seen_pins.insert(z.valve_gpio_pin) {
                errors.push(format!(
                    "{}: valve_gpio_pin {} is already used by another zone",
                    ctx(),
                    z.valve_gpio_pin
                ));
            }
        }
    }

    fn validate_sensors(&self, errors: &mut Vec<String>) {
        let mut seen_ids: HashSet<&str> = HashSet::new();

        for (i, s) in self.moisture_sensors.iter().enumerate() {
            if s.trim().is_empty() {
                errors.push(format!("moisture_sensors[{i}]: sensor id is empty"));
            } else if !seen_ids.insert(s) {
                errors.push(format!("sensor '{s}': duplicate sensor id"));
            }
        }
    }

    /// Zone -> GPIO pin pairs for the valve board.
    pub fn zone_pins(&self) -> Vec<(String, u8)> {
        self.zones
            .iter()
            .map(|z| (z.zone_id.clone(), z.valve_gpio_pin as u8))
            .collect()
    }

    /// Build the controller's configuration. Call only after [`validate`].
    ///
    /// [`validate`]: Config::validate
    pub fn irrigation(&self) -> IrrigationConfig {
        IrrigationConfig {
            zones: self.zones.iter().map(|z| z.zone_id.clone()).collect(),
            moisture_sensors: self.moisture_sensors.clone(),
            watering_duration_min: self.irrigation.watering_duration_min as u32,
            moisture_threshold: self.irrigation.moisture_threshold,
            rain_threshold_mm: self.irrigation.rain_threshold_mm,
        }
    }

    pub fn poll_interval_secs(&self) -> u64 {
        (self.irrigation.poll_interval_min.max(0) as u64).saturating_mul(60)
    }
}

// ---------------------------------------------------------------------------
// Load
// ---------------------------------------------------------------------------

/// Read, parse, and validate a TOML config file.
pub fn load(path: &str) -> Result<Config> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("failed to read config: {path}"))?;
    parse(&contents).with_context(|| format!("invalid config: {path}"))
}

/// Parse and validate config text.
pub fn parse(contents: &str) -> Result<Config> {
    let config: Config = toml::from_str(contents).context("failed to parse config")?;
    config.validate()?;
    tracing::info!(
        zones = config.zones.len(),
        sensors = config.moisture_sensors.len(),
        duration_min = config.irrigation.watering_duration_min,
        "config loaded"
    );
    Ok(config)
}

// ===========================================================================
// Tests
// ===========================================================================
