//! Zone valve relays. The `gpio` feature drives real relays through rppal;
//! without it each relay is a logging stand-in that only remembers its state.

use anyhow::{bail, Result};
use std::collections::BTreeMap;
use tracing::info;

#[cfg(feature = "gpio")]
use rppal::gpio::{Gpio, OutputPin};

// ---------------------------------------------------------------------------
// Relay (one per zone)
// ---------------------------------------------------------------------------

#[cfg(feature = "gpio")]
struct Relay {
    pin: OutputPin,
    active_low: bool, // many relay boards switch on a LOW level
    on: bool,
}

#[cfg(feature = "gpio")]
impl Relay {
    fn open(gpio: &Gpio, pin_num: u8, active_low: bool) -> Result<Self> {
        let pin = gpio.get(pin_num)?.into_output();
        let mut relay = Self {
            pin,
            active_low,
            on: true,
        };
        relay.drive(false);
        Ok(relay)
    }

    fn drive(&mut self, on: bool) {
        // LOW = ON for active-low boards, HIGH = ON otherwise
        if on != self.active_low {
            self.pin.set_high();
        } else {
            self.pin.set_low();
        }
        self.on = on;
    }
}

#[cfg(not(feature = "gpio"))]
struct Relay {
    pin_num: u8,
    on: bool,
}

#[cfg(not(feature = "gpio"))]
impl Relay {
    fn open(pin_num: u8) -> Self {
        info!(gpio = pin_num, "[mock-gpio] relay registered (not wired)");
        Self { pin_num, on: false }
    }

    fn drive(&mut self, on: bool) {
        self.on = on;
    }
}

// ---------------------------------------------------------------------------
// Board
// ---------------------------------------------------------------------------

pub(crate) struct ValveBoard {
    relays: BTreeMap<String, Relay>,
}

impl ValveBoard {
    /// Claim one relay per zone. Every relay starts OFF.
    #[cfg(feature = "gpio")]
    pub(crate) fn new(zone_pins: &[(String, u8)], active_low: bool) -> Result<Self> {
        let gpio = Gpio::new()?;
        let mut relays = BTreeMap::new();
        for (zone_id, pin_num) in zone_pins {
            relays.insert(zone_id.clone(), Relay::open(&gpio, *pin_num, active_low)?);
        }
        info!(zones = relays.len(), active_low, "valve board initialised");
        Ok(Self { relays })
    }

    /// Claim one relay per zone. Every relay starts OFF.
    #[cfg(not(feature = "gpio"))]
    pub(crate) fn new(zone_pins: &[(String, u8)], _active_low: bool) -> Result<Self> {
        let relays: BTreeMap<String, Relay> = zone_pins
            .iter()
            .map(|(zone_id, pin_num)| (zone_id.clone(), Relay::open(*pin_num)))
            .collect();
        info!(zones = relays.len(), "[mock-gpio] valve board initialised (no hardware)");
        Ok(Self { relays })
    }

    pub(crate) fn set(&mut self, zone_id: &str, on: bool) -> Result<()> {
        let Some(relay) = self.relays.get_mut(zone_id) else {
            bail!("unknown zone_id '{zone_id}'");
        };
        relay.drive(on);
        info!(zone = %zone_id, "valve set {}", if on { "ON" } else { "OFF" });
        Ok(())
    }

    /// Switch every relay off. Returns the zones that were on.
    pub(crate) fn all_off(&mut self) -> Vec<String> {
        let mut were_on = Vec::new();
        for (zone_id, relay) in self.relays.iter_mut() {
            if relay.on {
                were_on.push(zone_id.clone());
            }
            relay.drive(false);
        }
        if !were_on.is_empty() {
            info!(zones = ?were_on, "all valves off");
        }
        were_on
    }

    #[cfg(test)]
    pub(crate) fn is_on(&self, zone_id: &str) -> Option<bool> {
        self.relays.get(zone_id).map(|r| r.on)
    }

    pub(crate) fn len(&self) -> usize {
        self.relays.len()
    }
}

// ===========================================================================
// Tests
// ===========================================================================
