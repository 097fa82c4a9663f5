//! Irrigation controller: the master switch and the automatic cycle.
//!
//! ```text
//! Idle ──[turn_on]──▶ Running ──[turn_off: stop_all]──▶ Idle
//!                       │
//!                       └── run_cycle(): snapshot ─▶ rain check ─▶ per-zone policy ─▶ timers
//! ```
//!
//! `turn_on`, `turn_off`, `run_cycle` and the manual overrides are
//! serialised on the master lock. Automatic shutoffs run on their own tasks
//! inside [`TimerManager`].

use anyhow::{bail, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use crate::actuator::Actuator;
use crate::config::IrrigationConfig;
use crate::matcher::{self, MatchKind};
use crate::policy;
use crate::snapshot::{self, Snapshot};
use crate::state::SharedState;
use crate::timer::{PendingShutoff, TimerManager};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Master {
    Idle,
    Running,
}

/// What a call to [`Controller::run_cycle`] did.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum CycleOutcome {
    /// Master switch is off; nothing evaluated.
    Idle,
    /// Precipitation above the rain threshold; no zone touched.
    RainAbort { precipitation_mm: f64 },
    Completed {
        started: Vec<String>,
        failed: Vec<String>,
        skipped: Vec<String>,
    },
}

/// Moisture the matcher assigned to a zone.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ZoneMoisture {
    pub sensor_id: String,
    pub level: f64,
    pub unit: String,
    pub stale: bool,
    pub matched_by: MatchKind,
}

#[derive(Debug, Serialize)]
pub struct ControllerStatus {
    pub master: Master,
    pub watering_duration_min: u32,
    pub moisture_threshold: f64,
    pub rain_threshold_mm: f64,
    pub zones_needing_water: Vec<String>,
    pub zone_moisture: BTreeMap<String, ZoneMoisture>,
    pub pending_shutoffs: Vec<PendingShutoff>,
    pub snapshot: Snapshot,
}

pub struct Controller<A> {
    config: IrrigationConfig,
    shared: SharedState,
    actuator: Arc<A>,
    timers: TimerManager<A>,
    master: Mutex<Master>,
}

impl<A: Actuator> Controller<A> {
    pub fn new(config: IrrigationConfig, shared: SharedState, actuator: Arc<A>) -> Self {
        let timers = TimerManager::new(Arc::clone(&actuator), config.zones.clone());
        Self {
            config,
            shared,
            actuator,
            timers,
            master: Mutex::new(Master::Idle),
        }
    }

    pub fn has_zone(&self, zone_id: &str) -> bool {
        self.config.zones.iter().any(|z| z == zone_id)
    }

    pub async fn master(&self) -> Master {
        *self.master.lock().await
    }

    /// Switch the master on and run one cycle immediately.
    pub async fn turn_on(&self) -> CycleOutcome {
        let mut master = self.master.lock().await;
        if *master == Master::Idle {
            info!("irrigation master on");
            self.shared
                .write()
                .await
                .record_system("irrigation master on".to_string());
        }
        *master = Master::Running;
        self.cycle().await
    }

    /// Switch the master off and stop every zone.
    pub async fn turn_off(&self) -> Result<()> {
        let mut master = self.master.lock().await;
        *master = Master::Idle;
        info!("irrigation master off, stopping all zones");

        let result = self.timers.stop_all().await;
        let mut st = self.shared.write().await;
        st.record_system("irrigation master off".to_string());
        if let Err(e) = &result {
            st.record_error(format!("stop all: {e:#}"));
        }
        result
    }

    /// One automatic pass. Does nothing while the master is off.
    pub async fn run_cycle(&self) -> CycleOutcome {
        let master = self.master.lock().await;
        if *master == Master::Idle {
            debug!("master off, cycle skipped");
            return CycleOutcome::Idle;
        }
        self.cycle().await
    }

    /// Turn a zone on outside the automatic cycle. No shutoff is scheduled.
    pub async fn manual_on(&self, zone_id: &str) -> Result<()> {
        self.manual(zone_id, true).await
    }

    /// Turn a zone off outside the automatic cycle.
    pub async fn manual_off(&self, zone_id: &str) -> Result<()> {
        self.manual(zone_id, false).await
    }

    /// Cancel a zone's pending automatic shutoff and turn it off now.
    pub async fn stop_zone(&self, zone_id: &str) -> Result<()> {
        let _master = self.master.lock().await;
        if !self.has_zone(zone_id) {
            bail!("unknown zone '{zone_id}'");
        }

        info!(zone = %zone_id, "stopping zone");
        let result = self.timers.stop(zone_id).await;

        let mut st = self.shared.write().await;
        match &result {
            Ok(()) => st.record_scheduler(format!("{zone_id}: stopped")),
            Err(e) => st.record_error(format!("{zone_id}: stop failed: {e:#}")),
        }
        result
    }

    async fn manual(&self, zone_id: &str, on: bool) -> Result<()> {
        let _master = self.master.lock().await;
        if !self.has_zone(zone_id) {
            bail!("unknown zone '{zone_id}'");
        }

        let state_str = if on { "ON" } else { "OFF" };
        info!(zone = %zone_id, "manual {state_str}");
        let result = self.actuator.set(zone_id, on).await;

        let mut st = self.shared.write().await;
        match &result {
            Ok(()) => st.record_scheduler(format!("{zone_id}: manual {state_str}")),
            Err(e) => st.record_error(format!("{zone_id}: manual {state_str} failed: {e:#}")),
        }
        result
    }

    /// Capture a fresh snapshot and report what the controller would do.
    pub async fn status(&self) -> ControllerStatus {
        let master = self.master().await;
        let snapshot = self.capture().await;

        let zones_needing_water = policy::zones_needing_water(
            &self.config.zones,
            &snapshot,
            self.config.moisture_threshold,
        );
        let zone_moisture = self
            .config
            .zones
            .iter()
            .filter_map(|zone_id| {
                let (kind, r) = matcher::resolve_with_kind(zone_id, &snapshot)?;
                Some((
                    zone_id.clone(),
                    ZoneMoisture {
                        sensor_id: r.sensor_id.clone(),
                        level: r.level,
                        unit: r.unit.clone(),
                        stale: r.stale,
                        matched_by: kind,
                    },
                ))
            })
            .collect();

        ControllerStatus {
            master,
            watering_duration_min: self.config.watering_duration_min,
            moisture_threshold: self.config.moisture_threshold,
            rain_threshold_mm: self.config.rain_threshold_mm,
            zones_needing_water,
            zone_moisture,
            pending_shutoffs: self.timers.pending(),
            snapshot,
        }
    }

    async fn capture(&self) -> Snapshot {
        let st = self.shared.read().await;
        snapshot::capture(&*st, &self.config)
    }

    /// The cycle body. Callers hold the master lock.
    async fn cycle(&self) -> CycleOutcome {
        let snapshot = self.capture().await;
        debug!(
            readings = snapshot.moisture.len(),
            active = ?snapshot.active_zones(),
            "cycle snapshot captured"
        );

        let precipitation = snapshot.weather.precipitation;
        if precipitation > self.config.rain_threshold_mm {
            info!(
                precipitation_mm = precipitation,
                rain_threshold_mm = self.config.rain_threshold_mm,
                "rain above threshold, cycle aborted"
            );
            self.shared.write().await.record_scheduler(format!(
                "cycle skipped: precipitation {precipitation}mm > {}mm",
                self.config.rain_threshold_mm
            ));
            return CycleOutcome::RainAbort {
                precipitation_mm: precipitation,
            };
        }

        let threshold = self.config.moisture_threshold;
        let duration = self.config.watering_duration_min;
        let mut started = Vec::new();
        let mut failed = Vec::new();
        let mut skipped = Vec::new();

        for zone_id in &self.config.zones {
            if !policy::needs_watering(zone_id, &snapshot, threshold) {
                debug!(
                    zone = %zone_id,
                    level = ?matcher::resolve(zone_id, &snapshot).map(|r| r.level),
                    "zone does not need water"
                );
                skipped.push(zone_id.clone());
                continue;
            }

            info!(
                zone = %zone_id,
                level = ?matcher::resolve(zone_id, &snapshot).map(|r| r.level),
                threshold,
                duration_min = duration,
                "zone needs water"
            );

            let result = self.timers.start(zone_id, duration).await;
            let mut st = self.shared.write().await;
            match result {
                Ok(()) => {
                    st.record_watering(zone_id, duration);
                    started.push(zone_id.clone());
                }
                Err(e) => {
                    error!(zone = %zone_id, "failed to start watering: {e:#}");
                    st.record_error(format!("{zone_id}: failed to start watering: {e:#}"));
                    failed.push(zone_id.clone());
                }
            }
        }

        CycleOutcome::Completed {
            started,
            failed,
            skipped,
        }
    }
}

/// Re-run the automatic cycle every `every`. Intended to be `tokio::spawn`-ed
/// from main; cycles are no-ops while the master is off.
pub async fn run_periodic<A: Actuator>(controller: Arc<Controller<A>>, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick is immediate; turn_on already runs its own cycle.
    ticker.tick().await;

    info!(interval_secs = every.as_secs(), "periodic cycle started");
    loop {
        ticker.tick().await;
        let outcome = controller.run_cycle().await;
        debug!(?outcome, "periodic cycle done");
    }
}

// ===========================================================================
// Tests
// ===========================================================================
