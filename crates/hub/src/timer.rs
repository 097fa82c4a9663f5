//! Zone actuation with timed automatic shutoff.
//!
//! Each watering zone owns at most one pending shutoff, kept in a task table
//! keyed by zone id. A shutoff is a spawned tokio task sleeping until its
//! fire time; its `AbortHandle` is the cancellation handle.
//!
//! Cancellation and firing race on the table lock. A firing task only acts
//! if its own entry (matched by task id) is still in the table. So either
//! the cancel removed the entry first and the fire is a no-op, or the fire
//! won and a later cancel finds nothing to do.
//!
//! Commands for one zone are ordered by a per-zone gate. `start`, `stop`
//! and a firing shutoff hold it across their actuator calls, and the task
//! entry stays in the table until its `OFF` has been sent. A restart can
//! therefore never be overtaken by the previous run's shutoff.

use anyhow::{bail, Result};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::actuator::Actuator;

type TaskTable = Arc<Mutex<HashMap<String, WateringTask>>>;
type Gate = Arc<tokio::sync::Mutex<()>>;

struct WateringTask {
    id: u64,
    duration_min: u32,
    fires_at: Instant,
    handle: AbortHandle,
}

/// A pending automatic shutoff, for status display.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PendingShutoff {
    pub zone_id: String,
    pub duration_min: u32,
    pub remaining_secs: u64,
}

pub struct TimerManager<A> {
    actuator: Arc<A>,
    zones: Vec<String>,
    tasks: TaskTable,
    gates: Mutex<HashMap<String, Gate>>,
    next_id: AtomicU64,
}

fn lock(tasks: &TaskTable) -> MutexGuard<'_, HashMap<String, WateringTask>> {
    tasks.lock().unwrap_or_else(|e| e.into_inner())
}

impl<A: Actuator> TimerManager<A> {
    /// `zones` is the full configured set; `stop_all` switches all of them off.
    pub fn new(actuator: Arc<A>, zones: Vec<String>) -> Self {
        Self {
            actuator,
            zones,
            tasks: Arc::new(Mutex::new(HashMap::new())),
            gates: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Turn a zone on and schedule its shutoff `duration_min` from now,
    /// replacing any shutoff already pending for it.
    ///
    /// The shutoff is scheduled even when the `ON` command fails, so a
    /// command that did reach the valve still gets turned off. The `ON`
    /// error is returned to the caller.
    pub async fn start(&self, zone_id: &str, duration_min: u32) -> Result<()> {
        let gate = self.gate(zone_id);
        let _turn = gate.lock().await;

        if self.cancel(zone_id) {
            debug!(zone = %zone_id, "replacing pending shutoff");
        }

        let result = self.actuator.set(zone_id, true).await;
        if let Err(e) = &result {
            error!(zone = %zone_id, "failed to turn zone on: {e:#}");
        }

        self.schedule_shutoff(zone_id, duration_min, Arc::clone(&gate));
        info!(zone = %zone_id, duration_min, "zone watering started");
        result
    }

    /// Cancel a zone's pending shutoff, if any, and turn it off now.
    pub async fn stop(&self, zone_id: &str) -> Result<()> {
        let gate = self.gate(zone_id);
        let _turn = gate.lock().await;

        self.cancel(zone_id);
        self.actuator.set(zone_id, false).await
    }

    /// Cancel every pending shutoff, then turn every configured zone off.
    /// All zones are attempted; failures are reported together at the end.
    pub async fn stop_all(&self) -> Result<()> {
        let cancelled = {
            let mut table = lock(&self.tasks);
            let n = table.len();
            for (_, task) in table.drain() {
                task.handle.abort();
            }
            n
        };
        info!(cancelled, zones = self.zones.len(), "stopping all zones");

        let mut failed = Vec::new();
        for zone_id in &self.zones {
            if let Err(e) = self.actuator.set(zone_id, false).await {
                error!(zone = %zone_id, "failed to turn zone off: {e:#}");
                failed.push(zone_id.as_str());
            }
        }

        if failed.is_empty() {
            Ok(())
        } else {
            bail!("failed to turn off zone(s): {}", failed.join(", "));
        }
    }

    #[cfg(test)]
    pub fn has_pending(&self, zone_id: &str) -> bool {
        lock(&self.tasks).contains_key(zone_id)
    }

    #[cfg(test)]
    pub fn fires_at(&self, zone_id: &str) -> Option<Instant> {
        lock(&self.tasks).get(zone_id).map(|t| t.fires_at)
    }

    pub fn pending(&self) -> Vec<PendingShutoff> {
        let now = Instant::now();
        let mut pending: Vec<_> = lock(&self.tasks)
            .iter()
            .map(|(zone_id, t)| PendingShutoff {
                zone_id: zone_id.clone(),
                duration_min: t.duration_min,
                remaining_secs: t.fires_at.saturating_duration_since(now).as_secs(),
            })
            .collect();
        pending.sort_by(|a, b| a.zone_id.cmp(&b.zone_id));
        pending
    }

    fn gate(&self, zone_id: &str) -> Gate {
        let mut gates = self.gates.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(gates.entry(zone_id.to_string()).or_default())
    }

    /// Remove and abort a zone's pending task. Returns whether there was one.
    fn cancel(&self, zone_id: &str) -> bool {
        match lock(&self.tasks).remove(zone_id) {
            Some(task) => {
                task.handle.abort();
                true
            }
            None => false,
        }
    }

    fn schedule_shutoff(&self, zone_id: &str, duration_min: u32, gate: Gate) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let fires_at = Instant::now() + Duration::from_secs(u64::from(duration_min) * 60);
        let zone = zone_id.to_string();
        let tasks = Arc::clone(&self.tasks);
        let actuator = Arc::clone(&self.actuator);

        // Spawn under the lock so the task cannot look itself up before its
        // entry exists.
        let mut table = lock(&self.tasks);
        let handle = tokio::spawn(async move {
            tokio::time::sleep_until(fires_at).await;
            fire(zone, id, tasks, actuator, gate).await;
        })
        .abort_handle();

        let task = WateringTask {
            id,
            duration_min,
            fires_at,
            handle,
        };
        if let Some(old) = table.insert(zone_id.to_string(), task) {
            old.handle.abort();
        }
    }
}

async fn fire<A: Actuator>(
    zone_id: String,
    id: u64,
    tasks: TaskTable,
    actuator: Arc<A>,
    gate: Gate,
) {
    let _turn = gate.lock().await;

    let owns = |table: &HashMap<String, WateringTask>| {
        table.get(&zone_id).is_some_and(|task| task.id == id)
    };
    if !owns(&*lock(&tasks)) {
        debug!(zone = %zone_id, "shutoff superseded, nothing to do");
        return;
    }

    let mut result = actuator.set(&zone_id, false).await;
    if let Err(e) = &result {
        warn!(zone = %zone_id, "automatic shutoff failed, retrying once: {e:#}");
        result = actuator.set(&zone_id, false).await;
    }

    {
        let mut table = lock(&tasks);
        if owns(&*table) {
            table.remove(&zone_id);
        }
    }

    match result {
        Ok(()) => info!(zone = %zone_id, "zone watering finished"),
        Err(e) => error!(zone = %zone_id, "automatic shutoff failed: {e:#}"),
    }
}

// ===========================================================================
// Tests
// ===========================================================================
