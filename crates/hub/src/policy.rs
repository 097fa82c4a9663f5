//! Watering decision: pure functions of a snapshot and the threshold.

use crate::matcher;
use crate::snapshot::Snapshot;

/// A zone needs water when its resolved reading is below `threshold`.
/// A zone with no resolvable reading is never watered.
pub fn needs_watering(zone_id: &str, snapshot: &Snapshot, threshold: f64) -> bool {
    matcher::resolve(zone_id, snapshot).is_some_and(|r| r.level < threshold)
}

/// The subset of `zones`, in order, that need water in this snapshot.
pub fn zones_needing_water<'a, I>(zones: I, snapshot: &Snapshot, threshold: f64) -> Vec<String>
where
    I: IntoIterator<Item = &'a String>,
{
    zones
        .into_iter()
        .filter(|z| needs_watering(z, snapshot, threshold))
        .cloned()
        .collect()
}

// ===========================================================================
// Tests
// ===========================================================================
