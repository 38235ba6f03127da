//! Merging a peer's snapshot into the local field state
//!
//! Coherence is last-timestamp-wins. Harmonics from two snapshots taken
//! within the reconcile window merge per category by maximum rather than
//! by addition. Bridges push the full snapshot on every sync interval, so
//! an additive merge would count the same contribution once per push;
//! with max, receiving the same snapshot again changes nothing. Outside
//! the window the newer snapshot's harmonics replace the older ones.

use chrono::Duration;

use super::state::{clamp_coherence, FieldState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Nothing changed locally.
    Unchanged,
    /// Only harmonics were raised from the remote snapshot.
    HarmonicsMerged,
    /// The remote snapshot was newer and its coherence was adopted.
    RemoteAdopted,
}

pub fn merge(local: &mut FieldState, remote: &FieldState, window: Duration) -> MergeOutcome {
    let remote_newer = remote.last_updated_at > local.last_updated_at;
    let within_window = (remote.last_updated_at - local.last_updated_at).abs() <= window;

    let mut harmonics_changed = false;
    if within_window {
        for (category, remote_value) in &remote.harmonics {
            let remote_value = remote_value.max(0.0);
            let entry = local.harmonics.entry(*category).or_insert(0.0);
            if remote_value > *entry {
                *entry = remote_value;
                harmonics_changed = true;
            }
        }
    } else if remote_newer {
        for (category, value) in local.harmonics.iter_mut() {
            *value = remote.harmonics.get(category).copied().unwrap_or(0.0).max(0.0);
        }
        harmonics_changed = true;
    }

    if remote_newer {
        local.coherence = clamp_coherence(remote.coherence);
        local.last_updated_at = remote.last_updated_at;
        MergeOutcome::RemoteAdopted
    } else if harmonics_changed {
        MergeOutcome::HarmonicsMerged
    } else {
        MergeOutcome::Unchanged
    }
}
