//! Role leases
//!
//! A lease gives one caller exclusive hold of a named role. The holder keeps
//! it alive with heartbeats; a lease with no heartbeat for longer than the
//! timeout is stale and the next claim takes it over. Staleness is decided
//! at call time, so no background task is needed for correctness. `sweep`
//! only reclaims memory.
//!
//! Each role key is guarded by its own map shard lock through the
//! `DashMap` entry API, so operations on one key are linearizable while
//! different keys do not contend.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use tracing::{debug, info};

use crate::clock::Clock;
use crate::error::LeaseError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Lease {
    pub role: String,
    pub holder: String,
    pub claimed_at: DateTime<Utc>,
    pub last_heartbeat_at: DateTime<Utc>,
}

impl Lease {
    fn new(role: &str, holder: &str, now: DateTime<Utc>) -> Self {
        Self {
            role: role.to_string(),
            holder: holder.to_string(),
            claimed_at: now,
            last_heartbeat_at: now,
        }
    }

    /// Stale strictly after `timeout` without a heartbeat.
    pub fn is_stale(&self, now: DateTime<Utc>, timeout: chrono::Duration) -> bool {
        now - self.last_heartbeat_at > timeout
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum LeaseStatus {
    Free,
    #[serde(rename_all = "camelCase")]
    Held {
        holder: String,
        seconds_since_heartbeat: f64,
        stale: bool,
    },
}

pub struct LeaseManager {
    leases: DashMap<String, Lease>,
    timeout: chrono::Duration,
    clock: Arc<dyn Clock>,
}

impl LeaseManager {
    pub fn new(timeout: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            leases: DashMap::new(),
            timeout: chrono::Duration::from_std(timeout).unwrap_or(chrono::Duration::days(36_500)),
            clock,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout.to_std().unwrap_or(Duration::MAX)
    }

    /// Claim `role` for `caller`.
    ///
    /// Succeeds when the role is free, stale, or already held by `caller`
    /// (which counts as a heartbeat).
    pub fn claim(&self, role: &str, caller: &str) -> Result<(), LeaseError> {
        let now = self.clock.now();
        match self.leases.entry(role.to_string()) {
            Entry::Vacant(entry) => {
                entry.insert(Lease::new(role, caller, now));
                info!(role, holder = caller, "Role claimed");
                Ok(())
            }
            Entry::Occupied(mut entry) => {
                let lease = entry.get_mut();
                if lease.is_stale(now, self.timeout) {
                    info!(role, holder = caller, previous = %lease.holder, "Stale role reclaimed");
                    *lease = Lease::new(role, caller, now);
                    Ok(())
                } else if lease.holder == caller {
                    lease.last_heartbeat_at = now;
                    debug!(role, holder = caller, "Role re-claimed by holder");
                    Ok(())
                } else {
                    Err(LeaseError::RoleAlreadyHeld {
                        role: role.to_string(),
                        holder: lease.holder.clone(),
                    })
                }
            }
        }
    }

    pub fn heartbeat(&self, role: &str, caller: &str) -> Result<(), LeaseError> {
        let now = self.clock.now();
        match self.leases.get_mut(role) {
            Some(mut lease) if lease.holder == caller && !lease.is_stale(now, self.timeout) => {
                lease.last_heartbeat_at = now;
                Ok(())
            }
            _ => Err(not_holder(role, caller)),
        }
    }

    pub fn release(&self, role: &str, caller: &str) -> Result<(), LeaseError> {
        let now = self.clock.now();
        let removed = self.leases.remove_if(role, |_, lease| {
            lease.holder == caller && !lease.is_stale(now, self.timeout)
        });
        match removed {
            Some(_) => {
                info!(role, holder = caller, "Role released");
                Ok(())
            }
            None => Err(not_holder(role, caller)),
        }
    }

    pub fn status(&self, role: &str) -> LeaseStatus {
        let now = self.clock.now();
        match self.leases.get(role) {
            Some(lease) => LeaseStatus::Held {
                holder: lease.holder.clone(),
                seconds_since_heartbeat: (now - lease.last_heartbeat_at)
                    .to_std()
                    .map(|d| d.as_secs_f64())
                    .unwrap_or(0.0),
                stale: lease.is_stale(now, self.timeout),
            },
            None => LeaseStatus::Free,
        }
    }

    /// Whether `caller` currently holds a live lease on `role`.
    pub fn is_holder(&self, role: &str, caller: &str) -> bool {
        let now = self.clock.now();
        self.leases
            .get(role)
            .map(|l| l.holder == caller && !l.is_stale(now, self.timeout))
            .unwrap_or(false)
    }

    /// Drop stale leases, returning the roles that became free.
    pub fn sweep(&self) -> Vec<String> {
        let now = self.clock.now();
        let mut reclaimed = Vec::new();
        self.leases.retain(|role, lease| {
            if lease.is_stale(now, self.timeout) {
                reclaimed.push(role.clone());
                false
            } else {
                true
            }
        });
        if !reclaimed.is_empty() {
            info!(count = reclaimed.len(), roles = ?reclaimed, "Swept stale leases");
        }
        reclaimed
    }

    /// Current leases, stale ones included, ordered by role.
    pub fn leases(&self) -> Vec<Lease> {
        let mut all: Vec<Lease> = self.leases.iter().map(|l| l.value().clone()).collect();
        all.sort_by(|a, b| a.role.cmp(&b.role));
        all
    }
}

fn not_holder(role: &str, caller: &str) -> LeaseError {
    LeaseError::NotHolder {
        role: role.to_string(),
        caller: caller.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn manager() -> (LeaseManager, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        (LeaseManager::new(Duration::from_secs(120), clock.clone()), clock)
    }

    #[test]
    fn test_claim_free_role() {
        let (leases, _) = manager();
        assert_eq!(leases.status("writer"), LeaseStatus::Free);
        leases.claim("writer", "A").unwrap();
        assert!(leases.is_holder("writer", "A"));
    }

    #[test]
    fn test_reclaim_by_holder_refreshes() {
        let (leases, clock) = manager();
        leases.claim("writer", "A").unwrap();
        clock.advance(chrono::Duration::seconds(100));
        leases.claim("writer", "A").unwrap();
        clock.advance(chrono::Duration::seconds(100));

        // 200s since the first claim, 100s since the refresh
        assert!(leases.is_holder("writer", "A"));
        assert!(leases.claim("writer", "B").is_err());
    }

    #[test]
    fn test_staleness_boundary() {
        let (leases, clock) = manager();
        leases.claim("writer", "A").unwrap();

        clock.advance(chrono::Duration::seconds(120));
        assert_eq!(
            leases.claim("writer", "B"),
            Err(LeaseError::RoleAlreadyHeld {
                role: "writer".into(),
                holder: "A".into()
            })
        );

        clock.advance(chrono::Duration::milliseconds(1));
        leases.claim("writer", "B").unwrap();
        assert_eq!(
            leases.heartbeat("writer", "A"),
            Err(LeaseError::NotHolder {
                role: "writer".into(),
                caller: "A".into()
            })
        );
    }

    #[test]
    fn test_release_requires_holder() {
        let (leases, _) = manager();
        leases.claim("writer", "A").unwrap();
        assert!(leases.release("writer", "B").is_err());
        leases.release("writer", "A").unwrap();
        assert_eq!(leases.status("writer"), LeaseStatus::Free);
        assert!(leases.release("writer", "A").is_err());
    }

    #[test]
    fn test_status_reports_staleness() {
        let (leases, clock) = manager();
        leases.claim("writer", "A").unwrap();
        clock.advance(chrono::Duration::seconds(150));

        match leases.status("writer") {
            LeaseStatus::Held { holder, seconds_since_heartbeat, stale } => {
                assert_eq!(holder, "A");
                assert_eq!(seconds_since_heartbeat, 150.0);
                assert!(stale);
            }
            other => panic!("unexpected status {other:?}"),
        }
    }

    #[test]
    fn test_sweep_removes_only_stale() {
        let (leases, clock) = manager();
        leases.claim("old", "A").unwrap();
        clock.advance(chrono::Duration::seconds(100));
        leases.claim("fresh", "B").unwrap();
        clock.advance(chrono::Duration::seconds(30));

        assert_eq!(leases.sweep(), vec!["old".to_string()]);
        assert_eq!(leases.leases().len(), 1);
        assert_eq!(leases.leases()[0].holder, "B");
    }

    #[test]
    fn test_concurrent_claims_single_winner() {
        let (leases, _) = manager();
        let leases = Arc::new(leases);

        let handles: Vec<_> = (0..32)
            .map(|i| {
                let leases = leases.clone();
                std::thread::spawn(move || leases.claim("writer", &format!("node-{i}")).is_ok())
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }

    #[test]
    fn test_status_serializes_tagged() {
        let json = serde_json::to_value(LeaseStatus::Free).unwrap();
        assert_eq!(json["state"], "free");
    }
}
