//! Cascade prevention: correlation-chain cycle detection, depth limiting,
//! and cooldown (C8, §4.8).
//!
//! Replaces structural graph analysis with cheap, per-correlation O(1)
//! bookkeeping: an insertion-ordered `(agent_id -> depth)` map per chain,
//! plus a separate per-agent cooldown timestamp ledger whose expiry is
//! checked lazily on each `can_run` call rather than swept on a timer.

use crate::error::AdmissionRejection;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

struct ChainEntry {
    order: Vec<String>,
    depths: HashMap<String, u32>,
    last_touched: DateTime<Utc>,
}

impl ChainEntry {
    fn new() -> Self {
        Self {
            order: Vec::new(),
            depths: HashMap::new(),
            last_touched: Utc::now(),
        }
    }

    fn contains(&self, agent_id: &str) -> bool {
        self.depths.contains_key(agent_id)
    }

    fn depth(&self) -> u32 {
        self.order.len() as u32
    }
}

/// Outcome of an admission check (§4.7's `AdmissionCheck` state).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allow,
    Reject(AdmissionRejection),
}

/// Bounded, in-memory cascade ledger (C8).
pub struct CascadeGuard {
    chains: Mutex<HashMap<String, ChainEntry>>,
    cooldowns: Mutex<HashMap<String, DateTime<Utc>>>,
    max_chain_depth: u32,
    cooldown_ms: i64,
    correlation_ttl_ms: i64,
}

impl CascadeGuard {
    pub fn new(max_chain_depth: u32, cooldown_ms: u64, correlation_ttl_ms: u64) -> Self {
        Self {
            chains: Mutex::new(HashMap::new()),
            cooldowns: Mutex::new(HashMap::new()),
            max_chain_depth,
            cooldown_ms: cooldown_ms as i64,
            correlation_ttl_ms: correlation_ttl_ms as i64,
        }
    }

    /// Check, but do not record, whether `agent_id` may run under
    /// `correlation_id`. Evaluation order matches §4.7: cycle, then
    /// depth, then cooldown.
    pub fn can_run(&self, correlation_id: &str, agent_id: &str) -> Admission {
        self.gc_expired();

        {
            let chains = self.chains.lock().expect("lock poisoned");
            if let Some(chain) = chains.get(correlation_id) {
                if chain.contains(agent_id) {
                    return Admission::Reject(AdmissionRejection::Cycle);
                }
                if chain.depth() >= self.max_chain_depth {
                    return Admission::Reject(AdmissionRejection::Depth);
                }
            }
        }

        if self.cooldown_ms > 0 {
            let cooldowns = self.cooldowns.lock().expect("lock poisoned");
            if let Some(last) = cooldowns.get(agent_id) {
                let elapsed = Utc::now().signed_duration_since(*last).num_milliseconds();
                if elapsed < self.cooldown_ms {
                    return Admission::Reject(AdmissionRejection::Cooldown);
                }
            }
        }

        Admission::Allow
    }

    /// Atomically re-check and, if allowed, record `(agent_id, depth)`
    /// into the chain and refresh the cooldown timestamp.
    pub fn try_admit(&self, correlation_id: &str, agent_id: &str) -> Admission {
        self.gc_expired();

        let mut chains = self.chains.lock().expect("lock poisoned");
        let chain = chains
            .entry(correlation_id.to_string())
            .or_insert_with(ChainEntry::new);

        if chain.contains(agent_id) {
            return Admission::Reject(AdmissionRejection::Cycle);
        }
        if chain.depth() >= self.max_chain_depth {
            return Admission::Reject(AdmissionRejection::Depth);
        }
        drop(chains);

        if self.cooldown_ms > 0 {
            let mut cooldowns = self.cooldowns.lock().expect("lock poisoned");
            if let Some(last) = cooldowns.get(agent_id) {
                let elapsed = Utc::now().signed_duration_since(*last).num_milliseconds();
                if elapsed < self.cooldown_ms {
                    return Admission::Reject(AdmissionRejection::Cooldown);
                }
            }
            cooldowns.insert(agent_id.to_string(), Utc::now());
        }

        let mut chains = self.chains.lock().expect("lock poisoned");
        let chain = chains
            .entry(correlation_id.to_string())
            .or_insert_with(ChainEntry::new);
        let depth = chain.depth() + 1;
        chain.order.push(agent_id.to_string());
        chain.depths.insert(agent_id.to_string(), depth);
        chain.last_touched = Utc::now();

        Admission::Allow
    }

    /// Drop correlation chains whose last activity exceeds `correlation_ttl_ms`.
    fn gc_expired(&self) {
        let mut chains = self.chains.lock().expect("lock poisoned");
        let now = Utc::now();
        chains.retain(|_, chain| {
            now.signed_duration_since(chain.last_touched).num_milliseconds() < self.correlation_ttl_ms
        });
    }

    /// Distinct agent ids currently recorded for `correlation_id`, for
    /// tests and observability.
    pub fn chain_members(&self, correlation_id: &str) -> HashSet<String> {
        self.chains
            .lock()
            .expect("lock poisoned")
            .get(correlation_id)
            .map(|chain| chain.order.iter().cloned().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_cycle_within_same_chain() {
        let guard = CascadeGuard::new(8, 0, 60_000);
        assert_eq!(guard.try_admit("C", "A1"), Admission::Allow);
        assert_eq!(guard.try_admit("C", "A2"), Admission::Allow);
        assert_eq!(
            guard.try_admit("C", "A1"),
            Admission::Reject(AdmissionRejection::Cycle)
        );
    }

    #[test]
    fn rejects_beyond_max_depth() {
        let guard = CascadeGuard::new(3, 0, 60_000);
        assert_eq!(guard.try_admit("C", "A1"), Admission::Allow);
        assert_eq!(guard.try_admit("C", "A2"), Admission::Allow);
        assert_eq!(guard.try_admit("C", "A3"), Admission::Allow);
        assert_eq!(
            guard.try_admit("C", "A4"),
            Admission::Reject(AdmissionRejection::Depth)
        );
    }

    #[test]
    fn rejects_within_cooldown_window() {
        let guard = CascadeGuard::new(8, 10_000, 60_000);
        assert_eq!(guard.try_admit("C1", "A1"), Admission::Allow);
        assert_eq!(
            guard.try_admit("C2", "A1"),
            Admission::Reject(AdmissionRejection::Cooldown)
        );
    }

    #[test]
    fn distinct_agents_never_collide() {
        let guard = CascadeGuard::new(8, 0, 60_000);
        assert_eq!(guard.try_admit("C", "A1"), Admission::Allow);
        assert_eq!(guard.try_admit("C", "A2"), Admission::Allow);
        assert_eq!(guard.chain_members("C").len(), 2);
    }
}
