//! Circuit Breaker (§3, §4.9, §8 invariant 9)
//!
//! Per-`(agentId, toolName)` state machine: closed -> open on sustained
//! failure, open -> half-open after cooldown, half-open allows exactly one
//! probe. Each key is exclusively mutated under its own lock (§5).

use std::collections::HashMap;
use std::sync::RwLock;

use crate::clock::Clock;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct BreakerStatus {
    pub state: BreakerState,
    pub failure_count: u32,
    pub last_failure_at: Option<i64>,
    pub opened_at: Option<i64>,
}

struct BreakerEntry {
    state: BreakerState,
    failure_count: u32,
    last_failure_at: Option<i64>,
    opened_at: Option<i64>,
    half_open_probe_in_flight: bool,
}

impl Default for BreakerEntry {
    fn default() -> Self {
        Self {
            state: BreakerState::Closed,
            failure_count: 0,
            last_failure_at: None,
            opened_at: None,
            half_open_probe_in_flight: false,
        }
    }
}

pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub cooldown_ms: i64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown_ms: 30_000,
        }
    }
}

pub enum Permit {
    Allowed,
    Rejected,
}

pub struct CircuitBreakerRegistry {
    clock: Arc<dyn Clock>,
    config: CircuitBreakerConfig,
    entries: RwLock<HashMap<(String, String), BreakerEntry>>,
}

impl CircuitBreakerRegistry {
    pub fn new(clock: Arc<dyn Clock>, config: CircuitBreakerConfig) -> Self {
        Self {
            clock,
            config,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Call before invoking a tool. `Rejected` means the caller must short
    /// circuit with `{success:false, error:"circuit_open"}` without ever
    /// calling the handler.
    pub fn try_acquire(&self, agent_id: &str, tool: &str) -> Permit {
        let now = self.clock.now_ms();
        let key = (agent_id.to_string(), tool.to_string());
        let mut entries = self.entries.write().unwrap();
        let entry = entries.entry(key).or_default();

        match entry.state {
            BreakerState::Closed => Permit::Allowed,
            BreakerState::Open => {
                let opened_at = entry.opened_at.unwrap_or(now);
                if now - opened_at >= self.config.cooldown_ms {
                    entry.state = BreakerState::HalfOpen;
                    entry.half_open_probe_in_flight = true;
                    tracing::info!(agent_id, tool, "circuit half-open, allowing one probe");
                    Permit::Allowed
                } else {
                    Permit::Rejected
                }
            }
            BreakerState::HalfOpen => {
                if entry.half_open_probe_in_flight {
                    Permit::Rejected
                } else {
                    entry.half_open_probe_in_flight = true;
                    Permit::Allowed
                }
            }
        }
    }

    pub fn record_success(&self, agent_id: &str, tool: &str) {
        let key = (agent_id.to_string(), tool.to_string());
        let mut entries = self.entries.write().unwrap();
        let entry = entries.entry(key).or_default();
        entry.failure_count = 0;
        entry.state = BreakerState::Closed;
        entry.half_open_probe_in_flight = false;
    }

    pub fn record_failure(&self, agent_id: &str, tool: &str) {
        let now = self.clock.now_ms();
        let key = (agent_id.to_string(), tool.to_string());
        let mut entries = self.entries.write().unwrap();
        let entry = entries.entry(key).or_default();
        entry.last_failure_at = Some(now);
        entry.half_open_probe_in_flight = false;

        match entry.state {
            BreakerState::HalfOpen => {
                entry.state = BreakerState::Open;
                entry.opened_at = Some(now);
                tracing::warn!(agent_id, tool, "circuit probe failed, reopening");
            }
            BreakerState::Closed => {
                entry.failure_count += 1;
                if entry.failure_count >= self.config.failure_threshold {
                    entry.state = BreakerState::Open;
                    entry.opened_at = Some(now);
                    tracing::warn!(agent_id, tool, threshold = self.config.failure_threshold, "circuit opened");
                }
            }
            BreakerState::Open => {}
        }
    }

    pub fn status(&self, agent_id: &str, tool: &str) -> BreakerStatus {
        let key = (agent_id.to_string(), tool.to_string());
        let entries = self.entries.read().unwrap();
        match entries.get(&key) {
            Some(e) => BreakerStatus {
                state: e.state,
                failure_count: e.failure_count,
                last_failure_at: e.last_failure_at,
                opened_at: e.opened_at,
            },
            None => BreakerStatus {
                state: BreakerState::Closed,
                failure_count: 0,
                last_failure_at: None,
                opened_at: None,
            },
        }
    }
}
