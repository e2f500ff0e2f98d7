//! Cost Tracker (§3, §4, §8 invariant 6)
//!
//! Per-agent token -> USD conversion plus budget alerts, emitted through the
//! runtime's `EventBus` the same way the agency emits `agent:cost:*`
//! notifications. Alert firing is idempotent per `(agentId, kind)` (§5).

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use serde::Serialize;
use serde_json::json;

use crate::clock::Clock;
use crate::event_bus::EventBus;
use std::sync::Arc;

pub const SYSTEM_AGENT: &str = "SYSTEM";

#[derive(Debug, Clone, Default, Serialize)]
pub struct CostRecord {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_cost_usd: f64,
    pub calls: u64,
    pub last_call_at: i64,
}

#[derive(Debug, Clone, Copy)]
pub struct Budget {
    pub max_cost_usd: f64,
    pub alert_threshold: f64,
}

impl Default for Budget {
    fn default() -> Self {
        Self {
            max_cost_usd: 10.0,
            alert_threshold: 0.8,
        }
    }
}

/// USD per 1K tokens, input/output. Model-agnostic default; callers can
/// override per model with `set_rate`.
#[derive(Debug, Clone, Copy)]
pub struct Rate {
    pub input_per_1k: f64,
    pub output_per_1k: f64,
}

impl Default for Rate {
    fn default() -> Self {
        Self {
            input_per_1k: 0.003,
            output_per_1k: 0.015,
        }
    }
}

#[derive(Default)]
struct State {
    per_agent: HashMap<String, CostRecord>,
    global: CostRecord,
    budgets: HashMap<String, Budget>,
    rates: HashMap<String, Rate>,
    default_rate: Rate,
    alerts_emitted: HashSet<(String, &'static str)>,
}

pub struct CostTracker {
    clock: Arc<dyn Clock>,
    events: EventBus,
    state: RwLock<State>,
}

impl CostTracker {
    pub fn new(clock: Arc<dyn Clock>, events: EventBus) -> Self {
        Self {
            clock,
            events,
            state: RwLock::new(State::default()),
        }
    }

    pub fn set_budget(&self, agent_id: &str, budget: Budget) {
        let mut state = self.state.write().unwrap();
        state.budgets.insert(agent_id.to_string(), budget);
        state
            .alerts_emitted
            .retain(|(id, _)| id != agent_id);
    }

    pub fn set_rate(&self, model: &str, rate: Rate) {
        self.state.write().unwrap().rates.insert(model.to_string(), rate);
    }

    /// Resets an agent's cost record and alert state, effectively rolling
    /// over to a new budget period (§3: alerts fire at most once per period).
    pub fn reset_budget_period(&self, agent_id: &str) {
        let mut state = self.state.write().unwrap();
        state.per_agent.insert(agent_id.to_string(), CostRecord::default());
        state.alerts_emitted.retain(|(id, _)| id != agent_id);
    }

    pub fn record_cost(&self, agent_id: &str, model: &str, input_tokens: u64, output_tokens: u64) -> f64 {
        let now = self.clock.now_ms();
        let agent_id = if agent_id.is_empty() { SYSTEM_AGENT } else { agent_id };

        let (cost, warning_crossed, exceeded_crossed, budget) = {
            let mut state = self.state.write().unwrap();
            let rate = state
                .rates
                .get(model)
                .copied()
                .unwrap_or(state.default_rate);
            let cost = (input_tokens as f64 / 1000.0) * rate.input_per_1k
                + (output_tokens as f64 / 1000.0) * rate.output_per_1k;

            let entry = state.per_agent.entry(agent_id.to_string()).or_default();
            entry.input_tokens += input_tokens;
            entry.output_tokens += output_tokens;
            entry.total_cost_usd += cost;
            entry.calls += 1;
            entry.last_call_at = now;
            let total = entry.total_cost_usd;

            state.global.input_tokens += input_tokens;
            state.global.output_tokens += output_tokens;
            state.global.total_cost_usd += cost;
            state.global.calls += 1;
            state.global.last_call_at = now;

            let budget = state.budgets.get(agent_id).copied();
            let (warn, exceed) = match budget {
                Some(b) => {
                    let warn_key = (agent_id.to_string(), "budget_warning");
                    let exceed_key = (agent_id.to_string(), "budget_exceeded");
                    let warn_crossed = total >= b.alert_threshold * b.max_cost_usd
                        && !state.alerts_emitted.contains(&warn_key);
                    let exceed_crossed =
                        total >= b.max_cost_usd && !state.alerts_emitted.contains(&exceed_key);
                    if warn_crossed {
                        state.alerts_emitted.insert(warn_key);
                    }
                    if exceed_crossed {
                        state.alerts_emitted.insert(exceed_key);
                    }
                    (warn_crossed, exceed_crossed)
                }
                None => (false, false),
            };
            (cost, warn, exceed, budget)
        };

        if let Some(budget) = budget {
            if warning_crossed {
                tracing::warn!(agent_id, "cost budget warning threshold crossed");
                self.events.publish(
                    "agent:cost:budget_warning",
                    json!({"agentId": agent_id, "maxCostUsd": budget.max_cost_usd}),
                );
            }
            if exceeded_crossed {
                tracing::warn!(agent_id, "cost budget exceeded");
                self.events.publish(
                    "agent:cost:budget_exceeded",
                    json!({"agentId": agent_id, "maxCostUsd": budget.max_cost_usd}),
                );
            }
        }

        cost
    }

    pub fn agent_record(&self, agent_id: &str) -> CostRecord {
        self.state
            .read()
            .unwrap()
            .per_agent
            .get(agent_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn global_record(&self) -> CostRecord {
        self.state.read().unwrap().global.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;

    fn tracker() -> CostTracker {
        CostTracker::new(Arc::new(MockClock::new(0)), EventBus::new())
    }

    #[test]
    fn records_accumulate_per_agent_and_global() {
        let tracker = tracker();
        tracker.record_cost("A1", "claude", 1000, 500);
        tracker.record_cost("A1", "claude", 1000, 500);
        let rec = tracker.agent_record("A1");
        assert_eq!(rec.calls, 2);
        assert_eq!(rec.input_tokens, 2000);
        assert!(rec.total_cost_usd > 0.0);
        assert_eq!(tracker.global_record().calls, 2);
    }

    #[test]
    fn budget_alert_fires_once_per_period() {
        let tracker = tracker();
        tracker.set_budget("A1", Budget { max_cost_usd: 0.01, alert_threshold: 0.5 });
        let hits = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let hits_clone = hits.clone();
        let _unsub = tracker.events.subscribe(
            "agent:cost:budget_warning",
            Arc::new(move |_t, _d| {
                hits_clone.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            }),
        );

        // Each call costs ~0.003 + 0.0075*0.5 ~ enough to cross 0.5*0.01 quickly.
        for _ in 0..5 {
            tracker.record_cost("A1", "claude", 1000, 500);
        }
        assert_eq!(hits.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn reset_budget_period_allows_alert_again() {
        let tracker = tracker();
        tracker.set_budget("A1", Budget { max_cost_usd: 0.001, alert_threshold: 0.5 });
        tracker.record_cost("A1", "claude", 1000, 500);
        tracker.reset_budget_period("A1");
        let hits = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let hits_clone = hits.clone();
        let _unsub = tracker.events.subscribe(
            "agent:cost:budget_warning",
            Arc::new(move |_t, _d| {
                hits_clone.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            }),
        );
        tracker.record_cost("A1", "claude", 1000, 500);
        assert_eq!(hits.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
