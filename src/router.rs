//! Router (§4.10): capability- and load-aware agent selection.
//!
//! `route(taskType)` scores every registered agent advertising that
//! capability by `0.6*successRate + 0.4*(1/(load+1))` and returns the
//! highest scorer. Load rises on `task_started` and falls on
//! `task_completed`, mirroring the agency's `orchestrator/router.rs` shape
//! (a standalone routing component the orchestrator consults) generalized
//! from keyword heuristics to capability/load/success-rate scoring.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, RwLock};

use crate::agent::Agent;
use crate::metrics::Metrics;

struct RoutedAgent {
    agent: Arc<dyn Agent>,
    capabilities: HashSet<String>,
    load: AtomicI64,
}

/// Agents register the capabilities they advertise; `route` picks among
/// those that advertise the requested task type. Success rate is read live
/// from `Metrics` so routing quality improves as an agent accumulates a
/// track record — an agent with no executions yet is given the benefit of
/// the doubt (success rate 1.0) rather than starved at score 0.
pub struct Router {
    metrics: Arc<Metrics>,
    order: RwLock<Vec<String>>,
    agents: RwLock<HashMap<String, RoutedAgent>>,
}

impl Router {
    pub fn new(metrics: Arc<Metrics>) -> Self {
        Self {
            metrics,
            order: RwLock::new(Vec::new()),
            agents: RwLock::new(HashMap::new()),
        }
    }

    pub fn register(&self, agent: Arc<dyn Agent>, capabilities: impl IntoIterator<Item = String>) {
        let id = agent.agent_id().to_string();
        let mut agents = self.agents.write().unwrap();
        if !agents.contains_key(&id) {
            self.order.write().unwrap().push(id.clone());
        }
        agents.insert(
            id,
            RoutedAgent {
                agent,
                capabilities: capabilities.into_iter().collect(),
                load: AtomicI64::new(0),
            },
        );
    }

    pub fn unregister(&self, agent_id: &str) {
        self.agents.write().unwrap().remove(agent_id);
        self.order.write().unwrap().retain(|id| id != agent_id);
    }

    /// A task has been dispatched to `agent_id`; its load rises by one until
    /// `task_completed` is called for the same id.
    pub fn task_started(&self, agent_id: &str) {
        if let Some(entry) = self.agents.read().unwrap().get(agent_id) {
            entry.load.fetch_add(1, Ordering::SeqCst);
        }
    }

    pub fn task_completed(&self, agent_id: &str) {
        if let Some(entry) = self.agents.read().unwrap().get(agent_id) {
            entry.load.fetch_sub(1, Ordering::SeqCst);
        }
    }

    pub fn load(&self, agent_id: &str) -> i64 {
        self.agents.read().unwrap().get(agent_id).map(|e| e.load.load(Ordering::SeqCst).max(0)).unwrap_or(0)
    }

    fn success_rate(&self, agent_id: &str) -> f64 {
        let m = self.metrics.agent_metrics(agent_id);
        if m.executions == 0 {
            1.0
        } else {
            m.successes as f64 / m.executions as f64
        }
    }

    fn score(&self, agent_id: &str) -> f64 {
        let load = self.load(agent_id) as f64;
        0.6 * self.success_rate(agent_id) + 0.4 * (1.0 / (load + 1.0))
    }

    /// The highest-scoring registered agent advertising `task_type`, or
    /// `None` if nobody does. Ties keep the first-registered candidate.
    pub fn route(&self, task_type: &str) -> Option<Arc<dyn Agent>> {
        let order = self.order.read().unwrap();
        let agents = self.agents.read().unwrap();
        let mut best: Option<(f64, &String)> = None;
        for id in order.iter() {
            let Some(entry) = agents.get(id) else { continue };
            if !entry.capabilities.contains(task_type) {
                continue;
            }
            let score = self.score(id);
            if best.as_ref().map(|(s, _)| score > *s).unwrap_or(true) {
                best = Some((score, id));
            }
        }
        best.and_then(|(_, id)| agents.get(id)).map(|e| e.agent.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::InMemoryKVStore;
    use crate::types::Thought;
    use async_trait::async_trait;
    use serde_json::Value;

    struct StubAgent {
        id: String,
    }

    #[async_trait]
    impl Agent for StubAgent {
        fn agent_id(&self) -> &str {
            &self.id
        }
        fn name(&self) -> &str {
            &self.id
        }
        async fn reason(&self, _input: &str, _context: Option<Value>) -> Thought {
            Thought {
                trace_id: "t".into(),
                timestamp: 0,
                input: String::new(),
                context: Value::Null,
                reasoning: vec![],
                actions: vec![],
                result: None,
                chain_of_thought: crate::types::Chain::new("c"),
                error: None,
                pattern_matches: None,
            }
        }
    }

    fn router() -> Router {
        Router::new(Arc::new(Metrics::new(Arc::new(InMemoryKVStore::new()))))
    }

    #[test]
    fn route_ignores_agents_missing_the_capability() {
        let r = router();
        r.register(Arc::new(StubAgent { id: "A1".into() }), vec!["kyc".to_string()]);
        assert!(r.route("aml").is_none());
        assert!(r.route("kyc").is_some());
    }

    #[test]
    fn route_prefers_lower_load_at_equal_success_rate() {
        let r = router();
        r.register(Arc::new(StubAgent { id: "A1".into() }), vec!["kyc".to_string()]);
        r.register(Arc::new(StubAgent { id: "A2".into() }), vec!["kyc".to_string()]);
        r.task_started("A1");
        r.task_started("A1");
        let chosen = r.route("kyc").unwrap();
        assert_eq!(chosen.agent_id(), "A2");
    }

    #[test]
    fn route_prefers_higher_success_rate_at_equal_load() {
        let r = router();
        r.register(Arc::new(StubAgent { id: "A1".into() }), vec!["kyc".to_string()]);
        r.register(Arc::new(StubAgent { id: "A2".into() }), vec!["kyc".to_string()]);
        r.metrics.record_tool_use("A1", "reason", 1, false);
        r.metrics.record_tool_use("A1", "reason", 1, false);
        r.metrics.record_tool_use("A2", "reason", 1, true);
        r.metrics.record_tool_use("A2", "reason", 1, true);
        let chosen = r.route("kyc").unwrap();
        assert_eq!(chosen.agent_id(), "A2");
    }

    #[test]
    fn task_completed_lowers_load_back_down() {
        let r = router();
        r.register(Arc::new(StubAgent { id: "A1".into() }), vec!["kyc".to_string()]);
        r.task_started("A1");
        r.task_started("A1");
        r.task_completed("A1");
        assert_eq!(r.load("A1"), 1);
    }

    #[test]
    fn unregistered_task_type_with_no_candidates_returns_none() {
        let r = router();
        assert!(r.route("kyc").is_none());
    }
}
