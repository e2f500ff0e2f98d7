//! Metrics (§4.9, §5)
//!
//! Per-agent execution counters and a rolling duration window (cap 100),
//! plus per-tool usage counts. Percentiles are computed on a sorted
//! snapshot. A snapshot is flushed to the KV façade on an explicit
//! `flush()` call — the runtime schedules that every 60s via the `Clock`.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::kv::KVStore;

const TABLE: &str = "agent_metrics";
const DURATION_WINDOW: usize = 100;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentMetrics {
    pub executions: u64,
    pub successes: u64,
    pub failures: u64,
    pub durations_ms: Vec<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub per_agent: HashMap<String, AgentMetrics>,
    pub tool_usage: HashMap<String, u64>,
}

pub struct Metrics {
    store: Arc<dyn KVStore>,
    state: RwLock<MetricsSnapshot>,
}

impl Metrics {
    pub fn new(store: Arc<dyn KVStore>) -> Self {
        Self {
            store,
            state: RwLock::new(MetricsSnapshot::default()),
        }
    }

    pub fn record_tool_use(&self, agent_id: &str, tool: &str, duration_ms: u64, success: bool) {
        let mut state = self.state.write().unwrap();
        let agent = state.per_agent.entry(agent_id.to_string()).or_default();
        agent.executions += 1;
        if success {
            agent.successes += 1;
        } else {
            agent.failures += 1;
        }
        agent.durations_ms.push(duration_ms);
        if agent.durations_ms.len() > DURATION_WINDOW {
            agent.durations_ms.remove(0);
        }
        *state.tool_usage.entry(tool.to_string()).or_insert(0) += 1;
    }

    pub fn percentile(&self, agent_id: &str, p: f64) -> Option<u64> {
        let state = self.state.read().unwrap();
        let agent = state.per_agent.get(agent_id)?;
        if agent.durations_ms.is_empty() {
            return None;
        }
        let mut sorted = agent.durations_ms.clone();
        sorted.sort_unstable();
        let idx = ((p / 100.0) * (sorted.len() as f64 - 1.0)).round() as usize;
        Some(sorted[idx.min(sorted.len() - 1)])
    }

    pub fn agent_metrics(&self, agent_id: &str) -> AgentMetrics {
        self.state
            .read()
            .unwrap()
            .per_agent
            .get(agent_id)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn flush(&self) -> anyhow::Result<()> {
        let snapshot = { self.state.read().unwrap().clone() };
        let blob = serde_json::to_value(&snapshot)?;
        match self.store.get_by_id(TABLE, "id", "snapshot").await? {
            Some(_) => self.store.update(TABLE, "id", "snapshot", blob).await?,
            None => self.store.insert(TABLE, "id", "snapshot", blob).await?,
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::InMemoryKVStore;

    fn metrics() -> Metrics {
        Metrics::new(Arc::new(InMemoryKVStore::new()))
    }

    #[test]
    fn tracks_executions_and_failures() {
        let m = metrics();
        m.record_tool_use("A1", "check_ip", 10, true);
        m.record_tool_use("A1", "check_ip", 20, false);
        let agent = m.agent_metrics("A1");
        assert_eq!(agent.executions, 2);
        assert_eq!(agent.successes, 1);
        assert_eq!(agent.failures, 1);
    }

    #[test]
    fn duration_window_is_capped() {
        let m = metrics();
        for i in 0..150 {
            m.record_tool_use("A1", "t", i, true);
        }
        assert_eq!(m.agent_metrics("A1").durations_ms.len(), 100);
    }

    #[test]
    fn percentile_on_sorted_snapshot() {
        let m = metrics();
        for d in [10, 50, 100, 20, 30] {
            m.record_tool_use("A1", "t", d, true);
        }
        assert_eq!(m.percentile("A1", 0.0), Some(10));
        assert_eq!(m.percentile("A1", 100.0), Some(100));
    }

    #[tokio::test]
    async fn flush_persists_snapshot() {
        let m = metrics();
        m.record_tool_use("A1", "t", 1, true);
        m.flush().await.unwrap();
        let row = m.store.get_by_id(TABLE, "id", "snapshot").await.unwrap();
        assert!(row.is_some());
    }
}
