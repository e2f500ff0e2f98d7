//! Decision Logger (§2 L3, §4.9 table, SPEC_FULL §10)
//!
//! Writes one audit entry per reasoning turn to `agent_decisions`, with a
//! multi-view split modeled on the agency's `AgentResponse`
//! (`answer`/`thought`/`steps`): a plain-language summary for operators, a
//! "tech view" with the full reasoning trace, and the raw evidence/trace
//! span tree for anyone auditing the decision later.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::kv::KVStore;
use crate::trace::Span;

const TABLE: &str = "agent_decisions";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionEntry {
    pub decision_id: String,
    pub agent_id: String,
    pub trace_id: String,
    pub plain_view: String,
    pub tech_view: String,
    pub evidence: Vec<String>,
    pub success: bool,
    pub error: Option<String>,
    pub created_at: i64,
}

pub struct DecisionLogger {
    store: Arc<dyn KVStore>,
    clock: Arc<dyn Clock>,
}

impl DecisionLogger {
    pub fn new(store: Arc<dyn KVStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub async fn log(
        &self,
        agent_id: &str,
        trace_id: &str,
        plain_view: String,
        tech_view: String,
        evidence: Vec<String>,
        success: bool,
        error: Option<String>,
    ) -> anyhow::Result<String> {
        let decision_id = format!("dec-{}", uuid::Uuid::new_v4().simple());
        let entry = DecisionEntry {
            decision_id: decision_id.clone(),
            agent_id: agent_id.to_string(),
            trace_id: trace_id.to_string(),
            plain_view,
            tech_view,
            evidence,
            success,
            error,
            created_at: self.clock.now_ms(),
        };
        if success {
            tracing::info!(agent_id, trace_id, "decision logged");
        } else {
            tracing::warn!(agent_id, trace_id, error = entry.error.as_deref().unwrap_or(""), "decision logged with error");
        }
        self.store
            .insert(TABLE, "decisionId", &decision_id, serde_json::to_value(&entry)?)
            .await?;
        Ok(decision_id)
    }

    pub async fn get(&self, decision_id: &str) -> anyhow::Result<Option<DecisionEntry>> {
        match self.store.get_by_id(TABLE, "decisionId", decision_id).await? {
            Some(row) => Ok(Some(serde_json::from_value(row.blob)?)),
            None => Ok(None),
        }
    }

    pub async fn for_agent(&self, agent_id: &str, limit: usize) -> anyhow::Result<Vec<DecisionEntry>> {
        let rows = self.store.get_all(TABLE, usize::MAX, 0).await?;
        let mut out = Vec::new();
        for row in rows {
            let entry: DecisionEntry = serde_json::from_value(row.blob)?;
            if entry.agent_id == agent_id {
                out.push(entry);
            }
        }
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        out.truncate(limit);
        Ok(out)
    }
}

pub fn render_tech_view(spans: &[Span], reasoning_steps: &[String]) -> String {
    let span_lines: Vec<String> = spans
        .iter()
        .map(|s| {
            format!(
                "{} [{}ms] {}",
                s.name,
                s.ended_at.map(|e| e - s.started_at).unwrap_or(0),
                if s.success == Some(true) { "ok" } else { "failed" }
            )
        })
        .collect();
    format!("SPANS:\n{}\n\nSTEPS:\n{}", span_lines.join("\n"), reasoning_steps.join("\n"))
}
