//! Self-Correction (§2 L2)
//!
//! Logs predictions, records outcomes once known, and detects accuracy
//! drops across a rolling window — the learning substrate's feedback loop
//! alongside `PatternMemory` and `ConfidenceCalibrator`.

use std::sync::Arc;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::kv::KVStore;

const TABLE: &str = "agent_feedback";
const WINDOW: usize = 20;
const DROP_THRESHOLD: f64 = 0.15;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionRecord {
    pub prediction_id: String,
    pub agent_id: String,
    pub predicted: String,
    pub confidence: f64,
    pub actual: Option<String>,
    pub correct: Option<bool>,
    pub created_at: i64,
    pub resolved_at: Option<i64>,
}

#[derive(Default)]
struct AgentHistory {
    recent_correctness: Vec<bool>,
}

pub struct SelfCorrection {
    store: Arc<dyn KVStore>,
    clock: Arc<dyn Clock>,
    history: RwLock<std::collections::HashMap<String, AgentHistory>>,
}

impl SelfCorrection {
    pub fn new(store: Arc<dyn KVStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            history: RwLock::new(std::collections::HashMap::new()),
        }
    }

    pub async fn log_prediction(&self, agent_id: &str, predicted: &str, confidence: f64) -> anyhow::Result<String> {
        let id = format!("pred-{}", uuid::Uuid::new_v4().simple());
        let record = PredictionRecord {
            prediction_id: id.clone(),
            agent_id: agent_id.to_string(),
            predicted: predicted.to_string(),
            confidence,
            actual: None,
            correct: None,
            created_at: self.clock.now_ms(),
            resolved_at: None,
        };
        self.store
            .insert(TABLE, "predictionId", &id, serde_json::to_value(&record)?)
            .await?;
        Ok(id)
    }

    pub async fn record_outcome(&self, prediction_id: &str, actual: &str) -> anyhow::Result<bool> {
        let Some(row) = self.store.get_by_id(TABLE, "predictionId", prediction_id).await? else {
            anyhow::bail!("unknown prediction: {prediction_id}");
        };
        let mut record: PredictionRecord = serde_json::from_value(row.blob)?;
        let correct = record.predicted == actual;
        record.actual = Some(actual.to_string());
        record.correct = Some(correct);
        record.resolved_at = Some(self.clock.now_ms());

        let agent_id = record.agent_id.clone();
        self.store
            .update(TABLE, "predictionId", prediction_id, serde_json::to_value(&record)?)
            .await?;

        let mut history = self.history.write().unwrap();
        let entry = history.entry(agent_id).or_default();
        entry.recent_correctness.push(correct);
        if entry.recent_correctness.len() > WINDOW {
            entry.recent_correctness.remove(0);
        }

        Ok(correct)
    }

    /// Compares the oldest half of the rolling window's accuracy against
    /// the newest half; a drop beyond `DROP_THRESHOLD` is reported so the
    /// agent can widen its re-planning or escalate for review.
    pub fn detect_accuracy_drop(&self, agent_id: &str) -> Option<f64> {
        let history = self.history.read().unwrap();
        let entry = history.get(agent_id)?;
        if entry.recent_correctness.len() < 10 {
            return None;
        }
        let mid = entry.recent_correctness.len() / 2;
        let (older, newer) = entry.recent_correctness.split_at(mid);
        let older_acc = older.iter().filter(|c| **c).count() as f64 / older.len() as f64;
        let newer_acc = newer.iter().filter(|c| **c).count() as f64 / newer.len() as f64;
        let drop = older_acc - newer_acc;
        if drop >= DROP_THRESHOLD {
            Some(drop)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use crate::kv::InMemoryKVStore;

    fn correction() -> SelfCorrection {
        let store: Arc<dyn KVStore> = Arc::new(InMemoryKVStore::new());
        SelfCorrection::new(store, Arc::new(MockClock::new(0)))
    }

    #[tokio::test]
    async fn records_outcome_and_marks_correctness() {
        let sc = correction();
        let id = sc.log_prediction("A1", "BLOCK", 0.8).await.unwrap();
        let correct = sc.record_outcome(&id, "BLOCK").await.unwrap();
        assert!(correct);
    }

    #[tokio::test]
    async fn detects_incorrect_outcome() {
        let sc = correction();
        let id = sc.log_prediction("A1", "APPROVE", 0.8).await.unwrap();
        let correct = sc.record_outcome(&id, "BLOCK").await.unwrap();
        assert!(!correct);
    }

    #[tokio::test]
    async fn detects_accuracy_drop_across_window() {
        let sc = correction();
        for _ in 0..5 {
            let id = sc.log_prediction("A1", "BLOCK", 0.8).await.unwrap();
            sc.record_outcome(&id, "BLOCK").await.unwrap();
        }
        for _ in 0..5 {
            let id = sc.log_prediction("A1", "BLOCK", 0.8).await.unwrap();
            sc.record_outcome(&id, "APPROVE").await.unwrap();
        }
        let drop = sc.detect_accuracy_drop("A1");
        assert!(drop.is_some());
        assert!(drop.unwrap() >= 0.15);
    }

    #[tokio::test]
    async fn no_drop_reported_with_insufficient_history() {
        let sc = correction();
        let id = sc.log_prediction("A1", "BLOCK", 0.8).await.unwrap();
        sc.record_outcome(&id, "BLOCK").await.unwrap();
        assert!(sc.detect_accuracy_drop("A1").is_none());
    }
}
