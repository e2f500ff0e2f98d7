//! Long-term memory (§3, §4.5): `{memoryId, agentId, type, content,
//! importance, accessCount, lastAccessed, createdAt}`. Permanent until
//! explicit delete.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::clock::Clock;
use crate::kv::KVStore;

const TABLE: &str = "agent_long_term_memory";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LongTermType {
    Pattern,
    Insight,
    Preference,
    Correction,
}

impl LongTermType {
    fn as_str(&self) -> &'static str {
        match self {
            LongTermType::Pattern => "pattern",
            LongTermType::Insight => "insight",
            LongTermType::Preference => "preference",
            LongTermType::Correction => "correction",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LongTermEntry {
    pub memory_id: String,
    pub agent_id: String,
    #[serde(rename = "type")]
    pub ty: LongTermType,
    pub content: Value,
    pub importance: f64,
    pub access_count: u64,
    pub last_accessed: Option<i64>,
    pub created_at: i64,
}

#[derive(Debug, Clone)]
pub struct LongTermQueryHit {
    pub entry: LongTermEntry,
    pub score: f64,
}

pub struct LongTermMemory {
    store: Arc<dyn KVStore>,
    clock: Arc<dyn Clock>,
}

impl LongTermMemory {
    pub fn new(store: Arc<dyn KVStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub async fn save(
        &self,
        agent_id: &str,
        ty: LongTermType,
        content: Value,
        importance: f64,
    ) -> anyhow::Result<String> {
        let now = self.clock.now_ms();
        let memory_id = format!("ltm-{}", uuid::Uuid::new_v4().simple());
        let record = LongTermEntry {
            memory_id: memory_id.clone(),
            agent_id: agent_id.to_string(),
            ty,
            content,
            importance: importance.clamp(0.0, 1.0),
            access_count: 0,
            last_accessed: None,
            created_at: now,
        };
        self.store
            .insert(TABLE, "memoryId", &memory_id, serde_json::to_value(&record)?)
            .await?;
        Ok(memory_id)
    }

    pub async fn delete(&self, memory_id: &str) -> anyhow::Result<()> {
        self.store.delete(TABLE, "memoryId", memory_id).await?;
        Ok(())
    }

    pub async fn get_by_type(&self, agent_id: &str, ty: LongTermType) -> anyhow::Result<Vec<LongTermEntry>> {
        let mut entries = self.load_agent(agent_id).await?;
        entries.retain(|e| e.ty == ty);
        entries.sort_by(|a, b| b.importance.partial_cmp(&a.importance).unwrap());
        Ok(entries)
    }

    /// Ranks by `0.5*keywordScore + 0.3*importance + 0.2*recencyScore`.
    /// Only records with score > 0 are returned. Retrieval increments
    /// `accessCount` and sets `lastAccessed` on every returned record.
    pub async fn query(&self, agent_id: &str, query: &str, limit: usize) -> anyhow::Result<Vec<LongTermQueryHit>> {
        let now = self.clock.now_ms();
        let query_tokens: Vec<String> = tokenize(query);
        if query_tokens.is_empty() {
            return Ok(Vec::new());
        }

        let entries = self.load_agent(agent_id).await?;
        let mut hits = Vec::new();
        for mut entry in entries {
            let content_text = content_text(&entry.content);
            let content_tokens = tokenize(&content_text);
            let matched = query_tokens
                .iter()
                .filter(|t| content_tokens.contains(t))
                .count();
            let keyword_score = matched as f64 / query_tokens.len() as f64;

            let recency_score = match entry.last_accessed {
                None => 0.5,
                Some(last) => {
                    let days = ((now - last).max(0) as f64) / (1000.0 * 60.0 * 60.0 * 24.0);
                    0.5f64.powf(days / 7.0)
                }
            };

            let score = 0.5 * keyword_score + 0.3 * entry.importance + 0.2 * recency_score;
            if score <= 0.0 {
                continue;
            }

            entry.access_count += 1;
            entry.last_accessed = Some(now);
            self.store
                .update(TABLE, "memoryId", &entry.memory_id, serde_json::to_value(&entry)?)
                .await?;

            hits.push(LongTermQueryHit { entry, score });
        }

        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap());
        hits.truncate(limit);
        Ok(hits)
    }

    async fn load_agent(&self, agent_id: &str) -> anyhow::Result<Vec<LongTermEntry>> {
        let rows = self.store.get_all(TABLE, usize::MAX, 0).await?;
        let mut out = Vec::new();
        for row in rows {
            let entry: LongTermEntry = serde_json::from_value(row.blob)?;
            if entry.agent_id == agent_id {
                out.push(entry);
            }
        }
        Ok(out)
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

fn content_text(content: &Value) -> String {
    match content {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
