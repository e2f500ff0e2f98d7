//! Memory Store (§3, §4.5)
//!
//! Short-term (session, TTL-bound, FIFO-capped) and long-term
//! (importance-weighted, permanent) memory over the KV façade's
//! `agent_short_term_memory` / `agent_long_term_memory` tables.

mod long_term;
mod short_term;

pub use long_term::{LongTermEntry, LongTermMemory, LongTermQueryHit, LongTermType};
pub use short_term::{ShortTermEntry, ShortTermMemory};

use std::collections::HashMap;
use std::sync::Arc;

use crate::clock::Clock;
use crate::kv::KVStore;

/// Top-level facade combining both tiers plus consolidation (§4.5's final
/// paragraph: promote recurring short-term groups into a long-term pattern).
pub struct MemoryStore {
    pub short_term: ShortTermMemory,
    pub long_term: LongTermMemory,
}

impl MemoryStore {
    pub fn new(store: Arc<dyn KVStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            short_term: ShortTermMemory::new(store.clone(), clock.clone()),
            long_term: LongTermMemory::new(store, clock),
        }
    }

    /// Groups a session's short-term entries by `type || action`; for every
    /// group with count >= 3, promotes one long-term `pattern` entry with
    /// importance `min(0.3 + 0.1*count, 1.0)` containing up to the first 3
    /// examples.
    pub async fn consolidate_session(&self, agent_id: &str, session_id: &str) -> anyhow::Result<usize> {
        let entries = self.short_term.get(agent_id, session_id).await?;
        let mut groups: HashMap<String, Vec<&ShortTermEntry>> = HashMap::new();
        for entry in &entries {
            let key = group_key(&entry.entry);
            groups.entry(key).or_default().push(entry);
        }

        let mut promoted = 0;
        for (key, members) in groups {
            if members.len() < 3 {
                continue;
            }
            let importance = (0.3 + 0.1 * members.len() as f64).min(1.0);
            let examples: Vec<serde_json::Value> =
                members.iter().take(3).map(|m| m.entry.clone()).collect();
            self.long_term
                .save(
                    agent_id,
                    LongTermType::Pattern,
                    serde_json::json!({"group": key, "examples": examples}),
                    importance,
                )
                .await?;
            promoted += 1;
        }
        Ok(promoted)
    }
}

fn group_key(entry: &serde_json::Value) -> String {
    let ty = entry.get("type").and_then(|v| v.as_str()).unwrap_or("");
    let action = entry.get("action").and_then(|v| v.as_str()).unwrap_or("");
    format!("{ty}||{action}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use crate::kv::InMemoryKVStore;
    use serde_json::json;

    #[tokio::test]
    async fn consolidation_promotes_groups_of_three_or_more() {
        let store: Arc<dyn KVStore> = Arc::new(InMemoryKVStore::new());
        let clock: Arc<dyn Clock> = Arc::new(MockClock::new(0));
        let mem = MemoryStore::new(store, clock);

        for _ in 0..3 {
            mem.short_term
                .save("A1", "S1", json!({"type": "tool_call", "action": "check_ip"}))
                .await
                .unwrap();
        }
        mem.short_term
            .save("A1", "S1", json!({"type": "tool_call", "action": "check_email"}))
            .await
            .unwrap();

        let promoted = mem.consolidate_session("A1", "S1").await.unwrap();
        assert_eq!(promoted, 1);

        let long_term = mem.long_term.get_by_type("A1", LongTermType::Pattern).await.unwrap();
        assert_eq!(long_term.len(), 1);
        assert!((long_term[0].importance - 0.6).abs() < 1e-9);
    }
}
