//! Short-term memory (§3, §4.5): `{memoryId, agentId, sessionId, entry,
//! expiresAt, createdAt}`, owned by `(agent, session)`. Per-session count
//! <= 50, TTL 24h, FIFO eviction.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::clock::Clock;
use crate::kv::KVStore;

const TABLE: &str = "agent_short_term_memory";
const TTL_MS: i64 = 24 * 60 * 60 * 1000;
const MAX_PER_SESSION: usize = 50;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShortTermEntry {
    pub memory_id: String,
    pub agent_id: String,
    pub session_id: String,
    pub entry: Value,
    pub expires_at: i64,
    pub created_at: i64,
}

pub struct ShortTermMemory {
    store: Arc<dyn KVStore>,
    clock: Arc<dyn Clock>,
}

impl ShortTermMemory {
    pub fn new(store: Arc<dyn KVStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub async fn save(&self, agent_id: &str, session_id: &str, entry: Value) -> anyhow::Result<String> {
        let now = self.clock.now_ms();
        let memory_id = format!("stm-{}", uuid::Uuid::new_v4().simple());
        let record = ShortTermEntry {
            memory_id: memory_id.clone(),
            agent_id: agent_id.to_string(),
            session_id: session_id.to_string(),
            entry,
            expires_at: now + TTL_MS,
            created_at: now,
        };
        self.store
            .insert(TABLE, "memoryId", &memory_id, serde_json::to_value(&record)?)
            .await?;

        self.enforce_cap(agent_id, session_id).await?;
        Ok(memory_id)
    }

    /// Returns non-expired entries for `(agent, session)`, newest-first.
    pub async fn get(&self, agent_id: &str, session_id: &str) -> anyhow::Result<Vec<ShortTermEntry>> {
        let now = self.clock.now_ms();
        let mut entries = self.load_session(agent_id, session_id).await?;
        entries.retain(|e| e.expires_at >= now);
        entries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(entries)
    }

    /// Deletes every short-term entry past its TTL, across all agents.
    pub async fn cleanup(&self) -> anyhow::Result<usize> {
        let now = self.clock.now_ms();
        let rows = self.store.get_all(TABLE, usize::MAX, 0).await?;
        let mut deleted = 0;
        for row in rows {
            let entry: ShortTermEntry = serde_json::from_value(row.blob)?;
            if entry.expires_at < now {
                self.store.delete(TABLE, "memoryId", &entry.memory_id).await?;
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    async fn load_session(&self, agent_id: &str, session_id: &str) -> anyhow::Result<Vec<ShortTermEntry>> {
        let rows = self.store.get_all(TABLE, usize::MAX, 0).await?;
        let mut out = Vec::new();
        for row in rows {
            let entry: ShortTermEntry = serde_json::from_value(row.blob)?;
            if entry.agent_id == agent_id && entry.session_id == session_id {
                out.push(entry);
            }
        }
        Ok(out)
    }

    /// FIFO-evicts oldest entries beyond the per-session cap of 50.
    async fn enforce_cap(&self, agent_id: &str, session_id: &str) -> anyhow::Result<()> {
        let mut entries = self.load_session(agent_id, session_id).await?;
        if entries.len() <= MAX_PER_SESSION {
            return Ok(());
        }
        entries.sort_by_key(|e| e.created_at);
        let excess = entries.len() - MAX_PER_SESSION;
        for entry in entries.into_iter().take(excess) {
            self.store.delete(TABLE, "memoryId", &entry.memory_id).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use crate::kv::InMemoryKVStore;
    use serde_json::json;

    fn memory() -> (ShortTermMemory, Arc<MockClock>) {
        let clock = Arc::new(MockClock::new(0));
        let store: Arc<dyn KVStore> = Arc::new(InMemoryKVStore::new());
        (ShortTermMemory::new(store, clock.clone()), clock)
    }

    #[tokio::test]
    async fn per_session_cap_is_fifo_evicted() {
        let (mem, _clock) = memory();
        for i in 0..55 {
            mem.save("A1", "S1", json!({"i": i})).await.unwrap();
        }
        let entries = mem.get("A1", "S1").await.unwrap();
        assert_eq!(entries.len(), 50);
        // Newest-first: index 54 should be present, index 0 evicted.
        assert_eq!(entries[0].entry["i"], 54);
        assert!(entries.iter().all(|e| e.entry["i"].as_i64().unwrap() >= 5));
    }

    #[tokio::test]
    async fn expired_entries_are_excluded_from_get() {
        let (mem, clock) = memory();
        mem.save("A1", "S1", json!({"v": 1})).await.unwrap();
        clock.advance(25 * 60 * 60 * 1000);
        let entries = mem.get("A1", "S1").await.unwrap();
        assert!(entries.is_empty());
    }

    #[tokio::test]
    async fn cleanup_deletes_expired_rows() {
        let (mem, clock) = memory();
        mem.save("A1", "S1", json!({"v": 1})).await.unwrap();
        clock.advance(25 * 60 * 60 * 1000);
        let deleted = mem.cleanup().await.unwrap();
        assert_eq!(deleted, 1);
    }

    #[tokio::test]
    async fn sessions_are_isolated() {
        let (mem, _clock) = memory();
        mem.save("A1", "S1", json!({"v": 1})).await.unwrap();
        mem.save("A1", "S2", json!({"v": 2})).await.unwrap();
        assert_eq!(mem.get("A1", "S1").await.unwrap().len(), 1);
        assert_eq!(mem.get("A1", "S2").await.unwrap().len(), 1);
    }
}
