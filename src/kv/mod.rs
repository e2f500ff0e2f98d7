//! KV Store façade
//!
//! Named tables of `{id -> blob}` with get/put/update/delete/list/count. This
//! is the one external dependency the core actually writes to (the seven
//! `agent_*`/`agent_feedback` tables in §6); `cases`/`rules`/`transactions`/
//! `sellers` are read-only domain tables a caller's own adapter may back with
//! anything. We ship two adapters: an in-memory one for tests and a SQLite
//! one for anything that needs to survive a restart, mirroring the
//! trait-plus-SQLite-impl split in the agency's `orchestrator::queue`.

mod memory;
mod sqlite;

pub use memory::InMemoryKVStore;
pub use sqlite::SqliteKVStore;

use async_trait::async_trait;
use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum KVError {
    #[error("row not found: table={table} id={id}")]
    NotFound { table: String, id: String },
    #[error("backend error: {0}")]
    Backend(#[from] anyhow::Error),
}

pub type KVResult<T> = Result<T, KVError>;

/// A stored row: the blob plus the `pk` label it was inserted under. `pk` is
/// documentation only — physical storage is always keyed by `id` — but it's
/// round-tripped so callers that use it as a column-name hint get it back.
#[derive(Debug, Clone)]
pub struct Row {
    pub id: String,
    pub pk: String,
    pub blob: Value,
}

#[async_trait]
pub trait KVStore: Send + Sync {
    async fn insert(&self, table: &str, pk: &str, id: &str, blob: Value) -> KVResult<()>;
    async fn update(&self, table: &str, pk: &str, id: &str, blob: Value) -> KVResult<()>;
    async fn get_by_id(&self, table: &str, pk: &str, id: &str) -> KVResult<Option<Row>>;
    async fn get_all(&self, table: &str, limit: usize, offset: usize) -> KVResult<Vec<Row>>;
    async fn delete(&self, table: &str, pk: &str, id: &str) -> KVResult<()>;
    async fn count(&self, table: &str) -> KVResult<i64>;
}

#[cfg(test)]
mod contract_tests {
    use super::*;
    use serde_json::json;

    async fn exercise(store: &dyn KVStore) {
        assert_eq!(store.count("agent_short_term_memory").await.unwrap(), 0);

        store
            .insert(
                "agent_short_term_memory",
                "id",
                "m1",
                json!({"content": "hello"}),
            )
            .await
            .unwrap();
        assert_eq!(store.count("agent_short_term_memory").await.unwrap(), 1);

        let row = store
            .get_by_id("agent_short_term_memory", "id", "m1")
            .await
            .unwrap()
            .expect("row present");
        assert_eq!(row.blob["content"], "hello");

        store
            .update(
                "agent_short_term_memory",
                "id",
                "m1",
                json!({"content": "updated"}),
            )
            .await
            .unwrap();
        let row = store
            .get_by_id("agent_short_term_memory", "id", "m1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.blob["content"], "updated");

        store
            .insert("agent_short_term_memory", "id", "m2", json!({"content": "x"}))
            .await
            .unwrap();
        let all = store
            .get_all("agent_short_term_memory", 10, 0)
            .await
            .unwrap();
        assert_eq!(all.len(), 2);

        store
            .delete("agent_short_term_memory", "id", "m1")
            .await
            .unwrap();
        assert_eq!(store.count("agent_short_term_memory").await.unwrap(), 1);
        assert!(store
            .get_by_id("agent_short_term_memory", "id", "m1")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn in_memory_contract() {
        exercise(&InMemoryKVStore::new()).await;
    }

    #[tokio::test]
    async fn sqlite_contract() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteKVStore::new(dir.path().join("kv.sqlite")).await.unwrap();
        exercise(&store).await;
    }
}
