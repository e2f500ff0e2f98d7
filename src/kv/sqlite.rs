use std::path::{Path, PathBuf};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use tokio::task;

use super::{KVError, KVResult, KVStore, Row};

/// SQLite-backed KV store, one physical table per logical table name,
/// created lazily on first use — the same `spawn_blocking`-wrapped
/// `rusqlite::Connection` pattern the agency uses for `SqliteTaskQueue`.
#[derive(Clone)]
pub struct SqliteKVStore {
    db_path: PathBuf,
}

impl SqliteKVStore {
    pub async fn new(db_path: impl AsRef<Path>) -> KVResult<Self> {
        let path = db_path.as_ref().to_path_buf();
        Ok(Self { db_path: path })
    }

    fn validate_table(table: &str) -> KVResult<()> {
        let ok = !table.is_empty()
            && table
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_');
        if ok {
            Ok(())
        } else {
            Err(KVError::Backend(anyhow::anyhow!(
                "invalid table name: {table}"
            )))
        }
    }

    fn ensure_table(conn: &Connection, table: &str) -> rusqlite::Result<()> {
        conn.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS {table} (
                    id TEXT PRIMARY KEY,
                    pk TEXT NOT NULL,
                    blob TEXT NOT NULL
                )"
            ),
            [],
        )?;
        Ok(())
    }
}

#[async_trait]
impl KVStore for SqliteKVStore {
    async fn insert(&self, table: &str, pk: &str, id: &str, blob: Value) -> KVResult<()> {
        Self::validate_table(table)?;
        let path = self.db_path.clone();
        let table = table.to_string();
        let pk = pk.to_string();
        let id = id.to_string();
        let blob_json = serde_json::to_string(&blob)
            .map_err(|e| KVError::Backend(anyhow::Error::from(e)))?;

        task::spawn_blocking(move || -> anyhow::Result<()> {
            let conn = Connection::open(&path)?;
            Self::ensure_table(&conn, &table)?;
            conn.execute(
                &format!("INSERT OR REPLACE INTO {table} (id, pk, blob) VALUES (?1, ?2, ?3)"),
                params![&id, &pk, &blob_json],
            )?;
            Ok(())
        })
        .await
        .map_err(|e| KVError::Backend(anyhow::Error::from(e)))?
        .map_err(KVError::Backend)
    }

    async fn update(&self, table: &str, pk: &str, id: &str, blob: Value) -> KVResult<()> {
        // INSERT OR REPLACE covers both; existence is not a hard precondition
        // for the in-process façade's callers (they always insert first).
        self.insert(table, pk, id, blob).await
    }

    async fn get_by_id(&self, table: &str, _pk: &str, id: &str) -> KVResult<Option<Row>> {
        Self::validate_table(table)?;
        let path = self.db_path.clone();
        let table = table.to_string();
        let id = id.to_string();

        let row = task::spawn_blocking(move || -> anyhow::Result<Option<(String, String)>> {
            let conn = Connection::open(&path)?;
            Self::ensure_table(&conn, &table)?;
            let row = conn
                .query_row(
                    &format!("SELECT pk, blob FROM {table} WHERE id = ?1"),
                    params![&id],
                    |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)),
                )
                .optional()?;
            Ok(row)
        })
        .await
        .map_err(|e| KVError::Backend(anyhow::Error::from(e)))?
        .map_err(KVError::Backend)?;

        match row {
            None => Ok(None),
            Some((pk, blob_json)) => {
                let blob = serde_json::from_str(&blob_json)
                    .map_err(|e| KVError::Backend(anyhow::Error::from(e)))?;
                Ok(Some(Row { id, pk, blob }))
            }
        }
    }

    async fn get_all(&self, table: &str, limit: usize, offset: usize) -> KVResult<Vec<Row>> {
        Self::validate_table(table)?;
        let path = self.db_path.clone();
        let table = table.to_string();

        let rows = task::spawn_blocking(move || -> anyhow::Result<Vec<(String, String, String)>> {
            let conn = Connection::open(&path)?;
            Self::ensure_table(&conn, &table)?;
            let mut stmt = conn.prepare(&format!(
                "SELECT id, pk, blob FROM {table} ORDER BY id ASC LIMIT ?1 OFFSET ?2"
            ))?;
            let out = stmt
                .query_map(params![limit as i64, offset as i64], |r| {
                    Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?, r.get::<_, String>(2)?))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(out)
        })
        .await
        .map_err(|e| KVError::Backend(anyhow::Error::from(e)))?
        .map_err(KVError::Backend)?;

        rows.into_iter()
            .map(|(id, pk, blob_json)| {
                let blob = serde_json::from_str(&blob_json)
                    .map_err(|e| KVError::Backend(anyhow::Error::from(e)))?;
                Ok(Row { id, pk, blob })
            })
            .collect()
    }

    async fn delete(&self, table: &str, _pk: &str, id: &str) -> KVResult<()> {
        Self::validate_table(table)?;
        let path = self.db_path.clone();
        let table = table.to_string();
        let id = id.to_string();

        task::spawn_blocking(move || -> anyhow::Result<()> {
            let conn = Connection::open(&path)?;
            Self::ensure_table(&conn, &table)?;
            conn.execute(&format!("DELETE FROM {table} WHERE id = ?1"), params![&id])?;
            Ok(())
        })
        .await
        .map_err(|e| KVError::Backend(anyhow::Error::from(e)))?
        .map_err(KVError::Backend)
    }

    async fn count(&self, table: &str) -> KVResult<i64> {
        Self::validate_table(table)?;
        let path = self.db_path.clone();
        let table = table.to_string();

        task::spawn_blocking(move || -> anyhow::Result<i64> {
            let conn = Connection::open(&path)?;
            Self::ensure_table(&conn, &table)?;
            let count: i64 =
                conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |r| r.get(0))?;
            Ok(count)
        })
        .await
        .map_err(|e| KVError::Backend(anyhow::Error::from(e)))?
        .map_err(KVError::Backend)
    }
}
