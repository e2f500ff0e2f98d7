use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use serde_json::Value;

use super::{KVError, KVResult, KVStore, Row};

#[derive(Default)]
pub struct InMemoryKVStore {
    tables: RwLock<HashMap<String, HashMap<String, (String, Value)>>>,
}

impl InMemoryKVStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KVStore for InMemoryKVStore {
    async fn insert(&self, table: &str, pk: &str, id: &str, blob: Value) -> KVResult<()> {
        let mut tables = self.tables.write().unwrap();
        tables
            .entry(table.to_string())
            .or_default()
            .insert(id.to_string(), (pk.to_string(), blob));
        Ok(())
    }

    async fn update(&self, table: &str, pk: &str, id: &str, blob: Value) -> KVResult<()> {
        let mut tables = self.tables.write().unwrap();
        let rows = tables.entry(table.to_string()).or_default();
        if !rows.contains_key(id) {
            return Err(KVError::NotFound {
                table: table.to_string(),
                id: id.to_string(),
            });
        }
        rows.insert(id.to_string(), (pk.to_string(), blob));
        Ok(())
    }

    async fn get_by_id(&self, table: &str, _pk: &str, id: &str) -> KVResult<Option<Row>> {
        let tables = self.tables.read().unwrap();
        Ok(tables.get(table).and_then(|rows| rows.get(id)).map(|(pk, blob)| Row {
            id: id.to_string(),
            pk: pk.clone(),
            blob: blob.clone(),
        }))
    }

    async fn get_all(&self, table: &str, limit: usize, offset: usize) -> KVResult<Vec<Row>> {
        let tables = self.tables.read().unwrap();
        let Some(rows) = tables.get(table) else {
            return Ok(Vec::new());
        };
        let mut out: Vec<Row> = rows
            .iter()
            .map(|(id, (pk, blob))| Row {
                id: id.clone(),
                pk: pk.clone(),
                blob: blob.clone(),
            })
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(out.into_iter().skip(offset).take(limit).collect())
    }

    async fn delete(&self, table: &str, _pk: &str, id: &str) -> KVResult<()> {
        let mut tables = self.tables.write().unwrap();
        if let Some(rows) = tables.get_mut(table) {
            rows.remove(id);
        }
        Ok(())
    }

    async fn count(&self, table: &str) -> KVResult<i64> {
        let tables = self.tables.read().unwrap();
        Ok(tables.get(table).map(|rows| rows.len() as i64).unwrap_or(0))
    }
}
