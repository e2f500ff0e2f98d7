//! Knowledge Base (§2 L1, facade)
//!
//! Namespaced document + chunk store with text search. Backed by the KV
//! façade; when `USE_VECTOR_SEARCH` is enabled a caller-supplied
//! `VectorSearch` backend is consulted first and falls back to text search
//! on error (Unavailable per §7).

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::chunker::{self, ChunkOptions};
use crate::kv::KVStore;

const TABLE: &str = "kb_documents";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub doc_id: String,
    pub namespace: String,
    pub text: String,
    pub chunks: Vec<StoredChunk>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredChunk {
    pub chunk_id: String,
    pub text: String,
    pub chunk_index: usize,
}

#[derive(Debug, Clone)]
pub struct SearchHit {
    pub id: String,
    pub text: String,
    pub score: f64,
    pub metadata: serde_json::Value,
}

/// External vector search API, consumed per §6's `VectorSearch` interface.
#[async_trait]
pub trait VectorSearch: Send + Sync {
    async fn search(
        &self,
        namespace: &str,
        query: &str,
        filter: Option<serde_json::Value>,
        top_k: usize,
    ) -> anyhow::Result<Vec<SearchHit>>;
}

pub struct KnowledgeBase {
    store: Arc<dyn KVStore>,
    vector: Option<Arc<dyn VectorSearch>>,
}

impl KnowledgeBase {
    pub fn new(store: Arc<dyn KVStore>, vector: Option<Arc<dyn VectorSearch>>) -> Self {
        Self { store, vector }
    }

    pub async fn ingest(&self, namespace: &str, doc_id: &str, text: &str) -> anyhow::Result<Document> {
        let chunks = chunker::chunk(
            text,
            ChunkOptions {
                parent_id: doc_id.to_string(),
                meta: serde_json::Map::new(),
            },
        );
        let stored_chunks = chunks
            .into_iter()
            .map(|c| StoredChunk {
                chunk_id: c.chunk_id,
                text: c.text,
                chunk_index: c.chunk_index,
            })
            .collect();
        let doc = Document {
            doc_id: doc_id.to_string(),
            namespace: namespace.to_string(),
            text: text.to_string(),
            chunks: stored_chunks,
        };
        self.store
            .insert(TABLE, "docId", doc_id, serde_json::to_value(&doc)?)
            .await?;
        Ok(doc)
    }

    /// Vector search first when configured; on any backend error, falls back
    /// to text search (§7: Unavailable is handled locally).
    pub async fn search(&self, namespace: &str, query: &str, top_k: usize) -> anyhow::Result<Vec<SearchHit>> {
        if let Some(vector) = &self.vector {
            match vector.search(namespace, query, None, top_k).await {
                Ok(hits) if !hits.is_empty() => return Ok(hits),
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "vector search unavailable, falling back to text search");
                }
            }
        }
        self.text_search(namespace, query, top_k).await
    }

    async fn text_search(&self, namespace: &str, query: &str, top_k: usize) -> anyhow::Result<Vec<SearchHit>> {
        let rows = self.store.get_all(TABLE, usize::MAX, 0).await?;
        let query_lower = query.to_lowercase();
        let query_tokens: Vec<&str> = query_lower.split_whitespace().collect();

        let mut hits = Vec::new();
        for row in rows {
            let doc: Document = serde_json::from_value(row.blob)?;
            if doc.namespace != namespace {
                continue;
            }
            for chunk in &doc.chunks {
                let lower = chunk.text.to_lowercase();
                let matched = query_tokens.iter().filter(|t| lower.contains(**t)).count();
                if matched == 0 {
                    continue;
                }
                let score = matched as f64 / query_tokens.len().max(1) as f64;
                hits.push(SearchHit {
                    id: chunk.chunk_id.clone(),
                    text: chunk.text.clone(),
                    score,
                    metadata: serde_json::json!({"docId": doc.doc_id}),
                });
            }
        }
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap());
        hits.truncate(top_k);
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::InMemoryKVStore;

    #[tokio::test]
    async fn text_search_matches_namespace_and_terms() {
        let store: Arc<dyn KVStore> = Arc::new(InMemoryKVStore::new());
        let kb = KnowledgeBase::new(store, None);
        kb.ingest("fraud", "doc1", "Sellers using shared devices are higher risk.")
            .await
            .unwrap();
        kb.ingest("other", "doc2", "Sellers using shared devices are higher risk.")
            .await
            .unwrap();

        let hits = kb.search("fraud", "shared devices", 5).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].score > 0.0);
    }

    #[tokio::test]
    async fn vector_search_failure_falls_back_to_text() {
        struct FailingVector;
        #[async_trait]
        impl VectorSearch for FailingVector {
            async fn search(
                &self,
                _namespace: &str,
                _query: &str,
                _filter: Option<serde_json::Value>,
                _top_k: usize,
            ) -> anyhow::Result<Vec<SearchHit>> {
                anyhow::bail!("backend offline")
            }
        }

        let store: Arc<dyn KVStore> = Arc::new(InMemoryKVStore::new());
        let kb = KnowledgeBase::new(store, Some(Arc::new(FailingVector)));
        kb.ingest("fraud", "doc1", "Known mule account pattern detected.")
            .await
            .unwrap();
        let hits = kb.search("fraud", "mule account", 5).await.unwrap();
        assert_eq!(hits.len(), 1);
    }
}
