//! LLM Cache (§4, §4.4, §8 invariant 4)
//!
//! Hash-keyed, TTL-bound, max-entry-bound response cache. Grounded in the
//! agency's `agent::cache::LLMCache` (hash-keyed `HashMap` under an
//! `RwLock`), generalized with TTL + eviction + hit counting per spec.
//! Cache is advisory: absence is never an error (§3).

use std::collections::HashMap;
use std::sync::RwLock;

use sha2::{Digest, Sha256};

use crate::clock::Clock;
use std::sync::Arc;

/// `{key = hash(model, temperature, system, user), value, insertedAt,
/// expiresAt, cacheHits}` (§3).
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub value: String,
    pub inserted_at: i64,
    pub expires_at: i64,
    pub cache_hits: u64,
}

pub struct LLMCache {
    clock: Arc<dyn Clock>,
    entries: RwLock<HashMap<String, CacheEntry>>,
    ttl_ms: i64,
    max_entries: usize,
}

impl LLMCache {
    pub fn new(clock: Arc<dyn Clock>, ttl_ms: i64, max_entries: usize) -> Self {
        Self {
            clock,
            entries: RwLock::new(HashMap::new()),
            ttl_ms,
            max_entries,
        }
    }

    pub fn with_defaults(clock: Arc<dyn Clock>) -> Self {
        // 1h TTL, 1000 entries: conservative defaults for a process-local cache.
        Self::new(clock, 3_600_000, 1000)
    }

    pub fn key(model: &str, temperature: f32, system: &str, user: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(model.as_bytes());
        hasher.update(format!("{:.3}", temperature).as_bytes());
        hasher.update(system.as_bytes());
        hasher.update(user.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Invariant 4: high-temperature calls are never cached. Callers must
    /// check this before calling `set`; `get` doesn't need to because a
    /// `set` for temperature > 0.5 never happens.
    pub fn cacheable(temperature: f32) -> bool {
        temperature <= 0.5
    }

    pub fn get(&self, key: &str) -> Option<String> {
        let now = self.clock.now_ms();
        let mut entries = self.entries.write().unwrap();
        let hit = match entries.get_mut(key) {
            Some(entry) if entry.expires_at > now => {
                entry.cache_hits += 1;
                Some(entry.value.clone())
            }
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        };
        if hit.is_some() {
            tracing::debug!(key, "llm cache hit");
        }
        hit
    }

    pub fn set(&self, key: String, value: String) {
        let now = self.clock.now_ms();
        let mut entries = self.entries.write().unwrap();

        if entries.len() >= self.max_entries && !entries.contains_key(&key) {
            // Evict the oldest entry by insertion time (simple FIFO bound,
            // not LRU: the cache is advisory so a sub-optimal eviction is
            // never a correctness bug).
            if let Some(oldest_key) = entries
                .iter()
                .min_by_key(|(_, e)| e.inserted_at)
                .map(|(k, _)| k.clone())
            {
                entries.remove(&oldest_key);
            }
        }

        entries.insert(
            key,
            CacheEntry {
                value,
                inserted_at: now,
                expires_at: now + self.ttl_ms,
                cache_hits: 0,
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries.write().unwrap().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;

    fn cache() -> LLMCache {
        LLMCache::new(Arc::new(MockClock::new(0)), 1000, 2)
    }

    #[test]
    fn hit_then_miss_after_ttl() {
        let clock = Arc::new(MockClock::new(0));
        let cache = LLMCache::new(clock.clone(), 1000, 10);
        let key = LLMCache::key("m", 0.2, "s", "u");
        cache.set(key.clone(), "response".into());
        assert_eq!(cache.get(&key), Some("response".to_string()));
        clock.advance(1500);
        assert_eq!(cache.get(&key), None);
    }

    #[test]
    fn high_temperature_is_never_cacheable() {
        assert!(!LLMCache::cacheable(0.6));
        assert!(LLMCache::cacheable(0.5));
        assert!(LLMCache::cacheable(0.0));
    }

    #[test]
    fn max_entries_evicts_oldest() {
        let cache = cache();
        cache.set("a".into(), "1".into());
        cache.set("b".into(), "2".into());
        cache.set("c".into(), "3".into());
        assert_eq!(cache.len(), 2);
        assert!(cache.get("a").is_none());
    }

    #[test]
    fn hit_counter_increments() {
        let cache = cache();
        cache.set("a".into(), "1".into());
        cache.get("a");
        cache.get("a");
        let hits = cache.entries.read().unwrap().get("a").unwrap().cache_hits;
        assert_eq!(hits, 2);
    }
}
