//! Event Bus
//!
//! In-process publish/subscribe with topic wildcards. Fan-out is synchronous:
//! `publish` calls every matching handler inline, so handlers that block for
//! any length of time are a bug in the subscriber, not the bus (§5).

use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

pub type EventHandler = Arc<dyn Fn(&str, &Value) + Send + Sync>;

struct Subscription {
    id: u64,
    pattern: String,
    handler: EventHandler,
}

/// Returned by `subscribe`; dropping it does nothing, call `unsubscribe()`
/// explicitly (mirrors the `subscribe(pattern, handler) -> unsubscribe`
/// consumed interface in §6).
pub struct Unsubscribe {
    bus: Arc<EventBusInner>,
    id: u64,
}

impl Unsubscribe {
    pub fn unsubscribe(self) {
        let mut subs = self.bus.subs.write().unwrap();
        subs.retain(|s| s.id != self.id);
    }
}

struct EventBusInner {
    subs: RwLock<Vec<Subscription>>,
    next_id: AtomicU64,
}

#[derive(Clone)]
pub struct EventBus {
    inner: Arc<EventBusInner>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(EventBusInner {
                subs: RwLock::new(Vec::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn publish(&self, topic: &str, data: Value) {
        let subs = self.inner.subs.read().unwrap();
        for sub in subs.iter() {
            if topic_matches(&sub.pattern, topic) {
                (sub.handler)(topic, &data);
            }
        }
    }

    pub fn subscribe(&self, pattern: impl Into<String>, handler: EventHandler) -> Unsubscribe {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let mut subs = self.inner.subs.write().unwrap();
        subs.push(Subscription {
            id,
            pattern: pattern.into(),
            handler,
        });
        Unsubscribe {
            bus: self.inner.clone(),
            id,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subs.read().unwrap().len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// `*` is a suffix wildcard only: `alert:*` matches `alert:fraud` but not
/// `preamble:alert:fraud`.
fn topic_matches(pattern: &str, topic: &str) -> bool {
    if let Some(prefix) = pattern.strip_suffix('*') {
        topic.starts_with(prefix)
    } else {
        pattern == topic
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn exact_topic_match() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_clone = hits.clone();
        let _unsub = bus.subscribe(
            "agent:thought",
            Arc::new(move |_t, _d| {
                hits_clone.fetch_add(1, Ordering::SeqCst);
            }),
        );
        bus.publish("agent:thought", json!({}));
        bus.publish("agent:action:start", json!({}));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn wildcard_topic_match() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_clone = hits.clone();
        let _unsub = bus.subscribe(
            "alert:*",
            Arc::new(move |_t, _d| {
                hits_clone.fetch_add(1, Ordering::SeqCst);
            }),
        );
        bus.publish("alert:fraud", json!({}));
        bus.publish("alert:review", json!({}));
        bus.publish("preamble:alert:fraud", json!({}));
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_clone = hits.clone();
        let unsub = bus.subscribe(
            "x:*",
            Arc::new(move |_t, _d| {
                hits_clone.fetch_add(1, Ordering::SeqCst);
            }),
        );
        bus.publish("x:1", json!({}));
        unsub.unsubscribe();
        bus.publish("x:2", json!({}));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
