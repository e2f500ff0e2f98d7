//! Trace (§2 L3, §4.1)
//!
//! Lightweight span tree for a reasoning turn: `start_span`/`end_span`
//! record wall-clock duration and success, nested under the turn's
//! `traceId`. Thin wrapper kept separate from `tracing` spans so turn
//! metadata can be read back for the decision logger without re-parsing log
//! lines.

use std::sync::RwLock;

use serde::Serialize;

use crate::clock::Clock;
use std::sync::Arc;

#[derive(Debug, Clone, Serialize)]
pub struct Span {
    pub name: String,
    pub started_at: i64,
    pub ended_at: Option<i64>,
    pub success: Option<bool>,
}

pub struct Trace {
    clock: Arc<dyn Clock>,
    pub trace_id: String,
    spans: RwLock<Vec<Span>>,
}

impl Trace {
    pub fn new(clock: Arc<dyn Clock>, trace_id: impl Into<String>) -> Self {
        Self {
            clock,
            trace_id: trace_id.into(),
            spans: RwLock::new(Vec::new()),
        }
    }

    pub fn start_span(&self, name: &str) -> usize {
        let mut spans = self.spans.write().unwrap();
        spans.push(Span {
            name: name.to_string(),
            started_at: self.clock.now_ms(),
            ended_at: None,
            success: None,
        });
        spans.len() - 1
    }

    pub fn end_span(&self, idx: usize, success: bool) {
        let mut spans = self.spans.write().unwrap();
        if let Some(span) = spans.get_mut(idx) {
            span.ended_at = Some(self.clock.now_ms());
            span.success = Some(success);
        }
    }

    pub fn spans(&self) -> Vec<Span> {
        self.spans.read().unwrap().clone()
    }

    pub fn total_duration_ms(&self) -> i64 {
        let spans = self.spans.read().unwrap();
        let start = spans.first().map(|s| s.started_at).unwrap_or(0);
        let end = spans
            .iter()
            .filter_map(|s| s.ended_at)
            .max()
            .unwrap_or(start);
        end - start
    }
}
