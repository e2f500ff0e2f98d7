//! AutonomousAgent (§4.2): a scan scheduler wrapped around a `BaseAgent`.
//! Buffers inbound events, ticks on a timer, and accelerates its own cycle
//! when enough high-priority events pile up.
//!
//! §9 REDESIGN FLAGS re-expresses the source's subclass-and-override pattern
//! (`_buildScanInput`/`_postCycle`) as two function fields on `ScanHooks`,
//! since specialized agents compose rather than subclass.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde_json::Value;

use crate::clock::IntervalHandle;
use crate::config::AutonomousConfig;
use crate::event_bus::Unsubscribe;
use crate::runtime::Runtime;
use crate::types::Thought;

use super::{Agent, BaseAgent};

const MAX_EVENT_BUFFER: usize = 1000;
const MAX_RUN_HISTORY: usize = 50;
const MAX_TICK_PERIOD_MS: u64 = 10_000;

fn event_priority_is_urgent(event: &Value) -> bool {
    let p = event.get("priority").and_then(|v| v.as_str()).unwrap_or("");
    matches!(p, "CRITICAL" | "HIGH" | "URGENT")
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct RunHistoryEntry {
    pub cycle_id: String,
    pub started_at: i64,
    pub duration_ms: i64,
    pub events_processed: usize,
    pub success: bool,
    pub result_summary: Option<String>,
    pub error: Option<String>,
}

/// The pair the source expressed as subclass overrides: build this cycle's
/// scan input from the buffered events, and react to the result once
/// `reason()` returns.
pub struct ScanHooks {
    pub build_scan_input: Box<dyn Fn(&[Value]) -> String + Send + Sync>,
    pub post_cycle: Box<dyn Fn(&Thought) + Send + Sync>,
}

struct RunState {
    event_buffer: VecDeque<Value>,
    run_history: VecDeque<RunHistoryEntry>,
    last_run_at: Option<i64>,
    is_running: bool,
}

/// Wraps a `BaseAgent` with a buffered-event, timer-driven scan cycle.
pub struct AutonomousAgent {
    base: BaseAgent,
    runtime: Arc<Runtime>,
    config: AutonomousConfig,
    hooks: ScanHooks,
    state: RwLock<RunState>,
    cycle_in_progress: AtomicBool,
    tick_handle: RwLock<Option<IntervalHandle>>,
    subscriptions: RwLock<Vec<Unsubscribe>>,
}

impl AutonomousAgent {
    pub fn new(base: BaseAgent, runtime: Arc<Runtime>, config: AutonomousConfig, hooks: ScanHooks) -> Arc<Self> {
        Arc::new(Self {
            base,
            runtime,
            config,
            hooks,
            state: RwLock::new(RunState {
                event_buffer: VecDeque::new(),
                run_history: VecDeque::new(),
                last_run_at: None,
                is_running: false,
            }),
            cycle_in_progress: AtomicBool::new(false),
            tick_handle: RwLock::new(None),
            subscriptions: RwLock::new(Vec::new()),
        })
    }

    pub fn agent_id(&self) -> &str {
        self.base.agent_id_raw()
    }

    pub fn is_running(&self) -> bool {
        self.state.read().unwrap().is_running
    }

    pub fn run_history(&self) -> Vec<RunHistoryEntry> {
        self.state.read().unwrap().run_history.iter().cloned().collect()
    }

    pub fn event_buffer_len(&self) -> usize {
        self.state.read().unwrap().event_buffer.len()
    }

    /// Idempotent: subscribes to every configured topic and schedules the
    /// periodic tick. A second call is a no-op.
    pub fn start(self: &Arc<Self>) {
        {
            let mut state = self.state.write().unwrap();
            if state.is_running {
                return;
            }
            state.is_running = true;
        }

        let mut subs = self.subscriptions.write().unwrap();
        for topic in &self.config.subscribed_topics {
            let weak = Arc::downgrade(self);
            let unsub = self.runtime.events.subscribe(
                topic.clone(),
                Arc::new(move |_topic, data| {
                    if let Some(this) = weak.upgrade() {
                        this.ingest_event(data.clone());
                    }
                }),
            );
            subs.push(unsub);
        }
        drop(subs);

        let period_ms = self.config.scan_interval_ms.min(MAX_TICK_PERIOD_MS);
        let weak = Arc::downgrade(self);
        let handle = self.runtime.clock.set_interval(
            period_ms,
            Arc::new(move || {
                let weak = weak.clone();
                Box::pin(async move {
                    if let Some(this) = weak.upgrade() {
                        this.tick().await;
                    }
                })
            }),
        );
        *self.tick_handle.write().unwrap() = Some(handle);

        self.runtime.events.publish(
            "agent:autonomous:started",
            serde_json::json!({"agentId": self.base.agent_id_raw()}),
        );
    }

    /// Idempotent: cancels the tick, drops every subscription, clears the
    /// running flag. Does not cancel an in-flight cycle (§5).
    pub fn stop(&self) {
        {
            let mut state = self.state.write().unwrap();
            if !state.is_running {
                return;
            }
            state.is_running = false;
        }

        if let Some(handle) = self.tick_handle.write().unwrap().take() {
            handle.cancel();
        }
        let subs = std::mem::take(&mut *self.subscriptions.write().unwrap());
        for unsub in subs {
            unsub.unsubscribe();
        }

        self.runtime.events.publish(
            "agent:autonomous:stopped",
            serde_json::json!({"agentId": self.base.agent_id_raw()}),
        );
    }

    /// Appends an inbound event to the buffer (dropping the oldest beyond
    /// 1000), and triggers an immediate cycle if acceleration conditions are
    /// met and no cycle is already in flight.
    pub fn ingest_event(self: &Arc<Self>, event: Value) {
        {
            let mut state = self.state.write().unwrap();
            state.event_buffer.push_back(event);
            while state.event_buffer.len() > MAX_EVENT_BUFFER {
                state.event_buffer.pop_front();
            }
        }

        if self.should_run_now() && !self.cycle_in_progress.load(Ordering::SeqCst) {
            let this = self.clone();
            tokio::spawn(async move {
                this.run_one_cycle().await;
            });
        }
    }

    async fn tick(self: &Arc<Self>) {
        if self.should_run_now() && !self.cycle_in_progress.load(Ordering::SeqCst) {
            self.run_one_cycle().await;
        }
    }

    /// §4.2's three-way OR: enough urgent events, never run before with a
    /// non-empty buffer, or the scan interval elapsed with a non-empty
    /// buffer.
    fn should_run_now(&self) -> bool {
        let state = self.state.read().unwrap();
        if state.event_buffer.is_empty() {
            return false;
        }
        let urgent_count = state.event_buffer.iter().filter(|e| event_priority_is_urgent(e)).count();
        if urgent_count >= self.config.event_acceleration_threshold {
            return true;
        }
        match state.last_run_at {
            None => true,
            Some(last) => self.runtime.clock.now_ms() - last >= self.config.scan_interval_ms as i64,
        }
    }

    /// Rejects re-entry via `cycle_in_progress`, drains the buffer, runs one
    /// `reason()` turn over `_buildScanInput`'s result, and always advances
    /// `last_run_at` whether the turn succeeded or failed (§4.2, §7).
    pub async fn run_one_cycle(self: &Arc<Self>) {
        if self
            .cycle_in_progress
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        let cycle_id = format!("cycle-{}", uuid::Uuid::new_v4().simple());
        let started_at = self.runtime.clock.now_ms();

        let events: Vec<Value> = {
            let mut state = self.state.write().unwrap();
            let events: Vec<Value> = state.event_buffer.drain(..).collect();
            events
        };
        let events_processed = events.len();

        let scan_input = (self.hooks.build_scan_input)(&events);
        let context = serde_json::json!({
            "autonomous": true,
            "cycleId": cycle_id,
            "eventsProcessed": events_processed,
        });

        let thought = self.base.reason(&scan_input, Some(context)).await;
        (self.hooks.post_cycle)(&thought);

        let duration_ms = self.runtime.clock.now_ms() - started_at;
        let entry = RunHistoryEntry {
            cycle_id: cycle_id.clone(),
            started_at,
            duration_ms,
            events_processed,
            success: thought.error.is_none(),
            result_summary: thought.result.as_ref().map(|r| r.summary.clone()),
            error: thought.error.clone(),
        };

        {
            let mut state = self.state.write().unwrap();
            state.last_run_at = Some(self.runtime.clock.now_ms());
            state.run_history.push_back(entry);
            while state.run_history.len() > MAX_RUN_HISTORY {
                state.run_history.pop_front();
            }
        }

        let topic = if thought.error.is_none() { "agent:autonomous:cycle:complete" } else { "agent:autonomous:cycle:error" };
        self.runtime.events.publish(
            topic,
            serde_json::json!({
                "agentId": self.base.agent_id_raw(),
                "cycleId": cycle_id,
                "eventsProcessed": events_processed,
                "error": thought.error,
            }),
        );

        self.cycle_in_progress.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl Agent for AutonomousAgent {
    fn agent_id(&self) -> &str {
        self.base.agent_id_raw()
    }

    fn name(&self) -> &str {
        self.base.name_raw()
    }

    async fn reason(&self, input: &str, context: Option<Value>) -> Thought {
        self.base.reason(input, context).await
    }
}
