//! Runtime (§9 DESIGN NOTES: "Singletons via module-level state")
//!
//! Replaces the source's module-level singletons with a struct constructed
//! once per process (or once per test) that exposes every shared
//! collaborator as an `Arc`. `BaseAgent`, `AutonomousAgent`, `Router`, and
//! `Orchestrator` all take the pieces of a `Runtime` they need rather than
//! reaching for global state; tests build their own with an in-memory KV
//! store and a `MockClock`.

use std::sync::Arc;

use crate::calibration::ConfidenceCalibrator;
use crate::circuit_breaker::{CircuitBreakerConfig, CircuitBreakerRegistry};
use crate::clock::Clock;
use crate::config::{AutonomyThresholds, EnvConfig};
use crate::consensus::ConsensusEngine;
use crate::context::ContextEngine;
use crate::decision_log::DecisionLogger;
use crate::event_bus::EventBus;
use crate::knowledge_base::{KnowledgeBase, VectorSearch};
use crate::kv::KVStore;
use crate::llm::{Budget, CostTracker, LLMCache, LLMClient, LLMProvider};
use crate::memory::MemoryStore;
use crate::messenger::Messenger;
use crate::metrics::Metrics;
use crate::orchestrator::{Coordinator, Orchestrator};
use crate::pattern_memory::PatternMemory;
use crate::router::Router;
use crate::self_correction::SelfCorrection;
use crate::tool_executor::ToolExecutor;
use crate::tools::ToolRegistry;

/// Shared infrastructure every agent, the router, and the orchestrator
/// borrow from. Construct once; clone the `Arc<Runtime>`, never the fields.
pub struct Runtime {
    pub env: EnvConfig,
    pub autonomy: AutonomyThresholds,
    pub clock: Arc<dyn Clock>,
    pub events: EventBus,
    pub store: Arc<dyn KVStore>,
    pub llm: Arc<LLMClient>,
    pub memory: Arc<MemoryStore>,
    pub knowledge_base: Arc<KnowledgeBase>,
    pub context: Arc<ContextEngine>,
    pub patterns: Arc<PatternMemory>,
    pub calibrator: Arc<ConfidenceCalibrator>,
    pub self_correction: Arc<SelfCorrection>,
    pub metrics: Arc<Metrics>,
    pub decisions: Arc<DecisionLogger>,
    pub messenger: Arc<Messenger>,
    pub breakers: Arc<CircuitBreakerRegistry>,
    pub consensus: Arc<ConsensusEngine>,
    pub router: Arc<Router>,
    pub orchestrator: Arc<Orchestrator>,
    pub coordinator: Arc<Coordinator>,
}

impl Runtime {
    /// Full construction: a real or test KV store, a real or mock clock, an
    /// optional LLM provider (`None` disables every LLM-backed reasoning
    /// phase per §6), and an optional vector search backend for the
    /// knowledge base.
    pub async fn new(
        store: Arc<dyn KVStore>,
        clock: Arc<dyn Clock>,
        env: EnvConfig,
        provider: Option<Arc<dyn LLMProvider>>,
        vector_search: Option<Arc<dyn VectorSearch>>,
    ) -> anyhow::Result<Arc<Self>> {
        let events = EventBus::new();
        let cache = Arc::new(LLMCache::with_defaults(clock.clone()));
        let cost_tracker = Arc::new(CostTracker::new(clock.clone(), events.clone()));
        cost_tracker.set_budget(crate::llm::cost::SYSTEM_AGENT, Budget::default());
        let llm = Arc::new(LLMClient::new(provider, cache, cost_tracker, clock.clone()));

        let memory = Arc::new(MemoryStore::new(store.clone(), clock.clone()));
        let knowledge_base = Arc::new(KnowledgeBase::new(store.clone(), vector_search));
        let context = Arc::new(ContextEngine::new(memory.clone(), knowledge_base.clone()));
        let patterns = Arc::new(PatternMemory::new(clock.clone()));
        let calibrator = Arc::new(ConfidenceCalibrator::load(store.clone()).await?);
        let self_correction = Arc::new(SelfCorrection::new(store.clone(), clock.clone()));
        let metrics = Arc::new(Metrics::new(store.clone()));
        let decisions = Arc::new(DecisionLogger::new(store.clone(), clock.clone()));
        let messenger = Arc::new(Messenger::new());
        let breakers = Arc::new(CircuitBreakerRegistry::new(clock.clone(), CircuitBreakerConfig::default()));
        let consensus = Arc::new(ConsensusEngine::new(memory.clone(), clock.clone()));
        let router = Arc::new(Router::new(metrics.clone()));
        let orchestrator = Arc::new(Orchestrator::new(consensus.clone()));
        let coordinator = Arc::new(Coordinator::new(orchestrator.clone()));

        Ok(Arc::new(Self {
            env,
            autonomy: AutonomyThresholds::default(),
            clock,
            events,
            store,
            llm,
            memory,
            knowledge_base,
            context,
            patterns,
            calibrator,
            self_correction,
            metrics,
            decisions,
            messenger,
            breakers,
            consensus,
            router,
            orchestrator,
            coordinator,
        }))
    }

    /// Registers an already-`Arc`-wrapped agent with both the orchestrator
    /// (so `Coordinator`/workflows can dispatch to it by id) and the router
    /// (so `route()` can select it by capability). Mirrors `register_agent`'s
    /// messenger registration — explicit, done once the caller has an
    /// `Arc<dyn Agent>` in hand, never automatic from inside `BaseAgent::new`
    /// (§9: no cyclic object graphs).
    pub fn register_orchestrated_agent(&self, agent: Arc<dyn crate::agent::Agent>, capabilities: impl IntoIterator<Item = String>) {
        let capabilities: Vec<String> = capabilities.into_iter().collect();
        self.orchestrator.register(agent.clone());
        self.router.register(agent, capabilities);
    }

    /// A self-contained test runtime: in-memory KV, `MockClock` at `t=0`, no
    /// LLM provider (every reasoning phase falls back to its deterministic
    /// path) and no vector search backend.
    pub async fn test() -> Arc<Self> {
        let store: Arc<dyn KVStore> = Arc::new(crate::kv::InMemoryKVStore::new());
        let clock: Arc<dyn Clock> = Arc::new(crate::clock::MockClock::new(0));
        Self::new(store, clock, EnvConfig::from_env(), None, None)
            .await
            .expect("in-memory test runtime never fails to construct")
    }

    /// Registers an agent in the shared messenger's inbox table. Agents call
    /// this once at construction so `Messenger::send`/`broadcast` can reach
    /// them.
    pub fn register_agent(&self, agent_id: &str) {
        self.messenger.register(agent_id);
    }

    /// Builds a `ToolExecutor` bound to this runtime's shared circuit
    /// breakers/metrics/clock, but scoped to a caller-supplied (usually
    /// per-agent) `ToolRegistry`.
    pub fn tool_executor(&self, registry: Arc<ToolRegistry>) -> ToolExecutor {
        ToolExecutor::new(registry, self.breakers.clone(), self.metrics.clone(), self.clock.clone())
    }

    /// Flushes the metrics snapshot to the KV façade. The runtime schedules
    /// this every 60s via its own `Clock` (§4.9); callers that drive their
    /// own loop (e.g. a `main` binary) can also call it directly.
    pub fn schedule_metrics_flush(self: &Arc<Self>) -> crate::clock::IntervalHandle {
        let metrics = self.metrics.clone();
        self.clock.set_interval(
            60_000,
            Arc::new(move || {
                let metrics = metrics.clone();
                Box::pin(async move {
                    if let Err(err) = metrics.flush().await {
                        tracing::warn!(error = %err, "failed to flush metrics snapshot");
                    }
                })
            }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_runtime_constructs_with_llm_disabled() {
        let runtime = Runtime::test().await;
        assert!(!runtime.llm.is_enabled());
    }

    #[tokio::test]
    async fn schedule_metrics_flush_writes_a_snapshot() {
        let store: Arc<dyn KVStore> = Arc::new(crate::kv::InMemoryKVStore::new());
        let clock = Arc::new(crate::clock::MockClock::new(0));
        let runtime = Runtime::new(store, clock.clone(), EnvConfig::from_env(), None, None)
            .await
            .unwrap();
        runtime.metrics.record_tool_use("A1", "t", 5, true);
        let _handle = runtime.schedule_metrics_flush();
        clock.fire_intervals().await;
        let row = runtime.store.get_by_id("agent_metrics", "id", "snapshot").await.unwrap();
        assert!(row.is_some());
    }
}
