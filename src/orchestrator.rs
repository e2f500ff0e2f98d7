//! Orchestrator + Coordinator (§4.10): workflow execution, parallel
//! dispatch, delegation, and consensus composition over a shared agent
//! registry.
//!
//! §9 REDESIGN FLAGS: "replace [the cyclic agent/messenger/orchestrator
//! graph] with explicit handles: each collaborator is owned by the
//! orchestrator; agents hold references (by id) and look up via the
//! orchestrator." `Orchestrator` is the only place that holds
//! `Arc<dyn Agent>` handles; `Coordinator` and `Router` are handed an
//! `Arc<Orchestrator>` and look agents up by id rather than holding them
//! directly.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde_json::Value;

use crate::agent::Agent;
use crate::consensus::{ConsensusEngine, ConsensusResult, ConsensusStrategy, Vote};
use crate::prompt_templates::ObserveOutput;
use crate::types::Thought;

const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// One step of a workflow (§4.10): looks up `agent_id` in the
/// orchestrator's registry, maps the workflow's running JSON state through
/// `input_mapper` to build this step's `reason()` input, and — if
/// `output_key` is set — writes the step's observation summary back into
/// that state for later steps to read. Consecutive steps sharing the same
/// `parallel_group` tag run concurrently and join before the next group
/// starts; a failed step stops the workflow unless `optional`.
pub struct WorkflowStep {
    pub agent_id: String,
    pub input_mapper: Box<dyn Fn(&Value) -> String + Send + Sync>,
    pub output_key: Option<String>,
    pub optional: bool,
    pub parallel_group: Option<String>,
}

impl WorkflowStep {
    pub fn sequential(agent_id: impl Into<String>, input_mapper: impl Fn(&Value) -> String + Send + Sync + 'static) -> Self {
        Self {
            agent_id: agent_id.into(),
            input_mapper: Box::new(input_mapper),
            output_key: None,
            optional: false,
            parallel_group: None,
        }
    }

    pub fn with_output_key(mut self, key: impl Into<String>) -> Self {
        self.output_key = Some(key.into());
        self
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn in_group(mut self, group: impl Into<String>) -> Self {
        self.parallel_group = Some(group.into());
        self
    }
}

pub struct WorkflowResult {
    pub state: Value,
    pub steps: Vec<(String, Thought)>,
    pub success: bool,
    pub failed_step: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchStatus {
    Completed,
    Timeout,
    NotFound,
    Error,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct DispatchOutcome {
    pub agent_id: String,
    pub status: DispatchStatus,
    pub result: Option<ObserveOutput>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct DelegationResult {
    pub success: bool,
    pub error: Option<String>,
}

/// Owns the only handle every agent is reachable through. Agents, the
/// `Router`, and the `Coordinator` all address agents by id and look them
/// up here rather than holding `Arc<dyn Agent>` themselves.
pub struct Orchestrator {
    agents: RwLock<HashMap<String, Arc<dyn Agent>>>,
    pub consensus: Arc<ConsensusEngine>,
}

impl Orchestrator {
    pub fn new(consensus: Arc<ConsensusEngine>) -> Self {
        Self { agents: RwLock::new(HashMap::new()), consensus }
    }

    pub fn register(&self, agent: Arc<dyn Agent>) {
        self.agents.write().unwrap().insert(agent.agent_id().to_string(), agent);
    }

    pub fn unregister(&self, agent_id: &str) {
        self.agents.write().unwrap().remove(agent_id);
    }

    pub fn lookup(&self, agent_id: &str) -> Option<Arc<dyn Agent>> {
        self.agents.read().unwrap().get(agent_id).cloned()
    }

    pub fn registered_ids(&self) -> Vec<String> {
        self.agents.read().unwrap().keys().cloned().collect()
    }

    /// Runs `steps` in order. Consecutive steps sharing a `parallel_group`
    /// tag are dispatched together and joined before the next group starts;
    /// a step whose agent is missing, times out... (dispatch has no
    /// timeout here — workflows trust their own steps; `Coordinator` is
    /// where timeout-bounded dispatch lives) — fails, stopping the workflow
    /// unless marked `optional`.
    pub async fn execute_workflow(&self, steps: Vec<WorkflowStep>, initial_state: Value) -> WorkflowResult {
        let mut state = initial_state;
        let mut recorded = Vec::new();
        let mut i = 0;

        while i < steps.len() {
            let group_tag = steps[i].parallel_group.clone();
            let mut group_end = i + 1;
            if group_tag.is_some() {
                while group_end < steps.len() && steps[group_end].parallel_group == group_tag {
                    group_end += 1;
                }
            }

            let group_inputs: Vec<(usize, String, String)> = (i..group_end)
                .map(|idx| (idx, steps[idx].agent_id.clone(), (steps[idx].input_mapper)(&state)))
                .collect();

            let dispatches = group_inputs.into_iter().map(|(idx, agent_id, input)| {
                let agent = self.lookup(&agent_id);
                async move {
                    let thought = match agent {
                        Some(agent) => Some(agent.reason(&input, None).await),
                        None => None,
                    };
                    (idx, agent_id, thought)
                }
            });
            let outcomes = futures::future::join_all(dispatches).await;

            for (idx, agent_id, thought) in outcomes {
                let step = &steps[idx];
                match thought {
                    None => {
                        if !step.optional {
                            return WorkflowResult { state, steps: recorded, success: false, failed_step: Some(agent_id) };
                        }
                    }
                    Some(thought) => {
                        let failed = thought.error.is_some();
                        if let (Some(key), Value::Object(map)) = (&step.output_key, &mut state) {
                            let summary = thought.result.as_ref().map(|r| r.summary.clone()).unwrap_or_default();
                            map.insert(key.clone(), Value::String(summary));
                        }
                        recorded.push((agent_id.clone(), thought));
                        if failed && !step.optional {
                            return WorkflowResult { state, steps: recorded, success: false, failed_step: Some(agent_id) };
                        }
                    }
                }
            }

            i = group_end;
        }

        WorkflowResult { state, steps: recorded, success: true, failed_step: None }
    }
}

/// Timeout-bounded dispatch over the orchestrator's registry: parallel
/// fan-out, single-target delegation, and multi-agent consensus runs
/// (§4.10). Every external boundary here is timeout-bounded (§5), defaulting
/// to 30s.
pub struct Coordinator {
    orchestrator: Arc<Orchestrator>,
}

impl Coordinator {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self { orchestrator }
    }

    /// Races each of `agent_ids`' `reason(task)` call against `timeout_ms`
    /// (default 30s) and returns one outcome per id, in the same order.
    pub async fn dispatch_parallel(&self, agent_ids: &[String], task: &str, timeout_ms: Option<u64>) -> Vec<DispatchOutcome> {
        let timeout = Duration::from_millis(timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS));
        let dispatches = agent_ids.iter().map(|id| {
            let id = id.clone();
            let task = task.to_string();
            let agent = self.orchestrator.lookup(&id);
            async move {
                match agent {
                    None => DispatchOutcome { agent_id: id, status: DispatchStatus::NotFound, result: None },
                    Some(agent) => match tokio::time::timeout(timeout, agent.reason(&task, None)).await {
                        Ok(thought) if thought.error.is_none() => {
                            DispatchOutcome { agent_id: id, status: DispatchStatus::Completed, result: thought.result }
                        }
                        Ok(thought) => DispatchOutcome { agent_id: id, status: DispatchStatus::Error, result: thought.result },
                        Err(_) => DispatchOutcome { agent_id: id, status: DispatchStatus::Timeout, result: None },
                    },
                }
            }
        });
        futures::future::join_all(dispatches).await
    }

    /// Races `to`'s `reason(subtask)` against `timeout_ms`; never throws,
    /// returns `{success, error?}` instead (§4.10). `from` is recorded for
    /// tracing only — the dispatch itself addresses `to` directly rather
    /// than routing through the messenger's help-request/response dance.
    pub async fn delegate(&self, from: &str, to: &str, subtask: &str, timeout_ms: Option<u64>) -> DelegationResult {
        let timeout = Duration::from_millis(timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS));
        let Some(agent) = self.orchestrator.lookup(to) else {
            return DelegationResult { success: false, error: Some(format!("unknown agent {to}")) };
        };
        tracing::debug!(from, to, "delegating subtask");
        match tokio::time::timeout(timeout, agent.reason(subtask, None)).await {
            Ok(thought) if thought.error.is_none() => DelegationResult { success: true, error: None },
            Ok(thought) => DelegationResult { success: false, error: thought.error },
            Err(_) => DelegationResult { success: false, error: Some("delegation timed out".to_string()) },
        }
    }

    /// Dispatches `task` to every id in parallel, casts each completed
    /// result's `(recommendation, confidence)` as a ballot, and evaluates a
    /// consensus session under `strategy` (§4.10). Agents that timed out,
    /// weren't found, or errored simply don't vote.
    pub async fn run_consensus(&self, agent_ids: &[String], task: &str, strategy: ConsensusStrategy, timeout_ms: Option<u64>) -> ConsensusResult {
        let outcomes = self.dispatch_parallel(agent_ids, task, timeout_ms).await;
        let session_id = format!("consensus-{}", uuid::Uuid::new_v4().simple());
        let session = self.orchestrator.consensus.open_session(session_id, strategy, agent_ids.to_vec());
        for outcome in &outcomes {
            if let Some(result) = &outcome.result {
                session.vote(Vote {
                    voter_id: outcome.agent_id.clone(),
                    decision: result.recommendation.as_str().to_string(),
                    confidence: result.confidence,
                });
            }
        }
        self.orchestrator.consensus.evaluate(&session).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use crate::kv::InMemoryKVStore;
    use crate::memory::MemoryStore;
    use crate::prompt_templates::Recommendation;
    use async_trait::async_trait;

    struct StubAgent {
        id: String,
        recommendation: Recommendation,
        confidence: f64,
        delay_ms: u64,
        fail: bool,
    }

    #[async_trait]
    impl Agent for StubAgent {
        fn agent_id(&self) -> &str {
            &self.id
        }
        fn name(&self) -> &str {
            &self.id
        }
        async fn reason(&self, input: &str, _context: Option<Value>) -> Thought {
            if self.delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
            }
            let result = ObserveOutput {
                summary: format!("handled {input}"),
                risk_score: 10.0,
                recommendation: self.recommendation,
                confidence: self.confidence,
                reasoning: "stub".into(),
                key_findings: vec![],
            };
            Thought {
                trace_id: "t".into(),
                timestamp: 0,
                input: input.to_string(),
                context: Value::Null,
                reasoning: vec![],
                actions: vec![],
                result: if self.fail { None } else { Some(result) },
                chain_of_thought: crate::types::Chain::new("c"),
                error: if self.fail { Some("boom".into()) } else { None },
                pattern_matches: None,
            }
        }
    }

    fn consensus_engine() -> Arc<ConsensusEngine> {
        let clock: Arc<dyn crate::clock::Clock> = Arc::new(MockClock::new(0));
        let store: Arc<dyn crate::kv::KVStore> = Arc::new(InMemoryKVStore::new());
        Arc::new(ConsensusEngine::new(Arc::new(MemoryStore::new(store, clock.clone())), clock))
    }

    fn orchestrator() -> Arc<Orchestrator> {
        Arc::new(Orchestrator::new(consensus_engine()))
    }

    #[tokio::test]
    async fn dispatch_parallel_reports_not_found_for_unregistered_agents() {
        let orch = orchestrator();
        let outcomes = Coordinator::new(orch).dispatch_parallel(&["ghost".into()], "task", None).await;
        assert_eq!(outcomes[0].status, DispatchStatus::NotFound);
    }

    #[tokio::test]
    async fn dispatch_parallel_reports_timeout() {
        let orch = orchestrator();
        orch.register(Arc::new(StubAgent { id: "A1".into(), recommendation: Recommendation::Approve, confidence: 0.9, delay_ms: 50, fail: false }));
        let outcomes = Coordinator::new(orch).dispatch_parallel(&["A1".into()], "task", Some(5)).await;
        assert_eq!(outcomes[0].status, DispatchStatus::Timeout);
    }

    #[tokio::test]
    async fn dispatch_parallel_reports_completed() {
        let orch = orchestrator();
        orch.register(Arc::new(StubAgent { id: "A1".into(), recommendation: Recommendation::Approve, confidence: 0.9, delay_ms: 0, fail: false }));
        let outcomes = Coordinator::new(orch).dispatch_parallel(&["A1".into()], "task", None).await;
        assert_eq!(outcomes[0].status, DispatchStatus::Completed);
        assert!(outcomes[0].result.is_some());
    }

    #[tokio::test]
    async fn delegate_to_unknown_agent_fails_without_panicking() {
        let orch = orchestrator();
        let result = Coordinator::new(orch).delegate("A1", "ghost", "help", None).await;
        assert!(!result.success);
    }

    #[tokio::test]
    async fn delegate_surfaces_agent_error() {
        let orch = orchestrator();
        orch.register(Arc::new(StubAgent { id: "A2".into(), recommendation: Recommendation::Approve, confidence: 0.5, delay_ms: 0, fail: true }));
        let result = Coordinator::new(orch).delegate("A1", "A2", "help", None).await;
        assert!(!result.success);
        assert!(result.error.is_some());
    }

    #[tokio::test]
    async fn run_consensus_reaches_majority_from_agent_recommendations() {
        let orch = orchestrator();
        orch.register(Arc::new(StubAgent { id: "A1".into(), recommendation: Recommendation::Approve, confidence: 0.8, delay_ms: 0, fail: false }));
        orch.register(Arc::new(StubAgent { id: "A2".into(), recommendation: Recommendation::Approve, confidence: 0.7, delay_ms: 0, fail: false }));
        orch.register(Arc::new(StubAgent { id: "A3".into(), recommendation: Recommendation::Block, confidence: 0.9, delay_ms: 0, fail: false }));
        let ids = vec!["A1".to_string(), "A2".to_string(), "A3".to_string()];
        let result = Coordinator::new(orch).run_consensus(&ids, "evaluate", ConsensusStrategy::Majority, None).await;
        assert!(result.consensus);
        assert_eq!(result.decision.as_deref(), Some("APPROVE"));
    }

    #[tokio::test]
    async fn execute_workflow_runs_sequential_steps_and_threads_state() {
        let orch = orchestrator();
        orch.register(Arc::new(StubAgent { id: "A1".into(), recommendation: Recommendation::Approve, confidence: 0.9, delay_ms: 0, fail: false }));
        orch.register(Arc::new(StubAgent { id: "A2".into(), recommendation: Recommendation::Monitor, confidence: 0.6, delay_ms: 0, fail: false }));

        let steps = vec![
            WorkflowStep::sequential("A1", |_state| "first".to_string()).with_output_key("first_summary"),
            WorkflowStep::sequential("A2", |state| format!("second given {}", state["first_summary"])).with_output_key("second_summary"),
        ];
        let result = orch.execute_workflow(steps, Value::Object(Default::default())).await;
        assert!(result.success);
        assert_eq!(result.steps.len(), 2);
        assert!(result.state["second_summary"].as_str().unwrap().contains("handled first"));
    }

    #[tokio::test]
    async fn execute_workflow_stops_on_required_step_failure() {
        let orch = orchestrator();
        orch.register(Arc::new(StubAgent { id: "A1".into(), recommendation: Recommendation::Approve, confidence: 0.9, delay_ms: 0, fail: true }));
        orch.register(Arc::new(StubAgent { id: "A2".into(), recommendation: Recommendation::Approve, confidence: 0.9, delay_ms: 0, fail: false }));

        let steps = vec![
            WorkflowStep::sequential("A1", |_| "x".to_string()),
            WorkflowStep::sequential("A2", |_| "y".to_string()),
        ];
        let result = orch.execute_workflow(steps, Value::Object(Default::default())).await;
        assert!(!result.success);
        assert_eq!(result.failed_step.as_deref(), Some("A1"));
        assert_eq!(result.steps.len(), 1);
    }

    #[tokio::test]
    async fn execute_workflow_continues_past_optional_step_failure() {
        let orch = orchestrator();
        orch.register(Arc::new(StubAgent { id: "A1".into(), recommendation: Recommendation::Approve, confidence: 0.9, delay_ms: 0, fail: true }));
        orch.register(Arc::new(StubAgent { id: "A2".into(), recommendation: Recommendation::Approve, confidence: 0.9, delay_ms: 0, fail: false }));

        let steps = vec![
            WorkflowStep::sequential("A1", |_| "x".to_string()).optional(),
            WorkflowStep::sequential("A2", |_| "y".to_string()),
        ];
        let result = orch.execute_workflow(steps, Value::Object(Default::default())).await;
        assert!(result.success);
        assert_eq!(result.steps.len(), 2);
    }

    #[tokio::test]
    async fn execute_workflow_runs_parallel_group_concurrently() {
        let orch = orchestrator();
        orch.register(Arc::new(StubAgent { id: "A1".into(), recommendation: Recommendation::Approve, confidence: 0.9, delay_ms: 20, fail: false }));
        orch.register(Arc::new(StubAgent { id: "A2".into(), recommendation: Recommendation::Approve, confidence: 0.9, delay_ms: 20, fail: false }));

        let steps = vec![
            WorkflowStep::sequential("A1", |_| "x".to_string()).in_group("g1"),
            WorkflowStep::sequential("A2", |_| "y".to_string()).in_group("g1"),
        ];
        let start = std::time::Instant::now();
        let result = orch.execute_workflow(steps, Value::Object(Default::default())).await;
        assert!(result.success);
        assert!(start.elapsed().as_millis() < 40);
    }
}
