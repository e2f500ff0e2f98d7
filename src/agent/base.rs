//! BaseAgent (§4.1): the single Think -> Plan -> Act -> Observe -> Reflect ->
//! Conclude -> Learn turn every agent in the system runs. `AutonomousAgent`
//! wraps one of these in a scan scheduler; specialized agents compose one as
//! a field rather than subclassing it.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde_json::Value;

use crate::config::AgentConfig;
use crate::context::default_assemble_input;
use crate::llm::CompletionOptions;
use crate::pattern_memory::{LearnPatternInput, MatchResult, Outcome};
use crate::prompt_templates::{
    build_observe_prompt, build_plan_prompt, build_replan_prompt, build_reflect_prompt, build_think_prompt,
    is_action_query, observe_schema, plan_fallback, plan_schema, reflect_fallback, reflect_schema,
    response_quality_score, rule_based_observe, think_fallback, think_schema, ObserveOutput, PlanOutput,
    PlannedAction, Recommendation, ReflectOutput, ThinkOutput,
};
use crate::runtime::Runtime;
use crate::tools::ToolRegistry;
use crate::trace::Trace;
use crate::types::{Action, ActionRecord, ActionResult, AgentStatus, Chain, ConfidenceLevel, StepType, Thought};

use super::Agent;

const MAX_PLANNED_ACTIONS: usize = 10;
const CONSOLIDATE_EVERY_N_TURNS: u64 = 20;

/// A label the reasoning turn leaves in the tool executor / metrics path for
/// whole-turn timing, distinct from any individually named tool.
const TURN_PSEUDO_TOOL: &str = "reason";

fn recommendation_to_outcome(rec: Recommendation) -> Outcome {
    match rec {
        Recommendation::Approve => Outcome::LegitimateConfirmed,
        Recommendation::Monitor | Recommendation::Review => Outcome::Suspicious,
        Recommendation::Reject | Recommendation::Block => Outcome::FraudConfirmed,
    }
}

/// Free-text input is reduced to a flat feature map either by treating a
/// JSON object payload as-is, or wrapping plain text in a single `text` key.
/// Pattern matching has no stronger contract on what "features" means for
/// unstructured input, so this is the reasonable default.
pub fn extract_features(input: &str) -> HashMap<String, Value> {
    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(input) {
        return map.into_iter().collect();
    }
    let mut features = HashMap::new();
    features.insert("text".to_string(), Value::String(input.to_string()));
    features
}

/// `BaseAgent` construction config plus a fixed `agent_id`/`name`/`role`
/// triple (§3 "Agent").
pub struct BaseAgent {
    config: AgentConfig,
    status: RwLock<AgentStatus>,
    tools: Arc<ToolRegistry>,
    session_id: String,
    runtime: Arc<Runtime>,
    thought_log: RwLock<VecDeque<Thought>>,
    replan_count: AtomicU32,
    turn_counter: AtomicU64,
    last_turn_successes: RwLock<Vec<String>>,
    last_turn_failures: RwLock<Vec<String>>,
}

impl BaseAgent {
    pub fn new(config: AgentConfig, tools: Arc<ToolRegistry>, runtime: Arc<Runtime>) -> Self {
        runtime.register_agent(&config.agent_id);
        let session_id = format!("session-{}", uuid::Uuid::new_v4().simple());
        Self {
            config,
            status: RwLock::new(AgentStatus::Idle),
            tools,
            session_id,
            runtime,
            thought_log: RwLock::new(VecDeque::new()),
            replan_count: AtomicU32::new(0),
            turn_counter: AtomicU64::new(0),
            last_turn_successes: RwLock::new(Vec::new()),
            last_turn_failures: RwLock::new(Vec::new()),
        }
    }

    pub fn status(&self) -> AgentStatus {
        *self.status.read().unwrap()
    }

    /// Plain (non-trait-object) accessors `AutonomousAgent` uses since it
    /// holds a `BaseAgent` field directly rather than through `dyn Agent`.
    pub fn agent_id_raw(&self) -> &str {
        &self.config.agent_id
    }

    pub fn name_raw(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn runtime(&self) -> &Arc<Runtime> {
        &self.runtime
    }

    pub fn tools(&self) -> &Arc<ToolRegistry> {
        &self.tools
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn thought_log(&self) -> Vec<Thought> {
        self.thought_log.read().unwrap().iter().cloned().collect()
    }

    fn push_thought(&self, thought: Thought) {
        let mut log = self.thought_log.write().unwrap();
        log.push_back(thought);
        while log.len() > self.config.max_memory_size {
            log.pop_front();
        }
    }

    fn completion_opts(&self) -> CompletionOptions {
        CompletionOptions {
            agent_id: Some(self.config.agent_id.clone()),
            ..Default::default()
        }
    }

    /// Records `entry` into short-term memory for this agent's session.
    /// Called from Learn; swallows store errors beyond logging, since a
    /// failed memory write must not fail the turn (§7: every boundary
    /// wrapped, the turn is the unit of recovery).
    async fn remember(&self, entry: Value) {
        if let Err(err) = self.runtime.memory.short_term.save(&self.config.agent_id, &self.session_id, entry).await {
            tracing::warn!(agent_id = %self.config.agent_id, error = %err, "failed to record short-term memory");
        }
    }

    async fn think(&self, input: &str, context: &str) -> ThinkOutput {
        let prompt = build_think_prompt(&self.config.name, &self.config.role, input, context);
        let value = self
            .runtime
            .llm
            .complete_with_json_retry(&prompt.system, &prompt.user, &think_schema(), think_fallback(), self.completion_opts())
            .await;
        serde_json::from_value(value).unwrap_or_else(|_| serde_json::from_value(think_fallback()).unwrap())
    }

    async fn plan(&self, input: &str, think: &ThinkOutput) -> PlanOutput {
        let catalog = self.tools.standard_catalog();
        let prompt = build_plan_prompt(&self.config.name, &catalog, think, input);
        let value = self
            .runtime
            .llm
            .complete_with_json_retry(&prompt.system, &prompt.user, &plan_schema(), plan_fallback(), self.completion_opts())
            .await;
        let mut plan: PlanOutput = serde_json::from_value(value).unwrap_or_else(|_| serde_json::from_value(plan_fallback()).unwrap());
        self.validate_plan(&mut plan);
        plan
    }

    /// Drops any action whose tool isn't registered on this agent (§8
    /// invariant 3: `actions[i].tool` must be a registered tool), then caps
    /// the remainder at 10.
    fn validate_plan(&self, plan: &mut PlanOutput) {
        plan.actions.retain(|a| {
            let ok = self.tools.is_registered(&a.tool);
            if !ok {
                tracing::warn!(agent_id = %self.config.agent_id, tool = %a.tool, "dropping planned action for unregistered tool");
            }
            ok
        });
        if plan.actions.len() > MAX_PLANNED_ACTIONS {
            plan.actions.truncate(MAX_PLANNED_ACTIONS);
        }
    }

    /// §4.11: re-plans once per turn when the prior turn's actions mostly
    /// failed. Takes the prior turn's recorded tool names, not the current
    /// plan's.
    async fn maybe_replan(&self, plan: PlanOutput) -> PlanOutput {
        let successes = self.last_turn_successes.read().unwrap().clone();
        let failures = self.last_turn_failures.read().unwrap().clone();
        let total = successes.len() + failures.len();
        let failure_ratio = if total == 0 { 0.0 } else { failures.len() as f64 / total as f64 };

        if failure_ratio <= 0.5 || self.replan_count.load(Ordering::SeqCst) != 0 {
            return plan;
        }

        let catalog = self.tools.standard_catalog();
        let prompt = build_replan_prompt(&plan.goal, &successes, &failures, &catalog);
        let value = self
            .runtime
            .llm
            .complete_with_json_retry(&prompt.system, &prompt.user, &plan_schema(), serde_json::to_value(&plan).unwrap(), self.completion_opts())
            .await;
        self.replan_count.store(1, Ordering::SeqCst);

        let mut replanned: PlanOutput = serde_json::from_value(value).unwrap_or(plan);
        self.validate_plan(&mut replanned);
        replanned
    }

    async fn act(&self, actions: &[PlannedAction], chain: &mut Chain) -> Vec<ActionRecord> {
        let executor = self.runtime.tool_executor(self.tools.clone());
        let mut records = Vec::with_capacity(actions.len());
        let mut successes = Vec::new();
        let mut failures = Vec::new();
        let mut last_call: Option<(&str, &Value)> = None;

        for planned in actions {
            if last_call == Some((planned.tool.as_str(), &planned.params)) {
                tracing::warn!(agent_id = %self.config.agent_id, tool = %planned.tool, "redundant tool call detected, skipping execution");
                chain.push(
                    StepType::Evidence,
                    format!("SYSTEM HINT: redundant call to {} skipped", planned.tool),
                    Some(ConfidenceLevel::Speculative),
                );
                failures.push(planned.tool.clone());
                records.push(ActionRecord {
                    action: Action {
                        tool: planned.tool.clone(),
                        params: planned.params.clone(),
                        rationale: if planned.rationale.is_empty() { None } else { Some(planned.rationale.clone()) },
                    },
                    result: ActionResult {
                        success: false,
                        data: None,
                        error: Some("SYSTEM HINT: redundant tool call detected; try a different approach".to_string()),
                    },
                });
                continue;
            }
            last_call = Some((planned.tool.as_str(), &planned.params));

            self.runtime.events.publish(
                "agent:action:start",
                serde_json::json!({
                    "agentId": self.config.agent_id,
                    "action": planned.tool,
                    "params": planned.params,
                }),
            );

            let outcome = executor.execute(&self.config.agent_id, &planned.tool, planned.params.clone()).await;

            self.runtime.events.publish(
                "agent:action:complete",
                serde_json::json!({
                    "agentId": self.config.agent_id,
                    "action": planned.tool,
                    "success": outcome.success,
                    "error": outcome.error,
                }),
            );

            if outcome.success {
                successes.push(planned.tool.clone());
            } else {
                failures.push(planned.tool.clone());
            }

            if outcome.data.is_some() {
                chain.push(StepType::Evidence, format!("{} returned data", planned.tool), Some(ConfidenceLevel::Certain));
            }

            records.push(ActionRecord {
                action: Action {
                    tool: planned.tool.clone(),
                    params: planned.params.clone(),
                    rationale: if planned.rationale.is_empty() { None } else { Some(planned.rationale.clone()) },
                },
                result: ActionResult::from_outcome(&outcome),
            });
        }

        *self.last_turn_successes.write().unwrap() = successes;
        *self.last_turn_failures.write().unwrap() = failures;

        records
    }

    async fn observe(&self, goal: &str, actions: &[ActionRecord]) -> ObserveOutput {
        let total = actions.len();
        let failed = actions.iter().filter(|a| !a.result.success).count();
        let action_summary = if actions.is_empty() {
            "(no actions were taken)".to_string()
        } else {
            actions
                .iter()
                .map(|a| {
                    format!(
                        "{}: {}",
                        a.action.tool,
                        if a.result.success { "ok".to_string() } else { a.result.error.clone().unwrap_or_default() }
                    )
                })
                .collect::<Vec<_>>()
                .join("\n")
        };

        let fallback = rule_based_observe(total, failed, &action_summary);
        if !self.runtime.llm.is_enabled() {
            return fallback;
        }

        let prompt = build_observe_prompt(&self.config.name, goal, &action_summary);
        let fallback_value = serde_json::to_value(&fallback).unwrap();
        let value = self
            .runtime
            .llm
            .complete_with_json_retry(&prompt.system, &prompt.user, &observe_schema(), fallback_value, self.completion_opts())
            .await;
        let mut observe: ObserveOutput = serde_json::from_value(value).unwrap_or(fallback);

        let quality = response_quality_score(&observe.reasoning).min(response_quality_score(&observe.summary));
        if quality < 1.0 {
            tracing::warn!(agent_id = %self.config.agent_id, quality, "downgrading observe confidence: low response quality");
            observe.confidence *= quality;
        }
        observe
    }

    /// §4.1 step 9: a single second-opinion pass, applied only when
    /// `reflectionConfidence > observeConfidence` (Open Question 3).
    async fn reflect(&self, observe: &mut ObserveOutput) {
        if !self.runtime.llm.is_enabled() {
            return;
        }

        let prompt = build_reflect_prompt(observe);
        let value = self
            .runtime
            .llm
            .complete_with_json_retry(&prompt.system, &prompt.user, &reflect_schema(), reflect_fallback(), self.completion_opts())
            .await;
        let reflect: ReflectOutput = serde_json::from_value(value).unwrap_or_else(|_| serde_json::from_value(reflect_fallback()).unwrap());

        if !reflect.should_revise || reflect.reflection_confidence <= observe.confidence {
            return;
        }

        if let Some(revised_confidence) = reflect.revised_confidence {
            observe.confidence = revised_confidence;
        }
        if let Some(action) = &reflect.revised_action {
            if let Some(rec) = parse_recommendation(action) {
                observe.recommendation = rec;
            }
        }
        observe.key_findings.extend(reflect.concerns);
    }

    async fn learn(&self, input: &str, observe: &ObserveOutput) {
        let features = extract_features(input);
        let outcome = recommendation_to_outcome(observe.recommendation);
        self.runtime.patterns.learn_pattern(LearnPatternInput {
            ty: self.config.role.clone(),
            features,
            outcome,
            confidence: observe.confidence,
        });

        if let Err(err) = self.runtime.self_correction.log_prediction(&self.config.agent_id, &format!("{:?}", observe.recommendation), observe.confidence).await {
            tracing::warn!(agent_id = %self.config.agent_id, error = %err, "failed to log prediction");
        }

        self.remember(serde_json::json!({
            "type": "turn",
            "action": observe.recommendation,
            "summary": observe.summary,
        }))
        .await;

        let turn = self.turn_counter.fetch_add(1, Ordering::SeqCst) + 1;
        if turn % CONSOLIDATE_EVERY_N_TURNS == 0 {
            if let Err(err) = self.runtime.memory.consolidate_session(&self.config.agent_id, &self.session_id).await {
                tracing::warn!(agent_id = %self.config.agent_id, error = %err, "failed to consolidate session memory");
            }
        }
    }

    /// Records ground truth against a prior prediction, feeding both the
    /// rolling accuracy window and the confidence calibrator. Call once the
    /// real outcome of a decision becomes known (deliberately not called
    /// from `learn`, which runs before any ground truth exists).
    pub async fn record_feedback(&self, prediction_id: &str, actual: &str) -> anyhow::Result<bool> {
        let correct = self.runtime.self_correction.record_outcome(prediction_id, actual).await?;
        // `SelfCorrection` doesn't hand back the original confidence, so the
        // calibrator is fed a coarse correct/incorrect split rather than the
        // exact predicted value.
        self.runtime.calibrator.record_prediction(if correct { 0.8 } else { 0.2 }, correct).await?;
        Ok(correct)
    }

    async fn run_turn(&self, input: &str, autonomous_context: Option<Value>) -> Thought {
        self.replan_count.store(0, Ordering::SeqCst);
        *self.status.write().unwrap() = AgentStatus::Busy;

        let trace_id = format!("trace-{}", uuid::Uuid::new_v4().simple());
        let trace = Trace::new(self.runtime.clock.clone(), trace_id.clone());
        let reason_span = trace.start_span("reason");

        let mut chain = Chain::new(format!("chain-{}", uuid::Uuid::new_v4().simple()));
        let mut reasoning: Vec<String> = Vec::new();

        let result = self.run_turn_body(input, &mut chain, &mut reasoning).await;

        let (context_value, actions, result_output, pattern_matches, error) = match result {
            Ok((ctx, actions, observe, matches)) => (ctx, actions, Some(observe), Some(matches), None),
            Err(err) => (Value::Null, Vec::new(), None, None, Some(err.to_string())),
        };

        chain.push(
            StepType::Conclusion,
            error.clone().unwrap_or_else(|| "turn completed".to_string()),
            Some(if error.is_some() { ConfidenceLevel::Certain } else { ConfidenceLevel::Likely }),
        );
        chain.compress_if_needed();

        trace.end_span(reason_span, error.is_none());

        let context_value = match autonomous_context {
            Some(ac) if context_value.is_object() => {
                let mut merged = context_value;
                merged["autonomous"] = ac;
                merged
            }
            Some(ac) => ac,
            None => context_value,
        };

        let thought = Thought {
            trace_id: trace_id.clone(),
            timestamp: self.runtime.clock.now_ms(),
            input: input.to_string(),
            context: context_value,
            reasoning,
            actions,
            result: result_output.clone(),
            chain_of_thought: chain.clone(),
            error: error.clone(),
            pattern_matches,
        };

        self.runtime.metrics.record_tool_use(&self.config.agent_id, TURN_PSEUDO_TOOL, trace.total_duration_ms().max(0) as u64, error.is_none());

        let plain_view = result_output
            .as_ref()
            .map(|o| o.summary.clone())
            .unwrap_or_else(|| error.clone().unwrap_or_default());
        let tech_view = crate::decision_log::render_tech_view(&trace.spans(), &reasoning_texts(&chain));
        if let Err(err) = self
            .runtime
            .decisions
            .log(&self.config.agent_id, &trace_id, plain_view, tech_view, chain.evidence_texts(), error.is_none(), error.clone())
            .await
        {
            tracing::warn!(agent_id = %self.config.agent_id, error = %err, "failed to log decision");
        }

        self.runtime.events.publish(
            "agent:thought",
            serde_json::json!({
                "agentId": self.config.agent_id,
                "agentName": self.config.name,
                "summary": thought.result.as_ref().map(|r| r.summary.clone()).unwrap_or_default(),
                "actionCount": thought.actions.len(),
            }),
        );

        self.push_thought(thought.clone());
        *self.status.write().unwrap() = AgentStatus::Idle;
        thought
    }

    /// The Context -> Pattern precheck -> Think -> Plan -> Re-plan -> Act ->
    /// Observe -> Reflect body, isolated behind `?` so any failure surfaces
    /// through one `anyhow::Error` that `run_turn` converts into
    /// `Thought.error` (§4.1's "never throws" contract, §7).
    async fn run_turn_body(
        &self,
        input: &str,
        chain: &mut Chain,
        reasoning: &mut Vec<String>,
    ) -> anyhow::Result<(Value, Vec<ActionRecord>, ObserveOutput, MatchResult)> {
        let mut assemble = default_assemble_input(self.session_id.clone(), format!("You are {}, {}.", self.config.name, self.config.role));
        assemble.rerank = true;
        let assembled = self.runtime.context.assemble(&self.config.agent_id, input, assemble).await;

        let features = extract_features(input);
        let matches = self.runtime.patterns.match_patterns(&features);
        if let Some(top) = matches.matches.first() {
            if top.score > 0.5 {
                chain.push(
                    StepType::Evidence,
                    format!("matched prior pattern {} (score {:.2})", top.pattern.pattern_id, top.score),
                    Some(ConfidenceLevel::Likely),
                );
            }
        }

        // §4.1 step 3: the pattern precheck is attached to context as well
        // as returned on `Thought.pattern_matches`.
        let context_value = serde_json::json!({
            "_assembledContext": assembled.prompt,
            "sources": assembled.sources,
            "tokenCount": assembled.token_count,
            "patternMatches": serde_json::to_value(&matches).unwrap_or(Value::Null),
        });

        let think = self.think(input, &assembled.prompt).await;
        reasoning.push(think.understanding.clone());
        chain.push(StepType::Hypothesis, think.suggested_approach.clone(), confidence_level(think.confidence));

        let plan = self.plan(input, &think).await;
        reasoning.push(plan.reasoning.clone());
        let plan = self.maybe_replan(plan).await;

        let lazy = plan.actions.is_empty() && is_action_query(input);
        if lazy {
            tracing::warn!(agent_id = %self.config.agent_id, "laziness guard: action-shaped input produced an empty plan");
            chain.push(
                StepType::Evidence,
                "SYSTEM HINT: input requires action but the plan proposed none".to_string(),
                Some(ConfidenceLevel::Speculative),
            );
        }

        let actions = self.act(&plan.actions, chain).await;

        let mut observe = self.observe(&plan.goal, &actions).await;
        reasoning.push(observe.reasoning.clone());
        if lazy {
            observe.confidence *= 0.5;
            observe.key_findings.push("no tools were used despite an action-shaped request".to_string());
        }
        self.reflect(&mut observe).await;

        self.learn(input, &observe).await;

        Ok((context_value, actions, observe, matches))
    }
}

fn confidence_level(raw: f64) -> Option<ConfidenceLevel> {
    Some(if raw >= 0.9 {
        ConfidenceLevel::Certain
    } else if raw >= 0.6 {
        ConfidenceLevel::Likely
    } else if raw >= 0.3 {
        ConfidenceLevel::Possible
    } else {
        ConfidenceLevel::Speculative
    })
}

fn parse_recommendation(raw: &str) -> Option<Recommendation> {
    match raw.to_uppercase().as_str() {
        "APPROVE" => Some(Recommendation::Approve),
        "REVIEW" => Some(Recommendation::Review),
        "REJECT" => Some(Recommendation::Reject),
        "BLOCK" => Some(Recommendation::Block),
        "MONITOR" => Some(Recommendation::Monitor),
        _ => None,
    }
}

fn reasoning_texts(chain: &Chain) -> Vec<String> {
    chain.steps().iter().map(|s| s.text.clone()).collect()
}

#[async_trait]
impl Agent for BaseAgent {
    fn agent_id(&self) -> &str {
        &self.config.agent_id
    }

    fn name(&self) -> &str {
        &self.config.name
    }

    async fn reason(&self, input: &str, context: Option<Value>) -> Thought {
        self.run_turn(input, context).await
    }
}
