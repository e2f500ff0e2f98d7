//! PolicyEvolutionAgent (SPEC_FULL §10): proposes rule changes from pattern
//! drift.
//!
//! An `AutonomousAgent` composition: `build_scan_input` summarizes patterns
//! whose `successRate` has fallen (the case record no longer matches the
//! rule built on it), and `post_cycle` emits a
//! `policy-evolution:rule-proposed` event whenever the resulting
//! recommendation calls for tightening or blocking, alongside the cycle's
//! always-on completion event.

use std::sync::Arc;

use serde_json::Value;

use crate::agent::{AutonomousAgent, BaseAgent, ScanHooks};
use crate::config::{AgentConfig, AutonomousConfig};
use crate::pattern_memory::PatternMemory;
use crate::prompt_templates::Recommendation;
use crate::runtime::Runtime;
use crate::tools::ToolRegistry;

pub const CAPABILITY: &str = "policy_evolution";

/// Patterns below this success rate are treated as drifted.
const DRIFT_SUCCESS_RATE_THRESHOLD: f64 = 0.6;

fn build_scan_input(patterns: Arc<PatternMemory>) -> Box<dyn Fn(&[Value]) -> String + Send + Sync> {
    Box::new(move |events: &[Value]| {
        let drifted: Vec<String> = patterns
            .drifted(DRIFT_SUCCESS_RATE_THRESHOLD)
            .into_iter()
            .map(|p| {
                format!(
                    "{} (type={}, successRate={:.2}, occurrences={})",
                    p.pattern_id, p.ty, p.success_rate, p.occurrences
                )
            })
            .collect();
        serde_json::json!({
            "task": "review drifted fraud patterns and propose rule changes",
            "driftedPatterns": drifted,
            "recentEvents": events.len(),
        })
        .to_string()
    })
}

pub struct PolicyEvolutionAgent;

impl PolicyEvolutionAgent {
    /// Wires a `BaseAgent` with a pattern-drift-aware scan scheduler
    /// (§4.2's `ScanHooks` pair). Returns the `Arc<AutonomousAgent>` ready
    /// for `start()`.
    pub fn new(tools: Arc<ToolRegistry>, runtime: Arc<Runtime>, scan: AutonomousConfig) -> Arc<AutonomousAgent> {
        let config = AgentConfig {
            name: "Policy Evolution Scout".to_string(),
            role: "fraud policy analyst".to_string(),
            capabilities: vec![CAPABILITY.to_string()],
            ..Default::default()
        };
        let base = BaseAgent::new(config, tools, runtime.clone());
        let patterns = runtime.patterns.clone();
        let events = runtime.events.clone();

        let hooks = ScanHooks {
            build_scan_input: build_scan_input(patterns),
            post_cycle: Box::new(move |thought| {
                if let Some(result) = &thought.result {
                    if matches!(result.recommendation, Recommendation::Review | Recommendation::Block) {
                        events.publish(
                            "policy-evolution:rule-proposed",
                            serde_json::json!({
                                "summary": result.summary,
                                "riskScore": result.risk_score,
                                "keyFindings": result.key_findings,
                            }),
                        );
                    }
                }
                events.publish(
                    "policy-evolution:cycle-complete",
                    serde_json::json!({"success": thought.error.is_none()}),
                );
            }),
        };

        let agent = AutonomousAgent::new(base, runtime.clone(), scan, hooks);
        runtime.register_orchestrated_agent(agent.clone(), vec![CAPABILITY.to_string()]);
        agent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern_memory::{LearnPatternInput, Outcome};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn runs_a_cycle_and_records_history() {
        let runtime = Runtime::test().await;
        runtime.patterns.learn_pattern(LearnPatternInput {
            ty: "transaction".into(),
            features: HashMap::new(),
            outcome: Outcome::FalsePositive,
            confidence: 0.5,
        });
        let tools = Arc::new(ToolRegistry::new());
        let agent = PolicyEvolutionAgent::new(tools, runtime.clone(), AutonomousConfig::default());
        agent.ingest_event(serde_json::json!({"priority": "LOW"}));
        agent.run_one_cycle().await;
        assert_eq!(agent.run_history().len(), 1);
    }

    #[tokio::test]
    async fn cycle_complete_event_is_always_emitted() {
        let runtime = Runtime::test().await;
        let tools = Arc::new(ToolRegistry::new());
        let agent = PolicyEvolutionAgent::new(tools, runtime.clone(), AutonomousConfig::default());
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = count.clone();
        let _unsub = runtime.events.subscribe(
            "policy-evolution:cycle-complete",
            Arc::new(move |_topic: &str, _data: &Value| {
                count2.fetch_add(1, Ordering::SeqCst);
            }),
        );
        agent.ingest_event(serde_json::json!({"priority": "LOW"}));
        agent.run_one_cycle().await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exposes_the_policy_evolution_capability() {
        let runtime = Runtime::test().await;
        let tools = Arc::new(ToolRegistry::new());
        let agent = PolicyEvolutionAgent::new(tools, runtime, AutonomousConfig::default());
        assert_eq!(agent.agent_id().is_empty(), false);
    }
}
