//! Core data model (§3): Action, Thought, Chain of Thought.
//!
//! Kept separate from the components that produce them (`agent/mod.rs`,
//! `prompt_templates.rs`) the way the agency splits `agent/types.rs` from
//! `agent/react.rs`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::pattern_memory::MatchResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Idle,
    Busy,
    Evaluating,
}

/// A planned tool invocation (§3 "Action").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    pub tool: String,
    pub params: Value,
    pub rationale: Option<String>,
}

/// `{success, data?, error?}`. An action is successful iff `success != false`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionResult {
    pub success: bool,
    pub data: Option<Value>,
    pub error: Option<String>,
}

impl ActionResult {
    pub fn from_outcome(outcome: &crate::tools::ToolOutcome) -> Self {
        Self {
            success: outcome.success,
            data: outcome.data.clone(),
            error: outcome.error.clone(),
        }
    }
}

/// An action and its result, always paired (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionRecord {
    pub action: Action,
    pub result: ActionResult,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepType {
    Observation,
    Hypothesis,
    Evidence,
    Analysis,
    Inference,
    Conclusion,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceLevel {
    Speculative,
    Possible,
    Likely,
    Certain,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainStep {
    #[serde(rename = "type")]
    pub step_type: StepType,
    pub text: String,
    pub confidence: Option<ConfidenceLevel>,
}

/// Ordered, append-only audit trail for a single reasoning turn (§3). A chain
/// terminates once a `conclusion` step is recorded; further pushes are
/// refused silently rather than erroring, since the turn that owns the chain
/// is already wrapping up.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chain {
    pub chain_id: String,
    steps: Vec<ChainStep>,
    concluded: bool,
}

/// Steps beyond this are summarized (SPEC_FULL §10 trace compression),
/// mirrored from the agency's `react.rs` context-compaction threshold.
const COMPRESS_AFTER: usize = 5;
const COMPRESS_KEEP_TAIL: usize = 3;

impl Chain {
    pub fn new(chain_id: impl Into<String>) -> Self {
        Self {
            chain_id: chain_id.into(),
            steps: Vec::new(),
            concluded: false,
        }
    }

    pub fn push(&mut self, step_type: StepType, text: impl Into<String>, confidence: Option<ConfidenceLevel>) {
        if self.concluded {
            return;
        }
        if step_type == StepType::Conclusion {
            self.concluded = true;
        }
        self.steps.push(ChainStep {
            step_type,
            text: text.into(),
            confidence,
        });
    }

    pub fn is_concluded(&self) -> bool {
        self.concluded
    }

    pub fn steps(&self) -> &[ChainStep] {
        &self.steps
    }

    pub fn evidence_texts(&self) -> Vec<String> {
        self.steps
            .iter()
            .filter(|s| s.step_type == StepType::Evidence)
            .map(|s| s.text.clone())
            .collect()
    }

    /// Keeps the first step and the last `COMPRESS_KEEP_TAIL` steps, folding
    /// everything in between into one synthetic analysis step, once the
    /// chain grows past `COMPRESS_AFTER` steps. Never compresses a concluded
    /// chain's tail away.
    pub fn compress_if_needed(&mut self) {
        if self.steps.len() <= COMPRESS_AFTER {
            return;
        }
        let first = self.steps[0].clone();
        let tail_start = self.steps.len().saturating_sub(COMPRESS_KEEP_TAIL);
        let summarized_count = tail_start - 1;
        let tail: Vec<ChainStep> = self.steps[tail_start..].to_vec();
        let mut compacted = Vec::with_capacity(2 + tail.len());
        compacted.push(first);
        compacted.push(ChainStep {
            step_type: StepType::Analysis,
            text: format!("[{summarized_count} earlier steps summarized]"),
            confidence: None,
        });
        compacted.extend(tail);
        self.steps = compacted;
    }
}

/// The complete record of one reasoning turn (§3 "Thought").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thought {
    pub trace_id: String,
    pub timestamp: i64,
    pub input: String,
    pub context: Value,
    pub reasoning: Vec<String>,
    pub actions: Vec<ActionRecord>,
    pub result: Option<crate::prompt_templates::ObserveOutput>,
    pub chain_of_thought: Chain,
    pub error: Option<String>,
    pub pattern_matches: Option<MatchResult>,
}

impl Thought {
    pub fn success(&self) -> bool {
        self.error.is_none()
    }
}
