//! Prompt Templates (§4.12)
//!
//! One builder per reasoning stage, each returning a `{system, user}` pair
//! and, where the stage expects structured output, the JSON schema passed to
//! `LLMClient::complete_with_json_retry`. Field names match §4.12 exactly so
//! schema validation round-trips without translation.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

#[derive(Debug, Clone)]
pub struct PromptPair {
    pub system: String,
    pub user: String,
}

fn catalog_block(catalog: &str) -> String {
    if catalog.is_empty() {
        "(no tools registered)".to_string()
    } else {
        catalog.to_string()
    }
}

// ---------------------------------------------------------------------
// Think
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThinkOutput {
    pub understanding: String,
    pub key_risks: Vec<String>,
    pub confidence: f64,
    pub suggested_approach: String,
}

pub fn think_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "understanding": {"type": "string"},
            "key_risks": {"type": "array", "items": {"type": "string"}},
            "confidence": {"type": "number", "minimum": 0, "maximum": 1},
            "suggested_approach": {"type": "string"}
        },
        "required": ["understanding", "key_risks", "confidence", "suggested_approach"]
    })
}

pub fn think_fallback() -> Value {
    json!({
        "understanding": "unable to reach the reasoning model; proceeding with a conservative default",
        "key_risks": [],
        "confidence": 0.3,
        "suggested_approach": "gather more evidence before acting"
    })
}

pub fn build_think_prompt(agent_name: &str, role: &str, input: &str, context: &str) -> PromptPair {
    PromptPair {
        system: format!(
            "You are {agent_name}, {role}. Read the task and the assembled context, then state your \
             understanding of the situation, the key risks, your confidence (0-1), and the approach \
             you would take. Respond with JSON matching the requested schema only."
        ),
        user: format!("## Task\n{input}\n\n## Context\n{context}"),
    }
}

// ---------------------------------------------------------------------
// Plan
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannedAction {
    pub tool: String,
    #[serde(default)]
    pub params: Value,
    #[serde(default)]
    pub rationale: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanOutput {
    pub goal: String,
    pub reasoning: String,
    pub actions: Vec<PlannedAction>,
}

pub fn plan_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "goal": {"type": "string"},
            "reasoning": {"type": "string"},
            "actions": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "tool": {"type": "string"},
                        "params": {"type": "object"},
                        "rationale": {"type": "string"}
                    },
                    "required": ["tool"]
                }
            }
        },
        "required": ["goal", "reasoning", "actions"]
    })
}

pub fn plan_fallback() -> Value {
    json!({
        "goal": "analyze the available evidence",
        "reasoning": "no actionable plan could be produced; falling back to a generic analysis step",
        "actions": [{"tool": "analyze", "params": {}, "rationale": "fallback"}]
    })
}

pub fn build_plan_prompt(agent_name: &str, tool_catalog: &str, think: &ThinkOutput, input: &str) -> PromptPair {
    PromptPair {
        system: format!(
            "You are {agent_name}. Using your understanding of the task, choose a goal and a short \
             sequence of tool calls (at most 10) that will gather the evidence needed to decide. You \
             may only call tools from the catalog below.\n\n## Available tools\n{}",
            catalog_block(tool_catalog)
        ),
        user: format!(
            "## Task\n{input}\n\n## Understanding\n{}\n\n## Suggested approach\n{}",
            think.understanding, think.suggested_approach
        ),
    }
}

/// §4.11 re-plan prompt, built when the prior turn's actions mostly failed.
pub fn build_replan_prompt(goal: &str, successes: &[String], failures: &[String], tool_catalog: &str) -> PromptPair {
    PromptPair {
        system: format!(
            "Your previous plan to achieve \"{goal}\" mostly failed. Propose a revised plan that \
             avoids repeating the failed actions and only uses tools from the catalog below.\n\n\
             ## Available tools\n{}",
            catalog_block(tool_catalog)
        ),
        user: format!(
            "## What succeeded\n{}\n\n## What failed\n{}",
            if successes.is_empty() { "(nothing)".to_string() } else { successes.join("\n") },
            if failures.is_empty() { "(nothing)".to_string() } else { failures.join("\n") },
        ),
    }
}

// ---------------------------------------------------------------------
// Observe
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Recommendation {
    Approve,
    Review,
    Reject,
    Block,
    Monitor,
}

impl Recommendation {
    /// The uppercase wire form fixed by §4.12's schema (`"APPROVE"`, ...),
    /// used anywhere a recommendation is compared or voted on as a string
    /// (consensus ballots, pattern-match recommendation mapping).
    pub fn as_str(&self) -> &'static str {
        match self {
            Recommendation::Approve => "APPROVE",
            Recommendation::Review => "REVIEW",
            Recommendation::Reject => "REJECT",
            Recommendation::Block => "BLOCK",
            Recommendation::Monitor => "MONITOR",
        }
    }
}

impl std::fmt::Display for Recommendation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObserveOutput {
    pub summary: String,
    pub risk_score: f64,
    pub recommendation: Recommendation,
    pub confidence: f64,
    pub reasoning: String,
    pub key_findings: Vec<String>,
}

pub fn observe_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "summary": {"type": "string"},
            "risk_score": {"type": "number", "minimum": 0, "maximum": 100},
            "recommendation": {"type": "string", "enum": ["APPROVE", "REVIEW", "REJECT", "BLOCK", "MONITOR"]},
            "confidence": {"type": "number", "minimum": 0, "maximum": 1},
            "reasoning": {"type": "string"},
            "key_findings": {"type": "array", "items": {"type": "string"}}
        },
        "required": ["summary", "risk_score", "recommendation", "confidence", "reasoning", "key_findings"]
    })
}

pub fn build_observe_prompt(agent_name: &str, goal: &str, action_summary: &str) -> PromptPair {
    PromptPair {
        system: format!(
            "You are {agent_name}. Summarize the results of the actions you took, assign a risk score \
             (0-100) and a recommendation (APPROVE, REVIEW, REJECT, BLOCK or MONITOR), and list the \
             key findings that support it."
        ),
        user: format!("## Goal\n{goal}\n\n## Action results\n{action_summary}"),
    }
}

/// A deterministic observation used when the LLM is disabled, its output
/// failed quality scoring, or the actions taken contain enough signal to
/// decide without a model call.
pub fn rule_based_observe(total_actions: usize, failed_actions: usize, action_summary: &str) -> ObserveOutput {
    let summary = format!("Completed {total_actions} action(s), {failed_actions} failed.");
    let failure_ratio = if total_actions == 0 { 0.0 } else { failed_actions as f64 / total_actions as f64 };
    let (recommendation, risk_score) = if failure_ratio > 0.5 {
        (Recommendation::Review, 60.0)
    } else if failed_actions > 0 {
        (Recommendation::Monitor, 40.0)
    } else {
        (Recommendation::Approve, 10.0)
    };
    ObserveOutput {
        summary,
        risk_score,
        recommendation,
        confidence: if total_actions == 0 { 0.3 } else { 1.0 - failure_ratio * 0.5 },
        reasoning: action_summary.to_string(),
        key_findings: Vec::new(),
    }
}

/// Keyword heuristic for "this input clearly calls for tool use": a
/// plan that comes back with zero actions against one of these is treated
/// as laziness rather than a considered no-op.
pub fn is_action_query(input: &str) -> bool {
    let q = input.to_lowercase();
    const ACTION_KEYWORDS: &[&str] = &[
        "create", "write", "search", "find", "analyze", "list", "run", "execute", "check", "verify",
        "lookup", "screen", "review", "http://", "https://", ".com", ".org", ".net", ".io",
    ];
    ACTION_KEYWORDS.iter().any(|k| q.contains(k))
}

/// Flags hallucination markers and degenerate repetition in free text an
/// LLM produced. `1.0` means trustworthy; anything lower scales down a
/// confidence that would otherwise be taken at face value.
pub fn response_quality_score(text: &str) -> f64 {
    let mut score = 1.0_f64;

    let words: Vec<&str> = text.split_whitespace().collect();
    let total_words = words.len();
    if total_words > 10 {
        let unique: std::collections::HashSet<&str> = words.iter().copied().collect();
        let uniqueness_ratio = unique.len() as f64 / total_words as f64;
        if uniqueness_ratio < 0.2 {
            score *= 0.1;
        } else if uniqueness_ratio < 0.4 {
            score *= 0.4;
        }
    } else if total_words < 3 && text.len() > 20 {
        score *= 0.1;
    }

    let non_ascii_count = text.chars().filter(|c| !c.is_ascii()).count();
    if non_ascii_count > text.len() / 2 && text.len() > 20 {
        score *= 0.5;
    }

    if text.contains("## User Query") || text.contains("## Instruction") || text.contains("<|im_start|>") {
        score *= 0.1;
    }

    score
}

// ---------------------------------------------------------------------
// Reflect
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReflectOutput {
    #[serde(default)]
    pub should_revise: bool,
    #[serde(default)]
    pub revised_action: Option<String>,
    #[serde(default)]
    pub revised_confidence: Option<f64>,
    #[serde(default)]
    pub concerns: Vec<String>,
    #[serde(default)]
    pub contra_argument: String,
    #[serde(default)]
    pub reflection_confidence: f64,
}

pub fn reflect_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "shouldRevise": {"type": "boolean"},
            "revisedAction": {"type": "string"},
            "revisedConfidence": {"type": "number", "minimum": 0, "maximum": 1},
            "concerns": {"type": "array", "items": {"type": "string"}},
            "contraArgument": {"type": "string"},
            "reflectionConfidence": {"type": "number", "minimum": 0, "maximum": 1}
        },
        "required": ["shouldRevise", "concerns", "contraArgument", "reflectionConfidence"]
    })
}

pub fn reflect_fallback() -> Value {
    json!({
        "shouldRevise": false,
        "concerns": [],
        "contraArgument": "",
        "reflectionConfidence": 0.0
    })
}

pub fn build_reflect_prompt(observe: &ObserveOutput) -> PromptPair {
    PromptPair {
        system: "Play devil's advocate against the recommendation below. Argue the strongest case \
                  against it, list concerns, and say whether it should be revised."
            .to_string(),
        user: format!(
            "## Recommendation\n{:?} (confidence {:.2})\n\n## Reasoning\n{}",
            observe.recommendation, observe.confidence, observe.reasoning
        ),
    }
}

// ---------------------------------------------------------------------
// Self-query
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelfQueryOutput {
    pub filters: Value,
    pub cleaned_query: String,
}

pub fn self_query_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "filters": {"type": "object"},
            "cleanedQuery": {"type": "string"}
        },
        "required": ["filters", "cleanedQuery"]
    })
}

pub fn build_self_query_prompt(query: &str) -> PromptPair {
    PromptPair {
        system: "Extract structured filters from the query below and rewrite it as a clean search \
                  string with the filter terms removed."
            .to_string(),
        user: query.to_string(),
    }
}

// ---------------------------------------------------------------------
// Citation enrichment
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CitationOutput {
    pub claim: String,
    pub tool_name: String,
    pub index: usize,
    pub confidence: f64,
    #[serde(default)]
    pub evidence_snippet: Option<String>,
}

pub fn citation_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "claim": {"type": "string"},
            "toolName": {"type": "string"},
            "index": {"type": "integer"},
            "confidence": {"type": "number", "minimum": 0, "maximum": 1},
            "evidenceSnippet": {"type": "string"}
        },
        "required": ["claim", "toolName", "index", "confidence"]
    })
}

pub fn build_citation_prompt(claim: &str, evidence: &str) -> PromptPair {
    PromptPair {
        system: "Identify which piece of evidence below supports the claim, and how confident that \
                  support is."
            .to_string(),
        user: format!("## Claim\n{claim}\n\n## Evidence\n{evidence}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn observe_schema_lists_all_recommendation_values() {
        let schema = observe_schema();
        let values = schema["properties"]["recommendation"]["enum"].as_array().unwrap();
        assert_eq!(values.len(), 5);
    }

    #[test]
    fn rule_based_observe_reviews_when_majority_failed() {
        let out = rule_based_observe(3, 2, "x");
        assert_eq!(out.recommendation, Recommendation::Review);
    }

    #[test]
    fn rule_based_observe_approves_on_full_success() {
        let out = rule_based_observe(2, 0, "x");
        assert_eq!(out.recommendation, Recommendation::Approve);
    }

    #[test]
    fn action_query_detects_action_keywords() {
        assert!(is_action_query("please analyze this seller's transaction history"));
        assert!(is_action_query("check https://example.com for a registration"));
        assert!(!is_action_query("thanks, that all looks fine"));
    }

    #[test]
    fn quality_score_penalizes_repetitive_text() {
        let repetitive = "fraud fraud fraud fraud fraud fraud fraud fraud fraud fraud fraud";
        assert!(response_quality_score(repetitive) < 0.5);
    }

    #[test]
    fn quality_score_penalizes_prompt_echo() {
        let echo = "## User Query\nwhat should I do next";
        assert!(response_quality_score(echo) < 0.5);
    }

    #[test]
    fn quality_score_trusts_ordinary_text() {
        let normal = "the seller's registration number matched an active business record";
        assert!((response_quality_score(normal) - 1.0).abs() < 1e-9);
    }
}
