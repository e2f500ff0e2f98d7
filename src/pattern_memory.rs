//! Pattern Memory (§3, §4.6)
//!
//! Learns feature -> outcome patterns, reinforces similar ones, matches new
//! cases against the learned set and recommends an action. Indexed three
//! ways (by type, by `feature:value`, by outcome) so matching never needs a
//! full scan in the common case.

use std::collections::HashMap;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::clock::Clock;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Outcome {
    FraudConfirmed,
    LegitimateConfirmed,
    Suspicious,
    FalsePositive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RecommendedAction {
    Block,
    Review,
    Approve,
}

impl Outcome {
    fn default_action(&self) -> RecommendedAction {
        match self {
            Outcome::FraudConfirmed => RecommendedAction::Block,
            Outcome::Suspicious => RecommendedAction::Review,
            Outcome::LegitimateConfirmed | Outcome::FalsePositive => RecommendedAction::Approve,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pattern {
    pub pattern_id: String,
    #[serde(rename = "type")]
    pub ty: String,
    pub features: HashMap<String, Value>,
    pub outcome: Outcome,
    pub confidence: f64,
    pub occurrences: u64,
    pub reinforcements: u64,
    pub success_rate: f64,
    pub total_validations: u64,
    pub created_at: i64,
    pub updated_at: i64,
}

pub struct LearnPatternInput {
    pub ty: String,
    pub features: HashMap<String, Value>,
    pub outcome: Outcome,
    pub confidence: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternMatch {
    pub pattern: Pattern,
    pub score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchResult {
    pub matches: Vec<PatternMatch>,
    pub total_matched: usize,
    pub recommendation: Option<RecommendedAction>,
}

struct State {
    patterns: HashMap<String, Pattern>,
    by_type: HashMap<String, Vec<String>>,
    by_feature: HashMap<String, Vec<String>>,
    by_outcome: HashMap<Outcome, Vec<String>>,
}

pub struct PatternMemory {
    clock: Arc<dyn Clock>,
    state: RwLock<State>,
}

impl PatternMemory {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            state: RwLock::new(State {
                patterns: HashMap::new(),
                by_type: HashMap::new(),
                by_feature: HashMap::new(),
                by_outcome: HashMap::new(),
            }),
        }
    }

    /// Probes for a similar pattern (same type, feature overlap >= 0.7); if
    /// found, reinforces it. Otherwise creates a new one, indexed before it
    /// becomes visible to `match_patterns` (§5: atomic index update).
    pub fn learn_pattern(&self, input: LearnPatternInput) -> String {
        let now = self.clock.now_ms();
        let mut state = self.state.write().unwrap();

        let similar_id = {
            let candidates = state
                .by_type
                .get(&input.ty)
                .cloned()
                .unwrap_or_default();
            candidates.into_iter().find(|id| {
                let p = &state.patterns[id];
                feature_overlap(&p.features, &input.features) >= 0.7
            })
        };

        if let Some(id) = similar_id {
            drop(state);
            self.reinforce_pattern(&id, input.outcome, input.confidence);
            return id;
        }

        let pattern_id = format!("pat-{}", uuid::Uuid::new_v4().simple());
        let is_correct = matches!(
            input.outcome,
            Outcome::FraudConfirmed | Outcome::LegitimateConfirmed
        );
        let pattern = Pattern {
            pattern_id: pattern_id.clone(),
            ty: input.ty.clone(),
            features: input.features.clone(),
            outcome: input.outcome,
            confidence: input.confidence.clamp(0.10, 0.99),
            occurrences: 1,
            reinforcements: 0,
            success_rate: if is_correct { 1.0 } else { 0.0 },
            total_validations: 1,
            created_at: now,
            updated_at: now,
        };

        state
            .by_type
            .entry(input.ty.clone())
            .or_default()
            .push(pattern_id.clone());
        for (k, v) in &input.features {
            let key = normalize_feature_key(k, v);
            state.by_feature.entry(key).or_default().push(pattern_id.clone());
        }
        state
            .by_outcome
            .entry(input.outcome)
            .or_default()
            .push(pattern_id.clone());
        state.patterns.insert(pattern_id.clone(), pattern);

        pattern_id
    }

    pub fn reinforce_pattern(&self, pattern_id: &str, outcome: Outcome, new_confidence: f64) {
        let now = self.clock.now_ms();
        let mut state = self.state.write().unwrap();
        let Some(pattern) = state.patterns.get_mut(pattern_id) else {
            return;
        };
        pattern.occurrences += 1;
        pattern.reinforcements += 1;
        pattern.total_validations += 1;
        let is_correct = matches!(outcome, Outcome::FraudConfirmed | Outcome::LegitimateConfirmed);
        let prior_correct = pattern.success_rate * (pattern.total_validations - 1) as f64;
        pattern.success_rate =
            (prior_correct + if is_correct { 1.0 } else { 0.0 }) / pattern.total_validations as f64;
        pattern.confidence = (0.7 * pattern.confidence + 0.3 * new_confidence).clamp(0.10, 0.99);
        pattern.updated_at = now;
    }

    /// `provideFeedback`: multiplies confidence by 1.05 (clamped 0.99) when
    /// correct, 0.9 (floored 0.10) otherwise, and updates `successRate`.
    pub fn provide_feedback(&self, pattern_id: &str, actual_outcome: Outcome, was_correct: bool) {
        let mut state = self.state.write().unwrap();
        let Some(pattern) = state.patterns.get_mut(pattern_id) else {
            return;
        };
        pattern.total_validations += 1;
        let prior_correct = pattern.success_rate * (pattern.total_validations - 1) as f64;
        pattern.success_rate =
            (prior_correct + if was_correct { 1.0 } else { 0.0 }) / pattern.total_validations as f64;
        pattern.confidence = if was_correct {
            (pattern.confidence * 1.05).min(0.99)
        } else {
            (pattern.confidence * 0.9).max(0.10)
        };
        pattern.outcome = actual_outcome;
        pattern.updated_at = self.clock.now_ms();
    }

    pub fn get(&self, pattern_id: &str) -> Option<Pattern> {
        self.state.read().unwrap().patterns.get(pattern_id).cloned()
    }

    /// Patterns that have accumulated at least one validation beyond their
    /// initial learning and whose `successRate` has fallen below
    /// `threshold` — a proxy for "the rule built on this pattern no longer
    /// matches reality," the signal a policy-evolution scan looks for.
    pub fn drifted(&self, threshold: f64) -> Vec<Pattern> {
        let state = self.state.read().unwrap();
        let mut drifted: Vec<Pattern> = state
            .patterns
            .values()
            .filter(|p| p.total_validations > 1 && p.success_rate < threshold)
            .cloned()
            .collect();
        drifted.sort_by(|a, b| a.success_rate.partial_cmp(&b.success_rate).unwrap());
        drifted
    }

    /// Matches `case_features` against every learned pattern, ranks by
    /// `score * confidence * successRate`, and recommends the weighted
    /// majority outcome's default action.
    pub fn match_patterns(&self, case_features: &HashMap<String, Value>) -> MatchResult {
        let state = self.state.read().unwrap();
        let mut scored: Vec<PatternMatch> = state
            .patterns
            .values()
            .filter_map(|p| {
                let score = feature_score(&p.features, case_features);
                if score > 0.0 {
                    Some(PatternMatch {
                        pattern: p.clone(),
                        score,
                    })
                } else {
                    None
                }
            })
            .collect();

        scored.sort_by(|a, b| {
            let ra = a.score * a.pattern.confidence * a.pattern.success_rate;
            let rb = b.score * b.pattern.confidence * b.pattern.success_rate;
            rb.partial_cmp(&ra).unwrap()
        });

        let total_matched = scored.len();
        scored.truncate(10);

        let recommendation = weighted_majority(&scored).map(|o| o.default_action());

        MatchResult {
            matches: scored,
            total_matched,
            recommendation,
        }
    }
}

fn weighted_majority(matches: &[PatternMatch]) -> Option<Outcome> {
    if matches.is_empty() {
        return None;
    }
    let mut weights: HashMap<Outcome, f64> = HashMap::new();
    for m in matches {
        let weight = m.score * m.pattern.confidence * m.pattern.success_rate;
        *weights.entry(m.pattern.outcome).or_insert(0.0) += weight;
    }
    weights
        .into_iter()
        .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap())
        .map(|(o, _)| o)
}

/// `weightedFeatureScore / |patternFeatures|` for a pattern against case
/// features, using the bool/string/number/range comparison rules (§4.6).
fn feature_score(pattern_features: &HashMap<String, Value>, case_features: &HashMap<String, Value>) -> f64 {
    if pattern_features.is_empty() {
        return 0.0;
    }
    let mut total = 0.0;
    for (k, pv) in pattern_features {
        if let Some(cv) = case_features.get(k) {
            total += compare_feature(pv, cv);
        }
    }
    total / pattern_features.len() as f64
}

/// Overlap ratio used to decide whether a new pattern is "similar" to an
/// existing one: shared keys with matching value comparisons / union size.
fn feature_overlap(a: &HashMap<String, Value>, b: &HashMap<String, Value>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let keys: std::collections::HashSet<&String> = a.keys().chain(b.keys()).collect();
    if keys.is_empty() {
        return 0.0;
    }
    let mut matched = 0.0;
    for k in &keys {
        if let (Some(av), Some(bv)) = (a.get(*k), b.get(*k)) {
            matched += compare_feature(av, bv);
        }
    }
    matched / keys.len() as f64
}

fn compare_feature(pattern_value: &Value, case_value: &Value) -> f64 {
    match (pattern_value, case_value) {
        (Value::Bool(a), Value::Bool(b)) => {
            if a == b {
                1.0
            } else {
                0.0
            }
        }
        (Value::String(a), Value::String(b)) => {
            if a.to_lowercase() == b.to_lowercase() {
                1.0
            } else {
                0.0
            }
        }
        (Value::Number(a), Value::Number(b)) => {
            let (a, b) = (a.as_f64().unwrap_or(0.0), b.as_f64().unwrap_or(0.0));
            let diff = (a - b).abs();
            let tolerance = 0.2 * a.abs();
            if tolerance > 0.0 && diff <= tolerance {
                1.0 - diff / tolerance
            } else if a == b {
                1.0
            } else {
                0.0
            }
        }
        (Value::Object(range), Value::Number(n)) if range.contains_key("min") && range.contains_key("max") => {
            let v = n.as_f64().unwrap_or(0.0);
            let min = range["min"].as_f64().unwrap_or(f64::MIN);
            let max = range["max"].as_f64().unwrap_or(f64::MAX);
            if v >= min && v <= max {
                1.0
            } else {
                0.0
            }
        }
        _ => 0.0,
    }
}

/// Feature normalization for indexing (§4.6): bool -> "true"/"false",
/// number -> bucket of 10, string -> trim+lower.
fn normalize_feature_key(name: &str, value: &Value) -> String {
    let normalized = match value {
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => {
            let v = n.as_f64().unwrap_or(0.0);
            format!("{}", (v / 10.0).round() * 10.0)
        }
        Value::String(s) => s.trim().to_lowercase(),
        other => other.to_string(),
    };
    format!("{name}:{normalized}")
}
