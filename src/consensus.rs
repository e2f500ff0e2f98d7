//! Consensus Engine (§3 "Consensus session", §4.10, §8 invariant 8, S4)
//!
//! A session collects one vote per required voter and evaluates exactly
//! once: the first `evaluate()` call closes it and every later call returns
//! the cached result. Disagreement on a failed evaluation writes a
//! `correction` long-term memory entry to every voter (importance 0.7).

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::memory::{LongTermType, MemoryStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsensusStrategy {
    Majority,
    Unanimous,
    Weighted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Open,
    Closed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vote {
    pub voter_id: String,
    pub decision: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusResult {
    pub consensus: bool,
    pub decision: Option<String>,
}

pub struct ConsensusSession {
    pub session_id: String,
    pub strategy: ConsensusStrategy,
    required_voters: Vec<String>,
    votes: RwLock<HashMap<String, Vote>>,
    status: RwLock<SessionStatus>,
    result: RwLock<Option<ConsensusResult>>,
}

impl ConsensusSession {
    pub fn new(session_id: impl Into<String>, strategy: ConsensusStrategy, required_voters: Vec<String>) -> Self {
        Self {
            session_id: session_id.into(),
            strategy,
            required_voters,
            votes: RwLock::new(HashMap::new()),
            status: RwLock::new(SessionStatus::Open),
            result: RwLock::new(None),
        }
    }

    pub fn status(&self) -> SessionStatus {
        *self.status.read().unwrap()
    }

    /// Records a voter's vote. Each voter may vote at most once; repeat
    /// votes from the same voter are ignored.
    pub fn vote(&self, vote: Vote) {
        let mut votes = self.votes.write().unwrap();
        votes.entry(vote.voter_id.clone()).or_insert(vote);
    }

    pub fn votes(&self) -> Vec<Vote> {
        self.votes.read().unwrap().values().cloned().collect()
    }

    /// Evaluates the session per its strategy. The session closes on the
    /// first call; later calls return the cached result.
    pub fn evaluate(&self) -> ConsensusResult {
        if let Some(cached) = self.result.read().unwrap().clone() {
            return cached;
        }
        let votes = self.votes();
        let result = match self.strategy {
            ConsensusStrategy::Majority => evaluate_majority(&votes),
            ConsensusStrategy::Unanimous => evaluate_unanimous(&votes),
            ConsensusStrategy::Weighted => evaluate_weighted(&votes),
        };
        *self.status.write().unwrap() = SessionStatus::Closed;
        *self.result.write().unwrap() = Some(result.clone());
        result
    }

    pub fn required_voters(&self) -> &[String] {
        &self.required_voters
    }
}

fn tally(votes: &[Vote]) -> HashMap<&str, usize> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for v in votes {
        *counts.entry(v.decision.as_str()).or_insert(0) += 1;
    }
    counts
}

fn evaluate_majority(votes: &[Vote]) -> ConsensusResult {
    if votes.is_empty() {
        return ConsensusResult { consensus: false, decision: None };
    }
    let counts = tally(votes);
    let total = votes.len();
    let (decision, max_count) = counts.iter().max_by_key(|(_, c)| **c).map(|(d, c)| (d.to_string(), *c)).unwrap();
    if max_count * 2 > total {
        ConsensusResult { consensus: true, decision: Some(decision) }
    } else {
        ConsensusResult { consensus: false, decision: None }
    }
}

fn evaluate_unanimous(votes: &[Vote]) -> ConsensusResult {
    if votes.is_empty() {
        return ConsensusResult { consensus: false, decision: None };
    }
    let first = &votes[0].decision;
    if votes.iter().all(|v| &v.decision == first) {
        ConsensusResult { consensus: true, decision: Some(first.clone()) }
    } else {
        ConsensusResult { consensus: false, decision: None }
    }
}

fn evaluate_weighted(votes: &[Vote]) -> ConsensusResult {
    if votes.is_empty() {
        return ConsensusResult { consensus: false, decision: None };
    }
    let total: f64 = votes.iter().map(|v| v.confidence).sum();
    if total <= 0.0 {
        return ConsensusResult { consensus: false, decision: None };
    }
    let mut weights: HashMap<&str, f64> = HashMap::new();
    for v in votes {
        *weights.entry(v.decision.as_str()).or_insert(0.0) += v.confidence;
    }
    let (decision, weight) = weights.iter().max_by(|a, b| a.1.partial_cmp(b.1).unwrap()).map(|(d, w)| (d.to_string(), *w)).unwrap();
    if weight / total > 0.6 {
        ConsensusResult { consensus: true, decision: Some(decision) }
    } else {
        ConsensusResult { consensus: false, decision: None }
    }
}

/// Records the disagreement as a `correction` long-term memory for every
/// voter, per §4.10's failure path.
pub async fn record_disagreement(
    memory: &MemoryStore,
    session: &ConsensusSession,
    clock_now_ms: i64,
) -> anyhow::Result<()> {
    let _ = clock_now_ms;
    for voter_id in session.required_voters() {
        memory
            .long_term
            .save(
                voter_id,
                LongTermType::Correction,
                serde_json::json!({
                    "sessionId": session.session_id,
                    "votes": session.votes(),
                }),
                0.7,
            )
            .await?;
    }
    Ok(())
}

/// Runtime-owned façade over consensus sessions: evaluates a session and, on
/// disagreement, writes the correction memory for every voter (§4.10).
pub struct ConsensusEngine {
    memory: Arc<MemoryStore>,
    clock: Arc<dyn Clock>,
}

impl ConsensusEngine {
    pub fn new(memory: Arc<MemoryStore>, clock: Arc<dyn Clock>) -> Self {
        Self { memory, clock }
    }

    pub fn open_session(&self, session_id: impl Into<String>, strategy: ConsensusStrategy, required_voters: Vec<String>) -> ConsensusSession {
        ConsensusSession::new(session_id, strategy, required_voters)
    }

    pub async fn evaluate(&self, session: &ConsensusSession) -> ConsensusResult {
        let result = session.evaluate();
        if !result.consensus {
            if let Err(err) = record_disagreement(&self.memory, session, self.clock.now_ms()).await {
                tracing::warn!(session_id = %session.session_id, error = %err, "failed to record consensus disagreement");
            }
        }
        result
    }
}
