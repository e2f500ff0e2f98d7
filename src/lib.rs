//! Multi-agent reasoning runtime for fraud and risk decisioning.
//!
//! A `Runtime` owns the shared infrastructure (clock, event bus, LLM client,
//! memory, pattern memory, calibration, metrics); `BaseAgent` runs the
//! Think -> Plan -> Act -> Observe -> Reflect -> Conclude -> Learn loop
//! against it, `AutonomousAgent` drives that loop on a schedule or in
//! response to events, and `Orchestrator`/`Router`/`Coordinator` compose
//! multiple agents into workflows, delegated subtasks, and consensus votes.

pub mod agent;
pub mod agents;
pub mod calibration;
pub mod chunker;
pub mod circuit_breaker;
pub mod clock;
pub mod config;
pub mod consensus;
pub mod context;
pub mod decision_log;
pub mod error;
pub mod event_bus;
pub mod knowledge_base;
pub mod kv;
pub mod llm;
pub mod memory;
pub mod messenger;
pub mod metrics;
pub mod orchestrator;
pub mod pattern_memory;
pub mod prompt_templates;
pub mod retrieval_eval;
pub mod router;
pub mod runtime;
pub mod self_correction;
pub mod tool_executor;
pub mod tools;
pub mod trace;
pub mod types;

pub use error::{AgentError, AgentResult};
pub use runtime::Runtime;

/// Generates an agent id in the `AGENT-<hex8>` form used throughout §3.
pub fn new_agent_id() -> String {
    format!("AGENT-{}", &uuid::Uuid::new_v4().simple().to_string()[..8])
}
