//! The reasoning-loop contract (§4.1) and its two implementations:
//! `BaseAgent` (a single Think -> Plan -> Act -> Observe -> Reflect turn) and
//! `AutonomousAgent` (§4.2's scan scheduler wrapped around one).
//!
//! Specialized agents (`crate::agents`) compose `BaseAgent` as a value rather
//! than subclassing it (§9: "Dynamic tool registration / polymorphism by
//! subclassing" is re-expressed as composition over inheritance).

pub mod autonomous;
pub mod base;

pub use autonomous::{AutonomousAgent, RunHistoryEntry, ScanHooks};
pub use base::BaseAgent;

use async_trait::async_trait;
use serde_json::Value;

use crate::types::Thought;

/// Every reasoning-capable agent, whether a bare `BaseAgent` or one wrapped
/// in an `AutonomousAgent`. `Orchestrator`/`Router`/`Coordinator` hold agents
/// only as `Arc<dyn Agent>`, looked up by id (§9: no cyclic object graphs).
#[async_trait]
pub trait Agent: Send + Sync {
    fn agent_id(&self) -> &str;
    fn name(&self) -> &str;

    /// `reason(input, context?) -> Thought`. Never panics; failures are
    /// carried in the returned `Thought.error` (§4.1).
    async fn reason(&self, input: &str, context: Option<Value>) -> Thought;
}
