//! Library-boundary error type.
//!
//! Mirrors the agency's `agent::AgentError` (consumed by `agent/react.rs` as
//! `super::AgentError`): a `thiserror`-derived enum at component boundaries,
//! with `anyhow::Result` reserved for the binary/orchestration layer. Nothing
//! in `reason()` propagates one of these out — see §4.1/§7, the turn is the
//! recovery boundary, so errors here are caught and folded into a `Thought`.

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("llm unavailable")]
    LlmUnavailable,

    #[error("llm provider error: {0}")]
    Provider(#[from] crate::llm::provider::ProviderError),

    #[error("tool not registered: {0}")]
    ToolNotRegistered(String),

    #[error("tool failed: {0}")]
    ToolFailed(String),

    #[error("circuit open for tool {0}")]
    CircuitOpen(String),

    #[error("timed out after {0}ms")]
    Timeout(u64),

    #[error("store error: {0}")]
    Store(#[from] crate::kv::KVError),

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("internal: {0}")]
    Internal(String),
}

pub type AgentResult<T> = Result<T, AgentError>;
