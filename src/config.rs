//! Configuration surface (§6).
//!
//! Environment-driven feature gates plus explicit per-agent structs, the way
//! the agency loads `dotenv` in `main` and threads an `AgentConfig` through
//! construction rather than reaching for global state.

use std::env;

/// Process-wide feature gates read once at startup. `LLM_ENABLED` must be
/// true **and** a credential present for LLM features to activate; otherwise
/// every reasoning phase falls back to its deterministic path (§6).
#[derive(Debug, Clone)]
pub struct EnvConfig {
    pub llm_enabled: bool,
    pub anthropic_api_key: Option<String>,
    pub anthropic_base_url: String,
    pub use_vector_search: bool,
}

impl EnvConfig {
    pub fn from_env() -> Self {
        let _ = dotenv::dotenv();

        let api_key = env::var("ANTHROPIC_API_KEY").ok().filter(|s| !s.is_empty());
        let llm_enabled = env::var("LLM_ENABLED")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(api_key.is_some())
            && api_key.is_some();

        Self {
            llm_enabled,
            anthropic_api_key: api_key,
            anthropic_base_url: env::var("ANTHROPIC_BASE_URL")
                .unwrap_or_else(|_| "https://api.anthropic.com".to_string()),
            use_vector_search: env::var("USE_VECTOR_SEARCH")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
        }
    }
}

/// Per-agent construction config (§6's "Configuration surface").
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub agent_id: String,
    pub name: String,
    pub role: String,
    pub capabilities: Vec<String>,
    pub max_memory_size: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            agent_id: crate::new_agent_id(),
            name: "agent".to_string(),
            role: "generalist".to_string(),
            capabilities: Vec::new(),
            max_memory_size: 100,
        }
    }
}

/// Extends `AgentConfig` for `AutonomousAgent` (§4.2).
#[derive(Debug, Clone)]
pub struct AutonomousConfig {
    pub scan_interval_ms: u64,
    pub event_acceleration_threshold: usize,
    pub subscribed_topics: Vec<String>,
}

impl Default for AutonomousConfig {
    fn default() -> Self {
        Self {
            scan_interval_ms: 300_000,
            event_acceleration_threshold: 5,
            subscribed_topics: Vec::new(),
        }
    }
}

/// Autonomy thresholds (§6): numeric bounds on risk score that decide
/// whether a decision auto-applies or escalates.
#[derive(Debug, Clone, Copy)]
pub struct AutonomyThresholds {
    pub auto_approve_max_risk: f64,
    pub auto_reject_min_risk: f64,
    pub escalate_min_risk: f64,
}

impl Default for AutonomyThresholds {
    fn default() -> Self {
        Self {
            auto_approve_max_risk: 20.0,
            auto_reject_min_risk: 85.0,
            escalate_min_risk: 60.0,
        }
    }
}
