//! Tool Executor (§4.9)
//!
//! Uniform tool invocation: circuit breaker check, timed handler call,
//! metrics recording, and laboratory-tool promotion on success — the single
//! path every planned action goes through during Act (§4.1 step 7).

use std::sync::Arc;

use crate::circuit_breaker::{CircuitBreakerRegistry, Permit};
use crate::clock::Clock;
use crate::metrics::Metrics;
use crate::tools::{ToolOutcome, ToolRegistry};
use serde_json::Value;

pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    breakers: Arc<CircuitBreakerRegistry>,
    metrics: Arc<Metrics>,
    clock: Arc<dyn Clock>,
}

impl ToolExecutor {
    pub fn new(
        registry: Arc<ToolRegistry>,
        breakers: Arc<CircuitBreakerRegistry>,
        metrics: Arc<Metrics>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { registry, breakers, metrics, clock }
    }

    pub async fn execute(&self, agent_id: &str, tool_name: &str, params: Value) -> ToolOutcome {
        let Some(tool) = self.registry.get(tool_name) else {
            return ToolOutcome::fail(format!("tool not registered: {tool_name}"));
        };

        if matches!(self.breakers.try_acquire(agent_id, tool_name), Permit::Rejected) {
            self.metrics.record_tool_use(agent_id, tool_name, 0, false);
            return ToolOutcome::fail("circuit_open");
        }

        let started = self.clock.now_ms();
        let outcome = tool.invoke(params).await;
        let duration = (self.clock.now_ms() - started).max(0) as u64;

        self.metrics.record_tool_use(agent_id, tool_name, duration, outcome.success);

        if outcome.success {
            self.breakers.record_success(agent_id, tool_name);
            if !self.registry.is_standard(tool_name) {
                self.registry.promote(tool_name);
            }
        } else {
            self.breakers.record_failure(agent_id, tool_name);
        }

        outcome
    }
}
