//! OnboardingAgent (SPEC_FULL §10): seller onboarding risk screen.
//!
//! A thin composition over `BaseAgent` — construction fixes the agent's
//! name, role and advertised capability; the actual KYC/IP/email lookups
//! are supplied by the caller as tools, since integrating those external
//! services is out of scope here (§11 Non-goals) and left to whoever wires
//! the registry.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::agent::{Agent, BaseAgent};
use crate::config::AgentConfig;
use crate::runtime::Runtime;
use crate::tools::ToolRegistry;
use crate::types::Thought;

pub const CAPABILITY: &str = "seller_onboarding";

pub struct OnboardingAgent {
    base: BaseAgent,
}

impl OnboardingAgent {
    pub fn new(tools: Arc<ToolRegistry>, runtime: Arc<Runtime>) -> Self {
        let config = AgentConfig {
            name: "Onboarding Sentinel".to_string(),
            role: "seller onboarding risk analyst".to_string(),
            capabilities: vec![CAPABILITY.to_string()],
            ..Default::default()
        };
        Self {
            base: BaseAgent::new(config, tools, runtime),
        }
    }

    pub fn base(&self) -> &BaseAgent {
        &self.base
    }

    /// Runs one onboarding screen for `seller_id` against `application`, a
    /// free-form JSON payload the caller assembled from its own seller
    /// records (the record store itself is a Non-goal here).
    pub async fn screen_seller(&self, seller_id: &str, application: &Value) -> Thought {
        let input = serde_json::json!({
            "sellerId": seller_id,
            "application": application,
        })
        .to_string();
        self.base.reason(&input, None).await
    }
}

#[async_trait]
impl Agent for OnboardingAgent {
    fn agent_id(&self) -> &str {
        self.base.agent_id_raw()
    }

    fn name(&self) -> &str {
        self.base.name_raw()
    }

    async fn reason(&self, input: &str, context: Option<Value>) -> Thought {
        self.base.reason(input, context).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{Tool, ToolOutcome};

    fn registry_with_lookup_tool() -> Arc<ToolRegistry> {
        let registry = Arc::new(ToolRegistry::new());
        registry.register_standard(Tool::new(
            "check_business_registration",
            "verifies a business registration number against a registry",
            Arc::new(|params: Value| Box::pin(async move { ToolOutcome::ok(params) })),
        ));
        registry
    }

    #[tokio::test]
    async fn screens_a_seller_without_erroring() {
        let runtime = Runtime::test().await;
        let agent = OnboardingAgent::new(registry_with_lookup_tool(), runtime);
        let thought = agent
            .screen_seller("SELLER-1", &serde_json::json!({"country": "US"}))
            .await;
        assert!(thought.error.is_none());
        assert!(thought.input.contains("SELLER-1"));
    }

    #[tokio::test]
    async fn exposes_the_onboarding_capability_on_its_config() {
        let runtime = Runtime::test().await;
        let agent = OnboardingAgent::new(registry_with_lookup_tool(), runtime);
        assert_eq!(agent.base().config().capabilities, vec![CAPABILITY.to_string()]);
    }

    #[tokio::test]
    async fn agent_trait_delegates_to_the_wrapped_base_agent() {
        let runtime = Runtime::test().await;
        let agent = OnboardingAgent::new(registry_with_lookup_tool(), runtime);
        assert_eq!(agent.name(), "Onboarding Sentinel");
        let thought = Agent::reason(&agent, "{}", None).await;
        assert!(thought.error.is_none());
    }
}
