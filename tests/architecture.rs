//! Architecture Verification Suite
//!
//! Compile-time checks that the crate's seams are shaped the way the rest
//! of the system assumes: shared collaborators are `Send + Sync` so they
//! can live behind an `Arc` and cross `.await` points, and the public
//! surface of the `Runtime`/`Agent`/`Orchestrator` triad is reachable the
//! way callers outside this crate need it to be.

use std::sync::Arc;

use agency_core::agent::{Agent, AutonomousAgent, BaseAgent};
use agency_core::config::{AgentConfig, AutonomousConfig};
use agency_core::consensus::ConsensusEngine;
use agency_core::context::ContextEngine;
use agency_core::orchestrator::{Coordinator, Orchestrator};
use agency_core::pattern_memory::PatternMemory;
use agency_core::router::Router;
use agency_core::runtime::Runtime;
use agency_core::tools::ToolRegistry;

fn assert_send_sync<T: Send + Sync>() {}

#[test]
fn shared_collaborators_are_thread_safe() {
    assert_send_sync::<Runtime>();
    assert_send_sync::<ToolRegistry>();
    assert_send_sync::<Orchestrator>();
    assert_send_sync::<Coordinator>();
    assert_send_sync::<Router>();
    assert_send_sync::<PatternMemory>();
    assert_send_sync::<ContextEngine>();
    assert_send_sync::<ConsensusEngine>();
    assert_send_sync::<BaseAgent>();
    assert_send_sync::<AutonomousAgent>();
}

#[test]
fn agent_trait_objects_are_thread_safe() {
    assert_send_sync::<Arc<dyn Agent>>();
}

/// `Runtime`'s fields are public by design (§9: "no cyclic object graphs" —
/// callers compose pieces of a `Runtime` directly rather than going through
/// a facade). This only needs to compile.
#[allow(dead_code)]
fn check_runtime_field_access(runtime: &Runtime) {
    let _ = &runtime.env;
    let _ = &runtime.clock;
    let _ = &runtime.patterns;
    let _ = &runtime.context;
    let _ = &runtime.orchestrator;
    let _ = &runtime.coordinator;
    let _ = &runtime.router;
    let _ = &runtime.consensus;
    let _ = &runtime.breakers;
    let _ = &runtime.llm;
}

/// `AgentConfig`/`AutonomousConfig` are plain data the caller constructs
/// directly (no builder indirection), matching the teacher's config-struct
/// shape.
#[test]
fn agent_config_is_a_plain_data_struct() {
    let config = AgentConfig {
        name: "Test Agent".to_string(),
        role: "tester".to_string(),
        capabilities: vec!["testing".to_string()],
        ..Default::default()
    };
    assert_eq!(config.name, "Test Agent");
    assert!(!config.agent_id.is_empty());

    let scan = AutonomousConfig::default();
    assert!(scan.scan_interval_ms > 0);
}

#[tokio::test]
async fn base_agent_implements_the_agent_trait_object_safely() {
    let runtime = Runtime::test().await;
    let tools = Arc::new(ToolRegistry::new());
    let agent: Arc<dyn Agent> = Arc::new(BaseAgent::new(AgentConfig::default(), tools, runtime));
    assert!(!agent.agent_id().is_empty());
}

#[tokio::test]
async fn orchestrator_round_trips_a_registered_agent() {
    let runtime = Runtime::test().await;
    let tools = Arc::new(ToolRegistry::new());
    let agent: Arc<dyn Agent> = Arc::new(BaseAgent::new(AgentConfig::default(), tools, runtime.clone()));
    let id = agent.agent_id().to_string();
    runtime.orchestrator.register(agent);
    assert!(runtime.orchestrator.registered_ids().contains(&id));
    assert!(runtime.orchestrator.lookup(&id).is_some());
    runtime.orchestrator.unregister(&id);
    assert!(runtime.orchestrator.lookup(&id).is_none());
}
