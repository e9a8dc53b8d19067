//! Runs the built-in `pr-deployment` template (§8 S1) against three mock
//! specialist agents that auto-succeed, printing the final workflow state.

use std::sync::Arc;

use orchestrator_core::{
    builtin_templates, AgentProfile, AgentRegistry, AgentStatus, Capability, EngineTimeouts,
    EventBus, LockManager, MockLlm, ToolCatalog, WorkflowEngine,
};
use state_store::Store;

async fn register_mock_agent(registry: &AgentRegistry, bus: &Arc<EventBus>, id: &str) {
    registry
        .register(AgentProfile {
            id: id.to_string(),
            base_url: "http://localhost".into(),
            port: 0,
            capabilities: vec![Capability {
                name: id.to_string(),
                description: String::new(),
                parameters_schema: serde_json::json!({}),
                tags: vec![],
                cost_estimate: None,
            }],
            status: AgentStatus::Registering,
            last_heartbeat_at: 0,
            registered_at: 0,
        })
        .await
        .expect("register agent");

    let responder = bus.clone();
    let expected_agent = id.to_string();
    bus.subscribe("*", "mock-agent", move |event| {
        if event.target_agent.as_deref() != Some(expected_agent.as_str()) {
            return Ok(());
        }
        let responder = responder.clone();
        let correlation = event.correlation_id.clone().unwrap_or_default();
        let agent = event.target_agent.clone().unwrap_or_default();
        tokio::spawn(async move {
            responder
                .respond(&agent, &correlation, serde_json::json!({"status": "success"}))
                .await;
        });
        Ok(())
    })
    .await;
}

#[tokio::main]
async fn main() {
    let store = Store::open_in_memory().expect("in-memory store");
    let registry = Arc::new(AgentRegistry::new());
    let bus = Arc::new(EventBus::new());
    let locks = Arc::new(LockManager::new(store.clone()));
    let llm = Arc::new(MockLlm::new("{}"));

    for agent in ["code-reviewer", "test-runner", "deployer"] {
        register_mock_agent(&registry, &bus, agent).await;
    }

    let engine = WorkflowEngine::new(
        store,
        registry,
        bus,
        locks,
        llm,
        ToolCatalog::default(),
        EngineTimeouts::default(),
    );
    engine
        .register_template(builtin_templates::pr_deployment_template())
        .await
        .expect("valid template");

    let workflow = engine
        .create_and_run(
            "pr-deployment",
            serde_json::json!({"pr_number": 123, "branch": "feature/x"}),
        )
        .await
        .expect("workflow run");

    println!(
        "{}",
        serde_json::to_string_pretty(&workflow).expect("serialize workflow")
    );
}
