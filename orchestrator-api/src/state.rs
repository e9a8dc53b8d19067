//! Process-wide shared state: store, bus, registry, locks, LLM client and
//! the workflow engine built from them (§4.11, §6 environment variables).

use std::sync::Arc;
use std::time::Duration;

use orchestrator_core::{
    AgentRegistry, EngineTimeouts, EventBus, LlmClient, LockManager, MockLlm, ToolCatalog,
    WorkflowEngine,
};
use state_store::Store;

fn env_duration_secs(key: &str, default_secs: u64) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or_else(|| Duration::from_secs(default_secs))
}

fn env_flag(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(default)
}

fn build_llm() -> Arc<dyn LlmClient> {
    match std::env::var("LLM_PROVIDER").ok().as_deref() {
        Some("openai") => {
            use async_openai::config::OpenAIConfig;
            use orchestrator_core::ChatOpenAI;

            let mut config = OpenAIConfig::new();
            if let Ok(key) = std::env::var("LLM_API_KEY") {
                config = config.with_api_key(key);
            }
            if let Ok(base) = std::env::var("LLM_BASE_URL") {
                config = config.with_api_base(base);
            }
            let model = std::env::var("LLM_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());
            Arc::new(ChatOpenAI::with_config(config, model))
        }
        _ => Arc::new(MockLlm::new("{\"decision\":\"proceed\"}")),
    }
}

fn build_store() -> Store {
    match std::env::var("DATABASE_URL") {
        Ok(path) if !path.is_empty() => {
            Store::new(&path).unwrap_or_else(|e| {
                tracing::warn!(error = %e, path, "failed to open DATABASE_URL, falling back to in-memory store");
                Store::open_in_memory().expect("in-memory state store")
            })
        }
        _ => Store::open_in_memory().expect("in-memory state store"),
    }
}

/// Everything an axum handler needs, built once at process start from the
/// environment variables in §6 and shared across connections via `Arc`.
#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub registry: Arc<AgentRegistry>,
    pub bus: Arc<EventBus>,
    pub locks: Arc<LockManager>,
    pub llm: Arc<dyn LlmClient>,
    pub catalog: ToolCatalog,
    pub engine: Arc<WorkflowEngine>,
    pub enable_intent_routing: bool,
}

impl AppState {
    /// Builds state from §6 environment variables and registers the
    /// built-in demo templates (§8 S1/S2) so the workflow endpoints have
    /// something to run without a separate template-authoring step.
    pub async fn from_env() -> Self {
        let store = build_store();
        let registry = Arc::new(AgentRegistry::new());
        let bus = Arc::new(EventBus::new());
        let locks = Arc::new(LockManager::new(store.clone()));
        let llm = build_llm();
        let catalog = ToolCatalog::default();

        let timeouts = EngineTimeouts {
            agent_request: env_duration_secs("AGENT_REQUEST_TIMEOUT_SECONDS", 60),
            llm_call: env_duration_secs("LLM_TIMEOUT_SECONDS", 60),
        };

        let engine = Arc::new(WorkflowEngine::new(
            store.clone(),
            registry.clone(),
            bus.clone(),
            locks.clone(),
            llm.clone(),
            catalog.clone(),
            timeouts,
        ));

        for template in orchestrator_core::builtin_templates::all() {
            if let Err(err) = engine.register_template(template).await {
                tracing::warn!(error = %err, "failed to register built-in template");
            }
        }

        Self {
            store,
            registry,
            bus,
            locks,
            llm,
            catalog,
            engine,
            enable_intent_routing: env_flag("ENABLE_INTENT_ROUTING", true),
        }
    }
}
