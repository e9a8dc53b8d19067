//! # orchestrator-core
//!
//! The multi-agent orchestration core: a workflow engine that runs
//! declarative DAG templates to completion, the supporting registry/lock/
//! event-bus primitives specialist agents coordinate through, and the
//! LLM/tool/intent abstractions the orchestrator itself uses to route and
//! narrate work.
//!
//! ## Components
//!
//! - [`lock`]: resource lock manager (C2) — lease-based advisory locks with
//!   a priority wait queue and a sweep for expired holders.
//! - [`registry`]: agent registry (C3) — capability-indexed agent profiles
//!   with heartbeat-derived health.
//! - [`bus`]: event bus (C4) — in-process fan-out plus correlation-keyed
//!   request/response RPC between the orchestrator and specialist agents.
//! - [`llm`]: LLM client abstraction (C5) — a provider-agnostic
//!   [`llm::LlmClient`] trait, an OpenAI-compatible implementation, and the
//!   fallback-chain/rate-limit/context-overflow policy in
//!   [`llm::complete_with_policy`].
//! - [`tools`]: MCP tool catalog (C6) — a read-only server→schema map and
//!   deterministic `minimal`/`progressive`/`full` selection.
//! - [`intent`]: intent router (C7) — deterministic chat/execute
//!   classification and routing.
//! - [`conversational`]: the chat-mode responder (C8).
//! - [`specialist`]: specialist runner (C9) — one end-to-end specialist
//!   invocation: lock, tool selection, dispatch, tier-1 retry.
//! - [`workflow`]: workflow engine (C10) — template validation, placeholder
//!   rendering, and the persisted per-step execution loop, including HITL
//!   suspension and resume.
//! - [`error`]: crate-wide [`error::OrchestratorError`].
//! - [`metrics`]: the Prometheus registry and collectors exposed at
//!   `GET /metrics`.

pub mod bus;
pub mod conversational;
pub mod error;
pub mod intent;
pub mod llm;
pub mod lock;
pub mod metrics;
pub mod registry;
pub mod specialist;
pub mod tools;
pub mod workflow;

pub use bus::{Event, EventBus, SharedBus};
pub use conversational::{respond, ConversationalReply};
pub use error::OrchestratorError;
pub use intent::{classify, route_for, Intent, Route};
pub use llm::{
    complete_with_policy, ChatOpenAI, Completion, LlmClient, LlmOptions, LlmUsage, MockLlm,
    ProviderFactory, Turn,
};
pub use lock::{AcquireOutcome, LockManager, LockStatus};
pub use metrics::METRICS;
pub use registry::{
    health_for_age, AgentProfile, AgentRegistry, AgentStatus, Capability, HealthGraces,
    SharedRegistry,
};
pub use specialist::{run as run_specialist, SpecialistRequest};
pub use tools::{select, ToolCatalog, ToolCatalogClient, ToolSchema, ToolStrategy};
pub use workflow::{
    builtin as builtin_templates, validate as validate_template, ApprovalDecision, EngineTimeouts,
    StepTemplate, StepType, WorkflowEngine, WorkflowTemplate,
};

/// Initializes tracing from `RUST_LOG` for `cargo test -p orchestrator-core
/// -- --nocapture`; `main.rs`/`app.rs` in the `orchestrator-cli`/
/// `orchestrator-api` binaries set this up independently at process start.
#[cfg(test)]
mod test_logging {
    use std::sync::Once;
    use tracing_subscriber::EnvFilter;

    static INIT: Once = Once::new();

    #[allow(dead_code)]
    pub fn init() {
        INIT.call_once(|| {
            let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
            let _ = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_test_writer()
                .try_init();
        });
    }
}
