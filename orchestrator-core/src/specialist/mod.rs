//! Specialist Runner (C9): runs a named specialist against a sub-task,
//! optionally under a resource lock, with tier-1 retry policy on request
//! failures (§4.9).

use std::time::Duration;

use crate::bus::EventBus;
use crate::error::OrchestratorError;
use crate::lock::LockManager;
use crate::registry::AgentRegistry;
use crate::tools::{select, ToolCatalog, ToolStrategy};

pub struct SpecialistRequest {
    pub agent_id: String,
    pub request_type: String,
    pub payload: serde_json::Value,
    pub resource_lock: Option<String>,
    pub tool_strategy: Option<ToolStrategy>,
    pub task_description: String,
}

const MAX_ATTEMPTS: u32 = 3;
const BASE_BACKOFF: Duration = Duration::from_millis(100);

/// Runs one specialist invocation end-to-end: acquire lock (if any) →
/// resolve tools (C6) → request over the bus (C4), discovered via the
/// registry (C3) → tier-1 retry → release lock unconditionally on exit.
pub async fn run(
    request: SpecialistRequest,
    registry: &AgentRegistry,
    bus: &EventBus,
    locks: &LockManager,
    catalog: &ToolCatalog,
    request_timeout: Duration,
) -> Result<serde_json::Value, OrchestratorError> {
    if let Some(resource_id) = &request.resource_lock {
        locks
            .acquire_with_wait(
                resource_id,
                &request.agent_id,
                Duration::from_secs(300),
                Duration::from_secs(30),
                0,
            )
            .await?;
    }

    let result = run_inner(&request, registry, bus, catalog, request_timeout).await;

    if let Some(resource_id) = &request.resource_lock {
        // Unconditional release on every exit path, including failure.
        let _ = locks.release(resource_id, &request.agent_id).await;
    }

    result
}

async fn run_inner(
    request: &SpecialistRequest,
    registry: &AgentRegistry,
    bus: &EventBus,
    catalog: &ToolCatalog,
    request_timeout: Duration,
) -> Result<serde_json::Value, OrchestratorError> {
    registry.assert_dispatchable(&request.agent_id).await?;

    let strategy = request.tool_strategy.unwrap_or(ToolStrategy::Minimal);
    let tools = select(&request.task_description, &[], strategy, catalog);

    let mut payload = request.payload.clone();
    if let serde_json::Value::Object(map) = &mut payload {
        map.insert(
            "tools".into(),
            serde_json::to_value(&tools).unwrap_or(serde_json::Value::Null),
        );
    }

    let mut attempt = 0;
    loop {
        attempt += 1;
        let result = bus
            .request(
                "orchestrator",
                &request.agent_id,
                &request.request_type,
                payload.clone(),
                request_timeout,
            )
            .await;

        match result {
            Ok(event) => return Ok(event.payload),
            Err(OrchestratorError::Timeout(_)) if attempt < MAX_ATTEMPTS => {
                tokio::time::sleep(BASE_BACKOFF * attempt).await;
                continue;
            }
            Err(_) if attempt < MAX_ATTEMPTS => {
                tokio::time::sleep(BASE_BACKOFF * attempt).await;
                continue;
            }
            Err(err) => {
                return Err(OrchestratorError::AgentFailure(format!(
                    "{} failed after {attempt} attempts: {err}",
                    request.agent_id
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{AgentProfile, Capability};
    use state_store::Store;

    async fn setup() -> (AgentRegistry, EventBus, LockManager, ToolCatalog) {
        let registry = AgentRegistry::new();
        registry
            .register(AgentProfile {
                id: "code-reviewer".into(),
                base_url: "http://localhost:9001".into(),
                port: 9001,
                capabilities: vec![Capability {
                    name: "review".into(),
                    description: "reviews code".into(),
                    parameters_schema: serde_json::json!({}),
                    tags: vec![],
                    cost_estimate: None,
                }],
                status: crate::registry::AgentStatus::Registering,
                last_heartbeat_at: 0,
                registered_at: 0,
            })
            .await
            .unwrap();
        (
            registry,
            EventBus::new(),
            LockManager::new(Store::open_in_memory().unwrap()),
            ToolCatalog::default(),
        )
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn successful_request_returns_payload_and_releases_lock() {
        let (registry, bus, locks, catalog) = setup().await;
        let bus = std::sync::Arc::new(bus);
        let bus_responder = bus.clone();
        bus.subscribe("review", "test-responder", move |event| {
            let bus_responder = bus_responder.clone();
            let correlation = event.correlation_id.clone().unwrap();
            tokio::spawn(async move {
                bus_responder
                    .respond("code-reviewer", &correlation, serde_json::json!({"ok": true}))
                    .await;
            });
            Ok(())
        })
        .await;

        let request = SpecialistRequest {
            agent_id: "code-reviewer".into(),
            request_type: "review".into(),
            payload: serde_json::json!({}),
            resource_lock: Some("repo:acme/app".into()),
            tool_strategy: None,
            task_description: "review the pull request".into(),
        };
        let result = run(request, &registry, &bus, &locks, &catalog, Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(result["ok"], true);
        assert!(!locks.check("repo:acme/app").await.unwrap().locked);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn unreachable_agent_fails_fast() {
        let (registry, bus, locks, catalog) = setup().await;
        let request = SpecialistRequest {
            agent_id: "missing-agent".into(),
            request_type: "review".into(),
            payload: serde_json::json!({}),
            resource_lock: None,
            tool_strategy: None,
            task_description: "anything".into(),
        };
        let err = run(request, &registry, &bus, &locks, &catalog, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::AgentUnreachable(_)));
    }
}
