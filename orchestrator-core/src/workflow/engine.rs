//! Workflow Engine (C10): interprets a template as a DAG, executing one
//! step per advance, persisting through the state store between steps, and
//! suspending at `hitl_approval` gates until `resume_workflow` is called
//! (§4.10).
//!
//! Each call into the engine loads the workflow fresh from the store and
//! writes back through `update_workflow`'s optimistic-concurrency check —
//! there is no shared in-memory mutable workflow state across advances
//! (§5): the store is the only source of truth.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::RwLock;

use state_store::{ApprovalDecision as StoredApprovalDecision, StepStatus, Store, Workflow, WorkflowStatus};

use crate::bus::{Event, EventBus};
use crate::error::OrchestratorError;
use crate::llm::{LlmClient, LlmOptions};
use crate::lock::LockManager;
use crate::registry::AgentRegistry;
use crate::specialist::{self, SpecialistRequest};
use crate::tools::ToolCatalog;

use super::placeholder;
use super::template::{validate, StepTemplate, StepType, WorkflowTemplate};

/// `resume_workflow`'s caller-facing decision (§4.10, §6 `approval_decision`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApprovalDecision {
    Approved,
    Rejected,
}

impl From<ApprovalDecision> for StoredApprovalDecision {
    fn from(d: ApprovalDecision) -> Self {
        match d {
            ApprovalDecision::Approved => StoredApprovalDecision::Approved,
            ApprovalDecision::Rejected => StoredApprovalDecision::Rejected,
        }
    }
}

/// Outcome of executing a single step, before it is folded into the
/// workflow's persisted state (§4.10 "Execution loop").
enum StepOutcome {
    Completed { output: Value, next: Option<String> },
    Failed { error: String, next: Option<String> },
    Paused { approval_id: String, risk: Value },
}

/// Timeouts the engine applies itself (most per-call timeouts live with
/// the call site — C9's agent request timeout, C5's LLM timeout — but the
/// engine also honors a per-step override, §5 "Timeouts").
#[derive(Clone, Copy, Debug)]
pub struct EngineTimeouts {
    pub agent_request: Duration,
    pub llm_call: Duration,
}

impl Default for EngineTimeouts {
    fn default() -> Self {
        Self {
            agent_request: Duration::from_secs(60),
            llm_call: Duration::from_secs(60),
        }
    }
}

pub struct WorkflowEngine {
    store: Store,
    registry: Arc<AgentRegistry>,
    bus: Arc<EventBus>,
    locks: Arc<LockManager>,
    llm: Arc<dyn LlmClient>,
    catalog: ToolCatalog,
    templates: RwLock<HashMap<String, WorkflowTemplate>>,
    timeouts: EngineTimeouts,
}

impl WorkflowEngine {
    pub fn new(
        store: Store,
        registry: Arc<AgentRegistry>,
        bus: Arc<EventBus>,
        locks: Arc<LockManager>,
        llm: Arc<dyn LlmClient>,
        catalog: ToolCatalog,
        timeouts: EngineTimeouts,
    ) -> Self {
        Self {
            store,
            registry,
            bus,
            locks,
            llm,
            catalog,
            templates: RwLock::new(HashMap::new()),
            timeouts,
        }
    }

    pub async fn register_template(&self, template: WorkflowTemplate) -> Result<(), OrchestratorError> {
        validate(&template)?;
        self.templates.write().await.insert(template.name.clone(), template);
        Ok(())
    }

    pub async fn list_templates(&self) -> Vec<WorkflowTemplate> {
        self.templates.read().await.values().cloned().collect()
    }

    pub async fn get_template(&self, name: &str) -> Option<WorkflowTemplate> {
        self.templates.read().await.get(name).cloned()
    }

    pub async fn load_workflow(&self, id: &str) -> Result<Workflow, OrchestratorError> {
        Ok(self.store.load_workflow(id).await?)
    }

    /// Creates a workflow instance and runs it until it pauses or reaches a
    /// terminal status (§4.11 `POST /workflow/execute`).
    pub async fn create_and_run(
        &self,
        template_name: &str,
        context: Value,
    ) -> Result<Workflow, OrchestratorError> {
        let template = self
            .get_template(template_name)
            .await
            .ok_or_else(|| OrchestratorError::Validation(format!("unknown template '{template_name}'")))?;

        let step_statuses: HashMap<String, StepStatus> = template
            .steps
            .iter()
            .map(|s| (s.id.clone(), StepStatus::Pending))
            .collect();
        let workflow = self
            .store
            .create_workflow(template_name, context, step_statuses)
            .await?;

        if workflow.status.is_terminal() {
            return Ok(workflow);
        }
        self.advance(&workflow.workflow_id).await
    }

    /// Runs the execution loop (§4.10 steps 1–7) until the workflow
    /// suspends (`paused`) or reaches a terminal status.
    pub async fn advance(&self, workflow_id: &str) -> Result<Workflow, OrchestratorError> {
        loop {
            let workflow = self.store.load_workflow(workflow_id).await?;
            if workflow.status.is_terminal() {
                return Ok(workflow);
            }
            if workflow.status == WorkflowStatus::Paused {
                return Ok(workflow);
            }

            let template = self
                .get_template(&workflow.template_name)
                .await
                .ok_or_else(|| {
                    OrchestratorError::Validation(format!("unknown template '{}'", workflow.template_name))
                })?;

            let step_id = match &workflow.current_step {
                Some(id) => id.clone(),
                None => match template.first_step_id() {
                    Some(id) => id.to_string(),
                    None => {
                        // No steps at all: state-store already completes this
                        // at creation time, but guard the resume path too.
                        return self
                            .finish_with_status(workflow_id, workflow.version, WorkflowStatus::Completed)
                            .await;
                    }
                },
            };

            let Some(step) = template.step(&step_id) else {
                return self
                    .fail_workflow(
                        workflow_id,
                        workflow.version,
                        format!("template_error: unknown step id '{step_id}'"),
                    )
                    .await;
            };

            self.bus
                .emit(Event {
                    event_type: "step_started".into(),
                    source_agent: "workflow-engine".into(),
                    target_agent: None,
                    correlation_id: None,
                    payload: serde_json::json!({"workflow_id": workflow_id, "step_id": step_id}),
                    emitted_at: state_store::now_ms(),
                })
                .await;

            let outcome = self.execute_step(&workflow, step).await;

            match self
                .apply_outcome(&workflow, step, outcome)
                .await
            {
                Ok(Some(completed)) => return Ok(completed),
                Ok(None) => continue,
                Err(OrchestratorError::VersionConflict { .. }) => {
                    // §4.10 step 6: retry once against a freshly loaded workflow.
                    let reloaded = self.store.load_workflow(workflow_id).await?;
                    if reloaded.version != workflow.version {
                        continue;
                    }
                    return Err(OrchestratorError::ConcurrentUpdate(format!(
                        "workflow {workflow_id} lost the race twice on step '{step_id}'"
                    )));
                }
                Err(other) => return Err(other),
            }
        }
    }

    /// Executes one step body per its type (§4.10 "Step types and
    /// semantics"); does not touch persisted state.
    async fn execute_step(&self, workflow: &Workflow, step: &StepTemplate) -> StepOutcome {
        let rendered_payload = match &step.payload {
            Some(p) => match placeholder::render(p, &workflow.context, &workflow.outputs) {
                Ok(v) => v,
                Err(e) => {
                    return StepOutcome::Failed {
                        error: e.to_string(),
                        next: None,
                    }
                }
            },
            None => Value::Object(Default::default()),
        };

        match step.step_type {
            StepType::Noop => StepOutcome::Completed {
                output: Value::Null,
                next: step.on_success.clone(),
            },
            StepType::AgentCall => self.execute_agent_call(step, rendered_payload).await,
            StepType::DecisionGate => self.execute_decision_gate(step, rendered_payload).await,
            StepType::HitlApproval => self.execute_hitl(workflow, step, rendered_payload).await,
        }
    }

    async fn execute_agent_call(&self, step: &StepTemplate, payload: Value) -> StepOutcome {
        let Some(agent_id) = &step.agent else {
            return StepOutcome::Failed {
                error: "agent_call step missing 'agent'".into(),
                next: step.on_failure.clone(),
            };
        };
        let task_description = payload
            .get("task")
            .and_then(|v| v.as_str())
            .unwrap_or(step.id.as_str())
            .to_string();

        let request = SpecialistRequest {
            agent_id: agent_id.clone(),
            request_type: step.id.clone(),
            payload,
            resource_lock: step.resource_lock.clone(),
            tool_strategy: None,
            task_description,
        };

        let timeout = step
            .timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(self.timeouts.agent_request);

        let result = specialist::run(request, &self.registry, &self.bus, &self.locks, &self.catalog, timeout).await;
        match result {
            Ok(output) => StepOutcome::Completed {
                output,
                next: step.on_success.clone(),
            },
            Err(err) => StepOutcome::Failed {
                error: err.to_string(),
                next: step.on_failure.clone(),
            },
        }
    }

    async fn execute_decision_gate(&self, step: &StepTemplate, payload: Value) -> StepOutcome {
        let prompt = payload
            .get("prompt")
            .and_then(|v| v.as_str())
            .map(String::from)
            .unwrap_or_else(|| format!("Decide whether to proceed with step '{}'.", step.id));

        let completion = match tokio::time::timeout(
            self.timeouts.llm_call,
            self.llm.complete(&prompt, &LlmOptions::default()),
        )
        .await
        {
            Ok(Ok(c)) => c,
            Ok(Err(_)) | Err(_) => {
                // A provider failure or timeout at a decision gate is treated
                // the same as a malformed verdict: fail safe to `on_block`
                // (§4.10 "Malformed verdict ⟹ on_block").
                return StepOutcome::Completed {
                    output: serde_json::json!({"decision": "block", "reasoning": "llm call failed"}),
                    next: step.on_block.clone(),
                };
            }
        };

        match extract_json(&completion.content) {
            Some(verdict) if verdict.get("decision").and_then(|d| d.as_str()) == Some("proceed") => {
                StepOutcome::Completed {
                    output: verdict,
                    next: step.on_proceed.clone(),
                }
            }
            Some(verdict) => StepOutcome::Completed {
                output: verdict,
                next: step.on_block.clone(),
            },
            None => StepOutcome::Completed {
                output: serde_json::json!({"decision": "block", "reasoning": "malformed verdict"}),
                next: step.on_block.clone(),
            },
        }
    }

    async fn execute_hitl(&self, workflow: &Workflow, step: &StepTemplate, payload: Value) -> StepOutcome {
        // A payload may pin the risk directly (used by deterministic
        // templates/tests); otherwise an LLM risk assessment is requested.
        let risk = if let Some(r) = payload.get("risk").and_then(|v| v.as_str()) {
            r.to_string()
        } else {
            let prompt = payload
                .get("risk_prompt")
                .and_then(|v| v.as_str())
                .map(String::from)
                .unwrap_or_else(|| format!("Assess the risk of proceeding with step '{}'.", step.id));
            match tokio::time::timeout(
                self.timeouts.llm_call,
                self.llm.complete(&prompt, &LlmOptions::default()),
            )
            .await
            {
                Ok(Ok(completion)) => extract_json(&completion.content)
                    .and_then(|v| v.get("risk").and_then(|r| r.as_str()).map(String::from))
                    .unwrap_or_else(|| "high".to_string()),
                Ok(Err(_)) | Err(_) => "high".to_string(),
            }
        };

        let risk_assessment = serde_json::json!({"risk": risk});

        if risk == "low" {
            return StepOutcome::Completed {
                output: risk_assessment,
                next: step.on_approved.clone(),
            };
        }

        match self
            .store
            .create_approval(&workflow.workflow_id, &step.id, risk_assessment.clone())
            .await
        {
            Ok(approval) => StepOutcome::Paused {
                approval_id: approval.approval_id,
                risk: risk_assessment,
            },
            Err(err) => StepOutcome::Failed {
                error: err.to_string(),
                next: step.on_failure.clone(),
            },
        }
    }

    /// Folds a `StepOutcome` into the persisted workflow (§4.10 step 5).
    /// Returns `Ok(Some(workflow))` when the loop should stop (paused or
    /// terminal), `Ok(None)` to keep looping, or the store's error
    /// (including `VersionConflict`) for the caller to retry.
    async fn apply_outcome(
        &self,
        workflow: &Workflow,
        step: &StepTemplate,
        outcome: StepOutcome,
    ) -> Result<Option<Workflow>, OrchestratorError> {
        let workflow_id = workflow.workflow_id.clone();
        let step_id = step.id.clone();

        match outcome {
            StepOutcome::Completed { output, next } => {
                let next_for_status = next.clone();
                let updated = self
                    .store
                    .update_workflow(&workflow_id, workflow.version, move |w| {
                        w.step_statuses.insert(step_id.clone(), StepStatus::Completed);
                        w.outputs.insert(step_id.clone(), output);
                        match next_for_status {
                            Some(n) => w.current_step = Some(n),
                            None => {
                                w.status = WorkflowStatus::Completed;
                                w.current_step = None;
                            }
                        }
                    })
                    .await?;

                self.bus
                    .emit(Event {
                        event_type: "step_completed".into(),
                        source_agent: "workflow-engine".into(),
                        target_agent: None,
                        correlation_id: None,
                        payload: serde_json::json!({
                            "workflow_id": workflow_id,
                            "step_id": step.id,
                            "status": "completed",
                        }),
                        emitted_at: state_store::now_ms(),
                    })
                    .await;

                if updated.status.is_terminal() {
                    Ok(Some(updated))
                } else {
                    Ok(None)
                }
            }
            StepOutcome::Failed { error, next } => {
                let step_id_for_mutation = step.id.clone();
                let next_for_status = next.clone();
                let updated = self
                    .store
                    .update_workflow(&workflow_id, workflow.version, move |w| {
                        w.step_statuses.insert(step_id_for_mutation.clone(), StepStatus::Failed);
                        match next_for_status {
                            Some(n) => w.current_step = Some(n),
                            None => {
                                w.status = WorkflowStatus::Failed;
                                w.current_step = None;
                            }
                        }
                    })
                    .await?;

                self.bus
                    .emit(Event {
                        event_type: "step_completed".into(),
                        source_agent: "workflow-engine".into(),
                        target_agent: None,
                        correlation_id: None,
                        payload: serde_json::json!({
                            "workflow_id": workflow_id,
                            "step_id": step.id,
                            "status": "failed",
                            "error": error,
                        }),
                        emitted_at: state_store::now_ms(),
                    })
                    .await;

                if updated.status.is_terminal() {
                    Ok(Some(updated))
                } else {
                    Ok(None)
                }
            }
            StepOutcome::Paused { approval_id, risk } => {
                let step_id_for_mutation = step.id.clone();
                let updated = self
                    .store
                    .update_workflow(&workflow_id, workflow.version, move |w| {
                        w.status = WorkflowStatus::Paused;
                        w.step_statuses.insert(step_id_for_mutation, StepStatus::Running);
                    })
                    .await?;

                self.bus
                    .emit(Event {
                        event_type: "workflow.awaiting_approval".into(),
                        source_agent: "workflow-engine".into(),
                        target_agent: None,
                        correlation_id: None,
                        payload: serde_json::json!({
                            "workflow_id": workflow_id,
                            "step_id": step.id,
                            "approval_id": approval_id,
                            "risk": risk,
                        }),
                        emitted_at: state_store::now_ms(),
                    })
                    .await;

                Ok(Some(updated))
            }
        }
    }

    async fn fail_workflow(
        &self,
        workflow_id: &str,
        expected_version: i64,
        message: String,
    ) -> Result<Workflow, OrchestratorError> {
        let updated = self
            .store
            .update_workflow(workflow_id, expected_version, move |w| {
                w.status = WorkflowStatus::Failed;
            })
            .await?;
        tracing::warn!(workflow_id, message, "workflow failed: template_error");
        Ok(updated)
    }

    async fn finish_with_status(
        &self,
        workflow_id: &str,
        expected_version: i64,
        status: WorkflowStatus,
    ) -> Result<Workflow, OrchestratorError> {
        Ok(self
            .store
            .update_workflow(workflow_id, expected_version, move |w| {
                w.status = status;
            })
            .await?)
    }

    /// Resumes a paused workflow with an external HITL decision (§4.10
    /// `resume_workflow`). Idempotent per `(id, step_id, decision)`: a
    /// second call with the same decision is a no-op because
    /// `decide_approval` only honors the first decision, and the workflow
    /// will already have moved off `paused` by the time it's replayed.
    pub async fn resume_workflow(
        &self,
        workflow_id: &str,
        decision: ApprovalDecision,
        decided_by: Option<String>,
    ) -> Result<Workflow, OrchestratorError> {
        let workflow = self.store.load_workflow(workflow_id).await?;
        if workflow.status != WorkflowStatus::Paused {
            // Already resumed (or never paused) — idempotent no-op, return
            // current state rather than erroring.
            return Ok(workflow);
        }

        let step_id = workflow.current_step.clone().ok_or_else(|| {
            OrchestratorError::Validation(format!("paused workflow {workflow_id} has no current step"))
        })?;

        let approval = self
            .store
            .get_approval_by_workflow_step(workflow_id, &step_id)
            .await?
            .ok_or_else(|| OrchestratorError::NotFound(format!("approval for {workflow_id}/{step_id}")))?;

        let decided = self
            .store
            .decide_approval(&approval.approval_id, decision.into(), decided_by)
            .await?;

        let template = self
            .get_template(&workflow.template_name)
            .await
            .ok_or_else(|| OrchestratorError::Validation(format!("unknown template '{}'", workflow.template_name)))?;
        let step = template
            .step(&step_id)
            .ok_or_else(|| OrchestratorError::TemplateError(format!("unknown step id '{step_id}'")))?;

        let next = match decided.decision {
            StoredApprovalDecision::Approved => step.on_approved.clone(),
            StoredApprovalDecision::Rejected => step.on_rejected.clone(),
            StoredApprovalDecision::Pending => None,
        };

        let step_id_for_mutation = step_id.clone();
        let outputs_value = decided.risk_assessment.clone();
        let next_for_status = next.clone();
        let decision_label = match decided.decision {
            StoredApprovalDecision::Approved => "completed",
            StoredApprovalDecision::Rejected => "failed",
            StoredApprovalDecision::Pending => "running",
        };
        self.store
            .update_workflow(workflow_id, workflow.version, move |w| {
                w.status = WorkflowStatus::Running;
                match decided.decision {
                    StoredApprovalDecision::Approved => {
                        w.step_statuses.insert(step_id_for_mutation.clone(), StepStatus::Completed);
                        w.outputs.insert(step_id_for_mutation.clone(), outputs_value);
                    }
                    StoredApprovalDecision::Rejected => {
                        w.step_statuses.insert(step_id_for_mutation.clone(), StepStatus::Failed);
                    }
                    StoredApprovalDecision::Pending => {}
                }
                match next_for_status {
                    Some(n) => w.current_step = Some(n),
                    None => {
                        w.status = if decision_label == "failed" {
                            WorkflowStatus::Failed
                        } else {
                            WorkflowStatus::Completed
                        };
                        w.current_step = None;
                    }
                }
            })
            .await?;

        self.advance(workflow_id).await
    }

    /// Cancels a running or paused workflow (§5 "Cancellation"). Step-scoped
    /// locks are released by `specialist::run`'s unconditional release on
    /// every exit path; there is no additional lock state to tear down here
    /// since the engine never holds a lock across an `.await` boundary
    /// between advances.
    pub async fn cancel(&self, workflow_id: &str) -> Result<Workflow, OrchestratorError> {
        let workflow = self.store.load_workflow(workflow_id).await?;
        if workflow.status.is_terminal() {
            return Ok(workflow);
        }
        Ok(self
            .store
            .update_workflow(workflow_id, workflow.version, |w| {
                w.status = WorkflowStatus::Canceled;
            })
            .await?)
    }
}

/// Extracts a JSON object from LLM content that may be wrapped in a
/// markdown code fence (some providers answer ```json {...} ``` even when
/// asked for bare JSON).
fn extract_json(content: &str) -> Option<Value> {
    let trimmed = content.trim();
    if let Ok(v) = serde_json::from_str::<Value>(trimmed) {
        return Some(v);
    }
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&trimmed[start..=end]).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlm;
    use crate::registry::{AgentProfile, AgentStatus, Capability};

    async fn engine_with_templates(templates: Vec<WorkflowTemplate>, llm_content: &str) -> Arc<WorkflowEngine> {
        let store = Store::open_in_memory().unwrap();
        let registry = Arc::new(AgentRegistry::new());
        let bus = Arc::new(EventBus::new());
        let locks = Arc::new(LockManager::new(store.clone()));
        let llm: Arc<dyn LlmClient> = Arc::new(MockLlm::new(llm_content));
        let engine = Arc::new(WorkflowEngine::new(
            store,
            registry,
            bus,
            locks,
            llm,
            ToolCatalog::default(),
            EngineTimeouts::default(),
        ));
        for t in templates {
            engine.register_template(t).await.unwrap();
        }
        engine
    }

    fn agent_step(id: &str, agent: &str, on_success: Option<&str>, on_failure: Option<&str>) -> StepTemplate {
        StepTemplate {
            id: id.to_string(),
            step_type: StepType::AgentCall,
            agent: Some(agent.to_string()),
            resource_lock: None,
            payload: Some(serde_json::json!({})),
            timeout_secs: Some(5),
            on_success: on_success.map(String::from),
            on_failure: on_failure.map(String::from),
            on_proceed: None,
            on_block: None,
            on_approved: None,
            on_rejected: None,
        }
    }

    fn hitl_step(id: &str, risk: &str, on_approved: Option<&str>, on_rejected: Option<&str>) -> StepTemplate {
        StepTemplate {
            id: id.to_string(),
            step_type: StepType::HitlApproval,
            agent: None,
            resource_lock: None,
            payload: Some(serde_json::json!({"risk": risk})),
            timeout_secs: None,
            on_success: None,
            on_failure: None,
            on_proceed: None,
            on_block: None,
            on_approved: on_approved.map(String::from),
            on_rejected: on_rejected.map(String::from),
        }
    }

    async fn register_echo_agent(engine: &WorkflowEngine, id: &str) {
        engine
            .registry
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
            .unwrap();
        let bus = engine.bus.clone();
        let responder = bus.clone();
        let expected_agent = id.to_string();
        bus.subscribe("*", "echo", move |event| {
            if event.target_agent.as_deref() != Some(expected_agent.as_str()) {
                return Ok(());
            }
            let responder = responder.clone();
            let correlation = event.correlation_id.clone().unwrap();
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

    #[tokio::test(flavor = "multi_thread")]
    async fn empty_template_completes_immediately() {
        let template = WorkflowTemplate {
            name: "noop".into(),
            version: "1".into(),
            steps: vec![],
        };
        let engine = engine_with_templates(vec![template], "{}").await;
        let workflow = engine.create_and_run("noop", serde_json::json!({})).await.unwrap();
        assert_eq!(workflow.status, WorkflowStatus::Completed);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn s1_pr_deployment_happy_path_completes() {
        let template = WorkflowTemplate {
            name: "pr-deployment".into(),
            version: "1".into(),
            steps: vec![
                agent_step("code_review", "code-reviewer", Some("run_tests"), None),
                agent_step("run_tests", "test-runner", Some("approval_gate"), None),
                hitl_step("approval_gate", "low", Some("deploy_production"), None),
                agent_step("deploy_production", "deployer", Some("update_docs"), None),
                StepTemplate {
                    id: "update_docs".into(),
                    step_type: StepType::Noop,
                    agent: None,
                    resource_lock: None,
                    payload: None,
                    timeout_secs: None,
                    on_success: None,
                    on_failure: None,
                    on_proceed: None,
                    on_block: None,
                    on_approved: None,
                    on_rejected: None,
                },
            ],
        };
        let engine = engine_with_templates(vec![template], "{}").await;
        for agent in ["code-reviewer", "test-runner", "deployer"] {
            register_echo_agent(&engine, agent).await;
        }

        let workflow = engine
            .create_and_run(
                "pr-deployment",
                serde_json::json!({"pr_number": 123, "branch": "feature/x"}),
            )
            .await
            .unwrap();

        assert_eq!(workflow.status, WorkflowStatus::Completed);
        assert_eq!(
            workflow.step_statuses["deploy_production"],
            StepStatus::Completed
        );
        assert_eq!(workflow.outputs["deploy_production"]["status"], "success");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn s2_hitl_pause_then_resume_completes() {
        let template = WorkflowTemplate {
            name: "feature".into(),
            version: "1".into(),
            steps: vec![
                hitl_step("approval_gate", "medium", Some("done"), None),
                StepTemplate {
                    id: "done".into(),
                    step_type: StepType::Noop,
                    agent: None,
                    resource_lock: None,
                    payload: None,
                    timeout_secs: None,
                    on_success: None,
                    on_failure: None,
                    on_proceed: None,
                    on_block: None,
                    on_approved: None,
                    on_rejected: None,
                },
            ],
        };
        let engine = engine_with_templates(vec![template], "{}").await;
        let workflow = engine
            .create_and_run("feature", serde_json::json!({}))
            .await
            .unwrap();
        assert_eq!(workflow.status, WorkflowStatus::Paused);

        let resumed = engine
            .resume_workflow(&workflow.workflow_id, ApprovalDecision::Approved, Some("alice".into()))
            .await
            .unwrap();
        assert_eq!(resumed.status, WorkflowStatus::Completed);

        // Resuming again with the same decision is idempotent.
        let again = engine
            .resume_workflow(&workflow.workflow_id, ApprovalDecision::Approved, Some("alice".into()))
            .await
            .unwrap();
        assert_eq!(again.status, WorkflowStatus::Completed);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn rejected_hitl_routes_to_on_rejected_or_fails() {
        let template = WorkflowTemplate {
            name: "feature".into(),
            version: "1".into(),
            steps: vec![hitl_step("approval_gate", "high", Some("done"), None)],
        };
        let engine = engine_with_templates(vec![template], "{}").await;
        let workflow = engine
            .create_and_run("feature", serde_json::json!({}))
            .await
            .unwrap();
        assert_eq!(workflow.status, WorkflowStatus::Paused);

        let resumed = engine
            .resume_workflow(&workflow.workflow_id, ApprovalDecision::Rejected, None)
            .await
            .unwrap();
        assert_eq!(resumed.status, WorkflowStatus::Failed);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn agent_failure_without_on_failure_fails_workflow() {
        let template = WorkflowTemplate {
            name: "t".into(),
            version: "1".into(),
            steps: vec![agent_step("only", "missing-agent", Some("x"), None)],
        };
        let engine = engine_with_templates(vec![template], "{}").await;
        let workflow = engine.create_and_run("t", serde_json::json!({})).await.unwrap();
        assert_eq!(workflow.status, WorkflowStatus::Failed);
        assert_eq!(workflow.step_statuses["only"], StepStatus::Failed);
    }

    struct SlowLlm;

    #[async_trait::async_trait]
    impl LlmClient for SlowLlm {
        async fn complete(&self, _prompt: &str, _options: &LlmOptions) -> Result<crate::llm::Completion, OrchestratorError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            unreachable!("llm_call timeout should have fired first")
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn decision_gate_times_out_and_falls_back_to_on_block() {
        let template = WorkflowTemplate {
            name: "t".into(),
            version: "1".into(),
            steps: vec![StepTemplate {
                id: "gate".into(),
                step_type: StepType::DecisionGate,
                agent: None,
                resource_lock: None,
                payload: Some(serde_json::json!({})),
                timeout_secs: None,
                on_success: None,
                on_failure: None,
                on_proceed: None,
                on_block: None,
                on_approved: None,
                on_rejected: None,
            }],
        };

        let store = Store::open_in_memory().unwrap();
        let registry = Arc::new(AgentRegistry::new());
        let bus = Arc::new(EventBus::new());
        let locks = Arc::new(LockManager::new(store.clone()));
        let llm: Arc<dyn LlmClient> = Arc::new(SlowLlm);
        let engine = Arc::new(WorkflowEngine::new(
            store,
            registry,
            bus,
            locks,
            llm,
            ToolCatalog::default(),
            EngineTimeouts { llm_call: Duration::from_millis(20), ..EngineTimeouts::default() },
        ));
        engine.register_template(template).await.unwrap();

        let workflow = engine.create_and_run("t", serde_json::json!({})).await.unwrap();
        assert_eq!(workflow.status, WorkflowStatus::Completed);
        assert_eq!(workflow.outputs["gate"]["decision"], "block");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn unknown_step_id_fails_with_template_error() {
        let template = WorkflowTemplate {
            name: "t".into(),
            version: "1".into(),
            // on_success points nowhere; this still validates (dangling
            // check would catch it) — so build this scenario by skipping
            // validation and seeding current_step out of band instead.
            steps: vec![StepTemplate {
                id: "a".into(),
                step_type: StepType::Noop,
                agent: None,
                resource_lock: None,
                payload: None,
                timeout_secs: None,
                on_success: None,
                on_failure: None,
                on_proceed: None,
                on_block: None,
                on_approved: None,
                on_rejected: None,
            }],
        };
        let engine = engine_with_templates(vec![template], "{}").await;
        let workflow = engine.create_and_run("t", serde_json::json!({})).await.unwrap();
        assert_eq!(workflow.status, WorkflowStatus::Running);

        // Force current_step to an id the template doesn't have, simulating
        // a template edited out from under a running workflow.
        engine
            .store
            .update_workflow(&workflow.workflow_id, workflow.version, |w| {
                w.current_step = Some("nonexistent".into());
            })
            .await
            .unwrap();

        let failed = engine.advance(&workflow.workflow_id).await.unwrap();
        assert_eq!(failed.status, WorkflowStatus::Failed);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn unresolved_placeholder_fails_the_step() {
        let mut broken = agent_step("a", "agent-x", Some("done"), None);
        broken.payload = Some(serde_json::json!({"missing": "{{ context.does_not_exist }}"}));
        let template = WorkflowTemplate {
            name: "t".into(),
            version: "1".into(),
            steps: vec![broken],
        };
        let engine = engine_with_templates(vec![template], "{}").await;
        let workflow = engine.create_and_run("t", serde_json::json!({})).await.unwrap();
        assert_eq!(workflow.status, WorkflowStatus::Failed);
    }

    #[test]
    fn extract_json_handles_markdown_fence() {
        let content = "```json\n{\"decision\": \"proceed\"}\n```";
        let value = extract_json(content).unwrap();
        assert_eq!(value["decision"], "proceed");
    }
}
