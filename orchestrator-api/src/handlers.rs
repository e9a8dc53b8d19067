//! Route handlers for the C11 API surface (§4.11, §6).

use std::collections::HashMap;

use axum::extract::{Path, State};
use axum::response::{IntoResponse, Json};
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use orchestrator_core::{classify, route_for, ApprovalDecision, Route};
use state_store::StepStatus;
use stream_event::ProtocolEvent;

use crate::error::{ApiError, ApiResult};
use crate::sse::stream_bus_events;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct WorkflowExecuteRequest {
    pub template_name: String,
    #[serde(default)]
    pub context: Value,
}

#[derive(Deserialize)]
pub struct WorkflowResumeRequest {
    pub approval_decision: String,
    #[serde(default)]
    pub decided_by: Option<String>,
}

#[derive(Deserialize)]
pub struct ApprovalDecisionRequest {
    pub decision: String,
    #[serde(default)]
    pub decided_by: Option<String>,
}

#[derive(Deserialize)]
pub struct AgentRequestBody {
    #[allow(dead_code)]
    pub request_type: String,
    pub correlation_id: String,
    pub payload: Value,
    pub source_agent: String,
}

#[derive(Deserialize)]
pub struct ChatStreamRequest {
    #[serde(default)]
    pub session_id: Option<String>,
    pub message: String,
    #[serde(default)]
    pub context: Value,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

fn parse_decision(raw: &str) -> ApiResult<ApprovalDecision> {
    match raw {
        "approved" => Ok(ApprovalDecision::Approved),
        "rejected" => Ok(ApprovalDecision::Rejected),
        other => Err(ApiError::validation(format!(
            "unknown approval_decision '{other}', expected 'approved' or 'rejected'"
        ))),
    }
}

pub async fn health() -> impl IntoResponse {
    Json(HealthResponse { status: "ok" })
}

pub async fn metrics() -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        orchestrator_core::METRICS.encode(),
    )
}

pub async fn workflow_templates(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.engine.list_templates().await)
}

pub async fn workflow_execute(
    State(state): State<AppState>,
    Json(req): Json<WorkflowExecuteRequest>,
) -> ApiResult<Json<Value>> {
    let workflow = state
        .engine
        .create_and_run(&req.template_name, req.context)
        .await?;
    Ok(Json(serde_json::to_value(workflow).unwrap_or(Value::Null)))
}

pub async fn workflow_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let workflow = state.engine.load_workflow(&id).await?;
    Ok(Json(serde_json::to_value(workflow).unwrap_or(Value::Null)))
}

pub async fn workflow_resume(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<WorkflowResumeRequest>,
) -> ApiResult<Json<Value>> {
    let decision = parse_decision(&req.approval_decision)?;
    let workflow = state
        .engine
        .resume_workflow(&id, decision, req.decided_by)
        .await?;
    Ok(Json(serde_json::to_value(workflow).unwrap_or(Value::Null)))
}

/// External HITL confirmation (§4.11): looks the approval up by id to find
/// its `(workflow_id, decision)` and drives the same resume path as
/// `POST /workflow/resume/{id}`, so the two entry points stay consistent.
pub async fn approvals_decide(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<ApprovalDecisionRequest>,
) -> ApiResult<Json<Value>> {
    let decision = parse_decision(&req.decision)?;
    let approval = state
        .store
        .get_approval(&id)
        .await
        .map_err(orchestrator_core::OrchestratorError::from)?;
    let workflow = state
        .engine
        .resume_workflow(&approval.workflow_id, decision, req.decided_by)
        .await?;
    Ok(Json(serde_json::to_value(workflow).unwrap_or(Value::Null)))
}

/// Receive-side of C4 request/response (§4.11, §6): a specialist delivers
/// the result of a dispatched request here, and it is handed to the bus's
/// correlation-keyed `respond`, completing the matching `EventBus::request`
/// call made by the specialist runner.
pub async fn agent_request(
    State(state): State<AppState>,
    Json(req): Json<AgentRequestBody>,
) -> impl IntoResponse {
    state
        .bus
        .respond(&req.source_agent, &req.correlation_id, req.payload.clone())
        .await;
    Json(serde_json::json!({"status": "accepted", "result": req.payload}))
}

pub async fn execute_stream(
    State(state): State<AppState>,
    Json(req): Json<WorkflowExecuteRequest>,
) -> ApiResult<impl IntoResponse> {
    let template = state
        .engine
        .get_template(&req.template_name)
        .await
        .ok_or_else(|| ApiError::validation(format!("unknown template '{}'", req.template_name)))?;

    let step_statuses: HashMap<String, StepStatus> = template
        .steps
        .iter()
        .map(|s| (s.id.clone(), StepStatus::Pending))
        .collect();
    let workflow = state
        .store
        .create_workflow(&req.template_name, req.context, step_statuses)
        .await
        .map_err(orchestrator_core::OrchestratorError::from)?;

    let workflow_id = workflow.workflow_id.clone();
    let filter_id = workflow_id.clone();
    let bus = state.bus.clone();
    let engine = state.engine.clone();

    let sse = stream_bus_events(
        bus,
        workflow_id.clone(),
        move |event| workflow_event_to_protocol(event, &filter_id),
        async move {
            engine
                .advance(&workflow_id)
                .await
                .map(|w| serde_json::to_value(w).unwrap_or(Value::Null))
        },
    );
    Ok(sse)
}

pub async fn chat_stream(
    State(state): State<AppState>,
    Json(req): Json<ChatStreamRequest>,
) -> ApiResult<axum::response::Response> {
    let session_id = req.session_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let intent = classify(&req.message, &req.context);
    let route = if state.enable_intent_routing {
        route_for(intent)
    } else {
        Route::FullOrchestration
    };

    match route {
        Route::ConversationalWithTools | Route::ConversationalWithoutTools => {
            let with_tools = matches!(route, Route::ConversationalWithTools);
            let bus = state.bus.clone();
            let llm_session = session_id.clone();
            let message = req.message.clone();
            let work_bus = state.bus.clone();
            let catalog = state.catalog.clone();
            let llm = state.llm.clone();

            let sse = stream_bus_events(
                bus,
                session_id.clone(),
                move |event| conversational_event_to_protocol(event, &llm_session),
                async move {
                    let reply = orchestrator_core::respond(
                        llm.as_ref(),
                        &work_bus,
                        &session_id,
                        &message,
                        Vec::new(),
                        with_tools,
                        &catalog,
                    )
                    .await?;
                    Ok(serde_json::json!({"content": reply.content}))
                },
            );
            Ok(sse.into_response())
        }
        Route::ExecuteStream | Route::FullOrchestration | Route::SupervisorSingleSpecialist => {
            let Some(template_name) = req
                .context
                .get("template_name")
                .and_then(|v| v.as_str())
                .map(String::from)
            else {
                return Err(ApiError::validation(
                    "orchestration routes require context.template_name",
                ));
            };
            let workflow_req = WorkflowExecuteRequest {
                template_name,
                context: req.context,
            };
            Ok(execute_stream(State(state), Json(workflow_req))
                .await?
                .into_response())
        }
    }
}

fn workflow_event_to_protocol(event: &orchestrator_core::Event, workflow_id: &str) -> Option<ProtocolEvent> {
    if event.payload.get("workflow_id").and_then(|v| v.as_str()) != Some(workflow_id) {
        return None;
    }
    match event.event_type.as_str() {
        "step_started" => Some(ProtocolEvent::StepStarted {
            step_id: event.payload.get("step_id")?.as_str()?.to_string(),
        }),
        "step_completed" => Some(ProtocolEvent::StepCompleted {
            step_id: event.payload.get("step_id")?.as_str()?.to_string(),
            status: event.payload.get("status")?.as_str()?.to_string(),
            result: event.payload.clone(),
        }),
        "workflow.awaiting_approval" => Some(ProtocolEvent::ApprovalRequired {
            approval_id: event.payload.get("approval_id")?.as_str()?.to_string(),
            workflow_id: workflow_id.to_string(),
            step_id: event.payload.get("step_id")?.as_str()?.to_string(),
            risk: event
                .payload
                .get("risk")
                .and_then(|r| r.get("risk"))
                .and_then(|r| r.as_str())
                .unwrap_or("unknown")
                .to_string(),
        }),
        _ => None,
    }
}

fn conversational_event_to_protocol(event: &orchestrator_core::Event, session_id: &str) -> Option<ProtocolEvent> {
    if event.payload.get("session_id").and_then(|v| v.as_str()) != Some(session_id) {
        return None;
    }
    match event.event_type.as_str() {
        "content" => Some(ProtocolEvent::Content {
            content: event.payload.get("content")?.as_str()?.to_string(),
        }),
        _ => None,
    }
}
