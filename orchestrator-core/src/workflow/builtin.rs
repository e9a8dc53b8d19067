//! Built-in workflow templates matching the two canonical scenarios (§8
//! S1 "PR deployment happy path", S2 "HITL pause then resume"). Registered
//! by default so `GET /workflow/templates` and the CLI have something real
//! to run without requiring an external template-authoring story, which
//! the spec leaves unspecified beyond the file format shape.

use serde_json::json;

use super::template::{StepTemplate, StepType, WorkflowTemplate};

fn noop(id: &str) -> StepTemplate {
    StepTemplate {
        id: id.to_string(),
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
    }
}

fn agent_call(id: &str, agent: &str, on_success: &str) -> StepTemplate {
    StepTemplate {
        id: id.to_string(),
        step_type: StepType::AgentCall,
        agent: Some(agent.to_string()),
        resource_lock: None,
        payload: Some(json!({"task": id})),
        timeout_secs: Some(60),
        on_success: Some(on_success.to_string()),
        on_failure: None,
        on_proceed: None,
        on_block: None,
        on_approved: None,
        on_rejected: None,
    }
}

/// §8 S1: review, test, a low-risk approval gate that auto-proceeds,
/// deploy, then a no-op docs step.
pub fn pr_deployment_template() -> WorkflowTemplate {
    WorkflowTemplate {
        name: "pr-deployment".into(),
        version: "1".into(),
        steps: vec![
            agent_call("code_review", "code-reviewer", "run_tests"),
            agent_call("run_tests", "test-runner", "approval_gate"),
            StepTemplate {
                id: "approval_gate".into(),
                step_type: StepType::HitlApproval,
                agent: None,
                resource_lock: None,
                payload: Some(json!({"risk": "low"})),
                timeout_secs: None,
                on_success: None,
                on_failure: None,
                on_proceed: None,
                on_block: None,
                on_approved: Some("deploy_production".into()),
                on_rejected: None,
            },
            agent_call("deploy_production", "deployer", "update_docs"),
            noop("update_docs"),
        ],
    }
}

/// §8 S2: a medium-risk gate that suspends the workflow until
/// `resume_workflow` supplies a decision.
pub fn feature_approval_template() -> WorkflowTemplate {
    WorkflowTemplate {
        name: "feature".into(),
        version: "1".into(),
        steps: vec![
            StepTemplate {
                id: "approval_gate".into(),
                step_type: StepType::HitlApproval,
                agent: None,
                resource_lock: None,
                payload: Some(json!({"risk": "medium"})),
                timeout_secs: None,
                on_success: None,
                on_failure: None,
                on_proceed: None,
                on_block: None,
                on_approved: Some("done".into()),
                on_rejected: None,
            },
            noop("done"),
        ],
    }
}

pub fn all() -> Vec<WorkflowTemplate> {
    vec![pr_deployment_template(), feature_approval_template()]
}
