//! Declarative DAG template model (§3, §4.10, §6 "Template file format").

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    AgentCall,
    DecisionGate,
    HitlApproval,
    Noop,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StepTemplate {
    pub id: String,
    #[serde(rename = "type")]
    pub step_type: StepType,
    pub agent: Option<String>,
    pub resource_lock: Option<String>,
    pub payload: Option<serde_json::Value>,
    pub timeout_secs: Option<u64>,

    pub on_success: Option<String>,
    pub on_failure: Option<String>,
    pub on_proceed: Option<String>,
    pub on_block: Option<String>,
    pub on_approved: Option<String>,
    pub on_rejected: Option<String>,
}

impl StepTemplate {
    /// The successor for a normal (non-branching) completion path.
    pub fn default_successor(&self) -> Option<&str> {
        self.on_success.as_deref()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkflowTemplate {
    pub name: String,
    pub version: String,
    pub steps: Vec<StepTemplate>,
}

impl WorkflowTemplate {
    pub fn first_step_id(&self) -> Option<&str> {
        self.steps.first().map(|s| s.id.as_str())
    }

    pub fn step(&self, id: &str) -> Option<&StepTemplate> {
        self.steps.iter().find(|s| s.id == id)
    }

    fn successors(&self, step: &StepTemplate) -> Vec<&str> {
        [
            &step.on_success,
            &step.on_failure,
            &step.on_proceed,
            &step.on_block,
            &step.on_approved,
            &step.on_rejected,
        ]
        .into_iter()
        .filter_map(|s| s.as_deref())
        .collect()
    }
}

/// Validates DAG shape: unique step ids, every named successor resolves to
/// a step in the same template, and no cycles. Carried over as a design
/// idea from the upstream project's generic state-graph validator (dangling
/// edge / duplicate-node / cycle checks), reimplemented from scratch here
/// since this template's execution model (persisted, resumable per step)
/// has nothing in common with that graph's in-memory `invoke()` loop.
pub fn validate(template: &WorkflowTemplate) -> Result<(), crate::error::OrchestratorError> {
    use crate::error::OrchestratorError;
    use std::collections::HashSet;

    let mut seen = HashSet::new();
    for step in &template.steps {
        if !seen.insert(step.id.as_str()) {
            return Err(OrchestratorError::TemplateError(format!(
                "duplicate step id '{}' in template '{}'",
                step.id, template.name
            )));
        }
    }

    let ids: HashSet<&str> = template.steps.iter().map(|s| s.id.as_str()).collect();
    for step in &template.steps {
        for succ in template.successors(step) {
            if !ids.contains(succ) {
                return Err(OrchestratorError::TemplateError(format!(
                    "step '{}' references unknown successor '{}'",
                    step.id, succ
                )));
            }
        }
    }

    let mut visiting = HashSet::new();
    let mut visited = HashSet::new();
    for step in &template.steps {
        detect_cycle(template, step.id.as_str(), &mut visiting, &mut visited)?;
    }
    Ok(())
}

fn detect_cycle<'a>(
    template: &'a WorkflowTemplate,
    id: &'a str,
    visiting: &mut std::collections::HashSet<&'a str>,
    visited: &mut std::collections::HashSet<&'a str>,
) -> Result<(), crate::error::OrchestratorError> {
    use crate::error::OrchestratorError;

    if visited.contains(id) {
        return Ok(());
    }
    if !visiting.insert(id) {
        return Err(OrchestratorError::TemplateError(format!(
            "template '{}' contains a cycle through step '{id}'",
            template.name
        )));
    }
    if let Some(step) = template.step(id) {
        for succ in template.successors(step) {
            detect_cycle(template, succ, visiting, visited)?;
        }
    }
    visiting.remove(id);
    visited.insert(id);
    Ok(())
}
