//! Workflow Engine (C10): declarative DAG templates, placeholder rendering
//! and the persisted execution loop that advances a workflow one step at a
//! time (§4.10).

pub mod builtin;
mod engine;
mod placeholder;
mod template;

pub use engine::{ApprovalDecision, EngineTimeouts, WorkflowEngine};
pub use template::{validate, StepTemplate, StepType, WorkflowTemplate};
