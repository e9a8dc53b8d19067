//! Row/record types persisted by the state store.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A running instance of a declarative DAG template with persisted state (§3 Workflow).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Workflow {
    pub workflow_id: String,
    pub template_name: String,
    pub context: serde_json::Value,
    pub outputs: HashMap<String, serde_json::Value>,
    pub status: WorkflowStatus,
    pub current_step: Option<String>,
    pub step_statuses: HashMap<String, StepStatus>,
    pub started_at: i64,
    pub updated_at: i64,
    pub completed_at: Option<i64>,
    pub version: i64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Running,
    Paused,
    Completed,
    Failed,
    Canceled,
}

impl WorkflowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "paused" => Some(Self::Paused),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "canceled" => Some(Self::Canceled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Canceled)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "skipped" => Some(Self::Skipped),
            _ => None,
        }
    }
}

/// A single active, or expired-but-not-yet-swept, advisory lock (§3 Lock Record).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LockRecord {
    pub resource_id: String,
    pub holder_agent_id: String,
    pub acquired_at: i64,
    pub expires_at: i64,
    pub reason: Option<String>,
    pub metadata: serde_json::Value,
}

/// An agent waiting for a contended resource (§3 Wait Queue Entry).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WaitQueueEntry {
    pub id: i64,
    pub resource_id: String,
    pub agent_id: String,
    pub requested_at: i64,
    pub timeout_at: i64,
    pub priority: i64,
    pub lease_ms: i64,
    pub metadata: serde_json::Value,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockOp {
    Acquire,
    Release,
    Timeout,
    ForceRelease,
}

impl LockOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Acquire => "acquire",
            Self::Release => "release",
            Self::Timeout => "timeout",
            Self::ForceRelease => "force_release",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "acquire" => Some(Self::Acquire),
            "release" => Some(Self::Release),
            "timeout" => Some(Self::Timeout),
            "force_release" => Some(Self::ForceRelease),
            _ => None,
        }
    }
}

/// Append-only lock history row (§3 Lock History).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LockHistoryRecord {
    pub id: i64,
    pub resource_id: String,
    pub agent_id: String,
    pub op: LockOp,
    pub acquired_at: Option<i64>,
    pub released_at: Option<i64>,
    pub duration_ms: Option<i64>,
    pub wait_time_ms: Option<i64>,
    pub success: bool,
    pub error_message: Option<String>,
    pub created_at: i64,
}

/// A new lock history row to be inserted (id/created_at assigned by the store).
#[derive(Clone, Debug)]
pub struct NewLockHistoryRecord {
    pub resource_id: String,
    pub agent_id: String,
    pub op: LockOp,
    pub acquired_at: Option<i64>,
    pub released_at: Option<i64>,
    pub duration_ms: Option<i64>,
    pub wait_time_ms: Option<i64>,
    pub success: bool,
    pub error_message: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalDecision {
    Pending,
    Approved,
    Rejected,
}

impl ApprovalDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }
}

/// A persisted HITL approval request (§3 Approval Request).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub approval_id: String,
    pub workflow_id: String,
    pub step_id: String,
    pub risk_assessment: serde_json::Value,
    pub decision: ApprovalDecision,
    pub decided_by: Option<String>,
    pub decided_at: Option<i64>,
}
