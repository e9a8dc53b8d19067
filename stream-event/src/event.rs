//! Protocol-level event types: the SSE frame types streamed by the API
//! surface (§4.11, §6). State-carrying variants use `serde_json::Value`;
//! envelope fields (session_id, node_id, event_id) are applied separately.

use serde::Serialize;
use serde_json::Value;

/// One SSE frame emitted by `/chat/stream`, `/execute/stream`, or the
/// workflow engine's internal event feed. Matches §4.11/§6; envelope
/// (session_id, node_id, event_id) is applied by [`crate::envelope`].
///
/// Clients MUST treat unknown `type` values as opaque and ignore them
/// (§6) — adding a variant here is backward compatible for conformant
/// clients.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProtocolEvent {
    /// User-visible assistant/tool output token or chunk (§9 Open Questions:
    /// only `content` frames are user-visible).
    Content { content: String },
    /// A workflow step transitioned to `running`.
    StepStarted { step_id: String },
    /// A workflow step reached a terminal per-step status.
    StepCompleted {
        step_id: String,
        status: String,
        result: Value,
    },
    /// A `hitl_approval` step persisted an approval request and paused
    /// the workflow.
    ApprovalRequired {
        approval_id: String,
        workflow_id: String,
        step_id: String,
        risk: String,
    },
    /// Token usage for one LLM call, surfaced when available.
    Usage {
        prompt_tokens: u32,
        completion_tokens: u32,
        total_tokens: u32,
    },
    /// Stream complete; terminal frame before `[DONE]`.
    Done { session_id: String },
    /// Stream failed; terminal frame before `[DONE]` (§7 "errors on
    /// streams are emitted as a final error frame").
    Error { error: String, message: String },
}

impl ProtocolEvent {
    /// Serializes this event to a JSON object (type + payload only; no envelope).
    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}
