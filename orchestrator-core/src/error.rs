//! Crate-wide error kinds (§7 error taxonomy). One variant per *kind*, not
//! per call site — callers match on kind to decide retry/surface policy;
//! the engine itself never retries a step outcome (§7 propagation policy).

use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum OrchestratorError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("version conflict: expected {expected}, current {current}")]
    VersionConflict { expected: i64, current: i64 },

    #[error("resource contended: held by {held_by}")]
    Contended { held_by: String },

    #[error("wait timeout on {resource_id}")]
    WaitTimeout { resource_id: String },

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("agent unreachable: {0}")]
    AgentUnreachable(String),

    #[error("subscriber error: {0}")]
    SubscriberError(String),

    #[error("template error: {0}")]
    TemplateError(String),

    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("concurrent update: {0}")]
    ConcurrentUpdate(String),

    #[error("agent failure: {0}")]
    AgentFailure(String),

    #[error("provider error: {0}")]
    ProviderError(String),

    #[error("context overflow: {0}")]
    ContextOverflow(String),

    #[error("not the lock holder: {0}")]
    NotHolder(String),
}

impl OrchestratorError {
    /// The §7 taxonomy kind name, for metrics/log fields and API error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::NotFound(_) => "not_found",
            Self::VersionConflict { .. } => "version_conflict",
            Self::Contended { .. } => "contended",
            Self::WaitTimeout { .. } => "wait_timeout",
            Self::Timeout(_) => "timeout",
            Self::RateLimited(_) => "rate_limited",
            Self::AgentUnreachable(_) => "agent_unreachable",
            Self::SubscriberError(_) => "subscriber_error",
            Self::TemplateError(_) => "template_error",
            Self::StorageUnavailable(_) => "storage_unavailable",
            Self::ConcurrentUpdate(_) => "concurrent_update",
            Self::AgentFailure(_) => "agent_failure",
            Self::ProviderError(_) => "provider_error",
            Self::ContextOverflow(_) => "context_overflow",
            Self::NotHolder(_) => "not_holder",
        }
    }
}

impl From<state_store::StoreError> for OrchestratorError {
    fn from(e: state_store::StoreError) -> Self {
        match e {
            state_store::StoreError::NotFound(m) => Self::NotFound(m),
            state_store::StoreError::VersionConflict { expected, current } => {
                Self::VersionConflict { expected, current }
            }
            state_store::StoreError::Validation(m) => Self::Validation(m),
            state_store::StoreError::Storage(m) => Self::StorageUnavailable(m),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_matches_taxonomy_name() {
        assert_eq!(OrchestratorError::Validation("x".into()).kind(), "validation_error");
        assert_eq!(
            OrchestratorError::VersionConflict { expected: 1, current: 2 }.kind(),
            "version_conflict"
        );
    }
}
