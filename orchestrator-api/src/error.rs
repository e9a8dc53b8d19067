//! Canonical `{error, message, details?}` error body (§6) and the
//! kind→status mapping (§7).

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use orchestrator_core::OrchestratorError;
use serde::Serialize;
use serde_json::Value;

#[derive(Serialize)]
pub struct ApiErrorBody {
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

pub struct ApiError {
    pub status: StatusCode,
    pub body: ApiErrorBody,
}

impl ApiError {
    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            body: ApiErrorBody {
                error: "not_found".into(),
                message: message.into(),
                details: None,
            },
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            body: ApiErrorBody {
                error: "validation_error".into(),
                message: message.into(),
                details: None,
            },
        }
    }
}

/// §7 taxonomy kind → HTTP status. `contended` is explicitly a first-class
/// outcome rather than an error at the HTTP layer, but callers that choose
/// to propagate it here still get a sane status.
fn status_for_kind(kind: &str) -> StatusCode {
    match kind {
        "validation_error" | "template_error" => StatusCode::BAD_REQUEST,
        "not_found" => StatusCode::NOT_FOUND,
        "version_conflict" | "concurrent_update" => StatusCode::CONFLICT,
        "contended" => StatusCode::CONFLICT,
        "wait_timeout" | "timeout" => StatusCode::GATEWAY_TIMEOUT,
        "rate_limited" => StatusCode::TOO_MANY_REQUESTS,
        "agent_unreachable" => StatusCode::BAD_GATEWAY,
        "storage_unavailable" => StatusCode::SERVICE_UNAVAILABLE,
        "subscriber_error" | "agent_failure" | "provider_error" | "context_overflow"
        | "not_holder" => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<OrchestratorError> for ApiError {
    fn from(err: OrchestratorError) -> Self {
        let kind = err.kind();
        Self {
            status: status_for_kind(kind),
            body: ApiErrorBody {
                error: kind.to_string(),
                message: err.to_string(),
                details: None,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
