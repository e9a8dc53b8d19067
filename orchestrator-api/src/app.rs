//! The HTTP router (§6 endpoint list): wires every handler onto
//! [`AppState`] behind a single `axum::Router`.

use axum::routing::{get, post};
use axum::Router;

use crate::handlers;
use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/chat/stream", post(handlers::chat_stream))
        .route("/execute/stream", post(handlers::execute_stream))
        .route("/workflow/execute", post(handlers::workflow_execute))
        .route("/workflow/status/:id", get(handlers::workflow_status))
        .route("/workflow/resume/:id", post(handlers::workflow_resume))
        .route("/workflow/templates", get(handlers::workflow_templates))
        .route("/approvals/:id", post(handlers::approvals_decide))
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
        .route("/agent-request", post(handlers::agent_request))
        .with_state(state)
}
