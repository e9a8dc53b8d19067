//! HTTP/SSE server for the orchestration core (axum).
//!
//! Binds `PORT` (default 8080) and serves the C11 endpoint surface: chat
//! and execute streaming over server-sent events, workflow lifecycle
//! endpoints, the approval callback, health and metrics.
//!
//! **Public API**: [`run_serve`], [`run_serve_on_listener`].

mod app;
mod error;
mod handlers;
mod sse;
mod state;

use std::time::Duration;

use tokio::net::TcpListener;
use tracing::{info, warn};

pub use app::router;
pub use state::AppState;

const DEFAULT_ADDR: &str = "127.0.0.1:8080";
const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Periodically reclaims expired locks and re-evaluates agent health,
/// rather than relying solely on the sweeps each call already performs
/// on-demand (§4.2, §4.3).
fn spawn_sweeper(state: &AppState) -> tokio::task::JoinHandle<()> {
    let locks = state.locks.clone();
    let registry = state.registry.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
        loop {
            ticker.tick().await;
            if let Err(err) = locks.sweep_all().await {
                warn!(error = %err, "periodic lock sweep failed");
            }
            registry.list().await;
        }
    })
}

/// Runs the server on an existing listener. Used by tests (bind to
/// `127.0.0.1:0` then pass the listener in to learn the bound port).
pub async fn run_serve_on_listener(
    listener: TcpListener,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = listener.local_addr()?;
    info!("orchestrator API listening on http://{addr}");

    let state = AppState::from_env().await;
    let sweeper = spawn_sweeper(&state);
    let app = router(state);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    sweeper.abort();
    Ok(())
}

/// Waits for Ctrl+C so `run_serve` drains in-flight requests before
/// returning instead of hard-exiting (§9 "no hidden re-initialization").
async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to install ctrl_c handler");
    }
    info!("shutdown signal received, draining connections");
}

/// Runs the server, binding `PORT` (§6), or `addr` if given.
pub async fn run_serve(addr: Option<&str>) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let bound = match addr {
        Some(a) => a.to_string(),
        None => {
            let port = std::env::var("PORT").unwrap_or_else(|_| "8080".to_string());
            format!("0.0.0.0:{port}")
        }
    };
    let addr = if bound.is_empty() { DEFAULT_ADDR } else { &bound };
    let listener = TcpListener::bind(addr).await?;
    run_serve_on_listener(listener).await
}
