//! Demonstrates C2 lock contention (§8 S3): two agents race for the same
//! resource; the loser sees `Contended`, then acquires once the holder
//! releases.

use std::time::Duration;

use orchestrator_core::{LockManager, OrchestratorError};
use state_store::Store;

#[tokio::main]
async fn main() {
    let store = Store::open_in_memory().expect("in-memory store");
    let locks = LockManager::new(store);

    let outcome = locks
        .acquire(
            "deploy:prod",
            "agent-a",
            Duration::from_secs(30),
            Some("deploying v2".into()),
            serde_json::json!({}),
        )
        .await
        .expect("agent-a acquires");
    println!("agent-a acquired: {}", outcome.acquired);

    match locks
        .acquire(
            "deploy:prod",
            "agent-b",
            Duration::from_secs(30),
            None,
            serde_json::json!({}),
        )
        .await
    {
        Err(OrchestratorError::Contended { held_by }) => {
            println!("agent-b contended, held by {held_by}");
        }
        other => panic!("expected Contended, got {other:?}"),
    }

    locks.release("deploy:prod", "agent-a").await.expect("release");

    let outcome = locks
        .acquire(
            "deploy:prod",
            "agent-b",
            Duration::from_secs(30),
            None,
            serde_json::json!({}),
        )
        .await
        .expect("agent-b acquires after release");
    println!("agent-b acquired after release: {}", outcome.acquired);
}
