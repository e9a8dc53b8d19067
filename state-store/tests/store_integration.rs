//! Integration tests for state_store::Store: DB creation/reopen, workflow
//! optimistic concurrency, locks, wait queue and approvals end to end.
//! Uses multi_thread runtime so Store's block_in_place is allowed.

use state_store::{
    ApprovalDecision, LockRecord, NewLockHistoryRecord, LockOp, Store, WaitQueueEntry,
    WorkflowStatus,
};
use std::collections::HashMap;
use tempfile::NamedTempFile;

fn is_uuid(s: &str) -> bool {
    uuid::Uuid::parse_str(s).is_ok()
}

#[tokio::test(flavor = "multi_thread")]
async fn store_new_creates_db_and_tables_reopen_same_path_works() {
    let file = NamedTempFile::new().unwrap();
    let path = file.path().to_path_buf();

    let store1 = Store::new(&path).unwrap();
    let w = store1
        .create_workflow(
            "pr-deployment",
            serde_json::json!({}),
            HashMap::from([("a".to_string(), state_store::StepStatus::Pending)]),
        )
        .await
        .unwrap();
    assert!(is_uuid(&w.workflow_id));
    drop(store1);

    let store2 = Store::new(&path).unwrap();
    let reloaded = store2.load_workflow(&w.workflow_id).await.unwrap();
    assert_eq!(reloaded.workflow_id, w.workflow_id);
}

#[tokio::test(flavor = "multi_thread")]
async fn two_concurrent_updates_exactly_one_wins() {
    let store = std::sync::Arc::new(Store::open_in_memory().unwrap());
    let w = store
        .create_workflow(
            "t",
            serde_json::json!({}),
            HashMap::from([("a".to_string(), state_store::StepStatus::Pending)]),
        )
        .await
        .unwrap();

    let store_a = store.clone();
    let store_b = store.clone();
    let id_a = w.workflow_id.clone();
    let id_b = w.workflow_id.clone();
    let v = w.version;

    let (a, b) = tokio::join!(
        store_a.update_workflow(&id_a, v, |wf| wf.current_step = Some("a".into())),
        store_b.update_workflow(&id_b, v, |wf| wf.current_step = Some("b".into())),
    );

    let successes = [a.is_ok(), b.is_ok()].iter().filter(|x| **x).count();
    assert_eq!(successes, 1, "exactly one concurrent update must win");
}

#[tokio::test(flavor = "multi_thread")]
async fn lock_lifecycle_acquire_release_history() {
    let store = Store::open_in_memory().unwrap();
    let now = state_store::now_ms();

    store
        .upsert_lock(LockRecord {
            resource_id: "infrastructure:production".into(),
            holder_agent_id: "agent-a".into(),
            acquired_at: now,
            expires_at: now + 60_000,
            reason: None,
            metadata: serde_json::json!({}),
        })
        .await
        .unwrap();
    store
        .append_history(NewLockHistoryRecord {
            resource_id: "infrastructure:production".into(),
            agent_id: "agent-a".into(),
            op: LockOp::Acquire,
            acquired_at: Some(now),
            released_at: None,
            duration_ms: None,
            wait_time_ms: Some(0),
            success: true,
            error_message: None,
        })
        .await
        .unwrap();

    store.delete_lock("infrastructure:production").await.unwrap();
    store
        .append_history(NewLockHistoryRecord {
            resource_id: "infrastructure:production".into(),
            agent_id: "agent-a".into(),
            op: LockOp::Release,
            acquired_at: None,
            released_at: Some(now + 1000),
            duration_ms: Some(1000),
            wait_time_ms: None,
            success: true,
            error_message: None,
        })
        .await
        .unwrap();

    let history = store.list_history("infrastructure:production").await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].op, LockOp::Acquire);
    assert_eq!(history[1].op, LockOp::Release);
    assert!(store.get_lock("infrastructure:production").await.unwrap().is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn wait_queue_promotion_order() {
    let store = Store::open_in_memory().unwrap();
    let now = state_store::now_ms();
    store
        .enqueue_wait(WaitQueueEntry {
            id: 0,
            resource_id: "r".into(),
            agent_id: "b".into(),
            requested_at: now,
            timeout_at: now + 10_000,
            priority: 0,
            lease_ms: 60_000,
            metadata: serde_json::json!({}),
        })
        .await
        .unwrap();
    let waiters = store.list_waiters("r").await.unwrap();
    assert_eq!(waiters.len(), 1);
    assert_eq!(waiters[0].agent_id, "b");
    store.remove_waiter(waiters[0].id).await.unwrap();
    assert!(store.list_waiters("r").await.unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn approval_pause_and_resume_snapshot() {
    let store = Store::open_in_memory().unwrap();
    let mut statuses = HashMap::new();
    statuses.insert("approval_gate".to_string(), state_store::StepStatus::Running);
    let w = store
        .create_workflow("feature", serde_json::json!({}), statuses)
        .await
        .unwrap();
    let paused = store
        .update_workflow(&w.workflow_id, w.version, |wf| {
            wf.status = WorkflowStatus::Paused;
        })
        .await
        .unwrap();
    assert_eq!(paused.status, WorkflowStatus::Paused);

    let approval = store
        .create_approval(&w.workflow_id, "approval_gate", serde_json::json!({"risk": "medium"}))
        .await
        .unwrap();
    let decided = store
        .decide_approval(&approval.approval_id, ApprovalDecision::Approved, None)
        .await
        .unwrap();
    assert_eq!(decided.decision, ApprovalDecision::Approved);

    let resumed = store
        .update_workflow(&w.workflow_id, paused.version, |wf| {
            wf.status = WorkflowStatus::Completed;
        })
        .await
        .unwrap();
    assert_eq!(resumed.status, WorkflowStatus::Completed);
}
