//! Relational persistence for the orchestration core (C1): workflows with
//! optimistic-concurrency checkpoints, resource locks, append-only lock
//! history, the lock wait queue, task/issue mappings, and HITL approval
//! requests. Backed by SQLite, independent of any in-memory engine state —
//! the store is the single source of truth for workflow advance.

mod store;
mod types;

pub use store::{now_ms, Store, StoreError};
pub use types::{
    ApprovalDecision, ApprovalRequest, LockHistoryRecord, LockOp, LockRecord,
    NewLockHistoryRecord, StepStatus, WaitQueueEntry, Workflow, WorkflowStatus,
};
