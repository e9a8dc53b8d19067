//! SQLite-backed state store: workflows, resource locks, lock history,
//! the lock wait queue, task/issue mappings and HITL approval requests (C1).
//!
//! Follows the connection-behind-a-mutex pattern used throughout this
//! codebase's persistence layer: one `rusqlite::Connection` guarded by a
//! blocking `std::sync::Mutex`, with blocking calls wrapped in
//! `tokio::task::block_in_place` so callers can `.await` from async code
//! without starving the runtime.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use rusqlite::{params, Connection, OptionalExtension};

use crate::types::{
    ApprovalDecision, ApprovalRequest, LockHistoryRecord, LockOp, LockRecord,
    NewLockHistoryRecord, StepStatus, WaitQueueEntry, Workflow, WorkflowStatus,
};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("version conflict: expected {expected}, current {current}")]
    VersionConflict { expected: i64, current: i64 },
    #[error("validation error: {0}")]
    Validation(String),
    #[error("storage unavailable: {0}")]
    Storage(String),
}

pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// The relational persistence layer for the orchestration core (C1).
/// Cheap to clone: every clone shares the same underlying connection via
/// `Arc`, so `LockManager` and the workflow engine can each own a `Store`
/// handle without wrapping the whole thing in an `Arc` themselves.
#[derive(Clone)]
pub struct Store {
    db: Arc<Mutex<Connection>>,
}

impl Store {
    /// Opens or creates the database and its tables.
    pub fn new(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn =
            Connection::open(path.as_ref()).map_err(|e| StoreError::Storage(e.to_string()))?;
        Self::init_schema(&conn)?;
        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
        })
    }

    /// Opens an in-memory database (tests).
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(|e| StoreError::Storage(e.to_string()))?;
        Self::init_schema(&conn)?;
        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
        })
    }

    fn init_schema(conn: &Connection) -> Result<(), StoreError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS workflow (
                id TEXT PRIMARY KEY,
                template_name TEXT NOT NULL,
                status TEXT NOT NULL,
                current_step TEXT,
                context TEXT NOT NULL,
                outputs TEXT NOT NULL,
                step_statuses TEXT NOT NULL,
                version INTEGER NOT NULL,
                started_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                completed_at INTEGER
            );

            CREATE TABLE IF NOT EXISTS resource_locks (
                resource_id TEXT PRIMARY KEY,
                agent_id TEXT NOT NULL,
                acquired_at INTEGER NOT NULL,
                expires_at INTEGER NOT NULL,
                lock_key TEXT NOT NULL,
                reason TEXT,
                metadata TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS lock_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                resource_id TEXT NOT NULL,
                agent_id TEXT NOT NULL,
                op TEXT NOT NULL,
                acquired_at INTEGER,
                released_at INTEGER,
                duration_ms INTEGER,
                wait_time_ms INTEGER,
                success INTEGER NOT NULL,
                error_message TEXT,
                created_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_lock_history_resource ON lock_history(resource_id);

            CREATE TABLE IF NOT EXISTS lock_wait_queue (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                resource_id TEXT NOT NULL,
                agent_id TEXT NOT NULL,
                requested_at INTEGER NOT NULL,
                timeout_at INTEGER NOT NULL,
                priority INTEGER NOT NULL,
                lease_ms INTEGER NOT NULL DEFAULT 0,
                metadata TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_wait_queue_resource ON lock_wait_queue(resource_id);

            CREATE TABLE IF NOT EXISTS task_issue_mapping (
                task_id TEXT PRIMARY KEY,
                issue_ref TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS approval_request (
                id TEXT PRIMARY KEY,
                workflow_id TEXT NOT NULL,
                step_id TEXT NOT NULL,
                risk TEXT NOT NULL,
                decision TEXT NOT NULL,
                decided_by TEXT,
                decided_at INTEGER
            );
            CREATE INDEX IF NOT EXISTS idx_approval_workflow ON approval_request(workflow_id);
            "#,
        )
        .map_err(|e| StoreError::Storage(e.to_string()))
    }

    fn lock_conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>, StoreError> {
        self.db
            .lock()
            .map_err(|_| StoreError::Storage("state store connection poisoned".into()))
    }

    // ---- Workflow -------------------------------------------------------

    pub async fn create_workflow(
        &self,
        template_name: &str,
        context: serde_json::Value,
        step_statuses: HashMap<String, StepStatus>,
    ) -> Result<Workflow, StoreError> {
        let workflow_id = uuid::Uuid::new_v4().to_string();
        let now = now_ms();
        let status = if step_statuses.is_empty() {
            WorkflowStatus::Completed
        } else {
            WorkflowStatus::Running
        };
        let workflow = Workflow {
            workflow_id,
            template_name: template_name.to_string(),
            context,
            outputs: HashMap::new(),
            status,
            current_step: None,
            step_statuses,
            started_at: now,
            updated_at: now,
            completed_at: if status.is_terminal() { Some(now) } else { None },
            version: 0,
        };
        let db = self.db.clone();
        let w = workflow.clone();
        tokio::task::block_in_place(move || {
            let conn = db
                .lock()
                .map_err(|_| StoreError::Storage("state store connection poisoned".into()))?;
            insert_workflow(&conn, &w)
        })?;
        Ok(workflow)
    }

    pub async fn load_workflow(&self, id: &str) -> Result<Workflow, StoreError> {
        let db = self.db.clone();
        let id = id.to_string();
        tokio::task::block_in_place(move || {
            let conn = db
                .lock()
                .map_err(|_| StoreError::Storage("state store connection poisoned".into()))?;
            load_workflow_row(&conn, &id)
        })
    }

    /// Optimistic-concurrency update: `mutate` is applied to an in-memory
    /// copy of the loaded workflow (bumping `updated_at`/`completed_at` as
    /// needed); the write only commits if `expected_version` still matches
    /// the row's current version, else `VersionConflict`.
    pub async fn update_workflow<F>(
        &self,
        id: &str,
        expected_version: i64,
        mutate: F,
    ) -> Result<Workflow, StoreError>
    where
        F: FnOnce(&mut Workflow) + Send + 'static,
    {
        let db = self.db.clone();
        let id = id.to_string();
        tokio::task::block_in_place(move || {
            let conn = db
                .lock()
                .map_err(|_| StoreError::Storage("state store connection poisoned".into()))?;
            let mut workflow = load_workflow_row(&conn, &id)?;
            if workflow.version != expected_version {
                return Err(StoreError::VersionConflict {
                    expected: expected_version,
                    current: workflow.version,
                });
            }
            mutate(&mut workflow);
            workflow.version += 1;
            workflow.updated_at = now_ms();
            if workflow.status.is_terminal() && workflow.completed_at.is_none() {
                workflow.completed_at = Some(workflow.updated_at);
            }
            update_workflow_row(&conn, &workflow, expected_version)?;
            Ok(workflow)
        })
    }

    // ---- Lock history -----------------------------------------------------

    pub async fn append_history(&self, record: NewLockHistoryRecord) -> Result<(), StoreError> {
        let db = self.db.clone();
        tokio::task::block_in_place(move || {
            let conn = db
                .lock()
                .map_err(|_| StoreError::Storage("state store connection poisoned".into()))?;
            conn.execute(
                "INSERT INTO lock_history
                 (resource_id, agent_id, op, acquired_at, released_at, duration_ms, wait_time_ms, success, error_message, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    record.resource_id,
                    record.agent_id,
                    record.op.as_str(),
                    record.acquired_at,
                    record.released_at,
                    record.duration_ms,
                    record.wait_time_ms,
                    record.success as i64,
                    record.error_message,
                    now_ms(),
                ],
            )
            .map_err(|e| StoreError::Storage(e.to_string()))?;
            Ok(())
        })
    }

    pub async fn list_history(&self, resource_id: &str) -> Result<Vec<LockHistoryRecord>, StoreError> {
        let db = self.db.clone();
        let resource_id = resource_id.to_string();
        tokio::task::block_in_place(move || {
            let conn = db
                .lock()
                .map_err(|_| StoreError::Storage("state store connection poisoned".into()))?;
            let mut stmt = conn
                .prepare(
                    "SELECT id, resource_id, agent_id, op, acquired_at, released_at, duration_ms, wait_time_ms, success, error_message, created_at
                     FROM lock_history WHERE resource_id = ?1 ORDER BY id ASC",
                )
                .map_err(|e| StoreError::Storage(e.to_string()))?;
            let rows = stmt
                .query_map(params![resource_id], row_to_history)
                .map_err(|e| StoreError::Storage(e.to_string()))?;
            rows.collect::<Result<Vec<_>, _>>()
                .map_err(|e| StoreError::Storage(e.to_string()))
        })
    }

    // ---- Resource locks ------------------------------------------------

    pub async fn get_lock(&self, resource_id: &str) -> Result<Option<LockRecord>, StoreError> {
        let db = self.db.clone();
        let resource_id = resource_id.to_string();
        tokio::task::block_in_place(move || {
            let conn = db
                .lock()
                .map_err(|_| StoreError::Storage("state store connection poisoned".into()))?;
            get_lock_row(&conn, &resource_id)
        })
    }

    pub async fn upsert_lock(&self, record: LockRecord) -> Result<(), StoreError> {
        let db = self.db.clone();
        tokio::task::block_in_place(move || {
            let conn = db
                .lock()
                .map_err(|_| StoreError::Storage("state store connection poisoned".into()))?;
            conn.execute(
                "INSERT INTO resource_locks (resource_id, agent_id, acquired_at, expires_at, lock_key, reason, metadata)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(resource_id) DO UPDATE SET
                    agent_id = excluded.agent_id,
                    acquired_at = excluded.acquired_at,
                    expires_at = excluded.expires_at,
                    lock_key = excluded.lock_key,
                    reason = excluded.reason,
                    metadata = excluded.metadata",
                params![
                    record.resource_id,
                    record.holder_agent_id,
                    record.acquired_at,
                    record.expires_at,
                    lock_key(&record.resource_id),
                    record.reason,
                    record.metadata.to_string(),
                ],
            )
            .map_err(|e| StoreError::Storage(e.to_string()))?;
            Ok(())
        })
    }

    pub async fn delete_lock(&self, resource_id: &str) -> Result<(), StoreError> {
        let db = self.db.clone();
        let resource_id = resource_id.to_string();
        tokio::task::block_in_place(move || {
            let conn = db
                .lock()
                .map_err(|_| StoreError::Storage("state store connection poisoned".into()))?;
            conn.execute(
                "DELETE FROM resource_locks WHERE resource_id = ?1",
                params![resource_id],
            )
            .map_err(|e| StoreError::Storage(e.to_string()))?;
            Ok(())
        })
    }

    pub async fn list_locks(&self) -> Result<Vec<LockRecord>, StoreError> {
        let db = self.db.clone();
        tokio::task::block_in_place(move || {
            let conn = db
                .lock()
                .map_err(|_| StoreError::Storage("state store connection poisoned".into()))?;
            let mut stmt = conn
                .prepare("SELECT resource_id, agent_id, acquired_at, expires_at, reason, metadata FROM resource_locks")
                .map_err(|e| StoreError::Storage(e.to_string()))?;
            let rows = stmt
                .query_map([], row_to_lock)
                .map_err(|e| StoreError::Storage(e.to_string()))?;
            rows.collect::<Result<Vec<_>, _>>()
                .map_err(|e| StoreError::Storage(e.to_string()))
        })
    }

    // ---- Wait queue ------------------------------------------------------

    pub async fn enqueue_wait(&self, entry: WaitQueueEntry) -> Result<i64, StoreError> {
        let db = self.db.clone();
        tokio::task::block_in_place(move || {
            let conn = db
                .lock()
                .map_err(|_| StoreError::Storage("state store connection poisoned".into()))?;
            conn.execute(
                "INSERT INTO lock_wait_queue (resource_id, agent_id, requested_at, timeout_at, priority, lease_ms, metadata)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    entry.resource_id,
                    entry.agent_id,
                    entry.requested_at,
                    entry.timeout_at,
                    entry.priority,
                    entry.lease_ms,
                    entry.metadata.to_string(),
                ],
            )
            .map_err(|e| StoreError::Storage(e.to_string()))?;
            Ok(conn.last_insert_rowid())
        })
    }

    /// Waiters for a resource, ordered priority DESC then requested_at ASC (§3).
    pub async fn list_waiters(&self, resource_id: &str) -> Result<Vec<WaitQueueEntry>, StoreError> {
        let db = self.db.clone();
        let resource_id = resource_id.to_string();
        tokio::task::block_in_place(move || {
            let conn = db
                .lock()
                .map_err(|_| StoreError::Storage("state store connection poisoned".into()))?;
            let mut stmt = conn
                .prepare(
                    "SELECT id, resource_id, agent_id, requested_at, timeout_at, priority, lease_ms, metadata
                     FROM lock_wait_queue WHERE resource_id = ?1
                     ORDER BY priority DESC, requested_at ASC",
                )
                .map_err(|e| StoreError::Storage(e.to_string()))?;
            let rows = stmt
                .query_map(params![resource_id], row_to_waiter)
                .map_err(|e| StoreError::Storage(e.to_string()))?;
            rows.collect::<Result<Vec<_>, _>>()
                .map_err(|e| StoreError::Storage(e.to_string()))
        })
    }

    pub async fn remove_waiter(&self, id: i64) -> Result<(), StoreError> {
        let db = self.db.clone();
        tokio::task::block_in_place(move || {
            let conn = db
                .lock()
                .map_err(|_| StoreError::Storage("state store connection poisoned".into()))?;
            conn.execute("DELETE FROM lock_wait_queue WHERE id = ?1", params![id])
                .map_err(|e| StoreError::Storage(e.to_string()))?;
            Ok(())
        })
    }

    // ---- Task -> issue mapping --------------------------------------------

    pub async fn put_mapping(&self, task_id: &str, issue_ref: &str) -> Result<(), StoreError> {
        let db = self.db.clone();
        let task_id = task_id.to_string();
        let issue_ref = issue_ref.to_string();
        tokio::task::block_in_place(move || {
            let conn = db
                .lock()
                .map_err(|_| StoreError::Storage("state store connection poisoned".into()))?;
            conn.execute(
                "INSERT INTO task_issue_mapping (task_id, issue_ref) VALUES (?1, ?2)
                 ON CONFLICT(task_id) DO UPDATE SET issue_ref = excluded.issue_ref",
                params![task_id, issue_ref],
            )
            .map_err(|e| StoreError::Storage(e.to_string()))?;
            Ok(())
        })
    }

    pub async fn get_mapping(&self, task_id: &str) -> Result<Option<String>, StoreError> {
        let db = self.db.clone();
        let task_id = task_id.to_string();
        tokio::task::block_in_place(move || {
            let conn = db
                .lock()
                .map_err(|_| StoreError::Storage("state store connection poisoned".into()))?;
            conn.query_row(
                "SELECT issue_ref FROM task_issue_mapping WHERE task_id = ?1",
                params![task_id],
                |row| row.get::<_, String>(0),
            )
            .optional()
            .map_err(|e| StoreError::Storage(e.to_string()))
        })
    }

    // ---- Approvals ---------------------------------------------------------

    pub async fn create_approval(
        &self,
        workflow_id: &str,
        step_id: &str,
        risk_assessment: serde_json::Value,
    ) -> Result<ApprovalRequest, StoreError> {
        let approval = ApprovalRequest {
            approval_id: uuid::Uuid::new_v4().to_string(),
            workflow_id: workflow_id.to_string(),
            step_id: step_id.to_string(),
            risk_assessment,
            decision: ApprovalDecision::Pending,
            decided_by: None,
            decided_at: None,
        };
        let db = self.db.clone();
        let a = approval.clone();
        tokio::task::block_in_place(move || {
            let conn = db
                .lock()
                .map_err(|_| StoreError::Storage("state store connection poisoned".into()))?;
            conn.execute(
                "INSERT INTO approval_request (id, workflow_id, step_id, risk, decision, decided_by, decided_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    a.approval_id,
                    a.workflow_id,
                    a.step_id,
                    a.risk_assessment.to_string(),
                    a.decision.as_str(),
                    a.decided_by,
                    a.decided_at,
                ],
            )
            .map_err(|e| StoreError::Storage(e.to_string()))?;
            Ok(())
        })?;
        Ok(approval)
    }

    pub async fn get_approval(&self, id: &str) -> Result<ApprovalRequest, StoreError> {
        let db = self.db.clone();
        let id = id.to_string();
        tokio::task::block_in_place(move || {
            let conn = db
                .lock()
                .map_err(|_| StoreError::Storage("state store connection poisoned".into()))?;
            row_to_approval(&conn, &id)
        })
    }

    /// Finds the approval request for a given `(workflow_id, step_id)` pair,
    /// used by the engine's `resume_workflow` to locate the pending approval
    /// for the one `hitl_approval` step currently `running` on a paused
    /// workflow, without the caller having to pass the approval id back in.
    pub async fn get_approval_by_workflow_step(
        &self,
        workflow_id: &str,
        step_id: &str,
    ) -> Result<Option<ApprovalRequest>, StoreError> {
        let db = self.db.clone();
        let workflow_id = workflow_id.to_string();
        let step_id = step_id.to_string();
        tokio::task::block_in_place(move || {
            let conn = db
                .lock()
                .map_err(|_| StoreError::Storage("state store connection poisoned".into()))?;
            let id: Option<String> = conn
                .query_row(
                    "SELECT id FROM approval_request WHERE workflow_id = ?1 AND step_id = ?2 ORDER BY rowid DESC LIMIT 1",
                    params![workflow_id, step_id],
                    |row| row.get::<_, String>(0),
                )
                .optional()
                .map_err(|e| StoreError::Storage(e.to_string()))?;
            match id {
                Some(id) => row_to_approval(&conn, &id).map(Some),
                None => Ok(None),
            }
        })
    }

    pub async fn decide_approval(
        &self,
        id: &str,
        decision: ApprovalDecision,
        decided_by: Option<String>,
    ) -> Result<ApprovalRequest, StoreError> {
        let db = self.db.clone();
        let id = id.to_string();
        tokio::task::block_in_place(move || {
            let conn = db
                .lock()
                .map_err(|_| StoreError::Storage("state store connection poisoned".into()))?;
            let mut approval = row_to_approval(&conn, &id)?;
            // Idempotent: a second identical decision is a no-op (resume_workflow idempotence, §8).
            if approval.decision == ApprovalDecision::Pending {
                approval.decision = decision;
                approval.decided_by = decided_by;
                approval.decided_at = Some(now_ms());
                conn.execute(
                    "UPDATE approval_request SET decision = ?1, decided_by = ?2, decided_at = ?3 WHERE id = ?4",
                    params![
                        approval.decision.as_str(),
                        approval.decided_by,
                        approval.decided_at,
                        id
                    ],
                )
                .map_err(|e| StoreError::Storage(e.to_string()))?;
            }
            Ok(approval)
        })
    }
}

fn lock_key(resource_id: &str) -> i64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    resource_id.hash(&mut hasher);
    hasher.finish() as i64
}

fn insert_workflow(conn: &Connection, w: &Workflow) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO workflow
         (id, template_name, status, current_step, context, outputs, step_statuses, version, started_at, updated_at, completed_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            w.workflow_id,
            w.template_name,
            w.status.as_str(),
            w.current_step,
            w.context.to_string(),
            serde_json::to_string(&w.outputs).unwrap_or_else(|_| "{}".into()),
            serde_json::to_string(&w.step_statuses).unwrap_or_else(|_| "{}".into()),
            w.version,
            w.started_at,
            w.updated_at,
            w.completed_at,
        ],
    )
    .map_err(|e| StoreError::Storage(e.to_string()))?;
    Ok(())
}

fn update_workflow_row(conn: &Connection, w: &Workflow, expected_version: i64) -> Result<(), StoreError> {
    let affected = conn
        .execute(
            "UPDATE workflow SET
                status = ?1, current_step = ?2, context = ?3, outputs = ?4, step_statuses = ?5,
                version = ?6, updated_at = ?7, completed_at = ?8
             WHERE id = ?9 AND version = ?10",
            params![
                w.status.as_str(),
                w.current_step,
                w.context.to_string(),
                serde_json::to_string(&w.outputs).unwrap_or_else(|_| "{}".into()),
                serde_json::to_string(&w.step_statuses).unwrap_or_else(|_| "{}".into()),
                w.version,
                w.updated_at,
                w.completed_at,
                w.workflow_id,
                expected_version,
            ],
        )
        .map_err(|e| StoreError::Storage(e.to_string()))?;
    if affected == 0 {
        // Someone else committed between our read and write.
        return Err(StoreError::VersionConflict {
            expected: expected_version,
            current: w.version,
        });
    }
    Ok(())
}

fn load_workflow_row(conn: &Connection, id: &str) -> Result<Workflow, StoreError> {
    conn.query_row(
        "SELECT id, template_name, status, current_step, context, outputs, step_statuses, version, started_at, updated_at, completed_at
         FROM workflow WHERE id = ?1",
        params![id],
        row_to_workflow,
    )
    .optional()
    .map_err(|e| StoreError::Storage(e.to_string()))?
    .ok_or_else(|| StoreError::NotFound(format!("workflow {id}")))
}

fn row_to_workflow(row: &rusqlite::Row<'_>) -> rusqlite::Result<Workflow> {
    let status_str: String = row.get(2)?;
    let context_str: String = row.get(4)?;
    let outputs_str: String = row.get(5)?;
    let step_statuses_str: String = row.get(6)?;
    Ok(Workflow {
        workflow_id: row.get(0)?,
        template_name: row.get(1)?,
        status: WorkflowStatus::from_str(&status_str).unwrap_or(WorkflowStatus::Failed),
        current_step: row.get(3)?,
        context: serde_json::from_str(&context_str).unwrap_or(serde_json::Value::Null),
        outputs: serde_json::from_str(&outputs_str).unwrap_or_default(),
        step_statuses: serde_json::from_str(&step_statuses_str).unwrap_or_default(),
        version: row.get(7)?,
        started_at: row.get(8)?,
        updated_at: row.get(9)?,
        completed_at: row.get(10)?,
    })
}

fn get_lock_row(conn: &Connection, resource_id: &str) -> Result<Option<LockRecord>, StoreError> {
    conn.query_row(
        "SELECT resource_id, agent_id, acquired_at, expires_at, reason, metadata FROM resource_locks WHERE resource_id = ?1",
        params![resource_id],
        row_to_lock,
    )
    .optional()
    .map_err(|e| StoreError::Storage(e.to_string()))
}

fn row_to_lock(row: &rusqlite::Row<'_>) -> rusqlite::Result<LockRecord> {
    let metadata_str: String = row.get(5)?;
    Ok(LockRecord {
        resource_id: row.get(0)?,
        holder_agent_id: row.get(1)?,
        acquired_at: row.get(2)?,
        expires_at: row.get(3)?,
        reason: row.get(4)?,
        metadata: serde_json::from_str(&metadata_str).unwrap_or(serde_json::Value::Null),
    })
}

fn row_to_waiter(row: &rusqlite::Row<'_>) -> rusqlite::Result<WaitQueueEntry> {
    let metadata_str: String = row.get(7)?;
    Ok(WaitQueueEntry {
        id: row.get(0)?,
        resource_id: row.get(1)?,
        agent_id: row.get(2)?,
        requested_at: row.get(3)?,
        timeout_at: row.get(4)?,
        priority: row.get(5)?,
        lease_ms: row.get(6)?,
        metadata: serde_json::from_str(&metadata_str).unwrap_or(serde_json::Value::Null),
    })
}

fn row_to_history(row: &rusqlite::Row<'_>) -> rusqlite::Result<LockHistoryRecord> {
    let op_str: String = row.get(3)?;
    let success: i64 = row.get(8)?;
    Ok(LockHistoryRecord {
        id: row.get(0)?,
        resource_id: row.get(1)?,
        agent_id: row.get(2)?,
        op: LockOp::from_str(&op_str).unwrap_or(LockOp::Acquire),
        acquired_at: row.get(4)?,
        released_at: row.get(5)?,
        duration_ms: row.get(6)?,
        wait_time_ms: row.get(7)?,
        success: success != 0,
        error_message: row.get(9)?,
        created_at: row.get(10)?,
    })
}

fn row_to_approval(conn: &Connection, id: &str) -> Result<ApprovalRequest, StoreError> {
    conn.query_row(
        "SELECT id, workflow_id, step_id, risk, decision, decided_by, decided_at FROM approval_request WHERE id = ?1",
        params![id],
        |row| {
            let risk_str: String = row.get(3)?;
            let decision_str: String = row.get(4)?;
            Ok(ApprovalRequest {
                approval_id: row.get(0)?,
                workflow_id: row.get(1)?,
                step_id: row.get(2)?,
                risk_assessment: serde_json::from_str(&risk_str).unwrap_or(serde_json::Value::Null),
                decision: ApprovalDecision::from_str(&decision_str).unwrap_or(ApprovalDecision::Pending),
                decided_by: row.get(5)?,
                decided_at: row.get(6)?,
            })
        },
    )
    .optional()
    .map_err(|e| StoreError::Storage(e.to_string()))?
    .ok_or_else(|| StoreError::NotFound(format!("approval {id}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::StepStatus;

    fn step_statuses(ids: &[&str]) -> HashMap<String, StepStatus> {
        ids.iter().map(|s| (s.to_string(), StepStatus::Pending)).collect()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn create_and_load_workflow_roundtrips() {
        let store = Store::open_in_memory().unwrap();
        let w = store
            .create_workflow("pr-deployment", serde_json::json!({"pr_number": 123}), step_statuses(&["a", "b"]))
            .await
            .unwrap();
        assert_eq!(w.version, 0);
        assert_eq!(w.status, WorkflowStatus::Running);

        let loaded = store.load_workflow(&w.workflow_id).await.unwrap();
        assert_eq!(loaded.workflow_id, w.workflow_id);
        assert_eq!(loaded.context["pr_number"], 123);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn empty_template_completes_immediately() {
        let store = Store::open_in_memory().unwrap();
        let w = store
            .create_workflow("noop", serde_json::json!({}), HashMap::new())
            .await
            .unwrap();
        assert_eq!(w.status, WorkflowStatus::Completed);
        assert!(w.completed_at.is_some());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn update_workflow_detects_version_conflict() {
        let store = Store::open_in_memory().unwrap();
        let w = store
            .create_workflow("t", serde_json::json!({}), step_statuses(&["a"]))
            .await
            .unwrap();

        let err = store
            .update_workflow(&w.workflow_id, w.version + 1, |_| {})
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::VersionConflict { .. }));

        let updated = store
            .update_workflow(&w.workflow_id, w.version, |wf| {
                wf.status = WorkflowStatus::Completed;
            })
            .await
            .unwrap();
        assert_eq!(updated.version, w.version + 1);
        assert_eq!(updated.status, WorkflowStatus::Completed);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn lock_upsert_and_delete() {
        let store = Store::open_in_memory().unwrap();
        store
            .upsert_lock(LockRecord {
                resource_id: "infrastructure:production".into(),
                holder_agent_id: "agent-a".into(),
                acquired_at: now_ms(),
                expires_at: now_ms() + 60_000,
                reason: None,
                metadata: serde_json::json!({}),
            })
            .await
            .unwrap();
        assert!(store.get_lock("infrastructure:production").await.unwrap().is_some());
        store.delete_lock("infrastructure:production").await.unwrap();
        assert!(store.get_lock("infrastructure:production").await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn wait_queue_orders_by_priority_then_fifo() {
        let store = Store::open_in_memory().unwrap();
        let base = now_ms();
        store
            .enqueue_wait(WaitQueueEntry {
                id: 0,
                resource_id: "r".into(),
                agent_id: "low".into(),
                requested_at: base,
                timeout_at: base + 1000,
                priority: 0,
                lease_ms: 60_000,
                metadata: serde_json::json!({}),
            })
            .await
            .unwrap();
        store
            .enqueue_wait(WaitQueueEntry {
                id: 0,
                resource_id: "r".into(),
                agent_id: "high".into(),
                requested_at: base + 10,
                timeout_at: base + 1000,
                priority: 5,
                lease_ms: 60_000,
                metadata: serde_json::json!({}),
            })
            .await
            .unwrap();
        let waiters = store.list_waiters("r").await.unwrap();
        assert_eq!(waiters[0].agent_id, "high");
        assert_eq!(waiters[1].agent_id, "low");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn approval_decide_is_idempotent() {
        let store = Store::open_in_memory().unwrap();
        let a = store
            .create_approval("wf-1", "approval_gate", serde_json::json!({"risk": "medium"}))
            .await
            .unwrap();
        let first = store
            .decide_approval(&a.approval_id, ApprovalDecision::Approved, Some("alice".into()))
            .await
            .unwrap();
        let second = store
            .decide_approval(&a.approval_id, ApprovalDecision::Rejected, Some("bob".into()))
            .await
            .unwrap();
        assert_eq!(first.decision, ApprovalDecision::Approved);
        // Second decision is a no-op: the decision made first sticks.
        assert_eq!(second.decision, ApprovalDecision::Approved);
        assert_eq!(second.decided_by.as_deref(), Some("alice"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn task_issue_mapping_roundtrips() {
        let store = Store::open_in_memory().unwrap();
        store.put_mapping("task-1", "PROJ-42").await.unwrap();
        assert_eq!(store.get_mapping("task-1").await.unwrap(), Some("PROJ-42".into()));
        assert_eq!(store.get_mapping("task-missing").await.unwrap(), None);
    }
}
