//! Resource Lock Manager (C2): distributed advisory locks over
//! `state-store`, with a wait queue and periodic expiry sweeps (§4.2).

use std::time::Duration;

use state_store::{LockOp, LockRecord, NewLockHistoryRecord, Store, StoreError, WaitQueueEntry};

use crate::error::OrchestratorError;
use crate::metrics::METRICS;

fn now_ms() -> i64 {
    state_store::now_ms()
}

pub struct AcquireOutcome {
    pub acquired: bool,
    pub wait_ms: i64,
}

pub struct LockStatus {
    pub locked: bool,
    pub holder: Option<String>,
    pub expires_at: Option<i64>,
    pub seconds_remaining: i64,
    pub waiters: usize,
}

/// Classifies `resource_id` into the `resource_type` label used by metrics
/// (the portion before the first `:`, or the whole id if there is none).
fn resource_type(resource_id: &str) -> &str {
    resource_id.split(':').next().unwrap_or(resource_id)
}

pub struct LockManager {
    store: Store,
}

impl LockManager {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Non-blocking acquire. Returns `Contended` immediately if the lock is
    /// held by a live holder other than `agent_id` (§4.2).
    pub async fn acquire(
        &self,
        resource_id: &str,
        agent_id: &str,
        lease: Duration,
        reason: Option<String>,
        metadata: serde_json::Value,
    ) -> Result<AcquireOutcome, OrchestratorError> {
        if lease.is_zero() {
            return Err(OrchestratorError::Validation(format!(
                "lease for {resource_id} must be greater than zero"
            )));
        }
        self.sweep_expired(resource_id).await?;
        let rtype = resource_type(resource_id).to_string();
        let now = now_ms();

        match self.store.get_lock(resource_id).await? {
            Some(existing) if existing.holder_agent_id != agent_id && existing.expires_at > now => {
                self.store
                    .append_history(NewLockHistoryRecord {
                        resource_id: resource_id.to_string(),
                        agent_id: agent_id.to_string(),
                        op: LockOp::Acquire,
                        acquired_at: None,
                        released_at: None,
                        duration_ms: None,
                        wait_time_ms: None,
                        success: false,
                        error_message: Some(format!("held by {}", existing.holder_agent_id)),
                    })
                    .await?;
                METRICS
                    .resource_lock_contentions_total
                    .with_label_values(&[&rtype, agent_id])
                    .inc();
                Err(OrchestratorError::Contended {
                    held_by: existing.holder_agent_id,
                })
            }
            existing => {
                // Absent, expired, or a re-acquire by the current holder
                // (idempotent extend per §4.2).
                let is_new_active = existing.as_ref().map_or(true, |e| e.expires_at <= now);
                let acquired_at = existing.map(|e| e.acquired_at).unwrap_or(now);
                self.store
                    .upsert_lock(LockRecord {
                        resource_id: resource_id.to_string(),
                        holder_agent_id: agent_id.to_string(),
                        acquired_at,
                        expires_at: now + lease.as_millis() as i64,
                        reason,
                        metadata,
                    })
                    .await?;
                self.store
                    .append_history(NewLockHistoryRecord {
                        resource_id: resource_id.to_string(),
                        agent_id: agent_id.to_string(),
                        op: LockOp::Acquire,
                        acquired_at: Some(now),
                        released_at: None,
                        duration_ms: None,
                        wait_time_ms: Some(0),
                        success: true,
                        error_message: None,
                    })
                    .await?;
                METRICS
                    .resource_lock_acquisitions_total
                    .with_label_values(&[&rtype, agent_id])
                    .inc();
                if is_new_active {
                    METRICS.resource_locks_active.with_label_values(&[&rtype]).inc();
                }
                Ok(AcquireOutcome {
                    acquired: true,
                    wait_ms: 0,
                })
            }
        }
    }

    /// Enqueues on contention and polls until granted or `wait_timeout`
    /// elapses (§4.2). Poll interval is fixed and short since this is an
    /// in-process implementation, not a broker subscription.
    pub async fn acquire_with_wait(
        &self,
        resource_id: &str,
        agent_id: &str,
        lease: Duration,
        wait_timeout: Duration,
        priority: i64,
    ) -> Result<AcquireOutcome, OrchestratorError> {
        let started = now_ms();
        match self
            .acquire(resource_id, agent_id, lease, None, serde_json::json!({}))
            .await
        {
            Ok(outcome) => return Ok(outcome),
            Err(OrchestratorError::Contended { .. }) => {}
            Err(other) => return Err(other),
        }

        let timeout_at = started + wait_timeout.as_millis() as i64;
        let waiter_id = self
            .store
            .enqueue_wait(WaitQueueEntry {
                id: 0,
                resource_id: resource_id.to_string(),
                agent_id: agent_id.to_string(),
                requested_at: started,
                timeout_at,
                priority,
                lease_ms: lease.as_millis() as i64,
                metadata: serde_json::json!({}),
            })
            .await?;

        let poll_interval = Duration::from_millis(25);
        loop {
            if now_ms() >= timeout_at {
                self.store.remove_waiter(waiter_id).await?;
                return Err(OrchestratorError::WaitTimeout {
                    resource_id: resource_id.to_string(),
                });
            }
            tokio::time::sleep(poll_interval).await;
            self.sweep_expired(resource_id).await?;

            match self
                .acquire(resource_id, agent_id, lease, None, serde_json::json!({}))
                .await
            {
                Ok(mut outcome) => {
                    self.store.remove_waiter(waiter_id).await?;
                    outcome.wait_ms = now_ms() - started;
                    let rtype = resource_type(resource_id).to_string();
                    METRICS
                        .resource_lock_wait_time_seconds
                        .with_label_values(&[&rtype, agent_id])
                        .observe(outcome.wait_ms as f64 / 1000.0);
                    return Ok(outcome);
                }
                Err(OrchestratorError::Contended { .. }) => continue,
                Err(other) => return Err(other),
            }
        }
    }

    /// Idempotent release. Succeeds silently if the lock already expired or
    /// is already gone; fails `not_holder` only against a live holder that
    /// isn't `agent_id` (§4.2).
    pub async fn release(&self, resource_id: &str, agent_id: &str) -> Result<(), OrchestratorError> {
        let now = now_ms();
        match self.store.get_lock(resource_id).await? {
            None => Ok(()),
            Some(lock) if lock.expires_at <= now => {
                self.store.delete_lock(resource_id).await?;
                Ok(())
            }
            Some(lock) if lock.holder_agent_id == agent_id => {
                let duration_ms = now - lock.acquired_at;
                self.store.delete_lock(resource_id).await?;
                self.store
                    .append_history(NewLockHistoryRecord {
                        resource_id: resource_id.to_string(),
                        agent_id: agent_id.to_string(),
                        op: LockOp::Release,
                        acquired_at: Some(lock.acquired_at),
                        released_at: Some(now),
                        duration_ms: Some(duration_ms),
                        wait_time_ms: None,
                        success: true,
                        error_message: None,
                    })
                    .await?;
                let rtype = resource_type(resource_id).to_string();
                METRICS.resource_locks_active.with_label_values(&[&rtype]).dec();
                self.sweep_expired(resource_id).await?;
                Ok(())
            }
            Some(lock) => Err(OrchestratorError::NotHolder(format!(
                "{resource_id} is held by {}",
                lock.holder_agent_id
            ))),
        }
    }

    pub async fn force_release(&self, resource_id: &str, admin_id: &str) -> Result<(), OrchestratorError> {
        if let Some(lock) = self.store.get_lock(resource_id).await? {
            let now = now_ms();
            self.store.delete_lock(resource_id).await?;
            self.store
                .append_history(NewLockHistoryRecord {
                    resource_id: resource_id.to_string(),
                    agent_id: admin_id.to_string(),
                    op: LockOp::ForceRelease,
                    acquired_at: Some(lock.acquired_at),
                    released_at: Some(now),
                    duration_ms: Some(now - lock.acquired_at),
                    wait_time_ms: None,
                    success: true,
                    error_message: None,
                })
                .await?;
            let rtype = resource_type(resource_id).to_string();
            METRICS.resource_locks_active.with_label_values(&[&rtype]).dec();
        }
        self.sweep_expired(resource_id).await?;
        Ok(())
    }

    pub async fn check(&self, resource_id: &str) -> Result<LockStatus, OrchestratorError> {
        let now = now_ms();
        let lock = self.store.get_lock(resource_id).await?;
        let waiters = self.store.list_waiters(resource_id).await?.len();
        match lock {
            Some(l) if l.expires_at > now => Ok(LockStatus {
                locked: true,
                holder: Some(l.holder_agent_id),
                expires_at: Some(l.expires_at),
                seconds_remaining: (l.expires_at - now) / 1000,
                waiters,
            }),
            _ => Ok(LockStatus {
                locked: false,
                holder: None,
                expires_at: None,
                seconds_remaining: 0,
                waiters,
            }),
        }
    }

    /// Transitions an expired lock to released and grants it straight to
    /// the highest-priority live waiter (§4.2, S4): `list_waiters` already
    /// returns waiters ordered `priority DESC, requested_at ASC`, so the
    /// first entry still inside its own `timeout_at` is the one promoted.
    /// Promotion writes the lock record directly rather than just clearing
    /// the way for the waiter's own poll to win the race, since a lower-
    /// priority waiter polling `acquire` first would otherwise beat it.
    pub async fn sweep_expired(&self, resource_id: &str) -> Result<(), StoreError> {
        let now = now_ms();
        let rtype = resource_type(resource_id).to_string();
        let mut freed = false;

        if let Some(lock) = self.store.get_lock(resource_id).await? {
            if lock.expires_at <= now {
                self.store.delete_lock(resource_id).await?;
                self.store
                    .append_history(NewLockHistoryRecord {
                        resource_id: resource_id.to_string(),
                        agent_id: lock.holder_agent_id.clone(),
                        op: LockOp::Timeout,
                        acquired_at: Some(lock.acquired_at),
                        released_at: Some(now),
                        duration_ms: Some(now - lock.acquired_at),
                        wait_time_ms: None,
                        success: true,
                        error_message: None,
                    })
                    .await?;
                METRICS.resource_locks_active.with_label_values(&[&rtype]).dec();
                freed = true;
            }
        } else {
            freed = true;
        }

        let waiters = self.store.list_waiters(resource_id).await?;
        let mut promoted = false;
        for waiter in waiters {
            if waiter.timeout_at <= now {
                self.store.remove_waiter(waiter.id).await?;
                continue;
            }
            if freed && !promoted {
                self.store.remove_waiter(waiter.id).await?;
                self.store
                    .upsert_lock(LockRecord {
                        resource_id: resource_id.to_string(),
                        holder_agent_id: waiter.agent_id.clone(),
                        acquired_at: now,
                        expires_at: now + waiter.lease_ms,
                        reason: None,
                        metadata: waiter.metadata.clone(),
                    })
                    .await?;
                self.store
                    .append_history(NewLockHistoryRecord {
                        resource_id: resource_id.to_string(),
                        agent_id: waiter.agent_id.clone(),
                        op: LockOp::Acquire,
                        acquired_at: Some(now),
                        released_at: None,
                        duration_ms: None,
                        wait_time_ms: Some(now - waiter.requested_at),
                        success: true,
                        error_message: None,
                    })
                    .await?;
                METRICS
                    .resource_lock_acquisitions_total
                    .with_label_values(&[&rtype, &waiter.agent_id])
                    .inc();
                METRICS.resource_locks_active.with_label_values(&[&rtype]).inc();
                promoted = true;
            }
        }
        Ok(())
    }

    /// Sweeps every resource currently holding a lock. Driven by a periodic
    /// background task rather than only on-demand, so an expired lease is
    /// reclaimed even if nothing contends for it again (§4.2).
    pub async fn sweep_all(&self) -> Result<(), StoreError> {
        for lock in self.store.list_locks().await? {
            self.sweep_expired(&lock.resource_id).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn manager() -> LockManager {
        LockManager::new(Store::open_in_memory().unwrap())
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn acquire_then_contend_then_release() {
        let mgr = manager().await;
        let r = "infrastructure:production";
        let outcome = mgr
            .acquire(r, "agent-a", Duration::from_secs(60), None, serde_json::json!({}))
            .await
            .unwrap();
        assert!(outcome.acquired);

        let err = mgr
            .acquire(r, "agent-b", Duration::from_secs(60), None, serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::Contended { .. }));

        mgr.release(r, "agent-a").await.unwrap();
        let status = mgr.check(r).await.unwrap();
        assert!(!status.locked);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn acquire_rejects_zero_lease() {
        let mgr = manager().await;
        let err = mgr
            .acquire("repo:acme/app", "agent-a", Duration::ZERO, None, serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::Validation(_)));
        assert!(!mgr.check("repo:acme/app").await.unwrap().locked);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn sweep_promotes_highest_priority_waiter_on_expiry() {
        let mgr = manager().await;
        let r = "infrastructure:production";
        mgr.acquire(r, "agent-a", Duration::from_millis(10), None, serde_json::json!({}))
            .await
            .unwrap();

        mgr.store
            .enqueue_wait(WaitQueueEntry {
                id: 0,
                resource_id: r.to_string(),
                agent_id: "agent-low".to_string(),
                requested_at: now_ms(),
                timeout_at: now_ms() + 60_000,
                priority: 0,
                lease_ms: 60_000,
                metadata: serde_json::json!({}),
            })
            .await
            .unwrap();
        mgr.store
            .enqueue_wait(WaitQueueEntry {
                id: 0,
                resource_id: r.to_string(),
                agent_id: "agent-high".to_string(),
                requested_at: now_ms() + 5,
                timeout_at: now_ms() + 60_000,
                priority: 10,
                lease_ms: 60_000,
                metadata: serde_json::json!({}),
            })
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        mgr.sweep_expired(r).await.unwrap();

        let status = mgr.check(r).await.unwrap();
        assert!(status.locked);
        assert_eq!(status.holder.as_deref(), Some("agent-high"));
        assert_eq!(status.waiters, 1);

        let history = mgr.store.list_history(r).await.unwrap();
        let ops: Vec<_> = history.iter().map(|h| (h.op, h.agent_id.as_str(), h.success)).collect();
        assert!(ops.contains(&(LockOp::Acquire, "agent-a", true)));
        assert!(ops.contains(&(LockOp::Timeout, "agent-a", true)));
        assert!(ops.contains(&(LockOp::Acquire, "agent-high", true)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn release_by_non_holder_fails_not_holder() {
        let mgr = manager().await;
        let r = "repo:acme/app";
        mgr.acquire(r, "agent-a", Duration::from_secs(60), None, serde_json::json!({}))
            .await
            .unwrap();
        let err = mgr.release(r, "agent-b").await.unwrap_err();
        assert!(matches!(err, OrchestratorError::NotHolder(_)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn reacquire_by_same_holder_is_idempotent() {
        let mgr = manager().await;
        let r = "repo:acme/app";
        mgr.acquire(r, "agent-a", Duration::from_secs(1), None, serde_json::json!({}))
            .await
            .unwrap();
        let outcome = mgr
            .acquire(r, "agent-a", Duration::from_secs(60), None, serde_json::json!({}))
            .await
            .unwrap();
        assert!(outcome.acquired);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn acquire_with_wait_succeeds_once_lock_expires() {
        let mgr = manager().await;
        let r = "repo:acme/app";
        mgr.acquire(r, "agent-a", Duration::from_millis(30), None, serde_json::json!({}))
            .await
            .unwrap();

        let outcome = mgr
            .acquire_with_wait(
                r,
                "agent-b",
                Duration::from_secs(60),
                Duration::from_secs(2),
                0,
            )
            .await
            .unwrap();
        assert!(outcome.acquired);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn acquire_with_wait_times_out() {
        let mgr = manager().await;
        let r = "repo:acme/app";
        mgr.acquire(r, "agent-a", Duration::from_secs(60), None, serde_json::json!({}))
            .await
            .unwrap();

        let err = mgr
            .acquire_with_wait(
                r,
                "agent-b",
                Duration::from_secs(60),
                Duration::from_millis(60),
                0,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::WaitTimeout { .. }));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn force_release_bypasses_ownership() {
        let mgr = manager().await;
        let r = "repo:acme/app";
        mgr.acquire(r, "agent-a", Duration::from_secs(60), None, serde_json::json!({}))
            .await
            .unwrap();
        mgr.force_release(r, "admin").await.unwrap();
        assert!(!mgr.check(r).await.unwrap().locked);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn sweep_all_reclaims_every_expired_resource() {
        let mgr = manager().await;
        mgr.acquire(
            "repo:a",
            "agent-a",
            Duration::from_millis(10),
            None,
            serde_json::json!({}),
        )
        .await
        .unwrap();
        mgr.acquire(
            "repo:b",
            "agent-b",
            Duration::from_millis(10),
            None,
            serde_json::json!({}),
        )
        .await
        .unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        mgr.sweep_all().await.unwrap();

        assert!(!mgr.check("repo:a").await.unwrap().locked);
        assert!(!mgr.check("repo:b").await.unwrap().locked);
    }
}
