//! Agent Registry (C3): agent profiles, capabilities, heartbeat liveness,
//! lookup by capability (§4.3).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::OrchestratorError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Registering,
    Healthy,
    Unhealthy,
    Gone,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Capability {
    pub name: String,
    pub description: String,
    pub parameters_schema: serde_json::Value,
    pub tags: Vec<String>,
    pub cost_estimate: Option<f64>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AgentProfile {
    pub id: String,
    pub base_url: String,
    pub port: u16,
    pub capabilities: Vec<Capability>,
    pub status: AgentStatus,
    pub last_heartbeat_at: i64,
    pub registered_at: i64,
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Grace periods for the health state machine (§4.3).
#[derive(Clone, Copy, Debug)]
pub struct HealthGraces {
    pub heartbeat_grace: Duration,
    pub gone_grace: Duration,
}

impl Default for HealthGraces {
    fn default() -> Self {
        Self {
            heartbeat_grace: Duration::from_secs(30),
            gone_grace: Duration::from_secs(120),
        }
    }
}

/// Pure function: health state is derived from `now - last_heartbeat_at`
/// alone (§4.3), never from an explicit transition call other than
/// `heartbeat()` resetting the clock.
pub fn health_for_age(age: Duration, graces: HealthGraces) -> AgentStatus {
    if age > graces.gone_grace {
        AgentStatus::Gone
    } else if age > graces.heartbeat_grace {
        AgentStatus::Unhealthy
    } else {
        AgentStatus::Healthy
    }
}

/// In-process agent registry. One profile per `id`; registrations from the
/// same `id` resolve last-writer-wins on `registered_at`.
pub struct AgentRegistry {
    profiles: RwLock<HashMap<String, AgentProfile>>,
    graces: HealthGraces,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::with_graces(HealthGraces::default())
    }

    pub fn with_graces(graces: HealthGraces) -> Self {
        Self {
            profiles: RwLock::new(HashMap::new()),
            graces,
        }
    }

    /// Upserts a profile by `id`. A concurrent re-registration with an
    /// older `registered_at` loses (§4.3).
    pub async fn register(&self, mut profile: AgentProfile) -> Result<(), OrchestratorError> {
        if profile.id.is_empty() {
            return Err(OrchestratorError::Validation("agent id must not be empty".into()));
        }
        let now = now_ms();
        profile.last_heartbeat_at = now;
        if profile.registered_at == 0 {
            profile.registered_at = now;
        }
        profile.status = AgentStatus::Healthy;

        let mut profiles = self.profiles.write().await;
        match profiles.get(&profile.id) {
            Some(existing) if existing.registered_at > profile.registered_at => {
                // A newer registration already won; ignore this stale one.
            }
            _ => {
                profiles.insert(profile.id.clone(), profile);
            }
        }
        Ok(())
    }

    pub async fn deregister(&self, id: &str) {
        self.profiles.write().await.remove(id);
    }

    pub async fn heartbeat(&self, id: &str) -> Result<(), OrchestratorError> {
        let mut profiles = self.profiles.write().await;
        let profile = profiles
            .get_mut(id)
            .ok_or_else(|| OrchestratorError::NotFound(format!("agent {id}")))?;
        profile.last_heartbeat_at = now_ms();
        profile.status = AgentStatus::Healthy;
        Ok(())
    }

    pub async fn list(&self) -> Vec<AgentProfile> {
        self.evaluate_health().await;
        self.profiles.read().await.values().cloned().collect()
    }

    /// Applies the pure health transition to every profile based on the
    /// current time; called before any read that exposes status.
    async fn evaluate_health(&self) {
        let now = now_ms();
        let mut profiles = self.profiles.write().await;
        for profile in profiles.values_mut() {
            let age = Duration::from_millis((now - profile.last_heartbeat_at).max(0) as u64);
            profile.status = health_for_age(age, self.graces);
        }
    }

    /// Returns only `healthy` profiles matching `name`, or — if `name` is
    /// `None` — matching every tag in `tags`, sorted by freshness of
    /// heartbeat (most recent first).
    pub async fn find_by_capability(
        &self,
        name: Option<&str>,
        tags: &[String],
    ) -> Vec<AgentProfile> {
        self.evaluate_health().await;
        let profiles = self.profiles.read().await;
        let mut matches: Vec<AgentProfile> = profiles
            .values()
            .filter(|p| p.status == AgentStatus::Healthy)
            .filter(|p| {
                p.capabilities.iter().any(|c| match name {
                    Some(n) => c.name == n,
                    None => tags.iter().all(|t| c.tags.contains(t)),
                })
            })
            .cloned()
            .collect();
        matches.sort_by(|a, b| b.last_heartbeat_at.cmp(&a.last_heartbeat_at));
        matches
    }

    /// Returns `Ok(())` for a healthy-or-unhealthy dispatch target
    /// (best-effort), `Err(agent_unreachable)` for `gone` or missing (§4.3).
    pub async fn assert_dispatchable(&self, id: &str) -> Result<(), OrchestratorError> {
        self.evaluate_health().await;
        let profiles = self.profiles.read().await;
        match profiles.get(id) {
            Some(p) if p.status != AgentStatus::Gone => Ok(()),
            _ => Err(OrchestratorError::AgentUnreachable(id.to_string())),
        }
    }

    pub async fn get(&self, id: &str) -> Option<AgentProfile> {
        self.evaluate_health().await;
        self.profiles.read().await.get(id).cloned()
    }
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

pub type SharedRegistry = Arc<AgentRegistry>;
