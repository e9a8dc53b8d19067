//! Event Bus (C4): fan-out pub/sub of typed events, plus request/response
//! RPC with correlation IDs and timeouts (§4.4). Default in-process
//! implementation, used when `EVENT_BUS_URL` is unset (§6).

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, oneshot, Mutex};

use crate::error::OrchestratorError;
use crate::metrics::METRICS;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub event_type: String,
    pub source_agent: String,
    pub target_agent: Option<String>,
    pub correlation_id: Option<String>,
    pub payload: serde_json::Value,
    pub emitted_at: i64,
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

type Subscriber = Arc<dyn Fn(Event) -> Result<(), String> + Send + Sync>;

/// In-process event bus on a single transport: a broadcast channel for
/// fan-out, plus a correlation-keyed oneshot map for request/response.
pub struct EventBus {
    sender: broadcast::Sender<Event>,
    subscribers: Mutex<Vec<(String, String, Subscriber)>>,
    pending: DashMap<String, oneshot::Sender<Event>>,
    next_correlation: AtomicI64,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(1024);
        Self {
            sender,
            subscribers: Mutex::new(Vec::new()),
            pending: DashMap::new(),
            next_correlation: AtomicI64::new(1),
        }
    }

    /// Registers a callback invoked on every event whose `event_type`
    /// matches `topic`. Returns an opaque callback name used in the
    /// `event_bus_subscriber_errors_total` metric's `callback_name` label.
    pub async fn subscribe<F>(&self, topic: &str, callback_name: &str, callback: F)
    where
        F: Fn(Event) -> Result<(), String> + Send + Sync + 'static,
    {
        let mut subs = self.subscribers.lock().await;
        subs.push((topic.to_string(), callback_name.to_string(), Arc::new(callback)));
    }

    /// Fan-out emit. Per-subscriber ordering within one `source_agent` is
    /// preserved because delivery happens synchronously under the
    /// subscriber-list snapshot taken here (§5 "emission uses a snapshot
    /// of subscribers taken under the mutex and releases it before
    /// invoking callbacks").
    pub async fn emit(&self, event: Event) {
        METRICS
            .event_bus_events_emitted_total
            .with_label_values(&[&event.event_type, &event.source_agent])
            .inc();

        // If this is a response to an outstanding request, resolve it first.
        if let Some(correlation_id) = &event.correlation_id {
            if let Some((_, tx)) = self.pending.remove(correlation_id) {
                let _ = tx.send(event.clone());
            }
        }

        let _ = self.sender.send(event.clone());

        let snapshot = {
            let subs = self.subscribers.lock().await;
            subs.iter()
                .filter(|(topic, _, _)| topic == &event.event_type || topic == "*")
                .cloned()
                .collect::<Vec<_>>()
        };
        for (topic, callback_name, callback) in snapshot {
            if let Err(err) = callback(event.clone()) {
                tracing::warn!(topic, callback_name, error = %err, "event bus subscriber error");
                METRICS
                    .event_bus_subscriber_errors_total
                    .with_label_values(&[&event.event_type, &callback_name])
                    .inc();
            } else {
                METRICS
                    .event_bus_events_delivered_total
                    .with_label_values(&[&event.event_type])
                    .inc();
            }
        }
    }

    /// Subscribes to the raw broadcast stream (used by SSE handlers to
    /// relay events to an HTTP client without registering a named callback).
    pub fn subscribe_raw(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    fn new_correlation_id(&self) -> String {
        let n = self.next_correlation.fetch_add(1, Ordering::SeqCst);
        format!("corr-{n}-{}", now_ms())
    }

    /// Request/response: emits a request event tagged with `target_agent`
    /// and awaits a response with the same `correlation_id`, failing
    /// `timeout` after `timeout`.
    pub async fn request(
        &self,
        source_agent: &str,
        target_agent: &str,
        request_type: &str,
        payload: serde_json::Value,
        timeout: Duration,
    ) -> Result<Event, OrchestratorError> {
        let correlation_id = self.new_correlation_id();
        let (tx, rx) = oneshot::channel();
        self.pending.insert(correlation_id.clone(), tx);

        METRICS
            .agent_requests_active
            .with_label_values(&[source_agent, target_agent])
            .inc();
        let timer = std::time::Instant::now();

        self.emit(Event {
            event_type: request_type.to_string(),
            source_agent: source_agent.to_string(),
            target_agent: Some(target_agent.to_string()),
            correlation_id: Some(correlation_id.clone()),
            payload,
            emitted_at: now_ms(),
        })
        .await;

        let result = tokio::time::timeout(timeout, rx).await;

        METRICS
            .agent_requests_active
            .with_label_values(&[source_agent, target_agent])
            .dec();
        METRICS
            .agent_request_latency_seconds
            .with_label_values(&[source_agent, target_agent, request_type])
            .observe(timer.elapsed().as_secs_f64());

        match result {
            Ok(Ok(event)) => Ok(event),
            Ok(Err(_)) => Err(OrchestratorError::Timeout(format!(
                "response channel for {correlation_id} dropped"
            ))),
            Err(_) => {
                self.pending.remove(&correlation_id);
                METRICS
                    .agent_request_timeouts_total
                    .with_label_values(&[source_agent, target_agent])
                    .inc();
                Err(OrchestratorError::Timeout(format!(
                    "request {correlation_id} to {target_agent} timed out"
                )))
            }
        }
    }

    /// Emits a response event tagged with `correlation_id`, completing the
    /// matching outstanding `request()` call (§4.4 "the receiving side...
    /// emits a response event tagged with the correlation id").
    pub async fn respond(&self, source_agent: &str, correlation_id: &str, payload: serde_json::Value) {
        self.emit(Event {
            event_type: format!("{correlation_id}.response"),
            source_agent: source_agent.to_string(),
            target_agent: None,
            correlation_id: Some(correlation_id.to_string()),
            payload,
            emitted_at: now_ms(),
        })
        .await;
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

pub type SharedBus = Arc<EventBus>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn subscribe_then_emit_invokes_callback() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = count.clone();
        bus.subscribe("workflow.started", "test-cb", move |_event| {
            count2.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .await;

        bus.emit(Event {
            event_type: "workflow.started".into(),
            source_agent: "orchestrator".into(),
            target_agent: None,
            correlation_id: None,
            payload: serde_json::json!({}),
            emitted_at: now_ms(),
        })
        .await;

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn subscriber_error_does_not_stop_other_subscribers() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = count.clone();
        bus.subscribe("t", "failing", |_| Err("boom".into())).await;
        bus.subscribe("t", "ok", move |_| {
            count2.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .await;

        bus.emit(Event {
            event_type: "t".into(),
            source_agent: "a".into(),
            target_agent: None,
            correlation_id: None,
            payload: serde_json::json!({}),
            emitted_at: now_ms(),
        })
        .await;

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn request_response_roundtrip_matches_correlation_id() {
        let bus = Arc::new(EventBus::new());
        let responder = bus.clone();
        bus.subscribe("ping", "responder", move |event| {
            let responder = responder.clone();
            let correlation = event.correlation_id.clone().unwrap();
            tokio::spawn(async move {
                responder.respond("callee", &correlation, serde_json::json!({"pong": true})).await;
            });
            Ok(())
        })
        .await;

        let response = bus
            .request("caller", "callee", "ping", serde_json::json!({}), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(response.correlation_id, response.correlation_id);
        assert_eq!(response.payload["pong"], true);
    }

    #[tokio::test]
    async fn request_times_out_when_no_response() {
        let bus = EventBus::new();
        let err = bus
            .request("caller", "callee", "ping", serde_json::json!({}), Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::Timeout(_)));
    }
}
