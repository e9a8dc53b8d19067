//! Prometheus metrics registry: exactly the metric names/labels in §6, so
//! `GET /metrics` output is directly assertable by conformance tests.

use once_cell::sync::Lazy;
use prometheus::{
    CounterVec, GaugeVec, HistogramVec, Registry, TextEncoder,
};

pub struct Metrics {
    pub registry: Registry,

    pub event_bus_events_emitted_total: CounterVec,
    pub event_bus_events_delivered_total: CounterVec,
    pub event_bus_subscriber_errors_total: CounterVec,

    pub agent_request_latency_seconds: HistogramVec,
    pub agent_requests_active: GaugeVec,
    pub agent_request_timeouts_total: CounterVec,

    pub resource_lock_acquisitions_total: CounterVec,
    pub resource_lock_wait_time_seconds: HistogramVec,
    pub resource_locks_active: GaugeVec,
    pub resource_lock_contentions_total: CounterVec,
}

impl Metrics {
    fn new() -> Self {
        let registry = Registry::new();

        let event_bus_events_emitted_total = CounterVec::new(
            prometheus::Opts::new("event_bus_events_emitted_total", "events emitted on the bus"),
            &["event_type", "source"],
        )
        .unwrap();
        registry
            .register(Box::new(event_bus_events_emitted_total.clone()))
            .unwrap();

        let event_bus_events_delivered_total = CounterVec::new(
            prometheus::Opts::new(
                "event_bus_events_delivered_total",
                "events delivered to subscribers",
            ),
            &["event_type"],
        )
        .unwrap();
        registry
            .register(Box::new(event_bus_events_delivered_total.clone()))
            .unwrap();

        let event_bus_subscriber_errors_total = CounterVec::new(
            prometheus::Opts::new(
                "event_bus_subscriber_errors_total",
                "subscriber callback errors",
            ),
            &["event_type", "callback_name"],
        )
        .unwrap();
        registry
            .register(Box::new(event_bus_subscriber_errors_total.clone()))
            .unwrap();

        let agent_request_latency_seconds = HistogramVec::new(
            prometheus::HistogramOpts::new(
                "agent_request_latency_seconds",
                "latency of agent request/response RPCs",
            ),
            &["source_agent", "target_agent", "request_type"],
        )
        .unwrap();
        registry
            .register(Box::new(agent_request_latency_seconds.clone()))
            .unwrap();

        let agent_requests_active = GaugeVec::new(
            prometheus::Opts::new("agent_requests_active", "outstanding agent requests"),
            &["source_agent", "target_agent"],
        )
        .unwrap();
        registry
            .register(Box::new(agent_requests_active.clone()))
            .unwrap();

        let agent_request_timeouts_total = CounterVec::new(
            prometheus::Opts::new("agent_request_timeouts_total", "agent request timeouts"),
            &["source_agent", "target_agent"],
        )
        .unwrap();
        registry
            .register(Box::new(agent_request_timeouts_total.clone()))
            .unwrap();

        let resource_lock_acquisitions_total = CounterVec::new(
            prometheus::Opts::new(
                "resource_lock_acquisitions_total",
                "successful lock acquisitions",
            ),
            &["resource_type", "agent_id"],
        )
        .unwrap();
        registry
            .register(Box::new(resource_lock_acquisitions_total.clone()))
            .unwrap();

        let resource_lock_wait_time_seconds = HistogramVec::new(
            prometheus::HistogramOpts::new(
                "resource_lock_wait_time_seconds",
                "time spent waiting for a contended lock",
            ),
            &["resource_type", "agent_id"],
        )
        .unwrap();
        registry
            .register(Box::new(resource_lock_wait_time_seconds.clone()))
            .unwrap();

        let resource_locks_active = GaugeVec::new(
            prometheus::Opts::new("resource_locks_active", "currently held locks"),
            &["resource_type"],
        )
        .unwrap();
        registry
            .register(Box::new(resource_locks_active.clone()))
            .unwrap();

        let resource_lock_contentions_total = CounterVec::new(
            prometheus::Opts::new(
                "resource_lock_contentions_total",
                "non-blocking acquire calls that found the lock held",
            ),
            &["resource_type", "agent_id"],
        )
        .unwrap();
        registry
            .register(Box::new(resource_lock_contentions_total.clone()))
            .unwrap();

        Self {
            registry,
            event_bus_events_emitted_total,
            event_bus_events_delivered_total,
            event_bus_subscriber_errors_total,
            agent_request_latency_seconds,
            agent_requests_active,
            agent_request_timeouts_total,
            resource_lock_acquisitions_total,
            resource_lock_wait_time_seconds,
            resource_locks_active,
            resource_lock_contentions_total,
        }
    }

    pub fn encode(&self) -> String {
        let encoder = TextEncoder::new();
        let families = self.registry.gather();
        encoder.encode_to_string(&families).unwrap_or_default()
    }
}

pub static METRICS: Lazy<Metrics> = Lazy::new(Metrics::new);
