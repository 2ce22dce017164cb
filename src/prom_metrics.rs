//! # Prometheus Metrics: Exposition for Container Orchestration
//!
//! Exposes saltleads operational metrics in the Prometheus text exposition
//! format for scraping by Prometheus, Grafana Agent, or any
//! OpenMetrics-compatible collector.
//!
//! ## Metrics Exposed
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `saltleads_http_request_duration_seconds` | Histogram | `method`, `path` | Request latency |
//! | `saltleads_leads_submitted_total` | Counter | `kind` | Estimates, questions and chats taken in |
//! | `saltleads_chats_requested_total` | Counter | | New chat sessions |
//! | `saltleads_outbox_pending` | Gauge | | Side-effect jobs waiting to run |
//! | `saltleads_outbox_failures_total` | Counter | `kind` | Failed job attempts |
//!
//! ## Integration
//!
//! The HTTP histogram is fed by the router middleware, lead counters by the
//! handlers, and the outbox metrics by each drain pass. The `/metrics`
//! endpoint renders the current registry state on each scrape.

use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{exponential_buckets, Histogram};
use prometheus_client::registry::Registry;

/// Label set for HTTP latency. `path` is normalised (ids collapsed).
#[derive(Clone, Debug, Hash, PartialEq, Eq, prometheus_client::encoding::EncodeLabelSet)]
pub struct HttpLabel {
    pub method: String,
    pub path: String,
}

/// Label set for per-kind counters (lead kind, outbox job kind).
#[derive(Clone, Debug, Hash, PartialEq, Eq, prometheus_client::encoding::EncodeLabelSet)]
pub struct KindLabel {
    pub kind: String,
}

impl KindLabel {
    pub fn new(kind: &str) -> Self {
        KindLabel {
            kind: kind.to_string(),
        }
    }
}

fn latency_histogram() -> Histogram {
    // 5ms .. ~10s
    Histogram::new(exponential_buckets(0.005, 2.0, 12))
}

/// Thread-safe metrics registry for the saltleads server.
///
/// All fields use atomic types and are safe to update from any task.
pub struct Metrics {
    pub registry: Registry,
    pub http_request_duration: Family<HttpLabel, Histogram, fn() -> Histogram>,
    pub leads_submitted: Family<KindLabel, Counter>,
    pub chats_requested: Counter,
    pub outbox_pending: Gauge,
    pub outbox_failures: Family<KindLabel, Counter>,
}

impl Metrics {
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let http_request_duration =
            Family::<HttpLabel, Histogram, fn() -> Histogram>::new_with_constructor(
                latency_histogram,
            );
        registry.register(
            "saltleads_http_request_duration_seconds",
            "HTTP request latency by method and normalised path",
            http_request_duration.clone(),
        );

        let leads_submitted = Family::<KindLabel, Counter>::default();
        registry.register(
            "saltleads_leads_submitted",
            "Leads taken in by kind",
            leads_submitted.clone(),
        );

        let chats_requested = Counter::default();
        registry.register(
            "saltleads_chats_requested",
            "New chat sessions opened",
            chats_requested.clone(),
        );

        let outbox_pending = Gauge::default();
        registry.register(
            "saltleads_outbox_pending",
            "Outbox jobs waiting to run",
            outbox_pending.clone(),
        );

        let outbox_failures = Family::<KindLabel, Counter>::default();
        registry.register(
            "saltleads_outbox_failures",
            "Failed outbox job attempts by job kind",
            outbox_failures.clone(),
        );

        Self {
            registry,
            http_request_duration,
            leads_submitted,
            chats_requested,
            outbox_pending,
            outbox_failures,
        }
    }

    /// Count one lead of the given kind.
    pub fn lead(&self, kind: &str) {
        self.leads_submitted.get_or_create(&KindLabel::new(kind)).inc();
    }

    /// Render all metrics in Prometheus text exposition format.
    pub fn encode(&self) -> String {
        let mut buf = String::new();
        encode(&mut buf, &self.registry).expect("encoding metrics should not fail");
        buf
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_encode_returns_valid_text() {
        let m = Metrics::new();
        m.outbox_pending.set(5);
        m.chats_requested.inc();
        m.lead("quick");
        m.http_request_duration
            .get_or_create(&HttpLabel {
                method: "GET".into(),
                path: "/api/price-estimate/:id".into(),
            })
            .observe(0.02);

        let output = m.encode();
        assert!(output.contains("saltleads_outbox_pending 5"));
        assert!(output.contains("saltleads_chats_requested_total 1"));
        assert!(output.contains("saltleads_leads_submitted_total{kind=\"quick\"} 1"));
        assert!(output.contains("saltleads_http_request_duration_seconds_bucket"));
    }

    #[test]
    fn per_kind_counters_independent() {
        let m = Metrics::new();
        m.outbox_failures.get_or_create(&KindLabel::new("notify")).inc_by(3);
        m.outbox_failures
            .get_or_create(&KindLabel::new("mirror_estimate"))
            .inc_by(7);

        let output = m.encode();
        assert!(output.contains("saltleads_outbox_failures_total{kind=\"notify\"} 3"));
        assert!(output.contains("saltleads_outbox_failures_total{kind=\"mirror_estimate\"} 7"));
    }
}
