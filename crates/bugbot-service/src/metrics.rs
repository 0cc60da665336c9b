//! Prometheus metrics surface
//!
//! Each service owns one [`ServiceMetrics`] registry exposed at `GET /metrics`
//! in text exposition format. The minimum metric set is registered up front;
//! services touch only the counters relevant to them.

use crate::health::HealthStatus;
use prometheus::{
    Encoder, GaugeVec, Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts,
    Registry, TextEncoder,
};
use tracing::error;

/// Per-service metrics registry
pub struct ServiceMetrics {
    registry: Registry,
    service: String,
    /// `bugbot_service_health{service}`: 1 healthy, 0.5 degraded, 0 down
    pub service_health: GaugeVec,
    /// `bugbot_findings_total{severity}`, incremented during triage
    pub findings_total: IntCounterVec,
    /// `bugbot_scan_duration_seconds`
    pub scan_duration: Histogram,
    /// `bugbot_rpc_failovers_total`
    pub rpc_failovers: IntCounter,
    /// `bugbot_llm_retries_total`
    pub llm_retries: IntCounter,
    /// `bugbot_validation_outcomes_total{outcome}`
    pub validation_outcomes: IntCounterVec,
    /// `bugbot_http_request_duration_seconds{path}`
    pub request_duration: HistogramVec,
}

impl ServiceMetrics {
    /// Create and register the minimum metric set for one service.
    pub fn new(service: &str) -> Self {
        let registry = Registry::new();

        let service_health = GaugeVec::new(
            Opts::new("bugbot_service_health", "Service health: 1/0.5/0"),
            &["service"],
        )
        .unwrap_or_else(|e| panic!("metric definition: {e}"));
        let findings_total = IntCounterVec::new(
            Opts::new("bugbot_findings_total", "Findings produced, by severity"),
            &["severity"],
        )
        .unwrap_or_else(|e| panic!("metric definition: {e}"));
        let scan_duration = Histogram::with_opts(
            HistogramOpts::new("bugbot_scan_duration_seconds", "End-to-end scan duration")
                .buckets(vec![10.0, 30.0, 60.0, 180.0, 300.0, 600.0, 1200.0, 1800.0]),
        )
        .unwrap_or_else(|e| panic!("metric definition: {e}"));
        let rpc_failovers = IntCounter::new(
            "bugbot_rpc_failovers_total",
            "RPC calls that failed over past the first provider",
        )
        .unwrap_or_else(|e| panic!("metric definition: {e}"));
        let llm_retries = IntCounter::new(
            "bugbot_llm_retries_total",
            "LLM backend attempts that were retried",
        )
        .unwrap_or_else(|e| panic!("metric definition: {e}"));
        let validation_outcomes = IntCounterVec::new(
            Opts::new(
                "bugbot_validation_outcomes_total",
                "Validator job outcomes",
            ),
            &["outcome"],
        )
        .unwrap_or_else(|e| panic!("metric definition: {e}"));
        let request_duration = HistogramVec::new(
            HistogramOpts::new(
                "bugbot_http_request_duration_seconds",
                "Inbound request latency",
            )
            .buckets(vec![0.005, 0.025, 0.1, 0.5, 1.0, 5.0, 30.0]),
            &["path"],
        )
        .unwrap_or_else(|e| panic!("metric definition: {e}"));

        for collector in [
            Box::new(service_health.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(findings_total.clone()),
            Box::new(scan_duration.clone()),
            Box::new(rpc_failovers.clone()),
            Box::new(llm_retries.clone()),
            Box::new(validation_outcomes.clone()),
            Box::new(request_duration.clone()),
        ] {
            if let Err(e) = registry.register(collector) {
                error!("metric registration failed: {}", e);
            }
        }

        let metrics = Self {
            registry,
            service: service.to_string(),
            service_health,
            findings_total,
            scan_duration,
            rpc_failovers,
            llm_retries,
            validation_outcomes,
            request_duration,
        };
        metrics.set_health(HealthStatus::Healthy);
        metrics
    }

    /// Update the health gauge for this service.
    pub fn set_health(&self, status: HealthStatus) {
        self.service_health
            .with_label_values(&[&self.service])
            .set(status.gauge_value());
    }

    /// Render the registry in Prometheus text exposition format.
    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buffer) {
            error!("metrics encoding failed: {}", e);
            return String::new();
        }
        String::from_utf8_lossy(&buffer).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_includes_the_minimum_metric_set() {
        let metrics = ServiceMetrics::new("orchestrator");
        metrics.findings_total.with_label_values(&["high"]).inc();
        metrics.scan_duration.observe(42.0);
        metrics
            .validation_outcomes
            .with_label_values(&["completed"])
            .inc();

        let text = metrics.render();
        assert!(text.contains("bugbot_service_health"));
        assert!(text.contains("bugbot_findings_total"));
        assert!(text.contains("bugbot_scan_duration_seconds"));
        assert!(text.contains(r#"severity="high""#));
        assert!(text.contains(r#"service="orchestrator""#));
    }

    #[test]
    fn health_gauge_tracks_status() {
        let metrics = ServiceMetrics::new("guardrail");
        metrics.set_health(HealthStatus::Degraded);
        assert!(metrics.render().contains("0.5"));
    }
}
