//! Health reporting types shared by every service

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Rolled-up health level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// All declared dependencies reachable
    Healthy,
    /// Serving, but a dependency is unreachable
    Degraded,
    /// Not serving
    Down,
}

impl HealthStatus {
    /// Gauge value for `bugbot_service_health`.
    pub fn gauge_value(&self) -> f64 {
        match self {
            HealthStatus::Healthy => 1.0,
            HealthStatus::Degraded => 0.5,
            HealthStatus::Down => 0.0,
        }
    }
}

/// The `GET /health` body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    /// Rolled-up status
    pub status: HealthStatus,
    /// Service name
    pub service: String,
    /// Per-dependency detail
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub details: BTreeMap<String, String>,
}

impl HealthReport {
    /// A healthy report with no details.
    pub fn healthy(service: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Healthy,
            service: service.into(),
            details: BTreeMap::new(),
        }
    }

    /// Record one dependency probe, demoting the rollup when it failed.
    pub fn with_dependency(mut self, name: &str, reachable: bool) -> Self {
        self.details.insert(
            name.to_string(),
            if reachable { "reachable" } else { "unreachable" }.to_string(),
        );
        if !reachable && self.status == HealthStatus::Healthy {
            self.status = HealthStatus::Degraded;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unreachable_dependency_demotes_to_degraded() {
        let report = HealthReport::healthy("static-worker")
            .with_dependency("llm_router", true)
            .with_dependency("rpc_pool", false);
        assert_eq!(report.status, HealthStatus::Degraded);
        assert_eq!(report.details.len(), 2);
    }

    #[test]
    fn gauge_values_match_the_contract() {
        assert_eq!(HealthStatus::Healthy.gauge_value(), 1.0);
        assert_eq!(HealthStatus::Degraded.gauge_value(), 0.5);
        assert_eq!(HealthStatus::Down.gauge_value(), 0.0);
    }
}
