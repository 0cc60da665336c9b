//! The uniform stage-worker contract
//!
//! Every stage receives the same request shape: the scan id, the resolved
//! chain, the target, the scan options, and the outputs of all prior stages.
//! A stage reports partial completion inside a 200 response body
//! (`stage_status: partial`); a fatal failure is an HTTP 5xx, which the
//! orchestrator turns into scan failure.

use async_trait::async_trait;
use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use bugbot_core::models::{Chain, ScanConfig, ScanTarget, Stage, StageResult};
use bugbot_service::error::ApiResult;
use bugbot_service::{HealthReport, ServiceMetrics};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, instrument};

/// Request body accepted by every stage worker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageRequest {
    /// Scan this work belongs to
    pub scan_id: String,
    /// Resolved chain, when the scan has one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chain: Option<Chain>,
    /// The scan target
    pub target: ScanTarget,
    /// Recognized scan options
    #[serde(default)]
    pub scan_config: ScanConfig,
    /// Outputs of the stages that already ran
    #[serde(default)]
    pub prior: BTreeMap<Stage, StageResult>,
}

impl StageRequest {
    /// The deployed address carried by an address target, when present.
    pub fn contract_address(&self) -> Option<&str> {
        match &self.target {
            ScanTarget::Address { address, .. } => Some(address),
            _ => None,
        }
    }
}

/// A stage worker's work contract
#[async_trait]
pub trait StageWorker: Send + Sync {
    /// Which stage this worker implements.
    fn stage(&self) -> Stage;

    /// Execute the stage. Partial results are encoded in the returned
    /// [`StageResult`]; an `Err` is a fatal stage failure.
    async fn run(&self, request: StageRequest) -> bugbot_core::Result<StageResult>;

    /// Probe declared dependencies for the health report.
    async fn dependencies(&self) -> Vec<(String, bool)> {
        Vec::new()
    }
}

#[derive(Clone)]
struct WorkerState {
    worker: Arc<dyn StageWorker>,
    metrics: Arc<ServiceMetrics>,
}

/// Assemble the HTTP surface for one stage worker.
pub fn stage_router(worker: Arc<dyn StageWorker>, metrics: Arc<ServiceMetrics>) -> Router {
    let path = format!("/{}", worker.stage().as_str());
    Router::new()
        .route(&path, post(run_stage))
        .route("/health", get(health))
        .route("/metrics", get(render_metrics))
        .layer(bugbot_service::cors_layer(
            &bugbot_core::config::dashboard_origins(),
        ))
        .with_state(WorkerState { worker, metrics })
}

#[instrument(skip(state, request), fields(scan_id = %request.scan_id))]
async fn run_stage(
    State(state): State<WorkerState>,
    Json(request): Json<StageRequest>,
) -> ApiResult<Json<StageResult>> {
    let stage = state.worker.stage();
    let started = Instant::now();
    info!("{} stage starting for scan {}", stage, request.scan_id);

    let result = state.worker.run(request).await?;

    state
        .metrics
        .request_duration
        .with_label_values(&[stage.as_str()])
        .observe(started.elapsed().as_secs_f64());
    info!("{} stage finished in {:?}", stage, started.elapsed());
    Ok(Json(result))
}

async fn health(State(state): State<WorkerState>) -> Json<HealthReport> {
    let service = format!("{}-worker", state.worker.stage());
    let mut report = HealthReport::healthy(service);
    for (name, reachable) in state.worker.dependencies().await {
        report = report.with_dependency(&name, reachable);
    }
    state.metrics.set_health(report.status);
    Json(report)
}

async fn render_metrics(State(state): State<WorkerState>) -> String {
    state.metrics.render()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bugbot_core::models::{ReconOutput, StageStatus};
    use tower::util::ServiceExt;

    struct EchoWorker;

    #[async_trait]
    impl StageWorker for EchoWorker {
        fn stage(&self) -> Stage {
            Stage::Recon
        }

        async fn run(&self, request: StageRequest) -> bugbot_core::Result<StageResult> {
            if request.scan_id == "explode" {
                return Err(bugbot_core::Error::StageFailure {
                    stage: "recon".to_string(),
                    cause: "boom".to_string(),
                });
            }
            Ok(StageResult::Recon(ReconOutput {
                surface_map: vec![],
                entry_contracts: vec![],
                contracts: vec![],
                stage_status: StageStatus::Complete,
            }))
        }
    }

    fn request_body(scan_id: &str) -> String {
        serde_json::json!({
            "scan_id": scan_id,
            "target": {"kind": "git_url", "url": "https://example.test/repo"},
        })
        .to_string()
    }

    async fn post(router: Router, uri: &str, body: String) -> (u16, serde_json::Value) {
        let response = router
            .oneshot(
                axum::http::Request::builder()
                    .method("POST")
                    .uri(uri)
                    .header("content-type", "application/json")
                    .body(axum::body::Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status().as_u16();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (
            status,
            serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null),
        )
    }

    #[tokio::test]
    async fn work_endpoint_returns_the_stage_result() {
        let router = stage_router(
            Arc::new(EchoWorker),
            Arc::new(ServiceMetrics::new("recon-worker")),
        );
        let (status, body) = post(router, "/recon", request_body("s-1")).await;
        assert_eq!(status, 200);
        assert_eq!(body["stage"], "recon");
        assert_eq!(body["stage_status"], "complete");
    }

    #[tokio::test]
    async fn fatal_failures_surface_as_5xx() {
        let router = stage_router(
            Arc::new(EchoWorker),
            Arc::new(ServiceMetrics::new("recon-worker")),
        );
        let (status, body) = post(router, "/recon", request_body("explode")).await;
        assert_eq!(status, 500);
        assert_eq!(body["code"], "stage_failure");
    }

    #[tokio::test]
    async fn request_round_trips_with_prior_results() {
        let mut prior = BTreeMap::new();
        prior.insert(
            Stage::Recon,
            StageResult::Recon(ReconOutput {
                surface_map: vec![],
                entry_contracts: vec![],
                contracts: vec![],
                stage_status: StageStatus::Partial,
            }),
        );
        let request = StageRequest {
            scan_id: "s-2".to_string(),
            chain: Some(Chain::Ethereum),
            target: ScanTarget::Address {
                chain: Some(Chain::Ethereum),
                address: "0xdead".to_string(),
                force_decompile: false,
            },
            scan_config: ScanConfig::default(),
            prior,
        };
        let json = serde_json::to_string(&request).unwrap();
        let back: StageRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(back.contract_address(), Some("0xdead"));
        assert!(back.prior.contains_key(&Stage::Recon));
    }
}
