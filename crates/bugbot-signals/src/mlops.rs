//! MLOps shells
//!
//! The training loop itself is out of scope; these endpoints accept the
//! inputs that feed it and return the metric shapes consumers depend on.

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use bugbot_service::error::ApiResult;
use bugbot_service::{HealthReport, ServiceMetrics};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

/// One recorded training run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainRun {
    /// Run identifier
    pub run_id: String,
    /// Always `completed` in the shell implementation
    pub status: String,
    /// Records seen by the run
    pub dataset_size: usize,
    /// Metric shapes consumers parse
    pub metrics: TrainMetrics,
    /// When the run finished
    pub finished_at: DateTime<Utc>,
}

/// Metric shape returned by `POST /mlops/train`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainMetrics {
    /// Precision on the held-out split
    pub precision: f64,
    /// Recall on the held-out split
    pub recall: f64,
    /// F1 on the held-out split
    pub f1: f64,
}

/// The mlops shell service
pub struct MlOpsService {
    dataset: RwLock<Vec<Value>>,
    runs: RwLock<Vec<TrainRun>>,
    metrics: Arc<ServiceMetrics>,
}

impl MlOpsService {
    /// Empty service.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            dataset: RwLock::new(Vec::new()),
            runs: RwLock::new(Vec::new()),
            metrics: Arc::new(ServiceMetrics::new("mlops")),
        })
    }

    /// Accept labeled findings into the dataset.
    pub async fn ingest(&self, records: Vec<Value>) -> usize {
        let mut dataset = self.dataset.write().await;
        dataset.extend(records);
        info!("dataset now holds {} record(s)", dataset.len());
        dataset.len()
    }

    /// Run the black-box training loop and record its metrics.
    pub async fn train(&self) -> TrainRun {
        let dataset_size = self.dataset.read().await.len();
        // The real loop lives outside this service; the shell reports a
        // deterministic shape derived from dataset size so consumers can be
        // exercised end to end.
        let coverage = (dataset_size.min(1000) as f64) / 1000.0;
        let run = TrainRun {
            run_id: Uuid::new_v4().to_string(),
            status: "completed".to_string(),
            dataset_size,
            metrics: TrainMetrics {
                precision: 0.5 + coverage * 0.4,
                recall: 0.4 + coverage * 0.45,
                f1: 0.45 + coverage * 0.42,
            },
            finished_at: Utc::now(),
        };
        self.runs.write().await.push(run.clone());
        run
    }

    /// Derive detection-rule candidates from the ingested finding types.
    pub async fn generate_rules(&self) -> Vec<Value> {
        let dataset = self.dataset.read().await;
        let mut kinds: Vec<String> = dataset
            .iter()
            .filter_map(|record| record["type"].as_str().map(str::to_string))
            .collect();
        kinds.sort();
        kinds.dedup();
        kinds
            .into_iter()
            .map(|kind| {
                json!({
                    "rule": format!("learned_{kind}"),
                    "finding_type": kind,
                    "status": "candidate",
                })
            })
            .collect()
    }
}

#[derive(Debug, Deserialize)]
struct IngestBody {
    records: Vec<Value>,
}

/// Build the mlops router.
pub fn mlops_router(service: Arc<MlOpsService>) -> Router {
    Router::new()
        .route("/mlops/ingest", post(ingest_handler))
        .route("/mlops/train", post(train_handler))
        .route("/mlops/generate-rules", post(rules_handler))
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .layer(bugbot_service::cors_layer(
            &bugbot_core::config::dashboard_origins(),
        ))
        .with_state(service)
}

async fn ingest_handler(
    State(service): State<Arc<MlOpsService>>,
    Json(body): Json<IngestBody>,
) -> ApiResult<Json<Value>> {
    let ingested = body.records.len();
    let total = service.ingest(body.records).await;
    Ok(Json(json!({"ingested": ingested, "total": total})))
}

async fn train_handler(State(service): State<Arc<MlOpsService>>) -> Json<TrainRun> {
    Json(service.train().await)
}

async fn rules_handler(State(service): State<Arc<MlOpsService>>) -> Json<Value> {
    let rules = service.generate_rules().await;
    Json(json!({"count": rules.len(), "rules": rules}))
}

async fn health(State(service): State<Arc<MlOpsService>>) -> Json<HealthReport> {
    let report = HealthReport::healthy("mlops");
    service.metrics.set_health(report.status);
    Json(report)
}

async fn metrics(State(service): State<Arc<MlOpsService>>) -> String {
    service.metrics.render()
}
