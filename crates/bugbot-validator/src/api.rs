//! The validator HTTP surface

use crate::{ValidationRequest, ValidatorService};
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::{Json, Router};
use bugbot_core::models::{FindingKind, SandboxType, ValidationJob};
use bugbot_service::error::ApiResult;
use bugbot_service::{require_admin, HealthReport};
use secrecy::SecretString;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

/// Router state
pub struct ValidatorState {
    /// The job queue service
    pub service: Arc<ValidatorService>,
    /// Admin bearer token for operator verdicts
    pub admin_token: SecretString,
}

/// `POST /validate` body
#[derive(Debug, Deserialize)]
pub struct ValidateBody {
    /// Scan the finding came from, when internal
    #[serde(default)]
    pub scan_id: Option<String>,
    /// Finding id or external reference
    pub finding_id: String,
    /// Vulnerability class, drives template selection
    #[serde(default = "default_kind")]
    pub finding_type: FindingKind,
    /// PoC text; templated when absent
    #[serde(default)]
    pub proof_of_concept: Option<String>,
    /// Sandbox runtime
    #[serde(default)]
    pub sandbox_type: SandboxType,
    /// Requested timeout in seconds
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
}

fn default_kind() -> FindingKind {
    FindingKind::Other
}

#[derive(Debug, Deserialize)]
struct MarkParams {
    is_valid: bool,
    confidence: f64,
}

/// Build the validator router.
pub fn validator_router(state: Arc<ValidatorState>) -> Router {
    Router::new()
        .route("/validate", post(submit))
        .route("/validate/:id", get(get_job))
        .route("/validate/:id/cancel", post(cancel_job))
        .route("/validate/:id/mark", post(mark_job))
        .route("/validations", get(list_jobs))
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .layer(bugbot_service::cors_layer(
            &bugbot_core::config::dashboard_origins(),
        ))
        .with_state(state)
}

async fn submit(
    State(state): State<Arc<ValidatorState>>,
    Json(body): Json<ValidateBody>,
) -> ApiResult<Json<ValidationJob>> {
    let job = state
        .service
        .submit(ValidationRequest {
            scan_id: body.scan_id,
            finding_id: body.finding_id,
            finding_type: body.finding_type,
            proof_of_concept: body.proof_of_concept,
            sandbox_type: body.sandbox_type,
            timeout_seconds: body.timeout_seconds,
        })
        .await?;
    Ok(Json(job))
}

async fn get_job(
    State(state): State<Arc<ValidatorState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<ValidationJob>> {
    Ok(Json(state.service.get(&id).await?))
}

async fn cancel_job(
    State(state): State<Arc<ValidatorState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<ValidationJob>> {
    Ok(Json(state.service.cancel(&id).await?))
}

async fn mark_job(
    State(state): State<Arc<ValidatorState>>,
    Path(id): Path<String>,
    Query(params): Query<MarkParams>,
    headers: HeaderMap,
) -> ApiResult<Json<ValidationJob>> {
    require_admin(&headers, &state.admin_token)?;
    Ok(Json(
        state
            .service
            .mark(&id, params.is_valid, params.confidence)
            .await?,
    ))
}

async fn list_jobs(State(state): State<Arc<ValidatorState>>) -> Json<Value> {
    let jobs = state.service.list().await;
    Json(json!({"total": jobs.len(), "validations": jobs}))
}

async fn health(State(state): State<Arc<ValidatorState>>) -> Json<HealthReport> {
    let report = HealthReport::healthy("validator");
    state.service.metrics().set_health(report.status);
    Json(report)
}

async fn metrics(State(state): State<Arc<ValidatorState>>) -> String {
    state.service.metrics().render()
}
