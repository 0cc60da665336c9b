//! The guardrail HTTP surface
//!
//! Pause approval and rejection are admin mutations guarded by the bearer
//! token; monitor registration and status are open to the trusted network.

use crate::GuardrailService;
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::{Json, Router};
use bugbot_core::models::{Chain, NotifyChannel, PauseRequester, Severity};
use bugbot_service::error::ApiResult;
use bugbot_service::{require_admin, HealthReport, ServiceMetrics};
use secrecy::SecretString;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Router state
pub struct GuardrailState {
    /// The workflow service
    pub service: GuardrailService,
    /// Admin bearer token
    pub admin_token: SecretString,
    /// Metrics registry
    pub metrics: Arc<ServiceMetrics>,
    /// Failover count already folded into the exported counter
    pub reported_failovers: AtomicU64,
}

/// `POST /monitor/start` body
#[derive(Debug, Deserialize)]
pub struct StartMonitorRequest {
    /// Contract to watch
    pub contract_address: String,
    /// Chain the contract lives on
    pub chain: Chain,
    /// Auto-approve pause requests from exploit rules
    #[serde(default)]
    pub auto_pause: bool,
    /// Channels alerted on anomalies
    #[serde(default)]
    pub alert_channels: Vec<NotifyChannel>,
}

#[derive(Debug, Deserialize)]
struct StopParams {
    contract_address: String,
}

/// `POST /pause/request` body
#[derive(Debug, Deserialize)]
pub struct PauseRequestBody {
    /// Contract to pause
    pub contract_address: String,
    /// Chain the contract lives on
    pub chain: Chain,
    /// Why the pause is requested
    pub reason: String,
    /// Trigger severity
    #[serde(default = "default_severity")]
    pub severity: Severity,
}

fn default_severity() -> Severity {
    Severity::High
}

/// Build the guardrail router.
pub fn guardrail_router(state: Arc<GuardrailState>) -> Router {
    Router::new()
        .route("/monitor/start", post(start_monitor))
        .route("/monitor/stop", post(stop_monitor))
        .route("/monitor/status", get(monitor_status))
        .route("/pause/request", post(request_pause))
        .route("/pause/approve/:id", post(approve_pause))
        .route("/pause/reject/:id", post(reject_pause))
        .route("/pause/requests", get(list_requests))
        .route("/rpc-status", get(rpc_status))
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .layer(bugbot_service::cors_layer(
            &bugbot_core::config::dashboard_origins(),
        ))
        .with_state(state)
}

async fn start_monitor(
    State(state): State<Arc<GuardrailState>>,
    Json(request): Json<StartMonitorRequest>,
) -> ApiResult<Json<Value>> {
    let entry = state
        .service
        .start_monitor(
            request.contract_address,
            request.chain,
            request.auto_pause,
            request.alert_channels,
        )
        .await?;
    Ok(Json(json!({"status": "monitoring", "monitor": entry})))
}

async fn stop_monitor(
    State(state): State<Arc<GuardrailState>>,
    Query(params): Query<StopParams>,
) -> ApiResult<Json<Value>> {
    let stopped = state.service.stop_monitor(&params.contract_address).await;
    Ok(Json(json!({"status": "stopped", "count": stopped})))
}

async fn monitor_status(State(state): State<Arc<GuardrailState>>) -> Json<Value> {
    let monitors = state.service.monitors().await;
    Json(json!({"total": monitors.len(), "monitors": monitors}))
}

async fn request_pause(
    State(state): State<Arc<GuardrailState>>,
    Json(body): Json<PauseRequestBody>,
) -> ApiResult<Json<Value>> {
    let request = state
        .service
        .emit_pause_request(
            body.contract_address,
            body.chain,
            body.reason,
            body.severity,
            PauseRequester::OperatorToken,
        )
        .await?;
    Ok(Json(json!({"request": request})))
}

async fn approve_pause(
    State(state): State<Arc<GuardrailState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Json<Value>> {
    require_admin(&headers, &state.admin_token)?;
    let request = state.service.approve(&id).await?;
    Ok(Json(json!({"request": request})))
}

async fn reject_pause(
    State(state): State<Arc<GuardrailState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Json<Value>> {
    require_admin(&headers, &state.admin_token)?;
    let request = state.service.reject(&id).await?;
    Ok(Json(json!({"request": request})))
}

async fn list_requests(State(state): State<Arc<GuardrailState>>) -> Json<Value> {
    let requests = state.service.requests().await;
    Json(json!({"total": requests.len(), "requests": requests}))
}

async fn rpc_status(State(state): State<Arc<GuardrailState>>) -> Json<Value> {
    Json(json!({"pools": state.service.rpc_status().await}))
}

async fn health(State(state): State<Arc<GuardrailState>>) -> Json<HealthReport> {
    let report = HealthReport::healthy("guardrail");
    state.metrics.set_health(report.status);
    Json(report)
}

async fn metrics(State(state): State<Arc<GuardrailState>>) -> String {
    // Fold the pools' failover counts into the exported counter.
    let total: u64 = state
        .service
        .rpc_status()
        .await
        .iter()
        .map(|pool| pool.failovers_total)
        .sum();
    let reported = state.reported_failovers.swap(total, Ordering::Relaxed);
    if total > reported {
        state.metrics.rpc_failovers.inc_by(total - reported);
    }
    state.metrics.render()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RecordedIntentAdapter;
    use tower::util::ServiceExt;

    fn router() -> Router {
        guardrail_router(Arc::new(GuardrailState {
            service: GuardrailService::new(Arc::new(RecordedIntentAdapter::new())),
            admin_token: SecretString::new("correct-token".into()),
            metrics: Arc::new(ServiceMetrics::new("guardrail")),
            reported_failovers: AtomicU64::new(0),
        }))
    }

    async fn call(
        router: Router,
        method: &str,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (u16, Value) {
        let mut builder = axum::http::Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        let body = match body {
            Some(value) => {
                builder = builder.header("content-type", "application/json");
                axum::body::Body::from(value.to_string())
            }
            None => axum::body::Body::empty(),
        };
        let response = router.oneshot(builder.body(body).unwrap()).await.unwrap();
        let status = response.status().as_u16();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (
            status,
            serde_json::from_slice(&bytes).unwrap_or(Value::Null),
        )
    }

    #[tokio::test]
    async fn approval_without_token_is_401_with_token_executes() {
        let router = router();
        let (_, body) = call(
            router.clone(),
            "POST",
            "/pause/request",
            None,
            Some(json!({
                "contract_address": "0xVault",
                "chain": "ethereum",
                "reason": "drain pattern",
                "severity": "critical",
            })),
        )
        .await;
        let id = body["request"]["id"].as_str().unwrap().to_string();
        assert_eq!(body["request"]["status"], "pending_approval");

        let (status, _) = call(
            router.clone(),
            "POST",
            &format!("/pause/approve/{id}"),
            None,
            None,
        )
        .await;
        assert_eq!(status, 401);

        let (status, _) = call(
            router.clone(),
            "POST",
            &format!("/pause/approve/{id}"),
            Some("wrong-token"),
            None,
        )
        .await;
        assert_eq!(status, 401);

        let (status, body) = call(
            router,
            "POST",
            &format!("/pause/approve/{id}"),
            Some("correct-token"),
            None,
        )
        .await;
        assert_eq!(status, 200);
        assert_eq!(body["request"]["status"], "executed");
    }

    #[tokio::test]
    async fn duplicate_monitor_registration_conflicts() {
        let router = router();
        let body = json!({"contract_address": "0xVault", "chain": "ethereum"});
        let (status, _) = call(
            router.clone(),
            "POST",
            "/monitor/start",
            None,
            Some(body.clone()),
        )
        .await;
        assert_eq!(status, 200);

        let (status, response) =
            call(router, "POST", "/monitor/start", None, Some(body)).await;
        assert_eq!(status, 409);
        assert_eq!(response["code"], "conflict");
    }

    #[tokio::test]
    async fn approving_unknown_request_is_404() {
        let (status, _) = call(
            router(),
            "POST",
            "/pause/approve/nope",
            Some("correct-token"),
            None,
        )
        .await;
        assert_eq!(status, 404);
    }
}
