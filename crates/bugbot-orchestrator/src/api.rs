//! The orchestrator's public HTTP surface

use crate::{Orchestrator, SubmitOutcome};
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bugbot_core::models::{Chain, Scan, ScanConfig, ScanStatus, ScanTarget};
use bugbot_core::Error;
use bugbot_service::error::{ApiError, ApiResult};
use bugbot_service::HealthReport;
use serde::Deserialize;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// `POST /scan` request body
#[derive(Debug, Deserialize)]
pub struct ScanRequest {
    /// Git URL or mounted local path; exclusive with `contract_address`
    #[serde(default)]
    pub target_url: Option<String>,
    /// On-chain address; exclusive with `target_url`
    #[serde(default)]
    pub contract_address: Option<String>,
    /// Optional chain hint
    #[serde(default)]
    pub chain: Option<Chain>,
    /// Recognized options
    #[serde(default)]
    pub scan_config: Option<ScanConfig>,
}

#[derive(Debug, Deserialize)]
struct ListParams {
    #[serde(default = "default_limit")]
    limit: usize,
    #[serde(default)]
    status: Option<ScanStatus>,
}

fn default_limit() -> usize {
    50
}

/// Build the orchestrator router.
pub fn orchestrator_router(orchestrator: Arc<Orchestrator>) -> Router {
    Router::new()
        .route("/scan", post(submit_scan))
        .route("/scan/:id", get(get_scan))
        .route("/scan/:id/cancel", post(cancel_scan))
        .route("/scans", get(list_scans))
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .layer(bugbot_service::cors_layer(
            &bugbot_core::config::dashboard_origins(),
        ))
        .with_state(orchestrator)
}

fn target_from(request: &ScanRequest) -> Result<ScanTarget, Error> {
    match (&request.target_url, &request.contract_address) {
        (Some(_), Some(_)) => Err(Error::InvalidRequest(
            "provide exactly one of target_url or contract_address".to_string(),
        )),
        (None, None) => Err(Error::InvalidRequest(
            "provide target_url or contract_address".to_string(),
        )),
        (Some(url), None) => {
            if url.starts_with("http://") || url.starts_with("https://") || url.starts_with("git@")
            {
                Ok(ScanTarget::GitUrl { url: url.clone() })
            } else {
                Ok(ScanTarget::LocalPath {
                    path: PathBuf::from(url),
                })
            }
        }
        (None, Some(address)) => Ok(ScanTarget::Address {
            chain: request.chain,
            address: address.clone(),
            force_decompile: false,
        }),
    }
}

async fn submit_scan(
    State(orchestrator): State<Arc<Orchestrator>>,
    headers: HeaderMap,
    Json(request): Json<ScanRequest>,
) -> Result<Response, ApiError> {
    let target = target_from(&request)?;
    let config = request.scan_config.unwrap_or_default();
    config.validate()?;

    let idempotency_key = headers
        .get("idempotency-key")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let scan = Scan::new(target, request.chain, config);
    match orchestrator.submit(scan, idempotency_key).await? {
        SubmitOutcome::Accepted(scan_id) => {
            info!("accepted scan {}", scan_id);
            Ok((
                StatusCode::ACCEPTED,
                Json(json!({
                    "scan_id": scan_id,
                    "status": "pending",
                    "message": "scan accepted",
                })),
            )
                .into_response())
        }
        SubmitOutcome::QueueFull => Ok((
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({
                "error": "scan queue is full, retry later",
                "code": "queue_full",
            })),
        )
            .into_response()),
    }
}

async fn get_scan(
    State(orchestrator): State<Arc<Orchestrator>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Scan>> {
    Ok(Json(orchestrator.store().get(&id).await?))
}

async fn cancel_scan(
    State(orchestrator): State<Arc<Orchestrator>>,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    orchestrator.cancel(&id).await?;
    Ok(Json(json!({"status": "cancelling"})))
}

async fn list_scans(
    State(orchestrator): State<Arc<Orchestrator>>,
    Query(params): Query<ListParams>,
) -> ApiResult<Json<serde_json::Value>> {
    let scans = orchestrator
        .store()
        .list(params.limit, params.status)
        .await?;
    Ok(Json(json!({
        "total": scans.len(),
        "scans": scans,
    })))
}

async fn health(State(orchestrator): State<Arc<Orchestrator>>) -> Json<HealthReport> {
    let mut report = HealthReport::healthy("orchestrator");
    for (stage, up) in orchestrator.stage_health().await {
        report = report.with_dependency(&format!("{stage}-worker"), up);
    }
    orchestrator.metrics().set_health(report.status);
    Json(report)
}

async fn metrics(State(orchestrator): State<Arc<Orchestrator>>) -> String {
    orchestrator.metrics().render()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::StageDispatcher;
    use async_trait::async_trait;
    use bugbot_core::models::{Stage, StageResult};
    use bugbot_core::store::MemoryScanStore;
    use std::time::Duration;
    use tower::util::ServiceExt;

    struct NeverDispatch;

    #[async_trait]
    impl StageDispatcher for NeverDispatch {
        async fn dispatch(
            &self,
            _stage: Stage,
            _request: bugbot_stages::worker::StageRequest,
            _timeout: Duration,
        ) -> bugbot_core::Result<StageResult> {
            // Keep scans pending long enough for API assertions.
            tokio::time::sleep(Duration::from_secs(5)).await;
            Err(Error::Cancelled)
        }
    }

    fn router() -> Router {
        let orchestrator = Arc::new(Orchestrator::new(
            Arc::new(MemoryScanStore::new()),
            Arc::new(NeverDispatch),
            2,
            2,
        ));
        orchestrator_router(orchestrator)
    }

    async fn request(
        router: Router,
        method: &str,
        uri: &str,
        body: Option<serde_json::Value>,
    ) -> (u16, serde_json::Value) {
        let mut builder = axum::http::Request::builder().method(method).uri(uri);
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
            serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null),
        )
    }

    #[tokio::test]
    async fn submit_requires_exactly_one_target() {
        let (status, body) = request(
            router(),
            "POST",
            "/scan",
            Some(json!({"target_url": "https://example.test/r", "contract_address": "0xdead"})),
        )
        .await;
        assert_eq!(status, 400);
        assert_eq!(body["code"], "invalid_request");

        let (status, _) = request(router(), "POST", "/scan", Some(json!({}))).await;
        assert_eq!(status, 400);
    }

    #[tokio::test]
    async fn submit_accepts_and_exposes_the_scan() {
        let router = router();
        let (status, body) = request(
            router.clone(),
            "POST",
            "/scan",
            Some(json!({"target_url": "https://example.test/repos/Vault"})),
        )
        .await;
        assert_eq!(status, 202);
        assert_eq!(body["status"], "pending");
        let scan_id = body["scan_id"].as_str().unwrap().to_string();

        let (status, scan) = request(router.clone(), "GET", &format!("/scan/{scan_id}"), None).await;
        assert_eq!(status, 200);
        assert_eq!(scan["scan_id"], scan_id.as_str());
        assert_eq!(scan["target_url"], "https://example.test/repos/Vault");

        let (status, listing) = request(router, "GET", "/scans?limit=10", None).await;
        assert_eq!(status, 200);
        assert_eq!(listing["total"], 1);
    }

    #[tokio::test]
    async fn unknown_scan_is_404() {
        let (status, body) = request(router(), "GET", "/scan/nope", None).await;
        assert_eq!(status, 404);
        assert_eq!(body["code"], "not_found");
    }

    #[tokio::test]
    async fn out_of_range_monitor_window_is_rejected() {
        let (status, _) = request(
            router(),
            "POST",
            "/scan",
            Some(json!({
                "target_url": "https://example.test/r",
                "scan_config": {"monitor_duration_minutes": 90},
            })),
        )
        .await;
        assert_eq!(status, 400);
    }

    #[tokio::test]
    async fn cancel_reports_cancelling() {
        let router = router();
        let (_, body) = request(
            router.clone(),
            "POST",
            "/scan",
            Some(json!({"target_url": "https://example.test/repos/Vault"})),
        )
        .await;
        let scan_id = body["scan_id"].as_str().unwrap().to_string();

        let (status, body) = request(
            router,
            "POST",
            &format!("/scan/{scan_id}/cancel"),
            Some(json!({})),
        )
        .await;
        assert_eq!(status, 200);
        assert_eq!(body["status"], "cancelling");
    }
}
