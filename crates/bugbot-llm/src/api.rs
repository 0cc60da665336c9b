//! The LLM router HTTP surface

use crate::{LlmRouter, LlmTask};
use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use bugbot_service::error::ApiResult;
use bugbot_service::{HealthReport, HealthStatus, ServiceMetrics};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Router state
pub struct LlmApiState {
    /// The task router
    pub router: Arc<LlmRouter>,
    /// Metrics registry
    pub metrics: Arc<ServiceMetrics>,
    reported_retries: AtomicU64,
}

impl LlmApiState {
    /// State over a router.
    pub fn new(router: Arc<LlmRouter>) -> Self {
        Self {
            router,
            metrics: Arc::new(ServiceMetrics::new("llm-router")),
            reported_retries: AtomicU64::new(0),
        }
    }

    /// Fold the router's retry count into the exported counter.
    fn sync_retry_metric(&self) {
        let total = self.router.retries_total();
        let reported = self.reported_retries.swap(total, Ordering::Relaxed);
        if total > reported {
            self.metrics.llm_retries.inc_by(total - reported);
        }
    }
}

#[derive(Debug, Deserialize)]
struct EmbedBody {
    texts: Vec<String>,
}

/// Build the LLM router's HTTP surface.
pub fn llm_router_api(state: Arc<LlmApiState>) -> Router {
    Router::new()
        .route("/generate", post(generate))
        .route("/embed", post(embed))
        .route("/models", get(models))
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .layer(bugbot_service::cors_layer(
            &bugbot_core::config::dashboard_origins(),
        ))
        .with_state(state)
}

async fn generate(
    State(state): State<Arc<LlmApiState>>,
    Json(task): Json<LlmTask>,
) -> ApiResult<Json<Value>> {
    let response = state.router.generate(&task).await?;
    Ok(Json(json!({
        "response": response.text,
        "model_used": response.model_used,
        "model_type": response.model_type,
        "tokens_used": response.tokens_used,
        "metadata": {"task_type": task.task_type},
    })))
}

async fn embed(
    State(state): State<Arc<LlmApiState>>,
    Json(body): Json<EmbedBody>,
) -> ApiResult<Json<Value>> {
    let embeddings = state.router.embed(&body.texts).await?;
    let dimensions = embeddings.first().map(Vec::len).unwrap_or(0);
    let snapshot = state.router.models();
    let model_used = snapshot
        .models
        .iter()
        .find(|m| m.backend == crate::BackendKind::Embeddings)
        .map(|m| m.model.clone())
        .unwrap_or_default();
    Ok(Json(json!({
        "embeddings": embeddings,
        "model_used": model_used,
        "dimensions": dimensions,
    })))
}

async fn models(State(state): State<Arc<LlmApiState>>) -> Json<crate::ModelsSnapshot> {
    Json(state.router.models())
}

async fn health(State(state): State<Arc<LlmApiState>>) -> Json<Value> {
    let router_health = state.router.health().await;
    let status = match router_health.status.as_str() {
        "healthy" => HealthStatus::Healthy,
        "degraded" => HealthStatus::Degraded,
        _ => HealthStatus::Down,
    };
    state.metrics.set_health(status);
    Json(json!({
        "service": "llm-router",
        "ollama": router_health.ollama,
        "claude": router_health.claude,
        "status": router_health.status,
    }))
}

async fn metrics(State(state): State<Arc<LlmApiState>>) -> String {
    state.sync_retry_metric();
    state.metrics.render()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{RateLimitConfig, RateLimiter, RoutingTable};
    use tower::util::ServiceExt;

    fn api_router() -> Router {
        let router = Arc::new(LlmRouter::new(
            RoutingTable::builtin(),
            None,
            None,
            RateLimiter::new(RateLimitConfig::unlimited()),
        ));
        llm_router_api(Arc::new(LlmApiState::new(router)))
    }

    #[tokio::test]
    async fn generate_without_backends_is_503() {
        let response = api_router()
            .oneshot(
                axum::http::Request::builder()
                    .method("POST")
                    .uri("/generate")
                    .header("content-type", "application/json")
                    .body(axum::body::Body::from(
                        serde_json::json!({"task_type": "fast_triage", "prompt": "hi"}).to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 503);
    }

    #[tokio::test]
    async fn models_and_health_respond() {
        let router = api_router();
        for uri in ["/models", "/health", "/metrics"] {
            let response = router
                .clone()
                .oneshot(
                    axum::http::Request::builder()
                        .uri(uri)
                        .body(axum::body::Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();
            assert_eq!(response.status().as_u16(), 200, "{uri}");
        }
    }
}
