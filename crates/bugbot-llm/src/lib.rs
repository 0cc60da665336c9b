//! Rule-based LLM task router
//!
//! Accepts a typed task and returns a completion, choosing a backend by
//! matching the task type against an ordered rule table. Local backends are
//! retried with exponential backoff and fall back once to the hosted backend;
//! the hosted backend exhausts its own retries with no further fallback.
//!
//! # Features
//! - Routing rules as data (TOML), first match wins, deterministic
//! - Retry with backoff and jitter; transient-only
//! - Single local→cloud fallback (never for embeddings)
//! - Embeddings with uniform dimension
//! - Token-bucket rate limiting on outbound requests

#![warn(missing_docs)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

pub mod api;
pub mod backends;
pub mod extract;
pub mod rate_limit;
pub mod routes;
mod types;

pub use backends::{CloudBackend, LocalBackend, LocalModels};
pub use extract::extract_json_object;
pub use rate_limit::{RateLimitConfig, RateLimiter};
pub use routes::RoutingTable;
pub use types::*;

use secrecy::SecretString;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

/// Attempts per backend before giving up
const MAX_ATTEMPTS: u32 = 3;

/// Errors from the LLM router
#[derive(Debug, Error)]
pub enum LlmError {
    /// Every eligible backend was exhausted
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    /// A transient failure worth retrying (timeout, 5xx, connection refused)
    #[error("transient backend error: {0}")]
    Transient(String),

    /// A 400-class rejection, surfaced directly without retries
    #[error("backend rejected request ({status}): {message}")]
    Rejected {
        /// HTTP status returned by the backend
        status: u16,
        /// Redacted backend message
        message: String,
    },

    /// The backend answered with an unusable body
    #[error("malformed backend response: {0}")]
    Malformed(String),

    /// Routing table or backend configuration problem
    #[error("llm configuration error: {0}")]
    Config(String),
}

impl From<LlmError> for bugbot_core::Error {
    fn from(err: LlmError) -> Self {
        match err {
            LlmError::BackendUnavailable(_) | LlmError::Transient(_) => {
                bugbot_core::Error::BackendUnavailable(err.to_string())
            }
            LlmError::Rejected { .. } => bugbot_core::Error::InvalidRequest(err.to_string()),
            LlmError::Malformed(_) | LlmError::Config(_) => {
                bugbot_core::Error::internal(err.to_string())
            }
        }
    }
}

/// The router: rule table plus the configured backends
pub struct LlmRouter {
    table: RoutingTable,
    local: Option<LocalBackend>,
    cloud: Option<CloudBackend>,
    limiter: RateLimiter,
    retries: AtomicU64,
}

impl LlmRouter {
    /// Assemble a router from its parts. Either backend may be absent.
    pub fn new(
        table: RoutingTable,
        local: Option<LocalBackend>,
        cloud: Option<CloudBackend>,
        limiter: RateLimiter,
    ) -> Self {
        Self {
            table,
            local,
            cloud,
            limiter,
            retries: AtomicU64::new(0),
        }
    }

    /// Router from `LLM_LOCAL_URL`, `LLM_CLOUD_API_KEY`, and `LLM_ROUTES_PATH`.
    pub fn from_env() -> Result<Self, LlmError> {
        let table = RoutingTable::from_env()?;
        let local = bugbot_core::config::env_opt("LLM_LOCAL_URL")
            .map(|url| LocalBackend::new(url, LocalModels::from_env()));
        let cloud = bugbot_core::config::env_opt("LLM_CLOUD_API_KEY").map(|key| {
            CloudBackend::new(
                SecretString::new(key.into()),
                bugbot_core::config::env_opt("LLM_CLOUD_URL"),
                bugbot_core::config::env_opt("LLM_CLOUD_MODEL"),
            )
        });
        if local.is_none() && cloud.is_none() {
            warn!("no LLM backend configured; generation will fail until one is set");
        }
        Ok(Self::new(table, local, cloud, RateLimiter::default()))
    }

    /// Total retry attempts performed, for the metrics surface.
    pub fn retries_total(&self) -> u64 {
        self.retries.load(Ordering::Relaxed)
    }

    /// Run a task on the backend its type routes to.
    #[instrument(skip(self, task), fields(task_type = %task.task_type))]
    pub async fn generate(&self, task: &LlmTask) -> Result<LlmResponse, LlmError> {
        let kind = self.table.route(&task.task_type);
        debug!("routed to {}", kind);

        if kind == BackendKind::CloudFinalReasoning {
            return self.generate_cloud(task).await;
        }

        match &self.local {
            Some(local) => {
                match self.attempt_local(local, kind, task).await {
                    Ok(response) => Ok(response),
                    // Embeddings have no fallback; everything else gets one
                    // shot at the cloud before giving up.
                    Err(err) if kind != BackendKind::Embeddings && self.cloud.is_some() => {
                        warn!("local backend exhausted ({err}), falling back to cloud");
                        self.generate_cloud(task).await
                    }
                    Err(err) => Err(exhausted(err)),
                }
            }
            None if kind != BackendKind::Embeddings && self.cloud.is_some() => {
                self.generate_cloud(task).await
            }
            None => Err(LlmError::BackendUnavailable(
                "no local backend configured".to_string(),
            )),
        }
    }

    /// Embed texts with the local embedding model.
    #[instrument(skip(self, texts), fields(count = texts.len()))]
    pub async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
        let local = self.local.as_ref().ok_or_else(|| {
            LlmError::BackendUnavailable("no local backend configured".to_string())
        })?;

        let mut last_err = None;
        for attempt in 0..MAX_ATTEMPTS {
            self.limiter.acquire(None).await;
            match local.embed_once(texts).await {
                Ok(vectors) => return Ok(vectors),
                Err(LlmError::Transient(msg)) => {
                    self.retries.fetch_add(1, Ordering::Relaxed);
                    last_err = Some(msg);
                    if attempt + 1 < MAX_ATTEMPTS {
                        tokio::time::sleep(backends::retry_backoff(attempt)).await;
                    }
                }
                Err(other) => return Err(other),
            }
        }
        Err(LlmError::BackendUnavailable(
            last_err.unwrap_or_else(|| "embedding backend exhausted".to_string()),
        ))
    }

    /// Health surface: probes the local endpoint, checks the cloud key.
    pub async fn health(&self) -> RouterHealth {
        let ollama = match &self.local {
            Some(local) if local.probe().await => LocalHealth::Connected,
            _ => LocalHealth::Disconnected,
        };
        let claude = if self.cloud.is_some() {
            CloudHealth::Configured
        } else {
            CloudHealth::Missing
        };
        let status = match (ollama, claude) {
            (LocalHealth::Connected, CloudHealth::Configured) => "healthy",
            (LocalHealth::Disconnected, CloudHealth::Missing) => "unavailable",
            _ => "degraded",
        };
        RouterHealth {
            ollama,
            claude,
            status: status.to_string(),
        }
    }

    /// Secret-free routing configuration snapshot.
    pub fn models(&self) -> ModelsSnapshot {
        let mut models = Vec::new();
        if let Some(local) = &self.local {
            let names = local.models();
            for (kind, model) in [
                (BackendKind::DeepReasoning, &names.deep_reasoning),
                (BackendKind::CodeAnalysis, &names.code_analysis),
                (BackendKind::FastTriage, &names.fast_triage),
                (BackendKind::Embeddings, &names.embeddings),
            ] {
                models.push(ModelBinding {
                    backend: kind,
                    model: model.clone(),
                    available: true,
                });
            }
        }
        models.push(ModelBinding {
            backend: BackendKind::CloudFinalReasoning,
            model: self
                .cloud
                .as_ref()
                .map(|c| c.model().to_string())
                .unwrap_or_default(),
            available: self.cloud.is_some(),
        });
        ModelsSnapshot {
            rules: self.table.snapshot(),
            default_backend: self.table.default_backend(),
            models,
        }
    }

    async fn attempt_local(
        &self,
        local: &LocalBackend,
        kind: BackendKind,
        task: &LlmTask,
    ) -> Result<LlmResponse, LlmError> {
        let mut last_err = None;
        for attempt in 0..MAX_ATTEMPTS {
            self.limiter.acquire(Some(task.max_tokens)).await;
            match local.generate_once(kind, task).await {
                Ok(response) => {
                    info!(
                        "completed '{}' on {} ({:?} tokens)",
                        task.task_type, response.model_used, response.tokens_used
                    );
                    return Ok(response);
                }
                Err(LlmError::Transient(msg)) => {
                    self.retries.fetch_add(1, Ordering::Relaxed);
                    debug!("attempt {} failed: {}", attempt + 1, msg);
                    last_err = Some(LlmError::Transient(msg));
                    if attempt + 1 < MAX_ATTEMPTS {
                        tokio::time::sleep(backends::retry_backoff(attempt)).await;
                    }
                }
                Err(other) => return Err(other),
            }
        }
        Err(last_err.unwrap_or_else(|| LlmError::Transient("no attempts made".to_string())))
    }

    async fn generate_cloud(&self, task: &LlmTask) -> Result<LlmResponse, LlmError> {
        let cloud = self.cloud.as_ref().ok_or_else(|| {
            LlmError::BackendUnavailable("cloud backend not configured".to_string())
        })?;

        let mut last_err = None;
        for attempt in 0..MAX_ATTEMPTS {
            self.limiter.acquire(Some(task.max_tokens)).await;
            match cloud.generate_once(task).await {
                Ok(response) => return Ok(response),
                Err(LlmError::Transient(msg)) => {
                    self.retries.fetch_add(1, Ordering::Relaxed);
                    last_err = Some(msg);
                    if attempt + 1 < MAX_ATTEMPTS {
                        tokio::time::sleep(backends::retry_backoff(attempt)).await;
                    }
                }
                Err(other) => return Err(other),
            }
        }
        Err(LlmError::BackendUnavailable(
            last_err.unwrap_or_else(|| "cloud backend exhausted".to_string()),
        ))
    }
}

fn exhausted(err: LlmError) -> LlmError {
    match err {
        LlmError::Transient(msg) => LlmError::BackendUnavailable(msg),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn router_with(local_url: Option<String>, cloud_url: Option<String>) -> LlmRouter {
        let local = local_url.map(|url| LocalBackend::new(url, LocalModels::default()));
        let cloud = cloud_url.map(|url| {
            CloudBackend::new(
                SecretString::new("test-key".into()),
                Some(url),
                Some("hosted-test-model".to_string()),
            )
        });
        LlmRouter::new(
            RoutingTable::builtin(),
            local,
            cloud,
            RateLimiter::new(RateLimitConfig::unlimited()),
        )
    }

    fn local_completion(text: &str) -> String {
        format!(
            r#"{{"choices":[{{"message":{{"role":"assistant","content":"{text}"}}}}],"usage":{{"total_tokens":10}}}}"#
        )
    }

    fn cloud_completion(text: &str) -> String {
        format!(
            r#"{{"content":[{{"type":"text","text":"{text}"}}],"usage":{{"input_tokens":5,"output_tokens":7}}}}"#
        )
    }

    #[tokio::test]
    async fn routes_generate_to_the_local_backend() -> anyhow::Result<()> {
        let mut local = mockito::Server::new_async().await;
        local
            .mock("POST", "/v1/chat/completions")
            .with_status(200)
            .with_body(local_completion("keep"))
            .create_async()
            .await;

        let router = router_with(Some(local.url()), None);
        let response = router
            .generate(&LlmTask::new("fast_triage", "keep or drop?"))
            .await?;
        assert_eq!(response.text, "keep");
        assert_eq!(response.model_type, BackendKind::FastTriage);
        Ok(())
    }

    #[tokio::test]
    async fn local_exhaustion_falls_back_to_cloud_once() -> anyhow::Result<()> {
        let mut local = mockito::Server::new_async().await;
        let mut cloud = mockito::Server::new_async().await;
        let local_mock = local
            .mock("POST", "/v1/chat/completions")
            .with_status(503)
            .expect(3)
            .create_async()
            .await;
        cloud
            .mock("POST", "/v1/messages")
            .with_status(200)
            .with_body(cloud_completion("fallback answer"))
            .create_async()
            .await;

        let router = router_with(Some(local.url()), Some(cloud.url()));
        let response = router
            .generate(&LlmTask::new("smart_contract_analysis", "analyze"))
            .await?;
        assert_eq!(response.text, "fallback answer");
        assert_eq!(response.model_type, BackendKind::CloudFinalReasoning);
        assert_eq!(router.retries_total(), 3);
        local_mock.assert_async().await;
        Ok(())
    }

    #[tokio::test]
    async fn rejected_requests_surface_without_retry() -> anyhow::Result<()> {
        let mut local = mockito::Server::new_async().await;
        let mock = local
            .mock("POST", "/v1/chat/completions")
            .with_status(400)
            .with_body("prompt too long")
            .expect(1)
            .create_async()
            .await;

        let router = router_with(Some(local.url()), None);
        let err = router
            .generate(&LlmTask::new("fast_triage", "x"))
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::Rejected { status: 400, .. }));
        mock.assert_async().await;
        Ok(())
    }

    #[tokio::test]
    async fn embeddings_never_fall_back_to_cloud() -> anyhow::Result<()> {
        let mut local = mockito::Server::new_async().await;
        let mut cloud = mockito::Server::new_async().await;
        local
            .mock("POST", "/v1/chat/completions")
            .with_status(500)
            .expect(3)
            .create_async()
            .await;
        let cloud_mock = cloud
            .mock("POST", "/v1/messages")
            .expect(0)
            .create_async()
            .await;

        let router = router_with(Some(local.url()), Some(cloud.url()));
        let err = router
            .generate(&LlmTask::new("embed_sources", "vectorize"))
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::BackendUnavailable(_)));
        cloud_mock.assert_async().await;
        Ok(())
    }

    #[tokio::test]
    async fn embed_returns_uniform_vectors() -> anyhow::Result<()> {
        let mut local = mockito::Server::new_async().await;
        local
            .mock("POST", "/v1/embeddings")
            .with_status(200)
            .with_body(r#"{"data":[{"embedding":[0.1,0.2,0.3]},{"embedding":[0.4,0.5,0.6]}]}"#)
            .create_async()
            .await;

        let router = router_with(Some(local.url()), None);
        let vectors = router.embed(&["a".to_string(), "b".to_string()]).await?;
        assert_eq!(vectors.len(), 2);
        assert!(vectors.iter().all(|v| v.len() == 3));
        Ok(())
    }

    #[tokio::test]
    async fn health_reflects_backend_presence() {
        let router = router_with(None, None);
        let health = router.health().await;
        assert_eq!(health.ollama, LocalHealth::Disconnected);
        assert_eq!(health.claude, CloudHealth::Missing);
        assert_eq!(health.status, "unavailable");
    }

    #[test]
    fn models_snapshot_contains_no_secrets() {
        let router = router_with(None, Some("https://cloud.example.test".to_string()));
        let snapshot = router.models();
        let text = serde_json::to_string(&snapshot).unwrap();
        assert!(!text.contains("test-key"));
        assert!(text.contains("hosted-test-model"));
    }
}
