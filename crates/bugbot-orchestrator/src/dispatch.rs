//! Stage dispatch
//!
//! The orchestrator talks to stage workers through this seam. Production uses
//! [`HttpDispatcher`] against the configured worker URLs; single-process
//! deployments and tests use [`InProcessDispatcher`] over worker instances
//! directly. Either way the orchestrator sees the same contract: `Ok` with a
//! stage result (possibly partial), or a fatal error.

use async_trait::async_trait;
use bugbot_core::models::{Stage, StageResult};
use bugbot_core::{Error, Result};
use bugbot_stages::worker::{StageRequest, StageWorker};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// How the orchestrator reaches a stage
#[async_trait]
pub trait StageDispatcher: Send + Sync {
    /// Execute one stage with a deadline.
    async fn dispatch(
        &self,
        stage: Stage,
        request: StageRequest,
        timeout: Duration,
    ) -> Result<StageResult>;

    /// Probe a stage worker's health endpoint.
    async fn probe(&self, stage: Stage) -> bool {
        let _ = stage;
        true
    }
}

/// Dispatch over HTTP to independent worker services
pub struct HttpDispatcher {
    endpoints: HashMap<Stage, String>,
    http: reqwest::Client,
}

impl HttpDispatcher {
    /// Dispatcher over explicit base URLs per stage.
    pub fn new(endpoints: HashMap<Stage, String>) -> Self {
        Self {
            endpoints,
            http: reqwest::Client::new(),
        }
    }

    /// Worker URLs from `STAGE_<NAME>_URL`, defaulting to localhost ports
    /// 8101..8106 in pipeline order.
    pub fn from_env() -> Self {
        let mut endpoints = HashMap::new();
        for (idx, stage) in Stage::ORDER.iter().enumerate() {
            let env_name = format!("STAGE_{}_URL", stage.as_str().to_uppercase());
            let url = bugbot_core::config::env_opt(&env_name)
                .unwrap_or_else(|| format!("http://127.0.0.1:{}", 8101 + idx));
            endpoints.insert(*stage, url);
        }
        Self::new(endpoints)
    }

    fn url_for(&self, stage: Stage) -> Result<String> {
        self.endpoints
            .get(&stage)
            .map(|base| format!("{}/{}", base.trim_end_matches('/'), stage.as_str()))
            .ok_or_else(|| Error::internal(format!("no endpoint configured for {stage}")))
    }
}

#[async_trait]
impl StageDispatcher for HttpDispatcher {
    async fn dispatch(
        &self,
        stage: Stage,
        request: StageRequest,
        timeout: Duration,
    ) -> Result<StageResult> {
        let url = self.url_for(stage)?;
        debug!("dispatching {} to {}", stage, url);

        let response = self
            .http
            .post(&url)
            .timeout(timeout)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::Timeout(format!("{stage} stage"))
                } else {
                    Error::StageFailure {
                        stage: stage.to_string(),
                        cause: format!("worker unreachable: {e}"),
                    }
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let cause = serde_json::from_str::<serde_json::Value>(&body)
                .ok()
                .and_then(|v| v["error"].as_str().map(str::to_string))
                .unwrap_or_else(|| format!("worker returned {status}"));
            return Err(Error::StageFailure {
                stage: stage.to_string(),
                cause,
            });
        }

        response
            .json()
            .await
            .map_err(|e| Error::internal(format!("{stage} response: {e}")))
    }

    async fn probe(&self, stage: Stage) -> bool {
        let Some(base) = self.endpoints.get(&stage) else {
            return false;
        };
        self.http
            .get(format!("{}/health", base.trim_end_matches('/')))
            .timeout(Duration::from_secs(3))
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }
}

/// Dispatch to worker instances in the same process
pub struct InProcessDispatcher {
    workers: HashMap<Stage, Arc<dyn StageWorker>>,
}

impl InProcessDispatcher {
    /// Dispatcher over the given workers.
    pub fn new(workers: Vec<Arc<dyn StageWorker>>) -> Self {
        Self {
            workers: workers.into_iter().map(|w| (w.stage(), w)).collect(),
        }
    }
}

#[async_trait]
impl StageDispatcher for InProcessDispatcher {
    async fn dispatch(
        &self,
        stage: Stage,
        request: StageRequest,
        timeout: Duration,
    ) -> Result<StageResult> {
        let worker = self.workers.get(&stage).ok_or_else(|| Error::StageFailure {
            stage: stage.to_string(),
            cause: "no worker registered".to_string(),
        })?;
        tokio::time::timeout(timeout, worker.run(request))
            .await
            .map_err(|_| Error::Timeout(format!("{stage} stage")))?
    }

    async fn probe(&self, stage: Stage) -> bool {
        self.workers.contains_key(&stage)
    }
}
