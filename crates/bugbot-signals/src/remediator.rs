//! Remediation drafts
//!
//! Generates a candidate patch with an explanation and confidence through
//! the LLM router. With a configured GitHub adapter and a valid admin token,
//! the patch lands on a `fix/<type>-<finding_id>` branch behind a draft PR.

use async_trait::async_trait;
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::{Json, Router};
use bugbot_core::models::Finding;
use bugbot_core::{Error, Result};
use bugbot_llm::{extract_json_object, LlmRouter, LlmTask};
use bugbot_service::error::ApiResult;
use bugbot_service::{require_admin, HealthReport, ServiceMetrics};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

/// A drafted remediation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Remediation {
    /// Unified diff or replacement snippet
    pub patch: String,
    /// Why the patch addresses the root cause
    pub explanation: String,
    /// Drafting confidence in 0.0..=1.0
    pub confidence: f64,
    /// PR reference when one was opened
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pull_request: Option<PrRef>,
}

/// Reference to an opened draft PR
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrRef {
    /// Branch the patch landed on
    pub branch: String,
    /// PR URL
    pub url: String,
}

/// GitHub access used for draft-PR creation
#[async_trait]
pub trait GithubAdapter: Send + Sync {
    /// Create a branch carrying the patch and open a draft PR.
    async fn open_draft_pr(
        &self,
        branch: &str,
        title: &str,
        body: &str,
        patch: &str,
    ) -> Result<PrRef>;
}

#[derive(Debug, Deserialize)]
struct PatchPayload {
    #[serde(default)]
    patch: Option<String>,
    #[serde(default)]
    explanation: Option<String>,
    #[serde(default)]
    confidence: Option<f64>,
}

/// The remediator service
pub struct Remediator {
    llm: Arc<LlmRouter>,
    github: Option<Arc<dyn GithubAdapter>>,
}

impl Remediator {
    /// Service over the router, optionally with GitHub access.
    pub fn new(llm: Arc<LlmRouter>, github: Option<Arc<dyn GithubAdapter>>) -> Self {
        Self { llm, github }
    }

    /// Draft a patch for a finding.
    pub async fn propose(&self, finding: &Finding) -> Result<Remediation> {
        let task = LlmTask::new(
            "code_review",
            format!(
                "Draft a minimal patch for this smart-contract finding. Return JSON \
                 {{\"patch\": string, \"explanation\": string, \"confidence\": number}}.\n\n\
                 Title: {}\nType: {}\nDescription: {}\nLocation: {}",
                finding.title,
                finding.finding_type.as_str(),
                finding.description,
                finding.location.as_deref().unwrap_or("unknown"),
            ),
        );
        let response = self.llm.generate(&task).await?;
        let payload = extract_json_object(&response.text)
            .and_then(|text| serde_json::from_str::<PatchPayload>(&text).ok())
            .ok_or_else(|| {
                Error::internal("remediation draft was not parseable".to_string())
            })?;

        Ok(Remediation {
            patch: payload
                .patch
                .ok_or_else(|| Error::internal("draft carried no patch".to_string()))?,
            explanation: payload
                .explanation
                .unwrap_or_else(|| "see patch".to_string()),
            confidence: payload.confidence.unwrap_or(0.5).clamp(0.0, 1.0),
            pull_request: None,
        })
    }

    /// Draft and, when authorized and configured, open a draft PR.
    pub async fn propose_with_pr(
        &self,
        finding: &Finding,
        open_pr: bool,
    ) -> Result<Remediation> {
        let mut remediation = self.propose(finding).await?;
        if !open_pr {
            return Ok(remediation);
        }

        let Some(github) = &self.github else {
            warn!("PR requested but no GitHub adapter configured");
            return Ok(remediation);
        };

        let branch = format!("fix/{}-{}", finding.finding_type.as_str(), finding.id).to_lowercase();
        let title = format!("Fix: {}", finding.title);
        let pr = github
            .open_draft_pr(&branch, &title, &remediation.explanation, &remediation.patch)
            .await?;
        info!("opened draft PR {} on {}", pr.url, pr.branch);
        remediation.pull_request = Some(pr);
        Ok(remediation)
    }
}

/// Router state
pub struct RemediatorState {
    /// The remediation service
    pub service: Remediator,
    /// Admin token; PR creation is an admin mutation
    pub admin_token: SecretString,
    /// Metrics registry
    pub metrics: Arc<ServiceMetrics>,
}

#[derive(Debug, Deserialize)]
struct RemediateBody {
    finding: Finding,
}

#[derive(Debug, Default, Deserialize)]
struct RemediateParams {
    #[serde(default)]
    open_pr: bool,
}

/// Build the remediator router.
pub fn remediator_router(state: Arc<RemediatorState>) -> Router {
    Router::new()
        .route("/remediate", post(remediate))
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .layer(bugbot_service::cors_layer(
            &bugbot_core::config::dashboard_origins(),
        ))
        .with_state(state)
}

async fn remediate(
    State(state): State<Arc<RemediatorState>>,
    Query(params): Query<RemediateParams>,
    headers: HeaderMap,
    Json(body): Json<RemediateBody>,
) -> ApiResult<Json<Remediation>> {
    if params.open_pr {
        require_admin(&headers, &state.admin_token)?;
    }
    let remediation = state
        .service
        .propose_with_pr(&body.finding, params.open_pr)
        .await?;
    Ok(Json(remediation))
}

async fn health(State(state): State<Arc<RemediatorState>>) -> Json<HealthReport> {
    let report = HealthReport::healthy("remediator");
    state.metrics.set_health(report.status);
    Json(report)
}

async fn metrics(State(state): State<Arc<RemediatorState>>) -> String {
    state.metrics.render()
}
