//! Triage stage worker
//!
//! Fuses the candidates produced by static, fuzzing, and monitoring through a
//! three-tier LLM cascade: a fast keep/drop filter, deep root-cause
//! reasoning, and a final user-facing classification. A Tier-2 or Tier-3
//! failure demotes the finding to the Tier-1 result with
//! `triage_status=degraded`; it never fails the stage.

use crate::analyzers::parse_severity;
use crate::worker::{StageRequest, StageWorker};
use async_trait::async_trait;
use bugbot_core::models::{
    Confidence, FilteredCandidate, Finding, FindingSource, FindingsSummary, Stage, StageResult,
    StageStatus, TriageOutput, TriageStatus,
};
use bugbot_core::Result;
use bugbot_llm::{extract_json_object, LlmRouter, LlmTask};
use bugbot_service::ServiceMetrics;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// The triage stage worker
pub struct TriageWorker {
    llm: Arc<LlmRouter>,
    metrics: Arc<ServiceMetrics>,
}

#[derive(Debug, Deserialize)]
struct Tier1Verdict {
    keep: bool,
    #[serde(default)]
    severity: Option<String>,
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Tier2Analysis {
    #[serde(default)]
    root_cause: Option<String>,
    #[serde(default)]
    exploitability: Option<String>,
    #[serde(default)]
    severity: Option<String>,
    #[serde(default)]
    confidence: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Tier3Report {
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    recommendation: Option<String>,
    #[serde(default)]
    cvss_estimate: Option<f32>,
    #[serde(default)]
    immunefi_severity: Option<String>,
    #[serde(default)]
    hackenproof_severity: Option<String>,
    #[serde(default)]
    reproduction_steps: Vec<String>,
}

enum Tier1Outcome {
    Keep { severity: Option<String> },
    Drop { reason: String },
}

impl TriageWorker {
    /// Worker over the given router and metrics registry.
    pub fn new(llm: Arc<LlmRouter>, metrics: Arc<ServiceMetrics>) -> Self {
        Self { llm, metrics }
    }

    fn candidates(request: &StageRequest) -> Vec<Finding> {
        let mut candidates = Vec::new();
        for result in request.prior.values() {
            match result {
                StageResult::Static(o) => candidates.extend(o.findings.iter().cloned()),
                StageResult::Fuzzing(o) => candidates.extend(o.findings.iter().cloned()),
                StageResult::Monitoring(o) => candidates.extend(o.findings.iter().cloned()),
                _ => {}
            }
        }
        candidates
    }

    async fn tier1(&self, finding: &Finding) -> Tier1Outcome {
        let task = LlmTask::new(
            "fast_triage",
            format!(
                "Is this smart-contract finding worth deeper analysis? Answer as JSON \
                 {{\"keep\": bool, \"severity\": \"critical|high|medium|low|info\", \
                 \"reason\": string}}.\n\nTitle: {}\nSeverity: {}\nDescription: {}",
                finding.title, finding.severity, finding.description
            ),
        );
        match self.llm.generate(&task).await {
            Ok(response) => {
                let verdict = extract_json_object(&response.text)
                    .and_then(|json| serde_json::from_str::<Tier1Verdict>(&json).ok());
                match verdict {
                    Some(Tier1Verdict { keep: false, reason, .. }) => Tier1Outcome::Drop {
                        reason: reason.unwrap_or_else(|| "filtered by fast triage".to_string()),
                    },
                    Some(Tier1Verdict { severity, .. }) => Tier1Outcome::Keep { severity },
                    None => {
                        debug!("unparseable tier-1 verdict, keeping {}", finding.id);
                        Tier1Outcome::Keep { severity: None }
                    }
                }
            }
            // A tier-1 outage keeps the candidate rather than silently
            // discarding analyzer output.
            Err(e) => {
                warn!("tier-1 unavailable for {}: {}", finding.id, e);
                Tier1Outcome::Keep { severity: None }
            }
        }
    }

    async fn tier2(&self, finding: &Finding) -> Option<Tier2Analysis> {
        let task = LlmTask::new(
            "smart_contract_analysis",
            format!(
                "Analyze this finding. Return JSON {{\"root_cause\": string, \
                 \"exploitability\": string, \"severity\": \"critical|high|medium|low|info\", \
                 \"confidence\": \"high|medium|low\"}}.\n\nTitle: {}\nDescription: {}\nLocation: {}",
                finding.title,
                finding.description,
                finding.location.as_deref().unwrap_or("unknown")
            ),
        );
        let response = self.llm.generate(&task).await.ok()?;
        extract_json_object(&response.text)
            .and_then(|json| serde_json::from_str::<Tier2Analysis>(&json).ok())
    }

    async fn tier3(&self, finding: &Finding, analysis: &Tier2Analysis) -> Option<Tier3Report> {
        let task = LlmTask::new(
            "final_report",
            format!(
                "Write the user-visible classification for this confirmed finding. Return JSON \
                 {{\"description\": string, \"recommendation\": string, \"cvss_estimate\": number, \
                 \"immunefi_severity\": string, \"hackenproof_severity\": string, \
                 \"reproduction_steps\": [string]}}. Reproduction steps must target a forked \
                 network only.\n\nTitle: {}\nRoot cause: {}\nExploitability: {}",
                finding.title,
                analysis.root_cause.as_deref().unwrap_or("unknown"),
                analysis.exploitability.as_deref().unwrap_or("unknown"),
            ),
        );
        let response = self.llm.generate(&task).await.ok()?;
        extract_json_object(&response.text)
            .and_then(|json| serde_json::from_str::<Tier3Report>(&json).ok())
    }

    async fn fuse(&self, index: usize, original: Finding) -> FusedOrFiltered {
        match self.tier1(&original).await {
            Tier1Outcome::Drop { reason } => {
                return FusedOrFiltered::Filtered(FilteredCandidate {
                    finding: original,
                    reason,
                });
            }
            Tier1Outcome::Keep { severity } => {
                let tier1_severity = severity
                    .as_deref()
                    .map(parse_severity)
                    .unwrap_or(original.severity);

                let mut fused = Finding {
                    id: format!("T-{:03}", index + 1),
                    source: FindingSource::TriageFusion,
                    fused_from: vec![original.id.clone()],
                    severity: tier1_severity,
                    triage_status: Some(TriageStatus::Degraded),
                    ..original.clone()
                };

                let Some(analysis) = self.tier2(&original).await else {
                    warn!("tier-2 failed for {}, demoting to tier-1 result", original.id);
                    return FusedOrFiltered::Fused(fused);
                };

                fused.severity = analysis
                    .severity
                    .as_deref()
                    .map(parse_severity)
                    .unwrap_or(tier1_severity);
                fused.confidence = match analysis.confidence.as_deref() {
                    Some("high") => Confidence::High,
                    Some("low") => Confidence::Low,
                    _ => Confidence::Medium,
                };
                if let Some(root_cause) = &analysis.root_cause {
                    fused.impact = Some(root_cause.clone());
                }

                let Some(report) = self.tier3(&original, &analysis).await else {
                    warn!("tier-3 failed for {}, demoting to tier-1 result", original.id);
                    return FusedOrFiltered::Fused(fused);
                };

                if let Some(description) = report.description {
                    fused.description = description;
                }
                fused.recommendation = report.recommendation.or(fused.recommendation);
                fused.cvss_estimate = report.cvss_estimate;
                fused.immunefi_severity = report.immunefi_severity;
                fused.hackenproof_severity = report.hackenproof_severity;
                fused.reproduction_steps = report.reproduction_steps;
                fused.triage_status = Some(TriageStatus::Full);
                FusedOrFiltered::Fused(fused)
            }
        }
    }
}

enum FusedOrFiltered {
    Fused(Finding),
    Filtered(FilteredCandidate),
}

#[async_trait]
impl StageWorker for TriageWorker {
    fn stage(&self) -> Stage {
        Stage::Triage
    }

    async fn run(&self, request: StageRequest) -> Result<StageResult> {
        let candidates = Self::candidates(&request);
        info!("triaging {} candidate(s)", candidates.len());

        let fusions = candidates
            .into_iter()
            .enumerate()
            .map(|(idx, finding)| self.fuse(idx, finding));
        let results = futures::future::join_all(fusions).await;

        let mut findings = Vec::new();
        let mut filtered = Vec::new();
        for result in results {
            match result {
                FusedOrFiltered::Fused(finding) => findings.push(finding),
                FusedOrFiltered::Filtered(candidate) => filtered.push(candidate),
            }
        }

        let summary = FindingsSummary::aggregate(&findings);
        for finding in &findings {
            self.metrics
                .findings_total
                .with_label_values(&[finding.severity.as_str()])
                .inc();
        }
        info!(
            "triage fused {} finding(s), filtered {}",
            findings.len(),
            filtered.len()
        );

        Ok(StageResult::Triage(TriageOutput {
            findings,
            filtered,
            summary,
            stage_status: StageStatus::Complete,
        }))
    }

    async fn dependencies(&self) -> Vec<(String, bool)> {
        let llm_up = self.llm.health().await.status != "unavailable";
        vec![("llm_router".to_string(), llm_up)]
    }
}
