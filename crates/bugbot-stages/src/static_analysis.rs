//! Static analysis stage worker
//!
//! Writes the recon sources to a working directory, runs every configured
//! analyzer in parallel with individual timeouts, normalizes their output
//! into findings, and asks the LLM router to summarize the aggregate. One
//! analyzer failing degrades the stage to partial; all of them failing is
//! fatal.

use crate::analyzers::{run_analyzer, AnalyzerConfig};
use crate::worker::{StageRequest, StageWorker};
use async_trait::async_trait;
use bugbot_core::models::{
    Confidence, Finding, FindingKind, FindingSource, RawFinding, Stage, StageResult, StageStatus,
    StaticOutput,
};
use bugbot_core::{Error, Result};
use bugbot_llm::{LlmRouter, LlmTask};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// The static stage worker
pub struct StaticWorker {
    analyzers: Vec<AnalyzerConfig>,
    llm: Arc<LlmRouter>,
}

impl StaticWorker {
    /// Worker with an explicit analyzer set.
    pub fn new(analyzers: Vec<AnalyzerConfig>, llm: Arc<LlmRouter>) -> Self {
        Self { analyzers, llm }
    }

    /// Worker configured from `STATIC_ANALYZERS`.
    pub fn from_env(llm: Arc<LlmRouter>) -> Self {
        Self::new(AnalyzerConfig::from_env(), llm)
    }

    async fn write_sources(&self, request: &StageRequest, dir: &Path) -> Result<usize> {
        let Some(StageResult::Recon(recon)) = request.prior.get(&Stage::Recon) else {
            return Err(Error::StageFailure {
                stage: Stage::Static.to_string(),
                cause: "recon output missing".to_string(),
            });
        };
        if recon.contracts.is_empty() {
            return Err(Error::StageFailure {
                stage: Stage::Static.to_string(),
                cause: "recon produced no contract sources".to_string(),
            });
        }

        for contract in &recon.contracts {
            let path = dir.join(&contract.path);
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&path, &contract.source).await?;
        }
        Ok(recon.contracts.len())
    }

    async fn summarize(&self, raw: &[RawFinding]) -> Option<String> {
        if raw.is_empty() {
            return None;
        }
        let listing: String = raw
            .iter()
            .take(40)
            .map(|f| format!("- [{}] {} ({})\n", f.severity, f.title, f.analyzer))
            .collect();
        let task = LlmTask::new(
            "smart_contract_analysis",
            format!(
                "Static analyzers reported the following issues. Summarize the dominant \
                 vulnerability classes and call out anything that looks exploitable.\n\n{listing}"
            ),
        );
        match self.llm.generate(&task).await {
            Ok(response) => Some(response.text),
            Err(e) => {
                warn!("summary generation failed: {}", e);
                None
            }
        }
    }
}

/// Derive the vulnerability class from an analyzer title.
pub fn classify_title(title: &str) -> FindingKind {
    let lower = title.to_lowercase();
    if lower.contains("reentran") {
        FindingKind::Reentrancy
    } else if lower.contains("overflow") || lower.contains("underflow") {
        FindingKind::IntegerOverflow
    } else if lower.contains("access") || lower.contains("owner") || lower.contains("auth") {
        FindingKind::AccessControl
    } else if lower.contains("unchecked") || lower.contains("return value") {
        FindingKind::UncheckedCall
    } else if lower.contains("flash") {
        FindingKind::FlashLoan
    } else if lower.contains("price") || lower.contains("oracle") {
        FindingKind::PriceManipulation
    } else {
        FindingKind::Other
    }
}

fn normalize(raw: &[RawFinding]) -> Vec<Finding> {
    raw.iter()
        .enumerate()
        .map(|(idx, r)| Finding {
            id: format!("S-{:03}", idx + 1),
            finding_type: classify_title(&r.title),
            severity: r.severity,
            confidence: Confidence::Medium,
            title: r.title.clone(),
            description: r.description.clone(),
            impact: None,
            recommendation: None,
            location: r.location.clone(),
            proof_of_concept: None,
            source: FindingSource::Static,
            fused_from: Vec::new(),
            triage_status: None,
            cvss_estimate: None,
            immunefi_severity: None,
            hackenproof_severity: None,
            reproduction_steps: Vec::new(),
        })
        .collect()
}

#[async_trait]
impl StageWorker for StaticWorker {
    fn stage(&self) -> Stage {
        Stage::Static
    }

    async fn run(&self, request: StageRequest) -> Result<StageResult> {
        let workdir = tempfile::tempdir()?;
        let count = self.write_sources(&request, workdir.path()).await?;
        info!("running {} analyzer(s) over {} source file(s)", self.analyzers.len(), count);

        let dir = workdir.path();
        let runs = self
            .analyzers
            .iter()
            .map(|config| async move { (config.name.clone(), run_analyzer(config, dir).await) });
        let results = futures::future::join_all(runs).await;

        let mut raw_findings = Vec::new();
        let mut analyzers_run = Vec::new();
        let mut analyzers_failed = Vec::new();
        for (name, result) in results {
            match result {
                Ok(mut findings) => {
                    raw_findings.append(&mut findings);
                    analyzers_run.push(name);
                }
                Err(e) => {
                    warn!("analyzer {} failed: {}", name, e);
                    analyzers_failed.push(name);
                }
            }
        }

        if analyzers_run.is_empty() {
            return Err(Error::StageFailure {
                stage: Stage::Static.to_string(),
                cause: format!("all analyzers failed: {}", analyzers_failed.join(", ")),
            });
        }

        let findings = normalize(&raw_findings);
        let summary = self.summarize(&raw_findings).await;
        let stage_status = if analyzers_failed.is_empty() {
            StageStatus::Complete
        } else {
            StageStatus::Partial
        };

        Ok(StageResult::Static(StaticOutput {
            findings,
            raw_findings,
            summary,
            analyzers_run,
            analyzers_failed,
            stage_status,
        }))
    }

    async fn dependencies(&self) -> Vec<(String, bool)> {
        let llm_up = self.llm.health().await.status != "unavailable";
        vec![("llm_router".to_string(), llm_up)]
    }
}
