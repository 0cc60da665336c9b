//! Reporting stage worker
//!
//! Renders the fused findings into the three standard formats (Immunefi
//! markdown, HackenProof markdown, JSON), writes them as artifacts under the
//! reports directory, and dispatches configured notification channels.
//! Rendering a subset is driven by `report_formats`; notification failures
//! are recorded, never raised.

use crate::notify::Notifier;
use crate::worker::{StageRequest, StageWorker};
use async_trait::async_trait;
use bugbot_core::models::{
    Finding, FindingsSummary, ReportArtifact, ReportFormat, ReportingOutput, Stage, StageResult,
    StageStatus, TriageOutput,
};
use bugbot_core::{Error, Result};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// The reporting stage worker
pub struct ReportingWorker {
    output_root: PathBuf,
    notifier: Arc<dyn Notifier>,
}

impl ReportingWorker {
    /// Worker writing artifacts under `output_root`.
    pub fn new(output_root: PathBuf, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            output_root,
            notifier,
        }
    }

    /// Worker configured from `REPORTS_DIR` (default `./bugbot-reports`).
    pub fn from_env(notifier: Arc<dyn Notifier>) -> Self {
        let root = bugbot_core::config::env_opt("REPORTS_DIR")
            .unwrap_or_else(|| "./bugbot-reports".to_string());
        Self::new(PathBuf::from(root), notifier)
    }

    /// Render one format for a scan.
    pub fn render(
        &self,
        format: ReportFormat,
        scan_id: &str,
        triage: &TriageOutput,
    ) -> Result<String> {
        match format {
            ReportFormat::Immunefi => Ok(render_immunefi(scan_id, triage)),
            ReportFormat::Hackenproof => Ok(render_hackenproof(scan_id, triage)),
            ReportFormat::Json => {
                let doc = json!({
                    "scan_id": scan_id,
                    "findings": triage.findings,
                    "filtered": triage.filtered,
                    "summary": triage.summary,
                });
                serde_json::to_string_pretty(&doc).map_err(Error::from)
            }
        }
    }

    fn file_name(format: ReportFormat) -> &'static str {
        match format {
            ReportFormat::Immunefi => "immunefi.md",
            ReportFormat::Hackenproof => "hackenproof.md",
            ReportFormat::Json => "report.json",
        }
    }
}

fn severity_section(findings: &[Finding]) -> String {
    let mut out = String::new();
    for finding in findings {
        out.push_str(&format!(
            "### {} — {}\n\n**Severity:** {}  \n**Confidence:** {:?}  \n",
            finding.id, finding.title, finding.severity, finding.confidence
        ));
        if let Some(cvss) = finding.cvss_estimate {
            out.push_str(&format!("**CVSS estimate:** {cvss:.1}  \n"));
        }
        if let Some(location) = &finding.location {
            out.push_str(&format!("**Location:** `{location}`  \n"));
        }
        out.push_str(&format!("\n{}\n\n", finding.description));
        if let Some(impact) = &finding.impact {
            out.push_str(&format!("**Impact**\n\n{impact}\n\n"));
        }
        if let Some(recommendation) = &finding.recommendation {
            out.push_str(&format!("**Recommendation**\n\n{recommendation}\n\n"));
        }
        if !finding.reproduction_steps.is_empty() {
            out.push_str("**Reproduction (forked network only)**\n\n");
            for (idx, step) in finding.reproduction_steps.iter().enumerate() {
                out.push_str(&format!("{}. {}\n", idx + 1, step));
            }
            out.push('\n');
        }
        if let Some(poc) = &finding.proof_of_concept {
            out.push_str(&format!("**Proof of Concept**\n\n```solidity\n{poc}\n```\n\n"));
        }
    }
    out
}

fn summary_table(summary: &FindingsSummary) -> String {
    format!(
        "| Severity | Count |\n|---|---:|\n| Critical | {} |\n| High | {} |\n| Medium | {} |\n| Low | {} |\n| Info | {} |\n\n",
        summary.critical, summary.high, summary.medium, summary.low, summary.info
    )
}

fn render_immunefi(scan_id: &str, triage: &TriageOutput) -> String {
    let mut md = String::new();
    md.push_str("# Bug Report\n\n");
    md.push_str(&format!("Scan: `{scan_id}`\n\n"));
    md.push_str("## Summary\n\n");
    md.push_str(&summary_table(&triage.summary));
    md.push_str("## Vulnerability Details\n\n");
    md.push_str(&severity_section(&triage.findings));
    md.push_str("## Severity Mapping\n\n");
    for finding in &triage.findings {
        md.push_str(&format!(
            "- {}: Immunefi **{}**\n",
            finding.id,
            finding
                .immunefi_severity
                .as_deref()
                .unwrap_or(finding.severity.as_str())
        ));
    }
    md.push('\n');
    md
}

fn render_hackenproof(scan_id: &str, triage: &TriageOutput) -> String {
    let mut md = String::new();
    md.push_str("# Vulnerability Report\n\n");
    md.push_str(&format!("Program scan: `{scan_id}`\n\n"));
    md.push_str("## Overview\n\n");
    md.push_str(&summary_table(&triage.summary));
    md.push_str("## Findings\n\n");
    md.push_str(&severity_section(&triage.findings));
    md.push_str("## Severity Mapping\n\n");
    for finding in &triage.findings {
        md.push_str(&format!(
            "- {}: HackenProof **{}**\n",
            finding.id,
            finding
                .hackenproof_severity
                .as_deref()
                .unwrap_or(finding.severity.as_str())
        ));
    }
    md.push('\n');
    md
}

#[async_trait]
impl StageWorker for ReportingWorker {
    fn stage(&self) -> Stage {
        Stage::Reporting
    }

    async fn run(&self, request: StageRequest) -> Result<StageResult> {
        let Some(StageResult::Triage(triage)) = request.prior.get(&Stage::Triage) else {
            return Err(Error::StageFailure {
                stage: Stage::Reporting.to_string(),
                cause: "triage output missing".to_string(),
            });
        };

        let scan_dir = self.output_root.join(&request.scan_id);
        tokio::fs::create_dir_all(&scan_dir).await?;

        let mut artifacts = Vec::new();
        let mut report_errors = Vec::new();

        for format in &request.scan_config.report_formats {
            match self.render(*format, &request.scan_id, triage) {
                Ok(document) => {
                    let path = scan_dir.join(Self::file_name(*format));
                    match tokio::fs::write(&path, document).await {
                        Ok(()) => {
                            info!("wrote {:?} report to {}", format, path.display());
                            artifacts.push(ReportArtifact {
                                format: *format,
                                path: path.to_string_lossy().to_string(),
                            });
                        }
                        Err(e) => report_errors.push(format!("{format:?}: write failed: {e}")),
                    }
                }
                Err(e) => report_errors.push(format!("{format:?}: render failed: {e}")),
            }
        }

        let summary_line = format!(
            "{} findings ({} critical, {} high)",
            triage.summary.total(),
            triage.summary.critical,
            triage.summary.high
        );
        for channel in &request.scan_config.notify_channels {
            if let Err(e) = self
                .notifier
                .notify(*channel, &request.scan_id, &summary_line)
                .await
            {
                warn!("notification via {:?} failed: {}", channel, e);
                report_errors.push(format!("{channel:?}: {e}"));
            }
        }

        let stage_status = if report_errors.is_empty() {
            StageStatus::Complete
        } else {
            StageStatus::Partial
        };
        Ok(StageResult::Reporting(ReportingOutput {
            artifacts,
            report_errors,
            stage_status,
        }))
    }
}
