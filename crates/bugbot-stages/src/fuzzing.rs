//! Fuzzing stage worker
//!
//! Builds a sandboxed working directory from the recon sources and either
//! runs the repository's own test suite or asks the LLM router to generate
//! property tests, then drives the fuzz harness adapter. Failing properties
//! become findings with shrunk counterexamples attached.

use crate::worker::{StageRequest, StageWorker};
use async_trait::async_trait;
use bugbot_core::models::{
    Confidence, CounterExample, Finding, FindingSource, FuzzingOutput, Stage, StageResult,
    StageStatus,
};
use bugbot_core::{Error, Result};
use bugbot_llm::{LlmRouter, LlmTask};
use serde::Deserialize;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// What a harness run produced
#[derive(Debug, Default, Deserialize)]
pub struct HarnessReport {
    /// Failing properties with shrunk counterexamples
    #[serde(default)]
    pub failed_cases: Vec<CounterExample>,
    /// Coverage, only when the harness measures it
    #[serde(default)]
    pub coverage_percent: Option<f64>,
}

/// Fuzz harness adapter; an external collaborator invoked per run
#[async_trait]
pub trait FuzzHarness: Send + Sync {
    /// Run the harness over a prepared working directory.
    async fn run(&self, workdir: &Path) -> Result<HarnessReport>;
}

/// Subprocess harness: prints a [`HarnessReport`] as JSON on stdout
pub struct CommandHarness {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandHarness {
    /// Adapter for `program args... <workdir>`.
    pub fn new(program: impl Into<String>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            timeout,
        }
    }

    /// From `FUZZ_HARNESS_CMD`, when configured.
    pub fn from_env() -> Option<Self> {
        let raw = bugbot_core::config::env_opt("FUZZ_HARNESS_CMD")?;
        let mut parts = raw.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        Some(Self::new(program, parts.collect(), Duration::from_secs(540)))
    }
}

#[async_trait]
impl FuzzHarness for CommandHarness {
    async fn run(&self, workdir: &Path) -> Result<HarnessReport> {
        debug!("running harness {} in {}", self.program, workdir.display());
        let child = Command::new(&self.program)
            .args(&self.args)
            .arg(workdir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::internal(format!("spawning harness: {e}")))?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| Error::Timeout("fuzz harness".to_string()))??;

        if !output.status.success() {
            return Err(Error::internal(format!(
                "harness exited with {}",
                output.status
            )));
        }

        serde_json::from_slice(&output.stdout)
            .map_err(|e| Error::internal(format!("harness output: {e}")))
    }
}

/// No harness configured; every run fails and the stage degrades to partial.
pub struct NoHarness;

#[async_trait]
impl FuzzHarness for NoHarness {
    async fn run(&self, _workdir: &Path) -> Result<HarnessReport> {
        Err(Error::BackendUnavailable(
            "no fuzz harness configured".to_string(),
        ))
    }
}

/// The fuzzing stage worker
pub struct FuzzingWorker {
    llm: Arc<LlmRouter>,
    harness: Arc<dyn FuzzHarness>,
}

impl FuzzingWorker {
    /// Worker over an explicit harness.
    pub fn new(llm: Arc<LlmRouter>, harness: Arc<dyn FuzzHarness>) -> Self {
        Self { llm, harness }
    }

    /// Worker configured from `FUZZ_HARNESS_CMD`.
    pub fn from_env(llm: Arc<LlmRouter>) -> Self {
        let harness: Arc<dyn FuzzHarness> = match CommandHarness::from_env() {
            Some(harness) => Arc::new(harness),
            None => Arc::new(NoHarness),
        };
        Self::new(llm, harness)
    }

    /// Generate property tests for sources that ship no suite of their own.
    async fn generate_property_tests(&self, request: &StageRequest) -> Option<String> {
        let Some(StageResult::Recon(recon)) = request.prior.get(&Stage::Recon) else {
            return None;
        };
        let entries: String = recon
            .entry_contracts
            .iter()
            .map(|name| format!("- {name}\n"))
            .collect();
        let task = LlmTask::new(
            "code_review",
            format!(
                "Write Foundry invariant tests for the following contracts. Focus on balance \
                 conservation, access control, and reentrancy properties. Return only Solidity.\n\n{entries}"
            ),
        );
        match self.llm.generate(&task).await {
            Ok(response) => Some(response.text),
            Err(e) => {
                warn!("property test generation failed: {}", e);
                None
            }
        }
    }
}

fn findings_from(cases: &[CounterExample]) -> Vec<Finding> {
    cases
        .iter()
        .enumerate()
        .map(|(idx, case)| Finding {
            id: format!("F-{:03}", idx + 1),
            finding_type: crate::static_analysis::classify_title(&case.property),
            severity: bugbot_core::models::Severity::High,
            confidence: Confidence::High,
            title: format!("Property violated: {}", case.property),
            description: format!(
                "Fuzzing found input violating '{}'. Shrunk counterexample: {}",
                case.property, case.shrunk
            ),
            impact: None,
            recommendation: None,
            location: None,
            proof_of_concept: Some(case.shrunk.clone()),
            source: FindingSource::Fuzzing,
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
impl StageWorker for FuzzingWorker {
    fn stage(&self) -> Stage {
        Stage::Fuzzing
    }

    async fn run(&self, request: StageRequest) -> Result<StageResult> {
        let Some(StageResult::Recon(recon)) = request.prior.get(&Stage::Recon) else {
            return Err(Error::StageFailure {
                stage: Stage::Fuzzing.to_string(),
                cause: "recon output missing".to_string(),
            });
        };

        let workdir = tempfile::tempdir()?;
        let mut has_own_suite = false;
        for contract in &recon.contracts {
            let path = workdir.path().join(&contract.path);
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&path, &contract.source).await?;
            if contract.path.contains("test") || contract.path.ends_with(".t.sol") {
                has_own_suite = true;
            }
        }

        if !has_own_suite {
            if let Some(tests) = self.generate_property_tests(&request).await {
                tokio::fs::write(workdir.path().join("Invariants.t.sol"), tests).await?;
            }
        } else {
            info!("repository ships its own test suite; running it as-is");
        }

        match self.harness.run(workdir.path()).await {
            Ok(report) => {
                let findings = findings_from(&report.failed_cases);
                info!(
                    "fuzzing finished: {} failing propert{}",
                    report.failed_cases.len(),
                    if report.failed_cases.len() == 1 { "y" } else { "ies" }
                );
                Ok(StageResult::Fuzzing(FuzzingOutput {
                    findings,
                    failed_cases: report.failed_cases,
                    coverage_percent: report.coverage_percent,
                    stage_status: StageStatus::Complete,
                }))
            }
            Err(e) => {
                warn!("harness failed, reporting partial fuzzing output: {}", e);
                Ok(StageResult::Fuzzing(FuzzingOutput {
                    findings: Vec::new(),
                    failed_cases: Vec::new(),
                    coverage_percent: None,
                    stage_status: StageStatus::Partial,
                }))
            }
        }
    }

    async fn dependencies(&self) -> Vec<(String, bool)> {
        let llm_up = self.llm.health().await.status != "unavailable";
        vec![("llm_router".to_string(), llm_up)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bugbot_core::models::{
        Chain, ContractSource, ReconOutput, ScanConfig, ScanTarget, SourceLanguage,
    };
    use bugbot_llm::{RateLimitConfig, RateLimiter, RoutingTable};
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;

    fn idle_router() -> Arc<LlmRouter> {
        Arc::new(LlmRouter::new(
            RoutingTable::builtin(),
            None,
            None,
            RateLimiter::new(RateLimitConfig::unlimited()),
        ))
    }

    fn request() -> StageRequest {
        let mut prior = BTreeMap::new();
        prior.insert(
            Stage::Recon,
            StageResult::Recon(ReconOutput {
                surface_map: vec![],
                entry_contracts: vec!["Vault".to_string()],
                contracts: vec![ContractSource {
                    name: "Vault".to_string(),
                    path: "Vault.sol".to_string(),
                    language: SourceLanguage::Solidity,
                    source: "contract Vault {}".to_string(),
                    abi: None,
                }],
                stage_status: StageStatus::Complete,
            }),
        );
        StageRequest {
            scan_id: "s-1".to_string(),
            chain: Some(Chain::Ethereum),
            target: ScanTarget::GitUrl {
                url: "https://example.test/repos/Vault".to_string(),
            },
            scan_config: ScanConfig::default(),
            prior,
        }
    }

    #[tokio::test]
    async fn failing_properties_become_findings_with_pocs() -> anyhow::Result<()> {
        let harness = CommandHarness::new(
            "sh",
            vec![
                "-c".to_string(),
                r#"echo '{"failed_cases":[{"property":"reentrancy_guard_holds","input":"deposit(1e18); withdraw()","shrunk":"withdraw()"}],"coverage_percent":62.5}'"#
                    .to_string(),
            ],
            Duration::from_secs(5),
        );
        let worker = FuzzingWorker::new(idle_router(), Arc::new(harness));

        let result = worker.run(request()).await?;
        let StageResult::Fuzzing(output) = result else {
            anyhow::bail!("wrong variant");
        };
        assert_eq!(output.findings.len(), 1);
        assert_eq!(output.coverage_percent, Some(62.5));
        assert_eq!(output.findings[0].proof_of_concept.as_deref(), Some("withdraw()"));
        assert_eq!(output.stage_status, StageStatus::Complete);
        Ok(())
    }

    #[tokio::test]
    async fn missing_harness_degrades_to_partial() -> anyhow::Result<()> {
        let worker = FuzzingWorker::new(idle_router(), Arc::new(NoHarness));
        let result = worker.run(request()).await?;
        let StageResult::Fuzzing(output) = result else {
            anyhow::bail!("wrong variant");
        };
        assert_eq!(output.stage_status, StageStatus::Partial);
        assert!(output.findings.is_empty());
        assert_eq!(output.coverage_percent, None);
        Ok(())
    }

    #[tokio::test]
    async fn missing_recon_output_is_fatal() {
        let worker = FuzzingWorker::new(idle_router(), Arc::new(NoHarness));
        let mut req = request();
        req.prior.clear();
        assert!(worker.run(req).await.is_err());
    }
}
