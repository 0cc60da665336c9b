//! End-to-end pipeline run over in-process stage workers
//!
//! Exercises the full recon → static → fuzzing → triage → reporting chain
//! (monitoring skipped via a zero window) with real workers: a stub explorer,
//! a shell-script analyzer, no fuzz harness, and an LLM-less triage that
//! degrades every finding to its tier-1 result.

use async_trait::async_trait;
use bugbot_chains::explorer::{ExplorerClient, VerifiedSource};
use bugbot_core::models::{
    Chain, Scan, ScanConfig, ScanStatus, ScanTarget, Stage, StageResult, TriageStatus,
};
use bugbot_core::store::{MemoryScanStore, ScanStore};
use bugbot_llm::{LlmRouter, RateLimitConfig, RateLimiter, RoutingTable};
use bugbot_orchestrator::{InProcessDispatcher, Orchestrator, SubmitOutcome};
use bugbot_service::ServiceMetrics;
use bugbot_stages::analyzers::AnalyzerConfig;
use bugbot_stages::fuzzing::{FuzzingWorker, NoHarness};
use bugbot_stages::notify::WebhookNotifier;
use bugbot_stages::recon::ReconWorker;
use bugbot_stages::reporting::ReportingWorker;
use bugbot_stages::static_analysis::StaticWorker;
use bugbot_stages::triage::TriageWorker;
use bugbot_stages::worker::StageWorker;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

struct StubExplorer;

#[async_trait]
impl ExplorerClient for StubExplorer {
    async fn fetch_verified_source(
        &self,
        _chain: Chain,
        _address: &str,
    ) -> bugbot_core::Result<Option<VerifiedSource>> {
        Ok(None)
    }
}

fn idle_router() -> Arc<LlmRouter> {
    Arc::new(LlmRouter::new(
        RoutingTable::builtin(),
        None,
        None,
        RateLimiter::new(RateLimitConfig::unlimited()),
    ))
}

fn shell_analyzer() -> AnalyzerConfig {
    AnalyzerConfig {
        name: "stub-analyzer".to_string(),
        program: "sh".to_string(),
        args: vec![
            "-c".to_string(),
            r#"echo '[{"title":"Reentrancy in withdraw","severity":"high","location":"Vault.sol:7","description":"external call before state update"}]'"#
                .to_string(),
        ],
        timeout: Duration::from_secs(5),
    }
}

async fn wait_terminal(store: &Arc<dyn ScanStore>, scan_id: &str) -> Scan {
    for _ in 0..300 {
        if let Ok(scan) = store.get(scan_id).await {
            if scan.status.is_terminal() {
                return scan;
            }
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("scan never finished");
}

#[tokio::test]
async fn local_repo_scan_completes_with_findings_and_reports() -> anyhow::Result<()> {
    let repo = TempDir::new()?;
    tokio::fs::write(
        repo.path().join("Vault.sol"),
        "contract Vault { function withdraw() public { } }\n",
    )
    .await?;
    let reports = TempDir::new()?;

    let llm = idle_router();
    let workers: Vec<Arc<dyn StageWorker>> = vec![
        Arc::new(ReconWorker::new(Arc::new(StubExplorer))),
        Arc::new(StaticWorker::new(vec![shell_analyzer()], Arc::clone(&llm))),
        Arc::new(FuzzingWorker::new(Arc::clone(&llm), Arc::new(NoHarness))),
        Arc::new(TriageWorker::new(
            Arc::clone(&llm),
            Arc::new(ServiceMetrics::new("triage-worker")),
        )),
        Arc::new(ReportingWorker::new(
            reports.path().to_path_buf(),
            Arc::new(WebhookNotifier::with_slack_webhook(
                "http://127.0.0.1:1".to_string(),
            )),
        )),
    ];

    let store: Arc<dyn ScanStore> = Arc::new(MemoryScanStore::new());
    let orchestrator = Arc::new(Orchestrator::new(
        Arc::clone(&store),
        Arc::new(InProcessDispatcher::new(workers)),
        4,
        8,
    ));

    let scan = Scan::new(
        ScanTarget::LocalPath {
            path: repo.path().to_path_buf(),
        },
        None,
        ScanConfig {
            monitor_duration_minutes: 0,
            ..ScanConfig::default()
        },
    );
    let SubmitOutcome::Accepted(scan_id) = orchestrator.submit(scan, None).await? else {
        anyhow::bail!("submission rejected");
    };

    let scan = wait_terminal(&store, &scan_id).await;
    assert_eq!(scan.status, ScanStatus::Completed);
    assert_eq!(scan.progress, 100);

    // Stage ordering: monitoring skipped, everything else present in order.
    let stages: Vec<Stage> = scan.stage_results.keys().copied().collect();
    assert_eq!(
        stages,
        vec![
            Stage::Recon,
            Stage::Static,
            Stage::Fuzzing,
            Stage::Triage,
            Stage::Reporting
        ]
    );

    // The analyzer finding survived triage in degraded form (no LLM).
    let Some(StageResult::Triage(triage)) = scan.stage_results.get(&Stage::Triage) else {
        anyhow::bail!("triage output missing");
    };
    assert_eq!(triage.findings.len(), 1);
    assert_eq!(triage.findings[0].triage_status, Some(TriageStatus::Degraded));

    // Findings summary closure: summary equals the triage aggregate.
    assert_eq!(scan.findings_summary.total(), triage.findings.len() as u64);
    assert_eq!(scan.findings_summary.high, 1);

    // Three report documents exist on disk.
    let Some(StageResult::Reporting(reporting)) = scan.stage_results.get(&Stage::Reporting) else {
        anyhow::bail!("reporting output missing");
    };
    assert_eq!(reporting.artifacts.len(), 3);
    for artifact in &reporting.artifacts {
        assert!(std::path::Path::new(&artifact.path).exists());
    }
    Ok(())
}

#[tokio::test]
async fn unverified_address_scan_fails_with_source_not_found() -> anyhow::Result<()> {
    let llm = idle_router();
    let workers: Vec<Arc<dyn StageWorker>> = vec![
        Arc::new(ReconWorker::new(Arc::new(StubExplorer))),
        Arc::new(StaticWorker::new(vec![shell_analyzer()], Arc::clone(&llm))),
    ];

    let store: Arc<dyn ScanStore> = Arc::new(MemoryScanStore::new());
    let orchestrator = Arc::new(Orchestrator::new(
        Arc::clone(&store),
        Arc::new(InProcessDispatcher::new(workers)),
        4,
        8,
    ));

    let scan = Scan::new(
        ScanTarget::Address {
            chain: Some(Chain::Ethereum),
            address: "0xb3116013c55d49f575ace3cb0d123f3dbf6cac35".to_string(),
            force_decompile: false,
        },
        Some(Chain::Ethereum),
        ScanConfig::default(),
    );
    let SubmitOutcome::Accepted(scan_id) = orchestrator.submit(scan, None).await? else {
        anyhow::bail!("submission rejected");
    };

    let scan = wait_terminal(&store, &scan_id).await;
    assert_eq!(scan.status, ScanStatus::Failed);
    assert_eq!(scan.error.as_deref(), Some("source_not_found"));
    assert_eq!(scan.progress, 100);
    assert!(scan.stage_results.is_empty());
    Ok(())
}
