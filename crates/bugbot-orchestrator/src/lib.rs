//! BugBot orchestrator
//!
//! Accepts scan requests, drives the six-stage pipeline per scan, tracks
//! deterministic progress, and exposes scan state. One supervisor task owns
//! each scan; it is the sole writer of that scan's record. Concurrency is
//! capped and overflow requests queue up to a bound, beyond which submission
//! is rejected.

#![warn(missing_docs)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

pub mod api;
pub mod dispatch;

pub use dispatch::{HttpDispatcher, InProcessDispatcher, StageDispatcher};

use bugbot_core::models::{Chain, Scan, ScanStatus, ScanTarget, Stage, StageResult};
use bugbot_core::progress::{clamp_monotonic, stage_end, stage_start};
use bugbot_core::store::ScanStore;
use bugbot_core::{Error, Result};
use bugbot_service::ServiceMetrics;
use bugbot_stages::worker::StageRequest;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock, Semaphore};
use tracing::{error, info, instrument, warn};

/// Default cap on concurrently running scans
pub const DEFAULT_MAX_CONCURRENT: usize = 8;
/// Default bound on queued scans beyond the running cap
pub const DEFAULT_QUEUE_SIZE: usize = 64;

/// How long a cached stage-worker health probe stays fresh
const HEALTH_CACHE_TTL: Duration = Duration::from_secs(30);

/// Outcome of a scan submission
pub enum SubmitOutcome {
    /// Scan record created and queued
    Accepted(String),
    /// Running cap and queue are both full; the API surfaces 429
    QueueFull,
}

/// The pipeline coordinator
pub struct Orchestrator {
    store: Arc<dyn ScanStore>,
    dispatcher: Arc<dyn StageDispatcher>,
    metrics: Arc<ServiceMetrics>,
    running: Arc<Semaphore>,
    queue: Arc<Semaphore>,
    idempotency: Mutex<HashMap<String, String>>,
    health_cache: RwLock<HashMap<Stage, (Instant, bool)>>,
}

impl Orchestrator {
    /// Assemble an orchestrator.
    pub fn new(
        store: Arc<dyn ScanStore>,
        dispatcher: Arc<dyn StageDispatcher>,
        max_concurrent: usize,
        queue_size: usize,
    ) -> Self {
        Self {
            store,
            dispatcher,
            metrics: Arc::new(ServiceMetrics::new("orchestrator")),
            running: Arc::new(Semaphore::new(max_concurrent.max(1))),
            queue: Arc::new(Semaphore::new(max_concurrent.max(1) + queue_size)),
            idempotency: Mutex::new(HashMap::new()),
            health_cache: RwLock::new(HashMap::new()),
        }
    }

    /// Limits from `ORCH_MAX_CONCURRENT` / `ORCH_QUEUE_SIZE`.
    pub fn limits_from_env() -> (usize, usize) {
        let max_concurrent =
            bugbot_core::config::env_parse_or("ORCH_MAX_CONCURRENT", DEFAULT_MAX_CONCURRENT)
                .unwrap_or(DEFAULT_MAX_CONCURRENT);
        let queue_size = bugbot_core::config::env_parse_or("ORCH_QUEUE_SIZE", DEFAULT_QUEUE_SIZE)
            .unwrap_or(DEFAULT_QUEUE_SIZE);
        (max_concurrent, queue_size)
    }

    /// The scan store, shared with the API layer.
    pub fn store(&self) -> &Arc<dyn ScanStore> {
        &self.store
    }

    /// The metrics registry.
    pub fn metrics(&self) -> &Arc<ServiceMetrics> {
        &self.metrics
    }

    /// Create a scan record and start its supervisor task.
    ///
    /// `idempotency_key`, when provided, deduplicates replays of the same
    /// submission onto the original scan id.
    pub async fn submit(
        self: &Arc<Self>,
        scan: Scan,
        idempotency_key: Option<String>,
    ) -> Result<SubmitOutcome> {
        if let Some(key) = &idempotency_key {
            let known = self.idempotency.lock().await;
            if let Some(existing) = known.get(key) {
                info!("deduplicated submission via idempotency key");
                return Ok(SubmitOutcome::Accepted(existing.clone()));
            }
        }

        let Ok(queue_permit) = Arc::clone(&self.queue).try_acquire_owned() else {
            warn!("scan queue full, rejecting submission");
            return Ok(SubmitOutcome::QueueFull);
        };

        let scan_id = scan.scan_id.clone();
        self.store.create(scan).await?;
        if let Some(key) = idempotency_key {
            self.idempotency.lock().await.insert(key, scan_id.clone());
        }

        let orchestrator = Arc::clone(self);
        let supervisor_id = scan_id.clone();
        tokio::spawn(async move {
            orchestrator.run_pipeline(supervisor_id, queue_permit).await;
        });
        Ok(SubmitOutcome::Accepted(scan_id))
    }

    /// Request cooperative cancellation of a scan.
    ///
    /// The flag is honored between stages; an in-flight stage call completes
    /// and its result is discarded.
    pub async fn cancel(&self, scan_id: &str) -> Result<()> {
        let scan = self.store.get(scan_id).await?;
        if scan.status.is_terminal() {
            return Err(Error::Conflict(format!(
                "scan {scan_id} already {}",
                scan.status
            )));
        }
        self.store
            .update(scan_id, Box::new(|scan| scan.cancel_requested = true))
            .await?;
        info!("cancellation requested for {}", scan_id);
        Ok(())
    }

    /// Rolled-up health of every stage worker, cached for 30 seconds.
    pub async fn stage_health(&self) -> BTreeMap<Stage, bool> {
        let now = Instant::now();
        let mut rollup = BTreeMap::new();
        for stage in Stage::ORDER {
            let cached = {
                let cache = self.health_cache.read().await;
                cache
                    .get(&stage)
                    .filter(|(at, _)| now.duration_since(*at) < HEALTH_CACHE_TTL)
                    .map(|(_, up)| *up)
            };
            let up = match cached {
                Some(up) => up,
                None => {
                    let up = self.dispatcher.probe(stage).await;
                    self.health_cache.write().await.insert(stage, (now, up));
                    up
                }
            };
            rollup.insert(stage, up);
        }
        rollup
    }

    #[instrument(skip(self, _queue_permit), fields(scan_id = %scan_id))]
    async fn run_pipeline(
        self: Arc<Self>,
        scan_id: String,
        _queue_permit: tokio::sync::OwnedSemaphorePermit,
    ) {
        // Hold a running slot for the whole pipeline; the queue permit keeps
        // the backpressure accounting alive until terminal state.
        let _run_permit = match Arc::clone(&self.running).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => return,
        };

        let scan = match self.store.get(&scan_id).await {
            Ok(scan) => scan,
            Err(e) => {
                error!("scan {} vanished before start: {}", scan_id, e);
                return;
            }
        };
        if scan.cancel_requested {
            self.finish(&scan_id, ScanStatus::Failed, Some("cancelled".to_string()))
                .await;
            return;
        }

        let started = Instant::now();
        let config = scan.scan_config.clone();
        let chain = resolve_chain(&scan);
        let target = scan.target.clone();
        if self
            .store
            .update(
                &scan_id,
                Box::new(|scan| scan.status = ScanStatus::Running),
            )
            .await
            .is_err()
        {
            return;
        }
        info!("pipeline starting for {}", scan.target_url);

        let mut prior: BTreeMap<Stage, StageResult> = BTreeMap::new();
        for stage in Stage::ORDER {
            if stage == Stage::Fuzzing && !config.enable_fuzzing {
                info!("fuzzing disabled by scan_config, skipping");
                continue;
            }
            if stage == Stage::Monitoring && config.monitor_duration_minutes == 0 {
                info!("monitoring window is zero, skipping");
                continue;
            }

            match self.store.get(&scan_id).await {
                Ok(scan) if scan.cancel_requested => {
                    self.finish(&scan_id, ScanStatus::Failed, Some("cancelled".to_string()))
                        .await;
                    return;
                }
                Ok(_) => {}
                Err(_) => return,
            }

            self.set_progress(&scan_id, stage_start(stage), Some(stage))
                .await;

            let request = StageRequest {
                scan_id: scan_id.clone(),
                chain,
                target: target.clone(),
                scan_config: config.clone(),
                prior: prior.clone(),
            };
            let timeout = stage_timeout(stage, config.monitor_duration_minutes);

            match self.dispatcher.dispatch(stage, request, timeout).await {
                Ok(result) => {
                    self.record_stage(&scan_id, stage, &result).await;
                    prior.insert(stage, result);
                }
                Err(e) if stage == Stage::Reporting && prior.contains_key(&Stage::Triage) => {
                    // Reporting failure never demotes a scan that triaged.
                    warn!("reporting failed, scan stays completed: {}", e);
                    let message = e.to_string();
                    let _ = self
                        .store
                        .update(
                            &scan_id,
                            Box::new(move |scan| scan.report_errors.push(message)),
                        )
                        .await;
                }
                Err(e) => {
                    let message = failure_message(&e);
                    error!("stage {} failed: {}", stage, message);
                    self.finish(&scan_id, ScanStatus::Failed, Some(message)).await;
                    return;
                }
            }
        }

        self.finish(&scan_id, ScanStatus::Completed, None).await;
        self.metrics
            .scan_duration
            .observe(started.elapsed().as_secs_f64());
        info!("pipeline completed in {:?}", started.elapsed());
    }

    async fn record_stage(&self, scan_id: &str, stage: Stage, result: &StageResult) {
        let result = result.clone();
        let end = stage_end(stage);
        let _ = self
            .store
            .update(
                scan_id,
                Box::new(move |scan| {
                    if let StageResult::Triage(triage) = &result {
                        scan.findings_summary = triage.summary;
                    }
                    if let StageResult::Reporting(reporting) = &result {
                        scan.report_errors
                            .extend(reporting.report_errors.iter().cloned());
                    }
                    scan.stage_results.insert(stage, result);
                    scan.progress = clamp_monotonic(scan.progress, end);
                }),
            )
            .await;
    }

    async fn set_progress(&self, scan_id: &str, value: u8, stage: Option<Stage>) {
        let _ = self
            .store
            .update(
                scan_id,
                Box::new(move |scan| {
                    scan.progress = clamp_monotonic(scan.progress, value);
                    scan.current_stage = stage;
                }),
            )
            .await;
    }

    async fn finish(&self, scan_id: &str, status: ScanStatus, error: Option<String>) {
        let _ = self
            .store
            .update(
                scan_id,
                Box::new(move |scan| scan.finish(status, error)),
            )
            .await;
    }
}

/// The chain a scan operates on, from the hint or the target itself.
fn resolve_chain(scan: &Scan) -> Option<Chain> {
    scan.chain_hint.or(match &scan.target {
        ScanTarget::Address { chain, .. } => *chain,
        _ => None,
    })
}

/// Per-stage dispatch deadlines.
fn stage_timeout(stage: Stage, monitor_minutes: u32) -> Duration {
    match stage {
        Stage::Recon => Duration::from_secs(180),
        Stage::Static => Duration::from_secs(300),
        Stage::Fuzzing => Duration::from_secs(600),
        Stage::Monitoring => Duration::from_secs(u64::from(monitor_minutes) * 60 + 60),
        Stage::Triage => Duration::from_secs(300),
        Stage::Reporting => Duration::from_secs(60),
    }
}

/// Scan-level error text for a stage failure.
///
/// Well-known recon codes surface bare so clients can match on them.
fn failure_message(error: &Error) -> String {
    match error {
        Error::StageFailure { cause, .. } if cause == "source_not_found" => cause.clone(),
        Error::Cancelled => "cancelled".to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bugbot_core::models::{
        FindingsSummary, ReconOutput, ReportingOutput, ScanConfig, StageStatus, StaticOutput,
        TriageOutput,
    };
    use bugbot_core::store::MemoryScanStore;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Scripted dispatcher: every stage succeeds with an empty output, except
    /// the stages listed in `fail`.
    struct ScriptedDispatcher {
        fail: Vec<Stage>,
        delay: Duration,
        dispatched: AtomicUsize,
    }

    impl ScriptedDispatcher {
        fn ok() -> Self {
            Self {
                fail: vec![],
                delay: Duration::ZERO,
                dispatched: AtomicUsize::new(0),
            }
        }

        fn failing(stages: Vec<Stage>) -> Self {
            Self {
                fail: stages,
                delay: Duration::ZERO,
                dispatched: AtomicUsize::new(0),
            }
        }

        fn empty_result(stage: Stage) -> StageResult {
            match stage {
                Stage::Recon => StageResult::Recon(ReconOutput {
                    surface_map: vec![],
                    entry_contracts: vec![],
                    contracts: vec![],
                    stage_status: StageStatus::Complete,
                }),
                Stage::Static => StageResult::Static(StaticOutput {
                    findings: vec![],
                    raw_findings: vec![],
                    summary: None,
                    analyzers_run: vec!["slither".to_string()],
                    analyzers_failed: vec![],
                    stage_status: StageStatus::Complete,
                }),
                Stage::Fuzzing => StageResult::Fuzzing(bugbot_core::models::FuzzingOutput {
                    findings: vec![],
                    failed_cases: vec![],
                    coverage_percent: None,
                    stage_status: StageStatus::Complete,
                }),
                Stage::Monitoring => {
                    StageResult::Monitoring(bugbot_core::models::MonitoringOutput {
                        anomalies: vec![],
                        findings: vec![],
                        duration_minutes: 0,
                        stage_status: StageStatus::Complete,
                    })
                }
                Stage::Triage => StageResult::Triage(TriageOutput {
                    findings: vec![],
                    filtered: vec![],
                    summary: FindingsSummary::default(),
                    stage_status: StageStatus::Complete,
                }),
                Stage::Reporting => StageResult::Reporting(ReportingOutput {
                    artifacts: vec![],
                    report_errors: vec![],
                    stage_status: StageStatus::Complete,
                }),
            }
        }
    }

    #[async_trait]
    impl StageDispatcher for ScriptedDispatcher {
        async fn dispatch(
            &self,
            stage: Stage,
            _request: StageRequest,
            _timeout: Duration,
        ) -> Result<StageResult> {
            self.dispatched.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self.fail.contains(&stage) {
                return Err(Error::StageFailure {
                    stage: stage.to_string(),
                    cause: "scripted failure".to_string(),
                });
            }
            Ok(Self::empty_result(stage))
        }
    }

    fn scan_with(config: ScanConfig) -> Scan {
        Scan::new(
            ScanTarget::GitUrl {
                url: "https://example.test/repos/Vault".to_string(),
            },
            None,
            config,
        )
    }

    fn orchestrator(dispatcher: ScriptedDispatcher) -> Arc<Orchestrator> {
        Arc::new(Orchestrator::new(
            Arc::new(MemoryScanStore::new()),
            Arc::new(dispatcher),
            2,
            2,
        ))
    }

    async fn wait_terminal(orchestrator: &Arc<Orchestrator>, scan_id: &str) -> Scan {
        for _ in 0..200 {
            if let Ok(scan) = orchestrator.store().get(scan_id).await {
                if scan.status.is_terminal() {
                    return scan;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("scan {scan_id} never reached a terminal state");
    }

    #[tokio::test]
    async fn happy_path_walks_every_stage_to_one_hundred() -> anyhow::Result<()> {
        let orchestrator = orchestrator(ScriptedDispatcher::ok());
        let config = ScanConfig {
            monitor_duration_minutes: 0,
            ..ScanConfig::default()
        };
        let SubmitOutcome::Accepted(scan_id) =
            orchestrator.submit(scan_with(config), None).await?
        else {
            anyhow::bail!("submission rejected");
        };

        let scan = wait_terminal(&orchestrator, &scan_id).await;
        assert_eq!(scan.status, ScanStatus::Completed);
        assert_eq!(scan.progress, 100);
        assert!(scan.completed_at.is_some());
        // Monitoring was skipped; the rest ran in order.
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
        Ok(())
    }

    #[tokio::test]
    async fn fatal_stage_failure_fails_the_scan() -> anyhow::Result<()> {
        let orchestrator = orchestrator(ScriptedDispatcher::failing(vec![Stage::Static]));
        let SubmitOutcome::Accepted(scan_id) = orchestrator
            .submit(scan_with(ScanConfig::default()), None)
            .await?
        else {
            anyhow::bail!("submission rejected");
        };

        let scan = wait_terminal(&orchestrator, &scan_id).await;
        assert_eq!(scan.status, ScanStatus::Failed);
        assert_eq!(scan.progress, 100);
        assert!(scan.error.as_deref().unwrap_or("").contains("static"));
        // Later stages never ran.
        assert!(!scan.stage_results.contains_key(&Stage::Fuzzing));
        assert!(!scan.stage_results.contains_key(&Stage::Triage));
        Ok(())
    }

    #[tokio::test]
    async fn reporting_failure_keeps_the_scan_completed() -> anyhow::Result<()> {
        let orchestrator = orchestrator(ScriptedDispatcher::failing(vec![Stage::Reporting]));
        let config = ScanConfig {
            monitor_duration_minutes: 0,
            ..ScanConfig::default()
        };
        let SubmitOutcome::Accepted(scan_id) =
            orchestrator.submit(scan_with(config), None).await?
        else {
            anyhow::bail!("submission rejected");
        };

        let scan = wait_terminal(&orchestrator, &scan_id).await;
        assert_eq!(scan.status, ScanStatus::Completed);
        assert!(!scan.report_errors.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn recon_source_not_found_surfaces_bare() -> anyhow::Result<()> {
        struct SourceNotFound;
        #[async_trait]
        impl StageDispatcher for SourceNotFound {
            async fn dispatch(
                &self,
                stage: Stage,
                _request: StageRequest,
                _timeout: Duration,
            ) -> Result<StageResult> {
                Err(Error::StageFailure {
                    stage: stage.to_string(),
                    cause: "source_not_found".to_string(),
                })
            }
        }

        let orchestrator = Arc::new(Orchestrator::new(
            Arc::new(MemoryScanStore::new()),
            Arc::new(SourceNotFound),
            2,
            2,
        ));
        let SubmitOutcome::Accepted(scan_id) = orchestrator
            .submit(scan_with(ScanConfig::default()), None)
            .await?
        else {
            anyhow::bail!("submission rejected");
        };

        let scan = wait_terminal(&orchestrator, &scan_id).await;
        assert_eq!(scan.status, ScanStatus::Failed);
        assert_eq!(scan.error.as_deref(), Some("source_not_found"));
        assert_eq!(scan.progress, 100);
        Ok(())
    }

    #[tokio::test]
    async fn queue_overflow_is_rejected() -> anyhow::Result<()> {
        let dispatcher = ScriptedDispatcher {
            fail: vec![],
            delay: Duration::from_millis(300),
            dispatched: AtomicUsize::new(0),
        };
        // 1 running + 1 queued = capacity 2.
        let orchestrator = Arc::new(Orchestrator::new(
            Arc::new(MemoryScanStore::new()),
            Arc::new(dispatcher),
            1,
            1,
        ));

        let mut outcomes = Vec::new();
        for _ in 0..3 {
            outcomes.push(
                orchestrator
                    .submit(scan_with(ScanConfig::default()), None)
                    .await?,
            );
        }
        let rejected = outcomes
            .iter()
            .filter(|o| matches!(o, SubmitOutcome::QueueFull))
            .count();
        assert_eq!(rejected, 1);
        Ok(())
    }

    #[tokio::test]
    async fn idempotency_key_deduplicates() -> anyhow::Result<()> {
        let orchestrator = orchestrator(ScriptedDispatcher::ok());
        let key = Some("client-key-1".to_string());
        let SubmitOutcome::Accepted(first) = orchestrator
            .submit(scan_with(ScanConfig::default()), key.clone())
            .await?
        else {
            anyhow::bail!("submission rejected");
        };
        let SubmitOutcome::Accepted(second) = orchestrator
            .submit(scan_with(ScanConfig::default()), key)
            .await?
        else {
            anyhow::bail!("submission rejected");
        };
        assert_eq!(first, second);
        Ok(())
    }

    #[tokio::test]
    async fn cancellation_between_stages_fails_the_scan() -> anyhow::Result<()> {
        let dispatcher = ScriptedDispatcher {
            fail: vec![],
            delay: Duration::from_millis(100),
            dispatched: AtomicUsize::new(0),
        };
        let orchestrator = orchestrator(dispatcher);
        let SubmitOutcome::Accepted(scan_id) = orchestrator
            .submit(scan_with(ScanConfig::default()), None)
            .await?
        else {
            anyhow::bail!("submission rejected");
        };

        // Let recon start, then cancel.
        tokio::time::sleep(Duration::from_millis(50)).await;
        orchestrator.cancel(&scan_id).await?;

        let scan = wait_terminal(&orchestrator, &scan_id).await;
        assert_eq!(scan.status, ScanStatus::Failed);
        assert_eq!(scan.error.as_deref(), Some("cancelled"));
        assert_eq!(scan.progress, 100);
        // Not every stage ran.
        assert!(scan.stage_results.len() < Stage::ORDER.len());
        Ok(())
    }

    #[tokio::test]
    async fn cancelling_a_terminal_scan_conflicts() -> anyhow::Result<()> {
        let orchestrator = orchestrator(ScriptedDispatcher::ok());
        let SubmitOutcome::Accepted(scan_id) = orchestrator
            .submit(scan_with(ScanConfig::default()), None)
            .await?
        else {
            anyhow::bail!("submission rejected");
        };
        wait_terminal(&orchestrator, &scan_id).await;
        assert!(matches!(
            orchestrator.cancel(&scan_id).await,
            Err(Error::Conflict(_))
        ));
        Ok(())
    }

    #[test]
    fn monitoring_timeout_tracks_the_window() {
        assert_eq!(
            stage_timeout(Stage::Monitoring, 5),
            Duration::from_secs(360)
        );
        assert_eq!(stage_timeout(Stage::Recon, 5), Duration::from_secs(180));
    }
}
