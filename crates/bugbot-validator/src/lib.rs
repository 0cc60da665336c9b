//! Validator: queued PoC reproduction in ephemeral sandboxes
//!
//! A worker loop draws jobs from a bounded queue, up to a concurrency cap.
//! Each job owns a dedicated sandbox directory that is destroyed on every
//! exit path, including panics, because the directory handle lives on the
//! job task's stack. PoC text is sanitized before execution and the run is
//! bounded by a hard wall-clock timeout.

#![warn(missing_docs)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

pub mod api;
pub mod sandbox;
pub mod sanitize;

pub use sandbox::{CommandRunner, RunOutcome, SandboxRunner};
pub use sanitize::{default_deny_patterns, sanitize_poc};

use bugbot_core::models::{
    FindingKind, JobStatus, OperatorVerdict, SandboxType, ValidationJob,
};
use bugbot_core::{Error, Result};
use bugbot_service::ServiceMetrics;
use chrono::Utc;
use regex::Regex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock, Semaphore};
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Default hard wall-clock timeout per job
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 300;
/// Upper bound a request may ask for
pub const MAX_TIMEOUT_SECONDS: u64 = 1800;
/// Default concurrent validations
pub const DEFAULT_MAX_CONCURRENT: usize = 5;

/// A submitted validation request
#[derive(Debug, Clone)]
pub struct ValidationRequest {
    /// Scan the finding came from, when internal
    pub scan_id: Option<String>,
    /// Finding id or external reference
    pub finding_id: String,
    /// Vulnerability class, drives PoC template selection
    pub finding_type: FindingKind,
    /// PoC text; a template is used when absent
    pub proof_of_concept: Option<String>,
    /// Sandbox runtime
    pub sandbox_type: SandboxType,
    /// Requested timeout, clamped to the platform maximum
    pub timeout_seconds: Option<u64>,
}

/// The validator service
pub struct ValidatorService {
    jobs: RwLock<HashMap<String, ValidationJob>>,
    pocs: RwLock<HashMap<String, String>>,
    queue_tx: mpsc::Sender<String>,
    runner: Arc<dyn SandboxRunner>,
    deny_patterns: Vec<Regex>,
    allow_live: bool,
    fork_rpc_url: Option<String>,
    metrics: Arc<ServiceMetrics>,
}

impl ValidatorService {
    /// Create the service and start its worker loop.
    pub fn start(
        runner: Arc<dyn SandboxRunner>,
        max_concurrent: usize,
        allow_live: bool,
        fork_rpc_url: Option<String>,
    ) -> Arc<Self> {
        let (queue_tx, mut queue_rx) = mpsc::channel::<String>(64);
        let service = Arc::new(Self {
            jobs: RwLock::new(HashMap::new()),
            pocs: RwLock::new(HashMap::new()),
            queue_tx,
            runner,
            deny_patterns: default_deny_patterns(),
            allow_live,
            fork_rpc_url,
            metrics: Arc::new(ServiceMetrics::new("validator")),
        });

        let worker = Arc::clone(&service);
        tokio::spawn(async move {
            let slots = Arc::new(Semaphore::new(max_concurrent.max(1)));
            while let Some(job_id) = queue_rx.recv().await {
                let Ok(permit) = Arc::clone(&slots).acquire_owned().await else {
                    break;
                };
                let service = Arc::clone(&worker);
                tokio::spawn(async move {
                    let _permit = permit;
                    service.execute_job(&job_id).await;
                });
            }
        });
        service
    }

    /// Service configured from `VALIDATOR_MAX_CONCURRENT`, `ALLOW_LIVE`, and
    /// `FORK_RPC_URL`.
    pub fn from_env(runner: Arc<dyn SandboxRunner>) -> Arc<Self> {
        let max_concurrent = bugbot_core::config::env_parse_or(
            "VALIDATOR_MAX_CONCURRENT",
            DEFAULT_MAX_CONCURRENT,
        )
        .unwrap_or(DEFAULT_MAX_CONCURRENT);
        Self::start(
            runner,
            max_concurrent,
            bugbot_core::config::allow_live(),
            bugbot_core::config::env_opt("FORK_RPC_URL"),
        )
    }

    /// The metrics registry.
    pub fn metrics(&self) -> &Arc<ServiceMetrics> {
        &self.metrics
    }

    /// Enqueue a validation job.
    pub async fn submit(&self, request: ValidationRequest) -> Result<ValidationJob> {
        let timeout = request
            .timeout_seconds
            .unwrap_or(DEFAULT_TIMEOUT_SECONDS)
            .min(MAX_TIMEOUT_SECONDS);
        let poc = match &request.proof_of_concept {
            Some(text) => text.clone(),
            None => template_for(request.finding_type, &request.finding_id),
        };

        let job = ValidationJob {
            job_id: Uuid::new_v4().to_string(),
            scan_id: request.scan_id,
            finding_id: request.finding_id,
            status: JobStatus::Queued,
            sandbox_type: request.sandbox_type,
            timeout_seconds: timeout,
            is_valid: None,
            confidence: None,
            execution_trace: None,
            state_diff: None,
            error_message: None,
            started_at: None,
            completed_at: None,
            operator_verdicts: Vec::new(),
        };

        self.pocs
            .write()
            .await
            .insert(job.job_id.clone(), poc);
        self.jobs
            .write()
            .await
            .insert(job.job_id.clone(), job.clone());
        self.queue_tx
            .send(job.job_id.clone())
            .await
            .map_err(|_| Error::BackendUnavailable("validator queue closed".to_string()))?;
        info!("queued validation {} for {}", job.job_id, job.finding_id);
        Ok(job)
    }

    /// Fetch one job.
    pub async fn get(&self, job_id: &str) -> Result<ValidationJob> {
        self.jobs
            .read()
            .await
            .get(job_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("validation {job_id}")))
    }

    /// All jobs, newest first.
    pub async fn list(&self) -> Vec<ValidationJob> {
        let mut jobs: Vec<ValidationJob> = self.jobs.read().await.values().cloned().collect();
        jobs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        jobs
    }

    /// Cancel a job that has not started.
    pub async fn cancel(&self, job_id: &str) -> Result<ValidationJob> {
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .get_mut(job_id)
            .ok_or_else(|| Error::NotFound(format!("validation {job_id}")))?;
        if job.status != JobStatus::Queued {
            return Err(Error::Conflict(format!(
                "validation {job_id} is {:?}, only queued jobs cancel",
                job.status
            )));
        }
        job.status = JobStatus::Cancelled;
        job.completed_at = Some(Utc::now());
        self.metrics
            .validation_outcomes
            .with_label_values(&["cancelled"])
            .inc();
        Ok(job.clone())
    }

    /// Append an operator verdict to a completed job.
    ///
    /// The original verdict is never mutated.
    pub async fn mark(&self, job_id: &str, is_valid: bool, confidence: f64) -> Result<ValidationJob> {
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .get_mut(job_id)
            .ok_or_else(|| Error::NotFound(format!("validation {job_id}")))?;
        if job.status != JobStatus::Completed {
            return Err(Error::Conflict(format!(
                "validation {job_id} is {:?}, only completed jobs accept operator verdicts",
                job.status
            )));
        }
        job.operator_verdicts.push(OperatorVerdict {
            is_valid,
            confidence,
            marked_at: Utc::now(),
        });
        Ok(job.clone())
    }

    #[instrument(skip(self), fields(job_id = %job_id))]
    async fn execute_job(&self, job_id: &str) {
        let Some((sandbox_type, timeout, poc)) = self.begin(job_id).await else {
            return;
        };

        // The sandbox lives on this task's stack: dropped (and deleted) on
        // completion, timeout, and panic alike.
        let sandbox = match tempfile::TempDir::with_prefix("bugbot-validate-") {
            Ok(dir) => dir,
            Err(e) => {
                self.fail(job_id, format!("sandbox creation failed: {e}"))
                    .await;
                return;
            }
        };

        if let Err(reason) = sanitize_poc(&poc, &self.deny_patterns) {
            warn!("unsafe poc rejected: {}", reason);
            self.fail(job_id, "unsafe poc".to_string()).await;
            return;
        }

        if !self.allow_live {
            if let Some(live_url) = references_live_rpc(&poc, self.fork_rpc_url.as_deref()) {
                warn!("poc targets a live endpoint: {}", live_url);
                self.complete_invalid(job_id, "live RPC attempted".to_string())
                    .await;
                return;
            }
        }

        if let Err(e) = tokio::fs::write(sandbox.path().join("poc.t.sol"), &poc).await {
            self.fail(job_id, format!("writing poc: {e}")).await;
            return;
        }

        let run = self.runner.execute(
            sandbox.path(),
            sandbox_type,
            self.fork_rpc_url.as_deref(),
        );
        match tokio::time::timeout(Duration::from_secs(timeout), run).await {
            Ok(Ok(outcome)) => self.complete(job_id, outcome).await,
            Ok(Err(e)) => self.fail(job_id, e.to_string()).await,
            Err(_) => self.fail(job_id, "timeout".to_string()).await,
        }
    }

    async fn begin(&self, job_id: &str) -> Option<(SandboxType, u64, String)> {
        let poc = self.pocs.read().await.get(job_id).cloned()?;
        let mut jobs = self.jobs.write().await;
        let job = jobs.get_mut(job_id)?;
        if job.status != JobStatus::Queued {
            // Cancelled while waiting in the queue.
            return None;
        }
        job.status = JobStatus::Running;
        job.started_at = Some(Utc::now());
        Some((job.sandbox_type, job.timeout_seconds, poc))
    }

    async fn complete(&self, job_id: &str, outcome: RunOutcome) {
        let mut jobs = self.jobs.write().await;
        if let Some(job) = jobs.get_mut(job_id) {
            job.status = JobStatus::Completed;
            job.is_valid = Some(outcome.is_valid);
            job.confidence = Some(outcome.confidence);
            job.execution_trace = outcome.execution_trace;
            job.state_diff = outcome.state_diff;
            job.completed_at = Some(Utc::now());
        }
        self.metrics
            .validation_outcomes
            .with_label_values(&["completed"])
            .inc();
    }

    async fn complete_invalid(&self, job_id: &str, message: String) {
        let mut jobs = self.jobs.write().await;
        if let Some(job) = jobs.get_mut(job_id) {
            job.status = JobStatus::Completed;
            job.is_valid = Some(false);
            job.confidence = Some(0.0);
            job.error_message = Some(message);
            job.completed_at = Some(Utc::now());
        }
        self.metrics
            .validation_outcomes
            .with_label_values(&["blocked_live"])
            .inc();
    }

    async fn fail(&self, job_id: &str, message: String) {
        let mut jobs = self.jobs.write().await;
        if let Some(job) = jobs.get_mut(job_id) {
            job.status = JobStatus::Failed;
            job.error_message = Some(message);
            job.completed_at = Some(Utc::now());
        }
        self.metrics
            .validation_outcomes
            .with_label_values(&["failed"])
            .inc();
    }
}

/// PoC template chosen when a request carries none.
fn template_for(kind: FindingKind, finding_id: &str) -> String {
    let body = match kind {
        FindingKind::Reentrancy => {
            "function test_reentry() public {\n        vm.expectRevert();\n        target.withdraw();\n        target.withdraw();\n    }"
        }
        FindingKind::IntegerOverflow => {
            "function test_overflow() public {\n        target.mint(type(uint256).max);\n    }"
        }
        FindingKind::AccessControl => {
            "function test_unauthorized() public {\n        vm.prank(address(0xBEEF));\n        target.setOwner(address(0xBEEF));\n    }"
        }
        _ => "function test_finding() public {\n        // exercise the reported entry point\n    }",
    };
    format!(
        "// Reproduction for finding {finding_id}\ncontract Reproduce {{\n    {body}\n}}\n"
    )
}

/// Detect an explicit non-fork RPC endpoint in the PoC text.
fn references_live_rpc(poc: &str, fork_url: Option<&str>) -> Option<String> {
    let url_pattern = Regex::new(r#"https?://[^\s"']+"#).ok()?;
    for hit in url_pattern.find_iter(poc) {
        let url = hit.as_str();
        let is_fork = fork_url.map(|f| url.starts_with(f)).unwrap_or(false)
            || url.contains("localhost")
            || url.contains("127.0.0.1");
        if !is_fork {
            return Some(bugbot_core::redaction::strip_url_query(url));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::path::{Path, PathBuf};
    use std::sync::Mutex as StdMutex;

    /// Runner that records the sandbox path and follows a script.
    struct ScriptedRunner {
        delay: Duration,
        outcome: RunOutcome,
        seen_paths: StdMutex<Vec<PathBuf>>,
    }

    impl ScriptedRunner {
        fn instant(is_valid: bool) -> Self {
            Self {
                delay: Duration::ZERO,
                outcome: RunOutcome {
                    is_valid,
                    confidence: 0.9,
                    execution_trace: Some("trace".to_string()),
                    state_diff: None,
                },
                seen_paths: StdMutex::new(Vec::new()),
            }
        }

        fn slow(delay: Duration) -> Self {
            Self {
                delay,
                ..Self::instant(true)
            }
        }
    }

    #[async_trait]
    impl SandboxRunner for ScriptedRunner {
        async fn execute(
            &self,
            sandbox: &Path,
            _sandbox_type: SandboxType,
            _rpc_url: Option<&str>,
        ) -> Result<RunOutcome> {
            self.seen_paths
                .lock()
                .unwrap()
                .push(sandbox.to_path_buf());
            tokio::time::sleep(self.delay).await;
            Ok(RunOutcome {
                is_valid: self.outcome.is_valid,
                confidence: self.outcome.confidence,
                execution_trace: self.outcome.execution_trace.clone(),
                state_diff: self.outcome.state_diff.clone(),
            })
        }
    }

    fn request(poc: Option<&str>) -> ValidationRequest {
        ValidationRequest {
            scan_id: Some("s-1".to_string()),
            finding_id: "T-001".to_string(),
            finding_type: FindingKind::Reentrancy,
            proof_of_concept: poc.map(str::to_string),
            sandbox_type: SandboxType::Foundry,
            timeout_seconds: Some(5),
        }
    }

    async fn wait_terminal(service: &Arc<ValidatorService>, job_id: &str) -> ValidationJob {
        for _ in 0..300 {
            if let Ok(job) = service.get(job_id).await {
                if job.status.is_terminal() {
                    return job;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job never finished");
    }

    #[tokio::test]
    async fn completed_jobs_carry_verdicts_and_sandboxes_are_destroyed() -> anyhow::Result<()> {
        let runner = Arc::new(ScriptedRunner::instant(true));
        let service = ValidatorService::start(
            Arc::clone(&runner) as Arc<dyn SandboxRunner>,
            2,
            false,
            None,
        );

        let job = service.submit(request(Some("target.withdraw();"))).await?;
        let done = wait_terminal(&service, &job.job_id).await;

        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(done.is_valid, Some(true));
        assert_eq!(done.confidence, Some(0.9));
        assert!(done.completed_at.is_some());

        // Sandbox isolation: the directory the runner saw no longer exists.
        let paths = runner.seen_paths.lock().unwrap().clone();
        assert_eq!(paths.len(), 1);
        assert!(!paths[0].exists());
        Ok(())
    }

    #[tokio::test]
    async fn timeouts_fail_the_job_and_remove_the_sandbox() -> anyhow::Result<()> {
        let runner = Arc::new(ScriptedRunner::slow(Duration::from_secs(30)));
        let service = ValidatorService::start(
            Arc::clone(&runner) as Arc<dyn SandboxRunner>,
            2,
            false,
            None,
        );

        let mut req = request(Some("while(true) {}"));
        req.timeout_seconds = Some(1);
        let job = service.submit(req).await?;
        let done = wait_terminal(&service, &job.job_id).await;

        assert_eq!(done.status, JobStatus::Failed);
        assert_eq!(done.error_message.as_deref(), Some("timeout"));
        assert_eq!(done.is_valid, None);

        let paths = runner.seen_paths.lock().unwrap().clone();
        assert!(!paths[0].exists());
        Ok(())
    }

    #[tokio::test]
    async fn unsafe_pocs_are_rejected_before_execution() -> anyhow::Result<()> {
        let runner = Arc::new(ScriptedRunner::instant(true));
        let service = ValidatorService::start(
            Arc::clone(&runner) as Arc<dyn SandboxRunner>,
            2,
            false,
            None,
        );

        let job = service
            .submit(request(Some("function f() public { } // $(rm -rf /) ../escape")))
            .await?;
        let done = wait_terminal(&service, &job.job_id).await;

        assert_eq!(done.status, JobStatus::Failed);
        assert_eq!(done.error_message.as_deref(), Some("unsafe poc"));
        // The runner never saw the job.
        assert!(runner.seen_paths.lock().unwrap().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn live_rpc_references_are_blocked_without_allow_live() -> anyhow::Result<()> {
        let service = ValidatorService::start(
            Arc::new(ScriptedRunner::instant(true)),
            2,
            false,
            Some("http://127.0.0.1:8545".to_string()),
        );

        let job = service
            .submit(request(Some(
                "vm.createFork(\"https://eth-mainnet.example.test/v2/key\");",
            )))
            .await?;
        let done = wait_terminal(&service, &job.job_id).await;

        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(done.is_valid, Some(false));
        assert_eq!(done.confidence, Some(0.0));
        assert_eq!(done.error_message.as_deref(), Some("live RPC attempted"));
        Ok(())
    }

    #[tokio::test]
    async fn operator_verdicts_append_only_on_completed_jobs() -> anyhow::Result<()> {
        let service = ValidatorService::start(
            Arc::new(ScriptedRunner::instant(false)),
            2,
            false,
            None,
        );

        let job = service.submit(request(Some("ok();"))).await?;
        let done = wait_terminal(&service, &job.job_id).await;
        assert_eq!(done.is_valid, Some(false));

        let marked = service.mark(&job.job_id, true, 0.7).await?;
        // Original verdict untouched; operator verdict appended.
        assert_eq!(marked.is_valid, Some(false));
        assert_eq!(marked.operator_verdicts.len(), 1);
        assert!(marked.operator_verdicts[0].is_valid);
        Ok(())
    }

    #[tokio::test]
    async fn templates_are_used_when_no_poc_is_supplied() -> anyhow::Result<()> {
        let service = ValidatorService::start(
            Arc::new(ScriptedRunner::instant(true)),
            2,
            false,
            None,
        );
        let job = service.submit(request(None)).await?;
        let done = wait_terminal(&service, &job.job_id).await;
        assert_eq!(done.status, JobStatus::Completed);
        Ok(())
    }

    #[tokio::test]
    async fn only_queued_jobs_cancel() -> anyhow::Result<()> {
        let service = ValidatorService::start(
            Arc::new(ScriptedRunner::instant(true)),
            2,
            false,
            None,
        );
        let job = service.submit(request(Some("ok();"))).await?;
        let done = wait_terminal(&service, &job.job_id).await;
        assert_eq!(done.status, JobStatus::Completed);
        assert!(matches!(
            service.cancel(&job.job_id).await,
            Err(Error::Conflict(_))
        ));
        Ok(())
    }
}
