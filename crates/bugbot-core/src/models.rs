//! Data models for the BugBot platform

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::str::FromStr;
use uuid::Uuid;

/// Supported chains (closed set)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Chain {
    /// Ethereum mainnet
    Ethereum,
    /// BNB Smart Chain
    Bsc,
    /// Polygon PoS
    Polygon,
    /// Arbitrum One
    Arbitrum,
    /// Optimism
    Optimism,
    /// Avalanche C-Chain
    Avalanche,
    /// Solana
    Solana,
    /// Aptos
    Aptos,
    /// Sui
    Sui,
    /// Starknet
    Starknet,
}

impl Chain {
    /// All supported chains, in a stable order.
    pub const ALL: [Chain; 10] = [
        Chain::Ethereum,
        Chain::Bsc,
        Chain::Polygon,
        Chain::Arbitrum,
        Chain::Optimism,
        Chain::Avalanche,
        Chain::Solana,
        Chain::Aptos,
        Chain::Sui,
        Chain::Starknet,
    ];

    /// Lowercase identifier used in APIs and environment variable names.
    pub fn as_str(&self) -> &'static str {
        match self {
            Chain::Ethereum => "ethereum",
            Chain::Bsc => "bsc",
            Chain::Polygon => "polygon",
            Chain::Arbitrum => "arbitrum",
            Chain::Optimism => "optimism",
            Chain::Avalanche => "avalanche",
            Chain::Solana => "solana",
            Chain::Aptos => "aptos",
            Chain::Sui => "sui",
            Chain::Starknet => "starknet",
        }
    }

    /// Whether the chain speaks EVM JSON-RPC.
    pub fn is_evm(&self) -> bool {
        matches!(
            self,
            Chain::Ethereum
                | Chain::Bsc
                | Chain::Polygon
                | Chain::Arbitrum
                | Chain::Optimism
                | Chain::Avalanche
        )
    }
}

impl std::fmt::Display for Chain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Chain {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Chain::ALL
            .iter()
            .find(|c| c.as_str() == s.to_lowercase())
            .copied()
            .ok_or_else(|| crate::Error::InvalidRequest(format!("unknown chain '{s}'")))
    }
}

/// What a scan points at
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScanTarget {
    /// A git repository URL
    GitUrl {
        /// Clone URL
        url: String,
    },
    /// A path mounted into the recon worker
    LocalPath {
        /// Filesystem path
        path: PathBuf,
    },
    /// A raw on-chain address
    Address {
        /// Chain hint; detection runs when absent
        chain: Option<Chain>,
        /// Address text in the chain's native format
        address: String,
        /// Decompile when no verified source exists
        #[serde(default)]
        force_decompile: bool,
    },
}

impl ScanTarget {
    /// Denormalized display form used in scan listings.
    pub fn display_url(&self) -> String {
        match self {
            ScanTarget::GitUrl { url } => url.clone(),
            ScanTarget::LocalPath { path } => path.display().to_string(),
            ScanTarget::Address { address, chain, .. } => match chain {
                Some(chain) => format!("{chain}:{address}"),
                None => address.clone(),
            },
        }
    }
}

/// Scan lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanStatus {
    /// Accepted, not yet picked up by a supervisor task
    Pending,
    /// The pipeline is executing
    Running,
    /// All stages through reporting finished (reporting may carry errors)
    Completed,
    /// A fatal stage failure, cancellation, or pre-pipeline error
    Failed,
}

impl ScanStatus {
    /// Whether the scan will receive no further writes.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ScanStatus::Completed | ScanStatus::Failed)
    }
}

impl std::fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ScanStatus::Pending => "pending",
            ScanStatus::Running => "running",
            ScanStatus::Completed => "completed",
            ScanStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Pipeline stages, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Source discovery and surface mapping
    Recon,
    /// Static analyzer aggregation
    Static,
    /// Property testing on a sandboxed build
    Fuzzing,
    /// Bounded on-chain observation
    Monitoring,
    /// Three-tier finding classification
    Triage,
    /// Report rendering and notification dispatch
    Reporting,
}

impl Stage {
    /// Fixed pipeline order.
    pub const ORDER: [Stage; 6] = [
        Stage::Recon,
        Stage::Static,
        Stage::Fuzzing,
        Stage::Monitoring,
        Stage::Triage,
        Stage::Reporting,
    ];

    /// Lowercase tag used in stage_results keys and requests.
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Recon => "recon",
            Stage::Static => "static",
            Stage::Fuzzing => "fuzzing",
            Stage::Monitoring => "monitoring",
            Stage::Triage => "triage",
            Stage::Reporting => "reporting",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a stage finished all of its work
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    /// Everything the stage attempted succeeded
    Complete,
    /// Some sub-tasks failed; the output carries what was produced
    Partial,
}

/// Severity of a finding
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Critical severity - requires immediate attention
    Critical,
    /// High severity - should be addressed soon
    High,
    /// Medium severity - should be addressed
    Medium,
    /// Low severity - minor issue
    Low,
    /// Informational - no action required
    Info,
}

impl Severity {
    /// All severities, highest first.
    pub const ALL: [Severity; 5] = [
        Severity::Critical,
        Severity::High,
        Severity::Medium,
        Severity::Low,
        Severity::Info,
    ];

    /// Lowercase label used in metrics and summaries.
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::High => "high",
            Severity::Medium => "medium",
            Severity::Low => "low",
            Severity::Info => "info",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Analyst confidence in a finding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    /// Strong evidence, usually reproduced
    High,
    /// Plausible but unverified
    Medium,
    /// Speculative
    Low,
}

/// Vulnerability class of a finding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingKind {
    /// Reentrant external call
    Reentrancy,
    /// Arithmetic overflow or underflow
    IntegerOverflow,
    /// Missing or broken authorization
    AccessControl,
    /// Unchecked low-level call return
    UncheckedCall,
    /// Flash-loan amplified manipulation
    FlashLoan,
    /// Oracle or AMM price manipulation
    PriceManipulation,
    /// Anything else
    Other,
}

impl FindingKind {
    /// Slug used in branch names and signature ids.
    pub fn as_str(&self) -> &'static str {
        match self {
            FindingKind::Reentrancy => "reentrancy",
            FindingKind::IntegerOverflow => "integer_overflow",
            FindingKind::AccessControl => "access_control",
            FindingKind::UncheckedCall => "unchecked_call",
            FindingKind::FlashLoan => "flash_loan",
            FindingKind::PriceManipulation => "price_manipulation",
            FindingKind::Other => "other",
        }
    }
}

/// Which stage produced a finding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingSource {
    /// Static analyzer output
    Static,
    /// Fuzzing counterexample
    Fuzzing,
    /// Monitoring anomaly
    Monitoring,
    /// Fused by the triage cascade
    TriageFusion,
}

/// Triage quality marker on a fused finding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriageStatus {
    /// All three tiers completed
    Full,
    /// A Tier-2/3 failure demoted this finding to Tier-1 output
    Degraded,
}

/// An atomic vulnerability claim
///
/// Identity is `(scan_id, id)`. A finding is immutable once written; triage
/// produces new findings that reference originals via `fused_from`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    /// Stable id within the scan
    pub id: String,
    /// Vulnerability class
    #[serde(rename = "type")]
    pub finding_type: FindingKind,
    /// Severity level
    pub severity: Severity,
    /// Confidence level
    pub confidence: Confidence,
    /// Short title
    pub title: String,
    /// Narrative description
    pub description: String,
    /// Impact assessment
    #[serde(skip_serializing_if = "Option::is_none")]
    pub impact: Option<String>,
    /// Remediation advice
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recommendation: Option<String>,
    /// File/contract/function locator
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    /// Proof-of-concept source text
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proof_of_concept: Option<String>,
    /// Producing stage
    pub source: FindingSource,
    /// Ids of the originals a fused finding was built from
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fused_from: Vec<String>,
    /// Set by triage on fused findings
    #[serde(skip_serializing_if = "Option::is_none")]
    pub triage_status: Option<TriageStatus>,
    /// Tier-3 CVSS estimate
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cvss_estimate: Option<f32>,
    /// Tier-3 Immunefi severity mapping
    #[serde(skip_serializing_if = "Option::is_none")]
    pub immunefi_severity: Option<String>,
    /// Tier-3 HackenProof severity mapping
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hackenproof_severity: Option<String>,
    /// Tier-3 safe reproduction steps
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reproduction_steps: Vec<String>,
}

/// Severity histogram across a scan's fused findings
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FindingsSummary {
    /// Count of critical findings
    pub critical: u64,
    /// Count of high findings
    pub high: u64,
    /// Count of medium findings
    pub medium: u64,
    /// Count of low findings
    pub low: u64,
    /// Count of informational findings
    pub info: u64,
}

impl FindingsSummary {
    /// Aggregate the summary over a set of findings.
    pub fn aggregate(findings: &[Finding]) -> Self {
        let mut summary = FindingsSummary::default();
        for finding in findings {
            summary.increment(finding.severity);
        }
        summary
    }

    /// Bump the counter for one severity.
    pub fn increment(&mut self, severity: Severity) {
        match severity {
            Severity::Critical => self.critical += 1,
            Severity::High => self.high += 1,
            Severity::Medium => self.medium += 1,
            Severity::Low => self.low += 1,
            Severity::Info => self.info += 1,
        }
    }

    /// Total findings counted.
    pub fn total(&self) -> u64 {
        self.critical + self.high + self.medium + self.low + self.info
    }
}

/// Sandbox runtime for validation jobs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SandboxType {
    /// Foundry forge project
    Foundry,
    /// Hardhat project
    Hardhat,
    /// Generic container
    Docker,
}

impl Default for SandboxType {
    fn default() -> Self {
        SandboxType::Foundry
    }
}

/// Report output formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    /// Immunefi submission markdown
    Immunefi,
    /// HackenProof submission markdown
    Hackenproof,
    /// Machine-readable JSON
    Json,
}

impl ReportFormat {
    /// All formats, the default set.
    pub const ALL: [ReportFormat; 3] = [
        ReportFormat::Immunefi,
        ReportFormat::Hackenproof,
        ReportFormat::Json,
    ];
}

/// Notification channels attempted by reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotifyChannel {
    /// Slack webhook
    Slack,
    /// Email relay
    Email,
    /// GitHub issue creation
    GithubIssue,
}

/// Recognized scan options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Run the fuzzing stage
    #[serde(default = "default_true")]
    pub enable_fuzzing: bool,
    /// Monitoring window in minutes, 0..=60; 0 skips the stage
    #[serde(default = "default_monitor_minutes")]
    pub monitor_duration_minutes: u32,
    /// Sandbox runtime propagated to the validator
    #[serde(default)]
    pub sandbox_type: SandboxType,
    /// Permit live (non-forked) RPC; violations are fatal when false
    #[serde(default)]
    pub allow_live: bool,
    /// Formats reporting renders
    #[serde(default = "default_report_formats")]
    pub report_formats: Vec<ReportFormat>,
    /// Channels reporting notifies, best effort
    #[serde(default)]
    pub notify_channels: Vec<NotifyChannel>,
}

fn default_true() -> bool {
    true
}

fn default_monitor_minutes() -> u32 {
    5
}

fn default_report_formats() -> Vec<ReportFormat> {
    ReportFormat::ALL.to_vec()
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            enable_fuzzing: true,
            monitor_duration_minutes: 5,
            sandbox_type: SandboxType::default(),
            allow_live: false,
            report_formats: default_report_formats(),
            notify_channels: Vec::new(),
        }
    }
}

impl ScanConfig {
    /// Clamp and validate option ranges.
    pub fn validate(&self) -> crate::Result<()> {
        if self.monitor_duration_minutes > 60 {
            return Err(crate::Error::InvalidRequest(
                "monitor_duration_minutes must be in 0..=60".to_string(),
            ));
        }
        Ok(())
    }
}

/// One entry in the recon surface map
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SurfaceEntry {
    /// File name
    pub file: String,
    /// Path relative to the source root
    pub path: String,
    /// Detected language
    pub language: SourceLanguage,
    /// Import targets referenced by the file
    pub imports: Vec<String>,
}

/// Smart-contract source language
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceLanguage {
    /// Solidity (.sol)
    Solidity,
    /// Vyper (.vy)
    Vyper,
    /// Rust (Solana programs)
    Rust,
}

/// A contract source unit produced by recon
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractSource {
    /// Contract name
    pub name: String,
    /// Path relative to the source root
    pub path: String,
    /// Source language
    pub language: SourceLanguage,
    /// Full source text
    pub source: String,
    /// Verified ABI when fetched from an explorer
    #[serde(skip_serializing_if = "Option::is_none")]
    pub abi: Option<serde_json::Value>,
}

/// Recon stage output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconOutput {
    /// Surface map of all enumerated source files
    pub surface_map: Vec<SurfaceEntry>,
    /// Names of candidate entry contracts
    pub entry_contracts: Vec<String>,
    /// Contract sources handed to later stages
    pub contracts: Vec<ContractSource>,
    /// Completion marker
    pub stage_status: StageStatus,
}

/// A finding as emitted by one analyzer, before normalization
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawFinding {
    /// Analyzer that produced it
    pub analyzer: String,
    /// Analyzer-reported title
    pub title: String,
    /// Analyzer-reported severity
    pub severity: Severity,
    /// Analyzer-reported locator
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    /// Analyzer-reported description
    pub description: String,
}

/// Static stage output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaticOutput {
    /// Normalized findings
    pub findings: Vec<Finding>,
    /// Raw analyzer output preserved for triage
    pub raw_findings: Vec<RawFinding>,
    /// LLM summary of the aggregate, when available
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    /// Analyzers that completed
    pub analyzers_run: Vec<String>,
    /// Analyzers that failed or timed out
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub analyzers_failed: Vec<String>,
    /// Completion marker
    pub stage_status: StageStatus,
}

/// A shrunk failing case from the fuzzing harness
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CounterExample {
    /// Property that failed
    pub property: String,
    /// Original failing input
    pub input: String,
    /// Shrunk input
    pub shrunk: String,
}

/// Fuzzing stage output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FuzzingOutput {
    /// Findings derived from failing properties
    pub findings: Vec<Finding>,
    /// Failing cases with shrunk counterexamples
    pub failed_cases: Vec<CounterExample>,
    /// Coverage, only when the harness emits it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coverage_percent: Option<f64>,
    /// Completion marker
    pub stage_status: StageStatus,
}

/// A monitoring anomaly observation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Anomaly {
    /// Rule that fired
    pub rule: String,
    /// What was observed
    pub description: String,
    /// Assessed severity
    pub severity: Severity,
    /// Observation time
    pub observed_at: DateTime<Utc>,
    /// Transaction hash when applicable
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
}

/// Monitoring stage output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringOutput {
    /// Anomalies observed during the window
    pub anomalies: Vec<Anomaly>,
    /// Findings derived from anomalies
    pub findings: Vec<Finding>,
    /// Window length actually observed
    pub duration_minutes: u32,
    /// Completion marker
    pub stage_status: StageStatus,
}

/// A candidate dropped by the Tier-1 fast filter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilteredCandidate {
    /// The original finding
    pub finding: Finding,
    /// Tier-1 reason for dropping it
    pub reason: String,
}

/// Triage stage output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriageOutput {
    /// Fused findings that survived the cascade
    pub findings: Vec<Finding>,
    /// Candidates dropped at Tier 1, preserved for audit
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filtered: Vec<FilteredCandidate>,
    /// Severity histogram over `findings`
    pub summary: FindingsSummary,
    /// Completion marker
    pub stage_status: StageStatus,
}

/// A rendered report artifact
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportArtifact {
    /// Format rendered
    pub format: ReportFormat,
    /// Path the document was written to
    pub path: String,
}

/// Reporting stage output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportingOutput {
    /// Artifacts written
    pub artifacts: Vec<ReportArtifact>,
    /// Notification/render failures, best effort only
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub report_errors: Vec<String>,
    /// Completion marker
    pub stage_status: StageStatus,
}

/// Discriminated union of per-stage outputs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum StageResult {
    /// Recon output
    Recon(ReconOutput),
    /// Static output
    Static(StaticOutput),
    /// Fuzzing output
    Fuzzing(FuzzingOutput),
    /// Monitoring output
    Monitoring(MonitoringOutput),
    /// Triage output
    Triage(TriageOutput),
    /// Reporting output
    Reporting(ReportingOutput),
}

impl StageResult {
    /// The stage this result belongs to.
    pub fn stage(&self) -> Stage {
        match self {
            StageResult::Recon(_) => Stage::Recon,
            StageResult::Static(_) => Stage::Static,
            StageResult::Fuzzing(_) => Stage::Fuzzing,
            StageResult::Monitoring(_) => Stage::Monitoring,
            StageResult::Triage(_) => Stage::Triage,
            StageResult::Reporting(_) => Stage::Reporting,
        }
    }

    /// Completion marker of the inner output.
    pub fn stage_status(&self) -> StageStatus {
        match self {
            StageResult::Recon(o) => o.stage_status,
            StageResult::Static(o) => o.stage_status,
            StageResult::Fuzzing(o) => o.stage_status,
            StageResult::Monitoring(o) => o.stage_status,
            StageResult::Triage(o) => o.stage_status,
            StageResult::Reporting(o) => o.stage_status,
        }
    }
}

/// A scan record
///
/// Created on `POST /scan`, mutated only by the owning orchestrator task, and
/// never deleted by the system (the store may garbage-collect old records).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scan {
    /// Opaque unique identifier
    pub scan_id: String,
    /// What is being scanned
    pub target: ScanTarget,
    /// Optional chain hint from the request
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chain_hint: Option<Chain>,
    /// Recognized options
    pub scan_config: ScanConfig,
    /// Lifecycle state
    pub status: ScanStatus,
    /// 0..=100, monotonic non-decreasing
    pub progress: u8,
    /// Present iff status is running
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_stage: Option<Stage>,
    /// Outputs of stages that reached completion or failed with partials
    pub stage_results: BTreeMap<Stage, StageResult>,
    /// Aggregate of severities across triage output; zeros before triage
    pub findings_summary: FindingsSummary,
    /// Denormalized target for listings
    pub target_url: String,
    /// When the record was created
    pub started_at: DateTime<Utc>,
    /// When the scan reached a terminal state
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Derived wall-clock duration
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,
    /// Only set when status is failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Reporting-stage failures that did not demote the scan
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub report_errors: Vec<String>,
    /// Cooperative cancellation flag, checked between stages
    #[serde(default)]
    pub cancel_requested: bool,
}

impl Scan {
    /// Create a pending scan for the given target.
    pub fn new(target: ScanTarget, chain_hint: Option<Chain>, scan_config: ScanConfig) -> Self {
        let target_url = target.display_url();
        Self {
            scan_id: Uuid::new_v4().to_string(),
            target,
            chain_hint,
            scan_config,
            status: ScanStatus::Pending,
            progress: 0,
            current_stage: None,
            stage_results: BTreeMap::new(),
            findings_summary: FindingsSummary::default(),
            target_url,
            started_at: Utc::now(),
            completed_at: None,
            duration_seconds: None,
            error: None,
            report_errors: Vec::new(),
            cancel_requested: false,
        }
    }

    /// Mark the scan terminal, setting progress, timestamps, and duration.
    pub fn finish(&mut self, status: ScanStatus, error: Option<String>) {
        debug_assert!(status.is_terminal());
        let now = Utc::now();
        self.status = status;
        self.progress = 100;
        self.current_stage = None;
        self.error = error;
        self.completed_at = Some(now);
        self.duration_seconds = Some((now - self.started_at).num_milliseconds() as f64 / 1000.0);
    }
}

/// A validation job reproducing a finding's PoC in a sandbox
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationJob {
    /// Opaque job id
    pub job_id: String,
    /// Scan the finding came from, when internal
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scan_id: Option<String>,
    /// Finding id, or an external reference
    pub finding_id: String,
    /// Lifecycle state
    pub status: JobStatus,
    /// Sandbox runtime
    pub sandbox_type: SandboxType,
    /// Hard wall-clock bound for sandbox execution
    pub timeout_seconds: u64,
    /// Verdict; present iff status is completed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_valid: Option<bool>,
    /// Verdict confidence in 0.0..=1.0; present iff status is completed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    /// Captured execution trace
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_trace: Option<String>,
    /// Captured state diff
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_diff: Option<String>,
    /// Failure description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// When execution began
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// When a terminal state was reached
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Operator verdicts appended via the admin mark endpoint
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub operator_verdicts: Vec<OperatorVerdict>,
}

/// Validation job lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting in the queue
    Queued,
    /// Executing in its sandbox
    Running,
    /// Finished with a verdict
    Completed,
    /// Failed before producing a verdict
    Failed,
    /// Cancelled while queued
    Cancelled,
}

impl JobStatus {
    /// Whether the job holds no further resources.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

/// An operator verdict appended to a completed job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperatorVerdict {
    /// Operator's validity call
    pub is_valid: bool,
    /// Operator's confidence
    pub confidence: f64,
    /// When the verdict was recorded
    pub marked_at: DateTime<Utc>,
}

/// A pause request in the guardrail workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PauseRequest {
    /// Opaque request id
    pub id: String,
    /// Contract to pause
    pub contract_address: String,
    /// Chain the contract lives on
    pub chain: Chain,
    /// Why a pause was requested
    pub reason: String,
    /// Assessed severity of the trigger
    pub severity: Severity,
    /// Lifecycle state
    pub status: PauseStatus,
    /// Who emitted the request
    pub requester: PauseRequester,
    /// When the request was emitted
    pub created_at: DateTime<Utc>,
    /// When an approval or rejection was recorded
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decided_at: Option<DateTime<Utc>>,
    /// When the pause action was emitted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub executed_at: Option<DateTime<Utc>>,
    /// Last execution failure; status stays approved, no auto-retry
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Pause request lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PauseStatus {
    /// Waiting for an operator decision
    PendingApproval,
    /// Approved by the owning monitor's auto-pause rule
    AutoApproved,
    /// Approved by an admin-token-bearing operator
    Approved,
    /// The pause action was emitted through the adapter
    Executed,
    /// Rejected; terminal
    Rejected,
}

/// Who emitted a pause request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PauseRequester {
    /// An automated exploit-pattern rule
    AutoRule,
    /// An operator authenticated by the admin token
    OperatorToken,
}

/// A registered contract monitor
///
/// At most one monitor exists per (contract_address, chain).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorEntry {
    /// Contract under watch
    pub contract_address: String,
    /// Chain the contract lives on
    pub chain: Chain,
    /// Emit auto-approved pause requests on exploit patterns
    pub auto_pause: bool,
    /// Channels alerted on anomalies
    pub alert_channels: Vec<NotifyChannel>,
    /// When monitoring began
    pub started_at: DateTime<Utc>,
}
