//! Detection signature generation
//!
//! One finding yields four self-describing signatures: a YARA rule, a Sigma
//! rule, a Suricata rule, and a custom JSON document. Export concatenates
//! the selected format across a set of findings; the JSON export parses back
//! to the same logical rule set.

use axum::extract::{Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use bugbot_core::models::Finding;
use bugbot_core::{Error, Result};
use bugbot_service::error::ApiResult;
use bugbot_service::{HealthReport, ServiceMetrics};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::RwLock;

/// The four signature outputs for one finding
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignatureSet {
    /// Rule identifier shared across all four outputs
    pub rule_id: String,
    /// YARA source
    pub yara: String,
    /// Sigma YAML source
    pub sigma: String,
    /// Suricata rule line
    pub suricata: String,
    /// Self-describing JSON rule
    pub custom: Value,
}

/// Export formats accepted by `POST /signatures/export`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    /// YARA ruleset
    Yara,
    /// Sigma document stream
    Sigma,
    /// Suricata rule file
    Suricata,
    /// JSON array of custom rules
    Json,
}

/// Generate the four signatures for a finding.
pub fn generate(finding: &Finding) -> SignatureSet {
    let rule_id = format!("bugbot_{}_{}", finding.finding_type.as_str(), finding.id)
        .replace('-', "_")
        .to_lowercase();
    let severity = finding.severity.as_str();
    let title = finding.title.replace('"', "'");

    let yara = format!(
        "rule {rule_id}\n{{\n    meta:\n        description = \"{title}\"\n        severity = \"{severity}\"\n        source = \"bugbot\"\n    strings:\n        $selector = \"{selector}\" nocase\n    condition:\n        $selector\n}}\n",
        selector = finding.location.as_deref().unwrap_or(&finding.title),
    );

    let sigma = format!(
        "title: {title}\nid: {rule_id}\nstatus: experimental\ndescription: {title}\nlevel: {severity}\nlogsource:\n    product: blockchain\n    service: bugbot\ndetection:\n    selection:\n        finding_type: {kind}\n    condition: selection\n",
        kind = finding.finding_type.as_str(),
    );

    let suricata = format!(
        "alert tcp any any -> any any (msg:\"BUGBOT {title}\"; classtype:attempted-admin; sid:{sid}; rev:1; metadata:severity {severity};)",
        sid = 9_100_000 + sid_for(&rule_id),
    );

    let custom = json!({
        "schema": "bugbot/signature/v1",
        "rule_id": rule_id,
        "finding_id": finding.id,
        "finding_type": finding.finding_type,
        "severity": finding.severity,
        "title": finding.title,
        "location": finding.location,
    });

    SignatureSet {
        rule_id,
        yara,
        sigma,
        suricata,
        custom,
    }
}

/// Deterministic small discriminator for Suricata sids.
fn sid_for(rule_id: &str) -> u64 {
    rule_id
        .bytes()
        .fold(0u64, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u64))
        % 100_000
}

/// Concatenate one format across a set of signatures for download.
pub fn export(format: ExportFormat, sets: &[SignatureSet]) -> Result<String> {
    match format {
        ExportFormat::Yara => Ok(sets.iter().map(|s| s.yara.as_str()).collect::<Vec<_>>().join("\n")),
        ExportFormat::Sigma => Ok(sets
            .iter()
            .map(|s| s.sigma.as_str())
            .collect::<Vec<_>>()
            .join("---\n")),
        ExportFormat::Suricata => Ok(sets
            .iter()
            .map(|s| s.suricata.as_str())
            .collect::<Vec<_>>()
            .join("\n")),
        ExportFormat::Json => {
            let rules: Vec<&Value> = sets.iter().map(|s| &s.custom).collect();
            serde_json::to_string_pretty(&rules).map_err(Error::from)
        }
    }
}

/// Parse a JSON export back into its rule ids; the round-trip law for the
/// custom format.
pub fn parse_json_export(document: &str) -> Result<Vec<String>> {
    let rules: Vec<Value> = serde_json::from_str(document)?;
    rules
        .iter()
        .map(|rule| {
            rule["rule_id"]
                .as_str()
                .map(str::to_string)
                .ok_or_else(|| Error::InvalidRequest("rule missing rule_id".to_string()))
        })
        .collect()
}

/// Router state: generated signatures kept for export
pub struct SignatureState {
    generated: RwLock<Vec<SignatureSet>>,
    metrics: Arc<ServiceMetrics>,
}

impl SignatureState {
    /// Empty state.
    pub fn new() -> Self {
        Self {
            generated: RwLock::new(Vec::new()),
            metrics: Arc::new(ServiceMetrics::new("signature-generator")),
        }
    }
}

impl Default for SignatureState {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
struct GenerateBody {
    finding: Finding,
}

#[derive(Debug, Deserialize)]
struct ExportParams {
    format: ExportFormat,
}

/// Build the signature-generator router.
pub fn signatures_router(state: Arc<SignatureState>) -> Router {
    Router::new()
        .route("/signatures/generate", post(generate_handler))
        .route("/signatures/export", post(export_handler))
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .layer(bugbot_service::cors_layer(
            &bugbot_core::config::dashboard_origins(),
        ))
        .with_state(state)
}

async fn generate_handler(
    State(state): State<Arc<SignatureState>>,
    Json(body): Json<GenerateBody>,
) -> ApiResult<Json<SignatureSet>> {
    let set = generate(&body.finding);
    state.generated.write().await.push(set.clone());
    Ok(Json(set))
}

async fn export_handler(
    State(state): State<Arc<SignatureState>>,
    Query(params): Query<ExportParams>,
) -> ApiResult<String> {
    let sets = state.generated.read().await;
    Ok(export(params.format, &sets)?)
}

async fn health(State(state): State<Arc<SignatureState>>) -> Json<HealthReport> {
    let report = HealthReport::healthy("signature-generator");
    state.metrics.set_health(report.status);
    Json(report)
}

async fn metrics(State(state): State<Arc<SignatureState>>) -> String {
    state.metrics.render()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bugbot_core::models::{Confidence, FindingKind, FindingSource, Severity};
    use pretty_assertions::assert_eq;

    fn finding(id: &str) -> Finding {
        Finding {
            id: id.to_string(),
            finding_type: FindingKind::Reentrancy,
            severity: Severity::Critical,
            confidence: Confidence::High,
            title: "Reentrancy in withdraw".to_string(),
            description: "external call before state update".to_string(),
            impact: None,
            recommendation: None,
            location: Some("Vault.sol:42".to_string()),
            proof_of_concept: None,
            source: FindingSource::TriageFusion,
            fused_from: vec![],
            triage_status: None,
            cvss_estimate: None,
            immunefi_severity: None,
            hackenproof_severity: None,
            reproduction_steps: vec![],
        }
    }

    #[test]
    fn all_four_outputs_are_self_describing() {
        let set = generate(&finding("T-001"));
        assert!(set.yara.contains(&set.rule_id));
        assert!(set.yara.contains("severity = \"critical\""));
        assert!(set.sigma.contains("finding_type: reentrancy"));
        assert!(set.suricata.contains("BUGBOT"));
        assert_eq!(set.custom["schema"], "bugbot/signature/v1");
        assert_eq!(set.custom["rule_id"], set.rule_id.as_str());
    }

    #[test]
    fn json_export_round_trips_to_the_same_rule_set() -> anyhow::Result<()> {
        let sets = vec![generate(&finding("T-001")), generate(&finding("T-002"))];
        let document = export(ExportFormat::Json, &sets)?;
        let parsed = parse_json_export(&document)?;
        let original: Vec<String> = sets.iter().map(|s| s.rule_id.clone()).collect();
        assert_eq!(parsed, original);
        Ok(())
    }

    #[test]
    fn text_exports_contain_every_rule() -> anyhow::Result<()> {
        let sets = vec![generate(&finding("T-001")), generate(&finding("T-002"))];
        for format in [ExportFormat::Yara, ExportFormat::Sigma, ExportFormat::Suricata] {
            let document = export(format, &sets)?;
            for set in &sets {
                let marker = match format {
                    ExportFormat::Suricata => set.suricata.clone(),
                    _ => set.rule_id.clone(),
                };
                assert!(document.contains(&marker), "{format:?} export missing a rule");
            }
        }
        Ok(())
    }

    #[test]
    fn sids_are_deterministic() {
        let a = generate(&finding("T-001"));
        let b = generate(&finding("T-001"));
        assert_eq!(a.suricata, b.suricata);
    }
}
