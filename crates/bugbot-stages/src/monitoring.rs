//! Monitoring stage worker
//!
//! Watches a deployed address for a bounded window through the RPC pool and
//! applies simple anomaly rules: large-value transfers, oracle price
//! deviation, and block-number drift between polls. The worker runs strictly
//! for the configured window; the orchestrator enforces the outer
//! `duration + 60s` bound.

use crate::worker::{StageRequest, StageWorker};
use async_trait::async_trait;
use bugbot_core::models::{
    Anomaly, Chain, Confidence, Finding, FindingKind, FindingSource, MonitoringOutput, Severity,
    Stage, StageResult, StageStatus,
};
use bugbot_core::Result;
use bugbot_rpc::RpcPool;
use chrono::Utc;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// keccak("Transfer(address,address,uint256)")
const TRANSFER_TOPIC: &str = "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef";

/// Chainlink-style `latestAnswer()` selector
const LATEST_ANSWER_SELECTOR: &str = "0x50d25bcd";

/// Transfers above this many wei are anomalous (100 ETH-equivalent).
const DEFAULT_LARGE_TRANSFER_WEI: u128 = 100_000_000_000_000_000_000;

/// Oracle moves beyond this fraction between polls are anomalous.
const ORACLE_DEVIATION_LIMIT: f64 = 0.05;

/// The monitoring stage worker
pub struct MonitoringWorker {
    pools: RwLock<HashMap<Chain, Arc<RpcPool>>>,
    poll_interval: Duration,
    minute: Duration,
    large_transfer_wei: u128,
}

impl MonitoringWorker {
    /// Worker with production timing (10s polls, real minutes).
    pub fn new() -> Self {
        Self {
            pools: RwLock::new(HashMap::new()),
            poll_interval: Duration::from_secs(10),
            minute: Duration::from_secs(60),
            large_transfer_wei: DEFAULT_LARGE_TRANSFER_WEI,
        }
    }

    /// Override poll cadence and window scale; used by tests.
    pub fn with_timing(mut self, poll_interval: Duration, minute: Duration) -> Self {
        self.poll_interval = poll_interval;
        self.minute = minute;
        self
    }

    /// Pre-seed a pool for a chain instead of building one from the
    /// environment.
    pub async fn with_pool(self, chain: Chain, pool: Arc<RpcPool>) -> Self {
        self.pools.write().await.insert(chain, pool);
        self
    }

    async fn pool_for(&self, chain: Chain) -> Result<Arc<RpcPool>> {
        if let Some(pool) = self.pools.read().await.get(&chain) {
            return Ok(Arc::clone(pool));
        }
        let pool = Arc::new(
            RpcPool::from_env(chain)
                .map_err(|e| bugbot_core::Error::InvalidRequest(e.to_string()))?,
        );
        self.pools.write().await.insert(chain, Arc::clone(&pool));
        Ok(pool)
    }

    fn oracle_feed(&self, chain: Chain) -> Option<String> {
        let name = format!("{}_ORACLE_FEED", chain.as_str().to_uppercase());
        bugbot_core::config::env_opt(&name)
    }
}

impl Default for MonitoringWorker {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse a 0x-prefixed 32-byte word into a u128, saturating on overflow.
fn parse_word_u128(data: &str) -> Option<u128> {
    let digits = data.strip_prefix("0x")?;
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    if digits.len() > 32 {
        let (high, low) = digits.split_at(digits.len() - 32);
        if high.chars().any(|c| c != '0') {
            return Some(u128::MAX);
        }
        u128::from_str_radix(low, 16).ok()
    } else {
        u128::from_str_radix(digits, 16).ok()
    }
}

#[async_trait]
impl StageWorker for MonitoringWorker {
    fn stage(&self) -> Stage {
        Stage::Monitoring
    }

    async fn run(&self, request: StageRequest) -> Result<StageResult> {
        let minutes = request.scan_config.monitor_duration_minutes;
        let Some(address) = request.contract_address().map(str::to_string) else {
            debug!("no deployed address on this scan; monitoring is a no-op");
            return Ok(StageResult::Monitoring(MonitoringOutput {
                anomalies: Vec::new(),
                findings: Vec::new(),
                duration_minutes: 0,
                stage_status: StageStatus::Complete,
            }));
        };
        let chain = match request.chain {
            Some(chain) => chain,
            None => bugbot_chains::detect::detect_chain(&address, None)?,
        };

        let pool = self.pool_for(chain).await?;
        let handle = pool.get_client();
        let oracle_feed = self.oracle_feed(chain);

        let deadline = Instant::now() + self.minute.saturating_mul(minutes);
        let mut anomalies = Vec::new();
        let mut last_block: Option<u64> = None;
        let mut last_price: Option<i128> = None;
        let mut polls = 0u32;
        let mut failed_polls = 0u32;

        info!("monitoring {} on {} for {}m", address, chain, minutes);
        loop {
            polls += 1;

            match handle.block_number().await {
                Ok(block) => {
                    if let Some(last) = last_block {
                        if block < last {
                            anomalies.push(Anomaly {
                                rule: "multi_rpc_drift".to_string(),
                                description: format!(
                                    "block number regressed from {last} to {block} between polls"
                                ),
                                severity: Severity::Medium,
                                observed_at: Utc::now(),
                                tx_hash: None,
                            });
                        }
                    }

                    let from_block = last_block.map(|b| b + 1).unwrap_or(block);
                    last_block = Some(block.max(last_block.unwrap_or(0)));

                    match handle
                        .get_logs(json!({
                            "address": address,
                            "fromBlock": format!("0x{from_block:x}"),
                            "toBlock": "latest",
                        }))
                        .await
                    {
                        Ok(logs) => {
                            for log in logs {
                                let is_transfer = log["topics"]
                                    .get(0)
                                    .and_then(|t| t.as_str())
                                    .map(|t| t.eq_ignore_ascii_case(TRANSFER_TOPIC))
                                    .unwrap_or(false);
                                if !is_transfer {
                                    continue;
                                }
                                let value = log["data"]
                                    .as_str()
                                    .and_then(parse_word_u128)
                                    .unwrap_or(0);
                                if value > self.large_transfer_wei {
                                    anomalies.push(Anomaly {
                                        rule: "large_value_transfer".to_string(),
                                        description: format!(
                                            "transfer of {value} wei observed on {address}"
                                        ),
                                        severity: Severity::High,
                                        observed_at: Utc::now(),
                                        tx_hash: log["transactionHash"]
                                            .as_str()
                                            .map(str::to_string),
                                    });
                                }
                            }
                        }
                        Err(e) => {
                            debug!("log poll failed: {}", e);
                            failed_polls += 1;
                        }
                    }
                }
                Err(e) => {
                    debug!("block poll failed: {}", e);
                    failed_polls += 1;
                }
            }

            if let Some(feed) = &oracle_feed {
                if let Ok(answer) = handle
                    .call(json!({"to": feed, "data": LATEST_ANSWER_SELECTOR}))
                    .await
                {
                    if let Some(price) = parse_word_u128(&answer).map(|v| v as i128) {
                        if let Some(previous) = last_price {
                            let deviation =
                                (price - previous).unsigned_abs() as f64 / previous.max(1) as f64;
                            if deviation > ORACLE_DEVIATION_LIMIT {
                                anomalies.push(Anomaly {
                                    rule: "oracle_deviation".to_string(),
                                    description: format!(
                                        "oracle {feed} moved {:.1}% between polls",
                                        deviation * 100.0
                                    ),
                                    severity: Severity::High,
                                    observed_at: Utc::now(),
                                    tx_hash: None,
                                });
                            }
                        }
                        last_price = Some(price);
                    }
                }
            }

            if Instant::now() >= deadline {
                break;
            }
            tokio::time::sleep(self.poll_interval).await;
            if Instant::now() >= deadline {
                break;
            }
        }

        let findings = anomalies
            .iter()
            .filter(|a| a.severity <= Severity::High)
            .enumerate()
            .map(|(idx, anomaly)| Finding {
                id: format!("M-{:03}", idx + 1),
                finding_type: if anomaly.rule == "oracle_deviation" {
                    FindingKind::PriceManipulation
                } else {
                    FindingKind::Other
                },
                severity: anomaly.severity,
                confidence: Confidence::Medium,
                title: format!("Monitoring anomaly: {}", anomaly.rule),
                description: anomaly.description.clone(),
                impact: None,
                recommendation: None,
                location: Some(address.clone()),
                proof_of_concept: None,
                source: FindingSource::Monitoring,
                fused_from: Vec::new(),
                triage_status: None,
                cvss_estimate: None,
                immunefi_severity: None,
                hackenproof_severity: None,
                reproduction_steps: Vec::new(),
            })
            .collect();

        let stage_status = if failed_polls > 0 && failed_polls >= polls {
            StageStatus::Partial
        } else {
            StageStatus::Complete
        };
        if failed_polls > 0 {
            warn!("{}/{} monitoring polls failed", failed_polls, polls);
        }

        Ok(StageResult::Monitoring(MonitoringOutput {
            anomalies,
            findings,
            duration_minutes: minutes,
            stage_status,
        }))
    }
}
