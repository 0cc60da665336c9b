//! Guardrail: monitor registry and pause workflow
//!
//! Registers contract monitors and drives the pause-request state machine:
//! `pending_approval → approved|rejected → executed` for operator decisions,
//! and `pending_approval → auto_approved → executed` when the owning monitor
//! was created with auto-pause. Execution goes through a [`PauseAdapter`];
//! in the core that adapter records the intent rather than signing anything.

#![warn(missing_docs)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

pub mod api;

use async_trait::async_trait;
use bugbot_core::models::{
    Chain, MonitorEntry, NotifyChannel, PauseRequest, PauseRequester, PauseStatus, Severity,
};
use bugbot_core::{Error, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Receipt returned by a pause adapter
#[derive(Debug, Clone, Serialize)]
pub struct PauseReceipt {
    /// Adapter-specific reference (tx hash, proposal id, intent id)
    pub reference: String,
    /// When the action was emitted
    pub executed_at: DateTime<Utc>,
}

/// External collaborator that emits the actual pause action
#[async_trait]
pub trait PauseAdapter: Send + Sync {
    /// Emit the pause action for an approved request.
    async fn execute(&self, request: &PauseRequest) -> Result<PauseReceipt>;
}

/// Core adapter: records the intent and returns a synthetic receipt
#[derive(Default)]
pub struct RecordedIntentAdapter {
    intents: Mutex<Vec<PauseRequest>>,
}

impl RecordedIntentAdapter {
    /// Empty adapter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Intents recorded so far; used by tests and diagnostics.
    pub async fn intents(&self) -> Vec<PauseRequest> {
        self.intents.lock().await.clone()
    }
}

#[async_trait]
impl PauseAdapter for RecordedIntentAdapter {
    async fn execute(&self, request: &PauseRequest) -> Result<PauseReceipt> {
        self.intents.lock().await.push(request.clone());
        info!(
            "recorded pause intent for {} on {}",
            request.contract_address, request.chain
        );
        Ok(PauseReceipt {
            reference: format!("intent-{}", request.id),
            executed_at: Utc::now(),
        })
    }
}

/// The guardrail service state
pub struct GuardrailService {
    monitors: RwLock<HashMap<(String, Chain), MonitorEntry>>,
    requests: RwLock<HashMap<String, PauseRequest>>,
    adapter: Arc<dyn PauseAdapter>,
    pools: RwLock<HashMap<Chain, Arc<bugbot_rpc::RpcPool>>>,
}

impl GuardrailService {
    /// Service over the given adapter.
    pub fn new(adapter: Arc<dyn PauseAdapter>) -> Self {
        Self {
            monitors: RwLock::new(HashMap::new()),
            requests: RwLock::new(HashMap::new()),
            adapter,
            pools: RwLock::new(HashMap::new()),
        }
    }

    /// Register a monitor. At most one per (contract_address, chain).
    pub async fn start_monitor(
        &self,
        contract_address: String,
        chain: Chain,
        auto_pause: bool,
        alert_channels: Vec<NotifyChannel>,
    ) -> Result<MonitorEntry> {
        let key = (contract_address.to_lowercase(), chain);
        let mut monitors = self.monitors.write().await;
        if monitors.contains_key(&key) {
            return Err(Error::Conflict(format!(
                "monitor already exists for {} on {}",
                contract_address, chain
            )));
        }
        let entry = MonitorEntry {
            contract_address,
            chain,
            auto_pause,
            alert_channels,
            started_at: Utc::now(),
        };
        monitors.insert(key, entry.clone());
        info!(
            "monitor started for {} on {} (auto_pause={})",
            entry.contract_address, chain, auto_pause
        );
        Ok(entry)
    }

    /// Deregister every monitor for an address, returning how many stopped.
    pub async fn stop_monitor(&self, contract_address: &str) -> usize {
        let needle = contract_address.to_lowercase();
        let mut monitors = self.monitors.write().await;
        let before = monitors.len();
        monitors.retain(|(address, _), _| *address != needle);
        let stopped = before - monitors.len();
        if stopped > 0 {
            info!("stopped {} monitor(s) for {}", stopped, contract_address);
        }
        stopped
    }

    /// All registered monitors.
    pub async fn monitors(&self) -> Vec<MonitorEntry> {
        let mut entries: Vec<MonitorEntry> = self.monitors.read().await.values().cloned().collect();
        entries.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        entries
    }

    /// Emit a pause request.
    ///
    /// Auto-approval happens only when the request comes from an automated
    /// rule and the owning monitor had `auto_pause=true` at emission time;
    /// toggling the flag later never retroactively approves pending requests.
    #[instrument(skip(self, reason))]
    pub async fn emit_pause_request(
        &self,
        contract_address: String,
        chain: Chain,
        reason: String,
        severity: Severity,
        requester: PauseRequester,
    ) -> Result<PauseRequest> {
        let auto_pause_owner = {
            let monitors = self.monitors.read().await;
            monitors
                .get(&(contract_address.to_lowercase(), chain))
                .map(|m| m.auto_pause)
                .unwrap_or(false)
        };

        let mut request = PauseRequest {
            id: Uuid::new_v4().to_string(),
            contract_address,
            chain,
            reason,
            severity,
            status: PauseStatus::PendingApproval,
            requester: requester.clone(),
            created_at: Utc::now(),
            decided_at: None,
            executed_at: None,
            last_error: None,
        };

        if requester == PauseRequester::AutoRule && auto_pause_owner {
            request.status = PauseStatus::AutoApproved;
            request.decided_at = Some(Utc::now());
            self.execute(&mut request).await;
        }

        self.requests
            .write()
            .await
            .insert(request.id.clone(), request.clone());
        info!(
            "pause request {} for {} is {:?}",
            request.id, request.contract_address, request.status
        );
        Ok(request)
    }

    /// Operator approval; only legal from `pending_approval`.
    pub async fn approve(&self, id: &str) -> Result<PauseRequest> {
        let mut request = self.get_request(id).await?;
        if request.status != PauseStatus::PendingApproval {
            return Err(Error::Conflict(format!(
                "pause request {id} is {:?}, not pending approval",
                request.status
            )));
        }
        request.status = PauseStatus::Approved;
        request.decided_at = Some(Utc::now());
        self.execute(&mut request).await;
        self.requests
            .write()
            .await
            .insert(id.to_string(), request.clone());
        Ok(request)
    }

    /// Operator rejection; terminal, only legal from `pending_approval`.
    pub async fn reject(&self, id: &str) -> Result<PauseRequest> {
        let mut request = self.get_request(id).await?;
        if request.status != PauseStatus::PendingApproval {
            return Err(Error::Conflict(format!(
                "pause request {id} is {:?}, not pending approval",
                request.status
            )));
        }
        request.status = PauseStatus::Rejected;
        request.decided_at = Some(Utc::now());
        self.requests
            .write()
            .await
            .insert(id.to_string(), request.clone());
        info!("pause request {} rejected", id);
        Ok(request)
    }

    /// All pause requests, newest first.
    pub async fn requests(&self) -> Vec<PauseRequest> {
        let mut entries: Vec<PauseRequest> = self.requests.read().await.values().cloned().collect();
        entries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        entries
    }

    async fn get_request(&self, id: &str) -> Result<PauseRequest> {
        self.requests
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("pause request {id}")))
    }

    /// Run the adapter; on failure the status is left as-is and `last_error`
    /// is set. Retries are operator-driven, never automatic.
    async fn execute(&self, request: &mut PauseRequest) {
        debug_assert!(matches!(
            request.status,
            PauseStatus::Approved | PauseStatus::AutoApproved
        ));
        match self.adapter.execute(request).await {
            Ok(receipt) => {
                request.status = PauseStatus::Executed;
                request.executed_at = Some(receipt.executed_at);
                request.last_error = None;
            }
            Err(e) => {
                warn!("pause execution failed for {}: {}", request.id, e);
                request.last_error = Some(e.to_string());
            }
        }
    }

    /// Diagnostic mirror of the RPC pool status for every chain in use.
    pub async fn rpc_status(&self) -> Vec<bugbot_rpc::PoolStatus> {
        let chains: Vec<Chain> = {
            let monitors = self.monitors.read().await;
            let mut chains: Vec<Chain> = monitors.keys().map(|(_, chain)| *chain).collect();
            chains.sort();
            chains.dedup();
            chains
        };

        let mut statuses = Vec::new();
        for chain in chains {
            if let Some(pool) = self.pools.read().await.get(&chain) {
                statuses.push(pool.status());
                continue;
            }
            if let Ok(pool) = bugbot_rpc::RpcPool::from_env(chain) {
                let pool = Arc::new(pool);
                statuses.push(pool.status());
                self.pools.write().await.insert(chain, pool);
            }
        }
        statuses
    }

    /// Pre-seed a pool; used by tests and by callers sharing pools.
    pub async fn attach_pool(&self, chain: Chain, pool: Arc<bugbot_rpc::RpcPool>) {
        self.pools.write().await.insert(chain, pool);
    }

    /// One pass of exploit-pattern detection over every registered monitor.
    ///
    /// The only wired rule is the large-transfer pattern: a Transfer log
    /// moving more than the threshold emits an automated pause request
    /// (auto-approved when the owning monitor allows it). The caller drives
    /// the cadence; a sweep never blocks on a consumer.
    pub async fn run_detection_sweep(&self) -> usize {
        let monitors = self.monitors().await;
        let mut emitted = 0usize;
        for monitor in monitors {
            let Some(pool) = self.pool_handle(monitor.chain).await else {
                continue;
            };
            let handle = pool.get_client();
            let logs = match handle
                .get_logs(serde_json::json!({
                    "address": monitor.contract_address,
                    "fromBlock": "latest",
                    "toBlock": "latest",
                }))
                .await
            {
                Ok(logs) => logs,
                Err(e) => {
                    warn!(
                        "detection sweep could not read logs for {}: {}",
                        monitor.contract_address, e
                    );
                    continue;
                }
            };

            for log in logs {
                let is_large_transfer = log["topics"]
                    .get(0)
                    .and_then(|t| t.as_str())
                    .map(|t| t.eq_ignore_ascii_case(TRANSFER_TOPIC))
                    .unwrap_or(false)
                    && log["data"]
                        .as_str()
                        .and_then(parse_transfer_value)
                        .map(|v| v > LARGE_TRANSFER_WEI)
                        .unwrap_or(false);
                if !is_large_transfer {
                    continue;
                }
                let result = self
                    .emit_pause_request(
                        monitor.contract_address.clone(),
                        monitor.chain,
                        "large-value transfer matched exploit pattern".to_string(),
                        Severity::Critical,
                        PauseRequester::AutoRule,
                    )
                    .await;
                if result.is_ok() {
                    emitted += 1;
                }
                break;
            }
        }
        emitted
    }

    async fn pool_handle(&self, chain: Chain) -> Option<Arc<bugbot_rpc::RpcPool>> {
        if let Some(pool) = self.pools.read().await.get(&chain) {
            return Some(Arc::clone(pool));
        }
        let pool = Arc::new(bugbot_rpc::RpcPool::from_env(chain).ok()?);
        self.pools.write().await.insert(chain, Arc::clone(&pool));
        Some(pool)
    }
}

/// keccak("Transfer(address,address,uint256)")
const TRANSFER_TOPIC: &str = "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef";

/// Transfers above this many wei trip the exploit rule (100 ETH-equivalent).
const LARGE_TRANSFER_WEI: u128 = 100_000_000_000_000_000_000;

fn parse_transfer_value(data: &str) -> Option<u128> {
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
