//! Multi-provider JSON-RPC pool
//!
//! Presents a single façade over N JSON-RPC providers for one chain. Each call
//! is attempted in priority order against healthy providers until one
//! succeeds; a provider accumulates consecutive failures and opens its circuit
//! at the threshold. A background health task demotes and re-enables providers
//! between calls.
//!
//! # Features
//! - Ordered failover with per-call timeouts
//! - Per-provider circuit breaker (threshold 5, timeout 300s)
//! - Cooperative background health checks (60s interval)
//! - Live-write guard: state-changing methods are refused unless allowed

#![warn(missing_docs)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

mod handle;

pub use handle::RpcHandle;

use bugbot_core::models::Chain;
use bugbot_core::redaction::strip_url_query;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

/// Errors from the RPC pool
#[derive(Debug, Error)]
pub enum RpcError {
    /// Every configured provider was unavailable or failing
    #[error("all providers failed for {chain}: {detail}")]
    AllProvidersFailed {
        /// Chain the pool serves
        chain: Chain,
        /// Redacted description of the last failure
        detail: String,
    },

    /// The node rejected the request for a stable client-side reason
    #[error("rpc rejected request (code {code}): {message}")]
    NonRetryable {
        /// JSON-RPC error code
        code: i64,
        /// Node-reported message
        message: String,
    },

    /// A state-changing method was attempted without ALLOW_LIVE
    #[error("live write blocked: {0} requires ALLOW_LIVE=1")]
    LiveWriteBlocked(String),

    /// The response body was not valid JSON-RPC
    #[error("malformed rpc response: {0}")]
    Malformed(String),
}

impl From<RpcError> for bugbot_core::Error {
    fn from(err: RpcError) -> Self {
        match err {
            RpcError::AllProvidersFailed { .. } => {
                bugbot_core::Error::BackendUnavailable(err.to_string())
            }
            RpcError::NonRetryable { .. } | RpcError::Malformed(_) => {
                bugbot_core::Error::InvalidRequest(err.to_string())
            }
            RpcError::LiveWriteBlocked(_) => bugbot_core::Error::UnsafeInput(err.to_string()),
        }
    }
}

/// Health state of one provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderStatus {
    /// Responding normally
    Healthy,
    /// Recent failures, still attempted
    Degraded,
    /// Last health probe failed
    Failed,
    /// Circuit open; skipped until the circuit timeout elapses
    CircuitOpen,
}

/// JSON-RPC methods that mutate chain state, blocked without ALLOW_LIVE=1.
const STATE_CHANGING_METHODS: [&str; 2] = ["eth_sendTransaction", "eth_sendRawTransaction"];

/// Pool thresholds
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Consecutive failures before a circuit opens
    pub circuit_threshold: u32,
    /// How long an open circuit is skipped before a tentative retry
    pub circuit_timeout: Duration,
    /// Background health probe interval
    pub health_check_interval: Duration,
    /// Per-call timeout against a single provider
    pub call_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            circuit_threshold: 5,
            circuit_timeout: Duration::from_secs(300),
            health_check_interval: Duration::from_secs(60),
            call_timeout: Duration::from_secs(10),
        }
    }
}

/// Mutable provider state, guarded by a short-lived lock
#[derive(Debug)]
struct ProviderState {
    status: ProviderStatus,
    consecutive_failures: u32,
    last_check_at: Option<DateTime<Utc>>,
    circuit_opened_at: Option<DateTime<Utc>>,
}

struct Provider {
    url: String,
    state: Mutex<ProviderState>,
}

impl Provider {
    fn new(url: String) -> Self {
        Self {
            url,
            state: Mutex::new(ProviderState {
                status: ProviderStatus::Healthy,
                consecutive_failures: 0,
                last_check_at: None,
                circuit_opened_at: None,
            }),
        }
    }

    /// Short display form with the query string (where keys live) removed.
    fn display_url(&self) -> String {
        strip_url_query(&self.url)
    }

    /// Whether a call should attempt this provider right now.
    fn attemptable(&self, circuit_timeout: Duration) -> bool {
        let state = match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        match state.status {
            ProviderStatus::CircuitOpen => state
                .circuit_opened_at
                .map(|opened| {
                    (Utc::now() - opened).num_seconds() as u64 >= circuit_timeout.as_secs()
                })
                .unwrap_or(true),
            _ => true,
        }
    }

    fn record_success(&self) {
        let mut state = match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        state.consecutive_failures = 0;
        state.circuit_opened_at = None;
        state.status = ProviderStatus::Healthy;
    }

    /// Returns true when this failure opened the circuit.
    fn record_failure(&self, threshold: u32) -> bool {
        let mut state = match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        state.consecutive_failures += 1;
        if state.consecutive_failures >= threshold
            && state.status != ProviderStatus::CircuitOpen
        {
            state.status = ProviderStatus::CircuitOpen;
            state.circuit_opened_at = Some(Utc::now());
            true
        } else {
            false
        }
    }

    fn snapshot(&self) -> ProviderSnapshot {
        let state = match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        ProviderSnapshot {
            url: self.display_url(),
            status: state.status,
            consecutive_failures: state.consecutive_failures,
            last_check_at: state.last_check_at,
        }
    }
}

/// Point-in-time view of one provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSnapshot {
    /// Provider URL with the query string stripped
    pub url: String,
    /// Current health state
    pub status: ProviderStatus,
    /// Consecutive failure count
    pub consecutive_failures: u32,
    /// When the last health probe ran
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_check_at: Option<DateTime<Utc>>,
}

/// Point-in-time view of the whole pool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolStatus {
    /// Chain the pool serves
    pub chain: Chain,
    /// Per-provider snapshots, in priority order
    pub providers: Vec<ProviderSnapshot>,
    /// Providers currently healthy
    pub healthy: usize,
    /// Providers currently degraded
    pub degraded: usize,
    /// Providers whose last probe failed
    pub failed: usize,
    /// Providers with an open circuit
    pub circuit_open: usize,
    /// Calls that required failing over past the first attempted provider
    pub failovers_total: u64,
}

/// Multi-provider JSON-RPC pool for one chain
pub struct RpcPool {
    chain: Chain,
    providers: Vec<Arc<Provider>>,
    http: reqwest::Client,
    config: PoolConfig,
    allow_live: bool,
    failovers: AtomicU64,
    health_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
    shutdown: Arc<tokio::sync::Notify>,
}

impl RpcPool {
    /// Create a pool over the given provider URLs, in priority order.
    pub fn new(chain: Chain, urls: Vec<String>, config: PoolConfig, allow_live: bool) -> Self {
        let http = reqwest::Client::builder()
            .timeout(config.call_timeout)
            .build()
            .unwrap_or_default();
        Self {
            chain,
            providers: urls.into_iter().map(|u| Arc::new(Provider::new(u))).collect(),
            http,
            config,
            allow_live,
            failovers: AtomicU64::new(0),
            health_task: Mutex::new(None),
            shutdown: Arc::new(tokio::sync::Notify::new()),
        }
    }

    /// Pool for a chain configured from `<CHAIN>_RPC_URL` / `_BACKUP`.
    pub fn from_env(chain: Chain) -> Result<Self, bugbot_core::config::ConfigError> {
        let urls = bugbot_core::config::rpc_urls_for(chain)?;
        Ok(Self::new(
            chain,
            urls,
            PoolConfig::default(),
            bugbot_core::config::allow_live(),
        ))
    }

    /// The chain this pool serves.
    pub fn chain(&self) -> Chain {
        self.chain
    }

    /// A handle with typed read helpers, sharing this pool's failover policy.
    pub fn get_client(self: &Arc<Self>) -> RpcHandle {
        RpcHandle::new(Arc::clone(self))
    }

    /// Raw JSON-RPC passthrough with the pool's failover policy.
    #[instrument(skip(self, params), fields(chain = %self.chain, method))]
    pub async fn execute(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        if STATE_CHANGING_METHODS.contains(&method) && !self.allow_live {
            return Err(RpcError::LiveWriteBlocked(method.to_string()));
        }

        let mut last_detail = "no providers configured".to_string();
        let mut attempted = 0usize;

        for provider in &self.providers {
            if !provider.attemptable(self.config.circuit_timeout) {
                debug!("skipping circuit-open provider {}", provider.display_url());
                continue;
            }
            attempted += 1;
            if attempted > 1 {
                self.failovers.fetch_add(1, Ordering::Relaxed);
            }

            match self.call_provider(provider, method, &params).await {
                Ok(result) => {
                    provider.record_success();
                    return Ok(result);
                }
                // Stable client-side problems are not worth retrying elsewhere.
                Err(err @ RpcError::NonRetryable { .. }) => return Err(err),
                Err(err) => {
                    last_detail = strip_url_query(&err.to_string());
                    let opened = provider.record_failure(self.config.circuit_threshold);
                    if opened {
                        warn!(
                            "circuit opened for provider {} on {}",
                            provider.display_url(),
                            self.chain
                        );
                    } else {
                        debug!(
                            "provider {} failed, trying next: {}",
                            provider.display_url(),
                            last_detail
                        );
                    }
                }
            }
        }

        Err(RpcError::AllProvidersFailed {
            chain: self.chain,
            detail: last_detail,
        })
    }

    async fn call_provider(
        &self,
        provider: &Provider,
        method: &str,
        params: &Value,
    ) -> Result<Value, RpcError> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });

        let response = self
            .http
            .post(&provider.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| RpcError::Malformed(strip_url_query(&e.to_string())))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RpcError::Malformed(format!("http status {status}")));
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|e| RpcError::Malformed(e.to_string()))?;

        if let Some(error) = payload.get("error") {
            let code = error.get("code").and_then(Value::as_i64).unwrap_or(0);
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown rpc error")
                .to_string();
            // -32600..-32602: invalid request / method not found / invalid params.
            if (-32602..=-32600).contains(&code) {
                return Err(RpcError::NonRetryable { code, message });
            }
            return Err(RpcError::Malformed(format!("rpc error {code}: {message}")));
        }

        payload
            .get("result")
            .cloned()
            .ok_or_else(|| RpcError::Malformed("response missing result".to_string()))
    }

    /// Per-provider health counts and snapshots.
    pub fn status(&self) -> PoolStatus {
        let providers: Vec<ProviderSnapshot> =
            self.providers.iter().map(|p| p.snapshot()).collect();
        let count = |s: ProviderStatus| providers.iter().filter(|p| p.status == s).count();
        PoolStatus {
            chain: self.chain,
            healthy: count(ProviderStatus::Healthy),
            degraded: count(ProviderStatus::Degraded),
            failed: count(ProviderStatus::Failed),
            circuit_open: count(ProviderStatus::CircuitOpen),
            failovers_total: self.failovers.load(Ordering::Relaxed),
            providers,
        }
    }

    /// Start the background health-check loop.
    ///
    /// Idempotent; a second call while the loop is running is a no-op.
    pub fn start(self: &Arc<Self>) {
        let mut guard = match self.health_task.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if guard.is_some() {
            return;
        }
        let pool = Arc::clone(self);
        let shutdown = Arc::clone(&self.shutdown);
        info!("starting health checks for {} pool", self.chain);
        *guard = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(pool.config.health_check_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = interval.tick() => pool.run_health_checks().await,
                    _ = shutdown.notified() => break,
                }
            }
        }));
    }

    /// Stop the background health-check loop.
    pub fn stop(&self) {
        self.shutdown.notify_waiters();
        let mut guard = match self.health_task.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(task) = guard.take() {
            task.abort();
        }
    }

    /// Probe every provider once and update its health state.
    ///
    /// Probes never open a circuit; they only move providers between healthy,
    /// degraded, and failed, and may close an expired circuit on success.
    pub async fn run_health_checks(&self) {
        for provider in &self.providers {
            let probe = self
                .call_provider(provider, "eth_blockNumber", &json!([]))
                .await;
            let mut state = match provider.state.lock() {
                Ok(state) => state,
                Err(poisoned) => poisoned.into_inner(),
            };
            state.last_check_at = Some(Utc::now());
            match (&probe, state.status) {
                (Ok(_), ProviderStatus::CircuitOpen) => {
                    let expired = state
                        .circuit_opened_at
                        .map(|opened| {
                            (Utc::now() - opened).num_seconds() as u64
                                >= self.config.circuit_timeout.as_secs()
                        })
                        .unwrap_or(true);
                    if expired {
                        info!("re-enabling provider {}", provider.display_url());
                        state.status = ProviderStatus::Healthy;
                        state.consecutive_failures = 0;
                        state.circuit_opened_at = None;
                    }
                }
                (Ok(_), _) => state.status = ProviderStatus::Healthy,
                (Err(_), ProviderStatus::CircuitOpen) => {}
                (Err(_), ProviderStatus::Healthy) => state.status = ProviderStatus::Degraded,
                (Err(_), _) => state.status = ProviderStatus::Failed,
            }
        }
    }
}

impl Drop for RpcPool {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool_with(urls: Vec<String>, allow_live: bool) -> Arc<RpcPool> {
        let config = PoolConfig {
            call_timeout: Duration::from_secs(2),
            ..PoolConfig::default()
        };
        Arc::new(RpcPool::new(Chain::Ethereum, urls, config, allow_live))
    }

    fn rpc_result(value: &str) -> String {
        format!(r#"{{"jsonrpc":"2.0","id":1,"result":"{value}"}}"#)
    }

    #[tokio::test]
    async fn first_healthy_provider_serves_the_call() -> anyhow::Result<()> {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/")
            .with_status(200)
            .with_body(rpc_result("0x10"))
            .create_async()
            .await;

        let pool = pool_with(vec![server.url()], false);
        let result = pool.execute("eth_blockNumber", json!([])).await?;
        assert_eq!(result, json!("0x10"));
        mock.assert_async().await;
        Ok(())
    }

    #[tokio::test]
    async fn failover_reaches_the_backup_and_opens_circuit() -> anyhow::Result<()> {
        let mut primary = mockito::Server::new_async().await;
        let mut backup = mockito::Server::new_async().await;
        primary
            .mock("POST", "/")
            .with_status(503)
            .expect_at_least(5)
            .create_async()
            .await;
        backup
            .mock("POST", "/")
            .with_status(200)
            .with_body(rpc_result("0x20"))
            .expect_at_least(5)
            .create_async()
            .await;

        let pool = pool_with(vec![primary.url(), backup.url()], false);
        for _ in 0..5 {
            let result = pool.execute("eth_blockNumber", json!([])).await?;
            assert_eq!(result, json!("0x20"));
        }

        let status = pool.status();
        assert_eq!(status.circuit_open, 1);
        assert_eq!(status.healthy, 1);
        assert!(status.failovers_total >= 5);

        // The open circuit is skipped entirely on the next call.
        let result = pool.execute("eth_blockNumber", json!([])).await?;
        assert_eq!(result, json!("0x20"));
        Ok(())
    }

    #[tokio::test]
    async fn non_retryable_errors_do_not_fail_over() -> anyhow::Result<()> {
        let mut primary = mockito::Server::new_async().await;
        let mut backup = mockito::Server::new_async().await;
        primary
            .mock("POST", "/")
            .with_status(200)
            .with_body(r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32601,"message":"method not found"}}"#)
            .create_async()
            .await;
        let backup_mock = backup
            .mock("POST", "/")
            .with_status(200)
            .with_body(rpc_result("0x1"))
            .expect(0)
            .create_async()
            .await;

        let pool = pool_with(vec![primary.url(), backup.url()], false);
        let err = pool.execute("eth_nonsense", json!([])).await.unwrap_err();
        assert!(matches!(err, RpcError::NonRetryable { code: -32601, .. }));
        backup_mock.assert_async().await;
        Ok(())
    }

    #[tokio::test]
    async fn exhausted_pool_reports_all_providers_failed() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/")
            .with_status(500)
            .create_async()
            .await;

        let pool = pool_with(vec![server.url()], false);
        let err = pool.execute("eth_blockNumber", json!([])).await.unwrap_err();
        assert!(matches!(err, RpcError::AllProvidersFailed { .. }));
    }

    #[tokio::test]
    async fn live_writes_are_blocked_without_allow_live() {
        let pool = pool_with(vec!["http://127.0.0.1:1".to_string()], false);
        let err = pool
            .execute("eth_sendRawTransaction", json!(["0xdead"]))
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::LiveWriteBlocked(_)));
    }

    #[tokio::test]
    async fn health_check_recovers_degraded_provider() -> anyhow::Result<()> {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/")
            .with_status(200)
            .with_body(rpc_result("0x30"))
            .create_async()
            .await;

        let pool = pool_with(vec![server.url()], false);
        {
            let mut state = pool.providers[0].state.lock().unwrap();
            state.status = ProviderStatus::Degraded;
        }
        pool.run_health_checks().await;
        assert_eq!(pool.status().healthy, 1);
        Ok(())
    }
}
