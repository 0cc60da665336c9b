//! Event-log indexer
//!
//! Ingests event logs for a contract through the RPC pool, keeps them
//! queryable in memory, and streams new events over a WebSocket. Stopping is
//! immediate: the ingest loop observes the stop flag on its next iteration
//! and exits.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use bugbot_core::models::Chain;
use bugbot_core::{Error, Result};
use bugbot_rpc::RpcPool;
use bugbot_service::error::ApiResult;
use bugbot_service::{HealthReport, ServiceMetrics};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch, RwLock};
use tracing::{debug, info, warn};

/// How often the ingest loop polls for new logs
const POLL_INTERVAL: Duration = Duration::from_secs(5);
/// Largest backfill window accepted, in blocks
const MAX_BACKFILL_BLOCKS: u64 = 10_000;

/// The indexer service
pub struct IndexerService {
    pools: RwLock<HashMap<Chain, Arc<RpcPool>>>,
    indexed: RwLock<Vec<Value>>,
    stream: broadcast::Sender<Value>,
    stops: RwLock<HashMap<(String, Chain), watch::Sender<bool>>>,
    metrics: Arc<ServiceMetrics>,
}

impl IndexerService {
    /// Empty service.
    pub fn new() -> Arc<Self> {
        let (stream, _) = broadcast::channel(256);
        Arc::new(Self {
            pools: RwLock::new(HashMap::new()),
            indexed: RwLock::new(Vec::new()),
            stream,
            stops: RwLock::new(HashMap::new()),
            metrics: Arc::new(ServiceMetrics::new("indexer")),
        })
    }

    /// Pre-seed a pool; otherwise pools build from the environment.
    pub async fn attach_pool(&self, chain: Chain, pool: Arc<RpcPool>) {
        self.pools.write().await.insert(chain, pool);
    }

    async fn pool_for(&self, chain: Chain) -> Result<Arc<RpcPool>> {
        if let Some(pool) = self.pools.read().await.get(&chain) {
            return Ok(Arc::clone(pool));
        }
        let pool = Arc::new(
            RpcPool::from_env(chain).map_err(|e| Error::InvalidRequest(e.to_string()))?,
        );
        self.pools.write().await.insert(chain, Arc::clone(&pool));
        Ok(pool)
    }

    /// Start ingesting logs for a contract; optional bounded backfill first.
    pub async fn start(
        self: &Arc<Self>,
        contract_address: String,
        chain: Chain,
        backfill_blocks: Option<u64>,
    ) -> Result<()> {
        let key = (contract_address.to_lowercase(), chain);
        {
            let stops = self.stops.read().await;
            if stops.contains_key(&key) {
                return Err(Error::Conflict(format!(
                    "already indexing {} on {}",
                    contract_address, chain
                )));
            }
        }
        if backfill_blocks.map(|b| b > MAX_BACKFILL_BLOCKS).unwrap_or(false) {
            return Err(Error::InvalidRequest(format!(
                "backfill capped at {MAX_BACKFILL_BLOCKS} blocks"
            )));
        }

        let pool = self.pool_for(chain).await?;
        let (stop_tx, stop_rx) = watch::channel(false);
        self.stops.write().await.insert(key, stop_tx);

        let service = Arc::clone(self);
        tokio::spawn(async move {
            service
                .ingest_loop(contract_address, chain, pool, backfill_blocks, stop_rx)
                .await;
        });
        Ok(())
    }

    /// Stop ingesting for a contract.
    pub async fn stop(&self, contract_address: &str, chain: Chain) -> Result<()> {
        let key = (contract_address.to_lowercase(), chain);
        let stop = self
            .stops
            .write()
            .await
            .remove(&key)
            .ok_or_else(|| Error::NotFound(format!("no index for {contract_address}")))?;
        let _ = stop.send(true);
        info!("stopping index for {} on {}", contract_address, chain);
        Ok(())
    }

    /// Query indexed events with simple filters.
    pub async fn query(
        &self,
        address: Option<&str>,
        topic: Option<&str>,
        limit: usize,
    ) -> Vec<Value> {
        let indexed = self.indexed.read().await;
        indexed
            .iter()
            .filter(|event| {
                address
                    .map(|a| {
                        event["address"]
                            .as_str()
                            .map(|e| e.eq_ignore_ascii_case(a))
                            .unwrap_or(false)
                    })
                    .unwrap_or(true)
            })
            .filter(|event| {
                topic
                    .map(|t| {
                        event["topics"]
                            .as_array()
                            .map(|topics| topics.iter().any(|x| x.as_str() == Some(t)))
                            .unwrap_or(false)
                    })
                    .unwrap_or(true)
            })
            .rev()
            .take(limit)
            .cloned()
            .collect()
    }

    /// Subscribe to the live event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<Value> {
        self.stream.subscribe()
    }

    /// The metrics registry.
    pub fn metrics(&self) -> &Arc<ServiceMetrics> {
        &self.metrics
    }

    async fn ingest_loop(
        &self,
        address: String,
        chain: Chain,
        pool: Arc<RpcPool>,
        backfill_blocks: Option<u64>,
        mut stop: watch::Receiver<bool>,
    ) {
        let handle = pool.get_client();
        let mut from_block = match handle.block_number().await {
            Ok(tip) => tip.saturating_sub(backfill_blocks.unwrap_or(0)),
            Err(e) => {
                warn!("indexer could not read chain tip: {}", e);
                0
            }
        };
        info!("indexing {} on {} from block {}", address, chain, from_block);

        loop {
            if *stop.borrow() {
                break;
            }

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
                        let block = log["blockNumber"]
                            .as_str()
                            .and_then(|b| u64::from_str_radix(b.trim_start_matches("0x"), 16).ok());
                        if let Some(block) = block {
                            from_block = from_block.max(block + 1);
                        }
                        self.indexed.write().await.push(log.clone());
                        let _ = self.stream.send(log);
                    }
                }
                Err(e) => debug!("log poll failed: {}", e),
            }

            tokio::select! {
                _ = tokio::time::sleep(POLL_INTERVAL) => {}
                _ = stop.changed() => {}
            }
        }
        info!("index loop for {} on {} exited", address, chain);
    }
}

/// `POST /index/start` body
#[derive(Debug, Deserialize)]
pub struct IndexStartBody {
    /// Contract to index
    pub contract_address: String,
    /// Chain the contract lives on
    pub chain: Chain,
    /// Optional backfill depth in blocks
    #[serde(default)]
    pub backfill: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct IndexStopBody {
    contract_address: String,
    chain: Chain,
}

#[derive(Debug, Deserialize)]
struct QueryBody {
    #[serde(default)]
    address: Option<String>,
    #[serde(default)]
    topic: Option<String>,
    #[serde(default = "default_query_limit")]
    limit: usize,
}

fn default_query_limit() -> usize {
    100
}

/// Build the indexer router.
pub fn indexer_router(service: Arc<IndexerService>) -> Router {
    Router::new()
        .route("/index/start", post(start_handler))
        .route("/index/stop", post(stop_handler))
        .route("/index/query", post(query_handler))
        .route("/ws", get(ws_handler))
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .layer(bugbot_service::cors_layer(
            &bugbot_core::config::dashboard_origins(),
        ))
        .with_state(service)
}

async fn start_handler(
    State(service): State<Arc<IndexerService>>,
    Json(body): Json<IndexStartBody>,
) -> ApiResult<Json<Value>> {
    service
        .start(body.contract_address.clone(), body.chain, body.backfill)
        .await?;
    Ok(Json(json!({"status": "indexing", "contract_address": body.contract_address})))
}

async fn stop_handler(
    State(service): State<Arc<IndexerService>>,
    Json(body): Json<IndexStopBody>,
) -> ApiResult<Json<Value>> {
    service.stop(&body.contract_address, body.chain).await?;
    Ok(Json(json!({"status": "stopped"})))
}

async fn query_handler(
    State(service): State<Arc<IndexerService>>,
    Json(body): Json<QueryBody>,
) -> Json<Value> {
    let events = service
        .query(body.address.as_deref(), body.topic.as_deref(), body.limit)
        .await;
    Json(json!({"total": events.len(), "events": events}))
}

async fn ws_handler(
    State(service): State<Arc<IndexerService>>,
    upgrade: WebSocketUpgrade,
) -> Response {
    upgrade.on_upgrade(move |socket| stream_events(socket, service))
}

async fn stream_events(mut socket: WebSocket, service: Arc<IndexerService>) {
    let mut events = service.subscribe();
    while let Ok(event) = events.recv().await {
        let Ok(text) = serde_json::to_string(&event) else {
            continue;
        };
        if socket.send(Message::Text(text)).await.is_err() {
            break;
        }
    }
}

async fn health(State(service): State<Arc<IndexerService>>) -> Json<HealthReport> {
    let report = HealthReport::healthy("indexer");
    service.metrics.set_health(report.status);
    Json(report)
}

async fn metrics(State(service): State<Arc<IndexerService>>) -> String {
    service.metrics.render()
}
