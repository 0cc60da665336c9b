//! The address-scan HTTP service
//!
//! A secondary ingress that reuses the static stage worker as its analyzer:
//! detect chain, fetch verified source, optionally decompile, then hand the
//! sources to the static worker over HTTP and return its output.

use crate::decompile::Decompiler;
use crate::detect::detect_chain;
use crate::explorer::ExplorerClient;
use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use bugbot_core::models::Chain;
use bugbot_core::Error;
use bugbot_service::error::{ApiError, ApiResult};
use bugbot_service::{HealthReport, ServiceMetrics};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Shared state of the address-scan service
pub struct AddressScanState {
    /// Explorer client for verified-source lookups
    pub explorer: Arc<dyn ExplorerClient>,
    /// Decompiler used only with `force_decompile=true`
    pub decompiler: Arc<dyn Decompiler>,
    /// Base URL of the static stage worker
    pub static_worker_url: String,
    /// Metrics registry
    pub metrics: Arc<ServiceMetrics>,
    http: reqwest::Client,
    pools: RwLock<HashMap<Chain, Arc<bugbot_rpc::RpcPool>>>,
}

impl AddressScanState {
    /// Assemble the service state.
    pub fn new(
        explorer: Arc<dyn ExplorerClient>,
        decompiler: Arc<dyn Decompiler>,
        static_worker_url: String,
    ) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(320))
            .build()
            .unwrap_or_default();
        Self {
            explorer,
            decompiler,
            static_worker_url: static_worker_url.trim_end_matches('/').to_string(),
            metrics: Arc::new(ServiceMetrics::new("address-scanner")),
            http,
            pools: RwLock::new(HashMap::new()),
        }
    }

    async fn pool_for(&self, chain: Chain) -> ApiResult<Arc<bugbot_rpc::RpcPool>> {
        if let Some(pool) = self.pools.read().await.get(&chain) {
            return Ok(Arc::clone(pool));
        }
        let pool = Arc::new(
            bugbot_rpc::RpcPool::from_env(chain)
                .map_err(|e| Error::InvalidRequest(e.to_string()))?,
        );
        self.pools.write().await.insert(chain, Arc::clone(&pool));
        Ok(pool)
    }
}

/// `POST /scan-address` request body
#[derive(Debug, Deserialize)]
pub struct AddressScanRequest {
    /// Address to analyze
    pub contract_address: String,
    /// Chain hint; detection runs when absent
    #[serde(default)]
    pub chain: Option<Chain>,
    /// Decompile when no verified source exists
    #[serde(default)]
    pub force_decompile: bool,
}

/// `POST /scan-address` response body
#[derive(Debug, Serialize)]
pub struct AddressScanResponse {
    /// Scan identifier assigned to this request
    pub scan_id: String,
    /// Resolved chain
    pub chain: Chain,
    /// `completed` or `source_not_found`
    pub status: String,
    /// Operator guidance when no source was found
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
    /// Static stage output when analysis ran
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analysis: Option<Value>,
}

/// Build the address-scan router.
pub fn address_scan_router(state: Arc<AddressScanState>) -> Router {
    Router::new()
        .route("/scan-address", post(scan_address))
        .route("/supported-chains", get(supported_chains))
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .layer(bugbot_service::cors_layer(
            &bugbot_core::config::dashboard_origins(),
        ))
        .with_state(state)
}

#[instrument(skip(state, request), fields(address = %request.contract_address))]
async fn scan_address(
    State(state): State<Arc<AddressScanState>>,
    Json(request): Json<AddressScanRequest>,
) -> ApiResult<Json<AddressScanResponse>> {
    let chain = detect_chain(&request.contract_address, request.chain)?;
    let scan_id = Uuid::new_v4().to_string();
    info!("address scan {} on {}", scan_id, chain);

    let verified = state
        .explorer
        .fetch_verified_source(chain, &request.contract_address)
        .await?;

    let (name, source, abi) = match verified {
        Some(verified) => (verified.contract_name, verified.source, verified.abi),
        None if !request.force_decompile => {
            return Ok(Json(AddressScanResponse {
                scan_id,
                chain,
                status: "source_not_found".to_string(),
                suggestion: Some(
                    "pass force_decompile=true to analyze decompiled bytecode".to_string(),
                ),
                analysis: None,
            }));
        }
        None => {
            let pool = state.pool_for(chain).await?;
            let bytecode = pool.get_client().get_code(&request.contract_address).await?;
            if bytecode == "0x" || bytecode.is_empty() {
                return Err(ApiError(Error::NotFound(format!(
                    "no bytecode at {}",
                    request.contract_address
                ))));
            }
            let source = state
                .decompiler
                .decompile(chain, &request.contract_address, &bytecode)
                .await?;
            ("Decompiled".to_string(), source, None)
        }
    };

    let analysis = run_static_stage(
        &state,
        &scan_id,
        chain,
        &request.contract_address,
        &name,
        &source,
        abi,
    )
    .await?;
    Ok(Json(AddressScanResponse {
        scan_id,
        chain,
        status: "completed".to_string(),
        suggestion: None,
        analysis: Some(analysis),
    }))
}

/// Dispatch the obtained source to the static stage worker.
#[allow(clippy::too_many_arguments)]
async fn run_static_stage(
    state: &AddressScanState,
    scan_id: &str,
    chain: Chain,
    address: &str,
    name: &str,
    source: &str,
    abi: Option<Value>,
) -> ApiResult<Value> {
    // Wire shape of the stage-worker contract: a synthetic recon output
    // carrying the one contract we obtained.
    let body = json!({
        "scan_id": scan_id,
        "chain": chain,
        "target": {"kind": "address", "chain": chain, "address": address, "force_decompile": false},
        "scan_config": {},
        "prior": {
            "recon": {
                "stage": "recon",
                "surface_map": [{
                    "file": format!("{name}.sol"),
                    "path": format!("{name}.sol"),
                    "language": "solidity",
                    "imports": [],
                }],
                "entry_contracts": [name],
                "contracts": [{
                    "name": name,
                    "path": format!("{name}.sol"),
                    "language": "solidity",
                    "source": source,
                    "abi": abi,
                }],
                "stage_status": "complete",
            }
        }
    });

    let response = state
        .http
        .post(format!("{}/static", state.static_worker_url))
        .json(&body)
        .send()
        .await
        .map_err(|e| {
            Error::BackendUnavailable(format!("static worker unreachable: {e}"))
        })?;

    let status = response.status();
    if !status.is_success() {
        warn!("static worker returned {}", status);
        return Err(ApiError(Error::StageFailure {
            stage: "static".to_string(),
            cause: format!("worker returned {status}"),
        }));
    }

    Ok(response
        .json()
        .await
        .map_err(|e| Error::internal(format!("static worker payload: {e}")))?)
}

async fn supported_chains() -> Json<Value> {
    Json(json!({
        "chains": Chain::ALL.iter().map(Chain::as_str).collect::<Vec<_>>(),
    }))
}

async fn health(State(state): State<Arc<AddressScanState>>) -> Json<HealthReport> {
    let worker_reachable = state
        .http
        .get(format!("{}/health", state.static_worker_url))
        .timeout(Duration::from_secs(3))
        .send()
        .await
        .map(|r| r.status().is_success())
        .unwrap_or(false);
    let report =
        HealthReport::healthy("address-scanner").with_dependency("static_worker", worker_reachable);
    state.metrics.set_health(report.status);
    Json(report)
}

async fn metrics(State(state): State<Arc<AddressScanState>>) -> String {
    state.metrics.render()
}
