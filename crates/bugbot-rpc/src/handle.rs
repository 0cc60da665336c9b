//! Typed read helpers over the pool

use crate::{RpcError, RpcPool};
use serde_json::{json, Value};
use std::sync::Arc;

/// A client handle bound to the pool's current best provider
///
/// Every method routes through the pool's failover policy, so a handle keeps
/// working across provider failures without the caller noticing.
#[derive(Clone)]
pub struct RpcHandle {
    pool: Arc<RpcPool>,
}

impl RpcHandle {
    pub(crate) fn new(pool: Arc<RpcPool>) -> Self {
        Self { pool }
    }

    /// Latest block number.
    pub async fn block_number(&self) -> Result<u64, RpcError> {
        let result = self.pool.execute("eth_blockNumber", json!([])).await?;
        hex_quantity(&result)
    }

    /// Account balance in wei, latest block.
    pub async fn get_balance(&self, address: &str) -> Result<Value, RpcError> {
        self.pool
            .execute("eth_getBalance", json!([address, "latest"]))
            .await
    }

    /// Deployed bytecode at an address, latest block.
    pub async fn get_code(&self, address: &str) -> Result<String, RpcError> {
        let result = self
            .pool
            .execute("eth_getCode", json!([address, "latest"]))
            .await?;
        result
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| RpcError::Malformed("eth_getCode returned non-string".to_string()))
    }

    /// Transaction receipt, when mined.
    pub async fn get_transaction_receipt(&self, tx_hash: &str) -> Result<Option<Value>, RpcError> {
        let result = self
            .pool
            .execute("eth_getTransactionReceipt", json!([tx_hash]))
            .await?;
        Ok(if result.is_null() { None } else { Some(result) })
    }

    /// Event logs matching a filter object.
    pub async fn get_logs(&self, filter: Value) -> Result<Vec<Value>, RpcError> {
        let result = self.pool.execute("eth_getLogs", json!([filter])).await?;
        result
            .as_array()
            .cloned()
            .ok_or_else(|| RpcError::Malformed("eth_getLogs returned non-array".to_string()))
    }

    /// Read-only contract call, latest block.
    pub async fn call(&self, tx: Value) -> Result<String, RpcError> {
        let result = self.pool.execute("eth_call", json!([tx, "latest"])).await?;
        result
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| RpcError::Malformed("eth_call returned non-string".to_string()))
    }

    /// Gas estimate for a transaction object.
    pub async fn estimate_gas(&self, tx: Value) -> Result<u64, RpcError> {
        let result = self.pool.execute("eth_estimateGas", json!([tx])).await?;
        hex_quantity(&result)
    }
}

/// Parse a JSON-RPC hex quantity ("0x1a") into a u64.
fn hex_quantity(value: &Value) -> Result<u64, RpcError> {
    let text = value
        .as_str()
        .ok_or_else(|| RpcError::Malformed("expected hex quantity string".to_string()))?;
    let digits = text.strip_prefix("0x").unwrap_or(text);
    u64::from_str_radix(digits, 16)
        .map_err(|_| RpcError::Malformed(format!("invalid hex quantity '{text}'")))
}
