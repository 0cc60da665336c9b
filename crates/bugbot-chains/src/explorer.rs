//! Verified-source fetch from chain explorers
//!
//! Speaks the etherscan-style contract API that the EVM explorers share.
//! Non-EVM chains are routed to the same interface; their explorer URLs come
//! from the environment.

use async_trait::async_trait;
use bugbot_core::models::Chain;
use bugbot_core::redaction::redact_error_message;
use bugbot_core::{Error, Result};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, instrument};

/// A verified contract source returned by an explorer
#[derive(Debug, Clone)]
pub struct VerifiedSource {
    /// Contract name as registered with the explorer
    pub contract_name: String,
    /// Flattened source text
    pub source: String,
    /// Verified ABI, when published
    pub abi: Option<Value>,
}

/// Explorer access used by recon and the address scanner
#[async_trait]
pub trait ExplorerClient: Send + Sync {
    /// Fetch verified source for an address; `None` when unverified.
    async fn fetch_verified_source(
        &self,
        chain: Chain,
        address: &str,
    ) -> Result<Option<VerifiedSource>>;
}

/// Default explorer API host per chain.
fn default_base_url(chain: Chain) -> &'static str {
    match chain {
        Chain::Ethereum => "https://api.etherscan.io",
        Chain::Bsc => "https://api.bscscan.com",
        Chain::Polygon => "https://api.polygonscan.com",
        Chain::Arbitrum => "https://api.arbiscan.io",
        Chain::Optimism => "https://api-optimistic.etherscan.io",
        Chain::Avalanche => "https://api.snowtrace.io",
        Chain::Solana => "https://api.solscan.io",
        Chain::Aptos => "https://api.aptoscan.com",
        Chain::Sui => "https://api.suiscan.xyz",
        Chain::Starknet => "https://api.starkscan.co",
    }
}

/// HTTP client for etherscan-compatible explorer APIs
pub struct HttpExplorerClient {
    http: reqwest::Client,
    base_override: Option<String>,
}

#[derive(Deserialize)]
struct ExplorerEnvelope {
    status: String,
    #[serde(default)]
    result: Value,
}

#[derive(Deserialize)]
struct SourceRow {
    #[serde(rename = "SourceCode", default)]
    source_code: String,
    #[serde(rename = "ContractName", default)]
    contract_name: String,
    #[serde(rename = "ABI", default)]
    abi: String,
}

impl HttpExplorerClient {
    /// Client with per-chain default hosts.
    pub fn new() -> Self {
        Self::with_base_override(None)
    }

    /// Client with every request sent to one base URL; used by tests.
    pub fn with_base_override(base_override: Option<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(20))
            .build()
            .unwrap_or_default();
        Self {
            http,
            base_override,
        }
    }

    fn base_url(&self, chain: Chain) -> String {
        if let Some(base) = &self.base_override {
            return base.clone();
        }
        let env_name = format!("{}_EXPLORER_URL", chain.as_str().to_uppercase());
        bugbot_core::config::env_opt(&env_name)
            .unwrap_or_else(|| default_base_url(chain).to_string())
    }

    fn api_key(&self, chain: Chain) -> Option<String> {
        let env_name = format!("{}_EXPLORER_API_KEY", chain.as_str().to_uppercase());
        bugbot_core::config::env_opt(&env_name)
    }
}

impl Default for HttpExplorerClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExplorerClient for HttpExplorerClient {
    #[instrument(skip(self), fields(chain = %chain))]
    async fn fetch_verified_source(
        &self,
        chain: Chain,
        address: &str,
    ) -> Result<Option<VerifiedSource>> {
        let mut url = format!(
            "{}/api?module=contract&action=getsourcecode&address={}",
            self.base_url(chain),
            address
        );
        if let Some(key) = self.api_key(chain) {
            url.push_str(&format!("&apikey={key}"));
        }

        debug!("fetching verified source for {}", address);
        let response = self.http.get(&url).send().await.map_err(|e| {
            Error::BackendUnavailable(redact_error_message(&format!("explorer: {e}")))
        })?;

        if !response.status().is_success() {
            return Err(Error::BackendUnavailable(format!(
                "explorer returned {}",
                response.status()
            )));
        }

        let envelope: ExplorerEnvelope = response
            .json()
            .await
            .map_err(|e| Error::internal(format!("explorer payload: {e}")))?;

        // status "0" with a string result is the explorer's "not found".
        if envelope.status != "1" {
            return Ok(None);
        }

        let rows: Vec<SourceRow> = serde_json::from_value(envelope.result)
            .map_err(|e| Error::internal(format!("explorer result: {e}")))?;
        let Some(row) = rows.into_iter().next() else {
            return Ok(None);
        };
        if row.source_code.trim().is_empty() {
            return Ok(None);
        }

        let abi = serde_json::from_str::<Value>(&row.abi).ok();
        info!("verified source found: {}", row.contract_name);
        Ok(Some(VerifiedSource {
            contract_name: if row.contract_name.is_empty() {
                "Contract".to_string()
            } else {
                row.contract_name
            },
            source: row.source_code,
            abi,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client_for(server: &mockito::Server) -> HttpExplorerClient {
        HttpExplorerClient::with_base_override(Some(server.url()))
    }

    #[tokio::test]
    async fn verified_source_round_trips() -> anyhow::Result<()> {
        let mut server = mockito::Server::new_async().await;
        server
            .mock(
                "GET",
                mockito::Matcher::Regex("/api.*getsourcecode.*".to_string()),
            )
            .with_status(200)
            .with_body(
                r#"{"status":"1","message":"OK","result":[{"SourceCode":"contract Vault {}","ContractName":"Vault","ABI":"[]"}]}"#,
            )
            .create_async()
            .await;

        let client = client_for(&server);
        let source = client
            .fetch_verified_source(Chain::Ethereum, "0xdAC17F958D2ee523a2206206994597C13D831ec7")
            .await?;
        let source = source.ok_or_else(|| anyhow::anyhow!("expected verified source"))?;
        assert_eq!(source.contract_name, "Vault");
        assert!(source.abi.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn unverified_contract_returns_none() -> anyhow::Result<()> {
        let mut server = mockito::Server::new_async().await;
        server
            .mock(
                "GET",
                mockito::Matcher::Regex("/api.*getsourcecode.*".to_string()),
            )
            .with_status(200)
            .with_body(
                r#"{"status":"0","message":"NOTOK","result":"Contract source code not verified"}"#,
            )
            .create_async()
            .await;

        let client = client_for(&server);
        let source = client
            .fetch_verified_source(Chain::Ethereum, "0xb3116013c55d49f575ace3cb0d123f3dbf6cac35")
            .await?;
        assert!(source.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn explorer_outage_is_backend_unavailable() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", mockito::Matcher::Any)
            .with_status(502)
            .create_async()
            .await;

        let client = client_for(&server);
        let err = client
            .fetch_verified_source(Chain::Ethereum, "0xdead")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::BackendUnavailable(_)));
    }
}
