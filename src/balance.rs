//! Native-token balance lookups
//!
//! Read-only collaborator. Failures here degrade to an error display state and
//! never block authentication, minting or execution.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::error::{Error, Result};

/// Source of account balances on some chain
#[async_trait]
pub trait BalanceSource: Send + Sync {
    /// Balance of `address` in the chain's smallest unit, read via `rpc_url`
    async fn balance(&self, address: &str, rpc_url: &str) -> Result<u128>;
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<String>,
    #[serde(default)]
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

/// Balance lookups over Ethereum-style JSON-RPC (`eth_getBalance`)
pub struct JsonRpcBalance {
    http: reqwest::Client,
}

impl JsonRpcBalance {
    pub fn new(timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http })
    }
}

#[async_trait]
impl BalanceSource for JsonRpcBalance {
    async fn balance(&self, address: &str, rpc_url: &str) -> Result<u128> {
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "eth_getBalance",
            "params": [address, "latest"],
        });

        let response = self
            .http
            .post(rpc_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::NetworkUnreachable(format!("Balance request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(Error::NetworkUnreachable(format!(
                "Balance request failed ({})",
                response.status()
            )));
        }

        let rpc: RpcResponse = response.json().await?;
        if let Some(err) = rpc.error {
            return Err(Error::NetworkUnreachable(format!(
                "RPC error {}: {}",
                err.code, err.message
            )));
        }

        let quantity = rpc
            .result
            .ok_or_else(|| Error::NetworkUnreachable("RPC response had no result".to_string()))?;
        debug!(address = %address, quantity = %quantity, "Fetched balance");
        parse_quantity(&quantity)
    }
}

/// Parse a 0x-prefixed hex quantity.
pub fn parse_quantity(quantity: &str) -> Result<u128> {
    let digits = quantity.trim_start_matches("0x");
    if digits.is_empty() {
        return Ok(0);
    }
    u128::from_str_radix(digits, 16)
        .map_err(|e| Error::MalformedInput(format!("Invalid hex quantity '{}': {}", quantity, e)))
}
