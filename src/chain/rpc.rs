//! Minimal JSON-RPC client for the three read-only methods the pipeline
//! needs: `eth_blockNumber`, `eth_getLogs` and `eth_call`.

use anyhow::{anyhow, Context, Result};
use ethers::types::Log;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

/// Blocks per eth_getLogs request; providers reject wider filters.
const LOG_CHUNK_SIZE: u64 = 1000;

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    result: Option<Value>,
    error: Option<Value>,
}

#[derive(Clone)]
pub struct EthRpc {
    client: Client,
    url: String,
}

impl EthRpc {
    pub fn new(url: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self { client, url })
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value> {
        let payload = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1
        });

        let response: JsonRpcResponse = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .context("RPC request failed")?
            .json()
            .await
            .context("failed to parse RPC response")?;

        if let Some(err) = response.error {
            return Err(anyhow!("RPC error from {}: {:?}", method, err));
        }

        response
            .result
            .ok_or_else(|| anyhow!("no result in {} response", method))
    }

    pub async fn block_number(&self) -> Result<u64> {
        let result = self.request("eth_blockNumber", json!([])).await?;
        parse_hex_u64(result.as_str().unwrap_or_default())
    }

    /// Logs for `[from_block, to_block]` filtered by emitter address and
    /// event signature, paginated in fixed sub-chunks. Provider ordering is
    /// preserved.
    pub async fn get_logs(
        &self,
        address: &str,
        topic0: &str,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<Log>> {
        let mut all_logs = Vec::new();
        let mut current = from_block;

        while current <= to_block {
            let chunk_end = (current + LOG_CHUNK_SIZE - 1).min(to_block);
            let result = self
                .request(
                    "eth_getLogs",
                    json!([{
                        "fromBlock": format!("{:#x}", current),
                        "toBlock": format!("{:#x}", chunk_end),
                        "address": address,
                        "topics": [topic0],
                    }]),
                )
                .await?;

            let logs: Vec<Log> =
                serde_json::from_value(result).context("failed to parse eth_getLogs result")?;
            debug!(
                from = current,
                to = chunk_end,
                count = logs.len(),
                "fetched log chunk"
            );
            all_logs.extend(logs);
            current = chunk_end + 1;
        }

        Ok(all_logs)
    }

    /// Read-only contract call against the latest block; returns the raw
    /// return data.
    pub async fn call(&self, to: &str, data: &str) -> Result<Vec<u8>> {
        let result = self
            .request("eth_call", json!([{"to": to, "data": data}, "latest"]))
            .await?;
        let hex_str = result
            .as_str()
            .ok_or_else(|| anyhow!("eth_call returned a non-string result"))?;
        hex::decode(hex_str.trim_start_matches("0x")).context("failed to decode eth_call result")
    }
}

fn parse_hex_u64(value: &str) -> Result<u64> {
    u64::from_str_radix(value.trim_start_matches("0x"), 16)
        .with_context(|| format!("invalid hex quantity: {}", value))
}
