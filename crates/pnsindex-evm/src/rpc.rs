//! Chain access: the [`ChainClient`] seam and its HTTP JSON-RPC implementation.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use pnsindex_core::error::IndexerError;
use pnsindex_core::types::{LogFilter, RawLogEntry};

/// The chain operations the pipeline needs.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// `eth_getLogs` over the inclusive range `[from, to]`.
    async fn get_logs(
        &self,
        filter: &LogFilter,
        from: u64,
        to: u64,
    ) -> Result<Vec<RawLogEntry>, IndexerError>;

    async fn get_block_number(&self) -> Result<u64, IndexerError>;

    /// Unix timestamp of block `number`, `None` if the node does not have it.
    async fn get_block_timestamp(&self, number: u64) -> Result<Option<i64>, IndexerError>;

    /// `eth_call` against `to` at `block` (latest if `None`).
    async fn call(&self, to: &str, data: &[u8], block: Option<u64>) -> Result<Vec<u8>, IndexerError>;
}

// ─── Wire types ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: &'static str,
    pub method: String,
    pub params: Vec<Value>,
    pub id: u64,
}

impl JsonRpcRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            method: method.into(),
            params,
            id,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
}

impl std::fmt::Display for JsonRpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "JSON-RPC error {}: {}", self.code, self.message)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcResponse {
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    pub fn into_result(self) -> Result<Value, IndexerError> {
        match self.error {
            Some(err) => Err(IndexerError::Rpc(err.to_string())),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

/// A log as returned by `eth_getLogs`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcLog {
    pub address: String,
    pub topics: Vec<String>,
    pub data: String,
    pub block_number: String,
    #[serde(default)]
    pub block_hash: Option<String>,
    pub transaction_hash: String,
    pub log_index: String,
    #[serde(default)]
    pub removed: Option<bool>,
}

impl TryFrom<RpcLog> for RawLogEntry {
    type Error = IndexerError;

    fn try_from(log: RpcLog) -> Result<Self, Self::Error> {
        let log_index = parse_hex_u64(&log.log_index)?;
        Ok(RawLogEntry {
            address: log.address.to_lowercase(),
            topics: log.topics.into_iter().map(|t| t.to_lowercase()).collect(),
            data: decode_hex(&log.data)?,
            block_number: parse_hex_u64(&log.block_number)?,
            block_hash: log.block_hash,
            transaction_hash: log.transaction_hash.to_lowercase(),
            log_index: u32::try_from(log_index)
                .map_err(|_| IndexerError::Rpc(format!("log index {log_index} out of range")))?,
            removed: log.removed.unwrap_or(false),
        })
    }
}

/// Parse a `0x`-prefixed quantity.
pub fn parse_hex_u64(s: &str) -> Result<u64, IndexerError> {
    let digits = s.strip_prefix("0x").unwrap_or(s);
    u64::from_str_radix(digits, 16).map_err(|e| IndexerError::Rpc(format!("bad quantity {s:?}: {e}")))
}

fn decode_hex(s: &str) -> Result<Vec<u8>, IndexerError> {
    let digits = s.strip_prefix("0x").unwrap_or(s);
    hex::decode(digits).map_err(|e| IndexerError::Rpc(format!("bad hex payload: {e}")))
}

fn quantity(n: u64) -> String {
    format!("0x{n:x}")
}

/// Builds the `eth_getLogs` filter object.
pub fn logs_filter_json(filter: &LogFilter, from: u64, to: u64) -> Value {
    let mut obj = json!({
        "fromBlock": quantity(from),
        "toBlock": quantity(to),
    });
    if !filter.addresses.is_empty() {
        obj["address"] = json!(filter.addresses);
    }
    if !filter.topic0_values.is_empty() {
        obj["topics"] = json!([filter.topic0_values]);
    }
    obj
}

// ─── HttpChainClient ─────────────────────────────────────────────────────────

/// JSON-RPC over HTTP. Makes exactly one request per call; retries and
/// timeouts belong to the caller.
pub struct HttpChainClient {
    url: String,
    http: reqwest::Client,
    next_id: AtomicU64,
}

impl HttpChainClient {
    pub fn new(url: impl Into<String>, request_timeout: Duration) -> Result<Self, IndexerError> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| IndexerError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            url: url.into(),
            http,
            next_id: AtomicU64::new(1),
        })
    }

    async fn request(&self, method: &str, params: Vec<Value>) -> Result<Value, IndexerError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let req = JsonRpcRequest::new(id, method, params);

        let resp = self
            .http
            .post(&self.url)
            .json(&req)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    IndexerError::Rpc(format!("{method}: request timed out"))
                } else {
                    IndexerError::Rpc(format!("{method}: {e}"))
                }
            })?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(IndexerError::Rpc(format!("HTTP {status}: {body}")));
        }

        resp.json::<JsonRpcResponse>()
            .await
            .map_err(|e| IndexerError::Rpc(format!("{method}: invalid response: {e}")))?
            .into_result()
    }
}

#[async_trait]
impl ChainClient for HttpChainClient {
    async fn get_logs(
        &self,
        filter: &LogFilter,
        from: u64,
        to: u64,
    ) -> Result<Vec<RawLogEntry>, IndexerError> {
        let result = self
            .request("eth_getLogs", vec![logs_filter_json(filter, from, to)])
            .await?;
        let logs: Vec<RpcLog> = serde_json::from_value(result)
            .map_err(|e| IndexerError::Rpc(format!("eth_getLogs: malformed logs: {e}")))?;
        logs.into_iter().map(RawLogEntry::try_from).collect()
    }

    async fn get_block_number(&self) -> Result<u64, IndexerError> {
        let result = self.request("eth_blockNumber", vec![]).await?;
        let hex = result
            .as_str()
            .ok_or_else(|| IndexerError::Rpc("eth_blockNumber: expected a quantity".into()))?;
        parse_hex_u64(hex)
    }

    async fn get_block_timestamp(&self, number: u64) -> Result<Option<i64>, IndexerError> {
        let result = self
            .request("eth_getBlockByNumber", vec![json!(quantity(number)), json!(false)])
            .await?;
        if result.is_null() {
            return Ok(None);
        }
        let ts = result["timestamp"]
            .as_str()
            .ok_or_else(|| IndexerError::Rpc(format!("block {number} has no timestamp")))?;
        let ts = parse_hex_u64(ts)?;
        Ok(Some(i64::try_from(ts).unwrap_or(i64::MAX)))
    }

    async fn call(&self, to: &str, data: &[u8], block: Option<u64>) -> Result<Vec<u8>, IndexerError> {
        let tag = block.map(quantity).unwrap_or_else(|| "latest".into());
        let tx = json!({ "to": to, "data": format!("0x{}", hex::encode(data)) });
        let result = self.request("eth_call", vec![tx, json!(tag)]).await?;
        let hex = result
            .as_str()
            .ok_or_else(|| IndexerError::Rpc("eth_call: expected hex data".into()))?;
        decode_hex(hex)
    }
}
