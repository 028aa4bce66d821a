//! JSON-RPC 2.0 client for an EVM ledger node.
//!
//! Methods used:
//! - eth_chainId, eth_call, eth_estimateGas
//! - eth_getBlockByNumber, eth_maxPriorityFeePerGas, eth_gasPrice
//! - eth_getTransactionCount, eth_sendRawTransaction, eth_getTransactionReceipt

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use alloy_primitives::{keccak256, Address, Bytes, B256};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::time::sleep;
use tracing::{debug, info, warn};
use zeebu_abi::{decode_revert, Interfaces};
use zeebu_types::{
    bytes_to_hex, checksum, hex_to_bytes, parse_quantity_u128, parse_quantity_u64, Result,
    ZeebuError,
};

use crate::{CallRequest, FeeParams, LedgerRpc, RawReceipt, TransactionReceipt};

/// Connection settings for [`HttpLedger`].
#[derive(Debug, Clone)]
pub struct RpcConfig {
    pub url: String,
    pub timeout_ms: u64,
    pub retry_max: u32,
    pub retry_backoff_ms: u64,
}

impl RpcConfig {
    pub const DEFAULT_TIMEOUT_MS: u64 = 20_000;
    pub const DEFAULT_RETRY_MAX: u32 = 3;
    pub const DEFAULT_RETRY_BACKOFF_MS: u64 = 250;

    pub fn new(url: &str) -> Self {
        Self {
            url: url.trim_end_matches('/').to_string(),
            timeout_ms: Self::DEFAULT_TIMEOUT_MS,
            retry_max: Self::DEFAULT_RETRY_MAX,
            retry_backoff_ms: Self::DEFAULT_RETRY_BACKOFF_MS,
        }
    }
}

#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a, P> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: P,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<JsonRpcError>,
}

/// Error object from a JSON-RPC response.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct JsonRpcError {
    code: i64,
    message: String,
    #[serde(default)]
    data: Option<Value>,
}

/// Why a request failed before the method-specific mapping.
#[derive(Debug)]
enum Failure {
    /// The node answered with an error object.
    Node(JsonRpcError),
    /// Transport, status or decoding failure.
    Transport(String),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BlockHeader {
    #[serde(default)]
    base_fee_per_gas: Option<String>,
}

/// Ledger access over HTTP JSON-RPC.
pub struct HttpLedger {
    cfg: RpcConfig,
    client: reqwest::Client,
    next_id: AtomicU64,
    interfaces: Option<Interfaces>,
}

impl HttpLedger {
    pub fn new(cfg: RpcConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(cfg.timeout_ms))
            .build()
            .map_err(|e| ZeebuError::Config(format!("cannot build http client: {}", e)))?;
        Ok(Self {
            client,
            cfg,
            next_id: AtomicU64::new(1),
            interfaces: None,
        })
    }

    /// Use these interfaces to render custom errors in revert data.
    pub fn with_interfaces(mut self, interfaces: Interfaces) -> Self {
        self.interfaces = Some(interfaces);
        self
    }

    pub fn url(&self) -> &str {
        &self.cfg.url
    }

    async fn request<P, T>(&self, method: &'static str, params: P) -> std::result::Result<T, Failure>
    where
        P: Serialize,
        T: DeserializeOwned,
    {
        let attempts = self.cfg.retry_max.max(1);
        for attempt in 1..=attempts {
            let body = JsonRpcRequest {
                jsonrpc: "2.0",
                id: self.next_id.fetch_add(1, Ordering::Relaxed),
                method,
                params: &params,
            };
            debug!(method, attempt, "sending rpc request");
            let resp = match self.client.post(&self.cfg.url).json(&body).send().await {
                Ok(resp) => resp,
                Err(err) => {
                    warn!(method, attempt, error = %err, "rpc request error");
                    if attempt == attempts || !(err.is_timeout() || err.is_connect()) {
                        return Err(Failure::Transport(format!("{} request failed: {}", method, err)));
                    }
                    self.backoff(method, attempt).await;
                    continue;
                }
            };

            let status = resp.status();
            if status.is_server_error() && attempt < attempts {
                warn!(method, attempt, status = status.as_u16(), "rpc server error");
                self.backoff(method, attempt).await;
                continue;
            }
            let text = resp
                .text()
                .await
                .map_err(|e| Failure::Transport(format!("{} response unreadable: {}", method, e)))?;
            if !status.is_success() {
                return Err(Failure::Transport(format!(
                    "{} returned status {}: {}",
                    method, status, text
                )));
            }

            let parsed: JsonRpcResponse = serde_json::from_str(&text).map_err(|e| {
                Failure::Transport(format!("failed to parse {} response: {}", method, e))
            })?;
            if let Some(err) = parsed.error {
                debug!(method, code = err.code, message = %err.message, "rpc error object");
                return Err(Failure::Node(err));
            }
            // A missing result reads as null; `Option<T>` callers see `None`.
            return serde_json::from_value(parsed.result.unwrap_or(Value::Null)).map_err(|e| {
                Failure::Transport(format!("failed to parse {} result: {}", method, e))
            });
        }

        Err(Failure::Transport(format!("{} retry loop exhausted", method)))
    }

    async fn backoff(&self, method: &'static str, attempt: u32) {
        let delay = self.cfg.retry_backoff_ms.saturating_mul(u64::from(attempt));
        info!(method, attempt, delay_ms = delay, "retrying rpc request");
        sleep(Duration::from_millis(delay)).await;
    }

    /// Map a failure from a simulating method (`eth_call`, `eth_estimateGas`).
    fn simulation_error(&self, failure: Failure) -> ZeebuError {
        match failure {
            Failure::Node(err) => match revert_reason(&err, self.interfaces.as_ref()) {
                Some(reason) => ZeebuError::Estimation { reason },
                None => ZeebuError::Rpc(format!("{} (code {})", err.message, err.code)),
            },
            Failure::Transport(msg) => ZeebuError::Rpc(msg),
        }
    }
}

fn rpc_error(failure: Failure) -> ZeebuError {
    match failure {
        Failure::Node(err) => ZeebuError::Rpc(format!("{} (code {})", err.message, err.code)),
        Failure::Transport(msg) => ZeebuError::Rpc(msg),
    }
}

/// Extract a human-readable revert reason, or `None` if the error is not a revert.
fn revert_reason(err: &JsonRpcError, interfaces: Option<&Interfaces>) -> Option<String> {
    let data = match &err.data {
        Some(Value::String(s)) => hex_to_bytes(s).ok(),
        Some(Value::Object(obj)) => obj
            .get("data")
            .and_then(Value::as_str)
            .and_then(|s| hex_to_bytes(s).ok()),
        _ => None,
    };
    if let Some(data) = data.filter(|d| d.len() >= 4) {
        return Some(match interfaces {
            Some(ifaces) => ifaces.describe_revert(&data),
            None => decode_revert(&data),
        });
    }
    let message = err.message.as_str();
    if let Some(reason) = message.strip_prefix("execution reverted: ") {
        return Some(reason.to_string());
    }
    if err.code == 3 || message.contains("revert") {
        return Some(message.to_string());
    }
    if message.contains("insufficient funds") || message.contains("gas required exceeds") {
        return Some(message.to_string());
    }
    None
}

fn call_params(request: &CallRequest) -> Value {
    let mut obj = json!({
        "to": checksum(&request.to),
        "value": zeebu_types::to_quantity(request.value),
        "data": bytes_to_hex(&request.data),
    });
    if let Some(from) = request.from {
        obj["from"] = Value::String(checksum(&from));
    }
    obj
}

#[async_trait]
impl LedgerRpc for HttpLedger {
    async fn chain_id(&self) -> Result<u64> {
        let id: String = self.request("eth_chainId", json!([])).await.map_err(rpc_error)?;
        parse_quantity_u64(&id)
    }

    async fn call(&self, request: &CallRequest) -> Result<Bytes> {
        let out: String = self
            .request("eth_call", json!([call_params(request), "latest"]))
            .await
            .map_err(|f| self.simulation_error(f))?;
        Ok(Bytes::from(hex_to_bytes(&out)?))
    }

    async fn estimate_gas(&self, request: &CallRequest) -> Result<u64> {
        let gas: String = self
            .request("eth_estimateGas", json!([call_params(request)]))
            .await
            .map_err(|f| self.simulation_error(f))?;
        parse_quantity_u64(&gas)
    }

    async fn fee_params(&self) -> Result<FeeParams> {
        let block: Option<BlockHeader> = self
            .request("eth_getBlockByNumber", json!(["latest", false]))
            .await
            .map_err(rpc_error)?;
        let base_fee = block.and_then(|b| b.base_fee_per_gas);
        match base_fee {
            Some(base_fee) => {
                let base_fee = parse_quantity_u128(&base_fee)?;
                let tip: String = self
                    .request("eth_maxPriorityFeePerGas", json!([]))
                    .await
                    .map_err(rpc_error)?;
                Ok(FeeParams::Eip1559 {
                    base_fee,
                    max_priority_fee: parse_quantity_u128(&tip)?,
                })
            }
            None => {
                let price: String = self
                    .request("eth_gasPrice", json!([]))
                    .await
                    .map_err(rpc_error)?;
                Ok(FeeParams::Legacy { gas_price: parse_quantity_u128(&price)? })
            }
        }
    }

    async fn transaction_count(&self, address: Address) -> Result<u64> {
        let count: String = self
            .request("eth_getTransactionCount", json!([checksum(&address), "pending"]))
            .await
            .map_err(rpc_error)?;
        parse_quantity_u64(&count)
    }

    async fn send_raw_transaction(&self, raw: &[u8]) -> Result<B256> {
        let local_hash = keccak256(raw);
        match self
            .request::<_, B256>("eth_sendRawTransaction", json!([bytes_to_hex(raw)]))
            .await
        {
            Ok(hash) => Ok(hash),
            // A retried broadcast the node already holds.
            Err(Failure::Node(err)) if err.message.contains("already known") => {
                info!(tx_hash = %local_hash, "transaction already known to node");
                Ok(local_hash)
            }
            Err(Failure::Node(err)) => {
                Err(ZeebuError::Submission(format!("{} (code {})", err.message, err.code)))
            }
            Err(Failure::Transport(msg)) => Err(ZeebuError::Submission(msg)),
        }
    }

    async fn transaction_receipt(&self, tx_hash: B256) -> Result<Option<TransactionReceipt>> {
        let raw: Option<RawReceipt> = self
            .request("eth_getTransactionReceipt", json!([tx_hash]))
            .await
            .map_err(rpc_error)?;
        raw.map(TransactionReceipt::try_from).transpose()
    }
}
