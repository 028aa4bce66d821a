//! Ledger RPC access for the Zeebu SDK.
//!
//! Defines the `LedgerRpc` trait that every ledger backend implements:
//! - `HttpLedger`: JSON-RPC 2.0 over HTTP
//! - `MockLedger`: in-memory stub of the deployed contracts, for tests and offline runs

use alloy_primitives::{Address, Bytes, B256, U256};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use zeebu_types::{parse_quantity_u64, PendingCall, Result, ZeebuError};

pub mod envelope;
pub mod http;
pub mod mock;

pub use alloy_consensus::TxEnvelope;
pub use envelope::{recover_sender, SignedTransaction};
pub use http::{HttpLedger, RpcConfig};
pub use mock::{CallKind, CallRecord, MockLedger};

/// A call against the current ledger state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CallRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<Address>,
    pub to: Address,
    pub value: U256,
    #[serde(rename = "input")]
    pub data: Bytes,
}

impl CallRequest {
    pub fn new(from: Option<Address>, call: &PendingCall) -> Self {
        Self {
            from,
            to: call.target(),
            value: call.value(),
            data: call.data().clone(),
        }
    }
}

/// Current network fee parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeeParams {
    /// London-style pricing: latest base fee plus a suggested tip.
    Eip1559 { base_fee: u128, max_priority_fee: u128 },
    /// Pre-London gas price.
    Legacy { gas_price: u128 },
}

impl FeeParams {
    /// Fee cap leaving room for the base fee to double before inclusion.
    pub fn max_fee_per_gas(&self) -> u128 {
        match *self {
            FeeParams::Eip1559 { base_fee, max_priority_fee } => {
                base_fee.saturating_mul(2).saturating_add(max_priority_fee)
            }
            FeeParams::Legacy { gas_price } => gas_price,
        }
    }
}

/// A log emitted during execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Log {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
}

/// Final outcome of an included transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionReceipt {
    pub tx_hash: B256,
    pub block_number: u64,
    pub success: bool,
    pub gas_used: u64,
    pub logs: Vec<Log>,
}

/// Receipt as returned by `eth_getTransactionReceipt`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RawReceipt {
    transaction_hash: B256,
    block_number: String,
    #[serde(default)]
    status: Option<String>,
    gas_used: String,
    #[serde(default)]
    logs: Vec<Log>,
}

impl TryFrom<RawReceipt> for TransactionReceipt {
    type Error = ZeebuError;

    fn try_from(raw: RawReceipt) -> Result<Self> {
        Ok(Self {
            tx_hash: raw.transaction_hash,
            block_number: parse_quantity_u64(&raw.block_number)?,
            // Pre-Byzantium receipts carry no status; treat them as successful.
            success: raw.status.as_deref().map_or(true, |s| s == "0x1"),
            gas_used: parse_quantity_u64(&raw.gas_used)?,
            logs: raw.logs,
        })
    }
}

/// The ledger operations the SDK depends on.
///
/// All methods are async; implementations must be shareable across tasks.
#[async_trait]
pub trait LedgerRpc: Send + Sync {
    async fn chain_id(&self) -> Result<u64>;

    /// Execute a read-only call at the latest block and return its output.
    async fn call(&self, request: &CallRequest) -> Result<Bytes>;

    /// Simulate `request` and return the gas it would use.
    ///
    /// A revert surfaces as [`ZeebuError::Estimation`] with the revert reason.
    async fn estimate_gas(&self, request: &CallRequest) -> Result<u64>;

    async fn fee_params(&self) -> Result<FeeParams>;

    /// Next nonce for `address`, including pending transactions.
    async fn transaction_count(&self, address: Address) -> Result<u64>;

    /// Broadcast a signed envelope and return its transaction hash.
    async fn send_raw_transaction(&self, raw: &[u8]) -> Result<B256>;

    /// `Ok(None)` while the transaction is not yet included.
    async fn transaction_receipt(&self, tx_hash: B256) -> Result<Option<TransactionReceipt>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_receipt_from_json() {
        let json = r#"{
            "transactionHash": "0x1111111111111111111111111111111111111111111111111111111111111111",
            "blockNumber": "0x10",
            "status": "0x0",
            "gasUsed": "0x5208",
            "logs": [{
                "address": "0x8dd4f74c9487592e60a18e269eeabb077049d6f0",
                "topics": ["0x2222222222222222222222222222222222222222222222222222222222222222"],
                "data": "0x",
                "logIndex": "0x0"
            }]
        }"#;
        let raw: RawReceipt = serde_json::from_str(json).unwrap();
        let receipt = TransactionReceipt::try_from(raw).unwrap();
        assert_eq!(receipt.block_number, 16);
        assert_eq!(receipt.gas_used, 21_000);
        assert!(!receipt.success);
        assert_eq!(receipt.logs.len(), 1);
        assert!(receipt.logs[0].data.is_empty());
    }

    #[test]
    fn test_max_fee_per_gas() {
        let fees = FeeParams::Eip1559 { base_fee: 100, max_priority_fee: 3 };
        assert_eq!(fees.max_fee_per_gas(), 203);
        assert_eq!(FeeParams::Legacy { gas_price: 7 }.max_fee_per_gas(), 7);
    }

    #[test]
    fn test_call_request_json_shape() {
        let call = PendingCall::call(Address::repeat_byte(1), vec![0xab]);
        let req = CallRequest::new(None, &call);
        let json = serde_json::to_value(&req).unwrap();
        assert!(json.get("from").is_none());
        assert_eq!(json["input"], "0xab");
        assert_eq!(json["value"], "0x0");
    }
}
