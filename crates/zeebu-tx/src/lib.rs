//! Transaction submitter.
//!
//! - Estimate gas and apply a safety margin
//! - Fetch fee parameters and the pending nonce
//! - Sign and broadcast
//! - Poll for the receipt and decode the emitted events

pub mod signer;

use std::sync::Arc;
use std::time::Duration;

use alloy_consensus::{TxEip1559, TxEnvelope, TxLegacy};
use alloy_eips::eip2718::Encodable2718;
use alloy_primitives::{Address, Bytes, TxKind, B256};
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};
use zeebu_abi::{DecodedEvent, Interface};
use zeebu_rpc::{CallRequest, FeeParams, LedgerRpc, TransactionReceipt};
use zeebu_types::{PendingCall, Result, TxStatus, ZeebuError};

pub use signer::LocalSigner;

/// Submitter configuration.
#[derive(Debug, Clone)]
pub struct SubmitterConfig {
    /// Gas limit as a percentage of the estimate.
    pub gas_margin_percent: u64,
    pub receipt_timeout_ms: u64,
    pub poll_interval_ms: u64,
}

impl Default for SubmitterConfig {
    fn default() -> Self {
        Self {
            gas_margin_percent: 120,
            receipt_timeout_ms: 120_000,
            poll_interval_ms: 2_000,
        }
    }
}

/// Outcome of a confirmed submission.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmissionResult {
    pub tx_hash: B256,
    pub status: TxStatus,
    pub block_number: u64,
    pub gas_used: u64,
    pub decoded_events: Vec<DecodedEvent>,
}

impl SubmissionResult {
    pub fn event(&self, name: &str) -> Option<&DecodedEvent> {
        self.decoded_events.iter().find(|e| e.name == name)
    }
}

/// Turns pending calls into confirmed transactions for one sender.
///
/// Submissions are serialized: the nonce is read and the transaction broadcast
/// under a single lock, so concurrent submissions never share a nonce.
pub struct Submitter {
    ledger: Arc<dyn LedgerRpc>,
    signer: LocalSigner,
    config: SubmitterConfig,
    send_lock: Mutex<()>,
}

impl Submitter {
    pub fn new(ledger: Arc<dyn LedgerRpc>, signer: LocalSigner, config: SubmitterConfig) -> Self {
        Self {
            ledger,
            signer,
            config,
            send_lock: Mutex::new(()),
        }
    }

    pub fn sender(&self) -> Address {
        self.signer.address()
    }

    pub fn ledger(&self) -> &Arc<dyn LedgerRpc> {
        &self.ledger
    }

    pub fn config(&self) -> &SubmitterConfig {
        &self.config
    }

    /// Read-only call from the sender's address.
    pub async fn read(&self, call: &PendingCall) -> Result<Bytes> {
        self.ledger.call(&CallRequest::new(Some(self.sender()), call)).await
    }

    /// Submit `call` and wait for its receipt.
    ///
    /// Logs from the addresses in `decode_with` are decoded against the paired
    /// interface. Nothing is broadcast if estimation fails.
    pub async fn submit(
        &self,
        call: &PendingCall,
        decode_with: &[(Address, &Interface)],
    ) -> Result<SubmissionResult> {
        let tx_hash = self.broadcast(call).await?;
        self.wait_for_receipt(tx_hash, decode_with).await
    }

    /// Estimate, sign and broadcast `call`; returns once the node accepts it.
    pub async fn broadcast(&self, call: &PendingCall) -> Result<B256> {
        let request = CallRequest::new(Some(self.sender()), call);
        let estimate = self.ledger.estimate_gas(&request).await?;
        let gas_limit = apply_margin(estimate, self.config.gas_margin_percent);
        let fees = self.ledger.fee_params().await?;
        let chain_id = self.ledger.chain_id().await?;

        let _guard = self.send_lock.lock().await;
        let nonce = self.ledger.transaction_count(self.sender()).await?;
        let envelope = sign_envelope(&self.signer, chain_id, nonce, gas_limit, fees, call)?;
        let raw = envelope.encoded_2718();
        let tx_hash = self.ledger.send_raw_transaction(&raw).await?;
        info!(
            tx_hash = %tx_hash,
            to = %call.target(),
            nonce,
            gas_limit,
            "transaction broadcast"
        );
        Ok(tx_hash)
    }

    /// Poll for the receipt of `tx_hash` until the configured timeout.
    pub async fn wait_for_receipt(
        &self,
        tx_hash: B256,
        decode_with: &[(Address, &Interface)],
    ) -> Result<SubmissionResult> {
        let started = Instant::now();
        let timeout = Duration::from_millis(self.config.receipt_timeout_ms);
        let poll = Duration::from_millis(self.config.poll_interval_ms.max(1));
        loop {
            match self.ledger.transaction_receipt(tx_hash).await {
                Ok(Some(receipt)) => return finish(receipt, decode_with),
                Ok(None) => {}
                Err(e) if e.is_retryable() => {
                    warn!(tx_hash = %tx_hash, error = %e, "receipt poll failed");
                }
                Err(e) => return Err(e),
            }
            let waited = started.elapsed();
            if waited >= timeout {
                return Err(ZeebuError::Timeout {
                    tx_hash: tx_hash.to_string(),
                    waited_ms: u64::try_from(waited.as_millis()).unwrap_or(u64::MAX),
                });
            }
            debug!(tx_hash = %tx_hash, waited_ms = waited.as_millis() as u64, "receipt not yet available");
            sleep(poll.min(timeout - waited)).await;
        }
    }
}

fn apply_margin(estimate: u64, percent: u64) -> u64 {
    let scaled = u128::from(estimate) * u128::from(percent.max(100));
    u64::try_from(scaled.div_ceil(100)).unwrap_or(u64::MAX)
}

fn sign_envelope(
    signer: &LocalSigner,
    chain_id: u64,
    nonce: u64,
    gas_limit: u64,
    fees: FeeParams,
    call: &PendingCall,
) -> Result<TxEnvelope> {
    let envelope: TxEnvelope = match fees {
        FeeParams::Eip1559 { max_priority_fee, .. } => signer
            .sign_transaction(TxEip1559 {
                chain_id,
                nonce,
                gas_limit,
                max_fee_per_gas: fees.max_fee_per_gas(),
                max_priority_fee_per_gas: max_priority_fee,
                to: TxKind::Call(call.target()),
                value: call.value(),
                input: call.data().clone(),
                ..Default::default()
            })?
            .into(),
        // EIP-155 replay protection.
        FeeParams::Legacy { gas_price } => signer
            .sign_transaction(TxLegacy {
                chain_id: Some(chain_id),
                nonce,
                gas_price,
                gas_limit,
                to: TxKind::Call(call.target()),
                value: call.value(),
                input: call.data().clone(),
            })?
            .into(),
    };
    Ok(envelope)
}

fn finish(receipt: TransactionReceipt, decode_with: &[(Address, &Interface)]) -> Result<SubmissionResult> {
    if !receipt.success {
        warn!(tx_hash = %receipt.tx_hash, block = receipt.block_number, "transaction reverted");
        return Err(ZeebuError::Reverted { tx_hash: receipt.tx_hash.to_string() });
    }
    let mut decoded_events = Vec::new();
    for log in &receipt.logs {
        let Some((_, iface)) = decode_with.iter().find(|(addr, _)| *addr == log.address) else {
            continue;
        };
        match iface.decode_log(&log.topics, &log.data) {
            Ok(Some((event, fields))) => decoded_events.push(DecodedEvent {
                address: log.address,
                name: event.name.clone(),
                fields,
            }),
            Ok(None) => {}
            Err(e) => warn!(address = %log.address, error = %e, "undecodable log"),
        }
    }
    info!(
        tx_hash = %receipt.tx_hash,
        block = receipt.block_number,
        gas_used = receipt.gas_used,
        events = decoded_events.len(),
        "transaction confirmed"
    );
    Ok(SubmissionResult {
        tx_hash: receipt.tx_hash,
        status: TxStatus::Confirmed,
        block_number: receipt.block_number,
        gas_used: receipt.gas_used,
        decoded_events,
    })
}
