//! Shared types for the Zeebu invoice payment SDK.
//!
//! - Error taxonomy used by every crate in the workspace
//! - Hex, quantity, address and amount helpers
//! - Invoice, pending call and deployment records

use alloy_primitives::{Address, U256};
use thiserror::Error;

pub mod deployment;
pub mod invoice;

pub use deployment::Deployment;
pub use invoice::{Invoice, InvoiceDraft, InvoiceId, PendingCall, TxStatus};

/// 0x-prefixed hex string (e.g. "0x1234...").
pub type Hex = String;

/// Zeebu SDK error types.
#[derive(Debug, Error)]
pub enum ZeebuError {
    /// Bad input shape, detected before any network call.
    #[error("encoding error: {0}")]
    Encoding(String),

    #[error("decoding error: {0}")]
    Decoding(String),

    /// The simulated call would revert; `reason` is the ledger's revert reason.
    #[error("execution would revert: {reason}")]
    Estimation { reason: String },

    /// The ledger rejected the broadcast (stale nonce, underpriced, no funds for fee).
    #[error("broadcast rejected: {0}")]
    Submission(String),

    /// Inclusion was not observed in time. The transaction may still confirm.
    #[error("transaction {tx_hash} not included after {waited_ms}ms")]
    Timeout { tx_hash: Hex, waited_ms: u64 },

    #[error("transaction {tx_hash} was included but reverted")]
    Reverted { tx_hash: Hex },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("rpc error: {0}")]
    Rpc(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("signing failed: {0}")]
    Signing(String),

    #[error("invalid hex string: {0}")]
    InvalidHex(String),

    #[error("{0}")]
    Other(String),
}

impl ZeebuError {
    /// Short stable label for the error class, suitable for UI badges and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ZeebuError::Encoding(_) => "encoding",
            ZeebuError::Decoding(_) => "decoding",
            ZeebuError::Estimation { .. } => "estimation",
            ZeebuError::Submission(_) => "submission",
            ZeebuError::Timeout { .. } => "timeout",
            ZeebuError::Reverted { .. } => "reverted",
            ZeebuError::NotFound(_) => "not_found",
            ZeebuError::Rpc(_) => "rpc",
            ZeebuError::Config(_) => "config",
            ZeebuError::Signing(_) => "signing",
            ZeebuError::InvalidHex(_) => "invalid_hex",
            ZeebuError::Other(_) => "other",
        }
    }

    /// Whether resubmitting after refreshing fee and nonce data can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ZeebuError::Submission(_) | ZeebuError::Rpc(_))
    }
}

pub type Result<T> = std::result::Result<T, ZeebuError>;

/// Parse a hex string (with or without 0x) into bytes.
pub fn hex_to_bytes(hex_str: &str) -> Result<Vec<u8>> {
    let hex_str = hex_str.strip_prefix("0x").unwrap_or(hex_str);
    hex::decode(hex_str).map_err(|e| ZeebuError::InvalidHex(e.to_string()))
}

/// Convert bytes to a 0x-prefixed hex string.
pub fn bytes_to_hex(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

/// Parse a JSON-RPC quantity ("0x1a") into a 256-bit integer.
pub fn parse_quantity(s: &str) -> Result<U256> {
    let digits = s
        .strip_prefix("0x")
        .ok_or_else(|| ZeebuError::InvalidHex(format!("quantity without 0x prefix: {}", s)))?;
    if digits.is_empty() {
        return Err(ZeebuError::InvalidHex("empty quantity".into()));
    }
    U256::from_str_radix(digits, 16).map_err(|e| ZeebuError::InvalidHex(format!("{}: {}", s, e)))
}

/// Parse a JSON-RPC quantity that must fit in a u64 (nonces, gas, block numbers).
pub fn parse_quantity_u64(s: &str) -> Result<u64> {
    let value = parse_quantity(s)?;
    u64::try_from(value).map_err(|_| ZeebuError::InvalidHex(format!("quantity overflows u64: {}", s)))
}

/// Parse a JSON-RPC quantity that must fit in a u128 (fee values).
pub fn parse_quantity_u128(s: &str) -> Result<u128> {
    let value = parse_quantity(s)?;
    u128::try_from(value)
        .map_err(|_| ZeebuError::InvalidHex(format!("quantity overflows u128: {}", s)))
}

/// Render an integer as a JSON-RPC quantity (no leading zeros, "0x0" for zero).
pub fn to_quantity(value: impl Into<U256>) -> String {
    format!("0x{:x}", value.into())
}

/// Parse a textual address.
///
/// All-lowercase and all-uppercase forms are accepted as-is. Mixed case must
/// match the EIP-55 checksum exactly.
pub fn parse_address(text: &str) -> Result<Address> {
    let trimmed = text.trim();
    let digits = trimmed.strip_prefix("0x").unwrap_or(trimmed);
    if digits.len() != 40 {
        return Err(ZeebuError::Encoding(format!(
            "address must be 20 bytes, got {:?}",
            text
        )));
    }
    let bytes = hex::decode(digits)
        .map_err(|e| ZeebuError::Encoding(format!("address {:?} is not hex: {}", text, e)))?;
    let address = Address::from_slice(&bytes);

    let has_lower = digits.chars().any(|c| c.is_ascii_lowercase());
    let has_upper = digits.chars().any(|c| c.is_ascii_uppercase());
    if has_lower && has_upper {
        let expected = checksum(&address);
        if expected[2..] != *digits {
            return Err(ZeebuError::Encoding(format!(
                "address {} fails checksum validation (expected {})",
                text, expected
            )));
        }
    }
    Ok(address)
}

/// EIP-55 checksummed textual form.
pub fn checksum(address: &Address) -> String {
    address.to_checksum(None)
}

/// Scale a decimal amount ("12.5") into integer base units with `decimals` places.
pub fn parse_units(text: &str, decimals: u8) -> Result<U256> {
    let text = text.trim();
    let (whole, frac) = match text.split_once('.') {
        Some((w, f)) => (w, f),
        None => (text, ""),
    };
    if whole.is_empty() && frac.is_empty() {
        return Err(ZeebuError::Encoding(format!("invalid amount: {:?}", text)));
    }
    if !whole.chars().chain(frac.chars()).all(|c| c.is_ascii_digit()) {
        return Err(ZeebuError::Encoding(format!("invalid amount: {:?}", text)));
    }
    if frac.len() > decimals as usize {
        return Err(ZeebuError::Encoding(format!(
            "amount {:?} has more than {} fractional digits",
            text, decimals
        )));
    }

    let mut digits = String::with_capacity(whole.len() + decimals as usize);
    digits.push_str(whole);
    digits.push_str(frac);
    for _ in frac.len()..decimals as usize {
        digits.push('0');
    }
    let digits = digits.trim_start_matches('0');
    if digits.is_empty() {
        return Ok(U256::ZERO);
    }
    U256::from_str_radix(digits, 10)
        .map_err(|e| ZeebuError::Encoding(format!("amount {:?} out of range: {}", text, e)))
}
