//! Invoice records and the pending-call envelope.

use alloy_primitives::{Address, Bytes, U256};
use serde::{Deserialize, Serialize};

use crate::{ZeebuError, Result};

/// Invoice identifier assigned by the invoice factory.
pub type InvoiceId = U256;

/// Basis-point denominator (100% = 10000 bps).
pub const BPS_DENOMINATOR: u32 = 10_000;

/// Invoice input collected from the create form.
///
/// Consumed once by invoice creation and not retained.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceDraft {
    pub merchant: Address,
    pub customer: Address,
    pub name_of_merchant: String,
    pub product_cost_per_unit: U256, // token base units
    pub quantity: U256,
    pub tax_rate_in_bps: u32,
    pub discount_in_bps: u32,
    pub gstin_of_merchant: U256,
}

impl InvoiceDraft {
    /// Reject drafts the factory would accept but that make no sense as an invoice.
    pub fn validate(&self) -> Result<()> {
        if self.merchant == Address::ZERO {
            return Err(ZeebuError::Encoding("merchant address is zero".into()));
        }
        if self.customer == Address::ZERO {
            return Err(ZeebuError::Encoding("customer address is zero".into()));
        }
        if self.name_of_merchant.trim().is_empty() {
            return Err(ZeebuError::Encoding("merchant name is empty".into()));
        }
        if self.quantity.is_zero() {
            return Err(ZeebuError::Encoding("quantity must be positive".into()));
        }
        if self.tax_rate_in_bps > BPS_DENOMINATOR {
            return Err(ZeebuError::Encoding(format!(
                "tax rate {} bps exceeds {}",
                self.tax_rate_in_bps, BPS_DENOMINATOR
            )));
        }
        if self.discount_in_bps > BPS_DENOMINATOR {
            return Err(ZeebuError::Encoding(format!(
                "discount {} bps exceeds {}",
                self.discount_in_bps, BPS_DENOMINATOR
            )));
        }
        Ok(())
    }
}

/// Invoice as stored by the factory contract. Read-only on this side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Invoice {
    pub id: InvoiceId,
    pub date_of_txn: U256,
    pub date_of_invoice_generation: U256,
    pub merchant: Address,
    pub customer: Address,
    pub name_of_merchant: String,
    pub product_cost_per_unit: U256,
    pub quantity: U256,
    pub tax_rate_in_bps: U256,
    pub total_amount_including_tax: U256,
    pub discount_in_bps: U256,
    pub gstin_of_merchant: U256,
    pub paying_mode: String,
}

impl Invoice {
    /// The factory stamps the payment time on settlement.
    pub fn is_paid(&self) -> bool {
        !self.date_of_txn.is_zero()
    }
}

/// One encoded, not-yet-submitted operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingCall {
    target: Address,
    value: U256,
    data: Bytes,
}

impl PendingCall {
    pub fn new(target: Address, value: U256, data: impl Into<Bytes>) -> Self {
        Self { target, value, data: data.into() }
    }

    /// Zero-value call, the common case for contract calls here.
    pub fn call(target: Address, data: impl Into<Bytes>) -> Self {
        Self::new(target, U256::ZERO, data)
    }

    pub fn target(&self) -> Address {
        self.target
    }

    pub fn value(&self) -> U256 {
        self.value
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// First four bytes of the call data, if present.
    pub fn selector(&self) -> Option<[u8; 4]> {
        self.data.get(..4).map(|s| [s[0], s[1], s[2], s[3]])
    }
}

/// Inclusion status of a submitted transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxStatus {
    Pending,
    Confirmed,
    Failed,
}
