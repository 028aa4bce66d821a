//! Resumable payment state.

use alloy_primitives::{B256, U256};
use serde::{Deserialize, Serialize};
use zeebu_tx::SubmissionResult;
use zeebu_types::{InvoiceId, PendingCall};

/// Non-terminal steps of a payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStep {
    Start,
    Approving,
    Approved,
    PayloadBuilt,
    Sponsoring,
}

/// Where a payment stands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum PaymentState {
    Start,
    Approving,
    Approved,
    PayloadBuilt,
    Sponsoring,
    Done,
    Failed { at: PaymentStep, kind: String, reason: String },
}

impl PaymentState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PaymentState::Done | PaymentState::Failed { .. })
    }
}

impl From<PaymentStep> for PaymentState {
    fn from(step: PaymentStep) -> Self {
        match step {
            PaymentStep::Start => PaymentState::Start,
            PaymentStep::Approving => PaymentState::Approving,
            PaymentStep::Approved => PaymentState::Approved,
            PaymentStep::PayloadBuilt => PaymentState::PayloadBuilt,
            PaymentStep::Sponsoring => PaymentState::Sponsoring,
        }
    }
}

/// Progress of paying one invoice.
///
/// Keeps every hash it has seen so a failed flow can be resumed without
/// repeating a confirmed approval.
#[derive(Debug, Clone)]
pub struct PaymentFlow {
    pub(crate) invoice_id: InvoiceId,
    pub(crate) state: PaymentState,
    pub(crate) amount: Option<U256>,
    pub(crate) approval_tx: Option<B256>,
    pub(crate) payload: Option<PendingCall>,
    pub(crate) payment_tx: Option<B256>,
    pub(crate) result: Option<SubmissionResult>,
}

impl PaymentFlow {
    pub fn new(invoice_id: InvoiceId) -> Self {
        Self {
            invoice_id,
            state: PaymentState::Start,
            amount: None,
            approval_tx: None,
            payload: None,
            payment_tx: None,
            result: None,
        }
    }

    pub fn invoice_id(&self) -> InvoiceId {
        self.invoice_id
    }

    pub fn state(&self) -> &PaymentState {
        &self.state
    }

    /// Allowance requested for the payment, once the invoice has been read.
    pub fn amount(&self) -> Option<U256> {
        self.amount
    }

    /// Hash of the approval transaction, once broadcast.
    pub fn approval_tx(&self) -> Option<B256> {
        self.approval_tx
    }

    /// Hash of the sponsored payment transaction, once broadcast.
    pub fn payment_tx(&self) -> Option<B256> {
        self.payment_tx
    }

    pub fn result(&self) -> Option<&SubmissionResult> {
        self.result.as_ref()
    }

    pub fn is_done(&self) -> bool {
        self.state == PaymentState::Done
    }

    /// The step to run next.
    pub(crate) fn step(&self) -> Option<PaymentStep> {
        match &self.state {
            PaymentState::Start => Some(PaymentStep::Start),
            PaymentState::Approving => Some(PaymentStep::Approving),
            PaymentState::Approved => Some(PaymentStep::Approved),
            PaymentState::PayloadBuilt => Some(PaymentStep::PayloadBuilt),
            PaymentState::Sponsoring => Some(PaymentStep::Sponsoring),
            PaymentState::Done => None,
            PaymentState::Failed { at, .. } => Some(*at),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failed_flow_resumes_at_failed_step() {
        let mut flow = PaymentFlow::new(U256::from(1u8));
        assert_eq!(flow.step(), Some(PaymentStep::Start));
        flow.state = PaymentState::Failed {
            at: PaymentStep::Sponsoring,
            kind: "timeout".into(),
            reason: "not included".into(),
        };
        assert!(flow.state().is_terminal());
        assert_eq!(flow.step(), Some(PaymentStep::Sponsoring));
        flow.state = PaymentState::Done;
        assert_eq!(flow.step(), None);
    }

    #[test]
    fn test_state_serializes_with_tag() {
        let state = PaymentState::Failed {
            at: PaymentStep::Approving,
            kind: "estimation".into(),
            reason: "ERC20: insufficient allowance".into(),
        };
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["state"], "failed");
        assert_eq!(json["at"], "approving");
        assert_eq!(PaymentState::from(PaymentStep::PayloadBuilt), PaymentState::PayloadBuilt);
    }
}
