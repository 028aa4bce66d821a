//! Invoice operations: create, view and sponsored payment.
//!
//! A sponsored payment runs as a resumable state machine:
//! `Start → Approving → Approved → PayloadBuilt → Sponsoring → Done`,
//! with `Failed` recording the step that failed. Each step waits for the
//! previous one to be confirmed on the ledger.

pub mod calls;
pub mod flow;

use std::sync::Arc;

use alloy_primitives::{B256, U256};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use zeebu_abi::{invoice_from_values, Interfaces};
use zeebu_rpc::CallRequest;
use zeebu_tx::{SubmissionResult, Submitter};
use zeebu_types::{Deployment, Invoice, InvoiceDraft, InvoiceId, PendingCall, Result, ZeebuError};

pub use calls::CallBuilder;
pub use flow::{PaymentFlow, PaymentState, PaymentStep};

/// How the token approval reaches the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalRoute {
    /// The smart account approves, relayed through the gas station.
    #[default]
    Sponsored,
    /// The signer approves from its own balance, paying its own gas.
    Direct,
}

/// Orchestrator configuration.
#[derive(Debug, Clone)]
pub struct OpsConfig {
    /// Execution ceiling passed to `sponsorTransaction`.
    pub sponsored_gas_limit: u64,
    pub approval_route: ApprovalRoute,
}

impl Default for OpsConfig {
    fn default() -> Self {
        Self {
            sponsored_gas_limit: 2_000_000,
            approval_route: ApprovalRoute::Sponsored,
        }
    }
}

/// Progress notifications for a presentation layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpsEvent {
    InvoiceCreated { invoice_id: InvoiceId, tx_hash: B256 },
    Started { invoice_id: InvoiceId },
    ApprovalSubmitted { invoice_id: InvoiceId, tx_hash: B256 },
    Approved { invoice_id: InvoiceId, tx_hash: B256 },
    PayloadBuilt { invoice_id: InvoiceId },
    SponsorSubmitted { invoice_id: InvoiceId, tx_hash: B256 },
    Done { invoice_id: InvoiceId, tx_hash: B256 },
    Failed { invoice_id: InvoiceId, at: PaymentStep, reason: String },
}

/// Callback type for progress events.
pub type OpsEventHandler = Box<dyn Fn(OpsEvent) + Send + Sync>;

/// Result of creating an invoice.
#[derive(Debug, Clone)]
pub struct CreatedInvoice {
    pub invoice_id: InvoiceId,
    pub submission: SubmissionResult,
}

/// Entry points for the presentation layer.
pub struct InvoiceOps {
    submitter: Arc<Submitter>,
    deployment: Deployment,
    interfaces: Interfaces,
    config: OpsConfig,
    on_event: Option<OpsEventHandler>,
}

impl InvoiceOps {
    pub fn new(
        submitter: Arc<Submitter>,
        deployment: Deployment,
        interfaces: Interfaces,
        config: OpsConfig,
        on_event: Option<OpsEventHandler>,
    ) -> Self {
        Self { submitter, deployment, interfaces, config, on_event }
    }

    fn emit(&self, event: OpsEvent) {
        if let Some(ref handler) = self.on_event {
            handler(event);
        }
    }

    pub fn calls(&self) -> CallBuilder<'_> {
        CallBuilder::new(&self.deployment, &self.interfaces)
    }

    pub fn deployment(&self) -> &Deployment {
        &self.deployment
    }

    /// Create an invoice and return the id the factory assigned.
    pub async fn create_invoice(&self, draft: &InvoiceDraft) -> Result<CreatedInvoice> {
        draft.validate()?;
        let call = self.calls().create_invoice(draft)?;
        let submission = self
            .submitter
            .submit(&call, &[(self.deployment.invoice_factory, &self.interfaces.invoice_factory)])
            .await?;
        let invoice_id = submission
            .event("InvoiceCreated")
            .and_then(|e| e.field("id"))
            .and_then(|v| v.as_uint())
            .map(|(id, _)| id)
            .ok_or_else(|| {
                ZeebuError::Decoding(format!(
                    "transaction {} emitted no InvoiceCreated event",
                    submission.tx_hash
                ))
            })?;
        info!(invoice_id = %invoice_id, tx_hash = %submission.tx_hash, "invoice created");
        self.emit(OpsEvent::InvoiceCreated { invoice_id, tx_hash: submission.tx_hash });
        Ok(CreatedInvoice { invoice_id, submission })
    }

    /// Read an invoice. An id the factory does not know is `NotFound`.
    pub async fn view_invoice(&self, id: InvoiceId) -> Result<Invoice> {
        let call = self.calls().view_invoice(id)?;
        let out = self.submitter.read(&call).await?;
        let values = self.interfaces.invoice_factory.decode_output("invoices", &out)?;
        let invoice = invoice_from_values(&values)?;
        if invoice.id.is_zero() {
            return Err(ZeebuError::NotFound(format!("invoice {}", id)));
        }
        Ok(invoice)
    }

    /// Pay an invoice through the gas station from start to finish.
    pub async fn pay_invoice(&self, id: InvoiceId) -> Result<SubmissionResult> {
        let mut flow = PaymentFlow::new(id);
        self.resume(&mut flow).await
    }

    /// Continue `flow` from its last successful step.
    ///
    /// On failure the flow is left in `Failed` with every hash it has seen, so
    /// calling `resume` again never repeats a confirmed approval.
    pub async fn resume(&self, flow: &mut PaymentFlow) -> Result<SubmissionResult> {
        match self.advance(flow).await {
            Ok(result) => Ok(result),
            Err(e) => {
                let at = flow.step().unwrap_or(PaymentStep::Sponsoring);
                warn!(invoice_id = %flow.invoice_id, step = ?at, error = %e, "payment failed");
                flow.state = PaymentState::Failed {
                    at,
                    kind: e.kind().to_string(),
                    reason: e.to_string(),
                };
                self.emit(OpsEvent::Failed {
                    invoice_id: flow.invoice_id,
                    at,
                    reason: e.to_string(),
                });
                Err(e)
            }
        }
    }

    async fn advance(&self, flow: &mut PaymentFlow) -> Result<SubmissionResult> {
        let id = flow.invoice_id;
        loop {
            let Some(step) = flow.step() else {
                return flow
                    .result
                    .clone()
                    .ok_or_else(|| ZeebuError::Other("finished payment has no result".into()));
            };
            match step {
                PaymentStep::Start => {
                    self.emit(OpsEvent::Started { invoice_id: id });
                    let invoice = self.view_invoice(id).await?;
                    if invoice.is_paid() {
                        // Let the factory's guard report why, without broadcasting.
                        self.simulate_payment(id).await?;
                    }
                    flow.amount = Some(invoice.total_amount_including_tax);
                    flow.state = PaymentState::Approving;
                }
                PaymentStep::Approving => {
                    let Some(amount) = flow.amount else {
                        flow.state = PaymentState::Start;
                        continue;
                    };
                    let tx_hash = match flow.approval_tx {
                        Some(hash) => hash,
                        None => {
                            let call = self.approval_call(amount)?;
                            let hash = self.submitter.broadcast(&call).await?;
                            flow.approval_tx = Some(hash);
                            self.emit(OpsEvent::ApprovalSubmitted { invoice_id: id, tx_hash: hash });
                            hash
                        }
                    };
                    let decoders = self.calls().decoders();
                    match self.submitter.wait_for_receipt(tx_hash, &decoders).await {
                        Ok(_) => {}
                        Err(e @ ZeebuError::Reverted { .. }) => {
                            flow.approval_tx = None;
                            return Err(e);
                        }
                        Err(e) => return Err(e),
                    }
                    info!(invoice_id = %id, tx_hash = %tx_hash, "approval confirmed");
                    self.emit(OpsEvent::Approved { invoice_id: id, tx_hash });
                    flow.state = PaymentState::Approved;
                }
                PaymentStep::Approved => {
                    let calls = self.calls();
                    let payload = calls.sponsored(&calls.pay_invoice(id)?, self.config.sponsored_gas_limit)?;
                    flow.payload = Some(payload);
                    flow.state = PaymentState::PayloadBuilt;
                    self.emit(OpsEvent::PayloadBuilt { invoice_id: id });
                }
                PaymentStep::PayloadBuilt => {
                    let Some(payload) = flow.payload.clone() else {
                        flow.state = PaymentState::Approved;
                        continue;
                    };
                    let hash = self.submitter.broadcast(&payload).await?;
                    flow.payment_tx = Some(hash);
                    flow.state = PaymentState::Sponsoring;
                    self.emit(OpsEvent::SponsorSubmitted { invoice_id: id, tx_hash: hash });
                }
                PaymentStep::Sponsoring => {
                    let Some(tx_hash) = flow.payment_tx else {
                        flow.state = PaymentState::PayloadBuilt;
                        continue;
                    };
                    let decoders = self.calls().decoders();
                    let result = match self.submitter.wait_for_receipt(tx_hash, &decoders).await {
                        Ok(result) => result,
                        Err(e @ ZeebuError::Reverted { .. }) => {
                            flow.payment_tx = None;
                            return Err(e);
                        }
                        Err(e) => return Err(e),
                    };
                    info!(invoice_id = %id, tx_hash = %tx_hash, "invoice paid");
                    flow.result = Some(result.clone());
                    flow.state = PaymentState::Done;
                    self.emit(OpsEvent::Done { invoice_id: id, tx_hash });
                    return Ok(result);
                }
            }
        }
    }

    /// The single approval for `amount`, routed per configuration.
    pub fn approval_call(&self, amount: U256) -> Result<PendingCall> {
        let calls = self.calls();
        let approve = calls.approve(amount)?;
        match self.config.approval_route {
            ApprovalRoute::Sponsored => calls.sponsored(&approve, self.config.sponsored_gas_limit),
            ApprovalRoute::Direct => Ok(approve),
        }
    }

    async fn simulate_payment(&self, id: InvoiceId) -> Result<()> {
        let calls = self.calls();
        let payload = calls.sponsored(&calls.pay_invoice(id)?, self.config.sponsored_gas_limit)?;
        let request = CallRequest::new(Some(self.submitter.sender()), &payload);
        self.submitter.ledger().estimate_gas(&request).await.map(|_| ())
    }
}
