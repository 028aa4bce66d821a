//! Pending-call builders for the invoice flows.

use alloy_primitives::{Address, U256};
use zeebu_abi::{draft_to_tuple, DynSolValue, Interfaces};
use zeebu_types::{Deployment, InvoiceDraft, InvoiceId, PendingCall, Result};

/// Builds the calls of every flow against one deployment.
#[derive(Debug, Clone, Copy)]
pub struct CallBuilder<'a> {
    deployment: &'a Deployment,
    interfaces: &'a Interfaces,
}

impl<'a> CallBuilder<'a> {
    pub fn new(deployment: &'a Deployment, interfaces: &'a Interfaces) -> Self {
        Self { deployment, interfaces }
    }

    /// `createInvoice(draft)` on the invoice factory.
    pub fn create_invoice(&self, draft: &InvoiceDraft) -> Result<PendingCall> {
        let data = self.interfaces.invoice_factory.encode("createInvoice", &[draft_to_tuple(draft)])?;
        Ok(PendingCall::call(self.deployment.invoice_factory, data))
    }

    /// `invoices(id)` on the invoice factory.
    pub fn view_invoice(&self, id: InvoiceId) -> Result<PendingCall> {
        let data = self.interfaces.invoice_factory.encode("invoices", &[id.into()])?;
        Ok(PendingCall::call(self.deployment.invoice_factory, data))
    }

    /// `approve(invoice_factory, amount)` on the token.
    pub fn approve(&self, amount: U256) -> Result<PendingCall> {
        let data = self
            .interfaces
            .token
            .encode("approve", &[self.deployment.invoice_factory.into(), amount.into()])?;
        Ok(PendingCall::call(self.deployment.token, data))
    }

    /// `payInvoiceById(id)` on the invoice factory.
    pub fn pay_invoice(&self, id: InvoiceId) -> Result<PendingCall> {
        let data = self.interfaces.invoice_factory.encode("payInvoiceById", &[id.into()])?;
        Ok(PendingCall::call(self.deployment.invoice_factory, data))
    }

    /// Run `inner` from the smart account: `execute(target, value, data)`.
    pub fn execute(&self, inner: &PendingCall) -> Result<PendingCall> {
        let data = self.interfaces.smart_account.encode(
            "execute",
            &[
                inner.target().into(),
                inner.value().into(),
                DynSolValue::Bytes(inner.data().to_vec()),
            ],
        )?;
        Ok(PendingCall::call(self.deployment.smart_account, data))
    }

    /// Relay `inner` through the gas station with an execution ceiling of `gas_limit`.
    ///
    /// The relay forwards no value, so `inner` must not carry any.
    pub fn sponsor(&self, inner: &PendingCall, gas_limit: u64) -> Result<PendingCall> {
        if !inner.value().is_zero() {
            return Err(zeebu_types::ZeebuError::Encoding(
                "sponsored calls cannot carry value".into(),
            ));
        }
        let data = self.interfaces.gas_station.encode(
            "sponsorTransaction",
            &[
                inner.target().into(),
                DynSolValue::Bytes(inner.data().to_vec()),
                U256::from(gas_limit).into(),
            ],
        )?;
        Ok(PendingCall::call(self.deployment.gas_station, data))
    }

    /// `inner` run by the smart account, relayed through the gas station.
    pub fn sponsored(&self, inner: &PendingCall, gas_limit: u64) -> Result<PendingCall> {
        self.sponsor(&self.execute(inner)?, gas_limit)
    }

    /// Addresses whose logs the flows decode, paired with their interfaces.
    pub fn decoders(&self) -> [(Address, &'a zeebu_abi::Interface); 4] {
        [
            (self.deployment.invoice_factory, &self.interfaces.invoice_factory),
            (self.deployment.gas_station, &self.interfaces.gas_station),
            (self.deployment.token, &self.interfaces.token),
            (self.deployment.smart_account, &self.interfaces.smart_account),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> (Deployment, Interfaces) {
        (Deployment::default(), Interfaces::bundled().unwrap())
    }

    #[test]
    fn test_sponsored_payment_nests_three_levels() {
        let (dep, ifaces) = fixture();
        let calls = CallBuilder::new(&dep, &ifaces);
        let pay = calls.pay_invoice(U256::from(7u8)).unwrap();
        let outer = calls.sponsored(&pay, 2_000_000).unwrap();
        assert_eq!(outer.target(), dep.gas_station);

        let args = ifaces.gas_station.decode_input("sponsorTransaction", outer.data()).unwrap();
        assert_eq!(args[0].as_address(), Some(dep.smart_account));
        assert_eq!(args[2].as_uint(), Some((U256::from(2_000_000u64), 256)));

        let exec = ifaces.smart_account.decode_input("execute", args[1].as_bytes().unwrap()).unwrap();
        assert_eq!(exec[0].as_address(), Some(dep.invoice_factory));
        assert_eq!(exec[1].as_uint(), Some((U256::ZERO, 256)));
        assert_eq!(exec[2].as_bytes().unwrap(), &pay.data()[..]);

        let inner = ifaces.invoice_factory.decode_input("payInvoiceById", exec[2].as_bytes().unwrap()).unwrap();
        assert_eq!(inner[0].as_uint(), Some((U256::from(7u8), 256)));
    }

    #[test]
    fn test_approve_targets_token_with_factory_spender() {
        let (dep, ifaces) = fixture();
        let call = CallBuilder::new(&dep, &ifaces).approve(U256::from(11_000_000u64)).unwrap();
        assert_eq!(call.target(), dep.token);
        assert_eq!(call.selector(), Some([0x09, 0x5e, 0xa7, 0xb3]));
        let args = ifaces.token.decode_input("approve", call.data()).unwrap();
        assert_eq!(args[0].as_address(), Some(dep.invoice_factory));
    }

    #[test]
    fn test_sponsor_rejects_value() {
        let (dep, ifaces) = fixture();
        let call = PendingCall::new(dep.token, U256::from(1u8), Vec::<u8>::new());
        let err = CallBuilder::new(&dep, &ifaces).sponsor(&call, 1).unwrap_err();
        assert_eq!(err.kind(), "encoding");
    }
}
