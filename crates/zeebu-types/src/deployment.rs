//! Addresses of the deployed contracts this SDK talks to.

use alloy_primitives::{address, Address};
use serde::{Deserialize, Serialize};

use crate::{Result, ZeebuError};

/// Optimism Sepolia chain id.
pub const OPTIMISM_SEPOLIA_CHAIN_ID: u64 = 11_155_420;

/// Contract address book for one network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deployment {
    pub chain_id: u64,
    pub invoice_factory: Address,
    pub gas_station: Address,
    pub token: Address,
    pub smart_account: Address,
}

impl Default for Deployment {
    fn default() -> Self {
        Self {
            chain_id: OPTIMISM_SEPOLIA_CHAIN_ID,
            invoice_factory: address!("8DD4f74c9487592e60a18e269eEAbB077049d6f0"),
            gas_station: address!("7401770d7DcA314332Db3eca9d718A5Bf5219Ad5"),
            token: address!("884ea8fb01727a643cbc9100b7eced0648f15963"),
            smart_account: address!("5282e301214cf0A95CEf8E347764c4Dddd867d62"),
        }
    }
}

impl Deployment {
    /// Load an address book from JSON text.
    pub fn from_json(text: &str) -> Result<Self> {
        let deployment: Deployment = serde_json::from_str(text)
            .map_err(|e| ZeebuError::Config(format!("invalid deployment json: {}", e)))?;
        deployment.validate()?;
        Ok(deployment)
    }

    pub fn validate(&self) -> Result<()> {
        let entries = [
            ("invoiceFactory", self.invoice_factory),
            ("gasStation", self.gas_station),
            ("token", self.token),
            ("smartAccount", self.smart_account),
        ];
        for (name, addr) in entries {
            if addr == Address::ZERO {
                return Err(ZeebuError::Config(format!("{} address is zero", name)));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        Deployment::default().validate().unwrap();
    }

    #[test]
    fn test_from_json_rejects_zero_address() {
        let json = r#"{
            "chainId": 10,
            "invoiceFactory": "0x0000000000000000000000000000000000000000",
            "gasStation": "0x7401770d7DcA314332Db3eca9d718A5Bf5219Ad5",
            "token": "0x884ea8fb01727a643cbc9100b7eced0648f15963",
            "smartAccount": "0x5282e301214cf0A95CEf8E347764c4Dddd867d62"
        }"#;
        let err = Deployment::from_json(json).unwrap_err();
        assert_eq!(err.kind(), "config");
    }

    #[test]
    fn test_from_json_round_trip() {
        let d = Deployment::default();
        let text = serde_json::to_string(&d).unwrap();
        assert_eq!(Deployment::from_json(&text).unwrap(), d);
    }
}
