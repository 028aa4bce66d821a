//! Call encoder for the Zeebu contracts.
//!
//! - Parse published interface descriptions (JSON ABI)
//! - Encode operation calls into call data, decode call data and return values
//! - Decode event logs and revert data
//! - Map invoice records to and from their tuple form
//!
//! Pure and stateless: nothing here touches the network.

use std::path::Path;

use alloy_primitives::Address;
use zeebu_types::{Result, ZeebuError};

pub mod interface;
pub mod records;

pub use alloy_dyn_abi::DynSolValue;
pub use alloy_json_abi::{Event, Function};
pub use interface::{decode_revert, encode_revert, Interface};
pub use records::{draft_from_tuple, draft_to_tuple, invoice_from_values, invoice_to_values};

/// An event decoded from a transaction receipt log.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedEvent {
    pub address: Address,
    pub name: String,
    pub fields: Vec<(String, DynSolValue)>,
}

impl DecodedEvent {
    pub fn field(&self, name: &str) -> Option<&DynSolValue> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }
}

const INVOICE_FACTORY_ABI: &str = include_str!("../abi/InvoiceFactory.json");
const GAS_STATION_ABI: &str = include_str!("../abi/GasStation.json");
const TOKEN_ABI: &str = include_str!("../abi/ERC20.json");
const SMART_ACCOUNT_ABI: &str = include_str!("../abi/SmartAccount.json");

/// The four interface descriptions the payment flow depends on.
#[derive(Debug, Clone)]
pub struct Interfaces {
    pub invoice_factory: Interface,
    pub gas_station: Interface,
    pub token: Interface,
    pub smart_account: Interface,
}

impl Interfaces {
    /// Interface descriptions compiled into the crate.
    pub fn bundled() -> Result<Self> {
        Ok(Self {
            invoice_factory: Interface::from_json("InvoiceFactory", INVOICE_FACTORY_ABI)?,
            gas_station: Interface::from_json("GasStation", GAS_STATION_ABI)?,
            token: Interface::from_json("ERC20", TOKEN_ABI)?,
            smart_account: Interface::from_json("SmartAccount", SMART_ACCOUNT_ABI)?,
        })
    }

    /// Load replacements from a directory holding `InvoiceFactory.json`,
    /// `GasStation.json`, `ERC20.json` and `SmartAccount.json`.
    pub fn load_dir(dir: &Path) -> Result<Self> {
        let load = |name: &str| -> Result<Interface> {
            let path = dir.join(format!("{}.json", name));
            let text = std::fs::read_to_string(&path).map_err(|e| {
                ZeebuError::Config(format!("cannot read {}: {}", path.display(), e))
            })?;
            Interface::from_json(name, &text)
        };
        Ok(Self {
            invoice_factory: load("InvoiceFactory")?,
            gas_station: load("GasStation")?,
            token: load("ERC20")?,
            smart_account: load("SmartAccount")?,
        })
    }

    pub fn all(&self) -> [&Interface; 4] {
        [&self.invoice_factory, &self.gas_station, &self.token, &self.smart_account]
    }

    /// Render revert data, preferring custom errors declared by any interface.
    pub fn describe_revert(&self, data: &[u8]) -> String {
        self.all()
            .iter()
            .find_map(|iface| iface.describe_error(data))
            .unwrap_or_else(|| decode_revert(data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::U256;

    #[test]
    fn test_bundled_interfaces_parse() {
        let ifaces = Interfaces::bundled().unwrap();
        let create = ifaces.invoice_factory.function("createInvoice", 1).unwrap();
        assert_eq!(
            create.signature(),
            "createInvoice((address,address,string,uint256,uint256,uint256,uint256,uint256))"
        );
        let invoices = ifaces.invoice_factory.function("invoices", 1).unwrap();
        assert_eq!(invoices.outputs.len(), 13);
        assert_eq!(
            ifaces.gas_station.function("sponsorTransaction", 3).unwrap().signature(),
            "sponsorTransaction(address,bytes,uint256)"
        );
        assert_eq!(
            ifaces.smart_account.function("execute", 3).unwrap().signature(),
            "execute(address,uint256,bytes)"
        );
    }

    #[test]
    fn test_pay_invoice_selector() {
        let ifaces = Interfaces::bundled().unwrap();
        let data = ifaces
            .invoice_factory
            .encode("payInvoiceById", &[U256::from(7u8).into()])
            .unwrap();
        let (function, args) = ifaces.invoice_factory.decode_call(&data).unwrap();
        assert_eq!(function.name, "payInvoiceById");
        assert_eq!(args[0].as_uint(), Some((U256::from(7u8), 256)));
    }

    #[test]
    fn test_invoice_created_event_from_data_only() {
        let ifaces = Interfaces::bundled().unwrap();
        let (topics, data) = ifaces
            .invoice_factory
            .encode_event("InvoiceCreated", &[U256::from(42u8).into()])
            .unwrap();
        assert_eq!(topics.len(), 1);
        assert_eq!(data.len(), 32);
        let fields = ifaces.invoice_factory.decode_event("InvoiceCreated", &topics, &data).unwrap();
        assert_eq!(fields[0].1.as_uint(), Some((U256::from(42u8), 256)));
    }

    #[test]
    fn test_describe_revert_falls_back_to_reason_string() {
        let ifaces = Interfaces::bundled().unwrap();
        assert_eq!(
            ifaces.describe_revert(&encode_revert("ERC20: insufficient allowance")),
            "ERC20: insufficient allowance"
        );
    }

    #[test]
    fn test_load_dir_reports_missing_files() {
        let err = Interfaces::load_dir(Path::new("/nonexistent-abi-dir")).unwrap_err();
        assert_eq!(err.kind(), "config");
    }
}
