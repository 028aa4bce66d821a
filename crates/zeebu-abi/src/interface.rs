//! Interface descriptions: the published JSON ABI of a deployed contract.
//!
//! - Functions are looked up by name (overloads resolved by argument count)
//!   or by 4-byte selector
//! - Events are decoded from (topics, data) and matched by topic0
//! - Custom errors are used to render revert data

use alloy_dyn_abi::{DynSolValue, EventExt, FunctionExt, JsonAbiExt, Specifier};
use alloy_json_abi::{Event, Function, JsonAbi};
use alloy_primitives::{keccak256, B256};
use alloy_sol_types::{Panic, Revert, SolError};
use zeebu_types::{bytes_to_hex, Result, ZeebuError};

/// Parsed interface description of one contract.
#[derive(Debug, Clone)]
pub struct Interface {
    name: String,
    abi: JsonAbi,
}

impl Interface {
    /// Parse a JSON ABI array. Constructor, fallback and receive entries are
    /// accepted and ignored.
    pub fn from_json(name: &str, text: &str) -> Result<Self> {
        let abi: JsonAbi = serde_json::from_str(text).map_err(|e| {
            ZeebuError::Config(format!("invalid interface description {}: {}", name, e))
        })?;
        Ok(Self { name: name.to_string(), abi })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn abi(&self) -> &JsonAbi {
        &self.abi
    }

    pub fn functions(&self) -> impl Iterator<Item = &Function> {
        self.abi.functions()
    }

    pub fn events(&self) -> impl Iterator<Item = &Event> {
        self.abi.events()
    }

    /// Resolve `name` to a function taking `arg_count` arguments.
    pub fn function(&self, name: &str, arg_count: usize) -> Result<&Function> {
        let overloads = self.abi.function(name).ok_or_else(|| {
            ZeebuError::Encoding(format!("{} has no operation named {:?}", self.name, name))
        })?;
        overloads
            .iter()
            .find(|f| f.inputs.len() == arg_count)
            .ok_or_else(|| {
                let arities: Vec<usize> = overloads.iter().map(|f| f.inputs.len()).collect();
                ZeebuError::Encoding(format!(
                    "{}.{} expects {:?} arguments, got {}",
                    self.name, name, arities, arg_count
                ))
            })
    }

    pub fn function_by_selector(&self, selector: &[u8]) -> Option<&Function> {
        self.abi.functions().find(|f| f.selector()[..] == *selector)
    }

    pub fn event(&self, name: &str) -> Result<&Event> {
        self.abi
            .event(name)
            .and_then(|overloads| overloads.first())
            .ok_or_else(|| ZeebuError::Decoding(format!("{} has no event named {:?}", self.name, name)))
    }

    /// Encode a call to `name` with `args` into call data.
    pub fn encode(&self, name: &str, args: &[DynSolValue]) -> Result<Vec<u8>> {
        let function = self.function(name, args.len())?;
        function
            .abi_encode_input(args)
            .map_err(|e| ZeebuError::Encoding(format!("{}: {}", function.signature(), e)))
    }

    /// Decode call data for `name` back into its arguments.
    pub fn decode_input(&self, name: &str, calldata: &[u8]) -> Result<Vec<DynSolValue>> {
        let selector = calldata
            .get(..4)
            .ok_or_else(|| ZeebuError::Decoding("calldata shorter than a selector".into()))?;
        let function = self
            .abi
            .function(name)
            .and_then(|overloads| overloads.iter().find(|f| f.selector()[..] == *selector))
            .ok_or_else(|| {
                ZeebuError::Decoding(format!("calldata is not a call to {}.{}", self.name, name))
            })?;
        decode_args(function, &calldata[4..])
    }

    /// Decode any call data addressed to this interface.
    pub fn decode_call(&self, calldata: &[u8]) -> Result<(&Function, Vec<DynSolValue>)> {
        let selector = calldata
            .get(..4)
            .ok_or_else(|| ZeebuError::Decoding("calldata shorter than a selector".into()))?;
        let function = self.function_by_selector(selector).ok_or_else(|| {
            ZeebuError::Decoding(format!(
                "unknown selector {} for {}",
                bytes_to_hex(selector),
                self.name
            ))
        })?;
        Ok((function, decode_args(function, &calldata[4..])?))
    }

    /// Decode the return data of `name`.
    pub fn decode_output(&self, name: &str, data: &[u8]) -> Result<Vec<DynSolValue>> {
        let function = self
            .abi
            .function(name)
            .and_then(|overloads| overloads.first())
            .ok_or_else(|| ZeebuError::Decoding(format!("{} has no operation named {:?}", self.name, name)))?;
        function
            .abi_decode_output(data)
            .map_err(|e| ZeebuError::Decoding(format!("{} output: {}", function.signature(), e)))
    }

    /// Decode a log of the named event into named fields, in declaration order.
    pub fn decode_event(&self, name: &str, topics: &[B256], data: &[u8]) -> Result<Vec<(String, DynSolValue)>> {
        decode_fields(self.event(name)?, topics, data)
    }

    /// Decode a log of any known event, matched by topic0.
    ///
    /// Returns `Ok(None)` when no event of this interface has the log's topic0.
    pub fn decode_log(&self, topics: &[B256], data: &[u8]) -> Result<Option<(&Event, Vec<(String, DynSolValue)>)>> {
        let Some(topic0) = topics.first() else {
            return Ok(None);
        };
        match self.abi.events().find(|e| !e.anonymous && e.selector() == *topic0) {
            Some(event) => Ok(Some((event, decode_fields(event, topics, data)?))),
            None => Ok(None),
        }
    }

    /// Build (topics, data) for a log of the named event.
    pub fn encode_event(&self, name: &str, values: &[DynSolValue]) -> Result<(Vec<B256>, Vec<u8>)> {
        let event = self
            .abi
            .event(name)
            .and_then(|overloads| overloads.first())
            .ok_or_else(|| ZeebuError::Encoding(format!("{} has no event named {:?}", self.name, name)))?;
        if values.len() != event.inputs.len() {
            return Err(ZeebuError::Encoding(format!(
                "{} expects {} fields, got {}",
                event.signature(),
                event.inputs.len(),
                values.len()
            )));
        }

        let mut topics = Vec::new();
        if !event.anonymous {
            topics.push(event.selector());
        }
        let mut body = Vec::new();
        for (param, value) in event.inputs.iter().zip(values) {
            let ty = param
                .resolve()
                .map_err(|e| ZeebuError::Encoding(format!("{}.{}: {}", event.name, param.name, e)))?;
            if !ty.matches(value) {
                return Err(ZeebuError::Encoding(format!(
                    "{}.{} is {}, got {:?}",
                    event.name, param.name, param.ty, value
                )));
            }
            if !param.indexed {
                body.push(value.clone());
                continue;
            }
            // Dynamic indexed values are logged as the hash of their packed form.
            let topic = match value {
                DynSolValue::String(_) | DynSolValue::Bytes(_) => keccak256(value.abi_encode_packed()),
                other => other.as_word().ok_or_else(|| {
                    ZeebuError::Encoding(format!("indexed {} is not supported", param.ty))
                })?,
            };
            topics.push(topic);
        }
        Ok((topics, DynSolValue::Tuple(body).abi_encode_params()))
    }

    /// Render revert data produced by one of this interface's custom errors.
    pub fn describe_error(&self, data: &[u8]) -> Option<String> {
        let selector = data.get(..4)?;
        let error = self.abi.errors().find(|e| e.selector()[..] == *selector)?;
        let values = error.abi_decode_input(&data[4..]).ok()?;
        let args: Vec<String> = values.iter().map(render).collect();
        Some(format!("{}({})", error.name, args.join(", ")))
    }
}

fn decode_args(function: &Function, data: &[u8]) -> Result<Vec<DynSolValue>> {
    function
        .abi_decode_input(data)
        .map_err(|e| ZeebuError::Decoding(format!("{}: {}", function.signature(), e)))
}

fn decode_fields(event: &Event, topics: &[B256], data: &[u8]) -> Result<Vec<(String, DynSolValue)>> {
    let expected = usize::from(!event.anonymous) + event.inputs.iter().filter(|p| p.indexed).count();
    if topics.len() != expected {
        return Err(ZeebuError::Decoding(format!(
            "{} expects {} topics, got {}",
            event.signature(),
            expected,
            topics.len()
        )));
    }
    let decoded = event
        .decode_log_parts(topics.iter().copied(), data)
        .map_err(|e| ZeebuError::Decoding(format!("{}: {}", event.signature(), e)))?;

    let mut indexed = decoded.indexed.into_iter();
    let mut body = decoded.body.into_iter();
    event
        .inputs
        .iter()
        .map(|param| {
            let value = if param.indexed { indexed.next() } else { body.next() };
            value
                .map(|v| (param.name.clone(), v))
                .ok_or_else(|| ZeebuError::Decoding(format!("{} is missing {}", event.name, param.name)))
        })
        .collect()
}

fn render(value: &DynSolValue) -> String {
    let list = |items: &[DynSolValue]| items.iter().map(render).collect::<Vec<_>>().join(", ");
    match value {
        DynSolValue::Address(a) => a.to_string(),
        DynSolValue::Uint(v, _) => v.to_string(),
        DynSolValue::Int(v, _) => v.to_string(),
        DynSolValue::Bool(b) => b.to_string(),
        DynSolValue::String(s) => format!("{:?}", s),
        DynSolValue::Bytes(b) => bytes_to_hex(b),
        DynSolValue::FixedBytes(word, size) => bytes_to_hex(&word[..*size]),
        DynSolValue::Array(items) | DynSolValue::FixedArray(items) => format!("[{}]", list(items)),
        DynSolValue::Tuple(items) => format!("({})", list(items)),
        other => format!("{:?}", other),
    }
}

/// Turn revert data into a human-readable reason.
///
/// Handles `Error(string)` and `Panic(uint256)`; anything else is rendered as hex.
pub fn decode_revert(data: &[u8]) -> String {
    if data.is_empty() {
        return "execution reverted without a reason".to_string();
    }
    if let Ok(revert) = Revert::abi_decode(data) {
        return revert.reason;
    }
    if let Ok(panic) = Panic::abi_decode(data) {
        let kind = panic.kind().map(|k| k.as_str()).unwrap_or("unrecognized panic code");
        return format!("panic 0x{:x} ({})", panic.code, kind);
    }
    format!("execution reverted with data {}", bytes_to_hex(data))
}

/// Encode an `Error(string)` revert payload.
pub fn encode_revert(reason: &str) -> Vec<u8> {
    Revert { reason: reason.to_string() }.abi_encode()
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{Address, U256};

    const TOKEN_ABI: &str = include_str!("../abi/ERC20.json");

    #[test]
    fn test_known_selectors() {
        let token = Interface::from_json("ERC20", TOKEN_ABI).unwrap();
        let approve = token.function("approve", 2).unwrap();
        assert_eq!(approve.signature(), "approve(address,uint256)");
        assert_eq!(hex::encode(approve.selector()), "095ea7b3");

        let transfer = token.event("Transfer").unwrap();
        assert_eq!(
            hex::encode(transfer.selector()),
            "ddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef"
        );
    }

    #[test]
    fn test_encode_approve_call() {
        let token = Interface::from_json("ERC20", TOKEN_ABI).unwrap();
        let spender = Address::repeat_byte(0x22);
        let data = token
            .encode("approve", &[spender.into(), U256::from(11_000_000u64).into()])
            .unwrap();
        assert_eq!(data.len(), 4 + 64);
        assert_eq!(&data[..4], &[0x09, 0x5e, 0xa7, 0xb3]);

        let args = token.decode_input("approve", &data).unwrap();
        assert_eq!(args[0].as_address(), Some(spender));
        assert_eq!(args[1].as_uint(), Some((U256::from(11_000_000u64), 256)));
    }

    #[test]
    fn test_unknown_operation_and_bad_arity() {
        let token = Interface::from_json("ERC20", TOKEN_ABI).unwrap();
        assert_eq!(token.encode("mint", &[]).unwrap_err().kind(), "encoding");
        let err = token.encode("approve", &[Address::ZERO.into()]).unwrap_err();
        assert_eq!(err.kind(), "encoding");
        let err = token
            .encode("approve", &[U256::ZERO.into(), U256::ZERO.into()])
            .unwrap_err();
        assert!(err.to_string().contains("approve(address,uint256)"));
    }

    #[test]
    fn test_event_round_trip_with_indexed_fields() {
        let token = Interface::from_json("ERC20", TOKEN_ABI).unwrap();
        let owner = Address::repeat_byte(0x0a);
        let spender = Address::repeat_byte(0x0b);
        let (topics, data) = token
            .encode_event("Approval", &[owner.into(), spender.into(), U256::from(5u8).into()])
            .unwrap();
        assert_eq!(topics.len(), 3);

        let fields = token.decode_event("Approval", &topics, &data).unwrap();
        assert_eq!(fields[0], ("owner".to_string(), DynSolValue::Address(owner)));
        assert_eq!(fields[1], ("spender".to_string(), DynSolValue::Address(spender)));
        assert_eq!(fields[2].1.as_uint(), Some((U256::from(5u8), 256)));

        let (event, _) = token.decode_log(&topics, &data).unwrap().unwrap();
        assert_eq!(event.name, "Approval");
    }

    #[test]
    fn test_encode_event_checks_field_types() {
        let token = Interface::from_json("ERC20", TOKEN_ABI).unwrap();
        let err = token
            .encode_event("Approval", &[U256::ZERO.into(), Address::ZERO.into(), U256::ZERO.into()])
            .unwrap_err();
        assert_eq!(err.kind(), "encoding");
        assert!(token.encode_event("Burn", &[]).is_err());
    }

    #[test]
    fn test_decode_event_rejects_malformed_logs() {
        let token = Interface::from_json("ERC20", TOKEN_ABI).unwrap();
        let (topics, data) = token
            .encode_event(
                "Transfer",
                &[Address::ZERO.into(), Address::ZERO.into(), U256::from(1u8).into()],
            )
            .unwrap();
        // Wrong event name for the topic0.
        assert!(token.decode_event("Approval", &topics, &data).is_err());
        // Missing indexed topic.
        assert!(token.decode_event("Transfer", &topics[..2], &data).is_err());
        // Truncated data.
        let err = token.decode_event("Transfer", &topics, &data[..16]).unwrap_err();
        assert_eq!(err.kind(), "decoding");
    }

    #[test]
    fn test_decode_revert_reasons() {
        assert_eq!(decode_revert(&encode_revert("Invoice already paid")), "Invoice already paid");
        assert_eq!(decode_revert(&[]), "execution reverted without a reason");

        let panic = Panic { code: U256::from(0x11u8) }.abi_encode();
        let text = decode_revert(&panic);
        assert!(text.starts_with("panic 0x11"));
        assert!(text.contains("overflow"));

        assert!(decode_revert(&[0xde, 0xad, 0xbe, 0xef]).contains("0xdeadbeef"));
    }

    #[test]
    fn test_describe_custom_error() {
        let sa = Interface::from_json("SmartAccount", include_str!("../abi/SmartAccount.json")).unwrap();
        let mut data = keccak256("NotAuthorized(address)")[..4].to_vec();
        data.extend_from_slice(&[0u8; 12]);
        data.extend_from_slice(&[0x33u8; 20]);
        let text = sa.describe_error(&data).unwrap();
        assert!(text.starts_with("NotAuthorized(0x3333"));
        assert!(sa.describe_error(&encode_revert("nope")).is_none());
    }

    #[test]
    fn test_ignores_constructor_and_receive_entries() {
        let text = r#"[
            {"type": "constructor", "inputs": [{"name": "a", "type": "address"}], "stateMutability": "nonpayable"},
            {"type": "receive", "stateMutability": "payable"},
            {"type": "function", "name": "ping", "inputs": [], "outputs": [], "stateMutability": "view"}
        ]"#;
        let iface = Interface::from_json("Test", text).unwrap();
        assert_eq!(iface.functions().count(), 1);
        assert_eq!(Interface::from_json("Bad", "not json").unwrap_err().kind(), "config");
    }
}
