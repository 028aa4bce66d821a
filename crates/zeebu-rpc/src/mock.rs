//! Deterministic in-memory ledger.
//!
//! Simulates the four deployed contracts at the addresses of a [`Deployment`]:
//! - invoice factory: create, view and pay invoices
//! - token: ERC-20 balances and allowances
//! - smart account: `execute` on behalf of its owner or the gas station
//! - gas station: `sponsorTransaction`
//!
//! Signed transactions are decoded, their sender recovered and nonces enforced.
//! Every simulation and broadcast is recorded with its nested call path so
//! tests can assert on ordering.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use alloy_consensus::Transaction;
use alloy_dyn_abi::{DynSolValue, FunctionExt};
use alloy_primitives::{Address, Bytes, B256, U256};
use async_trait::async_trait;
use tracing::debug;
use zeebu_abi::{draft_from_tuple, invoice_to_values, Function, Interface, Interfaces};
use zeebu_types::invoice::BPS_DENOMINATOR;
use zeebu_types::{checksum, Deployment, Invoice, Result, ZeebuError};

use crate::envelope::SignedTransaction;
use crate::{CallRequest, FeeParams, LedgerRpc, Log, TransactionReceipt};

pub const MOCK_BASE_FEE: u128 = 1_000_000;
pub const MOCK_PRIORITY_FEE: u128 = 1_000;

const GENESIS_TIMESTAMP: u64 = 1_700_000_000;
const BLOCK_TIME: u64 = 2;
const BASE_GAS: u64 = 21_000;
const CALLDATA_BYTE_GAS: u64 = 16;
const FRAME_GAS: u64 = 25_000;

/// How a recorded call reached the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    Call,
    Estimate,
    Broadcast,
}

/// One simulation or broadcast seen by the mock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRecord {
    pub kind: CallKind,
    pub from: Option<Address>,
    pub to: Address,
    /// Function names from the outermost call inward.
    pub path: Vec<String>,
    /// Revert reason, if execution failed.
    pub reverted: Option<String>,
}

impl CallRecord {
    pub fn touches(&self, function: &str) -> bool {
        self.path.iter().any(|f| f == function)
    }

    pub fn is_broadcast(&self) -> bool {
        self.kind == CallKind::Broadcast
    }
}

#[derive(Debug, Clone, Default)]
struct World {
    block_number: u64,
    nonces: HashMap<Address, u64>,
    invoices: BTreeMap<U256, Invoice>,
    invoice_count: U256,
    balances: HashMap<Address, U256>,
    allowances: HashMap<(Address, Address), U256>,
    account_owner: Address,
}

impl World {
    fn timestamp(&self) -> U256 {
        U256::from(GENESIS_TIMESTAMP + self.block_number * BLOCK_TIME)
    }
}

#[derive(Debug, Default)]
struct Inner {
    world: World,
    allowance_cap: Option<U256>,
    hold_receipts: bool,
    reject_broadcasts: Option<String>,
    receipts: HashMap<B256, TransactionReceipt>,
    held: Vec<TransactionReceipt>,
    log: Vec<CallRecord>,
}

/// In-memory [`LedgerRpc`] backed by simulated contracts.
pub struct MockLedger {
    deployment: Deployment,
    interfaces: Interfaces,
    inner: Mutex<Inner>,
}

impl MockLedger {
    /// Mock with the bundled interfaces. The smart account is owned by `owner`.
    pub fn new(deployment: Deployment, owner: Address) -> Result<Self> {
        Ok(Self::with_interfaces(deployment, Interfaces::bundled()?, owner))
    }

    pub fn with_interfaces(deployment: Deployment, interfaces: Interfaces, owner: Address) -> Self {
        let mut inner = Inner::default();
        inner.world.account_owner = owner;
        Self {
            deployment,
            interfaces,
            inner: Mutex::new(inner),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn deployment(&self) -> &Deployment {
        &self.deployment
    }

    /// Credit `amount` tokens to `holder`.
    pub fn mint(&self, holder: Address, amount: U256) {
        let mut inner = self.lock();
        let balance = inner.world.balances.entry(holder).or_default();
        *balance = balance.saturating_add(amount);
    }

    pub fn balance_of(&self, holder: Address) -> U256 {
        self.lock().world.balances.get(&holder).copied().unwrap_or_default()
    }

    pub fn allowance(&self, owner: Address, spender: Address) -> U256 {
        self.lock()
            .world
            .allowances
            .get(&(owner, spender))
            .copied()
            .unwrap_or_default()
    }

    pub fn invoice(&self, id: U256) -> Option<Invoice> {
        self.lock().world.invoices.get(&id).cloned()
    }

    /// Clamp every future approval to at most `cap`.
    pub fn cap_allowance(&self, cap: Option<U256>) {
        self.lock().allowance_cap = cap;
    }

    /// While holding, broadcasts execute but their receipts stay unobservable.
    /// Turning holding off publishes the held receipts.
    pub fn hold_receipts(&self, hold: bool) {
        let mut inner = self.lock();
        inner.hold_receipts = hold;
        if !hold {
            let held = std::mem::take(&mut inner.held);
            for receipt in held {
                inner.receipts.insert(receipt.tx_hash, receipt);
            }
        }
    }

    /// Refuse every broadcast with `reason` until cleared with `None`.
    pub fn reject_broadcasts(&self, reason: Option<&str>) {
        self.lock().reject_broadcasts = reason.map(str::to_string);
    }

    pub fn call_log(&self) -> Vec<CallRecord> {
        self.lock().log.clone()
    }

    pub fn broadcasts(&self) -> Vec<CallRecord> {
        self.lock().log.iter().filter(|r| r.is_broadcast()).cloned().collect()
    }

    pub fn clear_call_log(&self) {
        self.lock().log.clear();
    }

    fn simulate(&self, kind: CallKind, request: &CallRequest) -> Result<(Vec<u8>, u64)> {
        let mut inner = self.lock();
        let mut world = inner.world.clone();
        let origin = request.from.unwrap_or_default();
        let mut exec = Exec::new(&self.deployment, &self.interfaces, &mut world, inner.allowance_cap, origin);
        let outcome = exec.call(origin, request.to, request.value, &request.data);
        let gas = exec.gas_used(request.data.len());
        let path = std::mem::take(&mut exec.path);
        inner.log.push(CallRecord {
            kind,
            from: request.from,
            to: request.to,
            path,
            reverted: outcome.as_ref().err().cloned(),
        });
        match outcome {
            Ok(output) => Ok((output, gas)),
            Err(reason) => {
                debug!(to = %checksum(&request.to), reason = %reason, "mock simulation reverted");
                Err(ZeebuError::Estimation { reason })
            }
        }
    }
}

type Revert = String;

/// One top-level execution against a scratch copy of the world.
struct Exec<'a> {
    deployment: &'a Deployment,
    interfaces: &'a Interfaces,
    world: &'a mut World,
    allowance_cap: Option<U256>,
    origin: Address,
    logs: Vec<Log>,
    path: Vec<String>,
    frames: u64,
}

impl<'a> Exec<'a> {
    fn new(
        deployment: &'a Deployment,
        interfaces: &'a Interfaces,
        world: &'a mut World,
        allowance_cap: Option<U256>,
        origin: Address,
    ) -> Self {
        Self {
            deployment,
            interfaces,
            world,
            allowance_cap,
            origin,
            logs: Vec::new(),
            path: Vec::new(),
            frames: 0,
        }
    }

    fn gas_used(&self, calldata_len: usize) -> u64 {
        BASE_GAS + CALLDATA_BYTE_GAS * calldata_len as u64 + FRAME_GAS * self.frames
    }

    fn call(&mut self, sender: Address, to: Address, _value: U256, data: &[u8]) -> std::result::Result<Vec<u8>, Revert> {
        self.frames += 1;
        if to == self.deployment.invoice_factory {
            self.factory(sender, data)
        } else if to == self.deployment.token {
            self.token(sender, data)
        } else if to == self.deployment.smart_account {
            self.smart_account(sender, data)
        } else if to == self.deployment.gas_station {
            self.gas_station(data)
        } else if data.is_empty() {
            Ok(Vec::new())
        } else {
            Err(format!("no contract at {}", checksum(&to)))
        }
    }

    fn decode(&mut self, iface: &'a Interface, data: &[u8]) -> std::result::Result<(&'a Function, Vec<DynSolValue>), Revert> {
        let (function, args) = iface.decode_call(data).map_err(|e| e.to_string())?;
        self.path.push(function.name.clone());
        Ok((function, args))
    }

    fn emit(&mut self, address: Address, iface: &Interface, event: &str, values: &[DynSolValue]) -> std::result::Result<(), Revert> {
        let (topics, data) = iface.encode_event(event, values).map_err(|e| e.to_string())?;
        self.logs.push(Log { address, topics, data: Bytes::from(data) });
        Ok(())
    }

    fn factory(&mut self, sender: Address, data: &[u8]) -> std::result::Result<Vec<u8>, Revert> {
        let ifaces = self.interfaces;
        let iface = &ifaces.invoice_factory;
        let address = self.deployment.invoice_factory;
        let (function, args) = self.decode(iface, data)?;
        match function.name.as_str() {
            "createInvoice" => {
                let draft = args
                    .into_iter()
                    .next()
                    .ok_or_else(|| "missing invoice argument".to_string())
                    .and_then(|v| draft_from_tuple(v).map_err(|e| e.to_string()))?;
                let id = self.world.invoice_count + U256::from(1u8);
                let subtotal = draft.product_cost_per_unit * draft.quantity;
                let bps = U256::from(BPS_DENOMINATOR);
                let tax = subtotal * U256::from(draft.tax_rate_in_bps) / bps;
                let discount = subtotal * U256::from(draft.discount_in_bps) / bps;
                let invoice = Invoice {
                    id,
                    date_of_txn: U256::ZERO,
                    date_of_invoice_generation: self.world.timestamp(),
                    merchant: draft.merchant,
                    customer: draft.customer,
                    name_of_merchant: draft.name_of_merchant,
                    product_cost_per_unit: draft.product_cost_per_unit,
                    quantity: draft.quantity,
                    tax_rate_in_bps: U256::from(draft.tax_rate_in_bps),
                    total_amount_including_tax: (subtotal + tax).saturating_sub(discount),
                    discount_in_bps: U256::from(draft.discount_in_bps),
                    gstin_of_merchant: draft.gstin_of_merchant,
                    paying_mode: String::new(),
                };
                let output = DynSolValue::Tuple(invoice_to_values(&invoice));
                self.world.invoice_count = id;
                self.world.invoices.insert(id, invoice);
                self.emit(address, iface, "InvoiceCreated", &[id.into()])?;
                encode_output(function, &[output])
            }
            "invoices" => {
                let id = uint_arg(&args, 0)?;
                let invoice = self.world.invoices.get(&id).cloned().unwrap_or_else(empty_invoice);
                encode_output(function, &invoice_to_values(&invoice))
            }
            "payInvoiceById" => {
                let id = uint_arg(&args, 0)?;
                let invoice = self
                    .world
                    .invoices
                    .get(&id)
                    .cloned()
                    .ok_or_else(|| "Invoice does not exist".to_string())?;
                if invoice.is_paid() {
                    return Err("Invoice already paid".into());
                }
                let amount = invoice.total_amount_including_tax;
                self.transfer_from(address, sender, invoice.merchant, amount)?;
                let timestamp = self.world.timestamp();
                if let Some(stored) = self.world.invoices.get_mut(&id) {
                    stored.date_of_txn = timestamp;
                    stored.paying_mode = "USDT".into();
                }
                self.emit(
                    address,
                    iface,
                    "InvoicePaid",
                    &[invoice.customer.into(), invoice.merchant.into(), amount.into()],
                )?;
                Ok(Vec::new())
            }
            "payInvoice" => {
                let customer = address_arg(&args, 0)?;
                let merchant = address_arg(&args, 1)?;
                let amount = uint_arg(&args, 2)?;
                self.transfer_from(address, customer, merchant, amount)?;
                self.emit(address, iface, "InvoicePaid", &[customer.into(), merchant.into(), amount.into()])?;
                Ok(Vec::new())
            }
            "gasSponsor" => encode_output(function, &[self.deployment.gas_station.into()]),
            "s_usdt" => encode_output(function, &[self.deployment.token.into()]),
            other => Err(format!("InvoiceFactory.{} is not simulated", other)),
        }
    }

    fn token(&mut self, sender: Address, data: &[u8]) -> std::result::Result<Vec<u8>, Revert> {
        let ifaces = self.interfaces;
        let iface = &ifaces.token;
        let (function, args) = self.decode(iface, data)?;
        match function.name.as_str() {
            "approve" => {
                let spender = address_arg(&args, 0)?;
                let requested = uint_arg(&args, 1)?;
                let granted = match self.allowance_cap {
                    Some(cap) => requested.min(cap),
                    None => requested,
                };
                self.world.allowances.insert((sender, spender), granted);
                self.emit(self.deployment.token, iface, "Approval", &[sender.into(), spender.into(), granted.into()])?;
                encode_output(function, &[true.into()])
            }
            "allowance" => {
                let owner = address_arg(&args, 0)?;
                let spender = address_arg(&args, 1)?;
                let value = self.world.allowances.get(&(owner, spender)).copied().unwrap_or_default();
                encode_output(function, &[value.into()])
            }
            "balanceOf" => {
                let holder = address_arg(&args, 0)?;
                let value = self.world.balances.get(&holder).copied().unwrap_or_default();
                encode_output(function, &[value.into()])
            }
            "totalSupply" => {
                let supply = self.world.balances.values().fold(U256::ZERO, |acc, b| acc.saturating_add(*b));
                encode_output(function, &[supply.into()])
            }
            "decimals" => encode_output(function, &[DynSolValue::Uint(U256::from(18u8), 8)]),
            "name" => encode_output(function, &[DynSolValue::String("Mock USDT".into())]),
            "symbol" => encode_output(function, &[DynSolValue::String("USDT".into())]),
            "transfer" => {
                let to = address_arg(&args, 0)?;
                let amount = uint_arg(&args, 1)?;
                self.move_balance(sender, to, amount)?;
                encode_output(function, &[true.into()])
            }
            "transferFrom" => {
                let from = address_arg(&args, 0)?;
                let to = address_arg(&args, 1)?;
                let amount = uint_arg(&args, 2)?;
                self.transfer_from(sender, from, to, amount)?;
                encode_output(function, &[true.into()])
            }
            other => Err(format!("ERC20.{} is not simulated", other)),
        }
    }

    fn smart_account(&mut self, sender: Address, data: &[u8]) -> std::result::Result<Vec<u8>, Revert> {
        let ifaces = self.interfaces;
        let iface = &ifaces.smart_account;
        let address = self.deployment.smart_account;
        let (function, args) = self.decode(iface, data)?;
        match function.name.as_str() {
            "execute" => {
                if sender != self.world.account_owner && sender != self.deployment.gas_station {
                    return Err(format!("NotAuthorized({})", checksum(&sender)));
                }
                let target = address_arg(&args, 0)?;
                let value = uint_arg(&args, 1)?;
                let inner = bytes_arg(&args, 2)?;
                let result = self.call(address, target, value, &inner)?;
                self.emit(address, iface, "Executed", &[target.into(), value.into(), DynSolValue::Bytes(inner)])?;
                encode_output(function, &[DynSolValue::Bytes(result)])
            }
            "owner" => encode_output(function, &[self.world.account_owner.into()]),
            other => Err(format!("SmartAccount.{} is not simulated", other)),
        }
    }

    fn gas_station(&mut self, data: &[u8]) -> std::result::Result<Vec<u8>, Revert> {
        let ifaces = self.interfaces;
        let iface = &ifaces.gas_station;
        let address = self.deployment.gas_station;
        let (function, args) = self.decode(iface, data)?;
        match function.name.as_str() {
            "sponsorTransaction" => {
                let target = address_arg(&args, 0)?;
                let inner = bytes_arg(&args, 1)?;
                let gas_limit = uint_arg(&args, 2)?;
                let frames_before = self.frames;
                self.call(address, target, U256::ZERO, &inner)?;
                let gas_used = U256::from(FRAME_GAS * (self.frames - frames_before));
                if gas_used > gas_limit {
                    return Err("GasStation: gas limit exceeded".into());
                }
                self.emit(
                    address,
                    iface,
                    "GasSponsorship",
                    &[self.origin.into(), gas_used.into(), target.into(), DynSolValue::Bytes(inner)],
                )?;
                Ok(Vec::new())
            }
            "owner" => encode_output(function, &[Address::ZERO.into()]),
            other => Err(format!("GasStation.{} is not simulated", other)),
        }
    }

    fn transfer_from(&mut self, spender: Address, from: Address, to: Address, amount: U256) -> std::result::Result<(), Revert> {
        let allowance = self.world.allowances.get(&(from, spender)).copied().unwrap_or_default();
        if allowance < amount {
            return Err("ERC20: insufficient allowance".into());
        }
        self.world.allowances.insert((from, spender), allowance - amount);
        self.move_balance(from, to, amount)
    }

    fn move_balance(&mut self, from: Address, to: Address, amount: U256) -> std::result::Result<(), Revert> {
        let balance = self.world.balances.get(&from).copied().unwrap_or_default();
        if balance < amount {
            return Err("ERC20: transfer amount exceeds balance".into());
        }
        self.world.balances.insert(from, balance - amount);
        let credit = self.world.balances.entry(to).or_default();
        *credit = credit.saturating_add(amount);
        let ifaces = self.interfaces;
        self.emit(self.deployment.token, &ifaces.token, "Transfer", &[from.into(), to.into(), amount.into()])
    }
}

fn empty_invoice() -> Invoice {
    Invoice {
        id: U256::ZERO,
        date_of_txn: U256::ZERO,
        date_of_invoice_generation: U256::ZERO,
        merchant: Address::ZERO,
        customer: Address::ZERO,
        name_of_merchant: String::new(),
        product_cost_per_unit: U256::ZERO,
        quantity: U256::ZERO,
        tax_rate_in_bps: U256::ZERO,
        total_amount_including_tax: U256::ZERO,
        discount_in_bps: U256::ZERO,
        gstin_of_merchant: U256::ZERO,
        paying_mode: String::new(),
    }
}

fn encode_output(function: &Function, values: &[DynSolValue]) -> std::result::Result<Vec<u8>, Revert> {
    function.abi_encode_output(values).map_err(|e| e.to_string())
}

fn uint_arg(args: &[DynSolValue], index: usize) -> std::result::Result<U256, Revert> {
    args.get(index)
        .and_then(DynSolValue::as_uint)
        .map(|(v, _)| v)
        .ok_or_else(|| format!("argument {} is not a uint", index))
}

fn address_arg(args: &[DynSolValue], index: usize) -> std::result::Result<Address, Revert> {
    args.get(index)
        .and_then(DynSolValue::as_address)
        .ok_or_else(|| format!("argument {} is not an address", index))
}

fn bytes_arg(args: &[DynSolValue], index: usize) -> std::result::Result<Vec<u8>, Revert> {
    args.get(index)
        .and_then(DynSolValue::as_bytes)
        .map(<[u8]>::to_vec)
        .ok_or_else(|| format!("argument {} is not bytes", index))
}

#[async_trait]
impl LedgerRpc for MockLedger {
    async fn chain_id(&self) -> Result<u64> {
        Ok(self.deployment.chain_id)
    }

    async fn call(&self, request: &CallRequest) -> Result<Bytes> {
        self.simulate(CallKind::Call, request).map(|(out, _)| Bytes::from(out))
    }

    async fn estimate_gas(&self, request: &CallRequest) -> Result<u64> {
        self.simulate(CallKind::Estimate, request).map(|(_, gas)| gas)
    }

    async fn fee_params(&self) -> Result<FeeParams> {
        Ok(FeeParams::Eip1559 {
            base_fee: MOCK_BASE_FEE,
            max_priority_fee: MOCK_PRIORITY_FEE,
        })
    }

    async fn transaction_count(&self, address: Address) -> Result<u64> {
        Ok(self.lock().world.nonces.get(&address).copied().unwrap_or(0))
    }

    async fn send_raw_transaction(&self, raw: &[u8]) -> Result<B256> {
        let mut inner = self.lock();
        if let Some(reason) = &inner.reject_broadcasts {
            return Err(ZeebuError::Submission(reason.clone()));
        }
        let tx = SignedTransaction::decode(raw)
            .map_err(|e| ZeebuError::Submission(format!("invalid transaction: {}", e)))?;
        if tx.envelope.chain_id() != Some(self.deployment.chain_id) {
            return Err(ZeebuError::Submission(format!(
                "invalid chain id {:?}",
                tx.envelope.chain_id()
            )));
        }
        let sender = tx.sender;
        let expected = inner.world.nonces.get(&sender).copied().unwrap_or(0);
        if tx.envelope.nonce() < expected {
            return Err(ZeebuError::Submission("nonce too low".into()));
        }
        if tx.envelope.nonce() > expected {
            return Err(ZeebuError::Submission("nonce too high".into()));
        }
        if tx.envelope.max_fee_per_gas() < MOCK_BASE_FEE {
            return Err(ZeebuError::Submission(
                "max fee per gas less than block base fee".into(),
            ));
        }

        inner.world.nonces.insert(sender, expected + 1);
        inner.world.block_number += 1;
        let block_number = inner.world.block_number;

        let mut world = inner.world.clone();
        let mut exec = Exec::new(&self.deployment, &self.interfaces, &mut world, inner.allowance_cap, sender);
        let to = tx.envelope.to().unwrap_or_default();
        let mut outcome = exec.call(sender, to, tx.envelope.value(), tx.envelope.input());
        let gas_used = exec.gas_used(tx.envelope.input().len());
        if outcome.is_ok() && gas_used > tx.envelope.gas_limit() {
            outcome = Err("out of gas".into());
        }
        let path = std::mem::take(&mut exec.path);
        let logs = std::mem::take(&mut exec.logs);
        let success = outcome.is_ok();
        if success {
            inner.world = world;
        }

        debug!(
            tx_hash = %tx.hash,
            from = %checksum(&sender),
            nonce = tx.envelope.nonce(),
            success,
            path = ?path,
            "mock transaction mined"
        );
        inner.log.push(CallRecord {
            kind: CallKind::Broadcast,
            from: Some(sender),
            to,
            path,
            reverted: outcome.err(),
        });
        let receipt = TransactionReceipt {
            tx_hash: tx.hash,
            block_number,
            success,
            gas_used: gas_used.min(tx.envelope.gas_limit()),
            logs: if success { logs } else { Vec::new() },
        };
        if inner.hold_receipts {
            inner.held.push(receipt);
        } else {
            inner.receipts.insert(tx.hash, receipt);
        }
        Ok(tx.hash)
    }

    async fn transaction_receipt(&self, tx_hash: B256) -> Result<Option<TransactionReceipt>> {
        Ok(self.lock().receipts.get(&tx_hash).cloned())
    }
}
