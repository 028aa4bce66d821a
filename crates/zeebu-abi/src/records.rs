//! Mapping between invoice records and their ABI tuple form.

use alloy_primitives::{Address, U256};
use zeebu_types::{Invoice, InvoiceDraft, Result, ZeebuError};

use crate::DynSolValue;

/// Number of fields in the factory's invoice struct.
pub const INVOICE_FIELD_COUNT: usize = 13;

/// `createInvoice` argument tuple, in factory field order.
pub fn draft_to_tuple(draft: &InvoiceDraft) -> DynSolValue {
    DynSolValue::Tuple(vec![
        draft.merchant.into(),
        draft.customer.into(),
        DynSolValue::String(draft.name_of_merchant.clone()),
        draft.product_cost_per_unit.into(),
        draft.quantity.into(),
        U256::from(draft.tax_rate_in_bps).into(),
        U256::from(draft.discount_in_bps).into(),
        draft.gstin_of_merchant.into(),
    ])
}

/// Inverse of [`draft_to_tuple`].
pub fn draft_from_tuple(value: DynSolValue) -> Result<InvoiceDraft> {
    let DynSolValue::Tuple(fields) = value else {
        return Err(ZeebuError::Decoding("invoice draft is not a tuple".into()));
    };
    if fields.len() != 8 {
        return Err(ZeebuError::Decoding(format!(
            "invoice draft has {} fields, expected 8",
            fields.len()
        )));
    }
    Ok(InvoiceDraft {
        merchant: address_at(&fields, 0)?,
        customer: address_at(&fields, 1)?,
        name_of_merchant: string_at(&fields, 2)?,
        product_cost_per_unit: uint_at(&fields, 3)?,
        quantity: uint_at(&fields, 4)?,
        tax_rate_in_bps: bps_at(&fields, 5)?,
        discount_in_bps: bps_at(&fields, 6)?,
        gstin_of_merchant: uint_at(&fields, 7)?,
    })
}

/// The 13 stored fields, as returned by `invoices(id)`.
pub fn invoice_to_values(invoice: &Invoice) -> Vec<DynSolValue> {
    vec![
        invoice.id.into(),
        invoice.date_of_txn.into(),
        invoice.date_of_invoice_generation.into(),
        invoice.merchant.into(),
        invoice.customer.into(),
        DynSolValue::String(invoice.name_of_merchant.clone()),
        invoice.product_cost_per_unit.into(),
        invoice.quantity.into(),
        invoice.tax_rate_in_bps.into(),
        invoice.total_amount_including_tax.into(),
        invoice.discount_in_bps.into(),
        invoice.gstin_of_merchant.into(),
        DynSolValue::String(invoice.paying_mode.clone()),
    ]
}

/// Build an [`Invoice`] from the `invoices(id)` return values.
pub fn invoice_from_values(values: &[DynSolValue]) -> Result<Invoice> {
    if values.len() != INVOICE_FIELD_COUNT {
        return Err(ZeebuError::Decoding(format!(
            "invoice has {} fields, expected {}",
            values.len(),
            INVOICE_FIELD_COUNT
        )));
    }
    Ok(Invoice {
        id: uint_at(values, 0)?,
        date_of_txn: uint_at(values, 1)?,
        date_of_invoice_generation: uint_at(values, 2)?,
        merchant: address_at(values, 3)?,
        customer: address_at(values, 4)?,
        name_of_merchant: string_at(values, 5)?,
        product_cost_per_unit: uint_at(values, 6)?,
        quantity: uint_at(values, 7)?,
        tax_rate_in_bps: uint_at(values, 8)?,
        total_amount_including_tax: uint_at(values, 9)?,
        discount_in_bps: uint_at(values, 10)?,
        gstin_of_merchant: uint_at(values, 11)?,
        paying_mode: string_at(values, 12)?,
    })
}

fn mismatch(index: usize, expected: &str, got: &DynSolValue) -> ZeebuError {
    let got = match got {
        DynSolValue::Bool(_) => "bool",
        DynSolValue::Int(..) => "int",
        DynSolValue::Uint(..) => "uint",
        DynSolValue::FixedBytes(..) => "fixed bytes",
        DynSolValue::Address(_) => "address",
        DynSolValue::Bytes(_) => "bytes",
        DynSolValue::String(_) => "string",
        DynSolValue::Array(_) | DynSolValue::FixedArray(_) => "array",
        DynSolValue::Tuple(_) => "tuple",
        _ => "value",
    };
    ZeebuError::Decoding(format!("field {}: expected {}, got {}", index, expected, got))
}

fn uint_at(values: &[DynSolValue], index: usize) -> Result<U256> {
    values[index]
        .as_uint()
        .map(|(v, _)| v)
        .ok_or_else(|| mismatch(index, "uint", &values[index]))
}

fn address_at(values: &[DynSolValue], index: usize) -> Result<Address> {
    values[index].as_address().ok_or_else(|| mismatch(index, "address", &values[index]))
}

fn string_at(values: &[DynSolValue], index: usize) -> Result<String> {
    values[index]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| mismatch(index, "string", &values[index]))
}

fn bps_at(values: &[DynSolValue], index: usize) -> Result<u32> {
    let v = uint_at(values, index)?;
    u32::try_from(v).map_err(|_| ZeebuError::Decoding(format!("field {}: {} does not fit in u32", index, v)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Interfaces;
    use alloy_dyn_abi::FunctionExt;

    fn acme() -> InvoiceDraft {
        InvoiceDraft {
            merchant: Address::repeat_byte(0xaa),
            customer: Address::repeat_byte(0xbb),
            name_of_merchant: "Acme".into(),
            product_cost_per_unit: U256::from(1_000_000u64),
            quantity: U256::from(10u64),
            tax_rate_in_bps: 1000,
            discount_in_bps: 0,
            gstin_of_merchant: U256::from(123_456_789u64),
        }
    }

    #[test]
    fn test_create_invoice_calldata_decodes_to_same_draft() {
        let ifaces = Interfaces::bundled().unwrap();
        let data = ifaces
            .invoice_factory
            .encode("createInvoice", &[draft_to_tuple(&acme())])
            .unwrap();
        assert_eq!(data[..4], ifaces.invoice_factory.function("createInvoice", 1).unwrap().selector()[..]);
        let args = ifaces.invoice_factory.decode_input("createInvoice", &data).unwrap();
        let draft = draft_from_tuple(args.into_iter().next().unwrap()).unwrap();
        assert_eq!(draft, acme());
    }

    #[test]
    fn test_invoice_values_through_invoices_output() {
        let ifaces = Interfaces::bundled().unwrap();
        let invoice = Invoice {
            id: U256::from(3u8),
            date_of_txn: U256::ZERO,
            date_of_invoice_generation: U256::from(1_700_000_000u64),
            merchant: Address::repeat_byte(0xaa),
            customer: Address::repeat_byte(0xbb),
            name_of_merchant: "Acme".into(),
            product_cost_per_unit: U256::from(1_000_000u64),
            quantity: U256::from(10u64),
            tax_rate_in_bps: U256::from(1000u64),
            total_amount_including_tax: U256::from(11_000_000u64),
            discount_in_bps: U256::ZERO,
            gstin_of_merchant: U256::from(123_456_789u64),
            paying_mode: String::new(),
        };
        let function = ifaces.invoice_factory.function("invoices", 1).unwrap();
        let out = function.abi_encode_output(&invoice_to_values(&invoice)).unwrap();
        let values = ifaces.invoice_factory.decode_output("invoices", &out).unwrap();
        assert_eq!(invoice_from_values(&values).unwrap(), invoice);
    }

    #[test]
    fn test_short_invoice_is_decoding_error() {
        let err = invoice_from_values(&[U256::from(1u8).into()]).unwrap_err();
        assert_eq!(err.kind(), "decoding");
    }

    #[test]
    fn test_edge_drafts_survive_calldata() {
        let cases = [
            ("empty name", String::new(), U256::from(1u8), U256::ZERO, 0, 0),
            ("one word name", "A".repeat(32), U256::from(7u8), U256::from(1u8), 10_000, 10_000),
            ("word plus one", "B".repeat(33), U256::MAX, U256::MAX, 0, 10_000),
            ("multibyte name", "é".repeat(40), U256::from(999u64), U256::MAX, 10_000, 0),
        ];
        let ifaces = Interfaces::bundled().unwrap();
        for (label, name, cost, gstin, tax, discount) in cases {
            let draft = InvoiceDraft {
                name_of_merchant: name,
                product_cost_per_unit: cost,
                gstin_of_merchant: gstin,
                tax_rate_in_bps: tax,
                discount_in_bps: discount,
                ..acme()
            };
            let data = ifaces
                .invoice_factory
                .encode("createInvoice", &[draft_to_tuple(&draft)])
                .unwrap();
            assert_eq!((data.len() - 4) % 32, 0, "{}", label);
            let args = ifaces.invoice_factory.decode_input("createInvoice", &data).unwrap();
            let back = draft_from_tuple(args.into_iter().next().unwrap()).unwrap();
            assert_eq!(back, draft, "{}", label);
        }
    }

    #[test]
    fn test_oversized_bps_rejected() {
        let DynSolValue::Tuple(mut tuple) = draft_to_tuple(&acme()) else {
            panic!("draft is not a tuple");
        };
        tuple[5] = DynSolValue::Uint(U256::MAX, 256);
        assert!(draft_from_tuple(DynSolValue::Tuple(tuple)).is_err());
    }

    #[test]
    fn test_wrong_field_type_names_the_field() {
        let mut values = invoice_to_values(&Invoice {
            id: U256::from(1u8),
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
        });
        values[3] = DynSolValue::Bool(true);
        let err = invoice_from_values(&values).unwrap_err();
        assert!(err.to_string().contains("field 3: expected address, got bool"));
    }
}
