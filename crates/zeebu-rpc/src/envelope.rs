//! Signed transaction envelopes in their raw broadcast form.
//!
//! EIP-1559 typed transactions and EIP-155 legacy transactions are accepted;
//! other typed envelopes are rejected.

use alloy_consensus::{SignableTransaction, TxEnvelope};
use alloy_eips::eip2718::Decodable2718;
use alloy_primitives::{keccak256, Address, Signature, B256};
use zeebu_types::{Result, ZeebuError};

/// A transaction decoded from its raw broadcast form, with its recovered sender.
#[derive(Debug, Clone, PartialEq)]
pub struct SignedTransaction {
    pub envelope: TxEnvelope,
    pub sender: Address,
    pub hash: B256,
}

impl SignedTransaction {
    pub fn decode(raw: &[u8]) -> Result<Self> {
        if raw.is_empty() {
            return Err(ZeebuError::Decoding("empty transaction".into()));
        }
        let envelope = TxEnvelope::decode_2718(&mut &raw[..])
            .map_err(|e| ZeebuError::Decoding(format!("invalid transaction envelope: {}", e)))?;
        let sender = recover_sender(&envelope)?;
        Ok(Self { envelope, sender, hash: keccak256(raw) })
    }
}

/// Recover the address that signed `envelope`.
pub fn recover_sender(envelope: &TxEnvelope) -> Result<Address> {
    let (signature, prehash): (&Signature, B256) = match envelope {
        TxEnvelope::Eip1559(signed) => (signed.signature(), signed.tx().signature_hash()),
        TxEnvelope::Legacy(signed) => (signed.signature(), signed.tx().signature_hash()),
        other => {
            return Err(ZeebuError::Decoding(format!(
                "unsupported transaction type {:?}",
                other.tx_type()
            )))
        }
    };
    signature
        .recover_address_from_prehash(&prehash)
        .map_err(|e| ZeebuError::Decoding(format!("cannot recover sender: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_consensus::{Signed, TxEip1559, TxLegacy};
    use alloy_eips::eip2718::Encodable2718;
    use alloy_primitives::{Bytes, TxKind, U256};
    use alloy_signer::SignerSync;
    use alloy_signer_local::PrivateKeySigner;

    fn test_key() -> PrivateKeySigner {
        PrivateKeySigner::from_slice(&[0x42u8; 32]).unwrap()
    }

    fn sign<T>(tx: T, key: &PrivateKeySigner) -> TxEnvelope
    where
        T: SignableTransaction<Signature>,
        TxEnvelope: From<Signed<T>>,
    {
        let sig = key.sign_hash_sync(&tx.signature_hash()).unwrap();
        tx.into_signed(sig).into()
    }

    fn sample_1559() -> TxEip1559 {
        TxEip1559 {
            chain_id: 11_155_420,
            nonce: 3,
            max_priority_fee_per_gas: 1_000_000,
            max_fee_per_gas: 3_000_000,
            gas_limit: 120_000,
            to: TxKind::Call(Address::repeat_byte(0x11)),
            value: U256::ZERO,
            input: Bytes::from(vec![0x09, 0x5e, 0xa7, 0xb3]),
            ..Default::default()
        }
    }

    fn eip155_example(nonce: u64) -> TxLegacy {
        TxLegacy {
            chain_id: Some(1),
            nonce,
            gas_price: 20_000_000_000,
            gas_limit: 21_000,
            to: TxKind::Call(Address::repeat_byte(0x35)),
            value: U256::from(10u64).pow(U256::from(18u64)),
            input: Bytes::new(),
        }
    }

    #[test]
    fn test_eip1559_decode_and_recover() {
        let key = test_key();
        let raw = sign(sample_1559(), &key).encoded_2718();
        assert_eq!(raw[0], 0x02);

        let decoded = SignedTransaction::decode(&raw).unwrap();
        assert_eq!(decoded.sender, key.address());
        assert_eq!(decoded.hash, keccak256(&raw));
        match decoded.envelope {
            TxEnvelope::Eip1559(signed) => assert_eq!(*signed.tx(), sample_1559()),
            other => panic!("unexpected envelope {:?}", other),
        }
    }

    #[test]
    fn test_legacy_eip155_round_trip() {
        let key = test_key();
        let raw = sign(eip155_example(0), &key).encoded_2718();
        let decoded = SignedTransaction::decode(&raw).unwrap();
        match &decoded.envelope {
            TxEnvelope::Legacy(signed) => assert_eq!(signed.tx().chain_id, Some(1)),
            other => panic!("unexpected envelope {:?}", other),
        }
        assert_eq!(decoded.sender, key.address());
    }

    #[test]
    fn test_eip155_signing_hash_vector() {
        // Example transaction from the EIP-155 text.
        assert_eq!(
            hex::encode(eip155_example(9).signature_hash()),
            "daf5a779ae972f972197303d7b574746c7ef83eadac0f2791ad23db92e4c8e53"
        );
    }

    #[test]
    fn test_known_address_for_private_key_one() {
        let mut bytes = [0u8; 32];
        bytes[31] = 1;
        let key = PrivateKeySigner::from_slice(&bytes).unwrap();
        assert_eq!(
            key.address(),
            "0x7E5F4552091A69125d5DfCb7b8C2659029395Bdf".parse::<Address>().unwrap()
        );
    }

    #[test]
    fn test_rejects_malformed_envelopes() {
        let err = SignedTransaction::decode(&[0x01, 0xc0]).unwrap_err();
        assert_eq!(err.kind(), "decoding");
        assert!(SignedTransaction::decode(&[]).is_err());

        let mut raw = sign(sample_1559(), &test_key()).encoded_2718();
        raw.truncate(raw.len() - 1);
        assert!(SignedTransaction::decode(&raw).is_err());
    }
}
