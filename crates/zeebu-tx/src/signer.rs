//! Local secp256k1 signing key.

use std::fmt;

use alloy_consensus::{SignableTransaction, Signed};
use alloy_primitives::{Address, Signature, B256};
use alloy_signer::SignerSync;
use alloy_signer_local::PrivateKeySigner;
use zeebu_types::{hex_to_bytes, Result, ZeebuError};

/// A private key held in process memory.
///
/// `Debug` output shows only the derived address.
#[derive(Clone)]
pub struct LocalSigner {
    inner: PrivateKeySigner,
}

impl LocalSigner {
    /// Parse a 32-byte private key given as hex, with or without `0x`.
    pub fn from_hex(text: &str) -> Result<Self> {
        let bytes = hex_to_bytes(text.trim())
            .map_err(|_| ZeebuError::Signing("private key is not valid hex".into()))?;
        Self::from_slice(&bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != 32 {
            return Err(ZeebuError::Signing(format!(
                "private key must be 32 bytes, got {}",
                bytes.len()
            )));
        }
        let inner = PrivateKeySigner::from_slice(bytes)
            .map_err(|_| ZeebuError::Signing("private key is out of range".into()))?;
        Ok(Self { inner })
    }

    pub fn address(&self) -> Address {
        self.inner.address()
    }

    /// Sign a 32-byte digest, returning a signature with recovery parity.
    pub fn sign_hash(&self, hash: &B256) -> Result<Signature> {
        self.inner
            .sign_hash_sync(hash)
            .map_err(|e| ZeebuError::Signing(e.to_string()))
    }

    /// Sign `tx` over its signing hash.
    pub fn sign_transaction<T>(&self, tx: T) -> Result<Signed<T>>
    where
        T: SignableTransaction<Signature>,
    {
        let sig = self.sign_hash(&tx.signature_hash())?;
        Ok(tx.into_signed(sig))
    }
}

impl fmt::Debug for LocalSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalSigner")
            .field("address", &self.address())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_consensus::{TxEip1559, TxEnvelope};
    use alloy_eips::eip2718::Encodable2718;
    use alloy_primitives::TxKind;
    use zeebu_rpc::SignedTransaction;

    const KEY_ONE: &str = "0x0000000000000000000000000000000000000000000000000000000000000001";

    #[test]
    fn test_address_from_key() {
        let signer = LocalSigner::from_hex(KEY_ONE).unwrap();
        assert_eq!(
            signer.address(),
            "0x7E5F4552091A69125d5DfCb7b8C2659029395Bdf".parse::<Address>().unwrap()
        );
    }

    #[test]
    fn test_debug_hides_key() {
        let signer = LocalSigner::from_hex(&"ab".repeat(32)).unwrap();
        let shown = format!("{:?}", signer);
        assert!(shown.contains("LocalSigner"));
        assert!(!shown.contains(&"ab".repeat(32)));
    }

    #[test]
    fn test_rejects_bad_keys() {
        assert_eq!(LocalSigner::from_hex("0x1234").unwrap_err().kind(), "signing");
        assert_eq!(LocalSigner::from_hex("zz").unwrap_err().kind(), "signing");
        assert!(LocalSigner::from_slice(&[0u8; 32]).is_err());
    }

    #[test]
    fn test_signed_transaction_recovers_to_signer() {
        let signer = LocalSigner::from_hex(KEY_ONE).unwrap();
        let tx = TxEip1559 {
            chain_id: 11_155_420,
            max_priority_fee_per_gas: 1,
            max_fee_per_gas: 2,
            gas_limit: 21_000,
            to: TxKind::Call(Address::repeat_byte(7)),
            ..Default::default()
        };
        let raw = TxEnvelope::from(signer.sign_transaction(tx).unwrap()).encoded_2718();
        let decoded = SignedTransaction::decode(&raw).unwrap();
        assert_eq!(decoded.sender, signer.address());
    }
}
