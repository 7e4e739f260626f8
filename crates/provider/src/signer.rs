//! Turns an [`OperationPlan`] into a signed raw transaction.

use std::collections::HashMap;

use alloy_consensus::{SignableTransaction, TxEnvelope, TxLegacy};
use alloy_eips::eip2718::Encodable2718;
use alloy_primitives::{Address, Bytes, TxKind};
use alloy_signer::SignerSync;
use alloy_signer_local::PrivateKeySigner;
use tally_core::{OperationPlan, TallyError, TallyResult};

/// Signing seam. Key management stays outside the runner.
pub trait OperationSigner: Send + Sync {
    fn sign(&self, plan: &OperationPlan) -> TallyResult<Bytes>;
}

/// Legacy-transaction signer over a set of local private keys.
#[derive(Debug, Clone)]
pub struct LocalSigner {
    chain_id: u64,
    keys: HashMap<Address, PrivateKeySigner>,
}

impl LocalSigner {
    pub fn new(chain_id: u64) -> Self {
        Self {
            chain_id,
            keys: HashMap::new(),
        }
    }

    pub fn with_key(mut self, key: PrivateKeySigner) -> Self {
        self.keys.insert(key.address(), key);
        self
    }

    /// Parses a hex private key (with or without `0x`) and registers it.
    /// Returns the signer together with the key's address.
    pub fn with_hex_key(self, hex_key: &str) -> TallyResult<(Self, Address)> {
        let key: PrivateKeySigner = hex_key
            .trim()
            .parse()
            .map_err(|e| TallyError::InvalidInput(format!("Invalid private key: {e}")))?;
        let address = key.address();
        Ok((self.with_key(key), address))
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    pub fn addresses(&self) -> impl Iterator<Item = &Address> {
        self.keys.keys()
    }
}

impl OperationSigner for LocalSigner {
    fn sign(&self, plan: &OperationPlan) -> TallyResult<Bytes> {
        let key = self.keys.get(&plan.from).ok_or_else(|| {
            TallyError::Submission(format!("No signing key for {}", plan.from))
        })?;

        let tx = TxLegacy {
            chain_id: Some(self.chain_id),
            nonce: plan.sequence_number,
            gas_price: plan.gas_price,
            gas_limit: plan.gas_limit,
            to: TxKind::Call(plan.to),
            value: plan.value,
            input: plan.payload.clone(),
        };

        let signature = key
            .sign_hash_sync(&tx.signature_hash())
            .map_err(|e| TallyError::Submission(format!("Failed to sign operation {}: {e}", plan.index)))?;
        let envelope = TxEnvelope::from(tx.into_signed(signature));

        Ok(envelope.encoded_2718().into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::U256;
    use tally_core::PlannedEffect;

    // Anvil's first dev key.
    const DEV_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    fn plan(from: Address) -> OperationPlan {
        OperationPlan {
            index: 1,
            from,
            to: Address::repeat_byte(0x22),
            sequence_number: 4,
            value: U256::from(10u64),
            gas_price: 100,
            gas_limit: 21_000,
            payload: Bytes::new(),
            effect: PlannedEffect::Transfer,
        }
    }

    #[test]
    fn signs_for_known_sender() {
        let (signer, address) = LocalSigner::new(11_155_931).with_hex_key(DEV_KEY).unwrap();
        let raw = signer.sign(&plan(address)).unwrap();
        assert!(!raw.is_empty());
        // Legacy envelopes are plain RLP lists.
        assert!(raw[0] >= 0xc0);
        assert_eq!(signer.addresses().count(), 1);
    }

    #[test]
    fn unknown_sender_is_a_submission_error() {
        let signer = LocalSigner::new(1);
        let err = signer.sign(&plan(Address::repeat_byte(0x11))).unwrap_err();
        assert!(matches!(err, TallyError::Submission(_)));
    }

    #[test]
    fn bad_key_is_rejected() {
        assert!(LocalSigner::new(1).with_hex_key("0x1234").is_err());
    }
}
