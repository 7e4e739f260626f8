//! Nonce persistence contract and starting-sequence reconciliation.
//!
//! The chain's pending count can lag submissions from a previous run
//! (node restart, different endpoint) while the local cache can lag
//! traffic sent from elsewhere. Starting from the larger of the two never
//! collides with a used nonce.

use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::error::{TallyError, TallyResult};

/// Canonical cache key for an address: trimmed and lower-cased.
pub fn normalize_address(address: &str) -> String {
    address.trim().to_ascii_lowercase()
}

/// `max(chain_observed, stored)`.
#[inline]
pub fn reconcile(chain_observed: u64, stored: u64) -> u64 {
    chain_observed.max(stored)
}

/// One persisted entry of the nonce cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NonceRecord {
    pub address: String,
    pub sequence: u64,
}

/// Keyed store of last-used sequence numbers.
///
/// Implementations normalize keys with [`normalize_address`] themselves, so
/// `"0xABC"` and `"0xabc"` always hit the same record. `load` never fails:
/// unreadable state is logged and reported as absent.
pub trait NonceStore: Send + Sync {
    fn load(&self, address: &str) -> Option<u64>;
    fn save(&self, address: &str, sequence: u64) -> TallyResult<()>;
}

impl<T: NonceStore + ?Sized> NonceStore for std::sync::Arc<T> {
    fn load(&self, address: &str) -> Option<u64> {
        (**self).load(address)
    }

    fn save(&self, address: &str, sequence: u64) -> TallyResult<()> {
        (**self).save(address, sequence)
    }
}

/// In-process store, used by tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryNonceStore {
    records: Mutex<BTreeMap<String, u64>>,
}

impl MemoryNonceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<NonceRecord> {
        self.records
            .lock()
            .map(|m| {
                m.iter()
                    .map(|(address, &sequence)| NonceRecord {
                        address: address.clone(),
                        sequence,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl NonceStore for MemoryNonceStore {
    fn load(&self, address: &str) -> Option<u64> {
        let records = self.records.lock().ok()?;
        records.get(&normalize_address(address)).copied()
    }

    fn save(&self, address: &str, sequence: u64) -> TallyResult<()> {
        let mut records = self
            .records
            .lock()
            .map_err(|e| TallyError::Persistence(format!("nonce store poisoned: {e}")))?;
        records.insert(normalize_address(address), sequence);
        Ok(())
    }
}

/// Merges stored and chain-observed sequence numbers for a run.
pub struct NonceReconciler<S> {
    store: S,
}

impl<S: NonceStore> NonceReconciler<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Starting sequence for `address` given the chain's pending count.
    pub fn starting_sequence(&self, address: &str, chain_observed: u64) -> u64 {
        let stored = self.store.load(address).unwrap_or(0);
        let start = reconcile(chain_observed, stored);

        tracing::info!(
            address = %normalize_address(address),
            chain_observed,
            stored,
            start,
            "reconciled starting nonce"
        );

        start
    }

    /// Persists the next unused sequence number reached by the run.
    pub fn commit(&self, address: &str, next_sequence: u64) -> TallyResult<()> {
        self.store.save(address, next_sequence)?;
        tracing::info!(address = %normalize_address(address), next_sequence, "saved nonce");
        Ok(())
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}
