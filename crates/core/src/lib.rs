//! Domain models, nonce reconciliation, and the expected-state ledger.
//!
//! Foundation crate -- no async or I/O dependencies.

pub mod decimal;
pub mod error;
pub mod ledger;
pub mod nonce;
pub mod types;

pub use error::{TallyError, TallyResult};
pub use ledger::{Effect, ExpectedState, GasCorrection, LedgerSimulator};
pub use nonce::{normalize_address, reconcile, MemoryNonceStore, NonceReconciler, NonceRecord, NonceStore};
pub use types::{
    CheckPhase, ConfirmationReceipt, ContractEvent, Entity, OperationOutcome, OperationPlan,
    OutcomeStatus, PlannedEffect, ReconciliationRecord, RunMode,
};
