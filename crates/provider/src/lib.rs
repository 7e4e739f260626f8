//! Chain capability surface for Tally.
//!
//! The runner only talks to a chain through [`ChainClient`] and signs
//! through [`OperationSigner`]; everything transport-specific lives here.

pub mod contract;
pub mod events;
pub mod nonce_store;
pub mod rpc;
pub mod signer;

use alloy_eips::BlockId;
use alloy_primitives::{Address, Bytes, U256};
use async_trait::async_trait;
use tally_core::{ConfirmationReceipt, Entity, TallyResult};

pub use events::{EventPublisher, EventSubscription};
pub use nonce_store::JsonFileNonceStore;
pub use signer::{LocalSigner, OperationSigner};

/// The four chain operations a run depends on.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Transaction count of `address` at `block` (usually pending).
    async fn sequence_number(&self, address: Address, block: BlockId) -> TallyResult<u64>;

    /// Current numeric state of a tracked entity.
    async fn entity_state(&self, entity: &Entity, block: BlockId) -> TallyResult<U256>;

    /// Broadcasts a signed operation and waits for its receipt.
    async fn submit_signed(&self, raw: Bytes) -> TallyResult<ConfirmationReceipt>;

    /// Streams decoded `event` logs emitted by `contract` until cancelled.
    async fn subscribe_events(&self, contract: Address, event: &str) -> TallyResult<EventSubscription>;
}
