//! In-memory chain for scenario tests.
//!
//! Operations are "signed" by JSON-encoding the plan, so the mock can decode
//! exactly what the issuer built. Each submission mines its own block.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use alloy_eips::BlockId;
use alloy_primitives::{keccak256, Address, Bytes, U256};
use async_trait::async_trait;
use chrono::Utc;
use tally_core::{ConfirmationReceipt, ContractEvent, Entity, OperationPlan, TallyError, TallyResult};
use tally_provider::contract::increment_calldata;
use tally_provider::events::EVENT_BUFFER;
use tally_provider::{ChainClient, EventPublisher, EventSubscription, OperationSigner};

pub const ETHER: u64 = 1_000_000_000_000_000_000;
pub const TRANSFER_GAS_USED: u64 = 21_000;
pub const CALL_GAS_USED: u64 = 26_734;

/// Signs by serializing the plan.
pub struct JsonSigner;

impl OperationSigner for JsonSigner {
    fn sign(&self, plan: &OperationPlan) -> TallyResult<Bytes> {
        serde_json::to_vec(plan)
            .map(Bytes::from)
            .map_err(|e| TallyError::Submission(e.to_string()))
    }
}

#[derive(Default)]
struct State {
    balances: HashMap<Address, U256>,
    counters: HashMap<Address, U256>,
    nonces: HashMap<Address, u64>,
    floors: HashMap<Address, u64>,
    used: HashSet<(Address, u64)>,
    submitted: Vec<OperationPlan>,
    block: u64,
}

#[derive(Default)]
pub struct MockChain {
    state: Mutex<State>,
    fail_at: HashSet<usize>,
    revert_at: HashSet<usize>,
    drift_at: Option<usize>,
    failing_reads: HashSet<Entity>,
    publishers: Mutex<Vec<EventPublisher>>,
}

impl MockChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_balance(self, address: Address, wei: U256) -> Self {
        self.state.lock().unwrap().balances.insert(address, wei);
        self
    }

    pub fn with_counter(self, contract: Address, value: u64) -> Self {
        self.state.lock().unwrap().counters.insert(contract, U256::from(value));
        self
    }

    pub fn with_nonce(self, address: Address, nonce: u64) -> Self {
        let mut s = self.state.lock().unwrap();
        s.nonces.insert(address, nonce);
        s.floors.insert(address, nonce);
        drop(s);
        self
    }

    /// Rejects operation `index` before it is mined.
    pub fn fail_at(mut self, index: usize) -> Self {
        self.fail_at.insert(index);
        self
    }

    /// Mines operation `index` but reverts it.
    pub fn revert_at(mut self, index: usize) -> Self {
        self.revert_at.insert(index);
        self
    }

    /// Someone else bumps the counter in the same block as operation `index`.
    pub fn drift_at(mut self, index: usize) -> Self {
        self.drift_at = Some(index);
        self
    }

    pub fn failing_read(mut self, entity: Entity) -> Self {
        self.failing_reads.insert(entity);
        self
    }

    pub fn balance(&self, address: Address) -> U256 {
        self.state.lock().unwrap().balances.get(&address).copied().unwrap_or_default()
    }

    pub fn counter(&self, contract: Address) -> U256 {
        self.state.lock().unwrap().counters.get(&contract).copied().unwrap_or_default()
    }

    /// Plans that were mined, in mining order.
    pub fn submitted(&self) -> Vec<OperationPlan> {
        self.state.lock().unwrap().submitted.clone()
    }

    fn mine(&self, plan: &OperationPlan, raw: &Bytes) -> TallyResult<(ConfirmationReceipt, Option<ContractEvent>)> {
        let mut guard = self.state.lock().unwrap();
        let s = &mut *guard;

        let next = s.nonces.get(&plan.from).copied().unwrap_or(0);
        let floor = s.floors.get(&plan.from).copied().unwrap_or(0);
        if plan.sequence_number < floor || s.used.contains(&(plan.from, plan.sequence_number)) {
            return Err(TallyError::Submission(format!(
                "nonce too low: {} for {}",
                plan.sequence_number, plan.from
            )));
        }

        let is_call = plan.payload == increment_calldata();
        let gas_used = if is_call { CALL_GAS_USED } else { TRANSFER_GAS_USED };
        let reverted = self.revert_at.contains(&plan.index);
        let gas_cost = U256::from(gas_used) * U256::from(plan.gas_price);
        let debit = gas_cost + if reverted { U256::ZERO } else { plan.value };

        let balance = s.balances.get(&plan.from).copied().unwrap_or_default();
        if balance < debit {
            return Err(TallyError::Submission("insufficient funds".into()));
        }

        s.used.insert((plan.from, plan.sequence_number));
        s.nonces.insert(plan.from, next.max(plan.sequence_number + 1));
        s.block += 1;
        s.balances.insert(plan.from, balance - debit);

        let tx_hash = keccak256(raw);
        let mut event = None;
        if !reverted {
            *s.balances.entry(plan.to).or_default() += plan.value;
            if is_call {
                let bump = if self.drift_at == Some(plan.index) { 2 } else { 1 };
                let counter = s.counters.entry(plan.to).or_default();
                *counter += U256::from(bump);
                event = Some(ContractEvent {
                    name: "NewNumber".into(),
                    value: *counter,
                    block_number: Some(s.block),
                    tx_hash: Some(tx_hash),
                    received_at: Utc::now(),
                });
            }
        }
        s.submitted.push(plan.clone());

        let receipt = ConfirmationReceipt {
            tx_hash,
            block_number: Some(s.block),
            block_hash: Some(keccak256(s.block.to_be_bytes())),
            gas_used,
            effective_gas_price: plan.gas_price,
            success: !reverted,
        };
        Ok((receipt, event))
    }
}

#[async_trait]
impl ChainClient for MockChain {
    async fn sequence_number(&self, address: Address, _block: BlockId) -> TallyResult<u64> {
        Ok(self.state.lock().unwrap().nonces.get(&address).copied().unwrap_or(0))
    }

    async fn entity_state(&self, entity: &Entity, _block: BlockId) -> TallyResult<U256> {
        if self.failing_reads.contains(entity) {
            return Err(TallyError::Provider(format!("read of {entity} timed out")));
        }
        let s = self.state.lock().unwrap();
        Ok(match entity {
            Entity::Balance(a) => s.balances.get(a).copied().unwrap_or_default(),
            Entity::Counter(c) => s.counters.get(c).copied().unwrap_or_default(),
        })
    }

    async fn submit_signed(&self, raw: Bytes) -> TallyResult<ConfirmationReceipt> {
        // Lets already-spawned state checks run before this operation lands.
        tokio::task::yield_now().await;

        let plan: OperationPlan =
            serde_json::from_slice(&raw).map_err(|e| TallyError::Submission(format!("undecodable: {e}")))?;
        if self.fail_at.contains(&plan.index) {
            return Err(TallyError::Submission(format!("rejected operation {}", plan.index)));
        }

        let (receipt, event) = self.mine(&plan, &raw)?;

        if let Some(event) = event {
            let publishers: Vec<EventPublisher> = self.publishers.lock().unwrap().clone();
            for publisher in publishers {
                publisher.publish(Ok(event.clone())).await;
            }
        }
        Ok(receipt)
    }

    async fn subscribe_events(&self, _contract: Address, _event: &str) -> TallyResult<EventSubscription> {
        let (subscription, publisher) = EventSubscription::channel(EVENT_BUFFER);
        self.publishers.lock().unwrap().push(publisher);
        Ok(subscription)
    }
}
