//! Benchmark scenarios: what gets sent, what gets tracked, what gets checked.

use std::collections::BTreeSet;

use alloy_primitives::{Address, Bytes, I256, U256};
use serde::{Deserialize, Serialize};
use smallvec::{smallvec, SmallVec};
use tally_core::{Entity, OperationPlan, PlannedEffect};

/// Event streamed during counter runs.
pub const COUNTER_EVENT: &str = "NewNumber";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScenarioKind {
    Transfer,
    BackAndForth,
    Increment,
}

impl ScenarioKind {
    pub fn label(&self) -> &'static str {
        match self {
            ScenarioKind::Transfer => "eth-transfer",
            ScenarioKind::BackAndForth => "eth-back-and-forth",
            ScenarioKind::Increment => "counter-increment",
        }
    }
}

/// An operation before its sequence number is known.
#[derive(Debug, Clone)]
pub struct PlannedOp {
    pub from: Address,
    pub to: Address,
    pub value: U256,
    pub gas_limit: u64,
    pub payload: Bytes,
    pub effect: PlannedEffect,
    /// Entities read back right after this operation confirms.
    pub checks: SmallVec<[Entity; 2]>,
}

impl PlannedOp {
    pub fn into_plan(self, index: usize, sequence_number: u64, gas_price: u128) -> OperationPlan {
        OperationPlan {
            index,
            from: self.from,
            to: self.to,
            sequence_number,
            value: self.value,
            gas_price,
            gas_limit: self.gas_limit,
            payload: self.payload,
            effect: self.effect,
        }
    }
}

/// Ordered operations plus the entities whose state the run follows.
#[derive(Debug, Clone)]
pub struct Scenario {
    pub kind: ScenarioKind,
    pub ops: Vec<PlannedOp>,
    pub tracked: BTreeSet<Entity>,
    /// `(contract, event name)` to stream for the duration of the run.
    pub events: Option<(Address, &'static str)>,
}

impl Scenario {
    /// One sender pays `amount` to each recipient.
    pub fn transfer(sender: Address, recipients: &[Address], amount: U256, gas_limit: u64) -> Self {
        let mut tracked = BTreeSet::from([Entity::Balance(sender)]);
        let ops = recipients
            .iter()
            .map(|&to| {
                tracked.insert(Entity::Balance(to));
                PlannedOp {
                    from: sender,
                    to,
                    value: amount,
                    gas_limit,
                    payload: Bytes::new(),
                    effect: PlannedEffect::Transfer,
                    checks: smallvec![Entity::Balance(to)],
                }
            })
            .collect();

        Self {
            kind: ScenarioKind::Transfer,
            ops,
            tracked,
            events: None,
        }
    }

    /// `rounds` round trips between two wallets. The first return leg sends
    /// `amount - flat_gas_cost` so wallet2 can afford its own gas.
    pub fn back_and_forth(
        wallet1: Address,
        wallet2: Address,
        rounds: usize,
        amount: U256,
        gas_limit: u64,
        flat_gas_cost: U256,
    ) -> Self {
        let both: SmallVec<[Entity; 2]> = smallvec![Entity::Balance(wallet1), Entity::Balance(wallet2)];
        let leg = |from: Address, to: Address, value: U256| PlannedOp {
            from,
            to,
            value,
            gas_limit,
            payload: Bytes::new(),
            effect: PlannedEffect::Transfer,
            checks: both.clone(),
        };

        let mut ops = Vec::with_capacity(rounds * 2);
        for round in 0..rounds {
            let back = if round == 0 {
                amount.saturating_sub(flat_gas_cost)
            } else {
                amount
            };
            ops.push(leg(wallet1, wallet2, amount));
            ops.push(leg(wallet2, wallet1, back));
        }

        Self {
            kind: ScenarioKind::BackAndForth,
            ops,
            tracked: both.into_iter().collect(),
            events: None,
        }
    }

    /// `count` calls to `increment()` on `counter`.
    pub fn increment(sender: Address, counter: Address, count: usize, gas_limit: u64) -> Self {
        let payload = tally_provider::contract::increment_calldata();
        let ops = (0..count)
            .map(|_| PlannedOp {
                from: sender,
                to: counter,
                value: U256::ZERO,
                gas_limit,
                payload: payload.clone(),
                effect: PlannedEffect::CounterIncrement {
                    counter,
                    delta: I256::ONE,
                },
                checks: smallvec![Entity::Counter(counter)],
            })
            .collect();

        Self {
            kind: ScenarioKind::Increment,
            ops,
            tracked: BTreeSet::from([Entity::Balance(sender), Entity::Counter(counter)]),
            events: Some((counter, COUNTER_EVENT)),
        }
    }

    /// Distinct senders, in first-use order.
    pub fn senders(&self) -> Vec<Address> {
        let mut seen = BTreeSet::new();
        self.ops
            .iter()
            .filter(|op| seen.insert(op.from))
            .map(|op| op.from)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// `n` fresh, unfunded recipient addresses.
pub fn random_recipients(n: usize) -> Vec<Address> {
    (0..n).map(|_| Address::random()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const W1: Address = Address::repeat_byte(0x11);
    const W2: Address = Address::repeat_byte(0x22);
    const COUNTER: Address = Address::repeat_byte(0xc4);

    #[test]
    fn transfer_tracks_every_recipient() {
        let recipients = random_recipients(5);
        let s = Scenario::transfer(W1, &recipients, U256::from(10), 21_000);
        assert_eq!(s.len(), 5);
        assert_eq!(s.tracked.len(), 6);
        assert_eq!(s.senders(), vec![W1]);
        for (op, r) in s.ops.iter().zip(&recipients) {
            assert_eq!(op.checks.as_slice(), &[Entity::Balance(*r)]);
        }
    }

    #[test]
    fn back_and_forth_alternates_and_trims_first_return() {
        let s = Scenario::back_and_forth(W1, W2, 3, U256::from(1_000), 21_000, U256::from(100));
        assert_eq!(s.len(), 6);
        assert_eq!(s.senders(), vec![W1, W2]);
        assert_eq!((s.ops[0].from, s.ops[0].to), (W1, W2));
        assert_eq!((s.ops[1].from, s.ops[1].to), (W2, W1));
        assert_eq!(s.ops[1].value, U256::from(900));
        assert_eq!(s.ops[3].value, U256::from(1_000));
    }

    #[test]
    fn increment_streams_counter_events() {
        let s = Scenario::increment(W1, COUNTER, 20, 10_000_000);
        assert_eq!(s.len(), 20);
        assert_eq!(s.events, Some((COUNTER, COUNTER_EVENT)));
        assert!(s.tracked.contains(&Entity::Counter(COUNTER)));
        assert!(s.tracked.contains(&Entity::Balance(W1)));
        assert!(s.ops.iter().all(|op| op.value.is_zero()));
    }

    #[test]
    fn into_plan_keeps_fields() {
        let s = Scenario::increment(W1, COUNTER, 1, 50_000);
        let plan = s.ops[0].clone().into_plan(1, 9, 114);
        assert_eq!(plan.sequence_number, 9);
        assert_eq!(plan.gas_price, 114);
        assert_eq!(plan.flat_gas_cost(), U256::from(50_000u64 * 114));
    }
}
