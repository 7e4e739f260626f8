//! Deterministic expected-state ledger.
//!
//! Tracks what every [`Entity`] *should* hold, advanced only through
//! declared effects of confirmed operations. Never reads the chain and never
//! corrects itself: a gap between [`LedgerSimulator::snapshot`] and the chain
//! is the signal the reconciler reports.

use alloy_primitives::{Address, I256, U256};
use smallvec::{smallvec, SmallVec};
use std::collections::BTreeMap;

use crate::error::{TallyError, TallyResult};
use crate::types::Entity;

/// Expected numeric state per entity.
pub type ExpectedState = BTreeMap<Entity, I256>;

/// A signed delta against one entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Effect {
    pub entity: Entity,
    pub delta: I256,
}

impl Effect {
    /// Debit `amount + gas_cost` from `from`, credit `amount` to `to`.
    ///
    /// Zero deltas are dropped, so a zero-value call never touches `to`.
    pub fn transfer(from: Address, to: Address, amount: I256, gas_cost: I256) -> SmallVec<[Effect; 2]> {
        let mut effects: SmallVec<[Effect; 2]> = smallvec![Effect {
            entity: Entity::Balance(from),
            delta: -(amount.saturating_add(gas_cost)),
        }];
        effects.push(Effect {
            entity: Entity::Balance(to),
            delta: amount,
        });
        effects.retain(|e| !e.delta.is_zero());
        effects
    }
}

/// Pending gas correction for one operation's transfer.
///
/// Issued by [`LedgerSimulator::apply_transfer`] and consumed by value in
/// [`LedgerSimulator::apply_gas_correction`], so each transfer can be
/// corrected at most once and only against its own declared cost.
#[derive(Debug)]
#[must_use = "apply the correction once the receipt's gas usage is known"]
pub struct GasCorrection {
    operation: usize,
    payer: Address,
    declared: U256,
}

impl GasCorrection {
    pub fn operation(&self) -> usize {
        self.operation
    }

    pub fn payer(&self) -> Address {
        self.payer
    }

    pub fn declared(&self) -> U256 {
        self.declared
    }
}

#[derive(Debug, Clone)]
pub struct LedgerSimulator {
    initial: ExpectedState,
    state: ExpectedState,
    effects_applied: usize,
    corrections_applied: usize,
}

impl LedgerSimulator {
    /// Starts from one authoritative read per tracked entity.
    pub fn new(initial: ExpectedState) -> Self {
        Self {
            state: initial.clone(),
            initial,
            effects_applied: 0,
            corrections_applied: 0,
        }
    }

    /// Builds the initial state from raw chain reads.
    pub fn from_reads<I>(reads: I) -> TallyResult<Self>
    where
        I: IntoIterator<Item = (Entity, U256)>,
    {
        let initial = reads
            .into_iter()
            .map(|(entity, value)| Ok((entity, to_signed(value)?)))
            .collect::<TallyResult<ExpectedState>>()?;
        Ok(Self::new(initial))
    }

    pub fn value(&self, entity: &Entity) -> Option<I256> {
        self.state.get(entity).copied()
    }

    pub fn is_tracked(&self, entity: &Entity) -> bool {
        self.state.contains_key(entity)
    }

    /// Read-only copy of the current expected state.
    pub fn snapshot(&self) -> ExpectedState {
        self.state.clone()
    }

    pub fn initial(&self) -> &ExpectedState {
        &self.initial
    }

    pub fn effects_applied(&self) -> usize {
        self.effects_applied
    }

    /// Number of correction tokens consumed, including zero refunds.
    pub fn corrections_applied(&self) -> usize {
        self.corrections_applied
    }

    /// `current - initial` per entity.
    pub fn net_changes(&self) -> BTreeMap<Entity, I256> {
        self.state
            .iter()
            .map(|(entity, value)| {
                let start = self.initial.get(entity).copied().unwrap_or(I256::ZERO);
                (*entity, value.saturating_sub(start))
            })
            .collect()
    }

    /// Applies a confirmed transfer of `amount` with `gas_cost` at the flat
    /// plan-time rate. Returns the correction token for this operation.
    pub fn apply_transfer(
        &mut self,
        operation: usize,
        from: Address,
        to: Address,
        amount: U256,
        gas_cost: U256,
    ) -> TallyResult<GasCorrection> {
        let effects = Effect::transfer(from, to, to_signed(amount)?, to_signed(gas_cost)?);
        self.apply_all(&effects)?;

        Ok(GasCorrection {
            operation,
            payer: from,
            declared: gas_cost,
        })
    }

    /// Credits back `declared - actual` to the payer of the transfer the
    /// token was issued for. Returns the delta applied.
    pub fn apply_gas_correction(
        &mut self,
        correction: GasCorrection,
        actual_gas_cost: U256,
    ) -> TallyResult<I256> {
        let refund = to_signed(correction.declared)?.saturating_sub(to_signed(actual_gas_cost)?);
        self.corrections_applied += 1;
        if refund.is_zero() {
            return Ok(refund);
        }

        self.apply_all(&[Effect {
            entity: Entity::Balance(correction.payer),
            delta: refund,
        }])?;

        tracing::debug!(
            operation = correction.operation,
            payer = %correction.payer,
            refund = %refund,
            "gas correction applied"
        );
        Ok(refund)
    }

    /// Adds `delta` to a tracked counter contract.
    pub fn apply_counter_increment(&mut self, counter: Address, delta: I256) -> TallyResult<()> {
        self.apply_all(&[Effect {
            entity: Entity::Counter(counter),
            delta,
        }])
    }

    /// All-or-nothing: every touched entity must be tracked.
    fn apply_all(&mut self, effects: &[Effect]) -> TallyResult<()> {
        if let Some(missing) = effects.iter().find(|e| !self.state.contains_key(&e.entity)) {
            return Err(TallyError::InvalidInput(format!(
                "effect targets untracked entity {}",
                missing.entity
            )));
        }

        for effect in effects {
            if let Some(value) = self.state.get_mut(&effect.entity) {
                *value = value.saturating_add(effect.delta);
                self.effects_applied += 1;
            }
        }
        Ok(())
    }
}

/// Chain values are unsigned; the ledger works in signed deltas.
pub fn to_signed(value: U256) -> TallyResult<I256> {
    I256::try_from(value)
        .map_err(|_| TallyError::InvalidInput(format!("value {value} exceeds signed 256-bit range")))
}
