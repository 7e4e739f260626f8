//! Single-writer task that owns the [`LedgerSimulator`].
//!
//! Every confirmation, whichever submission task it came from, is queued
//! on one channel and applied in arrival order. A transfer and its gas
//! correction are applied back to back inside one command, so a correction
//! can never pair with another operation's transfer.

use alloy_primitives::U256;
use tally_core::{
    ConfirmationReceipt, Entity, ExpectedState, LedgerSimulator, OperationPlan, PlannedEffect, TallyError,
    TallyResult,
};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

const QUEUE_DEPTH: usize = 1024;

/// How gas is charged when a confirmation is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GasPolicy {
    /// Flat plan-time cost, then corrected to the receipt's gas usage.
    PerOperation,
    /// Flat plan-time cost only. Parallel runs accept the resulting drift.
    FlatRate,
}

enum Command {
    Confirmed {
        plan: OperationPlan,
        receipt: ConfirmationReceipt,
        policy: GasPolicy,
        reply: oneshot::Sender<TallyResult<ExpectedState>>,
    },
    Snapshot {
        reply: oneshot::Sender<ExpectedState>,
    },
    Finish {
        reply: oneshot::Sender<LedgerSimulator>,
    },
}

/// Cloneable sender side of the ledger queue.
#[derive(Clone)]
pub struct LedgerHandle {
    commands: mpsc::Sender<Command>,
}

/// The running writer task.
pub struct LedgerWriter {
    handle: LedgerHandle,
    task: JoinHandle<()>,
}

impl LedgerWriter {
    pub fn spawn(ledger: LedgerSimulator) -> Self {
        let (tx, rx) = mpsc::channel(QUEUE_DEPTH);
        let task = tokio::spawn(run(ledger, rx));
        Self {
            handle: LedgerHandle { commands: tx },
            task,
        }
    }

    pub fn handle(&self) -> LedgerHandle {
        self.handle.clone()
    }

    /// Stops the writer and hands back the final ledger.
    pub async fn finish(self) -> TallyResult<LedgerSimulator> {
        let (reply, rx) = oneshot::channel();
        self.handle
            .commands
            .send(Command::Finish { reply })
            .await
            .map_err(|_| TallyError::Internal("ledger writer stopped early".into()))?;
        let ledger = rx
            .await
            .map_err(|_| TallyError::Internal("ledger writer dropped finish reply".into()))?;
        self.task
            .await
            .map_err(|e| TallyError::Internal(format!("ledger writer panicked: {e}")))?;
        Ok(ledger)
    }
}

impl LedgerHandle {
    /// Applies a receipt's effects and returns the snapshot right after.
    pub async fn apply_confirmed(
        &self,
        plan: &OperationPlan,
        receipt: &ConfirmationReceipt,
        policy: GasPolicy,
    ) -> TallyResult<ExpectedState> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Confirmed {
                plan: plan.clone(),
                receipt: receipt.clone(),
                policy,
                reply,
            })
            .await
            .map_err(|_| TallyError::Internal("ledger writer is gone".into()))?;
        rx.await
            .map_err(|_| TallyError::Internal("ledger writer dropped reply".into()))?
    }

    pub async fn snapshot(&self) -> TallyResult<ExpectedState> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Snapshot { reply })
            .await
            .map_err(|_| TallyError::Internal("ledger writer is gone".into()))?;
        rx.await
            .map_err(|_| TallyError::Internal("ledger writer dropped reply".into()))
    }
}

async fn run(mut ledger: LedgerSimulator, mut commands: mpsc::Receiver<Command>) {
    while let Some(cmd) = commands.recv().await {
        match cmd {
            Command::Confirmed {
                plan,
                receipt,
                policy,
                reply,
            } => {
                let result = apply(&mut ledger, &plan, &receipt, policy).map(|()| ledger.snapshot());
                if let Err(e) = &result {
                    tracing::warn!(operation = plan.index, error = %e, "ledger update rejected");
                }
                let _ = reply.send(result);
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(ledger.snapshot());
            }
            Command::Finish { reply } => {
                let _ = reply.send(ledger);
                return;
            }
        }
    }
}

/// Reverted operations still pay gas but move no value. Nothing is applied
/// unless every effect of the confirmation can be.
fn apply(
    ledger: &mut LedgerSimulator,
    plan: &OperationPlan,
    receipt: &ConfirmationReceipt,
    policy: GasPolicy,
) -> TallyResult<()> {
    let increment = match (receipt.success, &plan.effect) {
        (true, PlannedEffect::CounterIncrement { counter, delta }) => Some((*counter, *delta)),
        _ => None,
    };
    if let Some((counter, _)) = increment {
        if !ledger.is_tracked(&Entity::Counter(counter)) {
            return Err(TallyError::InvalidInput(format!(
                "effect targets untracked entity {}",
                Entity::Counter(counter)
            )));
        }
    }

    let amount = if receipt.success { plan.value } else { U256::ZERO };
    let correction = ledger.apply_transfer(plan.index, plan.from, plan.to, amount, plan.flat_gas_cost())?;

    match policy {
        GasPolicy::PerOperation => {
            ledger.apply_gas_correction(correction, receipt.gas_cost(plan.gas_price))?;
        }
        GasPolicy::FlatRate => drop(correction),
    }

    if let Some((counter, delta)) = increment {
        ledger.apply_counter_increment(counter, delta)?;
    }
    Ok(())
}
