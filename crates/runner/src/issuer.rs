//! Drives planned operations through sign -> submit -> confirm.
//!
//! Sequential mode waits for each receipt before building the next plan and
//! stops at the first failure. Parallel mode pre-assigns a contiguous nonce
//! range per sender and fans every submission out at once; failures stay
//! isolated to their own operation.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use alloy_primitives::Address;
use chrono::Utc;
use tally_core::{OperationOutcome, OperationPlan, OutcomeStatus, RunMode, TallyError};
use tally_provider::{ChainClient, OperationSigner};
use tokio::task::JoinSet;

use crate::ledger_writer::{GasPolicy, LedgerHandle};
use crate::reconciler::ResultReconciler;
use crate::scenario::PlannedOp;

/// Everything the issuance phase produced.
#[derive(Debug)]
pub struct IssueResult {
    /// Outcomes in operation order. Operations never attempted are absent.
    pub outcomes: Vec<OperationOutcome>,
    /// Next unused sequence number per sender.
    pub next_sequences: BTreeMap<Address, u64>,
    pub elapsed: Duration,
}

pub struct TransactionIssuer {
    chain: Arc<dyn ChainClient>,
    signer: Arc<dyn OperationSigner>,
    ledger: LedgerHandle,
    reconciler: Arc<ResultReconciler>,
    gas_price: u128,
}

impl TransactionIssuer {
    pub fn new(
        chain: Arc<dyn ChainClient>,
        signer: Arc<dyn OperationSigner>,
        ledger: LedgerHandle,
        reconciler: Arc<ResultReconciler>,
        gas_price: u128,
    ) -> Self {
        Self {
            chain,
            signer,
            ledger,
            reconciler,
            gas_price,
        }
    }

    pub async fn issue(
        &self,
        mode: RunMode,
        ops: Vec<PlannedOp>,
        starts: &BTreeMap<Address, u64>,
    ) -> IssueResult {
        match mode {
            RunMode::Sequential => self.issue_sequential(ops, starts).await,
            RunMode::Parallel => self.issue_parallel(ops, starts).await,
        }
    }

    async fn issue_sequential(&self, ops: Vec<PlannedOp>, starts: &BTreeMap<Address, u64>) -> IssueResult {
        let t0 = Instant::now();
        let planned = ops.len();
        let mut next = starts.clone();
        let mut outcomes = Vec::with_capacity(planned);

        tracing::info!(planned, "issuing sequentially");

        for (i, op) in ops.into_iter().enumerate() {
            let sequence = next.get(&op.from).copied().unwrap_or(0);
            let checks = op.checks.clone();
            let plan = op.into_plan(i + 1, sequence, self.gas_price);

            let outcome = submit_one(self.chain.as_ref(), self.signer.as_ref(), plan).await;

            if let Some(receipt) = &outcome.receipt {
                // Mined, so the nonce is spent even if the call reverted.
                next.insert(outcome.plan.from, sequence + 1);

                match self
                    .ledger
                    .apply_confirmed(&outcome.plan, receipt, GasPolicy::PerOperation)
                    .await
                {
                    Ok(snapshot) if outcome.is_success() => {
                        self.reconciler
                            .spawn_operation_checks(outcome.index(), &checks, &snapshot);
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!(operation = outcome.index(), error = %e, "no checks for operation");
                    }
                }
            }

            let failed = !outcome.is_success();
            if failed {
                tracing::error!(
                    operation = outcome.index(),
                    nonce = sequence,
                    error = outcome.error.as_deref().unwrap_or_default(),
                    remaining = planned - outcome.index(),
                    "operation failed, aborting sequential run"
                );
            }
            outcomes.push(outcome);
            if failed {
                break;
            }
        }

        let elapsed = t0.elapsed();
        tracing::info!(
            submitted = outcomes.len(),
            elapsed_ms = elapsed.as_millis(),
            "sequential issuance done"
        );

        IssueResult {
            outcomes,
            next_sequences: next,
            elapsed,
        }
    }

    async fn issue_parallel(&self, ops: Vec<PlannedOp>, starts: &BTreeMap<Address, u64>) -> IssueResult {
        let t0 = Instant::now();
        let planned = ops.len();
        let mut next = starts.clone();

        let plans: Vec<(OperationPlan, _)> = ops
            .into_iter()
            .enumerate()
            .map(|(i, op)| {
                let slot = next.entry(op.from).or_insert(0);
                let sequence = *slot;
                *slot += 1;
                let checks = op.checks.clone();
                (op.into_plan(i + 1, sequence, self.gas_price), checks)
            })
            .collect();

        tracing::info!(planned, "issuing in parallel");

        let mut tasks = JoinSet::new();
        for (plan, checks) in plans {
            let chain = self.chain.clone();
            let signer = self.signer.clone();
            let ledger = self.ledger.clone();
            let reconciler = self.reconciler.clone();

            tasks.spawn(async move {
                let outcome = submit_one(chain.as_ref(), signer.as_ref(), plan).await;
                if let Some(receipt) = &outcome.receipt {
                    match ledger
                        .apply_confirmed(&outcome.plan, receipt, GasPolicy::FlatRate)
                        .await
                    {
                        Ok(snapshot) if outcome.is_success() => {
                            reconciler.spawn_operation_checks(outcome.index(), &checks, &snapshot);
                        }
                        // Reverted: gas is gone, nothing to check.
                        Ok(_) => {}
                        Err(e) => {
                            tracing::warn!(operation = outcome.index(), error = %e, "no checks for operation");
                        }
                    }
                }
                outcome
            });
        }

        let mut outcomes = Vec::with_capacity(planned);
        while let Some(result) = tasks.join_next().await {
            match result {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => tracing::error!(error = %e, "submission task panicked"),
            }
        }
        outcomes.sort_by_key(|o| o.index());

        let elapsed = t0.elapsed();
        let failed = outcomes.iter().filter(|o| !o.is_success()).count();
        tracing::info!(
            submitted = outcomes.len(),
            failed,
            elapsed_ms = elapsed.as_millis(),
            "parallel issuance done"
        );

        IssueResult {
            outcomes,
            next_sequences: next,
            elapsed,
        }
    }
}

/// Signs and submits one plan, timing the round trip to its receipt.
pub async fn submit_one(
    chain: &dyn ChainClient,
    signer: &dyn OperationSigner,
    plan: OperationPlan,
) -> OperationOutcome {
    let submit_start = Utc::now();
    let t0 = Instant::now();

    let result = match signer.sign(&plan) {
        Ok(raw) => chain.submit_signed(raw).await,
        Err(e) => Err(e),
    };

    let duration_ms = t0.elapsed().as_millis() as u64;
    let submit_end = Utc::now();

    let (receipt, status, error) = match result {
        Ok(receipt) if receipt.success => {
            tracing::debug!(
                operation = plan.index,
                nonce = plan.sequence_number,
                tx_hash = %receipt.tx_hash,
                block = ?receipt.block_number,
                gas_used = receipt.gas_used,
                duration_ms,
                "confirmed"
            );
            (Some(receipt), OutcomeStatus::Success, None)
        }
        Ok(receipt) => {
            let msg = TallyError::Submission(format!("reverted in tx {}", receipt.tx_hash)).to_string();
            tracing::warn!(operation = plan.index, nonce = plan.sequence_number, "reverted");
            (Some(receipt), OutcomeStatus::Failure, Some(msg))
        }
        Err(e) => {
            tracing::warn!(operation = plan.index, nonce = plan.sequence_number, error = %e, "submission failed");
            (None, OutcomeStatus::Failure, Some(e.to_string()))
        }
    };

    OperationOutcome {
        plan,
        receipt,
        status,
        error,
        submit_start,
        submit_end,
        duration_ms,
    }
}
