//! Expected-vs-actual state checks.
//!
//! Per-operation checks are fire-and-collect: each one is spawned onto a
//! shared `JoinSet` the moment its operation confirms and is only awaited by
//! [`ResultReconciler::collect`], so a slow read never holds up issuance.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use alloy_eips::BlockId;
use alloy_primitives::I256;
use tally_core::{CheckPhase, Entity, ExpectedState, ReconciliationRecord, TallyError};
use tally_provider::ChainClient;
use tokio::task::JoinSet;

pub struct ResultReconciler {
    chain: Arc<dyn ChainClient>,
    block: BlockId,
    pending: Mutex<JoinSet<ReconciliationRecord>>,
}

impl ResultReconciler {
    pub fn new(chain: Arc<dyn ChainClient>, block: BlockId) -> Self {
        Self {
            chain,
            block,
            pending: Mutex::new(JoinSet::new()),
        }
    }

    /// Queues one read of `entity` to compare against `expected`.
    pub fn spawn_check(&self, operation: Option<usize>, phase: CheckPhase, entity: Entity, expected: I256) {
        let chain = self.chain.clone();
        let block = self.block;
        let task = async move { check(chain.as_ref(), block, operation, phase, entity, expected).await };

        match self.pending.lock() {
            Ok(mut pending) => {
                pending.spawn(task);
            }
            Err(e) => tracing::error!(error = %e, "reconciler queue poisoned, check dropped"),
        }
    }

    /// Queues the post-confirmation checks of one operation against the
    /// snapshot taken right after its effects were applied.
    pub fn spawn_operation_checks(&self, operation: usize, entities: &[Entity], snapshot: &ExpectedState) -> usize {
        let mut spawned = 0;
        for entity in entities {
            match snapshot.get(entity) {
                Some(expected) => {
                    self.spawn_check(Some(operation), CheckPhase::Operation, *entity, *expected);
                    spawned += 1;
                }
                None => tracing::warn!(operation, %entity, "check on untracked entity skipped"),
            }
        }
        spawned
    }

    /// Waits for every queued check. Records come back ordered by operation,
    /// then entity.
    pub async fn collect(&self) -> Vec<ReconciliationRecord> {
        let mut pending = match self.pending.lock() {
            Ok(mut pending) => std::mem::take(&mut *pending),
            Err(e) => {
                tracing::error!(error = %e, "reconciler queue poisoned");
                return Vec::new();
            }
        };

        let mut records = Vec::with_capacity(pending.len());
        while let Some(result) = pending.join_next().await {
            match result {
                Ok(record) => records.push(record),
                Err(e) => tracing::warn!(error = %e, "reconciliation task panicked"),
            }
        }

        records.sort_by(|a, b| a.operation.cmp(&b.operation).then(a.entity.cmp(&b.entity)));
        records
    }

    /// Reads every tracked entity once more and compares with the final
    /// expected state.
    pub async fn settle(&self, expected: &ExpectedState) -> Vec<ReconciliationRecord> {
        let checks = expected.iter().map(|(entity, value)| {
            check(
                self.chain.as_ref(),
                self.block,
                None,
                CheckPhase::Settlement,
                *entity,
                *value,
            )
        });
        let records = futures::future::join_all(checks).await;

        let matching = records.iter().filter(|r| r.matches).count();
        tracing::info!(entities = records.len(), matching, "settlement check done");
        records
    }
}

async fn check(
    chain: &dyn ChainClient,
    block: BlockId,
    operation: Option<usize>,
    phase: CheckPhase,
    entity: Entity,
    expected: I256,
) -> ReconciliationRecord {
    let t0 = Instant::now();
    let actual = chain
        .entity_state(&entity, block)
        .await
        .map_err(|e| TallyError::Reconciliation(format!("query of {entity} failed: {e}")));
    let elapsed_ms = t0.elapsed().as_millis() as u64;

    let record = ReconciliationRecord::compare(operation, phase, entity, expected, actual, elapsed_ms);

    if let Some(error) = &record.error {
        tracing::warn!(?operation, %entity, error = %error, "state query failed");
    } else if !record.matches {
        tracing::warn!(
            ?operation,
            %entity,
            expected = %record.expected,
            actual = ?record.actual,
            "expected state diverged"
        );
    } else {
        tracing::debug!(?operation, %entity, elapsed_ms, "state matches");
    }
    record
}
