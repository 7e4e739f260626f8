//! End-to-end run orchestration.
//!
//! 1. Reconcile a starting nonce per sender.
//! 2. Read every tracked entity once to seed the ledger.
//! 3. Stream contract events, if the scenario asks for them.
//! 4. Issue operations; per-operation checks fire as they confirm.
//! 5. Collect checks, settle, persist nonces, build the report.

use std::collections::BTreeMap;
use std::sync::Arc;

use alloy_primitives::Address;
use futures::future::try_join_all;
use tally_core::{ContractEvent, LedgerSimulator, NonceReconciler, NonceStore, TallyError, TallyResult};
use tally_provider::{ChainClient, OperationSigner};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::RunConfig;
use crate::issuer::TransactionIssuer;
use crate::ledger_writer::LedgerWriter;
use crate::reconciler::ResultReconciler;
use crate::report::{RunArtifacts, RunReport};
use crate::scenario::Scenario;

pub struct Runner<S> {
    chain: Arc<dyn ChainClient>,
    signer: Arc<dyn OperationSigner>,
    nonces: NonceReconciler<S>,
    config: RunConfig,
}

impl<S: NonceStore> Runner<S> {
    pub fn new(
        chain: Arc<dyn ChainClient>,
        signer: Arc<dyn OperationSigner>,
        store: S,
        config: RunConfig,
    ) -> Self {
        Self {
            chain,
            signer,
            nonces: NonceReconciler::new(store),
            config,
        }
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn nonces(&self) -> &NonceReconciler<S> {
        &self.nonces
    }

    /// Runs `scenario` to completion.
    ///
    /// Errors only before the first submission (nonce or initial state reads);
    /// once issuance starts every failure ends up in the report instead.
    pub async fn run(&self, scenario: Scenario) -> TallyResult<RunReport> {
        let cfg = &self.config;
        let planned = scenario.len();

        tracing::info!(
            test_type = %cfg.test_type(),
            planned,
            tracked = scenario.tracked.len(),
            "starting run"
        );

        let starts = self.starting_sequences(&scenario.senders()).await?;

        let reads = try_join_all(scenario.tracked.iter().map(|entity| async move {
            let value = self.chain.entity_state(entity, cfg.block).await?;
            Ok::<_, TallyError>((*entity, value))
        }))
        .await?;
        let writer = LedgerWriter::spawn(LedgerSimulator::from_reads(reads)?);

        let events = match scenario.events {
            Some((contract, event)) => self.collect_events(contract, event).await,
            None => None,
        };

        let reconciler = Arc::new(ResultReconciler::new(self.chain.clone(), cfg.block));
        let issuer = TransactionIssuer::new(
            self.chain.clone(),
            self.signer.clone(),
            writer.handle(),
            reconciler.clone(),
            cfg.gas_price,
        );
        let issued = issuer.issue(cfg.mode, scenario.ops, &starts).await;

        let events = match events {
            Some((cancel, task)) => {
                tokio::time::sleep(cfg.event_grace).await;
                cancel.cancel();
                task.await.unwrap_or_else(|e| {
                    tracing::warn!(error = %e, "event collector panicked");
                    Vec::new()
                })
            }
            None => Vec::new(),
        };

        let records = reconciler.collect().await;
        let ledger = writer.finish().await?;
        let final_expected = ledger.snapshot();
        let settlement = reconciler.settle(&final_expected).await;

        self.commit_sequences(&starts, &issued.next_sequences);

        let mut configuration = cfg.echo();
        configuration.num_operations = planned.to_string();

        let report = RunReport::build(RunArtifacts {
            test_type: cfg.test_type(),
            configuration,
            outcomes: issued.outcomes,
            records,
            settlement,
            initial: ledger.initial().clone(),
            final_expected,
            events,
        });

        tracing::info!(
            successful = report.summary.successful,
            failed = report.summary.failed,
            matching = report.summary.matching_records,
            records = report.summary.total_records,
            issue_ms = issued.elapsed.as_millis() as u64,
            "run finished"
        );
        Ok(report)
    }

    async fn starting_sequences(&self, senders: &[Address]) -> TallyResult<BTreeMap<Address, u64>> {
        let observed = try_join_all(
            senders
                .iter()
                .map(|sender| self.chain.sequence_number(*sender, self.config.block)),
        )
        .await?;

        Ok(senders
            .iter()
            .zip(observed)
            .map(|(sender, chain_observed)| {
                (*sender, self.nonces.starting_sequence(&sender.to_string(), chain_observed))
            })
            .collect())
    }

    /// Saves the next sequence per sender. A failed save is logged, never
    /// fatal: the report is still worth writing.
    fn commit_sequences(&self, starts: &BTreeMap<Address, u64>, next: &BTreeMap<Address, u64>) {
        for (sender, start) in starts {
            let next = next.get(sender).copied().unwrap_or(*start);
            if let Err(e) = self.nonces.commit(&sender.to_string(), next) {
                tracing::warn!(%sender, next, error = %e, "could not persist nonce");
            }
        }
    }

    /// Subscribes to `event` on `contract` and buffers everything received
    /// until the returned token is cancelled.
    async fn collect_events(
        &self,
        contract: Address,
        event: &str,
    ) -> Option<(CancellationToken, JoinHandle<Vec<ContractEvent>>)> {
        let mut subscription = match self.chain.subscribe_events(contract, event).await {
            Ok(subscription) => subscription,
            Err(e) => {
                tracing::warn!(%contract, event, error = %e, "event subscription failed, continuing without events");
                return None;
            }
        };
        let cancel = subscription.cancel_token();
        let stop = cancel.clone();

        let task = tokio::spawn(async move {
            let mut received = Vec::new();
            loop {
                tokio::select! {
                    biased;
                    item = subscription.next() => match item {
                        Some(Ok(event)) => {
                            tracing::debug!(name = %event.name, value = %event.value, block = ?event.block_number, "event");
                            received.push(event);
                        }
                        Some(Err(e)) => tracing::warn!(error = %e, "event stream error"),
                        None => break,
                    },
                    _ = stop.cancelled() => break,
                }
            }
            received
        });

        tracing::info!(%contract, event, "subscribed to events");
        Some((cancel, task))
    }
}
