//! Run report: the durable record of one benchmark run.
//!
//! Built once at the end of a run from the outcomes and reconciliation
//! records, persisted as pretty JSON, and rendered as a boxed summary for
//! the terminal.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use alloy_primitives::I256;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tally_core::{
    ContractEvent, Entity, ExpectedState, OperationOutcome, ReconciliationRecord, TallyError, TallyResult,
};

use crate::config::Configuration;
use crate::stats::{Summary, SummaryInput};

/// One operation with the checks taken right after it confirmed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationRecord {
    #[serde(flatten)]
    pub outcome: OperationOutcome,
    pub reconciliation: Vec<ReconciliationRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub test_type: String,
    pub timestamp: DateTime<Utc>,
    pub configuration: Configuration,
    pub summary: Summary,
    #[serde(with = "tally_core::decimal::map")]
    pub initial_state: BTreeMap<Entity, I256>,
    #[serde(with = "tally_core::decimal::map")]
    pub final_expected: BTreeMap<Entity, I256>,
    pub settlement: Vec<ReconciliationRecord>,
    pub transactions: Vec<OperationRecord>,
    #[serde(default)]
    pub events: Vec<ContractEvent>,
}

/// Everything a finished run hands to [`RunReport::build`].
pub struct RunArtifacts {
    pub test_type: String,
    pub configuration: Configuration,
    pub outcomes: Vec<OperationOutcome>,
    pub records: Vec<ReconciliationRecord>,
    pub settlement: Vec<ReconciliationRecord>,
    pub initial: ExpectedState,
    pub final_expected: ExpectedState,
    pub events: Vec<ContractEvent>,
}

impl RunReport {
    pub fn build(run: RunArtifacts) -> Self {
        let summary = Summary::compute(SummaryInput {
            planned: run.configuration.planned_operations().unwrap_or(run.outcomes.len()),
            outcomes: &run.outcomes,
            records: &run.records,
            settlement: &run.settlement,
            initial: &run.initial,
            final_expected: &run.final_expected,
            events_received: run.events.len(),
        });

        let mut by_operation: BTreeMap<usize, Vec<ReconciliationRecord>> = BTreeMap::new();
        for record in run.records {
            match record.operation {
                Some(op) => by_operation.entry(op).or_default().push(record),
                None => tracing::warn!(entity = %record.entity, "operation record without operation index"),
            }
        }

        let transactions = run
            .outcomes
            .into_iter()
            .map(|outcome| OperationRecord {
                reconciliation: by_operation.remove(&outcome.index()).unwrap_or_default(),
                outcome,
            })
            .collect();

        Self {
            test_type: run.test_type,
            timestamp: Utc::now(),
            configuration: run.configuration,
            summary,
            initial_state: run.initial,
            final_expected: run.final_expected,
            settlement: run.settlement,
            transactions,
            events: run.events,
        }
    }

    /// Per-operation records in operation order.
    pub fn records(&self) -> impl Iterator<Item = &ReconciliationRecord> {
        self.transactions.iter().flat_map(|t| t.reconciliation.iter())
    }

    /// Re-derives the summary from the stored collections alone.
    pub fn recompute_summary(&self) -> Summary {
        let outcomes: Vec<OperationOutcome> = self.transactions.iter().map(|t| t.outcome.clone()).collect();
        let records: Vec<ReconciliationRecord> = self.records().cloned().collect();
        Summary::compute(SummaryInput {
            planned: self
                .configuration
                .planned_operations()
                .unwrap_or(self.transactions.len()),
            outcomes: &outcomes,
            records: &records,
            settlement: &self.settlement,
            initial: &self.initial_state,
            final_expected: &self.final_expected,
            events_received: self.events.len(),
        })
    }

    /// Render the summary as a boxed block for the terminal.
    pub fn render(&self) -> String {
        let s = &self.summary;
        let mut out = String::new();

        let rule = "╠══════════════════════════════════════════════════════════════╣\n";
        let line = |label: &str, value: String| format!("║  {:<20}{:>40} ║\n", label, value);

        out.push('\n');
        out.push_str("╔══════════════════════════════════════════════════════════════╗\n");
        out.push_str("║                      TALLY RUN REPORT                        ║\n");
        out.push_str(rule);
        out.push_str(&line("Test:", self.test_type.clone()));
        out.push_str(&line("Operations:", s.total_operations.to_string()));
        out.push_str(&line("Successful:", s.successful.to_string()));
        out.push_str(&line("Failed:", s.failed.to_string()));
        if s.not_submitted > 0 {
            out.push_str(&line("Not submitted:", s.not_submitted.to_string()));
        }
        out.push_str(&line("Total time:", format!("{} ms", s.total_time_ms)));
        out.push_str(&line("Avg per op:", format!("{:.2} ms", s.avg_time_per_operation_ms)));
        out.push_str(&line(
            "Confirmation:",
            match (s.min_confirmation_ms, s.max_confirmation_ms) {
                (Some(min), Some(max)) => {
                    format!("avg {:.2} / min {} / max {} ms", s.avg_confirmation_ms, min, max)
                }
                _ => "n/a".to_string(),
            },
        ));
        out.push_str(&line("Avg query:", format!("{:.2} ms", s.avg_query_ms)));
        out.push_str(&line(
            "Matching records:",
            format!("{}/{} ({:.1}%)", s.matching_records, s.total_records, s.match_ratio * 100.0),
        ));
        out.push_str(&line(
            "Settlement:",
            format!("{}/{} match", s.settlement_matching, s.settlement_records),
        ));
        out.push_str(&line("Gas used:", s.total_gas_used.to_string()));
        if s.events_received > 0 {
            out.push_str(&line("Events:", s.events_received.to_string()));
        }
        out.push_str(rule);

        if s.net_changes.is_empty() {
            out.push_str("║  No tracked entities.                                        ║\n");
        } else {
            out.push_str("║  NET CHANGES                                                 ║\n");
            out.push_str(rule);
            for (entity, change) in &s.net_changes {
                let verdict = match change.difference {
                    Some(d) if d.is_zero() => "OK".to_string(),
                    Some(d) => format!("DIFF {d}"),
                    None => "UNREAD".to_string(),
                };
                out.push_str(&format!("║  {entity}\n"));
                out.push_str(&format!(
                    "║     expected {}  |  actual {}  |  {}\n",
                    change.expected_change,
                    change
                        .actual_change
                        .map(|c| c.to_string())
                        .unwrap_or_else(|| "-".into()),
                    verdict
                ));
            }
        }

        out.push_str("╚══════════════════════════════════════════════════════════════╝\n");
        out
    }
}

/// Persists a [`RunReport`] as pretty-printed JSON.
pub struct ReportWriter {
    path: PathBuf,
}

impl ReportWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write(&self, report: &RunReport) -> TallyResult<()> {
        let json = serde_json::to_string_pretty(report)
            .map_err(|e| TallyError::Internal(format!("report serialization: {e}")))?;
        fs::write(&self.path, json)
            .map_err(|e| TallyError::Persistence(format!("{}: {e}", self.path.display())))?;
        tracing::info!(path = %self.path.display(), operations = report.transactions.len(), "report written");
        Ok(())
    }

    pub fn read(&self) -> TallyResult<RunReport> {
        let raw = fs::read_to_string(&self.path)
            .map_err(|e| TallyError::Persistence(format!("{}: {e}", self.path.display())))?;
        serde_json::from_str(&raw).map_err(|e| TallyError::Persistence(format!("{}: {e}", self.path.display())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RunConfig;
    use alloy_primitives::{Address, Bytes, B256, U256};
    use tally_core::{CheckPhase, ConfirmationReceipt, OperationPlan, OutcomeStatus, PlannedEffect};

    const A: Address = Address::repeat_byte(0xaa);
    const B: Address = Address::repeat_byte(0xbb);

    fn artifacts() -> RunArtifacts {
        let now = Utc::now();
        let outcome = OperationOutcome {
            plan: OperationPlan {
                index: 1,
                from: A,
                to: B,
                sequence_number: 7,
                value: U256::from(10u64).pow(U256::from(20)),
                gas_price: 100,
                gas_limit: 21_000,
                payload: Bytes::new(),
                effect: PlannedEffect::Transfer,
            },
            receipt: Some(ConfirmationReceipt {
                tx_hash: B256::repeat_byte(1),
                block_number: Some(9),
                block_hash: Some(B256::repeat_byte(2)),
                gas_used: 21_000,
                effective_gas_price: 100,
                success: true,
            }),
            status: OutcomeStatus::Success,
            error: None,
            submit_start: now,
            submit_end: now + chrono::TimeDelta::milliseconds(12),
            duration_ms: 12,
        };
        let hundred = I256::try_from(U256::from(10u64).pow(U256::from(20))).unwrap();
        let record = ReconciliationRecord::compare(
            Some(1),
            CheckPhase::Operation,
            Entity::Balance(B),
            hundred,
            Ok(U256::from(10u64).pow(U256::from(20))),
            3,
        );
        let settlement = ReconciliationRecord::compare(
            None,
            CheckPhase::Settlement,
            Entity::Balance(B),
            hundred,
            Ok(U256::from(10u64).pow(U256::from(20))),
            2,
        );

        RunArtifacts {
            test_type: "sequential-eth-transfer".into(),
            configuration: RunConfig::transfer().with_operations(2).echo(),
            outcomes: vec![outcome],
            records: vec![record],
            settlement: vec![settlement],
            initial: ExpectedState::from([(Entity::Balance(B), I256::ZERO)]),
            final_expected: ExpectedState::from([(Entity::Balance(B), hundred)]),
            events: vec![],
        }
    }

    #[test]
    fn build_attaches_records_to_their_operation() {
        let report = RunReport::build(artifacts());
        assert_eq!(report.transactions.len(), 1);
        assert_eq!(report.transactions[0].reconciliation.len(), 1);
        assert_eq!(report.summary.not_submitted, 1);
        assert!(report.summary.all_matched());
    }

    #[test]
    fn json_roundtrip_recomputes_same_summary() {
        let report = RunReport::build(artifacts());
        let json = serde_json::to_string_pretty(&report).unwrap();

        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["testType"], "sequential-eth-transfer");
        assert_eq!(value["transactions"][0]["plan"]["value"], "100000000000000000000");
        assert_eq!(value["transactions"][0]["reconciliation"][0]["expected"], "100000000000000000000");

        let back: RunReport = serde_json::from_str(&json).unwrap();
        assert_eq!(back.recompute_summary(), report.summary);
    }

    #[test]
    fn recompute_ignores_stored_summary() {
        let mut report = RunReport::build(artifacts());
        let derived = report.summary.clone();
        assert_eq!(derived.total_operations, 2);
        assert_eq!(derived.total_time_ms, 12);

        report.summary.total_operations = 99;
        report.summary.total_time_ms = 0;
        assert_eq!(report.recompute_summary(), derived);
    }

    #[test]
    fn render_mentions_net_changes() {
        let text = RunReport::build(artifacts()).render();
        assert!(text.contains("TALLY RUN REPORT"));
        assert!(text.contains("NET CHANGES"));
        assert!(text.contains("OK"));
    }

    #[test]
    fn writer_persists_and_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ReportWriter::new(dir.path().join("out.json"));
        let report = RunReport::build(artifacts());
        writer.write(&report).unwrap();
        let back = writer.read().unwrap();
        assert_eq!(back.summary, report.summary);
    }
}
