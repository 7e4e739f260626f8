//! Derived run statistics.
//!
//! Everything here is a pure function of the stored outcomes, records and
//! snapshots, so a persisted report can be re-summarised offline.

use std::collections::BTreeMap;

use alloy_primitives::{I256, U256};
use serde::{Deserialize, Serialize};
use tally_core::{Entity, ExpectedState, OperationOutcome, ReconciliationRecord};

/// Aggregate view of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub total_operations: usize,
    pub successful: usize,
    pub failed: usize,
    /// Planned operations never attempted (sequential abort).
    pub not_submitted: usize,
    pub total_time_ms: u64,
    pub avg_time_per_operation_ms: f64,
    pub avg_confirmation_ms: f64,
    pub min_confirmation_ms: Option<u64>,
    pub max_confirmation_ms: Option<u64>,
    pub avg_query_ms: f64,
    /// Per-operation records whose expected value matched the chain.
    pub matching_records: usize,
    pub total_records: usize,
    pub match_ratio: f64,
    pub settlement_matching: usize,
    pub settlement_records: usize,
    #[serde(with = "tally_core::decimal")]
    pub total_value_sent: U256,
    pub total_gas_used: u64,
    #[serde(with = "tally_core::decimal")]
    pub total_gas_cost: U256,
    pub events_received: usize,
    pub net_changes: BTreeMap<Entity, NetChange>,
}

/// Start-to-end movement of one tracked entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetChange {
    #[serde(with = "tally_core::decimal")]
    pub initial: I256,
    #[serde(with = "tally_core::decimal")]
    pub expected_final: I256,
    #[serde(with = "tally_core::decimal::option")]
    pub actual_final: Option<U256>,
    #[serde(with = "tally_core::decimal")]
    pub expected_change: I256,
    #[serde(with = "tally_core::decimal::option")]
    pub actual_change: Option<I256>,
    /// `actual_final - expected_final`; zero when the ledger held.
    #[serde(with = "tally_core::decimal::option")]
    pub difference: Option<I256>,
}

/// Inputs of [`Summary::compute`].
pub struct SummaryInput<'a> {
    pub planned: usize,
    pub outcomes: &'a [OperationOutcome],
    pub records: &'a [ReconciliationRecord],
    pub settlement: &'a [ReconciliationRecord],
    pub initial: &'a ExpectedState,
    pub final_expected: &'a ExpectedState,
    pub events_received: usize,
}

impl Summary {
    pub fn compute(input: SummaryInput<'_>) -> Self {
        let SummaryInput {
            planned,
            outcomes,
            records,
            settlement,
            initial,
            final_expected,
            events_received,
        } = input;

        let total_time_ms = submission_window_ms(outcomes);
        let successful = outcomes.iter().filter(|o| o.is_success()).count();
        let failed = outcomes.len() - successful;

        let confirmations: Vec<u64> = outcomes
            .iter()
            .filter(|o| o.is_success())
            .map(|o| o.duration_ms)
            .collect();

        let matching_records = records.iter().filter(|r| r.matches).count();

        let mut total_value_sent = U256::ZERO;
        let mut total_gas_used = 0u64;
        let mut total_gas_cost = U256::ZERO;
        for outcome in outcomes {
            if outcome.is_success() {
                total_value_sent = total_value_sent.saturating_add(outcome.plan.value);
            }
            if let Some(receipt) = &outcome.receipt {
                total_gas_used = total_gas_used.saturating_add(receipt.gas_used);
                total_gas_cost = total_gas_cost.saturating_add(receipt.gas_cost(outcome.plan.gas_price));
            }
        }

        Self {
            total_operations: planned,
            successful,
            failed,
            not_submitted: planned.saturating_sub(outcomes.len()),
            total_time_ms,
            avg_time_per_operation_ms: ratio(total_time_ms as f64, planned),
            avg_confirmation_ms: mean(&confirmations),
            min_confirmation_ms: confirmations.iter().copied().min(),
            max_confirmation_ms: confirmations.iter().copied().max(),
            avg_query_ms: mean(
                &records
                    .iter()
                    .chain(settlement)
                    .map(|r| r.query_duration_ms)
                    .collect::<Vec<_>>(),
            ),
            matching_records,
            total_records: records.len(),
            match_ratio: ratio(matching_records as f64, records.len()),
            settlement_matching: settlement.iter().filter(|r| r.matches).count(),
            settlement_records: settlement.len(),
            total_value_sent,
            total_gas_used,
            total_gas_cost,
            events_received,
            net_changes: net_changes(initial, final_expected, settlement),
        }
    }

    /// True when every per-operation and settlement check matched.
    pub fn all_matched(&self) -> bool {
        self.matching_records == self.total_records && self.settlement_matching == self.settlement_records
    }
}

/// Earliest submission start to latest submission end; zero with no outcomes.
pub fn submission_window_ms(outcomes: &[OperationOutcome]) -> u64 {
    let start = outcomes.iter().map(|o| o.submit_start).min();
    let end = outcomes.iter().map(|o| o.submit_end).max();
    match (start, end) {
        (Some(start), Some(end)) => (end - start).num_milliseconds().max(0) as u64,
        _ => 0,
    }
}

fn net_changes(
    initial: &ExpectedState,
    final_expected: &ExpectedState,
    settlement: &[ReconciliationRecord],
) -> BTreeMap<Entity, NetChange> {
    let actual: BTreeMap<Entity, U256> = settlement
        .iter()
        .filter_map(|r| r.actual.map(|a| (r.entity, a)))
        .collect();

    final_expected
        .iter()
        .map(|(entity, expected_final)| {
            let start = initial.get(entity).copied().unwrap_or(I256::ZERO);
            let actual_final = actual.get(entity).copied();
            let actual_signed = actual_final.and_then(|a| I256::try_from(a).ok());
            let change = NetChange {
                initial: start,
                expected_final: *expected_final,
                actual_final,
                expected_change: expected_final.saturating_sub(start),
                actual_change: actual_signed.map(|a| a.saturating_sub(start)),
                difference: actual_signed.map(|a| a.saturating_sub(*expected_final)),
            };
            (*entity, change)
        })
        .collect()
}

fn mean(values: &[u64]) -> f64 {
    ratio(values.iter().sum::<u64>() as f64, values.len())
}

fn ratio(num: f64, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num / den as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{Address, Bytes, B256};
    use chrono::{DateTime, TimeDelta, Utc};
    use tally_core::{CheckPhase, ConfirmationReceipt, OperationPlan, OutcomeStatus, PlannedEffect, TallyError};

    const A: Address = Address::repeat_byte(0xaa);
    const B: Address = Address::repeat_byte(0xbb);

    fn at(ms: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap() + TimeDelta::milliseconds(ms)
    }

    fn outcome(index: usize, duration_ms: u64, ok: bool) -> OperationOutcome {
        submitted(index, 0, duration_ms, ok)
    }

    fn submitted(index: usize, start_ms: i64, duration_ms: u64, ok: bool) -> OperationOutcome {
        OperationOutcome {
            plan: OperationPlan {
                index,
                from: A,
                to: B,
                sequence_number: index as u64,
                value: U256::from(10),
                gas_price: 2,
                gas_limit: 21_000,
                payload: Bytes::new(),
                effect: PlannedEffect::Transfer,
            },
            receipt: ok.then(|| ConfirmationReceipt {
                tx_hash: B256::ZERO,
                block_number: Some(1),
                block_hash: None,
                gas_used: 21_000,
                effective_gas_price: 2,
                success: true,
            }),
            status: if ok { OutcomeStatus::Success } else { OutcomeStatus::Failure },
            error: (!ok).then(|| "boom".to_string()),
            submit_start: at(start_ms),
            submit_end: at(start_ms + duration_ms as i64),
            duration_ms,
        }
    }

    fn record(op: Option<usize>, entity: Entity, expected: i64, actual: Result<u64, ()>, ms: u64) -> ReconciliationRecord {
        let phase = if op.is_some() { CheckPhase::Operation } else { CheckPhase::Settlement };
        ReconciliationRecord::compare(
            op,
            phase,
            entity,
            I256::try_from(expected).unwrap(),
            actual
                .map(U256::from)
                .map_err(|()| TallyError::Provider("down".into())),
            ms,
        )
    }

    #[test]
    fn summary_counts_and_latencies() {
        let outcomes = vec![outcome(1, 100, true), outcome(2, 300, true), outcome(3, 50, false)];
        let records = vec![
            record(Some(1), Entity::Balance(B), 10, Ok(10), 4),
            record(Some(2), Entity::Balance(B), 20, Ok(19), 6),
        ];
        let initial = ExpectedState::from([(Entity::Balance(B), I256::ZERO)]);
        let final_expected = ExpectedState::from([(Entity::Balance(B), I256::try_from(20).unwrap())]);
        let settlement = vec![record(None, Entity::Balance(B), 20, Ok(19), 2)];

        let s = Summary::compute(SummaryInput {
            planned: 5,
            outcomes: &outcomes,
            records: &records,
            settlement: &settlement,
            initial: &initial,
            final_expected: &final_expected,
            events_received: 0,
        });

        assert_eq!((s.successful, s.failed, s.not_submitted), (2, 1, 2));
        assert_eq!(s.total_time_ms, 300);
        assert_eq!(s.avg_time_per_operation_ms, 60.0);
        assert_eq!(s.avg_confirmation_ms, 200.0);
        assert_eq!((s.min_confirmation_ms, s.max_confirmation_ms), (Some(100), Some(300)));
        assert_eq!(s.avg_query_ms, 4.0);
        assert_eq!((s.matching_records, s.total_records), (1, 2));
        assert_eq!(s.match_ratio, 0.5);
        assert_eq!(s.total_value_sent, U256::from(20));
        assert_eq!(s.total_gas_used, 42_000);
        assert_eq!(s.total_gas_cost, U256::from(84_000));
        assert!(!s.all_matched());

        let net = &s.net_changes[&Entity::Balance(B)];
        assert_eq!(net.expected_change, I256::try_from(20).unwrap());
        assert_eq!(net.actual_change, Some(I256::try_from(19).unwrap()));
        assert_eq!(net.difference, Some(I256::MINUS_ONE));
    }

    #[test]
    fn total_time_spans_first_start_to_last_end() {
        let outcomes = vec![
            submitted(2, 400, 50, true),
            submitted(1, 100, 900, true),
            submitted(3, 700, 20, false),
        ];
        assert_eq!(submission_window_ms(&outcomes), 900);
        assert_eq!(submission_window_ms(&[]), 0);
    }

    #[test]
    fn failed_settlement_read_leaves_actuals_empty() {
        let initial = ExpectedState::from([(Entity::Balance(A), I256::ONE)]);
        let settlement = vec![record(None, Entity::Balance(A), 1, Err(()), 1)];
        let s = Summary::compute(SummaryInput {
            planned: 0,
            outcomes: &[],
            records: &[],
            settlement: &settlement,
            initial: &initial,
            final_expected: &initial,
            events_received: 0,
        });

        assert_eq!(s.match_ratio, 0.0);
        assert_eq!(s.settlement_matching, 0);
        let net = &s.net_changes[&Entity::Balance(A)];
        assert_eq!(net.actual_final, None);
        assert_eq!(net.difference, None);
    }

    #[test]
    fn big_quantities_serialize_as_strings() {
        let initial = ExpectedState::from([(Entity::Balance(A), I256::MAX)]);
        let s = Summary::compute(SummaryInput {
            planned: 0,
            outcomes: &[],
            records: &[],
            settlement: &[],
            initial: &initial,
            final_expected: &initial,
            events_received: 0,
        });
        let json = serde_json::to_value(&s).unwrap();
        assert!(json["totalValueSent"].is_string());
        let key = Entity::Balance(A).to_string();
        assert_eq!(json["netChanges"][&key]["initial"], I256::MAX.to_string());
        assert!(json["netChanges"][&key]["actualFinal"].is_null());
    }
}
