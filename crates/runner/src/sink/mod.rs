//! Streaming sinks for run results.
//!
//! Two row schemas:
//! - [`OperationRow`]: one per attempted operation (denormalized)
//! - [`SummaryRow`]: one per run
//!
//! One backend today: the NDJSON stream in [`json_stream`].

pub mod json_stream;

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::Serialize;

use crate::report::RunReport;

// ---------------------------------------------------------------------------
// Serializable row types
// ---------------------------------------------------------------------------

/// One row per attempted operation.
#[derive(Debug, Clone, Serialize)]
pub struct OperationRow {
    pub test_type: String,
    pub index: usize,
    pub from: String,
    pub to: String,
    pub nonce: u64,
    /// Wei, decimal string.
    pub value: String,
    pub status: String,
    pub tx_hash: Option<String>,
    pub block_number: Option<u64>,
    pub gas_used: Option<u64>,
    pub duration_ms: u64,
    pub checks: u32,
    pub checks_matching: u32,
    pub error: Option<String>,
    pub created_at: String,
}

/// One row per run.
#[derive(Debug, Clone, Serialize)]
pub struct SummaryRow {
    pub test_type: String,
    pub total_operations: u32,
    pub successful: u32,
    pub failed: u32,
    pub not_submitted: u32,
    pub total_time_ms: u64,
    pub avg_confirmation_ms: f64,
    pub matching_records: u32,
    pub total_records: u32,
    pub match_ratio: f64,
    pub settlement_matching: u32,
    pub settlement_records: u32,
    pub total_gas_used: u64,
    pub events_received: u32,
    pub created_at: String,
}

// ---------------------------------------------------------------------------
// Builder: RunReport -> Rows
// ---------------------------------------------------------------------------

impl RunReport {
    /// Flatten the report into sink-ready rows.
    pub fn to_rows(&self) -> (SummaryRow, Vec<OperationRow>) {
        let created_at = self.timestamp.to_rfc3339();
        let s = &self.summary;

        let summary = SummaryRow {
            test_type: self.test_type.clone(),
            total_operations: s.total_operations as u32,
            successful: s.successful as u32,
            failed: s.failed as u32,
            not_submitted: s.not_submitted as u32,
            total_time_ms: s.total_time_ms,
            avg_confirmation_ms: (s.avg_confirmation_ms * 100.0).round() / 100.0,
            matching_records: s.matching_records as u32,
            total_records: s.total_records as u32,
            match_ratio: (s.match_ratio * 10_000.0).round() / 10_000.0,
            settlement_matching: s.settlement_matching as u32,
            settlement_records: s.settlement_records as u32,
            total_gas_used: s.total_gas_used,
            events_received: s.events_received as u32,
            created_at: created_at.clone(),
        };

        let operations = self
            .transactions
            .iter()
            .map(|t| {
                let o = &t.outcome;
                OperationRow {
                    test_type: self.test_type.clone(),
                    index: o.index(),
                    from: o.plan.from.to_string(),
                    to: o.plan.to.to_string(),
                    nonce: o.plan.sequence_number,
                    value: o.plan.value.to_string(),
                    status: if o.is_success() { "success" } else { "failure" }.into(),
                    tx_hash: o.receipt.as_ref().map(|r| r.tx_hash.to_string()),
                    block_number: o.receipt.as_ref().and_then(|r| r.block_number),
                    gas_used: o.receipt.as_ref().map(|r| r.gas_used),
                    duration_ms: o.duration_ms,
                    checks: t.reconciliation.len() as u32,
                    checks_matching: t.reconciliation.iter().filter(|r| r.matches).count() as u32,
                    error: o.error.clone(),
                    created_at: created_at.clone(),
                }
            })
            .collect();

        (summary, operations)
    }
}

// ---------------------------------------------------------------------------
// Target selection
// ---------------------------------------------------------------------------

/// Where streamed rows go: `ndjson` (stdout) or `ndjson:<path>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkTarget {
    Stdout,
    File(PathBuf),
}

impl FromStr for SinkTarget {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            None if s == "ndjson" => Ok(SinkTarget::Stdout),
            Some(("ndjson", path)) if !path.is_empty() => Ok(SinkTarget::File(PathBuf::from(path))),
            _ => Err(format!("unknown sink `{s}`, expected `ndjson` or `ndjson:<path>`")),
        }
    }
}

impl fmt::Display for SinkTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SinkTarget::Stdout => f.write_str("ndjson"),
            SinkTarget::File(path) => write!(f, "ndjson:{}", path.display()),
        }
    }
}
