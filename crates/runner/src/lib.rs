//! Benchmark runs for Tally: scenarios, issuance, reconciliation, reports.
//!
//! A [`Runner`] owns one configured run. It reconciles nonces, seeds the
//! expected-state ledger from chain reads, issues the scenario's operations,
//! checks expected against actual state as they confirm, and returns a
//! [`RunReport`].

pub mod config;
pub mod issuer;
pub mod ledger_writer;
pub mod reconciler;
pub mod report;
pub mod run;
pub mod scenario;
pub mod sink;
pub mod stats;

pub use config::{Configuration, RunConfig, CALL_GAS_LIMIT, TRANSFER_GAS_LIMIT};
pub use issuer::{IssueResult, TransactionIssuer};
pub use ledger_writer::{GasPolicy, LedgerHandle, LedgerWriter};
pub use reconciler::ResultReconciler;
pub use report::{OperationRecord, ReportWriter, RunReport};
pub use run::Runner;
pub use scenario::{random_recipients, Scenario, ScenarioKind};
pub use sink::SinkTarget;
pub use stats::{NetChange, Summary};
