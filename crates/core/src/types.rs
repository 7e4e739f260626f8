//! Domain types for the Tally benchmark.

use alloy_primitives::{Address, Bytes, B256, I256, U256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::error::TallyError;

// ---------------------------------------------------------------------------
// Entities
// ---------------------------------------------------------------------------

/// Something whose numeric on-chain state is tracked.
///
/// Serialized as `balance:0x…` / `counter:0x…` so it can key JSON maps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Entity {
    /// Account balance in wei.
    Balance(Address),
    /// Value returned by a Counter contract's `number()` view.
    Counter(Address),
}

impl Entity {
    pub fn address(&self) -> Address {
        match self {
            Entity::Balance(a) | Entity::Counter(a) => *a,
        }
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Entity::Balance(a) => write!(f, "balance:{a}"),
            Entity::Counter(a) => write!(f, "counter:{a}"),
        }
    }
}

impl FromStr for Entity {
    type Err = TallyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, addr) = s
            .split_once(':')
            .ok_or_else(|| TallyError::InvalidInput(format!("malformed entity: {s}")))?;
        let addr: Address = addr
            .parse()
            .map_err(|e| TallyError::InvalidInput(format!("bad entity address {addr}: {e}")))?;
        match kind {
            "balance" => Ok(Entity::Balance(addr)),
            "counter" => Ok(Entity::Counter(addr)),
            other => Err(TallyError::InvalidInput(format!(
                "unknown entity kind: {other}"
            ))),
        }
    }
}

impl Serialize for Entity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Entity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Planning
// ---------------------------------------------------------------------------

/// How planned operations are issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// One outstanding submission; each nonce waits on the previous receipt.
    Sequential,
    /// Contiguous nonce range pre-assigned; all submissions in flight at once.
    Parallel,
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunMode::Sequential => f.write_str("sequential"),
            RunMode::Parallel => f.write_str("parallel"),
        }
    }
}

/// Declared ledger effect of an operation, applied once it confirms.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum PlannedEffect {
    /// Value moves `from -> to`; sender pays gas.
    Transfer,
    /// Counter contract bumps by `delta`; sender pays gas from its balance.
    CounterIncrement {
        counter: Address,
        #[serde(with = "crate::decimal")]
        delta: I256,
    },
}

/// A fully specified operation. Immutable once submitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationPlan {
    /// 1-based position in the run.
    pub index: usize,
    pub from: Address,
    pub to: Address,
    pub sequence_number: u64,
    #[serde(with = "crate::decimal")]
    pub value: U256,
    #[serde(with = "crate::decimal")]
    pub gas_price: u128,
    pub gas_limit: u64,
    pub payload: Bytes,
    pub effect: PlannedEffect,
}

impl OperationPlan {
    /// Gas cost assumed at plan time: `gas_limit * gas_price`.
    pub fn flat_gas_cost(&self) -> U256 {
        U256::from(self.gas_limit) * U256::from(self.gas_price)
    }
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// What the synchronous submission capability hands back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmationReceipt {
    pub tx_hash: B256,
    pub block_number: Option<u64>,
    pub block_hash: Option<B256>,
    pub gas_used: u64,
    #[serde(with = "crate::decimal")]
    pub effective_gas_price: u128,
    pub success: bool,
}

impl ConfirmationReceipt {
    /// Gas actually paid, priced at the plan's gas price.
    pub fn gas_cost(&self, gas_price: u128) -> U256 {
        U256::from(self.gas_used) * U256::from(gas_price)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    Success,
    Failure,
}

/// Result of submitting one [`OperationPlan`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationOutcome {
    pub plan: OperationPlan,
    pub receipt: Option<ConfirmationReceipt>,
    pub status: OutcomeStatus,
    pub error: Option<String>,
    pub submit_start: DateTime<Utc>,
    pub submit_end: DateTime<Utc>,
    pub duration_ms: u64,
}

impl OperationOutcome {
    pub fn is_success(&self) -> bool {
        self.status == OutcomeStatus::Success
    }

    pub fn index(&self) -> usize {
        self.plan.index
    }
}

// ---------------------------------------------------------------------------
// Reconciliation
// ---------------------------------------------------------------------------

/// When a check was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckPhase {
    /// Right after the operation confirmed.
    Operation,
    /// Once, after every submission and per-operation query has finished.
    Settlement,
}

/// Expected vs actual value of one entity at one point in the run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconciliationRecord {
    /// Index of the operation this check follows; `None` for settlement.
    pub operation: Option<usize>,
    pub phase: CheckPhase,
    pub entity: Entity,
    #[serde(with = "crate::decimal")]
    pub expected: I256,
    #[serde(with = "crate::decimal::option")]
    pub actual: Option<U256>,
    pub matches: bool,
    pub query_duration_ms: u64,
    pub error: Option<String>,
}

impl ReconciliationRecord {
    /// Exact comparison; a failed query never matches.
    pub fn compare(
        operation: Option<usize>,
        phase: CheckPhase,
        entity: Entity,
        expected: I256,
        actual: Result<U256, TallyError>,
        query_duration_ms: u64,
    ) -> Self {
        match actual {
            Ok(actual) => Self {
                operation,
                phase,
                entity,
                expected,
                matches: I256::try_from(actual).is_ok_and(|a| a == expected),
                actual: Some(actual),
                query_duration_ms,
                error: None,
            },
            Err(e) => Self {
                operation,
                phase,
                entity,
                expected,
                actual: None,
                matches: false,
                query_duration_ms,
                error: Some(e.to_string()),
            },
        }
    }

    /// `actual - expected`, when the query succeeded.
    pub fn difference(&self) -> Option<I256> {
        let actual = I256::try_from(self.actual?).ok()?;
        Some(actual.saturating_sub(self.expected))
    }
}

/// A decoded contract event received over a subscription.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractEvent {
    pub name: String,
    #[serde(with = "crate::decimal")]
    pub value: U256,
    pub block_number: Option<u64>,
    pub tx_hash: Option<B256>,
    pub received_at: DateTime<Utc>,
}
