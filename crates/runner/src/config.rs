//! Run configuration.

use std::path::PathBuf;
use std::time::Duration;

use alloy_eips::BlockId;
use alloy_primitives::{utils::format_ether, Address, U256};
use serde::{Deserialize, Serialize};
use tally_core::RunMode;

use crate::scenario::ScenarioKind;

/// Gas limit of a plain value transfer.
pub const TRANSFER_GAS_LIMIT: u64 = 21_000;

/// Gas limit used for counter calls.
pub const CALL_GAS_LIMIT: u64 = 10_000_000;

/// Parameters of one benchmark run. Read once at startup.
#[derive(Clone, Debug)]
pub struct RunConfig {
    pub scenario: ScenarioKind,
    pub mode: RunMode,
    /// Operations for transfer/increment runs.
    pub operations: usize,
    /// Round trips for back-and-forth runs (two operations each).
    pub rounds: usize,
    /// Wei moved per transfer.
    pub transfer_amount: U256,
    /// Wei per gas, applied to every operation.
    pub gas_price: u128,
    pub gas_limit: u64,
    pub contract: Option<Address>,
    /// Block tag for nonce and state reads.
    pub block: BlockId,
    /// Grace period for trailing events before the subscription is cancelled.
    pub event_grace: Duration,
    pub nonce_file: PathBuf,
    pub output: PathBuf,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            scenario: ScenarioKind::Transfer,
            mode: RunMode::Parallel,
            operations: 20,
            rounds: 3,
            // 0.0001 ETH
            transfer_amount: U256::from(100_000_000_000_000u64),
            gas_price: 100,
            gas_limit: TRANSFER_GAS_LIMIT,
            contract: None,
            block: BlockId::pending(),
            event_grace: Duration::from_secs(2),
            nonce_file: PathBuf::from(tally_provider::nonce_store::DEFAULT_NONCE_FILE),
            output: PathBuf::from("eth-transfer-results.json"),
        }
    }
}

impl RunConfig {
    /// Parallel fan-out of plain transfers to fresh recipients.
    pub fn transfer() -> Self {
        Self::default()
    }

    /// Sequential ping-pong between two wallets.
    pub fn back_and_forth() -> Self {
        Self {
            scenario: ScenarioKind::BackAndForth,
            mode: RunMode::Sequential,
            // 0.01 ETH
            transfer_amount: U256::from(10_000_000_000_000_000u64),
            output: PathBuf::from("eth-back-and-forth-results.json"),
            ..Self::default()
        }
    }

    /// Sequential `increment()` calls on a counter contract.
    pub fn increment(contract: Address) -> Self {
        Self {
            scenario: ScenarioKind::Increment,
            mode: RunMode::Sequential,
            transfer_amount: U256::ZERO,
            gas_price: 114,
            gas_limit: CALL_GAS_LIMIT,
            contract: Some(contract),
            output: PathBuf::from("counter-increment-results.json"),
            ..Self::default()
        }
    }

    pub fn with_mode(mut self, mode: RunMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_operations(mut self, n: usize) -> Self {
        self.operations = n;
        self
    }

    pub fn with_rounds(mut self, n: usize) -> Self {
        self.rounds = n;
        self
    }

    pub fn with_transfer_amount(mut self, amount: U256) -> Self {
        self.transfer_amount = amount;
        self
    }

    pub fn with_gas_price(mut self, gas_price: u128) -> Self {
        self.gas_price = gas_price;
        self
    }

    pub fn with_gas_limit(mut self, gas_limit: u64) -> Self {
        self.gas_limit = gas_limit;
        self
    }

    pub fn with_event_grace(mut self, grace: Duration) -> Self {
        self.event_grace = grace;
        self
    }

    pub fn with_nonce_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.nonce_file = path.into();
        self
    }

    pub fn with_output(mut self, path: impl Into<PathBuf>) -> Self {
        self.output = path.into();
        self
    }

    /// Gas cost assumed per operation before receipts arrive.
    pub fn flat_gas_cost(&self) -> U256 {
        U256::from(self.gas_limit) * U256::from(self.gas_price)
    }

    /// Report label, e.g. `parallel-eth-transfer`.
    pub fn test_type(&self) -> String {
        format!("{}-{}", self.mode, self.scenario.label())
    }

    /// Parameters echoed into the report; numbers as decimal strings.
    pub fn echo(&self) -> Configuration {
        let planned = match self.scenario {
            ScenarioKind::BackAndForth => self.rounds * 2,
            _ => self.operations,
        };
        Configuration {
            scenario: self.scenario.label().to_string(),
            mode: self.mode,
            num_operations: planned.to_string(),
            rounds: matches!(self.scenario, ScenarioKind::BackAndForth)
                .then(|| self.rounds.to_string()),
            transfer_amount: self.transfer_amount.to_string(),
            transfer_amount_ether: format_ether(self.transfer_amount),
            gas_price: self.gas_price.to_string(),
            gas_limit: self.gas_limit.to_string(),
            contract_address: self.contract,
        }
    }
}

/// Echo of the run parameters as stored in the report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Configuration {
    pub scenario: String,
    pub mode: RunMode,
    pub num_operations: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub rounds: Option<String>,
    pub transfer_amount: String,
    pub transfer_amount_ether: String,
    pub gas_price: String,
    pub gas_limit: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub contract_address: Option<Address>,
}

impl Configuration {
    /// Planned operation count, if the echoed value is a valid number.
    pub fn planned_operations(&self) -> Option<usize> {
        self.num_operations.parse().ok()
    }
}
