//! CLI for the Tally transaction benchmark.
//!
//! Pipeline: reconcile nonces -> read initial state -> issue -> check each
//! confirmation -> settle -> report.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::{utils::parse_ether, Address, U256};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tally_core::{RunMode, TallyError, TallyResult};
use tally_provider::rpc::RpcProvider;
use tally_provider::{JsonFileNonceStore, LocalSigner};
use tally_runner::sink::json_stream::JsonStreamSink;
use tally_runner::{
    random_recipients, ReportWriter, RunConfig, RunReport, Runner, Scenario, ScenarioKind, SinkTarget,
};

#[derive(Parser, Debug)]
#[command(name = "tally", version, about = "Transaction benchmark with expected-state reconciliation")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Send value from one wallet to fresh random recipients.
    Transfer {
        #[command(flatten)]
        common: CommonArgs,

        #[arg(short = 'n', long, default_value_t = 20)]
        operations: usize,

        /// Amount per transfer, in ether.
        #[arg(long, default_value = "0.0001", value_parser = parse_ether_arg)]
        amount: U256,
    },
    /// Bounce value between two wallets.
    BackAndForth {
        #[command(flatten)]
        common: CommonArgs,

        /// Key of the second wallet.
        #[arg(long, env = "TALLY_ALT_PRIVATE_KEY", hide_env_values = true)]
        alt_private_key: String,

        #[arg(short, long, default_value_t = 3)]
        rounds: usize,

        /// Amount per leg, in ether.
        #[arg(long, default_value = "0.01", value_parser = parse_ether_arg)]
        amount: U256,
    },
    /// Call `increment()` on a Counter contract and follow `NewNumber` events.
    Increment {
        #[command(flatten)]
        common: CommonArgs,

        #[arg(short, long, env = "TALLY_CONTRACT", value_parser = parse_address_arg)]
        contract: Address,

        #[arg(short = 'n', long, default_value_t = 20)]
        operations: usize,

        /// How long to keep listening for trailing events after the last receipt.
        #[arg(long, default_value_t = 2_000)]
        event_grace_ms: u64,
    },
}

#[derive(Args, Debug)]
struct CommonArgs {
    #[arg(short = 'u', long, env = "TALLY_RPC_URL")]
    rpc_url: String,

    #[arg(short = 'k', long, env = "TALLY_PRIVATE_KEY", hide_env_values = true)]
    private_key: String,

    /// Defaults to the scenario's own mode.
    #[arg(short, long, value_enum)]
    mode: Option<ModeArg>,

    /// Wei per gas.
    #[arg(long)]
    gas_price: Option<u128>,

    #[arg(long)]
    gas_limit: Option<u64>,

    #[arg(long, env = "TALLY_NONCE_FILE", default_value = tally_provider::nonce_store::DEFAULT_NONCE_FILE)]
    nonce_file: PathBuf,

    /// Report path. Defaults to `<scenario>-results.json`.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Sink output: "ndjson" writes NDJSON to stdout,
    /// "ndjson:/path/to/file" writes to file.
    #[arg(long)]
    sink: Option<SinkTarget>,

    /// Print the full report as JSON instead of the summary box.
    #[arg(long, default_value_t = false)]
    json: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ModeArg {
    Sequential,
    Parallel,
}

impl From<ModeArg> for RunMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Sequential => RunMode::Sequential,
            ModeArg::Parallel => RunMode::Parallel,
        }
    }
}

impl CommonArgs {
    fn apply(&self, mut config: RunConfig) -> RunConfig {
        if let Some(mode) = self.mode {
            config = config.with_mode(mode.into());
        }
        if let Some(gas_price) = self.gas_price {
            config = config.with_gas_price(gas_price);
        }
        if let Some(gas_limit) = self.gas_limit {
            config = config.with_gas_limit(gas_limit);
        }
        if let Some(output) = &self.output {
            config = config.with_output(output);
        }
        config.with_nonce_file(&self.nonce_file)
    }
}

fn parse_ether_arg(s: &str) -> Result<U256, String> {
    parse_ether(s).map_err(|e| format!("invalid ether amount `{s}`: {e}"))
}

fn parse_address_arg(s: &str) -> Result<Address, String> {
    s.parse().map_err(|e| format!("invalid address `{s}`: {e}"))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let (common, config, alt_key) = match cli.command {
        Commands::Transfer {
            common,
            operations,
            amount,
        } => {
            let config = common.apply(
                RunConfig::transfer()
                    .with_operations(operations)
                    .with_transfer_amount(amount),
            );
            (common, config, None)
        }
        Commands::BackAndForth {
            common,
            alt_private_key,
            rounds,
            amount,
        } => {
            let config = common.apply(
                RunConfig::back_and_forth()
                    .with_rounds(rounds)
                    .with_transfer_amount(amount),
            );
            (common, config, Some(alt_private_key))
        }
        Commands::Increment {
            common,
            contract,
            operations,
            event_grace_ms,
        } => {
            let config = common.apply(
                RunConfig::increment(contract)
                    .with_operations(operations)
                    .with_event_grace(Duration::from_millis(event_grace_ms)),
            );
            (common, config, None)
        }
    };

    // 1. Connect and load keys.
    let provider = RpcProvider::connect(&common.rpc_url).await?;
    let chain_id = provider.chain_id().await?;
    let (signer, sender) = LocalSigner::new(chain_id).with_hex_key(&common.private_key)?;
    let (signer, alt) = match alt_key {
        Some(key) => {
            let (signer, alt) = signer.with_hex_key(&key)?;
            (signer, Some(alt))
        }
        None => (signer, None),
    };

    let scenario = build_scenario(&config, sender, alt)?;
    tracing::info!(
        rpc_url = %common.rpc_url,
        chain_id,
        %sender,
        test_type = %config.test_type(),
        operations = scenario.len(),
        "configured run"
    );

    // 2. Run.
    let store = JsonFileNonceStore::new(&config.nonce_file);
    let runner = Runner::new(Arc::new(provider), Arc::new(signer), store, config.clone());
    let report = runner.run(scenario).await?;

    // 3. Persist.
    ReportWriter::new(&config.output).write(&report)?;

    // 4. Sink output.
    match &common.sink {
        Some(target) => {
            write_sink(target, &report)?;
            // Still print report to stderr so it's visible.
            eprint!("{}", report.render());
        }
        None if common.json => println!("{}", serde_json::to_string_pretty(&report)?),
        None => print!("{}", report.render()),
    }

    if !report.summary.all_matched() {
        tracing::warn!(
            matching = report.summary.matching_records,
            records = report.summary.total_records,
            "expected state diverged from chain"
        );
    }

    Ok(())
}

fn build_scenario(config: &RunConfig, sender: Address, alt: Option<Address>) -> TallyResult<Scenario> {
    match config.scenario {
        ScenarioKind::Transfer => Ok(Scenario::transfer(
            sender,
            &random_recipients(config.operations),
            config.transfer_amount,
            config.gas_limit,
        )),
        ScenarioKind::BackAndForth => {
            let alt = alt.ok_or_else(|| TallyError::InvalidInput("back-and-forth needs a second key".into()))?;
            if alt == sender {
                return Err(TallyError::InvalidInput("both keys belong to the same wallet".into()));
            }
            Ok(Scenario::back_and_forth(
                sender,
                alt,
                config.rounds,
                config.transfer_amount,
                config.gas_limit,
                config.flat_gas_cost(),
            ))
        }
        ScenarioKind::Increment => {
            let contract = config
                .contract
                .ok_or_else(|| TallyError::InvalidInput("increment needs a contract address".into()))?;
            Ok(Scenario::increment(sender, contract, config.operations, config.gas_limit))
        }
    }
}

fn write_sink(target: &SinkTarget, report: &RunReport) -> std::io::Result<()> {
    let (summary, operations) = report.to_rows();
    match target {
        SinkTarget::Stdout => {
            let mut s = JsonStreamSink::stdout();
            s.write_operations(&operations)?;
            s.write_summary(&summary)?;
            let n = s.finish()?;
            tracing::info!(rows = n, "ndjson sink: wrote to stdout");
        }
        SinkTarget::File(path) => {
            let mut s = JsonStreamSink::create(path)?;
            s.write_operations(&operations)?;
            s.write_summary(&summary)?;
            let n = s.finish()?;
            tracing::info!(rows = n, path = %path.display(), "ndjson sink: wrote to file");
        }
    }
    Ok(())
}
