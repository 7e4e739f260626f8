//! E2E tests: require a live RPC endpoint and a funded key.
//!
//! Run: `RPC_URL=http://... PRIVATE_KEY=0x... cargo test -p tally-runner -- --ignored`

use std::sync::Arc;

use tally_core::{Entity, MemoryNonceStore, RunMode};
use tally_provider::rpc::RpcProvider;
use tally_provider::{ChainClient, LocalSigner};
use tally_runner::{random_recipients, RunConfig, Runner, Scenario, TRANSFER_GAS_LIMIT};

async fn connect() -> (Arc<RpcProvider>, LocalSigner, alloy_primitives::Address) {
    let rpc_url = std::env::var("RPC_URL").expect("Set RPC_URL to run E2E tests");
    let key = std::env::var("PRIVATE_KEY").expect("Set PRIVATE_KEY to run E2E tests");

    let provider = RpcProvider::connect(&rpc_url).await.expect("Failed to connect");
    let chain_id = provider.chain_id().await.expect("Failed to read chain id");
    let (signer, sender) = LocalSigner::new(chain_id)
        .with_hex_key(&key)
        .expect("Invalid PRIVATE_KEY");
    (Arc::new(provider), signer, sender)
}

#[tokio::test]
#[ignore]
async fn reads_sender_state() {
    let (provider, _, sender) = connect().await;
    let config = RunConfig::default();

    let nonce = provider.sequence_number(sender, config.block).await.expect("nonce read");
    let balance = provider
        .entity_state(&Entity::Balance(sender), config.block)
        .await
        .expect("balance read");

    eprintln!("[e2e] {sender}: nonce {nonce}, balance {balance} wei");
    assert!(!balance.is_zero(), "PRIVATE_KEY account must be funded");
}

#[tokio::test]
#[ignore]
async fn sequential_transfers_reconcile() {
    let (provider, signer, sender) = connect().await;
    let config = RunConfig::transfer()
        .with_mode(RunMode::Sequential)
        .with_operations(3);

    let scenario = Scenario::transfer(
        sender,
        &random_recipients(config.operations),
        config.transfer_amount,
        TRANSFER_GAS_LIMIT,
    );
    let runner = Runner::new(provider, Arc::new(signer), MemoryNonceStore::new(), config);
    let report = runner.run(scenario).await.expect("run failed");

    eprintln!("{}", report.render());
    assert_eq!(report.summary.successful, 3);
    assert_eq!(report.summary.matching_records, report.summary.total_records);
}
