//! JSON-RPC chain client backed by alloy-rs.

use std::time::Duration;

use crate::contract;
use crate::events::{EventSubscription, EVENT_BUFFER};
use crate::ChainClient;
use alloy_eips::BlockId;
use alloy_primitives::{Address, Bytes, TxKind, U256};
use alloy_provider::{DynProvider, Provider, ProviderBuilder};
use alloy_rpc_types::{Filter, Log, TransactionInput, TransactionReceipt, TransactionRequest};
use async_trait::async_trait;
use futures::StreamExt;
use tally_core::{ConfirmationReceipt, ContractEvent, Entity, TallyError, TallyResult};

/// Method that broadcasts and blocks until the receipt is available.
const SEND_RAW_SYNC: &str = "eth_sendRawTransactionSync";

/// How often the log filter is polled for new events.
const EVENT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Talks to an Ethereum JSON-RPC endpoint.
///
/// ```ignore
/// let client = RpcProvider::connect("https://testnet.riselabs.xyz").await?;
/// ```
pub struct RpcProvider {
    provider: DynProvider,
    rpc_url: String,
}

impl RpcProvider {
    pub async fn connect(rpc_url: &str) -> TallyResult<Self> {
        if rpc_url.is_empty() {
            return Err(TallyError::InvalidInput("RPC URL must not be empty".into()));
        }

        let url: url::Url = rpc_url
            .parse()
            .map_err(|e| TallyError::InvalidInput(format!("Invalid RPC URL {rpc_url}: {e}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(TallyError::InvalidInput(format!(
                "Unsupported RPC scheme {}, expected http or https",
                url.scheme()
            )));
        }

        let provider = ProviderBuilder::new()
            .connect(rpc_url)
            .await
            .map_err(|e| TallyError::Provider(format!("Failed to connect to {rpc_url}: {e}")))?;

        tracing::info!(rpc_url, "connected");

        Ok(Self {
            provider: provider.erased(),
            rpc_url: rpc_url.to_string(),
        })
    }

    pub async fn chain_id(&self) -> TallyResult<u64> {
        self.provider
            .get_chain_id()
            .await
            .map_err(|e| TallyError::Provider(format!("Failed to fetch chain id: {e}")))
    }

    async fn read_counter(&self, contract: Address, block: BlockId) -> TallyResult<U256> {
        let call = TransactionRequest {
            to: Some(TxKind::Call(contract)),
            input: TransactionInput::new(contract::number_calldata()),
            ..Default::default()
        };

        let output = self
            .provider
            .call(call)
            .block(block)
            .await
            .map_err(|e| TallyError::Provider(format!("number() on {contract} failed: {e}")))?;

        contract::decode_number(&output)
    }
}

#[async_trait]
impl ChainClient for RpcProvider {
    async fn sequence_number(&self, address: Address, block: BlockId) -> TallyResult<u64> {
        self.provider
            .get_transaction_count(address)
            .block_id(block)
            .await
            .map_err(|e| TallyError::Provider(format!("Failed to fetch nonce of {address}: {e}")))
    }

    async fn entity_state(&self, entity: &Entity, block: BlockId) -> TallyResult<U256> {
        match *entity {
            Entity::Balance(address) => self
                .provider
                .get_balance(address)
                .block_id(block)
                .await
                .map_err(|e| {
                    TallyError::Provider(format!("Failed to fetch balance of {address}: {e}"))
                }),
            Entity::Counter(contract) => self.read_counter(contract, block).await,
        }
    }

    async fn submit_signed(&self, raw: Bytes) -> TallyResult<ConfirmationReceipt> {
        tracing::debug!(rpc_url = %self.rpc_url, bytes = raw.len(), "submitting");

        let receipt: TransactionReceipt = self
            .provider
            .raw_request(SEND_RAW_SYNC.into(), (raw,))
            .await
            .map_err(|e| TallyError::Submission(format!("{SEND_RAW_SYNC} failed: {e}")))?;

        Ok(ConfirmationReceipt {
            tx_hash: receipt.transaction_hash,
            block_number: receipt.block_number,
            block_hash: receipt.block_hash,
            gas_used: receipt.gas_used,
            effective_gas_price: receipt.effective_gas_price,
            success: receipt.status(),
        })
    }

    async fn subscribe_events(&self, contract: Address, event: &str) -> TallyResult<EventSubscription> {
        let signature = contract::event_signature(event)
            .ok_or_else(|| TallyError::InvalidInput(format!("Unsupported event: {event}")))?;

        let filter = Filter::new().address(contract).event_signature(signature);
        let poller = self
            .provider
            .watch_logs(&filter)
            .await
            .map_err(|e| TallyError::Provider(format!("Failed to install log filter: {e}")))?;
        let mut logs = poller.with_poll_interval(EVENT_POLL_INTERVAL).into_stream();

        let (subscription, publisher) = EventSubscription::channel(EVENT_BUFFER);
        let name = event.to_string();

        tracing::info!(%contract, event = %name, "subscribed to contract events");

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = publisher.cancelled() => break,
                    batch = logs.next() => {
                        let Some(batch) = batch else {
                            publisher
                                .publish(Err(TallyError::Provider("log stream ended".into())))
                                .await;
                            break;
                        };
                        for log in batch {
                            if !publisher.publish(decode_event(&name, &log)).await {
                                return;
                            }
                        }
                    }
                }
            }
            tracing::debug!(event = %name, "event subscription closed");
        });

        Ok(subscription)
    }
}

fn decode_event(name: &str, log: &Log) -> TallyResult<ContractEvent> {
    let decoded = log
        .log_decode::<contract::Counter::NewNumber>()
        .map_err(|e| TallyError::Provider(format!("Failed to decode {name} log: {e}")))?;

    Ok(ContractEvent {
        name: name.to_string(),
        value: decoded.inner.data.newNumber,
        block_number: log.block_number,
        tx_hash: log.transaction_hash,
        received_at: chrono::Utc::now(),
    })
}
