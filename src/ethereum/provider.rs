use crate::config::NetworkConfig;
use alloy::{
    network::{ReceiptResponse, TransactionBuilder},
    primitives::{Address, Bytes, TxHash, U256},
    providers::{Provider, ProviderBuilder, RootProvider},
    rpc::types::{Filter, Log, TransactionReceipt, TransactionRequest},
    transports::http::{Client, Http},
};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};

use super::{utils, RawLog, Receipt};

/// A read-only contract call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRequest {
    pub from: Option<Address>,
    pub to: Address,
    pub data: Bytes,
}

/// A transaction the node signs with one of its own managed accounts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendRequest {
    pub from: Option<Address>,
    pub to: Address,
    pub value: U256,
    pub data: Bytes,
    pub gas_limit: Option<u64>,
    pub gas_price: Option<u128>,
}

/// Everything the engine needs from a remote node. Wire encoding is the
/// implementor's business.
#[async_trait]
pub trait RemoteNode: Send + Sync {
    async fn accounts(&self) -> Result<Vec<Address>>;

    async fn chain_id(&self) -> Result<u64>;

    async fn gas_price(&self) -> Result<u128>;

    async fn transaction_count(&self, account: Address) -> Result<u64>;

    /// `None` until the transaction is mined.
    async fn transaction_receipt(&self, tx_hash: TxHash) -> Result<Option<Receipt>>;

    async fn send_raw_transaction(&self, signed: Bytes) -> Result<TxHash>;

    async fn send_transaction(&self, request: SendRequest) -> Result<TxHash>;

    async fn call(&self, request: CallRequest) -> Result<Bytes>;

    /// One-shot query over the filter's block window.
    async fn logs(&self, filter: &Filter) -> Result<Vec<RawLog>>;

    /// Live subscription yielding batches of newly matched logs.
    async fn watch_logs(&self, filter: &Filter) -> Result<BoxStream<'static, Vec<RawLog>>>;
}

/// `RemoteNode` backed by an alloy HTTP provider.
#[derive(Debug, Clone)]
pub struct AlloyNode {
    provider: RootProvider<Http<Client>>,
}

impl AlloyNode {
    pub fn connect(rpc_url: &str) -> Result<Self> {
        let url = rpc_url
            .parse()
            .map_err(|e| anyhow!("Invalid RPC URL '{}': {}", rpc_url, e))?;
        let provider = ProviderBuilder::new().on_http(url);

        Ok(Self { provider })
    }

    pub fn from_network(network_config: &NetworkConfig) -> Result<Self> {
        Self::connect(&network_config.rpc_url)
    }

    /// Validates network connectivity with detailed error information
    pub async fn validate_connection(&self, network_name: &str) -> Result<u64> {
        match self.provider.get_block_number().await {
            Ok(block) => {
                tracing::debug!("Connected to {} at block {}", network_name, block);
                Ok(block)
            }
            Err(e) => Err(anyhow!(
                "Cannot connect to network '{}': {}. Check the RPC endpoint configuration.",
                network_name,
                utils::interpret_rpc_error(&e.to_string())
            )),
        }
    }
}

fn raw_log(log: Log) -> RawLog {
    RawLog {
        address: log.address(),
        topics: log.topics().to_vec(),
        data: log.data().data.clone(),
        transaction_hash: log.transaction_hash,
        block_number: log.block_number,
    }
}

fn receipt(receipt: TransactionReceipt) -> Receipt {
    Receipt {
        transaction_hash: receipt.transaction_hash,
        block_number: receipt.block_number,
        contract_address: receipt.contract_address,
        gas_used: receipt.gas_used as u64,
        status: receipt.status(),
    }
}

#[async_trait]
impl RemoteNode for AlloyNode {
    async fn accounts(&self) -> Result<Vec<Address>> {
        Ok(self.provider.get_accounts().await?)
    }

    async fn chain_id(&self) -> Result<u64> {
        Ok(self.provider.get_chain_id().await?)
    }

    async fn gas_price(&self) -> Result<u128> {
        Ok(self.provider.get_gas_price().await?)
    }

    async fn transaction_count(&self, account: Address) -> Result<u64> {
        Ok(self.provider.get_transaction_count(account).await?)
    }

    async fn transaction_receipt(&self, tx_hash: TxHash) -> Result<Option<Receipt>> {
        let found = self.provider.get_transaction_receipt(tx_hash).await?;
        Ok(found.map(receipt))
    }

    async fn send_raw_transaction(&self, signed: Bytes) -> Result<TxHash> {
        let pending = self.provider.send_raw_transaction(&signed).await?;
        Ok(*pending.tx_hash())
    }

    async fn send_transaction(&self, request: SendRequest) -> Result<TxHash> {
        let mut tx = TransactionRequest::default()
            .with_to(request.to)
            .with_value(request.value)
            .with_input(request.data);
        if let Some(from) = request.from {
            tx = tx.with_from(from);
        }
        if let Some(gas_limit) = request.gas_limit {
            tx = tx.with_gas_limit(gas_limit);
        }
        if let Some(gas_price) = request.gas_price {
            tx = tx.with_gas_price(gas_price);
        }

        let pending = self.provider.send_transaction(tx).await?;
        Ok(*pending.tx_hash())
    }

    async fn call(&self, request: CallRequest) -> Result<Bytes> {
        let mut tx = TransactionRequest::default()
            .with_to(request.to)
            .with_input(request.data);
        if let Some(from) = request.from {
            tx = tx.with_from(from);
        }

        Ok(self.provider.call(&tx).await?)
    }

    async fn logs(&self, filter: &Filter) -> Result<Vec<RawLog>> {
        let logs = self.provider.get_logs(filter).await?;
        Ok(logs.into_iter().map(raw_log).collect())
    }

    async fn watch_logs(&self, filter: &Filter) -> Result<BoxStream<'static, Vec<RawLog>>> {
        let poller = self.provider.watch_logs(filter).await?;
        Ok(poller
            .into_stream()
            .map(|logs| logs.into_iter().map(raw_log).collect())
            .boxed())
    }
}
