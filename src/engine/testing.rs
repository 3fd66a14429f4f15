//! Scripted collaborators shared by the engine tests.

use alloy::{
    dyn_abi::DynSolValue,
    json_abi::JsonAbi,
    primitives::{Address, Bytes, FixedBytes, TxHash, B256, U256},
    rpc::types::Filter,
};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures::channel::mpsc as stream_channel;
use futures::stream::{BoxStream, StreamExt};
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use super::action::{Action, Dispatch};
use crate::ethereum::{
    abi::InterfaceDescriptor,
    provider::{CallRequest, RemoteNode, SendRequest},
    signer::TransactionSigner,
    RawLog, RawTransaction, Receipt,
};

pub const TOKEN: &str = "0x742d35Cc6435C9c1c72c5E7b18BaB7e1DB7a5d6e";

pub fn token_abi() -> JsonAbi {
    serde_json::from_value(json!([
        {"type": "function", "name": "balanceOf", "stateMutability": "view",
         "inputs": [{"name": "owner", "type": "address"}],
         "outputs": [{"name": "", "type": "uint256"}]},
        {"type": "function", "name": "decimals", "stateMutability": "view",
         "inputs": [], "outputs": [{"name": "", "type": "uint8"}]},
        {"type": "function", "name": "totalSupply", "stateMutability": "view",
         "inputs": [], "outputs": [{"name": "", "type": "uint256"}]},
        {"type": "function", "name": "transfer", "stateMutability": "nonpayable",
         "inputs": [{"name": "to", "type": "address"}, {"name": "value", "type": "uint256"}],
         "outputs": [{"name": "", "type": "bool"}]},
        {"type": "function", "name": "transferFrom", "stateMutability": "nonpayable",
         "inputs": [{"name": "from", "type": "address"}, {"name": "to", "type": "address"},
                    {"name": "value", "type": "uint256"}],
         "outputs": [{"name": "", "type": "bool"}]},
        {"type": "event", "name": "Transfer", "anonymous": false,
         "inputs": [{"name": "from", "type": "address", "indexed": true},
                    {"name": "to", "type": "address", "indexed": true},
                    {"name": "value", "type": "uint256", "indexed": false}]}
    ]))
    .unwrap()
}

/// `foo(uint256)` state-changing, declared before a read-only `foo()`.
pub fn mixed_abi() -> InterfaceDescriptor {
    InterfaceDescriptor::from_value(json!([
        {"type": "function", "name": "foo", "stateMutability": "nonpayable",
         "inputs": [{"name": "x", "type": "uint256"}], "outputs": []},
        {"type": "function", "name": "foo", "stateMutability": "view",
         "inputs": [], "outputs": [{"name": "", "type": "uint256"}]}
    ]))
    .unwrap()
}

pub fn selector(abi: &JsonAbi, name: &str) -> FixedBytes<4> {
    abi.function(name).unwrap()[0].selector()
}

pub fn uint_output(value: u64) -> Bytes {
    DynSolValue::Uint(U256::from(value), 256).abi_encode().into()
}

pub fn transfer_log(abi: &JsonAbi, tx_hash: B256, value: u64) -> RawLog {
    let event = &abi.event("Transfer").unwrap()[0];
    RawLog {
        address: TOKEN.parse().unwrap(),
        topics: vec![
            event.selector(),
            Address::repeat_byte(0x11).into_word(),
            Address::repeat_byte(0x22).into_word(),
        ],
        data: uint_output(value),
        transaction_hash: Some(tx_hash),
        block_number: Some(1),
    }
}

pub fn receipt(tx_hash: TxHash) -> Receipt {
    Receipt {
        transaction_hash: tx_hash,
        block_number: Some(100),
        contract_address: None,
        gas_used: 21_000,
        status: true,
    }
}

/// Dispatch that records every action.
pub fn recorder() -> (Dispatch, Arc<Mutex<Vec<Action>>>) {
    let actions = Arc::new(Mutex::new(Vec::new()));
    let sink = actions.clone();
    let dispatch: Dispatch = Arc::new(move |action| sink.lock().unwrap().push(action));
    (dispatch, actions)
}

#[derive(Default)]
pub struct MockNode {
    accounts: Vec<Address>,
    gas_price: u128,
    transaction_count: u64,
    gas_price_error: Option<String>,
    logs_error: Option<String>,
    watch_error: Option<String>,
    broadcast_error: Option<String>,
    /// Receipt answers, front first; an empty queue means "not mined".
    receipts: Mutex<VecDeque<Option<Receipt>>>,
    call_results: HashMap<FixedBytes<4>, Bytes>,
    logs: Vec<RawLog>,
    live: Mutex<Option<stream_channel::UnboundedReceiver<Vec<RawLog>>>>,
    gas_price_queries: AtomicU32,
    receipt_queries: AtomicU32,
    pub calls: Mutex<Vec<CallRequest>>,
    pub sent: Mutex<Vec<SendRequest>>,
    pub raw: Mutex<Vec<Bytes>>,
    pub filters: Mutex<Vec<Filter>>,
}

impl MockNode {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_accounts(mut self, accounts: Vec<Address>) -> Self {
        self.accounts = accounts;
        self
    }

    pub fn with_gas_price(mut self, gas_price: u128) -> Self {
        self.gas_price = gas_price;
        self
    }

    pub fn with_transaction_count(mut self, count: u64) -> Self {
        self.transaction_count = count;
        self
    }

    pub fn failing_gas_price(mut self, message: &str) -> Self {
        self.gas_price_error = Some(message.to_string());
        self
    }

    pub fn failing_logs(mut self, message: &str) -> Self {
        self.logs_error = Some(message.to_string());
        self
    }

    pub fn failing_watch(mut self, message: &str) -> Self {
        self.watch_error = Some(message.to_string());
        self
    }

    pub fn failing_broadcast(mut self, message: &str) -> Self {
        self.broadcast_error = Some(message.to_string());
        self
    }

    /// Answer "not mined" `pending` times, then `receipt`.
    pub fn with_receipt_after(self, pending: usize, receipt: Receipt) -> Self {
        {
            let mut receipts = self.receipts.lock().unwrap();
            receipts.extend(std::iter::repeat(None).take(pending));
            receipts.push_back(Some(receipt));
        }
        self
    }

    pub fn with_call_result(mut self, selector: FixedBytes<4>, output: Bytes) -> Self {
        self.call_results.insert(selector, output);
        self
    }

    pub fn with_logs(mut self, logs: Vec<RawLog>) -> Self {
        self.logs = logs;
        self
    }

    /// Returns the sender feeding the next `watch_logs` stream.
    pub fn live_feed(&self) -> stream_channel::UnboundedSender<Vec<RawLog>> {
        let (tx, rx) = stream_channel::unbounded();
        *self.live.lock().unwrap() = Some(rx);
        tx
    }

    pub fn gas_price_queries(&self) -> u32 {
        self.gas_price_queries.load(Ordering::SeqCst)
    }

    pub fn receipt_queries(&self) -> u32 {
        self.receipt_queries.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteNode for MockNode {
    async fn accounts(&self) -> Result<Vec<Address>> {
        Ok(self.accounts.clone())
    }

    async fn chain_id(&self) -> Result<u64> {
        Ok(31337)
    }

    async fn gas_price(&self) -> Result<u128> {
        self.gas_price_queries.fetch_add(1, Ordering::SeqCst);
        match &self.gas_price_error {
            Some(message) => Err(anyhow!("{}", message)),
            None => Ok(self.gas_price),
        }
    }

    async fn transaction_count(&self, _account: Address) -> Result<u64> {
        Ok(self.transaction_count)
    }

    async fn transaction_receipt(&self, _tx_hash: TxHash) -> Result<Option<Receipt>> {
        self.receipt_queries.fetch_add(1, Ordering::SeqCst);
        Ok(self.receipts.lock().unwrap().pop_front().flatten())
    }

    async fn send_raw_transaction(&self, signed: Bytes) -> Result<TxHash> {
        if let Some(message) = &self.broadcast_error {
            return Err(anyhow!("{}", message));
        }
        self.raw.lock().unwrap().push(signed);
        Ok(B256::repeat_byte(0xee))
    }

    async fn send_transaction(&self, request: SendRequest) -> Result<TxHash> {
        if let Some(message) = &self.broadcast_error {
            return Err(anyhow!("{}", message));
        }
        self.sent.lock().unwrap().push(request);
        Ok(B256::repeat_byte(0xdd))
    }

    async fn call(&self, request: CallRequest) -> Result<Bytes> {
        let selector = FixedBytes::<4>::from_slice(&request.data[..4]);
        self.calls.lock().unwrap().push(request);
        self.call_results
            .get(&selector)
            .cloned()
            .ok_or_else(|| anyhow!("execution reverted"))
    }

    async fn logs(&self, filter: &Filter) -> Result<Vec<RawLog>> {
        self.filters.lock().unwrap().push(filter.clone());
        match &self.logs_error {
            Some(message) => Err(anyhow!("{}", message)),
            None => Ok(self.logs.clone()),
        }
    }

    async fn watch_logs(&self, filter: &Filter) -> Result<BoxStream<'static, Vec<RawLog>>> {
        self.filters.lock().unwrap().push(filter.clone());
        if let Some(message) = &self.watch_error {
            return Err(anyhow!("{}", message));
        }
        let rx = self
            .live
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| anyhow!("no live feed"))?;
        Ok(rx.boxed())
    }
}

/// Signs by echoing the nonce.
pub struct MockSigner;

#[async_trait]
impl TransactionSigner for MockSigner {
    async fn sign(&self, tx: &RawTransaction, private_key: &str) -> Result<Bytes> {
        Ok(Bytes::from(format!("{}:{}", private_key, tx.nonce).into_bytes()))
    }
}
