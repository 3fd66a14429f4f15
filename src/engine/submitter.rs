use alloy::primitives::{Address, Bytes, TxHash, U256};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::action::{action_type, ActionResult};
use super::binding::WriteCall;
use super::builder::{resolve_chain_id, BuildRequest};
use super::error::{EngineError, EngineResult};
use super::{CompletionPolicy, EngineSettings, PendingCall, StateEngine};
use crate::ethereum::{
    provider::{RemoteNode, SendRequest},
    signer::TransactionSigner,
    utils, RawTransaction, Receipt,
};

/// Pre-encoded transaction to sign and broadcast.
#[derive(Debug, Clone, Default)]
pub struct SubmitRequest {
    pub from: Option<Address>,
    pub to: Option<Address>,
    pub value: Option<U256>,
    pub gas_limit: Option<u64>,
    pub data: Option<Bytes>,
    pub private_key: String,
    pub nonce: Option<u64>,
}

/// Signs, broadcasts and confirms transactions.
#[derive(Clone)]
pub struct TransactionSubmitter {
    node: Arc<dyn RemoteNode>,
    signer: Arc<dyn TransactionSigner>,
    settings: Arc<EngineSettings>,
}

impl TransactionSubmitter {
    pub fn new(
        node: Arc<dyn RemoteNode>,
        signer: Arc<dyn TransactionSigner>,
        settings: Arc<EngineSettings>,
    ) -> Self {
        Self {
            node,
            signer,
            settings,
        }
    }

    /// Resolve gas price and nonce, sign with `private_key` and broadcast.
    pub async fn submit_signed(&self, request: SubmitRequest) -> EngineResult<TxHash> {
        let (Some(from), Some(data)) = (request.from, request.data) else {
            return Err(EngineError::InvalidSubmission(
                "both from and data are required".to_string(),
            ));
        };

        let (gas_price, transaction_count) = tokio::try_join!(
            self.node.gas_price(),
            self.node.transaction_count(from)
        )?;

        let chain_id = resolve_chain_id(self.node.as_ref(), &self.settings).await?;

        let tx = RawTransaction {
            from,
            to: request.to,
            value: request.value.unwrap_or_default(),
            data,
            gas_limit: request.gas_limit.unwrap_or(self.settings.gas_limit),
            nonce: request.nonce.unwrap_or(transaction_count),
            gas_price,
            chain_id: Some(chain_id),
        };

        self.sign_and_broadcast(&tx, &request.private_key).await
    }

    pub async fn sign_and_broadcast(
        &self,
        tx: &RawTransaction,
        private_key: &str,
    ) -> EngineResult<TxHash> {
        let signed = self.signer.sign(tx, private_key).await?;
        let tx_hash = self.node.send_raw_transaction(signed).await.map_err(|e| {
            warn!("Broadcast failed: {}", utils::interpret_rpc_error(&e.to_string()));
            e
        })?;

        info!("Broadcast transaction {:?} with nonce {}", tx_hash, tx.nonce);
        Ok(tx_hash)
    }

    /// Wait one interval, then query the receipt; repeat while the
    /// transaction is unmined. Gives up with `ReceiptTimeout` once the
    /// attempt counter reaches the configured ceiling.
    pub async fn poll_receipt(&self, tx_hash: TxHash, attempt: u32) -> EngineResult<Receipt> {
        let mut attempt = attempt;
        loop {
            if attempt >= self.settings.max_receipt_attempts {
                warn!("No receipt for {:?} after {} attempts", tx_hash, attempt);
                return Err(EngineError::ReceiptTimeout {
                    tx_hash,
                    attempts: attempt,
                });
            }

            tokio::time::sleep(self.settings.receipt_poll_interval).await;

            match self.node.transaction_receipt(tx_hash).await? {
                Some(receipt) => {
                    info!(
                        "Transaction {:?} confirmed in block {:?}",
                        tx_hash, receipt.block_number
                    );
                    return Ok(receipt);
                }
                None => {
                    debug!("Receipt for {:?} not available (attempt {})", tx_hash, attempt);
                    attempt += 1;
                }
            }
        }
    }
}

impl StateEngine {
    /// Send a state-changing transaction to `method` and report its
    /// lifecycle through dispatch: submitted (hash), confirmed (receipt),
    /// then finalized (empty) after the settle delay.
    ///
    /// Only an unknown action type is returned as an error. Every later
    /// failure is dispatched as an error result under the method's type.
    pub async fn send(
        &self,
        method: &str,
        params: Vec<Value>,
        value: Option<U256>,
    ) -> EngineResult<()> {
        let binding = self.binding().await?;
        let label = action_type(method);
        if !binding.registry().has_action_type(&label) {
            return Err(EngineError::MethodNotFound(method.to_string()));
        }

        let pending = PendingCall::new(method, params, binding.address());
        let outcome = self.run_send(&pending, value).await;
        self.complete(CompletionPolicy::DispatchErrors, &pending, outcome)
            .map(|_| ())
    }

    async fn run_send(&self, pending: &PendingCall, value: Option<U256>) -> EngineResult<()> {
        self.ensure_async_capable().await?;
        let binding = self.binding().await?;
        let write = binding.writable(&pending.method, &pending.params)?;

        let tx_hash = self.broadcast(&binding, &write, pending, value).await?;
        (self.dispatch)(pending.action(ActionResult::TxHash(tx_hash)));

        let receipt = self.submitter.poll_receipt(tx_hash, 0).await?;
        (self.dispatch)(pending.action(ActionResult::Receipt(receipt)));

        tokio::time::sleep(self.settings.settle_delay).await;
        (self.dispatch)(pending.action(ActionResult::Empty));
        Ok(())
    }

    /// With a configured key: build, sign locally and broadcast. Otherwise
    /// the node signs with its managed account.
    async fn broadcast(
        &self,
        binding: &super::binding::ContractBinding,
        write: &WriteCall,
        pending: &PendingCall,
        value: Option<U256>,
    ) -> EngineResult<TxHash> {
        let defaults = &self.settings.default_send;

        match &self.settings.private_key {
            Some(private_key) => {
                let request = BuildRequest {
                    from: defaults.from,
                    to: Some(write.to),
                    value,
                    gas_limit: defaults.gas_limit,
                    ..BuildRequest::new(pending.method.clone(), pending.params.clone())
                };
                let tx = self.builder.build(binding, request).await?;
                self.submitter.sign_and_broadcast(&tx, private_key).await
            }
            None => {
                let request = SendRequest {
                    from: defaults.from.or(self.settings.default_account),
                    to: write.to,
                    value: value.unwrap_or_default(),
                    data: write.data.clone(),
                    gas_limit: defaults.gas_limit,
                    gas_price: defaults.gas_price,
                };
                let tx_hash = self.node.send_transaction(request).await?;
                info!("Node accepted {} as {:?}", write.method, tx_hash);
                Ok(tx_hash)
            }
        }
    }
}
