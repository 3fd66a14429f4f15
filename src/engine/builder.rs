use alloy::primitives::{Address, U256};
use serde_json::Value;
use std::sync::Arc;

use super::binding::ContractBinding;
use super::error::{EngineError, EngineResult};
use super::EngineSettings;
use crate::ethereum::{provider::RemoteNode, RawTransaction};

/// Caller intent for a raw transaction. Unset fields fall back to the
/// engine's configured defaults.
#[derive(Debug, Clone, Default)]
pub struct BuildRequest {
    pub from: Option<Address>,
    pub to: Option<Address>,
    pub value: Option<U256>,
    pub gas_limit: Option<u64>,
    pub method: String,
    pub params: Option<Vec<Value>>,
    pub nonce: Option<u64>,
}

impl BuildRequest {
    pub fn new(method: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            method: method.into(),
            params: Some(params),
            ..Default::default()
        }
    }
}

/// Configured chain id, else the node's.
pub(crate) async fn resolve_chain_id(
    node: &dyn RemoteNode,
    settings: &EngineSettings,
) -> EngineResult<u64> {
    match settings.chain_id {
        Some(chain_id) => Ok(chain_id),
        None => Ok(node.chain_id().await?),
    }
}

/// Assembles unsigned transactions from caller intent plus fresh network
/// parameters. Never signs or broadcasts.
#[derive(Clone)]
pub struct TransactionBuilder {
    node: Arc<dyn RemoteNode>,
    settings: Arc<EngineSettings>,
}

impl TransactionBuilder {
    pub fn new(node: Arc<dyn RemoteNode>, settings: Arc<EngineSettings>) -> Self {
        Self { node, settings }
    }

    pub async fn build(
        &self,
        binding: &ContractBinding,
        request: BuildRequest,
    ) -> EngineResult<RawTransaction> {
        let data = binding.encode(&request.method, request.params.as_deref())?;
        let from = self.sender(request.from).await?;

        let (gas_price, transaction_count) = tokio::try_join!(
            self.node.gas_price(),
            self.node.transaction_count(from)
        )?;
        if let Some(max_gas_price) = self.settings.max_gas_price {
            if gas_price > max_gas_price {
                return Err(EngineError::InvalidSubmission(format!(
                    "gas price {} exceeds the configured maximum {}",
                    gas_price, max_gas_price
                )));
            }
        }
        let nonce = request.nonce.unwrap_or(transaction_count);
        let chain_id = resolve_chain_id(self.node.as_ref(), &self.settings).await?;

        tracing::debug!(
            "Built {} transaction from {:?} with nonce {} at gas price {}",
            request.method,
            from,
            nonce,
            gas_price
        );

        Ok(RawTransaction {
            from,
            to: Some(request.to.unwrap_or_else(|| binding.address())),
            value: request.value.unwrap_or_default(),
            data,
            gas_limit: request.gas_limit.unwrap_or(self.settings.gas_limit),
            nonce,
            gas_price,
            chain_id: Some(chain_id),
        })
    }

    /// Explicit sender, else the configured default account, else the
    /// node's first account.
    pub async fn sender(&self, from: Option<Address>) -> EngineResult<Address> {
        if let Some(from) = from.or(self.settings.default_account) {
            return Ok(from);
        }
        self.node
            .accounts()
            .await?
            .first()
            .copied()
            .ok_or_else(|| EngineError::InvalidSubmission("no sender account available".into()))
    }
}
