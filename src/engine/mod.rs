//! Contract-state synchronization engine.
//!
//! A [`StateEngine`] binds an interface description to a deployed contract
//! and turns reads, sends and event logs into [`Action`]s handed to a
//! dispatch callback. [`reducer::reduce`] folds those actions into a
//! [`StateTree`].

pub mod action;
pub mod binding;
pub mod builder;
pub mod error;
pub mod events;
pub mod reducer;
pub mod registry;
pub mod submitter;

#[cfg(test)]
pub mod testing;

pub use action::{Action, ActionKind, ActionResult, Dispatch};
pub use binding::{Capability, ContractBinding};
pub use builder::{BuildRequest, TransactionBuilder};
pub use error::{EngineError, EngineResult};
pub use events::{EventSource, EventWatcher, FilterParams, FilterWindow, Subscription};
pub use reducer::{reduce, StateTree, Store, LOGS};
pub use registry::{InterfaceRegistry, MemberKind};
pub use submitter::{SubmitRequest, TransactionSubmitter};

use alloy::primitives::{Address, TxHash};
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::ethereum::{
    abi::{self, InterfaceDescriptor},
    provider::RemoteNode, signer::TransactionSigner, RawTransaction, Receipt,
};

pub const DEFAULT_GAS_LIMIT: u64 = 4_712_388;
pub const DEFAULT_MAX_RECEIPT_ATTEMPTS: u32 = 20_000;

/// Options applied to node-signed sends.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendOptions {
    pub from: Option<Address>,
    pub gas_limit: Option<u64>,
    pub gas_price: Option<u128>,
}

/// Resolved engine options.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub contract_label: String,
    /// Sender used when a request names none.
    pub default_account: Option<Address>,
    pub default_send: SendOptions,
    /// When set, sends are signed locally instead of by the node.
    pub private_key: Option<String>,
    pub origin_block: u64,
    pub gas_limit: u64,
    /// Builds are refused above this network gas price.
    pub max_gas_price: Option<u128>,
    pub chain_id: Option<u64>,
    pub receipt_poll_interval: Duration,
    pub max_receipt_attempts: u32,
    pub settle_delay: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            contract_label: "contract".to_string(),
            default_account: None,
            default_send: SendOptions::default(),
            private_key: None,
            origin_block: 0,
            gas_limit: DEFAULT_GAS_LIMIT,
            max_gas_price: None,
            chain_id: None,
            receipt_poll_interval: Duration::from_secs(1),
            max_receipt_attempts: DEFAULT_MAX_RECEIPT_ATTEMPTS,
            settle_delay: Duration::from_secs(15),
        }
    }
}

/// What happens to a failure once an operation has started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionPolicy {
    /// Dispatch the error as the operation's result; the caller sees `Ok`.
    DispatchErrors,
    /// Return the error to the caller; nothing is dispatched.
    PropagateErrors,
}

/// Bookkeeping for one in-flight call or send.
#[derive(Debug, Clone)]
pub struct PendingCall {
    pub method: String,
    pub params: Vec<Value>,
    pub action_type: String,
    pub contract: Address,
}

impl PendingCall {
    pub fn new(method: &str, params: Vec<Value>, contract: Address) -> Self {
        Self {
            method: method.to_string(),
            params,
            action_type: action::action_type(method),
            contract,
        }
    }

    pub fn action(&self, result: ActionResult) -> Action {
        Action {
            kind: ActionKind::Method(self.action_type.clone()),
            result,
            method: Some(action::result_key(&self.method)),
            contract: Some(self.contract),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentReceipt {
    pub contract_address: Option<Address>,
    pub block_number: Option<u64>,
}

/// Output of a deployment: the interface as JSON text plus its receipt.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentDescriptor {
    #[serde(alias = "interface")]
    pub interface_json: Option<String>,
    #[serde(alias = "txReceipt")]
    pub transaction_receipt: Option<DeploymentReceipt>,
}

#[derive(Clone)]
pub struct StateEngine {
    node: Arc<dyn RemoteNode>,
    settings: Arc<EngineSettings>,
    binding: Arc<RwLock<Option<ContractBinding>>>,
    dispatch: Dispatch,
    builder: TransactionBuilder,
    submitter: TransactionSubmitter,
    events: EventWatcher,
}

impl StateEngine {
    pub fn new(
        node: Arc<dyn RemoteNode>,
        signer: Arc<dyn TransactionSigner>,
        settings: EngineSettings,
        dispatch: Dispatch,
    ) -> Self {
        let settings = Arc::new(settings);
        Self {
            builder: TransactionBuilder::new(node.clone(), settings.clone()),
            submitter: TransactionSubmitter::new(node.clone(), signer, settings.clone()),
            events: EventWatcher::new(node.clone(), dispatch.clone()),
            node,
            settings,
            binding: Arc::new(RwLock::new(None)),
            dispatch,
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Bind `interface` at `address` from the configured origin block,
    /// replacing any previous binding.
    pub async fn bind(
        &self,
        interface: impl Into<InterfaceDescriptor>,
        address: &str,
    ) -> EngineResult<()> {
        self.rebind(interface.into(), address, self.settings.origin_block)
            .await
    }

    async fn rebind(
        &self,
        interface: InterfaceDescriptor,
        address: &str,
        origin_block: u64,
    ) -> EngineResult<()> {
        // Fully built before the swap so readers never see a partial table.
        let mut binding = ContractBinding::bind(interface, address, origin_block)?;
        binding.ensure_async_capable();

        info!(
            "Bound {} at {:?} from block {}",
            self.settings.contract_label,
            binding.address(),
            origin_block
        );
        *self.binding.write().await = Some(binding);
        Ok(())
    }

    /// Snapshot of the current binding.
    pub async fn binding(&self) -> EngineResult<ContractBinding> {
        self.binding
            .read()
            .await
            .clone()
            .ok_or_else(|| EngineError::InvalidBinding("no contract bound".to_string()))
    }

    pub async fn ensure_async_capable(&self) -> EngineResult<usize> {
        let mut guard = self.binding.write().await;
        let binding = guard
            .as_mut()
            .ok_or_else(|| EngineError::InvalidBinding("no contract bound".to_string()))?;
        Ok(binding.ensure_async_capable())
    }

    /// Read `method(params)`, dispatch the decoded result and return it.
    /// Failures go to the caller and are not dispatched.
    pub async fn call(&self, method: &str, params: Vec<Value>) -> EngineResult<Value> {
        let binding = self.binding().await?;
        let pending = PendingCall::new(method, params, binding.address());

        let outcome = self.read(&binding, &pending.method, &pending.params).await;
        let value = self
            .complete(CompletionPolicy::PropagateErrors, &pending, outcome)?
            .unwrap_or(Value::Null);

        (self.dispatch)(pending.action(ActionResult::Value(value.clone())));
        Ok(value)
    }

    async fn read(
        &self,
        binding: &ContractBinding,
        method: &str,
        params: &[Value],
    ) -> EngineResult<Value> {
        let read = binding.readable(method, params)?;
        let output = self
            .node
            .call(read.request(self.settings.default_account))
            .await?;
        read.decode(&output)
    }

    fn complete<T>(
        &self,
        policy: CompletionPolicy,
        pending: &PendingCall,
        outcome: EngineResult<T>,
    ) -> EngineResult<Option<T>> {
        match (outcome, policy) {
            (Ok(value), _) => Ok(Some(value)),
            (Err(error), CompletionPolicy::PropagateErrors) => Err(error),
            (Err(error), CompletionPolicy::DispatchErrors) => {
                tracing::warn!("{} failed: {}", pending.method, error);
                (self.dispatch)(pending.action(ActionResult::Error(Arc::new(error))));
                Ok(None)
            }
        }
    }

    pub async fn build_transaction(&self, request: BuildRequest) -> EngineResult<RawTransaction> {
        let binding = self.binding().await?;
        self.builder.build(&binding, request).await
    }

    pub async fn submit_signed(&self, request: SubmitRequest) -> EngineResult<TxHash> {
        self.submitter.submit_signed(request).await
    }

    pub async fn poll_receipt(&self, tx_hash: TxHash, attempt: u32) -> EngineResult<Receipt> {
        self.submitter.poll_receipt(tx_hash, attempt).await
    }

    fn window_or_default(binding: &ContractBinding, window: Option<FilterWindow>) -> FilterWindow {
        window.unwrap_or(FilterWindow {
            from_block: binding.origin_block(),
            to_block: None,
        })
    }

    /// Live subscription; defaults to every event from the origin block.
    pub async fn watch(
        &self,
        params: FilterParams,
        window: Option<FilterWindow>,
        source: EventSource,
    ) -> EngineResult<Subscription> {
        let binding = self.binding().await?;
        let window = Self::window_or_default(&binding, window);
        self.events.watch(&binding, &params, window, source).await
    }

    /// One-shot windowed fetch. Failures are dispatched as `LOG_ERROR`.
    pub async fn fetch_window(
        &self,
        params: FilterParams,
        window: Option<FilterWindow>,
        source: EventSource,
    ) -> EngineResult<usize> {
        let binding = self.binding().await?;
        let window = Self::window_or_default(&binding, window);
        Ok(self.events.fetch_window(&binding, &params, window, source).await)
    }

    /// Every zero-input read-only member, read concurrently.
    pub async fn read_full_state(&self) -> EngineResult<Map<String, Value>> {
        let binding = self.binding().await?;
        let names = binding.zero_input_reads();
        debug!("Reading {} zero-input members", names.len());

        let values = try_join_all(names.iter().map(|name| self.read(&binding, name, &[]))).await?;
        Ok(names.into_iter().zip(values).collect())
    }

    pub async fn initialize_from_deployment(
        &self,
        descriptor: DeploymentDescriptor,
    ) -> EngineResult<()> {
        let (Some(interface_json), Some(receipt)) =
            (descriptor.interface_json, descriptor.transaction_receipt)
        else {
            return Err(EngineError::InvalidDeploymentDescriptor(
                "interface and transaction receipt are both required".to_string(),
            ));
        };
        let address = receipt.contract_address.ok_or_else(|| {
            EngineError::InvalidDeploymentDescriptor(
                "receipt carries no contract address".to_string(),
            )
        })?;
        let interface = abi::parse_interface(&interface_json)
            .map_err(|e| EngineError::InvalidDeploymentDescriptor(e.to_string()))?;

        self.rebind(
            interface,
            &address.to_checksum(None),
            receipt.block_number.unwrap_or_default(),
        )
        .await
    }

    /// Dispatch one `INIT_STATE` snapshot: an empty entry per function, an
    /// empty log list per event, overlaid with the zero-input reads.
    pub async fn initialize_state(&self) -> EngineResult<Value> {
        let binding = self.binding().await?;

        let mut snapshot = Map::new();
        let mut logs = Map::new();
        for member in binding.registry().members() {
            match member.kind {
                MemberKind::Function => {
                    snapshot.insert(member.name.clone(), Value::Object(Map::new()));
                }
                MemberKind::Event => {
                    logs.insert(member.name.clone(), Value::Array(Vec::new()));
                }
            }
        }
        snapshot.insert(LOGS.to_string(), Value::Object(logs));
        snapshot.extend(self.read_full_state().await?);

        let snapshot = Value::Object(snapshot);
        (self.dispatch)(Action {
            kind: ActionKind::InitState,
            result: ActionResult::Snapshot(snapshot.clone()),
            method: None,
            contract: Some(binding.address()),
        });
        Ok(snapshot)
    }
}
