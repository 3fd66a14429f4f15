//! Event log ingestion: live subscriptions and one-shot windowed fetches.

use alloy::{
    dyn_abi::Specifier,
    json_abi::JsonAbi,
    primitives::{Address, B256},
    rpc::types::Filter,
};
use futures::stream::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::action::{Action, ActionKind, ActionResult, Dispatch};
use super::binding::ContractBinding;
use super::error::{EngineError, EngineResult};
use crate::ethereum::{codec, provider::RemoteNode, LogEntry, RawLog};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum EventSource {
    #[default]
    All,
    Named(String),
}

impl EventSource {
    pub fn from_name(name: Option<&str>) -> Self {
        match name {
            Some(name) => EventSource::Named(name.to_string()),
            None => EventSource::All,
        }
    }

    fn admits(&self, event_name: &str) -> bool {
        match self {
            EventSource::All => true,
            EventSource::Named(name) => name == event_name,
        }
    }
}

/// Values to match against indexed event parameters, by parameter name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterParams {
    #[serde(default)]
    pub indexed: BTreeMap<String, Value>,
}

/// Inclusive block range; an open end means "latest".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FilterWindow {
    pub from_block: u64,
    pub to_block: Option<u64>,
}

/// Build the node-side filter for `source` over `window`.
pub fn build_filter(
    binding: &ContractBinding,
    params: &FilterParams,
    window: FilterWindow,
    source: &EventSource,
) -> EngineResult<Filter> {
    let mut filter = binding.event_filter().clone().from_block(window.from_block);
    if let Some(to_block) = window.to_block {
        filter = filter.to_block(to_block);
    }

    let name = match source {
        EventSource::All => {
            if !params.indexed.is_empty() {
                warn!("Indexed filter values are ignored without an event name");
            }
            return Ok(filter);
        }
        EventSource::Named(name) => name,
    };

    let event = binding
        .abi()
        .event(name)
        .and_then(|overloads| overloads.first())
        .ok_or_else(|| EngineError::MethodNotFound(name.clone()))?;
    filter = filter.event_signature(event.selector());

    for (position, input) in event.inputs.iter().filter(|i| i.indexed).enumerate() {
        let Some(value) = params.indexed.get(&input.name) else {
            continue;
        };
        let ty = input
            .resolve()
            .map_err(|e| EngineError::Encoding(e.to_string()))?;
        let topic: B256 = codec::json_to_sol_value(value, &ty)
            .map_err(|e| EngineError::Encoding(e.to_string()))?
            .as_word()
            .ok_or_else(|| {
                EngineError::Encoding(format!("{} cannot be matched as a topic", input.name))
            })?;

        filter = match position {
            0 => filter.topic1(topic),
            1 => filter.topic2(topic),
            _ => filter.topic3(topic),
        };
    }

    Ok(filter)
}

/// Decode `log` into a `LOG` action, `None` when the interface doesn't
/// declare it or `source` excludes it.
fn log_action(abi: &JsonAbi, source: &EventSource, log: &RawLog) -> EngineResult<Option<Action>> {
    let Some((event_name, args)) =
        codec::decode_event(abi, log).map_err(|e| EngineError::Encoding(e.to_string()))?
    else {
        return Ok(None);
    };
    if !source.admits(&event_name) {
        return Ok(None);
    }

    let transaction_hash = log
        .transaction_hash
        .map(|hash| format!("{:#x}", hash))
        .unwrap_or_default();

    Ok(Some(Action {
        kind: ActionKind::Log,
        method: Some(event_name.clone()),
        contract: Some(log.address),
        result: ActionResult::Log(LogEntry {
            event_name,
            transaction_hash,
            args,
        }),
    }))
}

fn log_error(contract: Address, error: EngineError) -> Action {
    Action {
        kind: ActionKind::LogError,
        result: ActionResult::Error(Arc::new(error)),
        method: None,
        contract: Some(contract),
    }
}

/// Handle to a running live subscription.
#[derive(Debug)]
pub struct Subscription {
    handle: JoinHandle<()>,
}

impl Subscription {
    pub fn abort(&self) {
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the underlying stream to end.
    pub async fn join(self) {
        if let Err(e) = self.handle.await {
            if !e.is_cancelled() {
                warn!("Event subscription task failed: {}", e);
            }
        }
    }
}

#[derive(Clone)]
pub struct EventWatcher {
    node: Arc<dyn RemoteNode>,
    dispatch: Dispatch,
}

impl EventWatcher {
    pub fn new(node: Arc<dyn RemoteNode>, dispatch: Dispatch) -> Self {
        Self { node, dispatch }
    }

    /// Start a live subscription. Setup failures are returned; once running,
    /// every delivered event is dispatched as a `LOG` action.
    pub async fn watch(
        &self,
        binding: &ContractBinding,
        params: &FilterParams,
        window: FilterWindow,
        source: EventSource,
    ) -> EngineResult<Subscription> {
        let filter = build_filter(binding, params, window, &source)?;
        let mut stream = self.node.watch_logs(&filter).await?;

        info!(
            "Watching {:?} events of {:?} from block {}",
            source,
            binding.address(),
            window.from_block
        );

        let abi = binding.shared_abi();
        let dispatch = self.dispatch.clone();
        let handle = tokio::spawn(async move {
            while let Some(batch) = stream.next().await {
                for log in &batch {
                    match log_action(&abi, &source, log) {
                        Ok(Some(action)) => {
                            debug!("Delivered {:?}", action.method);
                            dispatch(action);
                        }
                        Ok(None) => {}
                        Err(e) => warn!("Dropping undecodable log: {}", e),
                    }
                }
            }
            debug!("Event stream closed");
        });

        Ok(Subscription { handle })
    }

    /// Fetch `window` once, dispatching a `LOG` per entry. Failures become
    /// `LOG_ERROR` actions. Returns how many logs were dispatched.
    pub async fn fetch_window(
        &self,
        binding: &ContractBinding,
        params: &FilterParams,
        window: FilterWindow,
        source: EventSource,
    ) -> usize {
        let contract = binding.address();
        let logs = match build_filter(binding, params, window, &source) {
            Ok(filter) => self.node.logs(&filter).await.map_err(EngineError::from),
            Err(e) => Err(e),
        };
        let logs = match logs {
            Ok(logs) => logs,
            Err(e) => {
                warn!("Event fetch failed: {}", e);
                (self.dispatch)(log_error(contract, e));
                return 0;
            }
        };

        debug!("Fetched {} logs for {:?}", logs.len(), contract);
        let mut delivered = 0;
        for log in &logs {
            match log_action(binding.abi(), &source, log) {
                Ok(Some(action)) => {
                    (self.dispatch)(action);
                    delivered += 1;
                }
                Ok(None) => {}
                Err(e) => (self.dispatch)(log_error(contract, e)),
            }
        }
        delivered
    }
}
