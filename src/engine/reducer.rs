//! Pure merge of actions into the per-contract state tree.

use alloy::primitives::Address;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc;

use super::action::{Action, ActionKind, ActionResult, LOG_ERROR};

/// Reserved subtree key holding decoded event logs.
pub const LOGS: &str = "LOGS";

/// Contract address -> subtree. Subtrees are shared between successive
/// trees; a merge clones only the subtree it touches.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateTree {
    contracts: BTreeMap<Address, Arc<Map<String, Value>>>,
}

impl StateTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, contract: &Address) -> Option<&Map<String, Value>> {
        self.contracts.get(contract).map(Arc::as_ref)
    }

    pub fn subtree(&self, contract: &Address) -> Option<&Arc<Map<String, Value>>> {
        self.contracts.get(contract)
    }

    pub fn contracts(&self) -> impl Iterator<Item = &Address> {
        self.contracts.keys()
    }

    pub fn to_json(&self) -> Value {
        Value::Object(
            self.contracts
                .iter()
                .map(|(address, subtree)| {
                    (address.to_checksum(None), Value::Object(subtree.as_ref().clone()))
                })
                .collect(),
        )
    }

    fn with_subtree(&self, contract: Address, subtree: Map<String, Value>) -> Self {
        let mut contracts = self.contracts.clone();
        contracts.insert(contract, Arc::new(subtree));
        Self { contracts }
    }
}

/// The three productive merges.
enum Merge<'a> {
    Init(Value),
    Log {
        event: &'a str,
        transaction_hash: String,
        args: Value,
    },
    MethodResult { key: &'a str, value: Value },
}

fn classify(action: &Action) -> Option<(Address, Merge<'_>)> {
    let contract = action.contract?;

    let merge = match (&action.kind, &action.result) {
        (ActionKind::InitState, result) => Merge::Init(result.to_json()),
        (ActionKind::Log, ActionResult::Log(entry)) => Merge::Log {
            event: action.method.as_deref().unwrap_or(&entry.event_name),
            transaction_hash: entry.transaction_hash.clone(),
            args: entry.args.clone(),
        },
        (ActionKind::Log, result) => {
            let result = result.to_json();
            Merge::Log {
                event: action.method.as_deref()?,
                transaction_hash: result.get("transactionHash")?.as_str()?.to_string(),
                args: result.get("args").cloned().unwrap_or(Value::Null),
            }
        }
        (kind, result) => Merge::MethodResult {
            key: action.method.as_deref().unwrap_or(match kind {
                ActionKind::LogError => LOG_ERROR,
                other => other.as_str(),
            }),
            value: result.to_json(),
        },
    };

    Some((contract, merge))
}

/// Fold `action` into `state`, returning the new tree. `state` is never
/// mutated. Actions without a target contract are no-ops.
///
/// Every subtree is a JSON object, so an `INIT_STATE` snapshot that is not
/// an object is rejected with a warning and the tree is returned unchanged.
pub fn reduce(state: &StateTree, action: &Action) -> StateTree {
    let Some((contract, merge)) = classify(action) else {
        return state.clone();
    };

    match merge {
        Merge::Init(Value::Object(snapshot)) => state.with_subtree(contract, snapshot),
        Merge::Init(other) => {
            tracing::warn!("Ignoring non-object INIT_STATE snapshot: {}", other);
            state.clone()
        }
        Merge::Log {
            event,
            transaction_hash,
            args,
        } => {
            let mut subtree = state
                .get(&contract)
                .cloned()
                .unwrap_or_default();

            if !subtree.get(LOGS).is_some_and(Value::is_object) {
                subtree.insert(LOGS.to_string(), Value::Object(Map::new()));
            }
            if let Some(Value::Object(logs)) = subtree.get_mut(LOGS) {
                // Skeleton placeholders are replaced by the first real entry.
                if !logs.get(event).is_some_and(Value::is_object) {
                    logs.insert(event.to_string(), Value::Object(Map::new()));
                }
                if let Some(Value::Object(entries)) = logs.get_mut(event) {
                    entries.insert(transaction_hash, args);
                }
            }

            state.with_subtree(contract, subtree)
        }
        Merge::MethodResult { key, value } => {
            if key == LOGS {
                tracing::warn!("Refusing to overwrite reserved {} key", LOGS);
                return state.clone();
            }
            let mut subtree = state
                .get(&contract)
                .cloned()
                .unwrap_or_default();
            subtree.insert(key.to_string(), value);
            state.with_subtree(contract, subtree)
        }
    }
}

/// Owns a state tree and folds every action it receives into it.
#[derive(Debug, Default)]
pub struct Store {
    state: StateTree,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &StateTree {
        &self.state
    }

    pub fn apply(&mut self, action: &Action) -> &StateTree {
        self.state = reduce(&self.state, action);
        &self.state
    }

    /// Drain whatever is queued on `rx` without waiting.
    pub fn drain(&mut self, rx: &mut mpsc::UnboundedReceiver<Action>) -> usize {
        let mut applied = 0;
        while let Ok(action) = rx.try_recv() {
            self.apply(&action);
            applied += 1;
        }
        applied
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::action::result_key;
    use crate::engine::error::EngineError;
    use crate::ethereum::LogEntry;
    use serde_json::json;

    fn a() -> Address {
        Address::repeat_byte(0xaa)
    }

    fn b() -> Address {
        Address::repeat_byte(0xbb)
    }

    fn log_action(contract: Address, hash: &str, value: u64) -> Action {
        Action {
            kind: ActionKind::Log,
            result: ActionResult::Log(LogEntry {
                event_name: "Transfer".into(),
                transaction_hash: hash.into(),
                args: json!({"value": value.to_string()}),
            }),
            method: Some("Transfer".into()),
            contract: Some(contract),
        }
    }

    fn method_action(contract: Address, method: &str, value: Value) -> Action {
        Action {
            kind: ActionKind::Method("TOTAL_SUPPLY".into()),
            result: ActionResult::Value(value),
            method: Some(result_key(method)),
            contract: Some(contract),
        }
    }

    fn init_action(contract: Address, snapshot: Value) -> Action {
        Action {
            kind: ActionKind::InitState,
            result: ActionResult::Snapshot(snapshot),
            method: None,
            contract: Some(contract),
        }
    }

    #[test]
    fn test_log_merge_is_idempotent() {
        let action = log_action(a(), "0x01", 5);
        let once = reduce(&StateTree::new(), &action);
        let twice = reduce(&once, &action);

        assert_eq!(once, twice);
        assert_eq!(
            once.get(&a()).unwrap()[LOGS],
            json!({"Transfer": {"0x01": {"value": "5"}}})
        );
    }

    #[test]
    fn test_log_replaces_skeleton_placeholder() {
        let state = reduce(
            &StateTree::new(),
            &init_action(a(), json!({"balanceOf": {}, "LOGS": {"Transfer": []}})),
        );
        let state = reduce(&state, &log_action(a(), "0x02", 9));

        let subtree = state.get(&a()).unwrap();
        assert_eq!(subtree["LOGS"]["Transfer"], json!({"0x02": {"value": "9"}}));
        assert_eq!(subtree["balanceOf"], json!({}));
    }

    #[test]
    fn test_merge_leaves_other_contracts_untouched() {
        let state = reduce(&StateTree::new(), &init_action(b(), json!({"owner": "x"})));
        let before = state.subtree(&b()).unwrap().clone();

        let state = reduce(&state, &method_action(a(), "totalSupply", json!("100")));
        let state = reduce(&state, &log_action(a(), "0x03", 1));
        let state = reduce(&state, &init_action(a(), json!({})));

        assert!(Arc::ptr_eq(&before, state.subtree(&b()).unwrap()));
    }

    #[test]
    fn test_init_state_replaces_subtree() {
        let state = reduce(&StateTree::new(), &method_action(a(), "totalSupply", json!("1")));
        assert!(state.get(&a()).unwrap().contains_key("_totalSupply"));

        let state = reduce(&state, &init_action(a(), json!({"decimals": "18"})));
        let subtree = state.get(&a()).unwrap();
        assert!(!subtree.contains_key("_totalSupply"));
        assert_eq!(subtree["decimals"], json!("18"));
    }

    #[test]
    fn test_non_object_init_state_is_rejected() {
        let state = reduce(&StateTree::new(), &init_action(a(), json!({"decimals": "18"})));

        for snapshot in [json!([1, 2]), json!("18"), Value::Null] {
            let next = reduce(&state, &init_action(a(), snapshot));
            assert_eq!(next.to_json(), state.to_json());
        }
        let fresh = reduce(&StateTree::new(), &init_action(b(), json!(7)));
        assert!(fresh.get(&b()).is_none());
    }

    #[test]
    fn test_method_result_merges_key_by_key() {
        let state = reduce(&StateTree::new(), &init_action(a(), json!({"decimals": "18"})));
        let state = reduce(&state, &method_action(a(), "totalSupply", json!("7")));

        let subtree = state.get(&a()).unwrap();
        assert_eq!(subtree["decimals"], json!("18"));
        assert_eq!(subtree["_totalSupply"], json!("7"));
    }

    #[test]
    fn test_action_without_contract_is_noop() {
        let state = reduce(&StateTree::new(), &init_action(a(), json!({"x": 1})));
        let mut action = method_action(a(), "totalSupply", json!("7"));
        action.contract = None;

        assert_eq!(reduce(&state, &action), state);
    }

    #[test]
    fn test_method_result_cannot_overwrite_logs() {
        let state = reduce(&StateTree::new(), &log_action(a(), "0x01", 1));
        let mut action = method_action(a(), "x", json!("clobber"));
        action.method = Some(LOGS.to_string());

        assert_eq!(reduce(&state, &action), state);
    }

    #[test]
    fn test_log_error_merges_under_its_own_key() {
        let action = Action {
            kind: ActionKind::LogError,
            result: ActionResult::Error(Arc::new(EngineError::Remote(anyhow::anyhow!(
                "filter not found"
            )))),
            method: None,
            contract: Some(a()),
        };
        let state = reduce(&StateTree::new(), &action);

        assert_eq!(
            state.get(&a()).unwrap()[LOG_ERROR],
            json!({"error": "filter not found"})
        );
    }

    #[test]
    fn test_store_drains_channel() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tx.send(init_action(a(), json!({}))).unwrap();
        tx.send(log_action(a(), "0x01", 1)).unwrap();

        let mut store = Store::new();
        assert_eq!(store.drain(&mut rx), 2);
        assert!(store.state().get(&a()).unwrap().contains_key(LOGS));
        assert_eq!(store.state().contracts().count(), 1);
    }
}
