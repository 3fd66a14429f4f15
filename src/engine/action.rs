use alloy::primitives::{Address, TxHash};
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;

use super::error::EngineError;
use crate::ethereum::{LogEntry, Receipt};

pub const INIT_STATE: &str = "INIT_STATE";
pub const LOG: &str = "LOG";
pub const LOG_ERROR: &str = "LOG_ERROR";

/// Derive the action type label of a member: `_` before every uppercase
/// letter, then everything uppercased (`balanceOf` -> `BALANCE_OF`).
pub fn action_type(member: &str) -> String {
    let mut label = String::with_capacity(member.len() + 4);
    for c in member.chars() {
        if c.is_ascii_uppercase() {
            label.push('_');
        }
        label.extend(c.to_uppercase());
    }
    label
}

/// State key a member's call/send results are stored under.
pub fn result_key(member: &str) -> String {
    format!("_{}", member)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionKind {
    InitState,
    Log,
    LogError,
    /// Result of a call or send, labelled with the member's action type.
    Method(String),
}

impl ActionKind {
    pub fn as_str(&self) -> &str {
        match self {
            ActionKind::InitState => INIT_STATE,
            ActionKind::Log => LOG,
            ActionKind::LogError => LOG_ERROR,
            ActionKind::Method(label) => label,
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub enum ActionResult {
    TxHash(TxHash),
    Receipt(Receipt),
    /// Closes a send cycle.
    Empty,
    Error(Arc<EngineError>),
    Value(Value),
    Log(LogEntry),
    Snapshot(Value),
}

impl ActionResult {
    pub fn to_json(&self) -> Value {
        match self {
            ActionResult::TxHash(hash) => Value::String(format!("{:#x}", hash)),
            ActionResult::Receipt(receipt) => {
                serde_json::to_value(receipt).unwrap_or(Value::Null)
            }
            ActionResult::Empty => Value::Null,
            ActionResult::Error(error) => json!({ "error": error.to_string() }),
            ActionResult::Value(value) | ActionResult::Snapshot(value) => value.clone(),
            ActionResult::Log(entry) => serde_json::to_value(entry).unwrap_or(Value::Null),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, ActionResult::Error(_))
    }
}

/// A tagged unit of observed state change.
#[derive(Debug, Clone)]
pub struct Action {
    pub kind: ActionKind,
    pub result: ActionResult,
    pub method: Option<String>,
    pub contract: Option<Address>,
}

impl Action {
    pub fn to_json(&self) -> Value {
        json!({
            "type": self.kind.as_str(),
            "result": self.result.to_json(),
            "method": self.method,
            "contract": self.contract.map(|address| address.to_checksum(None)),
        })
    }
}

/// Consumer of every action the engine emits. Its return value is never
/// inspected.
pub type Dispatch = Arc<dyn Fn(Action) + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_type_derivation() {
        assert_eq!(action_type("transfer"), "TRANSFER");
        assert_eq!(action_type("balanceOf"), "BALANCE_OF");
        assert_eq!(action_type("safeTransferFrom"), "SAFE_TRANSFER_FROM");
        assert_eq!(action_type("Transfer"), "_TRANSFER");
        assert_eq!(action_type(""), "");
    }

    #[test]
    fn test_action_kind_labels() {
        assert_eq!(ActionKind::InitState.to_string(), "INIT_STATE");
        assert_eq!(ActionKind::Log.to_string(), "LOG");
        assert_eq!(ActionKind::LogError.to_string(), "LOG_ERROR");
        assert_eq!(ActionKind::Method("BALANCE_OF".into()).to_string(), "BALANCE_OF");
    }

    #[test]
    fn test_error_result_json() {
        let result = ActionResult::Error(Arc::new(EngineError::MethodNotFound("mint".into())));
        assert!(result.is_error());
        assert_eq!(result.to_json(), json!({"error": "method not found: mint"}));
    }
}
