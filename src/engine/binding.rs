//! Binding of an interface description to a deployed contract address.
//!
//! Members are resolved once, at bind time, into an invocation table keyed by
//! name. Each overload carries its own capability. Reads and writes go through
//! capability-typed handles ([`ReadCall`], [`WriteCall`]).

use alloy::{
    json_abi::{Function, JsonAbi, StateMutability},
    primitives::{Address, Bytes},
    rpc::types::Filter,
};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use super::error::{EngineError, EngineResult};
use super::registry::{InterfaceRegistry, MemberKind};
use crate::ethereum::{abi::InterfaceDescriptor, codec, provider::CallRequest, utils};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    /// `view`/`pure` functions, executed with a call.
    Readable,
    /// State-changing functions, executed with a transaction.
    Writable,
    /// Events; observed, never invoked.
    Observable,
}

impl Capability {
    fn of(function: &Function) -> Self {
        match function.state_mutability {
            StateMutability::View | StateMutability::Pure => Capability::Readable,
            _ => Capability::Writable,
        }
    }

    fn describe(self) -> &'static str {
        match self {
            Capability::Readable => "read-only",
            Capability::Writable => "state-changing",
            Capability::Observable => "event",
        }
    }
}

/// Everything declared under one name. A name may carry function overloads
/// of mixed capability and an event at once.
#[derive(Debug, Clone, Default)]
struct Invocation {
    overloads: Vec<(Function, Capability)>,
    observable: bool,
    async_capable: bool,
}

/// Inputs declared by a signature such as `transfer(address,uint256)`:
/// top-level commas plus one, or zero for an empty list.
pub fn declared_input_count(signature: &str) -> usize {
    let list = match (signature.find('('), signature.rfind(')')) {
        (Some(open), Some(close)) if close > open => &signature[open + 1..close],
        _ => return 0,
    };
    if list.trim().is_empty() {
        return 0;
    }

    let mut depth = 0usize;
    let mut commas = 0usize;
    for c in list.chars() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => commas += 1,
            _ => {}
        }
    }
    commas + 1
}

#[derive(Debug, Clone)]
pub struct ContractBinding {
    address: Address,
    abi: Arc<JsonAbi>,
    origin_block: u64,
    registry: InterfaceRegistry,
    invocations: HashMap<String, Invocation>,
    events: Filter,
}

impl ContractBinding {
    /// Validate `address` and `interface` and build the invocation table,
    /// plus an event filter spanning `origin_block` to the latest block.
    pub fn bind(
        interface: impl Into<InterfaceDescriptor>,
        address: &str,
        origin_block: u64,
    ) -> EngineResult<Self> {
        let interface = interface.into();
        let address = utils::validate_address(address)
            .map_err(|e| EngineError::InvalidBinding(e.to_string()))?;

        let registry = InterfaceRegistry::new(&interface);
        if registry.is_empty() {
            return Err(EngineError::InvalidBinding(
                "interface description has no named members".to_string(),
            ));
        }
        registry.check_collisions()?;

        let abi = interface.into_abi();
        let mut invocations: HashMap<String, Invocation> = HashMap::new();
        for member in registry.members() {
            let invocation = invocations.entry(member.name.clone()).or_default();
            match member.kind {
                MemberKind::Event => invocation.observable = true,
                MemberKind::Function if invocation.overloads.is_empty() => {
                    invocation.overloads = abi
                        .function(&member.name)
                        .map(|functions| {
                            functions
                                .iter()
                                .map(|f| (f.clone(), Capability::of(f)))
                                .collect()
                        })
                        .unwrap_or_default();
                }
                MemberKind::Function => {}
            }
        }

        let events = Filter::new().address(address).from_block(origin_block);

        tracing::debug!(
            "Bound {} members at {:?} from block {}",
            invocations.len(),
            address,
            origin_block
        );

        Ok(Self {
            address,
            abi: Arc::new(abi),
            origin_block,
            registry,
            invocations,
            events,
        })
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn abi(&self) -> &JsonAbi {
        &self.abi
    }

    pub fn shared_abi(&self) -> Arc<JsonAbi> {
        self.abi.clone()
    }

    pub fn origin_block(&self) -> u64 {
        self.origin_block
    }

    pub fn registry(&self) -> &InterfaceRegistry {
        &self.registry
    }

    /// Filter for every event of the contract from the origin block onward.
    pub fn event_filter(&self) -> &Filter {
        &self.events
    }

    /// Capabilities declared under `method`, one per function overload in
    /// declaration order, then `Observable` when an event shares the name.
    pub fn capabilities(&self, method: &str) -> Vec<Capability> {
        let Some(invocation) = self.invocations.get(method) else {
            return Vec::new();
        };
        let mut capabilities: Vec<Capability> =
            invocation.overloads.iter().map(|(_, c)| *c).collect();
        if invocation.observable {
            capabilities.push(Capability::Observable);
        }
        capabilities
    }

    /// Mark every request-style member as invocable asynchronously. Returns
    /// how many members changed; a second call returns zero.
    pub fn ensure_async_capable(&mut self) -> usize {
        let mut wrapped = 0;
        for invocation in self.invocations.values_mut() {
            if !invocation.overloads.is_empty() && !invocation.async_capable {
                invocation.async_capable = true;
                wrapped += 1;
            }
        }
        if wrapped > 0 {
            tracing::debug!("Made {} members async-capable", wrapped);
        }
        wrapped
    }

    pub fn is_async_capable(&self, method: &str) -> bool {
        self.invocations
            .get(method)
            .map(|inv| inv.async_capable)
            .unwrap_or(false)
    }

    /// Validated read of a `view`/`pure` member.
    pub fn readable(&self, method: &str, params: &[Value]) -> EngineResult<ReadCall> {
        let function = self.select(method, params, Some(Capability::Readable))?;
        let data = codec::encode_call(function, params)
            .map_err(|e| EngineError::Encoding(e.to_string()))?;

        Ok(ReadCall {
            function: function.clone(),
            to: self.address,
            data,
        })
    }

    /// Validated write to a state-changing member.
    pub fn writable(&self, method: &str, params: &[Value]) -> EngineResult<WriteCall> {
        let function = self.select(method, params, Some(Capability::Writable))?;
        let data = codec::encode_call(function, params)
            .map_err(|e| EngineError::Encoding(e.to_string()))?;

        Ok(WriteCall {
            method: method.to_string(),
            to: self.address,
            data,
        })
    }

    /// Encode `method(params)` for any function member, regardless of
    /// capability. Used when assembling raw transactions.
    pub fn encode(&self, method: &str, params: Option<&[Value]>) -> EngineResult<Bytes> {
        let Some(params) = params else {
            return Err(EngineError::InvalidMethod(method.to_string()));
        };
        let function = self.select(method, params, None).map_err(|e| match e {
            EngineError::MethodNotFound(_) => EngineError::InvalidMethod(method.to_string()),
            other => other,
        })?;
        codec::encode_call(function, params).map_err(|e| EngineError::Encoding(e.to_string()))
    }

    /// Zero-input read-only members.
    pub fn zero_input_reads(&self) -> Vec<String> {
        self.registry
            .members()
            .iter()
            .filter(|m| m.kind == MemberKind::Function && m.constant && m.input_count() == 0)
            .map(|m| m.name.clone())
            .collect()
    }

    /// The overload of `method` matching `wanted` (any, when `None`) whose
    /// declared input count equals `params.len()`.
    fn select(
        &self,
        method: &str,
        params: &[Value],
        wanted: Option<Capability>,
    ) -> EngineResult<&Function> {
        let invocation = self
            .invocations
            .get(method)
            .filter(|inv| !inv.overloads.is_empty())
            .ok_or_else(|| EngineError::MethodNotFound(method.to_string()))?;

        let candidates: Vec<&Function> = invocation
            .overloads
            .iter()
            .filter(|(_, capability)| wanted.map_or(true, |w| w == *capability))
            .map(|(function, _)| function)
            .collect();
        let Some(first) = candidates.first() else {
            let kind = wanted.map_or("function", Capability::describe);
            return Err(EngineError::MethodNotFound(format!(
                "{} is not a {} member",
                method, kind
            )));
        };
        if wanted.is_some() && !invocation.async_capable {
            return Err(EngineError::NotAsyncCapable(method.to_string()));
        }

        candidates
            .iter()
            .copied()
            .find(|f| declared_input_count(&f.signature()) == params.len())
            .ok_or_else(|| EngineError::InvalidParameterCount {
                method: method.to_string(),
                expected: declared_input_count(&first.signature()),
                found: params.len(),
            })
    }
}

/// A validated, encoded read call.
#[derive(Debug, Clone)]
pub struct ReadCall {
    function: Function,
    to: Address,
    data: Bytes,
}

impl ReadCall {
    pub fn request(&self, from: Option<Address>) -> CallRequest {
        CallRequest {
            from,
            to: self.to,
            data: self.data.clone(),
        }
    }

    pub fn decode(&self, output: &[u8]) -> EngineResult<Value> {
        codec::decode_output(&self.function, output)
            .map_err(|e| EngineError::Encoding(e.to_string()))
    }
}

/// A validated, encoded state-changing call.
#[derive(Debug, Clone)]
pub struct WriteCall {
    pub method: String,
    pub to: Address,
    pub data: Bytes,
}
