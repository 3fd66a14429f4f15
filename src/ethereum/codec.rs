//! JSON <-> ABI value conversion for dynamically bound contracts.

use alloy::{
    dyn_abi::{DynSolType, DynSolValue, EventExt, FunctionExt, JsonAbiExt, Specifier},
    json_abi::{Event, Function, JsonAbi},
    primitives::Bytes,
};
use anyhow::{anyhow, Result};
use serde_json::{Map, Value};

use super::RawLog;

/// Encode `function(params)` into call data.
pub fn encode_call(function: &Function, params: &[Value]) -> Result<Bytes> {
    if params.len() != function.inputs.len() {
        return Err(anyhow!(
            "'{}' takes {} parameters, got {}",
            function.name,
            function.inputs.len(),
            params.len()
        ));
    }

    let mut values = Vec::with_capacity(params.len());
    for (i, (param, input)) in params.iter().zip(&function.inputs).enumerate() {
        let ty = input
            .resolve()
            .map_err(|e| anyhow!("cannot resolve type '{}': {}", input.ty, e))?;
        let value = json_to_sol_value(param, &ty).map_err(|e| {
            anyhow!(
                "parameter #{} ('{}' of type '{}'): {}",
                i + 1,
                input.name,
                input.ty,
                e
            )
        })?;
        values.push(value);
    }

    let encoded = function
        .abi_encode_input(&values)
        .map_err(|e| anyhow!("failed to encode inputs: {}", e))?;
    Ok(encoded.into())
}

/// Decode the return data of `function` into JSON. A single output is
/// returned bare, several outputs as an array.
pub fn decode_output(function: &Function, data: &[u8]) -> Result<Value> {
    if data.is_empty() {
        return Ok(Value::Null);
    }

    let decoded = function
        .abi_decode_output(data, false)
        .map_err(|e| anyhow!("failed to decode output of '{}': {}", function.name, e))?;

    match decoded.as_slice() {
        [single] => sol_value_to_json(single),
        values => values
            .iter()
            .map(sol_value_to_json)
            .collect::<Result<Vec<_>>>()
            .map(Value::Array),
    }
}

/// Match a raw log against the non-anonymous events of `abi` and decode its
/// arguments into a JSON object keyed by parameter name.
///
/// Returns `Ok(None)` when no event in the interface has the log's selector.
pub fn decode_event(abi: &JsonAbi, log: &RawLog) -> Result<Option<(String, Value)>> {
    let Some(selector) = log.topics.first() else {
        return Ok(None);
    };
    let Some(event) = abi
        .events()
        .find(|event| !event.anonymous && event.selector() == *selector)
    else {
        return Ok(None);
    };

    let args = decode_event_args(event, log)?;
    Ok(Some((event.name.clone(), args)))
}

fn decode_event_args(event: &Event, log: &RawLog) -> Result<Value> {
    let decoded = event
        .decode_log_parts(log.topics.iter().copied(), &log.data, false)
        .map_err(|e| anyhow!("failed to decode event '{}': {}", event.name, e))?;

    let mut indexed = decoded.indexed.iter();
    let mut body = decoded.body.iter();
    let mut args = Map::new();

    for (position, input) in event.inputs.iter().enumerate() {
        let value = if input.indexed {
            indexed.next()
        } else {
            body.next()
        }
        .ok_or_else(|| anyhow!("event '{}' is missing argument #{}", event.name, position))?;

        let key = if input.name.is_empty() {
            position.to_string()
        } else {
            input.name.clone()
        };
        args.insert(key, sol_value_to_json(value)?);
    }

    Ok(Value::Object(args))
}

/// Convert a JSON value into a `DynSolValue` of the given type. Scalars are
/// coerced from their string form so numbers may be passed as JSON numbers,
/// decimal strings or `0x` hex strings.
pub fn json_to_sol_value(value: &Value, ty: &DynSolType) -> Result<DynSolValue> {
    match (ty, value) {
        (DynSolType::Array(inner), Value::Array(items)) => items
            .iter()
            .map(|item| json_to_sol_value(item, inner))
            .collect::<Result<Vec<_>>>()
            .map(DynSolValue::Array),
        (DynSolType::FixedArray(inner, len), Value::Array(items)) => {
            if items.len() != *len {
                return Err(anyhow!("expected {} elements, got {}", len, items.len()));
            }
            items
                .iter()
                .map(|item| json_to_sol_value(item, inner))
                .collect::<Result<Vec<_>>>()
                .map(DynSolValue::FixedArray)
        }
        (DynSolType::Tuple(types), Value::Array(items)) => {
            if items.len() != types.len() {
                return Err(anyhow!(
                    "expected a tuple of {} elements, got {}",
                    types.len(),
                    items.len()
                ));
            }
            items
                .iter()
                .zip(types)
                .map(|(item, ty)| json_to_sol_value(item, ty))
                .collect::<Result<Vec<_>>>()
                .map(DynSolValue::Tuple)
        }
        (_, Value::String(s)) => ty
            .coerce_str(s)
            .map_err(|e| anyhow!("cannot read '{}' as {}: {}", s, ty, e)),
        (_, Value::Number(n)) => ty
            .coerce_str(&n.to_string())
            .map_err(|e| anyhow!("cannot read {} as {}: {}", n, ty, e)),
        (_, Value::Bool(b)) => ty
            .coerce_str(if *b { "true" } else { "false" })
            .map_err(|e| anyhow!("cannot read {} as {}: {}", b, ty, e)),
        _ => Err(anyhow!("unsupported value {} for type {}", value, ty)),
    }
}

/// Convert a decoded ABI value into JSON. Integers become decimal strings so
/// 256-bit values survive the round trip.
pub fn sol_value_to_json(value: &DynSolValue) -> Result<Value> {
    match value {
        DynSolValue::Address(addr) => Ok(Value::String(addr.to_checksum(None))),
        DynSolValue::Uint(num, _) => Ok(Value::String(num.to_string())),
        DynSolValue::Int(num, _) => Ok(Value::String(num.to_string())),
        DynSolValue::Bool(b) => Ok(Value::Bool(*b)),
        DynSolValue::String(s) => Ok(Value::String(s.clone())),
        DynSolValue::Bytes(bytes) => Ok(Value::String(format!("0x{}", hex::encode(bytes)))),
        DynSolValue::FixedBytes(word, size) => Ok(Value::String(format!(
            "0x{}",
            hex::encode(&word[..*size])
        ))),
        DynSolValue::Array(items) | DynSolValue::FixedArray(items) | DynSolValue::Tuple(items) => {
            items
                .iter()
                .map(sol_value_to_json)
                .collect::<Result<Vec<_>>>()
                .map(Value::Array)
        }
        other => Err(anyhow!("unsupported ABI value: {:?}", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{Address, B256, U256};
    use serde_json::json;

    fn erc20() -> JsonAbi {
        serde_json::from_value(json!([
            {
                "type": "function",
                "name": "transfer",
                "inputs": [
                    {"name": "to", "type": "address"},
                    {"name": "amount", "type": "uint256"}
                ],
                "outputs": [{"name": "", "type": "bool"}],
                "stateMutability": "nonpayable"
            },
            {
                "type": "event",
                "name": "Transfer",
                "inputs": [
                    {"name": "from", "type": "address", "indexed": true},
                    {"name": "to", "type": "address", "indexed": true},
                    {"name": "value", "type": "uint256", "indexed": false}
                ],
                "anonymous": false
            }
        ]))
        .unwrap()
    }

    #[test]
    fn test_encode_call_prefixes_selector() {
        let abi = erc20();
        let transfer = abi.function("transfer").unwrap().first().unwrap();
        let data = encode_call(
            transfer,
            &[
                json!("0x742d35Cc6435C9c1c72c5E7b18BaB7e1DB7a5d6e"),
                json!(1000),
            ],
        )
        .unwrap();

        assert_eq!(&data[..4], transfer.selector().as_slice());
        assert_eq!(data.len(), 4 + 32 * 2);
    }

    #[test]
    fn test_encode_call_rejects_bad_values() {
        let abi = erc20();
        let transfer = abi.function("transfer").unwrap().first().unwrap();

        assert!(encode_call(transfer, &[json!("not an address"), json!(1)]).is_err());
        assert!(encode_call(transfer, &[json!(1)]).is_err());
    }

    #[test]
    fn test_decode_output_single_value() {
        let abi = erc20();
        let transfer = abi.function("transfer").unwrap().first().unwrap();
        let data = DynSolValue::Bool(true).abi_encode();

        assert_eq!(decode_output(transfer, &data).unwrap(), json!(true));
        assert_eq!(decode_output(transfer, &[]).unwrap(), Value::Null);
    }

    #[test]
    fn test_decode_event_names_arguments() {
        let abi = erc20();
        let event = abi.event("Transfer").unwrap().first().unwrap();
        let from = Address::repeat_byte(0x11);
        let to = Address::repeat_byte(0x22);

        let log = RawLog {
            address: Address::repeat_byte(0x99),
            topics: vec![event.selector(), from.into_word(), to.into_word()],
            data: DynSolValue::Uint(U256::from(42u64), 256).abi_encode().into(),
            transaction_hash: Some(B256::repeat_byte(0xab)),
            block_number: Some(7),
        };

        let (name, args) = decode_event(&abi, &log).unwrap().unwrap();
        assert_eq!(name, "Transfer");
        assert_eq!(args["from"], json!(from.to_checksum(None)));
        assert_eq!(args["to"], json!(to.to_checksum(None)));
        assert_eq!(args["value"], json!("42"));
    }

    #[test]
    fn test_decode_event_ignores_unknown_selector() {
        let abi = erc20();
        let log = RawLog {
            address: Address::ZERO,
            topics: vec![B256::repeat_byte(0x01)],
            data: Bytes::new(),
            transaction_hash: None,
            block_number: None,
        };

        assert!(decode_event(&abi, &log).unwrap().is_none());
    }

    #[test]
    fn test_json_to_sol_value_arrays() {
        let ty = DynSolType::parse("uint256[]").unwrap();
        let value = json_to_sol_value(&json!([1, "0x02", "3"]), &ty).unwrap();

        assert_eq!(
            value,
            DynSolValue::Array(vec![
                DynSolValue::Uint(U256::from(1u64), 256),
                DynSolValue::Uint(U256::from(2u64), 256),
                DynSolValue::Uint(U256::from(3u64), 256),
            ])
        );
    }
}
