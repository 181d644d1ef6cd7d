//! ABI coding between journal values and contract calls.
//!
//! Arguments are recorded in the journal as [`ArgValue`]s. They are coerced
//! to the parameter types of the ABI only at encoding time, so the same
//! recorded value can be compared structurally on resume.

use crate::artifacts::Artifact;
use crate::error::AbiError;
use alloy_dyn_abi::{DynSolType, DynSolValue, Specifier};
use alloy_json_abi::{Function, JsonAbi, Param};
use alloy_primitives::{hex, Address, Bytes, I256, U256};
use deployment_journal::{ArgValue, NameOrIndex, ReceiptLog};
use std::collections::BTreeMap;

const ERROR_SELECTOR: [u8; 4] = [0x08, 0xc3, 0x79, 0xa0];
const PANIC_SELECTOR: [u8; 4] = [0x4e, 0x48, 0x7b, 0x71];

// ============================================================================
// Lookup
// ============================================================================

/// Finds a function by bare name or by full signature (`"setX(uint256)"`).
///
/// Bare names must not be overloaded.
pub fn find_function<'a>(abi: &'a JsonAbi, name: &str) -> Result<&'a Function, AbiError> {
    if name.contains('(') {
        return abi
            .functions()
            .find(|function| function.signature() == name)
            .ok_or_else(|| AbiError::FunctionNotFound(name.to_string()));
    }
    match abi.function(name).map(Vec::as_slice) {
        Some([function]) => Ok(function),
        Some([]) | None => Err(AbiError::FunctionNotFound(name.to_string())),
        Some(_) => Err(AbiError::OverloadedFunction(name.to_string())),
    }
}

/// Position of the selected output of a function.
pub fn output_index(function: &Function, output: &NameOrIndex) -> Result<usize, AbiError> {
    param_index(&function.outputs, output)
}

fn param_index(params: &[Param], selector: &NameOrIndex) -> Result<usize, AbiError> {
    match selector {
        NameOrIndex::Index(index) if *index < params.len() => Ok(*index),
        NameOrIndex::Name(name) => params
            .iter()
            .position(|param| &param.name == name)
            .ok_or_else(|| AbiError::OutputNotFound(name.clone())),
        NameOrIndex::Index(index) => Err(AbiError::OutputNotFound(index.to_string())),
    }
}

// ============================================================================
// Encoding
// ============================================================================

/// Creation bytecode followed by the encoded constructor arguments.
pub fn encode_deployment(
    artifact: &Artifact,
    bytecode: &Bytes,
    args: &[ArgValue],
) -> Result<Bytes, AbiError> {
    let inputs = artifact
        .abi
        .constructor()
        .map(|constructor| constructor.inputs.as_slice())
        .unwrap_or_default();
    let encoded = encode_params(inputs, args)?;

    let mut data = bytecode.to_vec();
    data.extend_from_slice(&encoded);
    Ok(data.into())
}

/// Selector followed by the encoded arguments.
pub fn encode_function_call(
    abi: &JsonAbi,
    function: &str,
    args: &[ArgValue],
) -> Result<Bytes, AbiError> {
    let function = find_function(abi, function)?;
    let encoded = encode_params(&function.inputs, args)?;

    let mut data = function.selector().to_vec();
    data.extend_from_slice(&encoded);
    Ok(data.into())
}

fn encode_params(params: &[Param], args: &[ArgValue]) -> Result<Vec<u8>, AbiError> {
    if params.len() != args.len() {
        return Err(AbiError::ArgumentCount {
            expected: params.len(),
            found: args.len(),
        });
    }
    let values = params
        .iter()
        .zip(args)
        .map(|(param, arg)| coerce(arg, &param.resolve()?, &param.components))
        .collect::<Result<Vec<_>, AbiError>>()?;
    Ok(DynSolValue::Tuple(values).abi_encode_params())
}

/// Converts a journal value into the ABI value of type `ty`.
///
/// `components` are the tuple components of the parameter, used to match
/// struct fields by name.
pub fn coerce(value: &ArgValue, ty: &DynSolType, components: &[Param]) -> Result<DynSolValue, AbiError> {
    let mismatch = || AbiError::TypeMismatch {
        value: value.to_string(),
        ty: ty.sol_type_name().into_owned(),
    };

    let coerced = match (ty, value) {
        (DynSolType::Bool, ArgValue::Bool(b)) => DynSolValue::Bool(*b),
        (DynSolType::Uint(bits), _) => {
            let uint = match value {
                ArgValue::Uint(u) => *u,
                ArgValue::Int(i) if !i.is_negative() => i.into_raw(),
                ArgValue::String(s) => s.parse::<U256>().map_err(|_| mismatch())?,
                _ => return Err(mismatch()),
            };
            if *bits < 256 && uint >> *bits != U256::ZERO {
                return Err(mismatch());
            }
            DynSolValue::Uint(uint, *bits)
        }
        (DynSolType::Int(bits), _) => {
            let int = match value {
                ArgValue::Int(i) => *i,
                ArgValue::Uint(u) => I256::try_from(*u).map_err(|_| mismatch())?,
                ArgValue::String(s) => s.parse::<I256>().map_err(|_| mismatch())?,
                _ => return Err(mismatch()),
            };
            DynSolValue::Int(int, *bits)
        }
        (DynSolType::Address, _) => DynSolValue::Address(value.as_address().ok_or_else(mismatch)?),
        (DynSolType::FixedBytes(size), ArgValue::Bytes(bytes)) if bytes.len() == *size => {
            let mut word = [0u8; 32];
            word[..*size].copy_from_slice(bytes);
            DynSolValue::FixedBytes(word.into(), *size)
        }
        (DynSolType::Bytes, ArgValue::Bytes(bytes)) => DynSolValue::Bytes(bytes.to_vec()),
        (DynSolType::Bytes, ArgValue::String(s)) => {
            DynSolValue::Bytes(hex::decode(s).map_err(|_| mismatch())?)
        }
        (DynSolType::String, ArgValue::String(s)) => DynSolValue::String(s.clone()),
        (DynSolType::Array(inner), ArgValue::Array(items)) => DynSolValue::Array(
            items
                .iter()
                .map(|item| coerce(item, inner, components))
                .collect::<Result<_, _>>()?,
        ),
        (DynSolType::FixedArray(inner, len), ArgValue::Array(items)) if items.len() == *len => {
            DynSolValue::FixedArray(
                items
                    .iter()
                    .map(|item| coerce(item, inner, components))
                    .collect::<Result<_, _>>()?,
            )
        }
        (DynSolType::Tuple(types), ArgValue::Array(items)) if items.len() == types.len() => {
            DynSolValue::Tuple(
                items
                    .iter()
                    .zip(types)
                    .enumerate()
                    .map(|(i, (item, ty))| coerce(item, ty, sub_components(components, i)))
                    .collect::<Result<_, _>>()?,
            )
        }
        (DynSolType::Tuple(types), ArgValue::Struct(fields))
            if fields.len() == types.len() && components.len() == types.len() =>
        {
            DynSolValue::Tuple(
                components
                    .iter()
                    .zip(types)
                    .map(|(component, ty)| {
                        let field = fields.get(&component.name).ok_or_else(mismatch)?;
                        coerce(field, ty, &component.components)
                    })
                    .collect::<Result<_, _>>()?,
            )
        }
        _ => return Err(mismatch()),
    };
    Ok(coerced)
}

fn sub_components(components: &[Param], index: usize) -> &[Param] {
    components
        .get(index)
        .map(|component| component.components.as_slice())
        .unwrap_or_default()
}

// ============================================================================
// Decoding
// ============================================================================

/// Converts a decoded ABI value back into a journal value.
#[allow(unreachable_patterns)]
pub fn to_arg_value(value: &DynSolValue) -> ArgValue {
    match value {
        DynSolValue::Bool(b) => ArgValue::Bool(*b),
        DynSolValue::Int(i, _) => ArgValue::Int(*i),
        DynSolValue::Uint(u, _) => ArgValue::Uint(*u),
        DynSolValue::FixedBytes(word, size) => {
            ArgValue::Bytes(Bytes::copy_from_slice(&word[..*size]))
        }
        DynSolValue::Address(address) => ArgValue::Address(*address),
        DynSolValue::Function(function) => ArgValue::Bytes(Bytes::copy_from_slice(function.as_slice())),
        DynSolValue::Bytes(bytes) => ArgValue::Bytes(Bytes::copy_from_slice(bytes)),
        DynSolValue::String(s) => ArgValue::String(s.clone()),
        DynSolValue::Array(items) | DynSolValue::FixedArray(items) | DynSolValue::Tuple(items) => {
            ArgValue::Array(items.iter().map(to_arg_value).collect())
        }
        other => ArgValue::Bytes(other.abi_encode().into()),
    }
}

fn decode_params(params: &[Param], data: &[u8]) -> Result<Vec<DynSolValue>, AbiError> {
    let types = params
        .iter()
        .map(|param| param.resolve())
        .collect::<Result<Vec<_>, _>>()?;
    match DynSolType::Tuple(types).abi_decode_params(data)? {
        DynSolValue::Tuple(values) => Ok(values),
        other => Ok(vec![other]),
    }
}

/// Decodes the selected output of a function's return data.
pub fn decode_function_output(
    abi: &JsonAbi,
    function: &str,
    data: &[u8],
    output: &NameOrIndex,
) -> Result<ArgValue, AbiError> {
    let function = find_function(abi, function)?;
    let index = output_index(function, output)?;
    let values = decode_params(&function.outputs, data)?;
    values
        .get(index)
        .map(to_arg_value)
        .ok_or_else(|| AbiError::OutputNotFound(output.to_string()))
}

/// Decodes one argument of the `event_index`-th `event_name` log emitted
/// by `emitter`.
///
/// Indexed arguments of dynamic types are only available as their hash,
/// which is returned as bytes.
pub fn decode_event_argument(
    abi: &JsonAbi,
    event_name: &str,
    logs: &[ReceiptLog],
    emitter: Address,
    event_index: usize,
    argument: &NameOrIndex,
) -> Result<ArgValue, AbiError> {
    let event = abi
        .event(event_name)
        .and_then(|events| events.first())
        .ok_or_else(|| AbiError::EventNotFound(event_name.to_string()))?;
    let topic = event.selector();

    let log = logs
        .iter()
        .filter(|log| log.address == emitter && log.topics.first() == Some(&topic))
        .nth(event_index)
        .ok_or_else(|| AbiError::EventLogNotFound {
            event: event_name.to_string(),
            index: event_index,
            emitter,
        })?;

    let position = match argument {
        NameOrIndex::Index(index) if *index < event.inputs.len() => *index,
        NameOrIndex::Name(name) => event
            .inputs
            .iter()
            .position(|input| &input.name == name)
            .ok_or_else(|| AbiError::OutputNotFound(name.clone()))?,
        NameOrIndex::Index(index) => return Err(AbiError::OutputNotFound(index.to_string())),
    };
    let input = &event.inputs[position];
    let ty = input.resolve()?;

    if input.indexed {
        let topic_index = 1 + event.inputs[..position]
            .iter()
            .filter(|input| input.indexed)
            .count();
        let word = log
            .topics
            .get(topic_index)
            .ok_or_else(|| AbiError::Coding(format!("log is missing topic {topic_index}")))?;
        if ty.is_dynamic() {
            return Ok(ArgValue::Bytes(Bytes::copy_from_slice(word.as_slice())));
        }
        let values = match DynSolType::Tuple(vec![ty]).abi_decode_params(word.as_slice())? {
            DynSolValue::Tuple(values) => values,
            other => vec![other],
        };
        return values
            .first()
            .map(to_arg_value)
            .ok_or_else(|| AbiError::OutputNotFound(argument.to_string()));
    }

    let body_types = event
        .inputs
        .iter()
        .filter(|input| !input.indexed)
        .map(|input| input.resolve())
        .collect::<Result<Vec<_>, _>>()?;
    let body_position = event.inputs[..position]
        .iter()
        .filter(|input| !input.indexed)
        .count();
    let values = match DynSolType::Tuple(body_types).abi_decode_params(&log.data)? {
        DynSolValue::Tuple(values) => values,
        other => vec![other],
    };
    values
        .get(body_position)
        .map(to_arg_value)
        .ok_or_else(|| AbiError::OutputNotFound(argument.to_string()))
}

/// Human readable description of revert data.
pub fn decode_revert_reason(data: &[u8], abi: Option<&JsonAbi>) -> String {
    if data.is_empty() {
        return "Transaction reverted without a reason string".to_string();
    }
    if data.len() < 4 {
        return format!("Reverted with invalid return data {}", hex::encode_prefixed(data));
    }
    let (selector, payload) = data.split_at(4);

    if selector == ERROR_SELECTOR {
        if let Ok(DynSolValue::Tuple(values)) =
            DynSolType::Tuple(vec![DynSolType::String]).abi_decode_params(payload)
        {
            if let Some(DynSolValue::String(reason)) = values.first() {
                return format!("Reverted with reason \"{reason}\"");
            }
        }
    }

    if selector == PANIC_SELECTOR && payload.len() >= 32 {
        let code = U256::from_be_slice(&payload[..32]);
        return format!(
            "Reverted with panic code {code:#x} ({})",
            panic_description(code)
        );
    }

    if let Some(abi) = abi {
        for error in abi.errors() {
            if error.selector().as_slice() != selector {
                continue;
            }
            if let Ok(values) = decode_params(&error.inputs, payload) {
                let args: Vec<String> = values.iter().map(|v| to_arg_value(v).to_string()).collect();
                return format!("Reverted with custom error {}({})", error.name, args.join(", "));
            }
        }
    }

    format!(
        "Reverted with an unrecognized custom error (selector {})",
        hex::encode_prefixed(selector)
    )
}

fn panic_description(code: U256) -> &'static str {
    let known: BTreeMap<u64, &'static str> = BTreeMap::from([
        (0x00, "Generic compiler panic"),
        (0x01, "Assertion error"),
        (0x11, "Arithmetic operation overflowed outside of an unchecked block"),
        (0x12, "Division or modulo division by zero"),
        (0x21, "Tried to convert a value into an enum, but the value was too big or negative"),
        (0x22, "Incorrectly encoded storage byte array"),
        (0x31, ".pop() was called on an empty array"),
        (0x32, "Array accessed at an out-of-bounds or negative index"),
        (0x41, "Too much memory was allocated, or an array was created that is too large"),
        (0x51, "Called a zero-initialized variable of internal function type"),
    ]);
    u64::try_from(code)
        .ok()
        .and_then(|code| known.get(&code).copied())
        .unwrap_or("Unknown panic code")
}
