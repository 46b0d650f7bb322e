//! Converts alloy `DynSolValue`s and raw topics into [`EventValue`]s.

use alloy_core::dyn_abi::DynSolValue;

use pnsindex_core::types::EventValue;

use crate::signature::ParamKind;

fn hex0x(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

/// Convert a decoded `DynSolValue` into an `EventValue`.
pub fn normalize(val: DynSolValue) -> EventValue {
    match val {
        DynSolValue::Bool(b) => EventValue::Bool(b),
        DynSolValue::Uint(u, _) => EventValue::Uint(u.to_string()),
        DynSolValue::Address(a) => EventValue::Address(hex0x(a.as_slice())),
        DynSolValue::FixedBytes(word, 32) => EventValue::Bytes32(hex0x(word.as_slice())),
        DynSolValue::FixedBytes(word, size) => EventValue::Bytes(hex0x(&word[..size.min(32)])),
        DynSolValue::Bytes(b) => EventValue::Bytes(hex0x(&b)),
        DynSolValue::String(s) => EventValue::Str(s),
        // Types outside the supported parameter kinds keep their ABI encoding.
        other => EventValue::Bytes(hex0x(&other.abi_encode())),
    }
}

/// Decode one indexed parameter from its 32-byte topic.
///
/// Value types are stored in the topic verbatim. Dynamic types are stored as
/// the keccak hash of their contents and come back as [`EventValue::TopicHash`].
pub fn decode_topic(topic: &str, kind: ParamKind) -> Result<EventValue, String> {
    let digits = topic.strip_prefix("0x").unwrap_or(topic);
    let bytes = hex::decode(digits).map_err(|e| format!("invalid topic hex: {e}"))?;
    if bytes.len() != 32 {
        return Err(format!("topic is {} bytes, expected 32", bytes.len()));
    }
    if kind.is_dynamic() {
        return Ok(EventValue::TopicHash(hex0x(&bytes)));
    }
    kind.sol_type()
        .abi_decode(&bytes)
        .map(normalize)
        .map_err(|e| format!("topic decode: {e}"))
}
