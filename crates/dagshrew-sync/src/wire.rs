//! JSON-RPC wire shapes and quantity codecs.
//!
//! Integers arrive as `0x`-prefixed hex quantities, byte payloads as
//! `0x`-prefixed hex strings. Everything here is decoding only; mapping onto
//! the canonical model lives with the indexers.

use alloy_primitives::{Bytes, U256};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{SyncError, SyncResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcBlock {
    pub hash: String,
    pub number: String,
    #[serde(default)]
    pub parent_hashes: Vec<String>,
    pub timestamp: String,
    #[serde(default)]
    pub miner: String,
    pub gas_limit: String,
    pub gas_used: String,
    #[serde(default)]
    pub base_fee_per_gas: Option<String>,
    #[serde(default)]
    pub blue_score: Option<Value>,
    #[serde(default)]
    pub is_chain_block: bool,
    #[serde(default)]
    pub selected_parent: Option<String>,
    #[serde(default)]
    pub transactions_root: Option<String>,
    #[serde(default)]
    pub state_root: Option<String>,
    #[serde(default)]
    pub receipts_root: Option<String>,
    /// Full transaction objects; anything else (e.g. bare hashes) is ignored.
    #[serde(default)]
    pub transactions: Vec<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcTransaction {
    pub hash: String,
    pub from: String,
    #[serde(default)]
    pub to: Option<String>,
    #[serde(default)]
    pub value: Option<String>,
    pub gas: String,
    #[serde(default)]
    pub gas_price: Option<String>,
    pub nonce: String,
    #[serde(default)]
    pub input: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcReceipt {
    pub transaction_hash: String,
    #[serde(default)]
    pub status: Option<String>,
    pub gas_used: String,
    #[serde(default)]
    pub contract_address: Option<String>,
    #[serde(default)]
    pub block_hash: Option<String>,
    #[serde(default)]
    pub block_number: Option<String>,
    #[serde(default)]
    pub logs: Vec<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcLog {
    pub address: String,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub data: Option<String>,
    #[serde(default)]
    pub block_hash: Option<String>,
    #[serde(default)]
    pub block_number: Option<String>,
    #[serde(default)]
    pub transaction_hash: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcDagInfo {
    #[serde(default)]
    pub blue_score: Option<Value>,
    /// Hex string or bare JSON number, depending on node version.
    #[serde(default)]
    pub blue_work: Option<Value>,
    #[serde(default)]
    pub merge_set_blues: Vec<String>,
    #[serde(default)]
    pub merge_set_reds: Vec<String>,
}

fn hex_digits<'a>(field: &str, value: &'a str) -> SyncResult<&'a str> {
    let digits = value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .ok_or_else(|| SyncError::Decode(format!("{field}: missing 0x prefix in {value:?}")))?;
    if digits.is_empty() {
        return Err(SyncError::Decode(format!("{field}: empty quantity")));
    }
    Ok(digits)
}

pub fn decode_u64(field: &str, value: &str) -> SyncResult<u64> {
    let digits = hex_digits(field, value)?;
    u64::from_str_radix(digits, 16)
        .map_err(|e| SyncError::Decode(format!("{field}: {value:?}: {e}")))
}

pub fn decode_u256(field: &str, value: &str) -> SyncResult<U256> {
    let digits = hex_digits(field, value)?;
    U256::from_str_radix(digits, 16)
        .map_err(|e| SyncError::Decode(format!("{field}: {value:?}: {e}")))
}

/// Decodes `0x`-prefixed hex bytes. `"0x"` is the empty payload.
pub fn decode_bytes(field: &str, value: &str) -> SyncResult<Bytes> {
    let digits = value
        .strip_prefix("0x")
        .ok_or_else(|| SyncError::Decode(format!("{field}: missing 0x prefix")))?;
    hex::decode(digits)
        .map(Bytes::from)
        .map_err(|e| SyncError::Decode(format!("{field}: {e}")))
}

pub fn encode_quantity(value: u64) -> String {
    format!("0x{value:x}")
}

/// Accepts a JSON number, a hex quantity string or a decimal string.
pub fn decode_quantity_value(field: &str, value: &Value) -> SyncResult<u64> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .ok_or_else(|| SyncError::Decode(format!("{field}: {n} is not a u64"))),
        Value::String(s) if s.starts_with("0x") => decode_u64(field, s),
        Value::String(s) => s
            .parse::<u64>()
            .map_err(|e| SyncError::Decode(format!("{field}: {s:?}: {e}"))),
        other => Err(SyncError::Decode(format!("{field}: unexpected {other}"))),
    }
}

/// Arbitrary precision counterpart of [`decode_quantity_value`].
pub fn decode_u256_value(field: &str, value: &Value) -> SyncResult<U256> {
    match value {
        Value::Number(n) => n
            .to_string()
            .parse::<U256>()
            .map_err(|e| SyncError::Decode(format!("{field}: {n}: {e}"))),
        Value::String(s) if s.starts_with("0x") => decode_u256(field, s),
        Value::String(s) => s
            .parse::<U256>()
            .map_err(|e| SyncError::Decode(format!("{field}: {s:?}: {e}"))),
        other => Err(SyncError::Decode(format!("{field}: unexpected {other}"))),
    }
}

/// Empty strings on the wire stand for "absent".
pub fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.is_empty())
}
