//! Common types for dagshrew-sync

use alloy_primitives::U256;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Bounded retry with exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one. Treated as at least 1.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles after that.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Wait before attempt number `attempt` (1-based). Zero for the first.
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let factor = 1u32.checked_shl(attempt - 2).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }
}

/// Switches for the per-block pipeline stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineConfig {
    pub index_dag: bool,
    pub index_receipts: bool,
    pub index_addresses: bool,
    pub track_balances: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            index_dag: true,
            index_receipts: true,
            index_addresses: false,
            track_balances: false,
        }
    }
}

/// Configuration for the sync process
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub retry: RetryPolicy,
    /// Per-request HTTP timeout
    pub request_timeout: Duration,
    /// Tick period of the tip-following loop
    pub poll_interval: Duration,
    /// Blocks indexed per poll tick
    pub batch_size: u64,
    /// Worker pool size for range backfills
    pub backfill_workers: usize,
    /// Starting block height when nothing has been indexed yet
    pub start_block: u64,
    /// Optional exit block height
    pub exit_at: Option<u64>,
    pub pipeline: PipelineConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            request_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_secs(2),
            batch_size: 10,
            backfill_workers: 10,
            start_block: 0,
            exit_at: None,
            pipeline: PipelineConfig::default(),
        }
    }
}

/// JSON-RPC request structure
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: u64,
    pub method: String,
    pub params: Vec<serde_json::Value>,
}

impl JsonRpcRequest {
    pub fn new(id: u64, method: &str, params: Vec<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            method: method.to_string(),
            params,
        }
    }
}

/// JSON-RPC response structure. A `null` or absent `result` without an
/// `error` means "not found".
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct JsonRpcResponse {
    #[serde(default)]
    pub id: serde_json::Value,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<JsonRpcError>,
}

/// JSON-RPC error structure
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

/// Decoded `phoenix_getDAGInfo` payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DagInfo {
    pub blue_score: Option<u64>,
    pub blue_work: U256,
    pub merge_set_blues: Vec<String>,
    pub merge_set_reds: Vec<String>,
}

/// Filter for `eth_getLogs`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogFilter {
    pub address: Option<String>,
    pub from_block: Option<u64>,
    pub to_block: Option<u64>,
    pub topics: Vec<String>,
}
