//! Receipt indexing: transaction status, gas used, created contract, logs.

use log::{debug, warn};
use serde_json::Value;
use std::sync::Arc;

use crate::domain::{is_valid_address, Log, TxStatus};
use crate::traits::{LogWriter, ReceiptReader, TransactionWriter};
use crate::wire::{decode_bytes, decode_u64, non_empty, RpcLog};
use crate::{SyncError, SyncResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiptOutcome {
    /// The node has no receipt yet; nothing was written.
    Pending,
    Indexed {
        status: TxStatus,
        gas_used: u64,
        logs_saved: usize,
        logs_failed: usize,
        contract_address: Option<String>,
    },
}

impl ReceiptOutcome {
    pub fn contract_address(&self) -> Option<&str> {
        match self {
            ReceiptOutcome::Indexed {
                contract_address: Some(address),
                ..
            } => Some(address),
            _ => None,
        }
    }
}

/// Maps one receipt log. Missing block fields fall back to the receipt's.
pub fn map_log(
    object: &Value,
    tx_hash: &str,
    log_index: u32,
    block_hash: Option<&str>,
    block_number: Option<u64>,
) -> SyncResult<Log> {
    let raw: RpcLog = serde_json::from_value(object.clone())
        .map_err(|e| SyncError::Decode(format!("log: {}", e)))?;
    let data = non_empty(raw.data)
        .and_then(|d| decode_bytes("data", &d).ok())
        .unwrap_or_default();
    let own_number = raw
        .block_number
        .as_deref()
        .and_then(|n| decode_u64("blockNumber", n).ok());

    Ok(Log {
        transaction_hash: tx_hash.to_string(),
        log_index,
        address: raw.address,
        topics: raw.topics,
        data,
        block_hash: non_empty(raw.block_hash).or_else(|| block_hash.map(str::to_string)),
        block_number: own_number.or(block_number),
    })
}

pub struct TransactionIndexer<N, T, L> {
    node: Arc<N>,
    transactions: Arc<T>,
    logs: Arc<L>,
}

impl<N, T, L> TransactionIndexer<N, T, L>
where
    N: ReceiptReader,
    T: TransactionWriter,
    L: LogWriter,
{
    pub fn new(node: Arc<N>, transactions: Arc<T>, logs: Arc<L>) -> Self {
        Self {
            node,
            transactions,
            logs,
        }
    }

    /// Indexes the receipt of `tx_hash`.
    ///
    /// The status update (and contract address, if any) must succeed; log
    /// writes after that are best-effort.
    pub async fn index_receipt(&self, tx_hash: &str) -> SyncResult<ReceiptOutcome> {
        let Some(receipt) = self.node.get_transaction_receipt(tx_hash).await? else {
            debug!("No receipt for {} yet", tx_hash);
            return Ok(ReceiptOutcome::Pending);
        };

        let code = receipt
            .status
            .as_deref()
            .ok_or_else(|| SyncError::Decode(format!("receipt {}: missing status", tx_hash)))
            .and_then(|s| decode_u64("status", s))?;
        let status = TxStatus::from_code(code).ok_or_else(|| {
            SyncError::Decode(format!("receipt {}: unknown status {}", tx_hash, code))
        })?;
        let gas_used = decode_u64("gasUsed", &receipt.gas_used)?;

        self.transactions
            .update_transaction_status(tx_hash, status, gas_used)
            .await?;

        let contract_address = match non_empty(receipt.contract_address) {
            Some(address) if is_valid_address(&address) => {
                self.transactions
                    .set_contract_address(tx_hash, &address)
                    .await?;
                Some(address)
            }
            Some(address) => {
                warn!("Ignoring malformed contract address {} on {}", address, tx_hash);
                None
            }
            None => None,
        };

        let block_hash = non_empty(receipt.block_hash);
        let block_number = receipt
            .block_number
            .as_deref()
            .and_then(|n| decode_u64("blockNumber", n).ok());

        let mut logs_saved = 0;
        let mut logs_failed = 0;
        for (index, object) in receipt.logs.iter().enumerate() {
            let log = map_log(object, tx_hash, index as u32, block_hash.as_deref(), block_number);
            match self.save_log(log).await {
                Ok(()) => logs_saved += 1,
                Err(e) => {
                    warn!("Failed to save log {} of {}: {}", index, tx_hash, e);
                    logs_failed += 1;
                }
            }
        }

        debug!(
            "Indexed receipt {}: status {:?}, {} logs ({} failed)",
            tx_hash, status, logs_saved, logs_failed
        );
        Ok(ReceiptOutcome::Indexed {
            status,
            gas_used,
            logs_saved,
            logs_failed,
            contract_address,
        })
    }

    async fn save_log(&self, log: SyncResult<Log>) -> SyncResult<()> {
        let log = log?;
        log.validate()?;
        self.logs.save_log(&log).await
    }
}
