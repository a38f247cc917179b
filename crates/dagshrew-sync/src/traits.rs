//! # Core Trait Definitions for the Ingestion Pipeline
//!
//! This module defines the seams of the indexer. Every external dependency is
//! reached through a small capability trait so that each component depends
//! only on the subset it actually uses, and test doubles can stand in for any
//! of them.
//!
//! ## Node Capabilities
//!
//! One trait per RPC method family ([`TipReader`], [`BlockByNumberReader`],
//! [`ReceiptReader`], [`DagInfoReader`], ...). [`DagNode`] is the composite
//! with a blanket implementation, so anything implementing every capability
//! is a full node client.
//!
//! Readers return `Ok(None)` when the node answered `null`. Whether an absent
//! entity is an error is the caller's decision.
//!
//! ## Storage Ports
//!
//! Write ports upsert idempotently, keyed by natural identity: hash,
//! `(tx_hash, log_index)` or `(child, parent)`. Read ports must reflect writes
//! made through the write ports. All ports take `&self` and are shared across
//! backfill workers behind `Arc`, so implementations must be `Send + Sync`.
//!
//! [`IndexProgress`] records how far the pipeline got. [`IndexerStore`] is the
//! composite of every port.

use alloy_primitives::{Bytes, U256};
use async_trait::async_trait;

use crate::domain::{
    Address, Block, BlockUpdate, DagRelationship, GhostdagData, Log, StoredBlock, Transaction,
    TxStatus,
};
use crate::types::{DagInfo, LogFilter};
use crate::wire::{RpcBlock, RpcLog, RpcReceipt};
use crate::SyncResult;

/// Reads the current tip height (`eth_blockNumber`).
#[async_trait]
pub trait TipReader: Send + Sync {
    async fn block_number(&self) -> SyncResult<u64>;
}

/// Reads blocks by height (`eth_getBlockByNumber`).
#[async_trait]
pub trait BlockByNumberReader: Send + Sync {
    /// With `full_transactions` the block inlines transaction objects.
    async fn get_block_by_number(
        &self,
        height: u64,
        full_transactions: bool,
    ) -> SyncResult<Option<RpcBlock>>;
}

/// Reads blocks by hash (`eth_getBlockByHash`).
#[async_trait]
pub trait BlockByHashReader: Send + Sync {
    async fn get_block_by_hash(
        &self,
        hash: &str,
        full_transactions: bool,
    ) -> SyncResult<Option<RpcBlock>>;
}

/// Reads transaction receipts (`eth_getTransactionReceipt`).
#[async_trait]
pub trait ReceiptReader: Send + Sync {
    async fn get_transaction_receipt(&self, tx_hash: &str) -> SyncResult<Option<RpcReceipt>>;
}

/// Queries event logs (`eth_getLogs`).
#[async_trait]
pub trait EventLogReader: Send + Sync {
    async fn get_logs(&self, filter: &LogFilter) -> SyncResult<Vec<RpcLog>>;
}

/// Reads contract bytecode (`eth_getCode`), already hex-decoded.
#[async_trait]
pub trait CodeReader: Send + Sync {
    async fn get_code(&self, address: &str) -> SyncResult<Bytes>;
}

/// Reads account balances (`eth_getBalance`).
#[async_trait]
pub trait BalanceReader: Send + Sync {
    async fn get_balance(&self, address: &str) -> SyncResult<U256>;
}

/// Reads consensus metadata (`phoenix_getDAGInfo`).
#[async_trait]
pub trait DagInfoReader: Send + Sync {
    async fn get_dag_info(&self, block_hash: &str) -> SyncResult<Option<DagInfo>>;
}

/// Reads blue scores (`phoenix_getBlueScore`). `None` asks for the tip.
#[async_trait]
pub trait BlueScoreReader: Send + Sync {
    async fn get_blue_score(&self, height: Option<u64>) -> SyncResult<u64>;
}

/// Reads the parent set of a block (`phoenix_getBlockParents`).
#[async_trait]
pub trait BlockParentsReader: Send + Sync {
    async fn get_block_parents(&self, block_hash: &str) -> SyncResult<Vec<String>>;
}

/// Every node capability the pipeline uses.
pub trait DagNode:
    TipReader
    + BlockByNumberReader
    + BlockByHashReader
    + ReceiptReader
    + EventLogReader
    + CodeReader
    + BalanceReader
    + DagInfoReader
    + BlueScoreReader
    + BlockParentsReader
{
}

impl<T> DagNode for T where
    T: TipReader
        + BlockByNumberReader
        + BlockByHashReader
        + ReceiptReader
        + EventLogReader
        + CodeReader
        + BalanceReader
        + DagInfoReader
        + BlueScoreReader
        + BlockParentsReader
{
}

#[async_trait]
pub trait BlockWriter: Send + Sync {
    /// Insert-or-update keyed by hash. See [`StoredBlock::upsert`].
    async fn save_block(&self, block: &Block) -> SyncResult<()>;

    /// Applies a partial update. Fails with `NotFound` for unknown hashes.
    async fn update_block(&self, hash: &str, update: &BlockUpdate) -> SyncResult<()>;
}

#[async_trait]
pub trait BlockReader: Send + Sync {
    async fn get_block(&self, hash: &str) -> SyncResult<Option<StoredBlock>>;

    /// Several DAG blocks can share a height; the highest blue score wins.
    async fn get_block_at_height(&self, height: u64) -> SyncResult<Option<StoredBlock>>;

    /// Most recent blocks by height, newest first.
    async fn get_latest_blocks(&self, limit: usize) -> SyncResult<Vec<StoredBlock>>;
}

#[async_trait]
pub trait TransactionWriter: Send + Sync {
    /// Upsert keyed by hash. See [`Transaction::merge`].
    async fn save_transaction(&self, tx: &Transaction) -> SyncResult<()>;

    /// Fails with `NotFound` when the transaction was never saved.
    async fn update_transaction_status(
        &self,
        tx_hash: &str,
        status: TxStatus,
        gas_used: u64,
    ) -> SyncResult<()>;

    async fn set_contract_address(&self, tx_hash: &str, contract_address: &str) -> SyncResult<()>;
}

#[async_trait]
pub trait TransactionReader: Send + Sync {
    async fn get_transaction(&self, tx_hash: &str) -> SyncResult<Option<Transaction>>;

    /// Ordered by transaction index.
    async fn get_transactions_by_block(&self, block_hash: &str) -> SyncResult<Vec<Transaction>>;
}

#[async_trait]
pub trait LogWriter: Send + Sync {
    /// Keyed by `(transaction_hash, log_index)`. Existing rows are left as is.
    async fn save_log(&self, log: &Log) -> SyncResult<()>;
}

#[async_trait]
pub trait LogReader: Send + Sync {
    /// Ordered by log index.
    async fn get_logs_by_transaction(&self, tx_hash: &str) -> SyncResult<Vec<Log>>;

    /// Inclusive height range, ordered by height then log index.
    async fn get_logs_by_address(
        &self,
        address: &str,
        from_block: u64,
        to_block: u64,
    ) -> SyncResult<Vec<Log>>;
}

#[async_trait]
pub trait DagWriter: Send + Sync {
    /// Upsert keyed by `(child, parent)`. Marking an edge selected clears the
    /// flag on the child's other edges.
    async fn save_dag_relationship(
        &self,
        child_hash: &str,
        parent_hash: &str,
        is_selected_parent: bool,
    ) -> SyncResult<()>;

    /// Upsert keyed by block hash. See [`GhostdagData::merge`].
    async fn save_ghostdag_data(&self, data: &GhostdagData) -> SyncResult<()>;

    /// Records the selected parent on the block's annotation, creating a
    /// placeholder annotation if none exists yet.
    async fn set_selected_parent(&self, block_hash: &str, parent_hash: &str) -> SyncResult<()>;
}

#[async_trait]
pub trait DagReader: Send + Sync {
    /// Selected parent first, then by parent hash.
    async fn get_parents(&self, block_hash: &str) -> SyncResult<Vec<DagRelationship>>;

    async fn get_children(&self, block_hash: &str) -> SyncResult<Vec<DagRelationship>>;

    async fn get_ghostdag_data(&self, block_hash: &str) -> SyncResult<Option<GhostdagData>>;
}

#[async_trait]
pub trait AddressWriter: Send + Sync {
    /// Records that `address` took part in `tx_hash`. Returns `true` the first
    /// time the pair is seen; only then is the transaction count bumped. A
    /// `nonce` raises the stored nonce to at least that value.
    async fn record_address_transaction(
        &self,
        address: &str,
        tx_hash: &str,
        nonce: Option<u64>,
    ) -> SyncResult<bool>;

    /// Marks the address as a contract and stores its bytecode.
    async fn save_contract_code(&self, address: &str, code: &Bytes) -> SyncResult<()>;

    async fn update_address_balance(&self, address: &str, balance: U256) -> SyncResult<()>;
}

#[async_trait]
pub trait AddressReader: Send + Sync {
    async fn get_address(&self, address: &str) -> SyncResult<Option<Address>>;

    /// Zero for unknown addresses.
    async fn get_address_balance(&self, address: &str) -> SyncResult<U256>;
}

/// Highest height whose pipeline run finished, used to resume after a
/// restart. A block row alone does not count: it is written before the DAG
/// stage that must also succeed.
#[async_trait]
pub trait IndexProgress: Send + Sync {
    async fn get_indexed_height(&self) -> SyncResult<Option<u64>>;

    /// Raises the stored height to `height`. Lower values are ignored, since
    /// backfill workers finish out of order.
    async fn set_indexed_height(&self, height: u64) -> SyncResult<()>;
}

/// Every storage port.
pub trait IndexerStore:
    BlockWriter
    + BlockReader
    + TransactionWriter
    + TransactionReader
    + LogWriter
    + LogReader
    + DagWriter
    + DagReader
    + AddressWriter
    + AddressReader
    + IndexProgress
{
}

impl<T> IndexerStore for T where
    T: BlockWriter
        + BlockReader
        + TransactionWriter
        + TransactionReader
        + LogWriter
        + LogReader
        + DagWriter
        + DagReader
        + AddressWriter
        + AddressReader
        + IndexProgress
{
}

/// Indexes everything the implementation is responsible for at one height.
/// Driven by the poll loop and by range backfills.
#[async_trait]
pub trait HeightIndexer: Send + Sync {
    async fn index_height(&self, height: u64) -> SyncResult<()>;
}
