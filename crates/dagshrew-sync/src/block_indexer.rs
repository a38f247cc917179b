//! Block indexing: fetch, map, validate, persist.
//!
//! The block row is authoritative: a fetch, mapping, validation or block write
//! failure fails the call. Transactions are persisted after their block, one
//! by one, and a transaction that cannot be mapped, validated or written is
//! logged and skipped.

use alloy_primitives::U256;
use async_trait::async_trait;
use log::{debug, info, warn};
use serde_json::Value;
use std::sync::Arc;

use crate::domain::{Block, Transaction};
use crate::traits::{BlockByNumberReader, BlockWriter, HeightIndexer, TransactionWriter};
use crate::wire::{
    decode_bytes, decode_quantity_value, decode_u256, decode_u64, non_empty, RpcBlock,
    RpcTransaction,
};
use crate::{SyncError, SyncResult};

/// Maps a wire block onto the canonical model. Transactions that do not
/// decode are dropped with a warning.
pub fn map_block(raw: RpcBlock) -> SyncResult<Block> {
    let number = decode_u64("number", &raw.number)?;
    let blue_score = match &raw.blue_score {
        Some(value) => decode_quantity_value("blueScore", value)?,
        None => 0,
    };
    let base_fee_per_gas = raw
        .base_fee_per_gas
        .as_deref()
        .map(|fee| decode_u64("baseFeePerGas", fee))
        .transpose()?;

    let mut transactions = Vec::with_capacity(raw.transactions.len());
    for (index, object) in raw.transactions.iter().enumerate() {
        if !object.is_object() {
            continue;
        }
        match map_transaction(object, &raw.hash, number, index as u32) {
            Ok(tx) => transactions.push(tx),
            Err(e) => warn!("Skipping malformed transaction in block {}: {}", raw.hash, e),
        }
    }

    Ok(Block {
        number,
        timestamp: decode_u64("timestamp", &raw.timestamp)?,
        gas_limit: decode_u64("gasLimit", &raw.gas_limit)?,
        gas_used: decode_u64("gasUsed", &raw.gas_used)?,
        base_fee_per_gas,
        blue_score,
        is_chain_block: raw.is_chain_block,
        selected_parent: non_empty(raw.selected_parent),
        transactions_root: non_empty(raw.transactions_root),
        state_root: non_empty(raw.state_root),
        receipts_root: non_empty(raw.receipts_root),
        hash: raw.hash,
        parent_hashes: raw.parent_hashes,
        miner: raw.miner,
        transactions,
    })
}

/// Maps one inlined transaction object. `index` is its position in the
/// block's transaction list.
pub fn map_transaction(
    object: &Value,
    block_hash: &str,
    block_number: u64,
    index: u32,
) -> SyncResult<Transaction> {
    let raw: RpcTransaction = serde_json::from_value(object.clone())
        .map_err(|e| SyncError::Decode(format!("transaction: {}", e)))?;

    let to = non_empty(raw.to);
    let value = match non_empty(raw.value) {
        Some(v) => decode_u256("value", &v)?,
        None => U256::ZERO,
    };
    let gas_price = non_empty(raw.gas_price)
        .map(|p| decode_u256("gasPrice", &p))
        .transpose()?;
    // Undecodable input is stored as empty.
    let input = non_empty(raw.input)
        .and_then(|i| decode_bytes("input", &i).ok())
        .unwrap_or_default();

    Ok(Transaction {
        hash: raw.hash,
        block_hash: block_hash.to_string(),
        block_number,
        transaction_index: index,
        from: raw.from,
        creates_contract: to.is_none(),
        to,
        value,
        gas: decode_u64("gas", &raw.gas)?,
        gas_price,
        gas_used: None,
        nonce: decode_u64("nonce", &raw.nonce)?,
        input,
        status: None,
        contract_address: None,
    })
}

pub struct BlockIndexer<N, B, T> {
    node: Arc<N>,
    blocks: Arc<B>,
    transactions: Arc<T>,
}

impl<N, B, T> BlockIndexer<N, B, T>
where
    N: BlockByNumberReader,
    B: BlockWriter,
    T: TransactionWriter,
{
    pub fn new(node: Arc<N>, blocks: Arc<B>, transactions: Arc<T>) -> Self {
        Self {
            node,
            blocks,
            transactions,
        }
    }

    /// Indexes the block at `height` and returns what was persisted.
    ///
    /// A block the node does not have yet is [`SyncError::NotFound`].
    pub async fn index_block(&self, height: u64) -> SyncResult<Block> {
        let raw = self
            .node
            .get_block_by_number(height, true)
            .await?
            .ok_or_else(|| SyncError::NotFound(format!("block {}", height)))?;
        let block = map_block(raw)?;
        block.validate()?;

        self.blocks.save_block(&block).await?;

        let mut saved = 0usize;
        for tx in &block.transactions {
            if let Err(e) = tx.validate() {
                warn!("Skipping invalid transaction {} in block {}: {}", tx.hash, height, e);
                continue;
            }
            match self.transactions.save_transaction(tx).await {
                Ok(()) => saved += 1,
                Err(e) => warn!("Failed to save transaction {} in block {}: {}", tx.hash, height, e),
            }
        }

        if saved == block.transactions.len() {
            debug!("Indexed block {} ({}) with {} transactions", height, block.hash, saved);
        } else {
            info!(
                "Indexed block {} ({}): saved {} of {} transactions",
                height,
                block.hash,
                saved,
                block.transactions.len()
            );
        }
        Ok(block)
    }
}

#[async_trait]
impl<N, B, T> HeightIndexer for BlockIndexer<N, B, T>
where
    N: BlockByNumberReader,
    B: BlockWriter,
    T: TransactionWriter,
{
    async fn index_height(&self, height: u64) -> SyncResult<()> {
        self.index_block(height).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ValidationError;
    use crate::memstore::InMemoryStore;
    use crate::mock::{address, block_hash, hash, tx_hash, wire_tx, BlockBuilder, FaultyStore, MockNode};
    use crate::traits::{BlockReader, TransactionReader};
    use serde_json::json;

    type Indexer = BlockIndexer<MockNode, FaultyStore<InMemoryStore>, FaultyStore<InMemoryStore>>;

    fn setup(node: MockNode) -> (Indexer, Arc<FaultyStore<InMemoryStore>>) {
        let _ = env_logger::builder().is_test(true).try_init();
        let store = Arc::new(FaultyStore::new(InMemoryStore::new()));
        (
            BlockIndexer::new(Arc::new(node), store.clone(), store.clone()),
            store,
        )
    }

    #[test]
    fn test_map_contract_creation() {
        let raw = BlockBuilder::new(3)
            .tx(wire_tx(&tx_hash(3, 0), &address(1), None, 0))
            .build();
        let block = map_block(raw).unwrap();
        let tx = &block.transactions[0];
        assert!(tx.creates_contract);
        assert!(tx.to.is_none());
        assert_eq!(tx.value, U256::from(1_000_000_000_000_000_000u64));
        assert_eq!(tx.gas, 21_000);
        assert_eq!(tx.gas_price, Some(U256::from(1_000_000_000u64)));
    }

    #[test]
    fn test_map_skips_malformed_transactions() {
        let raw = BlockBuilder::new(3)
            .tx(wire_tx(&tx_hash(3, 0), &address(1), Some(&address(2)), 0))
            .tx(json!({"hash": tx_hash(3, 1), "from": address(1), "gas": "nonsense", "nonce": "0x0"}))
            .tx(json!(tx_hash(3, 2)))
            .tx(wire_tx(&tx_hash(3, 3), &address(1), Some(&address(2)), 1))
            .build();
        let block = map_block(raw).unwrap();
        assert_eq!(block.transactions.len(), 2);
        assert_eq!(block.transactions[0].transaction_index, 0);
        assert_eq!(block.transactions[1].transaction_index, 3);
        assert_eq!(block.transactions[1].hash, tx_hash(3, 3));
    }

    #[tokio::test]
    async fn test_index_block_persists_block_and_transactions() {
        let node = MockNode::with_blocks(vec![BlockBuilder::new(5).transfers(3).build()]);
        let (indexer, store) = setup(node);

        let block = indexer.index_block(5).await.unwrap();
        assert_eq!(block.hash, block_hash(5));

        let stored = store.get_block(&block_hash(5)).await.unwrap().unwrap();
        assert_eq!(stored.transaction_count, 3);
        assert!(stored.block.transactions.is_empty());
        let txs = store.get_transactions_by_block(&block_hash(5)).await.unwrap();
        assert_eq!(txs.len(), 3);
    }

    #[tokio::test]
    async fn test_missing_block_is_not_found() {
        let (indexer, _) = setup(MockNode::new());
        let err = indexer.index_block(9).await.unwrap_err();
        assert!(matches!(err, SyncError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_invalid_block_is_not_persisted() {
        let raw = BlockBuilder::new(4).parents(vec!["0xnot-a-hash".to_string()]).build();
        let (indexer, store) = setup(MockNode::with_blocks(vec![raw]));

        let err = indexer.index_block(4).await.unwrap_err();
        assert!(matches!(
            err,
            SyncError::Validation(ValidationError::InvalidHash { .. })
        ));
        assert!(store.get_block(&block_hash(4)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_genesis_with_parents_is_rejected() {
        let raw = BlockBuilder::new(0).parents(vec![hash(1)]).build();
        let (indexer, _) = setup(MockNode::with_blocks(vec![raw]));
        let err = indexer.index_block(0).await.unwrap_err();
        assert!(matches!(
            err,
            SyncError::Validation(ValidationError::GenesisWithParents { .. })
        ));
    }

    #[tokio::test]
    async fn test_transaction_failure_is_contained() {
        let node = MockNode::with_blocks(vec![BlockBuilder::new(6).transfers(3).build()]);
        let (indexer, store) = setup(node);
        store.fail_transaction(&tx_hash(6, 1));

        indexer.index_block(6).await.unwrap();

        assert!(store.get_transaction(&tx_hash(6, 0)).await.unwrap().is_some());
        assert!(store.get_transaction(&tx_hash(6, 1)).await.unwrap().is_none());
        assert!(store.get_transaction(&tx_hash(6, 2)).await.unwrap().is_some());
        assert!(store.get_block(&block_hash(6)).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_block_write_failure_is_fatal() {
        let node = MockNode::with_blocks(vec![BlockBuilder::new(6).transfers(1).build()]);
        let (indexer, store) = setup(node);
        store.fail_block(&block_hash(6));

        let err = indexer.index_block(6).await.unwrap_err();
        assert!(matches!(err, SyncError::Storage(_)));
        assert!(store.get_transaction(&tx_hash(6, 0)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reindex_is_idempotent() {
        let node = MockNode::with_blocks(vec![BlockBuilder::new(7).transfers(2).gas_used(100).build()]);
        let (indexer, store) = setup(node.clone());
        indexer.index_block(7).await.unwrap();

        node.add_block(
            BlockBuilder::new(7)
                .transfers(2)
                .gas_used(250)
                .blue_score(70)
                .build(),
        );
        indexer.index_block(7).await.unwrap();

        let stats = store.inner().stats().unwrap();
        assert_eq!(stats.blocks, 1);
        assert_eq!(stats.transactions, 2);
        let stored = store.get_block(&block_hash(7)).await.unwrap().unwrap();
        assert_eq!(stored.block.gas_used, 250);
        assert_eq!(stored.block.blue_score, 70);
    }
}
