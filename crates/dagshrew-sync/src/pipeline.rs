//! Per-height orchestration of the indexers.
//!
//! Stage order for one height:
//!
//! 1. block and transactions ([`BlockIndexer`]), fatal
//! 2. DAG edges and GHOSTDAG annotation ([`DagIndexer`]), fatal, followed by
//!    pushing the annotated blue score onto the block row
//! 3. receipts ([`TransactionIndexer`]), best-effort per transaction
//! 4. address aggregate ([`AddressIndexer`]), best-effort per item
//!
//! Stages 2 to 4 are switched by [`PipelineConfig`]. Once every enabled stage
//! has returned, the height is recorded through [`IndexProgress`]; restarts
//! resume from that record, not from the block rows.

use async_trait::async_trait;
use log::{debug, info, warn};
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::address_indexer::{AddressIndexer, AddressSummary};
use crate::block_indexer::BlockIndexer;
use crate::dag_indexer::DagIndexer;
use crate::domain::{Block, BlockUpdate};
use crate::traits::{DagNode, HeightIndexer, IndexProgress, IndexerStore};
use crate::transaction_indexer::{ReceiptOutcome, TransactionIndexer};
use crate::types::PipelineConfig;
use crate::SyncResult;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockSummary {
    pub height: u64,
    pub hash: String,
    pub transactions: usize,
    pub dag_edges: usize,
    pub blue_score: Option<u64>,
    pub receipts_indexed: usize,
    pub receipts_pending: usize,
    pub receipts_failed: usize,
    pub contracts: usize,
    pub addresses: AddressSummary,
}

pub struct BlockPipeline<N, S> {
    blocks: BlockIndexer<N, S, S>,
    dag: DagIndexer<N, S>,
    receipts: TransactionIndexer<N, S, S>,
    addresses: AddressIndexer<N, S>,
    store: Arc<S>,
    config: PipelineConfig,
}

impl<N, S> BlockPipeline<N, S>
where
    N: DagNode,
    S: IndexerStore,
{
    pub fn new(node: Arc<N>, store: Arc<S>, config: PipelineConfig) -> Self {
        Self {
            blocks: BlockIndexer::new(node.clone(), store.clone(), store.clone()),
            dag: DagIndexer::new(node.clone(), store.clone()),
            receipts: TransactionIndexer::new(node.clone(), store.clone(), store.clone()),
            addresses: AddressIndexer::new(node, store.clone()),
            store,
            config,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Runs every enabled stage for the block at `height`.
    pub async fn index_block(&self, height: u64) -> SyncResult<BlockSummary> {
        let block = self.blocks.index_block(height).await?;
        let mut summary = BlockSummary {
            height,
            hash: block.hash.clone(),
            transactions: block.transactions.len(),
            ..BlockSummary::default()
        };

        if self.config.index_dag {
            summary.dag_edges = self
                .dag
                .index_relationships(&block.hash, block.selected_parent.as_deref())
                .await?;
            let annotation = self.dag.index_ghostdag(&block.hash, height).await?;
            self.store
                .update_block(&block.hash, &BlockUpdate::blue_score(annotation.blue_score))
                .await?;
            summary.blue_score = Some(annotation.blue_score);
        }

        let mut contracts = Vec::new();
        if self.config.index_receipts {
            for tx in &block.transactions {
                match self.receipts.index_receipt(&tx.hash).await {
                    Ok(ReceiptOutcome::Pending) => summary.receipts_pending += 1,
                    Ok(outcome) => {
                        summary.receipts_indexed += 1;
                        if let Some(address) = outcome.contract_address() {
                            contracts.push(address.to_string());
                        }
                    }
                    Err(e) if e.is_cancelled() => return Err(e),
                    Err(e) => {
                        warn!("Failed to index receipt {} in block {}: {}", tx.hash, height, e);
                        summary.receipts_failed += 1;
                    }
                }
            }
        }

        if self.config.index_addresses {
            summary.addresses = self.addresses.index_block_addresses(&block).await;
            for address in &contracts {
                match self.addresses.index_contract(address).await {
                    Ok(_) => summary.contracts += 1,
                    Err(e) if e.is_cancelled() => return Err(e),
                    Err(e) => warn!("Failed to index contract {}: {}", address, e),
                }
            }
            if self.config.track_balances {
                self.refresh_balances(&block, &contracts).await?;
            }
        }

        self.store.set_indexed_height(height).await?;

        info!(
            "Indexed block {} ({}): {} txs, {} edges, {} receipts ({} pending, {} failed)",
            height,
            summary.hash,
            summary.transactions,
            summary.dag_edges,
            summary.receipts_indexed,
            summary.receipts_pending,
            summary.receipts_failed
        );
        Ok(summary)
    }

    async fn refresh_balances(&self, block: &Block, contracts: &[String]) -> SyncResult<()> {
        let mut touched = BTreeSet::new();
        for tx in &block.transactions {
            touched.insert(tx.from.to_ascii_lowercase());
            if let Some(to) = &tx.to {
                touched.insert(to.to_ascii_lowercase());
            }
        }
        touched.extend(contracts.iter().map(|c| c.to_ascii_lowercase()));

        for address in touched {
            match self.addresses.refresh_balance(&address).await {
                Ok(balance) => debug!("Balance of {} is {}", address, balance),
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => warn!("Failed to refresh balance of {}: {}", address, e),
            }
        }
        Ok(())
    }
}

#[async_trait]
impl<N, S> HeightIndexer for BlockPipeline<N, S>
where
    N: DagNode,
    S: IndexerStore,
{
    async fn index_height(&self, height: u64) -> SyncResult<()> {
        self.index_block(height).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memstore::InMemoryStore;
    use crate::mock::{
        address, block_hash, hash, tx_hash, wire_receipt, wire_tx, BlockBuilder, FaultyStore,
        MockNode,
    };
    use crate::traits::{AddressReader, BlockReader, DagReader, LogReader, TransactionReader};
    use crate::SyncError;
    use alloy_primitives::{Bytes, U256};

    fn all_stages() -> PipelineConfig {
        PipelineConfig {
            index_dag: true,
            index_receipts: true,
            index_addresses: true,
            track_balances: true,
        }
    }

    fn setup(
        node: MockNode,
        config: PipelineConfig,
    ) -> (BlockPipeline<MockNode, FaultyStore<InMemoryStore>>, Arc<FaultyStore<InMemoryStore>>) {
        let _ = env_logger::builder().is_test(true).try_init();
        let store = Arc::new(FaultyStore::new(InMemoryStore::new()));
        (BlockPipeline::new(Arc::new(node), store.clone(), config), store)
    }

    fn two_parent_node() -> MockNode {
        let node = MockNode::with_blocks(vec![
            BlockBuilder::new(0).build(),
            BlockBuilder::new(1).hash(&hash(11)).parents(vec![block_hash(0)]).build(),
            BlockBuilder::new(1).parents(vec![block_hash(0)]).build(),
        ]);
        node.add_block(
            BlockBuilder::new(2)
                .parents(vec![block_hash(1), hash(11)])
                .blue_score(1)
                .tx(wire_tx(&tx_hash(2, 0), &address(100), Some(&address(200)), 4))
                .tx(wire_tx(&tx_hash(2, 1), &address(100), None, 5))
                .build(),
        );
        node.set_blue_score(2, 9);
        node.add_receipt(wire_receipt(&tx_hash(2, 0), 1, 21_000, &address(200), 2));
        let mut creation = wire_receipt(&tx_hash(2, 1), 1, 90_000, &address(300), 0);
        creation.contract_address = Some(address(300));
        node.add_receipt(creation);
        node.set_code(&address(300), Bytes::from(vec![0xfe]));
        node.set_balance(&address(100), U256::from(10u64));
        node
    }

    #[tokio::test]
    async fn test_full_pipeline() {
        let (pipeline, store) = setup(two_parent_node(), all_stages());

        let summary = pipeline.index_block(2).await.unwrap();
        assert_eq!(summary.transactions, 2);
        assert_eq!(summary.dag_edges, 2);
        assert_eq!(summary.blue_score, Some(9));
        assert_eq!(summary.receipts_indexed, 2);
        assert_eq!(summary.contracts, 1);

        let stored = store.get_block(&block_hash(2)).await.unwrap().unwrap();
        assert_eq!(stored.block.blue_score, 9);

        let parents = store.get_parents(&block_hash(2)).await.unwrap();
        assert_eq!(parents[0].parent_hash, block_hash(1));
        assert!(parents[0].is_selected_parent);

        let creation = store.get_transaction(&tx_hash(2, 1)).await.unwrap().unwrap();
        assert!(creation.creates_contract);
        assert_eq!(creation.contract_address, Some(address(300)));
        assert_eq!(store.get_logs_by_transaction(&tx_hash(2, 0)).await.unwrap().len(), 2);

        let contract = store.get_address(&address(300)).await.unwrap().unwrap();
        assert!(contract.is_contract);
        let sender = store.get_address(&address(100)).await.unwrap().unwrap();
        assert_eq!(sender.transaction_count, 2);
        assert_eq!(sender.nonce, 6);
        assert_eq!(sender.balance, U256::from(10u64));
    }

    #[tokio::test]
    async fn test_disabled_stages_are_skipped() {
        let node = two_parent_node();
        let config = PipelineConfig {
            index_dag: false,
            index_receipts: false,
            index_addresses: false,
            track_balances: false,
        };
        let (pipeline, store) = setup(node.clone(), config);

        let summary = pipeline.index_block(2).await.unwrap();
        assert_eq!(summary.dag_edges, 0);
        assert_eq!(summary.blue_score, None);
        assert_eq!(node.call_count("phoenix_getBlockParents"), 0);
        assert_eq!(node.call_count("eth_getTransactionReceipt"), 0);
        assert!(store.get_address(&address(100)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_dag_failure_fails_the_height() {
        let node = two_parent_node();
        node.fail_method("phoenix_getDAGInfo", 1);
        let (pipeline, _) = setup(node, all_stages());

        assert!(pipeline.index_block(2).await.is_err());
    }

    #[tokio::test]
    async fn test_receipt_failures_are_contained() {
        let node = two_parent_node();
        let (pipeline, store) = setup(node, PipelineConfig::default());
        store.fail_status_update(&tx_hash(2, 0));

        let summary = pipeline.index_block(2).await.unwrap();
        assert_eq!(summary.receipts_failed, 1);
        assert_eq!(summary.receipts_indexed, 1);
    }

    #[tokio::test]
    async fn test_failed_dag_stage_is_not_recorded_as_indexed() {
        let node = MockNode::with_blocks((0..3).map(|h| BlockBuilder::new(h).build()).collect());
        let (pipeline, store) = setup(node.clone(), all_stages());
        pipeline.index_height(0).await.unwrap();
        pipeline.index_height(1).await.unwrap();

        node.fail_method("phoenix_getDAGInfo", 1);
        assert!(pipeline.index_height(2).await.is_err());

        // The block row and a placeholder annotation exist, but the height
        // does not count as indexed.
        assert!(store.get_block(&block_hash(2)).await.unwrap().is_some());
        let placeholder = store.get_ghostdag_data(&block_hash(2)).await.unwrap().unwrap();
        assert!(!placeholder.complete);
        assert_eq!(store.get_indexed_height().await.unwrap(), Some(1));

        pipeline.index_height(2).await.unwrap();
        let annotation = store.get_ghostdag_data(&block_hash(2)).await.unwrap().unwrap();
        assert!(annotation.complete);
        assert_eq!(annotation.blue_score, 2);
        assert_eq!(annotation.selected_parent, Some(block_hash(1)));
        assert_eq!(store.get_indexed_height().await.unwrap(), Some(2));
    }

    #[tokio::test]
    async fn test_progress_write_failure_fails_the_height() {
        let (pipeline, store) = setup(two_parent_node(), PipelineConfig::default());
        store.fail_progress_writes(true);

        assert!(pipeline.index_height(0).await.is_err());
        assert_eq!(store.get_indexed_height().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_pipeline_as_height_indexer() {
        let (pipeline, store) = setup(two_parent_node(), PipelineConfig::default());
        let indexer: &dyn HeightIndexer = &pipeline;

        indexer.index_height(0).await.unwrap();
        assert!(store.get_block(&block_hash(0)).await.unwrap().is_some());
        assert!(matches!(
            indexer.index_height(50).await,
            Err(SyncError::NotFound(_))
        ));
    }
}
