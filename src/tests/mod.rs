//! Test suite for the dagshrew ingestion pipeline
//!
//! [`TestChain`] builds a small DAG on the mock node: plain transfers with
//! receipts and logs, one contract creation and one merge block with two
//! parents. [`TestStores`] pairs the in-memory store with a RocksDB store in a
//! temporary directory so suites can check both backends agree.

use alloy_primitives::{Bytes, U256};
use anyhow::Result;
use dagshrew_rocksdb::RocksDBStore;
use dagshrew_sync::mock::{
    address, block_hash, hash, tx_hash, wire_receipt, wire_tx, BlockBuilder, MockNode,
};
use dagshrew_sync::wire::encode_quantity;
use dagshrew_sync::InMemoryStore;
use std::sync::Arc;
use tempfile::TempDir;


/// Height of the block that creates a contract.
pub const CONTRACT_HEIGHT: u64 = 2;
/// Height of the block with two parents.
pub const MERGE_HEIGHT: u64 = 3;
/// Transfers per non-genesis block.
pub const TRANSFERS_PER_BLOCK: u64 = 2;
/// Logs emitted by every transfer receipt.
pub const LOGS_PER_RECEIPT: usize = 2;

/// A DAG scenario on the mock node.
pub struct TestChain {
    pub node: MockNode,
    pub len: u64,
}

impl TestChain {
    /// Emitter of every transfer log.
    pub fn emitter() -> String {
        address(300)
    }

    /// Deployer of the contract at [`CONTRACT_HEIGHT`].
    pub fn deployer() -> String {
        address(150)
    }

    pub fn contract() -> String {
        address(400)
    }

    pub fn contract_tx() -> String {
        hash(5_000_000)
    }

    /// Second parent of the merge block; not a block the node serves.
    pub fn side_parent() -> String {
        hash(6_000_000)
    }

    pub fn contract_code() -> Bytes {
        Bytes::from(vec![0x60, 0x80, 0x60, 0x40, 0x52])
    }

    /// Blocks `0..len`. Requires `len > MERGE_HEIGHT`.
    pub fn dag(len: u64) -> Self {
        let node = MockNode::new();
        for height in 0..len {
            let mut builder = BlockBuilder::new(height);
            if height > 0 {
                builder = builder.transfers(TRANSFERS_PER_BLOCK);
            }
            if height == CONTRACT_HEIGHT {
                builder = builder.tx(wire_tx(&Self::contract_tx(), &Self::deployer(), None, 4));
            }
            if height == MERGE_HEIGHT {
                builder = builder
                    .parents(vec![block_hash(height - 1), Self::side_parent()])
                    .selected_parent(&Self::side_parent());
            }
            node.add_block(builder.build());

            if height == 0 {
                continue;
            }
            for index in 0..TRANSFERS_PER_BLOCK {
                let mut receipt = wire_receipt(
                    &tx_hash(height, index),
                    1,
                    21_000,
                    &Self::emitter(),
                    LOGS_PER_RECEIPT,
                );
                receipt.block_hash = Some(block_hash(height));
                receipt.block_number = Some(encode_quantity(height));
                node.add_receipt(receipt);
                node.set_balance(&address(200 + index), U256::from(1_000 + height));
            }
        }

        let mut creation = wire_receipt(&Self::contract_tx(), 1, 120_000, &Self::contract(), 0);
        creation.contract_address = Some(Self::contract());
        creation.block_hash = Some(block_hash(CONTRACT_HEIGHT));
        creation.block_number = Some(encode_quantity(CONTRACT_HEIGHT));
        node.add_receipt(creation);
        node.set_code(&Self::contract(), Self::contract_code());

        Self { node, len }
    }

    /// Transactions across the whole chain.
    pub fn transaction_count(&self) -> usize {
        ((self.len - 1) * TRANSFERS_PER_BLOCK + 1) as usize
    }

    pub fn node(&self) -> Arc<MockNode> {
        Arc::new(self.node.clone())
    }
}

/// One store of each backend.
pub struct TestStores {
    pub memory: Arc<InMemoryStore>,
    pub rocks: Arc<RocksDBStore>,
    _dir: TempDir,
}

impl TestStores {
    pub fn new() -> Result<Self> {
        let dir = tempfile::tempdir()?;
        Ok(Self {
            memory: Arc::new(InMemoryStore::new()),
            rocks: Arc::new(RocksDBStore::open(dir.path())?),
            _dir: dir,
        })
    }
}

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}
