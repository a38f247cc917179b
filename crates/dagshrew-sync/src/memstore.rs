//! In-memory implementation of every storage port.
//!
//! Used by tests and by `--in-memory` dry runs. All state sits behind one
//! `RwLock`, so each port call is atomic with respect to the others.

use alloy_primitives::{Bytes, U256};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::domain::{
    canonical_order, normalize_address, unix_now, Address, Block, BlockUpdate, DagRelationship, GhostdagData, Log,
    StoredBlock, Transaction, TxStatus,
};
use crate::traits::*;
use crate::{SyncError, SyncResult};

#[derive(Default)]
struct State {
    blocks: HashMap<String, StoredBlock>,
    heights: BTreeMap<u64, HashSet<String>>,
    transactions: HashMap<String, Transaction>,
    logs: BTreeMap<(String, u32), Log>,
    /// (child, parent) -> is_selected_parent
    edges: BTreeMap<(String, String), bool>,
    ghostdag: HashMap<String, GhostdagData>,
    addresses: HashMap<String, Address>,
    address_transactions: HashSet<(String, String)>,
    indexed_height: Option<u64>,
}

/// Row counts, for logging and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub blocks: usize,
    pub transactions: usize,
    pub logs: usize,
    pub dag_relationships: usize,
    pub ghostdag: usize,
    pub addresses: usize,
}

#[derive(Default)]
pub struct InMemoryStore {
    state: RwLock<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> SyncResult<RwLockReadGuard<'_, State>> {
        self.state
            .read()
            .map_err(|_| SyncError::Storage("in-memory store lock poisoned".to_string()))
    }

    fn write(&self) -> SyncResult<RwLockWriteGuard<'_, State>> {
        self.state
            .write()
            .map_err(|_| SyncError::Storage("in-memory store lock poisoned".to_string()))
    }

    pub fn stats(&self) -> SyncResult<StoreStats> {
        let state = self.read()?;
        Ok(StoreStats {
            blocks: state.blocks.len(),
            transactions: state.transactions.len(),
            logs: state.logs.len(),
            dag_relationships: state.edges.len(),
            ghostdag: state.ghostdag.len(),
            addresses: state.addresses.len(),
        })
    }
}

#[async_trait]
impl BlockWriter for InMemoryStore {
    async fn save_block(&self, block: &Block) -> SyncResult<()> {
        let mut state = self.write()?;
        let existing = state.blocks.remove(&block.hash);
        let stored = StoredBlock::upsert(existing, block, unix_now());
        state
            .heights
            .entry(stored.block.number)
            .or_default()
            .insert(block.hash.clone());
        state.blocks.insert(block.hash.clone(), stored);
        Ok(())
    }

    async fn update_block(&self, hash: &str, update: &BlockUpdate) -> SyncResult<()> {
        let mut state = self.write()?;
        let stored = state
            .blocks
            .get_mut(hash)
            .ok_or_else(|| SyncError::NotFound(format!("block {}", hash)))?;
        update.apply(&mut stored.block);
        Ok(())
    }
}

#[async_trait]
impl BlockReader for InMemoryStore {
    async fn get_block(&self, hash: &str) -> SyncResult<Option<StoredBlock>> {
        Ok(self.read()?.blocks.get(hash).cloned())
    }

    async fn get_block_at_height(&self, height: u64) -> SyncResult<Option<StoredBlock>> {
        let state = self.read()?;
        let Some(hashes) = state.heights.get(&height) else {
            return Ok(None);
        };
        Ok(hashes
            .iter()
            .filter_map(|hash| state.blocks.get(hash))
            .max_by(|a, b| canonical_order(a, b))
            .cloned())
    }

    async fn get_latest_blocks(&self, limit: usize) -> SyncResult<Vec<StoredBlock>> {
        let state = self.read()?;
        let mut latest = Vec::with_capacity(limit);
        for hashes in state.heights.values().rev() {
            let mut at_height: Vec<&StoredBlock> =
                hashes.iter().filter_map(|h| state.blocks.get(h)).collect();
            at_height.sort_by(|a, b| a.block.hash.cmp(&b.block.hash));
            for stored in at_height {
                if latest.len() == limit {
                    return Ok(latest);
                }
                latest.push(stored.clone());
            }
        }
        Ok(latest)
    }
}

#[async_trait]
impl TransactionWriter for InMemoryStore {
    async fn save_transaction(&self, tx: &Transaction) -> SyncResult<()> {
        let mut state = self.write()?;
        let existing = state.transactions.remove(&tx.hash);
        state
            .transactions
            .insert(tx.hash.clone(), Transaction::merge(existing, tx.clone()));
        Ok(())
    }

    async fn update_transaction_status(
        &self,
        tx_hash: &str,
        status: TxStatus,
        gas_used: u64,
    ) -> SyncResult<()> {
        let mut state = self.write()?;
        let tx = state
            .transactions
            .get_mut(tx_hash)
            .ok_or_else(|| SyncError::NotFound(format!("transaction {}", tx_hash)))?;
        tx.status = Some(status);
        tx.gas_used = Some(gas_used);
        Ok(())
    }

    async fn set_contract_address(&self, tx_hash: &str, contract_address: &str) -> SyncResult<()> {
        let mut state = self.write()?;
        let tx = state
            .transactions
            .get_mut(tx_hash)
            .ok_or_else(|| SyncError::NotFound(format!("transaction {}", tx_hash)))?;
        tx.contract_address = Some(contract_address.to_string());
        Ok(())
    }
}

#[async_trait]
impl TransactionReader for InMemoryStore {
    async fn get_transaction(&self, tx_hash: &str) -> SyncResult<Option<Transaction>> {
        Ok(self.read()?.transactions.get(tx_hash).cloned())
    }

    async fn get_transactions_by_block(&self, block_hash: &str) -> SyncResult<Vec<Transaction>> {
        let state = self.read()?;
        let mut txs: Vec<Transaction> = state
            .transactions
            .values()
            .filter(|tx| tx.block_hash == block_hash)
            .cloned()
            .collect();
        txs.sort_by_key(|tx| tx.transaction_index);
        Ok(txs)
    }
}

#[async_trait]
impl LogWriter for InMemoryStore {
    async fn save_log(&self, log: &Log) -> SyncResult<()> {
        let mut state = self.write()?;
        state
            .logs
            .entry((log.transaction_hash.clone(), log.log_index))
            .or_insert_with(|| log.clone());
        Ok(())
    }
}

#[async_trait]
impl LogReader for InMemoryStore {
    async fn get_logs_by_transaction(&self, tx_hash: &str) -> SyncResult<Vec<Log>> {
        let state = self.read()?;
        Ok(state
            .logs
            .range((tx_hash.to_string(), 0)..=(tx_hash.to_string(), u32::MAX))
            .map(|(_, log)| log.clone())
            .collect())
    }

    async fn get_logs_by_address(
        &self,
        address: &str,
        from_block: u64,
        to_block: u64,
    ) -> SyncResult<Vec<Log>> {
        let state = self.read()?;
        let mut logs: Vec<Log> = state
            .logs
            .values()
            .filter(|log| log.address.eq_ignore_ascii_case(address))
            .filter(|log| {
                log.block_number
                    .map_or(false, |n| n >= from_block && n <= to_block)
            })
            .cloned()
            .collect();
        logs.sort_by(|a, b| {
            a.block_number
                .cmp(&b.block_number)
                .then_with(|| a.transaction_hash.cmp(&b.transaction_hash))
                .then_with(|| a.log_index.cmp(&b.log_index))
        });
        Ok(logs)
    }
}

#[async_trait]
impl DagWriter for InMemoryStore {
    async fn save_dag_relationship(
        &self,
        child_hash: &str,
        parent_hash: &str,
        is_selected_parent: bool,
    ) -> SyncResult<()> {
        let mut state = self.write()?;
        if is_selected_parent {
            for ((child, _), selected) in state.edges.iter_mut() {
                if child == child_hash {
                    *selected = false;
                }
            }
        }
        state.edges.insert(
            (child_hash.to_string(), parent_hash.to_string()),
            is_selected_parent,
        );
        Ok(())
    }

    async fn save_ghostdag_data(&self, data: &GhostdagData) -> SyncResult<()> {
        let mut state = self.write()?;
        let existing = state.ghostdag.remove(&data.block_hash);
        state
            .ghostdag
            .insert(data.block_hash.clone(), GhostdagData::merge(existing, data.clone()));
        Ok(())
    }

    async fn set_selected_parent(&self, block_hash: &str, parent_hash: &str) -> SyncResult<()> {
        let mut state = self.write()?;
        state
            .ghostdag
            .entry(block_hash.to_string())
            .and_modify(|data| data.selected_parent = Some(parent_hash.to_string()))
            .or_insert_with(|| GhostdagData::with_selected_parent(block_hash, parent_hash));
        Ok(())
    }
}

#[async_trait]
impl DagReader for InMemoryStore {
    async fn get_parents(&self, block_hash: &str) -> SyncResult<Vec<DagRelationship>> {
        let state = self.read()?;
        let mut parents: Vec<DagRelationship> = state
            .edges
            .iter()
            .filter(|((child, _), _)| child == block_hash)
            .map(|((child, parent), selected)| DagRelationship {
                child_hash: child.clone(),
                parent_hash: parent.clone(),
                is_selected_parent: *selected,
            })
            .collect();
        parents.sort_by(|a, b| {
            b.is_selected_parent
                .cmp(&a.is_selected_parent)
                .then_with(|| a.parent_hash.cmp(&b.parent_hash))
        });
        Ok(parents)
    }

    async fn get_children(&self, block_hash: &str) -> SyncResult<Vec<DagRelationship>> {
        let state = self.read()?;
        Ok(state
            .edges
            .iter()
            .filter(|((_, parent), _)| parent == block_hash)
            .map(|((child, parent), selected)| DagRelationship {
                child_hash: child.clone(),
                parent_hash: parent.clone(),
                is_selected_parent: *selected,
            })
            .collect())
    }

    async fn get_ghostdag_data(&self, block_hash: &str) -> SyncResult<Option<GhostdagData>> {
        Ok(self.read()?.ghostdag.get(block_hash).cloned())
    }
}

#[async_trait]
impl AddressWriter for InMemoryStore {
    async fn record_address_transaction(
        &self,
        address: &str,
        tx_hash: &str,
        nonce: Option<u64>,
    ) -> SyncResult<bool> {
        let key = normalize_address(address);
        let mut state = self.write()?;
        let first_seen = state
            .address_transactions
            .insert((key.clone(), tx_hash.to_string()));
        let entry = state
            .addresses
            .entry(key)
            .or_insert_with(|| Address::new(address));
        if first_seen {
            entry.transaction_count += 1;
        }
        if let Some(nonce) = nonce {
            entry.nonce = entry.nonce.max(nonce);
        }
        Ok(first_seen)
    }

    async fn save_contract_code(&self, address: &str, code: &Bytes) -> SyncResult<()> {
        let key = normalize_address(address);
        let mut state = self.write()?;
        let entry = state
            .addresses
            .entry(key)
            .or_insert_with(|| Address::new(address));
        entry.is_contract = true;
        entry.contract_code = Some(code.clone());
        Ok(())
    }

    async fn update_address_balance(&self, address: &str, balance: U256) -> SyncResult<()> {
        let key = normalize_address(address);
        let mut state = self.write()?;
        state
            .addresses
            .entry(key)
            .or_insert_with(|| Address::new(address))
            .balance = balance;
        Ok(())
    }
}

#[async_trait]
impl AddressReader for InMemoryStore {
    async fn get_address(&self, address: &str) -> SyncResult<Option<Address>> {
        Ok(self.read()?.addresses.get(&normalize_address(address)).cloned())
    }

    async fn get_address_balance(&self, address: &str) -> SyncResult<U256> {
        Ok(self
            .read()?
            .addresses
            .get(&normalize_address(address))
            .map(|a| a.balance)
            .unwrap_or_default())
    }
}

#[async_trait]
impl IndexProgress for InMemoryStore {
    async fn get_indexed_height(&self) -> SyncResult<Option<u64>> {
        Ok(self.read()?.indexed_height)
    }

    async fn set_indexed_height(&self, height: u64) -> SyncResult<()> {
        let mut state = self.write()?;
        state.indexed_height = Some(state.indexed_height.map_or(height, |h| h.max(height)));
        Ok(())
    }
}
