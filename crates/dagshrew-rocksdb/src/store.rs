//! # RocksDB Storage Ports
//!
//! [`RocksDBStore`] implements every dagshrew storage port on a single RocksDB
//! keyspace. Rows are JSON encoded. Secondary orderings are materialized as
//! index keys whose lexicographic order matches the port contract, so every
//! range read is one forward prefix scan.
//!
//! ## Key Layout
//!
//! | key | value |
//! |-----|-------|
//! | `b/{hash}` | [`StoredBlock`] |
//! | `bh/{height:020}/{hash}` | empty |
//! | `t/{hash}` | [`Transaction`] |
//! | `bt/{block}/{index:010}/{tx}` | empty |
//! | `l/{tx}/{index:010}` | [`Log`] |
//! | `al/{address}/{height:020}/{tx}/{index:010}` | empty |
//! | `dc/{child}/{parent}` | selected flag |
//! | `dp/{parent}/{child}` | selected flag |
//! | `g/{hash}` | [`GhostdagData`] |
//! | `a/{address}` | [`Address`] |
//! | `at/{address}/{tx}` | empty |
//! | `m/indexed_height` | highest completed height |
//!
//! Multi-key writes go through one `WriteBatch`. Read-modify-write sequences
//! are serialized by `write_lock`, which keeps upserts atomic across backfill
//! workers sharing the store.

use alloy_primitives::{Bytes, U256};
use async_trait::async_trait;
use dagshrew_sync::{
    canonical_order, normalize_address, unix_now, Address, AddressReader, AddressWriter, Block,
    BlockReader, BlockUpdate, BlockWriter, DagReader, DagRelationship, DagWriter, GhostdagData,
    IndexProgress, Log, LogReader, LogWriter, StoredBlock, SyncError, SyncResult, Transaction, TransactionReader,
    TransactionWriter, TxStatus,
};
use log::debug;
use rocksdb::{Direction, IteratorMode, WriteBatch, DB};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::options::{create_store_options, log_performance_stats};

fn db_err(e: rocksdb::Error) -> SyncError {
    SyncError::Storage(format!("Database error: {}", e))
}

fn block_key(hash: &str) -> Vec<u8> {
    format!("b/{}", hash).into_bytes()
}

fn height_prefix(height: u64) -> Vec<u8> {
    format!("bh/{:020}/", height).into_bytes()
}

fn height_key(height: u64, hash: &str) -> Vec<u8> {
    format!("bh/{:020}/{}", height, hash).into_bytes()
}

fn tx_key(hash: &str) -> Vec<u8> {
    format!("t/{}", hash).into_bytes()
}

fn block_tx_key(tx: &Transaction) -> Vec<u8> {
    format!("bt/{}/{:010}/{}", tx.block_hash, tx.transaction_index, tx.hash).into_bytes()
}

fn log_key(tx_hash: &str, index: u32) -> Vec<u8> {
    format!("l/{}/{:010}", tx_hash, index).into_bytes()
}

fn address_log_key(address: &str, height: u64, tx_hash: &str, index: u32) -> Vec<u8> {
    format!(
        "al/{}/{:020}/{}/{:010}",
        normalize_address(address),
        height,
        tx_hash,
        index
    )
    .into_bytes()
}

fn child_edge_key(child: &str, parent: &str) -> Vec<u8> {
    format!("dc/{}/{}", child, parent).into_bytes()
}

fn parent_edge_key(parent: &str, child: &str) -> Vec<u8> {
    format!("dp/{}/{}", parent, child).into_bytes()
}

fn ghostdag_key(hash: &str) -> Vec<u8> {
    format!("g/{}", hash).into_bytes()
}

fn address_key(address: &str) -> Vec<u8> {
    format!("a/{}", normalize_address(address)).into_bytes()
}

const INDEXED_HEIGHT_KEY: &[u8] = b"m/indexed_height";

fn address_tx_key(address: &str, tx_hash: &str) -> Vec<u8> {
    format!("at/{}/{}", normalize_address(address), tx_hash).into_bytes()
}

/// Last `/`-separated segment of an index key.
fn key_suffix(key: &[u8]) -> SyncResult<String> {
    let key = std::str::from_utf8(key)
        .map_err(|_| SyncError::Storage("Non UTF-8 index key".to_string()))?;
    key.rsplit('/')
        .next()
        .map(str::to_string)
        .ok_or_else(|| SyncError::Storage(format!("Malformed index key {}", key)))
}

fn key_height(key: &[u8]) -> SyncResult<u64> {
    std::str::from_utf8(key)
        .ok()
        .and_then(|k| k.split('/').nth(1))
        .and_then(|h| h.parse().ok())
        .ok_or_else(|| SyncError::Storage("Malformed height index key".to_string()))
}

pub struct RocksDBStore {
    db: Arc<DB>,
    write_lock: Mutex<()>,
}

impl RocksDBStore {
    /// Opens or creates the database at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> SyncResult<Self> {
        let db = DB::open(&create_store_options(), path).map_err(db_err)?;
        Ok(Self::from_db(Arc::new(db)))
    }

    pub fn from_db(db: Arc<DB>) -> Self {
        Self {
            db,
            write_lock: Mutex::new(()),
        }
    }

    pub fn db(&self) -> Arc<DB> {
        self.db.clone()
    }

    pub fn flush(&self) -> SyncResult<()> {
        self.db.flush().map_err(db_err)
    }

    pub fn log_stats(&self) {
        log_performance_stats(&self.db);
    }

    fn lock(&self) -> SyncResult<MutexGuard<'_, ()>> {
        self.write_lock
            .lock()
            .map_err(|_| SyncError::Storage("RocksDB write lock poisoned".to_string()))
    }

    fn get_json<T: DeserializeOwned>(&self, key: &[u8]) -> SyncResult<Option<T>> {
        match self.db.get(key).map_err(db_err)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn put_json<T: Serialize>(batch: &mut WriteBatch, key: &[u8], value: &T) -> SyncResult<()> {
        batch.put(key, serde_json::to_vec(value)?);
        Ok(())
    }

    fn write(&self, batch: WriteBatch) -> SyncResult<()> {
        self.db.write(batch).map_err(db_err)
    }

    fn scan_prefix(&self, prefix: &[u8]) -> SyncResult<Vec<(Box<[u8]>, Box<[u8]>)>> {
        let mut entries = Vec::new();
        for item in self.db.iterator(IteratorMode::From(prefix, Direction::Forward)) {
            let (key, value) = item.map_err(db_err)?;
            if !key.starts_with(prefix) {
                break;
            }
            entries.push((key, value));
        }
        Ok(entries)
    }

    fn edges(&self, prefix: &[u8], owner: &str, by_child: bool) -> SyncResult<Vec<DagRelationship>> {
        self.scan_prefix(prefix)?
            .into_iter()
            .map(|(key, value)| -> SyncResult<DagRelationship> {
                let other = key_suffix(&key)?;
                let is_selected_parent: bool = serde_json::from_slice(&value)?;
                let (child_hash, parent_hash) = if by_child {
                    (owner.to_string(), other)
                } else {
                    (other, owner.to_string())
                };
                Ok(DagRelationship {
                    child_hash,
                    parent_hash,
                    is_selected_parent,
                })
            })
            .collect()
    }

    fn load_address(&self, address: &str) -> SyncResult<Address> {
        Ok(self
            .get_json(&address_key(address))?
            .unwrap_or_else(|| Address::new(address)))
    }

    fn modify_transaction<F>(&self, tx_hash: &str, f: F) -> SyncResult<()>
    where
        F: FnOnce(&mut Transaction),
    {
        let _guard = self.lock()?;
        let mut tx: Transaction = self
            .get_json(&tx_key(tx_hash))?
            .ok_or_else(|| SyncError::NotFound(format!("transaction {}", tx_hash)))?;
        f(&mut tx);
        let mut batch = WriteBatch::default();
        Self::put_json(&mut batch, &tx_key(tx_hash), &tx)?;
        self.write(batch)
    }
}

#[async_trait]
impl BlockWriter for RocksDBStore {
    async fn save_block(&self, block: &Block) -> SyncResult<()> {
        let _guard = self.lock()?;
        let existing = self.get_json(&block_key(&block.hash))?;
        let stored = StoredBlock::upsert(existing, block, unix_now());
        let mut batch = WriteBatch::default();
        Self::put_json(&mut batch, &block_key(&block.hash), &stored)?;
        batch.put(height_key(stored.block.number, &block.hash), b"");
        self.write(batch)
    }

    async fn update_block(&self, hash: &str, update: &BlockUpdate) -> SyncResult<()> {
        let _guard = self.lock()?;
        let mut stored: StoredBlock = self
            .get_json(&block_key(hash))?
            .ok_or_else(|| SyncError::NotFound(format!("block {}", hash)))?;
        update.apply(&mut stored.block);
        let mut batch = WriteBatch::default();
        Self::put_json(&mut batch, &block_key(hash), &stored)?;
        self.write(batch)
    }
}

#[async_trait]
impl BlockReader for RocksDBStore {
    async fn get_block(&self, hash: &str) -> SyncResult<Option<StoredBlock>> {
        self.get_json(&block_key(hash))
    }

    async fn get_block_at_height(&self, height: u64) -> SyncResult<Option<StoredBlock>> {
        let mut best: Option<StoredBlock> = None;
        for (key, _) in self.scan_prefix(&height_prefix(height))? {
            let Some(stored) = self.get_json::<StoredBlock>(&block_key(&key_suffix(&key)?))? else {
                continue;
            };
            best = match best {
                Some(current) if canonical_order(&current, &stored).is_ge() => Some(current),
                _ => Some(stored),
            };
        }
        Ok(best)
    }

    async fn get_latest_blocks(&self, limit: usize) -> SyncResult<Vec<StoredBlock>> {
        let mut latest = Vec::with_capacity(limit);
        let mut group: Vec<StoredBlock> = Vec::new();
        let mut group_height = None;

        // "bh0" sorts right after every "bh/" key.
        for item in self.db.iterator(IteratorMode::From(b"bh0", Direction::Reverse)) {
            let (key, _) = item.map_err(db_err)?;
            if !key.starts_with(b"bh/") {
                break;
            }
            let height = key_height(&key)?;
            if group_height != Some(height) {
                group.sort_by(|a, b| a.block.hash.cmp(&b.block.hash));
                latest.append(&mut group);
                if latest.len() >= limit {
                    break;
                }
                group_height = Some(height);
            }
            if let Some(stored) = self.get_json(&block_key(&key_suffix(&key)?))? {
                group.push(stored);
            }
        }
        group.sort_by(|a, b| a.block.hash.cmp(&b.block.hash));
        latest.append(&mut group);
        latest.truncate(limit);
        Ok(latest)
    }
}

#[async_trait]
impl TransactionWriter for RocksDBStore {
    async fn save_transaction(&self, tx: &Transaction) -> SyncResult<()> {
        let _guard = self.lock()?;
        let existing: Option<Transaction> = self.get_json(&tx_key(&tx.hash))?;
        let mut batch = WriteBatch::default();
        if let Some(previous) = &existing {
            if previous.block_hash != tx.block_hash
                || previous.transaction_index != tx.transaction_index
            {
                batch.delete(block_tx_key(previous));
            }
        }
        let merged = Transaction::merge(existing, tx.clone());
        Self::put_json(&mut batch, &tx_key(&tx.hash), &merged)?;
        batch.put(block_tx_key(&merged), b"");
        self.write(batch)
    }

    async fn update_transaction_status(
        &self,
        tx_hash: &str,
        status: TxStatus,
        gas_used: u64,
    ) -> SyncResult<()> {
        self.modify_transaction(tx_hash, |tx| {
            tx.status = Some(status);
            tx.gas_used = Some(gas_used);
        })
    }

    async fn set_contract_address(&self, tx_hash: &str, contract_address: &str) -> SyncResult<()> {
        self.modify_transaction(tx_hash, |tx| {
            tx.contract_address = Some(contract_address.to_string());
        })
    }
}

#[async_trait]
impl TransactionReader for RocksDBStore {
    async fn get_transaction(&self, tx_hash: &str) -> SyncResult<Option<Transaction>> {
        self.get_json(&tx_key(tx_hash))
    }

    async fn get_transactions_by_block(&self, block_hash: &str) -> SyncResult<Vec<Transaction>> {
        let prefix = format!("bt/{}/", block_hash).into_bytes();
        let mut txs = Vec::new();
        for (key, _) in self.scan_prefix(&prefix)? {
            if let Some(tx) = self.get_json(&tx_key(&key_suffix(&key)?))? {
                txs.push(tx);
            }
        }
        Ok(txs)
    }
}

#[async_trait]
impl LogWriter for RocksDBStore {
    async fn save_log(&self, log: &Log) -> SyncResult<()> {
        let _guard = self.lock()?;
        let key = log_key(&log.transaction_hash, log.log_index);
        if self.db.get_pinned(&key).map_err(db_err)?.is_some() {
            debug!(
                "Log {}:{} already stored",
                log.transaction_hash, log.log_index
            );
            return Ok(());
        }
        let mut batch = WriteBatch::default();
        Self::put_json(&mut batch, &key, log)?;
        if let Some(height) = log.block_number {
            batch.put(
                address_log_key(&log.address, height, &log.transaction_hash, log.log_index),
                b"",
            );
        }
        self.write(batch)
    }
}

#[async_trait]
impl LogReader for RocksDBStore {
    async fn get_logs_by_transaction(&self, tx_hash: &str) -> SyncResult<Vec<Log>> {
        let prefix = format!("l/{}/", tx_hash).into_bytes();
        self.scan_prefix(&prefix)?
            .into_iter()
            .map(|(_, value)| serde_json::from_slice::<Log>(&value).map_err(SyncError::from))
            .collect()
    }

    async fn get_logs_by_address(
        &self,
        address: &str,
        from_block: u64,
        to_block: u64,
    ) -> SyncResult<Vec<Log>> {
        if from_block > to_block {
            return Ok(Vec::new());
        }
        let prefix = format!("al/{}/", normalize_address(address)).into_bytes();
        let start = format!("al/{}/{:020}/", normalize_address(address), from_block).into_bytes();
        let mut logs = Vec::new();
        for item in self.db.iterator(IteratorMode::From(&start, Direction::Forward)) {
            let (key, _) = item.map_err(db_err)?;
            if !key.starts_with(&prefix) {
                break;
            }
            let key = std::str::from_utf8(&key)
                .map_err(|_| SyncError::Storage("Non UTF-8 index key".to_string()))?;
            let parts: Vec<&str> = key.split('/').collect();
            let [_, _, height, tx_hash, index] = parts.as_slice() else {
                return Err(SyncError::Storage(format!("Malformed log index key {}", key)));
            };
            let height: u64 = height
                .parse()
                .map_err(|_| SyncError::Storage(format!("Malformed log index key {}", key)))?;
            if height > to_block {
                break;
            }
            let index: u32 = index
                .parse()
                .map_err(|_| SyncError::Storage(format!("Malformed log index key {}", key)))?;
            if let Some(log) = self.get_json(&log_key(tx_hash, index))? {
                logs.push(log);
            }
        }
        Ok(logs)
    }
}

#[async_trait]
impl DagWriter for RocksDBStore {
    async fn save_dag_relationship(
        &self,
        child_hash: &str,
        parent_hash: &str,
        is_selected_parent: bool,
    ) -> SyncResult<()> {
        let _guard = self.lock()?;
        let mut batch = WriteBatch::default();
        if is_selected_parent {
            for edge in self.edges(format!("dc/{}/", child_hash).as_bytes(), child_hash, true)? {
                if edge.is_selected_parent && edge.parent_hash != parent_hash {
                    Self::put_json(&mut batch, &child_edge_key(child_hash, &edge.parent_hash), &false)?;
                    Self::put_json(&mut batch, &parent_edge_key(&edge.parent_hash, child_hash), &false)?;
                }
            }
        }
        Self::put_json(&mut batch, &child_edge_key(child_hash, parent_hash), &is_selected_parent)?;
        Self::put_json(&mut batch, &parent_edge_key(parent_hash, child_hash), &is_selected_parent)?;
        self.write(batch)
    }

    async fn save_ghostdag_data(&self, data: &GhostdagData) -> SyncResult<()> {
        let _guard = self.lock()?;
        let existing = self.get_json(&ghostdag_key(&data.block_hash))?;
        let merged = GhostdagData::merge(existing, data.clone());
        let mut batch = WriteBatch::default();
        Self::put_json(&mut batch, &ghostdag_key(&data.block_hash), &merged)?;
        self.write(batch)
    }

    async fn set_selected_parent(&self, block_hash: &str, parent_hash: &str) -> SyncResult<()> {
        let _guard = self.lock()?;
        let data = match self.get_json::<GhostdagData>(&ghostdag_key(block_hash))? {
            Some(mut data) => {
                data.selected_parent = Some(parent_hash.to_string());
                data
            }
            None => GhostdagData::with_selected_parent(block_hash, parent_hash),
        };
        let mut batch = WriteBatch::default();
        Self::put_json(&mut batch, &ghostdag_key(block_hash), &data)?;
        self.write(batch)
    }
}

#[async_trait]
impl DagReader for RocksDBStore {
    async fn get_parents(&self, block_hash: &str) -> SyncResult<Vec<DagRelationship>> {
        let mut parents = self.edges(format!("dc/{}/", block_hash).as_bytes(), block_hash, true)?;
        parents.sort_by(|a, b| {
            b.is_selected_parent
                .cmp(&a.is_selected_parent)
                .then_with(|| a.parent_hash.cmp(&b.parent_hash))
        });
        Ok(parents)
    }

    async fn get_children(&self, block_hash: &str) -> SyncResult<Vec<DagRelationship>> {
        self.edges(format!("dp/{}/", block_hash).as_bytes(), block_hash, false)
    }

    async fn get_ghostdag_data(&self, block_hash: &str) -> SyncResult<Option<GhostdagData>> {
        self.get_json(&ghostdag_key(block_hash))
    }
}

#[async_trait]
impl AddressWriter for RocksDBStore {
    async fn record_address_transaction(
        &self,
        address: &str,
        tx_hash: &str,
        nonce: Option<u64>,
    ) -> SyncResult<bool> {
        let _guard = self.lock()?;
        let membership = address_tx_key(address, tx_hash);
        let first_seen = self.db.get_pinned(&membership).map_err(db_err)?.is_none();
        let mut entry = self.load_address(address)?;
        if first_seen {
            entry.transaction_count += 1;
        }
        if let Some(nonce) = nonce {
            entry.nonce = entry.nonce.max(nonce);
        }
        let mut batch = WriteBatch::default();
        batch.put(membership, b"");
        Self::put_json(&mut batch, &address_key(address), &entry)?;
        self.write(batch)?;
        Ok(first_seen)
    }

    async fn save_contract_code(&self, address: &str, code: &Bytes) -> SyncResult<()> {
        let _guard = self.lock()?;
        let mut entry = self.load_address(address)?;
        entry.is_contract = true;
        entry.contract_code = Some(code.clone());
        let mut batch = WriteBatch::default();
        Self::put_json(&mut batch, &address_key(address), &entry)?;
        self.write(batch)
    }

    async fn update_address_balance(&self, address: &str, balance: U256) -> SyncResult<()> {
        let _guard = self.lock()?;
        let mut entry = self.load_address(address)?;
        entry.balance = balance;
        let mut batch = WriteBatch::default();
        Self::put_json(&mut batch, &address_key(address), &entry)?;
        self.write(batch)
    }
}

#[async_trait]
impl AddressReader for RocksDBStore {
    async fn get_address(&self, address: &str) -> SyncResult<Option<Address>> {
        self.get_json(&address_key(address))
    }

    async fn get_address_balance(&self, address: &str) -> SyncResult<U256> {
        Ok(self
            .get_address(address)
            .await?
            .map(|a| a.balance)
            .unwrap_or_default())
    }
}

#[async_trait]
impl IndexProgress for RocksDBStore {
    async fn get_indexed_height(&self) -> SyncResult<Option<u64>> {
        self.get_json(INDEXED_HEIGHT_KEY)
    }

    async fn set_indexed_height(&self, height: u64) -> SyncResult<()> {
        let _guard = self.lock()?;
        if let Some(current) = self.get_json::<u64>(INDEXED_HEIGHT_KEY)? {
            if current >= height {
                return Ok(());
            }
        }
        let mut batch = WriteBatch::default();
        Self::put_json(&mut batch, INDEXED_HEIGHT_KEY, &height)?;
        self.write(batch)
    }
}
