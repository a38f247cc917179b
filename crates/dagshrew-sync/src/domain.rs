//! # Canonical Ledger Model
//!
//! The normalized entities the indexer persists: blocks, transactions, logs,
//! DAG edges, GHOSTDAG annotations and the derived address aggregate.
//!
//! Every entity is keyed by its natural identity and is written with upsert
//! semantics. The merge helpers in this module (`StoredBlock::upsert`,
//! `Transaction::merge`, `GhostdagData::merge`) define what "refresh on
//! conflict" means, so every store implementation applies the same rules.

use alloy_primitives::{Bytes, U256};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Hex digits in a block or transaction hash, without the `0x` prefix.
pub const HASH_HEX_LEN: usize = 64;
/// Hex digits in an account address, without the `0x` prefix.
pub const ADDRESS_HEX_LEN: usize = 40;

fn is_prefixed_hex(value: &str, digits: usize) -> bool {
    value.len() == digits + 2
        && value.starts_with("0x")
        && value[2..].bytes().all(|b| b.is_ascii_hexdigit())
}

/// `0x` followed by exactly 64 hex digits.
pub fn is_valid_hash(value: &str) -> bool {
    is_prefixed_hex(value, HASH_HEX_LEN)
}

/// `0x` followed by exactly 40 hex digits.
pub fn is_valid_address(value: &str) -> bool {
    is_prefixed_hex(value, ADDRESS_HEX_LEN)
}

/// Seconds since the unix epoch, used for `indexed_at` stamps.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("invalid {field} hash: {value:?}")]
    InvalidHash { field: &'static str, value: String },

    #[error("invalid {field} address: {value:?}")]
    InvalidAddress { field: &'static str, value: String },

    #[error("block {0} has a zero timestamp")]
    ZeroTimestamp(String),

    #[error("genesis block {hash} has {parents} parents")]
    GenesisWithParents { hash: String, parents: usize },

    #[error("transaction {0}: recipient must be absent exactly when it creates a contract")]
    ContractCreationMismatch(String),
}

fn check_hash(field: &'static str, value: &str) -> Result<(), ValidationError> {
    if is_valid_hash(value) {
        Ok(())
    } else {
        Err(ValidationError::InvalidHash {
            field,
            value: value.to_string(),
        })
    }
}

fn check_address(field: &'static str, value: &str) -> Result<(), ValidationError> {
    if is_valid_address(value) {
        Ok(())
    } else {
        Err(ValidationError::InvalidAddress {
            field,
            value: value.to_string(),
        })
    }
}

/// A block as observed on the DAG.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub hash: String,
    pub number: u64,
    pub parent_hashes: Vec<String>,
    /// Not required to be monotonic across the DAG.
    pub timestamp: u64,
    pub miner: String,
    pub gas_limit: u64,
    pub gas_used: u64,
    pub base_fee_per_gas: Option<u64>,
    pub blue_score: u64,
    pub is_chain_block: bool,
    pub selected_parent: Option<String>,
    pub transactions_root: Option<String>,
    pub state_root: Option<String>,
    pub receipts_root: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub transactions: Vec<Transaction>,
}

impl Block {
    pub fn is_genesis(&self) -> bool {
        self.number == 0
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        check_hash("block", &self.hash)?;
        if self.timestamp == 0 {
            return Err(ValidationError::ZeroTimestamp(self.hash.clone()));
        }
        for parent in &self.parent_hashes {
            check_hash("parent", parent)?;
        }
        if let Some(selected) = &self.selected_parent {
            check_hash("selected parent", selected)?;
        }
        if self.is_genesis() && !self.parent_hashes.is_empty() {
            return Err(ValidationError::GenesisWithParents {
                hash: self.hash.clone(),
                parents: self.parent_hashes.len(),
            });
        }
        Ok(())
    }
}

/// A block row as held by a store: the header without its embedded
/// transactions, plus bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredBlock {
    pub block: Block,
    pub transaction_count: usize,
    pub indexed_at: u64,
}

impl StoredBlock {
    /// Insert-or-update keyed by hash. On conflict only gas used, blue score
    /// and the `indexed_at` stamp are refreshed.
    pub fn upsert(existing: Option<StoredBlock>, incoming: &Block, indexed_at: u64) -> StoredBlock {
        match existing {
            Some(mut stored) => {
                stored.block.gas_used = incoming.gas_used;
                stored.block.blue_score = incoming.blue_score;
                stored.indexed_at = indexed_at;
                stored
            }
            None => {
                let mut block = incoming.clone();
                let transaction_count = block.transactions.len();
                block.transactions.clear();
                StoredBlock {
                    block,
                    transaction_count,
                    indexed_at,
                }
            }
        }
    }
}

/// Ordering used to pick one block among several at the same height: the
/// highest blue score wins, ties go to the lowest hash.
pub fn canonical_order(a: &StoredBlock, b: &StoredBlock) -> Ordering {
    a.block
        .blue_score
        .cmp(&b.block.blue_score)
        .then_with(|| b.block.hash.cmp(&a.block.hash))
}

/// Partial update for a stored block. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockUpdate {
    pub gas_used: Option<u64>,
    pub blue_score: Option<u64>,
    pub is_chain_block: Option<bool>,
    pub selected_parent: Option<String>,
}

impl BlockUpdate {
    pub fn blue_score(blue_score: u64) -> Self {
        Self {
            blue_score: Some(blue_score),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.gas_used.is_none()
            && self.blue_score.is_none()
            && self.is_chain_block.is_none()
            && self.selected_parent.is_none()
    }

    pub fn apply(&self, block: &mut Block) {
        if let Some(gas_used) = self.gas_used {
            block.gas_used = gas_used;
        }
        if let Some(blue_score) = self.blue_score {
            block.blue_score = blue_score;
        }
        if let Some(is_chain_block) = self.is_chain_block {
            block.is_chain_block = is_chain_block;
        }
        if let Some(selected) = &self.selected_parent {
            block.selected_parent = Some(selected.clone());
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxStatus {
    Failure,
    Success,
}

impl TxStatus {
    /// Receipt status codes: `0` is failure, `1` is success.
    pub fn from_code(code: u64) -> Option<Self> {
        match code {
            0 => Some(TxStatus::Failure),
            1 => Some(TxStatus::Success),
            _ => None,
        }
    }

    pub fn code(self) -> u64 {
        match self {
            TxStatus::Failure => 0,
            TxStatus::Success => 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub hash: String,
    pub block_hash: String,
    pub block_number: u64,
    pub transaction_index: u32,
    pub from: String,
    /// Absent exactly when the transaction creates a contract.
    pub to: Option<String>,
    pub value: U256,
    pub gas: u64,
    pub gas_price: Option<U256>,
    pub gas_used: Option<u64>,
    pub nonce: u64,
    pub input: Bytes,
    pub status: Option<TxStatus>,
    pub creates_contract: bool,
    pub contract_address: Option<String>,
}

impl Transaction {
    pub fn validate(&self) -> Result<(), ValidationError> {
        check_hash("transaction", &self.hash)?;
        check_hash("block", &self.block_hash)?;
        check_address("sender", &self.from)?;
        if let Some(to) = &self.to {
            check_address("recipient", to)?;
        }
        if let Some(created) = &self.contract_address {
            check_address("contract", created)?;
        }
        if self.to.is_none() != self.creates_contract {
            return Err(ValidationError::ContractCreationMismatch(self.hash.clone()));
        }
        Ok(())
    }

    /// Upsert keyed by hash. Receipt-derived fields (status, gas used,
    /// contract address) already on the stored row survive a re-save from
    /// block data that does not carry them.
    pub fn merge(existing: Option<Transaction>, incoming: Transaction) -> Transaction {
        match existing {
            Some(stored) => Transaction {
                status: incoming.status.or(stored.status),
                gas_used: incoming.gas_used.or(stored.gas_used),
                contract_address: incoming.contract_address.or(stored.contract_address),
                ..incoming
            },
            None => incoming,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Log {
    pub transaction_hash: String,
    /// Position within the receipt; unique per transaction.
    pub log_index: u32,
    pub address: String,
    pub topics: Vec<String>,
    pub data: Bytes,
    pub block_hash: Option<String>,
    pub block_number: Option<u64>,
}

impl Log {
    pub fn validate(&self) -> Result<(), ValidationError> {
        check_hash("log transaction", &self.transaction_hash)?;
        check_address("log emitter", &self.address)?;
        if let Some(block_hash) = &self.block_hash {
            check_hash("log block", block_hash)?;
        }
        Ok(())
    }
}

/// Directed edge from a child block to one of its parents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DagRelationship {
    pub child_hash: String,
    pub parent_hash: String,
    pub is_selected_parent: bool,
}

/// Consensus output recorded per block. Computed by the node.
///
/// `complete` is false on a placeholder row that so far only carries a
/// selected parent; its blue score, blue work and merge sets are not real.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GhostdagData {
    pub block_hash: String,
    pub blue_score: u64,
    pub blue_work: U256,
    pub selected_parent: Option<String>,
    pub merge_set_blues: Vec<String>,
    pub merge_set_reds: Vec<String>,
    #[serde(default)]
    pub complete: bool,
}

impl GhostdagData {
    /// Upsert keyed by block hash. A missing selected parent on the incoming
    /// annotation never erases a stored one.
    pub fn merge(existing: Option<GhostdagData>, incoming: GhostdagData) -> GhostdagData {
        match existing {
            Some(stored) => GhostdagData {
                selected_parent: incoming.selected_parent.or(stored.selected_parent),
                ..incoming
            },
            None => incoming,
        }
    }

    /// Placeholder annotation carrying only a selected parent, for when the
    /// relationship step lands before the GHOSTDAG step.
    pub fn with_selected_parent(block_hash: &str, parent: &str) -> GhostdagData {
        GhostdagData {
            block_hash: block_hash.to_string(),
            blue_score: 0,
            blue_work: U256::ZERO,
            selected_parent: Some(parent.to_string()),
            merge_set_blues: Vec::new(),
            merge_set_reds: Vec::new(),
            complete: false,
        }
    }
}

/// Denormalized per-address aggregate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub address: String,
    pub balance: U256,
    pub nonce: u64,
    pub is_contract: bool,
    pub contract_code: Option<Bytes>,
    pub transaction_count: u64,
}

impl Address {
    pub fn new(address: &str) -> Self {
        Self {
            address: normalize_address(address),
            balance: U256::ZERO,
            nonce: 0,
            is_contract: false,
            contract_code: None,
            transaction_count: 0,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        check_address("account", &self.address)
    }
}

/// Addresses are compared case-insensitively; stores key them lowercased.
pub fn normalize_address(address: &str) -> String {
    address.to_ascii_lowercase()
}
