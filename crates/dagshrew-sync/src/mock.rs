//! Mock implementations for testing

use alloy_primitives::{Bytes, U256};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use crate::domain::{
    Address, Block, BlockUpdate, DagRelationship, GhostdagData, Log, StoredBlock, Transaction,
    TxStatus,
};
use crate::rpc::HttpTransport;
use crate::traits::*;
use crate::types::{DagInfo, JsonRpcRequest, LogFilter};
use crate::wire::{decode_quantity_value, decode_u64, encode_quantity, RpcBlock, RpcLog, RpcReceipt};
use crate::{SyncError, SyncResult};

/// Deterministic 32-byte hash for test fixtures.
pub fn hash(n: u64) -> String {
    format!("0x{:064x}", n)
}

/// Deterministic 20-byte address for test fixtures.
pub fn address(n: u64) -> String {
    format!("0x{:040x}", n)
}

pub fn block_hash(height: u64) -> String {
    hash(1_000_000 + height)
}

pub fn tx_hash(height: u64, index: u64) -> String {
    hash(2_000_000 + height * 1_000 + index)
}

/// Wire-format transaction object as a node would inline it in a block.
pub fn wire_tx(hash: &str, from: &str, to: Option<&str>, nonce: u64) -> Value {
    json!({
        "hash": hash,
        "from": from,
        "to": to,
        "value": "0xde0b6b3a7640000",
        "gas": "0x5208",
        "gasPrice": "0x3b9aca00",
        "nonce": encode_quantity(nonce),
        "input": "0x"
    })
}

/// Wire-format receipt with `log_count` logs emitted by `emitter`.
pub fn wire_receipt(tx_hash: &str, status: u64, gas_used: u64, emitter: &str, log_count: usize) -> RpcReceipt {
    let logs = (0..log_count)
        .map(|i| {
            json!({
                "address": emitter,
                "topics": [hash(9_000 + i as u64)],
                "data": "0x01"
            })
        })
        .collect();
    RpcReceipt {
        transaction_hash: tx_hash.to_string(),
        status: Some(encode_quantity(status)),
        gas_used: encode_quantity(gas_used),
        contract_address: None,
        block_hash: None,
        block_number: None,
        logs,
    }
}

/// Builds wire blocks for the mock node.
#[derive(Debug, Clone)]
pub struct BlockBuilder {
    block: RpcBlock,
}

impl BlockBuilder {
    /// A block at `height` whose single parent is the block at `height - 1`.
    pub fn new(height: u64) -> Self {
        let parents = if height == 0 {
            vec![]
        } else {
            vec![block_hash(height - 1)]
        };
        Self {
            block: RpcBlock {
                hash: block_hash(height),
                number: encode_quantity(height),
                parent_hashes: parents,
                timestamp: encode_quantity(1_700_000_000 + height),
                miner: address(1),
                gas_limit: encode_quantity(30_000_000),
                gas_used: encode_quantity(21_000),
                base_fee_per_gas: Some(encode_quantity(7)),
                blue_score: Some(json!(encode_quantity(height))),
                is_chain_block: true,
                selected_parent: None,
                transactions_root: None,
                state_root: None,
                receipts_root: None,
                transactions: vec![],
            },
        }
    }

    pub fn hash(mut self, hash: &str) -> Self {
        self.block.hash = hash.to_string();
        self
    }

    pub fn parents(mut self, parents: Vec<String>) -> Self {
        self.block.parent_hashes = parents;
        self
    }

    pub fn selected_parent(mut self, parent: &str) -> Self {
        self.block.selected_parent = Some(parent.to_string());
        self
    }

    pub fn blue_score(mut self, score: u64) -> Self {
        self.block.blue_score = Some(json!(encode_quantity(score)));
        self
    }

    pub fn gas_used(mut self, gas_used: u64) -> Self {
        self.block.gas_used = encode_quantity(gas_used);
        self
    }

    pub fn timestamp(mut self, timestamp: u64) -> Self {
        self.block.timestamp = encode_quantity(timestamp);
        self
    }

    pub fn tx(mut self, tx: Value) -> Self {
        self.block.transactions.push(tx);
        self
    }

    /// Appends `count` plain transfers with generated hashes and addresses.
    pub fn transfers(mut self, count: u64) -> Self {
        let height = decode_u64("number", &self.block.number).unwrap_or_default();
        for i in 0..count {
            let tx = wire_tx(&tx_hash(height, i), &address(100 + i), Some(&address(200 + i)), i);
            self.block.transactions.push(tx);
        }
        self
    }

    pub fn build(self) -> RpcBlock {
        self.block
    }
}

/// Linear chain of `len` blocks starting at genesis, `txs_per_block`
/// transfers each (genesis carries none).
pub fn linear_chain(len: u64, txs_per_block: u64) -> Vec<RpcBlock> {
    (0..len)
        .map(|h| {
            let builder = BlockBuilder::new(h);
            if h == 0 {
                builder.build()
            } else {
                builder.transfers(txs_per_block).build()
            }
        })
        .collect()
}

#[derive(Default)]
struct NodeState {
    blocks_by_height: HashMap<u64, RpcBlock>,
    blocks_by_hash: HashMap<String, RpcBlock>,
    receipts: HashMap<String, RpcReceipt>,
    dag_info: HashMap<String, DagInfo>,
    parents: HashMap<String, Vec<String>>,
    blue_scores: HashMap<u64, u64>,
    code: HashMap<String, Bytes>,
    balances: HashMap<String, U256>,
    logs: Vec<RpcLog>,
    tip: u64,
    failures: HashMap<String, u32>,
    calls: HashMap<&'static str, usize>,
}

/// Mock DAG node adapter for testing
#[derive(Clone)]
pub struct MockNode {
    state: Arc<RwLock<NodeState>>,
    connected: Arc<RwLock<bool>>,
    latency: Arc<RwLock<Duration>>,
}

impl Default for MockNode {
    fn default() -> Self {
        Self::new()
    }
}

impl MockNode {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(NodeState::default())),
            connected: Arc::new(RwLock::new(true)),
            latency: Arc::new(RwLock::new(Duration::ZERO)),
        }
    }

    pub fn with_blocks(blocks: Vec<RpcBlock>) -> Self {
        let node = Self::new();
        for block in blocks {
            node.add_block(block);
        }
        node
    }

    pub fn add_block(&self, block: RpcBlock) {
        let height = decode_u64("number", &block.number).unwrap();
        let mut state = self.state.write().unwrap();
        state.blocks_by_hash.insert(block.hash.clone(), block.clone());
        state.blocks_by_height.insert(height, block);
        if height > state.tip {
            state.tip = height;
        }
    }

    pub fn set_tip(&self, tip: u64) {
        self.state.write().unwrap().tip = tip;
    }

    pub fn add_receipt(&self, receipt: RpcReceipt) {
        let mut state = self.state.write().unwrap();
        state.receipts.insert(receipt.transaction_hash.clone(), receipt);
    }

    pub fn set_dag_info(&self, block_hash: &str, info: DagInfo) {
        let mut state = self.state.write().unwrap();
        state.dag_info.insert(block_hash.to_string(), info);
    }

    pub fn set_parents(&self, block_hash: &str, parents: Vec<String>) {
        let mut state = self.state.write().unwrap();
        state.parents.insert(block_hash.to_string(), parents);
    }

    pub fn set_blue_score(&self, height: u64, score: u64) {
        self.state.write().unwrap().blue_scores.insert(height, score);
    }

    pub fn set_code(&self, address: &str, code: Bytes) {
        let mut state = self.state.write().unwrap();
        state.code.insert(address.to_ascii_lowercase(), code);
    }

    pub fn set_balance(&self, address: &str, balance: U256) {
        let mut state = self.state.write().unwrap();
        state.balances.insert(address.to_ascii_lowercase(), balance);
    }

    pub fn add_log(&self, log: RpcLog) {
        self.state.write().unwrap().logs.push(log);
    }

    pub fn set_connected(&self, connected: bool) {
        *self.connected.write().unwrap() = connected;
    }

    /// Delay applied to every block fetch.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.write().unwrap() = latency;
    }

    /// The next `times` fetches of the block at `height` fail with a
    /// transport error.
    pub fn fail_block(&self, height: u64, times: u32) {
        self.fail_key(format!("block:{}", height), times);
    }

    /// The next `times` calls of `method` fail with a transport error.
    pub fn fail_method(&self, method: &str, times: u32) {
        self.fail_key(method.to_string(), times);
    }

    pub fn call_count(&self, method: &str) -> usize {
        let state = self.state.read().unwrap();
        state.calls.get(method).copied().unwrap_or(0)
    }

    fn fail_key(&self, key: String, times: u32) {
        self.state.write().unwrap().failures.insert(key, times);
    }

    fn enter(&self, method: &'static str, key: Option<String>) -> SyncResult<()> {
        let mut state = self.state.write().unwrap();
        *state.calls.entry(method).or_insert(0) += 1;
        if !*self.connected.read().unwrap() {
            return Err(SyncError::Transport("Node disconnected".to_string()));
        }
        for key in [Some(method.to_string()), key].into_iter().flatten() {
            if let Some(remaining) = state.failures.get_mut(&key) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(SyncError::Transport(format!("injected failure: {}", key)));
                }
            }
        }
        Ok(())
    }

    fn block_blue_score(block: &RpcBlock) -> u64 {
        block
            .blue_score
            .as_ref()
            .and_then(|v| decode_quantity_value("blueScore", v).ok())
            .unwrap_or_default()
    }
}

#[async_trait]
impl TipReader for MockNode {
    async fn block_number(&self) -> SyncResult<u64> {
        self.enter("eth_blockNumber", None)?;
        Ok(self.state.read().unwrap().tip)
    }
}

#[async_trait]
impl BlockByNumberReader for MockNode {
    async fn get_block_by_number(
        &self,
        height: u64,
        _full_transactions: bool,
    ) -> SyncResult<Option<RpcBlock>> {
        let latency = *self.latency.read().unwrap();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        self.enter("eth_getBlockByNumber", Some(format!("block:{}", height)))?;
        Ok(self.state.read().unwrap().blocks_by_height.get(&height).cloned())
    }
}

#[async_trait]
impl BlockByHashReader for MockNode {
    async fn get_block_by_hash(
        &self,
        hash: &str,
        _full_transactions: bool,
    ) -> SyncResult<Option<RpcBlock>> {
        self.enter("eth_getBlockByHash", None)?;
        Ok(self.state.read().unwrap().blocks_by_hash.get(hash).cloned())
    }
}

#[async_trait]
impl ReceiptReader for MockNode {
    async fn get_transaction_receipt(&self, tx_hash: &str) -> SyncResult<Option<RpcReceipt>> {
        self.enter("eth_getTransactionReceipt", None)?;
        Ok(self.state.read().unwrap().receipts.get(tx_hash).cloned())
    }
}

#[async_trait]
impl EventLogReader for MockNode {
    async fn get_logs(&self, filter: &LogFilter) -> SyncResult<Vec<RpcLog>> {
        self.enter("eth_getLogs", None)?;
        let state = self.state.read().unwrap();
        Ok(state
            .logs
            .iter()
            .filter(|log| match &filter.address {
                Some(address) => log.address.eq_ignore_ascii_case(address),
                None => true,
            })
            .cloned()
            .collect())
    }
}

#[async_trait]
impl CodeReader for MockNode {
    async fn get_code(&self, address: &str) -> SyncResult<Bytes> {
        self.enter("eth_getCode", None)?;
        let state = self.state.read().unwrap();
        Ok(state
            .code
            .get(&address.to_ascii_lowercase())
            .cloned()
            .unwrap_or_default())
    }
}

#[async_trait]
impl BalanceReader for MockNode {
    async fn get_balance(&self, address: &str) -> SyncResult<U256> {
        self.enter("eth_getBalance", None)?;
        let state = self.state.read().unwrap();
        Ok(state
            .balances
            .get(&address.to_ascii_lowercase())
            .copied()
            .unwrap_or_default())
    }
}

#[async_trait]
impl DagInfoReader for MockNode {
    async fn get_dag_info(&self, block_hash: &str) -> SyncResult<Option<DagInfo>> {
        self.enter("phoenix_getDAGInfo", None)?;
        let state = self.state.read().unwrap();
        if let Some(info) = state.dag_info.get(block_hash) {
            return Ok(Some(info.clone()));
        }
        Ok(state.blocks_by_hash.get(block_hash).map(|block| {
            let score = Self::block_blue_score(block);
            DagInfo {
                blue_score: Some(score),
                blue_work: U256::from(score) * U256::from(1_000u64),
                merge_set_blues: block.parent_hashes.clone(),
                merge_set_reds: vec![],
            }
        }))
    }
}

#[async_trait]
impl BlueScoreReader for MockNode {
    async fn get_blue_score(&self, height: Option<u64>) -> SyncResult<u64> {
        self.enter("phoenix_getBlueScore", None)?;
        let state = self.state.read().unwrap();
        let height = height.unwrap_or(state.tip);
        if let Some(score) = state.blue_scores.get(&height) {
            return Ok(*score);
        }
        state
            .blocks_by_height
            .get(&height)
            .map(Self::block_blue_score)
            .ok_or_else(|| SyncError::Rpc {
                code: -32000,
                message: format!("unknown block {}", height),
            })
    }
}

#[async_trait]
impl BlockParentsReader for MockNode {
    async fn get_block_parents(&self, block_hash: &str) -> SyncResult<Vec<String>> {
        self.enter("phoenix_getBlockParents", None)?;
        let state = self.state.read().unwrap();
        if let Some(parents) = state.parents.get(block_hash) {
            return Ok(parents.clone());
        }
        Ok(state
            .blocks_by_hash
            .get(block_hash)
            .map(|block| block.parent_hashes.clone())
            .unwrap_or_default())
    }
}

/// HTTP transport that replays a script of responses and records requests.
/// Once the script runs out every post fails with a transport error.
#[derive(Default)]
pub struct ScriptedTransport {
    script: Mutex<VecDeque<SyncResult<String>>>,
    requests: Mutex<Vec<JsonRpcRequest>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn result(self, result: Value) -> Self {
        self.push(Ok(json!({"jsonrpc": "2.0", "id": 1, "result": result}).to_string()))
    }

    pub fn rpc_error(self, code: i64, message: &str) -> Self {
        self.push(Ok(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "error": {"code": code, "message": message}
        })
        .to_string()))
    }

    pub fn fail(self, message: &str) -> Self {
        self.push(Err(SyncError::Transport(message.to_string())))
    }

    pub fn raw(self, body: &str) -> Self {
        self.push(Ok(body.to_string()))
    }

    fn push(self, entry: SyncResult<String>) -> Self {
        self.script.lock().unwrap().push_back(entry);
        self
    }

    pub fn requests(&self) -> Vec<JsonRpcRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn post(&self, body: String) -> SyncResult<String> {
        let request: JsonRpcRequest = serde_json::from_str(&body)?;
        self.requests.lock().unwrap().push(request);
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(SyncError::Transport("connection refused".to_string())))
    }
}

#[derive(Default)]
struct Faults {
    blocks: HashSet<String>,
    transactions: HashSet<String>,
    logs: HashSet<String>,
    status_updates: HashSet<String>,
    dag_writes: bool,
    address_writes: bool,
    progress_writes: bool,
    dag_edge_writes: usize,
}

/// Store wrapper that fails selected writes and counts DAG edge writes.
pub struct FaultyStore<S> {
    inner: S,
    faults: Mutex<Faults>,
}

impl<S> FaultyStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            faults: Mutex::new(Faults::default()),
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn fail_block(&self, hash: &str) {
        self.faults.lock().unwrap().blocks.insert(hash.to_string());
    }

    pub fn fail_transaction(&self, tx_hash: &str) {
        self.faults.lock().unwrap().transactions.insert(tx_hash.to_string());
    }

    /// Every log of `tx_hash` fails to persist.
    pub fn fail_logs(&self, tx_hash: &str) {
        self.faults.lock().unwrap().logs.insert(tx_hash.to_string());
    }

    pub fn fail_status_update(&self, tx_hash: &str) {
        self.faults.lock().unwrap().status_updates.insert(tx_hash.to_string());
    }

    pub fn fail_dag_writes(&self, fail: bool) {
        self.faults.lock().unwrap().dag_writes = fail;
    }

    pub fn fail_address_writes(&self, fail: bool) {
        self.faults.lock().unwrap().address_writes = fail;
    }

    pub fn fail_progress_writes(&self, fail: bool) {
        self.faults.lock().unwrap().progress_writes = fail;
    }

    pub fn dag_edge_writes(&self) -> usize {
        self.faults.lock().unwrap().dag_edge_writes
    }

    fn check(&self, pick: impl FnOnce(&Faults) -> bool, what: &str) -> SyncResult<()> {
        if pick(&self.faults.lock().unwrap()) {
            Err(SyncError::Storage(format!("injected write failure: {}", what)))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl<S: IndexerStore> IndexProgress for FaultyStore<S> {
    async fn get_indexed_height(&self) -> SyncResult<Option<u64>> {
        self.inner.get_indexed_height().await
    }

    async fn set_indexed_height(&self, height: u64) -> SyncResult<()> {
        self.check(|f| f.progress_writes, "indexed height")?;
        self.inner.set_indexed_height(height).await
    }
}

#[async_trait]
impl<S: IndexerStore> BlockWriter for FaultyStore<S> {
    async fn save_block(&self, block: &Block) -> SyncResult<()> {
        self.check(|f| f.blocks.contains(&block.hash), &block.hash)?;
        self.inner.save_block(block).await
    }

    async fn update_block(&self, hash: &str, update: &BlockUpdate) -> SyncResult<()> {
        self.check(|f| f.blocks.contains(hash), hash)?;
        self.inner.update_block(hash, update).await
    }
}

#[async_trait]
impl<S: IndexerStore> BlockReader for FaultyStore<S> {
    async fn get_block(&self, hash: &str) -> SyncResult<Option<StoredBlock>> {
        self.inner.get_block(hash).await
    }

    async fn get_block_at_height(&self, height: u64) -> SyncResult<Option<StoredBlock>> {
        self.inner.get_block_at_height(height).await
    }

    async fn get_latest_blocks(&self, limit: usize) -> SyncResult<Vec<StoredBlock>> {
        self.inner.get_latest_blocks(limit).await
    }
}

#[async_trait]
impl<S: IndexerStore> TransactionWriter for FaultyStore<S> {
    async fn save_transaction(&self, tx: &Transaction) -> SyncResult<()> {
        self.check(|f| f.transactions.contains(&tx.hash), &tx.hash)?;
        self.inner.save_transaction(tx).await
    }

    async fn update_transaction_status(
        &self,
        tx_hash: &str,
        status: TxStatus,
        gas_used: u64,
    ) -> SyncResult<()> {
        self.check(|f| f.status_updates.contains(tx_hash), tx_hash)?;
        self.inner.update_transaction_status(tx_hash, status, gas_used).await
    }

    async fn set_contract_address(&self, tx_hash: &str, contract_address: &str) -> SyncResult<()> {
        self.check(|f| f.status_updates.contains(tx_hash), tx_hash)?;
        self.inner.set_contract_address(tx_hash, contract_address).await
    }
}

#[async_trait]
impl<S: IndexerStore> TransactionReader for FaultyStore<S> {
    async fn get_transaction(&self, tx_hash: &str) -> SyncResult<Option<Transaction>> {
        self.inner.get_transaction(tx_hash).await
    }

    async fn get_transactions_by_block(&self, block_hash: &str) -> SyncResult<Vec<Transaction>> {
        self.inner.get_transactions_by_block(block_hash).await
    }
}

#[async_trait]
impl<S: IndexerStore> LogWriter for FaultyStore<S> {
    async fn save_log(&self, log: &Log) -> SyncResult<()> {
        self.check(|f| f.logs.contains(&log.transaction_hash), &log.transaction_hash)?;
        self.inner.save_log(log).await
    }
}

#[async_trait]
impl<S: IndexerStore> LogReader for FaultyStore<S> {
    async fn get_logs_by_transaction(&self, tx_hash: &str) -> SyncResult<Vec<Log>> {
        self.inner.get_logs_by_transaction(tx_hash).await
    }

    async fn get_logs_by_address(
        &self,
        address: &str,
        from_block: u64,
        to_block: u64,
    ) -> SyncResult<Vec<Log>> {
        self.inner.get_logs_by_address(address, from_block, to_block).await
    }
}

#[async_trait]
impl<S: IndexerStore> DagWriter for FaultyStore<S> {
    async fn save_dag_relationship(
        &self,
        child_hash: &str,
        parent_hash: &str,
        is_selected_parent: bool,
    ) -> SyncResult<()> {
        self.check(|f| f.dag_writes, child_hash)?;
        self.faults.lock().unwrap().dag_edge_writes += 1;
        self.inner
            .save_dag_relationship(child_hash, parent_hash, is_selected_parent)
            .await
    }

    async fn save_ghostdag_data(&self, data: &GhostdagData) -> SyncResult<()> {
        self.check(|f| f.dag_writes, &data.block_hash)?;
        self.inner.save_ghostdag_data(data).await
    }

    async fn set_selected_parent(&self, block_hash: &str, parent_hash: &str) -> SyncResult<()> {
        self.check(|f| f.dag_writes, block_hash)?;
        self.inner.set_selected_parent(block_hash, parent_hash).await
    }
}

#[async_trait]
impl<S: IndexerStore> DagReader for FaultyStore<S> {
    async fn get_parents(&self, block_hash: &str) -> SyncResult<Vec<DagRelationship>> {
        self.inner.get_parents(block_hash).await
    }

    async fn get_children(&self, block_hash: &str) -> SyncResult<Vec<DagRelationship>> {
        self.inner.get_children(block_hash).await
    }

    async fn get_ghostdag_data(&self, block_hash: &str) -> SyncResult<Option<GhostdagData>> {
        self.inner.get_ghostdag_data(block_hash).await
    }
}

#[async_trait]
impl<S: IndexerStore> AddressWriter for FaultyStore<S> {
    async fn record_address_transaction(
        &self,
        address: &str,
        tx_hash: &str,
        nonce: Option<u64>,
    ) -> SyncResult<bool> {
        self.check(|f| f.address_writes, address)?;
        self.inner.record_address_transaction(address, tx_hash, nonce).await
    }

    async fn save_contract_code(&self, address: &str, code: &Bytes) -> SyncResult<()> {
        self.check(|f| f.address_writes, address)?;
        self.inner.save_contract_code(address, code).await
    }

    async fn update_address_balance(&self, address: &str, balance: U256) -> SyncResult<()> {
        self.check(|f| f.address_writes, address)?;
        self.inner.update_address_balance(address, balance).await
    }
}

#[async_trait]
impl<S: IndexerStore> AddressReader for FaultyStore<S> {
    async fn get_address(&self, address: &str) -> SyncResult<Option<Address>> {
        self.inner.get_address(address).await
    }

    async fn get_address_balance(&self, address: &str) -> SyncResult<U256> {
        self.inner.get_address_balance(address).await
    }
}
