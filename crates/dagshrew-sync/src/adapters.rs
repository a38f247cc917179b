//! Node adapter speaking the ledger's JSON-RPC dialect.
//!
//! Standard `eth_*` methods plus the DAG extensions (`phoenix_getDAGInfo`,
//! `phoenix_getBlueScore`, `phoenix_getBlockParents`). Each capability trait
//! from [`crate::traits`] maps onto exactly one method.

use alloy_primitives::{Bytes, U256};
use async_trait::async_trait;
use log::debug;
use serde_json::{json, Value};

use crate::rpc::{HttpTransport, ReqwestTransport, RpcClient};
use crate::traits::{
    BalanceReader, BlockByHashReader, BlockByNumberReader, BlockParentsReader, BlueScoreReader,
    CodeReader, DagInfoReader, EventLogReader, ReceiptReader, TipReader,
};
use crate::types::{DagInfo, LogFilter};
use crate::wire::{
    decode_bytes, decode_quantity_value, decode_u256, decode_u256_value, decode_u64,
    encode_quantity, RpcBlock, RpcDagInfo, RpcLog, RpcReceipt,
};
use crate::{SyncError, SyncResult};

pub struct DagRpcAdapter<T = ReqwestTransport> {
    client: RpcClient<T>,
}

impl<T: HttpTransport> DagRpcAdapter<T> {
    pub fn new(client: RpcClient<T>) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &RpcClient<T> {
        &self.client
    }

    /// `true` when the node answers `eth_blockNumber`.
    pub async fn is_connected(&self) -> bool {
        match self.block_number().await {
            Ok(_) => true,
            Err(e) => {
                debug!("Node connectivity check failed: {}", e);
                false
            }
        }
    }

    async fn required<R: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<Value>,
    ) -> SyncResult<R> {
        self.client
            .call(method, params)
            .await?
            .ok_or_else(|| SyncError::Decode(format!("{}: null result", method)))
    }
}

#[async_trait]
impl<T: HttpTransport> TipReader for DagRpcAdapter<T> {
    async fn block_number(&self) -> SyncResult<u64> {
        let tip: String = self.required("eth_blockNumber", vec![]).await?;
        decode_u64("eth_blockNumber", &tip)
    }
}

#[async_trait]
impl<T: HttpTransport> BlockByNumberReader for DagRpcAdapter<T> {
    async fn get_block_by_number(
        &self,
        height: u64,
        full_transactions: bool,
    ) -> SyncResult<Option<RpcBlock>> {
        self.client
            .call(
                "eth_getBlockByNumber",
                vec![json!(encode_quantity(height)), json!(full_transactions)],
            )
            .await
    }
}

#[async_trait]
impl<T: HttpTransport> BlockByHashReader for DagRpcAdapter<T> {
    async fn get_block_by_hash(
        &self,
        hash: &str,
        full_transactions: bool,
    ) -> SyncResult<Option<RpcBlock>> {
        self.client
            .call("eth_getBlockByHash", vec![json!(hash), json!(full_transactions)])
            .await
    }
}

#[async_trait]
impl<T: HttpTransport> ReceiptReader for DagRpcAdapter<T> {
    async fn get_transaction_receipt(&self, tx_hash: &str) -> SyncResult<Option<RpcReceipt>> {
        self.client
            .call("eth_getTransactionReceipt", vec![json!(tx_hash)])
            .await
    }
}

#[async_trait]
impl<T: HttpTransport> EventLogReader for DagRpcAdapter<T> {
    async fn get_logs(&self, filter: &LogFilter) -> SyncResult<Vec<RpcLog>> {
        let mut query = serde_json::Map::new();
        if let Some(address) = &filter.address {
            query.insert("address".to_string(), json!(address));
        }
        if let Some(from) = filter.from_block {
            query.insert("fromBlock".to_string(), json!(encode_quantity(from)));
        }
        if let Some(to) = filter.to_block {
            query.insert("toBlock".to_string(), json!(encode_quantity(to)));
        }
        if !filter.topics.is_empty() {
            query.insert("topics".to_string(), json!(filter.topics));
        }
        let logs: Option<Vec<RpcLog>> = self
            .client
            .call("eth_getLogs", vec![Value::Object(query)])
            .await?;
        Ok(logs.unwrap_or_default())
    }
}

#[async_trait]
impl<T: HttpTransport> CodeReader for DagRpcAdapter<T> {
    async fn get_code(&self, address: &str) -> SyncResult<Bytes> {
        let code: Option<String> = self
            .client
            .call("eth_getCode", vec![json!(address), json!("latest")])
            .await?;
        match code {
            Some(code) => decode_bytes("eth_getCode", &code),
            None => Ok(Bytes::new()),
        }
    }
}

#[async_trait]
impl<T: HttpTransport> BalanceReader for DagRpcAdapter<T> {
    async fn get_balance(&self, address: &str) -> SyncResult<U256> {
        let balance: String = self
            .required("eth_getBalance", vec![json!(address), json!("latest")])
            .await?;
        decode_u256("eth_getBalance", &balance)
    }
}

#[async_trait]
impl<T: HttpTransport> DagInfoReader for DagRpcAdapter<T> {
    async fn get_dag_info(&self, block_hash: &str) -> SyncResult<Option<DagInfo>> {
        let info: Option<RpcDagInfo> = self
            .client
            .call("phoenix_getDAGInfo", vec![json!(block_hash)])
            .await?;
        let Some(info) = info else {
            return Ok(None);
        };

        let blue_score = info
            .blue_score
            .as_ref()
            .map(|v| decode_quantity_value("blueScore", v))
            .transpose()?;
        let blue_work = match &info.blue_work {
            Some(v) => decode_u256_value("blueWork", v)?,
            None => U256::ZERO,
        };
        Ok(Some(DagInfo {
            blue_score,
            blue_work,
            merge_set_blues: info.merge_set_blues,
            merge_set_reds: info.merge_set_reds,
        }))
    }
}

#[async_trait]
impl<T: HttpTransport> BlueScoreReader for DagRpcAdapter<T> {
    async fn get_blue_score(&self, height: Option<u64>) -> SyncResult<u64> {
        let tag = match height {
            Some(height) => encode_quantity(height),
            None => "latest".to_string(),
        };
        let score: Value = self.required("phoenix_getBlueScore", vec![json!(tag)]).await?;
        decode_quantity_value("phoenix_getBlueScore", &score)
    }
}

#[async_trait]
impl<T: HttpTransport> BlockParentsReader for DagRpcAdapter<T> {
    async fn get_block_parents(&self, block_hash: &str) -> SyncResult<Vec<String>> {
        let parents: Option<Vec<String>> = self
            .client
            .call("phoenix_getBlockParents", vec![json!(block_hash)])
            .await?;
        Ok(parents.unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::ScriptedTransport;
    use crate::types::RetryPolicy;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    fn adapter(transport: ScriptedTransport) -> DagRpcAdapter<ScriptedTransport> {
        let policy = RetryPolicy {
            max_attempts: 1,
            base_delay: Duration::ZERO,
        };
        DagRpcAdapter::new(RpcClient::new(transport, policy, CancellationToken::new()))
    }

    #[tokio::test]
    async fn test_block_number_decodes_hex() {
        let node = adapter(ScriptedTransport::new().result(json!("0x2a")));
        assert_eq!(node.block_number().await.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_block_by_number_params() {
        let node = adapter(ScriptedTransport::new().result(Value::Null));
        assert!(node.get_block_by_number(16, true).await.unwrap().is_none());

        let requests = node.client().transport().requests();
        assert_eq!(requests[0].method, "eth_getBlockByNumber");
        assert_eq!(requests[0].params, vec![json!("0x10"), json!(true)]);
    }

    #[tokio::test]
    async fn test_code_is_hex_decoded() {
        let node = adapter(ScriptedTransport::new().result(json!("0x6060")));
        let code = node.get_code("0x0000000000000000000000000000000000000001").await.unwrap();
        assert_eq!(code.as_ref(), &[0x60, 0x60]);

        let requests = node.client().transport().requests();
        assert_eq!(requests[0].params[1], json!("latest"));
    }

    #[tokio::test]
    async fn test_dag_info_with_numeric_blue_work() {
        let node = adapter(ScriptedTransport::new().result(json!({
            "blueScore": "0x64",
            "blueWork": 123456789,
            "mergeSetBlues": ["0xaa"],
            "mergeSetReds": []
        })));
        let info = node.get_dag_info("0x01").await.unwrap().unwrap();
        assert_eq!(info.blue_score, Some(100));
        assert_eq!(info.blue_work, U256::from(123_456_789u64));
        assert_eq!(info.merge_set_blues, vec!["0xaa".to_string()]);
    }

    #[tokio::test]
    async fn test_blue_score_tag() {
        let node = adapter(
            ScriptedTransport::new()
                .result(json!("0x7"))
                .result(json!("0x9")),
        );
        assert_eq!(node.get_blue_score(Some(3)).await.unwrap(), 7);
        assert_eq!(node.get_blue_score(None).await.unwrap(), 9);

        let requests = node.client().transport().requests();
        assert_eq!(requests[0].params, vec![json!("0x3")]);
        assert_eq!(requests[1].params, vec![json!("latest")]);
    }

    #[tokio::test]
    async fn test_null_parents_is_empty() {
        let node = adapter(ScriptedTransport::new().result(Value::Null));
        assert!(node.get_block_parents("0x01").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_log_filter_encoding() {
        let node = adapter(ScriptedTransport::new().result(json!([])));
        let filter = LogFilter {
            address: Some("0xabc".to_string()),
            from_block: Some(1),
            to_block: Some(255),
            topics: vec![],
        };
        assert!(node.get_logs(&filter).await.unwrap().is_empty());

        let requests = node.client().transport().requests();
        assert_eq!(
            requests[0].params[0],
            json!({"address": "0xabc", "fromBlock": "0x1", "toBlock": "0xff"})
        );
    }

    #[tokio::test]
    async fn test_disconnected_node() {
        let node = adapter(ScriptedTransport::new());
        assert!(!node.is_connected().await);
    }
}
