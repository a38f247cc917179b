//! Retrying JSON-RPC 2.0 client.
//!
//! [`RpcClient::call`] wraps one HTTP round trip in a bounded retry loop with
//! exponential backoff. Only transport failures are retried: an `error`
//! object from the node or a `result` that does not decode into the caller's
//! type fails immediately. A `null` result is `Ok(None)`.
//!
//! The client holds a [`CancellationToken`]; cancelling it aborts both the
//! in-flight request and any pending backoff sleep with
//! [`SyncError::Cancelled`].

use async_trait::async_trait;
use log::{debug, warn};
use reqwest::header::CONTENT_TYPE;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::types::{JsonRpcRequest, JsonRpcResponse, RetryPolicy};
use crate::{SyncError, SyncResult};

/// One HTTP POST of a JSON body, returning the response body.
///
/// Implementations report every failure (connect, timeout, non-2xx status,
/// unreadable body) as [`SyncError::Transport`].
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn post(&self, body: String) -> SyncResult<String>;
}

/// Production transport over `reqwest`.
#[derive(Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
    url: String,
    auth: Option<(String, Option<String>)>,
}

impl ReqwestTransport {
    /// `auth` is `user:password` (or a bare user) and is sent as basic auth.
    pub fn new(url: impl Into<String>, auth: Option<String>, timeout: Duration) -> SyncResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::Config(format!("Failed to build HTTP client: {}", e)))?;
        let auth = auth.map(|raw| match raw.split_once(':') {
            Some((user, password)) => (user.to_string(), Some(password.to_string())),
            None => (raw, None),
        });
        Ok(Self {
            client,
            url: url.into(),
            auth,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn post(&self, body: String) -> SyncResult<String> {
        let mut request = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, "application/json")
            .body(body);
        if let Some((user, password)) = &self.auth {
            request = request.basic_auth(user, password.as_ref());
        }

        let response = request
            .send()
            .await
            .map_err(|e| SyncError::Transport(format!("POST {}: {}", self.url, e)))?;
        let status = response.status();
        if !status.is_success() {
            return Err(SyncError::Transport(format!("HTTP status {}", status)));
        }
        response
            .text()
            .await
            .map_err(|e| SyncError::Transport(format!("Failed to read response body: {}", e)))
    }
}

pub struct RpcClient<T = ReqwestTransport> {
    transport: T,
    policy: RetryPolicy,
    cancel: CancellationToken,
    next_id: AtomicU64,
}

impl<T: HttpTransport> RpcClient<T> {
    pub fn new(transport: T, policy: RetryPolicy, cancel: CancellationToken) -> Self {
        Self {
            transport,
            policy,
            cancel,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Calls `method` with `params`, retrying transport failures.
    pub async fn call<R: DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<Value>,
    ) -> SyncResult<Option<R>> {
        let attempts = self.policy.attempts();
        let mut last_error = None;

        for attempt in 1..=attempts {
            if self.cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }

            let delay = self.policy.delay_before(attempt);
            if !delay.is_zero() {
                debug!("Retrying {} in {:?} (attempt {}/{})", method, delay, attempt, attempts);
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => return Err(SyncError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }

            let outcome = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(SyncError::Cancelled),
                outcome = self.call_once(method, &params) => outcome,
            };

            match outcome {
                Ok(result) => return Ok(result),
                Err(e) if e.is_retryable() => {
                    warn!("{} failed (attempt {}/{}): {}", method, attempt, attempts, e);
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(SyncError::RetriesExhausted {
            method: method.to_string(),
            attempts,
            source: Box::new(
                last_error.unwrap_or_else(|| SyncError::Transport("no attempt made".to_string())),
            ),
        })
    }

    async fn call_once<R: DeserializeOwned>(
        &self,
        method: &str,
        params: &[Value],
    ) -> SyncResult<Option<R>> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = serde_json::to_string(&JsonRpcRequest::new(id, method, params.to_vec()))?;
        let text = self.transport.post(body).await?;

        let response: JsonRpcResponse = serde_json::from_str(&text)
            .map_err(|e| SyncError::Transport(format!("Unreadable {} response: {}", method, e)))?;
        if let Some(error) = response.error {
            return Err(SyncError::Rpc {
                code: error.code,
                message: error.message,
            });
        }
        match response.result {
            None | Some(Value::Null) => Ok(None),
            Some(result) => serde_json::from_value(result)
                .map(Some)
                .map_err(|e| SyncError::Decode(format!("{}: {}", method, e))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::ScriptedTransport;
    use serde_json::json;
    use std::sync::Arc;

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(5),
        }
    }

    #[tokio::test]
    async fn test_recovers_after_transient_failures() {
        let transport = ScriptedTransport::new()
            .fail("connection refused")
            .fail("connection reset")
            .result(json!("0x10"));
        let client = RpcClient::new(transport, fast_policy(3), CancellationToken::new());

        let tip: Option<String> = client.call("eth_blockNumber", vec![]).await.unwrap();
        assert_eq!(tip.as_deref(), Some("0x10"));
        assert_eq!(client.transport().request_count(), 3);
    }

    #[tokio::test]
    async fn test_reports_attempt_count_when_exhausted() {
        let client = RpcClient::new(ScriptedTransport::new(), fast_policy(3), CancellationToken::new());

        let err = client.call::<String>("eth_blockNumber", vec![]).await.unwrap_err();
        match err {
            SyncError::RetriesExhausted { method, attempts, source } => {
                assert_eq!(method, "eth_blockNumber");
                assert_eq!(attempts, 3);
                assert!(source.is_retryable());
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(client.transport().request_count(), 3);
    }

    #[tokio::test]
    async fn test_rpc_error_is_not_retried() {
        let transport = ScriptedTransport::new().rpc_error(-32601, "method not found");
        let client = RpcClient::new(transport, fast_policy(3), CancellationToken::new());

        let err = client.call::<String>("phoenix_getDAGInfo", vec![]).await.unwrap_err();
        assert!(matches!(err, SyncError::Rpc { code: -32601, .. }));
        assert_eq!(client.transport().request_count(), 1);
    }

    #[tokio::test]
    async fn test_null_result_is_none() {
        let transport = ScriptedTransport::new().result(Value::Null);
        let client = RpcClient::new(transport, fast_policy(3), CancellationToken::new());

        let block: Option<Value> = client
            .call("eth_getBlockByNumber", vec![json!("0x5"), json!(true)])
            .await
            .unwrap();
        assert!(block.is_none());
    }

    #[tokio::test]
    async fn test_undecodable_result_is_not_retried() {
        let transport = ScriptedTransport::new().result(json!({"unexpected": true}));
        let client = RpcClient::new(transport, fast_policy(3), CancellationToken::new());

        let err = client.call::<String>("eth_blockNumber", vec![]).await.unwrap_err();
        assert!(matches!(err, SyncError::Decode(_)));
        assert_eq!(client.transport().request_count(), 1);
    }

    #[tokio::test]
    async fn test_cancel_during_backoff_stops_retrying() {
        let cancel = CancellationToken::new();
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_secs(30),
        };
        let client = Arc::new(RpcClient::new(ScriptedTransport::new(), policy, cancel.clone()));

        let task = {
            let client = client.clone();
            tokio::spawn(async move { client.call::<String>("eth_blockNumber", vec![]).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();

        let result = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("cancellation should be prompt")
            .unwrap();
        assert!(matches!(result, Err(SyncError::Cancelled)));
        assert_eq!(client.transport().request_count(), 1);
    }

    #[tokio::test]
    async fn test_request_envelope() {
        let transport = ScriptedTransport::new().result(json!("0x1"));
        let client = RpcClient::new(transport, fast_policy(1), CancellationToken::new());
        let _: Option<String> = client
            .call("phoenix_getBlueScore", vec![json!("latest")])
            .await
            .unwrap();

        let requests = client.transport().requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].jsonrpc, "2.0");
        assert_eq!(requests[0].method, "phoenix_getBlueScore");
        assert_eq!(requests[0].params, vec![json!("latest")]);
    }

    #[test]
    fn test_auth_parsing() {
        let transport = ReqwestTransport::new(
            "http://localhost:8545",
            Some("user:secret".to_string()),
            Duration::from_secs(1),
        )
        .unwrap();
        assert_eq!(
            transport.auth,
            Some(("user".to_string(), Some("secret".to_string())))
        );
        assert_eq!(transport.url(), "http://localhost:8545");
    }
}
