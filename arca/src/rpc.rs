//! JSON-RPC endpoint pool with failover and cool-down.
//!
//! Every chain adapter holds one [`RpcPool`] per concern (node RPC,
//! explorer API). A call walks the endpoints in their current order until
//! one answers within the per-call timeout. Endpoints that fail with a
//! transport-level error are demoted to the back of the order and skipped
//! for a cool-down window; logical errors (the chain itself rejecting the
//! request) surface immediately without failover.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::Deserialize;
use serde_json::{Value, json};

/// Default per-call timeout.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(8);
/// Default cool-down window for a demoted endpoint.
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(30);

/// How an RPC call failed, coarse enough to drive retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Transport failure: connect error, timeout, 5xx. Retryable.
    Network,
    /// The endpoint throttled us (HTTP 429 or a rate-limit error body).
    /// Retryable on a different endpoint.
    RateLimit,
    /// The chain rejected the request (bad nonce, insufficient funds,
    /// execution revert). Never retried.
    Logical,
}

/// An RPC failure with its classification preserved.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct RpcError {
    /// Failure classification.
    pub class: FailureClass,
    /// Human-readable detail.
    pub message: String,
    /// JSON-RPC error code, when the body carried one.
    pub code: Option<i64>,
    /// The endpoint that produced this failure, when attributable.
    pub endpoint: Option<String>,
}

impl RpcError {
    fn network(message: impl Into<String>, endpoint: &str) -> Self {
        Self {
            class: FailureClass::Network,
            message: message.into(),
            code: None,
            endpoint: Some(endpoint.to_owned()),
        }
    }

    /// True if trying another endpoint could help.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self.class, FailureClass::Network | FailureClass::RateLimit)
    }
}

impl From<RpcError> for crate::error::HostError {
    fn from(err: RpcError) -> Self {
        match err.class {
            FailureClass::Logical => {
                let lower = err.message.to_ascii_lowercase();
                if lower.contains("insufficient funds") || lower.contains("insufficient lamports")
                {
                    Self::InsufficientBalance {
                        message: err.message,
                    }
                } else {
                    Self::RpcUnavailable {
                        message: err.message,
                    }
                }
            }
            FailureClass::Network | FailureClass::RateLimit => Self::RpcUnavailable {
                message: err.message,
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct JsonRpcErrorBody {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    result: Option<Value>,
    error: Option<JsonRpcErrorBody>,
}

struct PoolState {
    /// Endpoint indices in preference order; failures move an index back.
    order: Vec<usize>,
    /// Per-endpoint cool-down expiry, indexed like `endpoints`.
    cooling: Vec<Option<Instant>>,
}

/// An ordered pool of JSON-RPC endpoints with failover.
pub struct RpcPool {
    endpoints: Vec<String>,
    state: Mutex<PoolState>,
    client: reqwest::Client,
    call_timeout: Duration,
    cooldown: Duration,
}

impl std::fmt::Debug for RpcPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcPool")
            .field("endpoints", &self.endpoints)
            .field("call_timeout", &self.call_timeout)
            .field("cooldown", &self.cooldown)
            .finish_non_exhaustive()
    }
}

impl RpcPool {
    /// Creates a pool over the given endpoint URLs with default timings.
    #[must_use]
    pub fn new(urls: Vec<String>) -> Self {
        Self::with_timing(urls, DEFAULT_CALL_TIMEOUT, DEFAULT_COOLDOWN)
    }

    /// Creates a pool with explicit per-call timeout and cool-down window.
    #[must_use]
    pub fn with_timing(urls: Vec<String>, call_timeout: Duration, cooldown: Duration) -> Self {
        let n = urls.len();
        Self {
            endpoints: urls,
            state: Mutex::new(PoolState {
                order: (0..n).collect(),
                cooling: vec![None; n],
            }),
            client: reqwest::Client::new(),
            call_timeout,
            cooldown,
        }
    }

    /// The configured endpoint URLs in their original order.
    #[must_use]
    pub fn urls(&self) -> &[String] {
        &self.endpoints
    }

    /// Candidate indices for the next call: endpoints in current preference
    /// order with cooling ones moved behind healthy ones, so a fully-cooled
    /// pool still tries everything.
    fn candidates(&self) -> Vec<usize> {
        let state = self.state.lock().expect("rpc pool lock poisoned");
        let now = Instant::now();
        let (healthy, cooling): (Vec<usize>, Vec<usize>) = state
            .order
            .iter()
            .copied()
            .partition(|&i| !matches!(state.cooling[i], Some(until) if until > now));
        healthy.into_iter().chain(cooling).collect()
    }

    fn demote(&self, idx: usize) {
        let mut state = self.state.lock().expect("rpc pool lock poisoned");
        state.cooling[idx] = Some(Instant::now() + self.cooldown);
        if let Some(pos) = state.order.iter().position(|&i| i == idx) {
            let moved = state.order.remove(pos);
            state.order.push(moved);
        }
    }

    /// Issues a JSON-RPC call, failing over across the pool.
    ///
    /// Transport failures demote the endpoint and move on; logical errors
    /// surface immediately with their classification preserved.
    ///
    /// # Errors
    ///
    /// Returns the logical error, or the last transport error once the pool
    /// is exhausted.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        let candidates = self.candidates();
        let mut last_err: Option<RpcError> = None;

        for idx in candidates {
            let url = &self.endpoints[idx];
            match self.call_url(url, method, params.clone()).await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() => {
                    tracing::debug!(
                        endpoint = %url,
                        class = ?err.class,
                        "RPC endpoint failed, demoting"
                    );
                    self.demote(idx);
                    last_err = Some(err);
                }
                Err(err) => return Err(err),
            }
        }

        Err(last_err.unwrap_or(RpcError {
            class: FailureClass::Network,
            message: "no RPC endpoints configured".to_owned(),
            code: None,
            endpoint: None,
        }))
    }

    /// Issues a JSON-RPC call against one specific URL.
    ///
    /// Used directly for parallel broadcast fan-out, where each channel is
    /// tried independently rather than in failover order.
    ///
    /// # Errors
    ///
    /// Returns an [`RpcError`] classified by transport status and response
    /// body.
    pub async fn call_url(
        &self,
        url: &str,
        method: &str,
        params: Value,
    ) -> Result<Value, RpcError> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });

        let request = self.client.post(url).json(&body).send();
        let response = match tokio::time::timeout(self.call_timeout, request).await {
            Ok(Ok(resp)) => resp,
            Ok(Err(err)) => return Err(RpcError::network(err.to_string(), url)),
            Err(_) => {
                return Err(RpcError::network(
                    format!("request timed out after {:?}", self.call_timeout),
                    url,
                ));
            }
        };

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(RpcError {
                class: FailureClass::RateLimit,
                message: format!("rate limited by {url}"),
                code: None,
                endpoint: Some(url.to_owned()),
            });
        }
        if !status.is_success() {
            return Err(RpcError::network(format!("HTTP {status} from {url}"), url));
        }

        let parsed: JsonRpcResponse = match response.json().await {
            Ok(parsed) => parsed,
            Err(err) => return Err(RpcError::network(format!("bad response body: {err}"), url)),
        };

        if let Some(err) = parsed.error {
            let lower = err.message.to_ascii_lowercase();
            let class = if err.code == -32005 || lower.contains("rate limit") {
                FailureClass::RateLimit
            } else {
                FailureClass::Logical
            };
            return Err(RpcError {
                class,
                message: err.message,
                code: Some(err.code),
                endpoint: Some(url.to_owned()),
            });
        }

        parsed.result.ok_or_else(|| RpcError {
            class: FailureClass::Logical,
            message: "response carried neither result nor error".to_owned(),
            code: None,
            endpoint: Some(url.to_owned()),
        })
    }
}
