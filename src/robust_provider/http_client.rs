//! Retrying HTTP client for chains reached through REST or plain JSON-RPC.

use std::{fmt::Debug, sync::Arc, time::Duration};

use backon::{ExponentialBuilder, Retryable};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use thiserror::Error;
use tokio::{
    sync::{Mutex, Semaphore},
    time::{Instant, sleep_until, timeout},
};

use crate::robust_provider::builder::{DEFAULT_CALL_TIMEOUT, DEFAULT_MAX_RETRIES, DEFAULT_MIN_DELAY};

/// Default ceiling on requests in flight per client.
pub const DEFAULT_MAX_CONCURRENT_REQUESTS: usize = 8;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HttpError {
    #[error("HTTP request timed out")]
    Timeout,
    #[error("HTTP transport error: {0}")]
    Transport(String),
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("could not decode response: {0}")]
    Decode(String),
    #[error("JSON-RPC error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("invalid endpoint {0}")]
    InvalidEndpoint(String),
}

impl HttpError {
    /// Timeouts, connection failures, 429 and 5xx responses.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            HttpError::Timeout | HttpError::Transport(_) => true,
            HttpError::Status { status, .. } => {
                *status == StatusCode::TOO_MANY_REQUESTS.as_u16() || *status >= 500
            }
            HttpError::Decode(_) | HttpError::Rpc { .. } | HttpError::InvalidEndpoint(_) => false,
        }
    }

    #[must_use]
    pub fn rpc_code(&self) -> Option<i64> {
        match self {
            HttpError::Rpc { code, .. } => Some(*code),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for HttpError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            HttpError::Timeout
        } else if error.is_decode() {
            HttpError::Decode(error.to_string())
        } else {
            HttpError::Transport(error.to_string())
        }
    }
}

#[derive(Serialize)]
struct JsonRpcRequest<'a, P> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: P,
}

#[derive(Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<JsonRpcErrorBody>,
}

#[derive(Deserialize)]
struct JsonRpcErrorBody {
    code: i64,
    #[serde(default)]
    message: String,
    #[serde(default)]
    data: Option<Value>,
    /// NEAR nodes name the error kind here.
    #[serde(default)]
    cause: Option<Value>,
}

impl JsonRpcErrorBody {
    fn into_error(self) -> HttpError {
        let mut message = self.message;
        if let Some(data) = self.data.filter(|data| !data.is_null()) {
            match data {
                Value::String(data) => message = format!("{message}: {data}"),
                other => message = format!("{message}: {other}"),
            }
        }
        if let Some(name) = self.cause.as_ref().and_then(|cause| cause.get("name")).and_then(Value::as_str) {
            message = format!("{message} [{name}]");
        }
        HttpError::Rpc { code: self.code, message }
    }
}

/// Builder for [`RobustHttpClient`].
pub struct RobustHttpClientBuilder {
    endpoints: Vec<String>,
    call_timeout: Duration,
    max_retries: usize,
    min_delay: Duration,
    max_concurrent_requests: usize,
    min_call_interval: Duration,
}

impl RobustHttpClientBuilder {
    /// `endpoint` is the base URL every request path is appended to.
    #[must_use]
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoints: vec![endpoint.into()],
            call_timeout: DEFAULT_CALL_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
            min_delay: DEFAULT_MIN_DELAY,
            max_concurrent_requests: DEFAULT_MAX_CONCURRENT_REQUESTS,
            min_call_interval: Duration::ZERO,
        }
    }

    #[must_use]
    pub fn fallback(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoints.push(endpoint.into());
        self
    }

    #[must_use]
    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    #[must_use]
    pub fn max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    #[must_use]
    pub fn min_delay(mut self, min_delay: Duration) -> Self {
        self.min_delay = min_delay;
        self
    }

    /// Requests beyond this many in flight wait for a free slot.
    #[must_use]
    pub fn max_concurrent_requests(mut self, max: usize) -> Self {
        self.max_concurrent_requests = max;
        self
    }

    /// Minimum spacing between the start of two requests, for rate-capped APIs.
    #[must_use]
    pub fn min_call_interval(mut self, interval: Duration) -> Self {
        self.min_call_interval = interval;
        self
    }

    /// # Errors
    ///
    /// Returns [`HttpError::InvalidEndpoint`] for endpoints that are not absolute URLs, and
    /// [`HttpError::Transport`] if the TLS backend cannot be initialized.
    pub fn build(self) -> Result<RobustHttpClient, HttpError> {
        for endpoint in &self.endpoints {
            reqwest::Url::parse(endpoint)
                .map_err(|_| HttpError::InvalidEndpoint(endpoint.clone()))?;
        }
        let client = Client::builder().build()?;
        debug!(
            endpoint_count = self.endpoints.len(),
            max_concurrent_requests = self.max_concurrent_requests,
            min_call_interval_ms = self.min_call_interval.as_millis(),
            "Building RobustHttpClient"
        );
        Ok(RobustHttpClient {
            client,
            endpoints: self.endpoints.into_iter().map(|e| e.trim_end_matches('/').to_owned()).collect(),
            call_timeout: self.call_timeout,
            max_retries: self.max_retries,
            min_delay: self.min_delay,
            permits: Arc::new(Semaphore::new(self.max_concurrent_requests.max(1))),
            min_call_interval: self.min_call_interval,
            next_slot: Arc::new(Mutex::new(Instant::now())),
        })
    }
}

/// HTTP client with per-call timeout, retries, fallback endpoints, a concurrency ceiling and
/// optional request pacing. Clones share the ceiling and the pacing clock.
#[derive(Clone, Debug)]
pub struct RobustHttpClient {
    client: Client,
    endpoints: Vec<String>,
    call_timeout: Duration,
    max_retries: usize,
    min_delay: Duration,
    permits: Arc<Semaphore>,
    min_call_interval: Duration,
    next_slot: Arc<Mutex<Instant>>,
}

impl RobustHttpClient {
    #[must_use]
    pub fn primary_endpoint(&self) -> &str {
        &self.endpoints[0]
    }

    /// `GET {endpoint}/{path}?{query}` decoded as JSON.
    ///
    /// # Errors
    ///
    /// The last endpoint's error once every endpoint has been tried.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, HttpError> {
        trace!(path = path, "GET called");
        let value = self
            .with_failover(|endpoint| {
                let url = join(endpoint, path);
                async move {
                    let response = self.client.get(url).query(query).send().await?;
                    read_json(response).await
                }
            })
            .await?;
        serde_json::from_value(value).map_err(|e| HttpError::Decode(e.to_string()))
    }

    /// Posts a JSON-RPC 2.0 request to the endpoint root and returns its `result`.
    ///
    /// # Errors
    ///
    /// [`HttpError::Rpc`] when the node answers with an `error` object; JSON-RPC errors are not
    /// retried here since their meaning is chain-specific.
    pub async fn json_rpc<P: Serialize, T: DeserializeOwned>(
        &self,
        method: &str,
        params: P,
    ) -> Result<T, HttpError> {
        trace!(method = method, "JSON-RPC called");
        let body = serde_json::to_value(JsonRpcRequest { jsonrpc: "2.0", id: 1, method, params })
            .map_err(|e| HttpError::Decode(e.to_string()))?;
        let value = self
            .with_failover(|endpoint| {
                let body = &body;
                async move {
                    let response = self.client.post(endpoint).json(body).send().await?;
                    read_json(response).await
                }
            })
            .await?;
        let response: JsonRpcResponse =
            serde_json::from_value(value).map_err(|e| HttpError::Decode(e.to_string()))?;
        if let Some(error) = response.error {
            return Err(error.into_error());
        }
        let result = response.result.unwrap_or(Value::Null);
        serde_json::from_value(result).map_err(|e| HttpError::Decode(e.to_string()))
    }

    async fn with_failover<'a, F, Fut>(&'a self, operation: F) -> Result<Value, HttpError>
    where
        F: Fn(&'a str) -> Fut,
        Fut: Future<Output = Result<Value, HttpError>>,
    {
        let mut last_error = HttpError::InvalidEndpoint(String::new());
        for (idx, endpoint) in self.endpoints.iter().enumerate() {
            match self.try_endpoint(|| operation(endpoint.as_str())).await {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => {
                    error!(endpoint_num = idx + 1, error = %e, "HTTP endpoint failed");
                    last_error = e;
                }
            }
        }
        Err(last_error)
    }

    async fn try_endpoint<F, Fut>(&self, operation: F) -> Result<Value, HttpError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<Value, HttpError>>,
    {
        let retry_strategy = ExponentialBuilder::default()
            .with_max_times(self.max_retries)
            .with_min_delay(self.min_delay);

        timeout(
            self.call_timeout,
            (|| async {
                let _permit = self
                    .permits
                    .acquire()
                    .await
                    .map_err(|_| HttpError::Transport("client closed".into()))?;
                self.pace().await;
                operation().await
            })
            .retry(retry_strategy)
            .when(HttpError::is_retryable)
            .notify(|err: &HttpError, dur: Duration| {
                debug!(error = %err, delay_ms = dur.as_millis(), "HTTP error, retrying");
            })
            .sleep(tokio::time::sleep),
        )
        .await
        .map_err(|_| HttpError::Timeout)?
    }

    async fn pace(&self) {
        if self.min_call_interval.is_zero() {
            return;
        }
        let slot = {
            let mut next = self.next_slot.lock().await;
            let slot = (*next).max(Instant::now());
            *next = slot + self.min_call_interval;
            slot
        };
        sleep_until(slot).await;
    }
}

fn join(endpoint: &str, path: &str) -> String {
    if path.is_empty() {
        return endpoint.to_owned();
    }
    format!("{endpoint}/{}", path.trim_start_matches('/'))
}

async fn read_json(response: reqwest::Response) -> Result<Value, HttpError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(HttpError::Status { status: status.as_u16(), body });
    }
    Ok(response.json::<Value>().await?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(HttpError::Timeout.is_retryable());
        assert!(HttpError::Status { status: 429, body: String::new() }.is_retryable());
        assert!(HttpError::Status { status: 503, body: String::new() }.is_retryable());
        assert!(!HttpError::Status { status: 404, body: String::new() }.is_retryable());
        assert!(!HttpError::Rpc { code: -32007, message: "skipped".into() }.is_retryable());
        assert_eq!(HttpError::Rpc { code: -32009, message: String::new() }.rpc_code(), Some(-32009));
    }

    #[test]
    fn rpc_error_keeps_data_and_cause() {
        let body: JsonRpcErrorBody = serde_json::from_value(serde_json::json!({
            "code": -32000,
            "message": "Server error",
            "data": "DB Not Found Error: BLOCK HEIGHT: 9",
            "cause": { "name": "UNKNOWN_BLOCK", "info": {} }
        }))
        .unwrap();
        assert_eq!(
            body.into_error(),
            HttpError::Rpc {
                code: -32000,
                message: "Server error: DB Not Found Error: BLOCK HEIGHT: 9 [UNKNOWN_BLOCK]".into()
            }
        );
    }

    #[test]
    fn joins_paths() {
        assert_eq!(join("https://node/v1", "/accounts/0x1"), "https://node/v1/accounts/0x1");
        assert_eq!(join("https://node", "status"), "https://node/status");
        assert_eq!(join("https://node", ""), "https://node");
    }

    #[test]
    fn rejects_relative_endpoints() {
        assert!(matches!(
            RobustHttpClientBuilder::new("not a url").build(),
            Err(HttpError::InvalidEndpoint(_))
        ));
        let client = RobustHttpClientBuilder::new("https://node.example/v1/").build().unwrap();
        assert_eq!(client.primary_endpoint(), "https://node.example/v1");
    }

    #[tokio::test(start_paused = true)]
    async fn pacing_spaces_out_calls() {
        let client = RobustHttpClientBuilder::new("https://node.example")
            .min_call_interval(Duration::from_millis(250))
            .build()
            .unwrap();
        let start = Instant::now();
        client.pace().await;
        client.pace().await;
        client.pace().await;
        assert!(start.elapsed() >= Duration::from_millis(500));
    }
}
