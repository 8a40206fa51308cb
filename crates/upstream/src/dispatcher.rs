//! Retrying upstream dispatch.
//!
//! A call is attempted up to `max_retries + 1` times. An attempt succeeds on
//! HTTP 200 unless the body carries a truthy `error` field; anything else waits a
//! random backoff and tries again. When every attempt fails the caller gets
//! the empty sentinel [`UpstreamResponse::empty`], never an error.

use crate::{Result, UpstreamError};
use async_trait::async_trait;
use parking_lot::Mutex;
use rand::Rng;
use rpcgate_config::DispatcherConfig;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// HTTP method of an upstream call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    /// GET
    Get,
    /// POST
    Post,
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HttpMethod::Get => write!(f, "GET"),
            HttpMethod::Post => write!(f, "POST"),
        }
    }
}

/// An upstream reply. Both fields are `None` for the exhausted-retries
/// sentinel.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpstreamResponse {
    /// HTTP status code
    pub status: Option<u16>,
    /// Parsed JSON body
    pub data: Option<Value>,
}

impl UpstreamResponse {
    /// A reply with a status and body.
    pub fn new(status: u16, data: Option<Value>) -> Self {
        Self {
            status: Some(status),
            data,
        }
    }

    /// The "no data" sentinel.
    pub fn empty() -> Self {
        Self::default()
    }

    /// True for the sentinel.
    pub fn is_empty(&self) -> bool {
        self.status.is_none() && self.data.is_none()
    }

    /// Status 200 and an `error` field that is absent or falsy (`null`,
    /// `false`, `0`, `""`).
    pub fn is_success(&self) -> bool {
        self.status == Some(200)
            && self
                .data
                .as_ref()
                .and_then(|body| body.get("error"))
                .map_or(true, |error| !is_truthy(error))
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map_or(true, |n| n != 0.0 && !n.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// One HTTP round trip to an upstream node.
#[async_trait]
pub trait UpstreamTransport: Send + Sync {
    /// Send a request and return the status and JSON body
    async fn send(&self, method: HttpMethod, url: &str, body: Option<&Value>) -> Result<UpstreamResponse>;
}

/// `reqwest` transport.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Build a client with a per-request timeout.
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    /// Use an existing client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl UpstreamTransport for ReqwestTransport {
    async fn send(&self, method: HttpMethod, url: &str, body: Option<&Value>) -> Result<UpstreamResponse> {
        let mut request = match method {
            HttpMethod::Get => self.client.get(url),
            HttpMethod::Post => self.client.post(url),
        };
        if let Some(body) = body {
            request = request.json(body);
        }

        let resp = request.send().await?;
        let status = resp.status().as_u16();
        // A body that is not JSON is kept as "no body"
        let data = resp.json::<Value>().await.ok();
        Ok(UpstreamResponse::new(status, data))
    }
}

/// Scripted transport for tests.
///
/// Each send pops the next scripted reply; an exhausted script fails every
/// send.
#[derive(Debug, Default)]
pub struct MockTransport {
    script: Mutex<VecDeque<Option<UpstreamResponse>>>,
    requests: Mutex<Vec<(HttpMethod, String)>>,
}

impl MockTransport {
    /// Create a transport with an empty script
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a reply
    pub fn push_response(&self, response: UpstreamResponse) {
        self.script.lock().push_back(Some(response));
    }

    /// Queue a transport failure
    pub fn push_failure(&self) {
        self.script.lock().push_back(None);
    }

    /// Requests sent so far
    pub fn requests(&self) -> Vec<(HttpMethod, String)> {
        self.requests.lock().clone()
    }

    /// Number of requests sent so far
    pub fn attempts(&self) -> usize {
        self.requests.lock().len()
    }
}

#[async_trait]
impl UpstreamTransport for MockTransport {
    async fn send(&self, method: HttpMethod, url: &str, _body: Option<&Value>) -> Result<UpstreamResponse> {
        self.requests.lock().push((method, url.to_string()));
        match self.script.lock().pop_front() {
            Some(Some(response)) => Ok(response),
            _ => Err(UpstreamError::Unavailable(url.to_string())),
        }
    }
}

/// Upstream calls with bounded retries.
pub struct RetryingDispatcher {
    transport: Arc<dyn UpstreamTransport>,
    max_retries: u32,
    backoff_min_ms: u64,
    backoff_max_ms: u64,
}

impl RetryingDispatcher {
    /// Create a dispatcher.
    pub fn new(transport: Arc<dyn UpstreamTransport>, config: &DispatcherConfig) -> Self {
        Self {
            transport,
            max_retries: config.max_retries,
            backoff_min_ms: config.backoff_min_ms,
            backoff_max_ms: config.backoff_max_ms.max(config.backoff_min_ms),
        }
    }

    /// Retries after the first attempt.
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Call `url`, retrying until success or `max_retries` retries have
    /// failed. Returns the sentinel on exhaustion.
    pub async fn call(&self, method: HttpMethod, url: &str, body: Option<&Value>) -> UpstreamResponse {
        let attempts = self.max_retries.saturating_add(1);

        for attempt in 1..=attempts {
            match self.transport.send(method, url, body).await {
                Ok(response) if response.is_success() => return response,
                Ok(response) => {
                    debug!(%method, %url, attempt, status = ?response.status, "Upstream call unsuccessful");
                }
                Err(e) => {
                    warn!(%method, %url, attempt, error = %e, "Upstream call failed");
                }
            }

            if attempt < attempts {
                let delay = self.backoff();
                debug!(%url, delay_ms = delay.as_millis() as u64, "Node is busy, retrying");
                tokio::time::sleep(delay).await;
            }
        }

        warn!(%method, %url, attempts, "Upstream call out of retries");
        UpstreamResponse::empty()
    }

    /// `GET {base_url}/account/{address}`, returning the `account` field.
    pub async fn fetch_account(&self, base_url: &str, address: &str) -> Option<Value> {
        let url = format!("{}/account/{}", base_url, address);
        let response = self.call(HttpMethod::Get, &url, None).await;
        response
            .data
            .and_then(|mut body| body.get_mut("account").map(Value::take))
            .filter(|account| !account.is_null())
    }

    fn backoff(&self) -> Duration {
        let ms = rand::thread_rng().gen_range(self.backoff_min_ms..=self.backoff_max_ms);
        Duration::from_millis(ms)
    }
}
