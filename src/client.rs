//! Paginating client for the upstream scheduling API.
//!
//! The transport is a trait so tests can drive the client with a mock
//! (annotated for `mockall`, like the other trait seams in this crate).
//! Rate limiting (HTTP 429) is treated as always recoverable: the client
//! sleeps for the signalled `Retry-After` duration and retries the same
//! request, optionally bounded by a configurable cumulative backoff cap.

use async_trait::async_trait;
#[cfg(any(test, feature = "test-export-mocks"))]
use mockall::automock;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, error, warn};

/// Seconds to wait on a 429 without a `Retry-After` header.
const DEFAULT_RETRY_AFTER_SECS: u64 = 5;

/// Bytes of response body kept on error, for diagnostics.
const ERROR_BODY_SNIPPET_LEN: usize = 200;

/// Error type for transport implementations (simple boxed error).
pub type TransportError = Box<dyn std::error::Error + Send + Sync>;

/// Raw response handed back by a transport: status, headers and body text.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl HttpResponse {
    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Trait for issuing authenticated GET requests.
/// Implemented by the real reqwest transport and by test mocks.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Issue a GET to `url` with explicit query `params`, returning the raw
    /// status/headers/body regardless of status code.
    async fn get(
        &self,
        url: &str,
        params: &[(String, String)],
    ) -> Result<HttpResponse, TransportError>;
}

/// Production transport: reqwest with a bearer token and per-call timeout.
pub struct ReqwestTransport {
    client: reqwest::Client,
    api_key: String,
}

impl ReqwestTransport {
    pub fn new(api_key: &str, timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(ReqwestTransport {
            client,
            api_key: api_key.to_string(),
        })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn get(
        &self,
        url: &str,
        params: &[(String, String)],
    ) -> Result<HttpResponse, TransportError> {
        let response = self
            .client
            .get(url)
            .bearer_auth(&self.api_key)
            .header(reqwest::header::ACCEPT, "application/json")
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .query(params)
            .send()
            .await?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or_default().to_string()))
            .collect();
        let body = response.text().await?;

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

/// Terminal failures surfaced by the client.
#[derive(Debug)]
pub enum ClientError {
    /// Non-success, non-429 status from the upstream API.
    Status {
        status: u16,
        url: String,
        body: String,
    },
    /// Transport-level failure (connect, timeout, ...).
    Transport(TransportError),
    /// Response body was not valid JSON.
    Decode {
        url: String,
        source: serde_json::Error,
    },
    /// Cumulative rate-limit backoff exceeded the configured cap.
    BackoffExhausted { url: String, waited_secs: u64 },
}

impl std::fmt::Display for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientError::Status { status, url, body } => {
                write!(f, "HTTP {status} from {url}: {body}")
            }
            ClientError::Transport(e) => write!(f, "transport error: {e}"),
            ClientError::Decode { url, source } => {
                write!(f, "invalid JSON from {url}: {source}")
            }
            ClientError::BackoffExhausted { url, waited_secs } => write!(
                f,
                "rate-limit backoff exhausted after {waited_secs}s for {url}"
            ),
        }
    }
}

impl std::error::Error for ClientError {}

impl From<TransportError> for ClientError {
    fn from(e: TransportError) -> Self {
        ClientError::Transport(e)
    }
}

/// API client handling rate-limit backoff, envelope normalization and
/// cursor pagination over any `HttpTransport`.
pub struct ApiClient<T> {
    transport: T,
    max_total_backoff: Option<Duration>,
}

impl<T: HttpTransport> ApiClient<T> {
    pub fn new(transport: T, max_total_backoff: Option<Duration>) -> Self {
        ApiClient {
            transport,
            max_total_backoff,
        }
    }

    /// Fetch one URL as JSON, retrying 429s after the signalled delay.
    pub async fn fetch_json(
        &self,
        url: &str,
        params: &[(String, String)],
    ) -> Result<Value, ClientError> {
        let mut waited = Duration::ZERO;
        loop {
            let response = self.transport.get(url, params).await?;

            if response.status == 429 {
                let wait_secs = response
                    .header("retry-after")
                    .and_then(|v| v.trim().parse::<u64>().ok())
                    .unwrap_or(DEFAULT_RETRY_AFTER_SECS);
                let wait = Duration::from_secs(wait_secs);

                if let Some(cap) = self.max_total_backoff {
                    if waited + wait > cap {
                        return Err(ClientError::BackoffExhausted {
                            url: url.to_string(),
                            waited_secs: (waited + wait).as_secs(),
                        });
                    }
                }

                warn!(url = %url, wait_secs, "Rate limited, sleeping before retry");
                tokio::time::sleep(wait).await;
                waited += wait;
                continue;
            }

            if !(200..300).contains(&response.status) {
                let body: String = response.body.chars().take(ERROR_BODY_SNIPPET_LEN).collect();
                error!(
                    status = response.status,
                    url = %url,
                    body = %body,
                    "Upstream API returned error status"
                );
                return Err(ClientError::Status {
                    status: response.status,
                    url: url.to_string(),
                    body,
                });
            }

            return serde_json::from_str(&response.body).map_err(|e| ClientError::Decode {
                url: url.to_string(),
                source: e,
            });
        }
    }

    /// Follow `next_page` cursors until exhausted, accumulating items in
    /// arrival order. Explicit params are dropped once a cursor URL is
    /// followed: the cursor is self-contained.
    pub async fn paginate(
        &self,
        url: &str,
        params: &[(String, String)],
    ) -> Result<Vec<Value>, ClientError> {
        let mut results = Vec::new();
        let mut next_url = url.to_string();
        let mut next_params: Vec<(String, String)> = params.to_vec();

        loop {
            let response = self.fetch_json(&next_url, &next_params).await?;
            let items = extract_items(&response);
            debug!(url = %next_url, items = items.len(), "Fetched page");
            results.extend(items);

            let next_page = response
                .get("pagination")
                .and_then(|p| p.get("next_page"))
                .or_else(|| {
                    response
                        .get("meta")
                        .and_then(|m| m.get("pagination"))
                        .and_then(|p| p.get("next_page"))
                })
                .and_then(Value::as_str);

            match next_page {
                Some(next) => {
                    next_url = next.to_string();
                    next_params.clear();
                }
                None => break,
            }
        }

        Ok(results)
    }
}

/// Normalize the various response envelopes used across endpoint versions.
///
/// Priority: a `collection` key, then `data`, then `resources`; a mapping
/// with none of these yields one pseudo-item per top-level key excluding
/// `pagination`/`meta`; a bare array passes through unchanged.
pub fn extract_items(response: &Value) -> Vec<Value> {
    if let Some(obj) = response.as_object() {
        for key in ["collection", "data", "resources"] {
            if let Some(items) = obj.get(key) {
                return match items {
                    Value::Array(list) => list.clone(),
                    other => vec![other.clone()],
                };
            }
        }
        let mut items = Vec::new();
        for (key, value) in obj {
            if key != "pagination" && key != "meta" {
                let mut wrapped = serde_json::Map::new();
                wrapped.insert(key.clone(), value.clone());
                items.push(Value::Object(wrapped));
            }
        }
        return items;
    }
    if let Some(list) = response.as_array() {
        return list.clone();
    }
    Vec::new()
}
