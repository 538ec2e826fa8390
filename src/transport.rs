//! HTTP transport interface and the reqwest-backed default implementation.
//!
//! The pipeline only depends on [`HttpTransport`]; hosts with their own
//! networking stack implement the trait and hand it to the client.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

/// Failure kinds a transport may surface. All of them are treated as
/// retryable by the dispatcher.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("request timed out after {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("i/o failure: {0}")]
    Io(String),
}

/// A collector response. Header lookup is case-insensitive.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: u16,
    headers: HashMap<String, String>,
    pub body: Bytes,
}

impl Response {
    pub fn new<I, K, V>(status: u16, headers: I, body: Bytes) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let headers = headers
            .into_iter()
            .map(|(k, v)| (k.into().to_ascii_lowercase(), v.into()))
            .collect();
        Self { status, headers, body }
    }

    /// Response with the given status and nothing else.
    pub fn status_only(status: u16) -> Self {
        Self { status, headers: HashMap::new(), body: Bytes::new() }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }
}

/// Single-call HTTP seam: POST a JSON body, get back status + headers + body.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn post_json(
        &self,
        url: &str,
        body: Bytes,
        timeout: Duration,
    ) -> Result<Response, TransportError>;
}

/// Server-dictated retry delay in milliseconds, if the response carries one.
///
/// Accepts bare decimal seconds or an RFC 7231 HTTP-date; a date in the
/// past yields zero.
pub fn parse_retry_after(response: &Response) -> Option<u64> {
    let value = response.header("retry-after")?.trim();
    if let Ok(seconds) = value.parse::<u64>() {
        return Some(seconds.saturating_mul(1_000));
    }
    let date = DateTime::parse_from_rfc2822(value).ok()?;
    let delta = date.with_timezone(&Utc) - Utc::now();
    Some(delta.num_milliseconds().max(0) as u64)
}

/// Production transport backed by a shared [`reqwest::Client`].
#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap an existing client (connection pool, proxy, TLS config).
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn post_json(
        &self,
        url: &str,
        body: Bytes,
        timeout: Duration,
    ) -> Result<Response, TransportError> {
        let response = self
            .client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .timeout(timeout)
            .send()
            .await
            .map_err(|err| classify(err, timeout))?;

        let status = response.status().as_u16();
        let headers: Vec<(String, String)> = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (name.as_str().to_string(), value.to_str().unwrap_or_default().to_string())
            })
            .collect();
        let body = response
            .bytes()
            .await
            .map_err(|err| TransportError::Io(err.to_string()))?;
        Ok(Response::new(status, headers, body))
    }
}

fn classify(err: reqwest::Error, timeout: Duration) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout { timeout_ms: timeout.as_millis() as u64 }
    } else if err.is_connect() {
        TransportError::Connect(err.to_string())
    } else {
        TransportError::Io(err.to_string())
    }
}
