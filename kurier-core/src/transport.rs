//! Transport abstractions and the HTTP implementation
//!
//! The engine never touches the network directly: the host adapter
//! registers transports behind these traits. The primary transport is the
//! cheap fire-and-forget path (a beacon-style send with local-only
//! success); the secondary is the blocking request/response path that the
//! retry machinery drives.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_ENCODING, CONTENT_TYPE};

use crate::error::{Error, Result};
use crate::types::{Batch, BatchEnvelope};

/// Compress bodies at or above this size when compression is enabled.
const COMPRESS_MIN_BYTES: usize = 1024;

/// zstd level balancing speed against ratio for telemetry payloads
const COMPRESS_LEVEL: i32 = 3;

/// Marker sent alongside compressed bodies.
pub const CONTENT_ENCODING_ZSTD: &str = "zstd";

/// Which transport carried a successful attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Beacon,
    Http,
}

impl TransportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::Beacon => "beacon",
            TransportKind::Http => "http",
        }
    }
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Serialized batch ready for a transport.
#[derive(Debug, Clone)]
pub struct WirePayload {
    pub body: Vec<u8>,
    /// `Some("zstd")` when the body is compressed
    pub content_encoding: Option<&'static str>,
}

/// Encode the wire envelope for a batch, compressing when enabled and the
/// body is big enough to be worth it.
///
/// A failed compression falls back to the uncompressed body; it never
/// fails the attempt.
pub fn encode_envelope(app_id: &str, batch: &Batch, compress: bool) -> Result<WirePayload> {
    let body = serde_json::to_vec(&BatchEnvelope::new(app_id, batch))?;

    if compress && body.len() >= COMPRESS_MIN_BYTES {
        match zstd::encode_all(body.as_slice(), COMPRESS_LEVEL) {
            Ok(compressed) => {
                return Ok(WirePayload {
                    body: compressed,
                    content_encoding: Some(CONTENT_ENCODING_ZSTD),
                })
            }
            Err(e) => {
                tracing::debug!(error = %e, "Compression failed, sending uncompressed");
            }
        }
    }

    Ok(WirePayload {
        body,
        content_encoding: None,
    })
}

/// Primary fire-and-forget transport.
///
/// `send` reports local enqueue success only; there is never a server
/// acknowledgment. Implementations must not block, teardown flushes run
/// through this path while the host process is exiting.
pub trait BeaconTransport: Send {
    fn send(&self, payload: &WirePayload) -> bool;
}

/// Secondary request/response transport (HTTP POST semantics).
///
/// Implementations bound the call with their own timeout and treat any
/// non-2xx response as an error.
#[async_trait]
pub trait RequestTransport: Send + Sync {
    async fn send(&self, payload: &WirePayload) -> Result<()>;
}

/// HTTP POST client for the collection endpoint.
pub struct HttpPostTransport {
    http_client: reqwest::Client,
    endpoint_url: String,
}

impl HttpPostTransport {
    /// Build a client with the bounded request timeout.
    pub fn new(endpoint_url: &str, timeout: Duration) -> Result<Self> {
        let endpoint_url = endpoint_url.trim_end_matches('/').to_string();
        if endpoint_url.is_empty() {
            return Err(Error::Config("endpoint URL must not be empty".to_string()));
        }

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            endpoint_url,
        })
    }

    /// Check if the collection endpoint is reachable.
    pub async fn health_check(&self) -> Result<bool> {
        let url = format!("{}/health", self.endpoint_url);

        match self.http_client.get(&url).send().await {
            Ok(response) => Ok(response.status().is_success()),
            Err(_) => Ok(false),
        }
    }
}

#[async_trait]
impl RequestTransport for HttpPostTransport {
    async fn send(&self, payload: &WirePayload) -> Result<()> {
        let mut request = self
            .http_client
            .post(&self.endpoint_url)
            .body(payload.body.clone());
        if let Some(encoding) = payload.content_encoding {
            request = request.header(CONTENT_ENCODING, encoding);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::Transport(format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown".to_string());
            Err(Error::Transport(format!(
                "API error ({}): {}",
                status, error_text
            )))
        }
    }
}
