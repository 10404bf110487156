//! Gated HTTP GET used by every network stage.
//!
//! [`HttpClient`] bundles a `reqwest::Client` with the run's [`FetchGate`] and
//! [`Cancellation`] handle. Each call takes a gate permit, applies the
//! per-request timeout and response size limit, and races the whole operation
//! against cancellation. No request is retried here.

use crate::gate::{Cancellation, FetchGate};
use futures::StreamExt;
use reqwest::header::CONTENT_TYPE;
use std::time::Duration;
use thiserror::Error;
use url::Url;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_MAX_RESPONSE_BYTES: usize = 10 * 1024 * 1024; // 10MB

/// Errors that can occur while fetching a URL.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// HTTP response with non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Request exceeded the configured timeout
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
    /// Response body exceeded the configured size limit
    #[error("Response too large (exceeds {0} bytes)")]
    ResponseTooLarge(usize),
    /// Response was incomplete (received fewer bytes than Content-Length)
    #[error("Incomplete response: expected {expected} bytes, received {received}")]
    IncompleteResponse { expected: u64, received: usize },
    /// The run was aborted before the request finished
    #[error("Request cancelled")]
    Cancelled,
    /// The fetch gate was shut down
    #[error("Fetch gate closed")]
    GateClosed,
}

impl FetchError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, FetchError::Cancelled | FetchError::GateClosed)
    }
}

/// Client-wide request settings.
#[derive(Debug, Clone)]
pub struct HttpOptions {
    pub user_agent: String,
    pub timeout: Duration,
    pub max_response_bytes: usize,
}

impl Default for HttpOptions {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            timeout: DEFAULT_TIMEOUT,
            max_response_bytes: DEFAULT_MAX_RESPONSE_BYTES,
        }
    }
}

/// `inkfeed/<version>`, sent unless the configuration overrides it.
pub fn default_user_agent() -> String {
    format!("inkfeed/{}", env!("CARGO_PKG_VERSION"))
}

/// A fully read response body plus the metadata later stages need.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// URL after redirects; relative references in the body resolve against it.
    pub url: Url,
    /// Raw `Content-Type` header value, if any.
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Media type without parameters, lowercased (`text/html; charset=utf-8` -> `text/html`).
    pub fn media_type(&self) -> Option<String> {
        self.content_type.as_deref().and_then(|value| {
            let essence = value.split(';').next()?.trim().to_ascii_lowercase();
            (!essence.is_empty()).then_some(essence)
        })
    }

    /// Body decoded as UTF-8, replacing invalid sequences.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Gated, cancellable HTTP client. Cheap to clone.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: reqwest::Client,
    gate: FetchGate,
    cancel: Cancellation,
    timeout: Duration,
    max_response_bytes: usize,
}

impl HttpClient {
    /// Builds the underlying `reqwest::Client` from `options`.
    pub fn new(
        options: &HttpOptions,
        gate: FetchGate,
        cancel: Cancellation,
    ) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(options.user_agent.clone())
            .build()?;

        Ok(Self {
            client,
            gate,
            cancel,
            timeout: options.timeout,
            max_response_bytes: options.max_response_bytes,
        })
    }

    pub fn gate(&self) -> &FetchGate {
        &self.gate
    }

    pub fn cancellation(&self) -> &Cancellation {
        &self.cancel
    }

    /// Fetches `url` through the gate.
    ///
    /// # Errors
    ///
    /// - [`FetchError::Cancelled`] - The run was aborted (permit released immediately)
    /// - [`FetchError::Network`] - Connection or TLS errors
    /// - [`FetchError::Timeout`] - Request exceeded the configured timeout
    /// - [`FetchError::HttpStatus`] - Non-2xx HTTP response
    /// - [`FetchError::ResponseTooLarge`] - Body exceeded the size limit
    /// - [`FetchError::IncompleteResponse`] - Fewer bytes than Content-Length announced
    pub async fn get(&self, url: &Url) -> Result<HttpResponse, FetchError> {
        if self.cancel.is_cancelled() {
            return Err(FetchError::Cancelled);
        }

        let request = async {
            let _permit = self
                .gate
                .acquire()
                .await
                .map_err(|_| FetchError::GateClosed)?;
            tracing::trace!(url = %url, in_flight = self.gate.in_flight(), "Fetching");

            tokio::time::timeout(self.timeout, self.fetch(url))
                .await
                .map_err(|_| FetchError::Timeout(self.timeout))?
        };

        // Dropping `request` on cancellation also drops the permit it holds.
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(FetchError::Cancelled),
            result = request => result,
        }
    }

    async fn fetch(&self, url: &Url) -> Result<HttpResponse, FetchError> {
        let response = self.client.get(url.clone()).send().await?;

        if !response.status().is_success() {
            return Err(FetchError::HttpStatus(response.status().as_u16()));
        }

        let final_url = response.url().clone();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);
        let body = read_limited_bytes(response, self.max_response_bytes).await?;

        Ok(HttpResponse {
            url: final_url,
            content_type,
            body,
        })
    }
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    let expected_length = response.content_length();

    // Fast path: check Content-Length header
    if let Some(len) = expected_length {
        if len > limit as u64 {
            return Err(FetchError::ResponseTooLarge(limit));
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(FetchError::Network)?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::ResponseTooLarge(limit));
        }
        bytes.extend_from_slice(&chunk);
    }

    if let Some(expected) = expected_length {
        if (bytes.len() as u64) < expected {
            return Err(FetchError::IncompleteResponse {
                expected,
                received: bytes.len(),
            });
        }
    }

    Ok(bytes)
}
