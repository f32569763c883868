//! The HTTP capability the engine drives.
//!
//! The engine only needs `send(request) → response`; everything else —
//! connection pooling, TLS, proxies — belongs to the implementation. The
//! trait is narrow on purpose so tests can stand in a mock and so
//! cancellation composes: dropping the `send` future aborts the in-flight
//! request.

use async_trait::async_trait;
use http::{HeaderMap, Method, StatusCode};
use url::Url;

use veridex::error::TransientError;

/// An outbound HTTP request.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    /// Request method.
    pub method: Method,
    /// Request URL.
    pub url: Url,
    /// Request headers.
    pub headers: HeaderMap,
    /// Request body, when present.
    pub body: Option<Vec<u8>>,
}

impl HttpRequest {
    /// Creates a GET request with no headers or body.
    #[must_use]
    pub fn get(url: Url) -> Self {
        Self {
            method: Method::GET,
            url,
            headers: HeaderMap::new(),
            body: None,
        }
    }
}

/// An HTTP response with its body fully read.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// Response status.
    pub status: StatusCode,
    /// Response headers.
    pub headers: HeaderMap,
    /// Response body.
    pub body: Vec<u8>,
}

/// The outbound-HTTP capability.
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Sends a request and reads the full response.
    ///
    /// Cancellation is cooperative: callers drop the returned future and
    /// the in-flight request is aborted.
    ///
    /// # Errors
    ///
    /// Returns [`TransientError::Network`] for transport-level failures.
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransientError>;
}

/// Reqwest-backed HTTP client.
#[derive(Debug, Clone, Default)]
pub struct ReqwestClient {
    inner: reqwest::Client,
}

impl ReqwestClient {
    /// Creates a client with default reqwest settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps an existing reqwest client.
    #[must_use]
    pub const fn from_client(inner: reqwest::Client) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl HttpClient for ReqwestClient {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransientError> {
        let mut builder = self
            .inner
            .request(request.method, request.url)
            .headers(request.headers);
        if let Some(body) = request.body {
            builder = builder.body(body);
        }
        let response = builder
            .send()
            .await
            .map_err(|e| TransientError::Network(e.to_string()))?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(|e| TransientError::Network(e.to_string()))?
            .to_vec();
        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}
