//! Outbound HTTP capability for calls to the identity provider.
//!
//! The gate never talks to the network directly: it goes through the
//! [`HttpCall`] trait so tests can substitute a fake without network access.

use std::time::Duration;

use async_trait::async_trait;
use http::HeaderMap;
use serde_json::Value;
use url::Url;

use crate::config::ClientConfig;

/// Raw response from the identity provider.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// HTTP status code.
    pub status: u16,
    /// Raw response body.
    pub body: Vec<u8>,
}

/// Errors from the HTTP-call capability.
#[derive(Debug, Clone)]
pub enum HttpCallError {
    /// The capability could not be constructed from its configuration.
    Config(String),
    /// The outbound call failed before a full response was received.
    Transport(String),
}

impl std::fmt::Display for HttpCallError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "client configuration error: {}", msg),
            Self::Transport(msg) => write!(f, "call to identity provider failed: {}", msg),
        }
    }
}

impl std::error::Error for HttpCallError {}

/// Capability for issuing HTTP calls to the identity provider.
#[async_trait]
pub trait HttpCall: Send + Sync {
    /// POST a JSON body to `path`, relative to the configured base URL.
    ///
    /// Dropping the returned future aborts the outbound call, so inbound
    /// request cancellation propagates naturally.
    async fn post(
        &self,
        path: &str,
        headers: &HeaderMap,
        body: &Value,
    ) -> Result<HttpResponse, HttpCallError>;
}

/// reqwest-backed implementation of [`HttpCall`].
#[derive(Debug)]
pub struct HttpClient {
    base_url: Url,
    client: reqwest::Client,
}

impl HttpClient {
    /// Build a client from the provider configuration.
    ///
    /// Fails when the base URL is empty or unparsable, or when the underlying
    /// client cannot be constructed.
    pub fn new(config: &ClientConfig) -> Result<Self, HttpCallError> {
        if config.url.is_empty() {
            return Err(HttpCallError::Config(
                "identity provider URL is empty".to_string(),
            ));
        }

        let base_url = Url::parse(&config.url)
            .map_err(|e| HttpCallError::Config(format!("invalid identity provider URL: {}", e)))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| HttpCallError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self { base_url, client })
    }

    /// Base URL this client is bound to.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }
}

#[async_trait]
impl HttpCall for HttpClient {
    async fn post(
        &self,
        path: &str,
        headers: &HeaderMap,
        body: &Value,
    ) -> Result<HttpResponse, HttpCallError> {
        let url = self
            .base_url
            .join(path)
            .map_err(|e| HttpCallError::Transport(format!("invalid path {:?}: {}", path, e)))?;

        let response = self
            .client
            .post(url)
            .headers(headers.clone())
            .json(body)
            .send()
            .await
            .map_err(|e| HttpCallError::Transport(e.to_string()))?;

        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|e| HttpCallError::Transport(e.to_string()))?
            .to_vec();

        Ok(HttpResponse { status, body })
    }
}
