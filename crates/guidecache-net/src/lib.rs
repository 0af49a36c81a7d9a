//! # guidecache net
//!
//! The network collaborator of the worker: an HTTP [`Fetcher`] built on
//! `reqwest`.
//!
//! Every response the server produces is returned, whatever its status;
//! only transport failures (connection refused, timeout, bad URL) are
//! errors. The worker's strategies decide what a non-2xx status means.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method};
use thiserror::Error;
use tracing::{debug, info, trace};

use guidecache_sw::{FetchError, FetchRequest, FetchResponse, Fetcher};

/// Errors that can occur in networking.
#[derive(Error, Debug)]
pub enum NetError {
    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),
}

impl From<NetError> for FetchError {
    fn from(err: NetError) -> Self {
        match err {
            NetError::InvalidUrl(url) => FetchError::InvalidUrl(url),
            other => FetchError::Network(other.to_string()),
        }
    }
}

/// HTTP client configuration.
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// User agent string.
    pub user_agent: String,
    /// Accept-Language header.
    pub accept_language: String,
    /// Per-request timeout.
    pub default_timeout: Duration,
    /// Maximum redirects.
    pub max_redirects: usize,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            user_agent: concat!("guidecache/", env!("CARGO_PKG_VERSION")).to_string(),
            accept_language: "de-DE,de;q=0.9,en;q=0.8".to_string(),
            default_timeout: Duration::from_secs(30),
            max_redirects: 10,
        }
    }
}

/// Fetches requests over HTTP.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    config: LoaderConfig,
}

impl HttpFetcher {
    /// Create a new fetcher.
    pub fn new(config: LoaderConfig) -> Result<Self, NetError> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.default_timeout)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .build()
            .map_err(|e| NetError::RequestFailed(e.to_string()))?;

        info!(user_agent = %config.user_agent, "HttpFetcher initialized");

        Ok(Self { client, config })
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// Perform a request.
    pub async fn load(&self, request: &FetchRequest) -> Result<FetchResponse, NetError> {
        debug!(url = %request.url, method = %request.method, "Fetching resource");

        if !matches!(request.url.scheme(), "http" | "https") {
            return Err(NetError::InvalidUrl(request.url.to_string()));
        }

        let method = Method::from_bytes(request.method.as_bytes())
            .map_err(|e| NetError::RequestFailed(e.to_string()))?;

        let mut builder = self.client.request(method, request.url.clone());
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if request.header("accept-language").is_none() {
            builder = builder.header("Accept-Language", &self.config.accept_language);
        }

        let response = builder.send().await.map_err(|e| self.classify(e))?;

        let status = response.status();
        let mut converted = FetchResponse::new(
            status.as_u16(),
            status.canonical_reason().unwrap_or_default(),
            Vec::new(),
        );
        for (name, value) in response.headers() {
            if let Ok(value) = value.to_str() {
                converted = converted.with_header(name.as_str(), value);
            }
        }

        let body = response.bytes().await.map_err(|e| self.classify(e))?;
        converted.body = body.to_vec();

        trace!(
            url = %request.url,
            status = status.as_u16(),
            body_len = converted.body.len(),
            "Response received"
        );
        Ok(converted)
    }

    fn classify(&self, err: reqwest::Error) -> NetError {
        if err.is_timeout() {
            NetError::Timeout(self.config.default_timeout)
        } else {
            NetError::HttpError(err)
        }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, FetchError> {
        self.load(request).await.map_err(FetchError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loader_config_default() {
        let config = LoaderConfig::default();
        assert!(config.user_agent.starts_with("guidecache/"));
        assert_eq!(config.max_redirects, 10);
        assert_eq!(config.default_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_net_error_to_fetch_error() {
        let err: FetchError = NetError::InvalidUrl("ftp://x/".to_string()).into();
        assert_eq!(err, FetchError::InvalidUrl("ftp://x/".to_string()));

        let err: FetchError = NetError::Timeout(Duration::from_secs(1)).into();
        assert!(matches!(err, FetchError::Network(_)));
    }
}
