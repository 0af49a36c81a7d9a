//! Requests, responses and the network seam.

use async_trait::async_trait;
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::clients::ClientId;
use crate::FetchError;

/// Content type of synthesized JSON responses.
pub const JSON_CONTENT_TYPE: &str = "application/json";

// ==================== Request ====================

/// A request intercepted by the worker.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    /// Request URL.
    pub url: Url,

    /// Request method, upper case.
    pub method: String,

    /// Request headers, keyed by lower-case name.
    pub headers: HashMap<String, String>,

    /// Session that issued the request, if any.
    pub client_id: Option<ClientId>,

    /// Navigation mode (top-level page load).
    pub is_navigation: bool,
}

impl FetchRequest {
    /// Create a GET request.
    pub fn get(url: Url) -> Self {
        Self {
            url,
            method: "GET".to_string(),
            headers: HashMap::new(),
            client_id: None,
            is_navigation: false,
        }
    }

    /// Create a navigation request, as issued by a page load.
    pub fn navigate(url: Url) -> Self {
        Self {
            is_navigation: true,
            ..Self::get(url).with_header("accept", "text/html,application/xhtml+xml")
        }
    }

    /// Set the method.
    pub fn with_method(mut self, method: &str) -> Self {
        self.method = method.to_ascii_uppercase();
        self
    }

    /// Add a header.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers
            .insert(name.to_ascii_lowercase(), value.to_string());
        self
    }

    /// Attribute the request to a session.
    pub fn from_client(mut self, client_id: ClientId) -> Self {
        self.client_id = Some(client_id);
        self
    }

    /// Get a header value.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(|v| v.as_str())
    }

    /// Canonical identity used as cache key.
    pub fn cache_key(&self) -> String {
        cache_key(&self.url)
    }
}

/// URL without fragment.
pub fn cache_key(url: &Url) -> String {
    let mut url = url.clone();
    url.set_fragment(None);
    url.into()
}

// ==================== Response ====================

/// A response, from the network, the cache, or synthesized by the worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchResponse {
    /// Status code.
    pub status: u16,

    /// Status text.
    pub status_text: String,

    /// Response headers, keyed by lower-case name.
    pub headers: HashMap<String, String>,

    /// Response body.
    pub body: Vec<u8>,

    /// Whether served from cache.
    #[serde(default)]
    pub from_cache: bool,
}

impl FetchResponse {
    /// Create a response with a body.
    pub fn new(status: u16, status_text: &str, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            status_text: status_text.to_string(),
            headers: HashMap::new(),
            body: body.into(),
            from_cache: false,
        }
    }

    /// Create a `200 OK` response.
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        Self::new(200, "OK", body)
    }

    /// Create a `200 OK` JSON response.
    pub fn json(body: impl Into<Vec<u8>>) -> Self {
        Self::ok(body).with_header("content-type", JSON_CONTENT_TYPE)
    }

    /// Create a terminal `503 Service Unavailable` response.
    pub fn unavailable(message: &str) -> Self {
        Self::new(503, "Service Unavailable", message)
            .with_header("content-type", "text/plain; charset=utf-8")
    }

    /// Add a header.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers
            .insert(name.to_ascii_lowercase(), value.to_string());
        self
    }

    /// Get a header value.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(|v| v.as_str())
    }

    /// Check if the status is 2xx.
    pub fn is_ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Body as UTF-8 text, lossy.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

// ==================== Fetcher ====================

/// The network collaborator.
///
/// Implementations return `Ok` for every response the server produced,
/// whatever its status, and `Err` only when no response was obtained.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, FetchError>;
}
