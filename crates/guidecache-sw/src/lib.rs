//! # guidecache service worker
//!
//! Offline caching and update propagation for the event-guide application.
//!
//! ## Features
//!
//! - **Cache store**: named partitions of captured responses
//! - **Classification**: static asset, api data, navigation or pass-through
//! - **Fetch strategies**: cache-first, network-first, navigation fallback
//! - **Lifecycle**: install, waiting, activate, with stale generation pruning
//! - **Update notifications**: version broadcasts and the skip-waiting control
//!
//! ## Architecture
//!
//! ```text
//! ServiceWorkerContainer
//!     │
//!     ├── Registration
//!     │       ├── installing (ServiceWorker)
//!     │       ├── waiting (ServiceWorker)
//!     │       └── active (ServiceWorker)
//!     │
//!     ├── GenerationRuntime (one per live generation)
//!     │       ├── LifecycleController ── install / activate / refresh
//!     │       └── FetchStrategies ────── AssetClassifier → strategy
//!     │
//!     ├── CacheStore
//!     │       └── Cache (partition) ── key → CacheEntry
//!     │
//!     └── UpdateNotifier
//!             └── Clients ── SessionEvent ──→ Session
//! ```

use thiserror::Error;

pub mod cache;
pub mod classify;
pub mod clients;
pub mod container;
pub mod fetch;
pub mod lifecycle;
pub mod message;
pub mod notify;
pub mod session;
pub mod strategy;
pub mod testing;

pub use cache::{CacheEntry, CacheHandle, CacheStore};
pub use classify::{AssetClassifier, RequestClass};
pub use clients::{ClientId, ClientMatchOptions, ClientType, SessionEvent};
pub use container::{
    InstallOutcome, ServiceWorkerContainer, ServiceWorkerEvent, BACKGROUND_SYNC_TAG,
    RETIRED_HISTORY, UPDATE_CHECK_INTERVAL,
};
pub use fetch::{FetchRequest, FetchResponse, Fetcher};
pub use lifecycle::{
    ActivateReport, AssetOutcome, AssetStatus, GenerationId, InstallReport, LifecycleController,
    Registration, ServiceWorker, ServiceWorkerState, StateTransition,
};
pub use message::{ClientCommand, UpdateKind, WorkerMessage, WorkerReply};
pub use notify::UpdateNotifier;
pub use session::{ReloadReason, Session, SessionAction, UpdateState, PROMPT_AUTO_HIDE};
pub use strategy::{FetchOutcome, FetchStrategies};

// ==================== Errors ====================

/// Failure of the network collaborator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Unexpected status: {0}")]
    Status(u16),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

/// Errors that can occur in service worker operations.
#[derive(Error, Debug, Clone)]
pub enum ServiceWorkerError {
    #[error("Registration failed: {0}")]
    RegistrationFailed(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("State error: {0}")]
    StateError(String),

    #[error("Cache error: {0}")]
    CacheError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Config error: {0}")]
    ConfigError(String),
}

impl From<FetchError> for ServiceWorkerError {
    fn from(err: FetchError) -> Self {
        Self::NetworkError(err.to_string())
    }
}

impl From<guidecache_core::CoreError> for ServiceWorkerError {
    fn from(err: guidecache_core::CoreError) -> Self {
        Self::ConfigError(err.to_string())
    }
}

/// Result type alias for service worker operations.
pub type Result<T> = std::result::Result<T, ServiceWorkerError>;
