//! Worker generations: state machine, registration slots, and the
//! install / activate phases.
//!
//! ```text
//! Parsed → Installing → Installed (waiting) → Activating → Activated
//!              │               │                                │
//!              └───────────────┴──────── Redundant ◄────────────┘
//!                (superseded by a newer registration, or replaced)
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};
use url::Url;

use guidecache_core::{Generation, GuideConfig, PartitionKind};

use crate::cache::{CacheHandle, CacheStore};
use crate::clients::ClientId;
use crate::fetch::{cache_key, FetchRequest, Fetcher};
use crate::message::{UpdateKind, WorkerMessage};
use crate::notify::UpdateNotifier;
use crate::{Result, ServiceWorkerError};

// ==================== Types ====================

/// Unique identifier for a worker generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GenerationId(u64);

impl GenerationId {
    pub(crate) fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// Service worker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceWorkerState {
    /// Created, install not started.
    #[default]
    Parsed,
    /// Populating its partitions.
    Installing,
    /// Installed and waiting for activation.
    Installed,
    /// Pruning stale partitions and claiming sessions.
    Activating,
    /// Active and controlling sessions.
    Activated,
    /// Superseded or replaced.
    Redundant,
}

/// A state change to report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateTransition {
    pub id: GenerationId,
    pub state: ServiceWorkerState,
}

// ==================== Service Worker ====================

/// One generation's slot record.
#[derive(Debug, Clone)]
pub struct ServiceWorker {
    /// Unique ID.
    pub id: GenerationId,

    /// Naming of the generation.
    pub generation: Generation,

    /// Current state.
    pub state: ServiceWorkerState,

    /// Skip-waiting was requested.
    pub skip_waiting: bool,

    /// Time of last state change.
    pub state_changed_at: Instant,
}

impl ServiceWorker {
    pub fn new(generation: Generation) -> Self {
        Self {
            id: GenerationId::new(),
            generation,
            state: ServiceWorkerState::Parsed,
            skip_waiting: false,
            state_changed_at: Instant::now(),
        }
    }

    /// Set state, returning the transition to report.
    pub fn set_state(&mut self, state: ServiceWorkerState) -> StateTransition {
        self.state = state;
        self.state_changed_at = Instant::now();
        StateTransition { id: self.id, state }
    }

    pub fn is_active(&self) -> bool {
        self.state == ServiceWorkerState::Activated
    }
}

// ==================== Registration ====================

/// The installing, waiting and active slots of the worker's scope.
#[derive(Debug)]
pub struct Registration {
    /// Scope URL.
    pub scope: Url,

    /// Installing worker.
    pub installing: Option<ServiceWorker>,

    /// Waiting worker (installed but not active).
    pub waiting: Option<ServiceWorker>,

    /// Active worker.
    pub active: Option<ServiceWorker>,

    /// Last update check time.
    pub last_update_check: Option<Instant>,
}

impl Registration {
    /// Create a new registration.
    pub fn new(scope: Url) -> Self {
        Self {
            scope,
            installing: None,
            waiting: None,
            active: None,
            last_update_check: None,
        }
    }

    /// Get the active worker.
    pub fn get_active(&self) -> Option<&ServiceWorker> {
        self.active.as_ref()
    }

    /// Find a worker in any slot.
    pub fn find(&self, id: GenerationId) -> Option<&ServiceWorker> {
        [&self.installing, &self.waiting, &self.active]
            .into_iter()
            .flatten()
            .find(|w| w.id == id)
    }

    /// Check if an update check is due.
    pub fn needs_update(&self, check_interval: Duration) -> bool {
        match self.last_update_check {
            Some(last) => last.elapsed() > check_interval,
            None => true,
        }
    }

    /// Put a new generation in the installing slot. A generation still
    /// installing is superseded.
    pub fn begin_install(&mut self, mut worker: ServiceWorker) -> Vec<StateTransition> {
        let mut transitions = Vec::new();
        if let Some(mut old) = self.installing.take() {
            debug!(superseded = old.id.raw(), by = worker.id.raw(), "Install superseded");
            transitions.push(old.set_state(ServiceWorkerState::Redundant));
        }
        transitions.push(worker.set_state(ServiceWorkerState::Installing));
        self.installing = Some(worker);
        self.last_update_check = Some(Instant::now());
        transitions
    }

    /// Move a finished install to the waiting slot, replacing any waiting
    /// generation. `None` if the generation was superseded meanwhile.
    pub fn install_complete(&mut self, id: GenerationId) -> Option<Vec<StateTransition>> {
        if self.installing.as_ref().map(|w| w.id) != Some(id) {
            return None;
        }
        let mut worker = self.installing.take()?;
        let mut transitions = Vec::new();
        if let Some(mut old) = self.waiting.take() {
            transitions.push(old.set_state(ServiceWorkerState::Redundant));
        }
        transitions.push(worker.set_state(ServiceWorkerState::Installed));
        self.waiting = Some(worker);
        Some(transitions)
    }

    /// Record a skip-waiting request.
    ///
    /// Returns `true` if the generation is still pending (installing or
    /// waiting), `false` if it is already the active one.
    pub fn skip_waiting(&mut self, id: GenerationId) -> Result<bool> {
        for slot in [&mut self.installing, &mut self.waiting] {
            if let Some(worker) = slot.as_mut().filter(|w| w.id == id) {
                worker.skip_waiting = true;
                return Ok(true);
            }
        }
        if self.active.as_ref().is_some_and(|w| w.id == id) {
            return Ok(false);
        }
        Err(ServiceWorkerError::NotFound(format!("generation {}", id.raw())))
    }

    /// A waiting generation may activate: it asked to skip waiting, or
    /// there is no active generation to wait for.
    pub fn ready_to_activate(&self) -> bool {
        self.waiting
            .as_ref()
            .is_some_and(|w| w.skip_waiting || self.active.is_none())
    }

    /// Promote the waiting generation to the active slot in `Activating`.
    /// The previously active generation becomes redundant.
    pub fn begin_activate(&mut self) -> Option<(GenerationId, Vec<StateTransition>)> {
        let mut worker = self.waiting.take()?;
        let mut transitions = Vec::new();
        if let Some(mut old) = self.active.take() {
            transitions.push(old.set_state(ServiceWorkerState::Redundant));
        }
        transitions.push(worker.set_state(ServiceWorkerState::Activating));
        let id = worker.id;
        self.active = Some(worker);
        Some((id, transitions))
    }

    /// Mark the activating generation as activated.
    pub fn finish_activate(&mut self, id: GenerationId) -> Option<StateTransition> {
        self.active
            .as_mut()
            .filter(|w| w.id == id && w.state == ServiceWorkerState::Activating)
            .map(|w| w.set_state(ServiceWorkerState::Activated))
    }
}

// ==================== Reports ====================

/// Result of caching one resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "detail", rename_all = "lowercase")]
pub enum AssetStatus {
    Cached,
    /// The server answered with a non-2xx status.
    Rejected(u16),
    /// No response, or the partition vanished.
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetOutcome {
    pub key: String,
    #[serde(flatten)]
    pub status: AssetStatus,
}

impl AssetOutcome {
    pub fn is_cached(&self) -> bool {
        self.status == AssetStatus::Cached
    }
}

/// Diagnostic summary of an install. Never gates activation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InstallReport {
    pub version: String,
    pub static_assets: Vec<AssetOutcome>,
    pub api_data: Vec<AssetOutcome>,
    /// Critical assets absent from the static partition afterwards.
    pub critical_missing: Vec<String>,
    /// The generation asked to skip the waiting state.
    pub skip_waiting: bool,
}

impl InstallReport {
    pub fn cached_count(&self) -> usize {
        self.outcomes().filter(|o| o.is_cached()).count()
    }

    pub fn failed(&self) -> Vec<&AssetOutcome> {
        self.outcomes().filter(|o| !o.is_cached()).collect()
    }

    fn outcomes(&self) -> impl Iterator<Item = &AssetOutcome> {
        self.static_assets.iter().chain(&self.api_data)
    }
}

/// Summary of an activation.
#[derive(Debug, Clone, Default)]
pub struct ActivateReport {
    /// Stale partitions deleted.
    pub deleted: Vec<String>,
    /// Sessions that changed controller.
    pub claimed: Vec<ClientId>,
}

// ==================== Lifecycle Controller ====================

/// Install, activate and refresh for one generation.
pub struct LifecycleController {
    generation: Generation,
    static_assets: Vec<Url>,
    api_endpoints: Vec<Url>,
    critical_assets: Vec<Url>,
    skip_waiting_on_install: bool,
    store: CacheStore,
    fetcher: Arc<dyn Fetcher>,
    notifier: UpdateNotifier,
}

impl LifecycleController {
    pub fn new(
        config: &GuideConfig,
        store: CacheStore,
        fetcher: Arc<dyn Fetcher>,
        notifier: UpdateNotifier,
    ) -> Result<Self> {
        let resolve_all = |paths: &[String]| -> Result<Vec<Url>> {
            paths
                .iter()
                .map(|p| config.resolve(p).map_err(ServiceWorkerError::from))
                .collect()
        };

        Ok(Self {
            generation: config.current_generation(),
            static_assets: resolve_all(&config.static_assets)?,
            api_endpoints: resolve_all(&config.api_endpoints)?,
            critical_assets: resolve_all(&config.critical_assets)?,
            skip_waiting_on_install: config.skip_waiting_on_install,
            store,
            fetcher,
            notifier,
        })
    }

    pub fn generation(&self) -> &Generation {
        &self.generation
    }

    /// Populate both partitions, check the critical assets, announce the
    /// new version.
    pub async fn install(&self) -> InstallReport {
        info!(version = %self.generation.label, "Installing generation");

        let (static_assets, api_data) = tokio::join!(
            async {
                let handle = self.store.open(&self.generation.static_partition()).await;
                self.precache(&handle, &self.static_assets, PartitionKind::Static)
                    .await
            },
            async {
                let handle = self.store.open(&self.generation.api_partition()).await;
                self.precache(&handle, &self.api_endpoints, PartitionKind::Api)
                    .await
            },
        );

        let critical_missing = self.verify_critical_assets().await;

        let report = InstallReport {
            version: self.generation.label.clone(),
            static_assets,
            api_data,
            critical_missing,
            skip_waiting: self.skip_waiting_on_install,
        };
        info!(
            version = %report.version,
            cached = report.cached_count(),
            failed = report.failed().len(),
            "Installation complete"
        );

        self.notifier
            .notify(UpdateKind::NewVersionAvailable, &self.generation)
            .await;
        report
    }

    /// Delete every partition but this generation's two, take control of
    /// every session, announce the update.
    ///
    /// The partitions of whatever occupies the installing slot of
    /// `registration` while pruning are still being populated and are kept.
    pub async fn activate(
        &self,
        id: GenerationId,
        registration: &RwLock<Option<Registration>>,
    ) -> ActivateReport {
        info!(version = %self.generation.label, "Activating generation");

        let (deleted, claimed) = tokio::join!(
            self.prune_stale_partitions(registration),
            self.notifier.claim(id)
        );

        info!(version = %self.generation.label, deleted = deleted.len(), "Activation complete");
        self.notifier
            .notify(UpdateKind::UpdateReady, &self.generation)
            .await;
        ActivateReport { deleted, claimed }
    }

    /// Refetch every API endpoint into the api partition, then tell the
    /// sessions controlled by `id`.
    pub async fn refresh_api_data(&self, id: GenerationId) -> Vec<AssetOutcome> {
        let handle = self.store.open(&self.generation.api_partition()).await;
        let outcomes = self
            .precache(&handle, &self.api_endpoints, PartitionKind::Api)
            .await;
        debug!(
            refreshed = outcomes.iter().filter(|o| o.is_cached()).count(),
            "API data refreshed"
        );
        self.notifier
            .notify_controlled(id, WorkerMessage::CacheUpdated)
            .await;
        outcomes
    }

    async fn precache(
        &self,
        handle: &CacheHandle,
        urls: &[Url],
        kind: PartitionKind,
    ) -> Vec<AssetOutcome> {
        join_all(urls.iter().map(|url| self.cache_one(handle, url, kind))).await
    }

    async fn cache_one(&self, handle: &CacheHandle, url: &Url, kind: PartitionKind) -> AssetOutcome {
        let key = cache_key(url);
        let status = match self.fetcher.fetch(&FetchRequest::get(url.clone())).await {
            Ok(response) if response.is_ok() => {
                match handle.put(&key, &response).await {
                    Ok(()) => {
                        debug!(partition = %handle.name(), key = %key, "Cached");
                        AssetStatus::Cached
                    }
                    Err(err) => AssetStatus::Failed(err.to_string()),
                }
            }
            Ok(response) => AssetStatus::Rejected(response.status),
            Err(err) => AssetStatus::Failed(err.to_string()),
        };

        if status != AssetStatus::Cached {
            match kind {
                PartitionKind::Static => error!(key = %key, status = ?status, "Failed to cache asset"),
                PartitionKind::Api => warn!(key = %key, status = ?status, "Failed to cache API data"),
            }
        }
        AssetOutcome { key, status }
    }

    async fn verify_critical_assets(&self) -> Vec<String> {
        let partition = self.generation.static_partition();
        let mut missing = Vec::new();
        for url in &self.critical_assets {
            let key = cache_key(url);
            if self.store.match_in(&partition, &key).await.is_some() {
                debug!(key = %key, "Critical asset cached");
            } else {
                error!(key = %key, "Critical asset NOT cached");
                missing.push(key);
            }
        }
        missing
    }

    async fn prune_stale_partitions(
        &self,
        registration: &RwLock<Option<Registration>>,
    ) -> Vec<String> {
        // Held until the deletes are done: a generation can only start
        // installing, and open its partitions, once this is released.
        let registration = registration.read().await;
        let installing = registration
            .as_ref()
            .and_then(|r| r.installing.as_ref())
            .map(|w| &w.generation);

        let stale: Vec<String> = self
            .store
            .partitions()
            .await
            .into_iter()
            .filter(|name| !self.generation.owns_partition(name))
            .filter(|name| !installing.is_some_and(|g| g.owns_partition(name)))
            .collect();

        let results = join_all(stale.iter().map(|name| async move {
            info!(partition = %name, "Deleting old cache");
            self.store.delete(name).await
        }))
        .await;

        stale
            .into_iter()
            .zip(results)
            .filter_map(|(name, deleted)| deleted.then_some(name))
            .collect()
    }
}
