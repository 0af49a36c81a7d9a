//! Service worker container: the registration of the guide's scope and the
//! runtime of each live generation.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use hashbrown::HashMap;
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, info, warn};
use url::Url;

use guidecache_core::{Generation, GuideConfig};

use crate::cache::CacheStore;
use crate::clients::{Client, ClientId, ClientType};
use crate::fetch::{FetchRequest, Fetcher};
use crate::lifecycle::{
    AssetOutcome, GenerationId, InstallReport, LifecycleController, Registration, ServiceWorker,
    ServiceWorkerState, StateTransition,
};
use crate::message::{ClientCommand, WorkerReply};
use crate::notify::UpdateNotifier;
use crate::session::Session;
use crate::strategy::{FetchOutcome, FetchStrategies};
use crate::{Result, ServiceWorkerError};

/// Interval between update checks of a session.
pub const UPDATE_CHECK_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Number of redundant generations remembered; older ones are unknown.
pub const RETIRED_HISTORY: usize = 16;

/// Sync tag that refreshes the api partition.
pub const BACKGROUND_SYNC_TAG: &str = "background-sync";

/// Service worker events, for the embedder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceWorkerEvent {
    /// A new generation started installing.
    UpdateFound { generation: GenerationId, version: String },
    /// State changed.
    StateChange {
        generation: GenerationId,
        state: ServiceWorkerState,
    },
    /// A session is now controlled by `generation`.
    ControllerChange {
        client_id: ClientId,
        generation: GenerationId,
    },
    /// Stale partitions were deleted on activation.
    CachesPruned { deleted: Vec<String> },
}

/// Result of registering a generation.
#[derive(Debug, Clone)]
pub struct InstallOutcome {
    pub generation: GenerationId,
    pub version: String,
    /// State once registration settled: `Activated`, `Installed` (waiting)
    /// or `Redundant` (superseded while installing).
    pub state: ServiceWorkerState,
    pub report: InstallReport,
}

struct GenerationRuntime {
    generation: Generation,
    lifecycle: LifecycleController,
    strategies: FetchStrategies,
}

/// Hosts the worker of one scope.
#[derive(Clone)]
pub struct ServiceWorkerContainer {
    /// Registration; created by the first `register`.
    registration: Arc<RwLock<Option<Registration>>>,

    /// Runtimes of the generations in a registration slot.
    runtimes: Arc<RwLock<HashMap<GenerationId, Arc<GenerationRuntime>>>>,

    /// Most recent generations that became redundant, oldest first.
    retired: Arc<RwLock<VecDeque<GenerationId>>>,

    /// Serializes activations.
    activation: Arc<Mutex<()>>,

    /// Cache storage.
    caches: CacheStore,

    /// Sessions.
    notifier: UpdateNotifier,

    fetcher: Arc<dyn Fetcher>,

    /// Event sender for state changes.
    event_tx: mpsc::UnboundedSender<ServiceWorkerEvent>,
}

impl ServiceWorkerContainer {
    /// Create a new container.
    pub fn new(fetcher: Arc<dyn Fetcher>) -> (Self, mpsc::UnboundedReceiver<ServiceWorkerEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let container = Self {
            registration: Arc::new(RwLock::new(None)),
            runtimes: Arc::new(RwLock::new(HashMap::new())),
            retired: Arc::new(RwLock::new(VecDeque::with_capacity(RETIRED_HISTORY))),
            activation: Arc::new(Mutex::new(())),
            caches: CacheStore::new(),
            notifier: UpdateNotifier::new(),
            fetcher,
            event_tx,
        };
        (container, event_rx)
    }

    /// Cache storage shared by every generation.
    pub fn caches(&self) -> &CacheStore {
        &self.caches
    }

    // ==================== Lifecycle ====================

    /// Register a generation built from `config`, install it, and activate
    /// it unless it has to wait.
    pub async fn register(&self, config: &GuideConfig) -> Result<InstallOutcome> {
        config
            .validate()
            .map_err(|e| ServiceWorkerError::RegistrationFailed(e.to_string()))?;

        let lifecycle = LifecycleController::new(
            config,
            self.caches.clone(),
            self.fetcher.clone(),
            self.notifier.clone(),
        )?;
        let strategies = FetchStrategies::new(config, self.caches.clone(), self.fetcher.clone())?;
        let generation = config.current_generation();
        let runtime = Arc::new(GenerationRuntime {
            generation: generation.clone(),
            lifecycle,
            strategies,
        });

        let worker = ServiceWorker::new(generation.clone());
        let id = worker.id;

        let transitions = {
            let mut slot = self.registration.write().await;
            let registration = slot.get_or_insert_with(|| Registration::new(config.scope.clone()));
            if registration.scope != config.scope {
                return Err(ServiceWorkerError::RegistrationFailed(format!(
                    "scope {} is already registered, got {}",
                    registration.scope, config.scope
                )));
            }
            self.runtimes.write().await.insert(id, runtime.clone());
            registration.begin_install(worker)
        };

        info!(generation = id.raw(), version = %generation.label, "Update found");
        let _ = self.event_tx.send(ServiceWorkerEvent::UpdateFound {
            generation: id,
            version: generation.label.clone(),
        });
        self.report(transitions).await;

        let report = runtime.lifecycle.install().await;

        let (transitions, ready) = {
            let mut slot = self.registration.write().await;
            match slot.as_mut() {
                Some(registration) => match registration.install_complete(id) {
                    Some(transitions) => {
                        if report.skip_waiting {
                            registration.skip_waiting(id)?;
                        }
                        (transitions, registration.ready_to_activate())
                    }
                    None => (Vec::new(), false),
                },
                None => (Vec::new(), false),
            }
        };
        self.report(transitions).await;

        if ready {
            self.activate_waiting().await;
        }

        let state = self.state_of(id).await;
        if state == ServiceWorkerState::Redundant {
            debug!(generation = id.raw(), "Superseded before activation");
        }
        Ok(InstallOutcome {
            generation: id,
            version: generation.label,
            state,
            report,
        })
    }

    /// Register `config` only if its version differs from every generation
    /// already registered.
    pub async fn check_for_update(&self, config: &GuideConfig) -> Result<Option<InstallOutcome>> {
        let label = config.current_generation().label;
        let known = {
            let mut slot = self.registration.write().await;
            match slot.as_mut() {
                Some(registration) => {
                    registration.last_update_check = Some(Instant::now());
                    [&registration.installing, &registration.waiting, &registration.active]
                        .into_iter()
                        .flatten()
                        .any(|w| w.generation.label == label)
                }
                None => false,
            }
        };

        if known {
            debug!(version = %label, "No update");
            return Ok(None);
        }
        self.register(config).await.map(Some)
    }

    /// Promote the waiting generation if it may activate.
    async fn activate_waiting(&self) -> bool {
        let _job = self.activation.lock().await;

        let (id, transitions) = {
            let mut slot = self.registration.write().await;
            let Some(registration) = slot.as_mut() else {
                return false;
            };
            if !registration.ready_to_activate() {
                return false;
            }
            let Some(activating) = registration.begin_activate() else {
                return false;
            };
            activating
        };
        self.report(transitions).await;

        let Some(runtime) = self.runtime(id).await else {
            warn!(generation = id.raw(), "Activating generation has no runtime");
            return false;
        };

        let report = runtime.lifecycle.activate(id, &self.registration).await;
        for client_id in &report.claimed {
            let _ = self.event_tx.send(ServiceWorkerEvent::ControllerChange {
                client_id: *client_id,
                generation: id,
            });
        }
        if !report.deleted.is_empty() {
            let _ = self.event_tx.send(ServiceWorkerEvent::CachesPruned {
                deleted: report.deleted,
            });
        }

        let finished = self
            .registration
            .write()
            .await
            .as_mut()
            .and_then(|registration| registration.finish_activate(id));
        self.report(finished.into_iter().collect()).await;
        true
    }

    /// Publish state changes to the embedder and every session.
    async fn report(&self, transitions: Vec<StateTransition>) {
        for StateTransition { id, state } in transitions {
            if state == ServiceWorkerState::Redundant {
                let mut retired = self.retired.write().await;
                if retired.len() == RETIRED_HISTORY {
                    retired.pop_front();
                }
                retired.push_back(id);
                drop(retired);
                self.runtimes.write().await.remove(&id);
            }
            debug!(generation = id.raw(), state = ?state, "State change");
            let _ = self.event_tx.send(ServiceWorkerEvent::StateChange {
                generation: id,
                state,
            });
            self.notifier.announce_state(id, state).await;
        }
    }

    // ==================== Queries ====================

    pub async fn installing_generation(&self) -> Option<GenerationId> {
        self.slot_id(|r| r.installing.as_ref()).await
    }

    pub async fn waiting_generation(&self) -> Option<GenerationId> {
        self.slot_id(|r| r.waiting.as_ref()).await
    }

    pub async fn active_generation(&self) -> Option<GenerationId> {
        self.slot_id(|r| r.active.as_ref()).await
    }

    async fn slot_id(
        &self,
        slot: impl Fn(&Registration) -> Option<&ServiceWorker>,
    ) -> Option<GenerationId> {
        self.registration
            .read()
            .await
            .as_ref()
            .and_then(|r| slot(r))
            .map(|w| w.id)
    }

    /// Current state of a generation; `Redundant` once it left every slot.
    pub async fn state_of(&self, id: GenerationId) -> ServiceWorkerState {
        self.registration
            .read()
            .await
            .as_ref()
            .and_then(|r| r.find(id))
            .map(|w| w.state)
            .unwrap_or(ServiceWorkerState::Redundant)
    }

    /// Whether the periodic update check is due.
    pub async fn needs_update(&self) -> bool {
        self.registration
            .read()
            .await
            .as_ref()
            .map_or(true, |r| r.needs_update(UPDATE_CHECK_INTERVAL))
    }

    async fn runtime(&self, id: GenerationId) -> Option<Arc<GenerationRuntime>> {
        self.runtimes.read().await.get(&id).cloned()
    }

    // ==================== Functional events ====================

    /// Route an intercepted request through the active generation.
    ///
    /// Requests from a session the active generation does not control, or
    /// made while no generation is active, pass through.
    pub async fn handle_fetch(&self, request: &FetchRequest) -> Result<FetchOutcome> {
        let Some(active) = self.active_generation().await else {
            return Ok(FetchOutcome::Passthrough);
        };

        if let Some(client_id) = request.client_id.filter(|_| !request.is_navigation) {
            if self.notifier.controller_of(client_id).await != Some(active) {
                debug!(url = %request.url, client = client_id.raw(), "Uncontrolled client");
                return Ok(FetchOutcome::Passthrough);
            }
        }

        match self.runtime(active).await {
            Some(runtime) => runtime.strategies.handle(request).await,
            None => Ok(FetchOutcome::Passthrough),
        }
    }

    /// Deliver a control message from a session to a generation.
    pub async fn post_message(
        &self,
        target: GenerationId,
        command: ClientCommand,
    ) -> Result<Option<WorkerReply>> {
        if self.retired.read().await.contains(&target) {
            return Err(ServiceWorkerError::StateError(format!(
                "generation {} is redundant",
                target.raw()
            )));
        }

        match command {
            ClientCommand::SkipWaiting => {
                let pending = match self.registration.write().await.as_mut() {
                    Some(registration) => registration.skip_waiting(target)?,
                    None => {
                        return Err(ServiceWorkerError::NotFound(format!(
                            "generation {}",
                            target.raw()
                        )))
                    }
                };
                info!(generation = target.raw(), pending, "Skip waiting requested");
                if pending {
                    self.activate_waiting().await;
                }
                Ok(None)
            }
            ClientCommand::GetVersion => {
                let runtime = self.runtime(target).await.ok_or_else(|| {
                    ServiceWorkerError::NotFound(format!("generation {}", target.raw()))
                })?;
                Ok(Some(WorkerReply::VersionInfo {
                    version: runtime.generation.label.clone(),
                }))
            }
        }
    }

    /// Handle a background sync. Only `background-sync` does anything: it
    /// refreshes the api partition of the active generation.
    pub async fn handle_sync(&self, tag: &str) -> Result<Vec<AssetOutcome>> {
        if tag != BACKGROUND_SYNC_TAG {
            debug!(tag = %tag, "Ignoring sync");
            return Ok(Vec::new());
        }

        let active = self
            .active_generation()
            .await
            .ok_or_else(|| ServiceWorkerError::StateError("no active generation".to_string()))?;
        let runtime = self
            .runtime(active)
            .await
            .ok_or_else(|| ServiceWorkerError::NotFound(format!("generation {}", active.raw())))?;

        info!(version = %runtime.generation.label, "Background sync");
        Ok(runtime.lifecycle.refresh_api_data(active).await)
    }

    // ==================== Sessions ====================

    /// Open a session at `url`. It is controlled by the active generation,
    /// if any.
    pub async fn connect_session(&self, url: Url) -> Session {
        let controller = match self.active_generation().await {
            Some(id) if self.state_of(id).await == ServiceWorkerState::Activated => Some(id),
            _ => None,
        };
        let (client, inbox) = Client::new(url.clone(), ClientType::Window, controller);
        let id = client.id;
        self.notifier.add_client(client).await;
        debug!(client = id.raw(), url = %url, "Session connected");
        Session::new(id, url, controller, inbox)
    }

    /// Close a session.
    pub async fn disconnect(&self, session: Session) -> bool {
        self.notifier.remove_client(session.id()).await
    }

    pub async fn session_count(&self) -> usize {
        self.notifier.client_count().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::FetchResponse;
    use crate::testing::ScriptedFetcher;

    fn config(version: &str) -> GuideConfig {
        let mut config = GuideConfig::for_scope("app", Url::parse("https://guide.example/").unwrap());
        config.version = version.to_string();
        config.static_assets = vec!["index.html".into()];
        config.api_endpoints = vec!["data/events.json".into()];
        config
    }

    fn setup() -> (
        ServiceWorkerContainer,
        mpsc::UnboundedReceiver<ServiceWorkerEvent>,
        Arc<ScriptedFetcher>,
    ) {
        let fetcher = Arc::new(ScriptedFetcher::new());
        fetcher.route_text("https://guide.example/index.html", "<html>");
        fetcher.route(
            "https://guide.example/data/events.json",
            FetchResponse::json("[]"),
        );
        let (container, events) = ServiceWorkerContainer::new(fetcher.clone());
        (container, events, fetcher)
    }

    #[tokio::test]
    async fn test_first_registration_activates() {
        let (container, mut events, _) = setup();
        let outcome = container.register(&config("1.0.0")).await.unwrap();

        assert_eq!(outcome.state, ServiceWorkerState::Activated);
        assert_eq!(outcome.version, "app-v1.0.0");
        assert_eq!(container.active_generation().await, Some(outcome.generation));

        let mut states = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let ServiceWorkerEvent::StateChange { state, .. } = event {
                states.push(state);
            }
        }
        assert_eq!(
            states,
            vec![
                ServiceWorkerState::Installing,
                ServiceWorkerState::Installed,
                ServiceWorkerState::Activating,
                ServiceWorkerState::Activated,
            ]
        );
    }

    #[tokio::test]
    async fn test_new_generation_waits_without_skip_waiting() {
        let (container, _events, _) = setup();
        let first = container.register(&config("1.0.0")).await.unwrap();

        let mut second_config = config("1.1.0");
        second_config.skip_waiting_on_install = false;
        let second = container.register(&second_config).await.unwrap();

        assert_eq!(second.state, ServiceWorkerState::Installed);
        assert_eq!(container.waiting_generation().await, Some(second.generation));
        assert_eq!(container.active_generation().await, Some(first.generation));

        container
            .post_message(second.generation, ClientCommand::SkipWaiting)
            .await
            .unwrap();
        assert_eq!(container.active_generation().await, Some(second.generation));
        assert_eq!(container.state_of(first.generation).await, ServiceWorkerState::Redundant);

        let err = container
            .post_message(first.generation, ClientCommand::SkipWaiting)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceWorkerError::StateError(_)));
    }

    #[tokio::test]
    async fn test_get_version() {
        let (container, _events, _) = setup();
        let outcome = container.register(&config("2.0.0")).await.unwrap();

        let reply = container
            .post_message(outcome.generation, ClientCommand::GetVersion)
            .await
            .unwrap();
        assert_eq!(
            reply,
            Some(WorkerReply::VersionInfo {
                version: "app-v2.0.0".to_string()
            })
        );
    }

    #[tokio::test]
    async fn test_unknown_generation() {
        let (container, _events, _) = setup();
        container.register(&config("1.0.0")).await.unwrap();

        let err = container
            .post_message(GenerationId::new(), ClientCommand::SkipWaiting)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceWorkerError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_retired_history_is_bounded() {
        let (container, _events, _) = setup();
        let mut generations = Vec::new();
        for minor in 0..=RETIRED_HISTORY + 1 {
            let outcome = container.register(&config(&format!("1.{minor}.0"))).await.unwrap();
            assert_eq!(outcome.state, ServiceWorkerState::Activated);
            generations.push(outcome.generation);
        }
        assert_eq!(container.retired.read().await.len(), RETIRED_HISTORY);

        // Forgotten: no longer distinguishable from a generation never seen.
        let err = container
            .post_message(generations[0], ClientCommand::SkipWaiting)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceWorkerError::NotFound(_)));

        let recent = generations[generations.len() - 2];
        let err = container
            .post_message(recent, ClientCommand::SkipWaiting)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceWorkerError::StateError(_)));
    }

    #[tokio::test]
    async fn test_fetch_passthrough_without_active() {
        let (container, _events, _) = setup();
        let request = FetchRequest::get(Url::parse("https://guide.example/index.html").unwrap());
        assert_eq!(
            container.handle_fetch(&request).await.unwrap(),
            FetchOutcome::Passthrough
        );
    }

    #[tokio::test]
    async fn test_sessions_controlled_after_activation() {
        let (container, _events, _) = setup();
        let early = container
            .connect_session(Url::parse("https://guide.example/").unwrap())
            .await;
        container.register(&config("1.0.0")).await.unwrap();
        let late = container
            .connect_session(Url::parse("https://guide.example/").unwrap())
            .await;
        let early_id = early.id();

        let url = Url::parse("https://guide.example/index.html").unwrap();

        // Claimed on activation, so the early session is controlled too.
        let outcome = container
            .handle_fetch(&FetchRequest::get(url.clone()).from_client(early_id))
            .await
            .unwrap();
        assert!(outcome.response().unwrap().from_cache);

        let outcome = container
            .handle_fetch(&FetchRequest::get(url.clone()).from_client(late.id()))
            .await
            .unwrap();
        assert!(outcome.response().is_some());

        // A session the worker does not know is not controlled.
        assert!(container.disconnect(early).await);
        let outcome = container
            .handle_fetch(&FetchRequest::get(url).from_client(early_id))
            .await
            .unwrap();
        assert_eq!(outcome, FetchOutcome::Passthrough);
    }

    #[tokio::test]
    async fn test_check_for_update_skips_known_version() {
        let (container, _events, _) = setup();
        container.register(&config("1.0.0")).await.unwrap();

        assert!(container.check_for_update(&config("1.0.0")).await.unwrap().is_none());
        assert!(!container.needs_update().await);

        let update = container.check_for_update(&config("1.0.1")).await.unwrap();
        assert_eq!(update.unwrap().state, ServiceWorkerState::Activated);
    }

    #[tokio::test]
    async fn test_scope_mismatch_rejected() {
        let (container, _events, _) = setup();
        container.register(&config("1.0.0")).await.unwrap();

        let other = GuideConfig::for_scope("app", Url::parse("https://other.example/").unwrap());
        assert!(matches!(
            container.register(&other).await,
            Err(ServiceWorkerError::RegistrationFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_sync_refreshes_api_partition() {
        let (container, _events, fetcher) = setup();
        container.register(&config("1.0.0")).await.unwrap();

        fetcher.route(
            "https://guide.example/data/events.json",
            FetchResponse::json("[42]"),
        );
        assert!(container.handle_sync("other-tag").await.unwrap().is_empty());

        let outcomes = container.handle_sync(BACKGROUND_SYNC_TAG).await.unwrap();
        assert!(outcomes.iter().all(AssetOutcome::is_cached));
        let cached = container
            .caches()
            .match_in("app-api-v1", "https://guide.example/data/events.json")
            .await
            .unwrap();
        assert_eq!(cached.body, b"[42]");
    }
}
