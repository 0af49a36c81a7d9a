//! Session-side update flow: what a live application instance does with the
//! events its worker sends it.

use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::{debug, info};
use url::Url;

use crate::clients::{ClientId, SessionEvent};
use crate::container::ServiceWorkerContainer;
use crate::lifecycle::{GenerationId, ServiceWorkerState};
use crate::message::{ClientCommand, WorkerMessage, WorkerReply};
use crate::{Result, ServiceWorkerError};

/// How long the update prompt stays visible.
pub const PROMPT_AUTO_HIDE: Duration = Duration::from_secs(10);

/// What a session knows about pending versions. Only moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum UpdateState {
    #[default]
    Unaware,
    UpdateAvailable,
    UpdateReady,
}

/// Reaction the UI should perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionAction {
    ShowUpdatePrompt,
    /// The api partition was refreshed; reload data views.
    DataRefreshed,
}

/// Why `apply_update` asks for a reload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadReason {
    /// The waiting generation activated.
    Activated,
    /// Nothing was waiting; reload to pick up whatever is current.
    NoWaitingWorker,
    /// The waiting generation was replaced before it activated.
    Superseded,
}

/// A live application instance.
#[derive(Debug)]
pub struct Session {
    id: ClientId,
    url: Url,
    controller: Option<GenerationId>,
    state: UpdateState,
    prompt_shown_at: Option<Instant>,
    inbox: mpsc::UnboundedReceiver<SessionEvent>,
}

impl Session {
    pub(crate) fn new(
        id: ClientId,
        url: Url,
        controller: Option<GenerationId>,
        inbox: mpsc::UnboundedReceiver<SessionEvent>,
    ) -> Self {
        Self {
            id,
            url,
            controller,
            state: UpdateState::Unaware,
            prompt_shown_at: None,
            inbox,
        }
    }

    pub fn id(&self) -> ClientId {
        self.id
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Generation controlling this session.
    pub fn controller(&self) -> Option<GenerationId> {
        self.controller
    }

    pub fn update_state(&self) -> UpdateState {
        self.state
    }

    pub fn prompt_visible(&self) -> bool {
        self.prompt_shown_at.is_some()
    }

    /// Apply one event.
    pub fn handle_event(&mut self, event: SessionEvent) -> Option<SessionAction> {
        match event {
            SessionEvent::ControllerChange { generation } => {
                debug!(client = self.id.raw(), generation = generation.raw(), "Controller changed");
                self.controller = Some(generation);
                None
            }
            SessionEvent::StateChange {
                state: ServiceWorkerState::Installed,
                ..
            } if self.controller.is_some() => self.advance(UpdateState::UpdateAvailable),
            SessionEvent::StateChange { .. } => None,
            SessionEvent::Message(WorkerMessage::NewVersionAvailable { .. }) => {
                self.advance(UpdateState::UpdateAvailable)
            }
            SessionEvent::Message(WorkerMessage::UpdateReady { .. }) => {
                self.advance(UpdateState::UpdateReady)
            }
            SessionEvent::Message(WorkerMessage::CacheUpdated) => Some(SessionAction::DataRefreshed),
        }
    }

    fn advance(&mut self, state: UpdateState) -> Option<SessionAction> {
        self.state = self.state.max(state);
        self.prompt_shown_at = Some(Instant::now());
        Some(SessionAction::ShowUpdatePrompt)
    }

    /// Apply every event already in the inbox.
    pub fn drain(&mut self) -> Vec<SessionAction> {
        let mut actions = Vec::new();
        while let Ok(event) = self.inbox.try_recv() {
            actions.extend(self.handle_event(event));
        }
        actions
    }

    /// Wait for the next event without applying it.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        self.inbox.recv().await
    }

    /// Take a queued event, if any, without applying it.
    pub fn try_next_event(&mut self) -> Option<SessionEvent> {
        self.inbox.try_recv().ok()
    }

    pub fn should_auto_hide(&self) -> bool {
        self.should_auto_hide_at(Instant::now())
    }

    /// Whether the prompt has been visible for `PROMPT_AUTO_HIDE` at `now`.
    pub fn should_auto_hide_at(&self, now: Instant) -> bool {
        self.prompt_shown_at
            .is_some_and(|shown| now.saturating_duration_since(shown) >= PROMPT_AUTO_HIDE)
    }

    pub fn hide_prompt(&mut self) {
        self.prompt_shown_at = None;
    }

    /// Ask the waiting generation to take over and report how to reload.
    pub async fn apply_update(&mut self, container: &ServiceWorkerContainer) -> Result<ReloadReason> {
        let Some(waiting) = container.waiting_generation().await else {
            info!(client = self.id.raw(), "No waiting worker, forcing reload");
            return Ok(ReloadReason::NoWaitingWorker);
        };

        container
            .post_message(waiting, ClientCommand::SkipWaiting)
            .await?;

        while let Ok(event) = self.inbox.try_recv() {
            let outcome = match &event {
                SessionEvent::StateChange { generation, state } if *generation == waiting => {
                    match state {
                        ServiceWorkerState::Activated => Some(ReloadReason::Activated),
                        ServiceWorkerState::Redundant => Some(ReloadReason::Superseded),
                        _ => None,
                    }
                }
                _ => None,
            };
            self.handle_event(event);
            if let Some(reason) = outcome {
                self.hide_prompt();
                return Ok(reason);
            }
        }

        // Another session's request activated it before ours was handled.
        match container.state_of(waiting).await {
            ServiceWorkerState::Activated => Ok(ReloadReason::Activated),
            _ => Ok(ReloadReason::Superseded),
        }
    }

    /// Ask the controlling generation for its version label.
    pub async fn request_version(&self, container: &ServiceWorkerContainer) -> Result<String> {
        let target = match self.controller {
            Some(generation) => generation,
            None => container
                .active_generation()
                .await
                .ok_or_else(|| ServiceWorkerError::NotFound("no active generation".to_string()))?,
        };

        match container.post_message(target, ClientCommand::GetVersion).await? {
            Some(WorkerReply::VersionInfo { version }) => Ok(version),
            None => Err(ServiceWorkerError::StateError(
                "no reply to GET_VERSION".to_string(),
            )),
        }
    }
}
