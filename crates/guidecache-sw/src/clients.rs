//! Clients: the sessions a worker can reach.

use std::sync::atomic::{AtomicU64, Ordering};

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use url::Url;

use crate::lifecycle::{GenerationId, ServiceWorkerState};
use crate::message::WorkerMessage;
use crate::ServiceWorkerError;

/// Unique identifier for a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientId(u64);

impl ClientId {
    pub(crate) fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// Client type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientType {
    #[default]
    Window,
    Worker,
    All,
}

/// Event delivered to a session's inbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A generation of the registration changed state.
    StateChange {
        generation: GenerationId,
        state: ServiceWorkerState,
    },
    /// The session is now controlled by `generation`.
    ControllerChange { generation: GenerationId },
    /// Unsolicited message from the worker.
    Message(WorkerMessage),
}

// ==================== Client ====================

/// A client as seen from the worker.
#[derive(Debug, Clone)]
pub struct Client {
    /// Client ID.
    pub id: ClientId,

    /// Client URL.
    pub url: Url,

    /// Client type.
    pub client_type: ClientType,

    /// Generation controlling this client.
    pub controller: Option<GenerationId>,

    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl Client {
    /// Create a client and the receiving end of its inbox.
    pub fn new(
        url: Url,
        client_type: ClientType,
        controller: Option<GenerationId>,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let client = Self {
            id: ClientId::new(),
            url,
            client_type,
            controller,
            tx,
        };
        (client, rx)
    }

    /// Post an event to the client.
    pub fn post_message(&self, event: SessionEvent) -> Result<(), ServiceWorkerError> {
        self.tx.send(event).map_err(|_| {
            ServiceWorkerError::StateError(format!("Client {} is closed", self.id.raw()))
        })
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

// ==================== Clients ====================

/// Options for `Clients::match_all`.
#[derive(Debug, Clone, Default)]
pub struct ClientMatchOptions {
    /// Also return clients not controlled by `controlled_by`.
    pub include_uncontrolled: bool,
    /// Generation whose controlled clients are wanted.
    pub controlled_by: Option<GenerationId>,
    pub client_type: ClientType,
}

impl ClientMatchOptions {
    /// Every window, controlled or not.
    pub fn all_windows() -> Self {
        Self {
            include_uncontrolled: true,
            controlled_by: None,
            client_type: ClientType::Window,
        }
    }

    /// Windows controlled by `generation`.
    pub fn controlled_by(generation: GenerationId) -> Self {
        Self {
            include_uncontrolled: false,
            controlled_by: Some(generation),
            client_type: ClientType::Window,
        }
    }
}

/// Clients API.
#[derive(Debug, Default)]
pub struct Clients {
    clients: HashMap<ClientId, Client>,
}

impl Clients {
    /// Create new clients manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a client by ID.
    pub fn get(&self, id: ClientId) -> Option<&Client> {
        self.clients.get(&id)
    }

    /// Match all clients.
    pub fn match_all(&self, options: &ClientMatchOptions) -> Vec<&Client> {
        let mut matched: Vec<&Client> = self
            .clients
            .values()
            .filter(|c| {
                options.include_uncontrolled
                    || (c.controller.is_some() && c.controller == options.controlled_by)
            })
            .filter(|c| match options.client_type {
                ClientType::All => true,
                t => c.client_type == t,
            })
            .collect();
        matched.sort_by_key(|c| c.id.raw());
        matched
    }

    /// Make `generation` the controller of every client it does not control yet.
    ///
    /// Returns the clients whose controller changed.
    pub fn claim(&mut self, generation: GenerationId) -> Vec<ClientId> {
        let mut claimed = Vec::new();
        for client in self.clients.values_mut() {
            if client.controller != Some(generation) {
                client.controller = Some(generation);
                claimed.push(client.id);
            }
        }
        claimed.sort_by_key(|id| id.raw());
        claimed
    }

    /// Add a client.
    pub fn add(&mut self, client: Client) {
        self.clients.insert(client.id, client);
    }

    /// Remove a client.
    pub fn remove(&mut self, id: ClientId) -> Option<Client> {
        self.clients.remove(&id)
    }

    /// Forget clients whose session has gone away.
    pub fn prune_closed(&mut self) -> usize {
        let before = self.clients.len();
        self.clients.retain(|_, c| !c.is_closed());
        before - self.clients.len()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
