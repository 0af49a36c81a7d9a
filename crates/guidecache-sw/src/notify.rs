//! Update notifier: fans worker events out to sessions.

use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info};

use guidecache_core::Generation;

use crate::clients::{Client, ClientId, ClientMatchOptions, Clients, SessionEvent};
use crate::lifecycle::{GenerationId, ServiceWorkerState};
use crate::message::{UpdateKind, WorkerMessage};

/// Broadcasts to the sessions of one registration.
#[derive(Debug, Clone, Default)]
pub struct UpdateNotifier {
    clients: Arc<RwLock<Clients>>,
}

impl UpdateNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session.
    pub async fn add_client(&self, client: Client) {
        self.clients.write().await.add(client);
    }

    /// Forget a session.
    pub async fn remove_client(&self, id: ClientId) -> bool {
        self.clients.write().await.remove(id).is_some()
    }

    /// Generation controlling a session.
    pub async fn controller_of(&self, id: ClientId) -> Option<GenerationId> {
        self.clients.read().await.get(id).and_then(|c| c.controller)
    }

    pub async fn client_count(&self) -> usize {
        self.clients.read().await.len()
    }

    /// Announce a version transition to every window, controlled or not.
    ///
    /// Returns the number of sessions reached.
    pub async fn notify(&self, kind: UpdateKind, generation: &Generation) -> usize {
        let message = WorkerMessage::update(kind, &generation.label);
        let reached = self
            .send(&ClientMatchOptions::all_windows(), SessionEvent::Message(message))
            .await;
        info!(kind = ?kind, version = %generation.label, reached, "Notified clients");
        reached
    }

    /// Send a message to the windows controlled by `generation`.
    pub async fn notify_controlled(&self, generation: GenerationId, message: WorkerMessage) -> usize {
        self.send(
            &ClientMatchOptions::controlled_by(generation),
            SessionEvent::Message(message),
        )
        .await
    }

    /// Report a state change of `generation` to every window.
    pub async fn announce_state(&self, generation: GenerationId, state: ServiceWorkerState) -> usize {
        self.send(
            &ClientMatchOptions::all_windows(),
            SessionEvent::StateChange { generation, state },
        )
        .await
    }

    /// Take control of every session and tell each one that changed hands.
    pub async fn claim(&self, generation: GenerationId) -> Vec<ClientId> {
        let mut clients = self.clients.write().await;
        let claimed = clients.claim(generation);
        for id in &claimed {
            if let Some(client) = clients.get(*id) {
                let _ = client.post_message(SessionEvent::ControllerChange { generation });
            }
        }
        debug!(generation = generation.raw(), claimed = claimed.len(), "Claimed clients");
        claimed
    }

    async fn send(&self, options: &ClientMatchOptions, event: SessionEvent) -> usize {
        let mut reached = 0;
        let mut closed = false;
        {
            let clients = self.clients.read().await;
            for client in clients.match_all(options) {
                match client.post_message(event.clone()) {
                    Ok(()) => reached += 1,
                    Err(_) => closed = true,
                }
            }
        }
        if closed {
            let pruned = self.clients.write().await.prune_closed();
            debug!(pruned, "Dropped closed clients");
        }
        reached
    }
}
