//! Client connection registry
//!
//! Tracks connected clients and their session associations, enabling
//! targeted broadcasting of server messages. Each client's bounded sender
//! doubles as its output buffer: channel occupancy is what the output
//! pipeline probes when deciding whether to assert backpressure.

use std::collections::HashSet;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use webmux_protocol::ServerMessage;

/// Stable identity of one session entry in the attachment engine
pub type SessionId = Uuid;

/// Unique client identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(Uuid);

impl ClientId {
    fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "client-{}", self.0.simple())
    }
}

/// Entry for a connected client
pub struct ClientEntry {
    /// Channel for sending messages to this client's writer task
    sender: mpsc::Sender<ServerMessage>,
    /// Session this client is attached to (if any)
    attached_session: Option<SessionId>,
}

/// Registry tracking all connected clients
///
/// Thread-safe for concurrent access from client handler tasks, session
/// pumps and the topology monitor.
pub struct ClientRegistry {
    /// Client ID -> client entry
    clients: DashMap<ClientId, ClientEntry>,
    /// Session ID -> set of attached client IDs (reverse index)
    session_clients: DashMap<SessionId, HashSet<ClientId>>,
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self {
            clients: DashMap::new(),
            session_clients: DashMap::new(),
        }
    }

    // ==================== Client management ====================

    /// Register a new client connection, returning its assigned id
    pub fn register_client(&self, sender: mpsc::Sender<ServerMessage>) -> ClientId {
        let id = ClientId::generate();
        self.clients.insert(
            id,
            ClientEntry {
                sender,
                attached_session: None,
            },
        );
        debug!(client_id = %id, "Registered client");
        id
    }

    /// Unregister a client, cleaning up any session association
    pub fn unregister_client(&self, client_id: ClientId) {
        if let Some((_, entry)) = self.clients.remove(&client_id) {
            if let Some(session_id) = entry.attached_session {
                self.remove_from_session_index(client_id, session_id);
            }
            debug!(client_id = %client_id, "Unregistered client");
        }
    }

    /// Number of connected clients
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    // ==================== Session association ====================

    /// Attach a client to a session, detaching it from any previous one
    ///
    /// Returns `false` if the client is unknown.
    pub fn attach_to_session(&self, client_id: ClientId, session_id: SessionId) -> bool {
        let mut entry = match self.clients.get_mut(&client_id) {
            Some(entry) => entry,
            None => return false,
        };

        if let Some(old) = entry.attached_session {
            if old != session_id {
                self.remove_from_session_index(client_id, old);
            }
        }
        entry.attached_session = Some(session_id);
        drop(entry);

        self.session_clients
            .entry(session_id)
            .or_default()
            .insert(client_id);

        debug!(client_id = %client_id, session_id = %session_id, "Client attached");
        true
    }

    /// Detach a client from its current session
    ///
    /// Returns the session it was attached to, if any.
    pub fn detach_from_session(&self, client_id: ClientId) -> Option<SessionId> {
        let mut entry = self.clients.get_mut(&client_id)?;
        let session_id = entry.attached_session.take()?;
        drop(entry);

        self.remove_from_session_index(client_id, session_id);
        debug!(client_id = %client_id, session_id = %session_id, "Client detached");
        Some(session_id)
    }

    /// Detach every client attached to a session, returning how many were
    pub fn detach_session_clients(&self, session_id: SessionId) -> usize {
        let clients = self.session_clients(session_id);
        let mut count = 0;
        for client_id in clients {
            if self.detach_from_session(client_id).is_some() {
                count += 1;
            }
        }
        count
    }

    /// Session a client is attached to
    pub fn client_session(&self, client_id: ClientId) -> Option<SessionId> {
        self.clients.get(&client_id)?.attached_session
    }

    /// Number of clients attached to a session
    pub fn session_client_count(&self, session_id: SessionId) -> usize {
        self.session_clients
            .get(&session_id)
            .map(|set| set.len())
            .unwrap_or(0)
    }

    /// All client ids attached to a session
    pub fn session_clients(&self, session_id: SessionId) -> Vec<ClientId> {
        self.session_clients
            .get(&session_id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Session ids that currently have at least one attached client
    pub fn active_sessions(&self) -> Vec<SessionId> {
        self.session_clients
            .iter()
            .filter(|entry| !entry.value().is_empty())
            .map(|entry| *entry.key())
            .collect()
    }

    fn remove_from_session_index(&self, client_id: ClientId, session_id: SessionId) {
        if let Some(mut clients) = self.session_clients.get_mut(&session_id) {
            clients.remove(&client_id);
            if clients.is_empty() {
                drop(clients);
                self.session_clients.remove(&session_id);
            }
        }
    }

    // ==================== Message delivery ====================

    /// Send a message to a specific client, waiting for buffer space
    ///
    /// A closed channel (disconnected client) unregisters the client and
    /// returns `false`.
    pub async fn send_to_client(&self, client_id: ClientId, message: ServerMessage) -> bool {
        let sender = match self.clients.get(&client_id) {
            Some(entry) => entry.sender.clone(),
            None => return false,
        };

        match sender.send(message).await {
            Ok(()) => true,
            Err(_) => {
                warn!(client_id = %client_id, "Client channel closed, removing");
                self.unregister_client(client_id);
                false
            }
        }
    }

    /// Send a message to a specific client without blocking
    ///
    /// Returns `false` if the client is unknown, disconnected, or its buffer
    /// is full. A full buffer does not unregister the client.
    pub fn try_send_to_client(&self, client_id: ClientId, message: ServerMessage) -> bool {
        let sender = match self.clients.get(&client_id) {
            Some(entry) => entry.sender.clone(),
            None => return false,
        };

        match sender.try_send(message) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!(client_id = %client_id, "Client channel closed, removing");
                self.unregister_client(client_id);
                false
            }
            Err(mpsc::error::TrySendError::Full(_)) => false,
        }
    }

    /// Broadcast a message to all clients attached to a session
    ///
    /// Returns the number of clients that received it.
    pub async fn broadcast_to_session(&self, session_id: SessionId, message: ServerMessage) -> usize {
        let clients = self.session_clients(session_id);
        let mut delivered = 0;
        for client_id in clients {
            if self.send_to_client(client_id, message.clone()).await {
                delivered += 1;
            }
        }
        delivered
    }

    /// Broadcast to a session without blocking; full buffers are skipped
    pub fn try_broadcast_to_session(&self, session_id: SessionId, message: ServerMessage) -> usize {
        let clients = self.session_clients(session_id);
        let mut delivered = 0;
        for client_id in clients {
            if self.try_send_to_client(client_id, message.clone()) {
                delivered += 1;
            }
        }
        delivered
    }

    /// Broadcast a message to every connected client without blocking
    pub fn broadcast_to_all(&self, message: ServerMessage) -> usize {
        let clients: Vec<ClientId> = self.clients.iter().map(|e| *e.key()).collect();
        let mut delivered = 0;
        for client_id in clients {
            if self.try_send_to_client(client_id, message.clone()) {
                delivered += 1;
            }
        }
        delivered
    }

    // ==================== Backpressure probes ====================

    /// True if any client attached to the session has a full output buffer
    pub fn session_buffer_full(&self, session_id: SessionId) -> bool {
        self.session_clients(session_id).into_iter().any(|id| {
            self.clients
                .get(&id)
                .map(|entry| entry.sender.capacity() == 0)
                .unwrap_or(false)
        })
    }

    /// True if every attached client's buffer occupancy is at or below
    /// `low_water_frames`
    pub fn session_drained(&self, session_id: SessionId, low_water_frames: usize) -> bool {
        self.session_clients(session_id).into_iter().all(|id| {
            self.clients
                .get(&id)
                .map(|entry| {
                    let sender = &entry.sender;
                    sender.max_capacity() - sender.capacity() <= low_water_frames
                })
                .unwrap_or(true)
        })
    }
}

impl std::fmt::Debug for ClientRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientRegistry")
            .field("client_count", &self.clients.len())
            .field("session_count", &self.session_clients.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup_client() -> (ClientRegistry, ClientId, mpsc::Receiver<ServerMessage>) {
        let registry = ClientRegistry::new();
        let (tx, rx) = mpsc::channel(10);
        let client_id = registry.register_client(tx);
        (registry, client_id, rx)
    }

    #[tokio::test]
    async fn test_register_and_unregister() {
        let (registry, client_id, _rx) = setup_client();
        assert_eq!(registry.client_count(), 1);

        registry.unregister_client(client_id);
        assert_eq!(registry.client_count(), 0);
    }

    #[tokio::test]
    async fn test_attach_detach() {
        let (registry, client_id, _rx) = setup_client();
        let session_id = Uuid::new_v4();

        assert!(registry.attach_to_session(client_id, session_id));
        assert_eq!(registry.client_session(client_id), Some(session_id));
        assert_eq!(registry.session_client_count(session_id), 1);

        assert_eq!(registry.detach_from_session(client_id), Some(session_id));
        assert!(registry.client_session(client_id).is_none());
        assert_eq!(registry.session_client_count(session_id), 0);
    }

    #[tokio::test]
    async fn test_reattach_moves_between_sessions() {
        let (registry, client_id, _rx) = setup_client();
        let session1 = Uuid::new_v4();
        let session2 = Uuid::new_v4();

        registry.attach_to_session(client_id, session1);
        registry.attach_to_session(client_id, session2);

        assert_eq!(registry.client_session(client_id), Some(session2));
        assert_eq!(registry.session_client_count(session1), 0);
        assert_eq!(registry.session_client_count(session2), 1);
    }

    #[tokio::test]
    async fn test_unregister_cleans_session_index() {
        let (registry, client_id, _rx) = setup_client();
        let session_id = Uuid::new_v4();

        registry.attach_to_session(client_id, session_id);
        registry.unregister_client(client_id);
        assert_eq!(registry.session_client_count(session_id), 0);
        assert!(registry.active_sessions().is_empty());
    }

    #[tokio::test]
    async fn test_send_to_client() {
        let (registry, client_id, mut rx) = setup_client();

        assert!(registry.send_to_client(client_id, ServerMessage::Pong).await);
        assert_eq!(rx.recv().await.unwrap(), ServerMessage::Pong);
    }

    #[tokio::test]
    async fn test_send_to_disconnected_client_unregisters() {
        let (registry, client_id, rx) = setup_client();
        drop(rx);

        assert!(!registry.send_to_client(client_id, ServerMessage::Pong).await);
        assert_eq!(registry.client_count(), 0);
    }

    #[tokio::test]
    async fn test_try_send_full_buffer_keeps_client() {
        let registry = ClientRegistry::new();
        let (tx, _rx) = mpsc::channel(1);
        let client_id = registry.register_client(tx);

        assert!(registry.try_send_to_client(client_id, ServerMessage::Pong));
        assert!(!registry.try_send_to_client(client_id, ServerMessage::Pong));
        assert_eq!(registry.client_count(), 1);
    }

    #[tokio::test]
    async fn test_broadcast_fan_out_identical_sequence() {
        let registry = ClientRegistry::new();
        let session_id = Uuid::new_v4();

        let (tx1, mut rx1) = mpsc::channel(100);
        let (tx2, mut rx2) = mpsc::channel(100);
        let id1 = registry.register_client(tx1);
        let id2 = registry.register_client(tx2);
        registry.attach_to_session(id1, session_id);
        registry.attach_to_session(id2, session_id);

        for i in 0..10 {
            let msg = ServerMessage::Output {
                data: format!("frame {}", i),
            };
            assert_eq!(registry.try_broadcast_to_session(session_id, msg), 2);
        }

        // Both clients observe the same sequence, in the same order
        let mut seq1 = Vec::new();
        while let Ok(msg) = rx1.try_recv() {
            seq1.push(msg);
        }
        let mut seq2 = Vec::new();
        while let Ok(msg) = rx2.try_recv() {
            seq2.push(msg);
        }
        assert_eq!(seq1.len(), 10);
        assert_eq!(seq1, seq2);
    }

    #[tokio::test]
    async fn test_broadcast_prunes_disconnected() {
        let registry = ClientRegistry::new();
        let session_id = Uuid::new_v4();

        let (tx1, mut rx1) = mpsc::channel(10);
        let (tx2, rx2) = mpsc::channel(10);
        let id1 = registry.register_client(tx1);
        let id2 = registry.register_client(tx2);
        registry.attach_to_session(id1, session_id);
        registry.attach_to_session(id2, session_id);

        drop(rx2);

        let delivered = registry
            .broadcast_to_session(session_id, ServerMessage::Disconnected)
            .await;
        assert_eq!(delivered, 1);
        assert_eq!(rx1.recv().await.unwrap(), ServerMessage::Disconnected);
        assert_eq!(registry.client_count(), 1);
    }

    #[tokio::test]
    async fn test_session_buffer_full_probe() {
        let registry = ClientRegistry::new();
        let session_id = Uuid::new_v4();

        let (tx, _rx) = mpsc::channel(2);
        let client_id = registry.register_client(tx);
        registry.attach_to_session(client_id, session_id);

        assert!(!registry.session_buffer_full(session_id));

        registry.try_send_to_client(client_id, ServerMessage::Pong);
        registry.try_send_to_client(client_id, ServerMessage::Pong);
        assert!(registry.session_buffer_full(session_id));
    }

    #[tokio::test]
    async fn test_session_drained_probe() {
        let registry = ClientRegistry::new();
        let session_id = Uuid::new_v4();

        let (tx, mut rx) = mpsc::channel(4);
        let client_id = registry.register_client(tx);
        registry.attach_to_session(client_id, session_id);

        for _ in 0..4 {
            registry.try_send_to_client(client_id, ServerMessage::Pong);
        }
        assert!(!registry.session_drained(session_id, 1));

        // Drain down to one queued frame
        for _ in 0..3 {
            rx.recv().await.unwrap();
        }
        assert!(registry.session_drained(session_id, 1));
    }

    #[tokio::test]
    async fn test_detach_session_clients() {
        let registry = ClientRegistry::new();
        let session_id = Uuid::new_v4();

        let (tx1, _rx1) = mpsc::channel(10);
        let (tx2, _rx2) = mpsc::channel(10);
        let id1 = registry.register_client(tx1);
        let id2 = registry.register_client(tx2);
        registry.attach_to_session(id1, session_id);
        registry.attach_to_session(id2, session_id);

        assert_eq!(registry.detach_session_clients(session_id), 2);
        assert_eq!(registry.session_client_count(session_id), 0);
        assert_eq!(registry.client_count(), 2);
    }
}
