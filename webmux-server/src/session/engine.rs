//! Session registry and attachment state machine
//!
//! One entry per live session attachment, keyed by a stable id so renames
//! do not disturb broadcast routing. Entries are created lazily on first
//! attach and reclaimed after a grace period once the last client leaves;
//! the underlying multiplexer session is never destroyed by reclaim.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::{debug, info};

use webmux_protocol::{AttachMode, ServerMessage};
use webmux_utils::{Result, WebmuxError};

use crate::config::AppConfig;
use crate::pty::SessionClosed;
use crate::registry::{ClientId, ClientRegistry, SessionId};
use crate::session::{DirectAttachment, InputCommand, IsolatedAttachment};
use crate::tmux::TmuxAdapter;

/// Attachment lifecycle: Unattached -> Attaching -> Attached -> Detaching -> Closed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unattached,
    Attaching,
    Attached,
    Detaching,
    Closed,
}

/// The per-session strategy, chosen at creation
enum SessionStrategy {
    Direct(DirectAttachment),
    Isolated(IsolatedAttachment),
}

impl SessionStrategy {
    async fn shutdown(self) {
        match self {
            SessionStrategy::Direct(direct) => direct.shutdown().await,
            SessionStrategy::Isolated(isolated) => isolated.shutdown().await,
        }
    }
}

struct SessionEntry {
    name: Arc<RwLock<String>>,
    mode: AttachMode,
    state: SessionState,
    strategy: SessionStrategy,
    /// Bumped on every attach; guards grace-period reclaim against re-attach
    epoch: u64,
}

/// Registry of live session attachments
pub struct SessionEngine {
    sessions: DashMap<SessionId, SessionEntry>,
    names: DashMap<String, SessionId>,
    registry: Arc<ClientRegistry>,
    adapter: Arc<TmuxAdapter>,
    config: Arc<AppConfig>,
    closed_tx: mpsc::Sender<SessionClosed>,
}

impl SessionEngine {
    pub fn new(
        registry: Arc<ClientRegistry>,
        adapter: Arc<TmuxAdapter>,
        config: Arc<AppConfig>,
        closed_tx: mpsc::Sender<SessionClosed>,
    ) -> Self {
        Self {
            sessions: DashMap::new(),
            names: DashMap::new(),
            registry,
            adapter,
            config,
            closed_tx,
        }
    }

    /// Attach a client to a session, creating the attachment lazily
    ///
    /// An attach naming a mode other than the session's established one is
    /// rejected as a conflict rather than silently switching strategies.
    pub async fn attach(
        self: &Arc<Self>,
        client_id: ClientId,
        name: &str,
        cols: u16,
        rows: u16,
        requested_mode: Option<AttachMode>,
    ) -> Result<()> {
        loop {
            // Fast path: the attachment already exists
            if let Some(id) = self.names.get(name).map(|r| *r) {
                if let Some(mut entry) = self.sessions.get_mut(&id) {
                    if let Some(requested) = requested_mode {
                        if requested != entry.mode {
                            return Err(WebmuxError::attach_conflict(
                                name,
                                format!(
                                    "session is attached in {} mode, {} requested",
                                    entry.mode, requested
                                ),
                            ));
                        }
                    }
                    entry.state = SessionState::Attached;
                    entry.epoch += 1;
                    let snapshot = match &entry.strategy {
                        SessionStrategy::Isolated(isolated) => isolated.last_capture(),
                        SessionStrategy::Direct(_) => None,
                    };
                    drop(entry);

                    self.registry.attach_to_session(client_id, id);
                    debug!(client_id = %client_id, session = %name, "Joined existing attachment");

                    if let Some(data) = snapshot {
                        self.registry
                            .send_to_client(client_id, ServerMessage::Output { data })
                            .await;
                    }
                    return Ok(());
                }
                // Stale name index entry left by a concurrent teardown
                self.names.remove_if(name, |_, v| *v == id);
            }

            // Slow path: build a new attachment
            let mode = requested_mode.unwrap_or(self.config.attachment.default_mode);

            if !self.adapter.has_session(name).await? {
                self.adapter.create_session(Some(name)).await?;
                info!(session = %name, "Created multiplexer session on first attach");
            }

            let id = SessionId::new_v4();
            let shared_name = Arc::new(RwLock::new(name.to_string()));
            let strategy = match mode {
                AttachMode::Direct => SessionStrategy::Direct(DirectAttachment::start(
                    id,
                    name,
                    cols,
                    rows,
                    &self.config,
                    self.registry.clone(),
                    self.closed_tx.clone(),
                )?),
                AttachMode::Isolated => SessionStrategy::Isolated(IsolatedAttachment::start(
                    id,
                    shared_name.clone(),
                    &self.config,
                    self.registry.clone(),
                    self.adapter.clone(),
                    self.closed_tx.clone(),
                )),
            };

            // Publish the new attachment unless another client won the race.
            // The entry guard must drop before any await point.
            let lost_race = match self.names.entry(name.to_string()) {
                dashmap::mapref::entry::Entry::Occupied(_) => true,
                dashmap::mapref::entry::Entry::Vacant(vacant) => {
                    vacant.insert(id);
                    false
                }
            };

            if lost_race {
                debug!(session = %name, "Lost creation race, retrying attach");
                strategy.shutdown().await;
                continue;
            }

            self.sessions.insert(
                id,
                SessionEntry {
                    name: shared_name,
                    mode,
                    state: SessionState::Attaching,
                    strategy,
                    epoch: 1,
                },
            );
            self.registry.attach_to_session(client_id, id);
            if let Some(mut entry) = self.sessions.get_mut(&id) {
                entry.state = SessionState::Attached;
            }
            info!(
                client_id = %client_id,
                session = %name,
                mode = %mode,
                "Session attachment created"
            );
            return Ok(());
        }
    }

    /// Detach a client; the last client leaving starts the grace timer
    pub async fn detach(self: &Arc<Self>, client_id: ClientId) {
        let Some(id) = self.registry.detach_from_session(client_id) else {
            return;
        };

        if self.registry.session_client_count(id) > 0 {
            return;
        }

        let epoch = {
            let Some(mut entry) = self.sessions.get_mut(&id) else {
                return;
            };
            entry.state = SessionState::Detaching;
            entry.epoch += 1;
            entry.epoch
        };

        debug!(session_id = %id, "Last client left, starting grace timer");
        let engine = Arc::clone(self);
        let grace = self.config.attachment.grace_period();
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            engine.reclaim(id, epoch).await;
        });
    }

    /// Reclaim an idle attachment, unless a client re-attached meanwhile
    ///
    /// The epoch check and removal are atomic with respect to attach, which
    /// bumps the epoch under the same entry lock.
    async fn reclaim(&self, id: SessionId, epoch: u64) {
        let removed = self.sessions.remove_if(&id, |_, entry| {
            entry.epoch == epoch && self.registry.session_client_count(id) == 0
        });

        if let Some((_, entry)) = removed {
            let name = entry.name.read().clone();
            self.names.remove_if(&name, |_, v| *v == id);
            info!(session = %name, "Reclaimed idle session attachment");
            entry.strategy.shutdown().await;
        }
    }

    /// Route raw input from a client to its session's strategy
    pub async fn input(&self, client_id: ClientId, data: String) -> Result<()> {
        let id = self
            .registry
            .client_session(client_id)
            .ok_or(WebmuxError::NotAttached)?;

        let queue = {
            let entry = self
                .sessions
                .get(&id)
                .ok_or_else(|| WebmuxError::SessionNotFound(id.to_string()))?;
            match &entry.strategy {
                SessionStrategy::Direct(direct) => {
                    direct.write_input(&data)?;
                    None
                }
                SessionStrategy::Isolated(isolated) => Some(isolated.input_sender()),
            }
        };

        if let Some(tx) = queue {
            tx.send(InputCommand::Keys(data))
                .await
                .map_err(|_| WebmuxError::UpstreamClosed)?;
        }
        Ok(())
    }

    /// Resize a client's session
    pub async fn resize(&self, client_id: ClientId, cols: u16, rows: u16) -> Result<()> {
        let id = self
            .registry
            .client_session(client_id)
            .ok_or(WebmuxError::NotAttached)?;

        let (name, queue) = {
            let entry = self
                .sessions
                .get(&id)
                .ok_or_else(|| WebmuxError::SessionNotFound(id.to_string()))?;
            let name = entry.name.read().clone();
            match &entry.strategy {
                SessionStrategy::Direct(direct) => {
                    direct.resize(cols, rows)?;
                    (name, None)
                }
                SessionStrategy::Isolated(isolated) => (name, Some(isolated.input_sender())),
            }
        };

        match queue {
            Some(tx) => {
                tx.send(InputCommand::Resize { cols, rows })
                    .await
                    .map_err(|_| WebmuxError::UpstreamClosed)?;
            }
            None => {
                // Keep the multiplexer's window size in step with the PTY
                self.adapter.resize_window(&name, cols, rows).await?;
            }
        }
        Ok(())
    }

    /// Handle a producer-closed notification from a pump or capture loop
    pub async fn handle_closed(&self, id: SessionId) {
        self.teardown(id).await;
    }

    /// Close a session attachment by name, notifying attached clients
    ///
    /// Used when the multiplexer session itself was killed.
    pub async fn close_session_by_name(&self, name: &str) {
        let Some(id) = self.names.get(name).map(|r| *r) else {
            return;
        };
        self.registry
            .broadcast_to_session(id, ServerMessage::Disconnected)
            .await;
        self.teardown(id).await;
    }

    async fn teardown(&self, id: SessionId) {
        if let Some(mut entry) = self.sessions.get_mut(&id) {
            entry.state = SessionState::Closed;
        }
        if let Some((_, entry)) = self.sessions.remove(&id) {
            let name = entry.name.read().clone();
            self.names.remove_if(&name, |_, v| *v == id);
            self.registry.detach_session_clients(id);
            info!(session = %name, session_id = %id, "Session attachment closed");
            entry.strategy.shutdown().await;
        }
    }

    /// Re-key an attachment after a successful multiplexer rename
    pub fn rename_session(&self, old_name: &str, new_name: &str) {
        let Some((_, id)) = self.names.remove(old_name) else {
            return;
        };
        if let Some(entry) = self.sessions.get(&id) {
            *entry.name.write() = new_name.to_string();
        }
        self.names.insert(new_name.to_string(), id);
        debug!(old = %old_name, new = %new_name, "Session attachment renamed");
    }

    /// Names of sessions that currently have at least one attached client
    pub fn attached_session_names(&self) -> Vec<String> {
        self.registry
            .active_sessions()
            .into_iter()
            .filter_map(|id| self.sessions.get(&id).map(|e| e.name.read().clone()))
            .collect()
    }

    /// Current state of a named attachment; no entry means `Unattached`
    pub fn session_state(&self, name: &str) -> SessionState {
        self.names
            .get(name)
            .map(|id| *id)
            .and_then(|id| self.sessions.get(&id).map(|entry| entry.state))
            .unwrap_or(SessionState::Unattached)
    }

    /// Number of live session attachments
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Shut down every attachment (server exit)
    pub async fn shutdown_all(&self) {
        let ids: Vec<SessionId> = self.sessions.iter().map(|e| *e.key()).collect();
        for id in ids {
            if let Some((_, entry)) = self.sessions.remove(&id) {
                let name = entry.name.read().clone();
                self.names.remove_if(&name, |_, v| *v == id);
                entry.strategy.shutdown().await;
            }
        }
        info!("All session attachments shut down");
    }

    /// Insert an isolated-mode attachment without touching the multiplexer.
    /// Exists so lifecycle tests can run where no tmux binary is available.
    #[cfg(test)]
    pub(crate) fn insert_isolated_for_test(&self, name: &str) -> SessionId {
        let id = SessionId::new_v4();
        let shared_name = Arc::new(RwLock::new(name.to_string()));
        let strategy = SessionStrategy::Isolated(IsolatedAttachment::start(
            id,
            shared_name.clone(),
            &self.config,
            self.registry.clone(),
            self.adapter.clone(),
            self.closed_tx.clone(),
        ));
        self.names.insert(name.to_string(), id);
        self.sessions.insert(
            id,
            SessionEntry {
                name: shared_name,
                mode: AttachMode::Isolated,
                state: SessionState::Attached,
                strategy,
                epoch: 1,
            },
        );
        id
    }
}
