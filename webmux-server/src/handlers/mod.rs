//! Message handlers for client requests
//!
//! Routes each decoded `ClientMessage` to its handler and produces the
//! `ServerMessage` replies the gateway sends back.

mod input;
mod session;
mod window;

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::debug;

use webmux_protocol::{AudioAction, ClientMessage, ErrorCode, ServerMessage, TopologyEvent};
use webmux_utils::WebmuxError;

use crate::audio::AudioStreamer;
use crate::registry::{ClientId, ClientRegistry};
use crate::session::SessionEngine;
use crate::tmux::TmuxAdapter;

/// Context for message handlers
///
/// One per connected client; holds shared server state plus the client id.
pub struct HandlerContext {
    pub engine: Arc<SessionEngine>,
    pub registry: Arc<ClientRegistry>,
    pub adapter: Arc<TmuxAdapter>,
    pub audio: Arc<AudioStreamer>,
    /// Mutation events echoed to the topology monitor
    pub monitor_tx: mpsc::Sender<TopologyEvent>,
    /// The client making the requests
    pub client_id: ClientId,
}

/// Result of handling a message
pub enum HandlerResult {
    /// Single reply to the requesting client
    Response(ServerMessage),
    /// Reply followed by additional messages to the same client
    ResponseWithFollowUp {
        response: ServerMessage,
        follow_up: Vec<ServerMessage>,
    },
    /// No reply needed (fire-and-forget messages like input)
    NoResponse,
}

impl HandlerContext {
    /// Route a client message to the appropriate handler
    pub async fn route_message(&self, msg: ClientMessage) -> HandlerResult {
        match msg {
            ClientMessage::Ping => {
                debug!(client_id = %self.client_id, "Ping");
                HandlerResult::Response(ServerMessage::Pong)
            }

            ClientMessage::ListSessions => self.handle_list_sessions().await,

            ClientMessage::AttachSession {
                session_name,
                cols,
                rows,
                mode,
            } => self.handle_attach_session(session_name, cols, rows, mode).await,

            ClientMessage::CreateSession { name } => self.handle_create_session(name).await,

            ClientMessage::KillSession { session_name } => {
                self.handle_kill_session(session_name).await
            }

            ClientMessage::RenameSession {
                session_name,
                new_name,
            } => self.handle_rename_session(session_name, new_name).await,

            ClientMessage::Input { data } => self.handle_input(data).await,

            ClientMessage::Resize { cols, rows } => self.handle_resize(cols, rows).await,

            ClientMessage::ListWindows { session_name } => {
                self.handle_list_windows(session_name).await
            }

            ClientMessage::CreateWindow {
                session_name,
                window_name,
            } => self.handle_create_window(session_name, window_name).await,

            ClientMessage::KillWindow {
                session_name,
                window_index,
            } => self.handle_kill_window(session_name, window_index).await,

            ClientMessage::RenameWindow {
                session_name,
                window_index,
                new_name,
            } => {
                self.handle_rename_window(session_name, window_index, new_name)
                    .await
            }

            ClientMessage::SelectWindow {
                session_name,
                window_index,
            } => self.handle_select_window(session_name, window_index).await,

            ClientMessage::AudioControl { action } => self.handle_audio_control(action).await,
        }
    }

    async fn handle_audio_control(&self, action: AudioAction) -> HandlerResult {
        match action {
            AudioAction::Start => {
                // subscribe reports status to the client itself
                let _ = self.audio.subscribe(self.client_id).await;
            }
            AudioAction::Stop => {
                self.audio.unsubscribe(self.client_id).await;
            }
        }
        HandlerResult::NoResponse
    }

    /// Echo a successful mutation to the topology monitor
    pub(crate) async fn echo_event(&self, event: TopologyEvent) {
        if self.monitor_tx.send(event).await.is_err() {
            debug!("Topology monitor gone, event dropped");
        }
    }

    /// Build an error reply from a typed failure
    pub(crate) fn error_reply(err: &WebmuxError) -> HandlerResult {
        HandlerResult::Response(ServerMessage::Error {
            message: err.to_string(),
            code: Some(error_code(err)),
        })
    }
}

/// Map internal failures to wire error codes
pub fn error_code(err: &WebmuxError) -> ErrorCode {
    match err {
        WebmuxError::Protocol(_) | WebmuxError::InvalidMessage(_) | WebmuxError::NotAttached => {
            ErrorCode::ProtocolError
        }
        WebmuxError::SessionNotFound(_) => ErrorCode::SessionNotFound,
        WebmuxError::WindowNotFound { .. } => ErrorCode::WindowNotFound,
        WebmuxError::AttachConflict { .. } => ErrorCode::AttachConflict,
        WebmuxError::SubprocessTimeout { .. } => ErrorCode::SubprocessTimeout,
        WebmuxError::Subprocess { .. } => ErrorCode::SubprocessFailure,
        WebmuxError::Pty(_) | WebmuxError::ProcessSpawn(_) => ErrorCode::PtySpawnFailure,
        WebmuxError::UpstreamClosed => ErrorCode::UpstreamClosed,
        _ => ErrorCode::Internal,
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::config::AppConfig;
    use crate::pty::SessionClosed;

    pub fn create_test_context() -> (HandlerContext, mpsc::Receiver<TopologyEvent>) {
        let registry = Arc::new(ClientRegistry::new());
        let mut config = AppConfig::default();
        config.attachment.capture_interval_ms = 60_000;
        let config = Arc::new(config);
        let adapter = Arc::new(TmuxAdapter::new(&config.tmux));
        let (closed_tx, _closed_rx) = mpsc::channel::<SessionClosed>(8);
        let engine = Arc::new(SessionEngine::new(
            registry.clone(),
            adapter.clone(),
            config,
            closed_tx,
        ));
        let audio = Arc::new(AudioStreamer::new(registry.clone()));
        let (monitor_tx, monitor_rx) = mpsc::channel(16);

        let (tx, rx) = mpsc::channel(64);
        std::mem::forget(rx);
        let client_id = registry.register_client(tx);

        (
            HandlerContext {
                engine,
                registry,
                adapter,
                audio,
                monitor_tx,
                client_id,
            },
            monitor_rx,
        )
    }
}
