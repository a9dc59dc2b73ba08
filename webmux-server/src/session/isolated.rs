//! Isolated attachment strategy
//!
//! Owns no PTY. Output is synthesized by capturing the pane on a fixed
//! cadence and pushing the snapshot to every client whenever it changes;
//! input is translated into discrete key-injection calls submitted through
//! a serialized per-session queue. No attachment race exists and no client
//! can corrupt another's view.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use webmux_protocol::ServerMessage;

use crate::config::AppConfig;
use crate::pty::SessionClosed;
use crate::registry::{ClientRegistry, SessionId};
use crate::tmux::{translate_input, TmuxAdapter};

/// Capture failures tolerated before the session is declared dead
const MAX_CAPTURE_ERRORS: u32 = 10;

/// Queued work for the serialized input task
#[derive(Debug)]
pub enum InputCommand {
    /// Raw input text, translated into key events before injection
    Keys(String),
    /// Window resize, ordered with respect to preceding input
    Resize { cols: u16, rows: u16 },
}

/// A live isolated-mode attachment: capture poller + input queue
pub struct IsolatedAttachment {
    input_tx: mpsc::Sender<InputCommand>,
    cancel_token: CancellationToken,
    capture_task: JoinHandle<()>,
    input_task: JoinHandle<()>,
    last_capture: Arc<Mutex<Option<String>>>,
}

impl IsolatedAttachment {
    /// Start the capture poller and input-queue drain task
    pub fn start(
        session_id: SessionId,
        session_name: Arc<RwLock<String>>,
        config: &AppConfig,
        registry: Arc<ClientRegistry>,
        adapter: Arc<TmuxAdapter>,
        closed_tx: mpsc::Sender<SessionClosed>,
    ) -> Self {
        let cancel_token = CancellationToken::new();
        let last_capture = Arc::new(Mutex::new(None));

        let capture_task = tokio::spawn(capture_loop(
            session_id,
            session_name.clone(),
            config.attachment.capture_interval(),
            registry,
            adapter.clone(),
            last_capture.clone(),
            cancel_token.clone(),
            closed_tx,
        ));

        let (input_tx, input_rx) = mpsc::channel(256);
        let input_task = tokio::spawn(input_loop(
            session_name,
            input_rx,
            adapter,
            config.attachment.send_keys_delay(),
            cancel_token.clone(),
        ));

        info!(session_id = %session_id, "Isolated attachment started");
        Self {
            input_tx,
            cancel_token,
            capture_task,
            input_task,
            last_capture,
        }
    }

    /// Most recent pane snapshot, for painting a newly joined client
    pub fn last_capture(&self) -> Option<String> {
        self.last_capture.lock().clone()
    }

    /// Sender side of the serialized input queue
    pub fn input_sender(&self) -> mpsc::Sender<InputCommand> {
        self.input_tx.clone()
    }

    /// Stop both loops
    pub async fn shutdown(self) {
        self.cancel_token.cancel();
        let _ = self.capture_task.await;
        let _ = self.input_task.await;
    }
}

impl std::fmt::Debug for IsolatedAttachment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IsolatedAttachment").finish_non_exhaustive()
    }
}

/// Decide whether a fresh capture should be pushed to clients
///
/// Snapshots are compared by value; an unchanged pane produces no frame.
pub fn capture_changed(previous: Option<&str>, current: &str) -> bool {
    previous != Some(current)
}

/// Capture poller: single producer fanning identical snapshots to all clients
#[allow(clippy::too_many_arguments)]
async fn capture_loop(
    session_id: SessionId,
    session_name: Arc<RwLock<String>>,
    cadence: std::time::Duration,
    registry: Arc<ClientRegistry>,
    adapter: Arc<TmuxAdapter>,
    last_capture: Arc<Mutex<Option<String>>>,
    cancel_token: CancellationToken,
    closed_tx: mpsc::Sender<SessionClosed>,
) {
    let mut ticker = interval(cadence);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut consecutive_errors = 0u32;

    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => {
                debug!(session_id = %session_id, "Capture loop cancelled");
                return;
            }
            _ = ticker.tick() => {}
        }

        // Nothing to do while no one is watching
        if registry.session_client_count(session_id) == 0 {
            continue;
        }

        let name = session_name.read().clone();
        match adapter.capture_pane(&name).await {
            Ok(content) => {
                consecutive_errors = 0;

                let changed = {
                    let mut last = last_capture.lock();
                    if capture_changed(last.as_deref(), &content) {
                        *last = Some(content.clone());
                        true
                    } else {
                        false
                    }
                };
                if !changed {
                    continue;
                }

                let delivered = registry.try_broadcast_to_session(
                    session_id,
                    ServerMessage::Output { data: content },
                );
                let attached = registry.session_client_count(session_id);
                if delivered < attached {
                    // Slow clients skip redundant snapshots; the next
                    // changed capture repaints them fully
                    trace!(
                        session_id = %session_id,
                        delivered,
                        attached,
                        "Snapshot skipped for slow client"
                    );
                }
            }
            Err(e) => {
                consecutive_errors += 1;
                warn!(
                    session_id = %session_id,
                    session = %name,
                    error = %e,
                    attempt = consecutive_errors,
                    "Pane capture failed"
                );
                if consecutive_errors >= MAX_CAPTURE_ERRORS {
                    error!(
                        session_id = %session_id,
                        session = %name,
                        "Capture keeps failing, closing session"
                    );
                    registry
                        .broadcast_to_session(session_id, ServerMessage::Disconnected)
                        .await;
                    let _ = closed_tx.send(SessionClosed { session_id }).await;
                    return;
                }
            }
        }
    }
}

/// Input drain task: at most one subprocess call in flight per session
async fn input_loop(
    session_name: Arc<RwLock<String>>,
    mut input_rx: mpsc::Receiver<InputCommand>,
    adapter: Arc<TmuxAdapter>,
    send_delay: std::time::Duration,
    cancel_token: CancellationToken,
) {
    loop {
        let command = tokio::select! {
            _ = cancel_token.cancelled() => return,
            cmd = input_rx.recv() => match cmd {
                Some(cmd) => cmd,
                None => return,
            },
        };

        let name = session_name.read().clone();
        match command {
            InputCommand::Keys(data) => {
                for event in translate_input(&data) {
                    if let Err(e) = adapter.send_key_event(&name, &event).await {
                        warn!(session = %name, error = %e, "Key injection failed");
                    }
                    sleep(send_delay).await;
                }
            }
            InputCommand::Resize { cols, rows } => {
                if let Err(e) = adapter.resize_window(&name, cols, rows).await {
                    warn!(session = %name, error = %e, "Resize failed");
                }
            }
        }
    }
}
