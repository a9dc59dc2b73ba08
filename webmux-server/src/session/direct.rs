//! Direct attachment strategy
//!
//! Spawns one PTY running the multiplexer's attach command. All attached
//! clients share the raw byte stream: every client sees the same output,
//! and input is written unserialized to the same PTY. Concurrent typing
//! from multiple clients is last-write-wins at `input`-message granularity;
//! clients that need arbitration should use the isolated strategy instead.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info};

use webmux_utils::Result;

use crate::config::AppConfig;
use crate::pty::{OutputPump, PtyHandle, PtyLaunch, PumpConfig, PumpHandle, SessionClosed};
use crate::registry::{ClientRegistry, SessionId};

/// A live direct-mode attachment: one PTY shared by all viewers
pub struct DirectAttachment {
    pty: PtyHandle,
    pump: PumpHandle,
}

impl DirectAttachment {
    /// Spawn the PTY and its output pump
    ///
    /// The multiplexer session must already exist; the engine creates it
    /// before choosing a strategy.
    pub fn start(
        session_id: SessionId,
        session_name: &str,
        cols: u16,
        rows: u16,
        config: &AppConfig,
        registry: Arc<ClientRegistry>,
        closed_tx: mpsc::Sender<SessionClosed>,
    ) -> Result<Self> {
        let launch = PtyLaunch::command(&config.tmux.command)
            .with_arg("attach-session")
            .with_arg("-t")
            .with_arg(session_name)
            .with_env("TERM", "xterm-256color")
            .with_env("COLORTERM", "truecolor")
            .with_size(cols, rows);

        let pty = PtyHandle::spawn(launch)?;
        let pump = OutputPump::spawn(
            session_id,
            pty.clone_reader(),
            registry,
            PumpConfig::from(&config.pipeline),
            closed_tx,
        );

        info!(session = %session_name, session_id = %session_id, "Direct attachment started");
        Ok(Self { pty, pump })
    }

    /// Write raw input bytes to the shared PTY
    pub fn write_input(&self, data: &str) -> Result<()> {
        self.pty.write_all(data.as_bytes())
    }

    /// Resize the PTY grid
    ///
    /// The engine additionally forwards the resize to the multiplexer's
    /// control surface.
    pub fn resize(&self, cols: u16, rows: u16) -> Result<()> {
        self.pty.resize(cols, rows)
    }

    /// Stop the pump and kill the attach process
    pub async fn shutdown(self) {
        self.pump.stop().await;
        if let Err(e) = self.pty.kill() {
            debug!(error = %e, "PTY already gone on shutdown");
        }
    }
}

impl std::fmt::Debug for DirectAttachment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectAttachment").finish_non_exhaustive()
    }
}
