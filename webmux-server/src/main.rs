//! webmux server - WebSocket bridge for tmux sessions

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn};

use webmux_protocol::TopologyEvent;
use webmux_utils::{LogConfig, Result};

mod audio;
mod config;
mod handlers;
mod monitor;
mod pty;
mod registry;
mod session;
mod tmux;
mod ws;

use audio::AudioStreamer;
use config::AppConfig;
use monitor::TopologyMonitor;
use registry::ClientRegistry;
use session::SessionEngine;
use tmux::TmuxAdapter;

/// Shared server state handed to every connection task
#[derive(Clone)]
pub struct SharedState {
    pub config: Arc<AppConfig>,
    pub registry: Arc<ClientRegistry>,
    pub adapter: Arc<TmuxAdapter>,
    pub engine: Arc<SessionEngine>,
    pub audio: Arc<AudioStreamer>,
    pub monitor_tx: mpsc::Sender<TopologyEvent>,
    pub shutdown_tx: broadcast::Sender<()>,
}

impl SharedState {
    pub fn subscribe_shutdown(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    webmux_utils::init_logging_with_config(LogConfig::server())?;

    let config = Arc::new(AppConfig::load()?);
    info!(bind = %config.server.bind, "webmux server starting");

    let registry = Arc::new(ClientRegistry::new());
    let adapter = Arc::new(TmuxAdapter::new(&config.tmux));

    if let Err(e) = adapter.ensure_server().await {
        // Not fatal: the multiplexer may come up later
        warn!(error = %e, "Multiplexer server not reachable at startup");
    }

    let (closed_tx, mut closed_rx) = mpsc::channel(32);
    let engine = Arc::new(SessionEngine::new(
        registry.clone(),
        adapter.clone(),
        config.clone(),
        closed_tx,
    ));

    // Producer-closed notifications from pumps and capture loops
    {
        let engine = engine.clone();
        tokio::spawn(async move {
            while let Some(closed) = closed_rx.recv().await {
                engine.handle_closed(closed.session_id).await;
            }
        });
    }

    let (monitor_handle, monitor_tx) = TopologyMonitor::spawn(
        registry.clone(),
        engine.clone(),
        adapter.clone(),
        config.monitor.clone(),
    );

    let audio = Arc::new(AudioStreamer::new(registry.clone()));

    let (shutdown_tx, _) = broadcast::channel(1);

    {
        let shutdown_tx = shutdown_tx.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupt received, shutting down");
                let _ = shutdown_tx.send(());
            }
        });
    }

    let state = SharedState {
        config: config.clone(),
        registry,
        adapter,
        engine: engine.clone(),
        audio,
        monitor_tx,
        shutdown_tx,
    };

    ws::run_accept_loop(config.server.bind.clone(), state).await;

    monitor_handle.stop().await;
    engine.shutdown_all().await;

    info!("webmux server stopped");
    Ok(())
}
