//! Audio side channel
//!
//! A subprocess byte-pump with no session semantics: one ffmpeg process
//! captures the host's default monitor source and its stdout is broadcast
//! to subscribed clients as base64 chunks. Failures here never affect
//! terminal sessions.

use std::collections::HashSet;
use std::process::Stdio;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use webmux_protocol::ServerMessage;
use webmux_utils::{Result, WebmuxError};

use crate::registry::{ClientId, ClientRegistry};

struct AudioState {
    process: Option<Child>,
    streaming: bool,
    subscribers: HashSet<ClientId>,
}

/// Owns the capture process and the subscriber set
pub struct AudioStreamer {
    registry: Arc<ClientRegistry>,
    state: Arc<Mutex<AudioState>>,
}

impl AudioStreamer {
    pub fn new(registry: Arc<ClientRegistry>) -> Self {
        Self {
            registry,
            state: Arc::new(Mutex::new(AudioState {
                process: None,
                streaming: false,
                subscribers: HashSet::new(),
            })),
        }
    }

    /// Subscribe a client, starting the capture process if needed
    pub async fn subscribe(&self, client_id: ClientId) -> Result<()> {
        let mut state = self.state.lock().await;
        state.subscribers.insert(client_id);
        debug!(client_id = %client_id, total = state.subscribers.len(), "Audio subscriber added");

        self.registry.try_send_to_client(
            client_id,
            ServerMessage::AudioStatus {
                streaming: state.streaming,
                error: None,
            },
        );

        if !state.streaming {
            if let Err(e) = self.start_capture(&mut state).await {
                state.streaming = false;
                self.registry.try_send_to_client(
                    client_id,
                    ServerMessage::AudioStatus {
                        streaming: false,
                        error: Some(e.to_string()),
                    },
                );
                return Err(e);
            }
        }
        Ok(())
    }

    /// Unsubscribe a client, stopping capture when nobody is left
    pub async fn unsubscribe(&self, client_id: ClientId) {
        let mut state = self.state.lock().await;
        if !state.subscribers.remove(&client_id) {
            return;
        }
        debug!(client_id = %client_id, remaining = state.subscribers.len(), "Audio subscriber removed");

        if state.subscribers.is_empty() && state.streaming {
            self.stop_capture(&mut state).await;
        }
    }

    async fn start_capture(&self, state: &mut AudioState) -> Result<()> {
        info!("Starting audio capture");

        let (input_args, input_source) = capture_input().await?;

        let mut child = Command::new("ffmpeg")
            .args(&input_args)
            .arg(&input_source)
            .args([
                "-acodec", "libopus",
                "-b:a", "128k",
                "-ar", "48000",
                "-ac", "2",
                "-f", "webm",
                "-",
            ])
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| WebmuxError::ProcessSpawn(format!("ffmpeg: {}", e)))?;

        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| WebmuxError::internal("ffmpeg stdout unavailable"))?;

        state.process = Some(child);
        state.streaming = true;

        let registry = self.registry.clone();
        let shared = self.state.clone();
        tokio::spawn(async move {
            let mut buffer = vec![0u8; 4096];
            loop {
                match stdout.read(&mut buffer).await {
                    Ok(0) => break,
                    Ok(n) => {
                        let msg = ServerMessage::AudioData {
                            data: BASE64.encode(&buffer[..n]),
                        };
                        let subscribers: Vec<ClientId> = {
                            let state = shared.lock().await;
                            state.subscribers.iter().copied().collect()
                        };
                        for client_id in subscribers {
                            registry.try_send_to_client(client_id, msg.clone());
                        }
                    }
                    Err(e) => {
                        error!(error = %e, "Audio capture read failed");
                        break;
                    }
                }
            }

            // Capture ended (process died or was stopped)
            let mut state = shared.lock().await;
            state.streaming = false;
            state.process = None;
            let msg = ServerMessage::AudioStatus {
                streaming: false,
                error: None,
            };
            for client_id in state.subscribers.iter().copied() {
                registry.try_send_to_client(client_id, msg.clone());
            }
        });

        let msg = ServerMessage::AudioStatus {
            streaming: true,
            error: None,
        };
        for client_id in state.subscribers.iter().copied() {
            self.registry.try_send_to_client(client_id, msg.clone());
        }
        Ok(())
    }

    async fn stop_capture(&self, state: &mut AudioState) {
        info!("Stopping audio capture");
        if let Some(mut child) = state.process.take() {
            if let Err(e) = child.kill().await {
                warn!(error = %e, "Failed to kill audio capture process");
            }
        }
        state.streaming = false;
    }
}

/// Platform-specific ffmpeg input arguments
async fn capture_input() -> Result<(Vec<String>, String)> {
    if cfg!(target_os = "linux") {
        let source = match default_monitor_source().await {
            Ok(source) => source,
            Err(_) => "default".to_string(),
        };
        Ok((vec!["-f".into(), "pulse".into(), "-i".into()], source))
    } else if cfg!(target_os = "macos") {
        Ok((
            vec!["-f".into(), "avfoundation".into(), "-i".into()],
            ":0".to_string(),
        ))
    } else {
        Err(WebmuxError::internal(
            "audio capture unsupported on this platform",
        ))
    }
}

/// Monitor source of the default PulseAudio sink
async fn default_monitor_source() -> Result<String> {
    let output = Command::new("pactl")
        .args(["get-default-sink"])
        .output()
        .await
        .map_err(|e| WebmuxError::ProcessSpawn(format!("pactl: {}", e)))?;

    if !output.status.success() {
        return Err(WebmuxError::subprocess(
            "pactl get-default-sink",
            String::from_utf8_lossy(&output.stderr).trim(),
        ));
    }

    let sink = String::from_utf8_lossy(&output.stdout).trim().to_string();
    Ok(format!("{}.monitor", sink))
}
