//! WebSocket gateway
//!
//! One long-lived duplex connection per client: a reader task decodes and
//! dispatches inbound frames, a writer task drains the client's bounded
//! output buffer to the socket. Malformed frames get an `error` reply and
//! the connection stays open.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::BytesMut;
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, error, info, warn};

use webmux_protocol::{ClientMessage, ErrorCode, ServerFrameCodec, ServerMessage};

use crate::handlers::{HandlerContext, HandlerResult};
use crate::registry::ClientId;
use crate::SharedState;

/// Run the WebSocket accept loop until shutdown is signalled
pub async fn run_accept_loop(addr: String, state: SharedState) {
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(addr = %addr, error = %e, "Failed to bind listener");
            return;
        }
    };

    info!(addr = %addr, "WebSocket listener bound");

    let mut shutdown_rx = state.subscribe_shutdown();

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, peer_addr)) => {
                        debug!(peer = %peer_addr, "New connection");
                        let state = state.clone();
                        tokio::spawn(async move {
                            handle_connection(stream, state).await;
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "Accept failed");
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                info!("Shutdown signal received, stopping accept loop");
                break;
            }
        }
    }
}

async fn handle_connection(stream: TcpStream, state: SharedState) {
    let ws = match tokio_tungstenite::accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!(error = %e, "WebSocket handshake failed");
            return;
        }
    };

    let (mut ws_tx, mut ws_rx) = ws.split();

    let (tx, mut rx) = mpsc::channel::<ServerMessage>(state.config.pipeline.client_buffer_frames);
    let client_id = state.registry.register_client(tx);
    info!(
        client_id = %client_id,
        clients = state.registry.client_count(),
        "Client connected"
    );

    // Flipped once the client sends its first binary frame; outbound
    // messages then use the binary framing variant
    let binary_mode = Arc::new(AtomicBool::new(false));

    let writer_binary = binary_mode.clone();
    let writer_client = client_id;
    let writer_task = tokio::spawn(async move {
        let mut codec = ServerFrameCodec::new();
        while let Some(msg) = rx.recv().await {
            let frame = if writer_binary.load(Ordering::Relaxed) {
                let mut buf = BytesMut::new();
                match codec.encode(msg, &mut buf) {
                    Ok(()) => Message::Binary(buf.to_vec()),
                    Err(e) => {
                        error!(client_id = %writer_client, error = %e, "Frame encode failed");
                        continue;
                    }
                }
            } else {
                match serde_json::to_string(&msg) {
                    Ok(json) => Message::Text(json),
                    Err(e) => {
                        error!(client_id = %writer_client, error = %e, "JSON encode failed");
                        continue;
                    }
                }
            };

            if let Err(e) = ws_tx.send(frame).await {
                debug!(client_id = %writer_client, error = %e, "Socket write failed");
                break;
            }
        }
        let _ = ws_tx.close().await;
    });

    let ctx = HandlerContext {
        engine: state.engine.clone(),
        registry: state.registry.clone(),
        adapter: state.adapter.clone(),
        audio: state.audio.clone(),
        monitor_tx: state.monitor_tx.clone(),
        client_id,
    };

    while let Some(result) = ws_rx.next().await {
        let msg = match result {
            Ok(msg) => msg,
            Err(e) => {
                debug!(client_id = %client_id, error = %e, "Socket read failed");
                break;
            }
        };

        match msg {
            Message::Text(text) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(msg) => dispatch(&ctx, msg).await,
                Err(e) => {
                    debug!(client_id = %client_id, error = %e, "Malformed text frame");
                    protocol_error(&state, client_id, format!("malformed message: {}", e)).await;
                }
            },
            Message::Binary(data) => {
                let mut buf = BytesMut::from(&data[..]);
                let mut codec = ServerFrameCodec::new();
                match codec.decode(&mut buf) {
                    Ok(Some(msg)) => {
                        binary_mode.store(true, Ordering::Relaxed);
                        dispatch(&ctx, msg).await;
                    }
                    Ok(None) => {
                        protocol_error(&state, client_id, "truncated binary frame".to_string())
                            .await;
                    }
                    Err(e) => {
                        debug!(client_id = %client_id, error = %e, "Malformed binary frame");
                        protocol_error(&state, client_id, format!("malformed frame: {}", e)).await;
                    }
                }
            }
            Message::Close(_) => {
                info!(client_id = %client_id, "Client closed connection");
                break;
            }
            // tungstenite answers pings internally
            Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
        }
    }

    // Cleanup: leave the session, drop audio, forget the client
    state.engine.detach(client_id).await;
    state.audio.unsubscribe(client_id).await;
    state.registry.unregister_client(client_id);
    writer_task.abort();
    info!(client_id = %client_id, "Client disconnected");
}

/// Send handler results back to the requesting client
async fn dispatch(ctx: &HandlerContext, msg: ClientMessage) {
    match ctx.route_message(msg).await {
        HandlerResult::Response(reply) => {
            ctx.registry.send_to_client(ctx.client_id, reply).await;
        }
        HandlerResult::ResponseWithFollowUp {
            response,
            follow_up,
        } => {
            ctx.registry.send_to_client(ctx.client_id, response).await;
            for msg in follow_up {
                ctx.registry.send_to_client(ctx.client_id, msg).await;
            }
        }
        HandlerResult::NoResponse => {}
    }
}

/// Reject a malformed frame without dropping the connection
async fn protocol_error(state: &SharedState, client_id: ClientId, message: String) {
    state
        .registry
        .send_to_client(
            client_id,
            ServerMessage::Error {
                message,
                code: Some(ErrorCode::ProtocolError),
            },
        )
        .await;
}
