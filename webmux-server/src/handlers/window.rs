//! Window-related message handlers
//!
//! Handles: list-windows, create-window, kill-window, rename-window,
//! select-window.

use tracing::info;

use webmux_protocol::{ServerMessage, TopologyEvent};

use super::{HandlerContext, HandlerResult};

impl HandlerContext {
    /// List the windows of a session
    pub async fn handle_list_windows(&self, session_name: String) -> HandlerResult {
        match self.adapter.list_windows(&session_name).await {
            Ok(windows) => HandlerResult::Response(ServerMessage::WindowsList {
                session_name,
                windows,
            }),
            Err(e) => Self::error_reply(&e),
        }
    }

    /// Create a window in a session
    pub async fn handle_create_window(
        &self,
        session_name: String,
        window_name: Option<String>,
    ) -> HandlerResult {
        match self
            .adapter
            .create_window(&session_name, window_name.as_deref())
            .await
        {
            Ok(()) => {
                info!(session = %session_name, "Window created");
                // The new window's index is assigned by the multiplexer;
                // the refreshed list carries it to everyone
                let windows = self
                    .adapter
                    .list_windows(&session_name)
                    .await
                    .unwrap_or_default();
                if let Some(window) = windows.iter().max_by_key(|w| w.index) {
                    self.echo_event(TopologyEvent::WindowAdded {
                        session_name: session_name.clone(),
                        window_index: window.index,
                    })
                    .await;
                }
                HandlerResult::ResponseWithFollowUp {
                    response: ServerMessage::WindowCreated {
                        success: true,
                        error: None,
                    },
                    follow_up: vec![ServerMessage::WindowsList {
                        session_name,
                        windows,
                    }],
                }
            }
            Err(e) => HandlerResult::Response(ServerMessage::WindowCreated {
                success: false,
                error: Some(e.to_string()),
            }),
        }
    }

    /// Kill a window
    pub async fn handle_kill_window(
        &self,
        session_name: String,
        window_index: u32,
    ) -> HandlerResult {
        match self.adapter.kill_window(&session_name, window_index).await {
            Ok(()) => {
                info!(session = %session_name, window = window_index, "Window killed");
                self.echo_event(TopologyEvent::WindowRemoved {
                    session_name: session_name.clone(),
                    window_index,
                })
                .await;
                let windows = self
                    .adapter
                    .list_windows(&session_name)
                    .await
                    .unwrap_or_default();
                HandlerResult::ResponseWithFollowUp {
                    response: ServerMessage::WindowKilled {
                        success: true,
                        error: None,
                    },
                    follow_up: vec![ServerMessage::WindowsList {
                        session_name,
                        windows,
                    }],
                }
            }
            Err(e) => HandlerResult::Response(ServerMessage::WindowKilled {
                success: false,
                error: Some(e.to_string()),
            }),
        }
    }

    /// Rename a window
    pub async fn handle_rename_window(
        &self,
        session_name: String,
        window_index: u32,
        new_name: String,
    ) -> HandlerResult {
        match self
            .adapter
            .rename_window(&session_name, window_index, &new_name)
            .await
        {
            Ok(()) => {
                info!(
                    session = %session_name,
                    window = window_index,
                    name = %new_name,
                    "Window renamed"
                );
                self.echo_event(TopologyEvent::WindowRenamed {
                    session_name,
                    window_index,
                    window_name: new_name,
                })
                .await;
                HandlerResult::Response(ServerMessage::WindowRenamed {
                    success: true,
                    error: None,
                })
            }
            Err(e) => HandlerResult::Response(ServerMessage::WindowRenamed {
                success: false,
                error: Some(e.to_string()),
            }),
        }
    }

    /// Select (focus) a window, then refresh the requester's window list
    pub async fn handle_select_window(
        &self,
        session_name: String,
        window_index: u32,
    ) -> HandlerResult {
        match self.adapter.select_window(&session_name, window_index).await {
            Ok(()) => {
                info!(session = %session_name, window = window_index, "Window selected");
                self.echo_event(TopologyEvent::WindowSelected {
                    session_name: session_name.clone(),
                    window_index,
                })
                .await;

                let windows = self
                    .adapter
                    .list_windows(&session_name)
                    .await
                    .unwrap_or_default();

                HandlerResult::ResponseWithFollowUp {
                    response: ServerMessage::WindowSelected {
                        success: true,
                        window_index: Some(window_index),
                        error: None,
                    },
                    follow_up: vec![ServerMessage::WindowsList {
                        session_name,
                        windows,
                    }],
                }
            }
            Err(e) => HandlerResult::Response(ServerMessage::WindowSelected {
                success: false,
                window_index: None,
                error: Some(e.to_string()),
            }),
        }
    }
}
