//! Client-server message types
//!
//! Both directions are closed tagged unions: every message is one JSON
//! object whose `type` field selects the variant. Unknown tags fail to
//! deserialize and are rejected by the gateway with an `error` reply.

use serde::{Deserialize, Serialize};

use crate::types::{AttachMode, AudioAction, SessionSummary, WindowInfo};

/// Messages sent from client to server
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
    /// Request the current session list
    ListSessions,

    /// Attach to a session, creating it if it does not exist
    AttachSession {
        #[serde(rename = "sessionName")]
        session_name: String,
        cols: u16,
        rows: u16,
        /// Attachment strategy; server default applies when omitted
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mode: Option<AttachMode>,
    },

    /// Raw input for the attached session
    Input { data: String },

    /// Resize the attached session's terminal
    Resize { cols: u16, rows: u16 },

    /// Request the window list of a session
    ListWindows {
        #[serde(rename = "sessionName")]
        session_name: String,
    },

    /// Create a session (name auto-assigned when omitted)
    CreateSession {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },

    /// Kill a session in the multiplexer
    KillSession {
        #[serde(rename = "sessionName")]
        session_name: String,
    },

    /// Rename a session
    RenameSession {
        #[serde(rename = "sessionName")]
        session_name: String,
        #[serde(rename = "newName")]
        new_name: String,
    },

    /// Create a window in a session
    CreateWindow {
        #[serde(rename = "sessionName")]
        session_name: String,
        #[serde(rename = "windowName", default, skip_serializing_if = "Option::is_none")]
        window_name: Option<String>,
    },

    /// Kill a window
    KillWindow {
        #[serde(rename = "sessionName")]
        session_name: String,
        #[serde(rename = "windowIndex")]
        window_index: u32,
    },

    /// Rename a window
    RenameWindow {
        #[serde(rename = "sessionName")]
        session_name: String,
        #[serde(rename = "windowIndex")]
        window_index: u32,
        #[serde(rename = "newName")]
        new_name: String,
    },

    /// Select (focus) a window
    SelectWindow {
        #[serde(rename = "sessionName")]
        session_name: String,
        #[serde(rename = "windowIndex")]
        window_index: u32,
    },

    /// Keepalive
    Ping,

    /// Start or stop the audio side channel
    AudioControl { action: AudioAction },
}

/// Messages sent from server to client
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    SessionsList {
        sessions: Vec<SessionSummary>,
    },

    Attached {
        #[serde(rename = "sessionName")]
        session_name: String,
    },

    Output {
        data: String,
    },

    /// The attached session's producer ended (process exit, capture failure)
    Disconnected,

    WindowsList {
        #[serde(rename = "sessionName")]
        session_name: String,
        windows: Vec<WindowInfo>,
    },

    SessionCreated {
        success: bool,
        #[serde(rename = "sessionName", default, skip_serializing_if = "Option::is_none")]
        session_name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    SessionKilled {
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    SessionRenamed {
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    WindowCreated {
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    WindowKilled {
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    WindowRenamed {
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    WindowSelected {
        success: bool,
        #[serde(rename = "windowIndex", default, skip_serializing_if = "Option::is_none")]
        window_index: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    /// A topology change observed by the synchronizer or echoed by a mutation
    TmuxUpdate {
        event: TopologyEvent,
    },

    Error {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<ErrorCode>,
    },

    Pong,

    AudioStatus {
        streaming: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    /// Base64-encoded audio chunk
    AudioData {
        data: String,
    },
}

/// Typed description of one topology change since the previous snapshot
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum TopologyEvent {
    SessionAdded {
        #[serde(rename = "sessionName")]
        session_name: String,
    },
    SessionRemoved {
        #[serde(rename = "sessionName")]
        session_name: String,
    },
    SessionRenamed {
        #[serde(rename = "oldName")]
        old_name: String,
        #[serde(rename = "newName")]
        new_name: String,
    },
    WindowAdded {
        #[serde(rename = "sessionName")]
        session_name: String,
        #[serde(rename = "windowIndex")]
        window_index: u32,
    },
    WindowRemoved {
        #[serde(rename = "sessionName")]
        session_name: String,
        #[serde(rename = "windowIndex")]
        window_index: u32,
    },
    WindowRenamed {
        #[serde(rename = "sessionName")]
        session_name: String,
        #[serde(rename = "windowIndex")]
        window_index: u32,
        #[serde(rename = "windowName")]
        window_name: String,
    },
    WindowSelected {
        #[serde(rename = "sessionName")]
        session_name: String,
        #[serde(rename = "windowIndex")]
        window_index: u32,
    },
}

/// Machine-readable error classification for `error` replies
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorCode {
    ProtocolError,
    SessionNotFound,
    WindowNotFound,
    AttachConflict,
    SubprocessTimeout,
    SubprocessFailure,
    PtySpawnFailure,
    UpstreamClosed,
    Internal,
}
