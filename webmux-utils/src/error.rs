//! Error types for webmux
//!
//! Provides a unified error type used across all webmux crates.

use std::path::PathBuf;
use std::time::Duration;

/// Main error type for webmux operations
#[derive(Debug, thiserror::Error)]
pub enum WebmuxError {
    // === IO Errors ===

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // === Protocol Errors ===

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    // === Configuration Errors ===

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration at {path}: {message}")]
    ConfigInvalid { path: PathBuf, message: String },

    // === Session Errors ===

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Window not found: {session}:{index}")]
    WindowNotFound { session: String, index: u32 },

    #[error("Attach conflict on session {session}: {message}")]
    AttachConflict { session: String, message: String },

    #[error("Not attached to a session")]
    NotAttached,

    // === PTY Errors ===

    #[error("PTY error: {0}")]
    Pty(String),

    #[error("Failed to spawn process: {0}")]
    ProcessSpawn(String),

    // === Subprocess Errors ===

    #[error("Command `{command}` failed: {message}")]
    Subprocess { command: String, message: String },

    #[error("Command `{command}` timed out after {timeout:?}")]
    SubprocessTimeout { command: String, timeout: Duration },

    // === Stream Errors ===

    #[error("Upstream producer closed")]
    UpstreamClosed,

    // === Internal Errors ===

    #[error("Internal error: {0}")]
    Internal(String),
}

impl WebmuxError {
    /// Create a protocol error
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a PTY error
    pub fn pty(msg: impl Into<String>) -> Self {
        Self::Pty(msg.into())
    }

    /// Create a subprocess failure error
    pub fn subprocess(command: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Subprocess {
            command: command.into(),
            message: message.into(),
        }
    }

    /// Create an attach conflict error
    pub fn attach_conflict(session: impl Into<String>, message: impl Into<String>) -> Self {
        Self::AttachConflict {
            session: session.into(),
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Check if this error is transient and the operation may be retried
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::SubprocessTimeout { .. } | Self::Io(_))
    }
}

/// Result type alias using WebmuxError
pub type Result<T> = std::result::Result<T, WebmuxError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_session_not_found() {
        let err = WebmuxError::SessionNotFound("dev".into());
        assert_eq!(err.to_string(), "Session not found: dev");
    }

    #[test]
    fn test_error_display_window_not_found() {
        let err = WebmuxError::WindowNotFound {
            session: "dev".into(),
            index: 2,
        };
        assert_eq!(err.to_string(), "Window not found: dev:2");
    }

    #[test]
    fn test_error_display_attach_conflict() {
        let err = WebmuxError::attach_conflict("dev", "mode mismatch");
        assert_eq!(
            err.to_string(),
            "Attach conflict on session dev: mode mismatch"
        );
    }

    #[test]
    fn test_error_display_subprocess() {
        let err = WebmuxError::subprocess("tmux list-sessions", "no server running");
        let msg = err.to_string();
        assert!(msg.contains("tmux list-sessions"));
        assert!(msg.contains("no server running"));
    }

    #[test]
    fn test_error_display_subprocess_timeout() {
        let err = WebmuxError::SubprocessTimeout {
            command: "tmux capture-pane".into(),
            timeout: Duration::from_secs(5),
        };
        let msg = err.to_string();
        assert!(msg.contains("tmux capture-pane"));
        assert!(msg.contains("timed out"));
    }

    #[test]
    fn test_error_display_config_invalid() {
        let err = WebmuxError::ConfigInvalid {
            path: PathBuf::from("/home/user/.config/webmux/config.toml"),
            message: "syntax error".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("config.toml"));
        assert!(msg.contains("syntax error"));
    }

    #[test]
    fn test_error_display_upstream_closed() {
        let err = WebmuxError::UpstreamClosed;
        assert_eq!(err.to_string(), "Upstream producer closed");
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "not found");
        let err: WebmuxError = io_err.into();
        assert!(matches!(err, WebmuxError::Io(_)));
    }

    #[test]
    fn test_is_transient() {
        assert!(WebmuxError::SubprocessTimeout {
            command: "tmux".into(),
            timeout: Duration::from_secs(1),
        }
        .is_transient());
        assert!(!WebmuxError::SessionNotFound("x".into()).is_transient());
        assert!(!WebmuxError::NotAttached.is_transient());
    }

    #[test]
    fn test_helper_constructors() {
        assert!(matches!(
            WebmuxError::protocol("bad frame"),
            WebmuxError::Protocol(_)
        ));
        assert!(matches!(
            WebmuxError::config("missing key"),
            WebmuxError::Config(_)
        ));
        assert!(matches!(WebmuxError::pty("openpty"), WebmuxError::Pty(_)));
        assert!(matches!(
            WebmuxError::internal("invariant"),
            WebmuxError::Internal(_)
        ));
    }

    #[test]
    fn test_result_alias() {
        let ok: Result<u32> = Ok(7);
        assert_eq!(ok.unwrap(), 7);

        let err: Result<u32> = Err(WebmuxError::NotAttached);
        assert!(err.is_err());
    }
}
