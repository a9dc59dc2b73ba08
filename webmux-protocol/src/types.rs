//! Shared data types carried by protocol messages

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Summary of one multiplexer session, as reported by `list-sessions`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    /// Session name (unique key into the multiplexer)
    pub name: String,
    /// Whether any client is attached inside the multiplexer itself
    pub attached: bool,
    /// Creation time of the session
    pub created: DateTime<Utc>,
    /// Number of windows in the session
    pub windows: u32,
    /// Session dimensions, e.g. "80x24"
    pub dimensions: String,
}

/// One window of a session, as reported by `list-windows`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WindowInfo {
    pub index: u32,
    pub name: String,
    pub active: bool,
    pub panes: u32,
}

/// Attachment strategy for a session
///
/// `Direct` shares one raw PTY stream between all viewers; `Isolated`
/// synthesizes each viewer's output from periodic pane captures and injects
/// input as discrete key events, so viewers cannot corrupt each other.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AttachMode {
    Direct,
    Isolated,
}

impl std::fmt::Display for AttachMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttachMode::Direct => write!(f, "direct"),
            AttachMode::Isolated => write!(f, "isolated"),
        }
    }
}

/// Audio side-channel control action
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AudioAction {
    Start,
    Stop,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_summary_camel_case() {
        let summary = SessionSummary {
            name: "dev".into(),
            attached: true,
            created: DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
            windows: 3,
            dimensions: "120x40".into(),
        };

        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["name"], "dev");
        assert_eq!(json["attached"], true);
        assert_eq!(json["windows"], 3);
        assert_eq!(json["dimensions"], "120x40");
    }

    #[test]
    fn test_attach_mode_wire_spelling() {
        assert_eq!(
            serde_json::to_string(&AttachMode::Direct).unwrap(),
            "\"direct\""
        );
        assert_eq!(
            serde_json::from_str::<AttachMode>("\"isolated\"").unwrap(),
            AttachMode::Isolated
        );
    }

    #[test]
    fn test_audio_action_wire_spelling() {
        assert_eq!(
            serde_json::from_str::<AudioAction>("\"start\"").unwrap(),
            AudioAction::Start
        );
        assert_eq!(
            serde_json::to_string(&AudioAction::Stop).unwrap(),
            "\"stop\""
        );
    }

    #[test]
    fn test_window_info_roundtrip() {
        let window = WindowInfo {
            index: 1,
            name: "editor".into(),
            active: false,
            panes: 2,
        };
        let json = serde_json::to_string(&window).unwrap();
        let back: WindowInfo = serde_json::from_str(&json).unwrap();
        assert_eq!(back, window);
    }
}
