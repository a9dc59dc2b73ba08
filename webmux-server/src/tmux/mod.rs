//! Process adapter for the external tmux control surface
//!
//! Stateless request/response wrapper around `tmux` subprocess invocations.
//! Every call runs under a bounded timeout; a timeout or non-zero exit is
//! surfaced as a typed error, never a panic.

use std::process::Stdio;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

use webmux_protocol::{SessionSummary, WindowInfo};
use webmux_utils::{Result, WebmuxError};

use crate::config::TmuxConfig;

const SESSION_FORMAT: &str =
    "#{session_name}:#{session_attached}:#{session_created}:#{session_windows}:#{session_width}x#{session_height}";
const WINDOW_FORMAT: &str = "#{window_index}:#{window_name}:#{window_active}:#{window_panes}";

/// One logical keystroke or literal run, ready for key injection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyEvent {
    /// Verbatim text, injected with `send-keys -l`
    Literal(String),
    /// A named key (`Enter`, `C-c`, `Up`, ...), injected without `-l`
    Named(String),
}

/// Stateless wrapper over the tmux command-line control surface
#[derive(Debug, Clone)]
pub struct TmuxAdapter {
    command: String,
    timeout: Duration,
}

impl TmuxAdapter {
    pub fn new(config: &TmuxConfig) -> Self {
        Self {
            command: config.command.clone(),
            timeout: config.timeout(),
        }
    }

    /// Run one tmux invocation and return its raw output
    async fn run(&self, args: &[&str]) -> Result<std::process::Output> {
        let label = || format!("{} {}", self.command, args.join(" "));
        debug!(command = %label(), "Running multiplexer command");

        let future = Command::new(&self.command)
            .args(args)
            .stdin(Stdio::null())
            .output();

        match timeout(self.timeout, future).await {
            Err(_) => Err(WebmuxError::SubprocessTimeout {
                command: label(),
                timeout: self.timeout,
            }),
            Ok(Err(e)) => Err(WebmuxError::ProcessSpawn(format!("{}: {}", label(), e))),
            Ok(Ok(output)) => Ok(output),
        }
    }

    /// Run one tmux invocation, requiring a zero exit, and return stdout
    async fn run_ok(&self, args: &[&str]) -> Result<String> {
        let output = self.run(args).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(WebmuxError::Subprocess {
                command: format!("{} {}", self.command, args.join(" ")),
                message: stderr,
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Make sure a tmux server exists, starting a throwaway session if not
    pub async fn ensure_server(&self) -> Result<()> {
        let check = self.run(&["list-sessions"]).await?;
        if !check.status.success() {
            debug!("No multiplexer server running, bootstrapping one");
            self.run(&["new-session", "-d", "-s", "webmux-bootstrap", "exit"])
                .await?;
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        Ok(())
    }

    /// Whether a session with the given name exists
    pub async fn has_session(&self, name: &str) -> Result<bool> {
        let output = self.run(&["has-session", "-t", name]).await?;
        Ok(output.status.success())
    }

    /// List all sessions; an absent server yields an empty list
    pub async fn list_sessions(&self) -> Result<Vec<SessionSummary>> {
        let output = self.run(&["list-sessions", "-F", SESSION_FORMAT]).await?;
        if !output.status.success() {
            return Ok(Vec::new());
        }
        Ok(parse_sessions(&String::from_utf8_lossy(&output.stdout)))
    }

    /// Create a session and return its name (auto-assigned when `name` is None)
    pub async fn create_session(&self, name: Option<&str>) -> Result<String> {
        let mut args = vec!["new-session", "-d", "-P", "-F", "#{session_name}"];
        if let Some(name) = name {
            args.push("-s");
            args.push(name);
        }
        let stdout = self.run_ok(&args).await?;
        Ok(stdout.trim().to_string())
    }

    pub async fn kill_session(&self, name: &str) -> Result<()> {
        self.run_ok(&["kill-session", "-t", name]).await?;
        Ok(())
    }

    pub async fn rename_session(&self, old_name: &str, new_name: &str) -> Result<()> {
        self.run_ok(&["rename-session", "-t", old_name, new_name])
            .await?;
        Ok(())
    }

    /// List the windows of a session
    pub async fn list_windows(&self, session: &str) -> Result<Vec<WindowInfo>> {
        let output = self
            .run(&["list-windows", "-t", session, "-F", WINDOW_FORMAT])
            .await?;
        if !output.status.success() {
            return Err(WebmuxError::SessionNotFound(session.to_string()));
        }
        Ok(parse_windows(&String::from_utf8_lossy(&output.stdout)))
    }

    pub async fn create_window(&self, session: &str, name: Option<&str>) -> Result<()> {
        let mut args = vec!["new-window", "-a", "-t", session];
        if let Some(name) = name {
            args.push("-n");
            args.push(name);
        }
        self.run_ok(&args).await?;
        Ok(())
    }

    pub async fn kill_window(&self, session: &str, index: u32) -> Result<()> {
        let target = format!("{}:{}", session, index);
        self.run_ok(&["kill-window", "-t", &target]).await?;
        Ok(())
    }

    pub async fn rename_window(&self, session: &str, index: u32, new_name: &str) -> Result<()> {
        let target = format!("{}:{}", session, index);
        self.run_ok(&["rename-window", "-t", &target, new_name])
            .await?;
        Ok(())
    }

    pub async fn select_window(&self, session: &str, index: u32) -> Result<()> {
        let target = format!("{}:{}", session, index);
        self.run_ok(&["select-window", "-t", &target]).await?;
        Ok(())
    }

    /// Capture the visible pane content of a session, escape sequences intact
    pub async fn capture_pane(&self, session: &str) -> Result<String> {
        self.run_ok(&["capture-pane", "-e", "-p", "-t", session])
            .await
    }

    /// Inject one key event into a session
    pub async fn send_key_event(&self, session: &str, event: &KeyEvent) -> Result<()> {
        match event {
            KeyEvent::Literal(text) => {
                self.run_ok(&["send-keys", "-t", session, "-l", text]).await?;
            }
            KeyEvent::Named(key) => {
                self.run_ok(&["send-keys", "-t", session, key]).await?;
            }
        }
        Ok(())
    }

    /// Resize the session's window to the requested grid
    pub async fn resize_window(&self, session: &str, cols: u16, rows: u16) -> Result<()> {
        let cols = cols.to_string();
        let rows = rows.to_string();
        self.run_ok(&["resize-window", "-t", session, "-x", &cols, "-y", &rows])
            .await?;
        Ok(())
    }
}

/// Parse `list-sessions -F` output lines
pub fn parse_sessions(stdout: &str) -> Vec<SessionSummary> {
    stdout
        .lines()
        .filter(|line| !line.is_empty())
        .filter_map(|line| {
            let parts: Vec<&str> = line.split(':').collect();
            if parts.len() < 5 {
                return None;
            }
            let created_timestamp = parts[2].parse::<i64>().ok()?;
            Some(SessionSummary {
                name: parts[0].to_string(),
                attached: parts[1] != "0",
                created: DateTime::from_timestamp(created_timestamp, 0).unwrap_or_else(Utc::now),
                windows: parts[3].parse().unwrap_or(0),
                dimensions: parts[4].to_string(),
            })
        })
        .collect()
}

/// Parse `list-windows -F` output lines
///
/// Window names may contain `:`, so the name field is everything between the
/// leading index and the trailing active/panes fields.
pub fn parse_windows(stdout: &str) -> Vec<WindowInfo> {
    stdout
        .lines()
        .filter(|line| !line.is_empty())
        .filter_map(|line| {
            let parts: Vec<&str> = line.split(':').collect();
            if parts.len() < 4 {
                return None;
            }
            let last = parts.len() - 1;
            Some(WindowInfo {
                index: parts[0].parse().ok()?,
                name: parts[1..last - 1].join(":"),
                active: parts[last - 1] == "1",
                panes: parts[last].parse().unwrap_or(1),
            })
        })
        .collect()
}

/// Translate raw input text into discrete key events
///
/// Printable runs stay together as literals; control characters and CSI
/// arrow sequences become named keys so the multiplexer interprets them.
pub fn translate_input(data: &str) -> Vec<KeyEvent> {
    let mut events = Vec::new();
    let mut literal = String::new();
    let mut chars = data.chars().peekable();

    let mut flush = |literal: &mut String, events: &mut Vec<KeyEvent>| {
        if !literal.is_empty() {
            events.push(KeyEvent::Literal(std::mem::take(literal)));
        }
    };

    while let Some(c) = chars.next() {
        let named: Option<String> = match c {
            '\r' | '\n' => Some("Enter".into()),
            '\t' => Some("Tab".into()),
            '\x7f' | '\x08' => Some("BSpace".into()),
            '\x1b' => {
                if chars.peek() == Some(&'[') {
                    chars.next();
                    match chars.next() {
                        Some('A') => Some("Up".into()),
                        Some('B') => Some("Down".into()),
                        Some('C') => Some("Right".into()),
                        Some('D') => Some("Left".into()),
                        Some(other) => {
                            // Unrecognized CSI sequence passes through verbatim
                            literal.push('\x1b');
                            literal.push('[');
                            literal.push(other);
                            None
                        }
                        None => Some("Escape".into()),
                    }
                } else {
                    Some("Escape".into())
                }
            }
            c if ('\x01'..='\x1a').contains(&c) => {
                let letter = (b'a' + (c as u8) - 1) as char;
                Some(format!("C-{}", letter))
            }
            _ => None,
        };

        match named {
            Some(key) => {
                flush(&mut literal, &mut events);
                events.push(KeyEvent::Named(key));
            }
            None => literal.push(c),
        }
    }

    flush(&mut literal, &mut events);
    events
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sessions() {
        let stdout = "dev:1:1700000000:3:120x40\nscratch:0:1700000100:1:80x24\n";
        let sessions = parse_sessions(stdout);

        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].name, "dev");
        assert!(sessions[0].attached);
        assert_eq!(sessions[0].windows, 3);
        assert_eq!(sessions[0].dimensions, "120x40");
        assert_eq!(sessions[0].created.timestamp(), 1_700_000_000);
        assert_eq!(sessions[1].name, "scratch");
        assert!(!sessions[1].attached);
    }

    #[test]
    fn test_parse_sessions_skips_malformed_lines() {
        let stdout = "dev:1:1700000000:3:120x40\ngarbage\n:::\n";
        let sessions = parse_sessions(stdout);
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].name, "dev");
    }

    #[test]
    fn test_parse_sessions_empty() {
        assert!(parse_sessions("").is_empty());
        assert!(parse_sessions("\n\n").is_empty());
    }

    #[test]
    fn test_parse_windows() {
        let stdout = "0:shell:1:2\n1:editor:0:1\n";
        let windows = parse_windows(stdout);

        assert_eq!(windows.len(), 2);
        assert_eq!(
            windows[0],
            WindowInfo {
                index: 0,
                name: "shell".into(),
                active: true,
                panes: 2,
            }
        );
        assert!(!windows[1].active);
    }

    #[test]
    fn test_parse_windows_name_with_colon() {
        let stdout = "2:build:watch:0:1\n";
        let windows = parse_windows(stdout);
        assert_eq!(windows.len(), 1);
        assert_eq!(windows[0].name, "build:watch");
        assert_eq!(windows[0].panes, 1);
    }

    #[test]
    fn test_parse_windows_skips_malformed_lines() {
        let stdout = "0:shell:1:2\nnot-a-window\n";
        assert_eq!(parse_windows(stdout).len(), 1);
    }

    #[test]
    fn test_translate_literal_run_with_enter() {
        let events = translate_input("ls\n");
        assert_eq!(
            events,
            vec![
                KeyEvent::Literal("ls".into()),
                KeyEvent::Named("Enter".into()),
            ]
        );
    }

    #[test]
    fn test_translate_arrow_keys() {
        assert_eq!(
            translate_input("\x1b[A"),
            vec![KeyEvent::Named("Up".into())]
        );
        assert_eq!(
            translate_input("\x1b[B\x1b[C\x1b[D"),
            vec![
                KeyEvent::Named("Down".into()),
                KeyEvent::Named("Right".into()),
                KeyEvent::Named("Left".into()),
            ]
        );
    }

    #[test]
    fn test_translate_control_characters() {
        assert_eq!(
            translate_input("\x03"),
            vec![KeyEvent::Named("C-c".into())]
        );
        assert_eq!(
            translate_input("\x04"),
            vec![KeyEvent::Named("C-d".into())]
        );
    }

    #[test]
    fn test_translate_lone_escape() {
        assert_eq!(
            translate_input("\x1b"),
            vec![KeyEvent::Named("Escape".into())]
        );
    }

    #[test]
    fn test_translate_backspace_and_tab() {
        assert_eq!(
            translate_input("a\x7fb\t"),
            vec![
                KeyEvent::Literal("a".into()),
                KeyEvent::Named("BSpace".into()),
                KeyEvent::Literal("b".into()),
                KeyEvent::Named("Tab".into()),
            ]
        );
    }

    #[test]
    fn test_translate_preserves_order() {
        let events = translate_input("echo hi\ncat\x03");
        assert_eq!(
            events,
            vec![
                KeyEvent::Literal("echo hi".into()),
                KeyEvent::Named("Enter".into()),
                KeyEvent::Literal("cat".into()),
                KeyEvent::Named("C-c".into()),
            ]
        );
    }

    #[test]
    fn test_translate_unknown_csi_passthrough() {
        let events = translate_input("\x1b[Z");
        assert_eq!(events, vec![KeyEvent::Literal("\x1b[Z".into())]);
    }

    #[test]
    fn test_translate_empty_input() {
        assert!(translate_input("").is_empty());
    }
}
