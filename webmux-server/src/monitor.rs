//! Multiplexer state synchronizer
//!
//! Polls the global session/window topology on a fixed interval, diffs it
//! against the previous snapshot by value, and fans typed change events out
//! to every connected client. Gateway mutation handlers inject their own
//! events through a channel so other clients hear about changes without
//! waiting for the next poll cycle.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use webmux_protocol::{ServerMessage, SessionSummary, TopologyEvent, WindowInfo};

use crate::config::MonitorConfig;
use crate::registry::ClientRegistry;
use crate::session::SessionEngine;
use crate::tmux::TmuxAdapter;

/// Value snapshot of the observable topology
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TopologySnapshot {
    pub sessions: Vec<SessionSummary>,
    /// Window lists, tracked only for sessions with attached clients
    pub windows: BTreeMap<String, Vec<WindowInfo>>,
}

/// Handle for stopping the monitor task
#[derive(Debug)]
pub struct MonitorHandle {
    cancel_token: CancellationToken,
    join_handle: JoinHandle<()>,
}

impl MonitorHandle {
    pub async fn stop(self) {
        self.cancel_token.cancel();
        let _ = self.join_handle.await;
    }
}

/// Background synchronizer for the session/window topology
pub struct TopologyMonitor {
    registry: Arc<ClientRegistry>,
    engine: Arc<SessionEngine>,
    adapter: Arc<TmuxAdapter>,
    config: MonitorConfig,
}

impl TopologyMonitor {
    /// Spawn the monitor; returns a stop handle and the event injection sender
    pub fn spawn(
        registry: Arc<ClientRegistry>,
        engine: Arc<SessionEngine>,
        adapter: Arc<TmuxAdapter>,
        config: MonitorConfig,
    ) -> (MonitorHandle, mpsc::Sender<TopologyEvent>) {
        let (event_tx, event_rx) = mpsc::channel(64);
        let cancel_token = CancellationToken::new();

        let monitor = Self {
            registry,
            engine,
            adapter,
            config,
        };
        let join_handle = tokio::spawn(monitor.run(event_rx, cancel_token.clone()));

        (
            MonitorHandle {
                cancel_token,
                join_handle,
            },
            event_tx,
        )
    }

    async fn run(self, mut event_rx: mpsc::Receiver<TopologyEvent>, cancel_token: CancellationToken) {
        info!("Topology monitor started");

        let mut ticker = interval(self.config.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut last = TopologySnapshot::default();

        loop {
            tokio::select! {
                _ = cancel_token.cancelled() => {
                    info!("Topology monitor stopped");
                    return;
                }

                Some(event) = event_rx.recv() => {
                    // A gateway mutation already happened; tell everyone now
                    // and quietly resync so the next poll does not repeat it
                    self.registry
                        .broadcast_to_all(ServerMessage::TmuxUpdate { event });
                    match self.collect().await {
                        Ok(snapshot) => last = snapshot,
                        Err(e) => debug!(error = %e, "Post-mutation resync failed"),
                    }
                }

                _ = ticker.tick() => {
                    match self.collect().await {
                        Ok(snapshot) => {
                            let events = diff_topology(&last, &snapshot);
                            for event in &events {
                                self.registry.broadcast_to_all(ServerMessage::TmuxUpdate {
                                    event: event.clone(),
                                });
                            }
                            if last.sessions != snapshot.sessions {
                                self.registry.broadcast_to_all(ServerMessage::SessionsList {
                                    sessions: snapshot.sessions.clone(),
                                });
                            }
                            if !events.is_empty() {
                                debug!(count = events.len(), "Topology changed");
                            }
                            last = snapshot;
                        }
                        Err(e) => {
                            // Never fatal; retried next cycle
                            warn!(error = %e, "Topology poll failed");
                        }
                    }
                }
            }
        }
    }

    /// Query the current topology
    ///
    /// Window lists are fetched only for sessions somebody is watching.
    async fn collect(&self) -> webmux_utils::Result<TopologySnapshot> {
        let sessions = self.adapter.list_sessions().await?;

        let mut windows = BTreeMap::new();
        for name in self.engine.attached_session_names() {
            if !sessions.iter().any(|s| s.name == name) {
                continue;
            }
            match self.adapter.list_windows(&name).await {
                Ok(list) => {
                    windows.insert(name, list);
                }
                Err(e) => {
                    debug!(session = %name, error = %e, "Window list failed");
                }
            }
        }

        Ok(TopologySnapshot { sessions, windows })
    }
}

/// Compute typed change events between two snapshots
///
/// Comparison is by value, so a no-op cycle yields no events. Session
/// renames are not inferred here (indistinguishable from kill+create);
/// they arrive through the gateway echo path instead.
pub fn diff_topology(prev: &TopologySnapshot, next: &TopologySnapshot) -> Vec<TopologyEvent> {
    let mut events = Vec::new();

    for session in &next.sessions {
        if !prev.sessions.iter().any(|s| s.name == session.name) {
            events.push(TopologyEvent::SessionAdded {
                session_name: session.name.clone(),
            });
        }
    }
    for session in &prev.sessions {
        if !next.sessions.iter().any(|s| s.name == session.name) {
            events.push(TopologyEvent::SessionRemoved {
                session_name: session.name.clone(),
            });
        }
    }

    for (name, next_windows) in &next.windows {
        let Some(prev_windows) = prev.windows.get(name) else {
            continue;
        };
        if prev_windows == next_windows {
            continue;
        }

        for window in next_windows {
            match prev_windows.iter().find(|w| w.index == window.index) {
                None => {
                    events.push(TopologyEvent::WindowAdded {
                        session_name: name.clone(),
                        window_index: window.index,
                    });
                }
                Some(previous) => {
                    if previous.name != window.name {
                        events.push(TopologyEvent::WindowRenamed {
                            session_name: name.clone(),
                            window_index: window.index,
                            window_name: window.name.clone(),
                        });
                    }
                    if window.active && !previous.active {
                        events.push(TopologyEvent::WindowSelected {
                            session_name: name.clone(),
                            window_index: window.index,
                        });
                    }
                }
            }
        }
        for window in prev_windows {
            if !next_windows.iter().any(|w| w.index == window.index) {
                events.push(TopologyEvent::WindowRemoved {
                    session_name: name.clone(),
                    window_index: window.index,
                });
            }
        }
    }

    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn summary(name: &str) -> SessionSummary {
        SessionSummary {
            name: name.into(),
            attached: false,
            created: Utc::now(),
            windows: 1,
            dimensions: "80x24".into(),
        }
    }

    fn window(index: u32, name: &str, active: bool) -> WindowInfo {
        WindowInfo {
            index,
            name: name.into(),
            active,
            panes: 1,
        }
    }

    #[test]
    fn test_diff_identical_snapshots_no_events() {
        let snapshot = TopologySnapshot {
            sessions: vec![summary("dev")],
            windows: BTreeMap::from([(
                "dev".to_string(),
                vec![window(0, "shell", true), window(1, "editor", false)],
            )]),
        };
        assert!(diff_topology(&snapshot, &snapshot.clone()).is_empty());
    }

    #[test]
    fn test_diff_session_added_and_removed() {
        let prev = TopologySnapshot {
            sessions: vec![summary("old")],
            windows: BTreeMap::new(),
        };
        let next = TopologySnapshot {
            sessions: vec![summary("new")],
            windows: BTreeMap::new(),
        };

        let events = diff_topology(&prev, &next);
        assert!(events.contains(&TopologyEvent::SessionAdded {
            session_name: "new".into()
        }));
        assert!(events.contains(&TopologyEvent::SessionRemoved {
            session_name: "old".into()
        }));
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn test_diff_window_rename() {
        let prev = TopologySnapshot {
            sessions: vec![summary("dev")],
            windows: BTreeMap::from([("dev".to_string(), vec![window(0, "shell", true)])]),
        };
        let next = TopologySnapshot {
            sessions: vec![summary("dev")],
            windows: BTreeMap::from([("dev".to_string(), vec![window(0, "work", true)])]),
        };

        let events = diff_topology(&prev, &next);
        assert_eq!(
            events,
            vec![TopologyEvent::WindowRenamed {
                session_name: "dev".into(),
                window_index: 0,
                window_name: "work".into(),
            }]
        );
    }

    #[test]
    fn test_diff_window_added_removed() {
        let prev = TopologySnapshot {
            sessions: vec![summary("dev")],
            windows: BTreeMap::from([("dev".to_string(), vec![window(0, "shell", true)])]),
        };
        let next = TopologySnapshot {
            sessions: vec![summary("dev")],
            windows: BTreeMap::from([(
                "dev".to_string(),
                vec![window(1, "editor", true)],
            )]),
        };

        let events = diff_topology(&prev, &next);
        assert!(events.contains(&TopologyEvent::WindowAdded {
            session_name: "dev".into(),
            window_index: 1,
        }));
        assert!(events.contains(&TopologyEvent::WindowRemoved {
            session_name: "dev".into(),
            window_index: 0,
        }));
    }

    #[test]
    fn test_diff_window_selected() {
        let prev = TopologySnapshot {
            sessions: vec![summary("dev")],
            windows: BTreeMap::from([(
                "dev".to_string(),
                vec![window(0, "shell", true), window(1, "editor", false)],
            )]),
        };
        let next = TopologySnapshot {
            sessions: vec![summary("dev")],
            windows: BTreeMap::from([(
                "dev".to_string(),
                vec![window(0, "shell", false), window(1, "editor", true)],
            )]),
        };

        let events = diff_topology(&prev, &next);
        assert_eq!(
            events,
            vec![TopologyEvent::WindowSelected {
                session_name: "dev".into(),
                window_index: 1,
            }]
        );
    }

    #[test]
    fn test_diff_new_session_windows_not_doubled() {
        // A session that just appeared reports SessionAdded only; its
        // windows have no previous value to diff against
        let prev = TopologySnapshot::default();
        let next = TopologySnapshot {
            sessions: vec![summary("dev")],
            windows: BTreeMap::from([("dev".to_string(), vec![window(0, "shell", true)])]),
        };

        let events = diff_topology(&prev, &next);
        assert_eq!(
            events,
            vec![TopologyEvent::SessionAdded {
                session_name: "dev".into()
            }]
        );
    }
}
