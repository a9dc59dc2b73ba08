//! Server configuration
//!
//! Loaded from `~/.config/webmux/config.toml`; every section and field has a
//! default so a missing file yields a working configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use webmux_protocol::AttachMode;
use webmux_utils::{paths, Result, WebmuxError};

/// Root configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub attachment: AttachmentConfig,
    pub pipeline: PipelineConfig,
    pub monitor: MonitorConfig,
    pub tmux: TmuxConfig,
}

/// Network listener settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address for the WebSocket listener
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8090".into(),
        }
    }
}

/// Session attachment settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AttachmentConfig {
    /// Strategy used when attach-session does not name one
    pub default_mode: AttachMode,
    /// How long a session with no clients survives before reclaim (seconds)
    pub grace_period_secs: u64,
    /// Pane capture cadence for isolated sessions (milliseconds)
    pub capture_interval_ms: u64,
    /// Delay between consecutive key-injection calls (milliseconds)
    pub send_keys_delay_ms: u64,
}

impl Default for AttachmentConfig {
    fn default() -> Self {
        Self {
            default_mode: AttachMode::Isolated,
            grace_period_secs: 5,
            capture_interval_ms: 100,
            send_keys_delay_ms: 10,
        }
    }
}

impl AttachmentConfig {
    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }

    pub fn capture_interval(&self) -> Duration {
        Duration::from_millis(self.capture_interval_ms)
    }

    pub fn send_keys_delay(&self) -> Duration {
        Duration::from_millis(self.send_keys_delay_ms)
    }
}

/// Output pipeline settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Chunk ceiling for output frames (bytes)
    pub chunk_max_bytes: usize,
    /// Quiescence timer before a partial chunk is flushed (milliseconds)
    pub flush_timeout_ms: u64,
    /// Per-client output buffer capacity (frames)
    pub client_buffer_frames: usize,
    /// Backpressure release point, as a percentage of capacity
    pub low_water_percent: u8,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            chunk_max_bytes: 32 * 1024,
            flush_timeout_ms: 5,
            client_buffer_frames: 256,
            low_water_percent: 25,
        }
    }
}

impl PipelineConfig {
    pub fn flush_timeout(&self) -> Duration {
        Duration::from_millis(self.flush_timeout_ms)
    }

    /// Occupancy (in frames) at or below which backpressure is released
    pub fn low_water_frames(&self) -> usize {
        self.client_buffer_frames * usize::from(self.low_water_percent) / 100
    }
}

/// Topology synchronizer settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Poll interval for the global session/window topology (milliseconds)
    pub poll_interval_ms: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
        }
    }
}

impl MonitorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// External multiplexer settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TmuxConfig {
    /// Multiplexer binary to invoke
    pub command: String,
    /// Bound on every control-surface call (seconds)
    pub timeout_secs: u64,
}

impl Default for TmuxConfig {
    fn default() -> Self {
        Self {
            command: "tmux".into(),
            timeout_secs: 5,
        }
    }
}

impl TmuxConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl AppConfig {
    /// Load configuration from the default location
    ///
    /// A missing file yields the defaults; a malformed file is an error.
    pub fn load() -> Result<Self> {
        Self::from_path(&paths::config_file())
    }

    /// Load configuration from a specific path
    pub fn from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path)?;
        toml::from_str(&contents).map_err(|e| WebmuxError::ConfigInvalid {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.server.bind, "127.0.0.1:8090");
        assert_eq!(config.attachment.default_mode, AttachMode::Isolated);
        assert_eq!(config.pipeline.chunk_max_bytes, 32 * 1024);
        assert_eq!(config.pipeline.client_buffer_frames, 256);
        assert_eq!(config.monitor.poll_interval(), Duration::from_secs(1));
        assert_eq!(config.tmux.command, "tmux");
    }

    #[test]
    fn test_low_water_frames() {
        let pipeline = PipelineConfig::default();
        assert_eq!(pipeline.low_water_frames(), 64);

        let pipeline = PipelineConfig {
            client_buffer_frames: 10,
            low_water_percent: 25,
            ..PipelineConfig::default()
        };
        assert_eq!(pipeline.low_water_frames(), 2);
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let config = AppConfig::from_path(Path::new("/nonexistent/webmux.toml")).unwrap();
        assert_eq!(config.server.bind, "127.0.0.1:8090");
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[server]\nbind = \"0.0.0.0:9000\"\n\n[attachment]\ndefault_mode = \"direct\""
        )
        .unwrap();

        let config = AppConfig::from_path(file.path()).unwrap();
        assert_eq!(config.server.bind, "0.0.0.0:9000");
        assert_eq!(config.attachment.default_mode, AttachMode::Direct);
        // Untouched sections keep their defaults
        assert_eq!(config.pipeline.chunk_max_bytes, 32 * 1024);
    }

    #[test]
    fn test_malformed_file_is_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[server\nbind = ").unwrap();

        let result = AppConfig::from_path(file.path());
        assert!(matches!(result, Err(WebmuxError::ConfigInvalid { .. })));
    }
}
