//! Logging infrastructure for webmux
//!
//! Provides unified logging setup using the tracing ecosystem.

use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter,
};

use crate::{paths, Result, WebmuxError};

/// Log output destination
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogOutput {
    /// Log to stderr
    Stderr,
    /// Log to a daily-rotated file in the webmux log directory
    File,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Output destination
    pub output: LogOutput,
    /// Log level filter (e.g. "info", "webmux=debug,tokio=warn")
    pub filter: String,
    /// Include file/line in logs
    pub file_line: bool,
    /// Log file name prefix when logging to a file
    pub file_name: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            output: LogOutput::Stderr,
            filter: "info".into(),
            file_line: false,
            file_name: None,
        }
    }
}

impl LogConfig {
    /// Create config for the server daemon
    ///
    /// Filter comes from WEBMUX_LOG; WEBMUX_LOG_FILE=1 switches to file output.
    pub fn server() -> Self {
        let to_file = std::env::var("WEBMUX_LOG_FILE").map(|v| v == "1").unwrap_or(false);
        Self {
            output: if to_file { LogOutput::File } else { LogOutput::Stderr },
            filter: std::env::var("WEBMUX_LOG").unwrap_or_else(|_| "info".into()),
            file_line: true,
            file_name: None,
        }
    }

    /// Create config for development (verbose stderr)
    pub fn development() -> Self {
        Self {
            output: LogOutput::Stderr,
            filter: "debug".into(),
            file_line: true,
            file_name: None,
        }
    }
}

/// Initialize logging with default configuration
pub fn init_logging() -> Result<()> {
    init_logging_with_config(LogConfig::default())
}

/// Initialize logging with custom configuration
pub fn init_logging_with_config(config: LogConfig) -> Result<()> {
    let filter = EnvFilter::try_new(&config.filter)
        .map_err(|e| WebmuxError::config(format!("Invalid log filter: {}", e)))?;

    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_file(config.file_line)
        .with_line_number(config.file_line);

    match config.output {
        LogOutput::Stderr => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt_layer.with_writer(std::io::stderr))
                .try_init()
                .map_err(|e| WebmuxError::config(format!("Failed to init logging: {}", e)))?;
        }
        LogOutput::File => {
            let dir = paths::log_dir();
            std::fs::create_dir_all(&dir)?;
            let file_name = config.file_name.as_deref().unwrap_or("webmux.log");
            let appender = tracing_appender::rolling::daily(dir, file_name);
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt_layer.with_ansi(false).with_writer(appender))
                .try_init()
                .map_err(|e| WebmuxError::config(format!("Failed to init logging: {}", e)))?;
        }
    }

    Ok(())
}
