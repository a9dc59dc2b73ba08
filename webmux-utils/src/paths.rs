//! Filesystem path helpers for webmux
//!
//! All webmux state lives under the platform config/data directories.

use std::path::PathBuf;

const APP_DIR: &str = "webmux";

/// Configuration directory (`~/.config/webmux` on Linux)
pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}

/// Path of the server configuration file
pub fn config_file() -> PathBuf {
    config_dir().join("config.toml")
}

/// Directory for server log files
pub fn log_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
        .join("logs")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_file_under_config_dir() {
        let file = config_file();
        assert!(file.starts_with(config_dir()));
        assert_eq!(file.file_name().unwrap(), "config.toml");
    }

    #[test]
    fn test_dirs_end_with_app_dir() {
        assert!(config_dir().to_string_lossy().contains(APP_DIR));
        assert!(log_dir().to_string_lossy().contains(APP_DIR));
    }
}
