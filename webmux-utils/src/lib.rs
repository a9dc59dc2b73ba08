//! webmux-utils: Shared infrastructure for the webmux workspace
//!
//! Provides the unified error type, logging bootstrap and filesystem
//! path helpers used by the server and protocol crates.

pub mod error;
pub mod logging;
pub mod paths;

pub use error::{Result, WebmuxError};
pub use logging::{init_logging, init_logging_with_config, LogConfig, LogOutput};
