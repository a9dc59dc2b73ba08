//! PTY handle wrapper for portable-pty

use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};

use webmux_utils::{Result, WebmuxError};

/// Configuration for spawning a PTY
#[derive(Debug, Clone)]
pub struct PtyLaunch {
    /// Command to execute
    pub command: String,
    /// Arguments to the command
    pub args: Vec<String>,
    /// Working directory
    pub cwd: Option<PathBuf>,
    /// Environment variables to set
    pub env: HashMap<String, String>,
    /// Initial terminal size (cols, rows)
    pub size: (u16, u16),
}

impl PtyLaunch {
    /// Create a launch config for a specific command
    pub fn command(cmd: impl Into<String>) -> Self {
        Self {
            command: cmd.into(),
            args: Vec::new(),
            cwd: None,
            env: HashMap::new(),
            size: (80, 24),
        }
    }

    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_size(mut self, cols: u16, rows: u16) -> Self {
        self.size = (cols, rows);
        self
    }
}

/// Handle to a running PTY
pub struct PtyHandle {
    /// The master side of the PTY
    master: Arc<Mutex<Box<dyn MasterPty + Send>>>,
    /// The child process
    child: Arc<Mutex<Box<dyn Child + Send + Sync>>>,
    /// Reader for PTY output
    reader: Arc<Mutex<Box<dyn Read + Send>>>,
    /// Writer for PTY input
    writer: Arc<Mutex<Box<dyn Write + Send>>>,
}

impl PtyHandle {
    /// Open a PTY pair and spawn the configured command inside it
    pub fn spawn(launch: PtyLaunch) -> Result<Self> {
        let pty_system = native_pty_system();

        let pair = pty_system
            .openpty(PtySize {
                rows: launch.size.1,
                cols: launch.size.0,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| WebmuxError::pty(format!("Failed to open PTY: {}", e)))?;

        let mut cmd = CommandBuilder::new(&launch.command);
        cmd.args(&launch.args);
        if let Some(cwd) = &launch.cwd {
            cmd.cwd(cwd);
        }
        for (key, value) in &launch.env {
            cmd.env(key, value);
        }

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| WebmuxError::ProcessSpawn(format!("Failed to spawn: {}", e)))?;

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| WebmuxError::pty(format!("Failed to clone reader: {}", e)))?;

        let writer = pair
            .master
            .take_writer()
            .map_err(|e| WebmuxError::pty(format!("Failed to get writer: {}", e)))?;

        Ok(Self {
            master: Arc::new(Mutex::new(pair.master)),
            child: Arc::new(Mutex::new(child)),
            reader: Arc::new(Mutex::new(reader)),
            writer: Arc::new(Mutex::new(writer)),
        })
    }

    /// Write all data to the PTY (input to the child process)
    pub fn write_all(&self, data: &[u8]) -> Result<()> {
        let mut writer = self.writer.lock();
        writer
            .write_all(data)
            .and_then(|_| writer.flush())
            .map_err(|e| WebmuxError::pty(format!("Write failed: {}", e)))
    }

    /// Read data from the PTY (output from the child process)
    pub fn read(&self, buf: &mut [u8]) -> Result<usize> {
        let mut reader = self.reader.lock();
        reader
            .read(buf)
            .map_err(|e| WebmuxError::pty(format!("Read failed: {}", e)))
    }

    /// Resize the PTY
    pub fn resize(&self, cols: u16, rows: u16) -> Result<()> {
        let master = self.master.lock();
        master
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| WebmuxError::pty(format!("Resize failed: {}", e)))
    }

    /// Check if the child process has exited
    pub fn try_wait(&self) -> Result<Option<i32>> {
        let mut child = self.child.lock();
        match child.try_wait() {
            Ok(Some(status)) => Ok(Some(status.exit_code() as i32)),
            Ok(None) => Ok(None),
            Err(e) => Err(WebmuxError::pty(format!("Wait failed: {}", e))),
        }
    }

    /// Kill the child process
    pub fn kill(&self) -> Result<()> {
        let mut child = self.child.lock();
        child
            .kill()
            .map_err(|e| WebmuxError::pty(format!("Kill failed: {}", e)))
    }

    /// Get a shared reference to the reader (for the output pump)
    pub fn clone_reader(&self) -> Arc<Mutex<Box<dyn Read + Send>>> {
        self.reader.clone()
    }
}

impl std::fmt::Debug for PtyHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PtyHandle").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_launch_builder() {
        let launch = PtyLaunch::command("tmux")
            .with_arg("attach-session")
            .with_arg("-t")
            .with_arg("dev")
            .with_env("TERM", "xterm-256color")
            .with_size(120, 40);

        assert_eq!(launch.command, "tmux");
        assert_eq!(launch.args, vec!["attach-session", "-t", "dev"]);
        assert_eq!(launch.env.get("TERM"), Some(&"xterm-256color".to_string()));
        assert_eq!(launch.size, (120, 40));
    }

    #[test]
    fn test_spawn_echo() {
        let handle = PtyHandle::spawn(PtyLaunch::command("echo").with_arg("hello")).unwrap();

        // Give the process a moment, then the exit should be observable
        std::thread::sleep(std::time::Duration::from_millis(200));
        let status = handle.try_wait().unwrap();
        assert!(status.is_some());
    }

    #[test]
    fn test_write_read_roundtrip() {
        let handle = PtyHandle::spawn(PtyLaunch::command("cat")).unwrap();

        handle.write_all(b"ping\n").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(200));

        let mut buf = [0u8; 1024];
        let n = handle.read(&mut buf).unwrap();
        assert!(n > 0);

        handle.kill().unwrap();
    }

    #[test]
    fn test_resize() {
        let handle = PtyHandle::spawn(PtyLaunch::command("cat")).unwrap();
        assert!(handle.resize(100, 30).is_ok());
        handle.kill().unwrap();
    }

    #[test]
    fn test_write_order_preserved() {
        let handle = PtyHandle::spawn(PtyLaunch::command("cat")).unwrap();

        handle.write_all(b"first-marker\n").unwrap();
        handle.write_all(b"second-marker\n").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(300));

        let mut collected = Vec::new();
        let mut buf = [0u8; 4096];
        while collected.len() < 20_000 {
            match handle.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    collected.extend_from_slice(&buf[..n]);
                    let text = String::from_utf8_lossy(&collected);
                    if text.matches("second-marker").count() >= 1
                        && text.matches("first-marker").count() >= 1
                    {
                        break;
                    }
                }
                Err(_) => break,
            }
        }

        let text = String::from_utf8_lossy(&collected);
        let first = text.find("first-marker").expect("first write missing");
        let second = text.find("second-marker").expect("second write missing");
        assert!(first < second, "writes were reordered: {}", text);

        handle.kill().unwrap();
    }
}
