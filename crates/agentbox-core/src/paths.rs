//! File system paths for the daemon.

use crate::{CoreError, CoreResult};
use std::path::PathBuf;

/// Control socket filename under the runtime directory.
const CONTROL_SOCKET_NAME: &str = "agentboxd.sock";
/// SSH listener socket filename under the runtime directory.
const SSH_SOCKET_NAME: &str = "ssh.sock";

/// Manages file system paths for the daemon.
#[derive(Debug, Clone)]
pub struct Paths {
    /// Runtime directory for sockets ($XDG_RUNTIME_DIR/agentboxd).
    runtime_dir: PathBuf,
    /// Configuration directory (~/.config/agentbox).
    config_dir: PathBuf,
}

impl Paths {
    /// Create a new Paths instance.
    ///
    /// Sockets live under `$XDG_RUNTIME_DIR/agentboxd` (falling back to
    /// `/run/user/<uid>/agentboxd`); configuration under
    /// `~/.config/agentbox`.
    pub fn new() -> CoreResult<Self> {
        let runtime_base = match std::env::var_os("XDG_RUNTIME_DIR") {
            Some(dir) => PathBuf::from(dir),
            None => {
                let uid = unsafe { libc::getuid() };
                PathBuf::from(format!("/run/user/{uid}"))
            }
        };

        let config_base = dirs::config_dir()
            .ok_or_else(|| CoreError::Path("Could not determine config directory".to_string()))?;

        Ok(Self {
            runtime_dir: runtime_base.join("agentboxd"),
            config_dir: config_base.join("agentbox"),
        })
    }

    /// Create a Paths instance rooted at a custom directory (tests).
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self {
            runtime_dir: base_dir.clone(),
            config_dir: base_dir,
        }
    }

    /// Runtime directory holding both sockets.
    pub fn runtime_dir(&self) -> &PathBuf {
        &self.runtime_dir
    }

    /// Local control socket path (agentboxd.sock).
    pub fn control_socket(&self) -> PathBuf {
        self.runtime_dir.join(CONTROL_SOCKET_NAME)
    }

    /// SSH listener socket path (ssh.sock).
    pub fn ssh_socket(&self) -> PathBuf {
        self.runtime_dir.join(SSH_SOCKET_NAME)
    }

    /// Config file path (~/.config/agentbox/config.json).
    pub fn config_file(&self) -> PathBuf {
        self.config_dir.join("config.json")
    }

    /// Library directory holding mcp/ and skills/ entries.
    pub fn library_dir(&self) -> PathBuf {
        self.config_dir.join("library")
    }

    /// Log directory (~/.config/agentbox/logs).
    pub fn logs_dir(&self) -> PathBuf {
        self.config_dir.join("logs")
    }

    /// Daemon log file path.
    pub fn daemon_log_file(&self) -> PathBuf {
        self.logs_dir().join("agentboxd.log")
    }

    /// Ensure the runtime directory exists.
    pub fn ensure_dirs(&self) -> CoreResult<()> {
        std::fs::create_dir_all(&self.runtime_dir)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn paths_with_base_dir() {
        let base = PathBuf::from("/tmp/test-agentbox");
        let paths = Paths::with_base_dir(base.clone());

        assert_eq!(paths.control_socket(), base.join("agentboxd.sock"));
        assert_eq!(paths.ssh_socket(), base.join("ssh.sock"));
        assert_eq!(paths.config_file(), base.join("config.json"));
        assert_eq!(paths.library_dir(), base.join("library"));
        assert_eq!(paths.daemon_log_file(), base.join("logs/agentboxd.log"));
    }

    #[test]
    fn ensure_dirs_is_idempotent() {
        let dir = tempdir().unwrap();
        let paths = Paths::with_base_dir(dir.path().join("runtime"));

        paths.ensure_dirs().unwrap();
        paths.ensure_dirs().unwrap();

        assert!(paths.runtime_dir().is_dir());
    }
}
