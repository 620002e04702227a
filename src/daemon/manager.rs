// Single-instance bookkeeping for the daemon process

use crate::error::{OverseerError, Result};
use crate::process::PidFile;
use std::path::{Path, PathBuf};

/// Guards the daemon pid file so only one daemon runs per configuration
pub struct DaemonManager {
    pid_file: PidFile,
}

impl DaemonManager {
    pub fn with_pid_file<P: AsRef<Path>>(path: P) -> Self {
        Self {
            pid_file: PidFile::with_path(path),
        }
    }

    /// Pid of the running daemon, if the pid file names a live process
    pub fn running_pid(&self) -> Option<u32> {
        self.pid_file.live_pid()
    }

    pub fn is_running(&self) -> bool {
        self.running_pid().is_some()
    }

    /// Claim the pid file for the current process
    pub fn register_daemon(&self) -> Result<()> {
        if let Some(pid) = self.running_pid() {
            if pid != std::process::id() {
                return Err(OverseerError::Other(format!(
                    "Daemon is already running (pid {})",
                    pid
                )));
            }
        }

        if self.pid_file.exists() {
            self.pid_file.remove()?;
        }

        self.pid_file.write_current()
    }

    pub fn unregister_daemon(&self) -> Result<()> {
        self.pid_file.remove()
    }

    pub fn status(&self) -> DaemonStatus {
        DaemonStatus {
            pid: self.running_pid(),
            pid_file: self.pid_file.path().to_path_buf(),
        }
    }
}

/// Daemon status information
#[derive(Debug, Clone)]
pub struct DaemonStatus {
    pub pid: Option<u32>,
    pub pid_file: PathBuf,
}

impl DaemonStatus {
    pub fn running(&self) -> bool {
        self.pid.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_not_running_without_pid_file() {
        let temp_dir = TempDir::new().unwrap();
        let manager = DaemonManager::with_pid_file(temp_dir.path().join("daemon.pid"));

        assert!(!manager.is_running());
        assert!(!manager.status().running());
    }

    #[test]
    fn test_register_and_unregister() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("daemon.pid");
        let manager = DaemonManager::with_pid_file(&path);

        manager.register_daemon().unwrap();
        assert_eq!(manager.running_pid(), Some(std::process::id()));
        assert_eq!(manager.status().pid_file, path);

        manager.unregister_daemon().unwrap();
        assert!(!manager.is_running());
    }

    #[test]
    fn test_stale_pid_file_is_replaced() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("daemon.pid");
        std::fs::write(&path, "4194000").unwrap();

        let manager = DaemonManager::with_pid_file(&path);
        manager.register_daemon().unwrap();
        assert_eq!(manager.running_pid(), Some(std::process::id()));
    }

    #[test]
    fn test_refuses_second_daemon() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("daemon.pid");
        // pid 1 is always alive
        std::fs::write(&path, "1").unwrap();

        let manager = DaemonManager::with_pid_file(&path);
        assert!(manager.register_daemon().is_err());
    }
}
