// PID files and liveness checks for supervised processes

use crate::error::{OverseerError, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// A pid file written by a supervised program (or by the daemon itself)
#[derive(Debug, Clone)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    pub fn with_path<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Write the current process PID to the file
    pub fn write_current(&self) -> Result<()> {
        self.write(std::process::id())
    }

    pub fn write(&self, pid: u32) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, pid.to_string())?;
        Ok(())
    }

    /// Read the PID from the file
    pub fn read(&self) -> Result<u32> {
        let content = fs::read_to_string(&self.path).map_err(|e| {
            OverseerError::Other(format!(
                "Failed to read PID file {}: {}",
                self.path.display(),
                e
            ))
        })?;

        content.trim().parse::<u32>().map_err(|e| {
            OverseerError::Other(format!(
                "Invalid PID in file {}: {}",
                self.path.display(),
                e
            ))
        })
    }

    /// Read the PID if the file exists and names a live process
    pub fn live_pid(&self) -> Option<u32> {
        self.read().ok().filter(|pid| is_alive(*pid))
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    pub fn remove(&self) -> Result<()> {
        if self.exists() {
            fs::remove_file(&self.path)?;
        }
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Check if a process with the given PID exists
#[cfg(unix)]
pub fn is_alive(pid: u32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    if pid == 0 {
        return false;
    }

    // Signal 0 performs the permission and existence checks only
    match kill(Pid::from_raw(pid as i32), None) {
        Ok(_) => true,
        Err(nix::errno::Errno::ESRCH) => false,
        Err(nix::errno::Errno::EPERM) => true,
        Err(_) => false,
    }
}

#[cfg(not(unix))]
pub fn is_alive(_pid: u32) -> bool {
    false
}
