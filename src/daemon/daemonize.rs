// Detaching the daemon from its controlling terminal

use crate::error::{OverseerError, Result};

/// Detach into the background with the classic double fork
///
/// Must run before any threads exist, so before the async runtime is built.
#[cfg(unix)]
pub fn daemonize() -> Result<()> {
    use nix::unistd::setsid;

    fork_and_exit_parent("first")?;
    setsid().map_err(|e| OverseerError::Other(format!("setsid failed: {}", e)))?;
    // A second fork gives up session leadership, so no terminal can be acquired again
    fork_and_exit_parent("second")?;

    std::env::set_current_dir("/")
        .map_err(|e| OverseerError::Other(format!("Failed to change directory to /: {}", e)))?;

    redirect_stdio()
}

#[cfg(unix)]
fn fork_and_exit_parent(which: &str) -> Result<()> {
    use nix::unistd::{fork, ForkResult};

    // SAFETY: called while the process is still single-threaded
    match unsafe { fork() } {
        Ok(ForkResult::Parent { .. }) => std::process::exit(0),
        Ok(ForkResult::Child) => Ok(()),
        Err(e) => Err(OverseerError::Other(format!("{} fork failed: {}", which, e))),
    }
}

#[cfg(unix)]
fn redirect_stdio() -> Result<()> {
    use nix::unistd::dup2;
    use std::fs::OpenOptions;
    use std::os::unix::io::AsRawFd;

    let devnull = OpenOptions::new()
        .read(true)
        .write(true)
        .open("/dev/null")
        .map_err(|e| OverseerError::Other(format!("Failed to open /dev/null: {}", e)))?;

    for fd in [libc::STDIN_FILENO, libc::STDOUT_FILENO, libc::STDERR_FILENO] {
        dup2(devnull.as_raw_fd(), fd)
            .map_err(|e| OverseerError::Other(format!("Failed to redirect fd {}: {}", fd, e)))?;
    }

    Ok(())
}

#[cfg(not(unix))]
pub fn daemonize() -> Result<()> {
    Err(OverseerError::Other(
        "Daemonization is only supported on Unix systems".to_string(),
    ))
}
