use crate::config::ProcessConfig;
use crate::error::{OverseerError, Result};
use crate::process::control::ProcessControl;
use crate::process::pid::{self, PidFile};
use async_trait::async_trait;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::process::Stdio;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::process::{Child, Command};
use tracing::{debug, info};

/// Upper bound for one-shot stop/restart commands
const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// A program driven through `sh -c` with its configured commands.
///
/// The PID comes from the configured pid file when the program maintains one,
/// otherwise from the child spawned by the start command.
pub struct CommandProcess {
    config: ProcessConfig,
    pid_file: Option<PidFile>,
    child: Mutex<Option<Child>>,
}

impl CommandProcess {
    pub fn new(config: ProcessConfig) -> Self {
        let pid_file = config.pid_file.as_ref().map(PidFile::with_path);
        Self {
            config,
            pid_file,
            child: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    fn child(&self) -> MutexGuard<'_, Option<Child>> {
        self.child.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Build a shell command honoring the working directory and environment
    fn shell(&self, script: &str) -> Command {
        let mut command = Command::new("/bin/sh");
        command.arg("-c").arg(script);

        if let Some(ref cwd) = self.config.cwd {
            command.current_dir(cwd);
        }

        if !self.config.env.is_empty() {
            command.envs(&self.config.env);
        }

        command.stdin(Stdio::null());
        command.stdout(Stdio::null());
        command.stderr(Stdio::null());
        command
    }

    /// Spawn `script` and keep its handle as the tracked child
    fn spawn_tracked(&self, script: &str) -> Result<u32> {
        let child = self.shell(script).spawn().map_err(|e| {
            OverseerError::SpawnFailure(self.config.name.clone(), e.to_string())
        })?;

        let pid = child.id().ok_or_else(|| {
            OverseerError::SpawnFailure(
                self.config.name.clone(),
                "Failed to get PID".to_string(),
            )
        })?;

        *self.child() = Some(child);
        Ok(pid)
    }

    /// Run a one-shot command and wait for it to finish
    async fn run_to_completion(&self, script: &str) -> Result<()> {
        let mut child = self.shell(script).spawn().map_err(|e| {
            OverseerError::StopError(self.config.name.clone(), e.to_string())
        })?;

        match tokio::time::timeout(COMMAND_TIMEOUT, child.wait()).await {
            Ok(Ok(status)) if status.success() => Ok(()),
            Ok(Ok(status)) => Err(OverseerError::StopError(
                self.config.name.clone(),
                format!("'{}' exited with {}", script, status),
            )),
            Ok(Err(e)) => Err(OverseerError::StopError(
                self.config.name.clone(),
                format!("Wait failed: {}", e),
            )),
            Err(_) => {
                let _ = child.kill().await;
                Err(OverseerError::StopError(
                    self.config.name.clone(),
                    format!("'{}' did not finish within {:?}", script, COMMAND_TIMEOUT),
                ))
            }
        }
    }

    /// Collect the tracked child's exit status so it does not linger as a zombie
    fn reap(&self) {
        let mut guard = self.child();
        if let Some(child) = guard.as_mut() {
            if let Ok(Some(status)) = child.try_wait() {
                debug!("Process {} exited with {}", self.config.name, status);
                *guard = None;
            }
        }
    }

    fn tracked_pid(&self) -> Option<u32> {
        self.child().as_ref().and_then(|c| c.id())
    }

    fn parse_signal(signal_name: &str) -> Result<Signal> {
        match signal_name {
            "SIGTERM" => Ok(Signal::SIGTERM),
            "SIGINT" => Ok(Signal::SIGINT),
            "SIGQUIT" => Ok(Signal::SIGQUIT),
            "SIGKILL" => Ok(Signal::SIGKILL),
            "SIGHUP" => Ok(Signal::SIGHUP),
            "SIGUSR1" => Ok(Signal::SIGUSR1),
            "SIGUSR2" => Ok(Signal::SIGUSR2),
            _ => Err(OverseerError::SignalError(format!(
                "Invalid signal name: {}",
                signal_name
            ))),
        }
    }
}

#[async_trait]
impl ProcessControl for CommandProcess {
    async fn start(&self) -> Result<u32> {
        info!("Starting process {}: {}", self.config.name, self.config.start);
        self.spawn_tracked(&self.config.start)
    }

    async fn stop(&self) -> Result<()> {
        if let Some(ref script) = self.config.stop {
            info!("Stopping process {}: {}", self.config.name, script);
            self.run_to_completion(script).await?;
        } else if let Some(pid) = self.pid() {
            let stop_signal = Self::parse_signal(&self.config.stop_signal)?;
            info!(
                "Stopping process {} (PID: {}) with {}",
                self.config.name, pid, self.config.stop_signal
            );
            signal::kill(Pid::from_raw(pid as i32), stop_signal).map_err(|e| {
                OverseerError::StopError(
                    self.config.name.clone(),
                    format!("Failed to send {}: {}", self.config.stop_signal, e),
                )
            })?;
        }

        self.reap();
        Ok(())
    }

    async fn restart(&self) -> Result<u32> {
        let script = self.config.restart.as_deref().ok_or_else(|| {
            OverseerError::ConfigError(format!(
                "No restart command configured for {}",
                self.config.name
            ))
        })?;

        info!("Restarting process {}: {}", self.config.name, script);

        match self.pid_file {
            Some(ref pid_file) => {
                self.run_to_completion(script).await?;
                pid_file.read()
            }
            None => self.spawn_tracked(script),
        }
    }

    fn is_running(&self) -> bool {
        self.reap();
        self.pid().is_some()
    }

    fn pid(&self) -> Option<u32> {
        self.pid_file
            .as_ref()
            .and_then(|f| f.live_pid())
            .or_else(|| self.tracked_pid().filter(|p| pid::is_alive(*p)))
    }
}
