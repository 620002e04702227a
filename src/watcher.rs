// Watcher - reconciles observed process liveness with the monitor state

use crate::control::{Action, ControlDispatcher, MonitorState};
use crate::error::OverseerError;
use crate::process::pid::is_alive;
use crate::process::MonitorMode;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Liveness poll step when exit notifications are unavailable
const EXIT_POLL_STEP: Duration = Duration::from_millis(250);

/// What one reconciliation pass did for a process
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconcile {
    /// Monitoring is disabled or an action is in flight
    Unmonitored,
    Running,
    /// Running, and promoted from `Initializing` to `Monitored`
    Confirmed,
    /// Down, but its mode does not allow automatic recovery
    RecoverySkipped,
    Recovered,
    /// A manual action holds the process
    Busy,
    Failed(String),
}

/// Per-process exit notification tasks
///
/// Each registration resolves once its pid exits and reports the process name
/// on the channel. A pid is never registered twice.
pub struct ExitWatch {
    tasks: HashMap<String, (u32, JoinHandle<()>)>,
    tx: mpsc::UnboundedSender<String>,
}

impl ExitWatch {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tasks: HashMap::new(),
                tx,
            },
            rx,
        )
    }

    /// Watch `pid` for exit; returns false when it is already watched
    pub fn register(&mut self, name: &str, pid: u32) -> bool {
        if let Some((watched, handle)) = self.tasks.get(name) {
            if *watched == pid && !handle.is_finished() {
                return false;
            }
        }
        self.unregister(name);

        let tx = self.tx.clone();
        let owner = name.to_string();
        let handle = tokio::spawn(async move {
            wait_for_exit(pid).await;
            let _ = tx.send(owner);
        });

        debug!("Watching pid {} of process {} for exit", pid, name);
        self.tasks.insert(name.to_string(), (pid, handle));
        true
    }

    pub fn unregister(&mut self, name: &str) {
        if let Some((_, handle)) = self.tasks.remove(name) {
            handle.abort();
        }
    }

    /// Forget a registration whose task already reported
    pub fn notified(&mut self, name: &str) {
        self.tasks.remove(name);
    }

    pub fn is_watching(&self, name: &str) -> bool {
        self.tasks.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn abort_all(&mut self) {
        for (_, (_, handle)) in self.tasks.drain() {
            handle.abort();
        }
    }
}

impl Drop for ExitWatch {
    fn drop(&mut self) {
        self.abort_all();
    }
}

async fn wait_for_exit(pid: u32) {
    #[cfg(target_os = "linux")]
    {
        match wait_pidfd(pid).await {
            Ok(()) => return,
            Err(e) => debug!("pidfd unavailable for pid {} ({}), polling instead", pid, e),
        }
    }

    while is_alive(pid) {
        tokio::time::sleep(EXIT_POLL_STEP).await;
    }
}

#[cfg(target_os = "linux")]
async fn wait_pidfd(pid: u32) -> std::io::Result<()> {
    use std::os::fd::{FromRawFd, OwnedFd, RawFd};
    use tokio::io::unix::AsyncFd;
    use tokio::io::Interest;

    // SAFETY: pidfd_open only reads its two integer arguments
    let fd = unsafe { libc::syscall(libc::SYS_pidfd_open, pid as libc::pid_t, 0) };
    if fd < 0 {
        return Err(std::io::Error::last_os_error());
    }
    // SAFETY: the descriptor was just created by the kernel and has no other owner
    let fd = unsafe { OwnedFd::from_raw_fd(fd as RawFd) };

    // SAFETY: the OwnedFd moves into the AsyncFd and stays open until it drops
    let fd = unsafe { AsyncFd::register_with_interest(fd, Interest::READABLE) }?;
    let _ready = fd.readable().await?;
    Ok(())
}

enum Wake {
    Tick,
    Exited(String),
    Shutdown,
}

/// Periodic and exit-driven reconciliation loop
pub struct Watcher {
    dispatcher: Arc<ControlDispatcher>,
    poll_interval: Duration,
    exit_notifications: bool,
    exits: ExitWatch,
    exit_rx: mpsc::UnboundedReceiver<String>,
}

impl Watcher {
    pub fn new(
        dispatcher: Arc<ControlDispatcher>,
        poll_interval: Duration,
        exit_notifications: bool,
    ) -> Self {
        let (exits, exit_rx) = ExitWatch::new();
        Self {
            dispatcher,
            poll_interval,
            exit_notifications,
            exits,
            exit_rx,
        }
    }

    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Watcher started (poll every {}s, exit notifications {})",
            self.poll_interval.as_secs(),
            if self.exit_notifications { "on" } else { "off" }
        );

        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            let wake = tokio::select! {
                _ = interval.tick() => Wake::Tick,
                Some(name) = self.exit_rx.recv() => Wake::Exited(name),
                _ = shutdown.changed() => Wake::Shutdown,
            };

            match wake {
                Wake::Tick => {
                    self.reconcile_all().await;
                }
                Wake::Exited(name) => {
                    self.exits.notified(&name);
                    info!("Process {} exited", name);
                    self.reconcile(&name).await;
                }
                Wake::Shutdown => break,
            }

            if *shutdown.borrow() {
                break;
            }
        }

        self.exits.abort_all();
        debug!("Watcher stopped");
    }

    pub async fn reconcile_all(&mut self) -> Vec<(String, Reconcile)> {
        let names = self.dispatcher.registry().names();
        let mut outcomes = Vec::with_capacity(names.len());
        for name in names {
            let outcome = self.reconcile(&name).await;
            outcomes.push((name, outcome));
        }
        outcomes
    }

    pub async fn reconcile(&mut self, name: &str) -> Reconcile {
        let dispatcher = Arc::clone(&self.dispatcher);
        let Ok(process) = dispatcher.registry().find(name) else {
            return Reconcile::Unmonitored;
        };

        let state = dispatcher.monitor_state(name).unwrap_or_default();
        if !state.is_monitored() {
            debug!("Process {} is {}, skipping", name, state);
            self.exits.unregister(name);
            return Reconcile::Unmonitored;
        }

        if process.is_running() {
            if self.exit_notifications {
                if let Some(pid) = process.control.pid() {
                    self.exits.register(name, pid);
                }
            }
            if state == MonitorState::Initializing && dispatcher.confirm_monitored(name) {
                info!("Process {} is up and monitored", name);
                return Reconcile::Confirmed;
            }
            return Reconcile::Running;
        }

        self.exits.unregister(name);

        if process.mode() != MonitorMode::Active {
            warn!(
                "Process {} is not running; {} mode, not recovering",
                name,
                process.mode()
            );
            return Reconcile::RecoverySkipped;
        }

        warn!("Process {} is not running, restarting", name);
        match dispatcher.dispatch(name, Action::Start).await {
            Ok(()) => Reconcile::Recovered,
            Err(OverseerError::ActionInProgress(_)) => {
                debug!("Process {} has an action in progress, leaving it alone", name);
                Reconcile::Busy
            }
            Err(e) => {
                warn!("Failed to recover process {}: {}", name, e);
                Reconcile::Failed(e.to_string())
            }
        }
    }
}
