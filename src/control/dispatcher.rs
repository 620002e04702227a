use crate::config::Settings;
use crate::control::state::{ControlState, MonitorState};
use crate::control::Action;
use crate::error::{OverseerError, Result};
use crate::process::{MonitorMode, Process, Registry};
use crate::state::{PersistedState, StateStore};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Poll step while waiting for a process to come up or go down
const WAIT_STEP: Duration = Duration::from_millis(50);

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Timeouts bounding the blocking part of a dispatch
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub start_timeout: Duration,
    pub stop_timeout: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            start_timeout: Duration::from_secs(5),
            stop_timeout: Duration::from_secs(10),
        }
    }
}

impl From<&Settings> for DispatcherConfig {
    fn from(settings: &Settings) -> Self {
        Self {
            start_timeout: settings.start_timeout(),
            stop_timeout: settings.stop_timeout(),
        }
    }
}

/// Point-in-time view of one process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessStatus {
    pub name: String,
    pub group: String,
    pub pid: Option<u32>,
    pub running: bool,
    pub mode: MonitorMode,
    pub monitor: MonitorState,
    pub starts: u64,
}

/// Visited sets and in-progress claims for one top-level dispatch
struct Traversal<'s> {
    visited: HashSet<String>,
    /// Visit order, used for forward propagation
    order: Vec<String>,
    depend_visited: HashSet<String>,
    claims: Claims<'s>,
}

impl<'s> Traversal<'s> {
    fn new(shared: &'s Mutex<Shared>) -> Self {
        Self {
            visited: HashSet::new(),
            order: Vec::new(),
            depend_visited: HashSet::new(),
            claims: Claims {
                shared,
                held: Vec::new(),
            },
        }
    }

    fn visit(&mut self, name: &str) -> bool {
        if self.visited.insert(name.to_string()) {
            self.order.push(name.to_string());
            true
        } else {
            false
        }
    }

    /// Forget visited nodes for a new phase, keeping the claims
    fn reset(&mut self) {
        self.visited.clear();
        self.order.clear();
        self.depend_visited.clear();
    }
}

/// State shared by concurrent dispatches, guarded by one mutex
#[derive(Default)]
struct Shared {
    states: HashMap<String, ControlState>,
    /// Processes claimed by an action in flight, mapped to their monitor state before it
    in_progress: HashMap<String, MonitorState>,
}

/// Every process one dispatch has claimed; released on drop
struct Claims<'s> {
    shared: &'s Mutex<Shared>,
    held: Vec<String>,
}

impl Claims<'_> {
    /// Claim `name` for this dispatch; fails if another dispatch holds it
    fn claim(&mut self, name: &str) -> Result<()> {
        if self.held.iter().any(|held| held == name) {
            return Ok(());
        }

        let mut shared = self.shared.lock().unwrap_or_else(PoisonError::into_inner);
        if shared.in_progress.contains_key(name) {
            return Err(OverseerError::ActionInProgress(name.to_string()));
        }

        let state = shared.states.entry(name.to_string()).or_default();
        let previous = state.monitor;
        state.monitor = MonitorState::PendingAction;
        shared.in_progress.insert(name.to_string(), previous);
        drop(shared);

        self.held.push(name.to_string());
        Ok(())
    }

    /// Restore monitor states the action never settled and drop the claims
    fn release(&mut self) {
        if self.held.is_empty() {
            return;
        }

        let mut shared = self.shared.lock().unwrap_or_else(PoisonError::into_inner);
        for name in self.held.drain(..) {
            let Some(previous) = shared.in_progress.remove(&name) else {
                continue;
            };
            if let Some(state) = shared.states.get_mut(&name) {
                if state.monitor == MonitorState::PendingAction {
                    state.monitor = previous;
                }
            }
        }
    }
}

impl Drop for Claims<'_> {
    fn drop(&mut self) {
        self.release();
    }
}

/// Executes control actions against the registry.
///
/// Every process an action touches, the target and the dependencies or
/// dependents it walks to, is claimed for the duration of the action. A
/// second action reaching a claimed process fails fast with
/// `ActionInProgress`. Disjoint actions proceed concurrently.
pub struct ControlDispatcher {
    registry: Arc<Registry>,
    store: StateStore,
    config: DispatcherConfig,
    shared: Mutex<Shared>,
    /// Serializes snapshot and write so saves land in snapshot order
    persisting: Mutex<()>,
    /// Processes that had a persisted record when the dispatcher was created
    restored: HashSet<String>,
}

impl ControlDispatcher {
    /// Create a dispatcher, reloading persisted control state
    pub fn new(registry: Arc<Registry>, store: StateStore, config: DispatcherConfig) -> Result<Self> {
        let persisted = store.load()?;
        let mut states = HashMap::new();
        let mut restored = HashSet::new();

        for name in registry.names() {
            let state = match persisted.processes.get(&name) {
                Some(state) => {
                    restored.insert(name.clone());
                    *state
                }
                None => ControlState::default(),
            };
            states.insert(name, state);
        }

        let dropped = persisted
            .processes
            .keys()
            .filter(|name| !registry.contains(name))
            .count();
        if dropped > 0 {
            debug!("Ignoring {} persisted entries for unknown processes", dropped);
        }

        info!(
            "Loaded control state for {} processes ({} restored)",
            states.len(),
            restored.len()
        );

        Ok(Self {
            registry,
            store,
            config,
            shared: Mutex::new(Shared {
                states,
                in_progress: HashMap::new(),
            }),
            persisting: Mutex::new(()),
            restored,
        })
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    fn shared(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `action` against the named process
    pub async fn dispatch(&self, name: &str, action: Action) -> Result<()> {
        self.registry.find(name)?;
        let mut t = Traversal::new(&self.shared);
        t.claims.claim(name)?;

        info!("Dispatching {} for process {}", action, name);

        let result = match action {
            Action::Start => self.start_target(name, &mut t).await,
            Action::Stop => self.do_stop(name, &mut t).await,
            Action::Restart => self.restart_target(name, &mut t).await,
            Action::Monitor => self.do_monitor(name, &mut t),
            Action::Unmonitor => self.do_unmonitor(name, &mut t),
        };

        // Settled states must be visible to the snapshot below
        t.claims.release();

        if let Err(ref e) = result {
            warn!("Action {} for process {} failed: {}", action, name, e);
        }

        let persisted = self.persist();
        if let Err(ref e) = persisted {
            error!("Failed to persist control state: {}", e);
        }

        result?;
        persisted
    }

    /// Dispatch against `all`, a group, or a single process
    pub async fn dispatch_target(
        &self,
        target: &str,
        action: Action,
    ) -> Result<Vec<(String, Result<()>)>> {
        let names = self.registry.resolve_target(target)?;
        let mut results = Vec::with_capacity(names.len());

        for name in names {
            let result = self.dispatch(&name, action).await;
            results.push((name, result));
        }

        Ok(results)
    }

    /// Start every process that was monitored before the daemon went down,
    /// plus active processes the daemon has never seen
    pub async fn start_on_boot(&self) -> Vec<(String, Result<()>)> {
        let candidates: Vec<String> = {
            let shared = self.shared();
            self.registry
                .iter()
                .filter(|p| {
                    let monitored = shared
                        .states
                        .get(p.name())
                        .map(|s| s.monitor.is_monitored())
                        .unwrap_or(false);
                    monitored
                        || (!self.restored.contains(p.name()) && p.mode() == MonitorMode::Active)
                })
                .map(|p| p.name().to_string())
                .collect()
        };

        let mut results = Vec::with_capacity(candidates.len());
        for name in candidates {
            let result = self.dispatch(&name, Action::Start).await;
            results.push((name, result));
        }
        results
    }

    /// Promote `Initializing` to `Monitored`; returns whether a change happened
    pub fn confirm_monitored(&self, name: &str) -> bool {
        let mut shared = self.shared();
        let Some(state) = shared.states.get_mut(name) else {
            return false;
        };

        let confirmed = state.monitor.confirmed();
        if confirmed == state.monitor {
            return false;
        }
        state.monitor = confirmed;
        debug!("Process {} confirmed as monitored", name);
        true
    }

    pub fn control_state(&self, name: &str) -> Option<ControlState> {
        self.shared().states.get(name).copied()
    }

    pub fn monitor_state(&self, name: &str) -> Option<MonitorState> {
        self.control_state(name).map(|s| s.monitor)
    }

    pub fn is_in_progress(&self, name: &str) -> bool {
        self.shared().in_progress.contains_key(name)
    }

    /// Status snapshot for a target, or every process when `None`
    pub fn status(&self, target: Option<&str>) -> Result<Vec<ProcessStatus>> {
        let names = match target {
            Some(target) => self.registry.resolve_target(target)?,
            None => self.registry.names(),
        };

        let states: Vec<ControlState> = {
            let shared = self.shared();
            names
                .iter()
                .map(|n| shared.states.get(n).copied().unwrap_or_default())
                .collect()
        };

        names
            .iter()
            .zip(states)
            .map(|(name, state)| {
                let process = self.registry.find(name)?;
                let pid = process.control.pid();
                Ok(ProcessStatus {
                    name: name.clone(),
                    group: process.group.clone(),
                    pid,
                    running: pid.is_some(),
                    mode: process.mode(),
                    monitor: state.monitor,
                    starts: state.starts,
                })
            })
            .collect()
    }

    /// Persist the full control state map
    pub fn persist(&self) -> Result<()> {
        let _persisting = self
            .persisting
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let snapshot = {
            let shared = self.shared();
            let mut snapshot = PersistedState::new();
            for (name, state) in &shared.states {
                let mut state = *state;
                // A process claimed by another action in flight is written as
                // the state that action started from
                if let Some(previous) = shared.in_progress.get(name) {
                    state.monitor = *previous;
                }
                snapshot.processes.insert(name.clone(), state);
            }
            snapshot
        };

        self.store.save(&snapshot)
    }

    fn update_monitor<F>(&self, name: &str, transition: F)
    where
        F: FnOnce(MonitorState) -> MonitorState,
    {
        let mut shared = self.shared();
        let previous = shared.in_progress.get(name).copied();
        let state = shared.states.entry(name.to_string()).or_default();
        let base = match (state.monitor, previous) {
            (MonitorState::PendingAction, Some(previous)) => previous,
            (current, _) => current,
        };
        state.monitor = transition(base);
    }

    fn record_start(&self, name: &str) {
        let mut shared = self.shared();
        shared.states.entry(name.to_string()).or_default().starts += 1;
    }

    async fn wait_for(&self, process: &Process, running: bool, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if process.is_running() == running {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(WAIT_STEP).await;
        }
    }

    async fn start_target(&self, name: &str, t: &mut Traversal<'_>) -> Result<()> {
        self.do_start(name, t).await?;
        self.propagate_start(t).await
    }

    /// Start dependencies depth-first, then the process itself
    fn do_start<'a, 's>(
        &'a self,
        name: &'a str,
        t: &'a mut Traversal<'s>,
    ) -> BoxFuture<'a, Result<()>>
    where
        's: 'a,
    {
        Box::pin(async move {
            if !t.visit(name) {
                return Ok(());
            }

            let process = self.registry.find(name)?;
            t.claims.claim(name)?;
            for dependency in process.depends_on() {
                self.do_start(dependency, t).await?;
            }

            self.start_one(process).await
        })
    }

    /// Start everything that depends on a process this traversal visited
    async fn propagate_start(&self, t: &mut Traversal<'_>) -> Result<()> {
        let mut first_error = None;
        let mut cursor = 0;

        // `order` grows while dependents are started, so walk it by index
        while cursor < t.order.len() {
            let name = t.order[cursor].clone();
            cursor += 1;

            if let Err(e) = self.start_dependents(&name, t).await {
                first_error.get_or_insert(e);
            }
        }

        first_error.map_or(Ok(()), Err)
    }

    async fn start_dependents(&self, name: &str, t: &mut Traversal<'_>) -> Result<()> {
        let mut first_error = None;

        for dependent in self.registry.dependents_of(name) {
            if !t.depend_visited.insert(dependent.name().to_string()) {
                continue;
            }
            if let Err(e) = self.do_start(dependent.name(), t).await {
                warn!(
                    "Failed to start {} (depends on {}): {}",
                    dependent.name(),
                    name,
                    e
                );
                first_error.get_or_insert(e);
            }
        }

        first_error.map_or(Ok(()), Err)
    }

    async fn start_one(&self, process: &Process) -> Result<()> {
        let name = process.name();

        if process.is_running() {
            debug!("Process {} is already running", name);
            self.update_monitor(name, MonitorState::enabled);
            return Ok(());
        }

        let pid = process.control.start().await?;
        self.record_start(name);
        info!("Process {} spawned (PID: {})", name, pid);

        let up = self
            .wait_for(process, true, self.config.start_timeout)
            .await;

        // Monitoring stays on even when the process is slow, so the watcher retries
        self.update_monitor(name, MonitorState::enabled);

        if !up {
            return Err(OverseerError::SpawnFailure(
                name.to_string(),
                format!(
                    "did not report running within {:?}",
                    self.config.start_timeout
                ),
            ));
        }

        Ok(())
    }

    /// Stop dependents depth-first, then the process itself
    fn do_stop<'a, 's>(
        &'a self,
        name: &'a str,
        t: &'a mut Traversal<'s>,
    ) -> BoxFuture<'a, Result<()>>
    where
        's: 'a,
    {
        Box::pin(async move {
            if !t.visit(name) {
                return Ok(());
            }

            let process = self.registry.find(name)?;
            t.claims.claim(name)?;
            let mut first_error = None;

            for dependent in self.registry.dependents_of(name) {
                if let Err(e) = self.do_stop(dependent.name(), t).await {
                    warn!(
                        "Failed to stop {} (depends on {}): {}",
                        dependent.name(),
                        name,
                        e
                    );
                    first_error.get_or_insert(e);
                }
            }

            // A dependent that is still up keeps its dependency up too
            if let Some(e) = first_error {
                return Err(e);
            }

            self.stop_one(process).await
        })
    }

    async fn stop_one(&self, process: &Process) -> Result<()> {
        let name = process.name();

        self.update_monitor(name, |_| MonitorState::Unmonitored);

        if !process.is_running() {
            debug!("Process {} is not running", name);
            return Ok(());
        }

        process.control.stop().await?;

        if !self.wait_for(process, false, self.config.stop_timeout).await {
            return Err(OverseerError::StopTimeout(name.to_string()));
        }

        info!("Process {} stopped", name);
        Ok(())
    }

    async fn restart_target(&self, name: &str, t: &mut Traversal<'_>) -> Result<()> {
        let process = self.registry.find(name)?;

        if process.config.restart.is_some() {
            let pid = process.control.restart().await?;
            self.record_start(name);
            info!("Process {} restarted (PID: {})", name, pid);

            let up = self
                .wait_for(process, true, self.config.start_timeout)
                .await;
            self.update_monitor(name, MonitorState::enabled);

            if !up {
                return Err(OverseerError::SpawnFailure(
                    name.to_string(),
                    "did not report running after restart".to_string(),
                ));
            }
            return Ok(());
        }

        self.do_stop(name, t).await?;
        t.reset();
        self.start_target(name, t).await
    }

    fn do_monitor(&self, name: &str, t: &mut Traversal<'_>) -> Result<()> {
        if !t.visit(name) {
            return Ok(());
        }

        let process = self.registry.find(name)?;
        t.claims.claim(name)?;
        for dependency in process.depends_on() {
            self.do_monitor(dependency, t)?;
        }

        self.update_monitor(name, MonitorState::enabled);
        Ok(())
    }

    fn do_unmonitor(&self, name: &str, t: &mut Traversal<'_>) -> Result<()> {
        if !t.visit(name) {
            return Ok(());
        }

        self.registry.find(name)?;
        t.claims.claim(name)?;
        for dependent in self.registry.dependents_of(name) {
            self.do_unmonitor(dependent.name(), t)?;
        }

        self.update_monitor(name, |_| MonitorState::Unmonitored);
        Ok(())
    }
}
