use super::alert::AlertChannel;
use super::event::ParsedEvent;
use crate::control::ControlDispatcher;
use crate::process::MonitorMode;
use crate::resource::{Amount, Resource, ResourceSampler};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, RwLock};
use tracing::{debug, info, warn};

/// Seconds between two evaluation passes
pub const EVALUATION_TICK: Duration = Duration::from_secs(1);

/// Allowance for a tick waking early relative to the previous one
pub(crate) const TICK_SLACK: Duration = Duration::from_millis(500);

/// Latest reading per (process, resource), shared with the status path
pub type Readings = Arc<RwLock<HashMap<(String, Resource), Amount>>>;

/// Evaluates compiled rules against sampled metrics and fires their actions
pub struct EventMonitor {
    dispatcher: Arc<ControlDispatcher>,
    events: Vec<ParsedEvent>,
    sampler: ResourceSampler,
    alerts: AlertChannel,
    readings: Readings,
    /// When each event's condition started holding
    breach_since: HashMap<usize, Instant>,
    /// When each event was last evaluated
    last_checked: HashMap<usize, Instant>,
    /// Pid each process was last sampled under
    pids: HashMap<String, u32>,
}

impl EventMonitor {
    pub fn new(
        dispatcher: Arc<ControlDispatcher>,
        events: Vec<ParsedEvent>,
        sampler: ResourceSampler,
        alerts: AlertChannel,
    ) -> Self {
        Self {
            dispatcher,
            events,
            sampler,
            alerts,
            readings: Arc::new(RwLock::new(HashMap::new())),
            breach_since: HashMap::new(),
            last_checked: HashMap::new(),
            pids: HashMap::new(),
        }
    }

    pub fn readings(&self) -> Readings {
        Arc::clone(&self.readings)
    }

    pub fn events(&self) -> &[ParsedEvent] {
        &self.events
    }

    /// Evaluate rules once per tick until shutdown is signalled
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        if self.events.is_empty() {
            info!("No rules configured, event monitor idle");
            return;
        }

        info!("Event monitor evaluating {} rules", self.events.len());

        let mut interval = tokio::time::interval(EVALUATION_TICK);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick completes immediately
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => self.evaluate().await,
                _ = shutdown.changed() => break,
            }
            if *shutdown.borrow() {
                break;
            }
        }

        debug!("Event monitor stopped");
    }

    /// Run one evaluation pass
    pub async fn evaluate(&mut self) {
        self.evaluate_at(Instant::now()).await
    }

    async fn evaluate_at(&mut self, now: Instant) {
        self.sampler.begin_tick();
        let dispatcher = Arc::clone(&self.dispatcher);

        for index in 0..self.events.len() {
            if !self.events[index].is_due(self.last_checked.get(&index).copied(), now) {
                continue;
            }
            self.last_checked.insert(index, now);
            let event = self.events[index].clone();

            let Ok(process) = dispatcher.registry().find(&event.process) else {
                continue;
            };

            let pid = process.control.pid();
            self.track_pid(&event.process, pid);
            let Some(pid) = pid else {
                self.breach_since.remove(&index);
                continue;
            };

            let condition = event.condition;
            let reading = match self.sampler.sample(
                pid,
                condition.resource,
                event.interval,
                event.duration,
            ) {
                Ok(reading) => reading,
                Err(e) => {
                    debug!("Skipping rule '{}' for {}: {}", event.rule, event.process, e);
                    continue;
                }
            };

            self.readings
                .write()
                .await
                .insert((event.process.clone(), condition.resource), reading);

            if !condition.holds(reading) {
                self.breach_since.remove(&index);
                continue;
            }

            let since = *self.breach_since.entry(index).or_insert(now);
            let held = now.saturating_duration_since(since);
            if held + TICK_SLACK < event.duration {
                debug!(
                    "Rule '{}' for {} holding for {:?}",
                    event.rule, event.process, held
                );
                continue;
            }
            self.breach_since.remove(&index);

            if process.mode() != MonitorMode::Active {
                info!(
                    "Rule '{}' matched for {} ({}), action suppressed in {} mode",
                    event.rule,
                    event.process,
                    reading,
                    process.mode()
                );
                continue;
            }

            Self::trigger(&self.dispatcher, &self.alerts, &event, reading).await;
        }
    }

    async fn trigger(
        dispatcher: &ControlDispatcher,
        alerts: &AlertChannel,
        event: &ParsedEvent,
        reading: Amount,
    ) {
        info!(
            "Rule '{}' triggered for {} ({}): {}",
            event.rule, event.process, reading, event.action
        );

        match event.action.control_action() {
            Some(action) => {
                if let Err(e) = dispatcher.dispatch(&event.process, action).await {
                    warn!(
                        "Rule action {} for {} failed: {}",
                        event.action, event.process, e
                    );
                }
            }
            None => {
                if let Err(e) = alerts.send(event, reading).await {
                    warn!("Alert for {} not delivered: {}", event.process, e);
                }
            }
        }
    }

    /// Drop sample history when a process dies or comes back under a new pid
    fn track_pid(&mut self, name: &str, pid: Option<u32>) {
        let previous = match pid {
            Some(pid) => self.pids.insert(name.to_string(), pid),
            None => self.pids.remove(name),
        };
        if let Some(old) = previous {
            if Some(old) != pid {
                self.sampler.forget(old);
            }
        }
    }
}
