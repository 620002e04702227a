// In-memory process double shared by unit tests

use crate::error::{OverseerError, Result};
use crate::process::control::ProcessControl;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

static NEXT_PID: AtomicU32 = AtomicU32::new(10_000);

/// Records "start:<name>", "stop:<name>" and "restart:<name>" in call order
pub type EventLog = Arc<Mutex<Vec<String>>>;

pub struct FakeProcess {
    name: String,
    running: AtomicBool,
    pid: AtomicU32,
    pub starts: AtomicUsize,
    pub stops: AtomicUsize,
    pub restarts: AtomicUsize,
    pub fail_start: AtomicBool,
    /// Keep reporting running after a stop request
    pub ignore_stop: AtomicBool,
    delay: Duration,
    log: EventLog,
}

impl FakeProcess {
    pub fn new(name: &str) -> Self {
        Self::with_log(name, Arc::new(Mutex::new(Vec::new())))
    }

    pub fn with_log(name: &str, log: EventLog) -> Self {
        Self {
            name: name.to_string(),
            running: AtomicBool::new(false),
            pid: AtomicU32::new(0),
            starts: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
            restarts: AtomicUsize::new(0),
            fail_start: AtomicBool::new(false),
            ignore_stop: AtomicBool::new(false),
            delay: Duration::ZERO,
            log,
        }
    }

    /// Make start/stop/restart take `delay` before completing
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn running(self) -> Self {
        self.set_running(true);
        self
    }

    /// Simulate the program appearing or dying outside of supervisor control
    pub fn set_running(&self, running: bool) {
        if running {
            self.pid
                .store(NEXT_PID.fetch_add(1, Ordering::SeqCst), Ordering::SeqCst);
        }
        self.running.store(running, Ordering::SeqCst);
    }

    fn record(&self, what: &str) {
        if let Ok(mut log) = self.log.lock() {
            log.push(format!("{}:{}", what, self.name));
        }
    }

    async fn pause(&self) {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
    }
}

#[async_trait]
impl ProcessControl for FakeProcess {
    async fn start(&self) -> Result<u32> {
        self.pause().await;
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(OverseerError::SpawnFailure(
                self.name.clone(),
                "simulated failure".to_string(),
            ));
        }
        self.record("start");
        self.starts.fetch_add(1, Ordering::SeqCst);
        self.set_running(true);
        Ok(self.pid.load(Ordering::SeqCst))
    }

    async fn stop(&self) -> Result<()> {
        self.pause().await;
        self.record("stop");
        self.stops.fetch_add(1, Ordering::SeqCst);
        if !self.ignore_stop.load(Ordering::SeqCst) {
            self.running.store(false, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn restart(&self) -> Result<u32> {
        self.pause().await;
        self.record("restart");
        self.restarts.fetch_add(1, Ordering::SeqCst);
        self.set_running(true);
        Ok(self.pid.load(Ordering::SeqCst))
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn pid(&self) -> Option<u32> {
        if self.is_running() {
            Some(self.pid.load(Ordering::SeqCst))
        } else {
            None
        }
    }
}
