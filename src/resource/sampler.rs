use super::holder::{DataTimestamp, ResourceHolder};
use super::source::MetricsSource;
use super::{Amount, Resource};
use crate::error::Result;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::debug;

type SampleKey = (u32, Resource);

/// Samples per-process metrics into bounded time series
///
/// Each (pid, resource) pair is read from the source at most once per tick;
/// later lookups in the same tick are answered from the cache.
pub struct ResourceSampler {
    source: Box<dyn MetricsSource>,
    holders: HashMap<SampleKey, ResourceHolder>,
    tick_cache: HashMap<SampleKey, Amount>,
    epoch: Instant,
}

impl ResourceSampler {
    pub fn new(source: Box<dyn MetricsSource>) -> Self {
        Self {
            source,
            holders: HashMap::new(),
            tick_cache: HashMap::new(),
            epoch: Instant::now(),
        }
    }

    /// Drop the per-tick cache; called once at the start of every evaluation tick
    pub fn begin_tick(&mut self) {
        self.tick_cache.clear();
    }

    pub fn sample(
        &mut self,
        pid: u32,
        resource: Resource,
        interval: Duration,
        duration: Duration,
    ) -> Result<Amount> {
        let now = self.epoch.elapsed().as_nanos() as u64;
        self.sample_at(pid, resource, interval, duration, now)
    }

    fn sample_at(
        &mut self,
        pid: u32,
        resource: Resource,
        interval: Duration,
        duration: Duration,
        now_nanos: u64,
    ) -> Result<Amount> {
        let key = (pid, resource);
        if let Some(amount) = self.tick_cache.get(&key) {
            return Ok(*amount);
        }

        let raw = match resource {
            Resource::MemoryUsed => self.source.memory_used(pid)?,
            Resource::CpuPercent => self.source.cpu_time(pid)?,
        };

        let capacity = holder_capacity(interval, duration);
        let holder = self
            .holders
            .entry(key)
            .or_insert_with(|| ResourceHolder::new(capacity));
        holder.grow(capacity);
        holder.push(DataTimestamp {
            value: raw,
            sampled_at_nanos: now_nanos,
        });

        let amount = match resource {
            Resource::MemoryUsed => Amount::Integer(raw),
            Resource::CpuPercent => match (holder.previous(), holder.latest()) {
                (Some(previous), Some(latest)) => Amount::Float(cpu_percent(previous, latest)),
                _ => Amount::Float(0.0),
            },
        };

        self.tick_cache.insert(key, amount);
        Ok(amount)
    }

    /// Drop every series belonging to a pid that is gone
    pub fn forget(&mut self, pid: u32) {
        let before = self.holders.len();
        self.holders.retain(|(held, _), _| *held != pid);
        self.tick_cache.retain(|(held, _), _| *held != pid);
        if self.holders.len() != before {
            debug!("Dropped resource history for pid {}", pid);
        }
    }

    pub fn holder(&self, pid: u32, resource: Resource) -> Option<&ResourceHolder> {
        self.holders.get(&(pid, resource))
    }
}

/// Ring size needed to cover `duration` at one sample per `interval`
fn holder_capacity(interval: Duration, duration: Duration) -> usize {
    let interval = interval.as_secs().max(1);
    ((duration.as_secs() / interval) as usize).max(2)
}

/// CPU percent between two samples of a cumulative counter in hundredths of a second
pub fn cpu_percent(previous: DataTimestamp, latest: DataTimestamp) -> f64 {
    let elapsed_nanos = latest.sampled_at_nanos.saturating_sub(previous.sampled_at_nanos);
    if elapsed_nanos == 0 {
        return 0.0;
    }
    let elapsed_secs = elapsed_nanos as f64 / 1_000_000_000.0;
    latest.value.saturating_sub(previous.value) as f64 / elapsed_secs
}
