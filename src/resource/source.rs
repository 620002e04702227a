use crate::error::{OverseerError, Result};
use std::fs;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

/// Where raw per-process counters come from
pub trait MetricsSource: Send {
    /// Resident memory in bytes
    fn memory_used(&mut self, pid: u32) -> Result<u64>;

    /// Cumulative user + system CPU time in hundredths of a second
    fn cpu_time(&mut self, pid: u32) -> Result<u64>;
}

/// Reads live counters from the operating system
pub struct SystemMetrics {
    system: System,
    ticks_per_sec: u64,
}

impl SystemMetrics {
    pub fn new() -> Self {
        Self {
            system: System::new(),
            ticks_per_sec: clock_ticks(),
        }
    }
}

impl Default for SystemMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsSource for SystemMetrics {
    fn memory_used(&mut self, pid: u32) -> Result<u64> {
        let sys_pid = Pid::from_u32(pid);
        self.system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[sys_pid]),
            true,
            ProcessRefreshKind::new().with_memory(),
        );

        self.system
            .process(sys_pid)
            .map(|process| process.memory())
            .ok_or_else(|| OverseerError::ResourceUnavailable(pid, "process not found".into()))
    }

    fn cpu_time(&mut self, pid: u32) -> Result<u64> {
        let stat = fs::read_to_string(format!("/proc/{}/stat", pid))
            .map_err(|e| OverseerError::ResourceUnavailable(pid, e.to_string()))?;

        let ticks = parse_stat_cpu_ticks(&stat)
            .ok_or_else(|| OverseerError::ResourceUnavailable(pid, "malformed stat line".into()))?;

        Ok(ticks.saturating_mul(100) / self.ticks_per_sec)
    }
}

fn clock_ticks() -> u64 {
    // SAFETY: sysconf has no preconditions
    let ticks = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };
    if ticks > 0 {
        ticks as u64
    } else {
        100
    }
}

/// utime + stime from a `/proc/<pid>/stat` line
///
/// The command name is parenthesised and may itself contain spaces or
/// parentheses, so fields are counted from the last `)`.
fn parse_stat_cpu_ticks(stat: &str) -> Option<u64> {
    let after_comm = &stat[stat.rfind(')')? + 1..];
    let mut fields = after_comm.split_whitespace();
    // state is field 3; utime and stime are fields 14 and 15
    let utime: u64 = fields.nth(11)?.parse().ok()?;
    let stime: u64 = fields.next()?.parse().ok()?;
    Some(utime + stime)
}
