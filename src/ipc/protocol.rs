// IPC Protocol definitions for client-daemon communication

use crate::control::{Action, ProcessStatus};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Daemon management commands
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DaemonCommand {
    Status,
    Shutdown,
}

/// All available commands
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    /// Apply an action to a process, a group, or `all`
    Control { action: Action, target: String },
    /// Status of a target, or of every process
    Status { target: Option<String> },
    Daemon(DaemonCommand),
}

/// Process information returned in responses
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessInfo {
    #[serde(flatten)]
    pub status: ProcessStatus,
    /// Latest sampled resident memory, when a rule samples it
    pub memory_bytes: Option<u64>,
    /// Latest sampled CPU usage, when a rule samples it
    pub cpu_percent: Option<f64>,
}

impl From<ProcessStatus> for ProcessInfo {
    fn from(status: ProcessStatus) -> Self {
        Self {
            status,
            memory_bytes: None,
            cpu_percent: None,
        }
    }
}

/// Result of an action for one process of the target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub process: String,
    pub error: Option<String>,
}

impl ActionOutcome {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Response data variants
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ResponseData {
    /// Per-process results of a control action
    ActionApplied {
        action: Action,
        outcomes: Vec<ActionOutcome>,
    },
    Status(Vec<ProcessInfo>),
    DaemonStatus { running: bool, uptime: Duration },
    /// Generic success message
    Success(String),
}

/// Request message from client to daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub id: u64,
    pub command: Command,
}

/// Response message from daemon to client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub id: u64,
    pub result: Result<ResponseData, String>,
}

impl Request {
    pub fn new(id: u64, command: Command) -> Self {
        Self { id, command }
    }
}

impl Response {
    pub fn success(id: u64, data: ResponseData) -> Self {
        Self {
            id,
            result: Ok(data),
        }
    }

    pub fn error(id: u64, error: String) -> Self {
        Self {
            id,
            result: Err(error),
        }
    }
}
