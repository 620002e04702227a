use crate::config::ProcessConfig;
use crate::process::control::ProcessControl;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Per-process policy deciding whether automatic actions are applied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MonitorMode {
    /// Recover on unexpected exit and apply rule actions
    #[default]
    Active,
    /// Observe only; failures are logged
    Passive,
    /// Only explicit control requests touch the process
    Manual,
}

impl std::fmt::Display for MonitorMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MonitorMode::Active => write!(f, "active"),
            MonitorMode::Passive => write!(f, "passive"),
            MonitorMode::Manual => write!(f, "manual"),
        }
    }
}

/// A supervised program as known to the registry
#[derive(Clone)]
pub struct Process {
    pub group: String,
    pub config: ProcessConfig,
    pub control: Arc<dyn ProcessControl>,
}

impl Process {
    pub fn new(group: impl Into<String>, config: ProcessConfig, control: Arc<dyn ProcessControl>) -> Self {
        Self {
            group: group.into(),
            config,
            control,
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn depends_on(&self) -> &[String] {
        &self.config.depends_on
    }

    pub fn mode(&self) -> MonitorMode {
        self.config.monitor_mode
    }

    pub fn is_running(&self) -> bool {
        self.control.is_running()
    }
}

impl std::fmt::Debug for Process {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Process")
            .field("group", &self.group)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
