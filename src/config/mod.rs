use crate::error::{OverseerError, Result};
use crate::process::registry::{self, ProcessGroup, Registry};
use crate::process::spawner::CommandProcess;
use crate::process::{MonitorMode, Process};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Signals accepted for `stop_signal`
pub const VALID_SIGNALS: [&str; 7] = [
    "SIGTERM", "SIGINT", "SIGQUIT", "SIGKILL", "SIGHUP", "SIGUSR1", "SIGUSR2",
];

/// Configuration of a single supervised program
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessConfig {
    /// Process name (unique across all groups)
    pub name: String,

    /// Shell command that launches the program
    pub start: String,

    /// Shell command that stops the program (default: send `stop_signal`)
    #[serde(default)]
    pub stop: Option<String>,

    /// Shell command that restarts the program in one step
    #[serde(default)]
    pub restart: Option<String>,

    /// Working directory for the commands
    #[serde(default)]
    pub cwd: Option<PathBuf>,

    /// Environment variables
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Names of processes that must be running before this one starts
    #[serde(default)]
    pub depends_on: Vec<String>,

    /// Whether automatic recovery and rule actions apply
    #[serde(default)]
    pub monitor_mode: MonitorMode,

    /// PID file maintained by the program itself
    #[serde(default)]
    pub pid_file: Option<PathBuf>,

    /// Signal to send on stop when no stop command is configured
    #[serde(default = "default_stop_signal")]
    pub stop_signal: String,
}

/// A resource rule attached to a group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventConfig {
    /// Process the rule watches (default: every process of the group)
    #[serde(default)]
    pub process: Option<String>,

    /// Threshold expression, e.g. `memory_used > 512mb`
    pub rule: String,

    /// How long the condition must hold before triggering (seconds)
    #[serde(default)]
    pub duration_secs: Option<u64>,

    /// Evaluation interval (seconds, 0 = every tick)
    #[serde(default)]
    pub interval_secs: Option<u64>,

    /// One of `start`, `stop`, `restart`, `alert`
    pub action: String,

    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupConfig {
    pub name: String,

    #[serde(default)]
    pub processes: Vec<ProcessConfig>,

    #[serde(default)]
    pub events: Vec<EventConfig>,
}

/// Daemon-wide settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Watcher reconciliation interval (seconds)
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// How long a started process has to report itself running (seconds)
    #[serde(default = "default_start_timeout")]
    pub start_timeout_secs: u64,

    /// How long a stopped process has to exit (seconds)
    #[serde(default = "default_stop_timeout")]
    pub stop_timeout_secs: u64,

    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,

    #[serde(default = "default_socket_path")]
    pub socket_path: PathBuf,

    #[serde(default = "default_pid_file")]
    pub pid_file: PathBuf,

    /// Unix socket receiving alert messages
    #[serde(default)]
    pub alert_socket: Option<PathBuf>,

    /// Use OS exit notifications in addition to polling
    #[serde(default = "default_exit_notifications")]
    pub exit_notifications: bool,
}

// Default value functions for serde
fn default_stop_signal() -> String {
    "SIGTERM".to_string()
}

fn default_poll_interval() -> u64 {
    5
}

fn default_start_timeout() -> u64 {
    5
}

fn default_stop_timeout() -> u64 {
    10
}

fn default_state_file() -> PathBuf {
    PathBuf::from("/tmp/overseer_state.json")
}

fn default_socket_path() -> PathBuf {
    PathBuf::from("/tmp/overseer.sock")
}

fn default_pid_file() -> PathBuf {
    PathBuf::from("/tmp/overseer.pid")
}

fn default_exit_notifications() -> bool {
    true
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            start_timeout_secs: default_start_timeout(),
            stop_timeout_secs: default_stop_timeout(),
            state_file: default_state_file(),
            socket_path: default_socket_path(),
            pid_file: default_pid_file(),
            alert_socket: None,
            exit_notifications: default_exit_notifications(),
        }
    }
}

impl Settings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn start_timeout(&self) -> Duration {
        Duration::from_secs(self.start_timeout_secs)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }
}

/// Complete configuration file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub settings: Settings,

    #[serde(default)]
    pub groups: Vec<GroupConfig>,
}

impl Config {
    /// Load configuration from a file (supports TOML and JSON)
    pub fn from_file(path: &Path) -> Result<Config> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| OverseerError::ConfigError(format!("Failed to read config file: {}", e)))?;

        let extension = path.extension().and_then(|s| s.to_str()).unwrap_or("");

        let mut config = match extension {
            "toml" => Self::parse_toml(&contents)?,
            "json" => Self::parse_json(&contents)?,
            _ => {
                return Err(OverseerError::InvalidConfig(format!(
                    "Unsupported file format: {}. Use .toml or .json",
                    extension
                )))
            }
        };

        for group in &mut config.groups {
            for process in &mut group.processes {
                process.expand_env_vars();
            }
        }

        config.validate()?;

        Ok(config)
    }

    pub fn parse_toml(contents: &str) -> Result<Config> {
        toml::from_str(contents)
            .map_err(|e| OverseerError::InvalidConfig(format!("Failed to parse TOML: {}", e)))
    }

    pub fn parse_json(contents: &str) -> Result<Config> {
        serde_json::from_str(contents)
            .map_err(|e| OverseerError::InvalidConfig(format!("Failed to parse JSON: {}", e)))
    }

    /// Validate settings, groups, processes and the dependency graph
    pub fn validate(&self) -> Result<()> {
        if self.settings.poll_interval_secs == 0 {
            return Err(OverseerError::ConfigValidationError(
                "poll_interval_secs must be at least 1".to_string(),
            ));
        }

        let mut group_names = HashSet::new();
        let mut process_names = HashSet::new();

        for group in &self.groups {
            if group.name.is_empty() {
                return Err(OverseerError::MissingConfigField("group name".to_string()));
            }
            if !group_names.insert(group.name.as_str()) {
                return Err(OverseerError::ConfigValidationError(format!(
                    "Duplicate group name: {}",
                    group.name
                )));
            }

            for process in &group.processes {
                process.validate()?;
                if !process_names.insert(process.name.as_str()) {
                    return Err(OverseerError::ConfigValidationError(format!(
                        "Duplicate process name: {}",
                        process.name
                    )));
                }
            }

            for event in &group.events {
                if let Some(ref target) = event.process {
                    if !group.processes.iter().any(|p| &p.name == target) {
                        return Err(OverseerError::ConfigValidationError(format!(
                            "Event '{}' in group {} targets unknown process {}",
                            event.rule, group.name, target
                        )));
                    }
                }
            }
        }

        registry::validate_graph(
            self.processes()
                .map(|p| (p.name.as_str(), p.depends_on.as_slice())),
        )
    }

    /// Iterate over every process of every group
    pub fn processes(&self) -> impl Iterator<Item = &ProcessConfig> {
        self.groups.iter().flat_map(|g| g.processes.iter())
    }

    /// Build the process registry, backing each process with a shell command spawner
    pub fn build_registry(&self) -> Result<Registry> {
        let mut registry = Registry::new();

        for group in &self.groups {
            registry.add_group(ProcessGroup {
                name: group.name.clone(),
                processes: group.processes.iter().map(|p| p.name.clone()).collect(),
                events: group.events.clone(),
            })?;

            for process in &group.processes {
                let control = Arc::new(CommandProcess::new(process.clone()));
                registry.add(Process::new(group.name.clone(), process.clone(), control))?;
            }
        }

        registry.validate_dependencies()?;

        Ok(registry)
    }
}

impl ProcessConfig {
    /// Minimal configuration running `start` with every other field defaulted
    pub fn new(name: impl Into<String>, start: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            start: start.into(),
            stop: None,
            restart: None,
            cwd: None,
            env: HashMap::new(),
            depends_on: Vec::new(),
            monitor_mode: MonitorMode::default(),
            pid_file: None,
            stop_signal: default_stop_signal(),
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(OverseerError::MissingConfigField("name".to_string()));
        }

        if self.name == "all" {
            return Err(OverseerError::ConfigValidationError(
                "'all' is reserved and cannot be used as a process name".to_string(),
            ));
        }

        if self.start.trim().is_empty() {
            return Err(OverseerError::MissingConfigField(format!(
                "start (process {})",
                self.name
            )));
        }

        if !VALID_SIGNALS.contains(&self.stop_signal.as_str()) {
            return Err(OverseerError::ConfigValidationError(format!(
                "Invalid stop_signal: {}. Must be one of: {}",
                self.stop_signal,
                VALID_SIGNALS.join(", ")
            )));
        }

        if self.depends_on.iter().any(|d| d == &self.name) {
            return Err(OverseerError::DependencyCycle(format!(
                "{} -> {}",
                self.name, self.name
            )));
        }

        if let Some(ref cwd) = self.cwd {
            if !cwd.is_dir() {
                return Err(OverseerError::ConfigValidationError(format!(
                    "Working directory does not exist: {}",
                    cwd.display()
                )));
            }
        }

        Ok(())
    }

    /// Expand environment variables in commands, paths and env values
    fn expand_env_vars(&mut self) {
        self.start = Self::expand_env_in_string(&self.start);
        self.stop = self.stop.as_deref().map(Self::expand_env_in_string);
        self.restart = self.restart.as_deref().map(Self::expand_env_in_string);
        self.cwd = self.cwd.as_deref().map(Self::expand_env_in_path);
        self.pid_file = self.pid_file.as_deref().map(Self::expand_env_in_path);

        self.env = self
            .env
            .iter()
            .map(|(k, v)| (k.clone(), Self::expand_env_in_string(v)))
            .collect();
    }

    /// Expand `$VAR` and `${VAR}` references
    fn expand_env_in_string(s: &str) -> String {
        let mut result = s.to_string();

        for (key, value) in std::env::vars() {
            result = result.replace(&format!("${{{}}}", key), &value);
            result = result.replace(&format!("${}", key), &value);
        }

        result
    }

    fn expand_env_in_path(path: &Path) -> PathBuf {
        let path_str = path.to_string_lossy();
        PathBuf::from(Self::expand_env_in_string(&path_str))
    }
}
