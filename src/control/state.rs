use serde::{Deserialize, Serialize};

/// Persisted flag values for the monitor state
pub const MONITOR_NOT: u8 = 0x0;
pub const MONITOR_YES: u8 = 0x1;
pub const MONITOR_INIT: u8 = 0x2;
pub const MONITOR_WAITING: u8 = 0x4;

/// Monitoring lifecycle of a process.
///
/// | from                      | event                   | to             |
/// |---------------------------|-------------------------|----------------|
/// | `Unmonitored`             | start / monitor         | `Initializing` |
/// | `Initializing`            | liveness confirmed      | `Monitored`    |
/// | `Initializing`/`Monitored`| stop / unmonitor        | `Unmonitored`  |
/// | any                       | action begins           | `PendingAction`|
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub enum MonitorState {
    #[default]
    Unmonitored,
    Initializing,
    Monitored,
    PendingAction,
}

impl MonitorState {
    pub fn flags(self) -> u8 {
        match self {
            MonitorState::Unmonitored => MONITOR_NOT,
            MonitorState::Initializing => MONITOR_INIT,
            MonitorState::Monitored => MONITOR_YES,
            MonitorState::PendingAction => MONITOR_WAITING,
        }
    }

    pub fn from_flags(flags: u8) -> Self {
        if flags & MONITOR_YES != 0 {
            MonitorState::Monitored
        } else if flags & MONITOR_INIT != 0 {
            MonitorState::Initializing
        } else if flags & MONITOR_WAITING != 0 {
            MonitorState::PendingAction
        } else {
            MonitorState::Unmonitored
        }
    }

    /// Whether the watcher and rule engine should look after the process
    pub fn is_monitored(self) -> bool {
        matches!(self, MonitorState::Initializing | MonitorState::Monitored)
    }

    /// Enable monitoring; an already monitored process keeps its state
    pub fn enabled(self) -> Self {
        match self {
            MonitorState::Monitored => MonitorState::Monitored,
            _ => MonitorState::Initializing,
        }
    }

    /// Liveness confirmed by the watcher
    pub fn confirmed(self) -> Self {
        match self {
            MonitorState::Initializing => MonitorState::Monitored,
            other => other,
        }
    }
}

impl From<u8> for MonitorState {
    fn from(flags: u8) -> Self {
        MonitorState::from_flags(flags)
    }
}

impl From<MonitorState> for u8 {
    fn from(state: MonitorState) -> Self {
        state.flags()
    }
}

impl std::fmt::Display for MonitorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MonitorState::Unmonitored => write!(f, "unmonitored"),
            MonitorState::Initializing => write!(f, "initializing"),
            MonitorState::Monitored => write!(f, "monitored"),
            MonitorState::PendingAction => write!(f, "pending"),
        }
    }
}

/// Per-process runtime bookkeeping that survives daemon restarts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ControlState {
    /// Successful spawns since the history began
    #[serde(default)]
    pub starts: u64,
    #[serde(default)]
    pub monitor: MonitorState,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_round_trip() {
        for state in [
            MonitorState::Unmonitored,
            MonitorState::Initializing,
            MonitorState::Monitored,
            MonitorState::PendingAction,
        ] {
            assert_eq!(MonitorState::from_flags(state.flags()), state);
        }
    }

    #[test]
    fn test_yes_wins_over_other_flags() {
        assert_eq!(
            MonitorState::from_flags(MONITOR_YES | MONITOR_WAITING),
            MonitorState::Monitored
        );
        assert_eq!(
            MonitorState::from_flags(MONITOR_INIT | MONITOR_WAITING),
            MonitorState::Initializing
        );
    }

    #[test]
    fn test_transitions() {
        assert_eq!(MonitorState::Unmonitored.enabled(), MonitorState::Initializing);
        assert_eq!(MonitorState::Monitored.enabled(), MonitorState::Monitored);
        assert_eq!(MonitorState::Initializing.confirmed(), MonitorState::Monitored);
        assert_eq!(MonitorState::Unmonitored.confirmed(), MonitorState::Unmonitored);
        assert!(!MonitorState::PendingAction.is_monitored());
    }

    #[test]
    fn test_serialized_as_flags() {
        let state = ControlState {
            starts: 3,
            monitor: MonitorState::Initializing,
        };
        let json = serde_json::to_string(&state).unwrap();
        assert_eq!(json, r#"{"starts":3,"monitor":2}"#);

        let back: ControlState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, state);
    }
}
