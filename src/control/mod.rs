// Control module - dependency-aware dispatch of control actions

mod dispatcher;
pub mod state;

pub use dispatcher::{ControlDispatcher, DispatcherConfig, ProcessStatus};
pub use state::{ControlState, MonitorState};

use crate::error::{OverseerError, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// A control action that can be dispatched against a process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Start,
    Stop,
    Restart,
    Monitor,
    Unmonitor,
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Action::Start => write!(f, "start"),
            Action::Stop => write!(f, "stop"),
            Action::Restart => write!(f, "restart"),
            Action::Monitor => write!(f, "monitor"),
            Action::Unmonitor => write!(f, "unmonitor"),
        }
    }
}

impl FromStr for Action {
    type Err = OverseerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "start" => Ok(Action::Start),
            "stop" => Ok(Action::Stop),
            "restart" => Ok(Action::Restart),
            "monitor" => Ok(Action::Monitor),
            "unmonitor" => Ok(Action::Unmonitor),
            other => Err(OverseerError::Other(format!("Unknown action: {}", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_parse_and_display() {
        for action in [
            Action::Start,
            Action::Stop,
            Action::Restart,
            Action::Monitor,
            Action::Unmonitor,
        ] {
            assert_eq!(action.to_string().parse::<Action>().unwrap(), action);
        }
        assert_eq!(" Restart ".parse::<Action>().unwrap(), Action::Restart);
        assert!("reload".parse::<Action>().is_err());
    }
}
