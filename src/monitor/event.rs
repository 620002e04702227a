use super::engine::TICK_SLACK;
use super::rule::{parse_rule, Condition};
use crate::config::EventConfig;
use crate::control::Action;
use crate::error::{OverseerError, Result};
use crate::process::Registry;
use std::time::{Duration, Instant};

/// Default seconds between two evaluations of an event
pub const DEFAULT_EVENT_INTERVAL_SECS: u64 = 10;

/// What a triggered rule does
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleAction {
    Start,
    Stop,
    Restart,
    Alert,
}

impl RuleAction {
    pub fn parse(name: &str) -> Result<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "start" => Ok(RuleAction::Start),
            "stop" => Ok(RuleAction::Stop),
            "restart" => Ok(RuleAction::Restart),
            "alert" => Ok(RuleAction::Alert),
            _ => Err(OverseerError::UnknownRuleAction(name.to_string())),
        }
    }

    /// The control action to dispatch, or `None` for alerts
    pub fn control_action(self) -> Option<Action> {
        match self {
            RuleAction::Start => Some(Action::Start),
            RuleAction::Stop => Some(Action::Stop),
            RuleAction::Restart => Some(Action::Restart),
            RuleAction::Alert => None,
        }
    }
}

impl std::fmt::Display for RuleAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RuleAction::Start => write!(f, "start"),
            RuleAction::Stop => write!(f, "stop"),
            RuleAction::Restart => write!(f, "restart"),
            RuleAction::Alert => write!(f, "alert"),
        }
    }
}

/// A compiled rule bound to a single process
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedEvent {
    pub group: String,
    pub process: String,
    pub rule: String,
    pub condition: Condition,
    /// How long the condition must hold before triggering
    pub duration: Duration,
    /// Zero means every tick
    pub interval: Duration,
    pub action: RuleAction,
    pub description: Option<String>,
}

impl ParsedEvent {
    pub fn compile(group: &str, process: &str, config: &EventConfig) -> Result<Self> {
        let condition = parse_rule(&config.rule)?;
        let action = RuleAction::parse(&config.action)?;

        Ok(Self {
            group: group.to_string(),
            process: process.to_string(),
            rule: config.rule.clone(),
            condition,
            duration: Duration::from_secs(config.duration_secs.unwrap_or(0)),
            interval: Duration::from_secs(
                config.interval_secs.unwrap_or(DEFAULT_EVENT_INTERVAL_SECS),
            ),
            action,
            description: config.description.clone(),
        })
    }

    /// Whether a full interval has passed since the event was last evaluated
    pub fn is_due(&self, last: Option<Instant>, now: Instant) -> bool {
        match last {
            Some(last) => now.saturating_duration_since(last) + TICK_SLACK >= self.interval,
            None => true,
        }
    }
}

/// Compile every group's events against the registry
///
/// A rule that fails to compile is returned as an error and skipped; the
/// remaining rules are unaffected.
pub fn compile_events(registry: &Registry) -> (Vec<ParsedEvent>, Vec<OverseerError>) {
    let mut events = Vec::new();
    let mut errors = Vec::new();

    for group in registry.groups() {
        for config in &group.events {
            let targets: Vec<&str> = match config.process {
                Some(ref process) => vec![process.as_str()],
                None => group.processes.iter().map(String::as_str).collect(),
            };

            for process in targets {
                if !registry.contains(process) {
                    errors.push(OverseerError::NotFound(process.to_string()));
                    continue;
                }
                match ParsedEvent::compile(&group.name, process, config) {
                    Ok(event) => events.push(event),
                    Err(e) => errors.push(e),
                }
            }
        }
    }

    (events, errors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProcessConfig;
    use crate::process::testing::FakeProcess;
    use crate::process::{Process, ProcessGroup};
    use crate::resource::{Amount, Resource};
    use std::sync::Arc;

    fn event(process: Option<&str>, rule: &str, action: &str) -> EventConfig {
        EventConfig {
            process: process.map(String::from),
            rule: rule.to_string(),
            duration_secs: None,
            interval_secs: None,
            action: action.to_string(),
            description: None,
        }
    }

    fn registry(events: Vec<EventConfig>) -> Registry {
        let mut registry = Registry::new();
        registry
            .add_group(ProcessGroup {
                name: "backend".to_string(),
                processes: vec!["db".to_string(), "api".to_string()],
                events,
            })
            .unwrap();
        for name in ["db", "api"] {
            registry
                .add(Process::new(
                    "backend",
                    ProcessConfig::new(name, "true"),
                    Arc::new(FakeProcess::new(name)),
                ))
                .unwrap();
        }
        registry
    }

    #[test]
    fn test_compile_defaults() {
        let config = event(Some("db"), "memory_used > 1mb", "restart");
        let parsed = ParsedEvent::compile("backend", "db", &config).unwrap();

        assert_eq!(parsed.action, RuleAction::Restart);
        assert_eq!(parsed.condition.resource, Resource::MemoryUsed);
        assert_eq!(parsed.condition.threshold, Amount::Integer(1024 * 1024));
        assert_eq!(parsed.interval, Duration::from_secs(DEFAULT_EVENT_INTERVAL_SECS));
        assert_eq!(parsed.duration, Duration::ZERO);
    }

    #[test]
    fn test_is_due() {
        let start = Instant::now();
        let at = |secs: u64| start + Duration::from_secs(secs);

        let mut config = event(None, "cpu_percent > 90", "alert");
        config.interval_secs = Some(0);
        let every_tick = ParsedEvent::compile("g", "p", &config).unwrap();
        assert!(every_tick.is_due(None, start));
        assert!(every_tick.is_due(Some(start), start));

        config.interval_secs = Some(3);
        let every_third = ParsedEvent::compile("g", "p", &config).unwrap();
        assert!(every_third.is_due(None, start));
        assert!(!every_third.is_due(Some(start), at(2)));
        assert!(every_third.is_due(Some(start), at(3)));
        // A tick that wakes a little early still counts
        assert!(every_third.is_due(Some(start), at(3) - Duration::from_millis(5)));
    }

    #[test]
    fn test_group_wide_event() {
        let registry = registry(vec![event(None, "cpu_percent > 50", "alert")]);
        let (events, errors) = compile_events(&registry);

        assert!(errors.is_empty());
        let targets: Vec<&str> = events.iter().map(|e| e.process.as_str()).collect();
        assert_eq!(targets, vec!["db", "api"]);
    }

    #[test]
    fn test_bad_rule_drops_only_that_rule() {
        let registry = registry(vec![
            event(Some("db"), "disk_used > 1gb", "restart"),
            event(Some("db"), "memory_used > 1gb", "explode"),
            event(Some("api"), "memory_used > 1gb", "stop"),
        ]);
        let (events, errors) = compile_events(&registry);

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].process, "api");
        assert_eq!(events[0].action, RuleAction::Stop);

        assert_eq!(errors.len(), 2);
        assert!(matches!(errors[0], OverseerError::RuleParse { .. }));
        assert!(matches!(errors[1], OverseerError::UnknownRuleAction(_)));
    }

    #[test]
    fn test_rule_action_mapping() {
        assert_eq!(RuleAction::parse("Restart").unwrap(), RuleAction::Restart);
        assert_eq!(RuleAction::Stop.control_action(), Some(Action::Stop));
        assert_eq!(RuleAction::Alert.control_action(), None);
    }
}
