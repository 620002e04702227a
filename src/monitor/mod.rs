// Monitor module - resource rules, their evaluation loop and alert delivery

mod alert;
mod engine;
mod event;
mod rule;

pub use alert::{AlertChannel, AlertMessage};
pub use engine::{EventMonitor, Readings, EVALUATION_TICK};
pub use event::{compile_events, ParsedEvent, RuleAction, DEFAULT_EVENT_INTERVAL_SECS};
pub use rule::{parse_rule, Condition, Operator};
