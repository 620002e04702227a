// Daemon module - process-level concerns of the supervisor daemon

pub mod daemonize;
pub mod manager;

pub use daemonize::daemonize;
pub use manager::{DaemonManager, DaemonStatus};
