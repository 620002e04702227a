// Process module - supervised programs and the registry that holds them

pub mod control;
pub mod pid;
pub mod registry;
pub mod spawner;
mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use control::ProcessControl;
pub use pid::PidFile;
pub use registry::{ProcessGroup, Registry};
pub use spawner::CommandProcess;
pub use types::{MonitorMode, Process};
