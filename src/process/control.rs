use crate::error::Result;
use async_trait::async_trait;

/// The capability surface the supervisor needs from a managed program.
///
/// Implementations issue the request and return; waiting for the program to
/// come up or go down is left to the caller, which polls `is_running`.
#[async_trait]
pub trait ProcessControl: Send + Sync {
    /// Launch the program and return the PID it runs under
    async fn start(&self) -> Result<u32>;

    /// Ask the program to exit
    async fn stop(&self) -> Result<()>;

    /// Run the program's own restart procedure and return the new PID
    async fn restart(&self) -> Result<u32>;

    /// Whether the program is currently alive
    fn is_running(&self) -> bool;

    /// PID of the running program, if known
    fn pid(&self) -> Option<u32>;
}
