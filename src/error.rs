use thiserror::Error;

/// Main error type for the overseer supervisor
#[derive(Debug, Error)]
pub enum OverseerError {
    // Control errors
    #[error("Process not found: {0}")]
    NotFound(String),

    #[error("Action already in progress for process {0}")]
    ActionInProgress(String),

    #[error("Failed to spawn process {0}: {1}")]
    SpawnFailure(String, String),

    #[error("Process {0} is still running after stop attempt")]
    StopTimeout(String),

    #[error("Failed to stop process {0}: {1}")]
    StopError(String, String),

    #[error("Process already exists: {0}")]
    ProcessAlreadyExists(String),

    // Dependency graph errors
    #[error("Process {0} depends on unknown process {1}")]
    UnknownDependency(String, String),

    #[error("Dependency cycle detected: {0}")]
    DependencyCycle(String),

    // Rule errors
    #[error("Failed to parse rule '{rule}': {reason}")]
    RuleParse { rule: String, reason: String },

    #[error("Unknown rule action: {0}")]
    UnknownRuleAction(String),

    #[error("Unknown resource: {0}")]
    UnknownResource(String),

    #[error("Resource unavailable for pid {0}: {1}")]
    ResourceUnavailable(u32, String),

    #[error("Failed to deliver alert: {0}")]
    AlertError(String),

    // State store errors
    #[error("Persistence error: {0}")]
    Persistence(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid configuration file: {0}")]
    InvalidConfig(String),

    #[error("Missing required configuration field: {0}")]
    MissingConfigField(String),

    #[error("Configuration validation failed: {0}")]
    ConfigValidationError(String),

    // IPC errors
    #[error("IPC error: {0}")]
    IpcError(String),

    #[error("Failed to connect to daemon: {0}")]
    ConnectionError(String),

    #[error("IPC protocol error: {0}")]
    ProtocolError(String),

    #[error("Daemon not running")]
    DaemonNotRunning,

    /// The daemon answered, but refused the request
    #[error("{0}")]
    Rejected(String),

    // System errors
    #[error("Signal error: {0}")]
    SignalError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Deserialization error: {0}")]
    DeserializationError(String),

    #[error("{0}")]
    Other(String),
}

/// Result type alias for overseer operations
pub type Result<T> = std::result::Result<T, OverseerError>;
