use thiserror::Error;

/// Main error type for the steward supervisor
#[derive(Debug, Error)]
pub enum StewardError {
    // Start failures
    #[error("Failed to spawn server {0}: {1}")]
    SpawnError(String, String),

    #[error("Server {name} exited during startup grace period ({exit_info})")]
    ExitedEarly { name: String, exit_info: String },

    // Stop failures
    #[error("Failed to stop server {0}: {1}")]
    StopError(String, String),

    #[error("Signal error: {0}")]
    SignalError(String),

    // Fleet lookups
    #[error("Server not found: {0}")]
    ServerNotFound(String),

    #[error("Server already registered: {0}")]
    ServerAlreadyExists(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid configuration file: {0}")]
    InvalidConfig(String),

    #[error("Missing required configuration field: {0}")]
    MissingConfigField(String),

    #[error("Configuration validation failed: {0}")]
    ConfigValidationError(String),

    // Log retrieval
    #[error("No log file configured for server {0}")]
    LogUnavailable(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl StewardError {
    /// True for the start-failure family (spawn failure, immediate crash)
    pub fn is_start_error(&self) -> bool {
        matches!(
            self,
            StewardError::SpawnError(..) | StewardError::ExitedEarly { .. }
        )
    }
}

/// Result type alias for steward operations
pub type Result<T> = std::result::Result<T, StewardError>;
