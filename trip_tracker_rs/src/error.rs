use thiserror::Error;

/// Trip tracker error types
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TrackerError {
    #[error("Location permission not granted")]
    PermissionDenied,

    #[error("Location provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Location permission revoked: {0}")]
    SecurityRevoked(String),

    #[error("Role classification failed: {0}")]
    ClassificationFailure(String),

    #[error("Session already running")]
    AlreadyRunning,

    #[error("Session not running")]
    NotRunning,

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Trip already finalized")]
    TripFinalized,

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl TrackerError {
    /// Errors that end a session instead of triggering recovery
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            TrackerError::PermissionDenied | TrackerError::SecurityRevoked(_)
        )
    }

    /// Transient errors that are handled by downgrading the acquisition mode
    pub fn is_transient(&self) -> bool {
        matches!(self, TrackerError::ProviderUnavailable(_))
    }
}

impl From<std::io::Error> for TrackerError {
    fn from(err: std::io::Error) -> Self {
        TrackerError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for TrackerError {
    fn from(err: serde_json::Error) -> Self {
        TrackerError::Storage(err.to_string())
    }
}

/// Result type for tracker operations
pub type Result<T> = std::result::Result<T, TrackerError>;
