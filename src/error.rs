use thiserror::Error;

#[derive(Error, Debug)]
pub enum TrackerError {
    #[error("Session expired")]
    AuthExpired,

    #[error("Transient failure: {0}")]
    Transient(String),

    #[error("Operation failed: {0}")]
    Terminal(String),

    #[error("Cancel rejected: {0}")]
    CancelRejected(String),

    #[error("HTTP transport error: {0}")]
    TransportError(#[from] reqwest::Error),

    #[error("JSON serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Poll interval must be greater than zero")]
    InvalidInterval,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Operation not tracked: {0}")]
    OperationNotFound(String),

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),
}

impl TrackerError {
    /// Whether the next scheduled tick should simply try again.
    pub fn is_transient(&self) -> bool {
        matches!(self, TrackerError::Transient(_) | TrackerError::TransportError(_))
    }
}

pub type TrackerResult<T> = Result<T, TrackerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(TrackerError::Transient("502".to_string()).is_transient());
        assert!(!TrackerError::AuthExpired.is_transient());
        assert!(!TrackerError::Terminal("bad request".to_string()).is_transient());
        assert!(!TrackerError::CancelRejected("nope".to_string()).is_transient());
    }

    #[test]
    fn test_error_messages() {
        let err = TrackerError::Terminal("backup storage location not found".to_string());
        assert_eq!(err.to_string(), "Operation failed: backup storage location not found");
        assert_eq!(
            TrackerError::InvalidInterval.to_string(),
            "Poll interval must be greater than zero"
        );
    }
}
