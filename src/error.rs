//! Error types for the scheduling agent
//!
//! Errors are classified by who has to deal with them:
//! - Surfaced: bad schedule input and durable-store failures go back to the caller
//! - Soft: an unreachable network only gates work until the next tick
//! - Local: selector failures and exhausted join budgets are logged and reported once

use thiserror::Error;

/// Failures talking to the durable key/value store.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage task failed: {0}")]
    Task(String),
}

/// Error taxonomy shared by the scheduler, the protocol layer and the join detector.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Network unavailable")]
    NetworkUnavailable,

    #[error("Join attempts exhausted: {0}")]
    DetectionExhausted(String),

    #[error("Platform UI strategy {strategy} failed: {message}")]
    PlatformUi { strategy: String, message: String },

    #[error("Browser error: {0}")]
    Browser(String),

    #[error("Scheduler is not running")]
    ChannelClosed,

    #[error("Status delivery failed: {0}")]
    Delivery(String),
}

impl AgentError {
    pub fn validation(message: impl Into<String>) -> Self {
        AgentError::Validation(message.into())
    }

    /// Returns true if retrying on a later tick may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AgentError::NetworkUnavailable | AgentError::Storage(_) | AgentError::Browser(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(!AgentError::validation("bad").is_retryable());
        assert!(AgentError::NetworkUnavailable.is_retryable());
        assert!(!AgentError::DetectionExhausted("timeout".to_string()).is_retryable());

        let storage = AgentError::from(StorageError::Task("join".to_string()));
        assert!(storage.is_retryable());
    }

    #[test]
    fn test_validation_message_is_bare() {
        let err = AgentError::validation("Invalid start time");
        assert_eq!(err.to_string(), "Invalid start time");
    }
}
