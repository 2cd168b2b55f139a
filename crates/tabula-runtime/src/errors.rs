//! Runtime error types.
//!
//! Agent-level failures (bad tool arguments, failing scripts, exhausted
//! budgets, provider outages) are reported as events on the call stream.
//! [`RuntimeError`] covers what cannot be: the consumer going away, input
//! the agent cannot work with, and replay mismatches.

/// Errors that end an agent call or a replay.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// The consumer dropped the event stream.
    #[error("Operation cancelled")]
    Cancelled,

    /// The query does not carry the input this agent needs.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A recorded step could not be reproduced.
    #[error("Replay error: {0}")]
    Replay(String),

    /// Recording (de)serialization failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal / unexpected error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl RuntimeError {
    /// Whether the error is recoverable (user can retry).
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Cancelled => true,
            Self::InvalidInput(_) | Self::Replay(_) | Self::Serialization(_) | Self::Internal(_) => {
                false
            }
        }
    }

    /// Error category string for logs.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Cancelled => "cancelled",
            Self::InvalidInput(_) => "invalid_input",
            Self::Replay(_) => "replay",
            Self::Serialization(_) => "serialization",
            Self::Internal(_) => "internal",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runtime_error_display() {
        assert_eq!(RuntimeError::Cancelled.to_string(), "Operation cancelled");
        assert_eq!(
            RuntimeError::InvalidInput("plot agent needs one table".into()).to_string(),
            "Invalid input: plot agent needs one table"
        );
    }

    #[test]
    fn runtime_error_category() {
        assert_eq!(RuntimeError::Cancelled.category(), "cancelled");
        assert_eq!(RuntimeError::Replay("x".into()).category(), "replay");
        assert_eq!(RuntimeError::Internal("x".into()).category(), "internal");
    }

    #[test]
    fn only_cancellation_is_recoverable() {
        assert!(RuntimeError::Cancelled.is_recoverable());
        assert!(!RuntimeError::InvalidInput("x".into()).is_recoverable());
        let json_err = serde_json::from_str::<u8>("nope").unwrap_err();
        assert!(!RuntimeError::from(json_err).is_recoverable());
    }
}
