//! Error types for the sniper core

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using our custom Error
pub type Result<T> = std::result::Result<T, Error>;

/// Failure kinds reported by the execution adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    InsufficientFunds,
    SlippageExceeded,
    Timeout,
    RpcError,
    Rejected,
}

impl FailureKind {
    /// Timeouts and RPC errors are transient; everything else is terminal
    pub fn is_retryable(&self) -> bool {
        matches!(self, FailureKind::Timeout | FailureKind::RpcError)
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::InsufficientFunds => write!(f, "insufficient funds"),
            FailureKind::SlippageExceeded => write!(f, "slippage exceeded"),
            FailureKind::Timeout => write!(f, "timeout"),
            FailureKind::RpcError => write!(f, "rpc error"),
            FailureKind::Rejected => write!(f, "rejected"),
        }
    }
}

/// Failure returned by a trade executor
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct ExecutionFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl ExecutionFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

/// Main error type for the sniper core
#[derive(Error, Debug)]
pub enum Error {
    // Feed errors
    #[error("Feed decode error: {0}")]
    FeedDecode(String),

    #[error("Feed disconnected: {0}")]
    FeedDisconnected(String),

    // Position management errors
    #[error("Position already open: {0}")]
    DuplicatePosition(String),

    #[error("Position persistence failed: {0}")]
    PositionPersistence(String),

    // Prediction errors (never propagated into decisions)
    #[error("Prediction unavailable: {0}")]
    PredictionUnavailable(String),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl Error {
    /// Check if this error is retryable (transient)
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::FeedDisconnected(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_kind_retryable() {
        assert!(FailureKind::Timeout.is_retryable());
        assert!(FailureKind::RpcError.is_retryable());
        assert!(!FailureKind::InsufficientFunds.is_retryable());
        assert!(!FailureKind::SlippageExceeded.is_retryable());
        assert!(!FailureKind::Rejected.is_retryable());
    }

    #[test]
    fn test_error_retryable() {
        assert!(Error::FeedDisconnected("reset by peer".into()).is_retryable());
        assert!(!Error::FeedDecode("line 3: eof".into()).is_retryable());
        assert!(!Error::DuplicatePosition("Mint111".into()).is_retryable());
    }

    #[test]
    fn test_execution_failure_display() {
        let failure = ExecutionFailure::new(FailureKind::RpcError, "node down");
        assert!(failure.is_retryable());
        assert_eq!(failure.to_string(), "rpc error: node down");
    }
}
