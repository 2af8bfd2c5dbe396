//! Error types for coordination service operations.
//!
//! Provides typed variants so that recipes can distinguish transient
//! connectivity failures (left to the client's retry policy) from terminal
//! conditions like session expiry or configuration mistakes.

use thiserror::Error;

/// Top-level error type for coordination operations.
#[derive(Debug, Error)]
pub enum CoordinationError {
    /// Connection or transport-level failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// Operation timed out waiting for the service.
    #[error("timeout: {0}")]
    Timeout(String),

    /// The client is not currently connected.
    #[error("not connected: {0}")]
    NotConnected(String),

    /// The session has irrecoverably expired; ephemeral nodes it owned are
    /// gone and a fresh session is required.
    #[error("session expired: {0:#x}")]
    SessionExpired(u64),

    /// No node exists at the given path.
    #[error("no node at '{0}'")]
    NoNode(String),

    /// A node already exists at the given path.
    #[error("node already exists at '{0}'")]
    NodeExists(String),

    /// The path does not satisfy coordination path syntax.
    #[error("invalid path '{path}': {reason}")]
    InvalidPath { path: String, reason: &'static str },

    /// Configuration error (missing or disallowed argument).
    #[error("configuration error: {0}")]
    Config(String),
}

impl CoordinationError {
    /// Returns true if this error indicates a transient failure that may
    /// succeed on retry (transport, timeout, or a dropped connection).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CoordinationError::Transport(_)
                | CoordinationError::Timeout(_)
                | CoordinationError::NotConnected(_)
        )
    }

    /// Returns true if this error marks the end of the owning session.
    pub fn is_session_expiry(&self) -> bool {
        matches!(self, CoordinationError::SessionExpired(_))
    }
}

/// Shorthand result alias for coordination operations.
pub type CoordinationResult<T> = Result<T, CoordinationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let transport = CoordinationError::Transport("conn reset".into());
        assert!(transport.is_retryable());
        assert!(!transport.is_session_expiry());

        let timeout = CoordinationError::Timeout("deadline exceeded".into());
        assert!(timeout.is_retryable());

        let not_conn = CoordinationError::NotConnected("no conn".into());
        assert!(not_conn.is_retryable());

        let expired = CoordinationError::SessionExpired(0xdead);
        assert!(!expired.is_retryable());
        assert!(expired.is_session_expiry());

        let no_node = CoordinationError::NoNode("/a".into());
        assert!(!no_node.is_retryable());

        let exists = CoordinationError::NodeExists("/a".into());
        assert!(!exists.is_retryable());

        let bad_path = CoordinationError::InvalidPath {
            path: "a".into(),
            reason: "path must start with '/'",
        };
        assert!(!bad_path.is_retryable());

        let config = CoordinationError::Config("missing connect string".into());
        assert!(!config.is_retryable());
    }

    #[test]
    fn test_error_display() {
        let err = CoordinationError::SessionExpired(0xbeef);
        assert_eq!(format!("{err}"), "session expired: 0xbeef");

        let err = CoordinationError::InvalidPath {
            path: "foo/".into(),
            reason: "path must start with '/'",
        };
        let msg = format!("{err}");
        assert!(msg.contains("foo/"));
        assert!(msg.contains("start with"));
    }
}
