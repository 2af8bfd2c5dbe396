//! Connection configuration for coordination clients.
//!
//! The retry policy lives here, on the client side of the seam: recipes
//! never re-implement call retries, they see each client call as a single
//! logical operation that either succeeds or has exhausted the policy.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CoordinationError, CoordinationResult};
use crate::paths;

/// Default session timeout negotiated with the service.
const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(30);

/// Bounded exponential backoff applied by clients to transient call
/// failures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Delay before the first retry; doubles on each subsequent retry.
    pub base_delay: Duration,
    /// Upper bound on any single backoff delay.
    pub max_delay: Duration,
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            max_attempts: 5,
        }
    }
}

impl RetryPolicy {
    /// Backoff before the retry following failure number `attempt`
    /// (0-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.max_delay)
    }
}

/// Configuration for connecting to a coordination service ensemble.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectConfig {
    /// "host:port,host:port" list of ensemble members. Should name every
    /// member in case any one is temporarily unavailable.
    pub connect_string: String,
    /// Optional namespace prefixed to every path used through the
    /// connection. Must be a valid path if set.
    #[serde(default)]
    pub namespace: Option<String>,
    /// Session timeout negotiated with the service.
    #[serde(default = "default_session_timeout")]
    pub session_timeout: Duration,
    /// Retry policy for transient call failures.
    #[serde(default)]
    pub retry: RetryPolicy,
}

fn default_session_timeout() -> Duration {
    DEFAULT_SESSION_TIMEOUT
}

impl ConnectConfig {
    /// Configuration with defaults for everything but the connect string.
    pub fn new(connect_string: impl Into<String>) -> Self {
        Self {
            connect_string: connect_string.into(),
            namespace: None,
            session_timeout: DEFAULT_SESSION_TIMEOUT,
            retry: RetryPolicy::default(),
        }
    }

    /// Scope every path used through the connection under `namespace`.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Replace the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Check the configuration before any connection attempt.
    pub fn validate(&self) -> CoordinationResult<()> {
        if self.connect_string.is_empty() {
            return Err(CoordinationError::Config(
                "connect_string must list at least one ensemble member".into(),
            ));
        }
        if let Some(namespace) = &self.namespace {
            paths::validate(namespace)?;
        }
        if self.retry.max_attempts == 0 {
            return Err(CoordinationError::Config(
                "retry.max_attempts must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
