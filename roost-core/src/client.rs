//! The coordination client capability consumed by recipes.
//!
//! Recipes are written against [`CoordinationClient`] rather than any
//! concrete transport: node CRUD, one-shot existence watches, and a
//! connection-state event stream. Call-level retries for transient failures
//! belong to the implementation behind this trait, configured via
//! [`RetryPolicy`](crate::config::RetryPolicy); a recipe treats each call as
//! one logical operation.

use async_trait::async_trait;
use tokio::sync::{broadcast, oneshot};

use crate::error::CoordinationResult;

/// How a node is created on the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateMode {
    /// Lives until explicitly deleted.
    Persistent,
    /// Persistent, with a server-assigned monotonic suffix.
    PersistentSequential,
    /// Removed by the service when the creating session ends.
    Ephemeral,
    /// Ephemeral, with a server-assigned monotonic suffix.
    EphemeralSequential,
}

impl CreateMode {
    /// Node is scoped to the creating session.
    pub fn is_ephemeral(&self) -> bool {
        matches!(self, CreateMode::Ephemeral | CreateMode::EphemeralSequential)
    }

    /// Server appends a monotonically increasing suffix to the requested
    /// path, guaranteeing uniqueness among siblings.
    pub fn is_sequential(&self) -> bool {
        matches!(
            self,
            CreateMode::PersistentSequential | CreateMode::EphemeralSequential
        )
    }
}

/// Connection lifecycle transitions delivered to subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// Session health uncertain; the connection may still resolve without a
    /// session change.
    Suspended,
    /// Session re-established, possibly under a new session id. Ephemeral
    /// nodes created under the old session are guaranteed gone.
    Reconnected,
    /// Session irrecoverably expired; a subsequent reconnect uses a fresh
    /// session.
    Lost,
}

/// What a fired existence watch observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEvent {
    /// A node appeared at the watched path.
    Created,
    /// The node at the watched path was removed, for any reason.
    Deleted,
    /// The watch was invalidated by disconnection or backend teardown.
    Invalidated,
}

/// One-shot existence watch handle.
///
/// Resolves exactly once, when the watched path's existence changes or the
/// watch is invalidated. Implementations hand the paired sender to whatever
/// fires their notifications.
#[derive(Debug)]
pub struct NodeWatch {
    rx: oneshot::Receiver<WatchEvent>,
}

impl NodeWatch {
    /// Create a watch and the sender that fires it.
    pub fn channel() -> (oneshot::Sender<WatchEvent>, NodeWatch) {
        let (tx, rx) = oneshot::channel();
        (tx, NodeWatch { rx })
    }

    /// Wait for the watch to fire. A dropped sender surfaces as
    /// [`WatchEvent::Invalidated`].
    pub async fn fired(self) -> WatchEvent {
        self.rx.await.unwrap_or(WatchEvent::Invalidated)
    }
}

/// Session-bearing coordination service client.
///
/// The session id changes across reconnect cycles and is exposed for
/// diagnostics only; correctness decisions belong to the event stream and
/// the typed errors.
#[async_trait]
pub trait CoordinationClient: Send + Sync + 'static {
    /// Create a node at `path` with `data`, returning the server-assigned
    /// path (which differs from `path` under sequential modes).
    async fn create_node(
        &self,
        path: &str,
        data: &[u8],
        mode: CreateMode,
    ) -> CoordinationResult<String>;

    /// Delete the node at `path`. A missing node is not an error.
    async fn delete_node(&self, path: &str) -> CoordinationResult<()>;

    /// Report whether a node exists at `path` and arm a one-shot watch that
    /// fires when that answer changes.
    async fn exists_watch(&self, path: &str) -> CoordinationResult<(bool, NodeWatch)>;

    /// Subscribe to connection lifecycle transitions. Dropping the receiver
    /// is the (idempotent) deregistration.
    fn connection_events(&self) -> broadcast::Receiver<ConnectionEvent>;

    /// Current session id, for diagnostics.
    fn session_id(&self) -> u64;
}
