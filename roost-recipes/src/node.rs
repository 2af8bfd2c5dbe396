//! A node that behaves as if persistent while its owner is alive.
//!
//! The coordination service removes ephemeral nodes whenever the creating
//! session ends, including sessions lost to a transient network blip. This
//! recipe recreates its node after every reconnect and after out-of-band
//! deletions, so the node's logical lifetime matches the
//! [`PersistentEphemeralNode`] handle rather than any single session.
//!
//! Every asynchronous completion carries the creation epoch it was issued
//! under and is re-validated against the controller state before it commits
//! anything. A slow create superseded by a newer attempt (or by close)
//! cleans up after itself instead of resurrecting the node.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use roost_core::client::{ConnectionEvent, CoordinationClient, CreateMode};
use roost_core::error::{CoordinationError, CoordinationResult};
use roost_core::paths;

/// Controller lifecycle. `Closed` is terminal: events arriving there are
/// ignored, which is what makes close idempotent against in-flight
/// recreation races.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    /// Constructed, first create not yet issued.
    Latent,
    /// Create issued or node live; recreation triggers are honored.
    Started,
    Closed,
}

/// Most recent server-assigned path. Differs from the requested path under
/// sequential modes. Absent before the first successful create, between an
/// invalidation and the next successful recreation, and after close.
#[derive(Debug, Default)]
struct AssignedPath(Option<String>);

impl AssignedPath {
    fn assign(&mut self, path: String) {
        self.0 = Some(path);
    }

    fn clear(&mut self) {
        self.0 = None;
    }

    fn take(&mut self) -> Option<String> {
        self.0.take()
    }

    fn get(&self) -> Option<String> {
        self.0.clone()
    }

    fn matches(&self, path: &str) -> bool {
        self.0.as_deref() == Some(path)
    }
}

struct NodeState {
    lifecycle: Lifecycle,
    // tags the authoritative creation attempt; completions under any other
    // value are stale
    epoch: u64,
    assigned: AssignedPath,
    observer: Option<JoinHandle<()>>,
    watcher: Option<JoinHandle<()>>,
}

struct Shared {
    client: Arc<dyn CoordinationClient>,
    base_path: String,
    data: Vec<u8>,
    mode: CreateMode,
    state: Mutex<NodeState>,
    closed_tx: watch::Sender<bool>,
}

/// Outcome of validating a completed create against current state.
enum Commit {
    Committed,
    /// Superseded, but a newer attempt adopted this same node.
    Current,
    Superseded,
}

/// An ephemeral node recreated for as long as this handle stays open.
///
/// Construction validates its arguments synchronously and issues the first
/// create in the background; [`actual_path`](Self::actual_path) reports
/// `Some` once the node is established. Connection recovery and out-of-band
/// deletions trigger transparent recreation until [`close`](Self::close) or
/// [`close_timeout`](Self::close_timeout) is called.
///
/// Must be constructed and closed within a tokio runtime.
pub struct PersistentEphemeralNode {
    shared: Arc<Shared>,
    closed_rx: watch::Receiver<bool>,
}

impl PersistentEphemeralNode {
    /// Start a controller for `path` with `data` under an ephemeral create
    /// mode.
    ///
    /// Fails synchronously, before any network call, on an invalid path or
    /// a non-ephemeral mode. A successful return means the first create is
    /// pending; it does not mean the node exists yet.
    pub fn new(
        client: Arc<dyn CoordinationClient>,
        path: &str,
        data: &[u8],
        mode: CreateMode,
    ) -> CoordinationResult<Self> {
        paths::validate(path)?;
        if !mode.is_ephemeral() {
            return Err(CoordinationError::Config(format!(
                "create mode {mode:?} is not ephemeral; a persistent node needs no recreation"
            )));
        }

        let (closed_tx, closed_rx) = watch::channel(false);
        let shared = Arc::new(Shared {
            client,
            base_path: path.to_owned(),
            data: data.to_vec(),
            mode,
            state: Mutex::new(NodeState {
                lifecycle: Lifecycle::Latent,
                epoch: 0,
                assigned: AssignedPath::default(),
                observer: None,
                watcher: None,
            }),
            closed_tx,
        });

        Shared::start(&shared);
        Ok(Self { shared, closed_rx })
    }

    /// The server-assigned path, or `None` while the node is not currently
    /// established (before the first create completes, between an
    /// invalidation and the next successful recreation, and after close).
    pub fn actual_path(&self) -> Option<String> {
        self.shared.state.lock().assigned.get()
    }

    /// The path the controller was constructed with.
    pub fn base_path(&self) -> &str {
        &self.shared.base_path
    }

    /// Trigger close and wait up to `timeout` for the teardown — observer
    /// and watch deregistration plus the best-effort delete — to finish.
    ///
    /// Idempotent and safe under concurrent callers: the first caller
    /// drives the teardown, every caller waits on the same completion
    /// signal, and no caller's timeout cancels the underlying teardown.
    /// Returns whether the teardown completed within the bound.
    pub async fn close_timeout(&self, timeout: Duration) -> bool {
        Shared::begin_close(&self.shared);
        let mut closed = self.closed_rx.clone();
        tokio::time::timeout(timeout, closed.wait_for(|done| *done))
            .await
            .is_ok_and(|received| received.is_ok())
    }

    /// Trigger close without waiting on the background delete.
    pub fn close(&self) {
        Shared::begin_close(&self.shared);
    }
}

impl fmt::Debug for PersistentEphemeralNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("PersistentEphemeralNode")
            .field("base_path", &self.shared.base_path)
            .field("mode", &self.shared.mode)
            .field("lifecycle", &state.lifecycle)
            .field("actual_path", &state.assigned.0)
            .finish_non_exhaustive()
    }
}

impl Drop for PersistentEphemeralNode {
    fn drop(&mut self) {
        // Stop background activity if the owner never closed. Nothing can be
        // awaited here, so the delete is skipped; the ephemeral property
        // covers eventual cleanup once the session ends.
        let mut state = self.shared.state.lock();
        if state.lifecycle != Lifecycle::Closed {
            state.lifecycle = Lifecycle::Closed;
            state.epoch += 1;
            if let Some(observer) = state.observer.take() {
                observer.abort();
            }
            if let Some(watcher) = state.watcher.take() {
                watcher.abort();
            }
            state.assigned.clear();
        }
    }
}

impl Shared {
    fn start(shared: &Arc<Self>) {
        let epoch = {
            let mut state = shared.state.lock();
            debug_assert_eq!(state.lifecycle, Lifecycle::Latent);
            state.lifecycle = Lifecycle::Started;
            state.epoch += 1;
            let events = shared.client.connection_events();
            state.observer = Some(tokio::spawn(Self::observe(Arc::clone(shared), events)));
            state.epoch
        };
        Self::spawn_create(Arc::clone(shared), epoch);
    }

    /// Connection-state observer. Reconnects and losses both mean any
    /// ephemeral created under the previous session is gone, so both signal
    /// recreation; a suspension may still resolve without a session change.
    async fn observe(shared: Arc<Self>, mut events: broadcast::Receiver<ConnectionEvent>) {
        loop {
            match events.recv().await {
                Ok(ConnectionEvent::Suspended) => {
                    debug!(path = %shared.base_path, "connection suspended, awaiting outcome");
                }
                Ok(event @ (ConnectionEvent::Reconnected | ConnectionEvent::Lost)) => {
                    debug!(
                        path = %shared.base_path,
                        ?event,
                        session = shared.client.session_id(),
                        "connection transition, scheduling recreation"
                    );
                    Self::recreate(&shared);
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    // A missed event either demanded recreation or nothing.
                    warn!(
                        path = %shared.base_path,
                        missed,
                        "connection events lagged, scheduling recreation"
                    );
                    Self::recreate(&shared);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    /// Begin a new creation attempt, superseding whatever was in flight.
    /// No-op once closed.
    fn recreate(shared: &Arc<Self>) {
        let epoch = {
            let mut state = shared.state.lock();
            if state.lifecycle != Lifecycle::Started {
                return;
            }
            state.epoch += 1;
            state.assigned.clear();
            if let Some(watcher) = state.watcher.take() {
                watcher.abort();
            }
            state.epoch
        };
        Self::spawn_create(Arc::clone(shared), epoch);
    }

    fn spawn_create(shared: Arc<Self>, epoch: u64) {
        tokio::spawn(async move {
            if !shared.is_current(epoch) {
                return;
            }
            let result = shared
                .client
                .create_node(&shared.base_path, &shared.data, shared.mode)
                .await;
            match result {
                Ok(actual) => Self::commit(&shared, epoch, actual).await,
                // A live session already owns the node at this exact path;
                // adopt it instead of treating the conflict as fatal.
                Err(CoordinationError::NodeExists(existing)) if !shared.mode.is_sequential() => {
                    Self::commit(&shared, epoch, existing).await
                }
                Err(err) if err.is_retryable() => {
                    // The client's own retry policy is exhausted. The next
                    // connection-state or watch event drives a fresh attempt.
                    warn!(
                        path = %shared.base_path,
                        %err,
                        epoch,
                        "create failed after client-side retries"
                    );
                }
                Err(err) => {
                    error!(path = %shared.base_path, %err, epoch, "unrecoverable create failure");
                }
            }
        });
    }

    /// Validate a completed create against current state under the lock,
    /// then act on the outcome with the lock released.
    async fn commit(shared: &Arc<Self>, epoch: u64, actual: String) {
        let outcome = {
            let mut state = shared.state.lock();
            if state.lifecycle == Lifecycle::Started && state.epoch == epoch {
                state.assigned.assign(actual.clone());
                let watcher = tokio::spawn(Self::watch(Arc::clone(shared), epoch, actual.clone()));
                if let Some(stale) = state.watcher.replace(watcher) {
                    stale.abort();
                }
                Commit::Committed
            } else if state.assigned.matches(&actual) {
                Commit::Current
            } else {
                Commit::Superseded
            }
        };
        match outcome {
            Commit::Committed => {
                debug!(path = %actual, epoch, "node established");
            }
            Commit::Current => {
                debug!(path = %actual, epoch, "stale create matches current assignment, leaving node");
            }
            Commit::Superseded => {
                // Don't leak a node nothing is tracking anymore.
                debug!(path = %actual, epoch, "create superseded, deleting fresh node");
                let _ = shared.client.delete_node(&actual).await;
            }
        }
    }

    /// Arm a one-shot existence watch on `path` and re-enter creation when
    /// it fires. Re-arming is explicit: each successful create registers its
    /// own watch, or deletion notifications would be silently lost after the
    /// first cycle.
    async fn watch(shared: Arc<Self>, epoch: u64, path: String) {
        match shared.client.exists_watch(&path).await {
            Ok((exists, watch)) => {
                if !exists {
                    // Deleted in the window between the create completing and
                    // the watch arming.
                    if shared.is_current(epoch) {
                        Self::recreate(&shared);
                    }
                    return;
                }
                let event = watch.fired().await;
                // Cause is irrelevant: explicit delete, session reaping, and
                // invalidation all land on the same recreate-or-ignore check.
                debug!(%path, ?event, epoch, "existence watch fired");
                if shared.is_current(epoch) {
                    Self::recreate(&shared);
                }
            }
            Err(err) => {
                warn!(%path, %err, epoch, "failed to arm existence watch");
            }
        }
    }

    fn is_current(&self, epoch: u64) -> bool {
        let state = self.state.lock();
        state.lifecycle == Lifecycle::Started && state.epoch == epoch
    }

    /// First caller transitions to `Closed` and drives the teardown; later
    /// callers find the state already closed and only wait on the signal.
    fn begin_close(shared: &Arc<Self>) {
        let assigned = {
            let mut state = shared.state.lock();
            if state.lifecycle == Lifecycle::Closed {
                return;
            }
            state.lifecycle = Lifecycle::Closed;
            state.epoch += 1;
            if let Some(observer) = state.observer.take() {
                observer.abort();
            }
            if let Some(watcher) = state.watcher.take() {
                watcher.abort();
            }
            state.assigned.take()
        };

        let shared = Arc::clone(shared);
        tokio::spawn(async move {
            if let Some(path) = assigned {
                // Best effort: a failed delete only delays cleanup until the
                // session ends and the service reaps the ephemeral itself.
                if let Err(err) = shared.client.delete_node(&path).await {
                    debug!(%path, %err, "delete during close failed");
                }
            }
            let _ = shared.closed_tx.send(true);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use roost_core::client::NodeWatch;

    /// Fails the test if the controller touches the network.
    struct UnreachableClient;

    #[async_trait]
    impl CoordinationClient for UnreachableClient {
        async fn create_node(
            &self,
            _path: &str,
            _data: &[u8],
            _mode: CreateMode,
        ) -> CoordinationResult<String> {
            panic!("construction must fail before any network call");
        }

        async fn delete_node(&self, _path: &str) -> CoordinationResult<()> {
            panic!("construction must fail before any network call");
        }

        async fn exists_watch(&self, _path: &str) -> CoordinationResult<(bool, NodeWatch)> {
            panic!("construction must fail before any network call");
        }

        fn connection_events(&self) -> broadcast::Receiver<ConnectionEvent> {
            panic!("construction must fail before any network call");
        }

        fn session_id(&self) -> u64 {
            0
        }
    }

    #[test]
    fn test_rejects_empty_path() {
        let err = PersistentEphemeralNode::new(
            Arc::new(UnreachableClient),
            "",
            b"data",
            CreateMode::Ephemeral,
        )
        .unwrap_err();
        assert!(matches!(err, CoordinationError::InvalidPath { .. }));
    }

    #[test]
    fn test_rejects_relative_path() {
        let err = PersistentEphemeralNode::new(
            Arc::new(UnreachableClient),
            "test/foo",
            b"data",
            CreateMode::Ephemeral,
        )
        .unwrap_err();
        assert!(matches!(err, CoordinationError::InvalidPath { .. }));
    }

    #[test]
    fn test_rejects_persistent_mode() {
        let err = PersistentEphemeralNode::new(
            Arc::new(UnreachableClient),
            "/test/foo",
            b"data",
            CreateMode::Persistent,
        )
        .unwrap_err();
        assert!(matches!(err, CoordinationError::Config(_)));
    }

    #[test]
    fn test_rejects_persistent_sequential_mode() {
        let err = PersistentEphemeralNode::new(
            Arc::new(UnreachableClient),
            "/test/foo",
            b"data",
            CreateMode::PersistentSequential,
        )
        .unwrap_err();
        assert!(matches!(err, CoordinationError::Config(_)));
    }

    #[test]
    fn test_assigned_path_tracking() {
        let mut assigned = AssignedPath::default();
        assert_eq!(assigned.get(), None);

        assigned.assign("/test/foo0000000003".into());
        assert!(assigned.matches("/test/foo0000000003"));
        assert_eq!(assigned.get().as_deref(), Some("/test/foo0000000003"));

        assigned.clear();
        assert_eq!(assigned.take(), None);

        assigned.assign("/test/foo".into());
        assert_eq!(assigned.take().as_deref(), Some("/test/foo"));
        assert_eq!(assigned.get(), None);
    }
}
