//! In-process coordination backend for tests and local development.
//!
//! [`MemoryCluster`] plays the part of the service ensemble: a node
//! namespace with session-scoped ephemeral ownership, per-parent sequential
//! suffix assignment, and one-shot existence watches. [`MemoryClient`] is a
//! session-bearing handle implementing [`CoordinationClient`], with controls
//! to suspend, resume, or expire its session the way an integration harness
//! would kill a server-side session.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, trace};

use crate::client::{ConnectionEvent, CoordinationClient, CreateMode, NodeWatch, WatchEvent};
use crate::config::RetryPolicy;
use crate::error::{CoordinationError, CoordinationResult};
use crate::paths;

const EVENT_CHANNEL_CAPACITY: usize = 16;

/// Shared in-memory stand-in for the service ensemble.
#[derive(Debug, Clone, Default)]
pub struct MemoryCluster {
    inner: Arc<Mutex<ClusterState>>,
}

#[derive(Debug, Default)]
struct ClusterState {
    nodes: BTreeMap<String, NodeEntry>,
    watches: BTreeMap<String, Vec<oneshot::Sender<WatchEvent>>>,
    // per-parent counters for sequential suffix assignment
    sequences: BTreeMap<String, u64>,
}

#[derive(Debug)]
struct NodeEntry {
    data: Vec<u8>,
    // owning session for ephemeral nodes
    owner: Option<u64>,
}

impl MemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// New session-bearing client with the default retry policy.
    pub fn connect(&self) -> MemoryClient {
        self.connect_with_retry(RetryPolicy::default())
    }

    /// New session-bearing client with a custom retry policy.
    pub fn connect_with_retry(&self, retry: RetryPolicy) -> MemoryClient {
        MemoryClient::new(self.clone(), retry)
    }

    /// Whether a node currently exists at `path`.
    pub fn exists(&self, path: &str) -> bool {
        self.inner
            .lock()
            .expect("memory cluster lock poisoned")
            .nodes
            .contains_key(path)
    }

    /// Payload of the node at `path`, if it exists.
    pub fn data(&self, path: &str) -> Option<Vec<u8>> {
        self.inner
            .lock()
            .expect("memory cluster lock poisoned")
            .nodes
            .get(path)
            .map(|entry| entry.data.clone())
    }

    fn create(
        &self,
        session: u64,
        path: &str,
        data: &[u8],
        mode: CreateMode,
    ) -> CoordinationResult<String> {
        paths::validate(path)?;
        let mut state = self.inner.lock().expect("memory cluster lock poisoned");
        let actual = if mode.is_sequential() {
            let counter = state.sequences.entry(paths::parent(path).to_owned()).or_default();
            let actual = format!("{path}{:010}", *counter);
            *counter += 1;
            actual
        } else {
            path.to_owned()
        };
        if state.nodes.contains_key(&actual) {
            return Err(CoordinationError::NodeExists(actual));
        }
        state.nodes.insert(
            actual.clone(),
            NodeEntry {
                data: data.to_vec(),
                owner: mode.is_ephemeral().then_some(session),
            },
        );
        Self::notify(&mut state, &actual, WatchEvent::Created);
        Ok(actual)
    }

    fn delete(&self, path: &str) -> CoordinationResult<()> {
        let mut state = self.inner.lock().expect("memory cluster lock poisoned");
        // missing node is not an error, delete is best-effort by contract
        if state.nodes.remove(path).is_some() {
            Self::notify(&mut state, path, WatchEvent::Deleted);
        }
        Ok(())
    }

    fn exists_watch(&self, path: &str) -> CoordinationResult<(bool, NodeWatch)> {
        paths::validate(path)?;
        let mut state = self.inner.lock().expect("memory cluster lock poisoned");
        let (tx, watch) = NodeWatch::channel();
        state.watches.entry(path.to_owned()).or_default().push(tx);
        Ok((state.nodes.contains_key(path), watch))
    }

    /// Remove every ephemeral node owned by `session`, firing deletion
    /// watches, the way the service reaps an expired session.
    fn expire(&self, session: u64) {
        let mut state = self.inner.lock().expect("memory cluster lock poisoned");
        let doomed: Vec<String> = state
            .nodes
            .iter()
            .filter(|(_, entry)| entry.owner == Some(session))
            .map(|(path, _)| path.clone())
            .collect();
        for path in doomed {
            state.nodes.remove(&path);
            Self::notify(&mut state, &path, WatchEvent::Deleted);
            debug!(%path, session, "reaped ephemeral of expired session");
        }
    }

    fn notify(state: &mut ClusterState, path: &str, event: WatchEvent) {
        if let Some(watchers) = state.watches.remove(path) {
            for tx in watchers {
                // receiver may already be gone
                let _ = tx.send(event);
            }
        }
    }
}

/// Session-bearing handle onto a [`MemoryCluster`].
///
/// Transient failures (calls issued while the connection is down) are
/// retried internally under the injected [`RetryPolicy`]; consumers see one
/// logical operation per call.
#[derive(Debug, Clone)]
pub struct MemoryClient {
    cluster: MemoryCluster,
    session: Arc<Mutex<SessionState>>,
    events: broadcast::Sender<ConnectionEvent>,
    retry: RetryPolicy,
}

#[derive(Debug)]
struct SessionState {
    id: u64,
    connected: bool,
}

impl MemoryClient {
    fn new(cluster: MemoryCluster, retry: RetryPolicy) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            cluster,
            session: Arc::new(Mutex::new(SessionState {
                id: rand::random(),
                connected: true,
            })),
            events,
            retry,
        }
    }

    /// Drop the connection without ending the session. Ephemeral nodes
    /// survive; calls fail as [`CoordinationError::NotConnected`] once the
    /// retry policy is exhausted.
    pub fn suspend(&self) {
        self.session
            .lock()
            .expect("session lock poisoned")
            .connected = false;
        let _ = self.events.send(ConnectionEvent::Suspended);
    }

    /// Re-establish the connection with the same session.
    pub fn resume(&self) {
        self.session
            .lock()
            .expect("session lock poisoned")
            .connected = true;
        let _ = self.events.send(ConnectionEvent::Reconnected);
    }

    /// Expire the session: the cluster reaps its ephemerals, then the client
    /// reconnects under a fresh session id. Subscribers observe
    /// [`ConnectionEvent::Lost`] followed by [`ConnectionEvent::Reconnected`],
    /// the way a real client rides out a server-side expiry.
    pub fn expire_session(&self) {
        let old = {
            let mut session = self.session.lock().expect("session lock poisoned");
            session.connected = false;
            session.id
        };
        self.cluster.expire(old);
        let _ = self.events.send(ConnectionEvent::Lost);
        {
            let mut session = self.session.lock().expect("session lock poisoned");
            session.id = rand::random();
            session.connected = true;
        }
        let _ = self.events.send(ConnectionEvent::Reconnected);
    }

    fn current_session(&self) -> CoordinationResult<u64> {
        let session = self.session.lock().expect("session lock poisoned");
        if session.connected {
            Ok(session.id)
        } else {
            Err(CoordinationError::NotConnected(format!(
                "session {:#x} has no live connection",
                session.id
            )))
        }
    }

    /// Wait out disconnection under the retry policy, returning the live
    /// session id or the final [`CoordinationError::NotConnected`].
    async fn session_with_retry(&self, what: &'static str) -> CoordinationResult<u64> {
        let mut attempt = 0u32;
        loop {
            match self.current_session() {
                Ok(id) => return Ok(id),
                Err(_) if attempt + 1 < self.retry.max_attempts => {
                    let delay = self.retry.delay_for(attempt);
                    trace!(what, attempt, ?delay, "disconnected, backing off before retry");
                    attempt += 1;
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[async_trait]
impl CoordinationClient for MemoryClient {
    async fn create_node(
        &self,
        path: &str,
        data: &[u8],
        mode: CreateMode,
    ) -> CoordinationResult<String> {
        let session = self.session_with_retry("create").await?;
        let actual = self.cluster.create(session, path, data, mode)?;
        debug!(%path, %actual, session, "created node");
        Ok(actual)
    }

    async fn delete_node(&self, path: &str) -> CoordinationResult<()> {
        self.session_with_retry("delete").await?;
        self.cluster.delete(path)
    }

    async fn exists_watch(&self, path: &str) -> CoordinationResult<(bool, NodeWatch)> {
        self.session_with_retry("exists").await?;
        self.cluster.exists_watch(path)
    }

    fn connection_events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events.subscribe()
    }

    fn session_id(&self) -> u64 {
        self.session.lock().expect("session lock poisoned").id
    }
}
