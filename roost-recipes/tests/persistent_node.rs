//! End-to-end behavior of `PersistentEphemeralNode` against the in-process
//! memory backend: establishment, close semantics, recreation after session
//! expiry and external deletion, sequential uniqueness, and post-close
//! quiescence.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing_test::traced_test;

use roost_core::client::{ConnectionEvent, CoordinationClient, CreateMode, NodeWatch};
use roost_core::error::CoordinationResult;
use roost_core::memory::{MemoryClient, MemoryCluster};
use roost_core::{Namespaced, RetryPolicy, WatchEvent};
use roost_recipes::PersistentEphemeralNode;

const PATH: &str = "/test/foo";
const DATA: &[u8] = b"data";

fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        base_delay: Duration::from_millis(5),
        max_delay: Duration::from_millis(40),
        max_attempts: 8,
    }
}

fn connect(cluster: &MemoryCluster) -> Arc<MemoryClient> {
    Arc::new(cluster.connect_with_retry(fast_retry()))
}

fn start_node(client: Arc<MemoryClient>, mode: CreateMode) -> PersistentEphemeralNode {
    PersistentEphemeralNode::new(client, PATH, DATA, mode).expect("controller should start")
}

async fn within<T>(fut: impl Future<Output = T>) -> T {
    tokio::time::timeout(Duration::from_secs(5), fut)
        .await
        .expect("timed out waiting for condition")
}

async fn wait_until(cond: impl Fn() -> bool) {
    within(async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
}

/// Wait for the controller to report an established node.
async fn established(node: &PersistentEphemeralNode) -> String {
    wait_until(|| node.actual_path().is_some()).await;
    node.actual_path().expect("just observed an assignment")
}

#[tokio::test]
async fn creates_node_on_construction() {
    let cluster = MemoryCluster::new();
    let node = start_node(connect(&cluster), CreateMode::Ephemeral);

    let actual = established(&node).await;
    assert_eq!(actual, PATH);
    assert!(cluster.exists(&actual));
    assert_eq!(cluster.data(&actual).as_deref(), Some(DATA));

    node.close_timeout(Duration::from_secs(10)).await;
}

#[tokio::test]
async fn deletes_node_when_closed() {
    let cluster = MemoryCluster::new();
    let node = start_node(connect(&cluster), CreateMode::Ephemeral);
    let actual = established(&node).await;

    assert!(node.close_timeout(Duration::from_secs(10)).await);
    assert!(!cluster.exists(&actual));
    assert_eq!(node.actual_path(), None);
}

#[tokio::test]
async fn closing_multiple_times() {
    let cluster = MemoryCluster::new();
    let node = start_node(connect(&cluster), CreateMode::Ephemeral);
    let actual = established(&node).await;

    assert!(node.close_timeout(Duration::from_secs(10)).await);
    assert!(!cluster.exists(&actual));

    assert!(node.close_timeout(Duration::from_secs(10)).await);
    assert!(!cluster.exists(&actual));
}

#[tokio::test]
async fn concurrent_close_converges() {
    let cluster = MemoryCluster::new();
    let node = start_node(connect(&cluster), CreateMode::Ephemeral);
    let actual = established(&node).await;

    let (first, second) = tokio::join!(
        node.close_timeout(Duration::from_secs(10)),
        node.close_timeout(Duration::from_secs(10)),
    );
    assert!(first);
    assert!(second);
    assert!(!cluster.exists(&actual));
}

/// Wraps a memory client with an artificially slow delete so a close
/// timeout can elapse while the teardown is still running.
struct SlowDeleteClient {
    inner: MemoryClient,
    delay: Duration,
}

#[async_trait]
impl CoordinationClient for SlowDeleteClient {
    async fn create_node(
        &self,
        path: &str,
        data: &[u8],
        mode: CreateMode,
    ) -> CoordinationResult<String> {
        self.inner.create_node(path, data, mode).await
    }

    async fn delete_node(&self, path: &str) -> CoordinationResult<()> {
        tokio::time::sleep(self.delay).await;
        self.inner.delete_node(path).await
    }

    async fn exists_watch(&self, path: &str) -> CoordinationResult<(bool, NodeWatch)> {
        self.inner.exists_watch(path).await
    }

    fn connection_events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.inner.connection_events()
    }

    fn session_id(&self) -> u64 {
        self.inner.session_id()
    }
}

#[tokio::test]
async fn close_timeout_bounds_the_wait_not_the_teardown() {
    let cluster = MemoryCluster::new();
    let client = Arc::new(SlowDeleteClient {
        inner: cluster.connect_with_retry(fast_retry()),
        delay: Duration::from_millis(200),
    });
    let node = PersistentEphemeralNode::new(client, PATH, DATA, CreateMode::Ephemeral).unwrap();
    let actual = established(&node).await;

    // too short for the slow delete; the caller gives up but the teardown
    // keeps running
    assert!(!node.close_timeout(Duration::from_millis(20)).await);
    wait_until(|| !cluster.exists(&actual)).await;

    // a later caller observes the already-finished close immediately
    assert!(node.close_timeout(Duration::from_millis(20)).await);
}

#[tokio::test]
#[traced_test]
async fn deletes_node_when_session_expires() {
    let cluster = MemoryCluster::new();
    let client = connect(&cluster);
    let observer = connect(&cluster);
    let node = start_node(Arc::clone(&client), CreateMode::Ephemeral);
    let actual = established(&node).await;

    let (exists, watch) = observer.exists_watch(&actual).await.unwrap();
    assert!(exists);

    client.expire_session();
    assert_eq!(within(watch.fired()).await, WatchEvent::Deleted);

    node.close_timeout(Duration::from_secs(10)).await;
}

#[tokio::test]
#[traced_test]
async fn recreates_node_when_session_reconnects() {
    let cluster = MemoryCluster::new();
    let client = connect(&cluster);
    let node = start_node(Arc::clone(&client), CreateMode::Ephemeral);
    established(&node).await;

    // two full expiry cycles: recreation must re-arm its own watch each time
    for _ in 0..2 {
        client.expire_session();
        wait_until(|| cluster.exists(PATH)).await;
        wait_until(|| node.actual_path().as_deref() == Some(PATH)).await;
        assert_eq!(cluster.data(PATH).as_deref(), Some(DATA));
    }

    node.close_timeout(Duration::from_secs(10)).await;
}

#[tokio::test]
async fn recreates_node_when_deleted_externally() {
    let cluster = MemoryCluster::new();
    let client = connect(&cluster);
    let observer = connect(&cluster);
    let node = start_node(Arc::clone(&client), CreateMode::Ephemeral);
    let original = established(&node).await;

    observer.delete_node(&original).await.unwrap();

    // same session, same mode: the node reappears at the identical path
    wait_until(|| cluster.exists(&original)).await;
    wait_until(|| node.actual_path().as_deref() == Some(original.as_str())).await;
    assert_eq!(cluster.data(&original).as_deref(), Some(DATA));

    node.close_timeout(Duration::from_secs(10)).await;
}

#[tokio::test]
async fn sequential_nodes_get_unique_paths() {
    let cluster = MemoryCluster::new();
    let client = connect(&cluster);

    let first = start_node(Arc::clone(&client), CreateMode::EphemeralSequential);
    let second = start_node(Arc::clone(&client), CreateMode::EphemeralSequential);

    let path1 = established(&first).await;
    let path2 = established(&second).await;
    assert_ne!(path1, path2);
    assert!(path1.starts_with(PATH));
    assert!(path2.starts_with(PATH));

    first.close_timeout(Duration::from_secs(10)).await;
    second.close_timeout(Duration::from_secs(10)).await;
}

#[tokio::test]
async fn sequential_recreation_assigns_a_fresh_path() {
    let cluster = MemoryCluster::new();
    let client = connect(&cluster);
    let node = start_node(Arc::clone(&client), CreateMode::EphemeralSequential);
    let original = established(&node).await;

    client.expire_session();

    wait_until(|| matches!(node.actual_path(), Some(ref path) if *path != original)).await;
    let recreated = node.actual_path().unwrap();
    assert!(recreated.starts_with(PATH));
    assert!(cluster.exists(&recreated));
    assert!(!cluster.exists(&original));

    node.close_timeout(Duration::from_secs(10)).await;
}

#[tokio::test]
#[traced_test]
async fn no_activity_after_close_despite_pending_triggers() {
    let cluster = MemoryCluster::new();
    let client = connect(&cluster);
    let observer = connect(&cluster);
    let node = start_node(Arc::clone(&client), CreateMode::Ephemeral);
    let actual = established(&node).await;

    // fire recreation triggers immediately before closing
    observer.delete_node(&actual).await.unwrap();
    client.expire_session();
    assert!(node.close_timeout(Duration::from_secs(10)).await);

    // any superseded completion drains its own cleanup; after that the node
    // must stay gone
    tokio::time::sleep(Duration::from_millis(250)).await;
    for _ in 0..5 {
        assert!(!cluster.exists(PATH));
        assert_eq!(node.actual_path(), None);
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn suspension_alone_does_not_recreate() {
    let cluster = MemoryCluster::new();
    let client = connect(&cluster);
    let node = start_node(Arc::clone(&client), CreateMode::Ephemeral);
    let actual = established(&node).await;

    client.suspend();
    for _ in 0..5 {
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(cluster.exists(&actual));
        assert_eq!(node.actual_path().as_deref(), Some(actual.as_str()));
    }

    // resuming with the same session finds the node still there and adopts it
    client.resume();
    wait_until(|| node.actual_path().as_deref() == Some(actual.as_str())).await;
    assert!(cluster.exists(&actual));

    node.close_timeout(Duration::from_secs(10)).await;
}

#[tokio::test]
async fn namespaced_client_scopes_the_node() {
    let cluster = MemoryCluster::new();
    let client = connect(&cluster);
    let scoped = Arc::new(Namespaced::new(client, "/green").unwrap());
    let node = PersistentEphemeralNode::new(scoped, PATH, DATA, CreateMode::Ephemeral).unwrap();

    let actual = established(&node).await;
    assert_eq!(actual, PATH);
    assert!(cluster.exists("/green/test/foo"));
    assert!(!cluster.exists(PATH));

    assert!(node.close_timeout(Duration::from_secs(10)).await);
    assert!(!cluster.exists("/green/test/foo"));
}
