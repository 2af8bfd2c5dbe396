//! Namespace-scoping façade over any [`CoordinationClient`].
//!
//! Shares the underlying connection but prefixes every outgoing path with a
//! namespace and strips the prefix from server-assigned paths, so callers
//! see paths relative to their own scope. Façades nest: wrapping an already
//! namespaced client appends to the existing namespace.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::client::{ConnectionEvent, CoordinationClient, CreateMode, NodeWatch};
use crate::error::CoordinationResult;
use crate::paths;

/// A client scoped under a namespace prefix.
#[derive(Debug, Clone)]
pub struct Namespaced<C> {
    inner: Arc<C>,
    prefix: String,
}

impl<C: CoordinationClient> Namespaced<C> {
    /// Scope `inner` under `namespace`, which must be a valid path. The
    /// root namespace `/` is permitted and scopes nothing.
    pub fn new(inner: Arc<C>, namespace: &str) -> CoordinationResult<Self> {
        paths::validate(namespace)?;
        Ok(Self {
            inner,
            prefix: namespace.trim_end_matches('/').to_owned(),
        })
    }

    /// The namespace this façade scopes to.
    pub fn namespace(&self) -> &str {
        if self.prefix.is_empty() {
            "/"
        } else {
            &self.prefix
        }
    }

    fn resolve(&self, path: &str) -> String {
        paths::join(&self.prefix, path)
    }

    fn relative(&self, full: &str) -> String {
        match full.strip_prefix(&self.prefix) {
            Some(rest) if rest.starts_with('/') => rest.to_owned(),
            _ => full.to_owned(),
        }
    }
}

#[async_trait]
impl<C: CoordinationClient> CoordinationClient for Namespaced<C> {
    async fn create_node(
        &self,
        path: &str,
        data: &[u8],
        mode: CreateMode,
    ) -> CoordinationResult<String> {
        let actual = self.inner.create_node(&self.resolve(path), data, mode).await?;
        Ok(self.relative(&actual))
    }

    async fn delete_node(&self, path: &str) -> CoordinationResult<()> {
        self.inner.delete_node(&self.resolve(path)).await
    }

    async fn exists_watch(&self, path: &str) -> CoordinationResult<(bool, NodeWatch)> {
        self.inner.exists_watch(&self.resolve(path)).await
    }

    fn connection_events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.inner.connection_events()
    }

    fn session_id(&self) -> u64 {
        self.inner.session_id()
    }
}
