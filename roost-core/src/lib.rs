//! # roost-core
//!
//! Client-side capability layer for session-oriented coordination services.
//!
//! This library provides:
//! - **[`CoordinationClient`]** — the async capability recipes are written
//!   against: node CRUD, one-shot existence watches, and connection-state
//!   notifications.
//! - **Typed errors** distinguishing transient connectivity failures from
//!   terminal session expiry and configuration mistakes.
//! - **Connection configuration** with a bounded-exponential-backoff retry
//!   policy that clients apply to transient call failures, so recipes never
//!   re-implement call retries.
//! - **Namespace façade** scoping all paths of an existing client under a
//!   prefix.
//! - **In-process memory backend** with real session and watch semantics for
//!   tests and local development.
//!
//! ## Design Principles
//!
//! - Recipes see one logical operation per client call; retry policy is a
//!   client concern.
//! - Session identity is diagnostics-only; correctness flows through the
//!   connection event stream and typed errors.
//! - One-shot watches are explicit: nothing re-arms behind the caller's
//!   back.

pub mod client;
pub mod config;
pub mod error;
pub mod memory;
pub mod namespace;
pub mod paths;

// Re-export key types for convenient access
pub use client::{ConnectionEvent, CoordinationClient, CreateMode, NodeWatch, WatchEvent};
pub use config::{ConnectConfig, RetryPolicy};
pub use error::{CoordinationError, CoordinationResult};
pub use memory::{MemoryClient, MemoryCluster};
pub use namespace::Namespaced;
