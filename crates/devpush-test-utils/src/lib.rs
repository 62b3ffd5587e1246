//! Shared test utilities for the devpush workspace.
//!
//! Dev-dependency only, never published.
//!
//! # Modules
//!
//! - [`remote`]: [`FakeRemote`], an in-memory [`devpush_core::RemoteTarget`]
//! - [`cluster`]: [`FakeCluster`], a versioned in-memory [`devpush_core::ClusterApi`]
//! - [`tree`]: [`TestTree`] builder for local source trees

pub mod cluster;
pub mod remote;
pub mod tree;

pub use cluster::{CallCounts, FakeCluster};
pub use remote::{FakeRemote, Fault, OpKind, RemoteOp, StreamGate};
pub use tree::TestTree;
