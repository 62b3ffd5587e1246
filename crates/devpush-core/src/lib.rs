//! Watch, diff, sync and reconcile pipeline for devpush
//!
//! This crate turns a local source tree and a declared component into a
//! running remote environment, implementing:
//!
//! - **ChangeWatcher**: debounced filesystem notifications as cycle triggers
//! - **DiffEngine**: added/modified/deleted classification between index snapshots
//! - **SyncTransport**: ordered delivery of a delta into the remote target
//! - **ReconcileManager**: minimal create/update/delete of cluster resources
//! - **RetryScheduler**: bounded retry with backoff for every remote call
//! - **PushController**: the control loop that owns and commits push state
//!
//! # Architecture
//!
//! ```text
//!   ChangeWatcher --trigger--> PushController
//!                                   |
//!        +-------------+------------+-------------+-------------+
//!        |             |            |             |             |
//!   FileIndexer    diff()    ReconcileManager SyncTransport  StateStore
//!   (devpush-fs)                    |             |         (devpush-fs io)
//!                                   +--RetryScheduler--+
//!                                   |                  |
//!                              ClusterApi        RemoteTarget
//! ```
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use devpush_core::{ComponentSpec, PushController, SyncConfig};
//!
//! async fn push(remote: Arc<dyn devpush_core::RemoteTarget>, cluster: Arc<dyn devpush_core::ClusterApi>) -> devpush_core::Result<()> {
//!     let spec = ComponentSpec::new("api", "node:20");
//!     let config = SyncConfig::load(".".as_ref())?;
//!     let mut controller = PushController::new(spec, ".", remote, cluster, config)?;
//!     let result = controller.run_once().await;
//!     println!("generation {}", result.generation);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod context;
pub mod controller;
pub mod diff;
pub mod error;
pub mod logging;
pub mod reconcile;
pub mod retry;
pub mod state;
pub mod transport;
pub mod trigger;
pub mod watcher;

pub use config::{RetryConfig, SyncConfig};
pub use context::CallContext;
pub use controller::{CycleFailure, CycleResult, PushController, PushPhase, WatchHandle};
pub use diff::{PathClass, SyncPlan, diff};
pub use error::{Error, ErrorClass, Result};
pub use reconcile::{
    COMPONENT_LABEL, ClusterApi, ClusterResourceSet, ComponentSpec, LiveResource, PortSpec,
    Protocol, ReconcileManager, ReconcileOutcome, ReconcilePlan, ReconcileReport, Resource,
    ResourceKind, ResourceVersion, SourceType, StorageMount,
};
pub use retry::{RetryScheduler, RetryableOperation};
pub use state::{PushState, StateStore};
pub use transport::{ExecOutput, RemoteTarget, SyncSummary, SyncTransport};
pub use watcher::{ChangeWatcher, WatcherHandle};
