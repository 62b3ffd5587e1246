//! The push control loop
//!
//! A [`PushController`] owns one component's [`PushState`] and drives each
//! cycle through a fixed sequence of phases:
//!
//! ```text
//! Idle -> Indexing -> Reconciling -> Syncing -> Committing -> Idle
//!            \             \            \            \
//!             +-------------+------------+------------+--> Failed -> Idle
//!                                                      \
//!                                                       +--> Aborted (terminal)
//! ```
//!
//! Recoverable failures leave the committed state untouched and return to
//! `Idle`; the next cycle re-diffs against the last committed index, so
//! whatever the failed cycle partially delivered is sent again. A committed
//! index only counts for the remote directory it was delivered to; after a
//! `sync_path` change every file is sent again. Cancellation
//! and fatal errors move the controller to `Aborted`.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use devpush_fs::{FileIndexer, IgnoreRules};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::config::SyncConfig;
use crate::context::CallContext;
use crate::diff::diff;
use crate::reconcile::{ClusterApi, ComponentSpec, ReconcileManager};
use crate::retry::RetryScheduler;
use crate::state::{PushState, StateStore};
use crate::transport::{RemoteTarget, SyncTransport};
use crate::trigger::{self, TriggerSender};
use crate::watcher::ChangeWatcher;
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PushPhase {
    Idle,
    Indexing,
    Reconciling,
    Syncing,
    Committing,
    Failed,
    Aborted,
}

impl PushPhase {
    pub fn is_terminal(self) -> bool {
        self == Self::Aborted
    }

    pub fn can_transition_to(self, next: PushPhase) -> bool {
        use PushPhase::*;
        match (self, next) {
            (Aborted, _) => false,
            (_, Aborted) => true,
            (Idle, Indexing)
            | (Indexing, Reconciling)
            | (Reconciling, Syncing)
            | (Syncing, Committing)
            | (Committing, Idle)
            | (Failed, Idle) => true,
            (Indexing | Reconciling | Syncing | Committing, Failed) => true,
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Indexing => "indexing",
            Self::Reconciling => "reconciling",
            Self::Syncing => "syncing",
            Self::Committing => "committing",
            Self::Failed => "failed",
            Self::Aborted => "aborted",
        }
    }
}

impl fmt::Display for PushPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a cycle did not commit.
#[derive(Debug, Clone)]
pub struct CycleFailure {
    /// Phase the cycle was in when it failed
    pub phase: PushPhase,
    pub error: Arc<Error>,
}

/// Outcome of one push cycle.
#[derive(Debug, Clone, Default)]
pub struct CycleResult {
    /// Committed generation after the cycle
    pub generation: u64,
    /// Whether this cycle wrote a new state record
    pub committed: bool,
    pub files_written: usize,
    pub files_deleted: usize,
    pub bytes_transferred: u64,
    pub resources_created: usize,
    pub resources_updated: usize,
    pub resources_deleted: usize,
    pub reconcile_skipped: bool,
    pub error: Option<CycleFailure>,
}

impl CycleResult {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    fn failed(generation: u64, phase: PushPhase, error: Error) -> Self {
        Self {
            generation,
            error: Some(CycleFailure {
                phase,
                error: Arc::new(error),
            }),
            ..Self::default()
        }
    }
}

/// Drives push cycles for one component.
///
/// The controller is the only writer of the component's state file. Running
/// two controllers for the same component and root at once is not supported;
/// callers must make sure only one exists.
pub struct PushController {
    spec: ComponentSpec,
    root: PathBuf,
    config: SyncConfig,
    rules: IgnoreRules,
    store: StateStore,
    state: Option<PushState>,
    transport: SyncTransport,
    reconciler: ReconcileManager,
    phase: PushPhase,
    cancel: CancellationToken,
}

impl PushController {
    /// Build a controller and load any committed state.
    ///
    /// # Errors
    ///
    /// Invalid configuration, unparseable ignore files or a corrupt state
    /// file.
    pub fn new(
        spec: ComponentSpec,
        root: impl Into<PathBuf>,
        remote: Arc<dyn RemoteTarget>,
        cluster: Arc<dyn ClusterApi>,
        config: SyncConfig,
    ) -> Result<Self> {
        config.validate()?;
        let root = root.into();
        let rules = IgnoreRules::load(&root, &config.ignore)?;
        let store = StateStore::for_component(&root, &spec.name);
        let state = store.load()?;
        let retry = RetryScheduler::new(config.retry.clone());

        let transport = SyncTransport::new(
            remote,
            retry.clone(),
            root.clone(),
            spec.sync_path.clone(),
            config.transfer_workers,
        );
        let reconciler = ReconcileManager::new(cluster, retry);

        if let Some(state) = &state {
            debug!(
                component = %spec.name,
                generation = state.last_successful_generation,
                files = state.last_index.len(),
                "loaded push state"
            );
        }

        Ok(Self {
            spec,
            root,
            config,
            rules,
            store,
            state,
            transport,
            reconciler,
            phase: PushPhase::Idle,
            cancel: CancellationToken::new(),
        })
    }

    /// Tie the controller's stop signal to an external token.
    pub fn with_cancel_token(mut self, parent: &CancellationToken) -> Self {
        self.cancel = parent.child_token();
        self
    }

    pub fn spec(&self) -> &ComponentSpec {
        &self.spec
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn phase(&self) -> PushPhase {
        self.phase
    }

    /// Last committed state, `None` before the first successful cycle.
    pub fn state(&self) -> Option<&PushState> {
        self.state.as_ref()
    }

    pub fn state_path(&self) -> &Path {
        self.store.path()
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn generation(&self) -> u64 {
        self.state
            .as_ref()
            .map_or(0, |s| s.last_successful_generation)
    }

    /// Run one full cycle.
    ///
    /// Never returns an error directly; failures are reported in
    /// [`CycleResult::error`]. Once aborted, every call reports
    /// [`Error::Aborted`] without doing any work.
    pub async fn run_once(&mut self) -> CycleResult {
        if self.phase.is_terminal() {
            return CycleResult::failed(
                self.generation(),
                PushPhase::Aborted,
                Error::Aborted {
                    component: self.spec.name.clone(),
                },
            );
        }

        let span = info_span!(
            "push_cycle",
            component = %self.spec.name,
            generation = self.generation() + 1
        );
        self.run_cycle().instrument(span).await
    }

    async fn run_cycle(&mut self) -> CycleResult {
        let ctx = CallContext::new(self.cancel.clone(), self.config.call_timeout());
        let mut result = CycleResult::default();

        match self.drive(&ctx, &mut result).await {
            Ok(()) => {
                self.enter(PushPhase::Idle);
                result.generation = self.generation();
                info!(
                    committed = result.committed,
                    written = result.files_written,
                    deleted = result.files_deleted,
                    "cycle complete"
                );
                result
            }
            Err(err) => {
                let failed_in = self.phase;
                if err.is_terminal() {
                    error!(phase = %failed_in, error = %err, "cycle aborted");
                    self.enter(PushPhase::Aborted);
                } else {
                    error!(phase = %failed_in, error = %err, "cycle failed, state not committed");
                    self.enter(PushPhase::Failed);
                    self.enter(PushPhase::Idle);
                }
                CycleResult::failed(self.generation(), failed_in, err)
            }
        }
    }

    async fn drive(&mut self, ctx: &CallContext, result: &mut CycleResult) -> Result<()> {
        ctx.check()?;
        self.enter(PushPhase::Indexing);
        let indexer = FileIndexer::new(self.root.clone(), self.rules.clone());
        let outcome = tokio::task::spawn_blocking(move || indexer.build())
            .await?
            .map_err(Error::Index)?;
        for warning in &outcome.warnings {
            warn!(%warning, "index warning");
        }
        let remote_root = self.transport.remote_root();
        let delivered = self
            .state
            .as_ref()
            .and_then(|s| s.delivered_index(remote_root));
        let root_changed = self.state.is_some() && delivered.is_none();
        if root_changed {
            info!(remote_root, "sync directory changed, sending every file");
        }
        let plan = diff(delivered, &outcome.index);
        debug!(
            files = outcome.index.len(),
            bytes = outcome.index.total_bytes(),
            added = plan.added.len(),
            modified = plan.modified.len(),
            deleted = plan.deleted.len(),
            "indexed"
        );
        ctx.check()?;

        self.enter(PushPhase::Reconciling);
        let last_hash = self
            .state
            .as_ref()
            .and_then(|s| s.last_reconcile_hash.clone());
        let reconciled = self
            .reconciler
            .reconcile(&self.spec, last_hash.as_deref(), ctx)
            .await?;
        result.resources_created = reconciled.report.created;
        result.resources_updated = reconciled.report.updated;
        result.resources_deleted = reconciled.report.deleted;
        result.reconcile_skipped = reconciled.skipped;

        self.enter(PushPhase::Syncing);
        let summary = self.transport.apply(&plan, ctx).await?;
        result.files_written = summary.files_written;
        result.files_deleted = summary.files_deleted;
        result.bytes_transferred = summary.bytes_transferred;

        let touched = summary.files_written + summary.files_deleted > 0;
        if touched
            && self.config.run_build_command
            && let Some(build) = &self.spec.build_command
        {
            self.transport.run_in_sync_dir(build, ctx).await?;
        }

        // Past this point the cycle is acknowledged and is not rolled back.
        self.enter(PushPhase::Committing);
        let hash_changed = last_hash.as_deref() != Some(reconciled.spec_hash.as_str());
        if self.state.is_none() || !plan.is_empty() || hash_changed || root_changed {
            let base = self
                .state
                .take()
                .unwrap_or_else(|| PushState::new(self.spec.name.clone()));
            let next = base.next(
                outcome.index,
                Some(reconciled.spec_hash),
                self.transport.remote_root(),
            );
            if let Err(err) = self.store.save(&next) {
                self.state = Some(base);
                return Err(err);
            }
            self.state = Some(next);
            result.committed = true;
        }
        Ok(())
    }

    fn enter(&mut self, next: PushPhase) {
        debug_assert!(
            self.phase.can_transition_to(next),
            "invalid transition {} -> {}",
            self.phase,
            next
        );
        debug!(from = %self.phase, to = %next, "phase");
        self.phase = next;
    }

    /// Run an initial cycle, then one cycle per settled batch of changes.
    ///
    /// Must be called from within a tokio runtime. Triggers raised while a
    /// cycle is running collapse into a single follow-up cycle.
    pub fn start_watching(self) -> Result<WatchHandle> {
        let (trigger_tx, mut trigger_rx) = trigger::channel();
        let (results_tx, results_rx) = mpsc::unbounded_channel();
        let cancel = self.cancel.clone();

        let watcher = ChangeWatcher::new(
            self.root.clone(),
            Arc::new(self.rules.clone()),
            self.config.debounce(),
        )
        .spawn(trigger_tx.clone(), cancel.clone())?;
        trigger_tx.fire();

        let loop_cancel = cancel.clone();
        let component = self.spec.name.clone();
        let task = tokio::spawn(
            async move {
                let mut controller = self;
                loop {
                    tokio::select! {
                        biased;
                        _ = loop_cancel.cancelled() => break,
                        next = trigger_rx.recv() => if next.is_none() { break },
                    }
                    let result = controller.run_once().await;
                    let aborted = controller.phase().is_terminal();
                    let _ = results_tx.send(result);
                    if aborted {
                        break;
                    }
                }
                if let Err(err) = watcher.stop().await {
                    warn!(error = %err, "watcher did not stop cleanly");
                }
                info!("watch loop stopped");
                controller
            }
            .instrument(info_span!("watch", component = %component)),
        );

        Ok(WatchHandle {
            trigger: trigger_tx,
            cancel,
            results: results_rx,
            task,
        })
    }
}

/// Handle to a controller running in watch mode.
pub struct WatchHandle {
    trigger: TriggerSender,
    cancel: CancellationToken,
    results: mpsc::UnboundedReceiver<CycleResult>,
    task: JoinHandle<PushController>,
}

impl WatchHandle {
    /// Request a cycle as if files had changed. Returns `false` when one is
    /// already pending.
    pub fn trigger(&self) -> bool {
        self.trigger.fire()
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Next finished cycle. `None` once the loop has stopped and every
    /// result has been consumed.
    pub async fn next_result(&mut self) -> Option<CycleResult> {
        self.results.recv().await
    }

    /// Stop watching and hand the controller back.
    ///
    /// A cycle in flight is cancelled; if it was already committing, the
    /// commit completes.
    pub async fn stop(self) -> Result<PushController> {
        self.cancel.cancel();
        Ok(self.task.await?)
    }
}
