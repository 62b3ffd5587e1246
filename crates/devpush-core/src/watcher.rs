//! Filesystem change detection with debounce
//!
//! [`ChangeWatcher`] owns a `notify` watcher inside a background task and
//! turns bursts of events into single triggers on a [`TriggerSender`]. The
//! debounce logic lives in [`Debouncer`], which consumes plain path batches
//! and has no dependency on `notify`.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use devpush_fs::{IgnoreRules, NormalizedPath};
use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::Result;
use crate::trigger::TriggerSender;

/// Batches of raw event paths are buffered up to this many before the
/// notify thread blocks.
const EVENT_BUFFER: usize = 256;

/// Decides whether an event path may reset the debounce timer.
#[derive(Debug, Clone)]
pub struct PathFilter {
    roots: Vec<PathBuf>,
    rules: Arc<IgnoreRules>,
}

impl PathFilter {
    pub fn new(root: &Path, rules: Arc<IgnoreRules>) -> Self {
        let mut roots = vec![root.to_path_buf()];
        if let Ok(canonical) = dunce::canonicalize(root)
            && canonical != root
        {
            roots.push(canonical);
        }
        Self { roots, rules }
    }

    /// Paths outside the root, the root itself and ignored paths are not
    /// relevant. The file type is read from disk; a path that no longer
    /// exists is treated as a file.
    pub fn is_relevant(&self, path: &Path) -> bool {
        let Some(rel) = self
            .roots
            .iter()
            .find_map(|root| NormalizedPath::relative_to(root, path))
        else {
            return false;
        };
        !self.rules.is_path_ignored(rel.as_str(), path.is_dir())
    }
}

/// Debounce core.
///
/// Each relevant batch (re)arms a deadline one window in the future; the
/// trigger fires once the deadline passes without further relevant events.
#[derive(Debug, Clone)]
pub struct Debouncer {
    filter: PathFilter,
    window: Duration,
}

impl Debouncer {
    pub fn new(filter: PathFilter, window: Duration) -> Self {
        Self { filter, window }
    }

    /// Run until `cancel` fires or the event source closes.
    pub async fn run(
        self,
        mut events: mpsc::Receiver<Vec<PathBuf>>,
        trigger: TriggerSender,
        cancel: CancellationToken,
    ) {
        let mut deadline: Option<Instant> = None;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                batch = events.recv() => match batch {
                    Some(paths) => {
                        if paths.iter().any(|p| self.filter.is_relevant(p)) {
                            deadline = Some(Instant::now() + self.window);
                        }
                    }
                    None => break,
                },
                _ = wait_until(deadline) => {
                    deadline = None;
                    if trigger.fire() {
                        debug!("change batch settled, cycle requested");
                    } else {
                        debug!("change batch settled, cycle already pending");
                    }
                }
            }
        }
    }
}

fn wait_until(deadline: Option<Instant>) -> impl Future<Output = ()> {
    async move {
        match deadline {
            Some(at) => tokio::time::sleep_until(at).await,
            None => std::future::pending().await,
        }
    }
}

/// Paths worth forwarding from a raw notify event. Access-only events carry
/// no content change.
fn event_paths(event: Event) -> Option<Vec<PathBuf>> {
    if event.kind.is_access() || event.paths.is_empty() {
        None
    } else {
        Some(event.paths)
    }
}

/// Watches a source tree and signals a trigger channel.
#[derive(Debug, Clone)]
pub struct ChangeWatcher {
    root: PathBuf,
    rules: Arc<IgnoreRules>,
    debounce: Duration,
}

impl ChangeWatcher {
    pub fn new(root: impl Into<PathBuf>, rules: Arc<IgnoreRules>, debounce: Duration) -> Self {
        Self {
            root: root.into(),
            rules,
            debounce,
        }
    }

    /// Start watching recursively.
    ///
    /// The OS watcher is created and registered here so registration errors
    /// surface to the caller, then moved into the background task. Stopping
    /// the task drops it.
    pub fn spawn(self, trigger: TriggerSender, cancel: CancellationToken) -> Result<WatcherHandle> {
        let (tx, rx) = mpsc::channel::<Vec<PathBuf>>(EVENT_BUFFER);

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    if let Some(paths) = event_paths(event) {
                        let _ = tx.blocking_send(paths);
                    }
                }
                Err(e) => warn!(error = %e, "filesystem watcher error"),
            },
            Config::default(),
        )?;
        watcher.watch(&self.root, RecursiveMode::Recursive)?;
        info!(root = %self.root.display(), debounce_ms = self.debounce.as_millis() as u64, "watching");

        let debouncer = Debouncer::new(PathFilter::new(&self.root, self.rules), self.debounce);
        let token = cancel.child_token();
        let task_token = token.clone();
        let task = tokio::spawn(async move {
            let _watcher = watcher;
            debouncer.run(rx, trigger, task_token).await;
            debug!("watcher stopped");
        });

        Ok(WatcherHandle { cancel: token, task })
    }
}

/// Handle to a running [`ChangeWatcher`] task.
#[derive(Debug)]
pub struct WatcherHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl WatcherHandle {
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop the task and wait until the OS watcher is released.
    pub async fn stop(self) -> Result<()> {
        self.cancel.cancel();
        self.task.await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trigger::{self, TriggerReceiver};
    use tokio::time::sleep;

    const WINDOW: Duration = Duration::from_millis(300);

    struct Harness {
        root: PathBuf,
        events: mpsc::Sender<Vec<PathBuf>>,
        triggers: TriggerReceiver,
        cancel: CancellationToken,
        task: JoinHandle<()>,
    }

    impl Harness {
        fn start(extra_ignores: &[&str]) -> Self {
            let root = PathBuf::from("/workspace/app");
            let rules = IgnoreRules::with_defaults(extra_ignores.iter().copied()).unwrap();
            let filter = PathFilter::new(&root, Arc::new(rules));
            let (events, rx) = mpsc::channel(16);
            let (tx, triggers) = trigger::channel();
            let cancel = CancellationToken::new();
            let task = tokio::spawn(Debouncer::new(filter, WINDOW).run(rx, tx, cancel.clone()));
            Self {
                root,
                events,
                triggers,
                cancel,
                task,
            }
        }

        async fn touch(&self, rel: &str) {
            self.events.send(vec![self.root.join(rel)]).await.unwrap();
        }
    }

    #[tokio::test(start_paused = true)]
    async fn burst_within_window_fires_once() {
        let mut h = Harness::start(&[]);
        for _ in 0..5 {
            h.touch("src/main.rs").await;
            sleep(Duration::from_millis(100)).await;
        }
        // last event at t=400ms, deadline at t=700ms
        assert!(!h.triggers.try_recv());
        sleep(Duration::from_millis(250)).await;
        assert!(h.triggers.try_recv());
        sleep(Duration::from_secs(1)).await;
        assert!(!h.triggers.try_recv());
    }

    #[tokio::test(start_paused = true)]
    async fn spaced_events_fire_separately() {
        let mut h = Harness::start(&[]);
        h.touch("a.txt").await;
        sleep(Duration::from_millis(500)).await;
        assert!(h.triggers.try_recv());

        h.touch("b.txt").await;
        sleep(Duration::from_millis(500)).await;
        assert!(h.triggers.try_recv());
    }

    #[tokio::test(start_paused = true)]
    async fn ignored_paths_do_not_reset_timer() {
        let mut h = Harness::start(&["target/"]);
        h.touch("src/lib.rs").await;
        sleep(Duration::from_millis(200)).await;
        h.touch("target/debug/build.log").await;
        h.touch(".git/index").await;
        h.touch(".devpush/state/api.toml").await;
        sleep(Duration::from_millis(120)).await;
        assert!(h.triggers.try_recv());
    }

    #[tokio::test(start_paused = true)]
    async fn only_ignored_events_never_fire() {
        let mut h = Harness::start(&["*.log"]);
        h.touch("debug.log").await;
        h.events.send(vec![PathBuf::from("/elsewhere/x")]).await.unwrap();
        sleep(Duration::from_secs(2)).await;
        assert!(!h.triggers.try_recv());
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_pending_trigger() {
        let mut h = Harness::start(&[]);
        h.touch("a.txt").await;
        sleep(Duration::from_millis(100)).await;
        h.cancel.cancel();
        h.task.await.unwrap();
        sleep(Duration::from_secs(1)).await;
        assert!(!h.triggers.try_recv());
    }

    #[test]
    fn access_events_are_dropped() {
        use notify::EventKind;
        use notify::event::{AccessKind, CreateKind};

        let access = Event::new(EventKind::Access(AccessKind::Any)).add_path(PathBuf::from("/a"));
        assert!(event_paths(access).is_none());

        let create = Event::new(EventKind::Create(CreateKind::File)).add_path(PathBuf::from("/a"));
        assert_eq!(event_paths(create), Some(vec![PathBuf::from("/a")]));
    }
}
