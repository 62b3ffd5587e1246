//! End-to-end push cycles against the in-memory remote and cluster

use std::sync::Arc;

use devpush_core::{
    ClusterApi, ComponentSpec, Error, PortSpec, Protocol, PushController, PushPhase,
    RemoteTarget, ResourceKind, RetryConfig, SyncConfig,
};
use devpush_fs::checksum::compute_content_checksum;
use devpush_test_utils::{FakeCluster, FakeRemote, Fault, OpKind, RemoteOp, TestTree};
use pretty_assertions::assert_eq;

fn spec() -> ComponentSpec {
    let mut spec = ComponentSpec::new("api", "node:20");
    spec.ports.push(PortSpec {
        name: "http".into(),
        container_port: 8080,
        protocol: Protocol::Tcp,
    });
    spec
}

fn fast_config() -> SyncConfig {
    SyncConfig {
        retry: RetryConfig {
            max_attempts: 3,
            initial_backoff_ms: 1,
            max_backoff_ms: 5,
            ..RetryConfig::default()
        },
        ..SyncConfig::default()
    }
}

struct Fixture {
    tree: TestTree,
    remote: Arc<FakeRemote>,
    cluster: Arc<FakeCluster>,
}

impl Fixture {
    fn new(tree: TestTree) -> Self {
        Self {
            tree,
            remote: FakeRemote::shared(),
            cluster: Arc::new(FakeCluster::new()),
        }
    }

    fn controller_with(&self, spec: ComponentSpec) -> PushController {
        PushController::new(
            spec,
            self.tree.root(),
            self.remote.clone() as Arc<dyn RemoteTarget>,
            self.cluster.clone() as Arc<dyn ClusterApi>,
            fast_config(),
        )
        .unwrap()
    }

    fn controller(&self) -> PushController {
        self.controller_with(spec())
    }

    fn state_bytes(&self, controller: &PushController) -> Option<Vec<u8>> {
        std::fs::read(controller.state_path()).ok()
    }
}

#[tokio::test]
async fn first_cycle_delivers_everything_and_commits() {
    let fx = Fixture::new(TestTree::new().with_file("a.txt", "H1").with_file("src/b.txt", "H2"));
    let mut controller = fx.controller();

    let result = controller.run_once().await;

    assert!(result.is_success(), "{:?}", result.error);
    assert!(result.committed);
    assert_eq!(result.generation, 1);
    assert_eq!(result.files_written, 2);
    assert_eq!(result.resources_created, 2);
    assert!(!result.reconcile_skipped);
    assert_eq!(fx.remote.file("/projects/a.txt").as_deref(), Some("H1"));
    assert_eq!(fx.remote.file("/projects/src/b.txt").as_deref(), Some("H2"));
    assert_eq!(controller.phase(), PushPhase::Idle);
    assert!(fx.tree.path(".devpush/state/api.toml").is_file());
}

#[tokio::test]
async fn edit_and_delete_are_delivered_in_order() {
    let fx = Fixture::new(TestTree::new().with_file("a.txt", "H1").with_file("b.txt", "H2"));
    let mut controller = fx.controller();
    assert!(controller.run_once().await.is_success());

    fx.tree.write("b.txt", "H3");
    fx.tree.remove("a.txt");
    fx.remote.clear_ops();

    let result = controller.run_once().await;
    assert!(result.is_success(), "{:?}", result.error);
    assert_eq!(result.files_deleted, 1);
    assert_eq!(result.files_written, 1);
    assert!(result.reconcile_skipped);
    assert_eq!(result.generation, 2);

    assert_eq!(
        fx.remote.ops(),
        vec![
            RemoteOp::RemovePaths(vec!["/projects/a.txt".into()]),
            RemoteOp::Exec(vec!["mkdir".into(), "-p".into(), "/projects".into()]),
            RemoteOp::StreamIn {
                dest: "/projects".into(),
                entries: vec!["/projects/b.txt".into()],
            },
        ]
    );
    assert_eq!(fx.remote.file("/projects/a.txt"), None);
    assert_eq!(fx.remote.file("/projects/b.txt").as_deref(), Some("H3"));

    let state = controller.state().unwrap();
    assert_eq!(state.last_index.paths().collect::<Vec<_>>(), vec!["b.txt"]);
    assert_eq!(
        state.last_index.get("b.txt").unwrap().content_hash,
        compute_content_checksum("H3")
    );
}

#[tokio::test]
async fn unchanged_tree_makes_no_remote_writes() {
    let fx = Fixture::new(TestTree::new().with_file("main.py", "print('hi')"));
    let mut controller = fx.controller();
    assert!(controller.run_once().await.is_success());
    let committed = fx.state_bytes(&controller);

    fx.remote.clear_ops();
    fx.cluster.reset_calls();
    let result = controller.run_once().await;

    assert!(result.is_success());
    assert!(!result.committed);
    assert!(result.reconcile_skipped);
    assert_eq!(result.generation, 1);
    assert_eq!(fx.remote.ops(), vec![]);
    assert_eq!(fx.cluster.calls().mutations(), 0);
    assert_eq!(fx.cluster.calls().lists, 0);
    assert_eq!(fx.state_bytes(&controller), committed);
}

#[tokio::test]
async fn touch_without_content_change_is_not_delivered() {
    let fx = Fixture::new(TestTree::new().with_file("a.txt", "same"));
    let mut controller = fx.controller();
    assert!(controller.run_once().await.is_success());

    std::thread::sleep(std::time::Duration::from_millis(20));
    fx.tree.write("a.txt", "same");
    fx.remote.clear_ops();

    let result = controller.run_once().await;
    assert!(result.is_success());
    assert_eq!(fx.remote.mutating_calls(), 0);
}

#[tokio::test]
async fn failed_sync_leaves_state_untouched() {
    let fx = Fixture::new(TestTree::new().with_file("a.txt", "v1"));
    let mut controller = fx.controller();
    assert!(controller.run_once().await.is_success());
    let committed = fx.state_bytes(&controller).unwrap();

    fx.tree.write("a.txt", "v2");
    fx.tree.write("new.txt", "n");
    fx.remote.fail_next(OpKind::StreamIn, 3, Fault::Transient);

    let result = controller.run_once().await;
    let failure = result.error.clone().expect("cycle should fail");
    assert_eq!(failure.phase, PushPhase::Syncing);
    assert!(matches!(
        *failure.error,
        Error::RetryExhausted { attempts: 3, .. }
    ));
    assert!(!result.committed);
    assert_eq!(result.generation, 1);
    assert_eq!(controller.phase(), PushPhase::Idle);
    assert_eq!(fx.state_bytes(&controller).unwrap(), committed);
    assert_eq!(fx.remote.file("/projects/a.txt").as_deref(), Some("v1"));

    // The next cycle re-diffs against the committed index and delivers both.
    let retry = controller.run_once().await;
    assert!(retry.is_success(), "{:?}", retry.error);
    assert_eq!(retry.files_written, 2);
    assert_eq!(retry.generation, 2);
    assert_eq!(fx.remote.file("/projects/a.txt").as_deref(), Some("v2"));
}

#[tokio::test]
async fn single_transient_failure_is_retried_within_the_cycle() {
    let fx = Fixture::new(TestTree::new().with_file("a.txt", "v1"));
    fx.remote.fail_next(OpKind::RemovePaths, 1, Fault::Transient);
    fx.remote.fail_next(OpKind::StreamIn, 1, Fault::Transient);
    let mut controller = fx.controller();

    let result = controller.run_once().await;
    assert!(result.is_success(), "{:?}", result.error);
    assert_eq!(fx.remote.count(OpKind::StreamIn), 2);
}

#[tokio::test]
async fn auth_failure_aborts_the_controller() {
    let fx = Fixture::new(TestTree::new().with_file("a.txt", "v1"));
    fx.cluster.set_auth_failure(true);
    let mut controller = fx.controller();

    let result = controller.run_once().await;
    let failure = result.error.expect("cycle should abort");
    assert_eq!(failure.phase, PushPhase::Reconciling);
    assert!(matches!(*failure.error, Error::FatalAuth { .. }));
    assert_eq!(controller.phase(), PushPhase::Aborted);
    assert_eq!(fx.cluster.calls().lists, 1);
    assert_eq!(fx.remote.ops(), vec![]);
    assert!(fx.state_bytes(&controller).is_none());

    fx.cluster.set_auth_failure(false);
    let next = controller.run_once().await;
    assert!(matches!(
        *next.error.unwrap().error,
        Error::Aborted { .. }
    ));
}

#[tokio::test]
async fn remote_auth_failure_during_sync_aborts() {
    let fx = Fixture::new(TestTree::new().with_file("a.txt", "v1"));
    fx.remote.fail_next(OpKind::StreamIn, 1, Fault::Auth);
    let mut controller = fx.controller();

    let result = controller.run_once().await;
    assert_eq!(result.error.unwrap().phase, PushPhase::Syncing);
    assert_eq!(controller.phase(), PushPhase::Aborted);
    assert_eq!(fx.remote.count(OpKind::StreamIn), 1);
}

#[tokio::test]
async fn cancellation_aborts_before_any_remote_call() {
    let fx = Fixture::new(TestTree::new().with_file("a.txt", "v1"));
    let mut controller = fx.controller();
    controller.cancel_token().cancel();

    let result = controller.run_once().await;
    assert!(matches!(*result.error.unwrap().error, Error::Cancelled));
    assert_eq!(controller.phase(), PushPhase::Aborted);
    assert_eq!(fx.remote.ops(), vec![]);
}

#[tokio::test]
async fn missing_root_fails_in_indexing_and_recovers() {
    let tree = TestTree::new();
    let root = tree.path("project");
    let remote = FakeRemote::shared();
    let cluster = Arc::new(FakeCluster::new());
    let mut controller =
        PushController::new(spec(), &root, remote.clone(), cluster, fast_config()).unwrap();

    let result = controller.run_once().await;
    let failure = result.error.unwrap();
    assert_eq!(failure.phase, PushPhase::Indexing);
    assert!(matches!(*failure.error, Error::Index(_)));
    assert_eq!(controller.phase(), PushPhase::Idle);

    tree.write("project/app.js", "x");
    let result = controller.run_once().await;
    assert!(result.is_success(), "{:?}", result.error);
    assert_eq!(remote.file("/projects/app.js").as_deref(), Some("x"));
}

#[tokio::test]
async fn ignored_files_are_never_delivered() {
    let fx = Fixture::new(
        TestTree::new()
            .with_file(".devpushignore", "*.log\nnode_modules/\n")
            .with_file("index.js", "x")
            .with_file("debug.log", "noise")
            .with_file("node_modules/dep/index.js", "dep")
            .with_file(".git/HEAD", "ref"),
    );
    let mut controller = fx.controller();
    assert!(controller.run_once().await.is_success());

    let delivered: Vec<String> = fx.remote.files().into_keys().collect();
    assert_eq!(
        delivered,
        vec!["/projects/.devpushignore".to_string(), "/projects/index.js".to_string()]
    );
}

#[tokio::test]
async fn build_command_runs_only_after_changes() {
    let fx = Fixture::new(TestTree::new().with_file("package.json", "{}"));
    let mut with_build = spec();
    with_build.build_command = Some("npm install".into());
    let mut controller = fx.controller_with(with_build);

    assert!(controller.run_once().await.is_success());
    let build = RemoteOp::Exec(vec![
        "sh".into(),
        "-c".into(),
        "cd '/projects' && npm install".into(),
    ]);
    assert!(fx.remote.ops().contains(&build));

    fx.remote.clear_ops();
    assert!(controller.run_once().await.is_success());
    assert!(!fx.remote.ops().contains(&build));
}

#[tokio::test]
async fn failing_build_command_fails_the_cycle() {
    let fx = Fixture::new(TestTree::new().with_file("package.json", "{}"));
    let mut with_build = spec();
    with_build.build_command = Some("npm test".into());
    fx.remote.set_command_exit_code(1);
    let mut controller = fx.controller_with(with_build);

    let result = controller.run_once().await;
    let failure = result.error.unwrap();
    assert_eq!(failure.phase, PushPhase::Syncing);
    assert!(matches!(*failure.error, Error::CommandFailed { exit_code: 1, .. }));
    assert!(controller.state().is_none());
    assert_eq!(controller.phase(), PushPhase::Idle);
}

#[tokio::test]
async fn state_survives_restart_and_spec_change_recommits() {
    let fx = Fixture::new(TestTree::new().with_file("a.txt", "v1"));
    {
        let mut controller = fx.controller();
        assert!(controller.run_once().await.is_success());
    }

    let mut changed = spec();
    changed.env.insert("DEBUG".into(), "1".into());
    let mut controller = fx.controller_with(changed);
    assert_eq!(controller.generation(), 1);
    fx.remote.clear_ops();

    let result = controller.run_once().await;
    assert!(result.is_success(), "{:?}", result.error);
    assert_eq!(fx.remote.mutating_calls(), 0);
    assert_eq!(result.resources_updated, 1);
    assert!(result.committed);
    assert_eq!(result.generation, 2);

    let deployment = fx.cluster.resource(ResourceKind::Deployment, "api").unwrap();
    assert!(deployment.resource.spec.to_string().contains("DEBUG"));
}

#[tokio::test]
async fn changed_sync_path_resends_the_whole_tree() {
    let fx = Fixture::new(TestTree::new().with_file("a.txt", "H1").with_file("src/b.txt", "H2"));
    {
        let mut controller = fx.controller();
        assert!(controller.run_once().await.is_success());
    }

    let mut moved = spec();
    moved.sync_path = "/app".into();
    let mut controller = fx.controller_with(moved);

    let result = controller.run_once().await;
    assert!(result.is_success(), "{:?}", result.error);
    assert!(result.committed);
    assert_eq!(result.files_written, 2);
    assert_eq!(fx.remote.file("/app/a.txt").as_deref(), Some("H1"));
    assert_eq!(fx.remote.file("/app/src/b.txt").as_deref(), Some("H2"));
    assert_eq!(
        controller.state().unwrap().remote_root.as_deref(),
        Some("/app")
    );

    // The new directory is now the baseline.
    fx.remote.clear_ops();
    let result = controller.run_once().await;
    assert!(result.is_success(), "{:?}", result.error);
    assert!(!result.committed);
    assert_eq!(fx.remote.mutating_calls(), 0);
}
