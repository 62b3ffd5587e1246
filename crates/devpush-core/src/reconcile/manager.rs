//! Convergence of live cluster state onto a component's desired resources

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use super::component::ComponentSpec;
use super::resource::{
    ClusterApi, ClusterResourceSet, LiveResource, Resource, ResourceKey, ResourceKind,
    ResourceVersion,
};
use crate::Result;
use crate::context::CallContext;
use crate::retry::RetryScheduler;

/// One mutating call the reconciler intends to make.
#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileAction {
    Create(Resource),
    Update {
        desired: Resource,
        version: ResourceVersion,
    },
    Delete {
        kind: ResourceKind,
        name: String,
        version: ResourceVersion,
    },
}

impl ReconcileAction {
    pub fn kind(&self) -> ResourceKind {
        match self {
            Self::Create(r) | Self::Update { desired: r, .. } => r.kind,
            Self::Delete { kind, .. } => *kind,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Create(r) | Self::Update { desired: r, .. } => &r.name,
            Self::Delete { name, .. } => name,
        }
    }

    fn verb(&self) -> &'static str {
        match self {
            Self::Create(_) => "create",
            Self::Update { .. } => "update",
            Self::Delete { .. } => "delete",
        }
    }
}

/// Ordered mutations: creates and updates in apply order, then deletes in
/// reverse apply order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcilePlan {
    pub actions: Vec<ReconcileAction>,
}

impl ReconcilePlan {
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }
}

/// Mutating calls that actually took effect.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
}

impl ReconcileReport {
    pub fn total(&self) -> usize {
        self.created + self.updated + self.deleted
    }

    fn record(&mut self, applied: Applied) {
        match applied {
            Applied::Created => self.created += 1,
            Applied::Updated => self.updated += 1,
            Applied::Deleted => self.deleted += 1,
            Applied::Unchanged => {}
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReconcileOutcome {
    pub report: ReconcileReport,
    pub spec_hash: String,
    /// The spec hash matched the last committed one; the cluster was not
    /// contacted.
    pub skipped: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Applied {
    Created,
    Updated,
    Deleted,
    Unchanged,
}

/// Diff desired resources against the live set owned by `owner`.
///
/// Value equality decides: a live resource equal to its desired form yields
/// no action regardless of version.
pub fn plan(owner: &str, desired: &[Resource], live: &ClusterResourceSet) -> ReconcilePlan {
    let mut ordered: Vec<&Resource> = desired.iter().collect();
    ordered.sort_by_key(|r| r.kind);

    let mut actions = Vec::new();
    for resource in ordered {
        match live.get(resource.kind, &resource.name) {
            None => actions.push(ReconcileAction::Create(resource.clone())),
            Some(current) if !current.resource.same_as(resource) => {
                actions.push(ReconcileAction::Update {
                    desired: resource.clone(),
                    version: current.version.clone(),
                })
            }
            Some(_) => {}
        }
    }

    let wanted: BTreeSet<ResourceKey> = desired.iter().map(Resource::key).collect();
    let mut stale: Vec<&LiveResource> = live
        .iter()
        .filter(|l| l.resource.owner() == Some(owner) && !wanted.contains(&l.resource.key()))
        .collect();
    stale.sort_by(|a, b| b.resource.kind.cmp(&a.resource.kind));
    actions.extend(stale.into_iter().map(|l| ReconcileAction::Delete {
        kind: l.resource.kind,
        name: l.resource.name.clone(),
        version: l.version.clone(),
    }));

    ReconcilePlan { actions }
}

/// Reconciles components against a [`ClusterApi`].
pub struct ReconcileManager {
    api: Arc<dyn ClusterApi>,
    retry: RetryScheduler,
}

impl ReconcileManager {
    pub fn new(api: Arc<dyn ClusterApi>, retry: RetryScheduler) -> Self {
        Self { api, retry }
    }

    /// Live resources of every kind labelled as owned by `owner`.
    pub async fn fetch_live(&self, owner: &str, ctx: &CallContext) -> Result<ClusterResourceSet> {
        let api = &*self.api;
        let mut live = ClusterResourceSet::new();
        for kind in ResourceKind::ALL {
            let items = self
                .retry
                .run("list", ctx, move |_| api.list(kind, owner, ctx))
                .await?;
            live.extend_owned(owner, items);
        }
        Ok(live)
    }

    /// Execute a plan, one retried convergence per action.
    pub async fn apply(&self, plan: &ReconcilePlan, ctx: &CallContext) -> Result<ReconcileReport> {
        let mut report = ReconcileReport::default();
        for action in &plan.actions {
            let operation = format!("{} {}/{}", action.verb(), action.kind(), action.name());
            let api = &*self.api;
            let applied = self
                .retry
                .run(&operation, ctx, move |attempt| async move {
                    if attempt == 0 {
                        apply_planned(api, action, ctx).await
                    } else {
                        reapply_fresh(api, action, ctx).await
                    }
                })
                .await?;
            debug!(operation = %operation, ?applied, "resource converged");
            report.record(applied);
        }
        Ok(report)
    }

    /// Bring the cluster in line with `spec`.
    ///
    /// Returns early without any cluster call when the spec hash equals
    /// `last_hash`.
    pub async fn reconcile(
        &self,
        spec: &ComponentSpec,
        last_hash: Option<&str>,
        ctx: &CallContext,
    ) -> Result<ReconcileOutcome> {
        let spec_hash = spec.spec_hash()?;
        if last_hash == Some(spec_hash.as_str()) {
            debug!(component = %spec.name, "spec unchanged, reconcile skipped");
            return Ok(ReconcileOutcome {
                report: ReconcileReport::default(),
                spec_hash,
                skipped: true,
            });
        }

        spec.validate()?;
        let live = self.fetch_live(&spec.name, ctx).await?;
        let plan = plan(&spec.name, &spec.desired_resources(), &live);
        let report = self.apply(&plan, ctx).await?;

        info!(
            component = %spec.name,
            created = report.created,
            updated = report.updated,
            deleted = report.deleted,
            "reconciled"
        );
        Ok(ReconcileOutcome {
            report,
            spec_hash,
            skipped: false,
        })
    }
}

impl ClusterResourceSet {
    fn extend_owned(&mut self, owner: &str, items: Vec<LiveResource>) {
        for live in items {
            if live.resource.owner() == Some(owner) {
                self.insert(live);
            }
        }
    }
}

/// First attempt: trust the version observed while planning.
async fn apply_planned(
    api: &dyn ClusterApi,
    action: &ReconcileAction,
    ctx: &CallContext,
) -> Result<Applied> {
    match action {
        ReconcileAction::Create(resource) => {
            api.create(resource, ctx).await?;
            Ok(Applied::Created)
        }
        ReconcileAction::Update { desired, version } => {
            api.update(desired, version, ctx).await?;
            Ok(Applied::Updated)
        }
        ReconcileAction::Delete {
            kind,
            name,
            version,
        } => {
            api.delete(*kind, name, version, ctx).await?;
            Ok(Applied::Deleted)
        }
    }
}

/// Later attempts: re-read the resource and decide again from what is live.
async fn reapply_fresh(
    api: &dyn ClusterApi,
    action: &ReconcileAction,
    ctx: &CallContext,
) -> Result<Applied> {
    let current = api.get(action.kind(), action.name(), ctx).await?;
    match (action, current) {
        (ReconcileAction::Create(desired) | ReconcileAction::Update { desired, .. }, None) => {
            api.create(desired, ctx).await?;
            Ok(Applied::Created)
        }
        (ReconcileAction::Create(desired) | ReconcileAction::Update { desired, .. }, Some(live)) => {
            if live.resource.same_as(desired) {
                Ok(Applied::Unchanged)
            } else {
                api.update(desired, &live.version, ctx).await?;
                Ok(Applied::Updated)
            }
        }
        (ReconcileAction::Delete { .. }, None) => Ok(Applied::Unchanged),
        (ReconcileAction::Delete { kind, name, .. }, Some(live)) => {
            api.delete(*kind, name, &live.version, ctx).await?;
            Ok(Applied::Deleted)
        }
    }
}
