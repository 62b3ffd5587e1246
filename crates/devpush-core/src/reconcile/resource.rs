//! Uniform view over the cluster resource kinds a component owns

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;
use crate::context::CallContext;

/// Label every resource created for a component carries.
pub const COMPONENT_LABEL: &str = "devpush.io/component";

/// The closed set of kinds a component is deployed as.
///
/// Declaration order is apply order: storage first, then the workload, then
/// the endpoint that fronts it. Deletes run in reverse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    PersistentVolumeClaim,
    Deployment,
    Service,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 3] = [
        ResourceKind::PersistentVolumeClaim,
        ResourceKind::Deployment,
        ResourceKind::Service,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PersistentVolumeClaim => "PersistentVolumeClaim",
            Self::Deployment => "Deployment",
            Self::Service => "Service",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque optimistic-concurrency token issued by the cluster.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceVersion(pub String);

impl fmt::Display for ResourceVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Desired or observed state of one resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub kind: ResourceKind,
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub spec: serde_json::Value,
}

impl Resource {
    pub fn key(&self) -> ResourceKey {
        (self.kind, self.name.clone())
    }

    pub fn owner(&self) -> Option<&str> {
        self.labels.get(COMPONENT_LABEL).map(String::as_str)
    }

    /// Value equality over everything the reconciler manages.
    pub fn same_as(&self, other: &Resource) -> bool {
        self.kind == other.kind
            && self.name == other.name
            && self.labels == other.labels
            && self.spec == other.spec
    }
}

/// A resource as read back from the cluster.
#[derive(Debug, Clone, PartialEq)]
pub struct LiveResource {
    pub resource: Resource,
    pub version: ResourceVersion,
}

pub type ResourceKey = (ResourceKind, String);

/// Live resources keyed by `(kind, name)`.
#[derive(Debug, Clone, Default)]
pub struct ClusterResourceSet {
    items: BTreeMap<ResourceKey, LiveResource>,
}

impl ClusterResourceSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, live: LiveResource) {
        self.items.insert(live.resource.key(), live);
    }

    pub fn get(&self, kind: ResourceKind, name: &str) -> Option<&LiveResource> {
        self.items.get(&(kind, name.to_string()))
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &LiveResource> {
        self.items.values()
    }
}

impl FromIterator<LiveResource> for ClusterResourceSet {
    fn from_iter<I: IntoIterator<Item = LiveResource>>(iter: I) -> Self {
        let mut set = Self::new();
        for live in iter {
            set.insert(live);
        }
        set
    }
}

/// The cluster API a component is reconciled against.
///
/// Writes are conditional on the version the caller last observed; a stale
/// version fails with [`crate::Error::Conflict`].
#[async_trait]
pub trait ClusterApi: Send + Sync {
    async fn get(
        &self,
        kind: ResourceKind,
        name: &str,
        ctx: &CallContext,
    ) -> Result<Option<LiveResource>>;

    /// Resources of `kind` labelled as owned by `owner`.
    async fn list(
        &self,
        kind: ResourceKind,
        owner: &str,
        ctx: &CallContext,
    ) -> Result<Vec<LiveResource>>;

    async fn create(&self, resource: &Resource, ctx: &CallContext) -> Result<ResourceVersion>;

    async fn update(
        &self,
        resource: &Resource,
        expected: &ResourceVersion,
        ctx: &CallContext,
    ) -> Result<ResourceVersion>;

    async fn delete(
        &self,
        kind: ResourceKind,
        name: &str,
        expected: &ResourceVersion,
        ctx: &CallContext,
    ) -> Result<()>;
}
