//! Component reconciliation against the cluster API

mod component;
mod manager;
mod resource;

pub use component::{ComponentSpec, PortSpec, Protocol, SourceType, StorageMount};
pub use manager::{
    ReconcileAction, ReconcileManager, ReconcileOutcome, ReconcilePlan, ReconcileReport, plan,
};
pub use resource::{
    COMPONENT_LABEL, ClusterApi, ClusterResourceSet, LiveResource, Resource, ResourceKey,
    ResourceKind, ResourceVersion,
};
