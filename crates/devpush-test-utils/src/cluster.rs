//! [`FakeCluster`]: a versioned in-memory cluster API.
//!
//! Versions are a global counter, bumped on every write. Writes carrying a
//! stale version fail with [`Error::Conflict`], like the real API server.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use devpush_core::{
    CallContext, ClusterApi, Error, LiveResource, Resource, ResourceKind, ResourceVersion, Result,
};

/// Calls received, failed ones included.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub gets: usize,
    pub lists: usize,
    pub creates: usize,
    pub updates: usize,
    pub deletes: usize,
}

impl CallCounts {
    pub fn mutations(&self) -> usize {
        self.creates + self.updates + self.deletes
    }
}

#[derive(Default)]
struct State {
    items: BTreeMap<(ResourceKind, String), LiveResource>,
    next_version: u64,
    calls: CallCounts,
    conflicts_on_update: usize,
    transient_failures: usize,
    auth_failure: bool,
}

impl State {
    fn bump(&mut self) -> ResourceVersion {
        self.next_version += 1;
        ResourceVersion(self.next_version.to_string())
    }

    /// Shared fault handling for every call.
    fn injected(&mut self, operation: &str) -> Result<()> {
        if self.auth_failure {
            return Err(Error::FatalAuth {
                message: format!("{operation}: forbidden"),
            });
        }
        if self.transient_failures > 0 {
            self.transient_failures -= 1;
            return Err(Error::transport(operation, "injected API timeout"));
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeCluster {
    state: Mutex<State>,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a resource as if created by someone else. Not counted.
    pub fn seed(&self, resource: Resource) -> ResourceVersion {
        let mut state = self.state.lock().unwrap();
        let version = state.bump();
        state.items.insert(
            resource.key(),
            LiveResource {
                resource,
                version: version.clone(),
            },
        );
        version
    }

    /// Change a stored resource out of band, bumping its version.
    pub fn modify_externally(&self, kind: ResourceKind, name: &str, edit: impl FnOnce(&mut Resource)) {
        let mut state = self.state.lock().unwrap();
        let version = state.bump();
        let live = state
            .items
            .get_mut(&(kind, name.to_string()))
            .unwrap_or_else(|| panic!("no {kind}/{name} to modify"));
        edit(&mut live.resource);
        live.version = version;
    }

    pub fn resource(&self, kind: ResourceKind, name: &str) -> Option<LiveResource> {
        self.state
            .lock()
            .unwrap()
            .items
            .get(&(kind, name.to_string()))
            .cloned()
    }

    pub fn resources(&self) -> Vec<LiveResource> {
        self.state.lock().unwrap().items.values().cloned().collect()
    }

    pub fn calls(&self) -> CallCounts {
        self.state.lock().unwrap().calls
    }

    pub fn reset_calls(&self) {
        self.state.lock().unwrap().calls = CallCounts::default();
    }

    /// The next `times` updates fail with a conflict after an external
    /// writer bumps the stored version.
    pub fn conflict_next_updates(&self, times: usize) {
        self.state.lock().unwrap().conflicts_on_update = times;
    }

    /// The next `times` calls of any kind fail transiently.
    pub fn fail_next_calls(&self, times: usize) {
        self.state.lock().unwrap().transient_failures = times;
    }

    /// Every call fails with an authorization error while set.
    pub fn set_auth_failure(&self, failing: bool) {
        self.state.lock().unwrap().auth_failure = failing;
    }
}

#[async_trait]
impl ClusterApi for FakeCluster {
    async fn get(
        &self,
        kind: ResourceKind,
        name: &str,
        _ctx: &CallContext,
    ) -> Result<Option<LiveResource>> {
        let mut state = self.state.lock().unwrap();
        state.calls.gets += 1;
        state.injected("get")?;
        Ok(state.items.get(&(kind, name.to_string())).cloned())
    }

    async fn list(
        &self,
        kind: ResourceKind,
        owner: &str,
        _ctx: &CallContext,
    ) -> Result<Vec<LiveResource>> {
        let mut state = self.state.lock().unwrap();
        state.calls.lists += 1;
        state.injected("list")?;
        Ok(state
            .items
            .values()
            .filter(|live| live.resource.kind == kind && live.resource.owner() == Some(owner))
            .cloned()
            .collect())
    }

    async fn create(&self, resource: &Resource, _ctx: &CallContext) -> Result<ResourceVersion> {
        let mut state = self.state.lock().unwrap();
        state.calls.creates += 1;
        state.injected("create")?;
        if state.items.contains_key(&resource.key()) {
            return Err(Error::Conflict {
                kind: resource.kind,
                name: resource.name.clone(),
            });
        }
        let version = state.bump();
        state.items.insert(
            resource.key(),
            LiveResource {
                resource: resource.clone(),
                version: version.clone(),
            },
        );
        Ok(version)
    }

    async fn update(
        &self,
        resource: &Resource,
        expected: &ResourceVersion,
        _ctx: &CallContext,
    ) -> Result<ResourceVersion> {
        let mut state = self.state.lock().unwrap();
        state.calls.updates += 1;
        state.injected("update")?;

        let conflict = Error::Conflict {
            kind: resource.kind,
            name: resource.name.clone(),
        };
        if state.conflicts_on_update > 0 {
            state.conflicts_on_update -= 1;
            let bumped = state.bump();
            if let Some(live) = state.items.get_mut(&resource.key()) {
                live.version = bumped;
            }
            return Err(conflict);
        }

        let version = state.bump();
        match state.items.get_mut(&resource.key()) {
            None => Err(Error::NotFound {
                kind: resource.kind,
                name: resource.name.clone(),
            }),
            Some(live) if &live.version != expected => Err(conflict),
            Some(live) => {
                live.resource = resource.clone();
                live.version = version.clone();
                Ok(version)
            }
        }
    }

    async fn delete(
        &self,
        kind: ResourceKind,
        name: &str,
        expected: &ResourceVersion,
        _ctx: &CallContext,
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.deletes += 1;
        state.injected("delete")?;
        let key = (kind, name.to_string());
        let current = state.items.get(&key).map(|live| live.version.clone());
        match current {
            None => Err(Error::NotFound {
                kind,
                name: name.to_string(),
            }),
            Some(version) if &version != expected => Err(Error::Conflict {
                kind,
                name: name.to_string(),
            }),
            Some(_) => {
                state.items.remove(&key);
                Ok(())
            }
        }
    }
}
