//! Delta computation between two index snapshots

use std::collections::BTreeSet;

use devpush_fs::FileIndex;
use serde::Serialize;

/// Classification of a single path between two snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PathClass {
    Added,
    Modified,
    Deleted,
    Unchanged,
}

/// The classified delta of one cycle.
///
/// `added`, `modified` and `deleted` are disjoint and ordered; every path
/// present in either snapshot but in none of them is unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncPlan {
    pub added: BTreeSet<String>,
    pub modified: BTreeSet<String>,
    pub deleted: BTreeSet<String>,
}

impl SyncPlan {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.deleted.is_empty()
    }

    /// Number of paths that need a remote operation.
    pub fn len(&self) -> usize {
        self.added.len() + self.modified.len() + self.deleted.len()
    }

    pub fn classify(&self, path: &str) -> PathClass {
        if self.added.contains(path) {
            PathClass::Added
        } else if self.modified.contains(path) {
            PathClass::Modified
        } else if self.deleted.contains(path) {
            PathClass::Deleted
        } else {
            PathClass::Unchanged
        }
    }

    /// Paths whose content must be written, modified first.
    pub fn writes(&self) -> impl Iterator<Item = &str> {
        self.modified.iter().chain(self.added.iter()).map(String::as_str)
    }
}

/// Compare two snapshots.
///
/// The content hash is authoritative: an entry whose mtime moved but whose
/// bytes did not is unchanged. `None` for `old` means no prior successful
/// push, so every path in `new` is added.
pub fn diff(old: Option<&FileIndex>, new: &FileIndex) -> SyncPlan {
    let mut plan = SyncPlan::default();

    for (path, entry) in new.iter() {
        match old.and_then(|old| old.get(path)) {
            None => {
                plan.added.insert(path.to_string());
            }
            Some(previous) if previous.content_hash != entry.content_hash => {
                plan.modified.insert(path.to_string());
            }
            Some(_) => {}
        }
    }

    if let Some(old) = old {
        plan.deleted = old
            .paths()
            .filter(|path| !new.contains(path))
            .map(str::to_string)
            .collect();
    }

    plan
}
