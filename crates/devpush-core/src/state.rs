//! Persisted per-component push state
//!
//! [`PushState`] is the record of the last fully acknowledged cycle. It is
//! stored as TOML and only ever replaced whole, through
//! [`devpush_fs::io::write_atomic`], so a reader sees either the previous
//! record or the new one.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use devpush_fs::io::{read_locked, write_atomic};
use devpush_fs::{FileIndex, NormalizedPath, RobustnessConfig, WorkspacePath};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{Error, Result};

/// Format version written into every state file.
pub const STATE_VERSION: &str = "1";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushState {
    pub version: String,
    pub component: String,
    pub last_successful_generation: u64,
    /// Hash of the component spec last reconciled successfully
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_reconcile_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub committed_at: Option<DateTime<Utc>>,
    /// Remote directory `last_index` was delivered to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_root: Option<String>,
    /// Index whose delivery was fully acknowledged. Kept last so it renders
    /// as the trailing table.
    #[serde(default)]
    pub last_index: FileIndex,
}

impl PushState {
    /// State before any successful push.
    pub fn new(component: impl Into<String>) -> Self {
        Self {
            version: STATE_VERSION.to_string(),
            component: component.into(),
            last_successful_generation: 0,
            last_reconcile_hash: None,
            committed_at: None,
            remote_root: None,
            last_index: FileIndex::new(),
        }
    }

    /// The state that follows this one after a successful cycle.
    pub fn next(
        &self,
        index: FileIndex,
        reconcile_hash: Option<String>,
        remote_root: impl Into<String>,
    ) -> Self {
        Self {
            version: STATE_VERSION.to_string(),
            component: self.component.clone(),
            last_successful_generation: self.last_successful_generation + 1,
            last_reconcile_hash: reconcile_hash,
            committed_at: Some(Utc::now()),
            remote_root: Some(remote_root.into()),
            last_index: index,
        }
    }

    /// The committed index, if it describes what is currently under
    /// `remote_root`. A different or unrecorded root means nothing there
    /// can be assumed present.
    pub fn delivered_index(&self, remote_root: &str) -> Option<&FileIndex> {
        let same = self
            .remote_root
            .as_deref()
            .is_some_and(|root| root.trim_end_matches('/') == remote_root.trim_end_matches('/'));
        same.then_some(&self.last_index)
    }
}

/// File-backed home of one component's [`PushState`].
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
    robustness: RobustnessConfig,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            robustness: RobustnessConfig::default(),
        }
    }

    /// `<root>/.devpush/state/<component>.toml`
    pub fn for_component(root: &Path, component: &str) -> Self {
        Self::new(
            root.join(WorkspacePath::DevpushDir)
                .join("state")
                .join(format!("{component}.toml")),
        )
    }

    pub fn with_robustness(mut self, robustness: RobustnessConfig) -> Self {
        self.robustness = robustness;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the committed state. `None` before the first successful push.
    ///
    /// # Errors
    ///
    /// [`Error::State`] when the file exists but is not a valid state record.
    pub fn load(&self) -> Result<Option<PushState>> {
        let Some(bytes) = read_locked(&NormalizedPath::new(&self.path))? else {
            return Ok(None);
        };
        let text = String::from_utf8(bytes).map_err(|e| self.corrupt(e))?;
        let state: PushState = toml::from_str(&text).map_err(|e| self.corrupt(e))?;
        if state.version != STATE_VERSION {
            return Err(self.corrupt(format!(
                "unsupported state version '{}'",
                state.version
            )));
        }
        Ok(Some(state))
    }

    /// Atomically replace the committed state.
    pub fn save(&self, state: &PushState) -> Result<()> {
        let content = toml::to_string_pretty(state)?;
        write_atomic(
            &NormalizedPath::new(&self.path),
            content.as_bytes(),
            self.robustness,
        )?;
        debug!(
            path = %self.path.display(),
            generation = state.last_successful_generation,
            "push state committed"
        );
        Ok(())
    }

    fn corrupt(&self, message: impl ToString) -> Error {
        Error::State {
            path: self.path.clone(),
            message: message.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use devpush_fs::FileEntry;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn index() -> FileIndex {
        let mut index = FileIndex::new();
        index.insert(
            "src/main.rs",
            FileEntry {
                content_hash: "sha256:abc".into(),
                size_bytes: 3,
                mod_time: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
            },
        );
        index
    }

    #[test]
    fn missing_file_loads_as_none() {
        let temp = TempDir::new().unwrap();
        let store = StateStore::for_component(temp.path(), "api");
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn saved_state_loads_back() {
        let temp = TempDir::new().unwrap();
        let store = StateStore::for_component(temp.path(), "api");
        let state = PushState::new("api").next(index(), Some("sha256:spec".into()), "/projects");

        store.save(&state).unwrap();
        assert!(store.path().ends_with(".devpush/state/api.toml"));
        assert_eq!(store.load().unwrap(), Some(state));
    }

    #[test]
    fn generation_advances() {
        let first = PushState::new("api").next(index(), None, "/projects");
        let second = first.next(FileIndex::new(), None, "/projects");
        assert_eq!(first.last_successful_generation, 1);
        assert_eq!(second.last_successful_generation, 2);
        assert!(second.last_index.is_empty());
    }

    #[test]
    fn delivered_index_requires_matching_root() {
        let state = PushState::new("api").next(index(), None, "/projects");
        assert_eq!(state.delivered_index("/projects/"), Some(&index()));
        assert_eq!(state.delivered_index("/app"), None);
        assert_eq!(PushState::new("api").delivered_index("/projects"), None);
    }

    #[test]
    fn garbage_is_a_state_error() {
        let temp = TempDir::new().unwrap();
        let store = StateStore::for_component(temp.path(), "api");
        std::fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        std::fs::write(store.path(), "last_index = 12 [").unwrap();
        assert!(matches!(store.load(), Err(Error::State { .. })));
    }

    #[test]
    fn unknown_version_is_rejected() {
        let temp = TempDir::new().unwrap();
        let store = StateStore::for_component(temp.path(), "api");
        let mut state = PushState::new("api");
        state.version = "9".into();
        store.save(&state).unwrap();
        assert!(matches!(store.load(), Err(Error::State { .. })));
    }
}
