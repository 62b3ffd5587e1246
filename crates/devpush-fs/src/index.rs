//! Content-addressed index of a source tree
//!
//! [`FileIndexer`] walks a root directory and records, for every regular
//! file that is not ignored, its SHA-256 content hash, size and modification
//! time. The resulting [`FileIndex`] is an immutable snapshot keyed by the
//! root-relative, forward-slash path.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

use crate::checksum::compute_file_checksum;
use crate::{Error, IgnoreRules, NormalizedPath, Result};

/// One indexed file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    /// Canonical `sha256:<hex>` hash of the file bytes
    pub content_hash: String,
    pub size_bytes: u64,
    pub mod_time: DateTime<Utc>,
}

impl FileEntry {
    /// Hash and stat a file on disk.
    pub fn from_path(path: &Path) -> std::io::Result<Self> {
        let metadata = fs::metadata(path)?;
        let content_hash = compute_file_checksum(path)?;
        Ok(Self {
            content_hash,
            size_bytes: metadata.len(),
            mod_time: DateTime::<Utc>::from(metadata.modified()?),
        })
    }
}

/// Snapshot of a source tree: relative path to [`FileEntry`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileIndex {
    entries: BTreeMap<String, FileEntry>,
}

impl FileIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: impl Into<String>, entry: FileEntry) {
        self.entries.insert(path.into(), entry);
    }

    pub fn get(&self, path: &str) -> Option<&FileEntry> {
        self.entries.get(path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in path order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &FileEntry)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Sum of all file sizes.
    pub fn total_bytes(&self) -> u64 {
        self.entries.values().map(|e| e.size_bytes).sum()
    }
}

impl FromIterator<(String, FileEntry)> for FileIndex {
    fn from_iter<T: IntoIterator<Item = (String, FileEntry)>>(iter: T) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

/// An entry the walk could not index. The walk continues past it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexWarning {
    /// Root-relative path, or the absolute path if it lies outside the root
    pub path: String,
    pub message: String,
}

impl std::fmt::Display for IndexWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// Result of an index walk: the index plus per-entry partial failures.
#[derive(Debug, Clone, Default)]
pub struct IndexOutcome {
    pub index: FileIndex,
    pub warnings: Vec<IndexWarning>,
}

/// Builds [`FileIndex`] snapshots of one root directory.
#[derive(Debug, Clone)]
pub struct FileIndexer {
    root: PathBuf,
    rules: IgnoreRules,
}

impl FileIndexer {
    pub fn new(root: impl Into<PathBuf>, rules: IgnoreRules) -> Self {
        Self {
            root: root.into(),
            rules,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn rules(&self) -> &IgnoreRules {
        &self.rules
    }

    /// Walk the root and build a fresh index.
    ///
    /// Symlinks are followed; a link that leads back into one of its own
    /// ancestors is reported as a warning and not descended.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RootUnreadable`] or [`Error::RootNotDirectory`] when
    /// the root itself cannot be walked. Failures below the root become
    /// [`IndexWarning`]s.
    pub fn build(&self) -> Result<IndexOutcome> {
        let root = dunce::canonicalize(&self.root).map_err(|source| Error::RootUnreadable {
            path: self.root.clone(),
            source,
        })?;
        if !root.is_dir() {
            return Err(Error::RootNotDirectory { path: root });
        }
        fs::read_dir(&root).map_err(|source| Error::RootUnreadable {
            path: root.clone(),
            source,
        })?;

        let mut outcome = IndexOutcome::default();
        let walker = WalkDir::new(&root)
            .follow_links(true)
            .min_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| !self.skip_entry(&root, entry));

        for item in walker {
            let entry = match item {
                Ok(entry) => entry,
                Err(err) => {
                    let warning = walk_warning(&root, &err);
                    warn!(path = %warning.path, "{}", warning.message);
                    outcome.warnings.push(warning);
                    continue;
                }
            };

            if !entry.file_type().is_file() {
                continue;
            }
            let Some(rel) = NormalizedPath::relative_to(&root, entry.path()) else {
                continue;
            };

            match FileEntry::from_path(entry.path()) {
                Ok(file) => outcome.index.insert(rel.as_str(), file),
                Err(err) => {
                    warn!(path = %rel, error = %err, "skipping unreadable file");
                    outcome.warnings.push(IndexWarning {
                        path: rel.to_string(),
                        message: err.to_string(),
                    });
                }
            }
        }

        debug!(
            root = %root.display(),
            files = outcome.index.len(),
            warnings = outcome.warnings.len(),
            "index built"
        );
        Ok(outcome)
    }

    fn skip_entry(&self, root: &Path, entry: &DirEntry) -> bool {
        match NormalizedPath::relative_to(root, entry.path()) {
            Some(rel) => self.rules.is_ignored(rel.as_str(), entry.file_type().is_dir()),
            None => false,
        }
    }
}

fn walk_warning(root: &Path, err: &walkdir::Error) -> IndexWarning {
    let path = err
        .path()
        .map(|p| match NormalizedPath::relative_to(root, p) {
            Some(rel) => rel.to_string(),
            None => p.display().to_string(),
        })
        .unwrap_or_default();

    let message = match err.loop_ancestor() {
        Some(ancestor) => format!("symlink cycle back to {}", ancestor.display()),
        None => err.to_string(),
    };
    IndexWarning { path, message }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn indexer(root: &Path) -> FileIndexer {
        FileIndexer::new(root, IgnoreRules::with_defaults(["*.log"]).unwrap())
    }

    #[test]
    fn indexes_nested_files_with_relative_keys() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "a.txt", "alpha");
        write(temp.path(), "src/lib.rs", "pub fn f() {}");

        let outcome = indexer(temp.path()).build().unwrap();

        let paths: Vec<&str> = outcome.index.paths().collect();
        assert_eq!(paths, vec!["a.txt", "src/lib.rs"]);
        assert_eq!(outcome.index.get("a.txt").unwrap().size_bytes, 5);
        assert!(outcome.warnings.is_empty());
    }

    #[test]
    fn ignored_paths_are_skipped() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "keep.rs", "x");
        write(temp.path(), "debug.log", "noise");
        write(temp.path(), ".git/HEAD", "ref");
        write(temp.path(), ".devpush/state/app.toml", "state");

        let outcome = indexer(temp.path()).build().unwrap();

        let paths: Vec<&str> = outcome.index.paths().collect();
        assert_eq!(paths, vec!["keep.rs"]);
    }

    #[test]
    fn hash_reflects_content_not_mtime() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "same.txt", "payload");
        let first = indexer(temp.path()).build().unwrap().index;

        std::thread::sleep(std::time::Duration::from_millis(10));
        write(temp.path(), "same.txt", "payload");
        let second = indexer(temp.path()).build().unwrap().index;

        assert_eq!(
            first.get("same.txt").unwrap().content_hash,
            second.get("same.txt").unwrap().content_hash
        );
    }

    #[test]
    fn missing_root_is_index_error() {
        let temp = TempDir::new().unwrap();
        let err = indexer(&temp.path().join("nope")).build().unwrap_err();
        assert!(err.is_index_root_error());
    }

    #[test]
    fn file_root_is_index_error() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "plain.txt", "x");
        let err = indexer(&temp.path().join("plain.txt")).build().unwrap_err();
        assert!(matches!(err, Error::RootNotDirectory { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn symlink_cycle_becomes_warning() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "dir/file.txt", "x");
        std::os::unix::fs::symlink(temp.path().join("dir"), temp.path().join("dir/loop")).unwrap();

        let outcome = indexer(temp.path()).build().unwrap();

        assert!(outcome.index.contains("dir/file.txt"));
        assert!(
            outcome.warnings.iter().any(|w| w.message.contains("symlink cycle")),
            "expected a cycle warning, got {:?}",
            outcome.warnings
        );
    }

    #[test]
    fn index_round_trips_through_toml() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "dir.with.dots/file.txt", "x");
        let index = indexer(temp.path()).build().unwrap().index;

        #[derive(Serialize, Deserialize)]
        struct Wrapper {
            index: FileIndex,
        }
        let text = toml::to_string(&Wrapper { index: index.clone() }).unwrap();
        let back: Wrapper = toml::from_str(&text).unwrap();
        assert_eq!(back.index, index);
    }
}
