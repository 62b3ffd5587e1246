//! [`TestTree`] builder for local source trees.

use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// A temporary source tree with helpers for setup and assertion.
///
/// # Example
///
/// ```rust,no_run
/// use devpush_test_utils::TestTree;
///
/// let tree = TestTree::new().with_file("a.txt", "H1").with_file("src/lib.rs", "");
/// tree.remove("a.txt");
/// tree.assert_file_contains("src/lib.rs", "");
/// ```
pub struct TestTree {
    temp_dir: TempDir,
}

impl Default for TestTree {
    fn default() -> Self {
        Self::new()
    }
}

impl TestTree {
    /// Create an empty temporary directory.
    pub fn new() -> Self {
        Self {
            temp_dir: TempDir::new().unwrap(),
        }
    }

    pub fn root(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn path(&self, rel: &str) -> PathBuf {
        self.root().join(rel)
    }

    pub fn with_file(self, rel: &str, content: &str) -> Self {
        self.write(rel, content);
        self
    }

    /// Write (or overwrite) a file, creating parent directories.
    pub fn write(&self, rel: &str, content: &str) {
        let full = self.path(rel);
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&full, content).unwrap();
    }

    pub fn remove(&self, rel: &str) {
        let full = self.path(rel);
        if full.is_dir() {
            fs::remove_dir_all(&full).unwrap();
        } else {
            fs::remove_file(&full).unwrap();
        }
    }

    pub fn mkdir(&self, rel: &str) {
        fs::create_dir_all(self.path(rel)).unwrap();
    }

    pub fn read(&self, rel: &str) -> String {
        fs::read_to_string(self.path(rel)).unwrap()
    }

    /// Raw bytes of a file, `None` when it does not exist.
    pub fn read_bytes(&self, rel: &str) -> Option<Vec<u8>> {
        fs::read(self.path(rel)).ok()
    }

    /// Create a symlink at `link` pointing to `target` (relative to the link's
    /// directory or absolute).
    #[cfg(unix)]
    pub fn symlink(&self, target: impl AsRef<Path>, link: &str) {
        let full = self.path(link);
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        std::os::unix::fs::symlink(target, full).unwrap();
    }

    /// # Panics
    /// Panics with a descriptive message if the path does not exist.
    pub fn assert_file_exists(&self, rel: &str) {
        let full = self.path(rel);
        assert!(full.exists(), "Expected file to exist: {}", full.display());
    }

    /// # Panics
    /// Panics if the file cannot be read or does not contain `content`.
    pub fn assert_file_contains(&self, rel: &str, content: &str) {
        let full = self.path(rel);
        let actual = fs::read_to_string(&full)
            .unwrap_or_else(|_| panic!("Could not read file: {}", full.display()));
        assert!(
            actual.contains(content),
            "File {} does not contain expected content.\nExpected: {}\nActual: {}",
            full.display(),
            content,
            actual
        );
    }
}
