//! Well-known names inside a component's source tree.

use std::path::Path;

/// Paths devpush reads or writes relative to the source root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkspacePath {
    /// The `.devpush` directory (state and configuration)
    DevpushDir,
    /// The `.git` directory, never synced
    GitDir,
    /// `.devpushignore`, preferred ignore file
    IgnoreFile,
    /// `.gitignore`, fallback ignore file
    GitIgnoreFile,
}

impl WorkspacePath {
    /// Get the string representation of the path.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DevpushDir => ".devpush",
            Self::GitDir => ".git",
            Self::IgnoreFile => ".devpushignore",
            Self::GitIgnoreFile => ".gitignore",
        }
    }
}

impl AsRef<Path> for WorkspacePath {
    fn as_ref(&self) -> &Path {
        Path::new(self.as_str())
    }
}

impl AsRef<str> for WorkspacePath {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl std::fmt::Display for WorkspacePath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
