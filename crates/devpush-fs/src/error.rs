//! Error types for devpush-fs

use std::path::PathBuf;

/// Result type for devpush-fs operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in devpush-fs operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The root of an index walk could not be read at all.
    #[error("Cannot index {path}: {source}")]
    RootUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot index {path}: not a directory")]
    RootNotDirectory { path: PathBuf },

    #[error("Failed to parse {format} config at {path}: {message}")]
    ConfigParse {
        path: PathBuf,
        format: String,
        message: String,
    },

    #[error("Unsupported config format: {extension}")]
    UnsupportedFormat { extension: String },

    #[error("Invalid ignore pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },

    #[error("Lock acquisition failed for {path}")]
    LockFailed { path: PathBuf },
}

impl Error {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether this error means the index root itself is unusable.
    pub fn is_index_root_error(&self) -> bool {
        matches!(self, Self::RootUnreadable { .. } | Self::RootNotDirectory { .. })
    }
}
