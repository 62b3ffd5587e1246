//! Error types for devpush-core

use std::path::PathBuf;

use crate::reconcile::ResourceKind;

/// Result type for devpush-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// How the retry layer should treat an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Worth retrying after a backoff
    Transient,
    /// Retrying cannot help; surface immediately
    Fatal,
}

/// Errors that can occur in devpush-core operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The local source tree could not be indexed
    #[error("Index error: {0}")]
    Index(#[source] devpush_fs::Error),

    /// Optimistic-concurrency check failed: the version token is stale
    #[error("Conflict on {kind} '{name}': resource version is stale")]
    Conflict { kind: ResourceKind, name: String },

    /// A resource expected to exist is gone
    #[error("{kind} '{name}' not found")]
    NotFound { kind: ResourceKind, name: String },

    /// Network failure, timeout or rate limit talking to a remote endpoint
    #[error("Transport error during {operation}: {message}")]
    TransientTransport { operation: String, message: String },

    /// Credentials were rejected
    #[error("Authorization failed: {message}")]
    FatalAuth { message: String },

    /// The component specification cannot be applied as written
    #[error("Invalid component spec: {message}")]
    InvalidSpec { message: String },

    /// A transient error persisted through every allowed attempt
    #[error("{operation} failed after {attempts} attempts: {source}")]
    RetryExhausted {
        operation: String,
        attempts: u32,
        #[source]
        source: Box<Error>,
    },

    /// A remote command ran but exited non-zero
    #[error("Remote command `{command}` exited with {exit_code}: {stderr}")]
    CommandFailed {
        command: String,
        exit_code: i32,
        stderr: String,
    },

    /// The operation was cut short by a stop signal
    #[error("Operation cancelled")]
    Cancelled,

    /// The controller reached its terminal state and accepts no more cycles
    #[error("Controller for '{component}' has aborted")]
    Aborted { component: String },

    /// Persisted push state is unreadable
    #[error("Push state at {path} is invalid: {message}")]
    State { path: PathBuf, message: String },

    /// Configuration values out of range
    #[error("Invalid configuration: {message}")]
    Config { message: String },

    // Transparent wrappers for underlying crate errors
    /// Filesystem error from devpush-fs
    #[error(transparent)]
    Fs(#[from] devpush_fs::Error),

    /// Filesystem watcher error
    #[error(transparent)]
    Watch(#[from] notify::Error),

    /// Standard I/O error
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// TOML deserialization error
    #[error(transparent)]
    TomlDe(#[from] toml::de::Error),

    /// TOML serialization error
    #[error(transparent)]
    TomlSer(#[from] toml::ser::Error),

    /// A blocking or spawned task panicked or was cancelled
    #[error(transparent)]
    Join(#[from] tokio::task::JoinError),
}

impl Error {
    pub fn transport(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::TransientTransport {
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn invalid_spec(message: impl Into<String>) -> Self {
        Self::InvalidSpec {
            message: message.into(),
        }
    }

    /// Default retry classification.
    ///
    /// Transport failures, stale versions and resources that vanished
    /// between read and write are transient. Everything else is fatal.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::TransientTransport { .. } | Self::Conflict { .. } | Self::NotFound { .. } => {
                ErrorClass::Transient
            }
            _ => ErrorClass::Fatal,
        }
    }

    /// Errors after which the controller must stop for good.
    pub fn is_terminal(&self) -> bool {
        match self {
            Self::Cancelled
            | Self::FatalAuth { .. }
            | Self::InvalidSpec { .. }
            | Self::Aborted { .. } => true,
            Self::RetryExhausted { source, .. } => source.is_terminal(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(Error::transport("stream_in", "connection reset"), ErrorClass::Transient)]
    #[case(Error::Conflict { kind: ResourceKind::Deployment, name: "api".into() }, ErrorClass::Transient)]
    #[case(Error::NotFound { kind: ResourceKind::Service, name: "api".into() }, ErrorClass::Transient)]
    #[case(Error::FatalAuth { message: "token expired".into() }, ErrorClass::Fatal)]
    #[case(Error::invalid_spec("bad port"), ErrorClass::Fatal)]
    #[case(Error::Cancelled, ErrorClass::Fatal)]
    fn classification(#[case] error: Error, #[case] expected: ErrorClass) {
        assert_eq!(error.class(), expected);
    }

    #[test]
    fn exhausted_display_includes_cause() {
        let err = Error::RetryExhausted {
            operation: "remove_paths".into(),
            attempts: 5,
            source: Box::new(Error::transport("remove_paths", "timed out")),
        };
        let display = err.to_string();
        assert!(display.contains("remove_paths"));
        assert!(display.contains("5 attempts"));
        assert!(display.contains("timed out"));
    }

    #[test]
    fn terminal_errors() {
        assert!(Error::Cancelled.is_terminal());
        assert!(Error::invalid_spec("x").is_terminal());
        assert!(!Error::transport("exec", "reset").is_terminal());
    }
}
