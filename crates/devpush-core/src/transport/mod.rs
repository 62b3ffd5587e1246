//! Delivery of a sync plan into the remote environment

mod archive;
mod sync;

pub use archive::{Payload, build_archive, load_payloads};
pub use sync::{SyncSummary, SyncTransport};

use async_trait::async_trait;

use crate::context::CallContext;
use crate::{Error, Result};

/// Captured result of a remote command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Convert a non-zero exit into [`Error::CommandFailed`].
    pub fn check(self, command: &[String]) -> Result<Self> {
        if self.success() {
            Ok(self)
        } else {
            Err(Error::CommandFailed {
                command: command.join(" "),
                exit_code: self.exit_code,
                stderr: self.stderr,
            })
        }
    }
}

/// The remote execution target a component's files are delivered into.
///
/// Implementations map their own failures onto [`Error::TransientTransport`]
/// (retryable) or [`Error::FatalAuth`] (not retryable).
#[async_trait]
pub trait RemoteTarget: Send + Sync {
    /// Run a command in the remote environment.
    async fn exec(&self, command: &[String], ctx: &CallContext) -> Result<ExecOutput>;

    /// Extract an uncompressed tar archive into `dest`.
    async fn stream_in(&self, dest: &str, archive: &[u8], ctx: &CallContext) -> Result<()>;

    /// Remove absolute remote paths. Missing paths are not an error.
    async fn remove_paths(&self, paths: &[String], ctx: &CallContext) -> Result<()>;
}
