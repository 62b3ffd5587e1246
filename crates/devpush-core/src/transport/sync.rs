use std::path::PathBuf;
use std::sync::Arc;

use devpush_fs::NormalizedPath;
use serde::Serialize;
use tracing::{debug, info};

use super::archive::{build_archive, load_payloads};
use super::{ExecOutput, RemoteTarget};
use crate::context::CallContext;
use crate::diff::SyncPlan;
use crate::retry::RetryScheduler;
use crate::{Error, Result};

/// What one [`SyncTransport::apply`] delivered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncSummary {
    pub files_written: usize,
    pub files_deleted: usize,
    /// Size of the archive sent through `stream_in`
    pub bytes_transferred: u64,
}

/// Applies a [`SyncPlan`] to a [`RemoteTarget`].
///
/// Per cycle the remote sees at most one `remove_paths` batch, one
/// `mkdir -p` of the sync directory and one `stream_in`, in that order.
pub struct SyncTransport {
    remote: Arc<dyn RemoteTarget>,
    retry: RetryScheduler,
    local_root: PathBuf,
    remote_root: String,
    workers: usize,
}

impl SyncTransport {
    pub fn new(
        remote: Arc<dyn RemoteTarget>,
        retry: RetryScheduler,
        local_root: impl Into<PathBuf>,
        remote_root: impl Into<String>,
        workers: usize,
    ) -> Self {
        Self {
            remote,
            retry,
            local_root: local_root.into(),
            remote_root: remote_root.into(),
            workers: workers.max(1),
        }
    }

    pub fn remote_root(&self) -> &str {
        &self.remote_root
    }

    /// Map a root-relative path onto the remote sync directory.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidSpec`] for absolute paths or paths containing `..`.
    pub fn remote_path(&self, rel: &str) -> Result<String> {
        let normalized = NormalizedPath::new(rel);
        if !normalized.is_contained() {
            return Err(Error::invalid_spec(format!(
                "path '{rel}' escapes the sync root"
            )));
        }
        Ok(format!(
            "{}/{}",
            self.remote_root.trim_end_matches('/'),
            normalized.as_str()
        ))
    }

    pub async fn apply(&self, plan: &SyncPlan, ctx: &CallContext) -> Result<SyncSummary> {
        if plan.is_empty() {
            return Ok(SyncSummary::default());
        }

        // Validate everything before the first remote call.
        let deletions = plan
            .deleted
            .iter()
            .map(|rel| self.remote_path(rel))
            .collect::<Result<Vec<_>>>()?;
        let writes: Vec<String> = plan.writes().map(str::to_string).collect();
        for rel in &writes {
            self.remote_path(rel)?;
        }

        let remote = &*self.remote;
        let mut summary = SyncSummary::default();

        if !deletions.is_empty() {
            let paths = &deletions;
            self.retry
                .run("remove_paths", ctx, move |_| remote.remove_paths(paths, ctx))
                .await?;
            summary.files_deleted = deletions.len();
            debug!(count = deletions.len(), "remote paths removed");
        }

        if !writes.is_empty() {
            let mkdir = vec![
                "mkdir".to_string(),
                "-p".to_string(),
                self.remote_root.clone(),
            ];
            let command = &mkdir;
            self.retry
                .run("exec", ctx, move |_| remote.exec(command, ctx))
                .await?
                .check(&mkdir)?;

            let payloads = load_payloads(&self.local_root, writes, self.workers).await?;
            ctx.check()?;
            let archive = build_archive(&payloads)?;

            let dest = self.remote_root.as_str();
            let bytes = archive.as_slice();
            self.retry
                .run("stream_in", ctx, move |_| remote.stream_in(dest, bytes, ctx))
                .await?;

            summary.files_written = payloads.len();
            summary.bytes_transferred = archive.len() as u64;
        }

        info!(
            written = summary.files_written,
            deleted = summary.files_deleted,
            bytes = summary.bytes_transferred,
            "sync applied"
        );
        Ok(summary)
    }

    /// Run a shell command from inside the remote sync directory.
    ///
    /// Attempted once; a non-zero exit is [`Error::CommandFailed`].
    pub async fn run_in_sync_dir(&self, script: &str, ctx: &CallContext) -> Result<ExecOutput> {
        let command = vec![
            "sh".to_string(),
            "-c".to_string(),
            format!("cd {} && {}", shell_quote(&self.remote_root), script),
        ];
        info!(command = %script, "running remote command");
        ctx.guard("exec", self.remote.exec(&command, ctx))
            .await?
            .check(&command)
    }
}

/// Single-quote `value` for a POSIX shell.
fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}
