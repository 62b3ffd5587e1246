//! Atomic I/O operations with file locking
//!
//! Writers take an exclusive advisory lock on a sibling `.lock` file, write
//! to a uniquely named temp file in the same directory, fsync, and rename
//! over the target. Readers take a shared lock on the same lock file, so a
//! reader never observes a half-replaced file and two writers never
//! interleave.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use backoff::ExponentialBackoffBuilder;
use fs2::FileExt;
use tracing::debug;

use crate::{Error, NormalizedPath, Result};

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Tuning for lock acquisition and durability of atomic writes.
#[derive(Debug, Clone, Copy)]
pub struct RobustnessConfig {
    /// How long to keep retrying a contended lock before giving up.
    pub lock_timeout: Duration,
    /// First wait between lock attempts; grows exponentially.
    pub lock_retry_interval: Duration,
    /// Whether to fsync the temp file before renaming it into place.
    pub fsync: bool,
}

impl Default for RobustnessConfig {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_secs(5),
            lock_retry_interval: Duration::from_millis(10),
            fsync: true,
        }
    }
}

fn lock_path(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    target.with_file_name(format!(".{name}.lock"))
}

fn open_lock_file(target: &Path) -> Result<File> {
    let path = lock_path(target);
    OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(&path)
        .map_err(|e| Error::io(&path, e))
}

/// Acquire an exclusive lock, retrying with backoff until the timeout.
fn lock_exclusive_with_retry(file: &File, target: &Path, config: RobustnessConfig) -> Result<()> {
    let policy = ExponentialBackoffBuilder::new()
        .with_initial_interval(config.lock_retry_interval)
        .with_max_elapsed_time(Some(config.lock_timeout))
        .build();

    backoff::retry(policy, || {
        file.try_lock_exclusive().map_err(backoff::Error::transient)
    })
    .map_err(|_| Error::LockFailed {
        path: target.to_path_buf(),
    })
}

/// Write content atomically to a file with locking.
///
/// Uses write-to-temp-then-rename strategy to prevent partial writes. A crash
/// at any point leaves either the old content or the new content in place.
pub fn write_atomic(path: &NormalizedPath, content: &[u8], config: RobustnessConfig) -> Result<()> {
    let native_path = path.to_native();

    if let Some(parent) = native_path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
    }

    let lock_file = open_lock_file(&native_path)?;
    lock_exclusive_with_retry(&lock_file, &native_path, config)?;

    // Same directory as the target so the rename never crosses filesystems
    let temp_name = format!(
        ".{}.{}.{}.tmp",
        native_path
            .file_name()
            .map(|n| n.to_string_lossy())
            .unwrap_or_default(),
        std::process::id(),
        TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
    );
    let temp_path = native_path.with_file_name(&temp_name);

    let result = write_and_rename(&temp_path, &native_path, content, config);
    if result.is_err() {
        let _ = fs::remove_file(&temp_path);
    }

    lock_file.unlock().map_err(|_| Error::LockFailed {
        path: native_path.clone(),
    })?;

    if result.is_ok() {
        debug!(path = %path, bytes = content.len(), "atomic write complete");
    }
    result
}

fn write_and_rename(
    temp_path: &Path,
    target: &Path,
    content: &[u8],
    config: RobustnessConfig,
) -> Result<()> {
    let mut temp_file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(temp_path)
        .map_err(|e| Error::io(temp_path, e))?;

    temp_file
        .write_all(content)
        .map_err(|e| Error::io(temp_path, e))?;

    if config.fsync {
        temp_file.sync_all().map_err(|e| Error::io(temp_path, e))?;
    }
    drop(temp_file);

    fs::rename(temp_path, target).map_err(|e| Error::io(target, e))
}

/// Read a file's bytes under a shared lock.
///
/// Returns `Ok(None)` when the file does not exist.
pub fn read_locked(path: &NormalizedPath) -> Result<Option<Vec<u8>>> {
    let native_path = path.to_native();
    if !native_path.exists() {
        return Ok(None);
    }

    let lock_file = open_lock_file(&native_path)?;
    lock_file.lock_shared().map_err(|_| Error::LockFailed {
        path: native_path.clone(),
    })?;

    let mut content = Vec::new();
    let read = File::open(&native_path).and_then(|mut f| f.read_to_end(&mut content));

    let _ = lock_file.unlock();

    match read {
        Ok(_) => Ok(Some(content)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(Error::io(&native_path, e)),
    }
}

/// Read text content from a file.
pub fn read_text(path: &NormalizedPath) -> Result<String> {
    let native_path = path.to_native();
    fs::read_to_string(&native_path).map_err(|e| Error::io(&native_path, e))
}
