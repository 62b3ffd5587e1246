//! Archive assembly for the write half of a sync plan

use std::path::Path;
use std::sync::Arc;

use devpush_fs::NormalizedPath;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::Result;

/// File contents ready to be placed in the archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    pub path: String,
    pub mode: u32,
    pub bytes: Vec<u8>,
}

impl Payload {
    fn read(root: &Path, rel: &str) -> Result<Self> {
        let full = root.join(NormalizedPath::new(rel).to_native());
        let bytes = std::fs::read(&full).map_err(|e| devpush_fs::Error::io(&full, e))?;
        let metadata = std::fs::metadata(&full).map_err(|e| devpush_fs::Error::io(&full, e))?;
        Ok(Self {
            path: rel.to_string(),
            mode: file_mode(&metadata),
            bytes,
        })
    }
}

#[cfg(unix)]
fn file_mode(metadata: &std::fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn file_mode(metadata: &std::fs::Metadata) -> u32 {
    if metadata.permissions().readonly() {
        0o444
    } else {
        0o644
    }
}

/// Read `paths` under `root` on at most `workers` blocking threads.
///
/// Every read completes (or the first error is returned) before this
/// resolves. The result keeps the order of `paths`.
pub async fn load_payloads(root: &Path, paths: Vec<String>, workers: usize) -> Result<Vec<Payload>> {
    let permits = Arc::new(Semaphore::new(workers.max(1)));
    let root = Arc::new(root.to_path_buf());
    let mut tasks = JoinSet::new();

    for (slot, rel) in paths.into_iter().enumerate() {
        let permits = Arc::clone(&permits);
        let root = Arc::clone(&root);
        tasks.spawn(async move {
            let _permit = permits
                .acquire_owned()
                .await
                .map_err(|_| crate::Error::Cancelled)?;
            let payload = tokio::task::spawn_blocking(move || Payload::read(&root, &rel)).await??;
            Ok::<_, crate::Error>((slot, payload))
        });
    }

    let mut loaded: Vec<Option<Payload>> = vec![None; tasks.len()];
    while let Some(joined) = tasks.join_next().await {
        let (slot, payload) = joined??;
        loaded[slot] = Some(payload);
    }
    Ok(loaded.into_iter().flatten().collect())
}

/// Pack payloads into an uncompressed tar stream, in the given order.
pub fn build_archive(payloads: &[Payload]) -> Result<Vec<u8>> {
    let mut builder = tar::Builder::new(Vec::new());
    for payload in payloads {
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Regular);
        header.set_size(payload.bytes.len() as u64);
        header.set_mode(payload.mode);
        header.set_mtime(0);
        builder.append_data(&mut header, &payload.path, payload.bytes.as_slice())?;
    }
    Ok(builder.into_inner()?)
}
