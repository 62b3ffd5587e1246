//! [`FakeRemote`]: an in-memory remote execution target.
//!
//! Archives sent through `stream_in` are unpacked into a path-to-bytes map,
//! every call is recorded, and faults can be queued per operation kind.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::io::Read;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use devpush_core::{CallContext, Error, ExecOutput, RemoteTarget, Result};
use tokio::sync::{Notify, Semaphore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    Exec,
    StreamIn,
    RemovePaths,
}

/// A recorded call, successful or not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteOp {
    Exec(Vec<String>),
    StreamIn { dest: String, entries: Vec<String> },
    RemovePaths(Vec<String>),
}

impl RemoteOp {
    pub fn kind(&self) -> OpKind {
        match self {
            Self::Exec(_) => OpKind::Exec,
            Self::StreamIn { .. } => OpKind::StreamIn,
            Self::RemovePaths(_) => OpKind::RemovePaths,
        }
    }
}

/// Injected failure for the next call of a kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Connection-level failure, retried by the scheduler
    Transient,
    /// Authorization failure, never retried
    Auth,
}

impl Fault {
    fn into_error(self, operation: &str) -> Error {
        match self {
            Self::Transient => Error::transport(operation, "injected connection reset"),
            Self::Auth => Error::FatalAuth {
                message: format!("injected auth failure on {operation}"),
            },
        }
    }
}

#[derive(Default)]
struct State {
    files: BTreeMap<String, Vec<u8>>,
    ops: Vec<RemoteOp>,
    faults: HashMap<OpKind, VecDeque<Fault>>,
    command_exit_code: i32,
}

/// Holds `stream_in` calls until released.
struct Gate {
    entered: Notify,
    release: Semaphore,
}

/// Test-side handle to a gate installed with [`FakeRemote::gate_stream_in`].
#[derive(Clone)]
pub struct StreamGate {
    gate: Arc<Gate>,
}

impl StreamGate {
    /// Wait until a `stream_in` call is parked at the gate.
    pub async fn entered(&self) {
        self.gate.entered.notified().await;
    }

    /// Let every parked and future `stream_in` through.
    pub fn open(&self) {
        self.gate.release.add_permits(Semaphore::MAX_PERMITS / 2);
    }
}

#[derive(Default)]
pub struct FakeRemote {
    state: Mutex<State>,
    gate: Mutex<Option<Arc<Gate>>>,
}

impl FakeRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Every remote file, keyed by absolute remote path.
    pub fn files(&self) -> BTreeMap<String, Vec<u8>> {
        self.state.lock().unwrap().files.clone()
    }

    pub fn file(&self, path: &str) -> Option<String> {
        self.state
            .lock()
            .unwrap()
            .files
            .get(path)
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
    }

    pub fn ops(&self) -> Vec<RemoteOp> {
        self.state.lock().unwrap().ops.clone()
    }

    pub fn count(&self, kind: OpKind) -> usize {
        self.state
            .lock()
            .unwrap()
            .ops
            .iter()
            .filter(|op| op.kind() == kind)
            .count()
    }

    /// Calls that write or delete remote files.
    pub fn mutating_calls(&self) -> usize {
        self.count(OpKind::StreamIn) + self.count(OpKind::RemovePaths)
    }

    pub fn clear_ops(&self) {
        self.state.lock().unwrap().ops.clear();
    }

    /// Fail the next `times` calls of `kind` with `fault`.
    pub fn fail_next(&self, kind: OpKind, times: usize, fault: Fault) {
        let mut state = self.state.lock().unwrap();
        let queue = state.faults.entry(kind).or_default();
        queue.extend(std::iter::repeat_n(fault, times));
    }

    /// Exit code returned by every command other than `mkdir`.
    pub fn set_command_exit_code(&self, code: i32) {
        self.state.lock().unwrap().command_exit_code = code;
    }

    /// Park `stream_in` calls until the returned gate is opened.
    pub fn gate_stream_in(&self) -> StreamGate {
        let gate = Arc::new(Gate {
            entered: Notify::new(),
            release: Semaphore::new(0),
        });
        *self.gate.lock().unwrap() = Some(Arc::clone(&gate));
        StreamGate { gate }
    }

    fn record(&self, op: RemoteOp) -> Option<Fault> {
        let mut state = self.state.lock().unwrap();
        let kind = op.kind();
        state.ops.push(op);
        state.faults.get_mut(&kind).and_then(VecDeque::pop_front)
    }
}

fn unpack(dest: &str, archive: &[u8]) -> Result<Vec<(String, Vec<u8>)>> {
    let mut unpacked = Vec::new();
    let mut reader = tar::Archive::new(archive);
    for entry in reader.entries()? {
        let mut entry = entry?;
        let path = entry.path()?.to_string_lossy().replace('\\', "/");
        let mut body = Vec::new();
        entry.read_to_end(&mut body)?;
        unpacked.push((format!("{}/{}", dest.trim_end_matches('/'), path), body));
    }
    Ok(unpacked)
}

#[async_trait]
impl RemoteTarget for FakeRemote {
    async fn exec(&self, command: &[String], _ctx: &CallContext) -> Result<ExecOutput> {
        if let Some(fault) = self.record(RemoteOp::Exec(command.to_vec())) {
            return Err(fault.into_error("exec"));
        }
        let exit_code = if command.first().map(String::as_str) == Some("mkdir") {
            0
        } else {
            self.state.lock().unwrap().command_exit_code
        };
        Ok(ExecOutput {
            stdout: String::new(),
            stderr: if exit_code == 0 {
                String::new()
            } else {
                "command failed".into()
            },
            exit_code,
        })
    }

    async fn stream_in(&self, dest: &str, archive: &[u8], _ctx: &CallContext) -> Result<()> {
        let unpacked = unpack(dest, archive)?;

        let op = RemoteOp::StreamIn {
            dest: dest.to_string(),
            entries: unpacked.iter().map(|(path, _)| path.clone()).collect(),
        };
        if let Some(fault) = self.record(op) {
            return Err(fault.into_error("stream_in"));
        }

        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.entered.notify_one();
            let _permit = gate
                .release
                .acquire()
                .await
                .map_err(|_| Error::transport("stream_in", "gate closed"))?;
        }

        let mut state = self.state.lock().unwrap();
        state.files.extend(unpacked);
        Ok(())
    }

    async fn remove_paths(&self, paths: &[String], _ctx: &CallContext) -> Result<()> {
        if let Some(fault) = self.record(RemoteOp::RemovePaths(paths.to_vec())) {
            return Err(fault.into_error("remove_paths"));
        }
        let mut state = self.state.lock().unwrap();
        for path in paths {
            let prefix = format!("{path}/");
            state
                .files
                .retain(|existing, _| existing != path && !existing.starts_with(&prefix));
        }
        Ok(())
    }
}
