use crate::native::{NtStatus, RawHandle};
use std::io;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{call} failed with status {status}")]
    Status { call: &'static str, status: NtStatus },

    #[error("{call} still reported a short buffer after {attempts} attempts")]
    BufferNegotiation { call: &'static str, attempts: u32 },

    #[error("Failed to open process {pid}: {source}")]
    OpenProcess { pid: u32, source: io::Error },

    #[error("Name query for handle {handle} did not finish within {timeout:?}")]
    NameQueryTimedOut { handle: RawHandle, timeout: Duration },

    #[error("Name query worker exited unexpectedly")]
    NameWorkerExited,

    #[error("{stuck} name query worker(s) are still blocked in the kernel")]
    NameWorkersBusy { stuck: usize },

    #[error("No handle named {name:?} in process {pid}")]
    NotFound { pid: u32, name: String },

    #[error("None of the {attempted} matching handle(s) in process {pid} could be closed: {source}")]
    NoneClosed {
        pid: u32,
        attempted: usize,
        source: Box<Error>,
    },

    #[error("Process not running: {0}")]
    ProcessNotRunning(String),

    #[error("None of the {attempted} {name} process(es) could be terminated: {source}")]
    NoneTerminated {
        name: String,
        attempted: usize,
        source: Box<Error>,
    },

    #[error("Failed to {op} process {pid}: {source}")]
    Process {
        pid: u32,
        op: &'static str,
        source: io::Error,
    },

    #[error("Executable not found: {}", .0.display())]
    ExecutableMissing(PathBuf),

    #[error("Failed to launch {}: {source}", path.display())]
    Launch { path: PathBuf, source: io::Error },

    #[error("Failed to snapshot processes: {0}")]
    Snapshot(io::Error),

    #[error("Failed to spawn worker thread: {0}")]
    Thread(io::Error),

    #[error("Native process and handle APIs are not available on this platform")]
    Unsupported,
}

/// Coarse classification callers use to decide how loudly to report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The process or handle vanished. Expected during normal churn.
    NotFound,
    /// Access was refused, typically a protected or elevated process.
    Permission,
    /// May succeed on the next attempt.
    Transient,
    Fatal,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } | Self::ProcessNotRunning(_) => ErrorKind::NotFound,
            Self::NoneClosed { source, .. } | Self::NoneTerminated { source, .. } => source.kind(),
            Self::NameQueryTimedOut { .. }
            | Self::NameWorkersBusy { .. }
            | Self::BufferNegotiation { .. } => ErrorKind::Transient,
            Self::Status { status, .. } if status.is_access_denied() => ErrorKind::Permission,
            Self::Status { status, .. }
                if *status == NtStatus::INVALID_HANDLE || *status == NtStatus::INVALID_CID =>
            {
                ErrorKind::NotFound
            }
            Self::OpenProcess { source, .. } | Self::Process { source, .. } => io_kind(source),
            _ => ErrorKind::Fatal,
        }
    }
}

fn io_kind(err: &io::Error) -> ErrorKind {
    match err.kind() {
        io::ErrorKind::PermissionDenied => ErrorKind::Permission,
        // OpenProcess reports an exited pid as ERROR_INVALID_PARAMETER.
        io::ErrorKind::NotFound | io::ErrorKind::InvalidInput => ErrorKind::NotFound,
        _ => ErrorKind::Fatal,
    }
}
