//! Launch seam between the supervisor and real processes
//!
//! The supervisor talks to a [`ProcessLauncher`] instead of spawning directly,
//! so tests can swap in a launcher that records requests and emits
//! [`ProcessEvent`]s by hand.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::env::Environment;

/// Errors that can occur during process operations
#[derive(Error, Debug)]
pub enum PtyError {
    #[error("Failed to open PTY: {0}")]
    OpenFailed(String),

    #[error("Failed to spawn process: {0}")]
    SpawnFailed(String),

    #[error("Failed to write to PTY: {0}")]
    WriteFailed(String),

    #[error("Failed to signal process: {0}")]
    SignalFailed(String),

    #[error("Process already exited")]
    ProcessExited,

    #[error("PTY system error: {0}")]
    SystemError(String),
}

/// Result type for process operations
pub type PtyResult<T> = Result<T, PtyError>;

/// Reason for process exit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// The OS reported an exit status
    Normal,
    /// Waiting on the child failed; the process is gone but the status is not
    Unknown,
}

/// How a process ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessExit {
    /// Exit code if available
    pub exit_code: Option<i32>,
    /// Exit reason
    pub reason: ExitReason,
}

/// Something a running process did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessEventKind {
    /// Raw bytes from the combined stdout/stderr stream
    Output(Vec<u8>),
    /// The process ended. No output follows for this process.
    Exited(ProcessExit),
}

/// Event tagged with the process it came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessEvent {
    pub id: Uuid,
    pub kind: ProcessEventKind,
}

/// Channel process events are delivered on
pub type ProcessEventSender = mpsc::UnboundedSender<ProcessEvent>;

/// Executable and arguments after bundle resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchTarget {
    pub program: PathBuf,
    pub args: Vec<String>,
}

/// Everything needed to start one process
#[derive(Debug, Clone)]
pub struct LaunchRequest {
    /// Identifier stamped on every event of this process
    pub id: Uuid,
    pub target: LaunchTarget,
    /// Complete environment; the launcher's own is not inherited
    pub env: Arc<Environment>,
    /// Working directory
    pub cwd: PathBuf,
}

/// A live process: its identity, its stdin and its termination switch
pub trait ProcessHandle: Send {
    /// Write raw bytes to the process's stdin
    fn write(&mut self, data: &[u8]) -> PtyResult<()>;

    /// Ask the process to terminate.
    ///
    /// Completion is reported later as [`ProcessEventKind::Exited`].
    fn terminate(&mut self) -> PtyResult<()>;
}

/// Starts processes and reports their output and exit on `events`
pub trait ProcessLauncher: Send {
    fn launch(
        &self,
        request: LaunchRequest,
        events: ProcessEventSender,
    ) -> PtyResult<Box<dyn ProcessHandle>>;
}

/// Pick the binary to run for `co <args...>`.
///
/// A bundled binary wins if it is an executable regular file; otherwise
/// `program` is left for PATH lookup. Checked on every call.
pub fn resolve_executable(bundled: Option<&Path>, program: &str, args: &[&str]) -> LaunchTarget {
    let args = args.iter().map(|a| a.to_string()).collect();
    match bundled.filter(|path| is_executable(path)) {
        Some(path) => LaunchTarget {
            program: path.to_path_buf(),
            args,
        },
        None => LaunchTarget {
            program: PathBuf::from(program),
            args,
        },
    }
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    match std::fs::metadata(path) {
        Ok(meta) => meta.is_file() && meta.permissions().mode() & 0o111 != 0,
        Err(_) => false,
    }
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}
