//! Process backends: the capability of starting child processes and waiting
//! for whichever of them exits first.
//!
//! - [`TokioBackend`]: the platform implementation, driven by a private
//!   current-thread tokio runtime.
//! - [`testing::FakeBackend`]: a scripted, deterministic backend for tests.

pub mod process;
pub mod testing;

pub use process::TokioBackend;

use std::num::NonZero;

use crate::task::{CommandSpec, ExitStatus, ProcessId, TaskId};

/// Platform facts that shape how a queue runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// Child stdout/stderr can be collected and handed to the observer.
    pub output_capture: bool,
    /// More than one child may run at a time.
    pub parallel_execution: bool,
}

impl Capabilities {
    /// Capabilities of the current build target.
    pub const fn platform() -> Self {
        Self {
            output_capture: cfg!(unix),
            parallel_execution: cfg!(any(unix, windows)),
        }
    }
}

/// Whether the platform backend can hand task output to the observer.
///
/// When this is false every `task_finished` call receives empty output.
pub const fn supports_output_capture() -> bool {
    Capabilities::platform().output_capture
}

/// Whether the platform backend can run more than one task at a time.
pub const fn supports_parallel_execution() -> bool {
    Capabilities::platform().parallel_execution
}

/// Hardware concurrency, used when a queue is asked for parallelism 0.
pub fn detected_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(NonZero::get)
        .unwrap_or(1)
}

/// A finished process as reported by [`ProcessBackend::wait_any`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    /// The id passed to [`ProcessBackend::spawn`] for this process.
    pub task: TaskId,
    pub pid: ProcessId,
    pub status: ExitStatus,
    /// Combined stdout/stderr. Empty when the backend cannot capture output.
    pub output: Vec<u8>,
}

/// Errors from starting a child process.
#[derive(Debug, thiserror::Error)]
pub enum SpawnError {
    #[error("Executable not found: {program}")]
    NotFound { program: String },

    #[error("Permission denied executing {program}")]
    PermissionDenied { program: String },

    #[error("Failed to spawn {program}: {source}")]
    Io {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Process spawning is not supported on this platform")]
    Unsupported,
}

impl SpawnError {
    pub(crate) fn from_io(command: &CommandSpec, source: std::io::Error) -> Self {
        let program = command.program.display().to_string();
        match source.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound { program },
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied { program },
            std::io::ErrorKind::Unsupported => Self::Unsupported,
            _ => Self::Io { program, source },
        }
    }
}

/// Starts processes and multiplexes waiting across all of them.
///
/// Implementations own their in-flight set. Every process returned by a
/// successful [`spawn`](Self::spawn) must be reported by exactly one call to
/// [`wait_any`](Self::wait_any).
pub trait ProcessBackend {
    /// Capabilities of this backend. Must not change over its lifetime.
    fn capabilities(&self) -> Capabilities;

    /// Start one child without waiting for it.
    ///
    /// `task` is echoed back in the child's [`Completion`].
    fn spawn(&mut self, task: TaskId, command: &CommandSpec) -> Result<ProcessId, SpawnError>;

    /// Number of spawned processes not yet reported by `wait_any`.
    fn in_flight(&self) -> usize;

    /// Block until one in-flight process exits and report it.
    ///
    /// Returns `None` only when nothing is in flight.
    fn wait_any(&mut self) -> Option<Completion>;
}

impl<B: ProcessBackend + ?Sized> ProcessBackend for Box<B> {
    fn capabilities(&self) -> Capabilities {
        (**self).capabilities()
    }

    fn spawn(&mut self, task: TaskId, command: &CommandSpec) -> Result<ProcessId, SpawnError> {
        (**self).spawn(task, command)
    }

    fn in_flight(&self) -> usize {
        (**self).in_flight()
    }

    fn wait_any(&mut self) -> Option<Completion> {
        (**self).wait_any()
    }
}
