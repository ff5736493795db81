//! Platform process backend.
//!
//! Children are started with `tokio::process` on a private current-thread
//! runtime. Each child gets one future in a [`JoinSet`] that awaits its exit
//! status and drains its output pipe; [`TokioBackend::wait_any`] blocks the
//! calling thread on `join_next`, so the thread that drives the queue is the
//! only thread involved and no thread is dedicated to any child.

use std::collections::HashMap;
use std::process::Stdio;

use tokio::process::{Child, Command};
use tokio::runtime::Runtime;
use tokio::task::{Id, JoinSet};
use tracing::{debug, error, warn};

use super::{Capabilities, Completion, ProcessBackend, SpawnError};
use crate::task::{CommandSpec, ExitStatus, ProcessId, TaskId};

#[cfg(unix)]
type OutputPipe = tokio::net::unix::pipe::Receiver;
#[cfg(not(unix))]
type OutputPipe = std::convert::Infallible;

/// Runs tasks as real OS processes.
pub struct TokioBackend {
    runtime: Runtime,
    children: JoinSet<Completion>,
    /// Maps join-set task ids back to the task and process they watch.
    watched: HashMap<Id, (TaskId, ProcessId)>,
    capabilities: Capabilities,
}

impl TokioBackend {
    /// Create a backend with its own current-thread runtime.
    pub fn new() -> std::io::Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        Ok(Self {
            runtime,
            children: JoinSet::new(),
            watched: HashMap::new(),
            capabilities: Capabilities::platform(),
        })
    }

    fn build_command(command: &CommandSpec) -> Command {
        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args).stdin(Stdio::null());
        if let Some(env) = &command.env {
            cmd.env_clear().envs(env.iter().map(|(k, v)| (k, v)));
        }
        cmd
    }

    /// Route stdout and stderr into a single pipe so output keeps the order
    /// the child wrote it in. Must run inside the runtime context.
    #[cfg(unix)]
    fn attach_output(cmd: &mut Command) -> std::io::Result<Option<OutputPipe>> {
        let (reader, writer) = std::io::pipe()?;
        cmd.stdout(writer.try_clone()?).stderr(writer);
        let receiver = tokio::net::unix::pipe::Receiver::from_owned_fd(reader.into())?;
        Ok(Some(receiver))
    }

    #[cfg(not(unix))]
    #[allow(clippy::unnecessary_wraps)]
    fn attach_output(_cmd: &mut Command) -> std::io::Result<Option<OutputPipe>> {
        Ok(None)
    }
}

impl ProcessBackend for TokioBackend {
    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    fn spawn(&mut self, task: TaskId, command: &CommandSpec) -> Result<ProcessId, SpawnError> {
        let _guard = self.runtime.enter();

        let mut cmd = Self::build_command(command);
        let output = Self::attach_output(&mut cmd).map_err(|e| SpawnError::from_io(command, e))?;
        let child = cmd.spawn().map_err(|e| SpawnError::from_io(command, e))?;
        // The command still holds our copies of the pipe's write end; the
        // reader only sees EOF once they are closed.
        drop(cmd);

        let Some(raw_pid) = child.id() else {
            return Err(SpawnError::from_io(
                command,
                std::io::Error::other("child exited before its pid was read"),
            ));
        };
        let pid = ProcessId(raw_pid);

        let handle = self
            .children
            .spawn_on(watch_child(task, pid, child, output), self.runtime.handle());
        self.watched.insert(handle.id(), (task, pid));

        debug!(
            task = %task,
            pid = %pid,
            program = %command.program.display(),
            in_flight = self.watched.len(),
            "Spawned child process"
        );
        Ok(pid)
    }

    fn in_flight(&self) -> usize {
        self.watched.len()
    }

    fn wait_any(&mut self) -> Option<Completion> {
        loop {
            match self.runtime.block_on(self.children.join_next_with_id())? {
                Ok((id, completion)) => {
                    self.watched.remove(&id);
                    return Some(completion);
                }
                Err(err) => {
                    let Some((task, pid)) = self.watched.remove(&err.id()) else {
                        error!(error = %err, "Untracked child watcher did not complete");
                        continue;
                    };
                    error!(
                        task = %task,
                        pid = %pid,
                        error = %err,
                        "Child watcher did not complete"
                    );
                    return Some(Completion {
                        task,
                        pid,
                        status: ExitStatus::WaitFailed,
                        output: Vec::new(),
                    });
                }
            }
        }
    }
}

/// Wait for `child` to exit while draining its output pipe.
async fn watch_child(
    task: TaskId,
    pid: ProcessId,
    mut child: Child,
    output: Option<OutputPipe>,
) -> Completion {
    let (status, output) = tokio::join!(child.wait(), drain_output(pid, output));
    let status = match status {
        Ok(status) => ExitStatus::from(status),
        Err(e) => {
            warn!(pid = %pid, error = %e, "Failed to wait for child");
            ExitStatus::WaitFailed
        }
    };
    debug!(pid = %pid, %status, output_bytes = output.len(), "Child process exited");

    Completion {
        task,
        pid,
        status,
        output,
    }
}

#[cfg(unix)]
async fn drain_output(pid: ProcessId, output: Option<OutputPipe>) -> Vec<u8> {
    use tokio::io::AsyncReadExt;

    let mut buf = Vec::new();
    if let Some(mut pipe) = output
        && let Err(e) = pipe.read_to_end(&mut buf).await
    {
        warn!(pid = %pid, error = %e, "Failed to read child output");
    }
    buf
}

#[cfg(not(unix))]
#[allow(clippy::unused_async)]
async fn drain_output(_pid: ProcessId, _output: Option<OutputPipe>) -> Vec<u8> {
    Vec::new()
}

#[cfg(all(test, unix))]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    fn sh(script: &str) -> CommandSpec {
        CommandSpec::new("/bin/sh").args(["-c", script])
    }

    #[test]
    fn reports_exit_code_and_output() {
        let mut backend = TokioBackend::new().unwrap();
        let pid = backend
            .spawn(TaskId(7), &sh("echo out; echo err >&2; exit 3"))
            .unwrap();
        assert_eq!(backend.in_flight(), 1);

        let done = backend.wait_any().unwrap();
        assert_eq!(done.task, TaskId(7));
        assert_eq!(done.pid, pid);
        assert_eq!(done.status, ExitStatus::Exited(3));
        assert_eq!(done.output, b"out\nerr\n");
        assert_eq!(backend.in_flight(), 0);
        assert!(backend.wait_any().is_none());
    }

    #[test]
    fn missing_executable_is_not_found() {
        let mut backend = TokioBackend::new().unwrap();
        let err = backend
            .spawn(TaskId(0), &CommandSpec::new("/definitely/not/a/real/tool"))
            .unwrap_err();
        assert!(matches!(err, SpawnError::NotFound { .. }), "got: {err}");
        assert_eq!(backend.in_flight(), 0);
    }

    #[test]
    fn env_override_replaces_environment() {
        let mut backend = TokioBackend::new().unwrap();
        let probe = sh("printf '%s' \"${TASKQ_PROBE-unset}:${HOME-unset}\"")
            .env([("TASKQ_PROBE", "set")]);
        backend.spawn(TaskId(0), &probe).unwrap();
        let done = backend.wait_any().unwrap();
        assert_eq!(done.output, b"set:unset");
    }

    #[test]
    fn reports_signal_termination() {
        let mut backend = TokioBackend::new().unwrap();
        backend.spawn(TaskId(0), &sh("kill -9 $$")).unwrap();
        let done = backend.wait_any().unwrap();
        assert_eq!(done.status, ExitStatus::Signaled(9));
    }

    #[test]
    fn first_to_exit_is_reported_first() {
        let mut backend = TokioBackend::new().unwrap();
        backend.spawn(TaskId(1), &sh("sleep 1")).unwrap();
        backend.spawn(TaskId(2), &sh("exit 0")).unwrap();

        assert_eq!(backend.wait_any().unwrap().task, TaskId(2));
        assert_eq!(backend.wait_any().unwrap().task, TaskId(1));
    }

    #[test]
    fn aborted_watcher_reports_wait_failed() {
        let mut backend = TokioBackend::new().unwrap();
        let pid = backend.spawn(TaskId(3), &sh("sleep 1")).unwrap();
        backend.children.abort_all();

        let done = backend.wait_any().unwrap();
        assert_eq!(done.task, TaskId(3));
        assert_eq!(done.pid, pid);
        assert_eq!(done.status, ExitStatus::WaitFailed);
        assert!(done.output.is_empty());
        assert_eq!(backend.in_flight(), 0);
        assert!(backend.wait_any().is_none());
    }

    #[test]
    fn untracked_watcher_failure_is_skipped() {
        let mut backend = TokioBackend::new().unwrap();
        backend.spawn(TaskId(1), &sh("sleep 1")).unwrap();
        backend.children.abort_all();
        backend.watched.clear();
        backend.spawn(TaskId(2), &sh("exit 0")).unwrap();

        let done = backend.wait_any().unwrap();
        assert_eq!(done.task, TaskId(2));
        assert_eq!(done.status, ExitStatus::Exited(0));
        assert!(backend.wait_any().is_none());
    }
}
