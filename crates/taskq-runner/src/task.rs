//! Task descriptions and their run-time outcome.

use std::ffi::OsString;
use std::fmt;
use std::path::PathBuf;

/// Identifier of a started task's process.
///
/// For real children this is the OS process id. Tasks whose spawn failed are
/// reported with [`ProcessId::UNSPAWNED`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProcessId(pub u32);

impl ProcessId {
    /// Reported for a task that never became a process.
    pub const UNSPAWNED: Self = Self(0);

    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Queue-assigned identity of a started task.
///
/// Ids are handed out in start order and never reused within a queue, so a
/// completion is matched to its task even if the OS recycles a process id
/// before the earlier exit has been reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// How a task ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExitStatus {
    /// The process exited with the given code.
    Exited(i32),
    /// The process was terminated by a signal (unix).
    Signaled(i32),
    /// The process could not be started.
    SpawnFailed,
    /// The process was started but its exit could not be observed.
    WaitFailed,
}

impl ExitStatus {
    /// True only for a clean exit with code 0.
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Exited(0))
    }

    /// Exit code, if the process exited normally.
    pub const fn code(self) -> Option<i32> {
        match self {
            Self::Exited(code) => Some(code),
            _ => None,
        }
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exited(code) => write!(f, "exit code {code}"),
            Self::Signaled(signal) => write!(f, "signal {signal}"),
            Self::SpawnFailed => f.write_str("failed to spawn"),
            Self::WaitFailed => f.write_str("exit status unavailable"),
        }
    }
}

impl From<std::process::ExitStatus> for ExitStatus {
    fn from(status: std::process::ExitStatus) -> Self {
        if let Some(code) = status.code() {
            return Self::Exited(code);
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = status.signal() {
                return Self::Signaled(signal);
            }
        }
        Self::WaitFailed
    }
}

/// What to run: executable, arguments and optional environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: PathBuf,
    pub args: Vec<OsString>,
    /// Complete replacement environment. `None` inherits the caller's.
    pub env: Option<Vec<(OsString, OsString)>>,
}

impl CommandSpec {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: None,
        }
    }

    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn env<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<OsString>,
        V: Into<OsString>,
    {
        self.env = Some(
            vars.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        );
        self
    }
}

/// One unit of work plus its outcome.
///
/// The command and context are fixed at enqueue time. The outcome fields are
/// written by the queue only: the process id when the task starts, then the
/// status and output together when it finishes.
#[derive(Debug)]
pub struct Task<C> {
    command: CommandSpec,
    context: C,
    pid: Option<ProcessId>,
    status: Option<ExitStatus>,
    output: Option<Vec<u8>>,
}

impl<C> Task<C> {
    pub(crate) const fn new(command: CommandSpec, context: C) -> Self {
        Self {
            command,
            context,
            pid: None,
            status: None,
            output: None,
        }
    }

    pub const fn command(&self) -> &CommandSpec {
        &self.command
    }

    pub const fn context(&self) -> &C {
        &self.context
    }

    /// Consume the task, handing the caller's context back.
    pub fn into_context(self) -> C {
        self.context
    }

    pub const fn pid(&self) -> Option<ProcessId> {
        self.pid
    }

    pub const fn status(&self) -> Option<ExitStatus> {
        self.status
    }

    pub fn output(&self) -> Option<&[u8]> {
        self.output.as_deref()
    }

    pub const fn is_finished(&self) -> bool {
        self.status.is_some()
    }

    pub(crate) fn mark_started(&mut self, pid: ProcessId) {
        debug_assert!(self.pid.is_none(), "task started twice");
        self.pid = Some(pid);
    }

    pub(crate) fn mark_finished(&mut self, status: ExitStatus, output: Vec<u8>) {
        debug_assert!(self.pid.is_some(), "task finished before it started");
        debug_assert!(self.status.is_none(), "task finished twice");
        self.status = Some(status);
        self.output = Some(output);
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn only_exit_zero_is_success() {
        assert!(ExitStatus::Exited(0).is_success());
        assert!(!ExitStatus::Exited(1).is_success());
        assert!(!ExitStatus::Signaled(9).is_success());
        assert!(!ExitStatus::SpawnFailed.is_success());
        assert!(!ExitStatus::WaitFailed.is_success());
    }

    #[test]
    fn exit_status_display() {
        assert_eq!(ExitStatus::Exited(2).to_string(), "exit code 2");
        assert_eq!(ExitStatus::Signaled(15).to_string(), "signal 15");
        assert_eq!(ExitStatus::SpawnFailed.to_string(), "failed to spawn");
    }

    #[test]
    fn command_spec_builder() {
        let spec = CommandSpec::new("cc").args(["-c", "a.c"]).env([("PATH", "/bin")]);
        assert_eq!(spec.program, PathBuf::from("cc"));
        assert_eq!(spec.args, vec![OsString::from("-c"), OsString::from("a.c")]);
        assert_eq!(
            spec.env,
            Some(vec![(OsString::from("PATH"), OsString::from("/bin"))])
        );
    }

    #[test]
    fn outcome_is_written_in_order() {
        let mut task = Task::new(CommandSpec::new("true"), "ctx");
        assert!(task.pid().is_none());
        assert!(!task.is_finished());

        task.mark_started(ProcessId(42));
        assert_eq!(task.pid(), Some(ProcessId(42)));
        assert!(task.output().is_none());

        task.mark_finished(ExitStatus::Exited(0), b"ok".to_vec());
        assert_eq!(task.status(), Some(ExitStatus::Exited(0)));
        assert_eq!(task.output(), Some(&b"ok"[..]));
        assert_eq!(task.into_context(), "ctx");
    }

    #[cfg(unix)]
    #[test]
    fn converts_std_exit_status() {
        use std::os::unix::process::ExitStatusExt;
        assert_eq!(
            ExitStatus::from(std::process::ExitStatus::from_raw(3 << 8)),
            ExitStatus::Exited(3)
        );
        assert_eq!(
            ExitStatus::from(std::process::ExitStatus::from_raw(9)),
            ExitStatus::Signaled(9)
        );
    }
}
