//! Terminal progress output for a queue run.

use std::io::{self, Write};

use taskq_runner::{ExitStatus, ProcessId, TaskFinishedResponse, TaskObserver};
use tracing::{error, warn};

/// Prints task progress and output, and decides when the queue stops.
///
/// Task output goes to `out` as each task finishes, so output from parallel
/// tasks never interleaves.
pub struct Reporter<W: Write> {
    out: W,
    quiet: bool,
    keep_going: bool,
    failures: usize,
    write_error: Option<io::Error>,
}

impl<W: Write> Reporter<W> {
    pub const fn new(out: W, quiet: bool, keep_going: bool) -> Self {
        Self {
            out,
            quiet,
            keep_going,
            failures: 0,
            write_error: None,
        }
    }

    pub const fn failures(&self) -> usize {
        self.failures
    }

    /// Consume the reporter, surfacing the first failed write to `out`.
    pub fn finish(mut self) -> io::Result<()> {
        if let Some(e) = self.write_error.take() {
            return Err(e);
        }
        self.out.flush()
    }

    fn write(&mut self, bytes: &[u8]) {
        if self.write_error.is_some() {
            return;
        }
        if let Err(e) = self.out.write_all(bytes) {
            warn!(error = %e, "Failed to write task output");
            self.write_error = Some(e);
        }
    }
}

impl<W: Write> TaskObserver<String> for Reporter<W> {
    fn task_started(&mut self, _pid: ProcessId, label: &String) {
        if !self.quiet {
            self.write(format!("[start] {label}\n").as_bytes());
        }
    }

    fn task_finished(
        &mut self,
        pid: ProcessId,
        status: ExitStatus,
        output: &[u8],
        label: &String,
    ) -> TaskFinishedResponse {
        self.write(output);
        if !output.is_empty() && !output.ends_with(b"\n") {
            self.write(b"\n");
        }

        if status.is_success() {
            return TaskFinishedResponse::Continue;
        }

        self.failures += 1;
        error!(pid = %pid, task = %label, %status, "Task failed");
        if !self.quiet {
            self.write(format!("[failed] {label}: {status}\n").as_bytes());
        }
        if self.keep_going {
            TaskFinishedResponse::Continue
        } else {
            TaskFinishedResponse::Stop
        }
    }
}
