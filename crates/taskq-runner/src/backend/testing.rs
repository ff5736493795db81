//! Deterministic in-memory backend for exercising queue behaviour.
//!
//! [`FakeBackend`] simulates a clock. A spawned program finishes at
//! `spawn time + duration`; [`wait_any`](ProcessBackend::wait_any) always
//! reports the in-flight process with the earliest finish time (ties go to the
//! one spawned first) and advances the clock to it. Outcomes are scripted per
//! program name; unscripted programs succeed immediately with no output.

use std::collections::HashMap;

use super::{Capabilities, Completion, ProcessBackend, SpawnError};
use crate::task::{CommandSpec, ExitStatus, ProcessId, TaskId};

/// First pid handed out, so fake ids never collide with `UNSPAWNED`.
const FIRST_FAKE_PID: u32 = 1000;

/// Scripted behaviour for one program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeProgram {
    status: ExitStatus,
    output: Vec<u8>,
    duration: u64,
    spawn_fails: bool,
}

impl FakeProgram {
    pub const fn succeeds() -> Self {
        Self::exits(0)
    }

    pub const fn exits(code: i32) -> Self {
        Self {
            status: ExitStatus::Exited(code),
            output: Vec::new(),
            duration: 1,
            spawn_fails: false,
        }
    }

    pub const fn signaled(signal: i32) -> Self {
        Self {
            status: ExitStatus::Signaled(signal),
            output: Vec::new(),
            duration: 1,
            spawn_fails: false,
        }
    }

    pub const fn fails_to_spawn() -> Self {
        Self {
            status: ExitStatus::SpawnFailed,
            output: Vec::new(),
            duration: 0,
            spawn_fails: true,
        }
    }

    #[must_use]
    pub fn output(mut self, output: impl Into<Vec<u8>>) -> Self {
        self.output = output.into();
        self
    }

    /// Simulated run time in clock ticks.
    #[must_use]
    pub const fn duration(mut self, ticks: u64) -> Self {
        self.duration = ticks;
        self
    }
}

impl Default for FakeProgram {
    fn default() -> Self {
        Self::succeeds()
    }
}

/// Something the fake backend observed, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FakeEvent {
    Spawned { pid: ProcessId, program: String },
    SpawnRejected { program: String },
    Finished { pid: ProcessId, program: String },
}

#[derive(Debug)]
struct Running {
    task: TaskId,
    pid: ProcessId,
    program: String,
    finishes_at: u64,
    script: FakeProgram,
}

/// Scripted process backend.
#[derive(Debug)]
pub struct FakeBackend {
    capabilities: Capabilities,
    scripts: HashMap<String, FakeProgram>,
    running: Vec<Running>,
    next_pid: u32,
    now: u64,
    peak_in_flight: usize,
    events: Vec<FakeEvent>,
}

impl FakeBackend {
    /// A backend that claims full output capture and parallelism.
    pub fn new() -> Self {
        Self {
            capabilities: Capabilities {
                output_capture: true,
                parallel_execution: true,
            },
            scripts: HashMap::new(),
            running: Vec::new(),
            next_pid: FIRST_FAKE_PID,
            now: 0,
            peak_in_flight: 0,
            events: Vec::new(),
        }
    }

    #[must_use]
    pub const fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Script the outcome of every task whose program is `program`.
    #[must_use]
    pub fn program(mut self, program: impl Into<String>, script: FakeProgram) -> Self {
        self.scripts.insert(program.into(), script);
        self
    }

    /// Everything observed so far, oldest first.
    pub fn events(&self) -> &[FakeEvent] {
        &self.events
    }

    /// Programs in the order they were handed to `spawn`, including rejected ones.
    pub fn spawn_order(&self) -> Vec<String> {
        self.events
            .iter()
            .filter_map(|e| match e {
                FakeEvent::Spawned { program, .. } | FakeEvent::SpawnRejected { program } => {
                    Some(program.clone())
                }
                FakeEvent::Finished { .. } => None,
            })
            .collect()
    }

    /// Programs in the order they finished.
    pub fn finish_order(&self) -> Vec<String> {
        self.events
            .iter()
            .filter_map(|e| match e {
                FakeEvent::Finished { program, .. } => Some(program.clone()),
                _ => None,
            })
            .collect()
    }

    /// Largest number of processes that were in flight at once.
    pub const fn peak_in_flight(&self) -> usize {
        self.peak_in_flight
    }

    /// Current simulated time.
    pub const fn now(&self) -> u64 {
        self.now
    }
}

impl Default for FakeBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessBackend for FakeBackend {
    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    fn spawn(&mut self, task: TaskId, command: &CommandSpec) -> Result<ProcessId, SpawnError> {
        let program = command.program.to_string_lossy().into_owned();
        let script = self.scripts.get(&program).cloned().unwrap_or_default();

        if script.spawn_fails {
            self.events.push(FakeEvent::SpawnRejected {
                program: program.clone(),
            });
            return Err(SpawnError::NotFound { program });
        }

        let pid = ProcessId(self.next_pid);
        self.next_pid += 1;
        self.events.push(FakeEvent::Spawned {
            pid,
            program: program.clone(),
        });
        self.running.push(Running {
            task,
            pid,
            program,
            finishes_at: self.now + script.duration,
            script,
        });
        self.peak_in_flight = self.peak_in_flight.max(self.running.len());
        Ok(pid)
    }

    fn in_flight(&self) -> usize {
        self.running.len()
    }

    fn wait_any(&mut self) -> Option<Completion> {
        // `running` is in spawn order, so min_by_key keeps the earliest
        // spawned among equal finish times.
        let index = self
            .running
            .iter()
            .enumerate()
            .min_by_key(|(_, r)| r.finishes_at)
            .map(|(i, _)| i)?;
        let done = self.running.remove(index);
        self.now = self.now.max(done.finishes_at);
        self.events.push(FakeEvent::Finished {
            pid: done.pid,
            program: done.program,
        });
        Some(Completion {
            task: done.task,
            pid: done.pid,
            status: done.script.status,
            output: done.script.output,
        })
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn shortest_remaining_finishes_first() {
        let mut backend = FakeBackend::new()
            .program("slow", FakeProgram::succeeds().duration(5))
            .program("fast", FakeProgram::exits(2).output("x").duration(1));

        let slow = backend.spawn(TaskId(0), &CommandSpec::new("slow")).unwrap();
        let fast = backend.spawn(TaskId(1), &CommandSpec::new("fast")).unwrap();
        assert_eq!(backend.in_flight(), 2);

        let first = backend.wait_any().unwrap();
        assert_eq!(first.pid, fast);
        assert_eq!(first.task, TaskId(1));
        assert_eq!(first.status, ExitStatus::Exited(2));
        assert_eq!(first.output, b"x");
        assert_eq!(backend.now(), 1);

        assert_eq!(backend.wait_any().unwrap().pid, slow);
        assert_eq!(backend.now(), 5);
        assert!(backend.wait_any().is_none());
        assert_eq!(backend.peak_in_flight(), 2);
        assert_eq!(backend.finish_order(), vec!["fast", "slow"]);
    }

    #[test]
    fn ties_finish_in_spawn_order() {
        let mut backend = FakeBackend::new();
        let a = backend.spawn(TaskId(0), &CommandSpec::new("a")).unwrap();
        let b = backend.spawn(TaskId(1), &CommandSpec::new("b")).unwrap();
        assert_eq!(backend.wait_any().unwrap().pid, a);
        assert_eq!(backend.wait_any().unwrap().pid, b);
    }

    #[test]
    fn scripted_spawn_failure() {
        let mut backend = FakeBackend::new().program("ghost", FakeProgram::fails_to_spawn());
        let err = backend
            .spawn(TaskId(0), &CommandSpec::new("ghost"))
            .unwrap_err();
        assert!(matches!(err, SpawnError::NotFound { .. }));
        assert_eq!(backend.in_flight(), 0);
        assert_eq!(backend.spawn_order(), vec!["ghost"]);
    }

    #[test]
    fn pids_are_unique_and_never_unspawned() {
        let mut backend = FakeBackend::new();
        let a = backend.spawn(TaskId(0), &CommandSpec::new("a")).unwrap();
        let b = backend.spawn(TaskId(1), &CommandSpec::new("a")).unwrap();
        assert_ne!(a, b);
        assert_ne!(a, ProcessId::UNSPAWNED);
    }
}
