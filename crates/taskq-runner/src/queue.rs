//! The task queue: a FIFO backlog of commands run as child processes with a
//! bounded number in flight.
//!
//! [`TaskQueue::run`] blocks the calling thread. It starts tasks from the head
//! of the backlog while slots are free, then waits on the backend for
//! whichever child exits first, reports it to the observer and refills the
//! freed slot. An observer answering [`TaskFinishedResponse::Stop`] prevents
//! further starts; children already running are left to finish and are still
//! reported.

use std::collections::{HashMap, VecDeque};

use tracing::{debug, error, info, warn};

use crate::backend::{Completion, ProcessBackend, TokioBackend, detected_parallelism};
use crate::task::{CommandSpec, ExitStatus, ProcessId, Task, TaskId};

/// How the queue proceeds after a task finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TaskFinishedResponse {
    /// Keep starting tasks from the backlog.
    #[default]
    Continue,
    /// Start nothing more; let running tasks finish.
    Stop,
}

/// Lifecycle of a queue run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    NotStarted,
    Running,
    /// A stop was requested; active tasks are draining.
    Stopping,
    Done,
}

/// Receives task lifecycle notifications on the thread that called `run`.
///
/// For every task that is started, `task_started` is called exactly once and
/// strictly before its single `task_finished` call.
pub trait TaskObserver<C> {
    fn task_started(&mut self, pid: ProcessId, context: &C) {
        let _ = (pid, context);
    }

    fn task_finished(
        &mut self,
        pid: ProcessId,
        status: ExitStatus,
        output: &[u8],
        context: &C,
    ) -> TaskFinishedResponse {
        let _ = (pid, status, output, context);
        TaskFinishedResponse::Continue
    }
}

/// Observer that ignores every notification.
impl<C> TaskObserver<C> for () {}

/// Adapts a pair of closures to [`TaskObserver`].
struct Callbacks<S, F> {
    on_started: S,
    on_finished: F,
}

impl<C, S, F> TaskObserver<C> for Callbacks<S, F>
where
    S: FnMut(ProcessId, &C),
    F: FnMut(ProcessId, ExitStatus, &[u8], &C) -> TaskFinishedResponse,
{
    fn task_started(&mut self, pid: ProcessId, context: &C) {
        (self.on_started)(pid, context);
    }

    fn task_finished(
        &mut self,
        pid: ProcessId,
        status: ExitStatus,
        output: &[u8],
        context: &C,
    ) -> TaskFinishedResponse {
        (self.on_finished)(pid, status, output, context)
    }
}

/// Counters for the end-of-run log line.
#[derive(Debug, Default)]
struct RunStats {
    started: usize,
    succeeded: usize,
    failed: usize,
}

/// Bounded-parallelism runner for a backlog of external commands.
///
/// `C` is an arbitrary caller context stored with each task and handed back
/// untouched to the observer.
pub struct TaskQueue<C = (), B = TokioBackend> {
    backend: B,
    /// Limit as requested by the caller; 0 means auto-detect.
    requested_parallelism: usize,
    /// Limit used by the most recent run; 0 before the first run.
    resolved_parallelism: usize,
    backlog: VecDeque<Task<C>>,
    /// Running tasks, keyed by the id handed to the backend at spawn.
    active: HashMap<TaskId, Task<C>>,
    next_task_id: u64,
    finished: Vec<Task<C>>,
    state: RunState,
}

impl<C> TaskQueue<C, TokioBackend> {
    /// Create a queue that runs tasks as real processes.
    ///
    /// `parallelism` is the maximum number of tasks running at once; 0 picks
    /// the detected hardware concurrency when the queue runs.
    pub fn new(parallelism: usize) -> std::io::Result<Self> {
        Ok(Self::with_backend(parallelism, TokioBackend::new()?))
    }
}

impl<C, B: ProcessBackend> TaskQueue<C, B> {
    /// Create a queue on top of an arbitrary backend.
    pub fn with_backend(parallelism: usize, backend: B) -> Self {
        Self {
            backend,
            requested_parallelism: parallelism,
            resolved_parallelism: 0,
            backlog: VecDeque::new(),
            active: HashMap::new(),
            next_task_id: 0,
            finished: Vec::new(),
            state: RunState::NotStarted,
        }
    }

    /// Append a task to the backlog. Nothing is spawned until [`run`](Self::run).
    pub fn enqueue(&mut self, command: CommandSpec, context: C) {
        self.backlog.push_back(Task::new(command, context));
    }

    /// The concurrency limit that will be, or was, used.
    ///
    /// A non-zero request is returned as-is; otherwise the value resolved by
    /// the latest run, or 0 if the queue has not run yet. Always 1 when the
    /// backend cannot run processes in parallel.
    pub fn resolved_parallelism(&self) -> usize {
        if !self.backend.capabilities().parallel_execution {
            1
        } else if self.requested_parallelism > 0 {
            self.requested_parallelism
        } else {
            self.resolved_parallelism
        }
    }

    pub const fn requested_parallelism(&self) -> usize {
        self.requested_parallelism
    }

    pub const fn state(&self) -> RunState {
        self.state
    }

    /// Number of tasks waiting in the backlog.
    pub fn pending_len(&self) -> usize {
        self.backlog.len()
    }

    /// Number of tasks currently running.
    pub fn active_len(&self) -> usize {
        self.active.len()
    }

    pub const fn backend(&self) -> &B {
        &self.backend
    }

    /// Remove and return every finished task, in completion order.
    pub fn take_finished(&mut self) -> Vec<Task<C>> {
        std::mem::take(&mut self.finished)
    }

    /// Run the backlog, reporting through two closures.
    ///
    /// Returns `true` if any task failed or could not be spawned, or if the
    /// run was stopped with tasks still in the backlog.
    pub fn run<S, F>(&mut self, on_started: S, on_finished: F) -> bool
    where
        S: FnMut(ProcessId, &C),
        F: FnMut(ProcessId, ExitStatus, &[u8], &C) -> TaskFinishedResponse,
    {
        self.run_with(&mut Callbacks {
            on_started,
            on_finished,
        })
    }

    /// Run the backlog without notifications.
    pub fn run_silent(&mut self) -> bool {
        self.run_with(&mut ())
    }

    /// Run the backlog, reporting to `observer`. See [`run`](Self::run).
    pub fn run_with<O: TaskObserver<C>>(&mut self, observer: &mut O) -> bool {
        let limit = self.resolve_parallelism();
        self.resolved_parallelism = limit;

        if self.backlog.is_empty() {
            debug!("Backlog empty, nothing to run");
            self.state = RunState::Done;
            return false;
        }

        info!(
            parallelism = limit,
            backlog = self.backlog.len(),
            "Starting task queue run"
        );
        self.state = RunState::Running;
        let mut stats = RunStats::default();

        loop {
            while self.state == RunState::Running && self.active.len() < limit {
                let Some(task) = self.backlog.pop_front() else {
                    break;
                };
                stats.started += 1;
                self.start(task, observer, &mut stats);
            }

            if self.active.is_empty() {
                break;
            }

            let in_flight = self.backend.in_flight();
            if in_flight != self.active.len() {
                warn!(
                    in_flight,
                    active = self.active.len(),
                    "Backend in-flight count disagrees with active tasks"
                );
            }

            match self.backend.wait_any() {
                Some(completion) => self.finish(completion, observer, &mut stats),
                None => {
                    error!(
                        active = self.active.len(),
                        "Backend has nothing in flight but tasks are still active"
                    );
                    self.abandon_active(observer, &mut stats);
                }
            }
        }

        let stopped_early = self.state == RunState::Stopping && !self.backlog.is_empty();
        info!(
            started = stats.started,
            succeeded = stats.succeeded,
            failed = stats.failed,
            not_started = self.backlog.len(),
            stopped = self.state == RunState::Stopping,
            "Task queue run finished"
        );
        self.state = RunState::Done;

        stats.failed > 0 || stopped_early
    }

    fn resolve_parallelism(&self) -> usize {
        if !self.backend.capabilities().parallel_execution {
            if self.requested_parallelism > 1 {
                debug!(
                    requested = self.requested_parallelism,
                    "Parallel execution unsupported, running one task at a time"
                );
            }
            1
        } else if self.requested_parallelism > 0 {
            self.requested_parallelism
        } else {
            detected_parallelism()
        }
    }

    fn start<O: TaskObserver<C>>(
        &mut self,
        mut task: Task<C>,
        observer: &mut O,
        stats: &mut RunStats,
    ) {
        let id = TaskId(self.next_task_id);
        self.next_task_id += 1;

        match self.backend.spawn(id, task.command()) {
            Ok(pid) => {
                debug!(
                    task = %id,
                    pid = %pid,
                    program = %task.command().program.display(),
                    active = self.active.len() + 1,
                    "Task started"
                );
                task.mark_started(pid);
                observer.task_started(pid, task.context());
                self.active.insert(id, task);
            }
            Err(e) => {
                warn!(
                    program = %task.command().program.display(),
                    error = %e,
                    "Task failed to spawn"
                );
                let pid = ProcessId::UNSPAWNED;
                task.mark_started(pid);
                observer.task_started(pid, task.context());
                self.complete(
                    task,
                    Completion {
                        task: id,
                        pid,
                        status: ExitStatus::SpawnFailed,
                        output: Vec::new(),
                    },
                    observer,
                    stats,
                );
            }
        }
    }

    fn finish<O: TaskObserver<C>>(
        &mut self,
        mut completion: Completion,
        observer: &mut O,
        stats: &mut RunStats,
    ) {
        let Some(task) = self.active.remove(&completion.task) else {
            error!(
                task = %completion.task,
                pid = %completion.pid,
                "Backend reported a task this queue is not running"
            );
            return;
        };
        if !self.backend.capabilities().output_capture {
            completion.output.clear();
        }
        debug!(pid = %completion.pid, status = %completion.status, "Task finished");
        self.complete(task, completion, observer, stats);
    }

    /// Record the outcome, notify the observer and apply its response.
    fn complete<O: TaskObserver<C>>(
        &mut self,
        mut task: Task<C>,
        completion: Completion,
        observer: &mut O,
        stats: &mut RunStats,
    ) {
        let Completion {
            pid,
            status,
            output,
            ..
        } = completion;
        if status.is_success() {
            stats.succeeded += 1;
        } else {
            stats.failed += 1;
        }

        task.mark_finished(status, output);
        let response =
            observer.task_finished(pid, status, task.output().unwrap_or_default(), task.context());
        self.finished.push(task);

        if response == TaskFinishedResponse::Stop && self.state == RunState::Running {
            info!(
                pid = %pid,
                pending = self.backlog.len(),
                active = self.active.len(),
                "Stop requested, draining active tasks"
            );
            self.state = RunState::Stopping;
        }
    }

    /// Report every active task as lost, in start order, so each still gets
    /// its finish call.
    fn abandon_active<O: TaskObserver<C>>(&mut self, observer: &mut O, stats: &mut RunStats) {
        let mut lost: Vec<_> = self.active.drain().collect();
        lost.sort_by_key(|(id, _)| *id);
        for (id, task) in lost {
            let pid = task.pid().unwrap_or(ProcessId::UNSPAWNED);
            self.complete(
                task,
                Completion {
                    task: id,
                    pid,
                    status: ExitStatus::WaitFailed,
                    output: Vec::new(),
                },
                observer,
                stats,
            );
        }
    }
}
