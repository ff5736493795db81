//! `taskq` runner
//!
//! Runs a FIFO backlog of external commands as child processes, keeping at
//! most a fixed number alive at once:
//! - [`TaskQueue`]: backlog, active set, start/wait/notify loop, stop protocol
//! - [`TaskObserver`]: start/finish notifications and the stop signal
//! - [`ProcessBackend`]: spawning and multiplexed waiting, with a platform
//!   implementation ([`TokioBackend`]) and a scripted one for tests
//!
//! ```no_run
//! use taskq_runner::{CommandSpec, TaskFinishedResponse, TaskQueue};
//!
//! let mut queue = TaskQueue::new(2)?;
//! for file in ["a.c", "b.c", "c.c"] {
//!     queue.enqueue(CommandSpec::new("cc").args(["-c", file]), file);
//! }
//! let failed = queue.run(
//!     |pid, file| println!("[{pid}] compiling {file}"),
//!     |_, status, output, file| {
//!         print!("{}", String::from_utf8_lossy(output));
//!         if status.is_success() {
//!             TaskFinishedResponse::Continue
//!         } else {
//!             eprintln!("{file}: {status}");
//!             TaskFinishedResponse::Stop
//!         }
//!     },
//! );
//! # Ok::<(), std::io::Error>(())
//! ```

pub mod backend;
pub mod queue;
pub mod task;

pub use backend::{
    Capabilities, Completion, ProcessBackend, SpawnError, TokioBackend, detected_parallelism,
    supports_output_capture, supports_parallel_execution,
};
pub use queue::{RunState, TaskFinishedResponse, TaskObserver, TaskQueue};
pub use task::{CommandSpec, ExitStatus, ProcessId, Task, TaskId};
