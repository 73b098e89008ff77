//! Cooperative runtime adapter.
//!
//! The server consumes its scheduler through this narrow surface:
//! - `Scheduler`: per-process event loop (current-thread tokio + `LocalSet`)
//! - `spawn` / `yield_now`: task creation and voluntary suspension
//! - `wait_io` / `accept_on`: bounded readiness waits on sockets
//! - `cooperative_listener` / `set_nonblocking`: hand sockets to the reactor
//!
//! Tasks spawned here are `!Send` and never leave the thread that created
//! them, so there is exactly one running task per process at any instant.

mod io;
mod scheduler;

pub use io::{accept_on, cooperative_listener, set_nonblocking, wait_io};
pub use scheduler::Scheduler;
pub use tokio::task::yield_now;

use std::future::Future;
use tokio::task::JoinHandle;

/// Create a task on the current process's scheduler.
///
/// Must be called from inside `Scheduler::run_event_loop` (or any `LocalSet`).
/// The task does not run until the caller next suspends.
pub fn spawn<F>(task: F) -> JoinHandle<F::Output>
where
    F: Future + 'static,
    F::Output: 'static,
{
    tokio::task::spawn_local(task)
}
