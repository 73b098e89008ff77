//! Per-process cooperative scheduler.
//!
//! A current-thread tokio runtime driving a `LocalSet`: exactly one task runs
//! at a time and switches only at `.await` points, so tasks may share state
//! through `Rc`/`RefCell` without locks.

use std::convert::Infallible;
use std::future;
use std::io;
use tokio::runtime::{Builder, Runtime};
use tokio::task::LocalSet;

pub struct Scheduler {
    runtime: Runtime,
    local: LocalSet,
}

impl Scheduler {
    /// Build the scheduler. Must be called after any `fork`, since the
    /// reactor's epoll/kqueue instance is not shareable across processes.
    pub fn new() -> io::Result<Self> {
        let runtime = Builder::new_current_thread().enable_all().build()?;
        Ok(Self {
            runtime,
            local: LocalSet::new(),
        })
    }

    /// Run `bootstrap` inside the scheduler, then drive every spawned task
    /// forever.
    ///
    /// `bootstrap` runs with the reactor and local task set entered, so it may
    /// register sockets and spawn tasks. Its return value is kept alive for the
    /// life of the loop. Only a bootstrap error makes this return.
    pub fn run_event_loop<T>(
        &self,
        bootstrap: impl FnOnce() -> io::Result<T>,
    ) -> io::Result<Infallible> {
        self.local.block_on(&self.runtime, async move {
            let _state = bootstrap()?;
            Ok::<_, io::Error>(future::pending::<Infallible>().await)
        })
    }
}
