//! Process replication.
//!
//! The listening socket is created once in the parent and inherited by every
//! forked replica. Each replica runs its own scheduler, worker pool and
//! dispatcher; the kernel's accept queue spreads connections between them.

use crate::config::Config;
use crate::runtime::Scheduler;
use crate::server::Server;
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::TcpListener;
use std::process;
use tracing::{debug, error, info};

/// Create the shared listening socket: `SO_REUSEADDR`, bound, listening and
/// non-blocking.
pub fn bind_listener(config: &Config) -> io::Result<TcpListener> {
    let addr = config.socket_addr();
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;

    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(config.backlog)?;
    socket.set_nonblocking(true)?;

    Ok(socket.into())
}

/// Fork `count` child processes, each running `child(index)`.
///
/// A child process exits with the status `child` returns and never comes back
/// into this loop. A failed fork is logged and skipped, so fewer replicas than
/// requested may be started. Returns the pids of the children that were
/// started.
///
/// Call this before any threads exist in the process (in particular, before
/// any tokio runtime is built): only the forking thread survives in the child.
pub fn spawn_replicas<F>(count: usize, mut child: F) -> Vec<libc::pid_t>
where
    F: FnMut(usize) -> i32,
{
    let mut pids = Vec::with_capacity(count);

    for index in 0..count {
        // SAFETY: `fork` has no memory-safety preconditions of its own; the
        // child only runs `child` and then `_exit`s.
        match unsafe { libc::fork() } {
            -1 => {
                let err = io::Error::last_os_error();
                error!(replica = index, error = %err, "Failed to fork replica");
            }
            0 => {
                let status = child(index);
                // SAFETY: terminates the child without running the parent's
                // exit handlers; always sound.
                unsafe { libc::_exit(status) }
            }
            pid => {
                debug!(replica = index, pid, "Forked replica");
                pids.push(pid);
            }
        }
    }

    pids
}

/// Body of a replica process: build the scheduler, start the server on the
/// inherited listener and drive the event loop forever.
///
/// Returns only if the replica could not start, with the exit status to use.
pub fn serve(index: usize, config: &Config, listener: TcpListener) -> i32 {
    let pid = process::id();

    let result = Scheduler::new().and_then(|scheduler| {
        scheduler.run_event_loop(|| {
            info!(replica = index, pid, pool_size = config.pool_size, "Replica started");
            Server::new(config.clone(), listener).start()
        })
    });

    match result {
        Ok(never) => match never {},
        Err(e) => {
            error!(replica = index, pid, error = %e, "Replica failed");
            1
        }
    }
}
