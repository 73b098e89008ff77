//! Accept dispatcher.
//!
//! One task per process owns the listening socket and routes each accepted
//! connection to an idle worker. The dispatcher never queues connections:
//! pool size is the concurrency bound, and a connection accepted with no idle
//! worker is closed straight away.

use crate::config::ExhaustionPolicy;
use crate::pool::WorkerPool;
use crate::runtime;
use std::net::SocketAddr;
use std::rc::Rc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::time;
use tracing::{debug, info};

/// Dispatcher tunables, copied out of the process config.
#[derive(Debug, Clone, Copy)]
pub struct DispatchSettings {
    pub exhaustion: ExhaustionPolicy,
    /// Upper bound on one accept wait.
    pub io_wait: Duration,
    /// Pause while the pool is exhausted or after a failed accept.
    pub backoff: Duration,
}

/// Accept and dispatch connections forever.
pub async fn run(
    listener: TcpListener,
    pool: Rc<WorkerPool<TcpStream>>,
    settings: DispatchSettings,
) {
    info!(
        addr = ?listener.local_addr().ok(),
        pid = std::process::id(),
        workers = pool.size(),
        "Accept dispatcher started"
    );

    loop {
        let wait = if pool.has_idle() {
            settings.io_wait
        } else {
            let stats = pool.stats();
            debug!(
                busy = stats.busy(),
                served = stats.served,
                policy = ?settings.exhaustion,
                "Worker pool exhausted"
            );
            match settings.exhaustion {
                ExhaustionPolicy::Backoff => {
                    time::sleep(settings.backoff).await;
                    continue;
                }
                ExhaustionPolicy::Reject => settings.backoff,
            }
        };

        let (stream, peer) = match runtime::accept_on(&listener, wait).await {
            Ok(Some(accepted)) => accepted,
            Ok(None) => continue,
            Err(e) => {
                debug!(error = %e, "Accept failed");
                time::sleep(settings.backoff).await;
                continue;
            }
        };

        // Idleness is judged at the moment the accept completes.
        if !pool.has_idle() {
            reject(stream, peer);
            continue;
        }

        if let Err(e) = runtime::set_nonblocking(&stream) {
            debug!(peer = %peer, error = %e, "Failed to configure connection");
            continue;
        }

        match pool.dispatch(stream) {
            Ok(worker) => {
                debug!(worker, peer = %peer, "Dispatched connection");
                // Let the worker start serving before the next accept.
                runtime::yield_now().await;
            }
            Err(stream) => reject(stream, peer),
        }
    }
}

fn reject(stream: TcpStream, peer: SocketAddr) {
    debug!(peer = %peer, "No idle worker, closing connection");
    drop(stream);
}
