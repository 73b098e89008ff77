//! echo-pool: a multi-process echo server
//!
//! Every byte a client sends is written back verbatim. Each process runs a
//! fixed pool of cooperative worker tasks fed by a single accept dispatcher:
//! - Workers serve one connection at a time, then park on a LIFO idle stack
//! - No per-connection allocation; each worker reuses one fixed buffer
//! - When no worker is idle, connections are not accepted (or are closed)
//! - Replica processes share one listening socket inherited across fork
//!
//! Usage: `echo-pool <addr> <port> <pool-size> <processes>`

mod config;
mod dispatcher;
mod pool;
mod replica;
mod runtime;
mod server;

use config::Config;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        addr = %config.socket_addr(),
        pool_size = config.pool_size,
        processes = config.processes,
        buffer_size = config.buffer_size,
        "Starting echo-pool server"
    );

    let listener = replica::bind_listener(&config)?;
    info!(addr = %listener.local_addr()?, backlog = config.backlog, "Listening");

    let pids = replica::spawn_replicas(config.processes, |index| match listener.try_clone() {
        Ok(listener) => replica::serve(index, &config, listener),
        Err(e) => {
            error!(replica = index, error = %e, "Failed to clone listener");
            1
        }
    });

    info!(
        spawned = pids.len(),
        requested = config.processes,
        pids = ?pids,
        "Replicas spawned"
    );

    Ok(())
}
