//! Configuration module for echo-pool.
//!
//! The command line takes exactly four positional arguments (bind address,
//! port, workers per process, process count). Everything else is a tunable
//! with a fixed default.

use clap::Parser;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Command-line arguments for the echo server
#[derive(Parser, Debug)]
#[command(name = "echo-pool")]
#[command(author = "echo-pool authors")]
#[command(version = "0.1.0")]
#[command(about = "A multi-process echo server backed by cooperative worker pools", long_about = None)]
pub struct CliArgs {
    /// Address to bind to (`*`, `0` or `0.0.0.0` for any address)
    pub addr: String,

    /// Port to bind to
    pub port: u16,

    /// Number of workers in each process's pool
    pub pool_size: usize,

    /// Number of processes to fork
    pub processes: usize,
}

/// What the dispatcher does while no worker is idle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExhaustionPolicy {
    /// Stop accepting and sleep for `backoff`; pending clients stay queued
    /// in the kernel until a worker frees up.
    Backoff,
    /// Keep accepting and close every connection that arrives with nowhere
    /// to route it. Only selectable through `Config`; the CLI has no flags.
    #[cfg_attr(not(test), allow(dead_code))]
    Reject,
}

fn default_buffer_size() -> usize {
    16 * 1024 // 16 KB
}

fn default_io_wait() -> Duration {
    Duration::from_millis(1000)
}

fn default_backoff() -> Duration {
    Duration::from_millis(1000)
}

fn default_backlog() -> i32 {
    1024
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub addr: IpAddr,
    pub port: u16,
    pub pool_size: usize,
    pub processes: usize,
    /// Size of each worker's echo buffer
    pub buffer_size: usize,
    /// Upper bound on any single readiness wait
    pub io_wait: Duration,
    /// Dispatcher sleep interval while the pool is exhausted
    pub backoff: Duration,
    /// Listen backlog for the shared socket
    pub backlog: i32,
    pub exhaustion: ExhaustionPolicy,
}

impl Config {
    /// Load configuration from the command line.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_args(CliArgs::parse())
    }

    /// Resolve parsed arguments, filling tunables with their defaults.
    pub fn from_args(cli: CliArgs) -> Result<Self, ConfigError> {
        if cli.pool_size == 0 {
            return Err(ConfigError::InvalidValue("pool-size", cli.pool_size));
        }
        if cli.processes == 0 {
            return Err(ConfigError::InvalidValue("processes", cli.processes));
        }

        Ok(Config {
            addr: parse_bind_addr(&cli.addr)?,
            port: cli.port,
            pool_size: cli.pool_size,
            processes: cli.processes,
            buffer_size: default_buffer_size(),
            io_wait: default_io_wait(),
            backoff: default_backoff(),
            backlog: default_backlog(),
            exhaustion: ExhaustionPolicy::Backoff,
        })
    }

    /// Socket address the listener binds to.
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.addr, self.port)
    }
}

/// Parse a bind address, mapping the wildcard spellings to `0.0.0.0`.
pub fn parse_bind_addr(s: &str) -> Result<IpAddr, ConfigError> {
    match s.trim() {
        "" | "*" | "0" | "0.0.0.0" => Ok(IpAddr::V4(Ipv4Addr::UNSPECIFIED)),
        other => other
            .parse()
            .map_err(|_| ConfigError::InvalidAddress(s.to_string())),
    }
}

/// Configuration loading errors
#[derive(Debug, PartialEq, Eq)]
pub enum ConfigError {
    InvalidAddress(String),
    InvalidValue(&'static str, usize),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::InvalidAddress(addr) => {
                write!(f, "Invalid bind address '{}'", addr)
            }
            ConfigError::InvalidValue(name, value) => {
                write!(f, "Invalid {}: {} (must be at least 1)", name, value)
            }
        }
    }
}

impl std::error::Error for ConfigError {}
