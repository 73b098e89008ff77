//! Per-process echo server.
//!
//! Owns the inherited listening socket and the worker pool, and bootstraps
//! the worker tasks and the accept dispatcher on the current scheduler.

use crate::config::Config;
use crate::dispatcher::{self, DispatchSettings};
use crate::pool::{worker, WorkerPool};
use crate::runtime;
use std::io;
use std::rc::Rc;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Server instance
pub struct Server {
    config: Config,
    listener: std::net::TcpListener,
}

/// Tasks started by `Server::start`. Dropping the handle stops them.
pub struct ServerHandle {
    pool: Rc<WorkerPool<TcpStream>>,
    tasks: Vec<JoinHandle<()>>,
}

impl Server {
    /// Create a server around an already bound and listening socket.
    pub fn new(config: Config, listener: std::net::TcpListener) -> Self {
        Server { config, listener }
    }

    /// Spawn the worker pool and the accept dispatcher.
    ///
    /// Must run inside the scheduler (`Scheduler::run_event_loop` or a
    /// `LocalSet`). Workers are spawned first so they are parked before the
    /// dispatcher looks for one.
    pub fn start(self) -> io::Result<ServerHandle> {
        let listener = runtime::cooperative_listener(self.listener)?;
        let pool = Rc::new(WorkerPool::new(self.config.pool_size));
        let mut tasks = Vec::with_capacity(pool.size() + 1);

        for id in pool.ids() {
            tasks.push(runtime::spawn(worker::run(
                Rc::clone(&pool),
                id,
                self.config.buffer_size,
                self.config.io_wait,
            )));
        }

        let settings = DispatchSettings {
            exhaustion: self.config.exhaustion,
            io_wait: self.config.io_wait,
            backoff: self.config.backoff,
        };
        tasks.push(runtime::spawn(dispatcher::run(
            listener,
            Rc::clone(&pool),
            settings,
        )));

        info!(
            pool_size = pool.size(),
            buffer_size = self.config.buffer_size,
            exhaustion = ?self.config.exhaustion,
            "Worker pool started"
        );

        Ok(ServerHandle { pool, tasks })
    }
}

impl ServerHandle {
    #[cfg(test)]
    pub fn pool(&self) -> &WorkerPool<TcpStream> {
        &self.pool
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        debug!(stats = ?self.pool.stats(), "Stopping worker pool");
        for task in &self.tasks {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExhaustionPolicy;
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};
    use std::time::Duration;
    use socket2::SockRef;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::task::LocalSet;
    use tokio::time::{sleep, timeout};
    use tokio_test::assert_ok;

    const DEADLINE: Duration = Duration::from_secs(5);

    fn test_config(pool_size: usize, exhaustion: ExhaustionPolicy) -> Config {
        Config {
            addr: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 0,
            pool_size,
            processes: 1,
            buffer_size: 1024,
            io_wait: Duration::from_millis(20),
            backoff: Duration::from_millis(10),
            backlog: 128,
            exhaustion,
        }
    }

    fn start(pool_size: usize, exhaustion: ExhaustionPolicy) -> (SocketAddr, ServerHandle) {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = Server::new(test_config(pool_size, exhaustion), listener)
            .start()
            .unwrap();
        (addr, handle)
    }

    async fn ping(client: &mut TcpStream) {
        let mut reply = [0u8; 4];
        assert_ok!(client.write_all(b"ping").await);
        assert_ok!(timeout(DEADLINE, client.read_exact(&mut reply)).await).unwrap();
        assert_eq!(&reply, b"ping");
    }

    async fn assert_closed_without_data(client: &mut TcpStream) {
        let mut buf = [0u8; 16];
        let n = assert_ok!(timeout(DEADLINE, client.read(&mut buf)).await);
        assert_eq!(assert_ok!(n), 0);
    }

    async fn wait_for_idle(handle: &ServerHandle, idle: usize) {
        assert_ok!(
            timeout(DEADLINE, async {
                while handle.pool().idle_len() != idle {
                    sleep(Duration::from_millis(5)).await;
                }
            })
            .await
        );
    }

    fn assert_balanced(handle: &ServerHandle) {
        let stats = handle.pool().stats();
        assert_eq!(stats.idle + stats.busy(), stats.size, "{stats:?}");
    }

    #[tokio::test]
    async fn test_echo_round_trip() {
        let local = LocalSet::new();
        local
            .run_until(async {
                let (addr, handle) = start(2, ExhaustionPolicy::Backoff);
                let mut client = assert_ok!(TcpStream::connect(addr).await);

                ping(&mut client).await;
                assert_balanced(&handle);
                assert_eq!(handle.pool().stats().serving, 1);
            })
            .await;
    }

    #[tokio::test]
    async fn test_large_payload_echoed_in_order() {
        let local = LocalSet::new();
        local
            .run_until(async {
                let (addr, _handle) = start(1, ExhaustionPolicy::Backoff);
                let client = assert_ok!(TcpStream::connect(addr).await);
                let (mut rd, mut wr) = client.into_split();

                let payload: Vec<u8> = (0..256 * 1024).map(|i| (i * 7 % 256) as u8).collect();
                let mut received = vec![0u8; payload.len()];
                let send = async {
                    for chunk in payload.chunks(3000) {
                        wr.write_all(chunk).await?;
                    }
                    Ok::<_, std::io::Error>(())
                };
                let (sent, got) = tokio::join!(send, timeout(DEADLINE, rd.read_exact(&mut received)));
                assert_ok!(sent);
                assert_ok!(assert_ok!(got));
                assert_eq!(received, payload);
            })
            .await;
    }

    #[tokio::test]
    async fn test_sequential_connections_reuse_warm_worker() {
        let local = LocalSet::new();
        local
            .run_until(async {
                let (addr, handle) = start(2, ExhaustionPolicy::Backoff);

                for _ in 0..3 {
                    let mut client = assert_ok!(TcpStream::connect(addr).await);
                    ping(&mut client).await;
                    drop(client);
                    wait_for_idle(&handle, 2).await;
                    assert_balanced(&handle);
                }

                // The most recently parked worker is always picked first.
                assert_eq!(handle.pool().served(1), Some(3));
                assert_eq!(handle.pool().served(0), Some(0));
                assert_eq!(handle.pool().stats().served, 3);
            })
            .await;
    }

    #[tokio::test]
    async fn test_exhausted_pool_rejects_then_recovers() {
        let local = LocalSet::new();
        local
            .run_until(async {
                let (addr, handle) = start(2, ExhaustionPolicy::Reject);

                let mut first = assert_ok!(TcpStream::connect(addr).await);
                let mut second = assert_ok!(TcpStream::connect(addr).await);
                ping(&mut first).await;
                ping(&mut second).await;
                assert_eq!(handle.pool().idle_len(), 0);
                assert_balanced(&handle);

                let mut third = assert_ok!(TcpStream::connect(addr).await);
                assert_closed_without_data(&mut third).await;

                drop(first);
                wait_for_idle(&handle, 1).await;

                let mut retry = assert_ok!(TcpStream::connect(addr).await);
                ping(&mut retry).await;
                ping(&mut second).await;
                assert_balanced(&handle);
            })
            .await;
    }

    #[tokio::test]
    async fn test_exhausted_pool_backs_off_until_worker_frees() {
        let local = LocalSet::new();
        local
            .run_until(async {
                let (addr, handle) = start(1, ExhaustionPolicy::Backoff);

                let mut first = assert_ok!(TcpStream::connect(addr).await);
                ping(&mut first).await;

                let mut waiting = assert_ok!(TcpStream::connect(addr).await);
                assert_ok!(waiting.write_all(b"ping").await);
                let mut reply = [0u8; 4];
                assert!(
                    timeout(Duration::from_millis(100), waiting.read_exact(&mut reply))
                        .await
                        .is_err(),
                    "served while the only worker was busy"
                );

                drop(first);
                assert_ok!(timeout(DEADLINE, waiting.read_exact(&mut reply)).await).unwrap();
                assert_eq!(&reply, b"ping");
                assert_eq!(handle.pool().stats().serving, 1);
            })
            .await;
    }

    #[tokio::test]
    async fn test_reset_mid_echo_recycles_worker() {
        let local = LocalSet::new();
        local
            .run_until(async {
                let (addr, handle) = start(1, ExhaustionPolicy::Backoff);
                let mut flooder = assert_ok!(TcpStream::connect(addr).await);

                // Never read: both directions fill up and the worker blocks
                // writing back.
                let flood = vec![0x5au8; 8 * 1024 * 1024];
                let _ = timeout(Duration::from_millis(300), flooder.write_all(&flood)).await;
                assert_eq!(handle.pool().stats().serving, 1);

                assert_ok!(SockRef::from(&flooder).set_linger(Some(Duration::ZERO)));
                drop(flooder);

                wait_for_idle(&handle, 1).await;
                assert_eq!(handle.pool().served(0), Some(1));
                assert_balanced(&handle);

                let mut next = assert_ok!(TcpStream::connect(addr).await);
                ping(&mut next).await;
            })
            .await;
    }
}
