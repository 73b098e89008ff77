//! Cooperative socket operations.
//!
//! Every wait here is bounded: a timeout yields `None` rather than an error so
//! callers can re-check their own conditions and loop.

use socket2::SockRef;
use std::io;
use std::net::SocketAddr;
use std::os::fd::AsFd;
use std::time::Duration;
use tokio::io::{Interest, Ready};
use tokio::net::{TcpListener, TcpStream};
use tokio::time;

/// Suspend until `stream` is ready for `interest` or `wait` elapses.
///
/// Readiness includes hang-up and error conditions, which surface as
/// readable so the following read observes them.
pub async fn wait_io(
    stream: &TcpStream,
    interest: Interest,
    wait: Duration,
) -> io::Result<Option<Ready>> {
    match time::timeout(wait, stream.ready(interest)).await {
        Ok(ready) => ready.map(Some),
        Err(_elapsed) => Ok(None),
    }
}

/// Accept one connection, suspending at most `wait` for one to arrive.
pub async fn accept_on(
    listener: &TcpListener,
    wait: Duration,
) -> io::Result<Option<(TcpStream, SocketAddr)>> {
    match time::timeout(wait, listener.accept()).await {
        Ok(accepted) => accepted.map(Some),
        Err(_elapsed) => Ok(None),
    }
}

/// Register a blocking-style std listener with the current reactor so that
/// accepts on it suspend the task instead of the process.
pub fn cooperative_listener(listener: std::net::TcpListener) -> io::Result<TcpListener> {
    listener.set_nonblocking(true)?;
    TcpListener::from_std(listener)
}

pub fn set_nonblocking<S: AsFd>(socket: &S) -> io::Result<()> {
    SockRef::from(socket).set_nonblocking(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;
    use tokio_test::assert_ok;

    async fn listener() -> TcpListener {
        let std = assert_ok!(std::net::TcpListener::bind("127.0.0.1:0"));
        assert_ok!(cooperative_listener(std))
    }

    #[tokio::test]
    async fn test_accept_times_out_without_clients() {
        let listener = listener().await;
        let accepted = assert_ok!(accept_on(&listener, Duration::from_millis(20)).await);
        assert!(accepted.is_none());
    }

    #[tokio::test]
    async fn test_accept_and_wait_readable() {
        let listener = listener().await;
        let addr = listener.local_addr().unwrap();
        let mut client = assert_ok!(TcpStream::connect(addr).await);

        let accepted = assert_ok!(accept_on(&listener, Duration::from_secs(5)).await);
        let (server, _peer) = accepted.expect("client connected");
        assert_ok!(set_nonblocking(&server));

        // Nothing sent yet: the wait times out.
        let idle = assert_ok!(wait_io(&server, Interest::READABLE, Duration::from_millis(20)).await);
        assert!(idle.is_none());

        assert_ok!(client.write_all(b"x").await);
        let ready = assert_ok!(wait_io(&server, Interest::READABLE, Duration::from_secs(5)).await);
        assert!(ready.expect("data sent").is_readable());
    }
}
