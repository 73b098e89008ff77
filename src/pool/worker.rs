//! Worker task and its echo loop.

use crate::pool::WorkerPool;
use crate::runtime;
use std::fmt;
use std::io::{self, ErrorKind};
use std::rc::Rc;
use std::time::Duration;
use tokio::io::Interest;
use tokio::net::TcpStream;
use tracing::debug;

/// Why an echo session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EchoEnd {
    /// Read returned zero bytes.
    PeerClosed,
    ReadFailed(ErrorKind),
    WriteFailed(ErrorKind),
}

impl fmt::Display for EchoEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EchoEnd::PeerClosed => write!(f, "peer closed"),
            EchoEnd::ReadFailed(kind) => write!(f, "read failed: {kind}"),
            EchoEnd::WriteFailed(kind) => write!(f, "write failed: {kind}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EchoSummary {
    /// Bytes read and written back in full.
    pub bytes: u64,
    pub end: EchoEnd,
}

/// Run worker `id` forever: wait for a connection, echo it, park again.
///
/// The echo buffer is allocated once here and reused for every connection.
pub async fn run(
    pool: Rc<WorkerPool<TcpStream>>,
    id: usize,
    buffer_size: usize,
    io_wait: Duration,
) {
    let mut buf = vec![0u8; buffer_size].into_boxed_slice();

    loop {
        let mut stream = pool.wait_assignment(id).await;
        let summary = echo(&mut stream, &mut buf, io_wait).await;
        drop(stream);
        pool.release(id);

        debug!(
            worker = id,
            bytes = summary.bytes,
            end = %summary.end,
            "Connection closed"
        );
    }
}

/// Echo every byte read from `stream` back to it until the peer closes or an
/// I/O error occurs.
///
/// Each read is at most `buf.len()` bytes and is written back in full before
/// the next read. Readiness waits in both directions are capped at `io_wait`;
/// an elapsed wait just waits again.
pub async fn echo(stream: &mut TcpStream, buf: &mut [u8], io_wait: Duration) -> EchoSummary {
    let mut bytes = 0u64;

    let end = loop {
        match runtime::wait_io(stream, Interest::READABLE, io_wait).await {
            Ok(Some(_)) => {}
            Ok(None) => continue,
            Err(e) => break EchoEnd::ReadFailed(e.kind()),
        }

        let n = match stream.try_read(buf) {
            Ok(0) => break EchoEnd::PeerClosed,
            Ok(n) => n,
            Err(ref e) if is_retryable(e) => continue,
            Err(e) => break EchoEnd::ReadFailed(e.kind()),
        };

        if let Err(e) = write_back(stream, &buf[..n], io_wait).await {
            break EchoEnd::WriteFailed(e.kind());
        }
        bytes += n as u64;
    };

    EchoSummary { bytes, end }
}

/// Write all of `data`, waiting for writability at most `io_wait` at a time.
async fn write_back(stream: &TcpStream, mut data: &[u8], io_wait: Duration) -> io::Result<()> {
    while !data.is_empty() {
        if runtime::wait_io(stream, Interest::WRITABLE, io_wait)
            .await?
            .is_none()
        {
            continue;
        }

        match stream.try_write(data) {
            Ok(0) => return Err(ErrorKind::WriteZero.into()),
            Ok(n) => data = &data[n..],
            Err(ref e) if is_retryable(e) => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

fn is_retryable(e: &io::Error) -> bool {
    matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted)
}
