use std::net::SocketAddr;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;

use crate::error::{Result, ServerError};

/// Bytes buffered between the scheduler and the socket writer. At one byte
/// per tick this is several seconds of output.
const WRITE_BUFFER: usize = 64;

/// Outbound side of a terminal connection.
pub trait TerminalLink: Send {
    fn peer(&self) -> SocketAddr;

    /// Hand one byte to the terminal. An error means the terminal is gone.
    fn send(&self, byte: u8) -> Result<()>;

    /// Close the connection. Safe to call more than once.
    fn close(&self);
}

/// [`TerminalLink`] backed by a writer task that owns the socket's write half.
pub struct SocketLink {
    peer: SocketAddr,
    tx: mpsc::Sender<u8>,
    cancel: CancellationToken,
}

impl SocketLink {
    /// Spawn the writer task. Cancelling `cancel` stops the writer and
    /// shuts the write half down.
    pub fn spawn<W>(peer: SocketAddr, writer: W, cancel: CancellationToken) -> Self
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(WRITE_BUFFER);
        tokio::spawn(write_loop(writer, rx, cancel.clone()));
        Self { peer, tx, cancel }
    }
}

impl TerminalLink for SocketLink {
    fn peer(&self) -> SocketAddr {
        self.peer
    }

    fn send(&self, byte: u8) -> Result<()> {
        match self.tx.try_send(byte) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(ServerError::LinkBackedUp { address: self.peer }),
            Err(TrySendError::Closed(_)) => Err(ServerError::LinkClosed { address: self.peer }),
        }
    }

    fn close(&self) {
        self.cancel.cancel();
    }
}

async fn write_loop<W>(mut writer: W, mut rx: mpsc::Receiver<u8>, cancel: CancellationToken)
where
    W: AsyncWrite + Unpin,
{
    loop {
        let byte = tokio::select! {
            () = cancel.cancelled() => return,
            byte = rx.recv() => match byte {
                Some(byte) => byte,
                None => break,
            },
        };
        // A terminal that stops reading must not pin the socket after close().
        let buf = [byte];
        tokio::select! {
            () = cancel.cancelled() => return,
            written = writer.write_all(&buf) => {
                if let Err(error) = written {
                    tracing::debug!(error = %error, "terminal write failed");
                    return;
                }
            }
        }
    }
    let _ = writer.shutdown().await;
}

#[cfg(test)]
mod tests {
    use std::pin::Pin;
    use std::sync::Arc;
    use std::task::{Context, Poll};
    use std::time::Duration;

    use tokio::io::AsyncReadExt;

    use super::*;

    /// Writer whose peer never drains: every write stays pending.
    struct StalledWriter(Arc<()>);

    impl AsyncWrite for StalledWriter {
        fn poll_write(self: Pin<&mut Self>, _cx: &mut Context<'_>, _buf: &[u8]) -> Poll<std::io::Result<usize>> {
            Poll::Pending
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Pending
        }
    }

    fn peer() -> SocketAddr {
        "127.0.0.1:6400".parse().unwrap()
    }

    #[tokio::test]
    async fn bytes_reach_the_socket_in_order() {
        let (client, mut server) = tokio::io::duplex(16);
        let link = SocketLink::spawn(peer(), client, CancellationToken::new());

        for byte in b"hi!" {
            link.send(*byte).unwrap();
        }

        let mut buf = [0u8; 3];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hi!");
    }

    #[tokio::test]
    async fn close_ends_the_stream() {
        let (client, mut server) = tokio::io::duplex(16);
        let link = SocketLink::spawn(peer(), client, CancellationToken::new());
        link.close();

        let mut buf = Vec::new();
        let n = server.read_to_end(&mut buf).await.unwrap();
        assert_eq!(n, 0);

        tokio::task::yield_now().await;
        assert!(matches!(link.send(b'x'), Err(ServerError::LinkClosed { .. })));
    }

    #[tokio::test]
    async fn dead_socket_fails_sends() {
        let (client, server) = tokio::io::duplex(16);
        drop(server);
        let link = SocketLink::spawn(peer(), client, CancellationToken::new());

        link.send(b'a').unwrap();
        // Let the writer hit the broken pipe and exit.
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(link.send(b'b').is_err());
    }

    #[tokio::test]
    async fn close_releases_a_stalled_writer() {
        let alive = Arc::new(());
        let link = SocketLink::spawn(peer(), StalledWriter(Arc::clone(&alive)), CancellationToken::new());

        link.send(b'a').unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(Arc::strong_count(&alive), 2, "writer should be parked on the write");

        link.close();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(Arc::strong_count(&alive), 1);
        assert!(matches!(link.send(b'b'), Err(ServerError::LinkClosed { .. })));
    }
}
