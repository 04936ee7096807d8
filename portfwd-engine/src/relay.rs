//! Bidirectional byte relay between two duplex streams
//!
//! Each direction copies in its own loop. Whichever direction finishes first
//! (EOF, I/O error, or an external close) fires the shared close token, which
//! unblocks the partner at its next read or write. [`relay`] only returns once
//! both loops have stopped, and it owns both streams, so both are closed when
//! it returns.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use crate::config::DEFAULT_RELAY_BUFFER_SIZE;
use crate::errors::RelayError;

/// Relay direction, named from the local client's point of view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// client → target
    Inbound,
    /// target → client
    Outbound,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Inbound => write!(f, "inbound"),
            Direction::Outbound => write!(f, "outbound"),
        }
    }
}

/// Why a direction stopped copying
#[derive(Debug)]
pub enum DirectionEnd {
    /// Source reached end of stream
    Eof,
    /// The partner direction ended or the connection was closed externally
    Closed,
    Failed(RelayError),
}

#[derive(Debug)]
pub struct DirectionReport {
    pub bytes: u64,
    pub end: DirectionEnd,
}

/// Outcome of a finished relay
#[derive(Debug)]
pub struct RelayReport {
    pub inbound: DirectionReport,
    pub outbound: DirectionReport,
}

impl RelayReport {
    /// Errors from either direction, inbound first
    pub fn errors(&self) -> impl Iterator<Item = &RelayError> {
        [&self.inbound.end, &self.outbound.end]
            .into_iter()
            .filter_map(|end| match end {
                DirectionEnd::Failed(e) => Some(e),
                _ => None,
            })
    }
}

/// Copy `client` ⇄ `target` until either side ends or `close` fires
///
/// `close` is the connection's handle for external teardown: cancelling it
/// stops both directions. The relay also cancels it itself when the first
/// direction ends.
pub async fn relay<A, B>(
    client: A,
    target: B,
    buffer_size: usize,
    close: CancellationToken,
) -> RelayReport
where
    A: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    let buffer_size = if buffer_size == 0 {
        DEFAULT_RELAY_BUFFER_SIZE
    } else {
        buffer_size
    };

    let (client_read, client_write) = tokio::io::split(client);
    let (target_read, target_write) = tokio::io::split(target);

    let inbound = copy_direction(
        client_read,
        target_write,
        buffer_size,
        Direction::Inbound,
        close.clone(),
    );
    let outbound = copy_direction(
        target_read,
        client_write,
        buffer_size,
        Direction::Outbound,
        close,
    );

    let (inbound, outbound) = futures_util::future::join(inbound, outbound).await;
    RelayReport { inbound, outbound }
}

async fn copy_direction<R, W>(
    mut reader: R,
    mut writer: W,
    buffer_size: usize,
    direction: Direction,
    close: CancellationToken,
) -> DirectionReport
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    // Ending this direction, for any reason, closes the partner
    let _close_partner = close.clone().drop_guard();

    let mut buf = vec![0u8; buffer_size];
    let mut bytes = 0u64;

    let end = loop {
        let n = tokio::select! {
            _ = close.cancelled() => break DirectionEnd::Closed,
            read = reader.read(&mut buf) => match read {
                Ok(0) => break DirectionEnd::Eof,
                Ok(n) => n,
                Err(source) => break DirectionEnd::Failed(RelayError { direction, bytes, source }),
            },
        };

        // write_all retries partial writes until the whole chunk is out
        tokio::select! {
            _ = close.cancelled() => break DirectionEnd::Closed,
            written = write_chunk(&mut writer, &buf[..n]) => {
                if let Err(source) = written {
                    break DirectionEnd::Failed(RelayError { direction, bytes, source });
                }
            }
        }
        bytes += n as u64;
    };

    tracing::trace!(%direction, bytes, ?end, "Relay direction finished");
    DirectionReport { bytes, end }
}

async fn write_chunk<W: AsyncWrite + Unpin>(writer: &mut W, chunk: &[u8]) -> std::io::Result<()> {
    writer.write_all(chunk).await?;
    writer.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_bytes_cross_in_order_both_ways() {
        let (client, mut client_peer) = tokio::io::duplex(64);
        let (target, mut target_peer) = tokio::io::duplex(64);
        let close = CancellationToken::new();

        let relay = tokio::spawn(relay(client, target, 16, close.clone()));

        // Larger than both the relay buffer and the duplex capacity
        let payload: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        let expected = payload.clone();
        let writer = tokio::spawn(async move {
            client_peer.write_all(&payload).await.unwrap();
            client_peer
        });

        let mut received = vec![0u8; expected.len()];
        target_peer.read_exact(&mut received).await.unwrap();
        assert_eq!(received, expected);

        let mut client_peer = writer.await.unwrap();
        target_peer.write_all(b"OK").await.unwrap();
        let mut reply = [0u8; 2];
        client_peer.read_exact(&mut reply).await.unwrap();
        assert_eq!(&reply, b"OK");

        drop(client_peer);
        let report = tokio::time::timeout(Duration::from_secs(1), relay)
            .await
            .expect("relay should finish after client EOF")
            .unwrap();

        assert_eq!(report.inbound.bytes, 10_000);
        assert_eq!(report.outbound.bytes, 2);
        assert!(matches!(report.inbound.end, DirectionEnd::Eof));
        assert!(matches!(report.outbound.end, DirectionEnd::Closed));
        assert!(close.is_cancelled());
    }

    #[tokio::test]
    async fn test_target_eof_closes_client_side() {
        let (client, mut client_peer) = tokio::io::duplex(64);
        let (target, target_peer) = tokio::io::duplex(64);

        let relay = tokio::spawn(relay(client, target, 1024, CancellationToken::new()));
        drop(target_peer);

        let report = tokio::time::timeout(Duration::from_secs(1), relay)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(report.outbound.end, DirectionEnd::Eof));

        // The relay dropped its end of the client stream
        let mut buf = [0u8; 1];
        assert_eq!(client_peer.read(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_external_close_stops_idle_relay() {
        let (client, _client_peer) = tokio::io::duplex(64);
        let (target, _target_peer) = tokio::io::duplex(64);
        let close = CancellationToken::new();

        let relay = tokio::spawn(relay(client, target, 1024, close.clone()));
        tokio::task::yield_now().await;
        close.cancel();

        let report = tokio::time::timeout(Duration::from_secs(1), relay)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(report.inbound.end, DirectionEnd::Closed));
        assert!(matches!(report.outbound.end, DirectionEnd::Closed));
        assert_eq!(report.errors().count(), 0);
    }

    #[tokio::test]
    async fn test_read_error_is_reported_and_cascades() {
        let client = tokio_test::io::Builder::new()
            .read(b"partial")
            .read_error(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset"))
            .build();
        let (target, mut target_peer) = tokio::io::duplex(64);

        let report = tokio::time::timeout(
            Duration::from_secs(1),
            relay(client, target, 1024, CancellationToken::new()),
        )
        .await
        .unwrap();

        let errors: Vec<_> = report.errors().collect();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].direction, Direction::Inbound);
        assert_eq!(errors[0].bytes, 7);
        assert!(matches!(report.outbound.end, DirectionEnd::Closed));

        let mut forwarded = Vec::new();
        target_peer.read_to_end(&mut forwarded).await.unwrap();
        assert_eq!(forwarded, b"partial");
    }
}
