//! Full-duplex copy between two byte streams

use crate::stats::PipeStats;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tracing::trace;

/// Copy buffer size per direction.
const BUFFER_SIZE: usize = 64 * 1024;

/// Run both directions of a connection pair until each side's source is
/// exhausted.
///
/// `client_side` is the stream facing the tunneled service, `public_side`
/// the stream facing public users. Each direction copies independently;
/// when one direction's read ends (EOF or error) it half-closes the
/// destination so the opposite direction can keep draining in-flight
/// data. Returns only after both directions have terminated.
///
/// Byte counts are added to `stats` continuously as writes complete; the
/// per-connection totals are returned as
/// `(client_to_public, public_to_client)`.
pub async fn join<A, B>(client_side: A, public_side: B, stats: &PipeStats) -> (u64, u64)
where
    A: AsyncRead + AsyncWrite + Send,
    B: AsyncRead + AsyncWrite + Send,
{
    let (client_read, client_write) = tokio::io::split(client_side);
    let (public_read, public_write) = tokio::io::split(public_side);

    let client_to_public = copy_direction(client_read, public_write, &stats.client_to_public);
    let public_to_client = copy_direction(public_read, client_write, &stats.public_to_client);

    tokio::join!(client_to_public, public_to_client)
}

/// One direction of the pipe. Runs until the source read fails or hits
/// EOF, then signals "no more data" on the destination.
async fn copy_direction<R, W>(
    mut src: ReadHalf<R>,
    mut dst: WriteHalf<W>,
    counter: &AtomicU64,
) -> u64
where
    R: AsyncRead,
    W: AsyncWrite,
{
    let mut buf = vec![0u8; BUFFER_SIZE];
    let mut total = 0u64;
    loop {
        match src.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                if let Err(e) = dst.write_all(&buf[..n]).await {
                    trace!("pipe write ended: {}", e);
                    break;
                }
                // Message-framed destinations queue writes until they
                // are flushed; without this the frame never leaves.
                if let Err(e) = dst.flush().await {
                    trace!("pipe flush ended: {}", e);
                    break;
                }
                counter.fetch_add(n as u64, Ordering::Relaxed);
                total += n as u64;
            }
            Err(e) => {
                trace!("pipe read ended: {}", e);
                break;
            }
        }
    }
    // Half-close: shutdown-write on the destination. The opposite
    // direction owns the other halves and is unaffected.
    let _ = dst.shutdown().await;
    total
}
