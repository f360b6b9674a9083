//! One-directional byte pump between two streams
//!
//! Bytes are forwarded in arrival order and flushed after every write, so
//! the peer sees them without buffering delay. The loop ends on EOF or the
//! first I/O error; errors are expected teardown noise and are logged, not
//! propagated.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace};

/// Copy from `reader` to `writer` until EOF or error.
///
/// Returns the number of bytes forwarded.
pub async fn pipe<R, W>(mut reader: R, mut writer: W, buffer_size: usize, label: &str) -> u64
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buffer = vec![0u8; buffer_size];
    let mut forwarded = 0u64;

    loop {
        let n = match reader.read(&mut buffer).await {
            Ok(0) => {
                debug!("[{label}] EOF after {forwarded} bytes");
                break;
            }
            Ok(n) => n,
            Err(e) => {
                debug!("[{label}] read ended: {e}");
                break;
            }
        };

        if let Err(e) = writer.write_all(&buffer[..n]).await {
            debug!("[{label}] write ended: {e}");
            break;
        }
        if let Err(e) = writer.flush().await {
            debug!("[{label}] flush ended: {e}");
            break;
        }

        forwarded += n as u64;
        trace!("[{label}] forwarded {n} bytes");
    }

    forwarded
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn test_pipe_forwards_until_eof() {
        let (mut client, server) = duplex(64);
        let (server_read, _keep) = tokio::io::split(server);
        let mut out = Vec::new();

        client.write_all(b"hello world").await.unwrap();
        drop(client);

        let n = pipe(server_read, &mut out, 4, "test").await;
        assert_eq!(n, 11);
        assert_eq!(out, b"hello world");
    }

    #[tokio::test]
    async fn test_pipe_preserves_order_across_small_buffer() {
        let (mut client, server) = duplex(1024);
        let (server_read, _keep) = tokio::io::split(server);
        let mut out = Vec::new();

        let payload: Vec<u8> = (0..=255u8).cycle().take(4096).collect();
        client.write_all(&payload).await.unwrap();
        drop(client);

        let n = pipe(server_read, &mut out, 8, "test").await;
        assert_eq!(n, 4096);
        assert_eq!(out, payload);
    }
}
