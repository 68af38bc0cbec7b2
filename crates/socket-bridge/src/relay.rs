//! Byte pumps used once a local client is attached to a session.

use std::io;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Which way bytes are flowing through the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Local client -> upstream session.
    ToUpstream,
    /// Upstream session -> local client.
    ToLocal,
}

/// A pump failure, tagged with the side of the pump it happened on.
#[derive(Debug, Error)]
pub enum PumpError {
    #[error("read failed: {0}")]
    Read(#[source] io::Error),
    #[error("write failed: {0}")]
    Write(#[source] io::Error),
}

impl PumpError {
    pub fn into_io(self) -> io::Error {
        match self {
            PumpError::Read(err) | PumpError::Write(err) => err,
        }
    }
}

/// Copy bytes from `reader` to `writer` until `reader` reaches EOF.
///
/// Bytes are forwarded verbatim and in order. Each chunk is written and
/// flushed before the next read, so no data is buffered beyond one chunk.
/// Returns the number of bytes copied.
pub async fn pump<R, W>(
    mut reader: R,
    mut writer: W,
    buffer_size: usize,
    direction: Direction,
) -> Result<u64, PumpError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; buffer_size.max(1)];
    let mut total: u64 = 0;

    loop {
        let n = reader.read(&mut buf).await.map_err(PumpError::Read)?;
        if n == 0 {
            tracing::trace!(?direction, total, "relay source reached EOF");
            return Ok(total);
        }
        writer.write_all(&buf[..n]).await.map_err(PumpError::Write)?;
        writer.flush().await.map_err(PumpError::Write)?;
        total += n as u64;
    }
}
