use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};

use super::error::{Result as TwitchResult, TwitchError};

/// Upper bound for a single inbound line. Twitch lines with a full tag set
/// stay well below this.
pub const MAX_LINE_BYTES: u64 = 8 * 1024;

pub struct TransportReader {
    inner: BufReader<OwnedReadHalf>,
}

pub struct TransportWriter {
    inner: BufWriter<OwnedWriteHalf>,
}

/// Opens a TCP stream to `host:port` and splits it into an independently
/// owned reader and writer.
pub async fn open(
    host: &str,
    port: u16,
    connect_timeout: Duration,
) -> TwitchResult<(TransportReader, TransportWriter)> {
    let addr = format!("{}:{}", host, port);
    let stream = match tokio::time::timeout(connect_timeout, TcpStream::connect(&addr)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(tcp_error)) => {
            tracing::error!(addr = %addr, error = %tcp_error, "TCP connection failed");
            return Err(TwitchError::Connection(format!(
                "TCP connection to {} failed: {}",
                addr, tcp_error
            )));
        }
        Err(_) => {
            tracing::error!(addr = %addr, timeout = ?connect_timeout, "TCP connection timed out");
            return Err(TwitchError::Connection(format!(
                "TCP connection to {} timed out after {:?}",
                addr, connect_timeout
            )));
        }
    };
    if let Err(e) = stream.set_nodelay(true) {
        tracing::debug!(error = %e, "Could not set TCP_NODELAY");
    }

    let (reader, writer) = stream.into_split();
    Ok((
        TransportReader {
            inner: BufReader::new(reader),
        },
        TransportWriter {
            inner: BufWriter::new(writer),
        },
    ))
}

impl TransportReader {
    /// Reads up to and including the next `\n`, bounded by [`MAX_LINE_BYTES`].
    /// Returns `Ok(None)` once the peer closed the stream.
    ///
    /// An over-long line is returned truncated and the rest of it, up to its
    /// `\n`, is discarded. The next call starts on a fresh line.
    pub async fn read_line(&mut self) -> std::io::Result<Option<Vec<u8>>> {
        let mut buf = Vec::with_capacity(512);
        let read = (&mut self.inner)
            .take(MAX_LINE_BYTES)
            .read_until(b'\n', &mut buf)
            .await?;
        if read == 0 {
            return Ok(None);
        }
        if buf.last() != Some(&b'\n') && read as u64 == MAX_LINE_BYTES {
            let discarded = self.discard_rest_of_line().await?;
            tracing::warn!(
                kept = read,
                discarded,
                "Inbound line exceeded the length limit. Truncated"
            );
        }
        Ok(Some(buf))
    }

    async fn discard_rest_of_line(&mut self) -> std::io::Result<usize> {
        let mut discarded = 0;
        loop {
            let (newline, available) = {
                let chunk = self.inner.fill_buf().await?;
                (chunk.iter().position(|&b| b == b'\n'), chunk.len())
            };
            match newline {
                Some(pos) => {
                    self.inner.consume(pos + 1);
                    return Ok(discarded + pos + 1);
                }
                None if available == 0 => return Ok(discarded),
                None => {
                    self.inner.consume(available);
                    discarded += available;
                }
            }
        }
    }
}

impl TransportWriter {
    /// Buffers one protocol line, appending the `\r\n` terminator.
    pub async fn write_line(&mut self, line: &str) -> std::io::Result<()> {
        self.inner.write_all(line.as_bytes()).await?;
        self.inner.write_all(b"\r\n").await
    }

    pub async fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush().await
    }

    pub async fn close(&mut self) -> std::io::Result<()> {
        self.inner.shutdown().await
    }
}
