//! Newline-delimited JSON framing over TCP.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::trace;

use super::message::ExtensionMessage;

/// Errors on an extension connection.
#[derive(Debug, Error)]
pub enum SocketError {
    /// Reading or writing failed.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    /// A frame could not be encoded or decoded.
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
    /// The peer closed the connection.
    #[error("connection closed by peer")]
    Closed,
    /// No frame arrived within the read timeout.
    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

/// One extension connection. Messages are JSON objects, one per line.
#[derive(Debug)]
pub struct ExtensionSocket {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    read_timeout: Option<Duration>,
    line: String,
}

impl ExtensionSocket {
    /// Connect to `addr`, giving up after `timeout`.
    ///
    /// # Errors
    ///
    /// [`SocketError::Timeout`] or the connect error.
    pub async fn connect(addr: SocketAddr, timeout: Duration) -> Result<Self, SocketError> {
        let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| SocketError::Timeout(timeout))??;
        stream.set_nodelay(true)?;
        Ok(Self::new(stream).with_read_timeout(timeout))
    }

    /// Wrap an accepted stream.
    #[must_use]
    pub fn new(stream: TcpStream) -> Self {
        let (read, write) = stream.into_split();
        Self {
            reader: BufReader::new(read),
            writer: write,
            read_timeout: None,
            line: String::new(),
        }
    }

    /// Fail reads that wait longer than `timeout`.
    #[must_use]
    pub const fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = Some(timeout);
        self
    }

    /// Write one message.
    ///
    /// # Errors
    ///
    /// Encoding or write failure.
    pub async fn send(&mut self, message: &ExtensionMessage) -> Result<(), SocketError> {
        let mut bytes = serde_json::to_vec(message)?;
        bytes.push(b'\n');
        trace!(kind = message.kind(), len = bytes.len(), "Sending frame");
        self.writer.write_all(&bytes).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Read the next message. Blank lines are skipped.
    ///
    /// # Errors
    ///
    /// [`SocketError::Closed`] at end of stream, [`SocketError::Malformed`] for
    /// undecodable frames, otherwise I/O or timeout errors.
    pub async fn receive(&mut self) -> Result<ExtensionMessage, SocketError> {
        loop {
            self.line.clear();
            let read = match self.read_timeout {
                Some(timeout) => tokio::time::timeout(timeout, self.reader.read_line(&mut self.line))
                    .await
                    .map_err(|_| SocketError::Timeout(timeout))??,
                None => self.reader.read_line(&mut self.line).await?,
            };
            if read == 0 {
                return Err(SocketError::Closed);
            }
            let line = self.line.trim();
            if line.is_empty() {
                continue;
            }
            let message: ExtensionMessage = serde_json::from_str(line)?;
            trace!(kind = message.kind(), "Received frame");
            return Ok(message);
        }
    }

    /// Flush and close the write half.
    ///
    /// # Errors
    ///
    /// Shutdown failure.
    pub async fn close(mut self) -> Result<(), SocketError> {
        self.writer.shutdown().await?;
        Ok(())
    }
}
