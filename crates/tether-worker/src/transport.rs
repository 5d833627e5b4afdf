//! `\0`-framed message channel over a byte stream.
//!
//! Every payload is followed by exactly one terminator byte; there is no
//! length prefix. Bytes after a terminator stay buffered for the next
//! `receive`, so pipelined messages are returned one at a time.

use bytes::{Buf, BytesMut};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, trace, warn};

/// Byte that ends every frame.
pub const TERMINATOR: u8 = 0;

/// Bytes reserved for each read from the stream (64KB).
pub const READ_CHUNK_SIZE: usize = 64 * 1024;

/// Read attempts before a read error is propagated.
pub const READ_ATTEMPTS: usize = 4;

/// Zero-byte reads tolerated within one `receive` call.
pub const EMPTY_READ_LIMIT: usize = 100;

/// Default cap on a single inbound message (100MB).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 100 * 1024 * 1024;

/// Errors from the framed channel. All of them are fatal to the connection.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Stream I/O failed (after retries, for reads).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The peer stopped sending data.
    #[error("connection closed by peer")]
    Closed,

    /// More than `limit` bytes arrived without a terminator.
    #[error("message exceeds {limit} bytes without a terminator")]
    MessageTooLarge {
        /// Configured maximum message size.
        limit: usize,
    },

    /// An outbound payload contained the terminator byte.
    #[error("payload contains the frame terminator")]
    EmbeddedTerminator,
}

/// Whether [`Channel::request`] waits for an answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    /// Send, then receive the next message.
    Expected,
    /// One-way notification.
    None,
}

/// A framed connection plus the bytes received but not yet consumed.
#[derive(Debug)]
pub struct Channel<S> {
    stream: S,
    buffer: BytesMut,
    // Prefix of `buffer` already known to hold no terminator.
    scanned: usize,
    max_message_size: usize,
}

impl Channel<TcpStream> {
    /// Open a TCP connection to the referee.
    pub async fn connect(host: &str, port: u16) -> Result<Self, TransportError> {
        let stream = TcpStream::connect((host, port)).await?;
        stream.set_nodelay(true)?;
        debug!(host = %host, port, "connected");
        Ok(Self::new(stream))
    }
}

impl<S> Channel<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wrap an established stream.
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            buffer: BytesMut::with_capacity(READ_CHUNK_SIZE),
            scanned: 0,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }

    /// Cap the size of a single inbound message.
    pub fn with_max_message_size(mut self, bytes: usize) -> Self {
        self.max_message_size = bytes;
        self
    }

    /// Bytes buffered past the last returned message.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Write one frame.
    pub async fn send(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        if payload.contains(&TERMINATOR) {
            return Err(TransportError::EmbeddedTerminator);
        }

        let mut frame = Vec::with_capacity(payload.len() + 1);
        frame.extend_from_slice(payload);
        frame.push(TERMINATOR);

        self.stream.write_all(&frame).await?;
        self.stream.flush().await?;
        trace!(bytes = frame.len(), "frame sent");
        Ok(())
    }

    /// Read the next complete frame, without its terminator.
    pub async fn receive(&mut self) -> Result<Vec<u8>, TransportError> {
        let mut empty_reads = EMPTY_READ_LIMIT;
        loop {
            if let Some(frame) = self.take_frame() {
                trace!(bytes = frame.len(), buffered = self.buffer.len(), "frame received");
                return Ok(frame.to_vec());
            }

            if self.buffer.len() > self.max_message_size {
                return Err(TransportError::MessageTooLarge {
                    limit: self.max_message_size,
                });
            }

            if self.read_chunk().await? == 0 {
                empty_reads -= 1;
                if empty_reads == 0 {
                    debug!("peer sent no data, giving up");
                    return Err(TransportError::Closed);
                }
            }
        }
    }

    /// Send `payload`, then optionally wait for the next frame.
    pub async fn request(
        &mut self,
        payload: &[u8],
        reply: Reply,
    ) -> Result<Option<Vec<u8>>, TransportError> {
        self.send(payload).await?;
        match reply {
            Reply::Expected => self.receive().await.map(Some),
            Reply::None => Ok(None),
        }
    }

    /// Release the underlying stream.
    pub fn into_inner(self) -> S {
        self.stream
    }

    /// Split off the first complete frame, scanning only bytes not seen by
    /// an earlier call.
    fn take_frame(&mut self) -> Option<BytesMut> {
        let Some(offset) = self.buffer[self.scanned..]
            .iter()
            .position(|b| *b == TERMINATOR)
        else {
            self.scanned = self.buffer.len();
            return None;
        };
        let frame = self.buffer.split_to(self.scanned + offset);
        self.buffer.advance(1);
        self.scanned = 0;
        Some(frame)
    }

    async fn read_chunk(&mut self) -> Result<usize, TransportError> {
        let mut attempts = READ_ATTEMPTS;
        loop {
            self.buffer.reserve(READ_CHUNK_SIZE);
            match self.stream.read_buf(&mut self.buffer).await {
                Ok(n) => return Ok(n),
                Err(err) => {
                    attempts -= 1;
                    if attempts == 0 {
                        return Err(err.into());
                    }
                    warn!(error = %err, attempts_left = attempts, "read failed, retrying");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use tokio_test::io::Builder;

    fn reset() -> io::Error {
        io::Error::new(io::ErrorKind::ConnectionReset, "reset")
    }

    #[tokio::test]
    async fn test_send_appends_terminator() {
        let mock = Builder::new().write(b"{\"a\":1}\0").build();
        let mut channel = Channel::new(mock);
        channel.send(b"{\"a\":1}").await.unwrap();
    }

    #[tokio::test]
    async fn test_send_rejects_embedded_terminator() {
        let mock = Builder::new().build();
        let mut channel = Channel::new(mock);
        assert!(matches!(
            channel.send(b"a\0b").await,
            Err(TransportError::EmbeddedTerminator)
        ));
    }

    #[tokio::test]
    async fn test_reassembles_partial_reads() {
        let mock = Builder::new().read(b"{\"ac").read(b"tion\":").read(b"1}\0").build();
        let mut channel = Channel::new(mock);
        assert_eq!(channel.receive().await.unwrap(), b"{\"action\":1}");
        assert_eq!(channel.buffered(), 0);
    }

    #[tokio::test]
    async fn test_pipelined_frames_are_split() {
        let mock = Builder::new().read(b"one\0two\0thr").read(b"ee\0").build();
        let mut channel = Channel::new(mock);
        assert_eq!(channel.receive().await.unwrap(), b"one");
        assert_eq!(channel.buffered(), 7);
        assert_eq!(channel.receive().await.unwrap(), b"two");
        assert_eq!(channel.receive().await.unwrap(), b"three");
    }

    #[tokio::test]
    async fn test_take_frame_scans_each_byte_once() {
        let mut channel = Channel::new(Builder::new().build());

        channel.buffer.extend_from_slice(b"abc");
        assert!(channel.take_frame().is_none());
        assert_eq!(channel.scanned, 3);

        channel.buffer.extend_from_slice(b"de");
        assert!(channel.take_frame().is_none());
        assert_eq!(channel.scanned, 5);

        channel.buffer.extend_from_slice(b"f\0gh\0i");
        assert_eq!(&channel.take_frame().unwrap()[..], b"abcdef");
        assert_eq!(channel.scanned, 0);
        assert_eq!(&channel.take_frame().unwrap()[..], b"gh");
        assert!(channel.take_frame().is_none());
        assert_eq!(channel.scanned, 1);
    }

    #[tokio::test]
    async fn test_large_frame_across_many_reads() {
        let payload = vec![b'x'; 8 * READ_CHUNK_SIZE + 17];
        let (local, mut remote) = tokio::io::duplex(READ_CHUNK_SIZE);
        let mut channel = Channel::new(local);

        let expected = payload.clone();
        let writer = async move {
            remote.write_all(&payload).await.unwrap();
            remote.write_all(&[TERMINATOR]).await.unwrap();
            remote
        };
        let (received, _remote) = tokio::join!(channel.receive(), writer);
        assert_eq!(received.unwrap(), expected);
        assert_eq!(channel.buffered(), 0);
        assert_eq!(channel.scanned, 0);
    }

    #[tokio::test]
    async fn test_empty_frame() {
        let mock = Builder::new().read(b"\0").build();
        let mut channel = Channel::new(mock);
        assert_eq!(channel.receive().await.unwrap(), b"");
    }

    #[tokio::test]
    async fn test_read_errors_are_retried() {
        let mock = Builder::new()
            .read_error(reset())
            .read_error(reset())
            .read_error(reset())
            .read(b"ok\0")
            .build();
        let mut channel = Channel::new(mock);
        assert_eq!(channel.receive().await.unwrap(), b"ok");
    }

    #[tokio::test]
    async fn test_read_errors_exhaust_attempts() {
        let mock = Builder::new()
            .read_error(reset())
            .read_error(reset())
            .read_error(reset())
            .read_error(reset())
            .build();
        let mut channel = Channel::new(mock);
        assert!(matches!(channel.receive().await, Err(TransportError::Io(_))));
    }

    #[tokio::test]
    async fn test_eof_is_closed() {
        let (local, mut remote) = tokio::io::duplex(64);
        remote.write_all(b"partial").await.unwrap();
        drop(remote);

        let mut channel = Channel::new(local);
        assert!(matches!(channel.receive().await, Err(TransportError::Closed)));
        assert_eq!(channel.buffered(), 7);
    }

    #[tokio::test]
    async fn test_message_too_large() {
        let mock = Builder::new().read(b"0123456789").build();
        let mut channel = Channel::new(mock).with_max_message_size(4);
        assert!(matches!(
            channel.receive().await,
            Err(TransportError::MessageTooLarge { limit: 4 })
        ));
    }

    #[tokio::test]
    async fn test_request_with_and_without_reply() {
        let mock = Builder::new()
            .write(b"ping\0")
            .read(b"pong\0")
            .write(b"note\0")
            .build();
        let mut channel = Channel::new(mock);
        assert_eq!(
            channel.request(b"ping", Reply::Expected).await.unwrap(),
            Some(b"pong".to_vec())
        );
        assert_eq!(channel.request(b"note", Reply::None).await.unwrap(), None);
    }
}
