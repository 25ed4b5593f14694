//! A communication channel used to send/receive messages to/from the paired party.
//!
//! Every server is paired with exactly one client (and vice versa). All messages that the
//! orchestrator exchanges directly with its counterpart go through a [`Channel`], tagged with the
//! protocol phase they belong to so that failures can be attributed.

use std::{fmt, future::Future, io, net::SocketAddr, time::Duration};

use serde::{Serialize, de::DeserializeOwned};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{
        TcpListener, TcpStream, ToSocketAddrs,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    sync::{
        Mutex,
        mpsc::{Receiver, Sender, channel, error::SendError},
    },
    time::timeout,
};
use tracing::trace;

/// Errors related to sending / receiving / (de-)serializing messages.
#[derive(Debug, thiserror::Error)]
#[error("channel error during '{phase}': {reason}")]
pub struct Error {
    /// The protocol phase during which the error occurred.
    pub phase: String,
    /// The specific error that was raised.
    pub reason: ErrorKind,
}

/// The specific error that occurred when trying to send / receive a message.
#[derive(Debug, thiserror::Error)]
pub enum ErrorKind {
    /// The (serialized) message could not be received over the channel.
    #[error("receive failed: {0}")]
    RecvError(String),
    /// The (serialized) message could not be sent over the channel.
    #[error("send failed: {0}")]
    SendError(String),
    /// The message could not be (de-)serialized.
    #[error("serialization failed: {0}")]
    SerdeError(String),
    /// The message is a Vec, but not of the expected length.
    #[error("expected {expected} elements, received {actual}")]
    InvalidLength {
        /// The number of elements the protocol expects.
        expected: usize,
        /// The number of elements that were received.
        actual: usize,
    },
}

/// A communication channel to the paired party.
pub trait Channel {
    /// The error that can occur sending messages over the channel.
    type SendError: fmt::Debug;
    /// The error that can occur receiving messages over the channel.
    type RecvError: fmt::Debug;

    /// Sends a message to the paired party.
    fn send_bytes(
        &self,
        msg: Vec<u8>,
        phase: &str,
    ) -> impl Future<Output = Result<(), Self::SendError>> + Send;

    /// Awaits the next message from the paired party.
    fn recv_bytes(&self, phase: &str)
    -> impl Future<Output = Result<Vec<u8>, Self::RecvError>> + Send;
}

/// Serializes and sends a message to the paired party.
pub(crate) async fn send_to(
    channel: &impl Channel,
    phase: &str,
    msg: &impl Serialize,
) -> Result<(), Error> {
    let msg = bincode::serialize(msg).map_err(|e| Error {
        phase: format!("sending {phase}"),
        reason: ErrorKind::SerdeError(format!("{e:?}")),
    })?;
    channel.send_bytes(msg, phase).await.map_err(|e| Error {
        phase: phase.to_string(),
        reason: ErrorKind::SendError(format!("{e:?}")),
    })
}

/// Receives and deserializes a message from the paired party.
pub(crate) async fn recv_from<T: DeserializeOwned>(
    channel: &impl Channel,
    phase: &str,
) -> Result<T, Error> {
    let msg = channel.recv_bytes(phase).await.map_err(|e| Error {
        phase: phase.to_string(),
        reason: ErrorKind::RecvError(format!("{e:?}")),
    })?;
    bincode::deserialize(&msg).map_err(|e| Error {
        phase: format!("receiving {phase}"),
        reason: ErrorKind::SerdeError(format!("{e:?}")),
    })
}

/// Receives and deserializes a Vec from the paired party (while checking the length).
pub(crate) async fn recv_vec_from<T: DeserializeOwned>(
    channel: &impl Channel,
    phase: &str,
    len: usize,
) -> Result<Vec<T>, Error> {
    let v: Vec<T> = recv_from(channel, phase).await?;
    if v.len() == len {
        Ok(v)
    } else {
        Err(Error {
            phase: phase.to_string(),
            reason: ErrorKind::InvalidLength {
                expected: len,
                actual: v.len(),
            },
        })
    }
}

const CHUNK_SIZE: usize = 100 * 1024 * 1024;

/// A simple in-process channel using [`Sender`] and [`Receiver`].
#[derive(Debug)]
pub struct SimpleChannel {
    s: Sender<Vec<u8>>,
    r: Mutex<Receiver<Vec<u8>>>,
    recv_timeout: Duration,
}

impl SimpleChannel {
    /// Creates the two connected ends of a server/client link.
    pub fn pair() -> (Self, Self) {
        Self::pair_with_timeout(Duration::from_secs(10 * 60))
    }

    /// Creates a connected pair whose `recv` calls fail after `recv_timeout`.
    pub fn pair_with_timeout(recv_timeout: Duration) -> (Self, Self) {
        let buffer_capacity = 1024;
        let (send_a_to_b, recv_a_to_b) = channel(buffer_capacity);
        let (send_b_to_a, recv_b_to_a) = channel(buffer_capacity);
        let a = SimpleChannel {
            s: send_a_to_b,
            r: Mutex::new(recv_b_to_a),
            recv_timeout,
        };
        let b = SimpleChannel {
            s: send_b_to_a,
            r: Mutex::new(recv_a_to_b),
            recv_timeout,
        };
        (a, b)
    }

    /// Creates `n` server/client links, returned as `(server_ends, client_ends)`.
    pub fn links(n: usize, recv_timeout: Duration) -> (Vec<Self>, Vec<Self>) {
        (0..n).map(|_| Self::pair_with_timeout(recv_timeout)).unzip()
    }
}

#[derive(Debug)]
/// The error raised by `recv` calls of a [`SimpleChannel`].
pub enum AsyncRecvError {
    /// The channel has been closed.
    Closed,
    /// No message was received before the timeout.
    TimeoutElapsed,
    /// A chunk did not carry a valid header.
    MalformedChunk,
}

impl Channel for SimpleChannel {
    type SendError = SendError<Vec<u8>>;
    type RecvError = AsyncRecvError;

    async fn send_bytes(&self, msg: Vec<u8>, phase: &str) -> Result<(), SendError<Vec<u8>>> {
        let mb = msg.len() as f64 / 1024.0 / 1024.0;
        trace!("Sending msg {phase} ({mb:.2}MB)...");
        let mut chunks: Vec<_> = msg.chunks(CHUNK_SIZE).collect();
        if chunks.is_empty() {
            chunks.push(&[]);
        }
        let length = chunks.len();
        for (i, chunk) in chunks.into_iter().enumerate() {
            if length > 1 {
                trace!("  (Sending chunk {}/{} of {phase})", i + 1, length);
            }
            let mut msg = Vec::with_capacity(2 * 4 + chunk.len());
            msg.extend((i as u32).to_be_bytes());
            msg.extend((length as u32).to_be_bytes());
            msg.extend(chunk);
            self.s.send(msg).await?;
        }
        Ok(())
    }

    async fn recv_bytes(&self, _phase: &str) -> Result<Vec<u8>, AsyncRecvError> {
        let mut r = self.r.lock().await;
        let mut msg: Vec<u8> = vec![];
        loop {
            let chunk = match timeout(self.recv_timeout, r.recv()).await {
                Ok(Some(bytes)) => bytes,
                Ok(None) => return Err(AsyncRecvError::Closed),
                Err(_) => return Err(AsyncRecvError::TimeoutElapsed),
            };
            let (Some(i), Some(length)) = (chunk.get(0..4), chunk.get(4..8)) else {
                return Err(AsyncRecvError::MalformedChunk);
            };
            let i = u32::from_be_bytes([i[0], i[1], i[2], i[3]]);
            let length = u32::from_be_bytes([length[0], length[1], length[2], length[3]]);
            msg.extend(&chunk[8..]);
            if i + 1 >= length {
                break Ok(msg);
            }
        }
    }
}

/// The largest frame a [`TcpChannel`] sends or accepts, in bytes.
pub const MAX_FRAME_SIZE: u64 = 1 << 30;

/// A channel over a single TCP connection, framing every message with a `u64` length prefix.
///
/// Servers [`listen`](TcpChannel::listen) for their paired client, which
/// [`connect`](TcpChannel::connect)s.
#[derive(Debug)]
pub struct TcpChannel {
    read: Mutex<OwnedReadHalf>,
    write: Mutex<OwnedWriteHalf>,
    recv_timeout: Option<Duration>,
}

/// The error raised by a [`TcpChannel`].
#[derive(Debug, thiserror::Error)]
pub enum TcpError {
    /// Reading or writing the socket failed.
    #[error("socket error: {0}")]
    Io(#[from] io::Error),
    /// No message was received before the timeout.
    #[error("no message received within {0:?}")]
    TimeoutElapsed(Duration),
    /// The frame exceeds [`MAX_FRAME_SIZE`].
    #[error("frame of {0} bytes is too large")]
    FrameTooLarge(u64),
}

impl TcpChannel {
    /// Accepts exactly one connection on `addr` (the server side of a link).
    pub async fn listen(addr: impl ToSocketAddrs) -> Result<(Self, SocketAddr), TcpError> {
        let listener = TcpListener::bind(addr).await?;
        let (stream, peer) = listener.accept().await?;
        Ok((Self::from_stream(stream)?, peer))
    }

    /// Accepts exactly one connection on an already bound listener.
    pub async fn accept(listener: &TcpListener) -> Result<Self, TcpError> {
        let (stream, _) = listener.accept().await?;
        Self::from_stream(stream)
    }

    /// Connects to the paired server at `addr` (the client side of a link).
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Self, TcpError> {
        let stream = TcpStream::connect(addr).await?;
        Self::from_stream(stream)
    }

    /// Bounds every `recv` call by `recv_timeout`.
    pub fn with_timeout(mut self, recv_timeout: Duration) -> Self {
        self.recv_timeout = Some(recv_timeout);
        self
    }

    fn from_stream(stream: TcpStream) -> Result<Self, TcpError> {
        stream.set_nodelay(true)?;
        let (read, write) = stream.into_split();
        Ok(Self {
            read: Mutex::new(read),
            write: Mutex::new(write),
            recv_timeout: None,
        })
    }

    async fn read_frame(&self) -> Result<Vec<u8>, TcpError> {
        let mut read = self.read.lock().await;
        let len = read.read_u64().await?;
        if len > MAX_FRAME_SIZE {
            return Err(TcpError::FrameTooLarge(len));
        }
        let len_usize = usize::try_from(len).map_err(|_| TcpError::FrameTooLarge(len))?;
        let mut buf = vec![0; len_usize];
        read.read_exact(&mut buf).await?;
        Ok(buf)
    }
}

impl Channel for TcpChannel {
    type SendError = TcpError;
    type RecvError = TcpError;

    async fn send_bytes(&self, msg: Vec<u8>, phase: &str) -> Result<(), TcpError> {
        trace!("Sending msg {phase} ({} bytes) over tcp", msg.len());
        let len = msg.len() as u64;
        if len > MAX_FRAME_SIZE {
            return Err(TcpError::FrameTooLarge(len));
        }
        let mut write = self.write.lock().await;
        write.write_u64(len).await?;
        write.write_all(&msg).await?;
        write.flush().await?;
        Ok(())
    }

    async fn recv_bytes(&self, _phase: &str) -> Result<Vec<u8>, TcpError> {
        match self.recv_timeout {
            Some(limit) => timeout(limit, self.read_frame())
                .await
                .map_err(|_| TcpError::TimeoutElapsed(limit))?,
            None => self.read_frame().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::{
        io::AsyncWriteExt,
        net::{TcpListener, TcpStream},
    };

    use super::{
        Channel, ErrorKind, MAX_FRAME_SIZE, SimpleChannel, TcpChannel, TcpError, recv_from,
        recv_vec_from, send_to,
    };

    #[tokio::test]
    async fn simple_channel_delivers_in_order() -> Result<(), super::Error> {
        let (server, client) = SimpleChannel::pair();
        send_to(&client, "first", &"1|2".to_string()).await?;
        send_to(&client, "second", &vec![7_u64, 8, 9]).await?;
        let s: String = recv_from(&server, "first").await?;
        let v: Vec<u64> = recv_vec_from(&server, "second", 3).await?;
        assert_eq!(s, "1|2");
        assert_eq!(v, vec![7, 8, 9]);
        Ok(())
    }

    #[tokio::test]
    async fn wrong_length_is_reported() {
        let (server, client) = SimpleChannel::pair();
        send_to(&client, "masked ids", &vec![1_u64, 2])
            .await
            .unwrap();
        let err = recv_vec_from::<u64>(&server, "masked ids", 3)
            .await
            .unwrap_err();
        assert_eq!(err.phase, "masked ids");
        assert!(matches!(
            err.reason,
            ErrorKind::InvalidLength {
                expected: 3,
                actual: 2
            }
        ));
    }

    #[tokio::test]
    async fn recv_times_out() {
        let (server, _client) = SimpleChannel::pair_with_timeout(Duration::from_millis(20));
        let err = recv_from::<u64>(&server, "never sent").await.unwrap_err();
        assert!(matches!(err.reason, ErrorKind::RecvError(_)));
    }

    #[tokio::test]
    async fn tcp_channel_round_trip() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let channel = TcpChannel::accept(&listener).await.unwrap();
            let msg = channel.recv_bytes("hello").await.unwrap();
            channel.send_bytes(msg.iter().rev().copied().collect(), "reply").await.unwrap();
        });
        let client = TcpChannel::connect(addr)
            .await
            .unwrap()
            .with_timeout(Duration::from_secs(5));
        client.send_bytes(vec![1, 2, 3], "hello").await.unwrap();
        assert_eq!(client.recv_bytes("reply").await.unwrap(), vec![3, 2, 1]);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn oversized_frames_are_rejected() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let peer = tokio::spawn(async move {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            stream.write_u64(MAX_FRAME_SIZE + 1).await.unwrap();
            stream.flush().await.unwrap();
            stream
        });
        let channel = TcpChannel::accept(&listener)
            .await
            .unwrap()
            .with_timeout(Duration::from_secs(5));
        let err = channel.recv_bytes("corrupt").await.unwrap_err();
        assert!(matches!(err, TcpError::FrameTooLarge(len) if len == MAX_FRAME_SIZE + 1));
        drop(peer.await.unwrap());
    }
}
