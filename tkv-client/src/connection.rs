//! # Pipelined Connection
//!
//! Purpose: Own one session with the store and multiplex any number of
//! outstanding commands over it while keeping reply N paired with request N.
//!
//! ## Design Principles
//! 1. **Single Owner Task**: One tokio task owns the socket; callers only
//!    talk to it through a channel, so there is no lock on the hot path.
//! 2. **FIFO Pairing**: Reply slots are queued in write order and every
//!    parsed reply goes to the queue head, including replies nobody is
//!    waiting for anymore.
//! 3. **Fail Everything Once**: A transport failure is cloned to every
//!    queued slot and every later submission; the connection is never
//!    silently revived.
//! 4. **Buffer Reuse**: One `BytesMut` read buffer and one write buffer
//!    live for the whole session.
//! 5. **Read While Writing**: Outgoing frames are flushed from the same
//!    `select!` that reads replies, so a deep pipeline never stops draining
//!    replies while the peer applies backpressure.
//!
//! ## Structure Overview
//!
//! ```text
//! Connection (caller-owned handle)
//!   ├── requests: mpsc::UnboundedSender<Message>
//!   │     └── Driver task
//!   │           ├── writer: WriteHalf<S> + outgoing BytesMut
//!   │           ├── reader: ReadHalf<S> + BytesMut + ReplyDecoder
//!   │           └── pending: VecDeque<oneshot::Sender<..>>
//!   └── blocking: BlockingSessions   (own sessions for blocking pops)
//! ```

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::blocking::BlockingSessions;
use crate::command::Command;
use crate::config::ClientConfig;
use crate::error::{ClientResult, TransportError};
use crate::operation::{Operation, ReplySlot};
use crate::resp::{Reply, ReplyDecoder};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

pub(crate) type SlotSender = oneshot::Sender<Result<Reply, TransportError>>;

enum Message {
    Request { frame: Bytes, reply: SlotSender },
    Close,
}

/// Handle to one established session with the store.
///
/// Commands borrow the handle (`&self`) and may be issued back to back
/// without awaiting earlier replies. Dropping the handle or calling
/// `disconnect` fails every operation still waiting on this connection.
pub struct Connection {
    id: u64,
    requests: mpsc::UnboundedSender<Message>,
    driver: Option<JoinHandle<()>>,
    blocking: Option<Arc<BlockingSessions>>,
}

impl Connection {
    /// Connects over TCP using `config`.
    ///
    /// Blocking pops issued on the returned handle run on extra sessions
    /// opened lazily with the same `config`.
    pub async fn connect(config: &ClientConfig) -> Result<Self, TransportError> {
        let mut conn = Self::dial(config).await?;
        conn.blocking = Some(Arc::new(BlockingSessions::new(config.clone())));
        debug!(conn = conn.id, addr = %config.addr, "connected");
        Ok(conn)
    }

    /// Opens a plain session without blocking-pop support of its own.
    pub(crate) async fn dial(config: &ClientConfig) -> Result<Self, TransportError> {
        let connect = TcpStream::connect(config.addr.as_str());
        let stream = match config.connect_timeout() {
            Some(timeout) => tokio::time::timeout(timeout, connect)
                .await
                .map_err(|_| TransportError::ConnectTimeout)?,
            None => connect.await,
        }
        .map_err(|err| match err.kind() {
            std::io::ErrorKind::InvalidInput => TransportError::InvalidAddress(config.addr.clone()),
            _ => TransportError::from(err),
        })?;

        if config.nodelay {
            // Disable Nagle to keep request latency low for small payloads.
            stream.set_nodelay(true)?;
        }

        Ok(Self::with_capacity(stream, config.read_buffer_capacity))
    }

    /// Wraps an already-established stream, e.g. a TLS session or an
    /// in-memory duplex pipe.
    ///
    /// There is no address to open more sessions with, so blocking pops on
    /// this handle are pipelined like any other command and hold back
    /// everything queued after them.
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        Self::with_capacity(stream, ClientConfig::default().read_buffer_capacity)
    }

    fn with_capacity<S>(stream: S, read_capacity: usize) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let id = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
        let (requests, inbox) = mpsc::unbounded_channel();
        let (reader, writer) = tokio::io::split(stream);
        let driver = Driver {
            id,
            reader,
            writer,
            buffer: BytesMut::with_capacity(read_capacity.max(64)),
            decoder: ReplyDecoder::new(),
            outgoing: BytesMut::new(),
            pending: VecDeque::new(),
        };
        let handle = tokio::spawn(driver.run(inbox));
        Connection {
            id,
            requests,
            driver: Some(handle),
            blocking: None,
        }
    }

    /// Process-unique identifier, used in log fields.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// True once the session has ended, locally or remotely.
    pub fn is_closed(&self) -> bool {
        self.requests.is_closed()
    }

    /// Sends `command` and decodes its reply with `decode`.
    ///
    /// The request is queued before this returns. This is the extension
    /// point for commands without a typed wrapper.
    pub fn execute<T, D>(&self, command: Command, decode: D) -> Operation<T>
    where
        T: Send + 'static,
        D: FnOnce(Reply) -> ClientResult<T> + Send + 'static,
    {
        Operation::pending(self.submit(&command), decode)
    }

    /// Sessions reserved for blocking pops, when this handle can open them.
    pub(crate) fn blocking_sessions(&self) -> Option<&Arc<BlockingSessions>> {
        self.blocking.as_ref()
    }

    pub(crate) fn submit(&self, command: &Command) -> ReplySlot {
        let (reply, slot) = oneshot::channel();
        trace!(
            conn = self.id,
            command = %String::from_utf8_lossy(command.name()),
            args = command.as_args().len(),
            "submit"
        );
        let message = Message::Request {
            frame: command.encode(),
            reply,
        };
        if let Err(mpsc::error::SendError(Message::Request { reply, .. })) = self.requests.send(message) {
            let _ = reply.send(Err(TransportError::Closed));
        }
        slot
    }

    /// Closes the session.
    ///
    /// Operations still waiting on a reply fail with
    /// `TransportError::Closed`, blocking pops included. Requests already
    /// written may or may not have been executed by the store.
    pub async fn disconnect(mut self) {
        if let Some(blocking) = &self.blocking {
            blocking.close();
        }
        let _ = self.requests.send(Message::Close);
        if let Some(driver) = self.driver.take() {
            let _ = driver.await;
        }
        debug!(conn = self.id, "disconnected");
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Some(blocking) = &self.blocking {
            blocking.close();
        }
        // Dropping the sender ends the driver once the inbox drains.
        if self.driver.is_some() {
            let _ = self.requests.send(Message::Close);
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Socket-owning half of a connection.
struct Driver<S> {
    id: u64,
    reader: ReadHalf<S>,
    writer: WriteHalf<S>,
    buffer: BytesMut,
    decoder: ReplyDecoder,
    /// Encoded requests not yet accepted by the socket.
    outgoing: BytesMut,
    pending: VecDeque<SlotSender>,
}

impl<S> Driver<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    async fn run(mut self, mut inbox: mpsc::UnboundedReceiver<Message>) {
        let failure = loop {
            tokio::select! {
                message = inbox.recv() => {
                    if let Err(err) = self.on_message(message) {
                        break err;
                    }
                }
                read = self.reader.read_buf(&mut self.buffer) => {
                    if let Err(err) = self.on_read(read) {
                        break err;
                    }
                }
                written = self.writer.write_buf(&mut self.outgoing), if !self.outgoing.is_empty() => {
                    if let Err(err) = self.on_written(written).await {
                        break err;
                    }
                }
            }
        };

        match &failure {
            TransportError::Closed => debug!(conn = self.id, pending = self.pending.len(), "connection closed"),
            err => warn!(conn = self.id, pending = self.pending.len(), error = %err, "connection failed"),
        }

        for slot in self.pending.drain(..) {
            let _ = slot.send(Err(failure.clone()));
        }
        inbox.close();
        while let Ok(message) = inbox.try_recv() {
            if let Message::Request { reply, .. } = message {
                let _ = reply.send(Err(failure.clone()));
            }
        }
        let _ = self.writer.shutdown().await;
    }

    fn on_message(&mut self, message: Option<Message>) -> Result<(), TransportError> {
        match message {
            Some(Message::Request { frame, reply }) => {
                // The slot is queued with its frame, so a failed write fails it too.
                self.pending.push_back(reply);
                self.outgoing.extend_from_slice(&frame);
                Ok(())
            }
            Some(Message::Close) | None => Err(TransportError::Closed),
        }
    }

    async fn on_written(&mut self, written: std::io::Result<usize>) -> Result<(), TransportError> {
        if written? == 0 {
            return Err(std::io::Error::from(std::io::ErrorKind::WriteZero).into());
        }
        if self.outgoing.is_empty() {
            self.writer.flush().await?;
        }
        Ok(())
    }

    fn on_read(&mut self, read: std::io::Result<usize>) -> Result<(), TransportError> {
        if read? == 0 {
            return Err(TransportError::Closed);
        }
        while let Some(reply) = self.decoder.decode(&mut self.buffer)? {
            match self.pending.pop_front() {
                Some(slot) => {
                    trace!(conn = self.id, reply = %reply.describe(), "reply");
                    if slot.send(Ok(reply)).is_err() {
                        trace!(conn = self.id, "reply for detached operation dropped");
                    }
                }
                None => {
                    return Err(TransportError::Protocol(format!(
                        "unsolicited reply: {}",
                        reply.describe()
                    )));
                }
            }
        }
        Ok(())
    }
}
