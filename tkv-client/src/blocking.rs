//! # Blocking Pops
//!
//! Purpose: Pop from the first of several lists (or sorted sets) that has an
//! element, waiting server-side up to a timeout.
//!
//! ## Design Principles
//! 1. **Store-Enforced Timeouts**: The client sets no timer of its own; the
//!    operation resolves when the store answers.
//! 2. **Indefinite Is Explicit**: `BlockTimeout::Indefinite` is the only way
//!    to send `0`. A non-blocking pop is `lpop`/`rpop`.
//! 3. **Timeout Is Not Failure**: The store's nil reply becomes `None`.
//! 4. **Own Session per Waiting Pop**: The store serialises a blocked
//!    session, so each pop runs on a session of its own, taken from a small
//!    pool that grows on demand. Pops on one `Connection` wait side by side
//!    and never hold back its other commands.
//!
//! ## Notes
//! - A pop is not ordered after earlier commands on the same handle; await a
//!   push before popping what it pushed.
//! - Cancelling or dropping a pop closes its session, which makes the store
//!   abandon the wait. An element already popped when that happens is lost
//!   with the reply.
//! - Handles built with `Connection::from_stream` cannot open sessions and
//!   pipeline their pops like any other command.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{oneshot, watch};
use tracing::{debug, trace};

use tkv_common::{BlockTimeout, KeyMemberScore, KeyValue};

use crate::command::Command;
use crate::commands::require_non_empty;
use crate::config::ClientConfig;
use crate::connection::{Connection, SlotSender};
use crate::decode;
use crate::error::{ClientResult, TransportError};
use crate::operation::Operation;
use crate::resp::Reply;

/// Idle blocking sessions kept open for reuse.
const MAX_IDLE_SESSIONS: usize = 4;

impl Connection {
    /// Pops the head of the first non-empty list among `keys`.
    ///
    /// Resolves to the list that yielded and its element, or `None` when the
    /// timeout elapsed.
    pub fn blpop<K: AsRef<[u8]>>(&self, keys: &[K], timeout: BlockTimeout) -> Operation<Option<KeyValue>> {
        self.blocking_pop("BLPOP", keys, timeout, decode::optional_key_value)
    }

    /// Pops the tail of the first non-empty list among `keys`.
    pub fn brpop<K: AsRef<[u8]>>(&self, keys: &[K], timeout: BlockTimeout) -> Operation<Option<KeyValue>> {
        self.blocking_pop("BRPOP", keys, timeout, decode::optional_key_value)
    }

    /// Pops the lowest-scored member of the first non-empty sorted set.
    pub fn bzpopmin<K: AsRef<[u8]>>(&self, keys: &[K], timeout: BlockTimeout) -> Operation<Option<KeyMemberScore>> {
        self.blocking_pop("BZPOPMIN", keys, timeout, decode::optional_key_member_score)
    }

    /// Pops the highest-scored member of the first non-empty sorted set.
    pub fn bzpopmax<K: AsRef<[u8]>>(&self, keys: &[K], timeout: BlockTimeout) -> Operation<Option<KeyMemberScore>> {
        self.blocking_pop("BZPOPMAX", keys, timeout, decode::optional_key_member_score)
    }

    fn blocking_pop<K, T>(
        &self,
        name: &'static str,
        keys: &[K],
        timeout: BlockTimeout,
        decode: fn(Reply) -> ClientResult<Option<T>>,
    ) -> Operation<Option<T>>
    where
        K: AsRef<[u8]>,
        T: Send + 'static,
    {
        if let Err(op) = require_non_empty(keys, "blocking pop requires at least one key") {
            return op;
        }
        let command = Command::new(name).args(keys).arg_uint(timeout.wire_seconds());
        match self.blocking_sessions() {
            Some(sessions) if !self.is_closed() => sessions.pop(command, decode),
            _ => self.execute(command, decode),
        }
    }
}

/// Pool of extra sessions that run blocking pops for one `Connection`.
pub(crate) struct BlockingSessions {
    config: ClientConfig,
    idle: Mutex<Vec<Connection>>,
    closed: watch::Sender<bool>,
}

impl BlockingSessions {
    pub(crate) fn new(config: ClientConfig) -> Self {
        BlockingSessions {
            config,
            idle: Mutex::new(Vec::new()),
            closed: watch::channel(false).0,
        }
    }

    /// Fails every pop still waiting and releases idle sessions.
    pub(crate) fn close(&self) {
        if self.closed.send_replace(true) {
            return;
        }
        let idle = std::mem::take(&mut *self.idle.lock());
        trace!(sessions = idle.len(), "closing idle blocking sessions");
    }

    fn pop<T>(self: &Arc<Self>, command: Command, decode: fn(Reply) -> ClientResult<Option<T>>) -> Operation<Option<T>>
    where
        T: Send + 'static,
    {
        let (reply, slot) = oneshot::channel();
        tokio::spawn(self.clone().run(command, reply));
        Operation::pending(slot, decode)
    }

    async fn run(self: Arc<Self>, command: Command, mut reply: SlotSender) {
        let mut closed = self.closed.subscribe();
        let session = tokio::select! {
            session = self.acquire() => session,
            _ = reply.closed() => return,
            _ = wait_closed(&mut closed) => Err(TransportError::Closed),
        };
        let session = match session {
            Ok(session) => session,
            Err(err) => {
                let _ = reply.send(Err(err));
                return;
            }
        };

        let answer = session.submit(&command);
        tokio::select! {
            raw = answer => {
                let raw = raw.unwrap_or(Err(TransportError::Closed));
                let healthy = raw.is_ok();
                let _ = reply.send(raw);
                if healthy {
                    self.return_session(session);
                }
            }
            _ = reply.closed() => {
                debug!(session = session.id(), "blocking pop detached, closing its session");
            }
            _ = wait_closed(&mut closed) => {
                let _ = reply.send(Err(TransportError::Closed));
            }
        }
    }

    async fn acquire(&self) -> Result<Connection, TransportError> {
        while let Some(session) = self.pop_idle() {
            if !session.is_closed() {
                return Ok(session);
            }
        }
        let session = Connection::dial(&self.config).await?;
        debug!(session = session.id(), addr = %self.config.addr, "opened blocking session");
        Ok(session)
    }

    fn pop_idle(&self) -> Option<Connection> {
        self.idle.lock().pop()
    }

    fn return_session(&self, session: Connection) {
        // Checked under the lock so `close` cannot miss a returning session.
        let mut idle = self.idle.lock();
        if !*self.closed.borrow() && idle.len() < MAX_IDLE_SESSIONS {
            idle.push(session);
        }
    }
}

async fn wait_closed(closed: &mut watch::Receiver<bool>) {
    loop {
        let done = *closed.borrow_and_update();
        if done || closed.changed().await.is_err() {
            return;
        }
    }
}
