//! # Cancellable Operations
//!
//! Purpose: Model every command as one in-flight request awaiting exactly
//! one reply, with at-most-once completion and idempotent cancellation.
//!
//! ## Design Principles
//! 1. **Eager Send**: The request is queued on the connection when the
//!    `Operation` is created, before anyone awaits it.
//! 2. **Decode at the Edge**: Each operation carries its own decoder; store
//!    error replies are split off before the decoder runs.
//! 3. **Detach, Never Un-send**: Cancelling only detaches the continuation.
//!    The store still executes the request and the connection still consumes
//!    its reply, which keeps request/reply pairing intact.
//!
//! ## Consumption Styles
//!
//! ```text
//! conn.get(key).await?                       // future; drop to detach
//! conn.get(key).spawn(on_ok, on_err) -> CancelToken
//! ```
//!
//! `CancelToken::cancel` and completion race on a single atomic state
//! transition out of `PENDING`; whichever lands first wins, so a handler
//! never runs after a successful cancel and never runs twice.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};
use std::task::{Context, Poll};

use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tracing::trace;

use crate::error::{ClientError, ClientResult, StoreError, TransportError};
use crate::resp::Reply;

/// Reply slot filled by the connection task.
pub(crate) type ReplySlot = oneshot::Receiver<Result<Reply, TransportError>>;

type Decoder<T> = Box<dyn FnOnce(Reply) -> ClientResult<T> + Send>;

/// A single command in flight.
///
/// Resolves to the decoded reply. Dropping it before completion detaches the
/// caller; the reply is still read off the wire and discarded.
#[must_use = "the request is already sent; await or spawn the operation to observe its reply"]
pub struct Operation<T> {
    state: State<T>,
}

enum State<T> {
    Pending {
        reply: ReplySlot,
        decode: Option<Decoder<T>>,
    },
    Ready(Option<ClientResult<T>>),
}

// No field is ever pinned; the reply slot and the boxed decoder are both
// `Unpin`, and `T` is only moved out by value.
impl<T> Unpin for Operation<T> {}

impl<T: Send + 'static> Operation<T> {
    /// Operation waiting on a reply slot.
    pub(crate) fn pending<D>(reply: ReplySlot, decode: D) -> Self
    where
        D: FnOnce(Reply) -> ClientResult<T> + Send + 'static,
    {
        Operation {
            state: State::Pending {
                reply,
                decode: Some(Box::new(decode)),
            },
        }
    }

    /// Already-completed operation; used for client-side short-circuits.
    pub fn ready(value: T) -> Self {
        Operation {
            state: State::Ready(Some(Ok(value))),
        }
    }

    /// Already-failed operation; nothing was sent.
    pub fn failed(err: ClientError) -> Self {
        Operation {
            state: State::Ready(Some(Err(err))),
        }
    }

    /// Applies a pure transform to the decoded value.
    pub fn map<U, F>(self, f: F) -> Operation<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        self.and_then(move |value| Ok(f(value)))
    }

    /// Applies a fallible transform to the decoded value, e.g. text
    /// decoding with an explicit encoding.
    pub fn and_then<U, F>(self, f: F) -> Operation<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> ClientResult<U> + Send + 'static,
    {
        match self.state {
            State::Pending { reply, decode } => Operation {
                state: State::Pending {
                    reply,
                    decode: decode.map(|decode| -> Decoder<U> {
                        Box::new(move |raw| decode(raw).and_then(f))
                    }),
                },
            },
            State::Ready(result) => Operation {
                state: State::Ready(result.map(|result| result.and_then(f))),
            },
        }
    }

    /// Drives the operation on the current tokio runtime and invokes exactly
    /// one handler, unless the returned token cancels it first.
    pub fn spawn<S, F>(self, on_success: S, on_failure: F) -> CancelToken
    where
        S: FnOnce(T) + Send + 'static,
        F: FnOnce(ClientError) + Send + 'static,
    {
        let token = CancelToken::new();
        let guard = token.clone();
        let task = tokio::spawn(async move {
            let result = self.await;
            if !guard.try_complete() {
                trace!("discarding reply of cancelled operation");
                return;
            }
            match result {
                Ok(value) => on_success(value),
                Err(err) => on_failure(err),
            }
        });
        // The token is not visible to the caller yet, so this always succeeds.
        let _ = token.inner.abort.set(task.abort_handle());
        token
    }
}

impl<T> Future for Operation<T> {
    type Output = ClientResult<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match &mut this.state {
            State::Ready(result) => {
                Poll::Ready(result.take().expect("operation polled after completion"))
            }
            State::Pending { reply, decode } => {
                let raw = match Pin::new(reply).poll(cx) {
                    Poll::Pending => return Poll::Pending,
                    Poll::Ready(raw) => raw,
                };
                let decode = decode.take().expect("operation polled after completion");
                this.state = State::Ready(None);
                Poll::Ready(complete(raw, decode))
            }
        }
    }
}

impl<T> fmt::Debug for Operation<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &self.state {
            State::Pending { .. } => "pending",
            State::Ready(Some(_)) => "ready",
            State::Ready(None) => "done",
        };
        f.debug_struct("Operation").field("state", &state).finish()
    }
}

fn complete<T>(
    raw: Result<Result<Reply, TransportError>, oneshot::error::RecvError>,
    decode: Decoder<T>,
) -> ClientResult<T> {
    match raw {
        // The connection task dropped the slot without answering.
        Err(_) => Err(TransportError::Closed.into()),
        Ok(Err(err)) => Err(err.into()),
        Ok(Ok(Reply::Error(message))) => Err(StoreError { message }.into()),
        Ok(Ok(reply)) => decode(reply),
    }
}

const PENDING: u8 = 0;
const COMPLETED: u8 = 1;
const CANCELLED: u8 = 2;

struct CancelInner {
    state: AtomicU8,
    abort: OnceLock<AbortHandle>,
}

/// Cancellation hook for a spawned operation.
///
/// Cloning yields another handle to the same operation.
#[derive(Clone)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

impl CancelToken {
    fn new() -> Self {
        CancelToken {
            inner: Arc::new(CancelInner {
                state: AtomicU8::new(PENDING),
                abort: OnceLock::new(),
            }),
        }
    }

    /// Cancels the operation.
    ///
    /// Returns `true` when this call detached the handlers, `false` when the
    /// operation had already completed or been cancelled. Safe to call any
    /// number of times, from any thread.
    pub fn cancel(&self) -> bool {
        let won = self
            .inner
            .state
            .compare_exchange(PENDING, CANCELLED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if won {
            trace!("operation cancelled");
            if let Some(abort) = self.inner.abort.get() {
                abort.abort();
            }
        }
        won
    }

    /// True once `cancel` has won.
    pub fn is_cancelled(&self) -> bool {
        self.inner.state.load(Ordering::Acquire) == CANCELLED
    }

    /// True once a handler has been (or is being) invoked.
    pub fn is_completed(&self) -> bool {
        self.inner.state.load(Ordering::Acquire) == COMPLETED
    }

    fn try_complete(&self) -> bool {
        self.inner
            .state
            .compare_exchange(PENDING, COMPLETED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.inner.state.load(Ordering::Acquire) {
            PENDING => "pending",
            COMPLETED => "completed",
            _ => "cancelled",
        };
        f.debug_struct("CancelToken").field("state", &state).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::sync::atomic::AtomicBool;
    use std::time::Duration;

    fn pending_int() -> (oneshot::Sender<Result<Reply, TransportError>>, Operation<i64>) {
        let (tx, rx) = oneshot::channel();
        let op = Operation::pending(rx, |reply| match reply {
            Reply::Integer(value) => Ok(value),
            other => Err(crate::error::DecodeError {
                expected: "integer",
                found: other.describe(),
            }
            .into()),
        });
        (tx, op)
    }

    #[tokio::test]
    async fn resolves_with_decoded_reply() {
        let (tx, op) = pending_int();
        tx.send(Ok(Reply::Integer(7))).unwrap();
        assert_eq!(op.await.unwrap(), 7);
    }

    #[tokio::test]
    async fn error_reply_becomes_store_error() {
        let (tx, op) = pending_int();
        tx.send(Ok(Reply::Error(Bytes::from_static(b"WRONGTYPE nope")))).unwrap();
        let err = op.await.unwrap_err();
        assert_eq!(err.as_store().unwrap().kind(), b"WRONGTYPE");
    }

    #[tokio::test]
    async fn dropped_slot_is_a_transport_error() {
        let (tx, op) = pending_int();
        drop(tx);
        assert!(matches!(op.await, Err(ClientError::Transport(TransportError::Closed))));
    }

    #[tokio::test]
    async fn map_and_ready_compose() {
        let (tx, op) = pending_int();
        tx.send(Ok(Reply::Integer(20))).unwrap();
        assert_eq!(op.map(|v| v * 2).await.unwrap(), 40);
        assert_eq!(Operation::ready(1u8).map(|v| v + 1).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn cancel_before_reply_suppresses_handlers() {
        let (tx, op) = pending_int();
        let fired = Arc::new(AtomicBool::new(false));
        let (ok_flag, err_flag) = (fired.clone(), fired.clone());
        let token = op.spawn(
            move |_| ok_flag.store(true, Ordering::SeqCst),
            move |_| err_flag.store(true, Ordering::SeqCst),
        );

        assert!(token.cancel());
        assert!(!token.cancel());
        let _ = tx.send(Ok(Reply::Integer(1)));
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(token.is_cancelled());
        assert!(!fired.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn cancel_after_completion_is_a_no_op() {
        let (tx, op) = pending_int();
        let (done_tx, done_rx) = oneshot::channel();
        let token = op.spawn(
            move |value| {
                let _ = done_tx.send(value);
            },
            |_| {},
        );
        tx.send(Ok(Reply::Integer(5))).unwrap();
        assert_eq!(done_rx.await.unwrap(), 5);
        assert!(!token.cancel());
        assert!(token.is_completed());
    }
}
