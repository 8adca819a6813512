//! Asynchronous operation handles.
//!
//! An [`Aio`] carries one outstanding send or receive at a time. Submitting
//! spawns a task that drives the operation; completion stores the outcome
//! on the handle, runs the optional callback, and wakes any waiter. The
//! callback runs before the handle is marked done, so once [`Aio::stop`]
//! returns the callback is guaranteed not to run again.
//!
//! Handles are cheap to clone and safe to drop mid-flight: the running
//! task keeps the shared state alive until the operation resolves.
//! Closing the socket resolves an in-flight operation as canceled;
//! submitting against an already-closed socket fails with `Closed`.

use std::sync::{Arc, Mutex};

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::message::Message;
use crate::socket::{SendError, Socket};

enum State {
    Idle,
    Pending { cancel: CancellationToken },
    Done { result: Result<()>, msg: Option<Message> },
}

type Callback = Box<dyn Fn() + Send + Sync + 'static>;

struct AioInner {
    state: Mutex<State>,
    done: Notify,
    callback: Option<Callback>,
}

impl AioInner {
    fn complete(&self, result: Result<()>, msg: Option<Message>) {
        if let Some(e) = result.as_ref().err() {
            tracing::trace!(error = %e, "async operation failed");
        }
        if let Some(cb) = &self.callback {
            cb();
        }
        *lock(&self.state) = State::Done { result, msg };
        self.done.notify_waiters();
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// Handle for one asynchronous send or receive at a time.
#[derive(Clone)]
pub struct Aio {
    inner: Arc<AioInner>,
}

impl Aio {
    /// A handle with no completion callback; pair it with [`Aio::wait`].
    pub fn new() -> Aio {
        Aio {
            inner: Arc::new(AioInner {
                state: Mutex::new(State::Idle),
                done: Notify::new(),
                callback: None,
            }),
        }
    }

    /// A handle whose callback runs on every completion, including
    /// cancellation. The callback must not block; do real work elsewhere.
    pub fn with_callback(callback: impl Fn() + Send + Sync + 'static) -> Aio {
        Aio {
            inner: Arc::new(AioInner {
                state: Mutex::new(State::Idle),
                done: Notify::new(),
                callback: Some(Box::new(callback)),
            }),
        }
    }

    /// Begin an asynchronous send. Fails with `Busy` while a previous
    /// operation is still in flight, handing the message back. A canceled
    /// send drops the message.
    pub fn send(&self, socket: &Socket, msg: Message) -> std::result::Result<(), SendError> {
        let cancel = match self.begin() {
            Ok(c) => c,
            Err(error) => return Err(SendError { msg, error }),
        };
        let inner = self.inner.clone();
        let socket = socket.clone();
        let was_open = !socket.is_closed();
        tokio::spawn(async move {
            let (result, msg) = tokio::select! {
                _ = cancel.cancelled() => (Err(Error::Canceled), None),
                r = socket.send(msg) => match r {
                    Ok(()) => (Ok(()), None),
                    // Close raced in after submission: the operation was
                    // outstanding, so it resolves as canceled.
                    Err(SendError { msg, error: Error::Closed }) if was_open => {
                        (Err(Error::Canceled), Some(msg))
                    }
                    // Hand the unsent message back through the handle.
                    Err(SendError { msg, error }) => (Err(error), Some(msg)),
                },
            };
            inner.complete(result, msg);
        });
        Ok(())
    }

    /// Begin an asynchronous receive. On success the message is retrieved
    /// with [`Aio::take_msg`].
    pub fn recv(&self, socket: &Socket) -> Result<()> {
        let cancel = self.begin()?;
        let inner = self.inner.clone();
        let socket = socket.clone();
        let was_open = !socket.is_closed();
        tokio::spawn(async move {
            let (result, msg) = tokio::select! {
                _ = cancel.cancelled() => (Err(Error::Canceled), None),
                r = socket.recv() => match r {
                    Ok(m) => (Ok(()), Some(m)),
                    // Close raced in after submission: the operation was
                    // outstanding, so it resolves as canceled.
                    Err(Error::Closed) if was_open => (Err(Error::Canceled), None),
                    Err(e) => (Err(e), None),
                },
            };
            inner.complete(result, msg);
        });
        Ok(())
    }

    fn begin(&self) -> Result<CancellationToken> {
        let mut st = lock(&self.inner.state);
        if matches!(*st, State::Pending { .. }) {
            return Err(Error::Busy);
        }
        let cancel = CancellationToken::new();
        *st = State::Pending { cancel: cancel.clone() };
        Ok(cancel)
    }

    /// Outcome of the last operation. `Busy` while one is in flight;
    /// `Ok(())` for a handle never used.
    pub fn result(&self) -> Result<()> {
        match &*lock(&self.inner.state) {
            State::Idle => Ok(()),
            State::Pending { .. } => Err(Error::Busy),
            State::Done { result, .. } => result.clone(),
        }
    }

    /// Take the message held by the handle: the received message after a
    /// successful receive, or the unsent one after a failed send.
    pub fn take_msg(&self) -> Option<Message> {
        match &mut *lock(&self.inner.state) {
            State::Done { msg, .. } => msg.take(),
            _ => None,
        }
    }

    /// Request cancellation of the in-flight operation, if any. The
    /// operation still completes (with `Canceled`) through the normal
    /// path; use [`Aio::wait`] or [`Aio::stop`] to observe it.
    pub fn cancel(&self) {
        if let State::Pending { cancel } = &*lock(&self.inner.state) {
            cancel.cancel();
        }
    }

    /// Wait until the handle is no longer busy.
    pub async fn wait(&self) {
        loop {
            let mut notified = std::pin::pin!(self.inner.done.notified());
            notified.as_mut().enable();
            if !matches!(*lock(&self.inner.state), State::Pending { .. }) {
                return;
            }
            notified.await;
        }
    }

    /// Cancel and wait. After this returns no callback will fire until
    /// the handle is reused.
    pub async fn stop(&self) {
        self.cancel();
        self.wait().await;
    }
}

impl Default for Aio {
    fn default() -> Self {
        Aio::new()
    }
}

impl std::fmt::Debug for Aio {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match &*lock(&self.inner.state) {
            State::Idle => "idle",
            State::Pending { .. } => "pending",
            State::Done { .. } => "done",
        };
        f.debug_struct("Aio").field("state", &state).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::Protocol;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_fresh_handle_is_ok() {
        let aio = Aio::new();
        assert_eq!(aio.result(), Ok(()));
        assert!(aio.take_msg().is_none());
        aio.wait().await; // not pending, returns immediately
    }

    #[tokio::test]
    async fn test_recv_then_cancel() {
        let s = Socket::open(Protocol::Pull);
        let aio = Aio::new();
        aio.recv(&s).unwrap();
        assert_eq!(aio.result(), Err(Error::Busy));
        aio.stop().await;
        assert_eq!(aio.result(), Err(Error::Canceled));
    }

    #[tokio::test]
    async fn test_one_operation_at_a_time() {
        let s = Socket::open(Protocol::Pull);
        let aio = Aio::new();
        aio.recv(&s).unwrap();
        assert_eq!(aio.recv(&s), Err(Error::Busy));
        aio.stop().await;
    }

    #[tokio::test]
    async fn test_send_failure_hands_message_back() {
        let s = Socket::open(Protocol::Pair);
        s.close().unwrap();
        let aio = Aio::new();
        aio.send(&s, Message::from_slice(b"kept")).unwrap();
        aio.wait().await;
        assert_eq!(aio.result(), Err(Error::Closed));
        assert_eq!(aio.take_msg().unwrap().body(), b"kept");
    }

    #[tokio::test]
    async fn test_socket_close_cancels_pending_recv() {
        let s = Socket::open(Protocol::Pull);
        let aio = Aio::new();
        aio.recv(&s).unwrap();
        tokio::task::yield_now().await;
        s.close().unwrap();
        aio.wait().await;
        assert_eq!(aio.result(), Err(Error::Canceled));
    }

    #[tokio::test]
    async fn test_socket_close_cancels_pending_send() {
        let s = Socket::open(Protocol::Pair);
        let aio = Aio::new();
        aio.send(&s, Message::from_slice(b"held")).unwrap();
        tokio::task::yield_now().await;
        s.close().unwrap();
        aio.wait().await;
        assert_eq!(aio.result(), Err(Error::Canceled));
        assert_eq!(aio.take_msg().unwrap().body(), b"held");
    }

    #[tokio::test]
    async fn test_callback_runs_on_completion() {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let aio = Aio::with_callback(move || {
            h.fetch_add(1, Ordering::SeqCst);
        });
        let s = Socket::open(Protocol::Pull);
        aio.recv(&s).unwrap();
        aio.stop().await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_roundtrip_through_aio() {
        let a = Socket::open(Protocol::Push);
        let b = Socket::open(Protocol::Pull);
        b.listen("inproc://aio-roundtrip").await.unwrap();
        a.dial("inproc://aio-roundtrip").await.unwrap();

        let rx = Aio::new();
        rx.recv(&b).unwrap();
        let tx = Aio::new();
        tx.send(&a, Message::from_slice(b"work")).unwrap();
        tx.wait().await;
        assert_eq!(tx.result(), Ok(()));
        rx.wait().await;
        assert_eq!(rx.result(), Ok(()));
        assert_eq!(rx.take_msg().unwrap().body(), b"work");
    }

    #[tokio::test]
    async fn test_drop_while_pending_is_safe() {
        let s = Socket::open(Protocol::Pull);
        let aio = Aio::new();
        aio.recv(&s).unwrap();
        drop(aio); // the running task owns the shared state
        s.close().unwrap();
        tokio::task::yield_now().await;
    }
}
