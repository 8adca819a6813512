//! Socket core: the user-facing handle.
//!
//! A socket owns its pipes and endpoints and delegates all routing to the
//! protocol state machine chosen at open time. Application tasks call
//! [`Socket::send`]/[`Socket::recv`] (or their non-blocking variants);
//! pipe reader tasks owned by the library feed inbound traffic through
//! the state machine's filter into one bounded delivery queue.
//!
//! Locking is deliberately coarse and short: one dispatch lock around
//! the state machine, one around the pipe map, neither ever held across
//! channel I/O. Broadcast sends are best-effort per pipe — a full peer
//! queue drops that copy rather than stalling the rest of the fan-out.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, oneshot, Mutex as AsyncMutex, Notify};
use tokio_util::sync::CancellationToken;

use crate::endpoint::{Dialer, EndpointCore, Listener};
use crate::error::{Error, Result};
use crate::message::Message;
use crate::pipe::{PipeHandle, PipeId, PipeMonitor, PipeStats};
use crate::proto::{Protocol, RecvAction, SendPlan, StateMachine};
use crate::stats::{Counters, Stats, StatsBuilder};
use crate::transport::Link;

/// Depth of the per-socket delivery queue between pipe readers and the
/// application.
const RECV_QUEUE_DEPTH: usize = 128;

static NEXT_SOCKET_ID: AtomicU32 = AtomicU32::new(1);

/// A failed send, handing the unsent message back to the caller.
///
/// Ownership of a message transfers only on success; on failure the
/// caller keeps it and decides whether to retry, keep, or drop it.
#[derive(Debug)]
pub struct SendError {
    /// The message that was not sent.
    pub msg: Message,
    /// Why the send failed.
    pub error: Error,
}

impl std::fmt::Display for SendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.error.fmt(f)
    }
}

impl std::error::Error for SendError {}

impl From<SendError> for Error {
    fn from(e: SendError) -> Error {
        e.error
    }
}

#[derive(Debug, Default)]
struct Options {
    send_timeout: Option<Duration>,
    recv_timeout: Option<Duration>,
}

pub(crate) struct SocketCore {
    id: u32,
    protocol: Protocol,
    /// Dispatch lock: every state-machine hook runs under it, briefly.
    sm: Mutex<Box<dyn StateMachine>>,
    /// Live pipes in attach order (BTreeMap keeps rotation stable).
    pipes: Mutex<BTreeMap<u32, PipeHandle>>,
    next_pipe_id: AtomicU32,
    recv_tx: mpsc::Sender<(PipeId, Message)>,
    recv_rx: AsyncMutex<mpsc::Receiver<(PipeId, Message)>>,
    /// Set once close begins; no new operation starts after that.
    close_started: AtomicBool,
    closed: CancellationToken,
    /// Wakes senders parked on an empty pipe set.
    pipe_event: Notify,
    opts: Mutex<Options>,
    endpoints: Mutex<Vec<Arc<EndpointCore>>>,
    pub(crate) counters: Counters,
}

/// The user-facing socket handle. Cheap to clone; all clones refer to the
/// same underlying socket.
#[derive(Clone)]
pub struct Socket {
    core: Arc<SocketCore>,
}

fn lock<'a, T>(m: &'a Mutex<T>) -> std::sync::MutexGuard<'a, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// Earliest of two optional deadlines.
fn earliest(a: Option<Instant>, b: Option<Instant>) -> Option<Instant> {
    match (a, b) {
        (Some(x), Some(y)) => Some(x.min(y)),
        (x, None) => x,
        (None, y) => y,
    }
}

/// Run `fut` bounded by an optional absolute deadline, mapping expiry to
/// [`Error::Timeout`].
async fn deadline_guard<T, F>(deadline: Option<Instant>, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match deadline {
        Some(d) => match tokio::time::timeout_at(d.into(), fut).await {
            Ok(r) => r,
            Err(_) => Err(Error::Timeout),
        },
        None => fut.await,
    }
}

impl Socket {
    /// Open a socket for the given protocol variant.
    ///
    /// # Example
    ///
    /// ```
    /// use polysock::{Protocol, Socket};
    ///
    /// let s = Socket::open(Protocol::Pair);
    /// assert_eq!(s.protocol(), Protocol::Pair);
    /// ```
    pub fn open(protocol: Protocol) -> Socket {
        let (recv_tx, recv_rx) = mpsc::channel(RECV_QUEUE_DEPTH);
        let core = Arc::new(SocketCore {
            id: NEXT_SOCKET_ID.fetch_add(1, Ordering::Relaxed),
            protocol,
            sm: Mutex::new(protocol.state_machine()),
            pipes: Mutex::new(BTreeMap::new()),
            next_pipe_id: AtomicU32::new(1),
            recv_tx,
            recv_rx: AsyncMutex::new(recv_rx),
            close_started: AtomicBool::new(false),
            closed: CancellationToken::new(),
            pipe_event: Notify::new(),
            opts: Mutex::new(Options::default()),
            endpoints: Mutex::new(Vec::new()),
            counters: Counters::default(),
        });
        tracing::debug!(socket = core.id, protocol = protocol.name(), "socket opened");
        Socket { core }
    }

    /// Unique id of this socket.
    pub fn id(&self) -> u32 {
        self.core.id
    }

    /// The protocol variant this socket was opened with.
    pub fn protocol(&self) -> Protocol {
        self.core.protocol
    }

    /// True once close has begun.
    pub fn is_closed(&self) -> bool {
        self.core.close_started.load(Ordering::SeqCst)
    }

    // ------------------------------------------------------------------
    // Send / receive
    // ------------------------------------------------------------------

    /// Send a message, blocking until a pipe accepts it, the send timeout
    /// expires, or the socket closes.
    ///
    /// On failure the message comes back inside the [`SendError`].
    pub async fn send(&self, msg: Message) -> std::result::Result<(), SendError> {
        self.send_impl(msg).await
    }

    /// Non-blocking send: fails with `WouldBlock` instead of waiting.
    pub fn try_send(&self, mut msg: Message) -> std::result::Result<(), SendError> {
        let core = &self.core;

        if core.close_started.load(Ordering::SeqCst) {
            return Err(SendError { msg, error: Error::Closed });
        }
        if !lock(&core.sm).can_send() {
            return Err(SendError { msg, error: Error::NotSupported });
        }

        loop {
            let ids: Vec<PipeId> = lock(&core.pipes).values().map(|p| p.id).collect();
            let plan = match lock(&core.sm).route_send(&mut msg, &ids) {
                Ok(p) => p,
                Err(error) => return Err(SendError { msg, error }),
            };

            match plan {
                SendPlan::Discard => return Ok(()),
                SendPlan::Broadcast => {
                    core.broadcast(&msg);
                    return Ok(());
                }
                SendPlan::NoPipes => {
                    return Err(SendError { msg, error: Error::WouldBlock });
                }
                SendPlan::Unicast(id) => {
                    let target = lock(&core.pipes)
                        .get(&id.raw())
                        .map(|p| (p.tx.clone(), p.stats.clone()));
                    let Some((tx, stats)) = target else {
                        // Pipe vanished between planning and dispatch.
                        continue;
                    };
                    let len = msg.len();
                    match tx.try_send(msg) {
                        Ok(()) => {
                            stats.note_tx(len);
                            core.counters.note_tx(len);
                            return Ok(());
                        }
                        // A dead-but-undetached pipe reads the same as a
                        // full one here: nothing sendable right now.
                        Err(mpsc::error::TrySendError::Full(m))
                        | Err(mpsc::error::TrySendError::Closed(m)) => {
                            return Err(SendError { msg: m, error: Error::WouldBlock });
                        }
                    }
                }
                SendPlan::Balanced(id) => {
                    let targets = core.rotation(id);
                    if targets.is_empty() {
                        // Set changed since planning; plan again.
                        continue;
                    }
                    let len = msg.len();
                    let mut pending = msg;
                    for (tx, stats) in targets {
                        match tx.try_send(pending) {
                            Ok(()) => {
                                stats.note_tx(len);
                                core.counters.note_tx(len);
                                return Ok(());
                            }
                            Err(mpsc::error::TrySendError::Full(m))
                            | Err(mpsc::error::TrySendError::Closed(m)) => pending = m,
                        }
                    }
                    // Every pipe is full (or dead).
                    return Err(SendError { msg: pending, error: Error::WouldBlock });
                }
            }
        }
    }

    async fn send_impl(&self, mut msg: Message) -> std::result::Result<(), SendError> {
        let core = &self.core;

        if core.close_started.load(Ordering::SeqCst) {
            return Err(SendError { msg, error: Error::Closed });
        }
        if !lock(&core.sm).can_send() {
            return Err(SendError { msg, error: Error::NotSupported });
        }

        let deadline = lock(&core.opts).send_timeout.map(|d| Instant::now() + d);

        loop {
            // Snapshot the live pipe set, then plan under the dispatch lock.
            let ids: Vec<PipeId> = lock(&core.pipes).values().map(|p| p.id).collect();
            let plan = match lock(&core.sm).route_send(&mut msg, &ids) {
                Ok(p) => p,
                Err(error) => return Err(SendError { msg, error }),
            };

            match plan {
                SendPlan::Discard => return Ok(()),

                SendPlan::Broadcast => {
                    core.broadcast(&msg);
                    return Ok(());
                }

                SendPlan::Unicast(id) => {
                    let target = lock(&core.pipes)
                        .get(&id.raw())
                        .map(|p| (p.tx.clone(), p.stats.clone()));
                    let Some((tx, stats)) = target else {
                        // Pipe vanished between planning and dispatch.
                        continue;
                    };

                    let permit = tokio::select! {
                        _ = core.closed.cancelled() => {
                            return Err(SendError { msg, error: Error::Closed });
                        }
                        r = deadline_guard(deadline, async {
                            tx.reserve().await.map_err(|_| Error::Closed)
                        }) => match r {
                            Ok(p) => p,
                            Err(Error::Closed) => {
                                // Pipe died under us; let its reader detach
                                // it before planning again.
                                tokio::task::yield_now().await;
                                continue;
                            }
                            Err(error) => return Err(SendError { msg, error }),
                        },
                    };

                    let len = msg.len();
                    permit.send(msg);
                    stats.note_tx(len);
                    core.counters.note_tx(len);
                    return Ok(());
                }

                SendPlan::Balanced(id) => {
                    // Preferred pipe first, then the rest of the rotation;
                    // wait only when every queue is full.
                    let targets = core.rotation(id);
                    if targets.is_empty() {
                        // Set changed since planning; plan again.
                        continue;
                    }
                    let len = msg.len();
                    let mut pending = msg;
                    let mut first_full = None;
                    for (tx, stats) in targets {
                        match tx.try_send(pending) {
                            Ok(()) => {
                                stats.note_tx(len);
                                core.counters.note_tx(len);
                                return Ok(());
                            }
                            Err(mpsc::error::TrySendError::Full(m)) => {
                                pending = m;
                                if first_full.is_none() {
                                    first_full = Some((tx, stats));
                                }
                            }
                            Err(mpsc::error::TrySendError::Closed(m)) => pending = m,
                        }
                    }
                    msg = pending;
                    let Some((tx, stats)) = first_full else {
                        // Every pipe was dead; let the readers detach them.
                        tokio::task::yield_now().await;
                        continue;
                    };

                    let permit = tokio::select! {
                        _ = core.closed.cancelled() => {
                            return Err(SendError { msg, error: Error::Closed });
                        }
                        r = deadline_guard(deadline, async {
                            tx.reserve().await.map_err(|_| Error::Closed)
                        }) => match r {
                            Ok(p) => p,
                            Err(Error::Closed) => {
                                // Pipe died under us; let its reader detach
                                // it before planning again.
                                tokio::task::yield_now().await;
                                continue;
                            }
                            Err(error) => return Err(SendError { msg, error }),
                        },
                    };

                    permit.send(msg);
                    stats.note_tx(len);
                    core.counters.note_tx(len);
                    return Ok(());
                }

                SendPlan::NoPipes => {
                    // Register for the wakeup before re-checking, so an
                    // attach racing with us cannot be missed.
                    let mut notified = std::pin::pin!(core.pipe_event.notified());
                    notified.as_mut().enable();
                    if !lock(&core.pipes).is_empty() {
                        continue;
                    }
                    let waited = tokio::select! {
                        _ = core.closed.cancelled() => Err(Error::Closed),
                        r = deadline_guard(deadline, async {
                            notified.await;
                            Ok(())
                        }) => r,
                    };
                    if let Err(error) = waited {
                        return Err(SendError { msg, error });
                    }
                }
            }
        }
    }

    /// Receive a message, blocking until one is delivered, the receive
    /// timeout (or survey deadline) expires, or the socket closes.
    pub async fn recv(&self) -> Result<Message> {
        let core = &self.core;

        if core.close_started.load(Ordering::SeqCst) {
            return Err(Error::Closed);
        }

        let sm_deadline = {
            let sm = lock(&core.sm);
            if !sm.can_recv() {
                return Err(Error::NotSupported);
            }
            sm.check_recv()?;
            sm.recv_deadline()
        };
        if sm_deadline.is_some_and(|d| d <= Instant::now()) {
            return Err(Error::Timeout);
        }

        let opt_deadline = lock(&core.opts).recv_timeout.map(|d| Instant::now() + d);
        let deadline = earliest(sm_deadline, opt_deadline);

        let (pipe, mut msg) = deadline_guard(deadline, async {
            let mut rx = core.recv_rx.lock().await;
            tokio::select! {
                _ = core.closed.cancelled() => Err(Error::Closed),
                item = rx.recv() => item.ok_or(Error::Closed),
            }
        })
        .await?;

        lock(&core.sm).on_app_recv(pipe, &mut msg)?;
        core.counters.note_rx(msg.len());
        Ok(msg)
    }

    /// Non-blocking receive: fails with `WouldBlock` when nothing is
    /// queued.
    pub fn try_recv(&self) -> Result<Message> {
        let core = &self.core;

        if core.close_started.load(Ordering::SeqCst) {
            return Err(Error::Closed);
        }
        {
            let sm = lock(&core.sm);
            if !sm.can_recv() {
                return Err(Error::NotSupported);
            }
            sm.check_recv()?;
            if sm.recv_deadline().is_some_and(|d| d <= Instant::now()) {
                return Err(Error::Timeout);
            }
        }

        let mut rx = core.recv_rx.try_lock().map_err(|_| Error::WouldBlock)?;
        match rx.try_recv() {
            Ok((pipe, mut msg)) => {
                drop(rx);
                lock(&core.sm).on_app_recv(pipe, &mut msg)?;
                core.counters.note_rx(msg.len());
                Ok(msg)
            }
            Err(mpsc::error::TryRecvError::Empty) => Err(Error::WouldBlock),
            Err(mpsc::error::TryRecvError::Disconnected) => Err(Error::Closed),
        }
    }

    // ------------------------------------------------------------------
    // Options
    // ------------------------------------------------------------------

    /// Bound blocking sends. `None` waits forever.
    pub fn set_send_timeout(&self, timeout: Option<Duration>) {
        lock(&self.core.opts).send_timeout = timeout;
    }

    /// Bound blocking receives. `None` waits forever.
    pub fn set_recv_timeout(&self, timeout: Option<Duration>) {
        lock(&self.core.opts).recv_timeout = timeout;
    }

    /// Current send timeout.
    pub fn send_timeout(&self) -> Option<Duration> {
        lock(&self.core.opts).send_timeout
    }

    /// Current receive timeout.
    pub fn recv_timeout(&self) -> Option<Duration> {
        lock(&self.core.opts).recv_timeout
    }

    /// Add a topic-prefix subscription. Sub sockets only; anything else
    /// fails with `NotSupported`.
    pub fn subscribe(&self, topic: &[u8]) -> Result<()> {
        lock(&self.core.sm).subscribe(topic)
    }

    /// Remove a topic-prefix subscription.
    pub fn unsubscribe(&self, topic: &[u8]) -> Result<()> {
        lock(&self.core.sm).unsubscribe(topic)
    }

    /// Set how long a surveyor accepts responses after each survey.
    pub fn set_survey_time(&self, window: Duration) -> Result<()> {
        lock(&self.core.sm).set_survey_time(window)
    }

    // ------------------------------------------------------------------
    // Endpoints
    // ------------------------------------------------------------------

    /// Create and start a dialer, awaiting the first connection attempt.
    pub async fn dial(&self, url: &str) -> Result<Dialer> {
        let dialer = Dialer::create(self, url)?;
        dialer.start(false).await?;
        self.register_endpoint(dialer.core());
        Ok(dialer)
    }

    /// Create and start a dialer without waiting for the first attempt.
    pub async fn dial_async(&self, url: &str) -> Result<Dialer> {
        let dialer = Dialer::create(self, url)?;
        dialer.start(true).await?;
        self.register_endpoint(dialer.core());
        Ok(dialer)
    }

    /// Bind and start accepting on an address.
    pub async fn listen(&self, url: &str) -> Result<Listener> {
        let listener = Listener::create(self, url).await?;
        listener.start()?;
        self.register_endpoint(listener.core());
        Ok(listener)
    }

    pub(crate) fn register_endpoint(&self, ep: Arc<EndpointCore>) {
        lock(&self.core.endpoints).push(ep);
    }

    pub(crate) fn core_weak(&self) -> Weak<SocketCore> {
        Arc::downgrade(&self.core)
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Close the socket: wake every blocked caller with `Closed`, cancel
    /// pending asynchronous operations, tear down pipes and endpoints.
    ///
    /// A second close fails with `Closed` and changes nothing.
    pub fn close(&self) -> Result<()> {
        let core = &self.core;
        if core.close_started.swap(true, Ordering::SeqCst) {
            return Err(Error::Closed);
        }
        tracing::debug!(socket = core.id, "socket closing");
        core.closed.cancel();
        let endpoints: Vec<_> = lock(&core.endpoints).drain(..).collect();
        for ep in endpoints {
            ep.shutdown();
        }
        lock(&core.pipes).clear();
        Ok(())
    }

    /// Number of live pipes.
    pub fn pipe_count(&self) -> usize {
        lock(&self.core.pipes).len()
    }

    /// Take a read-only statistics snapshot for this socket.
    pub fn stats(&self) -> Stats {
        let core = &self.core;
        let c = &core.counters;
        let mut b = StatsBuilder::new();
        let root = b.node(None, format!("socket.{}", core.id), u64::from(core.id));
        b.node(Some(root), "tx_msgs", c.tx_msgs.load(Ordering::Relaxed));
        b.node(Some(root), "tx_bytes", c.tx_bytes.load(Ordering::Relaxed));
        b.node(Some(root), "rx_msgs", c.rx_msgs.load(Ordering::Relaxed));
        b.node(Some(root), "rx_bytes", c.rx_bytes.load(Ordering::Relaxed));
        b.node(Some(root), "rx_dropped", c.rx_dropped.load(Ordering::Relaxed));
        b.node(Some(root), "pipes_opened", c.pipes_opened.load(Ordering::Relaxed));
        b.node(Some(root), "pipes_closed", c.pipes_closed.load(Ordering::Relaxed));

        let pipes = lock(&core.pipes);
        let pipes_node = b.node(Some(root), "pipes", pipes.len() as u64);
        for p in pipes.values() {
            let pn = b.node(Some(pipes_node), format!("pipe.{}", p.id.raw()), u64::from(p.id.raw()));
            b.node(Some(pn), "tx_msgs", p.stats.tx_msgs.load(Ordering::Relaxed));
            b.node(Some(pn), "tx_bytes", p.stats.tx_bytes.load(Ordering::Relaxed));
            b.node(Some(pn), "rx_msgs", p.stats.rx_msgs.load(Ordering::Relaxed));
            b.node(Some(pn), "rx_bytes", p.stats.rx_bytes.load(Ordering::Relaxed));
        }
        b.finish()
    }
}

impl std::fmt::Debug for Socket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Socket")
            .field("id", &self.core.id)
            .field("protocol", &self.core.protocol)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl SocketCore {
    pub(crate) fn is_closing(&self) -> bool {
        self.close_started.load(Ordering::SeqCst)
    }

    /// Pipe channels in rotation order starting at `first`.
    fn rotation(&self, first: PipeId) -> Vec<(mpsc::Sender<Message>, Arc<PipeStats>)> {
        let pipes = lock(&self.pipes);
        let mut ordered: Vec<_> = pipes
            .values()
            .map(|p| (p.id, p.tx.clone(), p.stats.clone()))
            .collect();
        if let Some(pos) = ordered.iter().position(|(id, ..)| *id == first) {
            ordered.rotate_left(pos);
        }
        ordered.into_iter().map(|(_, tx, stats)| (tx, stats)).collect()
    }

    /// Best-effort copy to every pipe: a full or dead peer loses its copy
    /// rather than stalling the fan-out.
    fn broadcast(&self, msg: &Message) {
        let targets: Vec<(mpsc::Sender<Message>, Arc<PipeStats>)> = lock(&self.pipes)
            .values()
            .map(|p| (p.tx.clone(), p.stats.clone()))
            .collect();
        for (tx, stats) in &targets {
            match tx.try_send(msg.clone()) {
                Ok(()) => stats.note_tx(msg.len()),
                Err(_) => tracing::trace!(socket = self.id, "broadcast copy dropped"),
            }
        }
        self.counters.note_tx(msg.len());
    }

    /// Adopt an established connection as a new pipe.
    ///
    /// Rejects the link (dropping it, which the peer sees as a
    /// disconnect) when the protocol refuses another attachment or the
    /// socket is closing. Returns a monitor resolving when the pipe dies.
    pub(crate) fn add_link(self: &Arc<Self>, link: Link) -> Result<PipeMonitor> {
        if self.is_closing() {
            return Err(Error::Closed);
        }

        let id;
        let stats = Arc::new(PipeStats::default());
        {
            let mut pipes = lock(&self.pipes);
            {
                let sm = lock(&self.sm);
                if !sm.can_attach(pipes.len()) {
                    tracing::debug!(socket = self.id, "attachment refused by protocol");
                    return Err(Error::Busy);
                }
            }
            id = PipeId(self.next_pipe_id.fetch_add(1, Ordering::Relaxed));
            pipes.insert(
                id.raw(),
                PipeHandle {
                    id,
                    tx: link.tx,
                    remote: link.remote.clone(),
                    stats: stats.clone(),
                },
            );
            lock(&self.sm).pipe_attached(id);
        }
        self.counters.pipes_opened.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(socket = self.id, pipe = id.raw(), remote = %link.remote, "pipe attached");

        let (closed_tx, closed_rx) = oneshot::channel();
        tokio::spawn(Self::pipe_reader(self.clone(), id, link.rx, stats, closed_tx));
        self.pipe_event.notify_waiters();
        Ok(PipeMonitor { rx: closed_rx })
    }

    async fn pipe_reader(
        core: Arc<SocketCore>,
        id: PipeId,
        mut rx: mpsc::Receiver<Message>,
        stats: Arc<PipeStats>,
        _closed_tx: oneshot::Sender<()>,
    ) {
        loop {
            let mut msg = tokio::select! {
                _ = core.closed.cancelled() => break,
                m = rx.recv() => match m {
                    Some(m) => m,
                    None => break, // peer went away
                },
            };
            stats.note_rx(msg.len());

            let action = lock(&core.sm).filter_recv(id, &mut msg);
            match action {
                RecvAction::Deliver => {
                    let delivered = tokio::select! {
                        _ = core.closed.cancelled() => false,
                        r = core.recv_tx.send((id, msg)) => r.is_ok(),
                    };
                    if !delivered {
                        break;
                    }
                }
                RecvAction::Drop => core.counters.note_rx_dropped(),
            }
        }
        core.detach_pipe(id);
    }

    fn detach_pipe(&self, id: PipeId) {
        let removed = lock(&self.pipes).remove(&id.raw());
        if removed.is_some() {
            lock(&self.sm).pipe_detached(id);
            self.counters.pipes_closed.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(socket = self.id, pipe = id.raw(), "pipe detached");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_and_identity() {
        let a = Socket::open(Protocol::Pair);
        let b = Socket::open(Protocol::Bus);
        assert_ne!(a.id(), b.id());
        assert_eq!(b.protocol(), Protocol::Bus);
        assert_eq!(a.pipe_count(), 0);
    }

    #[test]
    fn test_close_is_idempotent() {
        let s = Socket::open(Protocol::Pair);
        assert!(s.close().is_ok());
        assert_eq!(s.close(), Err(Error::Closed));
        assert!(s.is_closed());
    }

    #[tokio::test]
    async fn test_operations_after_close_fail_closed() {
        let s = Socket::open(Protocol::Pair);
        s.close().unwrap();
        let err = s.send(Message::from_slice(b"x")).await.unwrap_err();
        assert_eq!(err.error, Error::Closed);
        assert_eq!(err.msg.body(), b"x");
        assert_eq!(s.recv().await, Err(Error::Closed));
        assert_eq!(s.try_recv(), Err(Error::Closed));
    }

    #[test]
    fn test_pub_cannot_recv_push_cannot_recv() {
        let p = Socket::open(Protocol::Pub);
        assert_eq!(p.try_recv(), Err(Error::NotSupported));
        let push = Socket::open(Protocol::Push);
        assert_eq!(push.try_recv(), Err(Error::NotSupported));
    }

    #[tokio::test]
    async fn test_sub_cannot_send() {
        let s = Socket::open(Protocol::Sub);
        let err = s.send(Message::from_slice(b"x")).await.unwrap_err();
        assert_eq!(err.error, Error::NotSupported);
    }

    #[test]
    fn test_try_send_no_pipes_would_block() {
        let s = Socket::open(Protocol::Push);
        let err = s.try_send(Message::from_slice(b"job")).unwrap_err();
        assert_eq!(err.error, Error::WouldBlock);
        assert_eq!(err.msg.body(), b"job");
    }

    fn attach_test_pipe(
        s: &Socket,
        depth: usize,
        name: &str,
    ) -> (mpsc::Receiver<Message>, mpsc::Sender<Message>) {
        let (out_tx, out_rx) = mpsc::channel(depth);
        let (in_tx, in_rx) = mpsc::channel(depth);
        s.core
            .add_link(Link {
                tx: out_tx,
                rx: in_rx,
                remote: name.to_string(),
            })
            .unwrap();
        (out_rx, in_tx)
    }

    #[tokio::test]
    async fn test_push_falls_over_to_pipe_with_capacity() {
        let s = Socket::open(Protocol::Push);
        let (mut a_rx, _a_in) = attach_test_pipe(&s, 1, "test://a");
        let (mut b_rx, _b_in) = attach_test_pipe(&s, 4, "test://b");

        s.try_send(Message::from_slice(b"1")).unwrap(); // fills pipe a
        s.try_send(Message::from_slice(b"2")).unwrap(); // pipe b
        // The cursor is back on the full pipe; the send must land on b.
        s.try_send(Message::from_slice(b"3")).unwrap();
        s.try_send(Message::from_slice(b"4")).unwrap(); // pipe b again

        // Blocking send with the cursor on the full pipe must not park
        // there while b still has room.
        s.set_send_timeout(Some(Duration::from_millis(200)));
        s.send(Message::from_slice(b"5")).await.unwrap();

        assert_eq!(a_rx.recv().await.unwrap().body(), b"1");
        assert_eq!(b_rx.recv().await.unwrap().body(), b"2");
        assert_eq!(b_rx.recv().await.unwrap().body(), b"3");
        assert_eq!(b_rx.recv().await.unwrap().body(), b"4");
        assert_eq!(b_rx.recv().await.unwrap().body(), b"5");
    }

    #[tokio::test]
    async fn test_push_blocks_only_when_every_pipe_full() {
        let s = Socket::open(Protocol::Push);
        let (mut a_rx, _a_in) = attach_test_pipe(&s, 1, "test://a");
        let (_b_rx, _b_in) = attach_test_pipe(&s, 1, "test://b");

        s.try_send(Message::from_slice(b"1")).unwrap();
        s.try_send(Message::from_slice(b"2")).unwrap();
        let err = s.try_send(Message::from_slice(b"3")).unwrap_err();
        assert_eq!(err.error, Error::WouldBlock);
        assert_eq!(err.msg.body(), b"3");

        // Draining either pipe makes room again.
        assert_eq!(a_rx.recv().await.unwrap().body(), b"1");
        s.try_send(Message::from_slice(b"4")).unwrap();
    }

    #[test]
    fn test_subscribe_wrong_protocol() {
        let s = Socket::open(Protocol::Pair);
        assert_eq!(s.subscribe(b"t"), Err(Error::NotSupported));
    }

    #[test]
    fn test_timeout_options_roundtrip() {
        let s = Socket::open(Protocol::Pair);
        assert_eq!(s.recv_timeout(), None);
        s.set_recv_timeout(Some(Duration::from_millis(250)));
        s.set_send_timeout(Some(Duration::from_secs(1)));
        assert_eq!(s.recv_timeout(), Some(Duration::from_millis(250)));
        assert_eq!(s.send_timeout(), Some(Duration::from_secs(1)));
    }

    #[tokio::test]
    async fn test_recv_timeout_expires() {
        let s = Socket::open(Protocol::Pull);
        s.set_recv_timeout(Some(Duration::from_millis(20)));
        assert_eq!(s.recv().await, Err(Error::Timeout));
    }

    #[test]
    fn test_stats_snapshot_shape() {
        let s = Socket::open(Protocol::Pair);
        let stats = s.stats();
        let root = stats.root().unwrap();
        assert!(root.name().starts_with("socket."));
        let names: Vec<&str> = {
            let mut v = Vec::new();
            let mut cur = root.child();
            while let Some(n) = cur {
                v.push(n.name());
                cur = n.next();
            }
            v
        };
        assert!(names.contains(&"tx_msgs"));
        assert!(names.contains(&"rx_dropped"));
        assert!(names.contains(&"pipes"));
    }
}
