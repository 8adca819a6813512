//! Endpoints: dialers and listeners.
//!
//! Both kinds validate their address at creation, so a bad URL fails
//! before any connection attempt. A dialer maintains exactly one pipe,
//! redialing with exponential backoff whenever the connection drops; a
//! listener accepts any number of pipes until it is closed. Endpoints
//! hold only a weak reference to their socket, which owns them, not the
//! other way round.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::pipe::PipeMonitor;
use crate::socket::{Socket, SocketCore};
use crate::transport::{self, Binding, SockAddr, Transport};

/// First retry delay after a failed or dropped connection.
const INITIAL_BACKOFF: Duration = Duration::from_millis(100);
/// Retry delays double up to this cap.
const MAX_BACKOFF: Duration = Duration::from_secs(30);

pub(crate) struct EndpointCore {
    addr: SockAddr,
    socket: Weak<SocketCore>,
    transport: Arc<dyn Transport>,
    started: AtomicBool,
    cancel: CancellationToken,
    /// Listener only: held between bind (at create) and start, at which
    /// point the accept loop takes ownership.
    binding: Mutex<Option<Box<dyn Binding>>>,
}

impl EndpointCore {
    fn new(socket: &Socket, addr: SockAddr, transport: Arc<dyn Transport>) -> Arc<Self> {
        Arc::new(EndpointCore {
            addr,
            socket: socket.core_weak(),
            transport,
            started: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            binding: Mutex::new(None),
        })
    }

    /// Stop the endpoint: cancel its background task and release any
    /// still-held binding. Idempotent.
    pub(crate) fn shutdown(&self) {
        self.cancel.cancel();
        self.binding.lock().unwrap_or_else(|e| e.into_inner()).take();
    }

    fn mark_started(&self) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(Error::Busy);
        }
        Ok(())
    }

    /// One dial attempt: connect and attach the resulting pipe.
    async fn connect_once(&self) -> Result<PipeMonitor> {
        let socket = self.socket.upgrade().ok_or(Error::Closed)?;
        if socket.is_closing() {
            return Err(Error::Closed);
        }
        let link = self.transport.dial(&self.addr).await?;
        socket.add_link(link)
    }
}

/// Outgoing endpoint. Created against a socket and an address; once
/// started it keeps one pipe alive, reconnecting as needed.
#[derive(Clone)]
pub struct Dialer {
    core: Arc<EndpointCore>,
}

impl Dialer {
    /// Create a dialer without connecting yet. The address is validated
    /// here; an unrecognized or unimplemented scheme fails immediately.
    pub fn create(socket: &Socket, url: &str) -> Result<Dialer> {
        if socket.is_closed() {
            return Err(Error::Closed);
        }
        let addr = SockAddr::parse(url)?;
        let transport = transport::lookup(&addr)?;
        Ok(Dialer {
            core: EndpointCore::new(socket, addr, transport),
        })
    }

    /// Start dialing. With `nonblock` false the first attempt completes
    /// before this returns and its failure is reported here; with
    /// `nonblock` true all attempts, including the first, run in the
    /// background. Either way, later reconnects are automatic.
    pub async fn start(&self, nonblock: bool) -> Result<()> {
        self.core.mark_started()?;
        let core = self.core.clone();
        if nonblock {
            tokio::spawn(dial_loop(core, None));
            return Ok(());
        }
        let monitor = core.connect_once().await?;
        tracing::debug!(url = %core.addr, "dialer connected");
        tokio::spawn(dial_loop(core, Some(monitor)));
        Ok(())
    }

    /// Stop the dialer. The pipe it created stays up until the socket or
    /// the peer tears it down.
    pub fn close(&self) {
        self.core.shutdown();
    }

    /// The address this dialer connects to.
    pub fn url(&self) -> String {
        self.core.addr.to_string()
    }

    pub(crate) fn core(&self) -> Arc<EndpointCore> {
        self.core.clone()
    }
}

/// Maintain one live pipe: wait out the current one, then reconnect with
/// backoff until it sticks.
async fn dial_loop(core: Arc<EndpointCore>, mut monitor: Option<PipeMonitor>) {
    loop {
        if let Some(m) = monitor.take() {
            tokio::select! {
                _ = core.cancel.cancelled() => return,
                _ = m.closed() => {
                    tracing::debug!(url = %core.addr, "pipe lost, redialing");
                }
            }
            // Damp churn when the peer accepts and immediately drops us
            // (a pair socket that is already paired does exactly that).
            tokio::select! {
                _ = core.cancel.cancelled() => return,
                _ = tokio::time::sleep(INITIAL_BACKOFF) => {}
            }
        }

        let mut backoff = INITIAL_BACKOFF;
        loop {
            if core.cancel.is_cancelled() {
                return;
            }
            match core.connect_once().await {
                Ok(m) => {
                    tracing::debug!(url = %core.addr, "dialer connected");
                    monitor = Some(m);
                    break;
                }
                Err(Error::Closed) => return,
                Err(e) => {
                    tracing::debug!(url = %core.addr, error = %e, delay_ms = backoff.as_millis() as u64, "dial failed");
                    tokio::select! {
                        _ = core.cancel.cancelled() => return,
                        _ = tokio::time::sleep(backoff) => {}
                    }
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
            }
        }
    }
}

/// Incoming endpoint. Binds its address at creation and accepts
/// connections once started.
#[derive(Clone)]
pub struct Listener {
    core: Arc<EndpointCore>,
}

impl Listener {
    /// Create a listener, claiming the address immediately. A second
    /// listener on the same address fails here with `AddressInUse`.
    pub async fn create(socket: &Socket, url: &str) -> Result<Listener> {
        if socket.is_closed() {
            return Err(Error::Closed);
        }
        let addr = SockAddr::parse(url)?;
        let transport = transport::lookup(&addr)?;
        let binding = transport.bind(&addr).await?;
        let core = EndpointCore::new(socket, addr, transport);
        *core.binding.lock().unwrap_or_else(|e| e.into_inner()) = Some(binding);
        Ok(Listener { core })
    }

    /// Start accepting connections.
    pub fn start(&self) -> Result<()> {
        self.core.mark_started()?;
        let binding = self
            .core
            .binding
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .ok_or(Error::IncorrectState)?;
        tracing::debug!(url = %self.core.addr, "listener started");
        tokio::spawn(accept_loop(self.core.clone(), binding));
        Ok(())
    }

    /// Stop accepting and release the address. Existing pipes stay up.
    pub fn close(&self) {
        self.core.shutdown();
    }

    /// The address this listener is bound to.
    pub fn url(&self) -> String {
        self.core.addr.to_string()
    }

    pub(crate) fn core(&self) -> Arc<EndpointCore> {
        self.core.clone()
    }
}

async fn accept_loop(core: Arc<EndpointCore>, mut binding: Box<dyn Binding>) {
    loop {
        let link = tokio::select! {
            _ = core.cancel.cancelled() => return,
            r = binding.accept() => match r {
                Ok(link) => link,
                Err(e) => {
                    tracing::debug!(url = %core.addr, error = %e, "accept loop stopped");
                    return;
                }
            },
        };
        let Some(socket) = core.socket.upgrade() else { return };
        match socket.add_link(link) {
            Ok(_monitor) => {} // listeners do not track individual pipes
            Err(e) => {
                // Attachment refused (protocol full, or closing); the
                // dropped link reads as a disconnect on the dialer side.
                tracing::debug!(url = %core.addr, error = %e, "inbound connection refused");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;
    use crate::proto::Protocol;

    #[tokio::test]
    async fn test_dialer_without_listener_refused() {
        let s = Socket::open(Protocol::Pair);
        let d = Dialer::create(&s, "inproc://ep-no-listener").unwrap();
        assert_eq!(d.start(false).await, Err(Error::ConnectionRefused));
    }

    #[tokio::test]
    async fn test_invalid_address_at_create() {
        let s = Socket::open(Protocol::Pair);
        assert!(matches!(
            Dialer::create(&s, "inproc//missing-sep"),
            Err(Error::InvalidAddress)
        ));
        assert!(matches!(
            Listener::create(&s, "tcp://nohost").await,
            Err(Error::InvalidAddress)
        ));
    }

    #[tokio::test]
    async fn test_unsupported_scheme_at_create() {
        let s = Socket::open(Protocol::Pair);
        assert!(matches!(
            Dialer::create(&s, "tcp://127.0.0.1:5555"),
            Err(Error::NotSupported)
        ));
    }

    #[tokio::test]
    async fn test_double_start_is_busy() {
        let a = Socket::open(Protocol::Pair);
        let l = Listener::create(&a, "inproc://ep-double-start").await.unwrap();
        l.start().unwrap();
        assert_eq!(l.start(), Err(Error::Busy));
    }

    #[tokio::test]
    async fn test_address_in_use_until_released() {
        let a = Socket::open(Protocol::Pair);
        let l = Listener::create(&a, "inproc://ep-addr-reuse").await.unwrap();
        let b = Socket::open(Protocol::Pair);
        assert!(matches!(
            Listener::create(&b, "inproc://ep-addr-reuse").await,
            Err(Error::AddressInUse)
        ));
        // Closing before start drops the held binding and frees the name.
        l.close();
        assert!(Listener::create(&b, "inproc://ep-addr-reuse").await.is_ok());
    }

    #[tokio::test]
    async fn test_listen_dial_roundtrip() {
        let a = Socket::open(Protocol::Pair);
        let b = Socket::open(Protocol::Pair);
        a.listen("inproc://ep-roundtrip").await.unwrap();
        b.dial("inproc://ep-roundtrip").await.unwrap();

        b.send(Message::from_slice(b"hello")).await.unwrap();
        let got = a.recv().await.unwrap();
        assert_eq!(got.body(), b"hello");
    }
}
