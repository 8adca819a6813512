//! Transport layer: address parsing and the pluggable transport seam.
//!
//! Addresses follow `scheme://host:port` (network transports) or
//! `scheme://path` (rendezvous transports). Syntax is validated eagerly at
//! endpoint creation, so `InvalidAddress` surfaces at create time, never
//! at connect time.
//!
//! Only the `inproc` transport ships in-tree; `ipc`, `tcp`, `tls+tcp` and
//! `ws` are recognized schemes whose implementations plug in through the
//! [`Transport`] trait.

mod inproc;

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::message::Message;

/// Boxed future used at the transport seam, keeping the traits object-safe.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Queue depth of each direction of an established connection. Full queues
/// are what back-pressure and `WouldBlock` are made of.
pub const PIPE_QUEUE_DEPTH: usize = 128;

/// A validated transport address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SockAddr {
    scheme: Scheme,
    /// Host for network schemes, rendezvous name for path schemes.
    target: String,
    port: Option<u16>,
}

/// Recognized address schemes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    /// Intra-process rendezvous.
    Inproc,
    /// Inter-process (filesystem path).
    Ipc,
    /// Plain TCP.
    Tcp,
    /// TLS over TCP.
    TlsTcp,
    /// WebSocket.
    Ws,
}

impl Scheme {
    fn as_str(self) -> &'static str {
        match self {
            Scheme::Inproc => "inproc",
            Scheme::Ipc => "ipc",
            Scheme::Tcp => "tcp",
            Scheme::TlsTcp => "tls+tcp",
            Scheme::Ws => "ws",
        }
    }

    /// True for schemes whose address part is `host:port`.
    fn has_port(self) -> bool {
        matches!(self, Scheme::Tcp | Scheme::TlsTcp | Scheme::Ws)
    }
}

impl SockAddr {
    /// Parse and validate an address string.
    ///
    /// # Example
    ///
    /// ```
    /// use polysock::transport::SockAddr;
    ///
    /// let addr = SockAddr::parse("inproc://cache").unwrap();
    /// assert_eq!(addr.scheme_str(), "inproc");
    /// assert!(SockAddr::parse("inproc://").is_err());
    /// assert!(SockAddr::parse("tcp://host").is_err()); // missing port
    /// ```
    pub fn parse(url: &str) -> Result<Self> {
        let (scheme_str, rest) = url.split_once("://").ok_or(Error::InvalidAddress)?;

        let scheme = match scheme_str {
            "inproc" => Scheme::Inproc,
            "ipc" => Scheme::Ipc,
            "tcp" => Scheme::Tcp,
            "tls+tcp" => Scheme::TlsTcp,
            "ws" => Scheme::Ws,
            _ => return Err(Error::InvalidAddress),
        };

        if rest.is_empty() {
            return Err(Error::InvalidAddress);
        }

        if scheme.has_port() {
            let (host, port_str) = rest.rsplit_once(':').ok_or(Error::InvalidAddress)?;
            if host.is_empty() {
                return Err(Error::InvalidAddress);
            }
            let port: u16 = port_str.parse().map_err(|_| Error::InvalidAddress)?;
            Ok(Self {
                scheme,
                target: host.to_string(),
                port: Some(port),
            })
        } else {
            Ok(Self {
                scheme,
                target: rest.to_string(),
                port: None,
            })
        }
    }

    /// The address scheme.
    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    /// The scheme as a string (`"inproc"`, `"tcp"`, ...).
    pub fn scheme_str(&self) -> &'static str {
        self.scheme.as_str()
    }

    /// Host for network schemes, rendezvous name/path otherwise.
    pub fn host(&self) -> &str {
        &self.target
    }

    /// Port for network schemes, `None` otherwise.
    pub fn port(&self) -> Option<u16> {
        self.port
    }
}

impl fmt::Display for SockAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.port {
            Some(p) => write!(f, "{}://{}:{}", self.scheme.as_str(), self.target, p),
            None => write!(f, "{}://{}", self.scheme.as_str(), self.target),
        }
    }
}

/// One direction-pair of message channels for an established connection.
///
/// The transport hands this to the socket, which wraps it in a
/// [`Pipe`](crate::pipe) and owns it from then on.
#[derive(Debug)]
pub struct Link {
    /// Outgoing messages toward the peer.
    pub tx: mpsc::Sender<Message>,
    /// Incoming messages from the peer.
    pub rx: mpsc::Receiver<Message>,
    /// Remote address, for diagnostics and stats.
    pub remote: String,
}

/// An active bind: yields a [`Link`] per accepted connection.
///
/// Dropping the binding releases the address.
pub trait Binding: Send {
    /// Wait for the next inbound connection.
    fn accept(&mut self) -> BoxFuture<'_, Result<Link>>;
}

/// A transport implementation for one scheme.
pub trait Transport: Send + Sync + 'static {
    /// Scheme this transport serves.
    fn scheme(&self) -> Scheme;

    /// Claim the address and start accepting. Fails synchronously with
    /// `AddressInUse` when the address is taken.
    fn bind(&self, addr: &SockAddr) -> BoxFuture<'static, Result<Box<dyn Binding>>>;

    /// Connect to a bound peer. Fails with `ConnectionRefused` when no
    /// listener is present.
    fn dial(&self, addr: &SockAddr) -> BoxFuture<'static, Result<Link>>;
}

/// Look up the transport for an address.
///
/// Recognized-but-unimplemented schemes report `NotSupported`; address
/// syntax problems were already caught by [`SockAddr::parse`].
pub fn lookup(addr: &SockAddr) -> Result<Arc<dyn Transport>> {
    match addr.scheme() {
        Scheme::Inproc => Ok(Arc::new(inproc::InprocTransport)),
        Scheme::Ipc | Scheme::Tcp | Scheme::TlsTcp | Scheme::Ws => Err(Error::NotSupported),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_inproc() {
        let addr = SockAddr::parse("inproc://test1").unwrap();
        assert_eq!(addr.scheme(), Scheme::Inproc);
        assert_eq!(addr.host(), "test1");
        assert_eq!(addr.port(), None);
        assert_eq!(addr.to_string(), "inproc://test1");
    }

    #[test]
    fn test_parse_tcp_host_port() {
        let addr = SockAddr::parse("tcp://127.0.0.1:5555").unwrap();
        assert_eq!(addr.scheme(), Scheme::Tcp);
        assert_eq!(addr.host(), "127.0.0.1");
        assert_eq!(addr.port(), Some(5555));
        assert_eq!(addr.to_string(), "tcp://127.0.0.1:5555");
    }

    #[test]
    fn test_parse_ipc_path() {
        let addr = SockAddr::parse("ipc:///tmp/sock").unwrap();
        assert_eq!(addr.scheme(), Scheme::Ipc);
        assert_eq!(addr.host(), "/tmp/sock");
    }

    #[test]
    fn test_parse_rejects_bad_syntax() {
        assert_eq!(SockAddr::parse("no-scheme"), Err(Error::InvalidAddress));
        assert_eq!(SockAddr::parse("bogus://x"), Err(Error::InvalidAddress));
        assert_eq!(SockAddr::parse("inproc://"), Err(Error::InvalidAddress));
        assert_eq!(SockAddr::parse("tcp://hostonly"), Err(Error::InvalidAddress));
        assert_eq!(SockAddr::parse("tcp://host:notaport"), Err(Error::InvalidAddress));
        assert_eq!(SockAddr::parse("tcp://:5555"), Err(Error::InvalidAddress));
        assert_eq!(SockAddr::parse("tcp://host:99999"), Err(Error::InvalidAddress));
    }

    #[test]
    fn test_parse_tls_scheme() {
        let addr = SockAddr::parse("tls+tcp://example.org:443").unwrap();
        assert_eq!(addr.scheme(), Scheme::TlsTcp);
        assert_eq!(addr.port(), Some(443));
    }

    #[test]
    fn test_lookup_unimplemented_scheme() {
        let addr = SockAddr::parse("tcp://127.0.0.1:5555").unwrap();
        assert!(matches!(lookup(&addr), Err(Error::NotSupported)));
    }

    #[test]
    fn test_lookup_inproc() {
        let addr = SockAddr::parse("inproc://x").unwrap();
        assert!(lookup(&addr).is_ok());
    }
}
