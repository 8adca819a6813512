//! Intra-process transport.
//!
//! Listeners claim a name in a process-global rendezvous table; dialers
//! look the name up and hand the listener one half of a freshly created
//! channel pair. No bytes are serialized — whole [`Message`] values move
//! across the channels, headers intact.

use std::collections::HashMap;
use std::sync::Mutex;

use once_cell::sync::Lazy;
use tokio::sync::mpsc;

use super::{Binding, BoxFuture, Link, Scheme, SockAddr, Transport, PIPE_QUEUE_DEPTH};
use crate::error::{Error, Result};
use crate::message::Message;

/// Rendezvous table: bound name -> channel the listener accepts on.
///
/// Short-held mutex, never held across an await.
static RENDEZVOUS: Lazy<Mutex<HashMap<String, mpsc::Sender<Link>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// The `inproc://` transport.
pub struct InprocTransport;

impl Transport for InprocTransport {
    fn scheme(&self) -> Scheme {
        Scheme::Inproc
    }

    fn bind(&self, addr: &SockAddr) -> BoxFuture<'static, Result<Box<dyn Binding>>> {
        let name = addr.host().to_string();
        Box::pin(async move {
            let (accept_tx, accept_rx) = mpsc::channel(16);
            {
                let mut table = RENDEZVOUS.lock().unwrap_or_else(|e| e.into_inner());
                if let Some(existing) = table.get(&name) {
                    // A closed sender means the previous binding is gone
                    // but its drop has not swept the entry yet.
                    if !existing.is_closed() {
                        return Err(Error::AddressInUse);
                    }
                }
                table.insert(name.clone(), accept_tx);
            }
            tracing::debug!(name = %name, "inproc bound");
            Ok(Box::new(InprocBinding { name, accept_rx }) as Box<dyn Binding>)
        })
    }

    fn dial(&self, addr: &SockAddr) -> BoxFuture<'static, Result<Link>> {
        let name = addr.host().to_string();
        let remote = addr.to_string();
        Box::pin(async move {
            let accept_tx = {
                let table = RENDEZVOUS.lock().unwrap_or_else(|e| e.into_inner());
                match table.get(&name) {
                    Some(tx) if !tx.is_closed() => tx.clone(),
                    _ => return Err(Error::ConnectionRefused),
                }
            };

            let (a_tx, a_rx) = mpsc::channel::<Message>(PIPE_QUEUE_DEPTH);
            let (b_tx, b_rx) = mpsc::channel::<Message>(PIPE_QUEUE_DEPTH);

            let listener_link = Link {
                tx: b_tx,
                rx: a_rx,
                remote: remote.clone(),
            };
            let dialer_link = Link {
                tx: a_tx,
                rx: b_rx,
                remote,
            };

            // Listener went away between lookup and hand-off.
            accept_tx
                .send(listener_link)
                .await
                .map_err(|_| Error::ConnectionRefused)?;

            Ok(dialer_link)
        })
    }
}

struct InprocBinding {
    name: String,
    accept_rx: mpsc::Receiver<Link>,
}

impl Binding for InprocBinding {
    fn accept(&mut self) -> BoxFuture<'_, Result<Link>> {
        Box::pin(async move {
            // The sender half lives in the rendezvous table for as long as
            // this binding exists, so recv can only fail after drop.
            self.accept_rx.recv().await.ok_or(Error::Closed)
        })
    }
}

impl Drop for InprocBinding {
    fn drop(&mut self) {
        // Fields drop after this body; close explicitly so the table
        // entry's sender reads as closed below.
        self.accept_rx.close();
        let mut table = RENDEZVOUS.lock().unwrap_or_else(|e| e.into_inner());
        // Only sweep our own entry; a new binding may have replaced a
        // stale one under the same name.
        if table.get(&self.name).is_some_and(|tx| tx.is_closed()) {
            table.remove(&self.name);
        }
        tracing::debug!(name = %self.name, "inproc unbound");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(name: &str) -> SockAddr {
        SockAddr::parse(&format!("inproc://{name}")).unwrap()
    }

    #[tokio::test]
    async fn test_bind_dial_exchanges_messages() {
        let t = InprocTransport;
        let mut binding = t.bind(&addr("xchg")).await.unwrap();

        let dial = t.dial(&addr("xchg"));
        let (accepted, dialed) = tokio::join!(binding.accept(), dial);
        let mut accepted = accepted.unwrap();
        let dialed = dialed.unwrap();

        dialed.tx.send(Message::from_slice(b"hello")).await.unwrap();
        let got = accepted.rx.recv().await.unwrap();
        assert_eq!(got.body(), b"hello");
    }

    #[tokio::test]
    async fn test_double_bind_address_in_use() {
        let t = InprocTransport;
        let _first = t.bind(&addr("dup")).await.unwrap();
        assert!(matches!(t.bind(&addr("dup")).await, Err(Error::AddressInUse)));
    }

    #[tokio::test]
    async fn test_rebind_after_drop() {
        let t = InprocTransport;
        let first = t.bind(&addr("rebind")).await.unwrap();
        drop(first);
        assert!(t.bind(&addr("rebind")).await.is_ok());
    }

    #[tokio::test]
    async fn test_dial_unbound_refused() {
        let t = InprocTransport;
        assert!(matches!(
            t.dial(&addr("nobody-home")).await,
            Err(Error::ConnectionRefused)
        ));
    }

    #[tokio::test]
    async fn test_header_survives_transfer() {
        let t = InprocTransport;
        let mut binding = t.bind(&addr("hdr")).await.unwrap();
        let dial = t.dial(&addr("hdr"));
        let (accepted, dialed) = tokio::join!(binding.accept(), dial);
        let mut accepted = accepted.unwrap();
        let dialed = dialed.unwrap();

        let mut msg = Message::from_slice(b"body");
        msg.header_push_u32(99);
        dialed.tx.send(msg).await.unwrap();

        let mut got = accepted.rx.recv().await.unwrap();
        assert_eq!(got.header_pop_u32(), Some(99));
        assert_eq!(got.body(), b"body");
    }
}
