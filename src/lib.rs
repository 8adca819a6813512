//! Scalable messaging patterns over pluggable transports.
//!
//! A [`Socket`] is opened for one [`Protocol`] (pair, request/reply,
//! publish/subscribe, pipeline, bus, survey) and connected to peers with
//! [dialers and listeners](endpoint). Established connections become
//! pipes owned by the socket; the protocol's state machine decides which
//! pipes each sent message goes to and which received messages reach the
//! application.
//!
//! The async API is the primary surface:
//!
//! ```no_run
//! use polysock::{Message, Protocol, Socket};
//!
//! # async fn demo() -> polysock::Result<()> {
//! let server = Socket::open(Protocol::Rep);
//! server.listen("inproc://greeter").await?;
//!
//! let client = Socket::open(Protocol::Req);
//! client.dial("inproc://greeter").await?;
//!
//! client.send(Message::from_slice(b"hello")).await.map_err(|e| e.error)?;
//! let request = server.recv().await?;
//! server.send(request).await.map_err(|e| e.error)?;
//! let reply = client.recv().await?;
//! assert_eq!(reply.body(), b"hello");
//! # Ok(())
//! # }
//! ```
//!
//! Two other surfaces wrap it: [`Aio`] for submit/complete style
//! operations with callbacks, and [`api`] for foreign-function bindings
//! that want integer handles and status codes instead of Rust types.

pub mod aio;
pub mod api;
pub mod endpoint;
pub mod error;
pub mod message;
pub mod pipe;
pub mod proto;
mod registry;
pub mod socket;
pub mod stats;
pub mod transport;

pub use aio::Aio;
pub use endpoint::{Dialer, Listener};
pub use error::{strerror, Error, Result};
pub use message::Message;
pub use pipe::PipeId;
pub use proto::Protocol;
pub use socket::{SendError, Socket};
pub use stats::{StatRef, Stats};
pub use transport::SockAddr;
