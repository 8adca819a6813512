//! Flat, handle-based call surface for foreign-function bindings.
//!
//! Everything here works on positive `i32` handles and signed status
//! codes: operations return `0` for success or a positive error code
//! (see [`strerror`](crate::error::strerror)); creation calls return the
//! new handle, or the error code negated. No pointers cross this
//! boundary, and a stale or recycled handle fails with
//! `InvalidArgument` instead of touching a live object.
//!
//! Blocking calls park the calling thread on an internal runtime;
//! asynchronous completions run on that runtime's workers, so callbacks
//! must not block.

use once_cell::sync::Lazy;
use tokio::runtime::Runtime;

use crate::aio::Aio;
use crate::endpoint::{Dialer, Listener};
use crate::error::Error;
use crate::message::Message;
use crate::proto::Protocol;
use crate::registry::Registry;
use crate::socket::Socket;
use crate::stats::Stats;
use crate::transport::SockAddr;

/// With `recv`, fail with `WouldBlock` instead of waiting.
pub const FLAG_NONBLOCK: i32 = 2;

static RUNTIME: Lazy<Runtime> = Lazy::new(|| {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .thread_name("polysock-worker")
        .enable_all()
        .build()
        .expect("failed to start worker runtime")
});

static SOCKETS: Lazy<Registry<Socket>> = Lazy::new(Registry::new);
static DIALERS: Lazy<Registry<Dialer>> = Lazy::new(Registry::new);
static LISTENERS: Lazy<Registry<Listener>> = Lazy::new(Registry::new);
static MESSAGES: Lazy<Registry<Message>> = Lazy::new(Registry::new);
static AIOS: Lazy<Registry<Aio>> = Lazy::new(Registry::new);
static STATS: Lazy<Registry<Stats>> = Lazy::new(Registry::new);
static URLS: Lazy<Registry<SockAddr>> = Lazy::new(Registry::new);

/// Library version string.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

pub use crate::error::strerror;

fn status(r: crate::error::Result<()>) -> i32 {
    match r {
        Ok(()) => 0,
        Err(e) => e.code(),
    }
}

fn created<T>(reg: &Registry<T>, value: T) -> i32 {
    match reg.insert(value) {
        Some(h) => h,
        None => -Error::OutOfMemory.code(),
    }
}

const BAD_HANDLE: i32 = 3; // InvalidArgument

// ----------------------------------------------------------------------
// Sockets
// ----------------------------------------------------------------------

/// Open a socket for a protocol, returning its handle.
pub fn socket_open(protocol: Protocol) -> i32 {
    created(&SOCKETS, Socket::open(protocol))
}

/// Open a pair socket.
pub fn pair_open() -> i32 {
    socket_open(Protocol::Pair)
}

/// Open a requester socket.
pub fn req_open() -> i32 {
    socket_open(Protocol::Req)
}

/// Open a replier socket.
pub fn rep_open() -> i32 {
    socket_open(Protocol::Rep)
}

/// Open a publisher socket.
pub fn pub_open() -> i32 {
    socket_open(Protocol::Pub)
}

/// Open a subscriber socket.
pub fn sub_open() -> i32 {
    socket_open(Protocol::Sub)
}

/// Open a pipeline producer socket.
pub fn push_open() -> i32 {
    socket_open(Protocol::Push)
}

/// Open a pipeline consumer socket.
pub fn pull_open() -> i32 {
    socket_open(Protocol::Pull)
}

/// Open a bus socket.
pub fn bus_open() -> i32 {
    socket_open(Protocol::Bus)
}

/// Open a surveyor socket.
pub fn surveyor_open() -> i32 {
    socket_open(Protocol::Surveyor)
}

/// Open a respondent socket.
pub fn respondent_open() -> i32 {
    socket_open(Protocol::Respondent)
}

/// Close a socket and invalidate its handle.
pub fn socket_close(sock: i32) -> i32 {
    match SOCKETS.remove(sock) {
        Some(s) => status(s.close()),
        None => BAD_HANDLE,
    }
}

/// Numeric id of the socket behind a handle.
pub fn socket_id(sock: i32) -> i32 {
    match SOCKETS.with(sock, |s| s.id()) {
        Some(id) => id as i32,
        None => -BAD_HANDLE,
    }
}

/// Bind and start accepting; returns a listener handle.
pub fn listen(sock: i32, url: &str) -> i32 {
    let Some(socket) = SOCKETS.get(sock) else { return -BAD_HANDLE };
    match RUNTIME.block_on(socket.listen(url)) {
        Ok(l) => created(&LISTENERS, l),
        Err(e) => -e.code(),
    }
}

/// Connect, waiting for the first attempt; returns a dialer handle.
pub fn dial(sock: i32, url: &str) -> i32 {
    let Some(socket) = SOCKETS.get(sock) else { return -BAD_HANDLE };
    match RUNTIME.block_on(socket.dial(url)) {
        Ok(d) => created(&DIALERS, d),
        Err(e) => -e.code(),
    }
}

/// Send a copy of `data` on the socket.
pub fn send(sock: i32, data: &[u8], flags: i32) -> i32 {
    let Some(socket) = SOCKETS.get(sock) else { return BAD_HANDLE };
    let msg = Message::from_slice(data);
    let r = if flags & FLAG_NONBLOCK != 0 {
        let _guard = RUNTIME.enter();
        socket.try_send(msg)
    } else {
        RUNTIME.block_on(socket.send(msg))
    };
    match r {
        Ok(()) => 0,
        Err(e) => e.error.code(),
    }
}

/// Receive into `buf`, storing the message length in `len`.
///
/// A message longer than `buf` fails with `TruncatedMessage` and is
/// dropped rather than silently cut short.
pub fn recv(sock: i32, buf: &mut [u8], len: &mut usize, flags: i32) -> i32 {
    let Some(socket) = SOCKETS.get(sock) else { return BAD_HANDLE };
    let r = if flags & FLAG_NONBLOCK != 0 {
        let _guard = RUNTIME.enter();
        socket.try_recv()
    } else {
        RUNTIME.block_on(socket.recv())
    };
    match r {
        Ok(msg) => {
            *len = msg.len();
            if msg.len() > buf.len() {
                return Error::TruncatedMessage.code();
            }
            buf[..msg.len()].copy_from_slice(msg.body());
            0
        }
        Err(e) => e.code(),
    }
}

/// Send the message behind a handle. On success the message handle is
/// consumed; on failure the caller still owns it.
pub fn sendmsg(sock: i32, msg: i32, flags: i32) -> i32 {
    let Some(socket) = SOCKETS.get(sock) else { return BAD_HANDLE };
    let Some(m) = MESSAGES.get(msg) else { return BAD_HANDLE };
    let r = if flags & FLAG_NONBLOCK != 0 {
        let _guard = RUNTIME.enter();
        socket.try_send(m)
    } else {
        RUNTIME.block_on(socket.send(m))
    };
    match r {
        Ok(()) => {
            MESSAGES.remove(msg);
            0
        }
        Err(e) => e.error.code(),
    }
}

/// Receive a whole message, returning a new message handle.
pub fn recvmsg(sock: i32, flags: i32) -> i32 {
    let Some(socket) = SOCKETS.get(sock) else { return -BAD_HANDLE };
    let r = if flags & FLAG_NONBLOCK != 0 {
        let _guard = RUNTIME.enter();
        socket.try_recv()
    } else {
        RUNTIME.block_on(socket.recv())
    };
    match r {
        Ok(m) => created(&MESSAGES, m),
        Err(e) => -e.code(),
    }
}

// ----------------------------------------------------------------------
// Socket options
// ----------------------------------------------------------------------

/// Set the receive timeout in milliseconds; negative means unlimited.
pub fn socket_set_recv_timeout(sock: i32, ms: i64) -> i32 {
    match SOCKETS.with(sock, |s| {
        s.set_recv_timeout((ms >= 0).then(|| std::time::Duration::from_millis(ms as u64)))
    }) {
        Some(()) => 0,
        None => BAD_HANDLE,
    }
}

/// Set the send timeout in milliseconds; negative means unlimited.
pub fn socket_set_send_timeout(sock: i32, ms: i64) -> i32 {
    match SOCKETS.with(sock, |s| {
        s.set_send_timeout((ms >= 0).then(|| std::time::Duration::from_millis(ms as u64)))
    }) {
        Some(()) => 0,
        None => BAD_HANDLE,
    }
}

/// Current receive timeout in milliseconds; `-1` means unlimited.
pub fn socket_recv_timeout(sock: i32) -> i64 {
    match SOCKETS.with(sock, |s| s.recv_timeout()) {
        Some(Some(d)) => d.as_millis() as i64,
        Some(None) => -1,
        None => -i64::from(BAD_HANDLE),
    }
}

/// Current send timeout in milliseconds; `-1` means unlimited.
pub fn socket_send_timeout(sock: i32) -> i64 {
    match SOCKETS.with(sock, |s| s.send_timeout()) {
        Some(Some(d)) => d.as_millis() as i64,
        Some(None) => -1,
        None => -i64::from(BAD_HANDLE),
    }
}

/// Add a subscription topic prefix (Sub sockets only).
pub fn socket_subscribe(sock: i32, topic: &[u8]) -> i32 {
    match SOCKETS.with(sock, |s| s.subscribe(topic)) {
        Some(r) => status(r),
        None => BAD_HANDLE,
    }
}

/// Drop a subscription topic prefix.
pub fn socket_unsubscribe(sock: i32, topic: &[u8]) -> i32 {
    match SOCKETS.with(sock, |s| s.unsubscribe(topic)) {
        Some(r) => status(r),
        None => BAD_HANDLE,
    }
}

/// Set the surveyor response window in milliseconds.
pub fn socket_set_survey_time(sock: i32, ms: i64) -> i32 {
    if ms <= 0 {
        return Error::InvalidArgument.code();
    }
    match SOCKETS.with(sock, |s| {
        s.set_survey_time(std::time::Duration::from_millis(ms as u64))
    }) {
        Some(r) => status(r),
        None => BAD_HANDLE,
    }
}

// ----------------------------------------------------------------------
// Endpoints
// ----------------------------------------------------------------------

/// Create a dialer without starting it.
pub fn dialer_create(sock: i32, url: &str) -> i32 {
    let Some(socket) = SOCKETS.get(sock) else { return -BAD_HANDLE };
    match Dialer::create(&socket, url) {
        Ok(d) => created(&DIALERS, d),
        Err(e) => -e.code(),
    }
}

/// Start a dialer. With `FLAG_NONBLOCK` the first connection attempt
/// happens in the background and its failure is not reported here.
pub fn dialer_start(dialer: i32, flags: i32) -> i32 {
    let Some(d) = DIALERS.get(dialer) else { return BAD_HANDLE };
    status(RUNTIME.block_on(d.start(flags & FLAG_NONBLOCK != 0)))
}

/// Stop a dialer and invalidate its handle.
pub fn dialer_close(dialer: i32) -> i32 {
    match DIALERS.remove(dialer) {
        Some(d) => {
            d.close();
            0
        }
        None => BAD_HANDLE,
    }
}

/// Create a listener, claiming its address immediately.
pub fn listener_create(sock: i32, url: &str) -> i32 {
    let Some(socket) = SOCKETS.get(sock) else { return -BAD_HANDLE };
    match RUNTIME.block_on(Listener::create(&socket, url)) {
        Ok(l) => created(&LISTENERS, l),
        Err(e) => -e.code(),
    }
}

/// Start accepting on a listener.
pub fn listener_start(listener: i32) -> i32 {
    match LISTENERS.get(listener) {
        Some(l) => {
            let _guard = RUNTIME.enter();
            status(l.start())
        }
        None => BAD_HANDLE,
    }
}

/// Stop a listener and invalidate its handle.
pub fn listener_close(listener: i32) -> i32 {
    match LISTENERS.remove(listener) {
        Some(l) => {
            l.close();
            0
        }
        None => BAD_HANDLE,
    }
}

// ----------------------------------------------------------------------
// Messages
// ----------------------------------------------------------------------

/// Allocate a zero-filled message of `size` bytes.
pub fn msg_alloc(size: usize) -> i32 {
    match Message::alloc(size) {
        Ok(m) => created(&MESSAGES, m),
        Err(e) => -e.code(),
    }
}

/// Free a message and invalidate its handle.
pub fn msg_free(msg: i32) -> i32 {
    match MESSAGES.remove(msg) {
        Some(_) => 0,
        None => BAD_HANDLE,
    }
}

/// Body length of a message, or the error code negated.
pub fn msg_len(msg: i32) -> i64 {
    match MESSAGES.with(msg, |m| m.len()) {
        Some(n) => n as i64,
        None => -i64::from(BAD_HANDLE),
    }
}

/// Copy of the message body.
pub fn msg_body(msg: i32) -> Option<Vec<u8>> {
    MESSAGES.with(msg, |m| m.body().to_vec())
}

/// Append bytes to the end of the body.
pub fn msg_append(msg: i32, data: &[u8]) -> i32 {
    match MESSAGES.with_mut(msg, |m| m.append(data)) {
        Some(()) => 0,
        None => BAD_HANDLE,
    }
}

/// Prepend bytes to the front of the body.
pub fn msg_insert(msg: i32, data: &[u8]) -> i32 {
    match MESSAGES.with_mut(msg, |m| m.insert(data)) {
        Some(()) => 0,
        None => BAD_HANDLE,
    }
}

/// Remove `n` bytes from the front of the body.
pub fn msg_trim(msg: i32, n: usize) -> i32 {
    match MESSAGES.with_mut(msg, |m| m.trim(n)) {
        Some(r) => status(r),
        None => BAD_HANDLE,
    }
}

/// Remove `n` bytes from the end of the body.
pub fn msg_chop(msg: i32, n: usize) -> i32 {
    match MESSAGES.with_mut(msg, |m| m.chop(n)) {
        Some(r) => status(r),
        None => BAD_HANDLE,
    }
}

/// Empty the body.
pub fn msg_clear(msg: i32) -> i32 {
    match MESSAGES.with_mut(msg, |m| m.clear()) {
        Some(()) => 0,
        None => BAD_HANDLE,
    }
}

// ----------------------------------------------------------------------
// Asynchronous operations
// ----------------------------------------------------------------------

/// Allocate an async operation handle without a callback.
pub fn aio_alloc() -> i32 {
    created(&AIOS, Aio::new())
}

/// Allocate an async operation handle with a completion callback. The
/// callback runs on a worker thread and must not block.
pub fn aio_alloc_cb(callback: impl Fn() + Send + Sync + 'static) -> i32 {
    created(&AIOS, Aio::with_callback(callback))
}

/// Cancel any in-flight operation, wait for it to settle, and free the
/// handle. After this returns the callback will not fire.
pub fn aio_free(aio: i32) -> i32 {
    match AIOS.remove(aio) {
        Some(a) => {
            RUNTIME.block_on(a.stop());
            0
        }
        None => BAD_HANDLE,
    }
}

/// Begin an async send of the message behind `msg`. The message handle
/// is consumed; after a failed send the bytes are retrievable with
/// [`aio_get_msg`].
pub fn aio_send(aio: i32, sock: i32, msg: i32) -> i32 {
    let Some(a) = AIOS.get(aio) else { return BAD_HANDLE };
    let Some(socket) = SOCKETS.get(sock) else { return BAD_HANDLE };
    let Some(m) = MESSAGES.remove(msg) else { return BAD_HANDLE };
    let _guard = RUNTIME.enter();
    match a.send(&socket, m) {
        Ok(()) => 0,
        Err(e) => e.error.code(),
    }
}

/// Begin an async receive.
pub fn aio_recv(aio: i32, sock: i32) -> i32 {
    let Some(a) = AIOS.get(aio) else { return BAD_HANDLE };
    let Some(socket) = SOCKETS.get(sock) else { return BAD_HANDLE };
    let _guard = RUNTIME.enter();
    status(a.recv(&socket))
}

/// Result of the last completed operation; `Busy` while in flight.
pub fn aio_result(aio: i32) -> i32 {
    match AIOS.with(aio, |a| status(a.result())) {
        Some(code) => code,
        None => BAD_HANDLE,
    }
}

/// Block until the handle's operation settles.
pub fn aio_wait(aio: i32) -> i32 {
    match AIOS.get(aio) {
        Some(a) => {
            RUNTIME.block_on(a.wait());
            0
        }
        None => BAD_HANDLE,
    }
}

/// Request cancellation without waiting.
pub fn aio_cancel(aio: i32) -> i32 {
    match AIOS.with(aio, |a| a.cancel()) {
        Some(()) => 0,
        None => BAD_HANDLE,
    }
}

/// Take the message held by a completed handle (received message, or the
/// unsent one after a failed send) as a new message handle.
pub fn aio_get_msg(aio: i32) -> i32 {
    match AIOS.with(aio, |a| a.take_msg()) {
        Some(Some(m)) => created(&MESSAGES, m),
        Some(None) => -BAD_HANDLE,
        None => -BAD_HANDLE,
    }
}

// ----------------------------------------------------------------------
// URLs
// ----------------------------------------------------------------------

/// Parse and validate an address, returning a URL handle.
pub fn url_parse(url: &str) -> i32 {
    match SockAddr::parse(url) {
        Ok(a) => created(&URLS, a),
        Err(e) => -e.code(),
    }
}

/// Scheme of a parsed URL (`"inproc"`, `"tcp"`, ...).
pub fn url_scheme(url: i32) -> Option<&'static str> {
    URLS.with(url, |a| a.scheme_str())
}

/// Host (or rendezvous name) of a parsed URL.
pub fn url_host(url: i32) -> Option<String> {
    URLS.with(url, |a| a.host().to_string())
}

/// Port of a parsed URL; `-1` for schemes without one or a dead handle.
pub fn url_port(url: i32) -> i32 {
    URLS.with(url, |a| a.port())
        .flatten()
        .map(i32::from)
        .unwrap_or(-1)
}

/// Free a parsed URL and invalidate its handle.
pub fn url_free(url: i32) -> i32 {
    match URLS.remove(url) {
        Some(_) => 0,
        None => BAD_HANDLE,
    }
}

// ----------------------------------------------------------------------
// Statistics
// ----------------------------------------------------------------------

/// Snapshot a socket's statistics tree, returning a snapshot handle.
pub fn stats_get(sock: i32) -> i32 {
    match SOCKETS.with(sock, |s| s.stats()) {
        Some(stats) => created(&STATS, stats),
        None => -BAD_HANDLE,
    }
}

/// Free a statistics snapshot as one unit.
pub fn stats_free(snapshot: i32) -> i32 {
    match STATS.remove(snapshot) {
        Some(_) => 0,
        None => BAD_HANDLE,
    }
}

/// Root node of a snapshot, or `-1` when the snapshot is empty or the
/// handle is dead.
pub fn stat_root(snapshot: i32) -> i32 {
    STATS
        .with(snapshot, |s| s.root().map(|r| r.index() as i32))
        .flatten()
        .unwrap_or(-1)
}

/// Next sibling of a node, or `-1`.
pub fn stat_next(snapshot: i32, node: i32) -> i32 {
    if node < 0 {
        return -1;
    }
    STATS
        .with(snapshot, |s| {
            s.at(node as usize)
                .and_then(|r| r.next())
                .map(|r| r.index() as i32)
        })
        .flatten()
        .unwrap_or(-1)
}

/// First child of a node, or `-1`.
pub fn stat_child(snapshot: i32, node: i32) -> i32 {
    if node < 0 {
        return -1;
    }
    STATS
        .with(snapshot, |s| {
            s.at(node as usize)
                .and_then(|r| r.child())
                .map(|r| r.index() as i32)
        })
        .flatten()
        .unwrap_or(-1)
}

/// Name of a node.
pub fn stat_name(snapshot: i32, node: i32) -> Option<String> {
    if node < 0 {
        return None;
    }
    STATS
        .with(snapshot, |s| s.at(node as usize).map(|r| r.name().to_string()))
        .flatten()
}

/// Value of a node, or `-1` for a dead handle or bad node.
pub fn stat_value(snapshot: i32, node: i32) -> i64 {
    if node < 0 {
        return -1;
    }
    STATS
        .with(snapshot, |s| s.at(node as usize).map(|r| r.value() as i64))
        .flatten()
        .unwrap_or(-1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::strerror;

    #[test]
    fn test_version_matches_package() {
        assert_eq!(version(), env!("CARGO_PKG_VERSION"));
    }

    #[test]
    fn test_bad_handles_rejected() {
        assert_eq!(socket_close(0), BAD_HANDLE);
        assert_eq!(socket_close(-1), BAD_HANDLE);
        assert_eq!(msg_free(999_999), BAD_HANDLE);
        assert_eq!(aio_free(42), BAD_HANDLE);
        assert_eq!(strerror(BAD_HANDLE), "invalid argument");
    }

    #[test]
    fn test_socket_lifecycle() {
        let s = socket_open(Protocol::Pair);
        assert!(s > 0);
        assert!(socket_id(s) > 0);
        assert_eq!(socket_close(s), 0);
        // The handle is dead now.
        assert_eq!(socket_close(s), BAD_HANDLE);
        assert_eq!(socket_id(s), -BAD_HANDLE);
    }

    #[test]
    fn test_message_handle_ops() {
        let m = msg_alloc(4);
        assert!(m > 0);
        assert_eq!(msg_len(m), 4);
        assert_eq!(msg_body(m).unwrap(), vec![0u8; 4]);
        assert_eq!(msg_clear(m), 0);
        assert_eq!(msg_append(m, b"world"), 0);
        assert_eq!(msg_insert(m, b"hello "), 0);
        assert_eq!(msg_body(m).unwrap(), b"hello world");
        assert_eq!(msg_chop(m, 6), 0);
        assert_eq!(msg_trim(m, 6), 0);
        assert_eq!(msg_len(m), 0);
        assert_eq!(msg_trim(m, 1), Error::InvalidArgument.code());
        assert_eq!(msg_free(m), 0);
        assert_eq!(msg_len(m), -i64::from(BAD_HANDLE));
    }

    #[test]
    fn test_pair_roundtrip_through_handles() {
        let a = socket_open(Protocol::Pair);
        let b = socket_open(Protocol::Pair);
        assert!(listen(a, "inproc://api-pair") > 0);
        assert!(dial(b, "inproc://api-pair") > 0);

        assert_eq!(send(b, b"ping", 0), 0);
        let mut buf = [0u8; 16];
        let mut len = 0usize;
        assert_eq!(recv(a, &mut buf, &mut len, 0), 0);
        assert_eq!(&buf[..len], b"ping");

        socket_close(a);
        socket_close(b);
    }

    #[test]
    fn test_recv_truncation_reported() {
        let a = socket_open(Protocol::Pair);
        let b = socket_open(Protocol::Pair);
        assert!(listen(a, "inproc://api-trunc") > 0);
        assert!(dial(b, "inproc://api-trunc") > 0);

        assert_eq!(send(b, b"four byte message", 0), 0);
        let mut buf = [0u8; 4];
        let mut len = 0usize;
        assert_eq!(
            recv(a, &mut buf, &mut len, 0),
            Error::TruncatedMessage.code()
        );
        assert_eq!(len, b"four byte message".len());

        socket_close(a);
        socket_close(b);
    }

    #[test]
    fn test_nonblock_recv_would_block() {
        let s = socket_open(Protocol::Pull);
        let mut buf = [0u8; 4];
        let mut len = 0usize;
        assert_eq!(
            recv(s, &mut buf, &mut len, FLAG_NONBLOCK),
            Error::WouldBlock.code()
        );
        socket_close(s);
    }

    #[test]
    fn test_sendmsg_consumes_handle_only_on_success() {
        let push = socket_open(Protocol::Push);
        let m = msg_alloc(0);
        msg_append(m, b"payload");
        // No pipes: non-blocking send fails, handle stays valid.
        assert_eq!(sendmsg(push, m, FLAG_NONBLOCK), Error::WouldBlock.code());
        assert_eq!(msg_len(m), 7);

        let pull = socket_open(Protocol::Pull);
        assert!(listen(pull, "inproc://api-sendmsg") > 0);
        assert!(dial(push, "inproc://api-sendmsg") > 0);
        assert_eq!(sendmsg(push, m, 0), 0);
        assert_eq!(msg_len(m), -i64::from(BAD_HANDLE));

        let got = recvmsg(pull, 0);
        assert!(got > 0);
        assert_eq!(msg_body(got).unwrap(), b"payload");
        msg_free(got);
        socket_close(push);
        socket_close(pull);
    }

    #[test]
    fn test_url_parse_and_accessors() {
        let u = url_parse("tcp://127.0.0.1:5555");
        assert!(u > 0);
        assert_eq!(url_scheme(u).unwrap(), "tcp");
        assert_eq!(url_host(u).unwrap(), "127.0.0.1");
        assert_eq!(url_port(u), 5555);
        assert_eq!(url_free(u), 0);
        assert_eq!(url_free(u), BAD_HANDLE);
        assert!(url_scheme(u).is_none());

        let p = url_parse("inproc://cache");
        assert_eq!(url_scheme(p).unwrap(), "inproc");
        assert_eq!(url_host(p).unwrap(), "cache");
        assert_eq!(url_port(p), -1);
        assert_eq!(url_free(p), 0);

        assert_eq!(url_parse("bogus://x"), -Error::InvalidAddress.code());
    }

    #[test]
    fn test_stats_cursor_walk() {
        let s = socket_open(Protocol::Pair);
        let snap = stats_get(s);
        assert!(snap > 0);
        let root = stat_root(snap);
        assert!(root >= 0);
        assert!(stat_name(snap, root).unwrap().starts_with("socket."));

        let mut names = Vec::new();
        let mut node = stat_child(snap, root);
        while node >= 0 {
            names.push(stat_name(snap, node).unwrap());
            node = stat_next(snap, node);
        }
        assert!(names.iter().any(|n| n == "tx_msgs"));
        assert!(names.iter().any(|n| n == "pipes"));

        assert_eq!(stats_free(snap), 0);
        assert_eq!(stat_root(snap), -1);
        socket_close(s);
    }

    #[test]
    fn test_aio_submit_then_free_is_quiet() {
        let s = socket_open(Protocol::Pull);
        let fired = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let f = fired.clone();
        let aio = aio_alloc_cb(move || {
            f.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        });
        assert_eq!(aio_recv(aio, s), 0);
        assert_eq!(aio_result(aio), Error::Busy.code());
        // Free with the receive still pending: cancels, waits, frees.
        assert_eq!(aio_free(aio), 0);
        let after = fired.load(std::sync::atomic::Ordering::SeqCst);
        assert_eq!(after, 1);
        std::thread::sleep(std::time::Duration::from_millis(20));
        assert_eq!(fired.load(std::sync::atomic::Ordering::SeqCst), after);
        socket_close(s);
    }
}
