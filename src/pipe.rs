//! Pipes: established logical connections owned by a socket.
//!
//! A pipe wraps one [`Link`](crate::transport::Link) handed over by a
//! transport. The socket keeps the send half here and runs a reader task
//! over the receive half; everything a pipe knows about its socket or
//! originating endpoint is an id, never an owning reference.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::oneshot;

use crate::message::Message;

/// Identifier of one live pipe, unique within its socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PipeId(pub(crate) u32);

impl PipeId {
    /// Raw numeric id.
    pub fn raw(self) -> u32 {
        self.0
    }
}

/// Per-pipe traffic counters, updated with relaxed atomics on the hot
/// paths and read only when a stats snapshot is taken.
#[derive(Debug, Default)]
pub(crate) struct PipeStats {
    pub(crate) tx_msgs: AtomicU64,
    pub(crate) tx_bytes: AtomicU64,
    pub(crate) rx_msgs: AtomicU64,
    pub(crate) rx_bytes: AtomicU64,
}

impl PipeStats {
    pub(crate) fn note_tx(&self, bytes: usize) {
        self.tx_msgs.fetch_add(1, Ordering::Relaxed);
        self.tx_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub(crate) fn note_rx(&self, bytes: usize) {
        self.rx_msgs.fetch_add(1, Ordering::Relaxed);
        self.rx_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }
}

/// The socket-held half of a pipe: where outbound messages go.
#[derive(Debug)]
pub(crate) struct PipeHandle {
    pub(crate) id: PipeId,
    pub(crate) tx: mpsc::Sender<Message>,
    pub(crate) remote: String,
    pub(crate) stats: Arc<PipeStats>,
}

/// Observer for pipe teardown, held by the dialer that created the pipe
/// so it knows when to reconnect. The sender half lives on the pipe
/// reader task and is dropped when the pipe dies.
#[derive(Debug)]
pub(crate) struct PipeMonitor {
    pub(crate) rx: oneshot::Receiver<()>,
}

impl PipeMonitor {
    /// Resolve when the monitored pipe is gone.
    pub(crate) async fn closed(self) {
        // Either an explicit signal or the sender dropping means closed.
        let _ = self.rx.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipe_stats_accumulate() {
        let stats = PipeStats::default();
        stats.note_tx(10);
        stats.note_tx(5);
        stats.note_rx(3);
        assert_eq!(stats.tx_msgs.load(Ordering::Relaxed), 2);
        assert_eq!(stats.tx_bytes.load(Ordering::Relaxed), 15);
        assert_eq!(stats.rx_msgs.load(Ordering::Relaxed), 1);
        assert_eq!(stats.rx_bytes.load(Ordering::Relaxed), 3);
    }

    #[tokio::test]
    async fn test_monitor_resolves_on_sender_drop() {
        let (tx, rx) = oneshot::channel();
        let monitor = PipeMonitor { rx };
        drop(tx);
        monitor.closed().await;
    }
}
