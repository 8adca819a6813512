//! Read-only statistics snapshots.
//!
//! [`Stats`] is a lazily-built snapshot of a socket's counter tree:
//! per-socket totals with one child subtree per pipe. The tree is stored
//! as a flat arena with explicit sibling/child indices so it can be
//! traversed with a "next sibling" cursor from any language binding, and
//! the whole snapshot is freed as one unit when dropped.

use std::sync::atomic::{AtomicU64, Ordering};

/// Socket-level traffic counters, updated on the send/receive hot paths.
#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub(crate) tx_msgs: AtomicU64,
    pub(crate) tx_bytes: AtomicU64,
    pub(crate) rx_msgs: AtomicU64,
    pub(crate) rx_bytes: AtomicU64,
    /// Inbound messages discarded by the protocol filter.
    pub(crate) rx_dropped: AtomicU64,
    pub(crate) pipes_opened: AtomicU64,
    pub(crate) pipes_closed: AtomicU64,
}

impl Counters {
    pub(crate) fn note_tx(&self, bytes: usize) {
        self.tx_msgs.fetch_add(1, Ordering::Relaxed);
        self.tx_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub(crate) fn note_rx(&self, bytes: usize) {
        self.rx_msgs.fetch_add(1, Ordering::Relaxed);
        self.rx_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub(crate) fn note_rx_dropped(&self) {
        self.rx_dropped.fetch_add(1, Ordering::Relaxed);
    }
}

/// One node in a stats snapshot.
#[derive(Debug, Clone)]
struct StatEntry {
    name: String,
    value: u64,
    next: Option<usize>,
    child: Option<usize>,
}

/// A read-only snapshot of named counters.
#[derive(Debug, Clone, Default)]
pub struct Stats {
    nodes: Vec<StatEntry>,
}

/// Cursor over a [`Stats`] snapshot.
///
/// # Example
///
/// ```no_run
/// use polysock::{Protocol, Socket};
///
/// let socket = Socket::open(Protocol::Pair);
/// let stats = socket.stats();
/// let mut cur = stats.root().unwrap().child();
/// while let Some(stat) = cur {
///     println!("{} = {}", stat.name(), stat.value());
///     cur = stat.next();
/// }
/// ```
#[derive(Debug, Clone, Copy)]
pub struct StatRef<'a> {
    stats: &'a Stats,
    idx: usize,
}

impl Stats {
    /// Cursor at the root node, `None` for an empty snapshot.
    pub fn root(&self) -> Option<StatRef<'_>> {
        if self.nodes.is_empty() {
            None
        } else {
            Some(StatRef { stats: self, idx: 0 })
        }
    }

    /// Cursor at an arbitrary node index, for handle-based traversal.
    pub fn at(&self, idx: usize) -> Option<StatRef<'_>> {
        if idx < self.nodes.len() {
            Some(StatRef { stats: self, idx })
        } else {
            None
        }
    }

    /// Total node count in the snapshot.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// True when the snapshot holds no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

impl<'a> StatRef<'a> {
    /// Counter name.
    pub fn name(&self) -> &'a str {
        &self.stats.nodes[self.idx].name
    }

    /// Counter value at snapshot time.
    pub fn value(&self) -> u64 {
        self.stats.nodes[self.idx].value
    }

    /// Arena index of this node.
    pub fn index(&self) -> usize {
        self.idx
    }

    /// Next sibling, if any.
    pub fn next(&self) -> Option<StatRef<'a>> {
        self.stats.nodes[self.idx]
            .next
            .map(|idx| StatRef { stats: self.stats, idx })
    }

    /// First child, if any.
    pub fn child(&self) -> Option<StatRef<'a>> {
        self.stats.nodes[self.idx]
            .child
            .map(|idx| StatRef { stats: self.stats, idx })
    }
}

/// Incremental builder for a snapshot tree.
#[derive(Debug, Default)]
pub(crate) struct StatsBuilder {
    nodes: Vec<StatEntry>,
}

impl StatsBuilder {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Add a node under `parent` (`None` for the root), returning its index.
    pub(crate) fn node(
        &mut self,
        parent: Option<usize>,
        name: impl Into<String>,
        value: u64,
    ) -> usize {
        let idx = self.nodes.len();
        self.nodes.push(StatEntry {
            name: name.into(),
            value,
            next: None,
            child: None,
        });

        if let Some(p) = parent {
            // Append as last sibling of the parent's child chain.
            match self.nodes[p].child {
                None => self.nodes[p].child = Some(idx),
                Some(first) => {
                    let mut cur = first;
                    while let Some(n) = self.nodes[cur].next {
                        cur = n;
                    }
                    self.nodes[cur].next = Some(idx);
                }
            }
        }
        idx
    }

    pub(crate) fn finish(self) -> Stats {
        Stats { nodes: self.nodes }
    }
}
