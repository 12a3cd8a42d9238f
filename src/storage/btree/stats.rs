use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

/// Snapshot of B-tree counters at a point in time.
#[derive(Default, Debug, Clone, Copy, serde::Serialize)]
pub struct BTreeStatsSnapshot {
    /// Node pages read from disk
    pub node_reads: u64,
    /// Node pages written to disk
    pub node_writes: u64,
    /// Node splits performed
    pub splits: u64,
    /// Sibling merges performed
    pub merges: u64,
    /// Values rotated between siblings
    pub rotations: u64,
    /// Journal undos applied
    pub undos: u64,
}

/// Thread-safe counters for B-tree operations.
#[derive(Default)]
pub struct BTreeStats {
    node_reads: AtomicU64,
    node_writes: AtomicU64,
    splits: AtomicU64,
    merges: AtomicU64,
    rotations: AtomicU64,
    undos: AtomicU64,
}

impl BTreeStats {
    pub(crate) fn record_node_read(&self) {
        self.node_reads.fetch_add(1, AtomicOrdering::Relaxed);
    }

    pub(crate) fn record_node_write(&self) {
        self.node_writes.fetch_add(1, AtomicOrdering::Relaxed);
    }

    pub(crate) fn record_split(&self) {
        self.splits.fetch_add(1, AtomicOrdering::Relaxed);
    }

    pub(crate) fn record_merge(&self) {
        self.merges.fetch_add(1, AtomicOrdering::Relaxed);
    }

    pub(crate) fn record_rotation(&self) {
        self.rotations.fetch_add(1, AtomicOrdering::Relaxed);
    }

    pub(crate) fn record_undo(&self) {
        self.undos.fetch_add(1, AtomicOrdering::Relaxed);
    }

    /// Captures the current counter values.
    pub fn snapshot(&self) -> BTreeStatsSnapshot {
        BTreeStatsSnapshot {
            node_reads: self.node_reads.load(AtomicOrdering::Relaxed),
            node_writes: self.node_writes.load(AtomicOrdering::Relaxed),
            splits: self.splits.load(AtomicOrdering::Relaxed),
            merges: self.merges.load(AtomicOrdering::Relaxed),
            rotations: self.rotations.load(AtomicOrdering::Relaxed),
            undos: self.undos.load(AtomicOrdering::Relaxed),
        }
    }
}
