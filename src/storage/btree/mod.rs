#![forbid(unsafe_code)]

//! Paged B-tree over fixed-length records.
//!
//! Ordering is delegated to a [`RecordComparator`] so the same tree serves the
//! value hash index and every triple index permutation. Modifications are
//! protected by a rollback journal (see [`crate::primitives::journal`]) and
//! page allocation is tracked in a persistent bitmap.

pub(crate) mod alloc;
mod comparator;
mod cursor;
mod page;
mod stats;
mod tree;

pub use comparator::{DefaultComparator, RecordComparator};
pub use cursor::RecordIter;
pub use stats::{BTreeStats, BTreeStatsSnapshot};
pub use tree::{BTree, BTreeOptions, TreeSummary};
