//! On-disk storage engine.
//!
//! Layered leaves first: the paged [`btree`], the value dictionary, the
//! namespace table and the multi-index triple store, tied together by
//! [`NativeStore`].

/// Paged B-tree over fixed-length records.
pub mod btree;

/// Value dictionary interning RDF terms to ids.
pub mod values;

/// Prefix to namespace table.
pub mod namespaces;

/// Statement indexes and the transaction state machine.
pub mod triples;

mod core;
mod options;

pub use core::{NativeStore, StatementIter, Transaction};
pub use namespaces::NamespaceStore;
pub use options::{EvaluationOptions, StoreOptions, DEFAULT_TRIPLE_INDEXES};
pub use triples::{ReadMode, TripleStore, TxnStatus, VerifyReport};
pub use values::{ValueStore, ValueStoreMetricsSnapshot};
