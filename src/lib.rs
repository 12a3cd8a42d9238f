//! Quadra: an embeddable RDF quad store.
//!
//! Statements are interned through a value dictionary and kept in several
//! paged B-tree indexes, each sorted on a different permutation of subject,
//! predicate, object and context. [`NativeStore`] is the entry point for
//! reading and writing; the [`query`] module evaluates algebra trees against
//! it as lazy binding streams.

#![warn(missing_docs)]

/// RDF terms and statements.
pub mod model;
/// Low-level building blocks: bytes, positioned I/O, locks, journal.
pub mod primitives;
/// Algebra and streaming evaluation.
pub mod query;
/// On-disk storage engine.
pub mod storage;
/// Identifiers and errors shared across layers.
pub mod types;

pub use model::{BNode, ContextPattern, Iri, Literal, Statement, Value};
pub use storage::{EvaluationOptions, NativeStore, StoreOptions, Transaction};
pub use types::{Result, StoreError, ValueId};
