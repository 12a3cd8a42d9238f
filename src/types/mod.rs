#![forbid(unsafe_code)]
//! Identifiers, error types, and checksums shared by every layer of the store.

use std::fmt;

/// Checksum helpers used by the journal and the on-disk headers.
pub mod checksum;

/// Identifier of a node page inside a B-tree file. Page 0 holds the file header.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Default)]
pub struct PageId(pub u32);

impl PageId {
    /// Sentinel used for "no child" and "empty tree".
    pub const NONE: PageId = PageId(0);

    /// Returns true when this id refers to no page.
    pub fn is_none(self) -> bool {
        self.0 == 0
    }
}

/// Dense positive identifier assigned by the value store.
///
/// `ValueId::UNKNOWN` (zero) is returned for values that have never been
/// stored; it doubles as the context id of the default graph inside triple
/// records.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Default)]
pub struct ValueId(pub i32);

impl ValueId {
    /// Id returned for values that are not in the dictionary.
    pub const UNKNOWN: ValueId = ValueId(0);

    /// Returns true for the unknown sentinel.
    pub fn is_unknown(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for ValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i32> for ValueId {
    fn from(value: i32) -> Self {
        ValueId(value)
    }
}

impl From<ValueId> for i32 {
    fn from(value: ValueId) -> Self {
        value.0
    }
}

/// Errors raised by the storage layer.
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    /// Underlying file system failure.
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
    /// On-disk bytes failed validation.
    #[error("corruption: {0}")]
    Corruption(&'static str),
    /// A file was written by a newer format version than this build understands.
    #[error("unsupported {file} format version {found} (newest supported is {supported})")]
    UnsupportedVersion {
        /// Logical name of the file that was rejected.
        file: &'static str,
        /// Version found on disk.
        found: u32,
        /// Newest version this build can read.
        supported: u32,
    },
    /// Caller supplied an argument that cannot be honoured.
    #[error("invalid argument: {0}")]
    Invalid(&'static str),
    /// Operation is not legal in the current transaction phase.
    #[error("transaction: {0}")]
    Transaction(&'static str),
    /// Another process holds the data directory lock.
    #[error("data directory is locked by another process")]
    Locked,
    /// Query evaluation failed.
    #[error("query: {0}")]
    Query(#[from] crate::query::QueryError),
}

/// Result alias used throughout the storage layer.
pub type Result<T> = std::result::Result<T, StoreError>;
