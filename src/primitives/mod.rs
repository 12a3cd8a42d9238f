//! Low-level primitives for building the storage engine.
//!
//! Includes byte utilities, positioned I/O, the directory lock and the
//! rollback journal that every paged file relies on.

/// Byte-level utilities and encoding/decoding.
pub mod bytes;

/// Directory locking.
pub mod concurrency;

/// Positioned file I/O.
pub mod io;

/// Rollback journal for in-place page updates.
///
/// Pre-images are synced before any page is overwritten, so undo always
/// restores the state of the last checkpoint.
pub mod journal;
