#![forbid(unsafe_code)]

use thiserror::Error;

use crate::types::StoreError;

/// Errors raised while evaluating an algebra tree.
///
/// Resource limits are reported separately from storage failures so callers
/// can tell an expensive query from a broken store.
#[derive(Debug, Error)]
pub enum QueryError {
    /// A Distinct, Group or Order operator exceeded the configured size.
    #[error("collection exceeds the configured limit of {limit} entries")]
    CollectionTooLarge {
        /// Configured maximum.
        limit: usize,
    },
    /// An expression referenced a variable with no value.
    #[error("variable '{0}' is not bound")]
    UnboundVariable(String),
    /// An operator received terms it cannot handle.
    #[error("type error: {0}")]
    TypeError(&'static str),
    /// The triple source failed.
    #[error("storage: {0}")]
    Storage(Box<StoreError>),
}

impl QueryError {
    /// Returns true for errors that a filter treats as "no match" rather
    /// than aborting the query.
    pub fn is_expression_error(&self) -> bool {
        matches!(self, QueryError::UnboundVariable(_) | QueryError::TypeError(_))
    }
}

impl From<StoreError> for QueryError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Query(inner) => inner,
            other => QueryError::Storage(Box::new(other)),
        }
    }
}

/// Result alias for query evaluation.
pub type QueryResult<T> = std::result::Result<T, QueryError>;
