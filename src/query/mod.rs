#![forbid(unsafe_code)]

//! Streaming evaluation of query algebra trees.
//!
//! Trees built from [`TupleExpr`] are turned into pull-based iterator
//! pipelines by an [`EvaluationStrategy`] reading statements from any
//! [`TripleSource`]. Every iterator can be closed early; closing releases
//! the inputs it holds.

/// Algebra node types.
pub mod algebra;
/// Variable bindings.
pub mod binding;
/// Query error types.
pub mod errors;
/// Algebra to iterator translation.
pub mod evaluator;
/// Value expression evaluation and term ordering.
pub mod expr;
/// Grouping and aggregates.
pub mod group;
/// The binding iterator trait and basic iterators.
pub mod iter;
/// Nested-loop join.
pub mod join;
/// Filter, distinct, union, slice and order.
pub mod ops;
/// Projection.
pub mod projection;
/// Statement sources.
pub mod source;

pub use algebra::{
    AggregateOp, CompareOp, GroupElem, OrderElem, ProjectionElem, TupleExpr, ValueExpr, Var,
};
pub use binding::BindingSet;
pub use errors::{QueryError, QueryResult};
pub use evaluator::EvaluationStrategy;
pub use iter::{BindingIter, BoxBindingIter, QueryResults};
pub use source::{MemoryTripleSource, StatementStream, TripleSource};
