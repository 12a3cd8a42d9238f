#![forbid(unsafe_code)]

use tracing::trace;

use crate::model::{ContextPattern, Statement, Value};
use crate::query::algebra::{TupleExpr, Var};
use crate::query::binding::BindingSet;
use crate::query::errors::QueryResult;
use crate::query::group::GroupIter;
use crate::query::iter::{BindingIter, BoxBindingIter, EmptyIter, QueryResults, VecIter};
use crate::query::join::JoinIter;
use crate::query::ops::{DistinctIter, FilterIter, OrderIter, SliceIter, UnionIter};
use crate::query::projection::ProjectionIter;
use crate::query::source::{StatementStream, TripleSource};
use crate::storage::EvaluationOptions;

/// Turns algebra trees into iterator pipelines over a [`TripleSource`].
///
/// The tree is executed as given; no reordering takes place.
pub struct EvaluationStrategy<'a, S: TripleSource + ?Sized> {
    source: &'a S,
    options: EvaluationOptions,
}

impl<S: TripleSource + ?Sized> Clone for EvaluationStrategy<'_, S> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<S: TripleSource + ?Sized> Copy for EvaluationStrategy<'_, S> {}

impl<'a, S: TripleSource + ?Sized> EvaluationStrategy<'a, S> {
    /// Strategy reading from `source`.
    pub fn new(source: &'a S, options: EvaluationOptions) -> Self {
        Self { source, options }
    }

    /// Evaluates `expr` from scratch.
    pub fn query(&self, expr: &'a TupleExpr) -> QueryResult<QueryResults<'a>> {
        Ok(QueryResults::new(self.evaluate(expr, &BindingSet::new())?))
    }

    /// Evaluates `expr` with `bindings` already fixed.
    pub fn evaluate(&self, expr: &'a TupleExpr, bindings: &BindingSet) -> QueryResult<BoxBindingIter<'a>> {
        let max = self.options.max_collection_size;
        Ok(match expr {
            TupleExpr::StatementPattern {
                subject,
                predicate,
                object,
                context,
            } => self.evaluate_pattern(subject, predicate, object, context.as_ref(), bindings)?,
            TupleExpr::Join(left, right) => {
                let left = self.evaluate(left, bindings)?;
                let strategy = *self;
                let right: &'a TupleExpr = right;
                Box::new(JoinIter::new(
                    left,
                    Box::new(move |row: &BindingSet| strategy.evaluate(right, row)),
                ))
            }
            TupleExpr::Group {
                arg,
                group_by,
                aggregates,
            } => Box::new(GroupIter::new(
                self.evaluate(arg, bindings)?,
                bindings.clone(),
                group_by.clone(),
                aggregates.clone(),
                max,
            )),
            TupleExpr::Projection { arg, elems } => {
                Box::new(ProjectionIter::new(self.evaluate(arg, bindings)?, elems.clone()))
            }
            TupleExpr::Filter { arg, condition } => {
                Box::new(FilterIter::new(self.evaluate(arg, bindings)?, condition.clone()))
            }
            TupleExpr::Distinct(arg) => Box::new(DistinctIter::new(self.evaluate(arg, bindings)?, max)),
            TupleExpr::Union(left, right) => {
                let mut left = self.evaluate(left, bindings)?;
                match self.evaluate(right, bindings) {
                    Ok(right) => Box::new(UnionIter::new(vec![left, right])),
                    Err(err) => {
                        left.close();
                        return Err(err);
                    }
                }
            }
            TupleExpr::Slice { arg, offset, limit } => {
                Box::new(SliceIter::new(self.evaluate(arg, bindings)?, *offset, *limit))
            }
            TupleExpr::Order { arg, elems } => {
                Box::new(OrderIter::new(self.evaluate(arg, bindings)?, elems.clone(), max))
            }
            TupleExpr::SingletonSet => Box::new(VecIter::singleton(bindings.clone())),
            TupleExpr::EmptySet => Box::new(EmptyIter),
            TupleExpr::BindingSetAssignment(rows) => Box::new(VecIter::new(
                rows.iter().filter_map(|row| bindings.merge(row)).collect(),
            )),
        })
    }

    fn evaluate_pattern(
        &self,
        subject: &'a Var,
        predicate: &'a Var,
        object: &'a Var,
        context: Option<&'a Var>,
        bindings: &BindingSet,
    ) -> QueryResult<BoxBindingIter<'a>> {
        let s = subject.resolve(bindings).cloned();
        let p = predicate.resolve(bindings).cloned();
        let o = object.resolve(bindings).cloned();
        let c = context.and_then(|var| var.resolve(bindings)).cloned();
        let pattern = match &c {
            Some(value) => ContextPattern::Named(value),
            None => ContextPattern::Any,
        };
        trace!(
            subject = ?s, predicate = ?p, object = ?o, context = ?c,
            "evaluating statement pattern"
        );
        let stream = self
            .source
            .statements(s.as_ref(), p.as_ref(), o.as_ref(), pattern)?;
        Ok(Box::new(StatementPatternIter {
            stream: Some(stream),
            parent: bindings.clone(),
            slots: [subject, predicate, object],
            context,
        }))
    }
}

/// Binds the free variables of a statement pattern for each match.
struct StatementPatternIter<'a> {
    stream: Option<StatementStream<'a>>,
    parent: BindingSet,
    slots: [&'a Var; 3],
    context: Option<&'a Var>,
}

impl StatementPatternIter<'_> {
    fn bind(&self, statement: Statement) -> Option<BindingSet> {
        let mut out = self.parent.clone();
        let predicate = Value::Iri(statement.predicate);
        let context = match (self.context, statement.context) {
            (None, _) => None,
            // a context variable only matches named graphs
            (Some(_), None) => return None,
            (Some(var), Some(value)) => Some((var, value)),
        };
        let values = [statement.subject, predicate, statement.object];
        let pairs = self.slots.iter().copied().zip(values).chain(context);
        for (var, value) in pairs {
            if var.value.is_some() {
                continue;
            }
            match out.get(&var.name) {
                // the same variable in two positions must match one term
                Some(existing) if *existing != value => return None,
                Some(_) => {}
                None => out.insert(var.name.clone(), value),
            }
        }
        Some(out)
    }
}

impl BindingIter for StatementPatternIter<'_> {
    fn try_next(&mut self) -> QueryResult<Option<BindingSet>> {
        while let Some(stream) = self.stream.as_mut() {
            match stream.next() {
                Some(Ok(statement)) => {
                    if let Some(row) = self.bind(statement) {
                        return Ok(Some(row));
                    }
                }
                Some(Err(err)) => {
                    self.close();
                    return Err(err);
                }
                None => self.close(),
            }
        }
        Ok(None)
    }

    fn close(&mut self) {
        self.stream = None;
    }
}
