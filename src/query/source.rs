#![forbid(unsafe_code)]

use crate::model::{ContextPattern, Statement, Value};
use crate::query::errors::{QueryError, QueryResult};
use crate::storage::{NativeStore, StatementIter, Transaction};

/// Lazy statements handed to the evaluator. Dropping the stream releases it.
pub type StatementStream<'a> = Box<dyn Iterator<Item = QueryResult<Statement>> + 'a>;

/// Where statement patterns get their data.
pub trait TripleSource {
    /// Statements matching the given terms; `None` is a wildcard. A bound
    /// predicate that is not an IRI matches nothing.
    fn statements(
        &self,
        subject: Option<&Value>,
        predicate: Option<&Value>,
        object: Option<&Value>,
        context: ContextPattern<'_>,
    ) -> QueryResult<StatementStream<'_>>;
}

fn empty<'a>() -> StatementStream<'a> {
    Box::new(std::iter::empty())
}

fn stream(iter: StatementIter<'_>) -> StatementStream<'_> {
    Box::new(iter.map(|item| item.map_err(QueryError::from)))
}

/// Committed statements, explicit and inferred.
impl TripleSource for NativeStore {
    fn statements(
        &self,
        subject: Option<&Value>,
        predicate: Option<&Value>,
        object: Option<&Value>,
        context: ContextPattern<'_>,
    ) -> QueryResult<StatementStream<'_>> {
        let predicate = match predicate {
            Some(Value::Iri(iri)) => Some(iri),
            Some(_) => return Ok(empty()),
            None => None,
        };
        let iter = NativeStore::statements(self, subject, predicate, object, context, true)?;
        Ok(stream(iter))
    }
}

/// The transaction's own view, including uncommitted changes.
impl TripleSource for Transaction<'_> {
    fn statements(
        &self,
        subject: Option<&Value>,
        predicate: Option<&Value>,
        object: Option<&Value>,
        context: ContextPattern<'_>,
    ) -> QueryResult<StatementStream<'_>> {
        let predicate = match predicate {
            Some(Value::Iri(iri)) => Some(iri),
            Some(_) => return Ok(empty()),
            None => None,
        };
        let iter = Transaction::statements(self, subject, predicate, object, context, true)?;
        Ok(stream(iter))
    }
}

/// In-memory statement list, handy for tests and small graphs.
#[derive(Clone, Debug, Default)]
pub struct MemoryTripleSource {
    statements: Vec<Statement>,
}

impl MemoryTripleSource {
    /// Source over `statements`.
    pub fn new(statements: Vec<Statement>) -> Self {
        Self { statements }
    }

    /// Appends a statement.
    pub fn push(&mut self, statement: Statement) {
        self.statements.push(statement);
    }
}

impl TripleSource for MemoryTripleSource {
    fn statements(
        &self,
        subject: Option<&Value>,
        predicate: Option<&Value>,
        object: Option<&Value>,
        context: ContextPattern<'_>,
    ) -> QueryResult<StatementStream<'_>> {
        let subject = subject.cloned();
        let predicate = predicate.cloned();
        let object = object.cloned();
        let context = match context {
            ContextPattern::Any => None,
            ContextPattern::Default => Some(None),
            ContextPattern::Named(value) => Some(Some(value.clone())),
        };
        Ok(Box::new(
            self.statements
                .iter()
                .filter(move |st| {
                    subject.as_ref().map_or(true, |s| *s == st.subject)
                        && predicate
                            .as_ref()
                            .map_or(true, |p| matches!(p, Value::Iri(iri) if *iri == st.predicate))
                        && object.as_ref().map_or(true, |o| *o == st.object)
                        && context.as_ref().map_or(true, |c| *c == st.context)
                })
                .cloned()
                .map(Ok),
        ))
    }
}
