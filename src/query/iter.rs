#![forbid(unsafe_code)]

use crate::query::binding::BindingSet;
use crate::query::errors::{QueryError, QueryResult};

/// Pull-based stream of binding sets.
///
/// `close` is idempotent and releases wrapped iterators. Operators close
/// themselves when exhausted or when an upstream error passes through them.
pub trait BindingIter {
    /// Next binding set, or `None` at the end.
    fn try_next(&mut self) -> QueryResult<Option<BindingSet>>;

    /// Releases every resource held by this iterator and its inputs.
    fn close(&mut self);
}

/// Boxed iterator borrowing from the triple source.
pub type BoxBindingIter<'a> = Box<dyn BindingIter + 'a>;

impl<T: BindingIter + ?Sized> BindingIter for Box<T> {
    fn try_next(&mut self) -> QueryResult<Option<BindingSet>> {
        (**self).try_next()
    }

    fn close(&mut self) {
        (**self).close();
    }
}

/// Pulls from `iter`, closing it when the pull fails.
pub(crate) fn pull(iter: &mut dyn BindingIter) -> QueryResult<Option<BindingSet>> {
    iter.try_next().inspect_err(|_| iter.close())
}

/// Iterator with no bindings.
#[derive(Debug, Default)]
pub struct EmptyIter;

impl BindingIter for EmptyIter {
    fn try_next(&mut self) -> QueryResult<Option<BindingSet>> {
        Ok(None)
    }

    fn close(&mut self) {}
}

/// Iterator over prepared bindings.
#[derive(Debug)]
pub struct VecIter {
    rows: std::vec::IntoIter<BindingSet>,
}

impl VecIter {
    /// Yields `rows` in order.
    pub fn new(rows: Vec<BindingSet>) -> Self {
        Self {
            rows: rows.into_iter(),
        }
    }

    /// Yields `bindings` once.
    pub fn singleton(bindings: BindingSet) -> Self {
        Self::new(vec![bindings])
    }
}

impl BindingIter for VecIter {
    fn try_next(&mut self) -> QueryResult<Option<BindingSet>> {
        Ok(self.rows.next())
    }

    fn close(&mut self) {
        self.rows = Vec::new().into_iter();
    }
}

/// Counts entries held by a materializing operator.
#[derive(Clone, Copy, Debug)]
pub(crate) struct CollectionLimit {
    limit: Option<usize>,
}

impl CollectionLimit {
    pub fn new(limit: Option<usize>) -> Self {
        Self { limit }
    }

    /// Fails once `held` exceeds the limit.
    pub fn check(&self, held: usize) -> QueryResult<()> {
        match self.limit {
            Some(limit) if held > limit => Err(QueryError::CollectionTooLarge { limit }),
            _ => Ok(()),
        }
    }
}

/// Adapts a [`BindingIter`] to [`Iterator`], closing it at the end and on
/// drop.
pub struct QueryResults<'a> {
    inner: BoxBindingIter<'a>,
    done: bool,
}

impl<'a> QueryResults<'a> {
    /// Wraps `inner`.
    pub fn new(inner: BoxBindingIter<'a>) -> Self {
        Self { inner, done: false }
    }

    /// Stops early and releases the pipeline.
    pub fn close(&mut self) {
        if !self.done {
            self.done = true;
            self.inner.close();
        }
    }
}

impl Iterator for QueryResults<'_> {
    type Item = QueryResult<BindingSet>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.inner.try_next() {
            Ok(Some(row)) => Some(Ok(row)),
            Ok(None) => {
                self.close();
                None
            }
            Err(err) => {
                self.close();
                Some(Err(err))
            }
        }
    }
}

impl Drop for QueryResults<'_> {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    /// Test iterator that records closes and can fail after some rows.
    pub struct Probe {
        rows: std::vec::IntoIter<BindingSet>,
        fail_after: Option<usize>,
        served: usize,
        pub closes: Rc<Cell<usize>>,
    }

    impl Probe {
        pub fn new(rows: Vec<BindingSet>) -> Self {
            Self {
                rows: rows.into_iter(),
                fail_after: None,
                served: 0,
                closes: Rc::new(Cell::new(0)),
            }
        }

        pub fn failing_after(mut self, rows: usize) -> Self {
            self.fail_after = Some(rows);
            self
        }
    }

    impl BindingIter for Probe {
        fn try_next(&mut self) -> QueryResult<Option<BindingSet>> {
            if self.fail_after == Some(self.served) {
                return Err(QueryError::TypeError("probe failure"));
            }
            self.served += 1;
            Ok(self.rows.next())
        }

        fn close(&mut self) {
            self.closes.set(self.closes.get() + 1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::Probe;
    use super::*;
    use crate::model::Value;

    #[test]
    fn results_adapter_closes_on_exhaustion_and_drop() {
        let probe = Probe::new(vec![BindingSet::new().with("a", Value::integer(1))]);
        let closes = probe.closes.clone();
        let rows: Vec<_> = QueryResults::new(Box::new(probe)).collect();
        assert_eq!(rows.len(), 1);
        assert_eq!(closes.get(), 1);

        let probe = Probe::new(vec![BindingSet::new(); 3]);
        let closes = probe.closes.clone();
        let mut results = QueryResults::new(Box::new(probe));
        assert!(results.next().is_some());
        drop(results);
        assert_eq!(closes.get(), 1);
    }

    #[test]
    fn limit_counts_entries() {
        let limit = CollectionLimit::new(Some(2));
        assert!(limit.check(2).is_ok());
        assert!(matches!(limit.check(3), Err(QueryError::CollectionTooLarge { limit: 2 })));
        assert!(CollectionLimit::new(None).check(usize::MAX).is_ok());
    }
}
