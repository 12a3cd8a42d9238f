#![forbid(unsafe_code)]

//! Filtering, deduplicating, concatenating, slicing and sorting operators.

use std::cmp::Ordering;

use rustc_hash::FxHashSet;

use crate::query::algebra::{OrderElem, ValueExpr};
use crate::query::binding::BindingSet;
use crate::query::errors::QueryResult;
use crate::query::expr::{effective_boolean, evaluate, order_terms};
use crate::query::iter::{pull, BindingIter, BoxBindingIter, CollectionLimit};

fn close_source(source: &mut Option<BoxBindingIter<'_>>) {
    if let Some(mut source) = source.take() {
        source.close();
    }
}

/// Keeps rows whose condition evaluates to true. Expression errors count
/// as false.
pub struct FilterIter<'a> {
    source: Option<BoxBindingIter<'a>>,
    condition: ValueExpr,
}

impl<'a> FilterIter<'a> {
    /// Filters `source` by `condition`.
    pub fn new(source: BoxBindingIter<'a>, condition: ValueExpr) -> Self {
        Self {
            source: Some(source),
            condition,
        }
    }
}

impl BindingIter for FilterIter<'_> {
    fn try_next(&mut self) -> QueryResult<Option<BindingSet>> {
        while let Some(source) = self.source.as_mut() {
            let Some(row) = pull(source.as_mut())? else {
                self.close();
                break;
            };
            match effective_boolean(&self.condition, &row) {
                Ok(true) => return Ok(Some(row)),
                Ok(false) => {}
                Err(err) if err.is_expression_error() => {}
                Err(err) => {
                    self.close();
                    return Err(err);
                }
            }
        }
        Ok(None)
    }

    fn close(&mut self) {
        close_source(&mut self.source);
    }
}

/// Drops rows already returned.
pub struct DistinctIter<'a> {
    source: Option<BoxBindingIter<'a>>,
    seen: FxHashSet<BindingSet>,
    limit: CollectionLimit,
}

impl<'a> DistinctIter<'a> {
    /// Deduplicates `source`, remembering at most `max_rows` rows.
    pub fn new(source: BoxBindingIter<'a>, max_rows: Option<usize>) -> Self {
        Self {
            source: Some(source),
            seen: FxHashSet::default(),
            limit: CollectionLimit::new(max_rows),
        }
    }
}

impl BindingIter for DistinctIter<'_> {
    fn try_next(&mut self) -> QueryResult<Option<BindingSet>> {
        while let Some(source) = self.source.as_mut() {
            let Some(row) = pull(source.as_mut())? else {
                self.close();
                break;
            };
            if self.seen.contains(&row) {
                continue;
            }
            if let Err(err) = self.limit.check(self.seen.len() + 1) {
                self.close();
                return Err(err);
            }
            self.seen.insert(row.clone());
            return Ok(Some(row));
        }
        Ok(None)
    }

    fn close(&mut self) {
        close_source(&mut self.source);
        self.seen.clear();
    }
}

/// Rows of every input in turn.
pub struct UnionIter<'a> {
    inputs: std::collections::VecDeque<BoxBindingIter<'a>>,
}

impl<'a> UnionIter<'a> {
    /// Concatenates `inputs`.
    pub fn new(inputs: Vec<BoxBindingIter<'a>>) -> Self {
        Self {
            inputs: inputs.into(),
        }
    }
}

impl BindingIter for UnionIter<'_> {
    fn try_next(&mut self) -> QueryResult<Option<BindingSet>> {
        while let Some(current) = self.inputs.front_mut() {
            match pull(current.as_mut()) {
                Ok(Some(row)) => return Ok(Some(row)),
                Ok(None) => {
                    if let Some(mut done) = self.inputs.pop_front() {
                        done.close();
                    }
                }
                Err(err) => {
                    self.close();
                    return Err(err);
                }
            }
        }
        Ok(None)
    }

    fn close(&mut self) {
        for mut input in self.inputs.drain(..) {
            input.close();
        }
    }
}

/// Skips `offset` rows and returns at most `limit` after them.
pub struct SliceIter<'a> {
    source: Option<BoxBindingIter<'a>>,
    offset: usize,
    remaining: Option<usize>,
}

impl<'a> SliceIter<'a> {
    /// Slices `source`.
    pub fn new(source: BoxBindingIter<'a>, offset: usize, limit: Option<usize>) -> Self {
        Self {
            source: Some(source),
            offset,
            remaining: limit,
        }
    }
}

impl BindingIter for SliceIter<'_> {
    fn try_next(&mut self) -> QueryResult<Option<BindingSet>> {
        if self.remaining == Some(0) {
            self.close();
            return Ok(None);
        }
        while let Some(source) = self.source.as_mut() {
            let Some(row) = pull(source.as_mut())? else {
                self.close();
                break;
            };
            if self.offset > 0 {
                self.offset -= 1;
                continue;
            }
            if let Some(remaining) = self.remaining.as_mut() {
                *remaining -= 1;
            }
            return Ok(Some(row));
        }
        Ok(None)
    }

    fn close(&mut self) {
        close_source(&mut self.source);
    }
}

/// Sorts the whole input. Keys that fail to evaluate sort as unbound; the
/// sort is stable.
pub struct OrderIter<'a> {
    source: Option<BoxBindingIter<'a>>,
    elems: Vec<OrderElem>,
    limit: CollectionLimit,
    output: Option<std::vec::IntoIter<BindingSet>>,
}

impl<'a> OrderIter<'a> {
    /// Orders `source` by `elems`, buffering at most `max_rows` rows.
    pub fn new(source: BoxBindingIter<'a>, elems: Vec<OrderElem>, max_rows: Option<usize>) -> Self {
        Self {
            source: Some(source),
            elems,
            limit: CollectionLimit::new(max_rows),
            output: None,
        }
    }

    fn sort(&mut self) -> QueryResult<Vec<BindingSet>> {
        let mut keyed = Vec::new();
        if let Some(mut source) = self.source.take() {
            while let Some(row) = pull(source.as_mut())? {
                self.limit.check(keyed.len() + 1).inspect_err(|_| source.close())?;
                let keys: Vec<_> = self
                    .elems
                    .iter()
                    .map(|elem| evaluate(&elem.expr, &row).ok())
                    .collect();
                keyed.push((keys, row));
            }
            source.close();
        }
        let elems = &self.elems;
        keyed.sort_by(|(a, _), (b, _)| {
            for ((ka, kb), elem) in a.iter().zip(b).zip(elems) {
                let ord = order_terms(ka.as_ref(), kb.as_ref());
                let ord = if elem.ascending { ord } else { ord.reverse() };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            Ordering::Equal
        });
        Ok(keyed.into_iter().map(|(_, row)| row).collect())
    }
}

impl BindingIter for OrderIter<'_> {
    fn try_next(&mut self) -> QueryResult<Option<BindingSet>> {
        if self.output.is_none() {
            let rows = self.sort().inspect_err(|_| self.close())?;
            self.output = Some(rows.into_iter());
        }
        Ok(self.output.as_mut().and_then(Iterator::next))
    }

    fn close(&mut self) {
        close_source(&mut self.source);
        self.output = Some(Vec::new().into_iter());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Value;
    use crate::query::algebra::CompareOp;
    use crate::query::errors::QueryError;
    use crate::query::iter::testing::Probe;
    use crate::query::iter::VecIter;

    fn n(v: i64) -> BindingSet {
        BindingSet::new().with("n", Value::integer(v))
    }

    fn source(values: &[i64]) -> BoxBindingIter<'static> {
        Box::new(VecIter::new(values.iter().map(|v| n(*v)).collect()))
    }

    fn drain(mut iter: impl BindingIter) -> QueryResult<Vec<i64>> {
        let mut out = Vec::new();
        while let Some(row) = iter.try_next()? {
            let label = row.get("n").map(|v| v.lexical().to_owned()).unwrap_or_default();
            out.push(label.parse().unwrap_or(-1));
        }
        Ok(out)
    }

    #[test]
    fn filter_keeps_true_rows_and_skips_errors() -> QueryResult<()> {
        let rows = vec![n(1), BindingSet::new(), n(5), n(3)];
        let gt_two = ValueExpr::compare(CompareOp::Gt, ValueExpr::var("n"), ValueExpr::Constant(Value::integer(2)));
        let filter = FilterIter::new(Box::new(VecIter::new(rows)), gt_two);
        assert_eq!(drain(filter)?, vec![5, 3]);
        Ok(())
    }

    #[test]
    fn distinct_drops_repeats_within_limit() -> QueryResult<()> {
        assert_eq!(drain(DistinctIter::new(source(&[1, 2, 1, 3, 2]), None))?, vec![1, 2, 3]);
        assert_eq!(drain(DistinctIter::new(source(&[1, 1, 1]), Some(1)))?, vec![1]);
        assert!(matches!(
            drain(DistinctIter::new(source(&[1, 2, 3]), Some(2))),
            Err(QueryError::CollectionTooLarge { limit: 2 })
        ));
        Ok(())
    }

    #[test]
    fn union_concatenates_and_closes_inputs() -> QueryResult<()> {
        let a = Probe::new(vec![n(1)]);
        let b = Probe::new(vec![n(2), n(3)]);
        let (ca, cb) = (a.closes.clone(), b.closes.clone());
        let union = UnionIter::new(vec![Box::new(a), Box::new(b)]);
        assert_eq!(drain(union)?, vec![1, 2, 3]);
        assert_eq!((ca.get(), cb.get()), (1, 1));

        let failing = Probe::new(vec![n(1)]).failing_after(1);
        let other = Probe::new(vec![n(9)]);
        let other_closes = other.closes.clone();
        let union = UnionIter::new(vec![Box::new(failing), Box::new(other)]);
        assert!(drain(union).is_err());
        assert_eq!(other_closes.get(), 1);
        Ok(())
    }

    #[test]
    fn slice_applies_offset_and_limit() -> QueryResult<()> {
        assert_eq!(drain(SliceIter::new(source(&[1, 2, 3, 4, 5]), 1, Some(2)))?, vec![2, 3]);
        assert_eq!(drain(SliceIter::new(source(&[1, 2]), 5, None))?, Vec::<i64>::new());
        let probe = Probe::new(vec![n(1), n(2)]);
        let closes = probe.closes.clone();
        assert_eq!(drain(SliceIter::new(Box::new(probe), 0, Some(1)))?, vec![1]);
        assert_eq!(closes.get(), 1);
        Ok(())
    }

    #[test]
    fn order_sorts_by_keys() -> QueryResult<()> {
        let asc = vec![OrderElem { expr: ValueExpr::var("n"), ascending: true }];
        assert_eq!(drain(OrderIter::new(source(&[3, 10, 1]), asc, None))?, vec![1, 3, 10]);
        let desc = vec![OrderElem { expr: ValueExpr::var("n"), ascending: false }];
        assert_eq!(drain(OrderIter::new(source(&[3, 10, 1]), desc.clone(), None))?, vec![10, 3, 1]);
        assert!(matches!(
            drain(OrderIter::new(source(&[3, 10, 1]), desc, Some(2))),
            Err(QueryError::CollectionTooLarge { limit: 2 })
        ));
        Ok(())
    }
}
