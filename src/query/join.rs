#![forbid(unsafe_code)]

use crate::query::binding::BindingSet;
use crate::query::errors::QueryResult;
use crate::query::iter::{pull, BindingIter, BoxBindingIter};

/// Opens the right-hand side for one left binding.
pub type RightFactory<'a> = Box<dyn FnMut(&BindingSet) -> QueryResult<BoxBindingIter<'a>> + 'a>;

/// Nested-loop inner join.
///
/// For every left binding a fresh right iterator is opened with that binding
/// as input and drained before the next left binding is pulled. Each right
/// row is merged with its left row; rows that disagree on a shared name are
/// dropped.
pub struct JoinIter<'a> {
    left: Option<BoxBindingIter<'a>>,
    right_factory: RightFactory<'a>,
    current: Option<(BindingSet, BoxBindingIter<'a>)>,
}

impl<'a> JoinIter<'a> {
    /// Joins `left` with the iterators produced by `right_factory`.
    pub fn new(left: BoxBindingIter<'a>, right_factory: RightFactory<'a>) -> Self {
        Self {
            left: Some(left),
            right_factory,
            current: None,
        }
    }

    fn advance(&mut self) -> QueryResult<Option<BindingSet>> {
        loop {
            if let Some((row, right)) = self.current.as_mut() {
                match pull(right.as_mut())? {
                    Some(candidate) => {
                        if let Some(merged) = row.merge(&candidate) {
                            return Ok(Some(merged));
                        }
                        continue;
                    }
                    None => {
                        if let Some((_, mut right)) = self.current.take() {
                            right.close();
                        }
                    }
                }
            }
            let Some(left) = self.left.as_mut() else {
                return Ok(None);
            };
            let Some(row) = pull(left.as_mut())? else {
                self.close();
                return Ok(None);
            };
            let right = (self.right_factory)(&row)?;
            self.current = Some((row, right));
        }
    }
}

impl BindingIter for JoinIter<'_> {
    fn try_next(&mut self) -> QueryResult<Option<BindingSet>> {
        self.advance().inspect_err(|_| self.close())
    }

    fn close(&mut self) {
        if let Some((_, mut right)) = self.current.take() {
            right.close();
        }
        if let Some(mut left) = self.left.take() {
            left.close();
        }
    }
}
