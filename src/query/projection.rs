#![forbid(unsafe_code)]

use crate::query::algebra::ProjectionElem;
use crate::query::binding::BindingSet;
use crate::query::errors::QueryResult;
use crate::query::iter::{pull, BindingIter, BoxBindingIter};

/// Renames projected variables and drops the rest, one output row per
/// input row. Targets whose source is unbound are left out.
pub struct ProjectionIter<'a> {
    source: Option<BoxBindingIter<'a>>,
    elems: Vec<ProjectionElem>,
}

impl<'a> ProjectionIter<'a> {
    /// Projects `source` onto `elems`.
    pub fn new(source: BoxBindingIter<'a>, elems: Vec<ProjectionElem>) -> Self {
        Self {
            source: Some(source),
            elems,
        }
    }

    /// Applies the projection to one row.
    pub fn project(elems: &[ProjectionElem], row: &BindingSet) -> BindingSet {
        let mut out = BindingSet::new();
        for elem in elems {
            if let Some(value) = row.get(&elem.source) {
                out.insert(elem.target.clone(), value.clone());
            }
        }
        out
    }
}

impl BindingIter for ProjectionIter<'_> {
    fn try_next(&mut self) -> QueryResult<Option<BindingSet>> {
        let Some(source) = self.source.as_mut() else {
            return Ok(None);
        };
        match pull(source.as_mut())? {
            Some(row) => Ok(Some(Self::project(&self.elems, &row))),
            None => {
                self.close();
                Ok(None)
            }
        }
    }

    fn close(&mut self) {
        if let Some(mut source) = self.source.take() {
            source.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Value;
    use crate::query::iter::VecIter;

    #[test]
    fn renames_and_omits_unbound() -> QueryResult<()> {
        let input = vec![
            BindingSet::new()
                .with("s", Value::iri("http://example.org/a"))
                .with("o", Value::integer(1)),
            BindingSet::new().with("s", Value::iri("http://example.org/b")),
        ];
        let mut projection = ProjectionIter::new(
            Box::new(VecIter::new(input)),
            vec![ProjectionElem::renamed("s", "subject"), ProjectionElem::new("o")],
        );
        assert_eq!(
            projection.try_next()?,
            Some(
                BindingSet::new()
                    .with("subject", Value::iri("http://example.org/a"))
                    .with("o", Value::integer(1))
            )
        );
        assert_eq!(
            projection.try_next()?,
            Some(BindingSet::new().with("subject", Value::iri("http://example.org/b")))
        );
        assert_eq!(projection.try_next()?, None);
        Ok(())
    }
}
