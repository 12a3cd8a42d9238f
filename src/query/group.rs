#![forbid(unsafe_code)]

use rustc_hash::{FxHashMap, FxHashSet};

use crate::model::{xsd, Literal, Value};
use crate::query::algebra::{AggregateOp, GroupElem};
use crate::query::binding::BindingSet;
use crate::query::errors::QueryResult;
use crate::query::expr::{evaluate, numeric};
use crate::query::iter::{pull, BindingIter, BoxBindingIter, CollectionLimit};

/// Running state of one aggregate within one group.
enum Accumulator {
    CountAll(u64),
    CountDistinct(FxHashSet<Value>),
    Min(Option<(f64, Value)>),
    Max(Option<(f64, Value)>),
    Sum { total: f64, integral: bool },
    Avg { total: f64, count: u64 },
    Sample(Option<Value>),
    Concat { parts: Vec<String>, separator: String },
}

impl Accumulator {
    fn new(op: &AggregateOp) -> Self {
        match op {
            AggregateOp::Count(None) => Accumulator::CountAll(0),
            AggregateOp::Count(Some(_)) => Accumulator::CountDistinct(FxHashSet::default()),
            AggregateOp::Min(_) => Accumulator::Min(None),
            AggregateOp::Max(_) => Accumulator::Max(None),
            AggregateOp::Sum(_) => Accumulator::Sum {
                total: 0.0,
                integral: true,
            },
            AggregateOp::Avg(_) => Accumulator::Avg { total: 0.0, count: 0 },
            AggregateOp::Sample(_) => Accumulator::Sample(None),
            AggregateOp::GroupConcat { separator, .. } => Accumulator::Concat {
                parts: Vec::new(),
                separator: separator.clone(),
            },
        }
    }

    fn update(&mut self, op: &AggregateOp, row: &BindingSet) -> QueryResult<()> {
        let expr = match op {
            AggregateOp::Count(None) => {
                if let Accumulator::CountAll(n) = self {
                    *n += 1;
                }
                return Ok(());
            }
            AggregateOp::Count(Some(expr))
            | AggregateOp::Min(expr)
            | AggregateOp::Max(expr)
            | AggregateOp::Sum(expr)
            | AggregateOp::Avg(expr)
            | AggregateOp::Sample(expr)
            | AggregateOp::GroupConcat { expr, .. } => expr,
        };
        let value = match evaluate(expr, row) {
            Ok(value) => value,
            // unbound or ill-typed arguments do not contribute
            Err(err) if err.is_expression_error() => return Ok(()),
            Err(err) => return Err(err),
        };
        match self {
            Accumulator::CountAll(_) => {}
            Accumulator::CountDistinct(seen) => {
                seen.insert(value);
            }
            Accumulator::Min(best) => {
                if let Some(n) = label_number(&value) {
                    if best.as_ref().map_or(true, |(b, _)| n < *b) {
                        *best = Some((n, value));
                    }
                }
            }
            Accumulator::Max(best) => {
                if let Some(n) = label_number(&value) {
                    if best.as_ref().map_or(true, |(b, _)| n > *b) {
                        *best = Some((n, value));
                    }
                }
            }
            Accumulator::Sum { total, integral } => {
                if let Some(n) = numeric(&value) {
                    *total += n;
                    *integral &= is_integer_typed(&value);
                }
            }
            Accumulator::Avg { total, count } => {
                if let Some(n) = numeric(&value) {
                    *total += n;
                    *count += 1;
                }
            }
            Accumulator::Sample(sample) => {
                if sample.is_none() {
                    *sample = Some(value);
                }
            }
            Accumulator::Concat { parts, .. } => parts.push(value.lexical().to_owned()),
        }
        Ok(())
    }

    /// Final value; `None` leaves the output unbound.
    fn finish(self) -> Option<Value> {
        match self {
            Accumulator::CountAll(n) => Some(Value::integer(n as i64)),
            Accumulator::CountDistinct(seen) => Some(Value::integer(seen.len() as i64)),
            Accumulator::Min(best) | Accumulator::Max(best) => best.map(|(_, value)| value),
            Accumulator::Sum { total, integral } => Some(if integral {
                Value::integer(total as i64)
            } else {
                double(total)
            }),
            Accumulator::Avg { total, count } => (count > 0).then(|| double(total / count as f64)),
            Accumulator::Sample(sample) => sample,
            Accumulator::Concat { parts, separator } => Some(Value::literal(parts.join(&separator))),
        }
    }
}

fn double(n: f64) -> Value {
    Value::typed_literal(n.to_string(), xsd::DOUBLE)
}

/// Label of any literal read as a double, whatever its datatype. MIN and
/// MAX rank on this; NaN has no place in the order and is skipped.
fn label_number(value: &Value) -> Option<f64> {
    value
        .as_literal()
        .and_then(Literal::as_f64)
        .filter(|n| !n.is_nan())
}

fn is_integer_typed(value: &Value) -> bool {
    value
        .as_literal()
        .and_then(|lit| lit.datatype())
        .is_some_and(|dt| {
            matches!(
                dt.as_str(),
                xsd::INTEGER | xsd::INT | xsd::LONG | xsd::SHORT | xsd::BYTE
            )
        })
}

type GroupKey = Vec<Option<Value>>;

struct Group {
    key: GroupKey,
    accumulators: Vec<Accumulator>,
}

/// Grouping with aggregates.
///
/// The input is drained on the first pull. Two rows share a group when every
/// group-by name is unbound in both or bound to equal values. Groups are
/// emitted in first-seen order. Without group-by names exactly one group is
/// produced, even for empty input.
pub struct GroupIter<'a> {
    source: Option<BoxBindingIter<'a>>,
    parent: BindingSet,
    group_by: Vec<String>,
    aggregates: Vec<GroupElem>,
    limit: CollectionLimit,
    output: Option<std::vec::IntoIter<BindingSet>>,
}

impl<'a> GroupIter<'a> {
    /// Groups `source` by `group_by`. `parent` bindings are copied into
    /// every output row.
    pub fn new(
        source: BoxBindingIter<'a>,
        parent: BindingSet,
        group_by: Vec<String>,
        aggregates: Vec<GroupElem>,
        max_groups: Option<usize>,
    ) -> Self {
        Self {
            source: Some(source),
            parent,
            group_by,
            aggregates,
            limit: CollectionLimit::new(max_groups),
            output: None,
        }
    }

    fn new_group(&self, key: GroupKey) -> Group {
        Group {
            key,
            accumulators: self.aggregates.iter().map(|elem| Accumulator::new(&elem.op)).collect(),
        }
    }

    fn build(&mut self) -> QueryResult<Vec<BindingSet>> {
        let mut groups: Vec<Group> = Vec::new();
        let mut index: FxHashMap<GroupKey, usize> = FxHashMap::default();
        if self.group_by.is_empty() {
            groups.push(self.new_group(Vec::new()));
            index.insert(Vec::new(), 0);
        }
        if let Some(mut source) = self.source.take() {
            while let Some(row) = pull(source.as_mut())? {
                let key: GroupKey = self.group_by.iter().map(|name| row.get(name).cloned()).collect();
                let slot = match index.get(&key) {
                    Some(slot) => *slot,
                    None => {
                        groups.push(self.new_group(key.clone()));
                        self.limit.check(groups.len()).inspect_err(|_| source.close())?;
                        index.insert(key, groups.len() - 1);
                        groups.len() - 1
                    }
                };
                let group = &mut groups[slot];
                for (acc, elem) in group.accumulators.iter_mut().zip(&self.aggregates) {
                    acc.update(&elem.op, &row).inspect_err(|_| source.close())?;
                }
            }
            source.close();
        }
        Ok(groups
            .into_iter()
            .map(|group| {
                let mut out = self.parent.clone();
                for (name, value) in self.group_by.iter().zip(group.key) {
                    if let Some(value) = value {
                        out.insert(name.clone(), value);
                    }
                }
                for (elem, acc) in self.aggregates.iter().zip(group.accumulators) {
                    if let Some(value) = acc.finish() {
                        out.insert(elem.name.clone(), value);
                    }
                }
                out
            })
            .collect())
    }
}

impl BindingIter for GroupIter<'_> {
    fn try_next(&mut self) -> QueryResult<Option<BindingSet>> {
        if self.output.is_none() {
            let rows = self.build().inspect_err(|_| self.close())?;
            self.output = Some(rows.into_iter());
        }
        Ok(self.output.as_mut().and_then(Iterator::next))
    }

    fn close(&mut self) {
        if let Some(mut source) = self.source.take() {
            source.close();
        }
        self.output = Some(Vec::new().into_iter());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::algebra::ValueExpr;
    use crate::query::errors::QueryError;
    use crate::query::iter::VecIter;

    fn rows(values: &[Option<i64>]) -> BoxBindingIter<'static> {
        let rows = values
            .iter()
            .map(|v| match v {
                Some(v) => BindingSet::new().with("g", Value::integer(*v)),
                None => BindingSet::new(),
            })
            .collect();
        Box::new(VecIter::new(rows))
    }

    fn drain(mut iter: impl BindingIter) -> QueryResult<Vec<BindingSet>> {
        let mut out = Vec::new();
        while let Some(row) = iter.try_next()? {
            out.push(row);
        }
        Ok(out)
    }

    #[test]
    fn count_star_per_group_in_first_seen_order() -> QueryResult<()> {
        let group = GroupIter::new(
            rows(&[Some(1), Some(1), Some(2)]),
            BindingSet::new(),
            vec!["g".into()],
            vec![GroupElem::new("count", AggregateOp::Count(None))],
            None,
        );
        let out = drain(group)?;
        assert_eq!(
            out,
            vec![
                BindingSet::new().with("g", Value::integer(1)).with("count", Value::integer(2)),
                BindingSet::new().with("g", Value::integer(2)).with("count", Value::integer(1)),
            ]
        );
        Ok(())
    }

    #[test]
    fn unbound_group_keys_form_their_own_group() -> QueryResult<()> {
        let group = GroupIter::new(
            rows(&[None, Some(1), None]),
            BindingSet::new(),
            vec!["g".into()],
            vec![GroupElem::new("n", AggregateOp::Count(None))],
            None,
        );
        let out = drain(group)?;
        assert_eq!(out.len(), 2);
        assert_eq!(out[0], BindingSet::new().with("n", Value::integer(2)));
        Ok(())
    }

    #[test]
    fn numeric_aggregates_skip_non_numbers() -> QueryResult<()> {
        let data = vec![
            BindingSet::new().with("v", Value::integer(4)),
            BindingSet::new().with("v", Value::literal("not a number")),
            BindingSet::new().with("v", Value::typed_literal("1.5", xsd::DECIMAL)),
            BindingSet::new().with("v", Value::integer(4)),
            BindingSet::new(),
        ];
        let v = || ValueExpr::var("v");
        let group = GroupIter::new(
            Box::new(VecIter::new(data)),
            BindingSet::new(),
            Vec::new(),
            vec![
                GroupElem::new("min", AggregateOp::Min(v())),
                GroupElem::new("max", AggregateOp::Max(v())),
                GroupElem::new("sum", AggregateOp::Sum(v())),
                GroupElem::new("avg", AggregateOp::Avg(v())),
                GroupElem::new("distinct", AggregateOp::Count(Some(v()))),
                GroupElem::new("all", AggregateOp::Count(None)),
                GroupElem::new("sample", AggregateOp::Sample(v())),
                GroupElem::new(
                    "concat",
                    AggregateOp::GroupConcat {
                        expr: v(),
                        separator: "|".into(),
                    },
                ),
            ],
            None,
        );
        let out = drain(group)?;
        assert_eq!(out.len(), 1);
        let row = &out[0];
        assert_eq!(row.get("min"), Some(&Value::typed_literal("1.5", xsd::DECIMAL)));
        assert_eq!(row.get("max"), Some(&Value::integer(4)));
        assert_eq!(row.get("sum"), Some(&Value::typed_literal("9.5", xsd::DOUBLE)));
        assert_eq!(row.get("avg"), Some(&Value::typed_literal(
            (9.5f64 / 3.0).to_string(),
            xsd::DOUBLE
        )));
        assert_eq!(row.get("distinct"), Some(&Value::integer(3)));
        assert_eq!(row.get("all"), Some(&Value::integer(5)));
        assert_eq!(row.get("sample"), Some(&Value::integer(4)));
        assert_eq!(row.get("concat"), Some(&Value::literal("4|not a number|1.5|4")));
        Ok(())
    }

    #[test]
    fn min_and_max_parse_labels_of_any_literal() -> QueryResult<()> {
        let data = vec![
            BindingSet::new().with("v", Value::literal("7")),
            BindingSet::new().with("v", Value::literal("3")),
            BindingSet::new().with("v", Value::typed_literal("5", xsd::STRING)),
            BindingSet::new().with("v", Value::literal("seven")),
            BindingSet::new().with("v", Value::iri("http://example.org/9")),
        ];
        let group = GroupIter::new(
            Box::new(VecIter::new(data)),
            BindingSet::new(),
            Vec::new(),
            vec![
                GroupElem::new("min", AggregateOp::Min(ValueExpr::var("v"))),
                GroupElem::new("max", AggregateOp::Max(ValueExpr::var("v"))),
            ],
            None,
        );
        let out = drain(group)?;
        assert_eq!(
            out,
            vec![BindingSet::new()
                .with("min", Value::literal("3"))
                .with("max", Value::literal("7"))]
        );
        Ok(())
    }

    #[test]
    fn empty_input_without_keys_yields_one_row() -> QueryResult<()> {
        let group = GroupIter::new(
            rows(&[]),
            BindingSet::new(),
            Vec::new(),
            vec![
                GroupElem::new("count", AggregateOp::Count(None)),
                GroupElem::new("min", AggregateOp::Min(ValueExpr::var("g"))),
                GroupElem::new("max", AggregateOp::Max(ValueExpr::var("g"))),
            ],
            None,
        );
        let out = drain(group)?;
        // min and max stay unbound rather than reporting infinities
        assert_eq!(out, vec![BindingSet::new().with("count", Value::integer(0))]);

        let keyed = GroupIter::new(rows(&[]), BindingSet::new(), vec!["g".into()], Vec::new(), None);
        assert!(drain(keyed)?.is_empty());
        Ok(())
    }

    #[test]
    fn group_count_is_limited() {
        let group = GroupIter::new(
            rows(&[Some(1), Some(2), Some(3)]),
            BindingSet::new(),
            vec!["g".into()],
            Vec::new(),
            Some(2),
        );
        assert!(matches!(drain(group), Err(QueryError::CollectionTooLarge { limit: 2 })));
    }
}
