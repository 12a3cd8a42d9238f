#![forbid(unsafe_code)]

use std::cmp::Ordering;

use crate::model::{xsd, Literal, Value};
use crate::query::algebra::{CompareOp, ValueExpr};
use crate::query::binding::BindingSet;
use crate::query::errors::{QueryError, QueryResult};

fn boolean(v: bool) -> Value {
    Value::typed_literal(if v { "true" } else { "false" }, xsd::BOOLEAN)
}

/// Numeric reading of a term: the label of a numeric literal parsed as a
/// double.
pub(crate) fn numeric(value: &Value) -> Option<f64> {
    value
        .as_literal()
        .filter(|lit| lit.is_numeric())
        .and_then(Literal::as_f64)
}

fn is_plain_string(lit: &Literal) -> bool {
    lit.language().is_none() && lit.datatype().map_or(true, |dt| dt.as_str() == xsd::STRING)
}

/// Evaluates `expr` against `bindings`.
pub fn evaluate(expr: &ValueExpr, bindings: &BindingSet) -> QueryResult<Value> {
    match expr {
        ValueExpr::Var(name) => bindings
            .get(name)
            .cloned()
            .ok_or_else(|| QueryError::UnboundVariable(name.clone())),
        ValueExpr::Constant(value) => Ok(value.clone()),
        ValueExpr::Compare { op, left, right } => {
            let left = evaluate(left, bindings)?;
            let right = evaluate(right, bindings)?;
            compare(*op, &left, &right).map(boolean)
        }
        ValueExpr::And(left, right) => {
            // an error on one side is absorbed when the other side is false
            let l = effective_boolean(left, bindings);
            let r = effective_boolean(right, bindings);
            match (l, r) {
                (Ok(false), _) | (_, Ok(false)) => Ok(boolean(false)),
                (Ok(true), Ok(true)) => Ok(boolean(true)),
                (Err(err), _) | (_, Err(err)) => Err(err),
            }
        }
        ValueExpr::Or(left, right) => {
            let l = effective_boolean(left, bindings);
            let r = effective_boolean(right, bindings);
            match (l, r) {
                (Ok(true), _) | (_, Ok(true)) => Ok(boolean(true)),
                (Ok(false), Ok(false)) => Ok(boolean(false)),
                (Err(err), _) | (_, Err(err)) => Err(err),
            }
        }
        ValueExpr::Not(inner) => effective_boolean(inner, bindings).map(|v| boolean(!v)),
        ValueExpr::Bound(name) => Ok(boolean(bindings.contains(name))),
        ValueExpr::SameTerm(left, right) => {
            let left = evaluate(left, bindings)?;
            let right = evaluate(right, bindings)?;
            Ok(boolean(left == right))
        }
    }
}

/// Effective boolean value of `expr`.
pub fn effective_boolean(expr: &ValueExpr, bindings: &BindingSet) -> QueryResult<bool> {
    let value = evaluate(expr, bindings)?;
    let Some(lit) = value.as_literal() else {
        return Err(QueryError::TypeError("resources have no boolean value"));
    };
    match lit.datatype().map(|dt| dt.as_str()) {
        Some(xsd::BOOLEAN) => Ok(matches!(lit.label(), "true" | "1")),
        _ if lit.is_numeric() => Ok(lit.as_f64().is_some_and(|n| n != 0.0 && !n.is_nan())),
        _ if is_plain_string(lit) || lit.language().is_some() => Ok(!lit.label().is_empty()),
        _ => Err(QueryError::TypeError("literal has no boolean value")),
    }
}

/// Applies a comparison operator. Numbers compare numerically, plain
/// strings lexically; other terms only support (in)equality.
pub fn compare(op: CompareOp, left: &Value, right: &Value) -> QueryResult<bool> {
    let ordering = match (numeric(left), numeric(right)) {
        (Some(l), Some(r)) => l.partial_cmp(&r),
        _ => match (left.as_literal(), right.as_literal()) {
            (Some(l), Some(r)) if is_plain_string(l) && is_plain_string(r) => {
                Some(l.label().cmp(r.label()))
            }
            _ => {
                return match op {
                    CompareOp::Eq => Ok(left == right),
                    CompareOp::Ne => Ok(left != right),
                    _ => Err(QueryError::TypeError("terms are not ordered")),
                };
            }
        },
    };
    let Some(ordering) = ordering else {
        // NaN
        return Ok(op == CompareOp::Ne);
    };
    Ok(match op {
        CompareOp::Eq => ordering == Ordering::Equal,
        CompareOp::Ne => ordering != Ordering::Equal,
        CompareOp::Lt => ordering == Ordering::Less,
        CompareOp::Le => ordering != Ordering::Greater,
        CompareOp::Gt => ordering == Ordering::Greater,
        CompareOp::Ge => ordering != Ordering::Less,
    })
}

/// Total order used for sorting: unbound first, then numbers by value, then
/// every other term in its natural order.
pub fn order_terms(left: Option<&Value>, right: Option<&Value>) -> Ordering {
    match (left, right) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(l), Some(r)) => match (numeric(l), numeric(r)) {
            (Some(a), Some(b)) => a.total_cmp(&b),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => l.cmp(r),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row() -> BindingSet {
        BindingSet::new()
            .with("n", Value::integer(5))
            .with("s", Value::literal("pear"))
            .with("iri", Value::iri("http://example.org/a"))
    }

    #[test]
    fn comparisons_promote_numbers() -> QueryResult<()> {
        let five_point_oh = Value::typed_literal("5.0", xsd::DOUBLE);
        assert!(compare(CompareOp::Eq, &Value::integer(5), &five_point_oh)?);
        assert!(compare(CompareOp::Lt, &Value::literal("apple"), &Value::literal("pear"))?);
        assert!(compare(CompareOp::Ne, &Value::iri("http://a"), &Value::literal("a"))?);
        assert!(matches!(
            compare(CompareOp::Lt, &Value::iri("http://a"), &Value::iri("http://b")),
            Err(QueryError::TypeError(_))
        ));
        Ok(())
    }

    #[test]
    fn logical_operators_absorb_errors() -> QueryResult<()> {
        let unbound_gt = ValueExpr::compare(CompareOp::Gt, ValueExpr::var("missing"), ValueExpr::var("n"));
        let false_expr = ValueExpr::compare(CompareOp::Lt, ValueExpr::var("n"), ValueExpr::Constant(Value::integer(1)));
        let and = ValueExpr::And(Box::new(unbound_gt.clone()), Box::new(false_expr));
        assert!(!effective_boolean(&and, &row())?);
        let or = ValueExpr::Or(Box::new(unbound_gt), Box::new(ValueExpr::Bound("s".into())));
        assert!(effective_boolean(&or, &row())?);
        assert!(effective_boolean(&ValueExpr::var("iri"), &row()).is_err());
        assert!(!effective_boolean(&ValueExpr::Not(Box::new(ValueExpr::var("s"))), &row())?);
        Ok(())
    }

    #[test]
    fn sort_order_puts_unbound_first() {
        let two = Value::integer(2);
        let ten = Value::integer(10);
        assert_eq!(order_terms(None, Some(&two)), Ordering::Less);
        assert_eq!(order_terms(Some(&ten), Some(&two)), Ordering::Greater);
        assert_eq!(order_terms(Some(&two), Some(&Value::literal("a"))), Ordering::Less);
    }
}
