#![forbid(unsafe_code)]

//! Algebra trees handed to the evaluator. Query text parsing happens
//! elsewhere; these types are built directly or by a front end.

use crate::model::Value;
use crate::query::binding::BindingSet;

/// Variable slot in a statement pattern: either a named variable or a
/// constant term.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Var {
    /// Variable name; constants get a generated name that is never projected.
    pub name: String,
    /// Fixed value for constants.
    pub value: Option<Value>,
}

impl Var {
    /// Free variable.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: None,
        }
    }

    /// Constant term.
    pub fn constant(value: Value) -> Self {
        Self {
            name: format!("_const_{}", value.lexical()),
            value: Some(value),
        }
    }

    /// Value from the constant or from `bindings`.
    pub fn resolve<'b>(&'b self, bindings: &'b BindingSet) -> Option<&'b Value> {
        self.value.as_ref().or_else(|| bindings.get(&self.name))
    }
}

/// Comparison operators.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompareOp {
    /// `=`
    Eq,
    /// `!=`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
}

/// Expressions over one binding set.
#[derive(Clone, Debug, PartialEq)]
pub enum ValueExpr {
    /// Value of a variable.
    Var(String),
    /// Literal term.
    Constant(Value),
    /// Binary comparison.
    Compare {
        /// Operator.
        op: CompareOp,
        /// Left operand.
        left: Box<ValueExpr>,
        /// Right operand.
        right: Box<ValueExpr>,
    },
    /// Logical and.
    And(Box<ValueExpr>, Box<ValueExpr>),
    /// Logical or.
    Or(Box<ValueExpr>, Box<ValueExpr>),
    /// Logical negation.
    Not(Box<ValueExpr>),
    /// True when the variable has a value.
    Bound(String),
    /// Term identity, without numeric promotion.
    SameTerm(Box<ValueExpr>, Box<ValueExpr>),
}

impl ValueExpr {
    /// `left op right`.
    pub fn compare(op: CompareOp, left: ValueExpr, right: ValueExpr) -> Self {
        ValueExpr::Compare {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// Variable reference.
    pub fn var(name: impl Into<String>) -> Self {
        ValueExpr::Var(name.into())
    }
}

/// Aggregate functions usable in a [`TupleExpr::Group`].
#[derive(Clone, Debug, PartialEq)]
pub enum AggregateOp {
    /// Group size without an argument, distinct bound values with one.
    Count(Option<ValueExpr>),
    /// Smallest numeric value.
    Min(ValueExpr),
    /// Largest numeric value.
    Max(ValueExpr),
    /// Numeric sum.
    Sum(ValueExpr),
    /// Numeric mean.
    Avg(ValueExpr),
    /// Any bound value.
    Sample(ValueExpr),
    /// Labels joined by `separator`.
    GroupConcat {
        /// Concatenated expression.
        expr: ValueExpr,
        /// Separator between labels.
        separator: String,
    },
}

/// Aggregate bound to an output name.
#[derive(Clone, Debug, PartialEq)]
pub struct GroupElem {
    /// Output variable.
    pub name: String,
    /// Function computed per group.
    pub op: AggregateOp,
}

impl GroupElem {
    /// `op AS name`.
    pub fn new(name: impl Into<String>, op: AggregateOp) -> Self {
        Self {
            name: name.into(),
            op,
        }
    }
}

/// Renaming of one projected variable.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProjectionElem {
    /// Name in the input bindings.
    pub source: String,
    /// Name in the output bindings.
    pub target: String,
}

impl ProjectionElem {
    /// Projects `name` unchanged.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            source: name.clone(),
            target: name,
        }
    }

    /// Projects `source AS target`.
    pub fn renamed(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
        }
    }
}

/// Sort key of an [`TupleExpr::Order`].
#[derive(Clone, Debug, PartialEq)]
pub struct OrderElem {
    /// Key expression.
    pub expr: ValueExpr,
    /// Ascending when true.
    pub ascending: bool,
}

/// Operator tree producing binding sets.
#[derive(Clone, Debug, PartialEq)]
pub enum TupleExpr {
    /// Statements matching four slots; without a context slot any graph
    /// matches.
    StatementPattern {
        /// Subject slot.
        subject: Var,
        /// Predicate slot.
        predicate: Var,
        /// Object slot.
        object: Var,
        /// Named graph slot; an unbound variable matches named graphs only.
        context: Option<Var>,
    },
    /// Nested-loop inner join.
    Join(Box<TupleExpr>, Box<TupleExpr>),
    /// Grouping with aggregates.
    Group {
        /// Input.
        arg: Box<TupleExpr>,
        /// Group-by variables.
        group_by: Vec<String>,
        /// Aggregates per group.
        aggregates: Vec<GroupElem>,
    },
    /// Variable selection and renaming.
    Projection {
        /// Input.
        arg: Box<TupleExpr>,
        /// Projected variables.
        elems: Vec<ProjectionElem>,
    },
    /// Keeps bindings for which the condition is true.
    Filter {
        /// Input.
        arg: Box<TupleExpr>,
        /// Condition.
        condition: ValueExpr,
    },
    /// Drops duplicate bindings.
    Distinct(Box<TupleExpr>),
    /// Bindings of both inputs.
    Union(Box<TupleExpr>, Box<TupleExpr>),
    /// Offset and limit.
    Slice {
        /// Input.
        arg: Box<TupleExpr>,
        /// Bindings skipped.
        offset: usize,
        /// Bindings returned after the offset.
        limit: Option<usize>,
    },
    /// Sorting.
    Order {
        /// Input.
        arg: Box<TupleExpr>,
        /// Sort keys, most significant first.
        elems: Vec<OrderElem>,
    },
    /// One empty binding set.
    SingletonSet,
    /// No bindings.
    EmptySet,
    /// Inline bindings.
    BindingSetAssignment(Vec<BindingSet>),
}

impl TupleExpr {
    /// Statement pattern over the given slots in any graph.
    pub fn pattern(subject: Var, predicate: Var, object: Var) -> Self {
        TupleExpr::StatementPattern {
            subject,
            predicate,
            object,
            context: None,
        }
    }

    /// `Join(self, right)`.
    pub fn join(self, right: TupleExpr) -> Self {
        TupleExpr::Join(Box::new(self), Box::new(right))
    }

    /// `Union(self, right)`.
    pub fn union(self, right: TupleExpr) -> Self {
        TupleExpr::Union(Box::new(self), Box::new(right))
    }

    /// `Filter(self, condition)`.
    pub fn filter(self, condition: ValueExpr) -> Self {
        TupleExpr::Filter {
            arg: Box::new(self),
            condition,
        }
    }

    /// `Projection(self, elems)`.
    pub fn project(self, elems: Vec<ProjectionElem>) -> Self {
        TupleExpr::Projection {
            arg: Box::new(self),
            elems,
        }
    }

    /// `Group(self, group_by, aggregates)`.
    pub fn group(self, group_by: Vec<String>, aggregates: Vec<GroupElem>) -> Self {
        TupleExpr::Group {
            arg: Box::new(self),
            group_by,
            aggregates,
        }
    }

    /// `Distinct(self)`.
    pub fn distinct(self) -> Self {
        TupleExpr::Distinct(Box::new(self))
    }

    /// `Slice(self, offset, limit)`.
    pub fn slice(self, offset: usize, limit: Option<usize>) -> Self {
        TupleExpr::Slice {
            arg: Box::new(self),
            offset,
            limit,
        }
    }

    /// `Order(self, elems)`.
    pub fn order(self, elems: Vec<OrderElem>) -> Self {
        TupleExpr::Order {
            arg: Box::new(self),
            elems,
        }
    }
}
