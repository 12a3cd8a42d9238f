#![allow(missing_docs)]

use quadra::query::{
    AggregateOp, BindingSet, CompareOp, EvaluationStrategy, GroupElem, OrderElem, ProjectionElem,
    QueryError, QueryResult, TupleExpr, ValueExpr, Var,
};
use quadra::{EvaluationOptions, Iri, NativeStore, StoreOptions, Value};
use tempfile::{tempdir, TempDir};

fn ex(local: &str) -> Value {
    Value::iri(format!("http://example.org/{local}"))
}

fn pred(local: &str) -> Iri {
    Iri::new(format!("http://example.org/{local}"))
}

fn seeded() -> Result<(TempDir, NativeStore), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let store = NativeStore::open(dir.path(), &StoreOptions::new().force_sync(false))?;
    let mut txn = store.begin()?;
    let people = [("alice", 31, "acme"), ("bob", 27, "acme"), ("carol", 45, "initech")];
    for (name, age, employer) in people {
        let graph = ex(&format!("graph/{employer}"));
        txn.add_statement(&ex(name), &pred("age"), &Value::integer(age), None)?;
        txn.add_statement(&ex(name), &pred("worksFor"), &ex(employer), Some(&graph))?;
    }
    txn.add_statement(&ex("alice"), &pred("knows"), &ex("bob"), None)?;
    txn.add_statement(&ex("bob"), &pred("knows"), &ex("carol"), None)?;
    txn.commit()?;
    Ok((dir, store))
}

fn pattern(s: Var, p: &str, o: Var) -> TupleExpr {
    TupleExpr::pattern(s, Var::constant(Value::Iri(pred(p))), o)
}

fn run(store: &NativeStore, expr: &TupleExpr) -> QueryResult<Vec<BindingSet>> {
    EvaluationStrategy::new(store, EvaluationOptions::new())
        .query(expr)?
        .collect()
}

#[test]
fn join_over_stored_statements() -> Result<(), Box<dyn std::error::Error>> {
    let (_dir, store) = seeded()?;
    let expr = pattern(Var::new("a"), "knows", Var::new("b"))
        .join(pattern(Var::new("b"), "worksFor", Var::new("org")))
        .project(vec![ProjectionElem::new("a"), ProjectionElem::renamed("org", "employer")]);
    let mut rows = run(&store, &expr)?;
    rows.sort_by_key(|row| row.to_string());
    assert_eq!(
        rows,
        vec![
            BindingSet::new().with("a", ex("alice")).with("employer", ex("acme")),
            BindingSet::new().with("a", ex("bob")).with("employer", ex("initech")),
        ]
    );
    Ok(())
}

#[test]
fn context_variable_binds_named_graphs() -> Result<(), Box<dyn std::error::Error>> {
    let (_dir, store) = seeded()?;
    let expr = TupleExpr::StatementPattern {
        subject: Var::new("s"),
        predicate: Var::new("p"),
        object: Var::new("o"),
        context: Some(Var::new("g")),
    };
    let rows = run(&store, &expr)?;
    assert_eq!(rows.len(), 3);
    assert!(rows
        .iter()
        .all(|row| row.get("p") == Some(&Value::Iri(pred("worksFor")))));

    // a bound graph restricts the scan
    let fixed = TupleExpr::StatementPattern {
        subject: Var::new("s"),
        predicate: Var::new("p"),
        object: Var::new("o"),
        context: Some(Var::constant(ex("graph/initech"))),
    };
    let rows = run(&store, &fixed)?;
    assert_eq!(rows, vec![BindingSet::new()
        .with("s", ex("carol"))
        .with("p", Value::Iri(pred("worksFor")))
        .with("o", ex("initech"))]);
    Ok(())
}

#[test]
fn group_and_aggregate_per_employer() -> Result<(), Box<dyn std::error::Error>> {
    let (_dir, store) = seeded()?;
    let expr = pattern(Var::new("who"), "worksFor", Var::new("org"))
        .join(pattern(Var::new("who"), "age", Var::new("age")))
        .group(
            vec!["org".into()],
            vec![
                GroupElem::new("staff", AggregateOp::Count(None)),
                GroupElem::new("oldest", AggregateOp::Max(ValueExpr::var("age"))),
                GroupElem::new("total", AggregateOp::Sum(ValueExpr::var("age"))),
            ],
        )
        .order(vec![OrderElem { expr: ValueExpr::var("staff"), ascending: false }]);
    let rows = run(&store, &expr)?;
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].get("org"), Some(&ex("acme")));
    assert_eq!(rows[0].get("staff"), Some(&Value::integer(2)));
    assert_eq!(rows[0].get("oldest"), Some(&Value::integer(31)));
    assert_eq!(rows[0].get("total"), Some(&Value::integer(58)));
    assert_eq!(rows[1].get("org"), Some(&ex("initech")));
    Ok(())
}

#[test]
fn filter_slice_and_limits() -> Result<(), Box<dyn std::error::Error>> {
    let (_dir, store) = seeded()?;
    let ages = pattern(Var::new("who"), "age", Var::new("age"));
    let adults_over_30 = ages
        .clone()
        .filter(ValueExpr::compare(
            CompareOp::Ge,
            ValueExpr::var("age"),
            ValueExpr::Constant(Value::integer(30)),
        ))
        .order(vec![OrderElem { expr: ValueExpr::var("age"), ascending: true }])
        .slice(1, Some(5))
        .project(vec![ProjectionElem::new("who")]);
    assert_eq!(
        run(&store, &adults_over_30)?,
        vec![BindingSet::new().with("who", ex("carol"))]
    );

    let strategy = EvaluationStrategy::new(&store, EvaluationOptions::new().max_collection_size(2));
    let ordered = ages.order(vec![OrderElem { expr: ValueExpr::var("age"), ascending: true }]);
    let result: QueryResult<Vec<BindingSet>> = strategy.query(&ordered).and_then(|rows| rows.collect());
    assert!(matches!(result, Err(QueryError::CollectionTooLarge { limit: 2 })));
    Ok(())
}

#[test]
fn transaction_source_sees_own_changes() -> Result<(), Box<dyn std::error::Error>> {
    let (_dir, store) = seeded()?;
    let knows = pattern(Var::new("a"), "knows", Var::new("b"));
    let mut txn = store.begin()?;
    txn.add_statement(&ex("carol"), &pred("knows"), &ex("alice"), None)?;
    let inside: Vec<BindingSet> = EvaluationStrategy::new(&txn, EvaluationOptions::new())
        .query(&knows)?
        .collect::<QueryResult<_>>()?;
    assert_eq!(inside.len(), 3);
    assert_eq!(run(&store, &knows)?.len(), 2);
    txn.rollback()?;
    assert_eq!(run(&store, &knows)?.len(), 2);
    Ok(())
}
