#![allow(missing_docs)]

use std::path::Path;

use quadra::model::xsd;
use quadra::{
    ContextPattern, Iri, Literal, NativeStore, Result, Statement, StoreError, StoreOptions, Value,
};
use tempfile::tempdir;

fn options() -> StoreOptions {
    StoreOptions::new().force_sync(false)
}

fn open(dir: &Path) -> Result<NativeStore> {
    NativeStore::open(dir, &options())
}

fn ex(local: &str) -> Value {
    Value::iri(format!("http://example.org/{local}"))
}

fn pred(local: &str) -> Iri {
    Iri::new(format!("http://example.org/{local}"))
}

fn all(store: &NativeStore, context: ContextPattern<'_>) -> Result<Vec<Statement>> {
    let mut out: Vec<Statement> = store
        .statements(None, None, None, context, true)?
        .collect::<Result<_>>()?;
    out.sort_by_key(|st| st.to_string());
    Ok(out)
}

#[test]
fn quads_persist_across_reopen() -> Result<()> {
    let dir = tempdir()?;
    let graph = ex("graph");
    let label = Value::Literal(Literal::with_language("Alice", "en"));
    let age = Value::Literal(Literal::typed("31", Iri::new(xsd::INTEGER)));
    {
        let store = open(dir.path())?;
        let mut txn = store.begin()?;
        assert!(txn.add_statement(&ex("alice"), &pred("name"), &label, None)?);
        assert!(txn.add_statement(&ex("alice"), &pred("age"), &age, Some(&graph))?);
        assert!(txn.add_statement(&ex("alice"), &pred("knows"), &Value::bnode("b0"), Some(&graph))?);
        assert!(!txn.add_statement(&ex("alice"), &pred("name"), &label, None)?);
        txn.commit()?;
        store.close()?;
    }

    let store = open(dir.path())?;
    assert_eq!(store.size(ContextPattern::Any)?, 3);
    assert_eq!(store.size(ContextPattern::Default)?, 1);
    assert_eq!(store.size(ContextPattern::Named(&graph))?, 2);
    assert_eq!(store.size(ContextPattern::Named(&ex("nowhere")))?, 0);
    assert_eq!(store.contexts()?, vec![graph.clone()]);

    let named = all(&store, ContextPattern::Named(&graph))?;
    assert!(named.iter().all(|st| st.context.as_ref() == Some(&graph)));
    assert!(named.iter().any(|st| st.object == age));

    let by_object: Vec<Statement> = store
        .statements(None, None, Some(&label), ContextPattern::Any, true)?
        .collect::<Result<_>>()?;
    assert_eq!(
        by_object,
        vec![Statement::new(ex("alice"), pred("name"), label.clone(), None)]
    );

    // unknown terms match nothing
    let none: Vec<Statement> = store
        .statements(Some(&ex("nobody")), None, None, ContextPattern::Any, true)?
        .collect::<Result<_>>()?;
    assert!(none.is_empty());
    assert!(store.verify()?.is_consistent());
    Ok(())
}

#[test]
fn inferred_statements_are_tracked_separately() -> Result<()> {
    let dir = tempdir()?;
    let store = open(dir.path())?;
    let mut txn = store.begin()?;
    txn.add_statement(&ex("a"), &pred("type"), &ex("Person"), None)?;
    txn.add_inferred(&ex("a"), &pred("type"), &ex("Agent"), None)?;
    txn.commit()?;

    let explicit: Vec<Statement> = store
        .statements(None, None, None, ContextPattern::Any, false)?
        .collect::<Result<_>>()?;
    assert_eq!(explicit.len(), 1);
    assert_eq!(all(&store, ContextPattern::Any)?.len(), 2);

    // removing explicit statements leaves inferred ones alone
    let mut txn = store.begin()?;
    assert_eq!(
        txn.remove_statements(None, Some(&pred("type")), None, ContextPattern::Any)?,
        1
    );
    txn.commit()?;
    let left = all(&store, ContextPattern::Any)?;
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].object, ex("Agent"));

    let mut txn = store.begin()?;
    assert_eq!(
        txn.remove_inferred(None, None, None, ContextPattern::Any)?,
        1
    );
    txn.commit()?;
    assert_eq!(store.size(ContextPattern::Any)?, 0);
    Ok(())
}

#[test]
fn transaction_view_and_rollback() -> Result<()> {
    let dir = tempdir()?;
    let store = open(dir.path())?;
    let mut txn = store.begin()?;
    txn.add_statement(&ex("s"), &pred("p"), &ex("o1"), None)?;
    txn.commit()?;

    let mut txn = store.begin()?;
    txn.add_statement(&ex("s"), &pred("p"), &ex("o2"), None)?;
    txn.remove_statements(None, None, Some(&ex("o1")), ContextPattern::Any)?;
    let seen: Vec<Statement> = txn
        .statements(None, None, None, ContextPattern::Any, true)?
        .collect::<Result<_>>()?;
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].object, ex("o2"));
    // readers keep seeing the committed state
    assert_eq!(all(&store, ContextPattern::Any)?[0].object, ex("o1"));
    txn.set_namespace("ex", "http://example.org/")?;
    txn.rollback()?;

    let after = all(&store, ContextPattern::Any)?;
    assert_eq!(after.len(), 1);
    assert_eq!(after[0].object, ex("o1"));
    assert!(store.namespace("ex").is_none());
    Ok(())
}

#[test]
fn readers_on_other_threads_see_committed_state() -> Result<()> {
    let dir = tempdir()?;
    let store = open(dir.path())?;
    let mut txn = store.begin()?;
    for i in 0..20 {
        txn.add_statement(&ex("s"), &pred("p"), &Value::integer(i), None)?;
    }
    txn.commit()?;

    let mut txn = store.begin()?;
    txn.clear(ContextPattern::Any)?;
    let seen = std::thread::scope(|scope| {
        scope
            .spawn(|| store.size(ContextPattern::Any))
            .join()
            .map_err(|_| StoreError::Invalid("reader thread panicked"))
    })??;
    assert_eq!(seen, 20);
    assert!(matches!(store.try_begin(), Err(StoreError::Transaction(_))));
    txn.commit()?;
    assert_eq!(store.size(ContextPattern::Any)?, 0);
    Ok(())
}

#[test]
fn namespaces_persist() -> Result<()> {
    let dir = tempdir()?;
    {
        let store = open(dir.path())?;
        let mut txn = store.begin()?;
        txn.set_namespace("ex", "http://example.org/")?;
        txn.set_namespace("foaf", "http://xmlns.com/foaf/0.1/")?;
        txn.commit()?;
        let mut txn = store.begin()?;
        assert_eq!(txn.remove_namespace("foaf").as_deref(), Some("http://xmlns.com/foaf/0.1/"));
        txn.commit()?;
        store.close()?;
    }
    let store = open(dir.path())?;
    assert_eq!(
        store.namespaces(),
        vec![("ex".to_owned(), "http://example.org/".to_owned())]
    );
    Ok(())
}

#[test]
fn second_open_of_same_directory_is_locked() -> Result<()> {
    let dir = tempdir()?;
    let store = open(dir.path())?;
    assert!(matches!(open(dir.path()), Err(StoreError::Locked)));
    store.close()?;
    let again = open(dir.path())?;
    again.close()?;
    Ok(())
}

#[test]
fn changing_index_set_keeps_statements() -> Result<()> {
    let dir = tempdir()?;
    {
        let store = open(dir.path())?;
        let mut txn = store.begin()?;
        for i in 0..50 {
            txn.add_statement(&ex(&format!("s{i}")), &pred("p"), &ex(&format!("o{}", i % 7)), None)?;
        }
        txn.commit()?;
        store.close()?;
    }
    let store = NativeStore::open(dir.path(), &options().triple_indexes("opsc, cspo"))?;
    let orders: Vec<String> = store
        .triple_store()
        .index_orders()
        .iter()
        .map(ToString::to_string)
        .collect();
    assert_eq!(orders, vec!["opsc".to_owned(), "cspo".to_owned()]);
    assert_eq!(store.size(ContextPattern::Any)?, 50);
    let o3: Vec<Statement> = store
        .statements(None, None, Some(&ex("o3")), ContextPattern::Any, true)?
        .collect::<Result<_>>()?;
    assert_eq!(o3.len(), 7);
    assert!(store.verify()?.is_consistent());
    assert!(!dir.path().join("triples-spoc.dat").exists());
    Ok(())
}
