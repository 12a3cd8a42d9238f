#![allow(missing_docs)]

use std::path::{Path, PathBuf};
use std::process::{abort, Command};

use quadra::storage::TxnStatus;
use quadra::{ContextPattern, Iri, NativeStore, Result, StoreOptions, Value};
use tempfile::tempdir;

const DIR_ENV: &str = "QUADRA_CRASH_DIR";

fn options() -> StoreOptions {
    StoreOptions::new().max_dirty_nodes(4)
}

fn subject(i: usize) -> Value {
    Value::iri(format!("http://example.org/item/{i}"))
}

fn pred() -> Iri {
    Iri::new("http://example.org/rank")
}

fn run_child(test: &str, dir: &Path) -> Result<()> {
    let status = Command::new(std::env::current_exe()?)
        .env(DIR_ENV, dir)
        .arg("--exact")
        .arg("--nocapture")
        .arg("--ignored")
        .arg(test)
        .status()?;
    assert!(!status.success(), "child should abort");
    Ok(())
}

fn child_dir() -> PathBuf {
    PathBuf::from(std::env::var(DIR_ENV).unwrap_or_default())
}

#[test]
fn abort_inside_transaction_keeps_last_commit() -> Result<()> {
    let dir = tempdir()?;
    run_child("child_aborts_mid_transaction", dir.path())?;

    let store = NativeStore::open(dir.path(), &options())?;
    assert_eq!(store.triple_store().status()?, TxnStatus::None);
    assert_eq!(store.size(ContextPattern::Any)?, 100);
    let report = store.verify()?;
    assert!(report.is_consistent(), "{:?}", report.mismatches);

    // the store accepts writes again
    let mut txn = store.begin()?;
    txn.add_statement(&subject(1_000), &pred(), &Value::integer(1), None)?;
    txn.commit()?;
    assert_eq!(store.size(ContextPattern::Any)?, 101);
    Ok(())
}

#[test]
fn abort_after_commit_keeps_everything() -> Result<()> {
    let dir = tempdir()?;
    run_child("child_aborts_after_commit", dir.path())?;

    let store = NativeStore::open(dir.path(), &options())?;
    assert_eq!(store.size(ContextPattern::Any)?, 300);
    assert_eq!(
        store.namespace("ex").as_deref(),
        Some("http://example.org/")
    );
    assert!(store.verify()?.is_consistent());
    Ok(())
}

#[test]
#[ignore]
fn child_aborts_mid_transaction() -> Result<()> {
    let store = NativeStore::open(child_dir(), &options())?;
    let mut txn = store.begin()?;
    for i in 0..100 {
        txn.add_statement(&subject(i), &pred(), &Value::integer(i as i64), None)?;
    }
    txn.commit()?;

    let mut txn = store.begin()?;
    for i in 100..400 {
        txn.add_statement(&subject(i), &pred(), &Value::integer(i as i64), None)?;
    }
    txn.remove_statements(Some(&subject(3)), None, None, ContextPattern::Any)?;
    abort();
}

#[test]
#[ignore]
fn child_aborts_after_commit() -> Result<()> {
    let store = NativeStore::open(child_dir(), &options())?;
    let mut txn = store.begin()?;
    for i in 0..300 {
        txn.add_statement(&subject(i), &pred(), &Value::integer(i as i64), None)?;
    }
    txn.set_namespace("ex", "http://example.org/")?;
    txn.commit()?;
    abort();
}
