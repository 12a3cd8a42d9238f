use std::fs::OpenOptions;
use std::io::Write;

use tempfile::tempdir;

use super::*;
use crate::model::xsd;

fn opts() -> StoreOptions {
    StoreOptions::default().force_sync(false)
}

fn sample_values() -> Vec<Value> {
    vec![
        Value::iri("http://example.org/people#alice"),
        Value::iri("http://example.org/people#bob"),
        Value::bnode("node7"),
        Value::literal("plain"),
        Value::Literal(Literal::with_language("chat", "fr")),
        Value::integer(42),
        Value::typed_literal("2.5", xsd::DOUBLE),
        Value::iri("urn:isbn:0451450523"),
    ]
}

#[test]
fn unknown_value_has_no_side_effects() -> Result<()> {
    let dir = tempdir()?;
    let store = ValueStore::open(dir.path(), &opts())?;
    assert_eq!(store.get_id(&Value::iri("http://nowhere/x"))?, ValueId::UNKNOWN);
    assert_eq!(store.get_id(&Value::integer(1))?, ValueId::UNKNOWN);
    assert_eq!(store.entry_count()?, 0);
    assert_eq!(store.get_value(ValueId(1))?, None);
    Ok(())
}

#[test]
fn store_then_resolve_both_ways() -> Result<()> {
    let dir = tempdir()?;
    let store = ValueStore::open(dir.path(), &opts())?;
    let mut ids = Vec::new();
    for value in sample_values() {
        let id = store.store_value(&value)?;
        assert!(!id.is_unknown());
        assert_eq!(store.store_value(&value)?, id);
        ids.push(id);
    }
    for (value, id) in sample_values().iter().zip(&ids) {
        assert_eq!(store.get_id(value)?, *id);
        assert_eq!(store.get_value(*id)?.as_ref(), Some(value));
    }
    Ok(())
}

#[test]
fn iris_share_interned_namespace() -> Result<()> {
    let dir = tempdir()?;
    let store = ValueStore::open(dir.path(), &opts())?;
    store.store_value(&Value::iri("http://example.org/ns#a"))?;
    store.store_value(&Value::iri("http://example.org/ns#b"))?;
    // one namespace entry plus two IRIs
    assert_eq!(store.entry_count()?, 3);
    let ns = store.get_namespace_id("http://example.org/ns#")?;
    assert_eq!(store.get_namespace(ns)?.as_deref(), Some("http://example.org/ns#"));
    assert!(matches!(store.get_value(ns), Err(StoreError::Corruption(_))));
    Ok(())
}

#[test]
fn ids_survive_reopen() -> Result<()> {
    let dir = tempdir()?;
    let ids: Vec<ValueId> = {
        let store = ValueStore::open(dir.path(), &opts())?;
        let ids = sample_values()
            .iter()
            .map(|v| store.store_value(v))
            .collect::<Result<_>>()?;
        store.sync()?;
        ids
    };
    let store = ValueStore::open(dir.path(), &opts())?;
    for (value, id) in sample_values().iter().zip(&ids) {
        assert_eq!(store.get_id(value)?, *id);
        assert_eq!(store.get_value(*id)?.as_ref(), Some(value));
    }
    Ok(())
}

#[test]
fn hash_index_rebuilt_after_unclean_shutdown() -> Result<()> {
    let dir = tempdir()?;
    let late = Value::iri("http://example.org/late");
    let late_id = {
        let store = ValueStore::open(dir.path(), &opts())?;
        store.store_value(&Value::literal("early"))?;
        store.sync()?;
        store.store_value(&late)?
    };
    let store = ValueStore::open(dir.path(), &opts())?;
    assert_eq!(store.get_id(&late)?, late_id);
    assert_eq!(store.get_id(&Value::literal("early"))?, ValueId(1));
    assert_eq!(store.store_value(&Value::literal("next"))?.0, late_id.0 + 1);
    Ok(())
}

#[test]
fn torn_id_tail_is_truncated() -> Result<()> {
    let dir = tempdir()?;
    {
        let store = ValueStore::open(dir.path(), &opts())?;
        store.store_value(&Value::literal("kept"))?;
        store.sync()?;
    }
    let mut file = OpenOptions::new()
        .append(true)
        .open(dir.path().join(ID_FILE))?;
    file.write_all(&[0, 0, 0])?;
    drop(file);

    let store = ValueStore::open(dir.path(), &opts())?;
    assert_eq!(store.entry_count()?, 1);
    assert_eq!(store.get_id(&Value::literal("kept"))?, ValueId(1));
    assert_eq!(store.store_value(&Value::literal("fresh"))?, ValueId(2));
    Ok(())
}

#[test]
fn dangling_offset_is_dropped() -> Result<()> {
    let dir = tempdir()?;
    {
        let store = ValueStore::open(dir.path(), &opts())?;
        store.store_value(&Value::literal("kept"))?;
        store.sync()?;
    }
    let mut file = OpenOptions::new()
        .append(true)
        .open(dir.path().join(ID_FILE))?;
    file.write_all(&9_999u64.to_be_bytes())?;
    drop(file);

    let store = ValueStore::open(dir.path(), &opts())?;
    assert_eq!(store.entry_count()?, 1);
    assert_eq!(store.get_value(ValueId(2))?, None);
    Ok(())
}

#[test]
fn newer_data_file_version_is_rejected() -> Result<()> {
    let dir = tempdir()?;
    std::fs::write(dir.path().join(DATA_FILE), b"nvf\x07")?;
    assert!(matches!(
        ValueStore::open(dir.path(), &opts()),
        Err(StoreError::UnsupportedVersion { found: 7, .. })
    ));
    std::fs::write(dir.path().join(DATA_FILE), b"xyz\x01")?;
    assert!(matches!(
        ValueStore::open(dir.path(), &opts()),
        Err(StoreError::Corruption(_))
    ));
    Ok(())
}

#[test]
fn clear_forgets_everything() -> Result<()> {
    let dir = tempdir()?;
    let store = ValueStore::open(dir.path(), &opts())?;
    let value = Value::iri("http://example.org/x");
    store.store_value(&value)?;
    store.clear()?;
    assert_eq!(store.entry_count()?, 0);
    assert_eq!(store.get_id(&value)?, ValueId::UNKNOWN);
    assert_eq!(store.store_value(&Value::literal("again"))?, ValueId(1));
    Ok(())
}

#[test]
fn small_caches_still_resolve() -> Result<()> {
    let dir = tempdir()?;
    let options = opts()
        .value_cache_size(1)
        .value_id_cache_size(1)
        .namespace_cache_size(1);
    let store = ValueStore::open(dir.path(), &options)?;
    let values: Vec<Value> = (0..50)
        .map(|i| Value::iri(format!("http://example.org/g{}/item{i}", i % 5)))
        .collect();
    let ids = values
        .iter()
        .map(|v| store.store_value(v))
        .collect::<Result<Vec<_>>>()?;
    for (value, id) in values.iter().zip(&ids).rev() {
        assert_eq!(store.get_value(*id)?.as_ref(), Some(value));
        assert_eq!(store.get_id(value)?, *id);
    }
    assert!(store.metrics().decoded > 0);
    Ok(())
}
