#![forbid(unsafe_code)]

//! The store handle tying the value dictionary, the statement indexes and the
//! namespace table to one data directory.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::model::{ContextPattern, Iri, Statement, Value};
use crate::primitives::concurrency::DirLock;
use crate::storage::namespaces::NamespaceStore;
use crate::storage::options::StoreOptions;
use crate::storage::triples::{
    ReadMode, TripleIter, TriplePattern, TripleRecord, TripleStore, VerifyReport,
};
use crate::storage::values::ValueStore;
use crate::types::{Result, StoreError, ValueId};

/// Resolves bound terms to ids. `Ok(None)` means some bound term has never
/// been stored, so nothing can match.
fn resolve_pattern(
    values: &ValueStore,
    subject: Option<&Value>,
    predicate: Option<&Value>,
    object: Option<&Value>,
    context: ContextPattern<'_>,
) -> Result<Option<TriplePattern>> {
    let mut ids = [None; 3];
    for (slot, value) in ids.iter_mut().zip([subject, predicate, object]) {
        if let Some(value) = value {
            let id = values.get_id(value)?;
            if id.is_unknown() {
                return Ok(None);
            }
            *slot = Some(id);
        }
    }
    let context = match context {
        ContextPattern::Any => None,
        ContextPattern::Default => Some(ValueId::UNKNOWN),
        ContextPattern::Named(value) => {
            let id = values.get_id(value)?;
            if id.is_unknown() {
                return Ok(None);
            }
            Some(id)
        }
    };
    Ok(Some(TriplePattern {
        subject: ids[0],
        predicate: ids[1],
        object: ids[2],
        context,
    }))
}

fn decode_statement(values: &ValueStore, record: &TripleRecord) -> Result<Statement> {
    let fetch = |id: ValueId| -> Result<Value> {
        values
            .get_value(id)?
            .ok_or(StoreError::Corruption("statement refers to a missing value"))
    };
    let Value::Iri(predicate) = fetch(record.predicate)? else {
        return Err(StoreError::Corruption("statement predicate is not an IRI"));
    };
    let context = if record.context.is_unknown() {
        None
    } else {
        Some(fetch(record.context)?)
    };
    Ok(Statement::new(
        fetch(record.subject)?,
        predicate,
        fetch(record.object)?,
        context,
    ))
}

/// Lazy sequence of decoded statements.
///
/// Iterators over committed data delay commits until closed or dropped.
pub struct StatementIter<'a> {
    values: &'a ValueStore,
    records: Option<TripleIter>,
}

impl<'a> StatementIter<'a> {
    fn new(values: &'a ValueStore, records: Option<TripleIter>) -> Self {
        Self { values, records }
    }

    /// Next statement, or `None` at the end.
    pub fn try_next(&mut self) -> Result<Option<Statement>> {
        let Some(records) = self.records.as_mut() else {
            return Ok(None);
        };
        match records.try_next()? {
            Some(record) => decode_statement(self.values, &record).map(Some),
            None => {
                self.close();
                Ok(None)
            }
        }
    }

    /// Releases the underlying scan. Idempotent.
    pub fn close(&mut self) {
        if let Some(mut records) = self.records.take() {
            records.close();
        }
    }
}

impl Iterator for StatementIter<'_> {
    type Item = Result<Statement>;

    fn next(&mut self) -> Option<Self::Item> {
        self.try_next().transpose()
    }
}

/// Persistent quad store in one data directory.
///
/// Any number of threads may read concurrently; writes go through a single
/// [`Transaction`] at a time.
pub struct NativeStore {
    dir: PathBuf,
    values: ValueStore,
    triples: TripleStore,
    namespaces: NamespaceStore,
    writer: Mutex<()>,
    closed: bool,
    _lock: DirLock,
}

impl NativeStore {
    /// Opens or creates the store in `dir`, recovering from an interrupted
    /// transaction. Fails with [`StoreError::Locked`] when the directory is
    /// already open.
    pub fn open(dir: impl AsRef<Path>, options: &StoreOptions) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        let lock = DirLock::acquire(&dir)?;
        let values = ValueStore::open(&dir, options)?;
        let triples = TripleStore::open(&dir, options)?;
        let namespaces = NamespaceStore::open(&dir, options.force_sync)?;
        info!(dir = %dir.display(), "native store opened");
        Ok(Self {
            dir,
            values,
            triples,
            namespaces,
            writer: Mutex::new(()),
            closed: false,
            _lock: lock,
        })
    }

    /// Data directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The value dictionary.
    pub fn value_store(&self) -> &ValueStore {
        &self.values
    }

    /// The statement indexes.
    pub fn triple_store(&self) -> &TripleStore {
        &self.triples
    }

    /// Starts a write transaction, waiting for a running one to finish.
    pub fn begin(&self) -> Result<Transaction<'_>> {
        self.start(self.writer.lock())
    }

    /// Starts a write transaction, failing when another one is running.
    pub fn try_begin(&self) -> Result<Transaction<'_>> {
        let guard = self
            .writer
            .try_lock()
            .ok_or(StoreError::Transaction("another transaction is active"))?;
        self.start(guard)
    }

    fn start<'a>(&'a self, guard: MutexGuard<'a, ()>) -> Result<Transaction<'a>> {
        self.triples.start_transaction()?;
        Ok(Transaction {
            store: self,
            _writer: guard,
            finished: false,
            cleared: false,
        })
    }

    /// Committed statements matching the given terms. `None` is a wildcard.
    pub fn statements(
        &self,
        subject: Option<&Value>,
        predicate: Option<&Iri>,
        object: Option<&Value>,
        context: ContextPattern<'_>,
        include_inferred: bool,
    ) -> Result<StatementIter<'_>> {
        self.scan(subject, predicate, object, context, include_inferred, ReadMode::Committed)
    }

    fn scan(
        &self,
        subject: Option<&Value>,
        predicate: Option<&Iri>,
        object: Option<&Value>,
        context: ContextPattern<'_>,
        include_inferred: bool,
        mode: ReadMode,
    ) -> Result<StatementIter<'_>> {
        let predicate = predicate.map(|iri| Value::Iri(iri.clone()));
        let Some(pattern) =
            resolve_pattern(&self.values, subject, predicate.as_ref(), object, context)?
        else {
            return Ok(StatementIter::new(&self.values, None));
        };
        let explicit = (!include_inferred).then_some(true);
        let records = self.triples.get_triples(&pattern, mode, explicit);
        Ok(StatementIter::new(&self.values, Some(records)))
    }

    /// Distinct named graphs holding at least one committed statement.
    pub fn contexts(&self) -> Result<Vec<Value>> {
        let mut ids = BTreeSet::new();
        let mut records = self
            .triples
            .get_triples(&TriplePattern::any(), ReadMode::Committed, None);
        while let Some(record) = records.try_next()? {
            if !record.context.is_unknown() {
                ids.insert(record.context);
            }
        }
        records.close();
        ids.into_iter()
            .map(|id| {
                self.values
                    .get_value(id)?
                    .ok_or(StoreError::Corruption("statement refers to a missing value"))
            })
            .collect()
    }

    /// Number of committed statements in `context`, explicit and inferred.
    pub fn size(&self, context: ContextPattern<'_>) -> Result<u64> {
        if context == ContextPattern::Any {
            return self.triples.size();
        }
        let Some(pattern) = resolve_pattern(&self.values, None, None, None, context)? else {
            return Ok(0);
        };
        let mut records = self.triples.get_triples(&pattern, ReadMode::Committed, None);
        let mut count = 0u64;
        while records.try_next()?.is_some() {
            count += 1;
        }
        Ok(count)
    }

    /// Namespace bound to `prefix`.
    pub fn namespace(&self, prefix: &str) -> Option<String> {
        self.namespaces.get_namespace(prefix)
    }

    /// All `(prefix, namespace)` pairs sorted by prefix.
    pub fn namespaces(&self) -> Vec<(String, String)> {
        self.namespaces.namespaces()
    }

    /// Cross-checks the statement indexes.
    pub fn verify(&self) -> Result<VerifyReport> {
        self.triples.verify()
    }

    fn shutdown(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.triples.close()?;
        self.values.close()?;
        self.namespaces.close()?;
        debug!(dir = %self.dir.display(), "native store closed");
        Ok(())
    }

    /// Rolls back an open transaction and flushes every component.
    pub fn close(mut self) -> Result<()> {
        self.shutdown()
    }

    /// Releases the store without flushing, leaving files as a crash would.
    #[doc(hidden)]
    pub fn abandon(mut self) {
        self.closed = true;
    }
}

impl Drop for NativeStore {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            warn!(error = %err, dir = %self.dir.display(), "failed to close native store");
        }
    }
}

/// Exclusive write access to a [`NativeStore`].
///
/// Dropping a transaction without committing rolls it back. Committed-view
/// iterators opened on this thread must be closed before [`Transaction::commit`].
pub struct Transaction<'a> {
    store: &'a NativeStore,
    _writer: MutexGuard<'a, ()>,
    finished: bool,
    cleared: bool,
}

impl<'a> Transaction<'a> {
    fn check_resource(value: &Value, position: &'static str) -> Result<()> {
        if value.is_resource() {
            Ok(())
        } else {
            Err(StoreError::Invalid(position))
        }
    }

    fn store(
        &mut self,
        subject: &Value,
        predicate: &Iri,
        object: &Value,
        context: Option<&Value>,
        explicit: bool,
    ) -> Result<bool> {
        Self::check_resource(subject, "statement subject must be an IRI or blank node")?;
        let values = &self.store.values;
        let s = values.store_value(subject)?;
        let p = values.store_value(&Value::Iri(predicate.clone()))?;
        let o = values.store_value(object)?;
        let c = match context {
            Some(context) => {
                Self::check_resource(context, "statement context must be an IRI or blank node")?;
                values.store_value(context)?
            }
            None => ValueId::UNKNOWN,
        };
        self.store.triples.store_triple(s, p, o, c, explicit)
    }

    /// Adds an explicit statement. Returns true when it was not present.
    pub fn add_statement(
        &mut self,
        subject: &Value,
        predicate: &Iri,
        object: &Value,
        context: Option<&Value>,
    ) -> Result<bool> {
        self.store(subject, predicate, object, context, true)
    }

    /// Adds an inferred statement. Returns true when it was not present.
    pub fn add_inferred(
        &mut self,
        subject: &Value,
        predicate: &Iri,
        object: &Value,
        context: Option<&Value>,
    ) -> Result<bool> {
        self.store(subject, predicate, object, context, false)
    }

    fn remove(
        &mut self,
        subject: Option<&Value>,
        predicate: Option<&Iri>,
        object: Option<&Value>,
        context: ContextPattern<'_>,
        explicit: Option<bool>,
    ) -> Result<usize> {
        let predicate = predicate.map(|iri| Value::Iri(iri.clone()));
        match resolve_pattern(&self.store.values, subject, predicate.as_ref(), object, context)? {
            Some(pattern) => self.store.triples.remove_triples(&pattern, explicit),
            None => Ok(0),
        }
    }

    /// Removes matching explicit statements and returns how many.
    pub fn remove_statements(
        &mut self,
        subject: Option<&Value>,
        predicate: Option<&Iri>,
        object: Option<&Value>,
        context: ContextPattern<'_>,
    ) -> Result<usize> {
        self.remove(subject, predicate, object, context, Some(true))
    }

    /// Removes matching inferred statements and returns how many.
    pub fn remove_inferred(
        &mut self,
        subject: Option<&Value>,
        predicate: Option<&Iri>,
        object: Option<&Value>,
        context: ContextPattern<'_>,
    ) -> Result<usize> {
        self.remove(subject, predicate, object, context, Some(false))
    }

    /// Removes every statement in `context`, explicit and inferred.
    pub fn clear(&mut self, context: ContextPattern<'_>) -> Result<usize> {
        if context == ContextPattern::Any {
            self.cleared = true;
            return self.store.triples.clear();
        }
        self.remove(None, None, None, context, None)
    }

    /// Statements as seen by this transaction, including its own changes.
    pub fn statements(
        &self,
        subject: Option<&Value>,
        predicate: Option<&Iri>,
        object: Option<&Value>,
        context: ContextPattern<'_>,
        include_inferred: bool,
    ) -> Result<StatementIter<'a>> {
        self.store.scan(
            subject,
            predicate,
            object,
            context,
            include_inferred,
            ReadMode::Transaction,
        )
    }

    /// Binds `prefix` to `name`.
    pub fn set_namespace(&mut self, prefix: &str, name: &str) -> Result<()> {
        self.store.namespaces.set_namespace(prefix, name)
    }

    /// Unbinds `prefix`, returning the old namespace.
    pub fn remove_namespace(&mut self, prefix: &str) -> Option<String> {
        self.store.namespaces.remove_namespace(prefix)
    }

    /// Unbinds every prefix.
    pub fn clear_namespaces(&mut self) {
        self.store.namespaces.clear();
    }

    /// Makes every change durable and visible to readers.
    pub fn commit(mut self) -> Result<()> {
        let store = self.store;
        store.values.sync()?;
        store.triples.commit()?;
        self.finished = true;
        store.namespaces.sync()?;
        if self.cleared && store.triples.size()? == 0 {
            store.values.clear()?;
            debug!("store emptied, value dictionary cleared");
        }
        Ok(())
    }

    /// Discards every change.
    pub fn rollback(mut self) -> Result<()> {
        self.finished = true;
        self.abort()
    }

    fn abort(&self) -> Result<()> {
        // a commit that failed past its marker leaves nothing to roll back
        if self.store.triples.is_active() {
            self.store.triples.rollback()?;
        }
        self.store.namespaces.reload()
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        debug!("transaction dropped without commit, rolling back");
        if let Err(err) = self.abort() {
            warn!(error = %err, "rollback of dropped transaction failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn options() -> StoreOptions {
        StoreOptions::new().force_sync(false)
    }

    fn ex(local: &str) -> Iri {
        Iri::new(format!("http://example.org/{local}"))
    }

    fn node(local: &str) -> Value {
        Value::Iri(ex(local))
    }

    #[test]
    fn add_query_and_remove_statements() -> Result<()> {
        let dir = tempdir()?;
        let store = NativeStore::open(dir.path(), &options())?;
        let graph = node("g1");
        let mut txn = store.begin()?;
        assert!(txn.add_statement(&node("alice"), &ex("knows"), &node("bob"), None)?);
        assert!(!txn.add_statement(&node("alice"), &ex("knows"), &node("bob"), None)?);
        txn.add_statement(&node("bob"), &ex("name"), &Value::literal("Bob"), Some(&graph))?;
        txn.add_inferred(&node("bob"), &ex("knows"), &node("alice"), None)?;
        assert_eq!(store.size(ContextPattern::Any)?, 0);
        txn.commit()?;

        assert_eq!(store.size(ContextPattern::Any)?, 3);
        assert_eq!(store.size(ContextPattern::Default)?, 2);
        assert_eq!(store.size(ContextPattern::Named(&graph))?, 1);
        assert_eq!(store.contexts()?, vec![graph.clone()]);

        let explicit: Vec<Statement> = store
            .statements(None, Some(&ex("knows")), None, ContextPattern::Any, false)?
            .collect::<Result<_>>()?;
        assert_eq!(explicit.len(), 1);
        assert_eq!(explicit[0].subject, node("alice"));
        let all = store
            .statements(None, Some(&ex("knows")), None, ContextPattern::Any, true)?
            .count();
        assert_eq!(all, 2);

        let mut txn = store.begin()?;
        assert_eq!(txn.remove_inferred(None, None, None, ContextPattern::Any)?, 1);
        assert_eq!(
            txn.remove_statements(Some(&node("alice")), None, None, ContextPattern::Any)?,
            1
        );
        let seen = txn
            .statements(None, None, None, ContextPattern::Any, true)?
            .collect::<Result<Vec<_>>>()?;
        assert_eq!(seen.len(), 1);
        txn.commit()?;
        assert_eq!(store.size(ContextPattern::Any)?, 1);
        store.close()
    }

    #[test]
    fn unknown_terms_short_circuit() -> Result<()> {
        let dir = tempdir()?;
        let store = NativeStore::open(dir.path(), &options())?;
        let mut txn = store.begin()?;
        txn.add_statement(&node("a"), &ex("p"), &node("b"), None)?;
        txn.commit()?;
        let before = store.value_store().entry_count()?;
        let mut none = store.statements(Some(&node("never")), None, None, ContextPattern::Any, true)?;
        assert!(none.try_next()?.is_none());
        assert_eq!(store.size(ContextPattern::Named(&node("nowhere")))?, 0);
        assert_eq!(store.value_store().entry_count()?, before);
        Ok(())
    }

    #[test]
    fn literal_subject_is_rejected() -> Result<()> {
        let dir = tempdir()?;
        let store = NativeStore::open(dir.path(), &options())?;
        let mut txn = store.begin()?;
        let err = txn.add_statement(&Value::literal("x"), &ex("p"), &node("b"), None);
        assert!(matches!(err, Err(StoreError::Invalid(_))));
        txn.rollback()
    }

    #[test]
    fn dropped_transaction_rolls_back() -> Result<()> {
        let dir = tempdir()?;
        let store = NativeStore::open(dir.path(), &options())?;
        {
            let mut txn = store.begin()?;
            txn.add_statement(&node("a"), &ex("p"), &node("b"), None)?;
            txn.set_namespace("ex", "http://example.org/")?;
        }
        assert_eq!(store.size(ContextPattern::Any)?, 0);
        assert_eq!(store.namespace("ex"), None);
        let txn = store.try_begin()?;
        assert!(matches!(store.try_begin(), Err(StoreError::Transaction(_))));
        txn.rollback()
    }

    #[test]
    fn namespaces_commit_with_transaction() -> Result<()> {
        let dir = tempdir()?;
        {
            let store = NativeStore::open(dir.path(), &options())?;
            let mut txn = store.begin()?;
            txn.set_namespace("ex", "http://ex/")?;
            txn.set_namespace("foaf", "http://xmlns.com/foaf/0.1/")?;
            txn.commit()?;
            let mut txn = store.begin()?;
            assert_eq!(txn.remove_namespace("foaf").as_deref(), Some("http://xmlns.com/foaf/0.1/"));
            txn.commit()?;
            store.close()?;
        }
        let store = NativeStore::open(dir.path(), &options())?;
        assert_eq!(store.namespace("ex").as_deref(), Some("http://ex/"));
        assert_eq!(store.namespaces().len(), 1);
        let mut txn = store.begin()?;
        txn.clear_namespaces();
        txn.commit()?;
        assert!(store.namespaces().is_empty());
        Ok(())
    }

    #[test]
    fn clearing_everything_resets_dictionary() -> Result<()> {
        let dir = tempdir()?;
        let store = NativeStore::open(dir.path(), &options())?;
        let graph = node("g");
        let mut txn = store.begin()?;
        txn.add_statement(&node("a"), &ex("p"), &node("b"), Some(&graph))?;
        txn.add_statement(&node("a"), &ex("p"), &node("c"), None)?;
        txn.commit()?;

        let mut txn = store.begin()?;
        assert_eq!(txn.clear(ContextPattern::Named(&graph))?, 1);
        txn.commit()?;
        assert_eq!(store.size(ContextPattern::Any)?, 1);
        assert!(store.value_store().entry_count()? > 0);

        let mut txn = store.begin()?;
        assert_eq!(txn.clear(ContextPattern::Any)?, 1);
        txn.commit()?;
        assert_eq!(store.size(ContextPattern::Any)?, 0);
        assert_eq!(store.value_store().entry_count()?, 0);
        assert_eq!(store.value_store().get_id(&node("a"))?, ValueId::UNKNOWN);
        Ok(())
    }

    #[test]
    fn second_open_of_directory_is_locked() -> Result<()> {
        let dir = tempdir()?;
        let store = NativeStore::open(dir.path(), &options())?;
        assert!(matches!(
            NativeStore::open(dir.path(), &options()),
            Err(StoreError::Locked)
        ));
        store.close()?;
        NativeStore::open(dir.path(), &options())?.close()
    }
}
