#![forbid(unsafe_code)]

//! Multi-index statement store.
//!
//! Every configured index is a [`BTree`] holding the same 17-byte records,
//! ordered by a different field permutation. Transactions mark records with
//! flag bits instead of rewriting them in place, so readers outside the
//! writer keep seeing the last committed state until the commit finalizes
//! the flags. Crash recovery combines the per-tree journals with the
//! `txn-status` marker:
//!
//! | marker                  | journal kind  | action                  |
//! |-------------------------|---------------|-------------------------|
//! | `Active` / `Unknown`    | any           | undo                    |
//! | `Committing`/`Committed`| `Transaction` | discard, then finalize  |
//! | `Committing`/`Committed`| `Finalize`    | undo, then finalize     |

mod index;
mod props;
mod record;
mod status;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{ArcRwLockReadGuard, Mutex, RawRwLock, RwLock};
use rustc_hash::FxHashSet;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::primitives::journal::SessionKind;
use crate::storage::btree::{BTree, BTreeOptions, BTreeStatsSnapshot, RecordIter, TreeSummary};
use crate::storage::options::{StoreOptions, DEFAULT_TRIPLE_INDEXES};
use crate::types::{Result, StoreError, ValueId};

pub use index::{format_index_spec, parse_index_spec, Field, FieldOrder, TripleComparator};
pub use record::{
    TriplePattern, TripleRecord, ADDED_FLAG, EXPLICIT_FLAG, RECORD_LEN, REMOVED_FLAG,
    TOGGLE_EXPLICIT_FLAG,
};
pub use status::TxnStatus;

use index::TripleIndex;
use props::TripleProps;
use record::KEY_LEN;
use status::TxnStatusFile;

/// Which transaction flags a reader honours.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadMode {
    /// State as of the last commit: records added by the open transaction are
    /// hidden, records it removed are still visible.
    Committed,
    /// The writer's own view of its uncommitted changes.
    Transaction,
}

#[derive(Default)]
struct TxnState {
    active: bool,
    /// Set when a commit failed after its marker was written; the store must
    /// be reopened so recovery can complete it.
    poisoned: bool,
    updated: FxHashSet<[u8; KEY_LEN]>,
    overflowed: bool,
}

impl TxnState {
    fn reset(&mut self) {
        self.active = false;
        self.updated.clear();
        self.overflowed = false;
    }
}

/// Per-index result of [`TripleStore::verify`].
#[derive(Clone, Debug, Serialize)]
pub struct IndexReport {
    /// Field order, e.g. `"spoc"`.
    pub order: String,
    /// Records stored, including ones flagged by an open transaction.
    pub records: u64,
    /// Tree shape, absent when the structure check failed.
    pub structure: Option<TreeSummary>,
    /// Tree counters.
    pub stats: BTreeStatsSnapshot,
}

/// Outcome of [`TripleStore::verify`].
#[derive(Clone, Debug, Serialize)]
pub struct VerifyReport {
    /// One entry per index in configured order.
    pub indexes: Vec<IndexReport>,
    /// Human readable problems; empty when every index agrees.
    pub mismatches: Vec<String>,
}

impl VerifyReport {
    /// Returns true when no problem was found.
    pub fn is_consistent(&self) -> bool {
        self.mismatches.is_empty()
    }
}

enum View {
    Committed(ArcRwLockReadGuard<RawRwLock, ()>),
    Transaction,
    Closed,
}

/// Lazy scan over one index.
///
/// A committed-view iterator holds the commit gate open: commit and rollback
/// wait until it is closed or dropped.
pub struct TripleIter {
    inner: RecordIter,
    view: View,
    explicit: Option<bool>,
}

impl TripleIter {
    /// Next visible record, or `None` once exhausted.
    pub fn try_next(&mut self) -> Result<Option<TripleRecord>> {
        loop {
            let committed = match self.view {
                View::Closed => return Ok(None),
                View::Committed(_) => true,
                View::Transaction => false,
            };
            let Some(raw) = self.inner.try_next()? else {
                self.close();
                return Ok(None);
            };
            let record = TripleRecord::decode(&raw)?;
            let (visible, explicit) = if committed {
                (!record.is_added(), record.is_explicit())
            } else {
                (!record.is_removed(), record.is_explicit_in_transaction())
            };
            if visible && self.explicit.map_or(true, |want| want == explicit) {
                return Ok(Some(record));
            }
        }
    }

    /// Releases the scan and the commit gate. Idempotent.
    pub fn close(&mut self) {
        self.inner.close();
        self.view = View::Closed;
    }
}

impl Iterator for TripleIter {
    type Item = Result<TripleRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        self.try_next().transpose()
    }
}

/// Statement indexes plus the transaction state machine.
pub struct TripleStore {
    dir: PathBuf,
    indexes: Vec<TripleIndex>,
    status: TxnStatusFile,
    txn: Mutex<TxnState>,
    gate: Arc<RwLock<()>>,
    options: BTreeOptions,
    force_sync: bool,
    txn_cache_size: usize,
}

impl TripleStore {
    /// Opens the indexes in `dir`, recovers an interrupted transaction and
    /// adds or drops indexes to match `options.triple_indexes`.
    pub fn open(dir: impl AsRef<Path>, options: &StoreOptions) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        let mut requested = parse_index_spec(&options.triple_indexes)?;
        if requested.is_empty() {
            info!(indexes = DEFAULT_TRIPLE_INDEXES, "no triple indexes configured");
            requested = parse_index_spec(DEFAULT_TRIPLE_INDEXES)?;
        }
        let mut props = TripleProps::load(&dir)?;
        let current = match props.indexes() {
            Some(spec) => {
                let current = parse_index_spec(spec)?;
                if current.is_empty() {
                    return Err(StoreError::Corruption("triple properties list no indexes"));
                }
                current
            }
            None => requested.clone(),
        };
        let btree_options = options.btree_options();
        let indexes = current
            .iter()
            .map(|order| TripleIndex::open(&dir, *order, &btree_options))
            .collect::<Result<Vec<_>>>()?;
        let mut store = Self {
            status: TxnStatusFile::open(&dir, options.force_sync)?,
            dir,
            indexes,
            txn: Mutex::new(TxnState::default()),
            gate: Arc::new(RwLock::new(())),
            options: btree_options,
            force_sync: options.force_sync,
            txn_cache_size: options.txn_cache_size,
        };
        store.recover()?;
        store.reindex(&requested, &mut props)?;
        debug!(
            dir = %store.dir.display(),
            indexes = %format_index_spec(&store.index_orders()),
            "opened triple store"
        );
        Ok(store)
    }

    fn recover(&self) -> Result<()> {
        let status = self.status.get()?;
        let pending = self
            .indexes
            .iter()
            .map(|index| index.tree.pending_journal())
            .collect::<Result<Vec<_>>>()?;
        let journaled = pending.iter().any(Option::is_some);
        match status {
            TxnStatus::None if !journaled => return Ok(()),
            TxnStatus::None | TxnStatus::Active | TxnStatus::Unknown => {
                warn!(?status, "rolling back interrupted transaction");
                for index in &self.indexes {
                    index.tree.undo()?;
                }
            }
            TxnStatus::Committing | TxnStatus::Committed => {
                warn!(?status, "completing interrupted commit");
                for (index, kind) in self.indexes.iter().zip(&pending) {
                    match kind {
                        Some(SessionKind::Finalize) => index.tree.undo()?,
                        Some(SessionKind::Transaction) => index.tree.discard_journal()?,
                        None => {}
                    }
                    index.tree.set_session_kind(SessionKind::Finalize);
                }
                self.finalize(None)?;
                for index in &self.indexes {
                    index.tree.sync()?;
                    index.tree.set_session_kind(SessionKind::Transaction);
                }
            }
        }
        self.status.set(TxnStatus::None)?;
        info!(?status, "transaction recovery finished");
        Ok(())
    }

    fn reindex(&mut self, requested: &[FieldOrder], props: &mut TripleProps) -> Result<()> {
        let added: Vec<FieldOrder> = requested
            .iter()
            .filter(|order| !self.indexes.iter().any(|index| index.order == **order))
            .copied()
            .collect();
        for order in added {
            let index = TripleIndex::open(&self.dir, order, &self.options)?;
            index.tree.clear()?;
            let source = &self.indexes[0];
            let mut records = source.tree.iterate_all();
            let mut copied = 0u64;
            while let Some(raw) = records.try_next()? {
                index.tree.insert(&raw)?;
                copied += 1;
            }
            index.tree.sync()?;
            info!(index = %order, source = %source.order, records = copied, "initialized triple index");
            self.indexes.push(index);
        }
        props.store(&format_index_spec(requested), self.force_sync)?;

        let mut existing = std::mem::take(&mut self.indexes);
        let mut kept = Vec::with_capacity(requested.len());
        for order in requested {
            if let Some(pos) = existing.iter().position(|index| index.order == *order) {
                kept.push(existing.swap_remove(pos));
            }
        }
        self.indexes = kept;
        for removed in existing {
            let order = removed.order;
            removed.tree.delete()?;
            info!(index = %order, "deleted triple index");
        }
        Ok(())
    }

    /// Directory holding the index files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Active index orders, in configured order.
    pub fn index_orders(&self) -> Vec<FieldOrder> {
        self.indexes.iter().map(|index| index.order).collect()
    }

    /// Persisted transaction phase.
    pub fn status(&self) -> Result<TxnStatus> {
        self.status.get()
    }

    /// Returns true while a transaction is open.
    pub fn is_active(&self) -> bool {
        self.txn.lock().active
    }

    fn require_active(txn: &TxnState) -> Result<()> {
        if txn.active {
            Ok(())
        } else {
            Err(StoreError::Transaction("no active transaction"))
        }
    }

    fn note_updated(&self, txn: &mut TxnState, key: [u8; KEY_LEN]) {
        if txn.overflowed {
            return;
        }
        if txn.updated.len() >= self.txn_cache_size {
            debug!(limit = self.txn_cache_size, "updated record cache full, commit will scan");
            txn.overflowed = true;
            txn.updated.clear();
            return;
        }
        txn.updated.insert(key);
    }

    fn best_index(&self, pattern: &TriplePattern) -> &TripleIndex {
        let mut best = &self.indexes[0];
        let mut best_score = best.order.pattern_score(pattern);
        for index in &self.indexes[1..] {
            let score = index.order.pattern_score(pattern);
            if score > best_score {
                best = index;
                best_score = score;
            }
        }
        best
    }

    fn scan(index: &TripleIndex, pattern: &TriplePattern) -> RecordIter {
        let (key, mask) = pattern.key_and_mask();
        if index.order.pattern_score(pattern) > 0 {
            let (min, max) = pattern.bounds();
            index.tree.iterate_range_values(&key, &mask, &min, &max)
        } else if pattern.is_wildcard() {
            index.tree.iterate_all()
        } else {
            index.tree.iterate_values(&key, &mask)
        }
    }

    /// Opens a transaction. Fails when one is already open.
    pub fn start_transaction(&self) -> Result<()> {
        let mut txn = self.txn.lock();
        if txn.poisoned {
            return Err(StoreError::Transaction("interrupted commit, reopen the store"));
        }
        if txn.active {
            return Err(StoreError::Transaction("a transaction is already active"));
        }
        self.status.set(TxnStatus::Active)?;
        for index in &self.indexes {
            index.tree.set_session_kind(SessionKind::Transaction);
        }
        txn.reset();
        txn.active = true;
        debug!("transaction started");
        Ok(())
    }

    /// Adds a statement in the open transaction. Returns true when it was not
    /// visible to the transaction before.
    pub fn store_triple(
        &self,
        subject: ValueId,
        predicate: ValueId,
        object: ValueId,
        context: ValueId,
        explicit: bool,
    ) -> Result<bool> {
        let mut txn = self.txn.lock();
        Self::require_active(&txn)?;
        let mut data = TripleRecord::new(subject, predicate, object, context);
        let stored = self.indexes[0]
            .tree
            .get(&data.encode())?
            .map(|raw| TripleRecord::decode(&raw))
            .transpose()?;
        let is_new = match stored {
            None => {
                data.flags = ADDED_FLAG;
                if explicit {
                    data.flags |= EXPLICIT_FLAG;
                }
                true
            }
            Some(stored) if stored.is_added() => {
                data.flags = ADDED_FLAG;
                if explicit || (stored.is_explicit() && !stored.is_removed()) {
                    data.flags |= EXPLICIT_FLAG;
                }
                stored.is_removed()
            }
            Some(stored) => {
                // committed statement: the explicit bit stays, changes go
                // through the toggle flag
                if stored.is_explicit() {
                    data.flags |= EXPLICIT_FLAG;
                }
                if explicit {
                    if !stored.is_explicit() {
                        data.flags |= TOGGLE_EXPLICIT_FLAG;
                    }
                } else if stored.is_removed() {
                    if stored.is_explicit() {
                        data.flags |= TOGGLE_EXPLICIT_FLAG;
                    }
                } else if stored.is_toggled() {
                    data.flags |= TOGGLE_EXPLICIT_FLAG;
                }
                stored.is_removed()
            }
        };
        if stored.map(|s| s.flags) != Some(data.flags) {
            let raw = data.encode();
            for index in &self.indexes {
                index.tree.insert(&raw)?;
            }
            self.note_updated(&mut txn, data.key());
        }
        Ok(is_new)
    }

    /// Marks every statement matching `pattern` as removed in the open
    /// transaction. `explicit` restricts removal to explicit (`Some(true)`)
    /// or inferred (`Some(false)`) statements. Returns the number marked.
    pub fn remove_triples(&self, pattern: &TriplePattern, explicit: Option<bool>) -> Result<usize> {
        let mut txn = self.txn.lock();
        Self::require_active(&txn)?;
        let mut matches = Self::scan(self.best_index(pattern), pattern);
        let mut count = 0usize;
        while let Some(raw) = matches.try_next()? {
            let mut record = TripleRecord::decode(&raw)?;
            if record.is_removed() {
                continue;
            }
            if explicit.is_some_and(|want| want != record.is_explicit_in_transaction()) {
                continue;
            }
            record.flags |= REMOVED_FLAG;
            let raw = record.encode();
            for index in &self.indexes {
                index.tree.insert(&raw)?;
            }
            self.note_updated(&mut txn, record.key());
            count += 1;
        }
        matches.close();
        if count > 0 {
            debug!(count, "statements marked removed");
        }
        Ok(count)
    }

    /// Removes every statement in the open transaction.
    pub fn clear(&self) -> Result<usize> {
        self.remove_triples(&TriplePattern::any(), None)
    }

    /// Scans the best index for `pattern`. `explicit` filters explicit
    /// (`Some(true)`) or inferred (`Some(false)`) statements.
    ///
    /// A [`ReadMode::Committed`] iterator blocks commit and rollback until it
    /// is closed, so the writer must not hold one across its own commit.
    pub fn get_triples(
        &self,
        pattern: &TriplePattern,
        mode: ReadMode,
        explicit: Option<bool>,
    ) -> TripleIter {
        let view = match mode {
            ReadMode::Committed => View::Committed(self.gate.read_arc_recursive()),
            ReadMode::Transaction => View::Transaction,
        };
        TripleIter {
            inner: Self::scan(self.best_index(pattern), pattern),
            view,
            explicit,
        }
    }

    /// Number of committed statements.
    pub fn size(&self) -> Result<u64> {
        let mut iter = self.get_triples(&TriplePattern::any(), ReadMode::Committed, None);
        let mut count = 0u64;
        while iter.try_next()?.is_some() {
            count += 1;
        }
        Ok(count)
    }

    /// Makes the open transaction durable and visible.
    pub fn commit(&self) -> Result<()> {
        let mut txn = self.txn.lock();
        Self::require_active(&txn)?;
        for index in &self.indexes {
            index.tree.flush()?;
        }
        self.status.set(TxnStatus::Committing)?;
        if let Err(err) = self.complete_commit(&txn) {
            txn.poisoned = true;
            txn.reset();
            return Err(err);
        }
        let touched = txn.updated.len();
        let scanned = txn.overflowed;
        txn.reset();
        debug!(touched, scanned, "transaction committed");
        Ok(())
    }

    fn complete_commit(&self, txn: &TxnState) -> Result<()> {
        for index in &self.indexes {
            index.tree.sync()?;
            index.tree.set_session_kind(SessionKind::Finalize);
        }
        {
            let _gate = self.gate.write();
            let updated = (!txn.overflowed).then_some(&txn.updated);
            self.finalize(updated)?;
        }
        for index in &self.indexes {
            index.tree.sync()?;
            index.tree.set_session_kind(SessionKind::Transaction);
        }
        self.status.set(TxnStatus::Committed)?;
        self.status.set(TxnStatus::None)
    }

    /// Applies transaction flags: removed records are deleted, added and
    /// toggled ones become plain committed records. Without a key set every
    /// record is visited.
    fn finalize(&self, updated: Option<&FxHashSet<[u8; KEY_LEN]>>) -> Result<()> {
        for index in &self.indexes {
            match updated {
                Some(keys) => {
                    for key in keys {
                        let probe = TripleRecord::from_key(key).encode();
                        if let Some(raw) = index.tree.get(&probe)? {
                            Self::finalize_record(&index.tree, &raw)?;
                        }
                    }
                }
                None => {
                    let mut records = index.tree.iterate_all();
                    while let Some(raw) = records.try_next()? {
                        Self::finalize_record(&index.tree, &raw)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn finalize_record(tree: &BTree, raw: &[u8]) -> Result<()> {
        let record = TripleRecord::decode(raw)?;
        if !record.has_txn_flags() {
            return Ok(());
        }
        match record.finalized() {
            Some(done) => {
                tree.insert(&done.encode())?;
            }
            None => {
                tree.remove(raw)?;
            }
        }
        Ok(())
    }

    /// Discards the open transaction.
    pub fn rollback(&self) -> Result<()> {
        let mut txn = self.txn.lock();
        Self::require_active(&txn)?;
        {
            let _gate = self.gate.write();
            for index in &self.indexes {
                index.tree.undo()?;
            }
        }
        self.status.set(TxnStatus::None)?;
        txn.reset();
        debug!("transaction rolled back");
        Ok(())
    }

    /// Checks that every index holds the same records and a sound tree.
    pub fn verify(&self) -> Result<VerifyReport> {
        let _txn = self.txn.lock();
        let mut reports = Vec::with_capacity(self.indexes.len());
        let mut mismatches = Vec::new();
        let mut reference: Option<(FieldOrder, Vec<[u8; RECORD_LEN]>)> = None;
        for index in &self.indexes {
            let structure = match index.tree.check_structure() {
                Ok(summary) => Some(summary),
                Err(StoreError::Corruption(reason)) => {
                    mismatches.push(format!("{}: {reason}", index.order));
                    None
                }
                Err(err) => return Err(err),
            };
            let mut records = Vec::new();
            let mut iter = index.tree.iterate_all();
            while let Some(raw) = iter.try_next()? {
                records.push(TripleRecord::decode(&raw)?.encode());
            }
            records.sort_unstable();
            reports.push(IndexReport {
                order: index.order.to_string(),
                records: records.len() as u64,
                structure,
                stats: index.tree.stats(),
            });
            match &reference {
                None => reference = Some((index.order, records)),
                Some((order, expected)) => {
                    if *expected != records {
                        let missing = expected.iter().filter(|r| records.binary_search(r).is_err()).count();
                        let extra = records.iter().filter(|r| expected.binary_search(r).is_err()).count();
                        mismatches.push(format!(
                            "{} differs from {order}: {missing} missing, {extra} extra",
                            index.order
                        ));
                    }
                }
            }
        }
        Ok(VerifyReport {
            indexes: reports,
            mismatches,
        })
    }

    /// Rolls back an open transaction and checkpoints every index.
    pub fn close(&self) -> Result<()> {
        if self.is_active() {
            warn!("closing triple store with an open transaction");
            self.rollback()?;
        }
        let _txn = self.txn.lock();
        for index in &self.indexes {
            index.tree.sync()?;
        }
        Ok(())
    }
}
