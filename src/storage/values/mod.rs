#![forbid(unsafe_code)]

//! Dictionary interning RDF terms to stable integer ids.
//!
//! Encoded terms are appended to `values.dat`; `values.id` maps an id to its
//! data offset and `values.hash` (a [`BTree`] of `[hash][id]` records) maps
//! an encoding back to candidate ids. Ids are never reused.

mod codec;
mod files;

use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, trace, warn};

use crate::model::{Iri, Literal, Value};
use crate::primitives::bytes::ord::{get_i32_be, put_i32_be, put_u32_be};
use crate::storage::btree::{BTree, DefaultComparator};
use crate::storage::options::StoreOptions;
use crate::types::{Result, StoreError, ValueId};

use codec::Entry;
use files::{DataFile, IdFile};

const DATA_FILE: &str = "values.dat";
const ID_FILE: &str = "values.id";
const HASH_FILE: &str = "values.hash";
const HASH_RECORD_LEN: usize = 8;

fn hash_record(hash: u32, id: ValueId) -> [u8; HASH_RECORD_LEN] {
    let mut rec = [0u8; HASH_RECORD_LEN];
    put_u32_be(&mut rec[0..4], hash);
    put_i32_be(&mut rec[4..8], id.0);
    rec
}

fn cache<K: std::hash::Hash + Eq, V>(capacity: usize) -> LruCache<K, V> {
    LruCache::new(NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN))
}

struct Caches {
    values: LruCache<ValueId, Value>,
    ids: LruCache<Value, ValueId>,
    namespaces: LruCache<ValueId, Arc<str>>,
    namespace_ids: LruCache<Arc<str>, ValueId>,
}

impl Caches {
    fn clear(&mut self) {
        self.values.clear();
        self.ids.clear();
        self.namespaces.clear();
        self.namespace_ids.clear();
    }
}

/// Counters describing dictionary traffic.
#[derive(Default)]
pub struct ValueStoreMetrics {
    lookups: AtomicU64,
    cache_hits: AtomicU64,
    stored: AtomicU64,
    decoded: AtomicU64,
}

/// Point-in-time copy of [`ValueStoreMetrics`].
#[derive(Clone, Copy, Debug, Default, Serialize)]
pub struct ValueStoreMetricsSnapshot {
    /// Term to id and id to term lookups.
    pub lookups: u64,
    /// Lookups answered from a cache.
    pub cache_hits: u64,
    /// Entries appended to the dictionary.
    pub stored: u64,
    /// Entries decoded from disk.
    pub decoded: u64,
}

impl ValueStoreMetricsSnapshot {
    /// Fraction of lookups served from memory.
    pub fn hit_rate(&self) -> f64 {
        if self.lookups == 0 {
            return 0.0;
        }
        self.cache_hits as f64 / self.lookups as f64
    }
}

impl ValueStoreMetrics {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Captures the current counters.
    pub fn snapshot(&self) -> ValueStoreMetricsSnapshot {
        ValueStoreMetricsSnapshot {
            lookups: self.lookups.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            stored: self.stored.load(Ordering::Relaxed),
            decoded: self.decoded.load(Ordering::Relaxed),
        }
    }
}

/// Interns [`Value`]s to [`ValueId`]s and back.
pub struct ValueStore {
    dir: PathBuf,
    data: DataFile,
    ids: IdFile,
    hash: BTree,
    caches: Mutex<Caches>,
    write_lock: Mutex<()>,
    force_sync: bool,
    metrics: ValueStoreMetrics,
}

impl ValueStore {
    /// Opens or creates the dictionary files in `dir`.
    ///
    /// A torn tail left by a crash is cut off, and the hash index is rebuilt
    /// from the data files when its journal shows it was not checkpointed.
    pub fn open(dir: impl AsRef<Path>, options: &StoreOptions) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        let data = DataFile::open(&dir.join(DATA_FILE))?;
        let ids = IdFile::open(&dir.join(ID_FILE))?;
        let hash = BTree::open(
            dir.join(HASH_FILE),
            HASH_RECORD_LEN,
            Arc::new(DefaultComparator),
            &options.btree_options(),
        )?;
        let store = Self {
            dir,
            data,
            ids,
            hash,
            caches: Mutex::new(Caches {
                values: cache(options.value_cache_size),
                ids: cache(options.value_id_cache_size),
                namespaces: cache(options.namespace_cache_size),
                namespace_ids: cache(options.namespace_cache_size),
            }),
            write_lock: Mutex::new(()),
            force_sync: options.force_sync,
            metrics: ValueStoreMetrics::default(),
        };
        let dropped = store.trim_torn_tail()?;
        let unclean = store.hash.pending_journal()?.is_some();
        if unclean {
            warn!(dir = %store.dir.display(), "value hash index was not checkpointed");
            store.hash.undo()?;
        }
        if unclean || dropped > 0 {
            store.rebuild_hash()?;
        }
        debug!(dir = %store.dir.display(), entries = store.ids.count()?, "opened value store");
        Ok(store)
    }

    fn trim_torn_tail(&self) -> Result<u32> {
        let before = self.ids.count()?;
        let mut count = before;
        while count > 0 {
            match self.ids.offset_of(ValueId(count as i32))? {
                Some(offset) if self.data.holds_record(offset)? => break,
                _ => count -= 1,
            }
        }
        if count != before || self.ids.has_torn_tail()? {
            warn!(dropped = before - count, "truncating torn value id tail");
            self.ids.truncate_to(count)?;
        }
        Ok(before - count)
    }

    fn rebuild_hash(&self) -> Result<()> {
        let count = self.ids.count()?;
        self.hash.clear()?;
        for n in 1..=count {
            let id = ValueId(n as i32);
            let data = self.read_data(id)?;
            self.hash.insert(&hash_record(codec::hash32(&data), id))?;
        }
        self.hash.sync()?;
        info!(entries = count, "rebuilt value hash index");
        Ok(())
    }

    /// Directory holding the dictionary files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Dictionary traffic counters.
    pub fn metrics(&self) -> ValueStoreMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Number of dictionary entries, namespaces included.
    pub fn entry_count(&self) -> Result<u32> {
        self.ids.count()
    }

    fn read_data(&self, id: ValueId) -> Result<Vec<u8>> {
        let offset = self
            .ids
            .offset_of(id)?
            .ok_or(StoreError::Corruption("value id has no data offset"))?;
        self.data.read(offset)
    }

    fn lookup(&self, data: &[u8]) -> Result<Option<ValueId>> {
        let hash = codec::hash32(data);
        let mut candidates = self.hash.iterate_range(
            &hash_record(hash, ValueId(0)),
            &hash_record(hash, ValueId(i32::MAX)),
        );
        while let Some(rec) = candidates.try_next()? {
            let id = ValueId(get_i32_be(&rec[4..8]));
            if self.read_data(id)? == data {
                return Ok(Some(id));
            }
        }
        Ok(None)
    }

    fn append(&self, data: &[u8]) -> Result<ValueId> {
        let offset = self.data.append(data)?;
        let id = self.ids.append(offset)?;
        self.hash.insert(&hash_record(codec::hash32(data), id))?;
        ValueStoreMetrics::bump(&self.metrics.stored);
        Ok(id)
    }

    fn cached_id(&self, value: &Value) -> Option<ValueId> {
        ValueStoreMetrics::bump(&self.metrics.lookups);
        let hit = self.caches.lock().ids.get(value).copied();
        if hit.is_some() {
            ValueStoreMetrics::bump(&self.metrics.cache_hits);
        }
        hit
    }

    fn remember(&self, value: &Value, id: ValueId) {
        let mut caches = self.caches.lock();
        caches.ids.put(value.clone(), id);
        caches.values.put(id, value.clone());
    }

    /// Encodes `value`. Without `create`, returns `None` when a namespace or
    /// datatype it references is not in the dictionary.
    fn encode(&self, value: &Value, create: bool) -> Result<Option<Vec<u8>>> {
        match value {
            Value::Iri(iri) => {
                let ns = if create {
                    self.store_namespace_locked(iri.namespace())?
                } else {
                    self.get_namespace_id(iri.namespace())?
                };
                if ns.is_unknown() {
                    return Ok(None);
                }
                Ok(Some(codec::encode_iri(ns, iri.local_name())))
            }
            Value::BNode(node) => Ok(Some(codec::encode_bnode(node.id()))),
            Value::Literal(lit) => {
                let datatype = match lit.datatype() {
                    None => ValueId::UNKNOWN,
                    Some(dt) => {
                        let dt = Value::Iri(dt.clone());
                        let id = if create {
                            self.store_locked(&dt)?
                        } else {
                            self.get_id(&dt)?
                        };
                        if id.is_unknown() {
                            return Ok(None);
                        }
                        id
                    }
                };
                codec::encode_literal(datatype, lit.language(), lit.label()).map(Some)
            }
        }
    }

    /// Id of `value`, or [`ValueId::UNKNOWN`] when it was never stored.
    /// Never modifies the dictionary.
    pub fn get_id(&self, value: &Value) -> Result<ValueId> {
        if let Some(id) = self.cached_id(value) {
            return Ok(id);
        }
        let Some(data) = self.encode(value, false)? else {
            return Ok(ValueId::UNKNOWN);
        };
        match self.lookup(&data)? {
            Some(id) => {
                self.remember(value, id);
                Ok(id)
            }
            None => Ok(ValueId::UNKNOWN),
        }
    }

    /// Id of `value`, adding it to the dictionary when missing.
    pub fn store_value(&self, value: &Value) -> Result<ValueId> {
        let _writer = self.write_lock.lock();
        self.store_locked(value)
    }

    fn store_locked(&self, value: &Value) -> Result<ValueId> {
        if let Some(id) = self.cached_id(value) {
            return Ok(id);
        }
        if let Some(data) = self.encode(value, false)? {
            if let Some(id) = self.lookup(&data)? {
                self.remember(value, id);
                return Ok(id);
            }
        }
        let data = self
            .encode(value, true)?
            .ok_or(StoreError::Invalid("value cannot be encoded"))?;
        let id = self.append(&data)?;
        trace!(%id, "stored value");
        self.remember(value, id);
        Ok(id)
    }

    /// The value stored under `id`, or `None` for an id never handed out.
    pub fn get_value(&self, id: ValueId) -> Result<Option<Value>> {
        ValueStoreMetrics::bump(&self.metrics.lookups);
        if let Some(value) = self.caches.lock().values.get(&id) {
            ValueStoreMetrics::bump(&self.metrics.cache_hits);
            return Ok(Some(value.clone()));
        }
        let Some(offset) = self.ids.offset_of(id)? else {
            return Ok(None);
        };
        let data = self.data.read(offset)?;
        ValueStoreMetrics::bump(&self.metrics.decoded);
        let value = self.decode_value(&data)?;
        self.remember(&value, id);
        Ok(Some(value))
    }

    fn decode_value(&self, data: &[u8]) -> Result<Value> {
        match codec::decode(data)? {
            Entry::Namespace(_) => Err(StoreError::Corruption("value id refers to a namespace")),
            Entry::Iri { namespace, local } => {
                let ns = self
                    .get_namespace(namespace)?
                    .ok_or(StoreError::Corruption("IRI references a missing namespace"))?;
                Ok(Value::Iri(Iri::new(format!("{ns}{local}"))))
            }
            Entry::BNode(id) => Ok(Value::bnode(id)),
            Entry::Literal {
                datatype,
                language,
                label,
            } => {
                if let Some(language) = language {
                    return Ok(Value::Literal(Literal::with_language(label, language)));
                }
                if datatype.is_unknown() {
                    return Ok(Value::literal(label));
                }
                match self.get_value(datatype)? {
                    Some(Value::Iri(dt)) => Ok(Value::Literal(Literal::typed(label, dt))),
                    _ => Err(StoreError::Corruption("literal datatype is not an IRI")),
                }
            }
        }
    }

    /// Id of a namespace string, or [`ValueId::UNKNOWN`].
    pub fn get_namespace_id(&self, namespace: &str) -> Result<ValueId> {
        if let Some(id) = self.caches.lock().namespace_ids.get(namespace) {
            return Ok(*id);
        }
        match self.lookup(&codec::encode_namespace(namespace))? {
            Some(id) => {
                self.remember_namespace(namespace, id);
                Ok(id)
            }
            None => Ok(ValueId::UNKNOWN),
        }
    }

    fn store_namespace_locked(&self, namespace: &str) -> Result<ValueId> {
        let found = self.get_namespace_id(namespace)?;
        if !found.is_unknown() {
            return Ok(found);
        }
        let id = self.append(&codec::encode_namespace(namespace))?;
        trace!(%id, namespace, "stored namespace");
        self.remember_namespace(namespace, id);
        Ok(id)
    }

    fn remember_namespace(&self, namespace: &str, id: ValueId) {
        let name: Arc<str> = Arc::from(namespace);
        let mut caches = self.caches.lock();
        caches.namespace_ids.put(Arc::clone(&name), id);
        caches.namespaces.put(id, name);
    }

    /// Namespace string stored under `id`.
    pub fn get_namespace(&self, id: ValueId) -> Result<Option<Arc<str>>> {
        if let Some(name) = self.caches.lock().namespaces.get(&id) {
            return Ok(Some(Arc::clone(name)));
        }
        let Some(offset) = self.ids.offset_of(id)? else {
            return Ok(None);
        };
        match codec::decode(&self.data.read(offset)?)? {
            Entry::Namespace(name) => {
                self.remember_namespace(name, id);
                Ok(Some(Arc::from(name)))
            }
            _ => Err(StoreError::Corruption("namespace id refers to a value")),
        }
    }

    /// Makes every appended entry durable and checkpoints the hash index.
    pub fn sync(&self) -> Result<()> {
        let _writer = self.write_lock.lock();
        if self.force_sync {
            self.data.sync()?;
            self.ids.sync()?;
        }
        self.hash.sync()
    }

    /// Forgets every entry. Ids handed out before are invalid afterwards.
    pub fn clear(&self) -> Result<()> {
        let _writer = self.write_lock.lock();
        self.data.clear()?;
        self.ids.clear()?;
        self.hash.clear()?;
        self.hash.sync()?;
        self.caches.lock().clear();
        info!(dir = %self.dir.display(), "cleared value store");
        Ok(())
    }

    /// Syncs the dictionary. The handle stays usable.
    pub fn close(&self) -> Result<()> {
        self.sync()
    }
}

#[cfg(test)]
mod tests;
