#![forbid(unsafe_code)]

use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, info, warn};

use crate::primitives::io::{remove_if_exists, FileIo, StdFileIo};
use crate::primitives::journal::{Journal, SessionKind};
use crate::types::{PageId, Result, StoreError};

use super::alloc::AllocatedNodesList;
use super::comparator::RecordComparator;
use super::cursor::RecordIter;
use super::page::{Geometry, Node, TreeHeader, HEADER_LEN};
use super::stats::{BTreeStats, BTreeStatsSnapshot};

/// Configuration knobs for a B-tree file.
#[derive(Clone, Debug)]
pub struct BTreeOptions {
    /// Block size used when the file is created; existing files keep theirs.
    pub block_size: usize,
    /// Whether checkpoints fsync the tree, journal and bitmap files.
    pub force_sync: bool,
    /// Number of clean nodes kept in memory.
    pub node_cache_size: usize,
    /// Dirty nodes held before they are written back mid-session.
    pub max_dirty_nodes: usize,
}

impl Default for BTreeOptions {
    fn default() -> Self {
        Self {
            block_size: 4096,
            force_sync: true,
            node_cache_size: 256,
            max_dirty_nodes: 1024,
        }
    }
}

/// Shape summary produced by [`BTree::check_structure`].
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, serde::Serialize)]
pub struct TreeSummary {
    /// Records stored in the tree.
    pub records: u64,
    /// Node pages reachable from the root.
    pub nodes: u64,
    /// Levels from root to leaves; zero for an empty tree.
    pub depth: u32,
}

/// Paged B-tree of fixed-length records ordered by an injected comparator.
///
/// Cloning is cheap; clones share the same file and caches.
#[derive(Clone)]
pub struct BTree {
    pub(super) shared: Arc<Shared>,
}

pub(super) struct Shared {
    pub(super) path: PathBuf,
    pub(super) cmp: Arc<dyn RecordComparator>,
    pub(super) state: Mutex<TreeState>,
    pub(super) stats: Arc<BTreeStats>,
}

pub(super) struct TreeState {
    file: StdFileIo,
    journal: Journal,
    alloc: AllocatedNodesList,
    pub(super) header: TreeHeader,
    header_dirty: bool,
    pub(super) geom: Geometry,
    clean: LruCache<PageId, Arc<Node>>,
    dirty: FxHashMap<PageId, Arc<Node>>,
    pub(super) version: u64,
    session_kind: SessionKind,
    force_sync: bool,
    max_dirty: usize,
    cmp: Arc<dyn RecordComparator>,
    stats: Arc<BTreeStats>,
}

enum Inserted {
    Done,
    Replaced(Vec<u8>),
    Split { median: Vec<u8>, right: PageId },
}

/// `triples-0.dat` becomes `triples-0.<ext>`.
pub(crate) fn sibling_with_extension(path: &Path, ext: &str) -> PathBuf {
    path.with_extension(ext)
}

/// `triples-0.dat` becomes `triples-0.dat.<suffix>`.
pub(crate) fn sibling_with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}

fn read_header(file: &StdFileIo) -> Result<TreeHeader> {
    if file.len()? < HEADER_LEN as u64 {
        return Err(StoreError::Corruption("btree header truncated"));
    }
    TreeHeader::decode(&file.read_vec(0, HEADER_LEN)?)
}

impl BTree {
    /// Opens the tree stored at `path`, creating the file (and writing its
    /// header) when it does not exist yet.
    ///
    /// A leftover journal is not applied here; callers inspect it with
    /// [`BTree::pending_journal`] and decide between [`BTree::undo`] and
    /// [`BTree::discard_journal`].
    pub fn open(
        path: impl AsRef<Path>,
        value_size: usize,
        cmp: Arc<dyn RecordComparator>,
        options: &BTreeOptions,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = StdFileIo::open(&path)?;
        let header = if file.is_empty()? {
            let geom = Geometry::new(options.block_size, value_size)?;
            let header = TreeHeader {
                block_size: geom.block_size as u32,
                value_size: value_size as u32,
                root: PageId::NONE,
            };
            let mut block = vec![0u8; geom.block_size];
            block[..HEADER_LEN].copy_from_slice(&header.encode());
            file.write_at(0, &block)?;
            file.sync_all()?;
            debug!(path = %path.display(), block_size = geom.block_size, value_size, "created btree file");
            header
        } else {
            let header = read_header(&file)?;
            if header.value_size as usize != value_size {
                return Err(StoreError::Invalid(
                    "record size does not match existing btree",
                ));
            }
            header
        };
        let geom = Geometry::new(header.block_size as usize, value_size)?;
        let journal = Journal::open(sibling_with_suffix(&path, "journal"), geom.block_size as u32)?;
        let alloc = AllocatedNodesList::open(
            sibling_with_extension(&path, "alloc"),
            options.force_sync,
        )?;
        let cache_size = NonZeroUsize::new(options.node_cache_size.max(1))
            .ok_or(StoreError::Invalid("node cache size must be positive"))?;
        let stats = Arc::new(BTreeStats::default());
        let state = TreeState {
            file,
            journal,
            alloc,
            header,
            header_dirty: false,
            geom,
            clean: LruCache::new(cache_size),
            dirty: FxHashMap::default(),
            version: 0,
            session_kind: SessionKind::Transaction,
            force_sync: options.force_sync,
            max_dirty: options.max_dirty_nodes.max(1),
            cmp: Arc::clone(&cmp),
            stats: Arc::clone(&stats),
        };
        Ok(Self {
            shared: Arc::new(Shared {
                path,
                cmp,
                state: Mutex::new(state),
                stats,
            }),
        })
    }

    /// Path of the tree file.
    pub fn path(&self) -> &Path {
        &self.shared.path
    }

    /// Length in bytes of every record.
    pub fn value_size(&self) -> usize {
        self.shared.state.lock().geom.value_size
    }

    /// Block size recorded in the file header.
    pub fn block_size(&self) -> usize {
        self.shared.state.lock().geom.block_size
    }

    /// Counters for this tree.
    pub fn stats(&self) -> BTreeStatsSnapshot {
        self.shared.stats.snapshot()
    }

    /// Returns the stored record that compares equal to `key`.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let mut st = self.shared.state.lock();
        let mut id = st.header.root;
        while !id.is_none() {
            let node = st.node(id)?;
            match node.search(self.shared.cmp.as_ref(), key) {
                Ok(idx) => return Ok(Some(node.values[idx].clone())),
                Err(_) if node.is_leaf() => return Ok(None),
                Err(idx) => id = node.children[idx],
            }
        }
        Ok(None)
    }

    /// Inserts `value`, replacing and returning a record that compares equal.
    pub fn insert(&self, value: &[u8]) -> Result<Option<Vec<u8>>> {
        let mut st = self.shared.state.lock();
        st.check_len(value)?;
        let old = st.insert(value)?;
        st.after_write()?;
        Ok(old)
    }

    /// Removes and returns the record that compares equal to `key`.
    pub fn remove(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let mut st = self.shared.state.lock();
        st.check_len(key)?;
        let removed = st.remove(key)?;
        st.after_write()?;
        Ok(removed)
    }

    /// Iterates every record in comparator order.
    pub fn iterate_all(&self) -> RecordIter {
        RecordIter::new(Arc::clone(&self.shared), None, None, None)
    }

    /// Iterates records `r` with `min <= r <= max` in comparator order.
    pub fn iterate_range(&self, min: &[u8], max: &[u8]) -> RecordIter {
        RecordIter::new(
            Arc::clone(&self.shared),
            Some(min.to_vec()),
            Some(max.to_vec()),
            None,
        )
    }

    /// Iterates every record whose bits selected by `mask` equal `pattern`'s.
    pub fn iterate_values(&self, pattern: &[u8], mask: &[u8]) -> RecordIter {
        RecordIter::new(
            Arc::clone(&self.shared),
            None,
            None,
            Some((pattern.to_vec(), mask.to_vec())),
        )
    }

    /// Combination of [`BTree::iterate_range`] and [`BTree::iterate_values`].
    pub fn iterate_range_values(
        &self,
        pattern: &[u8],
        mask: &[u8],
        min: &[u8],
        max: &[u8],
    ) -> RecordIter {
        RecordIter::new(
            Arc::clone(&self.shared),
            Some(min.to_vec()),
            Some(max.to_vec()),
            Some((pattern.to_vec(), mask.to_vec())),
        )
    }

    /// Selects the journal session kind used for the next modifications.
    pub fn set_session_kind(&self, kind: SessionKind) {
        self.shared.state.lock().session_kind = kind;
    }

    /// Kind of the journal left on disk by a previous run, if any.
    pub fn pending_journal(&self) -> Result<Option<SessionKind>> {
        let st = self.shared.state.lock();
        Ok(st.journal.pending()?.map(|p| p.kind))
    }

    /// Writes dirty nodes back (journal first) without ending the session.
    pub fn flush(&self) -> Result<()> {
        self.shared.state.lock().flush()
    }

    /// Checkpoint: flushes, fsyncs, truncates the journal and persists the
    /// node bitmap.
    pub fn sync(&self) -> Result<()> {
        self.shared.state.lock().sync()
    }

    /// Restores the tree to its last checkpoint.
    pub fn undo(&self) -> Result<()> {
        let mut st = self.shared.state.lock();
        st.undo(&self.shared.path)
    }

    /// Drops the journal, keeping the pages as they are on disk.
    pub fn discard_journal(&self) -> Result<()> {
        let mut st = self.shared.state.lock();
        if st.journal.pending()?.is_some() {
            info!(path = %self.shared.path.display(), "discarding btree journal");
        }
        st.dirty.clear();
        st.header_dirty = false;
        let force = st.force_sync;
        st.journal.reset(force)
    }

    /// Removes every record. Not journaled: only call between sessions.
    pub fn clear(&self) -> Result<()> {
        let mut st = self.shared.state.lock();
        st.clear()
    }

    /// Number of node pages in use.
    pub fn node_count(&self) -> Result<u32> {
        let mut st = self.shared.state.lock();
        st.ensure_alloc()?;
        st.alloc.node_count()
    }

    /// Highest node page id in use.
    pub fn max_node_id(&self) -> Result<PageId> {
        let mut st = self.shared.state.lock();
        st.ensure_alloc()?;
        st.alloc.max_node_id()
    }

    /// Walks the whole tree checking ordering, fill and depth invariants.
    pub fn check_structure(&self) -> Result<TreeSummary> {
        let mut st = self.shared.state.lock();
        st.check_structure()
    }

    /// Checkpoints the tree. The handle stays usable.
    pub fn close(&self) -> Result<()> {
        self.sync()
    }

    /// Deletes the tree file together with its journal and bitmap.
    pub fn delete(self) -> Result<()> {
        let path = self.shared.path.clone();
        let (journal_path, alloc_path) = {
            let st = self.shared.state.lock();
            (st.journal.path().to_path_buf(), st.alloc.path().to_path_buf())
        };
        drop(self);
        remove_if_exists(&path)?;
        remove_if_exists(&journal_path)?;
        remove_if_exists(&alloc_path)?;
        info!(path = %path.display(), "deleted btree");
        Ok(())
    }
}

impl TreeState {
    fn check_len(&self, value: &[u8]) -> Result<()> {
        if value.len() != self.geom.value_size {
            return Err(StoreError::Invalid("record length does not match tree"));
        }
        Ok(())
    }

    pub(super) fn node(&mut self, id: PageId) -> Result<Arc<Node>> {
        if let Some(node) = self.dirty.get(&id) {
            return Ok(Arc::clone(node));
        }
        if let Some(node) = self.clean.get(&id) {
            return Ok(Arc::clone(node));
        }
        if id.is_none() {
            return Err(StoreError::Corruption("btree references header page"));
        }
        let mut raw = vec![0u8; self.geom.block_size];
        match self.file.read_at(self.geom.offset(id), &mut raw) {
            Ok(()) => {}
            Err(StoreError::Io(err)) if err.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Err(StoreError::Corruption("btree node beyond end of file"));
            }
            Err(err) => return Err(err),
        }
        let node = Arc::new(Node::decode(id, &raw, &self.geom)?);
        self.stats.record_node_read();
        self.clean.put(id, Arc::clone(&node));
        Ok(node)
    }

    fn node_mut(&mut self, id: PageId) -> Result<Node> {
        Ok(self.node(id)?.as_ref().clone())
    }

    fn store_node(&mut self, node: Node) -> Result<()> {
        self.journal_page(node.id)?;
        self.clean.pop(&node.id);
        self.dirty.insert(node.id, Arc::new(node));
        Ok(())
    }

    fn journal_page(&mut self, page: PageId) -> Result<()> {
        if !self.journal.is_active() {
            let len = self.file.len()?;
            self.journal.begin(self.session_kind, len)?;
        }
        if self.journal.covers(page.0) {
            return Ok(());
        }
        let image = self.file.read_vec(self.geom.offset(page), self.geom.block_size)?;
        self.journal.record(page.0, &image)
    }

    fn set_root(&mut self, root: PageId) -> Result<()> {
        self.journal_page(PageId::NONE)?;
        self.header.root = root;
        self.header_dirty = true;
        Ok(())
    }

    pub(super) fn ensure_alloc(&mut self) -> Result<()> {
        if self.alloc.is_loaded() || self.alloc.load()? {
            return Ok(());
        }
        if self.header.root.is_none() {
            return self.alloc.rebuild(std::iter::empty());
        }
        warn!(path = %self.alloc.path().display(), "node bitmap missing or stale; crawling tree");
        let pages = self.crawl()?;
        info!(nodes = pages.len(), "node bitmap rebuilt");
        self.alloc.rebuild(pages)
    }

    fn crawl(&mut self) -> Result<Vec<PageId>> {
        let mut seen = FxHashSet::default();
        let mut stack = vec![self.header.root];
        while let Some(id) = stack.pop() {
            if !seen.insert(id) {
                return Err(StoreError::Corruption("btree node reachable twice"));
            }
            let node = self.node(id)?;
            stack.extend(node.children.iter().rev().copied());
        }
        let mut pages: Vec<PageId> = seen.into_iter().collect();
        pages.sort_unstable();
        Ok(pages)
    }

    fn new_node(&mut self) -> Result<Node> {
        self.ensure_alloc()?;
        Ok(Node::leaf(self.alloc.allocate()?))
    }

    fn free_node(&mut self, id: PageId) -> Result<()> {
        self.ensure_alloc()?;
        self.dirty.remove(&id);
        self.clean.pop(&id);
        self.alloc.free(id)
    }

    fn after_write(&mut self) -> Result<()> {
        if self.dirty.len() > self.max_dirty {
            debug!(dirty = self.dirty.len(), "dirty node threshold reached");
            self.flush()?;
        }
        Ok(())
    }

    fn insert(&mut self, value: &[u8]) -> Result<Option<Vec<u8>>> {
        self.version += 1;
        let root = self.header.root;
        if root.is_none() {
            let mut node = self.new_node()?;
            node.values.push(value.to_vec());
            let id = node.id;
            self.store_node(node)?;
            self.set_root(id)?;
            return Ok(None);
        }
        match self.insert_in_tree(root, value)? {
            Inserted::Done => Ok(None),
            Inserted::Replaced(old) => Ok(Some(old)),
            Inserted::Split { median, right } => {
                let mut new_root = self.new_node()?;
                new_root.values.push(median);
                new_root.children = vec![root, right];
                let id = new_root.id;
                self.store_node(new_root)?;
                self.set_root(id)?;
                Ok(None)
            }
        }
    }

    fn insert_in_tree(&mut self, id: PageId, value: &[u8]) -> Result<Inserted> {
        let cmp = Arc::clone(&self.cmp);
        let mut node = self.node_mut(id)?;
        let idx = match node.search(cmp.as_ref(), value) {
            Ok(idx) => {
                if node.values[idx] == value {
                    return Ok(Inserted::Replaced(value.to_vec()));
                }
                let old = std::mem::replace(&mut node.values[idx], value.to_vec());
                self.store_node(node)?;
                return Ok(Inserted::Replaced(old));
            }
            Err(idx) => idx,
        };
        if node.is_leaf() {
            node.values.insert(idx, value.to_vec());
        } else {
            match self.insert_in_tree(node.children[idx], value)? {
                Inserted::Split { median, right } => {
                    node.values.insert(idx, median);
                    node.children.insert(idx + 1, right);
                }
                other => return Ok(other),
            }
        }
        if node.values.len() > self.geom.max_values {
            let right_id = self.new_node()?.id;
            let (median, right) = node.split(right_id);
            self.stats.record_split();
            self.store_node(node)?;
            self.store_node(right)?;
            return Ok(Inserted::Split {
                median,
                right: right_id,
            });
        }
        self.store_node(node)?;
        Ok(Inserted::Done)
    }

    fn remove(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let root = self.header.root;
        if root.is_none() {
            return Ok(None);
        }
        let removed = self.remove_from_tree(root, key)?;
        if removed.is_some() {
            self.version += 1;
            let root_node = self.node(root)?;
            if root_node.values.is_empty() {
                let new_root = root_node.children.first().copied().unwrap_or(PageId::NONE);
                self.free_node(root)?;
                self.set_root(new_root)?;
            }
        }
        Ok(removed)
    }

    fn remove_from_tree(&mut self, id: PageId, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let cmp = Arc::clone(&self.cmp);
        let mut node = self.node_mut(id)?;
        match node.search(cmp.as_ref(), key) {
            Ok(idx) if node.is_leaf() => {
                let removed = node.values.remove(idx);
                self.store_node(node)?;
                Ok(Some(removed))
            }
            Ok(idx) => {
                let replacement = self.remove_largest(node.children[idx])?;
                let removed = std::mem::replace(&mut node.values[idx], replacement);
                self.store_node(node)?;
                self.rebalance_child(id, idx)?;
                Ok(Some(removed))
            }
            Err(_) if node.is_leaf() => Ok(None),
            Err(idx) => {
                let removed = self.remove_from_tree(node.children[idx], key)?;
                if removed.is_some() {
                    self.rebalance_child(id, idx)?;
                }
                Ok(removed)
            }
        }
    }

    fn remove_largest(&mut self, id: PageId) -> Result<Vec<u8>> {
        let mut node = self.node_mut(id)?;
        if node.is_leaf() {
            let value = node
                .values
                .pop()
                .ok_or(StoreError::Corruption("empty btree leaf"))?;
            self.store_node(node)?;
            return Ok(value);
        }
        let last = node.children.len() - 1;
        let value = self.remove_largest(node.children[last])?;
        self.rebalance_child(id, last)?;
        Ok(value)
    }

    /// Restores the minimum fill of `parent.children[idx]` by rotating a value
    /// in from a sibling or merging with one.
    fn rebalance_child(&mut self, parent_id: PageId, idx: usize) -> Result<()> {
        let min = self.geom.min_values;
        let mut parent = self.node_mut(parent_id)?;
        let mut child = self.node_mut(parent.children[idx])?;
        if child.values.len() >= min {
            return Ok(());
        }
        if idx > 0 {
            let mut left = self.node_mut(parent.children[idx - 1])?;
            if left.values.len() > min {
                let borrowed = left
                    .values
                    .pop()
                    .ok_or(StoreError::Corruption("empty btree sibling"))?;
                let separator = std::mem::replace(&mut parent.values[idx - 1], borrowed);
                child.values.insert(0, separator);
                if let Some(grandchild) = left.children.pop() {
                    child.children.insert(0, grandchild);
                }
                self.stats.record_rotation();
                self.store_node(left)?;
                self.store_node(child)?;
                return self.store_node(parent);
            }
        }
        if idx + 1 < parent.children.len() {
            let mut right = self.node_mut(parent.children[idx + 1])?;
            if right.values.len() > min {
                let borrowed = right.values.remove(0);
                let separator = std::mem::replace(&mut parent.values[idx], borrowed);
                child.values.push(separator);
                if !right.is_leaf() {
                    child.children.push(right.children.remove(0));
                }
                self.stats.record_rotation();
                self.store_node(right)?;
                self.store_node(child)?;
                return self.store_node(parent);
            }
        }
        self.stats.record_merge();
        if idx > 0 {
            let mut left = self.node_mut(parent.children[idx - 1])?;
            let separator = parent.values.remove(idx - 1);
            parent.children.remove(idx);
            left.values.push(separator);
            left.values.append(&mut child.values);
            left.children.append(&mut child.children);
            let freed = child.id;
            self.store_node(left)?;
            self.store_node(parent)?;
            self.free_node(freed)
        } else {
            let mut right = self.node_mut(parent.children[idx + 1])?;
            let separator = parent.values.remove(idx);
            parent.children.remove(idx + 1);
            child.values.push(separator);
            child.values.append(&mut right.values);
            child.children.append(&mut right.children);
            let freed = right.id;
            self.store_node(child)?;
            self.store_node(parent)?;
            self.free_node(freed)
        }
    }

    fn flush(&mut self) -> Result<()> {
        if self.dirty.is_empty() && !self.header_dirty {
            return Ok(());
        }
        self.journal.sync(self.force_sync)?;
        let mut ids: Vec<PageId> = self.dirty.keys().copied().collect();
        ids.sort_unstable();
        for id in ids {
            if let Some(node) = self.dirty.remove(&id) {
                self.file
                    .write_at(self.geom.offset(id), &node.encode(&self.geom))?;
                self.stats.record_node_write();
                self.clean.put(id, node);
            }
        }
        if self.header_dirty {
            self.file.write_at(0, &self.header.encode())?;
            self.header_dirty = false;
        }
        if self.force_sync {
            self.file.sync_all()?;
        }
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        self.flush()?;
        let force = self.force_sync;
        self.journal.reset(force)?;
        self.alloc.sync()
    }

    fn undo(&mut self, path: &Path) -> Result<()> {
        let pending = self.journal.pending()?;
        self.dirty.clear();
        self.clean.clear();
        self.header_dirty = false;
        if let Some(pending) = pending {
            for frame in &pending.frames {
                self.file
                    .write_at(self.geom.offset(PageId(frame.page)), &frame.image)?;
            }
            self.file
                .truncate(pending.original_len.max(self.geom.block_size as u64))?;
            if self.force_sync {
                self.file.sync_all()?;
            }
            self.stats.record_undo();
            info!(
                path = %path.display(),
                pages = pending.frames.len(),
                kind = ?pending.kind,
                "btree journal undone"
            );
        }
        let force = self.force_sync;
        self.journal.reset(force)?;
        self.header = read_header(&self.file)?;
        self.alloc.invalidate();
        self.version += 1;
        Ok(())
    }

    fn clear(&mut self) -> Result<()> {
        self.dirty.clear();
        self.clean.clear();
        self.header_dirty = false;
        self.header.root = PageId::NONE;
        self.file.truncate(self.geom.block_size as u64)?;
        self.file.write_at(0, &self.header.encode())?;
        if self.force_sync {
            self.file.sync_all()?;
        }
        let force = self.force_sync;
        self.journal.reset(force)?;
        self.alloc.clear()?;
        self.alloc.sync()?;
        self.version += 1;
        Ok(())
    }

    fn check_structure(&mut self) -> Result<TreeSummary> {
        let root = self.header.root;
        if root.is_none() {
            return Ok(TreeSummary::default());
        }
        let cmp = Arc::clone(&self.cmp);
        let mut summary = TreeSummary::default();
        let mut leaf_depth: Option<u32> = None;
        let mut previous: Option<Vec<u8>> = None;
        // Explicit in-order walk: (node, next value index, depth).
        let mut stack: Vec<(PageId, usize, u32)> = vec![(root, 0, 1)];
        while let Some((id, idx, depth)) = stack.pop() {
            let node = self.node(id)?;
            if idx == 0 {
                summary.nodes += 1;
                if id != root && node.values.len() < self.geom.min_values {
                    return Err(StoreError::Corruption("btree node underfull"));
                }
                if !node.is_leaf() && node.children.len() != node.values.len() + 1 {
                    return Err(StoreError::Corruption("btree child count mismatch"));
                }
            }
            if node.is_leaf() {
                match leaf_depth {
                    Some(d) if d != depth => {
                        return Err(StoreError::Corruption("btree leaves at different depths"))
                    }
                    _ => leaf_depth = Some(depth),
                }
                for value in &node.values {
                    check_order(cmp.as_ref(), previous.as_deref(), value)?;
                    previous = Some(value.clone());
                    summary.records += 1;
                }
                continue;
            }
            if idx > 0 && idx <= node.values.len() {
                let value = &node.values[idx - 1];
                check_order(cmp.as_ref(), previous.as_deref(), value)?;
                previous = Some(value.clone());
                summary.records += 1;
            }
            if idx < node.children.len() {
                stack.push((id, idx + 1, depth));
                stack.push((node.children[idx], 0, depth + 1));
            }
        }
        summary.depth = leaf_depth.unwrap_or(0);
        Ok(summary)
    }
}

fn check_order(cmp: &dyn RecordComparator, previous: Option<&[u8]>, value: &[u8]) -> Result<()> {
    if let Some(prev) = previous {
        if cmp.compare(prev, value) != std::cmp::Ordering::Less {
            return Err(StoreError::Corruption("btree records out of order"));
        }
    }
    Ok(())
}
