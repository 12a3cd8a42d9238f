use std::cmp::Ordering;
use std::sync::Arc;

use crate::primitives::bytes::matches_pattern;
use crate::types::{PageId, Result};

use super::tree::{Shared, TreeState};

/// Lazy ascending iteration over a B-tree.
///
/// The cursor keeps a root-to-node path between calls and releases the tree
/// lock after every record. When the tree changed in the meantime it seeks
/// again to the first record after the last one returned, so it stays valid
/// across concurrent inserts and removes.
pub struct RecordIter {
    shared: Arc<Shared>,
    lower: Option<Vec<u8>>,
    upper: Option<Vec<u8>>,
    filter: Option<(Vec<u8>, Vec<u8>)>,
    // (node, index of the next value to emit in it)
    path: Vec<(PageId, usize)>,
    last: Option<Vec<u8>>,
    version: u64,
    started: bool,
    done: bool,
}

impl RecordIter {
    pub(super) fn new(
        shared: Arc<Shared>,
        lower: Option<Vec<u8>>,
        upper: Option<Vec<u8>>,
        filter: Option<(Vec<u8>, Vec<u8>)>,
    ) -> Self {
        Self {
            shared,
            lower,
            upper,
            filter,
            path: Vec::new(),
            last: None,
            version: 0,
            started: false,
            done: false,
        }
    }

    /// Returns the next matching record, or `None` once the range is exhausted.
    pub fn try_next(&mut self) -> Result<Option<Vec<u8>>> {
        if self.done {
            return Ok(None);
        }
        let shared = Arc::clone(&self.shared);
        let mut st = shared.state.lock();
        if !self.started {
            let lower = self.lower.clone();
            self.seek(&mut st, lower.as_deref(), true)?;
            self.started = true;
            self.version = st.version;
        } else if st.version != self.version {
            match self.last.clone() {
                Some(last) => self.seek(&mut st, Some(&last), false)?,
                None => {
                    let lower = self.lower.clone();
                    self.seek(&mut st, lower.as_deref(), true)?
                }
            }
            self.version = st.version;
        }
        loop {
            let Some(value) = self.advance(&mut st)? else {
                self.close();
                return Ok(None);
            };
            let past_end = self
                .upper
                .as_ref()
                .is_some_and(|upper| shared.cmp.compare(&value, upper) == Ordering::Greater);
            if past_end {
                self.close();
                return Ok(None);
            }
            let keep = match &self.filter {
                Some((pattern, mask)) => matches_pattern(&value, mask, pattern),
                None => true,
            };
            self.last = Some(value.clone());
            if keep {
                return Ok(Some(value));
            }
        }
    }

    /// Stops the iteration; later calls return `None`. Idempotent.
    pub fn close(&mut self) {
        self.done = true;
        self.path.clear();
    }

    fn seek(&mut self, st: &mut TreeState, key: Option<&[u8]>, inclusive: bool) -> Result<()> {
        self.path.clear();
        let mut id = st.header.root;
        while !id.is_none() {
            let node = st.node(id)?;
            let idx = match key {
                None => 0,
                Some(key) => match node.search(self.shared.cmp.as_ref(), key) {
                    Ok(found) if inclusive => {
                        self.path.push((id, found));
                        return Ok(());
                    }
                    Ok(found) => found + 1,
                    Err(slot) => slot,
                },
            };
            self.path.push((id, idx));
            if node.is_leaf() {
                break;
            }
            id = node.children[idx];
        }
        Ok(())
    }

    fn advance(&mut self, st: &mut TreeState) -> Result<Option<Vec<u8>>> {
        loop {
            let Some(&(id, idx)) = self.path.last() else {
                return Ok(None);
            };
            let node = st.node(id)?;
            if idx >= node.values.len() {
                self.path.pop();
                continue;
            }
            let value = node.values[idx].clone();
            if let Some(top) = self.path.last_mut() {
                top.1 = idx + 1;
            }
            if !node.is_leaf() {
                let mut child = node.children[idx + 1];
                loop {
                    self.path.push((child, 0));
                    let next = st.node(child)?;
                    if next.is_leaf() {
                        break;
                    }
                    child = next.children[0];
                }
            }
            return Ok(Some(value));
        }
    }
}

impl Iterator for RecordIter {
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        self.try_next().transpose()
    }
}
