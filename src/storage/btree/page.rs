#![forbid(unsafe_code)]
//! On-disk layout of B-tree files.
//!
//! Block 0 carries the file header; every other block holds one node:
//!
//! ```text
//! [value count: u32][child 0: u32] { [value i][child i+1: u32] } ...
//! ```
//!
//! Values live in internal nodes as well as leaves. A node whose first child
//! is 0 is a leaf and every child slot in it is 0.

use std::cmp::Ordering;

use crate::primitives::bytes::ord::{get_u32_be, put_u32_be};
use crate::types::{PageId, Result, StoreError};

use super::comparator::RecordComparator;

pub(crate) const TREE_MAGIC: [u8; 3] = *b"btf";
pub(crate) const TREE_VERSION: u8 = 1;
pub(crate) const HEADER_LEN: usize = 16;

const COUNT_LEN: usize = 4;
const CHILD_LEN: usize = 4;

/// File header stored at the start of block 0.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct TreeHeader {
    pub block_size: u32,
    pub value_size: u32,
    pub root: PageId,
}

impl TreeHeader {
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[0..3].copy_from_slice(&TREE_MAGIC);
        buf[3] = TREE_VERSION;
        put_u32_be(&mut buf[4..8], self.block_size);
        put_u32_be(&mut buf[8..12], self.value_size);
        put_u32_be(&mut buf[12..16], self.root.0);
        buf
    }

    pub fn decode(src: &[u8]) -> Result<Self> {
        if src.len() < HEADER_LEN {
            return Err(StoreError::Corruption("btree header truncated"));
        }
        if src[0..3] != TREE_MAGIC {
            return Err(StoreError::Corruption("btree magic mismatch"));
        }
        if src[3] > TREE_VERSION {
            return Err(StoreError::UnsupportedVersion {
                file: "btree",
                found: u32::from(src[3]),
                supported: u32::from(TREE_VERSION),
            });
        }
        if src[3] != TREE_VERSION {
            return Err(StoreError::Corruption("btree format version unknown"));
        }
        Ok(Self {
            block_size: get_u32_be(&src[4..8]),
            value_size: get_u32_be(&src[8..12]),
            root: PageId(get_u32_be(&src[12..16])),
        })
    }
}

/// Derived node capacity for a block size and record length.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Geometry {
    pub block_size: usize,
    pub value_size: usize,
    pub max_values: usize,
    pub min_values: usize,
}

impl Geometry {
    pub fn new(block_size: usize, value_size: usize) -> Result<Self> {
        if value_size == 0 {
            return Err(StoreError::Invalid("record size must be positive"));
        }
        if block_size < HEADER_LEN || block_size < 3 * value_size + 20 {
            return Err(StoreError::Invalid("block size too small for record size"));
        }
        let slot = CHILD_LEN + value_size;
        let branch_factor = 1 + (block_size - COUNT_LEN - CHILD_LEN) / slot;
        let max_values = branch_factor - 1;
        Ok(Self {
            block_size,
            value_size,
            max_values,
            min_values: max_values / 2,
        })
    }

    pub fn offset(&self, id: PageId) -> u64 {
        u64::from(id.0) * self.block_size as u64
    }

    fn slot_size(&self) -> usize {
        CHILD_LEN + self.value_size
    }
}

/// Decoded node. Leaves keep `children` empty.
#[derive(Clone, Debug)]
pub(crate) struct Node {
    pub id: PageId,
    pub values: Vec<Vec<u8>>,
    pub children: Vec<PageId>,
}

impl Node {
    pub fn leaf(id: PageId) -> Self {
        Self {
            id,
            values: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// Binary search for `key`; `Ok` is the matching slot, `Err` the slot
    /// where it would be inserted (equivalently the child to descend into).
    pub fn search(&self, cmp: &dyn RecordComparator, key: &[u8]) -> std::result::Result<usize, usize> {
        let mut lo = 0usize;
        let mut hi = self.values.len();
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            match cmp.compare(key, &self.values[mid]) {
                Ordering::Greater => lo = mid + 1,
                Ordering::Less => hi = mid,
                Ordering::Equal => return Ok(mid),
            }
        }
        Err(lo)
    }

    pub fn encode(&self, geom: &Geometry) -> Vec<u8> {
        let mut buf = vec![0u8; geom.block_size];
        put_u32_be(&mut buf[0..4], self.values.len() as u32);
        let child = |i: usize| self.children.get(i).map_or(0, |c| c.0);
        put_u32_be(&mut buf[4..8], child(0));
        let mut off = COUNT_LEN + CHILD_LEN;
        for (i, value) in self.values.iter().enumerate() {
            buf[off..off + geom.value_size].copy_from_slice(value);
            put_u32_be(&mut buf[off + geom.value_size..], child(i + 1));
            off += geom.slot_size();
        }
        buf
    }

    pub fn decode(id: PageId, src: &[u8], geom: &Geometry) -> Result<Self> {
        if src.len() < geom.block_size {
            return Err(StoreError::Corruption("btree node truncated"));
        }
        let count = get_u32_be(&src[0..4]) as usize;
        if count > geom.max_values {
            return Err(StoreError::Corruption("btree node value count out of range"));
        }
        let first_child = get_u32_be(&src[4..8]);
        let mut values = Vec::with_capacity(count + 1);
        let mut children = Vec::new();
        if first_child != 0 {
            children.reserve(count + 2);
            children.push(PageId(first_child));
        }
        let mut off = COUNT_LEN + CHILD_LEN;
        for _ in 0..count {
            values.push(src[off..off + geom.value_size].to_vec());
            if first_child != 0 {
                let child = get_u32_be(&src[off + geom.value_size..]);
                if child == 0 {
                    return Err(StoreError::Corruption("internal node missing child"));
                }
                children.push(PageId(child));
            }
            off += geom.slot_size();
        }
        if first_child != 0 && count == 0 {
            return Err(StoreError::Corruption("internal node without values"));
        }
        Ok(Self {
            id,
            values,
            children,
        })
    }

    /// Splits an overfull node around its median. `self` keeps the lower
    /// half; the median and the upper half (as `right_id`) are returned.
    pub fn split(&mut self, right_id: PageId) -> (Vec<u8>, Node) {
        let mid = self.values.len() / 2;
        let right_values = self.values.split_off(mid + 1);
        let median = self.values.pop().unwrap_or_default();
        let right_children = if self.is_leaf() {
            Vec::new()
        } else {
            self.children.split_off(mid + 1)
        };
        (
            median,
            Node {
                id: right_id,
                values: right_values,
                children: right_children,
            },
        )
    }
}
