#![forbid(unsafe_code)]
//! Persistent bitmap of the node pages a B-tree currently uses.
//!
//! The file is `"anf"`, a version byte, then the bitset as little-endian bit
//! order bytes (bit `n` is bit `n % 8` of byte `n / 8`). The first change after
//! a sync truncates the file, so a crash before the next sync leaves it empty
//! and the owning tree rebuilds the bitmap by crawling.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::primitives::io::{FileIo, StdFileIo};
use crate::types::{PageId, Result, StoreError};

const ALLOC_MAGIC: [u8; 3] = *b"anf";
const ALLOC_VERSION: u8 = 1;
const ALLOC_HEADER_LEN: usize = 4;

pub(crate) struct AllocatedNodesList {
    io: StdFileIo,
    path: PathBuf,
    bits: Option<Vec<u64>>,
    dirty: bool,
    stale_on_disk: bool,
    force_sync: bool,
}

impl AllocatedNodesList {
    pub fn open(path: impl AsRef<Path>, force_sync: bool) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let io = StdFileIo::open(&path)?;
        Ok(Self {
            io,
            path,
            bits: None,
            dirty: false,
            stale_on_disk: false,
            force_sync,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_loaded(&self) -> bool {
        self.bits.is_some()
    }

    /// Loads the bitmap from disk. Returns `false` when the file holds no
    /// usable bitmap and the caller has to crawl the tree.
    pub fn load(&mut self) -> Result<bool> {
        let len = self.io.len()? as usize;
        if len == 0 {
            return Ok(false);
        }
        let raw = self.io.read_vec(0, len)?;
        let body = if raw.len() >= ALLOC_HEADER_LEN && raw[0..3] == ALLOC_MAGIC {
            if raw[3] > ALLOC_VERSION {
                return Err(StoreError::UnsupportedVersion {
                    file: "allocated nodes",
                    found: u32::from(raw[3]),
                    supported: u32::from(ALLOC_VERSION),
                });
            }
            &raw[ALLOC_HEADER_LEN..]
        } else {
            debug!(path = %self.path.display(), "reading headerless node bitmap");
            &raw[..]
        };
        let mut words = vec![0u64; body.len().div_ceil(8)];
        for (i, byte) in body.iter().enumerate() {
            words[i / 8] |= u64::from(*byte) << ((i % 8) * 8);
        }
        self.bits = Some(words);
        self.dirty = false;
        Ok(true)
    }

    /// Replaces the bitmap with the given set of live pages.
    pub fn rebuild(&mut self, pages: impl IntoIterator<Item = PageId>) -> Result<()> {
        let mut words = Vec::new();
        for page in pages {
            set_bit(&mut words, page.0 as usize, true);
        }
        self.bits = Some(words);
        self.mark_changed()
    }

    /// Forgets the in-memory bitmap; the next use reloads it.
    pub fn invalidate(&mut self) {
        self.bits = None;
        self.dirty = false;
        self.stale_on_disk = false;
    }

    fn words_mut(&mut self) -> Result<&mut Vec<u64>> {
        self.bits
            .as_mut()
            .ok_or(StoreError::Invalid("node bitmap used before loading"))
    }

    fn words(&self) -> Result<&Vec<u64>> {
        self.bits
            .as_ref()
            .ok_or(StoreError::Invalid("node bitmap used before loading"))
    }

    pub fn allocate(&mut self) -> Result<PageId> {
        self.mark_changed()?;
        let words = self.words_mut()?;
        let mut id = 1usize;
        loop {
            let word = id / 64;
            if word >= words.len() {
                break;
            }
            let free = !words[word] & (u64::MAX << (id % 64));
            if free != 0 {
                id = word * 64 + free.trailing_zeros() as usize;
                break;
            }
            id = (word + 1) * 64;
        }
        let id = u32::try_from(id).map_err(|_| StoreError::Invalid("page id space exhausted"))?;
        set_bit(words, id as usize, true);
        Ok(PageId(id))
    }

    pub fn free(&mut self, page: PageId) -> Result<()> {
        self.mark_changed()?;
        let words = self.words_mut()?;
        set_bit(words, page.0 as usize, false);
        Ok(())
    }

    #[cfg(test)]
    pub fn is_allocated(&self, page: PageId) -> Result<bool> {
        let words = self.words()?;
        let idx = page.0 as usize;
        Ok(words
            .get(idx / 64)
            .is_some_and(|w| w & (1u64 << (idx % 64)) != 0))
    }

    pub fn node_count(&self) -> Result<u32> {
        Ok(self.words()?.iter().map(|w| w.count_ones()).sum())
    }

    pub fn max_node_id(&self) -> Result<PageId> {
        let words = self.words()?;
        for (i, word) in words.iter().enumerate().rev() {
            if *word != 0 {
                let bit = 63 - word.leading_zeros() as usize;
                return Ok(PageId((i * 64 + bit) as u32));
            }
        }
        Ok(PageId::NONE)
    }

    pub fn clear(&mut self) -> Result<()> {
        self.bits = Some(Vec::new());
        self.mark_changed()
    }

    fn mark_changed(&mut self) -> Result<()> {
        if !self.stale_on_disk {
            self.io.truncate(0)?;
            if self.force_sync {
                self.io.sync_all()?;
            }
            self.stale_on_disk = true;
        }
        self.dirty = true;
        Ok(())
    }

    pub fn sync(&mut self) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }
        let words = self.words()?;
        let mut bytes: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();
        while bytes.last() == Some(&0) {
            bytes.pop();
        }
        let mut out = Vec::with_capacity(ALLOC_HEADER_LEN + bytes.len());
        out.extend_from_slice(&ALLOC_MAGIC);
        out.push(ALLOC_VERSION);
        out.extend_from_slice(&bytes);
        self.io.truncate(0)?;
        self.io.write_at(0, &out)?;
        if self.force_sync {
            self.io.sync_all()?;
        }
        self.dirty = false;
        self.stale_on_disk = false;
        Ok(())
    }
}

fn set_bit(words: &mut Vec<u64>, idx: usize, value: bool) {
    let word = idx / 64;
    if word >= words.len() {
        if !value {
            return;
        }
        words.resize(word + 1, 0);
    }
    if value {
        words[word] |= 1u64 << (idx % 64);
    } else {
        words[word] &= !(1u64 << (idx % 64));
    }
}
