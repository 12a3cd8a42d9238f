#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use tracing::{debug, trace};

use crate::primitives::io::sync_dir;
use crate::types::{Result, StoreError};

const FILE_NAME: &str = "namespaces.dat";
const MAGIC: [u8; 3] = *b"nns";
const FORMAT_VERSION: u8 = 1;
const HEADER_LEN: usize = 4;

struct State {
    prefixes: BTreeMap<String, String>,
    dirty: bool,
}

/// Prefix to namespace table persisted in `namespaces.dat`.
///
/// The whole table lives in memory; [`NamespaceStore::sync`] rewrites the file
/// through a temporary sibling, and only when something changed.
pub struct NamespaceStore {
    path: PathBuf,
    force_sync: bool,
    state: RwLock<State>,
}

fn encode(prefixes: &BTreeMap<String, String>) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(HEADER_LEN + prefixes.len() * 32);
    out.extend_from_slice(&MAGIC);
    out.push(FORMAT_VERSION);
    for (prefix, name) in prefixes {
        for text in [name, prefix] {
            let len = u16::try_from(text.len())
                .map_err(|_| StoreError::Invalid("namespace entry longer than 65535 bytes"))?;
            out.extend_from_slice(&len.to_be_bytes());
            out.extend_from_slice(text.as_bytes());
        }
    }
    Ok(out)
}

fn read_text(raw: &[u8], pos: &mut usize) -> Result<String> {
    let len_end = *pos + 2;
    if len_end > raw.len() {
        return Err(StoreError::Corruption("namespace record truncated"));
    }
    let len = u16::from_be_bytes([raw[*pos], raw[*pos + 1]]) as usize;
    let end = len_end + len;
    if end > raw.len() {
        return Err(StoreError::Corruption("namespace record truncated"));
    }
    let text = std::str::from_utf8(&raw[len_end..end])
        .map_err(|_| StoreError::Corruption("namespace entry is not valid UTF-8"))?;
    *pos = end;
    Ok(text.to_owned())
}

fn decode(raw: &[u8]) -> Result<BTreeMap<String, String>> {
    if raw.len() < HEADER_LEN {
        return Err(StoreError::Corruption("namespace file header truncated"));
    }
    if raw[0..3] != MAGIC {
        return Err(StoreError::Corruption("namespace file magic mismatch"));
    }
    if raw[3] > FORMAT_VERSION {
        return Err(StoreError::UnsupportedVersion {
            file: "namespaces",
            found: u32::from(raw[3]),
            supported: u32::from(FORMAT_VERSION),
        });
    }
    let mut prefixes = BTreeMap::new();
    let mut pos = HEADER_LEN;
    while pos < raw.len() {
        let name = read_text(raw, &mut pos)?;
        let prefix = read_text(raw, &mut pos)?;
        prefixes.insert(prefix, name);
    }
    Ok(prefixes)
}

impl NamespaceStore {
    /// Opens `namespaces.dat` in `dir`, writing an empty table when the file
    /// does not exist.
    pub fn open(dir: impl AsRef<Path>, force_sync: bool) -> Result<Self> {
        let path = dir.as_ref().join(FILE_NAME);
        let store = Self {
            path,
            force_sync,
            state: RwLock::new(State {
                prefixes: BTreeMap::new(),
                dirty: false,
            }),
        };
        match fs::read(&store.path) {
            Ok(raw) => store.state.write().prefixes = decode(&raw)?,
            Err(err) if err.kind() == ErrorKind::NotFound => store.write_file(&BTreeMap::new())?,
            Err(err) => return Err(err.into()),
        }
        debug!(path = %store.path.display(), "opened namespace store");
        Ok(store)
    }

    fn write_file(&self, prefixes: &BTreeMap<String, String>) -> Result<()> {
        let raw = encode(prefixes)?;
        let tmp = self.path.with_extension("tmp");
        {
            let mut file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp)?;
            file.write_all(&raw)?;
            if self.force_sync {
                file.sync_all()?;
            }
        }
        fs::rename(&tmp, &self.path)?;
        if self.force_sync {
            if let Some(parent) = self.path.parent() {
                sync_dir(parent)?;
            }
        }
        Ok(())
    }

    /// Namespace bound to `prefix`.
    pub fn get_namespace(&self, prefix: &str) -> Option<String> {
        self.state.read().prefixes.get(prefix).cloned()
    }

    /// Binds `prefix` to `name`, replacing any previous binding.
    pub fn set_namespace(&self, prefix: &str, name: &str) -> Result<()> {
        if prefix.len() > usize::from(u16::MAX) || name.len() > usize::from(u16::MAX) {
            return Err(StoreError::Invalid("namespace entry longer than 65535 bytes"));
        }
        let mut state = self.state.write();
        if state.prefixes.get(prefix).map(String::as_str) == Some(name) {
            return Ok(());
        }
        state.prefixes.insert(prefix.to_owned(), name.to_owned());
        state.dirty = true;
        trace!(prefix, name, "set namespace");
        Ok(())
    }

    /// Drops the binding of `prefix`, returning the namespace it had.
    pub fn remove_namespace(&self, prefix: &str) -> Option<String> {
        let mut state = self.state.write();
        let removed = state.prefixes.remove(prefix);
        if removed.is_some() {
            state.dirty = true;
        }
        removed
    }

    /// All `(prefix, namespace)` pairs ordered by prefix.
    pub fn namespaces(&self) -> Vec<(String, String)> {
        self.state
            .read()
            .prefixes
            .iter()
            .map(|(p, n)| (p.clone(), n.clone()))
            .collect()
    }

    /// Number of bindings.
    pub fn len(&self) -> usize {
        self.state.read().prefixes.len()
    }

    /// Returns true when no prefix is bound.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes every binding.
    pub fn clear(&self) {
        let mut state = self.state.write();
        if !state.prefixes.is_empty() {
            state.prefixes.clear();
            state.dirty = true;
        }
    }

    /// Returns true when the table changed since the last sync.
    pub fn is_dirty(&self) -> bool {
        self.state.read().dirty
    }

    /// Rewrites the file if the table changed since the last sync.
    pub fn sync(&self) -> Result<()> {
        let mut state = self.state.write();
        if !state.dirty {
            return Ok(());
        }
        self.write_file(&state.prefixes)?;
        state.dirty = false;
        debug!(entries = state.prefixes.len(), "synced namespaces");
        Ok(())
    }

    /// Discards unsynced changes by re-reading the file.
    pub fn reload(&self) -> Result<()> {
        let prefixes = match fs::read(&self.path) {
            Ok(raw) => decode(&raw)?,
            Err(err) if err.kind() == ErrorKind::NotFound => BTreeMap::new(),
            Err(err) => return Err(err.into()),
        };
        let mut state = self.state.write();
        state.prefixes = prefixes;
        state.dirty = false;
        Ok(())
    }

    /// Syncs pending changes.
    pub fn close(&self) -> Result<()> {
        self.sync()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn namespaces_survive_reopen() -> Result<()> {
        let dir = tempdir()?;
        {
            let store = NamespaceStore::open(dir.path(), true)?;
            store.set_namespace("ex", "http://ex/")?;
            store.set_namespace("", "http://default/")?;
            store.sync()?;
        }
        let store = NamespaceStore::open(dir.path(), true)?;
        assert_eq!(store.get_namespace("ex").as_deref(), Some("http://ex/"));
        assert_eq!(store.get_namespace("").as_deref(), Some("http://default/"));
        assert_eq!(store.len(), 2);
        Ok(())
    }

    #[test]
    fn file_layout_puts_name_before_prefix() -> Result<()> {
        let dir = tempdir()?;
        let store = NamespaceStore::open(dir.path(), false)?;
        store.set_namespace("ex", "http://e/")?;
        store.sync()?;
        let raw = fs::read(dir.path().join(FILE_NAME))?;
        assert_eq!(raw, b"nns\x01\x00\x09http://e/\x00\x02ex".to_vec());
        Ok(())
    }

    #[test]
    fn clean_sync_does_not_touch_disk() -> Result<()> {
        let dir = tempdir()?;
        let store = NamespaceStore::open(dir.path(), false)?;
        store.set_namespace("a", "http://a/")?;
        store.sync()?;
        fs::remove_file(dir.path().join(FILE_NAME))?;
        store.sync()?;
        assert!(!dir.path().join(FILE_NAME).exists());
        store.set_namespace("a", "http://a/")?;
        assert!(!store.is_dirty());
        Ok(())
    }

    #[test]
    fn reload_discards_unsynced_changes() -> Result<()> {
        let dir = tempdir()?;
        let store = NamespaceStore::open(dir.path(), false)?;
        store.set_namespace("keep", "http://k/")?;
        store.sync()?;
        store.set_namespace("drop", "http://d/")?;
        assert_eq!(store.remove_namespace("keep").as_deref(), Some("http://k/"));
        store.reload()?;
        assert_eq!(
            store.namespaces(),
            vec![("keep".to_owned(), "http://k/".to_owned())]
        );
        store.clear();
        assert!(store.is_empty());
        assert!(store.is_dirty());
        Ok(())
    }

    #[test]
    fn bad_headers_are_fatal() -> Result<()> {
        let dir = tempdir()?;
        fs::write(dir.path().join(FILE_NAME), b"nns\x02")?;
        assert!(matches!(
            NamespaceStore::open(dir.path(), false),
            Err(StoreError::UnsupportedVersion { found: 2, .. })
        ));
        fs::write(dir.path().join(FILE_NAME), b"nns\x01\x00\x05abc")?;
        assert!(matches!(
            NamespaceStore::open(dir.path(), false),
            Err(StoreError::Corruption(_))
        ));
        Ok(())
    }

    #[test]
    fn oversized_entries_are_rejected() -> Result<()> {
        let dir = tempdir()?;
        let store = NamespaceStore::open(dir.path(), false)?;
        let long = "x".repeat(70_000);
        assert!(matches!(
            store.set_namespace("p", &long),
            Err(StoreError::Invalid(_))
        ));
        Ok(())
    }
}
