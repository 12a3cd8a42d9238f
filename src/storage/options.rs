use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::storage::btree::BTreeOptions;
use crate::types::{Result, StoreError};

/// Index permutations used when none are configured.
pub const DEFAULT_TRIPLE_INDEXES: &str = "spoc,posc";

/// Configuration options supplied when opening a [`super::NativeStore`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreOptions {
    /// Comma or whitespace separated index permutations, e.g. `"spoc,posc"`.
    pub triple_indexes: String,
    /// Whether commits fsync every file they touch.
    pub force_sync: bool,
    /// B-tree page size in bytes.
    pub block_size: usize,
    /// Capacity of the id to value cache.
    pub value_cache_size: usize,
    /// Capacity of the value to id cache.
    pub value_id_cache_size: usize,
    /// Capacity of each direction of the namespace cache.
    pub namespace_cache_size: usize,
    /// Clean B-tree nodes kept in memory per tree.
    pub node_cache_size: usize,
    /// Dirty B-tree nodes allowed before they are written out.
    pub max_dirty_nodes: usize,
    /// Keys of records touched by a transaction remembered for commit; past
    /// this the commit scans every index.
    pub txn_cache_size: usize,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            triple_indexes: DEFAULT_TRIPLE_INDEXES.to_owned(),
            force_sync: true,
            block_size: 4096,
            value_cache_size: 512,
            value_id_cache_size: 128,
            namespace_cache_size: 64,
            node_cache_size: 256,
            max_dirty_nodes: 1024,
            txn_cache_size: 65_536,
        }
    }
}

impl StoreOptions {
    /// Creates options with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the index permutations.
    pub fn triple_indexes(mut self, spec: impl Into<String>) -> Self {
        self.triple_indexes = spec.into();
        self
    }

    /// Enables or disables fsync on commit.
    pub fn force_sync(mut self, enabled: bool) -> Self {
        self.force_sync = enabled;
        self
    }

    /// Sets the B-tree page size.
    pub fn block_size(mut self, bytes: usize) -> Self {
        self.block_size = bytes;
        self
    }

    /// Sets the id to value cache capacity.
    pub fn value_cache_size(mut self, entries: usize) -> Self {
        self.value_cache_size = entries;
        self
    }

    /// Sets the value to id cache capacity.
    pub fn value_id_cache_size(mut self, entries: usize) -> Self {
        self.value_id_cache_size = entries;
        self
    }

    /// Sets the namespace cache capacity.
    pub fn namespace_cache_size(mut self, entries: usize) -> Self {
        self.namespace_cache_size = entries;
        self
    }

    /// Sets the clean node cache capacity.
    pub fn node_cache_size(mut self, nodes: usize) -> Self {
        self.node_cache_size = nodes;
        self
    }

    /// Sets the dirty node flush threshold.
    pub fn max_dirty_nodes(mut self, nodes: usize) -> Self {
        self.max_dirty_nodes = nodes;
        self
    }

    /// Sets how many touched record keys a transaction remembers.
    pub fn txn_cache_size(mut self, entries: usize) -> Self {
        self.txn_cache_size = entries;
        self
    }

    /// Parses options from TOML text; missing keys keep their defaults.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|err| {
            tracing::warn!(error = %err, "rejected store options");
            StoreError::Invalid("malformed store options")
        })
    }

    /// Reads options from a TOML file.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub(crate) fn btree_options(&self) -> BTreeOptions {
        BTreeOptions {
            block_size: self.block_size,
            force_sync: self.force_sync,
            node_cache_size: self.node_cache_size,
            max_dirty_nodes: self.max_dirty_nodes,
        }
    }
}

/// Limits applied while evaluating a query.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluationOptions {
    /// Largest number of entries a Distinct, Group or Order operator may hold.
    pub max_collection_size: Option<usize>,
}

impl EvaluationOptions {
    /// Creates unlimited evaluation options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Caps materializing operators at `entries`.
    pub fn max_collection_size(mut self, entries: usize) -> Self {
        self.max_collection_size = Some(entries);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toml_overrides_defaults() -> Result<()> {
        let opts = StoreOptions::from_toml_str("triple_indexes = \"spoc, opsc\"\nblock_size = 1024\n")?;
        assert_eq!(opts.triple_indexes, "spoc, opsc");
        assert_eq!(opts.block_size, 1024);
        assert!(opts.force_sync);
        assert_eq!(opts.value_cache_size, 512);
        Ok(())
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(matches!(
            StoreOptions::from_toml_str("blocksize = 3"),
            Err(StoreError::Invalid(_))
        ));
    }

    #[test]
    fn builders_chain() {
        let opts = StoreOptions::new().force_sync(false).node_cache_size(8);
        assert!(!opts.force_sync);
        assert_eq!(opts.btree_options().node_cache_size, 8);
        assert_eq!(EvaluationOptions::new().max_collection_size(3).max_collection_size, Some(3));
    }
}
