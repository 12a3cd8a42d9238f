use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::types::{Result, StoreError};

const FILE_NAME: &str = "triples.prop";
const VERSION_KEY: &str = "version";
const INDEXES_KEY: &str = "triple-indexes";
/// Oldest triple layout this crate reads.
const MIN_VERSION: u32 = 10;
/// Layout written by this crate.
pub(super) const SCHEME_VERSION: u32 = 10;

/// `key=value` metadata next to the index files.
pub(super) struct TripleProps {
    path: PathBuf,
    entries: BTreeMap<String, String>,
}

impl TripleProps {
    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(FILE_NAME);
        let mut entries = BTreeMap::new();
        match fs::read_to_string(&path) {
            Ok(text) => {
                for line in text.lines().map(str::trim) {
                    if line.is_empty() || line.starts_with('#') {
                        continue;
                    }
                    if let Some((key, value)) = line.split_once('=') {
                        entries.insert(key.trim().to_owned(), value.trim().to_owned());
                    }
                }
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
        let props = Self { path, entries };
        props.check_version()?;
        Ok(props)
    }

    fn check_version(&self) -> Result<()> {
        let Some(raw) = self.entries.get(VERSION_KEY) else {
            if !self.entries.is_empty() {
                warn!(path = %self.path.display(), "triple properties lack a version");
            }
            return Ok(());
        };
        let Ok(version) = raw.parse::<u32>() else {
            warn!(path = %self.path.display(), raw, "malformed triple properties version");
            return Ok(());
        };
        if version < MIN_VERSION {
            return Err(StoreError::Corruption("directory holds incompatible triple data"));
        }
        if version > SCHEME_VERSION {
            return Err(StoreError::UnsupportedVersion {
                file: "triples.prop",
                found: version,
                supported: SCHEME_VERSION,
            });
        }
        Ok(())
    }

    /// Index list recorded by the last open, if any.
    pub fn indexes(&self) -> Option<&str> {
        self.entries.get(INDEXES_KEY).map(String::as_str)
    }

    /// Rewrites the file when the version or index list differ.
    pub fn store(&mut self, indexes: &str, force_sync: bool) -> Result<()> {
        let version = SCHEME_VERSION.to_string();
        if self.entries.get(VERSION_KEY) == Some(&version) && self.indexes() == Some(indexes) {
            return Ok(());
        }
        self.entries.insert(VERSION_KEY.to_owned(), version);
        self.entries.insert(INDEXES_KEY.to_owned(), indexes.to_owned());
        let mut text = String::from("# triple indexes meta-data, do not edit\n");
        for (key, value) in &self.entries {
            text.push_str(key);
            text.push('=');
            text.push_str(value);
            text.push('\n');
        }
        let tmp = self.path.with_extension("prop.tmp");
        {
            let mut file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp)?;
            file.write_all(text.as_bytes())?;
            if force_sync {
                file.sync_all()?;
            }
        }
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn properties_round_trip() -> Result<()> {
        let dir = tempdir()?;
        let mut props = TripleProps::load(dir.path())?;
        assert_eq!(props.indexes(), None);
        props.store("spoc,posc", false)?;
        let text = fs::read_to_string(dir.path().join(FILE_NAME))?;
        assert!(text.contains("version=10"));
        assert_eq!(TripleProps::load(dir.path())?.indexes(), Some("spoc,posc"));
        Ok(())
    }

    #[test]
    fn version_gates() -> Result<()> {
        let dir = tempdir()?;
        fs::write(dir.path().join(FILE_NAME), "version=11\n")?;
        assert!(matches!(
            TripleProps::load(dir.path()),
            Err(StoreError::UnsupportedVersion { found: 11, .. })
        ));
        fs::write(dir.path().join(FILE_NAME), "version=3\n")?;
        assert!(matches!(
            TripleProps::load(dir.path()),
            Err(StoreError::Corruption(_))
        ));
        fs::write(dir.path().join(FILE_NAME), "version=ten\ntriple-indexes=spoc\n")?;
        assert_eq!(TripleProps::load(dir.path())?.indexes(), Some("spoc"));
        Ok(())
    }
}
