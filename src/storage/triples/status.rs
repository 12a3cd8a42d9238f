use std::path::{Path, PathBuf};

use crate::primitives::io::{FileIo, StdFileIo};
use crate::types::Result;

const FILE_NAME: &str = "txn-status";

/// Persisted transaction phase.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
pub enum TxnStatus {
    /// No transaction in flight.
    None,
    /// A transaction is writing; its changes are undone on recovery.
    Active,
    /// All changes are durable; recovery finishes the commit.
    Committing,
    /// Commit finished apart from resetting the marker.
    Committed,
    /// The marker byte is unreadable; treated like [`TxnStatus::Active`].
    Unknown,
}

impl TxnStatus {
    fn to_byte(self) -> u8 {
        match self {
            TxnStatus::None => 0,
            TxnStatus::Active => 1,
            TxnStatus::Committing => 2,
            TxnStatus::Committed => 3,
            TxnStatus::Unknown => 0xff,
        }
    }

    fn from_byte(b: u8) -> Self {
        match b {
            0 => TxnStatus::None,
            1 => TxnStatus::Active,
            2 => TxnStatus::Committing,
            3 => TxnStatus::Committed,
            _ => TxnStatus::Unknown,
        }
    }
}

/// Single-byte marker file.
pub(super) struct TxnStatusFile {
    path: PathBuf,
    io: StdFileIo,
    force_sync: bool,
}

impl TxnStatusFile {
    pub fn open(dir: &Path, force_sync: bool) -> Result<Self> {
        let path = dir.join(FILE_NAME);
        let io = StdFileIo::open(&path)?;
        Ok(Self {
            path,
            io,
            force_sync,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Missing or empty file reads as [`TxnStatus::None`].
    pub fn get(&self) -> Result<TxnStatus> {
        if self.io.is_empty()? {
            return Ok(TxnStatus::None);
        }
        let raw = self.io.read_vec(0, 1)?;
        Ok(TxnStatus::from_byte(raw[0]))
    }

    pub fn set(&self, status: TxnStatus) -> Result<()> {
        self.io.write_at(0, &[status.to_byte()])?;
        self.io.truncate(1)?;
        if self.force_sync {
            self.io.sync_all()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn marker_round_trips_and_defaults_to_none() -> Result<()> {
        let dir = tempdir()?;
        let file = TxnStatusFile::open(dir.path(), true)?;
        assert_eq!(file.get()?, TxnStatus::None);
        for status in [TxnStatus::Active, TxnStatus::Committing, TxnStatus::Committed, TxnStatus::None] {
            file.set(status)?;
            assert_eq!(TxnStatusFile::open(dir.path(), true)?.get()?, status);
        }
        std::fs::write(file.path(), [9u8])?;
        assert_eq!(file.get()?, TxnStatus::Unknown);
        Ok(())
    }
}
