#![forbid(unsafe_code)]

use std::path::Path;

use crate::primitives::bytes::ord::{get_u32_be, get_u64_be, put_u64_be};
use crate::primitives::io::{FileIo, StdFileIo};
use crate::types::{Result, StoreError, ValueId};

const HEADER_LEN: u64 = 4;
const DATA_MAGIC: [u8; 3] = *b"nvf";
const ID_MAGIC: [u8; 3] = *b"nif";
const FORMAT_VERSION: u8 = 1;
const OFFSET_LEN: u64 = 8;
const LEN_PREFIX: u64 = 4;

fn open_with_header(path: &Path, magic: [u8; 3], name: &'static str) -> Result<StdFileIo> {
    let io = StdFileIo::open(path)?;
    let len = io.len()?;
    if len == 0 {
        io.write_at(0, &[magic[0], magic[1], magic[2], FORMAT_VERSION])?;
        io.sync_all()?;
        return Ok(io);
    }
    if len < HEADER_LEN {
        return Err(StoreError::Corruption("value file header truncated"));
    }
    let header = io.read_vec(0, HEADER_LEN as usize)?;
    if header[0..3] != magic {
        return Err(StoreError::Corruption("value file magic mismatch"));
    }
    if header[3] > FORMAT_VERSION {
        return Err(StoreError::UnsupportedVersion {
            file: name,
            found: u32::from(header[3]),
            supported: u32::from(FORMAT_VERSION),
        });
    }
    Ok(io)
}

/// `values.dat`: length-prefixed encoded values, appended in id order.
pub(super) struct DataFile {
    io: StdFileIo,
}

impl DataFile {
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self {
            io: open_with_header(path, DATA_MAGIC, "value data")?,
        })
    }

    pub fn append(&self, data: &[u8]) -> Result<u64> {
        let len = u32::try_from(data.len()).map_err(|_| StoreError::Invalid("value too large"))?;
        let mut record = Vec::with_capacity(LEN_PREFIX as usize + data.len());
        record.extend_from_slice(&len.to_be_bytes());
        record.extend_from_slice(data);
        self.io.append(&record)
    }

    pub fn read(&self, offset: u64) -> Result<Vec<u8>> {
        let file_len = self.io.len()?;
        if offset < HEADER_LEN || offset + LEN_PREFIX > file_len {
            return Err(StoreError::Corruption("value offset out of range"));
        }
        let len = u64::from(get_u32_be(&self.io.read_vec(offset, LEN_PREFIX as usize)?));
        if offset + LEN_PREFIX + len > file_len {
            return Err(StoreError::Corruption("value record truncated"));
        }
        self.io.read_vec(offset + LEN_PREFIX, len as usize)
    }

    /// True when a complete record starts at `offset`.
    pub fn holds_record(&self, offset: u64) -> Result<bool> {
        let file_len = self.io.len()?;
        if offset < HEADER_LEN || offset + LEN_PREFIX > file_len {
            return Ok(false);
        }
        let len = u64::from(get_u32_be(&self.io.read_vec(offset, LEN_PREFIX as usize)?));
        Ok(offset + LEN_PREFIX + len <= file_len)
    }

    pub fn clear(&self) -> Result<()> {
        self.io.truncate(HEADER_LEN)
    }

    pub fn sync(&self) -> Result<()> {
        self.io.sync_all()
    }
}

/// `values.id`: the data offset of id `n` lives in slot `n - 1`.
pub(super) struct IdFile {
    io: StdFileIo,
}

impl IdFile {
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self {
            io: open_with_header(path, ID_MAGIC, "value id")?,
        })
    }

    /// Number of complete slots.
    pub fn count(&self) -> Result<u32> {
        let body = self.io.len()?.saturating_sub(HEADER_LEN);
        u32::try_from(body / OFFSET_LEN).map_err(|_| StoreError::Corruption("value id file too large"))
    }

    fn slot(id: ValueId) -> Result<u64> {
        if id.0 <= 0 {
            return Err(StoreError::Invalid("value ids start at 1"));
        }
        Ok(HEADER_LEN + (id.0 as u64 - 1) * OFFSET_LEN)
    }

    pub fn offset_of(&self, id: ValueId) -> Result<Option<u64>> {
        if id.0 <= 0 || id.0 as u32 > self.count()? {
            return Ok(None);
        }
        let raw = self.io.read_vec(Self::slot(id)?, OFFSET_LEN as usize)?;
        Ok(Some(get_u64_be(&raw)))
    }

    pub fn append(&self, offset: u64) -> Result<ValueId> {
        let next = self.count()? + 1;
        let id = ValueId(i32::try_from(next).map_err(|_| StoreError::Invalid("value id space exhausted"))?);
        let mut raw = [0u8; OFFSET_LEN as usize];
        put_u64_be(&mut raw, offset);
        self.io.write_at(Self::slot(id)?, &raw)?;
        Ok(id)
    }

    /// Drops slots from `count` onwards, including any torn partial slot.
    pub fn truncate_to(&self, count: u32) -> Result<()> {
        self.io.truncate(HEADER_LEN + u64::from(count) * OFFSET_LEN)
    }

    pub fn clear(&self) -> Result<()> {
        self.io.truncate(HEADER_LEN)
    }

    pub fn sync(&self) -> Result<()> {
        self.io.sync_all()
    }

    pub fn has_torn_tail(&self) -> Result<bool> {
        Ok(self.io.len()?.saturating_sub(HEADER_LEN) % OFFSET_LEN != 0)
    }
}
