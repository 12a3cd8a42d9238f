#![forbid(unsafe_code)]
//! Rollback journal holding pre-images of pages overwritten in place.
//!
//! Layout: a fixed header (`"jnl"`, version, session kind, page size,
//! original file length, crc) followed by frames of
//! `[page id][payload crc][header crc][page image]`. A frame that fails its
//! checks ends the journal; anything after it was never synced.

use std::path::{Path, PathBuf};

use rustc_hash::FxHashSet;
use tracing::{debug, warn};

use crate::primitives::bytes::ord::{get_u32_be, get_u64_be, put_u32_be, put_u64_be};
use crate::primitives::io::{FileIo, StdFileIo};
use crate::types::checksum::{header_crc32, page_crc32};
use crate::types::{Result, StoreError};

const JOURNAL_MAGIC: [u8; 3] = *b"jnl";
const JOURNAL_VERSION: u8 = 1;
const HEADER_LEN: usize = 24;
const FRAME_HEADER_LEN: usize = 12;

/// Why a journal session was opened; recovery treats the kinds differently.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SessionKind {
    /// Pages modified while a transaction's operations were applied.
    Transaction,
    /// Pages modified while commit rewrote record flags.
    Finalize,
}

impl SessionKind {
    fn to_byte(self) -> u8 {
        match self {
            SessionKind::Transaction => 1,
            SessionKind::Finalize => 2,
        }
    }

    fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(SessionKind::Transaction),
            2 => Some(SessionKind::Finalize),
            _ => None,
        }
    }
}

/// One page image read back from a journal.
#[derive(Clone, Debug)]
pub struct JournalFrame {
    /// Page the image belongs to.
    pub page: u32,
    /// Bytes the page held when the session started.
    pub image: Vec<u8>,
}

/// Journal contents found on disk.
#[derive(Clone, Debug)]
pub struct PendingJournal {
    /// Session kind recorded in the header.
    pub kind: SessionKind,
    /// Length of the protected file when the session started.
    pub original_len: u64,
    /// Intact frames in write order.
    pub frames: Vec<JournalFrame>,
}

struct ActiveSession {
    original_len: u64,
    pages: FxHashSet<u32>,
    append_offset: u64,
    synced: bool,
}

/// Rollback journal for a single paged file.
pub struct Journal {
    io: StdFileIo,
    path: PathBuf,
    page_size: u32,
    active: Option<ActiveSession>,
}

fn encode_header(kind: SessionKind, page_size: u32, original_len: u64) -> [u8; HEADER_LEN] {
    let mut buf = [0u8; HEADER_LEN];
    buf[0..3].copy_from_slice(&JOURNAL_MAGIC);
    buf[3] = JOURNAL_VERSION;
    buf[4] = kind.to_byte();
    put_u32_be(&mut buf[8..12], page_size);
    put_u64_be(&mut buf[12..20], original_len);
    let crc = header_crc32(&buf, 20..24);
    put_u32_be(&mut buf[20..24], crc);
    buf
}

fn decode_header(buf: &[u8]) -> Result<(SessionKind, u32, u64)> {
    if buf.len() < HEADER_LEN {
        return Err(StoreError::Corruption("journal header truncated"));
    }
    if buf[0..3] != JOURNAL_MAGIC {
        return Err(StoreError::Corruption("journal magic mismatch"));
    }
    if get_u32_be(&buf[20..24]) != header_crc32(&buf[..HEADER_LEN], 20..24) {
        return Err(StoreError::Corruption("journal header crc mismatch"));
    }
    if buf[3] != JOURNAL_VERSION {
        return Err(StoreError::UnsupportedVersion {
            file: "journal",
            found: u32::from(buf[3]),
            supported: u32::from(JOURNAL_VERSION),
        });
    }
    let kind = SessionKind::from_byte(buf[4])
        .ok_or(StoreError::Corruption("journal session kind unknown"))?;
    Ok((kind, get_u32_be(&buf[8..12]), get_u64_be(&buf[12..20])))
}

fn encode_frame_header(page: u32, payload: &[u8]) -> [u8; FRAME_HEADER_LEN] {
    let mut buf = [0u8; FRAME_HEADER_LEN];
    put_u32_be(&mut buf[0..4], page);
    put_u32_be(&mut buf[4..8], page_crc32(page, payload));
    let crc = header_crc32(&buf, 8..12);
    put_u32_be(&mut buf[8..12], crc);
    buf
}

impl Journal {
    /// Opens (creating if needed) the journal at `path` for pages of `page_size` bytes.
    ///
    /// Existing content is left untouched; inspect it with [`Journal::pending`].
    pub fn open(path: impl AsRef<Path>, page_size: u32) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let io = StdFileIo::open(&path)?;
        Ok(Self {
            io,
            path,
            page_size,
            active: None,
        })
    }

    /// Path of the journal file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads whatever a previous session left behind.
    ///
    /// Returns `None` for an empty journal or one whose header never made it
    /// to disk intact; no page can have been overwritten in either case.
    pub fn pending(&self) -> Result<Option<PendingJournal>> {
        let len = self.io.len()?;
        if len < HEADER_LEN as u64 {
            if len > 0 {
                warn!(path = %self.path.display(), len, "ignoring torn journal header");
            }
            return Ok(None);
        }
        let header = self.io.read_vec(0, HEADER_LEN)?;
        let (kind, page_size, original_len) = match decode_header(&header) {
            Ok(decoded) => decoded,
            Err(StoreError::Corruption(reason)) => {
                warn!(path = %self.path.display(), reason, "ignoring unreadable journal header");
                return Ok(None);
            }
            Err(err) => return Err(err),
        };
        if page_size != self.page_size {
            return Err(StoreError::Corruption("journal page size mismatch"));
        }
        let frame_len = FRAME_HEADER_LEN as u64 + u64::from(page_size);
        let mut frames = Vec::new();
        let mut off = HEADER_LEN as u64;
        while off + frame_len <= len {
            let raw = self.io.read_vec(off, frame_len as usize)?;
            let (head, image) = raw.split_at(FRAME_HEADER_LEN);
            let page = get_u32_be(&head[0..4]);
            if get_u32_be(&head[8..12]) != header_crc32(head, 8..12)
                || get_u32_be(&head[4..8]) != page_crc32(page, image)
            {
                debug!(path = %self.path.display(), off, "journal ends at damaged frame");
                break;
            }
            frames.push(JournalFrame {
                page,
                image: image.to_vec(),
            });
            off += frame_len;
        }
        Ok(Some(PendingJournal {
            kind,
            original_len,
            frames,
        }))
    }

    /// Returns true while a session is open.
    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// Starts a new session, discarding any previous journal content.
    pub fn begin(&mut self, kind: SessionKind, original_len: u64) -> Result<()> {
        if self.active.is_some() {
            return Err(StoreError::Invalid("journal session already open"));
        }
        self.io.truncate(0)?;
        self.io
            .write_at(0, &encode_header(kind, self.page_size, original_len))?;
        self.active = Some(ActiveSession {
            original_len,
            pages: FxHashSet::default(),
            append_offset: HEADER_LEN as u64,
            synced: false,
        });
        Ok(())
    }

    /// Returns true when writing `page` needs no pre-image: either it was
    /// already journaled or it lies past the end of the original file.
    pub fn covers(&self, page: u32) -> bool {
        match &self.active {
            Some(session) => {
                session.pages.contains(&page)
                    || u64::from(page) * u64::from(self.page_size) >= session.original_len
            }
            None => false,
        }
    }

    /// Appends the pre-image of `page`.
    pub fn record(&mut self, page: u32, image: &[u8]) -> Result<()> {
        if image.len() != self.page_size as usize {
            return Err(StoreError::Invalid("journal image size mismatch"));
        }
        let session = self
            .active
            .as_mut()
            .ok_or(StoreError::Invalid("journal session not open"))?;
        if !session.pages.insert(page) {
            return Ok(());
        }
        let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + image.len());
        frame.extend_from_slice(&encode_frame_header(page, image));
        frame.extend_from_slice(image);
        self.io.write_at(session.append_offset, &frame)?;
        session.append_offset += frame.len() as u64;
        session.synced = false;
        Ok(())
    }

    /// Makes every recorded pre-image durable. Must precede any in-place page write.
    pub fn sync(&mut self, force: bool) -> Result<()> {
        if let Some(session) = self.active.as_mut() {
            if !session.synced {
                if force {
                    self.io.sync_all()?;
                }
                session.synced = true;
            }
        }
        Ok(())
    }

    /// Empties the journal and ends the session.
    pub fn reset(&mut self, force: bool) -> Result<()> {
        self.active = None;
        if self.io.len()? > 0 {
            self.io.truncate(0)?;
            if force {
                self.io.sync_all()?;
            }
        }
        Ok(())
    }

    /// Number of pages journaled in the open session.
    pub fn page_count(&self) -> usize {
        self.active.as_ref().map_or(0, |s| s.pages.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn frames_roundtrip_through_disk() -> Result<()> {
        let dir = tempdir()?;
        let mut journal = Journal::open(dir.path().join("t.journal"), 8)?;
        journal.begin(SessionKind::Finalize, 64)?;
        journal.record(2, &[2u8; 8])?;
        journal.record(5, &[5u8; 8])?;
        journal.record(2, &[9u8; 8])?;
        journal.sync(true)?;
        assert!(journal.covers(2));
        assert!(!journal.covers(3));
        assert!(journal.covers(8), "pages past the original length need no image");

        let reopened = Journal::open(dir.path().join("t.journal"), 8)?;
        let pending = reopened.pending()?.expect("journal present");
        assert_eq!(pending.kind, SessionKind::Finalize);
        assert_eq!(pending.original_len, 64);
        let pages: Vec<u32> = pending.frames.iter().map(|f| f.page).collect();
        assert_eq!(pages, vec![2, 5]);
        assert_eq!(pending.frames[0].image, vec![2u8; 8]);
        Ok(())
    }

    #[test]
    fn torn_tail_frame_is_ignored() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("torn.journal");
        let mut journal = Journal::open(&path, 8)?;
        journal.begin(SessionKind::Transaction, 80)?;
        journal.record(1, &[1u8; 8])?;
        journal.record(3, &[3u8; 8])?;
        journal.sync(true)?;
        drop(journal);

        let io = StdFileIo::open(&path)?;
        let len = io.len()?;
        io.write_at(len - 2, &[0xAA, 0xBB])?;

        let pending = Journal::open(&path, 8)?.pending()?.expect("journal present");
        assert_eq!(pending.frames.len(), 1);
        assert_eq!(pending.frames[0].page, 1);
        Ok(())
    }

    #[test]
    fn reset_empties_file() -> Result<()> {
        let dir = tempdir()?;
        let mut journal = Journal::open(dir.path().join("r.journal"), 4)?;
        journal.begin(SessionKind::Transaction, 0)?;
        journal.reset(true)?;
        assert!(!journal.is_active());
        assert!(journal.pending()?.is_none());
        Ok(())
    }

    #[test]
    fn damaged_header_reads_as_absent() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("bad.journal");
        let io = StdFileIo::open(&path)?;
        io.write_at(0, &[b'j', b'n', b'l', 1, 1, 0, 0, 0])?;
        io.write_at(8, &[0u8; 16])?;
        assert!(Journal::open(&path, 4)?.pending()?.is_none());
        Ok(())
    }
}
