use crate::primitives::bytes::ord::{get_i32_be, put_i32_be};
use crate::types::{Result, StoreError, ValueId};

/// Bytes per statement record: four ids and a flag byte.
pub const RECORD_LEN: usize = 17;
/// Bytes covered by the four ids.
pub(crate) const KEY_LEN: usize = 16;
pub(crate) const FLAG_IDX: usize = 16;

pub(crate) const SUBJ_IDX: usize = 0;
pub(crate) const PRED_IDX: usize = 4;
pub(crate) const OBJ_IDX: usize = 8;
pub(crate) const CONTEXT_IDX: usize = 12;

/// Statement was asserted rather than inferred.
pub const EXPLICIT_FLAG: u8 = 0x1;
/// Statement was inserted by the open transaction.
pub const ADDED_FLAG: u8 = 0x2;
/// Statement was removed by the open transaction.
pub const REMOVED_FLAG: u8 = 0x4;
/// The open transaction flipped the explicit bit.
pub const TOGGLE_EXPLICIT_FLAG: u8 = 0x8;

const TXN_FLAGS: u8 = ADDED_FLAG | REMOVED_FLAG | TOGGLE_EXPLICIT_FLAG;

/// Decoded statement record. Context `0` is the default graph.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TripleRecord {
    /// Subject id.
    pub subject: ValueId,
    /// Predicate id.
    pub predicate: ValueId,
    /// Object id.
    pub object: ValueId,
    /// Context id, [`ValueId::UNKNOWN`] for the default graph.
    pub context: ValueId,
    /// Flag byte.
    pub flags: u8,
}

impl TripleRecord {
    /// Record without flags.
    pub fn new(subject: ValueId, predicate: ValueId, object: ValueId, context: ValueId) -> Self {
        Self {
            subject,
            predicate,
            object,
            context,
            flags: 0,
        }
    }

    /// Serialized form; the layout is the same in every index.
    pub fn encode(&self) -> [u8; RECORD_LEN] {
        let mut out = [0u8; RECORD_LEN];
        put_i32_be(&mut out[SUBJ_IDX..SUBJ_IDX + 4], self.subject.0);
        put_i32_be(&mut out[PRED_IDX..PRED_IDX + 4], self.predicate.0);
        put_i32_be(&mut out[OBJ_IDX..OBJ_IDX + 4], self.object.0);
        put_i32_be(&mut out[CONTEXT_IDX..CONTEXT_IDX + 4], self.context.0);
        out[FLAG_IDX] = self.flags;
        out
    }

    /// Parses a stored record.
    pub fn decode(raw: &[u8]) -> Result<Self> {
        if raw.len() != RECORD_LEN {
            return Err(StoreError::Corruption("statement record has wrong length"));
        }
        Ok(Self::from_ids(raw, raw[FLAG_IDX]))
    }

    fn from_ids(raw: &[u8], flags: u8) -> Self {
        Self {
            subject: ValueId(get_i32_be(&raw[SUBJ_IDX..SUBJ_IDX + 4])),
            predicate: ValueId(get_i32_be(&raw[PRED_IDX..PRED_IDX + 4])),
            object: ValueId(get_i32_be(&raw[OBJ_IDX..OBJ_IDX + 4])),
            context: ValueId(get_i32_be(&raw[CONTEXT_IDX..CONTEXT_IDX + 4])),
            flags,
        }
    }

    pub(crate) fn key(&self) -> [u8; KEY_LEN] {
        let mut key = [0u8; KEY_LEN];
        key.copy_from_slice(&self.encode()[..KEY_LEN]);
        key
    }

    pub(crate) fn from_key(key: &[u8; KEY_LEN]) -> Self {
        Self::from_ids(key, 0)
    }

    fn has(&self, flag: u8) -> bool {
        self.flags & flag != 0
    }

    /// Explicit as committed, ignoring any pending toggle.
    pub fn is_explicit(&self) -> bool {
        self.has(EXPLICIT_FLAG)
    }

    /// Explicit as seen by the open transaction.
    pub fn is_explicit_in_transaction(&self) -> bool {
        self.has(EXPLICIT_FLAG) != self.has(TOGGLE_EXPLICIT_FLAG)
    }

    /// Inserted by the open transaction.
    pub fn is_added(&self) -> bool {
        self.has(ADDED_FLAG)
    }

    /// Removed by the open transaction.
    pub fn is_removed(&self) -> bool {
        self.has(REMOVED_FLAG)
    }

    /// Explicit bit flipped by the open transaction.
    pub fn is_toggled(&self) -> bool {
        self.has(TOGGLE_EXPLICIT_FLAG)
    }

    /// Returns true when any transaction flag is set.
    pub fn has_txn_flags(&self) -> bool {
        self.flags & TXN_FLAGS != 0
    }

    /// Committed form of a record touched by a transaction; `None` when the
    /// transaction removed it.
    pub(crate) fn finalized(mut self) -> Option<Self> {
        if self.is_removed() {
            return None;
        }
        if self.is_toggled() {
            self.flags ^= EXPLICIT_FLAG;
        }
        self.flags &= !TXN_FLAGS;
        Some(self)
    }
}

/// Statement pattern; `None` positions are wildcards.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TriplePattern {
    /// Subject id or wildcard.
    pub subject: Option<ValueId>,
    /// Predicate id or wildcard.
    pub predicate: Option<ValueId>,
    /// Object id or wildcard.
    pub object: Option<ValueId>,
    /// Context id (`0` for the default graph) or wildcard.
    pub context: Option<ValueId>,
}

impl TriplePattern {
    /// Pattern matching every statement.
    pub fn any() -> Self {
        Self::default()
    }

    /// Pattern with all four positions given.
    pub fn exact(record: &TripleRecord) -> Self {
        Self {
            subject: Some(record.subject),
            predicate: Some(record.predicate),
            object: Some(record.object),
            context: Some(record.context),
        }
    }

    fn positions(&self) -> [(usize, Option<ValueId>); 4] {
        [
            (SUBJ_IDX, self.subject),
            (PRED_IDX, self.predicate),
            (OBJ_IDX, self.object),
            (CONTEXT_IDX, self.context),
        ]
    }

    /// Search key and mask selecting the bound positions.
    pub(crate) fn key_and_mask(&self) -> ([u8; RECORD_LEN], [u8; RECORD_LEN]) {
        let mut key = [0u8; RECORD_LEN];
        let mut mask = [0u8; RECORD_LEN];
        for (offset, id) in self.positions() {
            if let Some(id) = id {
                put_i32_be(&mut key[offset..offset + 4], id.0);
                mask[offset..offset + 4].fill(0xff);
            }
        }
        (key, mask)
    }

    /// Inclusive range bounds: wildcards become all-zero and all-one bytes.
    pub(crate) fn bounds(&self) -> ([u8; RECORD_LEN], [u8; RECORD_LEN]) {
        let mut min = [0u8; RECORD_LEN];
        let mut max = [0xffu8; RECORD_LEN];
        for (offset, id) in self.positions() {
            if let Some(id) = id {
                put_i32_be(&mut min[offset..offset + 4], id.0);
                put_i32_be(&mut max[offset..offset + 4], id.0);
            }
        }
        min[FLAG_IDX] = 0;
        (min, max)
    }

    /// Returns true when no position is bound.
    pub fn is_wildcard(&self) -> bool {
        self.positions().iter().all(|(_, id)| id.is_none())
    }
}
