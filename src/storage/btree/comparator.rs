use std::cmp::Ordering;

/// Orders a search key against a stored fixed-length record.
///
/// One tree implementation serves every index; each tree gets its own
/// comparator at construction time. Implementations may look at a subset of
/// the record bytes, in which case records that compare equal are treated as
/// the same entry and replace each other on insert.
pub trait RecordComparator: Send + Sync + 'static {
    /// Compares `key` with `record`.
    fn compare(&self, key: &[u8], record: &[u8]) -> Ordering;
}

/// Plain unsigned lexicographic order over the full record.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultComparator;

impl RecordComparator for DefaultComparator {
    fn compare(&self, key: &[u8], record: &[u8]) -> Ordering {
        key.cmp(record)
    }
}
