use std::cmp::Ordering;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use crate::storage::btree::{BTree, BTreeOptions, RecordComparator};
use crate::types::{Result, StoreError};

use super::record::{TriplePattern, CONTEXT_IDX, OBJ_IDX, PRED_IDX, RECORD_LEN, SUBJ_IDX};

/// One position of a statement.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Field {
    /// Subject.
    Subject,
    /// Predicate.
    Predicate,
    /// Object.
    Object,
    /// Context.
    Context,
}

impl Field {
    fn offset(self) -> usize {
        match self {
            Field::Subject => SUBJ_IDX,
            Field::Predicate => PRED_IDX,
            Field::Object => OBJ_IDX,
            Field::Context => CONTEXT_IDX,
        }
    }

    fn letter(self) -> char {
        match self {
            Field::Subject => 's',
            Field::Predicate => 'p',
            Field::Object => 'o',
            Field::Context => 'c',
        }
    }

    fn from_letter(c: char) -> Option<Self> {
        match c.to_ascii_lowercase() {
            's' => Some(Field::Subject),
            'p' => Some(Field::Predicate),
            'o' => Some(Field::Object),
            'c' => Some(Field::Context),
            _ => None,
        }
    }

    fn is_bound(self, pattern: &TriplePattern) -> bool {
        match self {
            Field::Subject => pattern.subject.is_some(),
            Field::Predicate => pattern.predicate.is_some(),
            Field::Object => pattern.object.is_some(),
            Field::Context => pattern.context.is_some(),
        }
    }
}

/// Sort order of an index, written as a permutation such as `"posc"`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FieldOrder([Field; 4]);

impl FieldOrder {
    /// The `spoc` order.
    pub const SPOC: FieldOrder = FieldOrder([
        Field::Subject,
        Field::Predicate,
        Field::Object,
        Field::Context,
    ]);

    /// Fields from most to least significant.
    pub fn fields(&self) -> [Field; 4] {
        self.0
    }

    /// Number of leading fields bound in `pattern`; zero means a full scan.
    pub fn pattern_score(&self, pattern: &TriplePattern) -> usize {
        self.0.iter().take_while(|f| f.is_bound(pattern)).count()
    }
}

impl FromStr for FieldOrder {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        let mut fields = Vec::with_capacity(4);
        for c in s.chars() {
            let field = Field::from_letter(c).ok_or(StoreError::Invalid(
                "index specification may only use s, p, o and c",
            ))?;
            if fields.contains(&field) {
                return Err(StoreError::Invalid("index specification repeats a field"));
            }
            fields.push(field);
        }
        let fields: [Field; 4] = fields
            .try_into()
            .map_err(|_| StoreError::Invalid("index specification needs exactly 4 fields"))?;
        Ok(FieldOrder(fields))
    }
}

impl fmt::Display for FieldOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for field in self.0 {
            write!(f, "{}", field.letter())?;
        }
        Ok(())
    }
}

/// Parses a comma or whitespace separated index list. Duplicates are
/// dropped, keeping the first occurrence.
pub fn parse_index_spec(spec: &str) -> Result<Vec<FieldOrder>> {
    let mut orders: Vec<FieldOrder> = Vec::new();
    for token in spec
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|t| !t.is_empty())
    {
        let order = token.parse()?;
        if !orders.contains(&order) {
            orders.push(order);
        }
    }
    Ok(orders)
}

/// Renders orders back into an index list.
pub fn format_index_spec(orders: &[FieldOrder]) -> String {
    orders
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

/// Compares statement records field by field in an index's order. The flag
/// byte never takes part.
#[derive(Debug)]
pub struct TripleComparator {
    order: FieldOrder,
}

impl TripleComparator {
    /// Comparator for `order`.
    pub fn new(order: FieldOrder) -> Self {
        Self { order }
    }
}

impl RecordComparator for TripleComparator {
    fn compare(&self, key: &[u8], record: &[u8]) -> Ordering {
        for field in self.order.0 {
            let at = field.offset();
            match key[at..at + 4].cmp(&record[at..at + 4]) {
                Ordering::Equal => continue,
                other => return other,
            }
        }
        Ordering::Equal
    }
}

pub(super) fn index_path(dir: &Path, order: FieldOrder) -> PathBuf {
    dir.join(format!("triples-{order}.dat"))
}

pub(super) struct TripleIndex {
    pub order: FieldOrder,
    pub tree: BTree,
}

impl TripleIndex {
    pub fn open(dir: &Path, order: FieldOrder, options: &BTreeOptions) -> Result<Self> {
        let tree = BTree::open(
            index_path(dir, order),
            RECORD_LEN,
            Arc::new(TripleComparator::new(order)),
            options,
        )?;
        Ok(Self { order, tree })
    }
}
