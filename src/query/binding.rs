#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use crate::model::Value;

/// Partial assignment of variable names to values.
///
/// Names are kept sorted so equal assignments hash and compare equal.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct BindingSet {
    values: BTreeMap<String, Value>,
}

impl BindingSet {
    /// Empty binding set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Value bound to `name`.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// Returns true when `name` has a value.
    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    /// Binds `name`, replacing any previous value.
    pub fn insert(&mut self, name: impl Into<String>, value: Value) {
        self.values.insert(name.into(), value);
    }

    /// Builder form of [`BindingSet::insert`].
    pub fn with(mut self, name: impl Into<String>, value: Value) -> Self {
        self.insert(name, value);
        self
    }

    /// Unbinds `name`.
    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.values.remove(name)
    }

    /// Number of bound names.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true when nothing is bound.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Bound names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    /// `(name, value)` pairs in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Returns true when every name bound in both sets has the same value.
    pub fn is_compatible(&self, other: &BindingSet) -> bool {
        let (small, large) = if self.len() <= other.len() {
            (self, other)
        } else {
            (other, self)
        };
        small
            .values
            .iter()
            .all(|(name, value)| large.get(name).map_or(true, |v| v == value))
    }

    /// Union of both sets, or `None` when they disagree on a name.
    pub fn merge(&self, other: &BindingSet) -> Option<BindingSet> {
        if !self.is_compatible(other) {
            return None;
        }
        let mut merged = self.clone();
        for (name, value) in &other.values {
            if !merged.contains(name) {
                merged.values.insert(name.clone(), value.clone());
            }
        }
        Some(merged)
    }
}

impl<N: Into<String>> FromIterator<(N, Value)> for BindingSet {
    fn from_iter<I: IntoIterator<Item = (N, Value)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}

impl fmt::Display for BindingSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, (name, value)) in self.values.iter().enumerate() {
            if i > 0 {
                f.write_str(";")?;
            }
            write!(f, "{name}={value}")?;
        }
        f.write_str("]")
    }
}
