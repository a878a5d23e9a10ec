use std::collections::HashSet;
use std::hash::Hash;

/// Unordered set of graph identifiers.
///
/// Used as the "visited" output of LCA search and as the subgraph filter
/// handed to topological sort.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectSet<T: Eq + Hash> {
    entries: HashSet<T>,
}

impl<T: Eq + Hash> Default for ObjectSet<T> {
    fn default() -> Self {
        Self {
            entries: HashSet::new(),
        }
    }
}

impl<T: Eq + Hash> ObjectSet<T> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `value`; returns `true` when it was not already present.
    pub fn add(&mut self, value: T) -> bool {
        self.entries.insert(value)
    }

    /// Remove `value`; returns `true` when it was present.
    pub fn delete(&mut self, value: &T) -> bool {
        self.entries.remove(value)
    }

    #[must_use]
    pub fn contains(&self, value: &T) -> bool {
        self.entries.contains(value)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.entries.iter()
    }
}

impl<T: Eq + Hash> FromIterator<T> for ObjectSet<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

impl<T: Eq + Hash> Extend<T> for ObjectSet<T> {
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        self.entries.extend(iter);
    }
}
