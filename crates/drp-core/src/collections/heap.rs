use std::cmp::Reverse;
use std::collections::BinaryHeap;

/// Binary min-heap: `pop` yields the smallest element first.
///
/// Kahn's algorithm pops ready vertices through this so that ties between
/// concurrent vertices break by hash, independent of insertion order.
#[derive(Debug, Clone)]
pub struct MinHeap<T: Ord> {
    inner: BinaryHeap<Reverse<T>>,
}

impl<T: Ord> Default for MinHeap<T> {
    fn default() -> Self {
        Self {
            inner: BinaryHeap::new(),
        }
    }
}

impl<T: Ord> MinHeap<T> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, value: T) {
        self.inner.push(Reverse(value));
    }

    pub fn pop(&mut self) -> Option<T> {
        self.inner.pop().map(|Reverse(v)| v)
    }

    #[must_use]
    pub fn peek(&self) -> Option<&T> {
        self.inner.peek().map(|Reverse(v)| v)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl<T: Ord> FromIterator<T> for MinHeap<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self {
            inner: iter.into_iter().map(Reverse).collect(),
        }
    }
}
