//! Limited block buffer.

use std::cmp::Ordering;
use std::mem;

/// Converts a `less` predicate into a total [`Ordering`].
pub fn order_by_less<T>(less: &dyn Fn(&T, &T) -> bool, a: &T, b: &T) -> Ordering {
    if less(a, b) {
        Ordering::Less
    } else if less(b, a) {
        Ordering::Greater
    } else {
        Ordering::Equal
    }
}

/// Buffer limited by elements count. Holds the records of the block being filled.
pub struct LimitedBuffer<T> {
    limit: usize,
    inner: Vec<T>,
}

impl<T> LimitedBuffer<T> {
    pub fn new(limit: usize) -> Self {
        LimitedBuffer {
            limit,
            inner: Vec::new(),
        }
    }

    /// Adds a new element to the buffer.
    pub fn push(&mut self, item: T) {
        self.inner.push(item);
    }

    /// Returns buffer length
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Checks if one more element would exceed the limit.
    pub fn is_full(&self) -> bool {
        self.inner.len() + 1 > self.limit
    }

    /// Sorts the buffered elements (stable) and hands them out, leaving the buffer empty.
    pub fn take_sorted(&mut self, less: &dyn Fn(&T, &T) -> bool) -> Vec<T> {
        let mut items = mem::take(&mut self.inner);
        items.sort_by(|a, b| order_by_less(less, a, b));

        return items;
    }
}
