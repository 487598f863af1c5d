//! Binary min-heap with position tracking
//!
//! Unlike `std::collections::BinaryHeap`, the ordering is a plain predicate
//! (which need not be a total order) and every element is told its current
//! slot each time it moves, so members can keep a valid back-reference into
//! the backing vector.

/// Returns true when the first argument must sort before the second
pub type LessFn<T> = fn(&T, &T) -> bool;

/// Called with an element and its new slot whenever the element moves
pub type IndexFn<T> = fn(&mut T, usize);

pub struct IndexedHeap<T> {
    items: Vec<T>,
    less: LessFn<T>,
    set_index: IndexFn<T>,
}

impl<T> IndexedHeap<T> {
    pub fn new(less: LessFn<T>, set_index: IndexFn<T>) -> Self {
        Self {
            items: Vec::new(),
            less,
            set_index,
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Insert an element and restore heap order. O(log n)
    pub fn push(&mut self, mut item: T) {
        let slot = self.items.len();
        (self.set_index)(&mut item, slot);
        self.items.push(item);
        self.up(slot);
    }

    /// Remove and return the minimum element. O(log n)
    pub fn pop(&mut self) -> Option<T> {
        let last = self.items.len().checked_sub(1)?;
        self.swap(0, last);
        self.down(0, last);
        self.items.pop()
    }

    /// Minimum element without removing it
    pub fn peek(&self) -> Option<&T> {
        self.items.first()
    }

    /// Re-establish heap order after arbitrary key changes. O(n)
    pub fn rebuild(&mut self) {
        let n = self.items.len();
        for (slot, item) in self.items.iter_mut().enumerate() {
            (self.set_index)(item, slot);
        }
        for i in (0..n / 2).rev() {
            self.down(i, n);
        }
    }

    /// Elements in backing-slot order (not sorted)
    pub fn as_slice(&self) -> &[T] {
        &self.items
    }

    /// Mutable access in slot order. Callers that change ordering keys must
    /// call [`IndexedHeap::rebuild`] afterwards.
    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, T> {
        self.items.iter_mut()
    }

    fn swap(&mut self, i: usize, j: usize) {
        self.items.swap(i, j);
        (self.set_index)(&mut self.items[i], i);
        (self.set_index)(&mut self.items[j], j);
    }

    fn is_less(&self, i: usize, j: usize) -> bool {
        (self.less)(&self.items[i], &self.items[j])
    }

    fn up(&mut self, mut j: usize) {
        while j > 0 {
            let parent = (j - 1) / 2;
            if !self.is_less(j, parent) {
                break;
            }
            self.swap(parent, j);
            j = parent;
        }
    }

    fn down(&mut self, mut i: usize, n: usize) {
        loop {
            let left = 2 * i + 1;
            if left >= n {
                break;
            }
            let mut child = left;
            let right = left + 1;
            if right < n && self.is_less(right, left) {
                child = right;
            }
            if !self.is_less(child, i) {
                break;
            }
            self.swap(i, child);
            i = child;
        }
    }
}
