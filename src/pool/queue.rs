use std::slice;
use std::sync::Arc;

/// A strict ordering hook used by [`PriorityQueue`].
///
/// `a.less(&b)` returns `true` when `a` should be popped before `b`.
pub trait Less {
    fn less(&self, other: &Self) -> bool;
}

impl<T: Less + ?Sized> Less for Arc<T> {
    fn less(&self, other: &Self) -> bool {
        (**self).less(&**other)
    }
}

/// A binary min-heap ordered by [`Less`].
///
/// Unlike [`std::collections::BinaryHeap`] this exposes positions, so an element
/// that was mutated in place can be re-sifted with [`fix`](Self::fix) and an
/// arbitrary element can be taken out with [`remove`](Self::remove).
///
/// The queue only orders what it is given. Holding `Arc`s to connections lets
/// a policy rank them without taking them away from the pool that owns them.
#[derive(Debug, Clone)]
pub struct PriorityQueue<T> {
    heap: Vec<T>,
}

impl<T> Default for PriorityQueue<T> {
    fn default() -> Self {
        Self { heap: Vec::new() }
    }
}

impl<T: Less> PriorityQueue<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self { heap: Vec::with_capacity(capacity) }
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Inserts `item`, keeping heap order. `O(log n)`.
    pub fn push(&mut self, item: T) {
        self.heap.push(item);
        self.sift_up(self.heap.len() - 1);
    }

    /// Removes and returns the minimum element, or `None` when empty. `O(log n)`.
    pub fn pop(&mut self) -> Option<T> {
        self.remove(0)
    }

    /// Returns the minimum element without removing it. `O(1)`.
    pub fn top(&self) -> Option<&T> {
        self.heap.first()
    }

    /// Mutable access to the element at position `i`.
    ///
    /// If the mutation changes the element's order, call [`fix(i)`](Self::fix)
    /// afterwards.
    pub fn get_mut(&mut self, i: usize) -> Option<&mut T> {
        self.heap.get_mut(i)
    }

    /// Re-establishes heap order after the element at `i` changed.
    ///
    /// Equivalent to, but cheaper than, `remove(i)` followed by `push`.
    /// Out-of-range positions are ignored.
    pub fn fix(&mut self, i: usize) {
        if i >= self.heap.len() {
            return;
        }
        if !self.sift_down(i) {
            self.sift_up(i);
        }
    }

    /// Removes and returns the element at position `i`. `O(log n)`.
    pub fn remove(&mut self, i: usize) -> Option<T> {
        let last = self.heap.len().checked_sub(1)?;
        if i > last {
            return None;
        }

        self.heap.swap(i, last);
        let item = self.heap.pop();

        if i < self.heap.len() && !self.sift_down(i) {
            self.sift_up(i);
        }

        item
    }

    /// Iterates in heap (not sorted) order.
    pub fn iter(&self) -> slice::Iter<'_, T> {
        self.heap.iter()
    }

    fn sift_up(&mut self, mut i: usize) {
        while i > 0 {
            let parent = (i - 1) / 2;
            if !self.heap[i].less(&self.heap[parent]) {
                break;
            }
            self.heap.swap(i, parent);
            i = parent;
        }
    }

    // returns true if the element moved
    fn sift_down(&mut self, start: usize) -> bool {
        let n = self.heap.len();
        let mut i = start;

        loop {
            let left = 2 * i + 1;
            if left >= n {
                break;
            }

            let right = left + 1;
            let child = if right < n && self.heap[right].less(&self.heap[left]) {
                right
            } else {
                left
            };

            if !self.heap[child].less(&self.heap[i]) {
                break;
            }

            self.heap.swap(i, child);
            i = child;
        }

        i > start
    }
}

impl<T: Less> Extend<T> for PriorityQueue<T> {
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        for item in iter {
            self.push(item);
        }
    }
}

impl<T: Less> FromIterator<T> for PriorityQueue<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut queue = Self::new();
        queue.extend(iter);
        queue
    }
}
