//! Shared accumulators written to by concurrently running collection tasks.
//!
//! Task group units have no result channel, so anything they produce goes
//! through one of these. Both are safe to share behind an `Arc` and never lose
//! an update under concurrent use.

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Mutex, PoisonError,
};

/// Monotonic counter incremented from arbitrary tasks.
#[derive(Debug, Default)]
pub struct Counter(AtomicUsize);

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc(&self) -> usize {
        self.add(1)
    }

    /// Returns the value after the addition.
    pub fn add(&self, n: usize) -> usize {
        self.0.fetch_add(n, Ordering::Relaxed) + n
    }

    pub fn get(&self) -> usize {
        self.0.load(Ordering::Relaxed)
    }
}

/// Append-only list guarded by a mutex. Items are never removed or reordered
/// until the list is drained with [`AppendOnly::take`].
#[derive(Debug)]
pub struct AppendOnly<T> {
    items: Mutex<Vec<T>>,
}

impl<T> Default for AppendOnly<T> {
    fn default() -> Self {
        Self { items: Mutex::new(Vec::new()) }
    }
}

impl<T> AppendOnly<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, item: T) {
        self.items.lock().unwrap_or_else(PoisonError::into_inner).push(item);
    }

    pub fn extend<I: IntoIterator<Item = T>>(&self, items: I) {
        self.items.lock().unwrap_or_else(PoisonError::into_inner).extend(items);
    }

    pub fn len(&self) -> usize {
        self.items.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drain everything appended so far.
    pub fn take(&self) -> Vec<T> {
        std::mem::take(&mut *self.items.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl<T: Clone> AppendOnly<T> {
    pub fn snapshot(&self) -> Vec<T> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}
