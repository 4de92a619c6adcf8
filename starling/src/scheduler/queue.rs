use std::collections::VecDeque;
use std::fmt;

/// Ordering policy for work the scheduler could not admit immediately.
///
/// The scheduler owns its queue exclusively and only touches it from its owner
/// task, so implementations need no internal synchronization.
pub trait QueueStrategy<T>: Send {
    /// Appends an item in arrival order.
    fn enqueue(&mut self, item: T);

    /// Removes the next item to admit.
    fn dequeue(&mut self) -> Option<T>;

    /// Number of items waiting.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// First-in, first-out queue: items are admitted in the order they arrived.
///
/// # Performance Characteristics
/// - O(1) enqueue and dequeue
/// - Grows on demand, never rejects an item
pub struct FifoQueue<T> {
    items: VecDeque<T>,
}

impl<T> FifoQueue<T> {
    pub fn new() -> Self {
        Self {
            items: VecDeque::new(),
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity),
        }
    }
}

impl<T> Default for FifoQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for FifoQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FifoQueue")
            .field("len", &self.items.len())
            .finish()
    }
}

impl<T: Send> QueueStrategy<T> for FifoQueue<T> {
    fn enqueue(&mut self, item: T) {
        self.items.push_back(item);
    }

    fn dequeue(&mut self) -> Option<T> {
        self.items.pop_front()
    }

    fn len(&self) -> usize {
        self.items.len()
    }
}
