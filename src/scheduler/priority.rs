//! Request prioritization.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use serde::{Deserialize, Serialize};

/// Priority level for requests. Higher levels are dispatched first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low = 0,
    #[default]
    Normal = 1,
    High = 2,
    Immediate = 3,
}

impl From<u8> for Priority {
    fn from(value: u8) -> Self {
        match value {
            0 => Self::Low,
            1 => Self::Normal,
            2 => Self::High,
            _ => Self::Immediate,
        }
    }
}

/// Item with associated priority for queue ordering.
#[derive(Debug)]
pub struct PrioritizedItem<T> {
    pub priority: Priority,
    pub sequence: u64,
    pub item: T,
}

impl<T> PartialEq for PrioritizedItem<T> {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.sequence == other.sequence
    }
}

impl<T> Eq for PrioritizedItem<T> {}

impl<T> PartialOrd for PrioritizedItem<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for PrioritizedItem<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.priority.cmp(&other.priority) {
            Ordering::Equal => other.sequence.cmp(&self.sequence), // Lower sequence = earlier
            ord => ord,
        }
    }
}

/// Max-heap ordered by priority, then by ascending sequence number.
///
/// The sequence is supplied by the caller so an item keeps its place in
/// line when it is pushed again (e.g. on retry).
pub struct PriorityQueue<T> {
    heap: BinaryHeap<PrioritizedItem<T>>,
}

impl<T> PriorityQueue<T> {
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
        }
    }

    pub fn push(&mut self, item: T, priority: Priority, sequence: u64) {
        self.heap.push(PrioritizedItem {
            priority,
            sequence,
            item,
        });
    }

    pub fn pop(&mut self) -> Option<T> {
        self.heap.pop().map(|p| p.item)
    }

    pub fn peek(&self) -> Option<&T> {
        self.heap.peek().map(|p| &p.item)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Iterate in unspecified order.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.heap.iter().map(|p| &p.item)
    }
}

impl<T> Default for PriorityQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn orders_by_priority_then_sequence() {
        let mut queue = PriorityQueue::new();
        queue.push("normal-1", Priority::Normal, 1);
        queue.push("low", Priority::Low, 0);
        queue.push("immediate", Priority::Immediate, 5);
        queue.push("normal-0", Priority::Normal, 0);
        queue.push("high", Priority::High, 9);

        let order: Vec<_> = std::iter::from_fn(|| queue.pop()).collect();
        assert_eq!(order, vec!["immediate", "high", "normal-0", "normal-1", "low"]);
    }

    #[test]
    fn re_pushed_item_keeps_its_place() {
        let mut queue = PriorityQueue::new();
        queue.push("later", Priority::Normal, 7);
        queue.push("retried", Priority::Normal, 3);
        assert_eq!(queue.pop(), Some("retried"));
    }

    #[test]
    fn priority_from_u8_saturates() {
        assert_eq!(Priority::from(0), Priority::Low);
        assert_eq!(Priority::from(2), Priority::High);
        assert_eq!(Priority::from(200), Priority::Immediate);
    }
}
