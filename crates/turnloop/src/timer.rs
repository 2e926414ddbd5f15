//! Timer queue: a min-heap of entries ordered by due time.
//!
//! Equal due times fall back to the enqueue sequence number, so timers
//! created with the same delay fire in creation order.

use crate::error::TaskResult;
use crate::scheduler::Scheduler;
use crate::task::{TaskFn, TaskId};
use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// Boxed repeating task action (interval timers)
pub(crate) type RepeatFn = Box<dyn FnMut(&mut Scheduler) -> TaskResult>;

/// Action of a timer-queue entry
pub(crate) enum TimerAction {
    /// Run once and discard
    Once(TaskFn),
    /// Run, then re-arm `period` ticks after the current clock
    Repeat {
        action: RepeatFn,
        period: u64,
    },
}

/// Entry in the timer heap
pub(crate) struct TimerEntry {
    /// Logical clock value at which this entry becomes eligible to run
    pub(crate) due: u64,
    /// Enqueue sequence number, tie-break for equal due times
    pub(crate) seq: u64,
    /// Task this entry belongs to
    pub(crate) id: TaskId,
    /// What to run
    pub(crate) action: TimerAction,
}

// Reverse ordering for min-heap (earliest due first, then lowest seq)
impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for TimerEntry {}

/// Min-heap of timer entries
#[derive(Default)]
pub(crate) struct TimerHeap {
    heap: BinaryHeap<TimerEntry>,
}

impl TimerHeap {
    pub(crate) fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
        }
    }

    pub(crate) fn push(&mut self, entry: TimerEntry) {
        self.heap.push(entry);
    }

    /// Earliest entry, if any
    pub(crate) fn peek(&self) -> Option<&TimerEntry> {
        self.heap.peek()
    }

    /// Remove and return the earliest entry
    pub(crate) fn pop(&mut self) -> Option<TimerEntry> {
        self.heap.pop()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.heap.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(due: u64, seq: u64) -> TimerEntry {
        TimerEntry {
            due,
            seq,
            id: TaskId::new(),
            action: TimerAction::Once(Box::new(|_| Ok(()))),
        }
    }

    #[test]
    fn test_heap_orders_by_due_time() {
        let mut heap = TimerHeap::new();
        heap.push(entry(50, 0));
        heap.push(entry(10, 1));
        heap.push(entry(30, 2));

        assert_eq!(heap.pop().map(|e| e.due), Some(10));
        assert_eq!(heap.pop().map(|e| e.due), Some(30));
        assert_eq!(heap.pop().map(|e| e.due), Some(50));
        assert!(heap.is_empty());
    }

    #[test]
    fn test_heap_breaks_ties_by_seq() {
        let mut heap = TimerHeap::new();
        heap.push(entry(20, 7));
        heap.push(entry(20, 3));
        heap.push(entry(20, 5));

        assert_eq!(heap.pop().map(|e| e.seq), Some(3));
        assert_eq!(heap.pop().map(|e| e.seq), Some(5));
        assert_eq!(heap.pop().map(|e| e.seq), Some(7));
    }

    #[test]
    fn test_heap_peek_does_not_remove() {
        let mut heap = TimerHeap::new();
        heap.push(entry(5, 0));

        assert_eq!(heap.peek().map(|e| e.due), Some(5));
        assert_eq!(heap.len(), 1);
    }
}
