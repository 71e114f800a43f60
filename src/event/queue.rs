//! Priority-banded task queue with a delayed-task heap.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, VecDeque};
use std::time::Instant;

use super::{Nestability, TaskPriority, PRIORITY_COUNT};

pub(crate) struct Entry<T> {
    pub nestability: Nestability,
    pub task: T,
}

struct DelayedEntry<T> {
    timeout: Instant,
    sequence: u64,
    priority: TaskPriority,
    nestability: Nestability,
    task: T,
}

// Heap ordering: earliest timeout first; posting order breaks ties so
// same-deadline tasks keep FIFO.
impl<T> PartialEq for DelayedEntry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.timeout == other.timeout && self.sequence == other.sequence
    }
}

impl<T> Eq for DelayedEntry<T> {}

impl<T> PartialOrd for DelayedEntry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for DelayedEntry<T> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.timeout, self.sequence).cmp(&(other.timeout, other.sequence))
    }
}

/// Bounded to one agent. Holds one FIFO per priority band plus a heap of
/// delayed entries promoted lazily at pop time.
pub(crate) struct TaskQueue<T> {
    bands: [VecDeque<Entry<T>>; PRIORITY_COUNT],
    delayed: BinaryHeap<Reverse<DelayedEntry<T>>>,
    sequence: u64,
}

impl<T> Default for TaskQueue<T> {
    fn default() -> Self {
        Self {
            bands: Default::default(),
            delayed: BinaryHeap::new(),
            sequence: 0,
        }
    }
}

impl<T> TaskQueue<T> {
    pub fn push(&mut self, priority: TaskPriority, nestability: Nestability, task: T) {
        self.bands[priority.band()].push_back(Entry { nestability, task });
    }

    pub fn push_delayed(
        &mut self,
        timeout: Instant,
        priority: TaskPriority,
        nestability: Nestability,
        task: T,
    ) {
        let sequence = self.sequence;
        self.sequence += 1;
        self.delayed.push(Reverse(DelayedEntry {
            timeout,
            sequence,
            priority,
            nestability,
            task,
        }));
    }

    /// Move every delayed entry whose timeout is due into its priority
    /// FIFO; returns the next wake time if delayed entries remain.
    pub fn flush_delayed(&mut self, now: Instant) -> Option<Instant> {
        loop {
            match self.delayed.peek() {
                Some(Reverse(entry)) if entry.timeout <= now => {
                    let Reverse(entry) = self.delayed.pop().expect("peeked entry");
                    self.bands[entry.priority.band()].push_back(Entry {
                        nestability: entry.nestability,
                        task: entry.task,
                    });
                }
                Some(Reverse(entry)) => return Some(entry.timeout),
                None => return None,
            }
        }
    }

    /// Highest-priority, oldest entry respecting the nesting discipline.
    /// When `nested`, non-nestable entries are skipped in place.
    pub fn pop(&mut self, nested: bool) -> Option<Entry<T>> {
        for band in &mut self.bands {
            if !nested {
                if let Some(entry) = band.pop_front() {
                    return Some(entry);
                }
                continue;
            }
            let index = band
                .iter()
                .position(|entry| entry.nestability == Nestability::Nestable);
            if let Some(index) = index {
                return band.remove(index);
            }
        }
        None
    }

    /// Immediately-runnable entries exist (ignores still-delayed tasks).
    pub fn has_ready(&self) -> bool {
        self.bands.iter().any(|band| !band.is_empty())
    }

    pub fn is_empty(&self) -> bool {
        !self.has_ready() && self.delayed.is_empty()
    }

    /// Drain the user-blocking band for one final run and discard the
    /// rest, including every delayed entry.
    pub fn finalize(&mut self) -> Vec<T> {
        let drained = self.bands[TaskPriority::UserBlocking.band()]
            .drain(..)
            .map(|entry| entry.task)
            .collect();
        for band in &mut self.bands {
            band.clear();
        }
        self.delayed.clear();
        drained
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn queue() -> TaskQueue<&'static str> {
        TaskQueue::default()
    }

    #[test]
    fn priority_preempts_fifo() {
        let mut q = queue();
        q.push(TaskPriority::UserVisible, Nestability::Nestable, "visible-1");
        q.push(TaskPriority::BestEffort, Nestability::Nestable, "best");
        q.push(TaskPriority::UserVisible, Nestability::Nestable, "visible-2");
        q.push(TaskPriority::UserBlocking, Nestability::Nestable, "blocking");

        let order: Vec<_> = std::iter::from_fn(|| q.pop(false).map(|e| e.task)).collect();
        assert_eq!(order, ["blocking", "visible-1", "visible-2", "best"]);
    }

    #[test]
    fn nested_pop_skips_non_nestable() {
        let mut q = queue();
        q.push(TaskPriority::UserVisible, Nestability::NonNestable, "outer");
        q.push(TaskPriority::UserVisible, Nestability::Nestable, "inner");

        assert_eq!(q.pop(true).unwrap().task, "inner");
        // The skipped task is still there for the non-nested scan.
        assert_eq!(q.pop(false).unwrap().task, "outer");
        assert!(q.pop(false).is_none());
    }

    #[test]
    fn delayed_promotion_at_deadline() {
        let mut q = queue();
        let now = Instant::now();
        q.push_delayed(now + Duration::from_millis(50), TaskPriority::UserVisible, Nestability::Nestable, "later");
        q.push_delayed(now, TaskPriority::UserVisible, Nestability::Nestable, "due");

        // A delayed task with timeout == now is pop-eligible on the very
        // next scan.
        let wake = q.flush_delayed(now);
        assert_eq!(wake, Some(now + Duration::from_millis(50)));
        assert_eq!(q.pop(false).unwrap().task, "due");
        assert!(q.pop(false).is_none());

        assert_eq!(q.flush_delayed(now + Duration::from_millis(50)), None);
        assert_eq!(q.pop(false).unwrap().task, "later");
    }

    #[test]
    fn finalize_keeps_user_blocking_only() {
        let mut q = queue();
        q.push(TaskPriority::UserBlocking, Nestability::Nestable, "cleanup-1");
        q.push(TaskPriority::UserVisible, Nestability::Nestable, "client");
        q.push(TaskPriority::UserBlocking, Nestability::NonNestable, "cleanup-2");
        q.push_delayed(
            Instant::now() + Duration::from_secs(60),
            TaskPriority::UserVisible,
            Nestability::Nestable,
            "delayed",
        );

        assert_eq!(q.finalize(), vec!["cleanup-1", "cleanup-2"]);
        assert!(q.is_empty());
    }
}
