// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::collections::BTreeMap;
use std::fmt;
use std::time::{Duration, Instant};

use crate::Task;

/// Unique ordering key for a scheduled task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct ScheduleKey {
    deadline: Instant,

    /// Discriminator that keeps two tasks with the same deadline distinct and
    /// in submission order.
    sequence: u64,
}

/// A task waiting for its deadline, as handed out by
/// [`ScheduleQueue::poll_due`]. Carries its key so it can be pushed back
/// without losing its place.
pub(crate) struct ScheduledTask {
    pub(crate) key: ScheduleKey,
    pub(crate) task: Task,
}

/// The delayed-work companion of the task queue: tasks ordered by deadline,
/// owned exclusively by the worker thread.
///
/// Tasks are held in an ordered map in the order in which they fall due,
/// ties broken by insertion order.
#[derive(Default)]
pub(crate) struct ScheduleQueue {
    tasks: BTreeMap<ScheduleKey, Task>,
    last_sequence: u64,
}

impl ScheduleQueue {
    /// Registers `task` to run no earlier than `deadline`.
    pub(crate) fn insert(&mut self, deadline: Instant, task: Task) {
        // Wrapping is fine; the sequence only disambiguates equal deadlines.
        self.last_sequence = self.last_sequence.wrapping_add(1);
        let key = ScheduleKey {
            deadline,
            sequence: self.last_sequence,
        };
        self.tasks.insert(key, task);
    }

    /// Puts back a task previously returned by [`poll_due`][Self::poll_due],
    /// preserving its original position.
    pub(crate) fn reinsert(&mut self, scheduled: ScheduledTask) {
        self.tasks.insert(scheduled.key, scheduled.task);
    }

    /// The deadline of the task that falls due next, if any.
    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        self.tasks.keys().next().map(|key| key.deadline)
    }

    /// How long until the next task falls due, measured from `now`.
    /// Zero when a task is already due.
    pub(crate) fn next_delay(&self, now: Instant) -> Option<Duration> {
        self.next_deadline()
            .map(|deadline| deadline.saturating_duration_since(now))
    }

    /// Removes and returns the head task if its deadline has passed.
    pub(crate) fn poll_due(&mut self, now: Instant) -> Option<ScheduledTask> {
        let key = *self.tasks.keys().next()?;
        if key.deadline > now {
            return None;
        }

        let task = self
            .tasks
            .remove(&key)
            .expect("head key was just observed under the same borrow");
        Some(ScheduledTask { key, task })
    }

    /// Drops every pending scheduled task.
    pub(crate) fn cancel_all(&mut self) {
        self.tasks.clear();
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.tasks.len()
    }
}

impl fmt::Debug for ScheduleQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScheduleQueue")
            .field("len", &self.tasks.len())
            .field("next_deadline", &self.next_deadline())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU64, Ordering};

    use super::*;

    fn noop() -> Task {
        Box::new(|| {})
    }

    #[test]
    fn tasks_come_due_in_deadline_order() {
        let mut queue = ScheduleQueue::default();
        let now = Instant::now();

        let order = Arc::new(AtomicU64::new(0));
        for (label, offset_ms) in [(2u64, 20u64), (1, 10), (3, 30)] {
            let order = Arc::clone(&order);
            queue.insert(
                now + Duration::from_millis(offset_ms),
                Box::new(move || {
                    let slot = order.load(Ordering::Relaxed) * 10 + label;
                    order.store(slot, Ordering::Relaxed);
                }),
            );
        }

        let late = now + Duration::from_millis(100);
        while let Some(scheduled) = queue.poll_due(late) {
            (scheduled.task)();
        }

        assert_eq!(order.load(Ordering::Relaxed), 123);
        assert!(queue.is_empty());
    }

    #[test]
    fn equal_deadlines_preserve_insertion_order() {
        let mut queue = ScheduleQueue::default();
        let deadline = Instant::now();

        let order = Arc::new(AtomicU64::new(0));
        for label in 1..=3u64 {
            let order = Arc::clone(&order);
            queue.insert(
                deadline,
                Box::new(move || {
                    let slot = order.load(Ordering::Relaxed) * 10 + label;
                    order.store(slot, Ordering::Relaxed);
                }),
            );
        }

        while let Some(scheduled) = queue.poll_due(deadline) {
            (scheduled.task)();
        }

        assert_eq!(order.load(Ordering::Relaxed), 123);
    }

    #[test]
    fn poll_due_leaves_future_tasks_alone() {
        let mut queue = ScheduleQueue::default();
        let now = Instant::now();

        queue.insert(now + Duration::from_secs(60), noop());

        assert!(queue.poll_due(now).is_none());
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn reinsert_restores_the_original_position() {
        let mut queue = ScheduleQueue::default();
        let now = Instant::now();

        queue.insert(now, noop());
        queue.insert(now + Duration::from_millis(5), noop());

        let head = queue.poll_due(now).expect("head is due");
        let head_deadline = head.key.deadline;
        queue.reinsert(head);

        assert_eq!(queue.next_deadline(), Some(head_deadline));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn next_delay_saturates_for_overdue_tasks() {
        let mut queue = ScheduleQueue::default();
        let now = Instant::now();

        queue.insert(now, noop());

        let delay = queue
            .next_delay(now + Duration::from_millis(5))
            .expect("a task is queued");
        assert_eq!(delay, Duration::ZERO);
    }

    #[test]
    fn cancel_all_discards_everything() {
        let mut queue = ScheduleQueue::default();
        let now = Instant::now();

        queue.insert(now, noop());
        queue.insert(now + Duration::from_secs(1), noop());

        queue.cancel_all();

        assert!(queue.is_empty());
        assert!(queue.next_deadline().is_none());
    }
}
