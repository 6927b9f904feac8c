// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::{QueueEntry, TaskId};

/// Minimum capacity of a task queue. Requests below this are clamped up.
pub const MIN_PENDING_TASKS: usize = 16;

/// The pending-task queue of one executor: a bounded multi-producer FIFO
/// drained by exactly one consumer, the worker thread.
///
/// This is the seam through which an [`EventLoop`][crate::EventLoop]
/// implementation can substitute its own queue. The contract:
///
/// - `offer` never blocks; a full queue hands the entry back.
/// - `take` blocks until an entry arrives or [`wake`][Self::wake] is called,
///   in which case it returns `None` exactly once.
/// - Entries come back out in arrival order.
pub trait BlockingTaskQueue: Send + Sync {
    /// Non-blocking enqueue. Returns the entry back when the queue is full.
    fn offer(&self, entry: QueueEntry) -> Result<(), QueueEntry>;

    /// Non-blocking dequeue of the head entry.
    fn poll(&self) -> Option<QueueEntry>;

    /// Blocks until an entry is available or a wake signal arrives.
    ///
    /// `None` means the consumer was woken without an entry; the caller
    /// treats this exactly like dequeuing the wakeup sentinel.
    fn take(&self) -> Option<QueueEntry>;

    /// Like [`take`][Self::take] but gives up after `timeout`, returning
    /// `None` on expiry as well as on a wake signal.
    fn poll_timeout(&self, timeout: Duration) -> Option<QueueEntry>;

    /// Removes the queued task with the given id, if it is still enqueued.
    fn remove(&self, id: TaskId) -> bool;

    /// Forces one blocked [`take`][Self::take] or
    /// [`poll_timeout`][Self::poll_timeout] to return `None`.
    ///
    /// The signal is idempotent while pending and is consumed by a single
    /// waiter. Calling it with no consumer blocked leaves the signal latched
    /// so the next blocking wait returns immediately.
    fn wake(&self);

    /// Total entries currently queued, wakeup sentinels included.
    fn len(&self) -> usize;

    /// Number of user tasks currently queued (sentinels excluded).
    fn pending(&self) -> usize;

    /// Whether the queue holds no entries at all.
    fn is_empty(&self) -> bool;
}

/// The default [`BlockingTaskQueue`]: a mutex-and-condvar guarded ring of
/// entries with a latched wake signal.
pub struct BoundedTaskQueue {
    capacity: usize,
    state: Mutex<QueueState>,
    available: Condvar,
}

struct QueueState {
    entries: VecDeque<QueueEntry>,
    user_tasks: usize,
    wake_pending: bool,
}

impl QueueState {
    fn pop(&mut self) -> Option<QueueEntry> {
        let entry = self.entries.pop_front();
        if let Some(QueueEntry::Task { .. }) = &entry {
            self.user_tasks -= 1;
        }
        entry
    }
}

impl BoundedTaskQueue {
    /// Creates a queue holding at most `max_pending_tasks` entries, clamped
    /// to no less than [`MIN_PENDING_TASKS`].
    #[must_use]
    pub fn new(max_pending_tasks: usize) -> Self {
        Self {
            capacity: max_pending_tasks.max(MIN_PENDING_TASKS),
            state: Mutex::new(QueueState {
                entries: VecDeque::new(),
                user_tasks: 0,
                wake_pending: false,
            }),
            available: Condvar::new(),
        }
    }
}

impl BlockingTaskQueue for BoundedTaskQueue {
    fn offer(&self, entry: QueueEntry) -> Result<(), QueueEntry> {
        let mut state = self.state.lock();

        if state.entries.len() >= self.capacity {
            return Err(entry);
        }

        if entry.is_task() {
            state.user_tasks += 1;
        }
        state.entries.push_back(entry);

        // Single consumer, so waking one waiter is enough.
        self.available.notify_one();
        Ok(())
    }

    fn poll(&self) -> Option<QueueEntry> {
        self.state.lock().pop()
    }

    fn take(&self) -> Option<QueueEntry> {
        let mut state = self.state.lock();

        loop {
            if state.wake_pending {
                state.wake_pending = false;
                return None;
            }

            if let Some(entry) = state.pop() {
                return Some(entry);
            }

            self.available.wait(&mut state);
        }
    }

    fn poll_timeout(&self, timeout: Duration) -> Option<QueueEntry> {
        let deadline = Instant::now().checked_add(timeout);
        let mut state = self.state.lock();

        loop {
            if state.wake_pending {
                state.wake_pending = false;
                return None;
            }

            if let Some(entry) = state.pop() {
                return Some(entry);
            }

            match deadline {
                // A timeout too large to represent waits like `take`.
                None => self.available.wait(&mut state),
                Some(deadline) => {
                    if self.available.wait_until(&mut state, deadline).timed_out() {
                        return None;
                    }
                }
            }
        }
    }

    fn remove(&self, id: TaskId) -> bool {
        let mut state = self.state.lock();

        let position = state
            .entries
            .iter()
            .position(|entry| matches!(entry, QueueEntry::Task { id: queued, .. } if *queued == id));

        match position {
            Some(index) => {
                state.entries.remove(index);
                state.user_tasks -= 1;
                true
            }
            None => false,
        }
    }

    fn wake(&self) {
        let mut state = self.state.lock();
        state.wake_pending = true;

        // Both timed and untimed waiters must re-check the signal.
        self.available.notify_all();
    }

    fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    fn pending(&self) -> usize {
        self.state.lock().user_tasks
    }

    fn is_empty(&self) -> bool {
        self.state.lock().entries.is_empty()
    }
}

impl fmt::Debug for BoundedTaskQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("BoundedTaskQueue")
            .field("capacity", &self.capacity)
            .field("len", &state.entries.len())
            .field("user_tasks", &state.user_tasks)
            .field("wake_pending", &state.wake_pending)
            .finish()
    }
}
