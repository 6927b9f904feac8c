// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};

use tracing::warn;

/// The body of a task: an opaque closure executed exactly once on the worker
/// thread of the executor it was submitted to.
///
/// The closure is boxed up for transit between threads and has `'static` to
/// signal that it has no dependency on the stack of any specific thread.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Identifies one enqueued task within its executor.
///
/// Boxed closures have no usable object identity, so the queue assigns each
/// accepted task a sequence number. The id is what allows a producer to pull
/// a task back out of the queue after the fact (e.g. when the executor shut
/// down between the offer and the worker start).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(pub(crate) u64);

/// One slot in the task queue.
pub enum QueueEntry {
    /// A user-submitted task.
    Task {
        /// Queue-local identity used for removal.
        id: TaskId,
        /// The task body.
        task: Task,
    },

    /// The wakeup sentinel: carries no work and exists only to force a worker
    /// blocked in a queue wait to return. Dequeue helpers filter it out, so
    /// user code never observes it.
    Wakeup,
}

impl QueueEntry {
    /// Whether this entry is a user task (as opposed to the wakeup sentinel).
    #[must_use]
    pub fn is_task(&self) -> bool {
        matches!(self, Self::Task { .. })
    }
}

impl fmt::Debug for QueueEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Task { id, .. } => write!(f, "Task({})", id.0),
            Self::Wakeup => write!(f, "Wakeup"),
        }
    }
}

/// Runs a task body, swallowing and logging any panic.
///
/// The worker loop must survive arbitrary user code, so a panicking task is
/// reported through tracing and otherwise ignored.
pub(crate) fn safe_execute(task: Task) {
    // We assert unwind safety because the task is discarded after the panic;
    // any shared state it may have poisoned is the task author's concern.
    if catch_unwind(AssertUnwindSafe(task)).is_err() {
        warn!("a task raised a panic; the event loop continues");
    }
}
