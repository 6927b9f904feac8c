// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::task::safe_execute;
use crate::{BlockingTaskQueue, BoundedTaskQueue, SerialExecutor};

/// The main-loop contract of an executor.
///
/// The executor owns the machinery - queues, lifecycle, worker bootstrap,
/// shutdown protocol - and delegates the actual loop to an implementation of
/// this trait. The implementation decides how the worker spends its time
/// between tasks (e.g. block on the task queue, or block on an external
/// event source and rely on the wakeup sentinel).
///
/// # Obligations
///
/// `run` must keep calling
/// [`confirm_shutdown`][SerialExecutor::confirm_shutdown] until it returns
/// `true` before returning. A loop that returns without doing so is reported
/// as buggy and the executor falls back to confirming shutdown itself.
pub trait EventLoop: Send + Sync + 'static {
    /// The worker's main loop. Invoked exactly once, on the worker thread.
    fn run(&self, executor: &SerialExecutor);

    /// Invoked exactly once when the worker is about to exit, after the
    /// shutdown has been confirmed.
    fn cleanup(&self, executor: &SerialExecutor) {
        let _ = executor;
    }

    /// Invoked after every drain pass of
    /// [`run_all_tasks`][SerialExecutor::run_all_tasks] and
    /// [`run_all_tasks_within`][SerialExecutor::run_all_tasks_within].
    fn after_running_all_tasks(&self, executor: &SerialExecutor) {
        let _ = executor;
    }

    /// Whether a submission needs an explicit wakeup. Loops that park on
    /// something other than the task queue can return `false` for
    /// housekeeping submissions that do not require immediate processing.
    fn wakes_up_on_submit(&self) -> bool {
        true
    }

    /// Factory for the pending-task queue. Override to substitute a custom
    /// queue implementation.
    fn new_task_queue(&self, max_pending_tasks: usize) -> Box<dyn BlockingTaskQueue> {
        Box::new(BoundedTaskQueue::new(max_pending_tasks))
    }
}

/// The stock event loop: block on the task queue, run whatever comes out,
/// interleave due scheduled tasks, and confirm shutdown once requested.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultEventLoop;

impl EventLoop for DefaultEventLoop {
    fn run(&self, executor: &SerialExecutor) {
        loop {
            if let Some(task) = executor.take_task() {
                safe_execute(task);
                executor.update_last_execution_time();
            }

            if executor.confirm_shutdown() {
                break;
            }
        }
    }
}
