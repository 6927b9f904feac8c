// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::{Error, Result};

/// Delivers the result of a task submitted through
/// [`SerialExecutor::submit`][crate::SerialExecutor::submit].
///
/// If the executor discards the task without running it (e.g. it terminated
/// with the task still queued, or the task panicked), waiting yields
/// [`Error::Aborted`].
#[derive(Debug)]
pub struct JoinHandle<R> {
    shared: Arc<JoinShared<R>>,
}

#[derive(Debug)]
struct JoinShared<R> {
    state: Mutex<JoinState<R>>,
    completed: Condvar,
}

#[derive(Debug)]
enum JoinState<R> {
    Pending,
    Done(R),
    Aborted,
}

impl<R> JoinHandle<R> {
    pub(crate) fn new() -> (JoinCompleter<R>, Self) {
        let shared = Arc::new(JoinShared {
            state: Mutex::new(JoinState::Pending),
            completed: Condvar::new(),
        });

        (
            JoinCompleter {
                shared: Arc::clone(&shared),
                completed: false,
            },
            Self { shared },
        )
    }

    /// Whether the task has finished (or been discarded).
    #[must_use]
    pub fn is_done(&self) -> bool {
        !matches!(*self.shared.state.lock(), JoinState::Pending)
    }

    /// Blocks until the task has run and returns its result.
    ///
    /// Calling this from the worker thread of the executor the task was
    /// submitted to would deadlock; the executor guards the blocking
    /// collective submission paths against that, and individual handles
    /// should be waited on from producer threads only.
    pub fn wait(self) -> Result<R> {
        let mut state = self.shared.state.lock();
        while matches!(*state, JoinState::Pending) {
            self.shared.completed.wait(&mut state);
        }

        match std::mem::replace(&mut *state, JoinState::Aborted) {
            JoinState::Done(result) => Ok(result),
            JoinState::Aborted => Err(Error::Aborted),
            JoinState::Pending => unreachable!("the loop above exits only once settled"),
        }
    }
}

/// Completion side of a [`JoinHandle`]. Dropping it without completing marks
/// the handle aborted, so a discarded task never strands its waiter.
#[derive(Debug)]
pub(crate) struct JoinCompleter<R> {
    shared: Arc<JoinShared<R>>,
    completed: bool,
}

impl<R> JoinCompleter<R> {
    pub(crate) fn complete(mut self, result: R) {
        *self.shared.state.lock() = JoinState::Done(result);
        self.completed = true;
        self.shared.completed.notify_all();
    }
}

impl<R> Drop for JoinCompleter<R> {
    fn drop(&mut self) {
        if self.completed {
            return;
        }

        let mut state = self.shared.state.lock();
        if matches!(*state, JoinState::Pending) {
            *state = JoinState::Aborted;
            self.shared.completed.notify_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use uniloop_testing::execute_or_abandon;

    use super::*;

    #[test]
    fn assert_types() {
        static_assertions::assert_impl_all!(JoinHandle<u32>: Send);
    }

    #[test]
    fn join_handle_delivers_the_result() {
        let (completer, handle) = JoinHandle::new();

        let waiter = thread::spawn(move || handle.wait());
        completer.complete(17);

        let result = execute_or_abandon(move || waiter.join())
            .expect("waiter finished")
            .expect("waiter did not panic")
            .expect("task completed");
        assert_eq!(result, 17);
    }

    #[test]
    fn dropped_completer_aborts_the_waiter() {
        let (completer, handle) = JoinHandle::<u32>::new();
        drop(completer);

        assert!(handle.is_done());
        assert!(matches!(handle.wait(), Err(Error::Aborted)));
    }

    #[test]
    fn completion_after_the_waiter_arrives_wakes_it() {
        let (completer, handle) = JoinHandle::new();

        let waiter = thread::spawn(move || handle.wait());
        // Give the waiter a moment to actually block.
        thread::yield_now();
        completer.complete("late");

        let result = execute_or_abandon(move || waiter.join())
            .expect("waiter finished")
            .expect("waiter did not panic")
            .expect("task completed");
        assert_eq!(result, "late");
    }
}
