// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::Result;

/// Observes the termination of an executor.
///
/// The future completes exactly once, after the worker thread has exited and
/// cleanup has run - successfully under normal teardown, with an error when
/// the worker could not even be spawned for a shutdown request. Clones share
/// the same underlying event, and any number of threads may wait on it.
#[derive(Debug, Clone)]
pub struct TerminationFuture {
    shared: Arc<TerminationShared>,
}

#[derive(Debug)]
struct TerminationShared {
    outcome: Mutex<Option<Result<()>>>,
    completed: Condvar,
}

impl TerminationFuture {
    pub(crate) fn new() -> Self {
        Self {
            shared: Arc::new(TerminationShared {
                outcome: Mutex::new(None),
                completed: Condvar::new(),
            }),
        }
    }

    /// Delivers the terminal outcome and releases every waiter.
    pub(crate) fn complete(&self, outcome: Result<()>) {
        let mut slot = self.shared.outcome.lock();

        debug_assert!(slot.is_none(), "termination completed twice");
        if slot.is_none() {
            *slot = Some(outcome);
        }

        self.shared.completed.notify_all();
    }

    /// Whether the executor has fully terminated.
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.shared.outcome.lock().is_some()
    }

    /// Blocks until the executor has terminated, returning the outcome of
    /// the teardown.
    pub fn wait(&self) -> Result<()> {
        let mut slot = self.shared.outcome.lock();
        while slot.is_none() {
            self.shared.completed.wait(&mut slot);
        }

        slot.clone().expect("loop above exits only once set")
    }

    /// Blocks for at most `timeout`. Returns `None` when the executor is
    /// still running after the timeout elapses.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<()>> {
        let deadline = std::time::Instant::now().checked_add(timeout);

        let mut slot = self.shared.outcome.lock();
        while slot.is_none() {
            match deadline {
                None => self.shared.completed.wait(&mut slot),
                Some(deadline) => {
                    if self
                        .shared
                        .completed
                        .wait_until(&mut slot, deadline)
                        .timed_out()
                    {
                        return slot.clone();
                    }
                }
            }
        }

        slot.clone()
    }
}
