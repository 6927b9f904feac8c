// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use nonempty::NonEmpty;

use crate::{ChooseExecutor, SerialExecutor, new_chooser};

/// A fixed array of serial executors with round-robin work distribution.
///
/// The group constructs its executors once and never resizes. Work placement
/// is a pure rotation - there is no stealing and no load awareness; a task
/// placed on an executor stays there.
#[derive(Debug)]
pub struct SerialExecutorGroup {
    executors: NonEmpty<SerialExecutor>,
    chooser: Box<dyn ChooseExecutor>,
}

impl SerialExecutorGroup {
    /// Builds a group of `count` executors, calling `make_executor` once per
    /// slot with the slot index.
    pub fn new<F>(count: NonZeroUsize, make_executor: F) -> Self
    where
        F: FnMut(usize) -> SerialExecutor,
    {
        let executors: Vec<_> = (0..count.get()).map(make_executor).collect();
        let executors = NonEmpty::from_vec(executors)
            .expect("count is non-zero, so the executor array cannot be empty");

        let chooser = new_chooser(executors.clone());
        Self { executors, chooser }
    }

    /// Returns the next executor in the round-robin rotation.
    #[must_use]
    pub fn next(&self) -> SerialExecutor {
        self.chooser.next()
    }

    /// Number of executors in the group.
    #[must_use]
    pub fn len(&self) -> usize {
        self.executors.len()
    }

    /// A group is never empty; this exists to satisfy the usual pairing with
    /// [`len`][Self::len].
    #[must_use]
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Iterates over the member executors in slot order.
    pub fn iter(&self) -> impl Iterator<Item = &SerialExecutor> {
        self.executors.iter()
    }

    /// Starts the two-phase graceful shutdown on every member.
    pub fn shutdown_gracefully(&self, quiet_period: Duration, timeout: Duration) {
        for executor in self.executors.iter() {
            drop(executor.shutdown_gracefully(quiet_period, timeout));
        }
    }

    /// Blocks until every member has terminated or `timeout` elapses.
    /// Returns whether the whole group terminated in time.
    #[must_use]
    pub fn await_termination(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;

        for executor in self.executors.iter() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if !executor.await_termination(remaining) {
                return false;
            }
        }

        true
    }

    /// Whether every member has begun shutting down.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.executors.iter().all(SerialExecutor::is_shutting_down)
    }

    /// Whether every member has terminated.
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.executors.iter().all(SerialExecutor::is_terminated)
    }
}
