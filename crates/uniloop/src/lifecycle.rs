// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::sync::atomic::{AtomicU32, Ordering};

/// The lifecycle of an executor.
///
/// The state only ever moves forward: no observer can see it go backward
/// (with the single exception of rolling back a failed worker spawn, which
/// happens before any other thread can have observed `Started`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u32)]
pub(crate) enum LifecycleState {
    /// Constructed, no worker thread exists yet.
    NotStarted = 1,

    /// The first submission arrived and the worker thread was spawned.
    Started = 2,

    /// Graceful shutdown was requested; the worker is draining work and
    /// watching the quiet period.
    ShuttingDown = 3,

    /// Abrupt shutdown: no further submissions are accepted and queued work
    /// may never run.
    Shutdown = 4,

    /// The worker thread has exited and cleanup has run.
    Terminated = 5,
}

impl LifecycleState {
    fn from_raw(raw: u32) -> Self {
        match raw {
            1 => Self::NotStarted,
            2 => Self::Started,
            3 => Self::ShuttingDown,
            4 => Self::Shutdown,
            5 => Self::Terminated,
            _ => unreachable!("lifecycle cell only ever stores valid states"),
        }
    }
}

/// Atomic holder of a [`LifecycleState`], advanced by CAS from arbitrary
/// threads.
#[derive(Debug)]
pub(crate) struct LifecycleCell(AtomicU32);

impl LifecycleCell {
    pub(crate) fn new() -> Self {
        Self(AtomicU32::new(LifecycleState::NotStarted as u32))
    }

    pub(crate) fn get(&self) -> LifecycleState {
        LifecycleState::from_raw(self.0.load(Ordering::Acquire))
    }

    /// Attempts the transition `from -> to`, returning whether it was this
    /// caller that performed it.
    pub(crate) fn transition(&self, from: LifecycleState, to: LifecycleState) -> bool {
        self.0
            .compare_exchange(from as u32, to as u32, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Unconditionally stores `state`. Reserved for the worker-exit path and
    /// for failed-spawn handling, where the CAS discipline does not apply.
    pub(crate) fn set(&self, state: LifecycleState) {
        self.0.store(state as u32, Ordering::Release);
    }
}
