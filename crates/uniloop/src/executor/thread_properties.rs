// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use crate::TerminationFuture;

/// A view of an executor's worker thread.
///
/// Obtained through
/// [`SerialExecutor::thread_properties`][crate::SerialExecutor::thread_properties].
/// The underlying thread handle is captured once, when the worker first
/// exists; the interrupt and liveness answers stay live.
#[derive(Debug, Clone)]
pub struct ThreadProperties {
    thread: thread::Thread,
    interrupted: Arc<AtomicBool>,
    termination: TerminationFuture,
}

impl ThreadProperties {
    pub(crate) fn new(
        thread: thread::Thread,
        interrupted: Arc<AtomicBool>,
        termination: TerminationFuture,
    ) -> Self {
        Self {
            thread,
            interrupted,
            termination,
        }
    }

    /// The worker thread's name.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.thread.name()
    }

    /// The worker thread's id.
    #[must_use]
    pub fn id(&self) -> thread::ThreadId {
        self.thread.id()
    }

    /// The worker's sticky interrupt status.
    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::Acquire)
    }

    /// Whether the worker is still running, i.e. the executor has not
    /// terminated.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        !self.termination.is_terminated()
    }
}
