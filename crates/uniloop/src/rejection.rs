// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::{Error, Result, Task};

/// Policy invoked when a task cannot be enqueued because the task queue is
/// full.
///
/// The policy receives ownership of the task and decides its fate: drop it
/// and surface an error, silently discard it, run it somewhere else. It is
/// invoked exactly once per rejected offer, from the submitting thread.
pub trait HandleRejectedTask: Send + Sync {
    /// Decides what happens to `task` after the queue refused it.
    fn rejected(&self, task: Task) -> Result<()>;
}

/// The default policy: drop the task and report [`Error::Rejected`] to the
/// submitter.
#[derive(Debug, Clone, Copy, Default)]
pub struct Refuse;

impl HandleRejectedTask for Refuse {
    fn rejected(&self, task: Task) -> Result<()> {
        drop(task);
        Err(Error::Rejected("task queue is full".to_string()))
    }
}
