// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::env;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::task_queue::MIN_PENDING_TASKS;
use crate::{
    DefaultEventLoop, EventLoop, HandleRejectedTask, LaunchWorker, Refuse, SerialExecutor,
    ThreadPerTaskLauncher,
};

/// Environment variable supplying the default task-queue capacity when the
/// builder is not given one explicitly. Unset means effectively unbounded.
pub const MAX_PENDING_TASKS_ENV: &str = "UNILOOP_MAX_PENDING_TASKS";

static NEXT_EXECUTOR_ID: AtomicUsize = AtomicUsize::new(1);

/// Collects the configuration for a [`SerialExecutor`] and builds it.
///
/// Every knob has a production-ready default: a generated name, a bounded
/// queue sized from the environment, the refuse-on-full rejection policy,
/// one dedicated OS thread per executor, and the stock blocking event loop.
pub struct SerialExecutorBuilder {
    name: Option<String>,
    add_task_wakes_up: bool,
    max_pending_tasks: Option<usize>,
    rejection: Box<dyn HandleRejectedTask>,
    launcher: Box<dyn LaunchWorker>,
    event_loop: Box<dyn EventLoop>,
}

impl SerialExecutorBuilder {
    /// Starts from the defaults.
    #[must_use]
    pub fn new() -> Self {
        Self {
            name: None,
            add_task_wakes_up: true,
            max_pending_tasks: None,
            rejection: Box::new(Refuse),
            launcher: Box::new(ThreadPerTaskLauncher),
            event_loop: Box::new(DefaultEventLoop),
        }
    }

    /// Sets the executor name, also used to name the worker thread.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Declares whether merely enqueuing a task already wakes the worker.
    ///
    /// The default (`true`) matches [`DefaultEventLoop`], which blocks on the
    /// task queue itself. Event loops that park on an external source should
    /// pass `false` so submissions post the wakeup sentinel.
    #[must_use]
    pub fn with_add_task_wakes_up(mut self, add_task_wakes_up: bool) -> Self {
        self.add_task_wakes_up = add_task_wakes_up;
        self
    }

    /// Caps the task queue. Values below 16 are clamped up.
    #[must_use]
    pub fn with_max_pending_tasks(mut self, max_pending_tasks: usize) -> Self {
        self.max_pending_tasks = Some(max_pending_tasks);
        self
    }

    /// Replaces the policy applied when the task queue is full.
    #[must_use]
    pub fn with_rejection_policy(mut self, policy: impl HandleRejectedTask + 'static) -> Self {
        self.rejection = Box::new(policy);
        self
    }

    /// Replaces the worker-thread launcher.
    #[must_use]
    pub fn with_launcher(mut self, launcher: impl LaunchWorker + 'static) -> Self {
        self.launcher = Box::new(launcher);
        self
    }

    /// Replaces the event loop driving the worker.
    #[must_use]
    pub fn with_event_loop(mut self, event_loop: impl EventLoop) -> Self {
        self.event_loop = Box::new(event_loop);
        self
    }

    /// Builds the executor. The worker thread is not spawned until the first
    /// submission arrives.
    #[must_use]
    pub fn build(self) -> SerialExecutor {
        let name = self.name.unwrap_or_else(|| {
            format!("uniloop-{}", NEXT_EXECUTOR_ID.fetch_add(1, Ordering::Relaxed))
        });

        let max_pending_tasks = self
            .max_pending_tasks
            .unwrap_or_else(default_max_pending_tasks)
            .max(MIN_PENDING_TASKS);

        SerialExecutor::from_parts(
            name,
            self.add_task_wakes_up,
            max_pending_tasks,
            self.rejection,
            self.launcher,
            self.event_loop,
        )
    }
}

impl Default for SerialExecutorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SerialExecutorBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerialExecutorBuilder")
            .field("name", &self.name)
            .field("add_task_wakes_up", &self.add_task_wakes_up)
            .field("max_pending_tasks", &self.max_pending_tasks)
            .finish_non_exhaustive()
    }
}

fn default_max_pending_tasks() -> usize {
    env::var(MAX_PENDING_TASKS_ENV)
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(usize::MAX)
}
