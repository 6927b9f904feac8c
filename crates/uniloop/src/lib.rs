// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Serial task executors: one lazily started worker thread per executor,
//! bounded cross-thread submission, deadline-scheduled tasks and a two-phase
//! graceful shutdown, plus round-robin distribution across a fixed group.
//!
//! The entry points are [`SerialExecutorBuilder`] for a single executor and
//! [`SerialExecutorGroup`] for a fixed array of them:
//!
//! ```
//! use std::time::Duration;
//! use uniloop::SerialExecutorBuilder;
//!
//! let executor = SerialExecutorBuilder::new().with_name("worker").build();
//!
//! executor.execute(|| println!("runs on the worker thread")).unwrap();
//!
//! executor
//!     .shutdown_gracefully(Duration::from_millis(100), Duration::from_secs(5))
//!     .wait()
//!     .unwrap();
//! ```

// Public API surface.
mod builder;
mod chooser;
mod error;
mod executor;
mod group;
mod join;
mod launcher;
mod rejection;
mod task;
mod task_queue;
mod termination;

pub use builder::*;
pub use chooser::*;
pub use error::*;
pub use executor::*;
pub use group::*;
pub use join::*;
pub use launcher::*;
pub use rejection::*;
pub use task::{QueueEntry, Task, TaskId};
pub use task_queue::*;
pub use termination::*;

// Internal to the crate.
mod lifecycle;
mod scheduled;
