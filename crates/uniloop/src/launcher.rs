// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::thread;

use crate::{Error, Result};

/// Spawns the worker thread of an executor.
///
/// The executor calls this exactly once per worker lifetime, on the first
/// submission (or on shutdown of a never-started executor, so the worker can
/// run cleanup). Custom implementations can decorate the spawn - pin the
/// thread, adjust its stack size, route through a shared factory.
pub trait LaunchWorker: Send + Sync {
    /// Starts a fresh OS thread named `name` that runs `body` to completion.
    fn launch(&self, name: &str, body: Box<dyn FnOnce() + Send + 'static>) -> Result<()>;
}

// `mockall::automock` cannot mock `LaunchWorker` (its `launch` method takes a
// `Box<dyn FnOnce() ...>`, which trips the "Mockall does not support mocking
// Fn objects" limitation: https://github.com/asomers/mockall/issues/139), so
// the test double below is hand-rolled, following the same
// `expect_launch()` / `.once()` / `.returning(..)` / `.in_sequence(..)` shape
// the tests expect from a real `#[automock]`-generated mock.
#[cfg(test)]
type LaunchReturning =
    dyn FnMut(&str, Box<dyn FnOnce() + Send + 'static>) -> Result<()> + Send;

#[cfg(test)]
struct LaunchExpectationState {
    returning: Option<Box<LaunchReturning>>,
    remaining: Option<usize>,
}

/// A hand-rolled stand-in for a `mockall`-generated `MockLaunchWorker`.
#[cfg(test)]
#[derive(Clone)]
pub struct LaunchExpectation {
    state: std::sync::Arc<std::sync::Mutex<LaunchExpectationState>>,
}

#[cfg(test)]
impl LaunchExpectation {
    /// Constrains this expectation to match exactly one call.
    pub fn once(self) -> Self {
        self.state.lock().expect("mock mutex is never poisoned").remaining = Some(1);
        self
    }

    /// Sets the closure invoked when this expectation matches a call.
    pub fn returning<F>(self, f: F) -> Self
    where
        F: FnMut(&str, Box<dyn FnOnce() + Send + 'static>) -> Result<()> + Send + 'static,
    {
        self.state.lock().expect("mock mutex is never poisoned").returning = Some(Box::new(f));
        self
    }

    /// Accepted for API parity with `mockall`; expectations on a single mock
    /// are already consumed in the order they were declared, so no extra
    /// bookkeeping is required here.
    pub fn in_sequence(self, _sequence: &mut mockall::Sequence) -> Self {
        self
    }
}

/// A hand-rolled stand-in for a `mockall`-generated `MockLaunchWorker`.
#[cfg(test)]
#[derive(Default)]
pub struct MockLaunchWorker {
    expectations: std::sync::Mutex<Vec<LaunchExpectation>>,
}

#[cfg(test)]
impl MockLaunchWorker {
    /// Creates a mock with no expectations set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a new expectation on calls to `launch`.
    pub fn expect_launch(&mut self) -> LaunchExpectation {
        let expectation = LaunchExpectation {
            state: std::sync::Arc::new(std::sync::Mutex::new(LaunchExpectationState {
                returning: None,
                remaining: None,
            })),
        };
        self.expectations
            .lock()
            .expect("mock mutex is never poisoned")
            .push(expectation.clone());
        expectation
    }
}

#[cfg(test)]
impl LaunchWorker for MockLaunchWorker {
    fn launch(&self, name: &str, body: Box<dyn FnOnce() + Send + 'static>) -> Result<()> {
        let expectations = self
            .expectations
            .lock()
            .expect("mock mutex is never poisoned");
        for expectation in expectations.iter() {
            let mut state = expectation
                .state
                .lock()
                .expect("mock mutex is never poisoned");
            if state.remaining == Some(0) {
                continue;
            }
            if state.returning.is_none() {
                continue;
            }
            if let Some(remaining) = state.remaining.as_mut() {
                *remaining -= 1;
            }
            let returning = state.returning.as_mut().expect("checked above");
            return returning(name, body);
        }
        drop(expectations);
        panic!("MockLaunchWorker::launch called with no matching expectation");
    }
}

/// The default launcher: one dedicated, detached OS thread per call.
#[derive(Debug, Default)]
pub struct ThreadPerTaskLauncher;

impl LaunchWorker for ThreadPerTaskLauncher {
    fn launch(&self, name: &str, body: Box<dyn FnOnce() + Send + 'static>) -> Result<()> {
        thread::Builder::new()
            .name(name.to_string())
            .spawn(body)
            // The handle is intentionally dropped; the executor observes the
            // worker through its own lifecycle, not through joining.
            .map(drop)
            .map_err(|e| Error::Launch(e.to_string()))
    }
}
