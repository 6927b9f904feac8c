// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

use nonempty::NonEmpty;

use crate::SerialExecutor;

/// Picks the executor the next piece of work goes to.
///
/// Implementations returned by [`new_chooser`] are round-robin: over any
/// window of `K` calls each of the `N` executors is returned `K/N` times,
/// give or take one.
pub trait ChooseExecutor: Send + Sync + fmt::Debug {
    /// Returns the next executor in rotation.
    fn next(&self) -> SerialExecutor;
}

/// Builds the round-robin chooser for a fixed set of executors.
///
/// Taking [`NonEmpty`] makes the "at least one executor" requirement a
/// construction-time fact. A power-of-two set gets the mask-based variant;
/// anything else falls back to modulo arithmetic.
#[must_use]
pub fn new_chooser(executors: NonEmpty<SerialExecutor>) -> Box<dyn ChooseExecutor> {
    let executors: Box<[SerialExecutor]> = executors.into_iter().collect();

    if executors.len().is_power_of_two() {
        Box::new(PowerOfTwoChooser {
            executors,
            index: AtomicUsize::new(0),
        })
    } else {
        Box::new(GenericChooser {
            executors,
            index: AtomicUsize::new(0),
        })
    }
}

/// Round-robin over a power-of-two number of executors: the shared counter is
/// masked, which stays exact even across counter wrap-around.
#[derive(Debug)]
struct PowerOfTwoChooser {
    executors: Box<[SerialExecutor]>,
    index: AtomicUsize,
}

impl ChooseExecutor for PowerOfTwoChooser {
    fn next(&self) -> SerialExecutor {
        let index = self.index.fetch_add(1, Ordering::Relaxed) & (self.executors.len() - 1);
        self.executors[index].clone()
    }
}

/// Round-robin for arbitrary sizes using modulo arithmetic.
///
/// When the shared counter wraps around, the rotation may skip a single slot
/// because the counter's maximum is generally not a multiple of the executor
/// count. Callers must tolerate that one-off glitch; it does not affect
/// long-run fairness.
#[derive(Debug)]
struct GenericChooser {
    executors: Box<[SerialExecutor]>,
    index: AtomicUsize,
}

impl ChooseExecutor for GenericChooser {
    fn next(&self) -> SerialExecutor {
        let index = self.index.fetch_add(1, Ordering::Relaxed) % self.executors.len();
        self.executors[index].clone()
    }
}
