// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use thiserror::Error;

/// A specialized `Result` type for executor operations that return an
/// [`Error`][enum@Error] on failure.
pub type Result<T> = std::result::Result<T, Error>;

/// An error originating in the executor.
///
/// This is an umbrella type for all kinds of errors the executor can return to
/// its callers. Variants carry string payloads only so that a terminal result
/// can be cloned out to every thread waiting on the termination future.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum Error {
    /// A task could not be accepted, either because the executor is shut down
    /// or because the task queue is full and the rejection policy refused it.
    #[error("task rejected: {0}")]
    Rejected(String),

    /// The worker thread could not be spawned.
    #[error("failed to launch worker thread: {0}")]
    Launch(String),

    /// A submitted task was discarded before it had a chance to run, for
    /// example because the executor terminated with the task still queued.
    #[error("task aborted before execution")]
    Aborted,

    /// The caller of some API made a mistake (e.g. called an operation out of
    /// sequence) in a way that is detected at runtime rather than by the type
    /// system.
    #[error("{0}")]
    Programming(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_render_their_cause() {
        let err = Error::Rejected("event executor terminated".to_string());
        assert!(err.to_string().contains("event executor terminated"));

        let err = Error::Launch("no threads available".to_string());
        assert!(err.to_string().contains("no threads available"));
    }

    #[test]
    fn errors_are_cloneable_for_termination_fan_out() {
        let err = Error::Aborted;
        let cloned = err.clone();
        assert_eq!(err.to_string(), cloned.to_string());
    }
}
