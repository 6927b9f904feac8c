// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Test aids shared by the uniloop test suites: watchdog timeouts for logic
//! that may block forever when broken, and tracing initialization so test
//! failures come with the executor's log output.

use std::sync::{Once, mpsc};
use std::thread;
use std::time::Duration;

use tracing::level_filters::LevelFilter;

/// If something (whatever) does not happen in a test within this time, the
/// test will fail.
///
/// We are conservative here and allow much time - this is only to break out
/// of infinite loops, not for any situations that are actually expected.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Executes a thread-safe function on a background thread and abandons it if
/// it does not complete before [`TEST_TIMEOUT`].
///
/// Returns `None` when the function timed out or panicked; the background
/// thread is left behind in that case, which is acceptable in tests.
#[must_use]
pub fn execute_or_abandon<F, R>(f: F) -> Option<R>
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    let (sender, receiver) = mpsc::channel();

    // There are multiple ways for the called function to fail:
    // 1. It fails to finish in the allowed time span.
    // 2. It panics, so the result is never sent.
    //
    // In both cases, the channel will get closed and recv_timeout
    // will signal an error saying the channel is broken.
    thread::spawn(move || {
        let result = f();
        drop(sender.send(result));
    });

    receiver.recv_timeout(TEST_TIMEOUT).ok()
}

/// Executes a function on the current thread under a watchdog that
/// terminates the process if the function does not complete in time.
///
/// This is the variant of [`execute_or_abandon`] for single-threaded logic
/// that cannot be moved to a background thread. Termination is deliberate:
/// a hung worker loop would otherwise stall the whole test run.
pub fn execute_or_terminate_process<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    let (sender, receiver) = mpsc::channel::<()>();

    drop(
        thread::Builder::new()
            .name("test watchdog".to_string())
            .spawn(move || {
                if receiver.recv_timeout(TEST_TIMEOUT) == Err(mpsc::RecvTimeoutError::Timeout) {
                    eprintln!("test watchdog expired - terminating the process");
                    std::process::exit(101);
                }
            }),
    );

    let result = f();

    // Disarms the watchdog; a dropped receiver means it already fired.
    drop(sender.send(()));

    result
}

/// Routes tracing output to the test harness, once per process. Safe to call
/// from every test.
pub fn init_test_tracing() {
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_max_level(LevelFilter::DEBUG)
            .with_test_writer()
            .init();
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn execute_or_abandon_returns_the_result() {
        assert_eq!(execute_or_abandon(|| 2 + 2), Some(4));
    }

    #[test]
    fn execute_or_abandon_swallows_panics() {
        assert_eq!(
            execute_or_abandon(|| -> u32 { panic!("intentional test panic") }),
            None
        );
    }

    #[test]
    fn execute_or_terminate_process_passes_through() {
        assert_eq!(execute_or_terminate_process(|| "done"), "done");
    }
}
