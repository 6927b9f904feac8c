// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, error, warn};

use crate::lifecycle::{LifecycleCell, LifecycleState};
use crate::scheduled::{ScheduleQueue, ScheduledTask};
use crate::task::safe_execute;
use crate::{
    BlockingTaskQueue, Error, EventLoop, HandleRejectedTask, JoinHandle, LaunchWorker, QueueEntry,
    Result, Task, TaskId, TerminationFuture, ThreadProperties,
};

/// A task is timestamp-sampled every this many executions when running with a
/// budget; checking the clock for every task would dominate small tasks.
const RUN_ALL_TASKS_SAMPLE_MASK: u64 = 0x3F;

/// How long the worker naps between quiet-period probes during graceful
/// shutdown.
const QUIET_PERIOD_POLL: Duration = Duration::from_millis(100);

/// A shutdown hook, run on the worker while the executor confirms shutdown.
///
/// Hooks are identified by `Arc` pointer identity for
/// [`remove_shutdown_hook`][SerialExecutor::remove_shutdown_hook].
pub type ShutdownHook = Arc<dyn Fn() + Send + Sync + 'static>;

/// A serial task executor owning exactly one worker thread.
///
/// Tasks submitted from any thread are queued into a bounded FIFO and run
/// one at a time, in submission order per producer, on a worker thread that
/// is spawned lazily by the first submission. Delayed tasks are interleaved
/// through a deadline-ordered companion queue. Teardown is two-phase: a
/// graceful shutdown drains work until a quiet period passes without new
/// executions, bounded by a hard timeout.
///
/// Cloning is cheap and shares the executor; use
/// [`same_executor`][Self::same_executor] for identity.
#[derive(Clone)]
pub struct SerialExecutor {
    inner: Arc<Inner>,
}

struct Inner {
    name: String,
    state: LifecycleCell,
    task_queue: Box<dyn BlockingTaskQueue>,

    /// Accessed only by the worker thread (off-worker schedule() calls route
    /// their insertion through the task queue); the mutex satisfies `Sync`.
    scheduled: Mutex<ScheduleQueue>,

    /// Written exactly once, by the worker as it boots.
    worker: Mutex<Option<thread::Thread>>,

    /// Sticky interrupt status, settable before the worker even exists.
    interrupted: Arc<AtomicBool>,

    /// Anchor for the nanosecond bookkeeping below.
    origin: Instant,

    /// Nanoseconds since `origin`; written only by the worker.
    last_execution_time: AtomicU64,
    graceful_shutdown_quiet_period: AtomicU64,
    graceful_shutdown_timeout: AtomicU64,

    /// Zero means graceful shutdown has not begun timing yet.
    graceful_shutdown_start_time: AtomicU64,

    /// Mutated only on the worker; off-worker callers route mutations
    /// through the task queue.
    shutdown_hooks: Mutex<Vec<ShutdownHook>>,

    termination: TerminationFuture,
    thread_properties: OnceLock<ThreadProperties>,
    add_task_wakes_up: bool,
    next_task_id: AtomicU64,
    rejection: Box<dyn HandleRejectedTask>,
    launcher: Box<dyn LaunchWorker>,
    event_loop: Box<dyn EventLoop>,
}

impl SerialExecutor {
    pub(crate) fn from_parts(
        name: String,
        add_task_wakes_up: bool,
        max_pending_tasks: usize,
        rejection: Box<dyn HandleRejectedTask>,
        launcher: Box<dyn LaunchWorker>,
        event_loop: Box<dyn EventLoop>,
    ) -> Self {
        let task_queue = event_loop.new_task_queue(max_pending_tasks);

        Self {
            inner: Arc::new(Inner {
                name,
                state: LifecycleCell::new(),
                task_queue,
                scheduled: Mutex::new(ScheduleQueue::default()),
                worker: Mutex::new(None),
                interrupted: Arc::new(AtomicBool::new(false)),
                origin: Instant::now(),
                last_execution_time: AtomicU64::new(0),
                graceful_shutdown_quiet_period: AtomicU64::new(0),
                graceful_shutdown_timeout: AtomicU64::new(0),
                graceful_shutdown_start_time: AtomicU64::new(0),
                shutdown_hooks: Mutex::new(Vec::new()),
                termination: TerminationFuture::new(),
                thread_properties: OnceLock::new(),
                add_task_wakes_up,
                next_task_id: AtomicU64::new(0),
                rejection,
                launcher,
                event_loop,
            }),
        }
    }

    /// The executor's name, also used for its worker thread.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Whether `other` is a handle to this same executor.
    #[must_use]
    pub fn same_executor(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    // ---------------------------------------------------------------------
    // Submission
    // ---------------------------------------------------------------------

    /// Fire-and-forget submission: `task` will run on the worker thread,
    /// after all previously submitted tasks from this thread.
    ///
    /// The first submission from a non-worker thread spawns the worker.
    pub fn execute<F>(&self, task: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.execute_task(Box::new(task))
    }

    fn execute_task(&self, task: Task) -> Result<()> {
        let in_event_loop = self.in_event_loop();
        let accepted = self.add_task(task)?;

        if !in_event_loop {
            self.start_thread()?;

            // The executor may have reached SHUTDOWN between the offer and
            // the start; if the task is still in the queue we can still honor
            // the rejection contract by pulling it back out.
            if let Some(id) = accepted
                && self.is_shutdown()
                && self.inner.task_queue.remove(id)
            {
                return Err(Error::Rejected("event executor terminated".to_string()));
            }
        }

        if !self.inner.add_task_wakes_up && self.inner.event_loop.wakes_up_on_submit() {
            self.wakeup(in_event_loop);
        }

        Ok(())
    }

    /// Submits `task` and returns a handle delivering its result.
    pub fn submit<F, R>(&self, task: F) -> Result<JoinHandle<R>>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let (completer, handle) = JoinHandle::new();
        self.execute(move || completer.complete(task()))?;
        Ok(handle)
    }

    /// Runs `task` no earlier than `delay` from now, on the worker thread.
    ///
    /// Scheduled work is drained into the task queue by the run-loop helpers
    /// once due, so it competes fairly with directly submitted tasks.
    pub fn schedule<F>(&self, delay: Duration, task: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let deadline = Instant::now() + delay;
        let task: Task = Box::new(task);

        if self.in_event_loop() {
            self.inner.scheduled.lock().insert(deadline, task);
            Ok(())
        } else {
            // The scheduled queue belongs to the worker, so the insertion
            // itself travels there as a task.
            let executor = self.clone();
            self.execute(move || executor.inner.scheduled.lock().insert(deadline, task))
        }
    }

    /// Submits every task in `tasks` and blocks until all of them have run,
    /// returning their results in submission order.
    ///
    /// # Panics
    ///
    /// Panics when called from the worker thread: the worker cannot wait for
    /// work only it can execute.
    pub fn invoke_all<I, F, R>(&self, tasks: I) -> Result<Vec<R>>
    where
        I: IntoIterator<Item = F>,
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        assert!(
            !self.in_event_loop(),
            "invoke_all called from the event loop would deadlock it"
        );

        let handles = tasks
            .into_iter()
            .map(|task| self.submit(task))
            .collect::<Result<Vec<_>>>()?;

        handles.into_iter().map(JoinHandle::wait).collect()
    }

    /// Enqueues `task`, returning its queue id when it was actually queued
    /// (`None` when the rejection policy consumed it without queuing).
    fn add_task(&self, task: Task) -> Result<Option<TaskId>> {
        if self.is_shutdown() {
            return Err(Error::Rejected("event executor terminated".to_string()));
        }

        let id = self.next_task_id();
        match self.inner.task_queue.offer(QueueEntry::Task { id, task }) {
            Ok(()) => Ok(Some(id)),
            Err(QueueEntry::Task { task, .. }) => {
                self.inner.rejection.rejected(task)?;
                Ok(None)
            }
            Err(QueueEntry::Wakeup) => unreachable!("a task was offered"),
        }
    }

    fn next_task_id(&self) -> TaskId {
        TaskId(self.inner.next_task_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Number of user tasks currently waiting in the task queue.
    #[must_use]
    pub fn pending_tasks(&self) -> usize {
        self.inner.task_queue.pending()
    }

    /// Forces the worker out of a blocking wait.
    ///
    /// Idempotent and cheap: posts the wakeup sentinel unless the caller is
    /// the worker itself outside of graceful shutdown (in which case the
    /// worker is evidently not blocked).
    pub fn wakeup(&self, in_event_loop: bool) {
        if !in_event_loop || self.inner.state.get() == LifecycleState::ShuttingDown {
            // Offer failure means the queue is full, so the worker already
            // has entries to wake up for.
            drop(self.inner.task_queue.offer(QueueEntry::Wakeup));
        }
    }

    // ---------------------------------------------------------------------
    // Worker bootstrap
    // ---------------------------------------------------------------------

    fn start_thread(&self) -> Result<()> {
        if self.inner.state.get() != LifecycleState::NotStarted {
            return Ok(());
        }

        if !self
            .inner
            .state
            .transition(LifecycleState::NotStarted, LifecycleState::Started)
        {
            return Ok(());
        }

        if let Err(launch_error) = self.do_start_thread() {
            // Roll back so a later submission can retry the spawn.
            self.inner
                .state
                .transition(LifecycleState::Started, LifecycleState::NotStarted);
            return Err(launch_error);
        }

        Ok(())
    }

    /// Starts the worker for a shutdown request when the executor never ran.
    /// Returns `true` when the spawn failed and the executor was put down
    /// terminally.
    fn ensure_thread_started(&self, old_state: LifecycleState) -> bool {
        if old_state != LifecycleState::NotStarted {
            return false;
        }

        if let Err(launch_error) = self.do_start_thread() {
            self.inner.state.set(LifecycleState::Terminated);
            self.inner.termination.complete(Err(launch_error));
            return true;
        }

        false
    }

    fn do_start_thread(&self) -> Result<()> {
        debug_assert!(
            self.inner.worker.lock().is_none(),
            "worker thread spawned twice"
        );

        let executor = self.clone();
        self.inner
            .launcher
            .launch(&self.inner.name, Box::new(move || executor.worker_main()))
    }

    fn worker_main(&self) {
        *self.inner.worker.lock() = Some(thread::current());

        // An interrupt requested before the thread existed is delivered now.
        if self.is_interrupted() {
            self.inner.task_queue.wake();
        }

        self.update_last_execution_time();
        debug!(executor = %self.inner.name, "worker thread started");

        let loop_completed =
            catch_unwind(AssertUnwindSafe(|| self.inner.event_loop.run(self))).is_ok();
        if !loop_completed {
            warn!(executor = %self.inner.name, "unexpected panic escaped the event loop");
        }

        // The loop is done. Make sure the state reflects at least a shutdown
        // in progress, in case only execute() was ever called.
        loop {
            let current = self.inner.state.get();
            if current >= LifecycleState::ShuttingDown
                || self
                    .inner
                    .state
                    .transition(current, LifecycleState::ShuttingDown)
            {
                break;
            }
        }

        if loop_completed && self.graceful_shutdown_start_nanos() == 0 {
            error!(
                executor = %self.inner.name,
                "buggy event loop: run() returned without calling confirm_shutdown() until true"
            );
        }

        // The terminal bookkeeping must happen no matter what the remaining
        // drains and the cleanup hook do.
        let executor = self.clone();
        let _terminate = scopeguard::guard((), move |()| {
            executor.inner.state.set(LifecycleState::Terminated);

            let stranded = executor.inner.task_queue.pending();
            if stranded != 0 {
                warn!(
                    executor = %executor.inner.name,
                    stranded,
                    "event loop terminated with tasks still queued"
                );
            }

            debug!(executor = %executor.inner.name, "worker thread terminated");
            executor.inner.termination.complete(Ok(()));
        });

        while !self.confirm_shutdown() {}

        if catch_unwind(AssertUnwindSafe(|| self.inner.event_loop.cleanup(self))).is_err() {
            warn!(executor = %self.inner.name, "cleanup raised a panic");
        }
    }

    // ---------------------------------------------------------------------
    // Lifecycle queries
    // ---------------------------------------------------------------------

    /// Whether shutdown (graceful or abrupt) has been requested.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.inner.state.get() >= LifecycleState::ShuttingDown
    }

    /// Whether the executor has stopped accepting tasks.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.inner.state.get() >= LifecycleState::Shutdown
    }

    /// Whether the worker thread has exited and cleanup has run.
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.inner.state.get() == LifecycleState::Terminated
    }

    /// Whether the calling thread is this executor's worker.
    #[must_use]
    pub fn in_event_loop(&self) -> bool {
        self.in_event_loop_of(thread::current().id())
    }

    /// Whether the thread with the given id is this executor's worker.
    #[must_use]
    pub fn in_event_loop_of(&self, id: thread::ThreadId) -> bool {
        self.worker_thread().is_some_and(|worker| worker.id() == id)
    }

    fn worker_thread(&self) -> Option<thread::Thread> {
        self.inner.worker.lock().clone()
    }

    fn assert_in_event_loop(&self, operation: &str) {
        assert!(
            self.in_event_loop(),
            "{operation} may only be called from the event loop of executor {}",
            self.inner.name
        );
    }

    // ---------------------------------------------------------------------
    // Shutdown
    // ---------------------------------------------------------------------

    /// Stops the executor abruptly: queued tasks may never run.
    #[deprecated(note = "abrupt shutdown can strand queued tasks; use shutdown_gracefully")]
    pub fn shutdown(&self) {
        if self.is_shutdown() {
            return;
        }

        let in_event_loop = self.in_event_loop();
        let old_state;
        let wakeup;

        loop {
            if self.is_shutdown() {
                return;
            }

            let current = self.inner.state.get();
            let (next, wake) = if in_event_loop {
                (LifecycleState::Shutdown, true)
            } else {
                match current {
                    LifecycleState::NotStarted
                    | LifecycleState::Started
                    | LifecycleState::ShuttingDown => (LifecycleState::Shutdown, true),
                    other => (other, false),
                }
            };

            if self.inner.state.transition(current, next) {
                old_state = current;
                wakeup = wake;
                break;
            }
        }

        // A never-started executor still gets a worker, so that cleanup runs
        // and the termination future completes.
        if self.ensure_thread_started(old_state) {
            return;
        }

        if wakeup {
            drop(self.inner.task_queue.offer(QueueEntry::Wakeup));
        }
    }

    /// Initiates the two-phase graceful shutdown.
    ///
    /// The executor keeps accepting and running tasks until no task has been
    /// executed for `quiet_period`; it then terminates. `timeout` caps the
    /// total time waited regardless of ongoing activity.
    ///
    /// Repeated calls are harmless and return the same termination future.
    ///
    /// # Panics
    ///
    /// Panics if `timeout < quiet_period`.
    pub fn shutdown_gracefully(
        &self,
        quiet_period: Duration,
        timeout: Duration,
    ) -> TerminationFuture {
        assert!(
            timeout >= quiet_period,
            "timeout ({timeout:?}) must not be shorter than quiet_period ({quiet_period:?})"
        );

        if self.is_shutting_down() {
            return self.termination_future();
        }

        let in_event_loop = self.in_event_loop();
        let old_state;
        let wakeup;

        loop {
            if self.is_shutting_down() {
                return self.termination_future();
            }

            let current = self.inner.state.get();
            let (next, wake) = if in_event_loop {
                (LifecycleState::ShuttingDown, true)
            } else {
                match current {
                    LifecycleState::NotStarted | LifecycleState::Started => {
                        (LifecycleState::ShuttingDown, true)
                    }
                    other => (other, false),
                }
            };

            if self.inner.state.transition(current, next) {
                old_state = current;
                wakeup = wake;
                break;
            }
        }

        self.inner
            .graceful_shutdown_quiet_period
            .store(duration_nanos(quiet_period), Ordering::Release);
        self.inner
            .graceful_shutdown_timeout
            .store(duration_nanos(timeout), Ordering::Release);

        if self.ensure_thread_started(old_state) {
            return self.termination_future();
        }

        if wakeup {
            drop(self.inner.task_queue.offer(QueueEntry::Wakeup));
        }

        self.termination_future()
    }

    /// A future completing once the worker has exited and cleanup has run.
    #[must_use]
    pub fn termination_future(&self) -> TerminationFuture {
        self.inner.termination.clone()
    }

    /// Blocks until the executor terminates or `timeout` elapses. Returns
    /// whether it terminated in time.
    ///
    /// # Panics
    ///
    /// Panics when called from the worker thread.
    #[must_use]
    pub fn await_termination(&self, timeout: Duration) -> bool {
        assert!(
            !self.in_event_loop(),
            "cannot await termination from within the event loop"
        );

        self.inner.termination.wait_timeout(timeout).is_some()
    }

    // ---------------------------------------------------------------------
    // Interrupt and thread properties
    // ---------------------------------------------------------------------

    /// Interrupts the worker: raises the sticky interrupt status and forces
    /// a blocked queue wait to return. When the worker does not exist yet,
    /// the status is applied as it boots.
    pub fn interrupt_thread(&self) {
        self.inner.interrupted.store(true, Ordering::Release);

        if self.worker_thread().is_some() {
            self.inner.task_queue.wake();
        }
    }

    /// The worker's sticky interrupt status.
    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        self.inner.interrupted.load(Ordering::Acquire)
    }

    /// A snapshot view of the worker thread.
    ///
    /// When the worker has not started yet, a no-op task is submitted and
    /// this call blocks until it has run, proving the worker exists. The
    /// snapshot is captured once and reused for the executor's lifetime.
    pub fn thread_properties(&self) -> Result<ThreadProperties> {
        if let Some(properties) = self.inner.thread_properties.get() {
            return Ok(properties.clone());
        }

        if self.worker_thread().is_none() {
            let (started_tx, started_rx) = oneshot::channel();
            self.execute(move || drop(started_tx.send(())))?;
            started_rx.recv().map_err(|_| Error::Aborted)?;
        }

        let thread = self.worker_thread().ok_or_else(|| {
            Error::Programming("worker exited before recording its thread handle".to_string())
        })?;

        let properties = ThreadProperties::new(
            thread,
            Arc::clone(&self.inner.interrupted),
            self.inner.termination.clone(),
        );
        Ok(self
            .inner
            .thread_properties
            .get_or_init(|| properties)
            .clone())
    }

    // ---------------------------------------------------------------------
    // Shutdown hooks
    // ---------------------------------------------------------------------

    /// Registers `hook` to run while the executor confirms shutdown.
    /// Duplicate registrations (same `Arc`) are ignored.
    pub fn add_shutdown_hook(&self, hook: ShutdownHook) -> Result<()> {
        if self.in_event_loop() {
            self.add_shutdown_hook_now(&hook);
            Ok(())
        } else {
            let executor = self.clone();
            self.execute(move || executor.add_shutdown_hook_now(&hook))
        }
    }

    /// Unregisters a hook previously added with the same `Arc`.
    pub fn remove_shutdown_hook(&self, hook: &ShutdownHook) -> Result<()> {
        if self.in_event_loop() {
            self.remove_shutdown_hook_now(hook);
            Ok(())
        } else {
            let executor = self.clone();
            let hook = Arc::clone(hook);
            self.execute(move || executor.remove_shutdown_hook_now(&hook))
        }
    }

    fn add_shutdown_hook_now(&self, hook: &ShutdownHook) {
        let mut hooks = self.inner.shutdown_hooks.lock();
        if !hooks.iter().any(|existing| hook_eq(existing, hook)) {
            hooks.push(Arc::clone(hook));
        }
    }

    fn remove_shutdown_hook_now(&self, hook: &ShutdownHook) {
        self.inner
            .shutdown_hooks
            .lock()
            .retain(|existing| !hook_eq(existing, hook));
    }

    /// Runs the registered hooks. Hooks may add further hooks; the set is
    /// snapshotted per pass and passes repeat until the live set stays empty.
    fn run_shutdown_hooks(&self) -> bool {
        let mut ran = false;

        loop {
            let snapshot: Vec<ShutdownHook> =
                std::mem::take(&mut *self.inner.shutdown_hooks.lock());
            if snapshot.is_empty() {
                break;
            }

            for hook in snapshot {
                ran = true;
                if catch_unwind(AssertUnwindSafe(|| hook())).is_err() {
                    warn!(executor = %self.inner.name, "a shutdown hook raised a panic");
                }
            }
        }

        if ran {
            self.update_last_execution_time();
        }

        ran
    }

    // ---------------------------------------------------------------------
    // Run-loop helpers (worker only)
    // ---------------------------------------------------------------------

    /// Non-blocking dequeue of the next user task, skipping wakeup
    /// sentinels.
    pub fn poll_task(&self) -> Option<Task> {
        self.assert_in_event_loop("poll_task");

        loop {
            match self.inner.task_queue.poll() {
                Some(QueueEntry::Task { task, .. }) => return Some(task),
                Some(QueueEntry::Wakeup) => {}
                None => return None,
            }
        }
    }

    /// Blocking dequeue of the next user task, waiting no longer than the
    /// next scheduled task's deadline.
    ///
    /// `None` signals a wakeup (sentinel, interrupt, or a scheduled task
    /// falling due); callers simply re-enter their loop.
    pub fn take_task(&self) -> Option<Task> {
        self.assert_in_event_loop("take_task");

        loop {
            let next_delay = self.inner.scheduled.lock().next_delay(Instant::now());

            let Some(delay) = next_delay else {
                return match self.inner.task_queue.take() {
                    Some(QueueEntry::Task { task, .. }) => Some(task),
                    Some(QueueEntry::Wakeup) | None => None,
                };
            };

            let mut entry = if delay > Duration::ZERO {
                self.inner.task_queue.poll_timeout(delay)
            } else {
                None
            };

            if entry.is_none() {
                // The wait ran out, so scheduled work is due; move it over
                // before polling so producers cannot starve it.
                self.fetch_from_scheduled_queue();
                entry = self.inner.task_queue.poll();
            }

            match entry {
                Some(QueueEntry::Task { task, .. }) => return Some(task),
                Some(QueueEntry::Wakeup) => return None,
                None => {}
            }
        }
    }

    /// Moves every due scheduled task into the task queue.
    ///
    /// Returns `false` when the task queue filled up before the scheduled
    /// queue was exhausted; the unplaced task goes back where it was, so no
    /// scheduled task is ever lost.
    pub fn fetch_from_scheduled_queue(&self) -> bool {
        self.assert_in_event_loop("fetch_from_scheduled_queue");

        let now = Instant::now();
        let mut scheduled = self.inner.scheduled.lock();

        while let Some(due) = scheduled.poll_due(now) {
            let ScheduledTask { key, task } = due;
            let id = self.next_task_id();

            if let Err(refused) = self.inner.task_queue.offer(QueueEntry::Task { id, task }) {
                let QueueEntry::Task { task, .. } = refused else {
                    unreachable!("a task was offered");
                };
                scheduled.reinsert(ScheduledTask { key, task });
                return false;
            }
        }

        true
    }

    /// Drains the task queue completely, pulling in due scheduled tasks
    /// before every pass. Returns whether at least one task ran.
    pub fn run_all_tasks(&self) -> bool {
        self.assert_in_event_loop("run_all_tasks");

        let mut ran_at_least_one = false;
        loop {
            let fetched_all = self.fetch_from_scheduled_queue();
            if self.run_queued_tasks() {
                ran_at_least_one = true;
            }
            if fetched_all {
                break;
            }
        }

        if ran_at_least_one {
            self.update_last_execution_time();
        }

        self.inner.event_loop.after_running_all_tasks(self);
        ran_at_least_one
    }

    /// Runs queued tasks until the queue is empty or `budget` has elapsed,
    /// checking the clock every 64 tasks. Returns whether any task ran.
    pub fn run_all_tasks_within(&self, budget: Duration) -> bool {
        self.assert_in_event_loop("run_all_tasks_within");

        self.fetch_from_scheduled_queue();

        let Some(mut task) = self.poll_task() else {
            self.inner.event_loop.after_running_all_tasks(self);
            return false;
        };

        let deadline = Instant::now() + budget;
        let mut executed: u64 = 0;

        loop {
            safe_execute(task);
            executed += 1;

            if executed & RUN_ALL_TASKS_SAMPLE_MASK == 0 && Instant::now() >= deadline {
                break;
            }

            match self.poll_task() {
                Some(next) => task = next,
                None => break,
            }
        }

        self.update_last_execution_time();
        self.inner.event_loop.after_running_all_tasks(self);
        true
    }

    fn run_queued_tasks(&self) -> bool {
        let Some(mut task) = self.poll_task() else {
            return false;
        };

        loop {
            safe_execute(task);
            match self.poll_task() {
                Some(next) => task = next,
                None => return true,
            }
        }
    }

    /// Records now as the time of the most recent task execution. The quiet
    /// period of graceful shutdown is measured against this.
    pub fn update_last_execution_time(&self) {
        self.inner
            .last_execution_time
            .store(self.clock_nanos(), Ordering::Release);
    }

    // ---------------------------------------------------------------------
    // Shutdown confirmation (worker only)
    // ---------------------------------------------------------------------

    /// One pass of the graceful-shutdown protocol. The worker must keep
    /// calling this until it returns `true` before exiting its loop.
    ///
    /// Returns `false` without doing anything while no shutdown has been
    /// requested.
    ///
    /// # Panics
    ///
    /// Panics when called off the worker thread while a shutdown is in
    /// progress.
    pub fn confirm_shutdown(&self) -> bool {
        if !self.is_shutting_down() {
            return false;
        }
        self.assert_in_event_loop("confirm_shutdown");

        self.cancel_scheduled_tasks();

        if self.graceful_shutdown_start_nanos() == 0 {
            // max(1) keeps zero meaning "not started yet".
            self.inner
                .graceful_shutdown_start_time
                .store(self.clock_nanos().max(1), Ordering::Release);
        }

        if self.run_all_tasks() || self.run_shutdown_hooks() {
            if self.is_shutdown() {
                // Abrupt shutdown: drop whatever may still come.
                return true;
            }

            // There was work this pass; with a quiet period the clock
            // restarts, without one we can stop right away.
            if self.inner.graceful_shutdown_quiet_period.load(Ordering::Acquire) == 0 {
                return true;
            }

            self.wakeup(true);
            return false;
        }

        let now = self.clock_nanos();
        let timeout = self.inner.graceful_shutdown_timeout.load(Ordering::Acquire);
        if self.is_shutdown() || now.saturating_sub(self.graceful_shutdown_start_nanos()) > timeout
        {
            return true;
        }

        let quiet_period = self
            .inner
            .graceful_shutdown_quiet_period
            .load(Ordering::Acquire);
        if now.saturating_sub(self.inner.last_execution_time.load(Ordering::Acquire))
            <= quiet_period
        {
            // Still inside the quiet window; nap briefly and look again so a
            // late task can reopen it.
            self.wakeup(true);
            thread::sleep(QUIET_PERIOD_POLL);
            return false;
        }

        // The quiet period elapsed without new work.
        true
    }

    fn cancel_scheduled_tasks(&self) {
        let mut scheduled = self.inner.scheduled.lock();
        if !scheduled.is_empty() {
            scheduled.cancel_all();
        }
    }

    fn graceful_shutdown_start_nanos(&self) -> u64 {
        self.inner
            .graceful_shutdown_start_time
            .load(Ordering::Acquire)
    }

    fn clock_nanos(&self) -> u64 {
        duration_nanos(self.inner.origin.elapsed())
    }
}

fn duration_nanos(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}

fn hook_eq(a: &ShutdownHook, b: &ShutdownHook) -> bool {
    // Compare allocation addresses; comparing fat pointers would also drag
    // vtable addresses into the equation, which are not stable.
    ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

impl fmt::Debug for SerialExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerialExecutor")
            .field("name", &self.inner.name)
            .field("state", &self.inner.state.get())
            .field("pending_tasks", &self.pending_tasks())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc;

    use uniloop_testing::{TEST_TIMEOUT, execute_or_abandon};

    use super::*;
    use crate::{MockLaunchWorker, SerialExecutorBuilder};

    /// An event loop that hands the worker thread to a one-shot script and
    /// then drives the shutdown protocol to completion. This is how the
    /// worker-only helpers get exercised from a test.
    struct ScriptedLoop {
        script: Mutex<Option<Box<dyn FnOnce(&SerialExecutor) + Send>>>,
    }

    impl ScriptedLoop {
        fn new(script: impl FnOnce(&SerialExecutor) + Send + 'static) -> Self {
            Self {
                script: Mutex::new(Some(Box::new(script))),
            }
        }
    }

    impl EventLoop for ScriptedLoop {
        fn run(&self, executor: &SerialExecutor) {
            if let Some(script) = self.script.lock().take() {
                script(executor);
            }

            drop(executor.shutdown_gracefully(Duration::ZERO, Duration::ZERO));
            while !executor.confirm_shutdown() {}
        }
    }

    /// Runs `script` on a fresh executor's worker thread and waits for the
    /// executor to terminate.
    fn run_on_worker(script: impl FnOnce(&SerialExecutor) + Send + 'static) {
        run_on_worker_with(SerialExecutorBuilder::new().with_name("scripted"), script);
    }

    fn run_on_worker_with(
        builder: SerialExecutorBuilder,
        script: impl FnOnce(&SerialExecutor) + Send + 'static,
    ) {
        let executor = builder.with_event_loop(ScriptedLoop::new(script)).build();

        // Any submission boots the worker; the script runs before the queue
        // is ever drained, so this probe task is what the script sees queued.
        executor.execute(|| {}).expect("executor accepts work");

        assert!(
            execute_or_abandon({
                let executor = executor.clone();
                move || executor.await_termination(TEST_TIMEOUT)
            })
            .expect("await did not hang")
        );
    }

    #[test]
    fn assert_types() {
        static_assertions::assert_impl_all!(SerialExecutor: Send, Sync, Clone);
    }

    #[test]
    fn worker_is_spawned_once_for_many_submissions() {
        let mut launcher = MockLaunchWorker::new();
        launcher
            .expect_launch()
            .once()
            .returning(|_name, body| {
                thread::spawn(body);
                Ok(())
            });

        let executor = SerialExecutorBuilder::new()
            .with_launcher(launcher)
            .build();

        let (tx, rx) = mpsc::channel();
        for _ in 0..3 {
            let tx = tx.clone();
            executor
                .execute(move || drop(tx.send(())))
                .expect("executor accepts work");
        }

        for _ in 0..3 {
            rx.recv_timeout(TEST_TIMEOUT).expect("task ran");
        }
    }

    #[test]
    fn failed_spawn_rolls_the_state_back_and_surfaces_the_error() {
        let mut launcher = MockLaunchWorker::new();
        let mut sequence = mockall::Sequence::new();

        launcher
            .expect_launch()
            .once()
            .in_sequence(&mut sequence)
            .returning(|_name, _body| Err(Error::Launch("no threads left".to_string())));
        launcher
            .expect_launch()
            .once()
            .in_sequence(&mut sequence)
            .returning(|_name, body| {
                thread::spawn(body);
                Ok(())
            });

        let executor = SerialExecutorBuilder::new()
            .with_launcher(launcher)
            .build();

        let outcome = executor.execute(|| {});
        assert!(matches!(outcome, Err(Error::Launch(_))));

        // The rollback makes the next submission retry the spawn. The first
        // task stayed queued, so both run once the worker comes up.
        let (tx, rx) = mpsc::channel();
        executor
            .execute(move || drop(tx.send(())))
            .expect("second spawn attempt succeeds");
        rx.recv_timeout(TEST_TIMEOUT).expect("task ran");
        assert_eq!(executor.pending_tasks(), 0);
    }

    #[test]
    fn graceful_shutdown_of_unstartable_executor_fails_the_termination_future() {
        let mut launcher = MockLaunchWorker::new();
        launcher
            .expect_launch()
            .returning(|_name, _body| Err(Error::Launch("no threads left".to_string())));

        let executor = SerialExecutorBuilder::new()
            .with_launcher(launcher)
            .build();

        let termination =
            executor.shutdown_gracefully(Duration::ZERO, Duration::from_secs(1));

        assert!(executor.is_terminated());
        assert!(matches!(termination.wait(), Err(Error::Launch(_))));
    }

    #[test]
    fn submissions_after_termination_are_rejected() {
        let executor = SerialExecutorBuilder::new().build();

        executor.execute(|| {}).expect("executor accepts work");
        executor
            .shutdown_gracefully(Duration::ZERO, Duration::from_secs(5))
            .wait()
            .expect("clean termination");

        let outcome = executor.execute(|| unreachable!("must not run"));
        assert!(matches!(outcome, Err(Error::Rejected(_))));
    }

    #[test]
    fn submit_delivers_the_task_result() {
        let executor = SerialExecutorBuilder::new().build();

        let handle = executor.submit(|| 6 * 7).expect("executor accepts work");
        let result = execute_or_abandon(move || handle.wait())
            .expect("wait did not hang")
            .expect("task completed");

        assert_eq!(result, 42);
    }

    #[test]
    fn submit_of_a_panicking_task_aborts_the_handle() {
        let executor = SerialExecutorBuilder::new().build();

        let handle = executor
            .submit(|| -> u32 { panic!("intentional test panic") })
            .expect("executor accepts work");

        let outcome = execute_or_abandon(move || handle.wait()).expect("wait did not hang");
        assert!(matches!(outcome, Err(Error::Aborted)));
    }

    #[test]
    fn invoke_all_returns_results_in_submission_order() {
        let executor = SerialExecutorBuilder::new().build();

        let results = executor
            .invoke_all((0..5).map(|i| move || i * 10))
            .expect("all tasks ran");

        assert_eq!(results, vec![0, 10, 20, 30, 40]);
    }

    #[test]
    #[should_panic(expected = "would deadlock")]
    fn invoke_all_from_the_worker_is_refused() {
        let (tx, rx) = mpsc::channel();

        run_on_worker(move |executor| {
            let caught = catch_unwind(AssertUnwindSafe(|| {
                drop(executor.invoke_all([|| ()]));
            }));
            drop(tx.send(caught.is_err()));
        });

        if rx.recv_timeout(TEST_TIMEOUT) == Ok(true) {
            panic!("would deadlock");
        }
    }

    #[test]
    fn schedule_runs_after_its_delay() {
        let executor = SerialExecutorBuilder::new().build();
        let (tx, rx) = mpsc::channel();

        let scheduled_at = Instant::now();
        executor
            .schedule(Duration::from_millis(50), move || {
                drop(tx.send(Instant::now()));
            })
            .expect("executor accepts work");

        let ran_at = rx.recv_timeout(TEST_TIMEOUT).expect("scheduled task ran");
        assert!(ran_at.duration_since(scheduled_at) >= Duration::from_millis(50));
    }

    #[test]
    fn scheduled_work_interleaves_with_direct_submissions() {
        let executor = SerialExecutorBuilder::new().build();
        let (tx, rx) = mpsc::channel();

        for label in ["first", "second"] {
            let tx = tx.clone();
            executor
                .execute(move || drop(tx.send(label)))
                .expect("executor accepts work");
        }
        executor
            .schedule(Duration::from_millis(20), move || drop(tx.send("delayed")))
            .expect("executor accepts work");

        assert_eq!(rx.recv_timeout(TEST_TIMEOUT), Ok("first"));
        assert_eq!(rx.recv_timeout(TEST_TIMEOUT), Ok("second"));
        assert_eq!(rx.recv_timeout(TEST_TIMEOUT), Ok("delayed"));
    }

    #[test]
    fn run_all_tasks_drains_queued_and_due_scheduled_work() {
        let counter = Arc::new(AtomicUsize::new(0));
        let observed = Arc::new(AtomicUsize::new(0));

        run_on_worker({
            let counter = Arc::clone(&counter);
            let observed = Arc::clone(&observed);
            move |executor| {
                for _ in 0..3 {
                    let counter = Arc::clone(&counter);
                    executor
                        .execute(move || {
                            counter.fetch_add(1, Ordering::Relaxed);
                        })
                        .expect("executor accepts work");
                }

                let counter_for_scheduled = Arc::clone(&counter);
                executor
                    .schedule(Duration::ZERO, move || {
                        counter_for_scheduled.fetch_add(1, Ordering::Relaxed);
                    })
                    .expect("executor accepts work");

                assert!(executor.run_all_tasks());
                observed.store(counter.load(Ordering::Relaxed), Ordering::Relaxed);
            }
        });

        // Three direct tasks plus the due scheduled one; the harness probe
        // runs too but does not count.
        assert_eq!(observed.load(Ordering::Relaxed), 4);
    }

    #[test]
    fn fetch_pushes_back_when_the_task_queue_is_full() {
        let executed = Arc::new(AtomicUsize::new(0));
        let fetch_result = Arc::new(Mutex::new(None));

        let builder = SerialExecutorBuilder::new().with_max_pending_tasks(16);
        run_on_worker_with(builder, {
            let executed = Arc::clone(&executed);
            let fetch_result = Arc::clone(&fetch_result);
            move |executor| {
                // The probe occupies one slot; fill the remaining fifteen.
                for _ in 0..15 {
                    let executed = Arc::clone(&executed);
                    executor
                        .execute(move || {
                            executed.fetch_add(1, Ordering::Relaxed);
                        })
                        .expect("executor accepts work");
                }

                let executed_scheduled = Arc::clone(&executed);
                executor
                    .schedule(Duration::ZERO, move || {
                        executed_scheduled.fetch_add(1, Ordering::Relaxed);
                    })
                    .expect("executor accepts work");

                // The queue is at capacity, so the due task cannot move over.
                *fetch_result.lock() = Some(executor.fetch_from_scheduled_queue());

                // A full drain loops until the scheduled queue empties; the
                // pushed-back task must not have been lost.
                executor.run_all_tasks();
            }
        });

        assert_eq!(*fetch_result.lock(), Some(false));
        assert_eq!(executed.load(Ordering::Relaxed), 16);
    }

    #[test]
    fn run_all_tasks_within_budget_samples_the_clock() {
        let executed = Arc::new(AtomicUsize::new(0));

        run_on_worker({
            let executed = Arc::clone(&executed);
            move |executor| {
                // 200 trivial tasks with a zero budget: the first clock
                // sample at task 64 stops the drain.
                for _ in 0..200 {
                    let executed = Arc::clone(&executed);
                    executor
                        .execute(move || {
                            executed.fetch_add(1, Ordering::Relaxed);
                        })
                        .expect("executor accepts work");
                }

                assert!(executor.run_all_tasks_within(Duration::ZERO));

                // 64 entries ran before the first clock sample: the harness
                // probe plus 63 counting tasks.
                assert_eq!(executed.load(Ordering::Relaxed), 63);
            }
        });
    }

    #[test]
    fn wakeup_sentinel_is_invisible_to_poll_task() {
        run_on_worker(|executor| {
            executor.wakeup(false);
            executor.wakeup(false);

            // Only the harness probe is real work.
            let mut real_tasks = 0;
            while let Some(task) = executor.poll_task() {
                task();
                real_tasks += 1;
            }
            assert_eq!(real_tasks, 1);
        });
    }

    #[test]
    #[should_panic(expected = "may only be called from the event loop")]
    fn take_task_off_worker_is_a_programming_error() {
        let executor = SerialExecutorBuilder::new().build();
        executor.execute(|| {}).expect("executor accepts work");

        drop(executor.take_task());
    }

    #[test]
    fn shutdown_hooks_run_during_confirm_shutdown() {
        let executor = SerialExecutorBuilder::new().build();
        let (tx, rx) = mpsc::channel();

        let hook: ShutdownHook = Arc::new(move || drop(tx.send(())));
        executor
            .add_shutdown_hook(hook)
            .expect("executor accepts the hook");

        executor
            .shutdown_gracefully(Duration::ZERO, Duration::from_secs(5))
            .wait()
            .expect("clean termination");

        rx.recv_timeout(TEST_TIMEOUT).expect("hook ran");
    }

    #[test]
    fn removed_shutdown_hooks_do_not_run() {
        let executor = SerialExecutorBuilder::new().build();
        let fired = Arc::new(AtomicBool::new(false));

        let hook: ShutdownHook = Arc::new({
            let fired = Arc::clone(&fired);
            move || fired.store(true, Ordering::Release)
        });

        executor
            .add_shutdown_hook(Arc::clone(&hook))
            .expect("executor accepts the hook");
        executor
            .remove_shutdown_hook(&hook)
            .expect("executor accepts the removal");

        executor
            .shutdown_gracefully(Duration::ZERO, Duration::from_secs(5))
            .wait()
            .expect("clean termination");

        assert!(!fired.load(Ordering::Acquire));
    }

    #[test]
    fn hooks_registered_by_hooks_also_run() {
        let executor = SerialExecutorBuilder::new().build();
        let (tx, rx) = mpsc::channel();

        let inner_hook: ShutdownHook = Arc::new(move || drop(tx.send("inner")));
        let outer_hook: ShutdownHook = Arc::new({
            let executor = executor.clone();
            move || {
                executor
                    .add_shutdown_hook(Arc::clone(&inner_hook))
                    .expect("hook registration from a hook is allowed");
            }
        });

        executor
            .add_shutdown_hook(outer_hook)
            .expect("executor accepts the hook");

        executor
            .shutdown_gracefully(Duration::ZERO, Duration::from_secs(5))
            .wait()
            .expect("clean termination");

        assert_eq!(rx.recv_timeout(TEST_TIMEOUT), Ok("inner"));
    }

    #[test]
    fn abrupt_shutdown_of_a_never_started_executor_still_terminates() {
        let executor = SerialExecutorBuilder::new().build();

        #[expect(deprecated, reason = "the deprecated path itself is under test")]
        executor.shutdown();

        assert!(executor.await_termination(TEST_TIMEOUT));
        assert!(executor.is_terminated());
    }

    #[test]
    fn repeated_graceful_shutdown_returns_the_same_future() {
        let executor = SerialExecutorBuilder::new().build();
        executor.execute(|| {}).expect("executor accepts work");

        let first = executor.shutdown_gracefully(Duration::ZERO, Duration::from_secs(5));
        let second = executor.shutdown_gracefully(Duration::ZERO, Duration::from_secs(5));

        first.wait().expect("clean termination");
        assert!(second.is_terminated());
    }

    #[test]
    #[should_panic(expected = "must not be shorter than quiet_period")]
    fn graceful_shutdown_validates_its_arguments() {
        let executor = SerialExecutorBuilder::new().build();
        drop(executor.shutdown_gracefully(Duration::from_secs(2), Duration::from_secs(1)));
    }

    #[test]
    #[should_panic(expected = "cannot await termination from within the event loop")]
    fn await_termination_from_the_worker_is_a_programming_error() {
        let (tx, rx) = mpsc::channel();

        run_on_worker(move |executor| {
            let caught = catch_unwind(AssertUnwindSafe(|| {
                drop(executor.await_termination(Duration::from_millis(1)));
            }));
            drop(tx.send(caught.is_err()));
        });

        if rx.recv_timeout(TEST_TIMEOUT) == Ok(true) {
            panic!("cannot await termination from within the event loop");
        }
    }

    #[test]
    fn thread_properties_boot_the_worker_on_demand() {
        let executor = SerialExecutorBuilder::new().with_name("props").build();

        let properties = executor
            .thread_properties()
            .expect("worker booted for the snapshot");

        assert_eq!(properties.name(), Some("props"));
        assert!(properties.is_alive());
        assert!(!properties.is_interrupted());

        // The snapshot is captured once and then shared.
        let again = executor.thread_properties().expect("snapshot is cached");
        assert_eq!(again.id(), properties.id());
    }

    #[test]
    fn interrupt_before_start_is_visible_to_the_worker() {
        let executor = SerialExecutorBuilder::new().build();
        executor.interrupt_thread();

        let (tx, rx) = mpsc::channel();
        executor
            .execute({
                let executor = executor.clone();
                move || drop(tx.send(executor.is_interrupted()))
            })
            .expect("executor accepts work");

        assert_eq!(rx.recv_timeout(TEST_TIMEOUT), Ok(true));
    }
}
