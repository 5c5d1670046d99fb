//! The unit-of-work contract and its execution context.

use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::core::error::{AppResult, SchedulerError};
use crate::sink::LogSink;

/// Queue-assigned task identity. Two tasks with identical payloads are
/// distinct; identity is the id handed out at enqueue time.
pub type TaskId = u64;

/// Owned trait object for a unit of work.
pub type BoxedTask = Box<dyn Task>;

/// A unit of work, tagged with the capability lane it belongs to.
///
/// Lifecycle: created by a producer (scheduler seed or another task's spawn
/// call), enqueued unclaimed, claimed by exactly one worker, executed via the
/// hosting capability's `process`, finalized, then removed from the in-flight
/// set. Ownership moves with the lifecycle: the queue owns the task while
/// unclaimed, the claiming worker while in-flight.
pub trait Task: Send {
    /// Name of the capability lane this task requires.
    fn capability(&self) -> &str;

    /// Execute the unit of work. Spawn downstream tasks through
    /// [`TaskContext::spawn`]; they are guaranteed visible in their lanes
    /// before this task is marked finished. Long-running loops should poll
    /// [`TaskContext::cancelled`] at safe points to honor quit.
    fn run(&mut self, ctx: &mut TaskContext<'_>) -> AppResult<()>;

    /// Post-run bookkeeping and logging. Called after `run` returns,
    /// whether it succeeded or failed, and before the queue records the
    /// task as finished.
    fn finish(&mut self, _log: &LogSink) {}

    /// Downcast support so a capability can hand backend state (a loaded
    /// model handle, an API client) to tasks of its own family before
    /// running them.
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Spawn channel handed to every executing task: enqueue new work as part of
/// the task's own execution, before it is marked finished.
pub type SpawnFn<'a> = dyn Fn(BoxedTask) -> Result<TaskId, SchedulerError> + 'a;

/// Everything a running task is allowed to touch: the worker's log sink, a
/// bounded enqueue side-effect channel, and a cooperative cancellation flag.
pub struct TaskContext<'a> {
    log: &'a LogSink,
    spawn: &'a SpawnFn<'a>,
    cancel: &'a AtomicBool,
}

impl<'a> TaskContext<'a> {
    /// Build a context. Core-internal; workers construct one per execution.
    pub(crate) fn new(log: &'a LogSink, spawn: &'a SpawnFn<'a>, cancel: &'a AtomicBool) -> Self {
        Self { log, spawn, cancel }
    }

    /// The hosting worker's log sink.
    #[must_use]
    pub fn log(&self) -> &LogSink {
        self.log
    }

    /// Enqueue a downstream task. Fails loudly with
    /// [`SchedulerError::UnknownCapability`] when the task names a lane the
    /// queue was not constructed with.
    pub fn spawn(&self, task: BoxedTask) -> Result<TaskId, SchedulerError> {
        (self.spawn)(task)
    }

    /// True once a quit has been requested. Tasks decide when it is safe to
    /// stop mid-execution; the core never preempts.
    #[must_use]
    pub fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::Acquire)
    }
}
