//! The named hardware-capability contract.

use std::time::Duration;

use crate::core::error::AppResult;
use crate::core::task::{Task, TaskContext};
use crate::sink::LogSink;

/// Approximate resource demands of a capability; advisory only. Used by
/// assignment policies to decide which workers may host which capabilities.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceHints {
    /// Approximate resident memory while loaded, in megabytes.
    pub memory_mb: u32,
    /// Rough cost of a load/unload transition. Zero for stateless
    /// capabilities such as a plain CPU executor.
    pub load_latency: Duration,
}

/// A named, stateful resource adapter: a CPU executor, a GPU-resident model,
/// an OCR engine. Implemented by external collaborators.
///
/// Hosting is exclusive: one instance is hosted per worker at a time,
/// `load` completes before any `process` call, and `unload` never races a
/// `process` on the same instance; the worker loop guarantees all three.
/// An implementation that wraps a genuinely process-global native resource
/// (a model loaded once per process) must additionally serialize its own
/// `load`/`unload` across workers, typically with a `static` mutex; the core
/// does not assume capabilities are thread-safe beyond one active `process`
/// per hosting worker.
pub trait Capability: Send {
    /// The registered type name, used as the lane key.
    fn type_name(&self) -> &str;

    /// Advisory resource demands.
    fn hints(&self) -> ResourceHints {
        ResourceHints::default()
    }

    /// Acquire backing resources (open a model file, allocate VRAM).
    /// A worker never calls `process` on a capability whose `load` failed;
    /// the failure surfaces as
    /// [`SchedulerError::CapabilityLoadFault`](crate::core::SchedulerError::CapabilityLoadFault)
    /// at the worker boundary.
    fn load(&mut self, log: &LogSink) -> AppResult<()>;

    /// Execute one task against this capability. Implementations that carry
    /// backend state hand it to their own task family (via
    /// [`Task::as_any_mut`]) before delegating to [`Task::run`].
    fn process(&mut self, task: &mut dyn Task, ctx: &mut TaskContext<'_>) -> AppResult<()>;

    /// Release backing resources. Called on the hosting worker between task
    /// claims, and once more at worker teardown if still hosted.
    fn unload(&mut self, log: &LogSink);
}
