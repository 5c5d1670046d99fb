//! Core scheduling: the task queue, worker loop, scheduler, and the
//! contracts implemented by external collaborators.

pub mod capability;
pub mod error;
pub mod queue;
pub mod registry;
pub mod scheduler;
pub mod task;
pub mod worker;

pub use capability::{Capability, ResourceHints};
pub use error::{AppResult, SchedulerError};
pub use queue::{ClaimedTask, TaskQueue};
pub use registry::{CapabilityRegistry, Registry};
pub use scheduler::{Scheduler, SchedulerState};
pub use task::{BoxedTask, Task, TaskContext, TaskId};
pub use worker::{LoadRecovery, Worker, WorkerSignals};
