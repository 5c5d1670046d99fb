//! The scheduler: owns the worker pool, watches for global quiescence, and
//! coordinates stop/quit.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::bounded;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::core::error::SchedulerError;
use crate::core::queue::TaskQueue;
use crate::core::registry::CapabilityRegistry;
use crate::core::worker::{Worker, WorkerSignals};
use crate::sink::LogSink;

/// How often the drain monitor re-samples when no change notification
/// arrives.
const MONITOR_SLICE: Duration = Duration::from_millis(100);

/// Scheduler lifecycle. Transitions run one way:
/// `Created -> Running -> Draining -> Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// Constructed, pool not yet started.
    Created,
    /// Workers running, drain monitor watching.
    Running,
    /// Stop initiated (by quiescence or by the caller); workers finishing
    /// their current tasks.
    Draining,
    /// All threads joined.
    Stopped,
}

struct WorkerHandle {
    signals: Arc<WorkerSignals>,
    thread: JoinHandle<()>,
}

/// Owns the worker pool and the drain monitor.
///
/// The monitor runs on its own thread and declares global quiescence,
/// initiating stop, exactly when the in-flight count reads zero and, only
/// then, every lane reads empty ([`TaskQueue::is_quiescent`]). An external
/// [`Scheduler::request_stop`] or [`Scheduler::request_quit`] initiates the
/// same shutdown independent of drain state.
pub struct Scheduler {
    config: Config,
    queue: Arc<TaskQueue>,
    workers: Vec<WorkerHandle>,
    monitor: Option<JoinHandle<()>>,
    stop: Arc<AtomicBool>,
    state: Arc<Mutex<SchedulerState>>,
}

impl Scheduler {
    /// Create a scheduler over `queue`. No threads start until
    /// [`Scheduler::start`].
    #[must_use]
    pub fn new(config: Config, queue: Arc<TaskQueue>) -> Self {
        Self {
            config,
            queue,
            workers: Vec::new(),
            monitor: None,
            stop: Arc::new(AtomicBool::new(false)),
            state: Arc::new(Mutex::new(SchedulerState::Created)),
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SchedulerState {
        *self.state.lock()
    }

    /// Construct the worker pool and start every worker's run loop plus the
    /// drain monitor. `assignment` maps a worker index to the capability
    /// names that worker may host; instances are created from the registry.
    ///
    /// Seed the queue before calling this: the monitor declares quiescence
    /// on the first observation of an empty, idle queue.
    ///
    /// # Errors
    ///
    /// - [`SchedulerError::UnknownCapability`] when the assignment names an
    ///   unregistered capability.
    /// - [`SchedulerError::InvalidConfig`] when a worker ends up with no
    ///   assignable capabilities, or the scheduler was already started.
    /// - [`SchedulerError::Io`] when a worker log sink or thread cannot be
    ///   created.
    pub fn start(
        &mut self,
        registry: &CapabilityRegistry,
        assignment: impl Fn(usize) -> Vec<String>,
    ) -> Result<(), SchedulerError> {
        {
            let mut state = self.state.lock();
            if *state != SchedulerState::Created {
                return Err(SchedulerError::InvalidConfig(
                    "scheduler already started".into(),
                ));
            }
            *state = SchedulerState::Running;
        }

        std::fs::create_dir_all(&self.config.log_dir)?;

        for worker_id in 0..self.config.workers {
            let mut capabilities = Vec::new();
            for name in assignment(worker_id) {
                let capability = registry
                    .create(&name)
                    .ok_or(SchedulerError::UnknownCapability(name))?;
                debug!(
                    worker_id,
                    capability = %capability.type_name(),
                    memory_mb = capability.hints().memory_mb,
                    "capability assigned"
                );
                capabilities.push(capability);
            }

            let log_path = self.config.log_dir.join(format!("worker{worker_id}.log"));
            let log = LogSink::with_external_pipe(&log_path, self.config.log_level)?;

            let worker = Worker::new(
                worker_id,
                Arc::clone(&self.queue),
                capabilities,
                log,
                self.config.load_recovery,
            )?;
            let signals = worker.signals();
            let thread = worker.spawn()?;
            self.workers.push(WorkerHandle { signals, thread });
        }

        info!(
            workers = self.config.workers,
            lanes = self.queue.capability_names().len(),
            "scheduler started"
        );

        self.monitor = Some(self.spawn_monitor()?);
        Ok(())
    }

    /// Drain monitor: event-driven sampling of the queue, then shutdown
    /// initiation once quiescent or externally stopped.
    fn spawn_monitor(&self) -> std::io::Result<JoinHandle<()>> {
        let queue = Arc::clone(&self.queue);
        let stop = Arc::clone(&self.stop);
        let state = Arc::clone(&self.state);
        let worker_signals: Vec<Arc<WorkerSignals>> =
            self.workers.iter().map(|w| Arc::clone(&w.signals)).collect();

        std::thread::Builder::new()
            .name("mill-monitor".to_string())
            .spawn(move || {
                // Change notifications collapse into a single pending nudge;
                // the monitor only ever needs "something changed, re-sample".
                let (tx, rx) = bounded::<()>(1);
                let subscription = queue.subscribe(move || {
                    let _ = tx.try_send(());
                });

                loop {
                    if stop.load(Ordering::Acquire) {
                        debug!("monitor: external stop observed");
                        break;
                    }
                    if queue.is_quiescent() {
                        info!("monitor: queue quiescent, initiating stop");
                        break;
                    }
                    let _ = rx.recv_timeout(MONITOR_SLICE);
                }

                queue.unsubscribe(subscription);
                *state.lock() = SchedulerState::Draining;
                for signals in &worker_signals {
                    signals.request_stop();
                }
                queue.notify_all_lanes();
            })
    }

    /// External stop: workers finish their current task and exit. Also ends
    /// the drain monitor.
    pub fn request_stop(&self) {
        info!("stop requested");
        self.stop.store(true, Ordering::Release);
        for worker in &self.workers {
            worker.signals.request_stop();
        }
        self.queue.notify_all_lanes();
    }

    /// Harder stop: additionally raises each worker's task cancellation
    /// flag, which long-running payloads poll at safe points.
    pub fn request_quit(&self) {
        info!("quit requested");
        self.stop.store(true, Ordering::Release);
        for worker in &self.workers {
            worker.signals.request_quit();
        }
        self.queue.notify_all_lanes();
    }

    /// Block until the monitor and every worker thread have exited. Returns
    /// whether shutdown was clean (no worker thread panicked).
    pub fn wait(&mut self) -> bool {
        let mut clean = true;

        if let Some(monitor) = self.monitor.take() {
            clean &= monitor.join().is_ok();
        }
        for worker in self.workers.drain(..) {
            if worker.thread.join().is_err() {
                warn!("worker thread panicked");
                clean = false;
            }
        }

        *self.state.lock() = SchedulerState::Stopped;
        info!(clean, "scheduler stopped");
        clean
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        // Signal but do not join: an explicit wait() is the graceful path,
        // and joining here could hang a caller that dropped mid-run.
        if !self.workers.is_empty() || self.monitor.is_some() {
            self.stop.store(true, Ordering::Release);
            for worker in &self.workers {
                worker.signals.request_stop();
            }
            self.queue.notify_all_lanes();
        }
    }
}
