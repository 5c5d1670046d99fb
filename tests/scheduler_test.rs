//! End-to-end scheduler tests: run-to-quiescence, spawn chains, external
//! stop/quit, and start-time validation.

use std::any::Any;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rand::Rng;
use taskmill::config::Config;
use taskmill::core::{
    AppResult, Capability, CapabilityRegistry, LoadRecovery, Scheduler, SchedulerError,
    SchedulerState, Task, TaskContext, TaskQueue,
};
use taskmill::sink::{LogLevel, LogSink};

// ============================================================================
// HELPERS
// ============================================================================

/// Pass-through capability: the tasks in these tests carry their own logic.
struct EchoCapability {
    name: String,
}

impl Capability for EchoCapability {
    fn type_name(&self) -> &str {
        &self.name
    }

    fn load(&mut self, _log: &LogSink) -> AppResult<()> {
        Ok(())
    }

    fn process(&mut self, task: &mut dyn Task, ctx: &mut TaskContext<'_>) -> AppResult<()> {
        task.run(ctx)
    }

    fn unload(&mut self, _log: &LogSink) {}
}

fn echo_registry(names: &[&str]) -> CapabilityRegistry {
    let mut registry = CapabilityRegistry::new();
    for name in names {
        registry.register(*name, |name| {
            Box::new(EchoCapability {
                name: name.to_string(),
            }) as Box<dyn Capability>
        });
    }
    registry
}

fn test_config(workers: usize, log_dir: &std::path::Path) -> Config {
    Config {
        workers,
        log_dir: log_dir.to_path_buf(),
        log_level: LogLevel::None,
        load_recovery: LoadRecovery::Fallback,
    }
}

struct RecordTask {
    lane: String,
    label: String,
    record: Arc<Mutex<Vec<String>>>,
}

impl Task for RecordTask {
    fn capability(&self) -> &str {
        &self.lane
    }

    fn run(&mut self, _ctx: &mut TaskContext<'_>) -> AppResult<()> {
        self.record.lock().push(self.label.clone());
        Ok(())
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Task that spawns one descendant on the other lane until its depth runs
/// out, with a little timing jitter to shake out ordering assumptions.
struct ChainTask {
    lane: String,
    depth: usize,
    executed: Arc<AtomicUsize>,
}

impl Task for ChainTask {
    fn capability(&self) -> &str {
        &self.lane
    }

    fn run(&mut self, ctx: &mut TaskContext<'_>) -> AppResult<()> {
        self.executed.fetch_add(1, Ordering::SeqCst);
        let jitter: u64 = rand::rng().random_range(0..2);
        thread::sleep(Duration::from_millis(jitter));

        if self.depth > 0 {
            let next_lane = if self.lane == "cpu" { "gpu" } else { "cpu" };
            ctx.spawn(Box::new(ChainTask {
                lane: next_lane.to_string(),
                depth: self.depth - 1,
                executed: Arc::clone(&self.executed),
            }))?;
        }
        Ok(())
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

struct SlowTask {
    lane: String,
    executed: Arc<AtomicUsize>,
}

impl Task for SlowTask {
    fn capability(&self) -> &str {
        &self.lane
    }

    fn run(&mut self, _ctx: &mut TaskContext<'_>) -> AppResult<()> {
        thread::sleep(Duration::from_millis(5));
        self.executed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

struct CancelProbeTask {
    started: Arc<AtomicBool>,
    cancelled: Arc<AtomicBool>,
}

impl Task for CancelProbeTask {
    fn capability(&self) -> &str {
        "cpu"
    }

    fn run(&mut self, ctx: &mut TaskContext<'_>) -> AppResult<()> {
        self.started.store(true, Ordering::SeqCst);
        let deadline = Instant::now() + Duration::from_secs(10);
        while !ctx.cancelled() {
            if Instant::now() > deadline {
                anyhow::bail!("never cancelled");
            }
            thread::sleep(Duration::from_millis(2));
        }
        self.cancelled.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

// ============================================================================
// RUN TO QUIESCENCE
// ============================================================================

#[test]
fn test_run_to_quiescence_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let registry = echo_registry(&["cpu", "gpu"]);
    let queue = Arc::new(TaskQueue::new(registry.names()));
    let record = Arc::new(Mutex::new(Vec::new()));

    for i in 0..3 {
        queue
            .enqueue(Box::new(RecordTask {
                lane: "cpu".to_string(),
                label: format!("t{i}"),
                record: Arc::clone(&record),
            }))
            .unwrap();
    }

    let mut scheduler = Scheduler::new(test_config(1, dir.path()), Arc::clone(&queue));
    assert_eq!(scheduler.state(), SchedulerState::Created);
    scheduler
        .start(&registry, |_| vec!["cpu".to_string(), "gpu".to_string()])
        .unwrap();

    assert!(scheduler.wait(), "shutdown should be clean");
    assert_eq!(scheduler.state(), SchedulerState::Stopped);

    // single worker, so FIFO order is observable end to end
    assert_eq!(*record.lock(), vec!["t0", "t1", "t2"]);
    assert!(queue.is_quiescent());
    assert!(dir.path().join("worker0.log").exists());
}

#[test]
fn test_spawn_chains_drain_fully() {
    const ROOTS: usize = 6;
    const DEPTH: usize = 20;

    let dir = tempfile::tempdir().unwrap();
    let registry = echo_registry(&["cpu", "gpu"]);
    let queue = Arc::new(TaskQueue::new(registry.names()));
    let executed = Arc::new(AtomicUsize::new(0));

    // Each root grows a chain that hops between lanes. At many points the
    // lanes are momentarily empty while a chain link is still in flight; a
    // premature quiescence call would strand the rest of that chain.
    for i in 0..ROOTS {
        queue
            .enqueue(Box::new(ChainTask {
                lane: if i % 2 == 0 { "cpu" } else { "gpu" }.to_string(),
                depth: DEPTH,
                executed: Arc::clone(&executed),
            }))
            .unwrap();
    }

    let mut scheduler = Scheduler::new(test_config(3, dir.path()), Arc::clone(&queue));
    scheduler
        .start(&registry, |_| vec!["cpu".to_string(), "gpu".to_string()])
        .unwrap();
    assert!(scheduler.wait());

    assert_eq!(executed.load(Ordering::SeqCst), ROOTS * (DEPTH + 1));
    assert!(queue.is_quiescent());
}

// ============================================================================
// EXTERNAL STOP AND QUIT
// ============================================================================

#[test]
fn test_request_stop_interrupts_backlog() {
    const TASKS: usize = 200;

    let dir = tempfile::tempdir().unwrap();
    let registry = echo_registry(&["cpu"]);
    let queue = Arc::new(TaskQueue::new(registry.names()));
    let executed = Arc::new(AtomicUsize::new(0));

    for _ in 0..TASKS {
        queue
            .enqueue(Box::new(SlowTask {
                lane: "cpu".to_string(),
                executed: Arc::clone(&executed),
            }))
            .unwrap();
    }

    let mut scheduler = Scheduler::new(test_config(2, dir.path()), Arc::clone(&queue));
    scheduler
        .start(&registry, |_| vec!["cpu".to_string()])
        .unwrap();

    thread::sleep(Duration::from_millis(50));
    scheduler.request_stop();
    assert!(scheduler.wait());

    let done = executed.load(Ordering::SeqCst);
    assert!(done > 0, "some tasks should have run before the stop");
    assert!(done < TASKS, "stop should leave the backlog unfinished");
    assert_eq!(queue.in_flight_count(), 0, "current tasks ran to completion");
    assert_eq!(scheduler.state(), SchedulerState::Stopped);
}

#[test]
fn test_request_quit_cancels_running_task() {
    let dir = tempfile::tempdir().unwrap();
    let registry = echo_registry(&["cpu"]);
    let queue = Arc::new(TaskQueue::new(registry.names()));
    let started = Arc::new(AtomicBool::new(false));
    let cancelled = Arc::new(AtomicBool::new(false));

    queue
        .enqueue(Box::new(CancelProbeTask {
            started: Arc::clone(&started),
            cancelled: Arc::clone(&cancelled),
        }))
        .unwrap();

    let mut scheduler = Scheduler::new(test_config(1, dir.path()), Arc::clone(&queue));
    scheduler
        .start(&registry, |_| vec!["cpu".to_string()])
        .unwrap();

    let deadline = Instant::now() + Duration::from_secs(2);
    while !started.load(Ordering::SeqCst) && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
    assert!(started.load(Ordering::SeqCst));

    scheduler.request_quit();
    assert!(scheduler.wait());
    assert!(cancelled.load(Ordering::SeqCst));
}

// ============================================================================
// START VALIDATION
// ============================================================================

#[test]
fn test_start_twice_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let registry = echo_registry(&["cpu"]);
    let queue = Arc::new(TaskQueue::new(registry.names()));

    let mut scheduler = Scheduler::new(test_config(1, dir.path()), Arc::clone(&queue));
    scheduler
        .start(&registry, |_| vec!["cpu".to_string()])
        .unwrap();

    let err = scheduler
        .start(&registry, |_| vec!["cpu".to_string()])
        .unwrap_err();
    assert!(matches!(err, SchedulerError::InvalidConfig(_)));

    scheduler.request_stop();
    assert!(scheduler.wait());
}

#[test]
fn test_unknown_capability_in_assignment() {
    let dir = tempfile::tempdir().unwrap();
    let registry = echo_registry(&["cpu"]);
    let queue = Arc::new(TaskQueue::new(registry.names()));

    let mut scheduler = Scheduler::new(test_config(1, dir.path()), queue);
    let err = scheduler
        .start(&registry, |_| vec!["quantum".to_string()])
        .unwrap_err();
    assert!(matches!(err, SchedulerError::UnknownCapability(name) if name == "quantum"));
}
