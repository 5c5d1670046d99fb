//! The worker execution loop and its capability-switching policy.
//!
//! A worker owns the set of capability instances it is licensed to host and,
//! whenever it is idle between task claims, re-evaluates which one to host
//! from queue pressure: the lane with the most pending work wins, ties
//! favour the incumbent. Load/unload happens only at that switch point, so
//! the cost of acquiring a heavy resource (an ML model, say) is amortized
//! against the densest backlog rather than paid per task.

use std::collections::{HashMap, HashSet};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::core::capability::Capability;
use crate::core::error::SchedulerError;
use crate::core::queue::{ClaimedTask, TaskQueue};
use crate::core::task::{BoxedTask, TaskContext, TaskId};
use crate::sink::LogSink;

/// Upper bound on any single lane wait, so the stop flag is observed even if
/// a notification is missed and so the backlog shape is re-read regularly.
const WAIT_SLICE: Duration = Duration::from_millis(100);

/// What a worker does when a capability's `load` fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadRecovery {
    /// Exclude the failed capability and pick the next-best assignable one.
    /// The exclusion is cleared after the next successful load.
    #[default]
    Fallback,
    /// Keep retrying the same capability after a short delay.
    Retry,
    /// Exit the worker loop.
    Halt,
}

/// Flags shared between a worker thread and whoever controls it.
#[derive(Debug, Default)]
pub struct WorkerSignals {
    stop: AtomicBool,
    cancel: AtomicBool,
    idle: AtomicBool,
}

impl WorkerSignals {
    /// Stop after the current task; the worker never claims again.
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    /// Stop, and additionally ask the currently executing task to abort
    /// cooperatively via its cancellation flag.
    pub fn request_quit(&self) {
        self.cancel.store(true, Ordering::Release);
        self.stop.store(true, Ordering::Release);
    }

    /// Whether a stop has been requested.
    #[must_use]
    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    /// Whether the worker is between task claims.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.idle.load(Ordering::Acquire)
    }

    fn set_idle(&self, idle: bool) {
        self.idle.store(idle, Ordering::Release);
    }

    fn cancel_flag(&self) -> &AtomicBool {
        &self.cancel
    }
}

/// One worker: an ordered set of assignable capabilities, at most one of
/// them hosted (loaded) at a time, and a claim-execute-finish loop over the
/// hosted capability's lane.
pub struct Worker {
    id: usize,
    queue: Arc<TaskQueue>,
    capabilities: Vec<Box<dyn Capability>>,
    /// Lane names, in assignment order; index-aligned with `capabilities`.
    lane_names: Vec<String>,
    hosted: Option<usize>,
    signals: Arc<WorkerSignals>,
    log: LogSink,
    recovery: LoadRecovery,
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("id", &self.id)
            .field("lane_names", &self.lane_names)
            .field("hosted", &self.hosted)
            .field("signals", &self.signals)
            .field("recovery", &self.recovery)
            .finish_non_exhaustive()
    }
}

impl Worker {
    /// Build a worker over the given assignable capability instances.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::InvalidConfig`] when the set is empty.
    pub fn new(
        id: usize,
        queue: Arc<TaskQueue>,
        capabilities: Vec<Box<dyn Capability>>,
        log: LogSink,
        recovery: LoadRecovery,
    ) -> Result<Self, SchedulerError> {
        if capabilities.is_empty() {
            return Err(SchedulerError::InvalidConfig(format!(
                "worker {id} has no assignable capabilities"
            )));
        }
        let lane_names = capabilities
            .iter()
            .map(|c| c.type_name().to_string())
            .collect();
        let signals = Arc::new(WorkerSignals::default());
        signals.set_idle(true);
        Ok(Self {
            id,
            queue,
            capabilities,
            lane_names,
            hosted: None,
            signals,
            log,
            recovery,
        })
    }

    /// Shared control flags for this worker.
    #[must_use]
    pub fn signals(&self) -> Arc<WorkerSignals> {
        Arc::clone(&self.signals)
    }

    /// Spawn the run loop on its own named OS thread.
    ///
    /// # Errors
    ///
    /// Propagates the thread-spawn failure.
    pub fn spawn(self) -> std::io::Result<JoinHandle<()>> {
        std::thread::Builder::new()
            .name(format!("mill-worker-{}", self.id))
            .spawn(move || self.run())
    }

    /// Run until a stop is requested. Unloads the hosted capability before
    /// returning.
    pub fn run(mut self) {
        debug!(worker_id = self.id, "worker thread started");
        let mut unavailable: HashSet<usize> = HashSet::new();

        while !self.signals.stop_requested() {
            self.signals.set_idle(true);

            let counts = self.queue.lane_counts();
            let Some(target) =
                select_capability(&self.lane_names, &counts, self.hosted, &unavailable)
            else {
                // every assignable capability has a pending load fault
                if self.recovery == LoadRecovery::Halt {
                    error!(worker_id = self.id, "all assignable capabilities failed to load");
                    break;
                }
                unavailable.clear();
                std::thread::sleep(WAIT_SLICE);
                continue;
            };

            if self.hosted != Some(target) {
                match self.switch_to(target) {
                    Ok(()) => {
                        unavailable.clear();
                    }
                    Err(fault) => {
                        warn!(worker_id = self.id, error = %fault, "capability load fault");
                        self.log.error(fault.to_string());
                        match self.recovery {
                            LoadRecovery::Halt => break,
                            LoadRecovery::Retry => std::thread::sleep(WAIT_SLICE),
                            LoadRecovery::Fallback => {
                                unavailable.insert(target);
                            }
                        }
                        continue;
                    }
                }
            }

            let lane = &self.lane_names[target];
            match self.queue.claim_next(lane) {
                Ok(Some(claimed)) => {
                    self.signals.set_idle(false);
                    self.execute(claimed);
                }
                Ok(None) => {
                    // Blocked claim: wait for the lane to gain work, bounded
                    // so the stop flag is re-checked; on wake the backlog
                    // shape may have changed, so loop back to selection.
                    let _ = self.queue.wait_for_work(lane, WAIT_SLICE);
                }
                Err(e) => {
                    // Lanes come from the same registry as the capabilities,
                    // so this indicates a wiring bug; stop this worker.
                    error!(worker_id = self.id, error = %e, "claim failed");
                    break;
                }
            }
        }

        if let Some(idx) = self.hosted.take() {
            self.capabilities[idx].unload(&self.log);
        }
        debug!(worker_id = self.id, "worker thread exiting");
    }

    /// Unload the hosted capability (if any) and load the target. The only
    /// place load/unload ever happens.
    fn switch_to(&mut self, target: usize) -> Result<(), SchedulerError> {
        if let Some(old) = self.hosted.take() {
            info!(
                worker_id = self.id,
                from = %self.lane_names[old],
                to = %self.lane_names[target],
                "switching hosted capability"
            );
            self.capabilities[old].unload(&self.log);
        } else {
            info!(worker_id = self.id, to = %self.lane_names[target], "hosting capability");
        }

        self.capabilities[target]
            .load(&self.log)
            .map_err(|e| SchedulerError::CapabilityLoadFault {
                capability: self.lane_names[target].clone(),
                reason: format!("{e:#}"),
            })?;
        self.hosted = Some(target);
        Ok(())
    }

    /// Hand one claimed task to the hosted capability. Faults (errors and
    /// panics) are caught here, logged with the task's identity, and treated
    /// as the task finishing without descendants; no retry.
    fn execute(&mut self, claimed: ClaimedTask) {
        let ClaimedTask { id, mut task } = claimed;
        let Some(hosted) = self.hosted else {
            // Defensive: never process without a loaded capability.
            error!(worker_id = self.id, task_id = id, "claimed with no hosted capability");
            self.queue.mark_finished(id);
            return;
        };
        let lane = self.lane_names[hosted].clone();

        let queue = Arc::clone(&self.queue);
        let spawn = move |t: BoxedTask| -> Result<TaskId, SchedulerError> { queue.enqueue(t) };
        let mut ctx = TaskContext::new(&self.log, &spawn, self.signals.cancel_flag());

        debug!(worker_id = self.id, task_id = id, capability = %lane, "executing task");
        let capability = &mut self.capabilities[hosted];
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            capability.process(task.as_mut(), &mut ctx)
        }));

        match outcome {
            Ok(Ok(())) => {
                task.finish(&self.log);
            }
            Ok(Err(e)) => {
                warn!(
                    worker_id = self.id,
                    task_id = id,
                    capability = %lane,
                    error = %e,
                    "task execution fault"
                );
                self.log
                    .error(format!("task {id} on `{lane}` failed: {e:#}"));
                task.finish(&self.log);
            }
            Err(_) => {
                error!(worker_id = self.id, task_id = id, capability = %lane, "task panicked");
                self.log.error(format!("task {id} on `{lane}` panicked"));
            }
        }

        // Descendants spawned during execution are already visible in their
        // lanes; only now does the task leave the in-flight set.
        self.queue.mark_finished(id);
    }
}

/// Pick which capability a worker should host given the current backlog.
///
/// Keep the incumbent while its lane has pending work; otherwise take the
/// assignable lane with the most pending work, ties broken by keeping the
/// incumbent, else by assignment order. `None` only when every index is in
/// `unavailable`.
fn select_capability(
    lane_names: &[String],
    counts: &HashMap<String, usize>,
    hosted: Option<usize>,
    unavailable: &HashSet<usize>,
) -> Option<usize> {
    let count_of = |i: usize| counts.get(&lane_names[i]).copied().unwrap_or(0);
    let live = |i: usize| !unavailable.contains(&i);

    if let Some(h) = hosted {
        if live(h) && count_of(h) > 0 {
            return Some(h);
        }
    }

    let mut best: Option<(usize, usize)> = None;
    for i in 0..lane_names.len() {
        if !live(i) {
            continue;
        }
        let c = count_of(i);
        if best.is_none_or(|(_, bc)| c > bc) {
            best = Some((i, c));
        }
    }
    let (idx, best_count) = best?;

    if let Some(h) = hosted {
        if live(h) && count_of(h) == best_count {
            return Some(h);
        }
    }
    Some(idx)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counts(pairs: &[(&str, usize)]) -> HashMap<String, usize> {
        pairs.iter().map(|(n, c)| (n.to_string(), *c)).collect()
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_select_prefers_densest_lane() {
        let lanes = names(&["cpu", "detect", "ocr"]);
        let c = counts(&[("cpu", 1), ("detect", 5), ("ocr", 2)]);
        assert_eq!(
            select_capability(&lanes, &c, None, &HashSet::new()),
            Some(1)
        );
    }

    #[test]
    fn test_select_keeps_incumbent_with_pending_work() {
        let lanes = names(&["cpu", "detect"]);
        // detect is denser, but the hosted cpu lane still has work
        let c = counts(&[("cpu", 1), ("detect", 5)]);
        assert_eq!(
            select_capability(&lanes, &c, Some(0), &HashSet::new()),
            Some(0)
        );
    }

    #[test]
    fn test_select_switches_once_incumbent_drains() {
        let lanes = names(&["cpu", "detect"]);
        let c = counts(&[("cpu", 0), ("detect", 3)]);
        assert_eq!(
            select_capability(&lanes, &c, Some(0), &HashSet::new()),
            Some(1)
        );
    }

    #[test]
    fn test_select_tie_favours_incumbent() {
        let lanes = names(&["cpu", "detect"]);
        let c = counts(&[("cpu", 0), ("detect", 0)]);
        assert_eq!(
            select_capability(&lanes, &c, Some(1), &HashSet::new()),
            Some(1)
        );
        // with no incumbent, ties resolve by assignment order
        assert_eq!(
            select_capability(&lanes, &c, None, &HashSet::new()),
            Some(0)
        );
    }

    #[test]
    fn test_select_skips_unavailable() {
        let lanes = names(&["cpu", "detect"]);
        let c = counts(&[("cpu", 1), ("detect", 9)]);
        let dead: HashSet<usize> = [1].into_iter().collect();
        assert_eq!(select_capability(&lanes, &c, None, &dead), Some(0));

        let all_dead: HashSet<usize> = [0, 1].into_iter().collect();
        assert_eq!(select_capability(&lanes, &c, None, &all_dead), None);
    }
}
