//! Concurrent task queue: per-capability FIFO lanes, in-flight tracking,
//! and change notification.
//!
//! # Locking
//!
//! Each lane has its own mutex guarding its FIFO, so unrelated capabilities
//! make independent progress; the in-flight set has one separate lock,
//! contended by all workers on claim/finish (acceptable: both critical
//! sections are O(1)). Lock order is lane before in-flight, never the
//! reverse.
//!
//! # Quiescence
//!
//! "every lane empty AND in-flight count zero" is a stable true-quiescence
//! signal because (a) a claim moves a task into the in-flight set *before*
//! it leaves its lane, both under the lane lock, so the union never
//! transiently drops a live task, and (b) a task enqueues all of its spawned
//! descendants synchronously before the queue records it as finished, so no
//! task can be "about to spawn" while the in-flight count reads zero.
//! [`TaskQueue::is_quiescent`] encodes the resulting check order.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::trace;

use crate::core::error::SchedulerError;
use crate::core::task::{BoxedTask, TaskId};
use crate::util::callback::{CallbackHub, SubscriptionId};

/// A task claimed from a lane, owned by the claiming worker until it calls
/// [`TaskQueue::mark_finished`].
pub struct ClaimedTask {
    /// Queue-assigned identity, keyed into the in-flight set.
    pub id: TaskId,
    /// The unit of work itself.
    pub task: BoxedTask,
}

/// One per-capability FIFO of unclaimed tasks.
struct Lane {
    tasks: Mutex<VecDeque<(TaskId, BoxedTask)>>,
    available: Condvar,
    callbacks: CallbackHub,
}

impl Lane {
    fn new() -> Self {
        Self {
            tasks: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
            callbacks: CallbackHub::new(),
        }
    }
}

/// The concurrent task queue. One FIFO lane exists per capability name known
/// at construction; tasks tagged with any other name are rejected at the
/// boundary.
pub struct TaskQueue {
    /// Immutable after construction, so lookups need no outer lock.
    lanes: HashMap<String, Lane>,
    in_flight: Mutex<HashSet<TaskId>>,
    next_id: AtomicU64,
    callbacks: CallbackHub,
}

impl TaskQueue {
    /// Build a queue with one lane per capability name.
    #[must_use]
    pub fn new(capability_names: impl IntoIterator<Item = String>) -> Self {
        let lanes = capability_names
            .into_iter()
            .map(|name| (name, Lane::new()))
            .collect();
        Self {
            lanes,
            in_flight: Mutex::new(HashSet::new()),
            next_id: AtomicU64::new(0),
            callbacks: CallbackHub::new(),
        }
    }

    fn lane(&self, capability: &str) -> Result<&Lane, SchedulerError> {
        self.lanes
            .get(capability)
            .ok_or_else(|| SchedulerError::UnknownCapability(capability.to_string()))
    }

    /// Append a task to the lane matching its capability name and wake any
    /// worker blocked on that lane.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::UnknownCapability`] when no lane matches.
    pub fn enqueue(&self, task: BoxedTask) -> Result<TaskId, SchedulerError> {
        let lane = self.lane(task.capability())?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        {
            let mut tasks = lane.tasks.lock();
            tasks.push_back((id, task));
            lane.available.notify_all();
        }
        trace!(task_id = id, "task enqueued");

        lane.callbacks.call();
        self.callbacks.call();
        Ok(id)
    }

    /// Remove and return the head of the named lane, moving it into the
    /// in-flight set. Non-blocking; returns `Ok(None)` when the lane is
    /// empty. Callers that need to block layer [`TaskQueue::wait_for_work`]
    /// on top, re-checking their stop condition on every wake.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::UnknownCapability`] when no lane matches.
    pub fn claim_next(&self, capability: &str) -> Result<Option<ClaimedTask>, SchedulerError> {
        let lane = self.lane(capability)?;

        let claimed = {
            let mut tasks = lane.tasks.lock();
            let next_id = tasks.front().map(|(id, _)| *id);
            next_id.and_then(|id| {
                // In-flight before the lane pop, while still holding the
                // lane lock: the drain monitor must never observe the task
                // in neither place.
                self.in_flight.lock().insert(id);
                tasks.pop_front().map(|(id, task)| ClaimedTask { id, task })
            })
        };

        if claimed.is_some() {
            self.callbacks.call();
        }
        Ok(claimed)
    }

    /// Block until the named lane is non-empty, `timeout` elapses, or the
    /// lane is nudged by [`TaskQueue::notify_all_lanes`]. Returns whether
    /// the lane had work when the wait ended. The wait is bounded so a
    /// caller re-checks its stop flag at least once per timeout slice.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::UnknownCapability`] when no lane matches.
    pub fn wait_for_work(
        &self,
        capability: &str,
        timeout: Duration,
    ) -> Result<bool, SchedulerError> {
        let lane = self.lane(capability)?;
        let mut tasks = lane.tasks.lock();
        if !tasks.is_empty() {
            return Ok(true);
        }
        let _ = lane.available.wait_for(&mut tasks, timeout);
        Ok(!tasks.is_empty())
    }

    /// Broadcast a wakeup on every lane. Used on stop so no worker is left
    /// parked on an empty lane.
    pub fn notify_all_lanes(&self) {
        for lane in self.lanes.values() {
            let _guard = lane.tasks.lock();
            lane.available.notify_all();
        }
    }

    /// Remove a task from the in-flight set. Silent no-op when the id is not
    /// present, so a double finish cannot corrupt the count.
    pub fn mark_finished(&self, id: TaskId) {
        let removed = self.in_flight.lock().remove(&id);
        if removed {
            trace!(task_id = id, "task finished");
            self.callbacks.call();
        }
    }

    /// Snapshot of unclaimed counts per lane.
    #[must_use]
    pub fn lane_counts(&self) -> HashMap<String, usize> {
        self.lanes
            .iter()
            .map(|(name, lane)| (name.clone(), lane.tasks.lock().len()))
            .collect()
    }

    /// Number of unclaimed tasks in one lane; zero for unknown names.
    #[must_use]
    pub fn lane_count(&self, capability: &str) -> usize {
        self.lanes
            .get(capability)
            .map_or(0, |lane| lane.tasks.lock().len())
    }

    /// Number of claimed-but-unfinished tasks.
    #[must_use]
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.lock().len()
    }

    /// True-quiescence check: in-flight first, lanes second. Only when the
    /// in-flight count reads zero is it safe to test lane counts and trust
    /// the combination (see the module docs).
    #[must_use]
    pub fn is_quiescent(&self) -> bool {
        if self.in_flight_count() != 0 {
            return false;
        }
        self.lanes
            .values()
            .all(|lane| lane.tasks.lock().is_empty())
    }

    /// Register a listener invoked after every mutating operation on any
    /// lane (enqueue, claim, finish).
    pub fn subscribe(&self, listener: impl Fn() + Send + 'static) -> SubscriptionId {
        self.callbacks.subscribe(listener)
    }

    /// Remove a global listener.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.callbacks.unsubscribe(id);
    }

    /// Register a listener invoked after every enqueue into one lane.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::UnknownCapability`] when no lane matches.
    pub fn subscribe_lane(
        &self,
        capability: &str,
        listener: impl Fn() + Send + 'static,
    ) -> Result<SubscriptionId, SchedulerError> {
        Ok(self.lane(capability)?.callbacks.subscribe(listener))
    }

    /// Remove a lane listener.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::UnknownCapability`] when no lane matches.
    pub fn unsubscribe_lane(
        &self,
        capability: &str,
        id: SubscriptionId,
    ) -> Result<(), SchedulerError> {
        self.lane(capability)?.callbacks.unsubscribe(id);
        Ok(())
    }

    /// Registered lane names, sorted.
    #[must_use]
    pub fn capability_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lanes.keys().cloned().collect();
        names.sort();
        names
    }
}
