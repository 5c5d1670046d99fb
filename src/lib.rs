//! # Taskmill
//!
//! A heterogeneous-resource task scheduler: a pool of worker threads pulls
//! units of work from per-capability FIFO lanes, executes them against a named
//! hardware capability (a CPU-bound routine, a GPU-resident ML model, ...),
//! and lets execution enqueue follow-on work, forming a runtime-built
//! processing pipeline (split-video -> detect-object -> read-text -> persist).
//!
//! ## Core Problem Solved
//!
//! Pipelines over heterogeneous hardware have two awkward properties:
//!
//! - **Expensive capability transitions**: loading an ML model takes seconds
//!   and gigabytes; a worker must amortize that cost across the densest
//!   backlog rather than pay it per task.
//! - **Dynamic fan-out**: a task discovers its downstream work while running,
//!   so "the queues are empty" is not the same as "the pipeline is done".
//!
//! Taskmill answers both with per-capability lanes plus an in-flight set
//! whose combination is a sound quiescence signal, and a worker loop that
//! re-selects its hosted capability by queue pressure only when idle.
//!
//! ## Key Pieces
//!
//! - [`core::TaskQueue`]: per-capability FIFO lanes, in-flight tracking,
//!   change notifications.
//! - [`core::Worker`]: the execution loop with load/unload switching.
//! - [`core::Scheduler`]: owns the pool, monitors for quiescence,
//!   coordinates stop/quit.
//! - [`core::Registry`]: name-keyed factories for capabilities and tasks.
//! - [`sink::LogSink`]: per-worker leveled text sink with an optional named
//!   pipe that native libraries can write diagnostics into.
//! - [`status::StatusReporter`]: read-only lane/in-flight table for a
//!   terminal.
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use taskmill::config::Config;
//! use taskmill::core::{Scheduler, TaskQueue};
//!
//! let registry = build_registry(); // register capabilities by name
//! let queue = Arc::new(TaskQueue::new(registry.names()));
//! queue.enqueue(Box::new(SeedTask::new("video.mp4")))?;
//!
//! let mut scheduler = Scheduler::new(Config::default(), Arc::clone(&queue));
//! scheduler.start(&registry, |_worker| registry.names())?;
//! scheduler.wait(); // returns once the pipeline is quiescent
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

/// Core scheduling: queue, worker, scheduler, contracts, registry.
pub mod core;
/// Configuration model and loading.
pub mod config;
/// Collaborator-facing leveled log sink with external-pipe merging.
pub mod sink;
/// Read-only terminal status surface over queue snapshots.
pub mod status;
/// Shared utilities.
pub mod util;
