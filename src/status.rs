//! Read-only status surface: a periodically refreshed lane/in-flight table.
//!
//! Consumes only queue snapshots (`lane_counts`, `in_flight_count`), so it
//! never blocks producers or consumers. Refreshes are driven by queue change
//! notifications collapsed through a bounded channel, with a minimum
//! interval so bursts of mutations render once.

use std::collections::BTreeMap;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::bounded;
use tracing::warn;

use crate::core::queue::TaskQueue;

/// Minimum gap between two renders.
const REFRESH_INTERVAL: Duration = Duration::from_millis(100);

/// Render a snapshot as a fixed-width text table. Lanes are sorted for a
/// stable layout.
#[must_use]
pub fn render_table(counts: &BTreeMap<String, usize>, in_flight: usize) -> String {
    let name_width = counts
        .keys()
        .map(String::len)
        .chain(std::iter::once("in progress".len()))
        .max()
        .unwrap_or(0);

    let mut out = String::new();
    out.push_str("task queue\n");
    for (lane, count) in counts {
        out.push_str(&format!("  {lane:<name_width$}  {count}\n"));
    }
    out.push_str(&format!("  {:<name_width$}  {in_flight}\n", "in progress"));
    out
}

/// Background reporter writing the status table to any sink (stdout, a
/// file) whenever the queue changes.
pub struct StatusReporter {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl StatusReporter {
    /// Start the reporter thread.
    ///
    /// # Errors
    ///
    /// Propagates the thread-spawn failure.
    pub fn start(
        queue: Arc<TaskQueue>,
        mut out: impl Write + Send + 'static,
    ) -> std::io::Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);

        let thread = std::thread::Builder::new()
            .name("mill-status".to_string())
            .spawn(move || {
                let (tx, rx) = bounded::<()>(1);
                let subscription = queue.subscribe(move || {
                    let _ = tx.try_send(());
                });

                let mut last_render: Option<Instant> = None;
                loop {
                    if stop_flag.load(Ordering::Acquire) {
                        break;
                    }
                    let _ = rx.recv_timeout(REFRESH_INTERVAL);
                    if stop_flag.load(Ordering::Acquire) {
                        break;
                    }
                    // coalesce notification bursts into one render per interval
                    if last_render.is_some_and(|t| t.elapsed() < REFRESH_INTERVAL) {
                        continue;
                    }

                    let counts: BTreeMap<String, usize> =
                        queue.lane_counts().into_iter().collect();
                    let in_flight = queue.in_flight_count();
                    let table = render_table(&counts, in_flight);
                    if out.write_all(table.as_bytes()).and_then(|()| out.flush()).is_err() {
                        warn!("status output closed, reporter exiting");
                        break;
                    }
                    last_render = Some(Instant::now());
                }

                queue.unsubscribe(subscription);
            })?;

        Ok(Self {
            stop,
            thread: Some(thread),
        })
    }

    /// Stop and join the reporter thread.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for StatusReporter {
    fn drop(&mut self) {
        self.shutdown();
    }
}
