//! Bootstrap: read configuration, register capabilities, seed work, run the
//! scheduler to quiescence, tear down.
//!
//! The shipped workload is synthetic (a batch of CPU-burn tasks that fan out
//! checksum tasks); real deployments register their own capabilities and
//! seed tasks here.

use std::any::Any;
use std::sync::Arc;

use taskmill::config::Config;
use taskmill::core::{
    AppResult, Capability, CapabilityRegistry, Scheduler, Task, TaskContext, TaskQueue,
};
use taskmill::sink::LogSink;
use taskmill::status::StatusReporter;
use taskmill::util::init_tracing;

const CPU_LANE: &str = "cpu";
const SEED_TASKS: usize = 64;

/// Stateless pass-through capability: CPU tasks carry their own logic.
struct CpuCapability {
    name: String,
}

impl Capability for CpuCapability {
    fn type_name(&self) -> &str {
        &self.name
    }

    fn load(&mut self, log: &LogSink) -> AppResult<()> {
        log.info("cpu capability ready");
        Ok(())
    }

    fn process(&mut self, task: &mut dyn Task, ctx: &mut TaskContext<'_>) -> AppResult<()> {
        task.run(ctx)
    }

    fn unload(&mut self, log: &LogSink) {
        log.info("cpu capability released");
    }
}

/// Synthetic CPU work: burn some arithmetic, then spawn one checksum task.
struct BurnTask {
    rounds: u64,
}

impl Task for BurnTask {
    fn capability(&self) -> &str {
        CPU_LANE
    }

    fn run(&mut self, ctx: &mut TaskContext<'_>) -> AppResult<()> {
        let mut acc: u64 = 0;
        for round in 0..self.rounds {
            acc = acc.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(round);
            if round % 10_000 == 0 && ctx.cancelled() {
                ctx.log().warn("burn task cancelled");
                return Ok(());
            }
        }
        ctx.spawn(Box::new(ChecksumTask { input: acc }))?;
        Ok(())
    }

    fn finish(&mut self, log: &LogSink) {
        log.info("burn task complete");
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Downstream of [`BurnTask`]: folds the burn result into a digest line.
struct ChecksumTask {
    input: u64,
}

impl Task for ChecksumTask {
    fn capability(&self) -> &str {
        CPU_LANE
    }

    fn run(&mut self, ctx: &mut TaskContext<'_>) -> AppResult<()> {
        let digest = self.input.rotate_left(17) ^ 0xa5a5_a5a5_a5a5_a5a5;
        ctx.log().info(format!("checksum {digest:016x}"));
        Ok(())
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = match std::env::args().nth(1) {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    }
    .apply_env_overrides()?;

    let mut registry = CapabilityRegistry::new();
    registry.register(CPU_LANE, |name| {
        Box::new(CpuCapability {
            name: name.to_string(),
        }) as Box<dyn Capability>
    });

    let queue = Arc::new(TaskQueue::new(registry.names()));
    for i in 0..SEED_TASKS {
        queue.enqueue(Box::new(BurnTask {
            rounds: 100_000 + (i as u64) * 1_000,
        }))?;
    }

    let reporter = StatusReporter::start(Arc::clone(&queue), std::io::stdout())?;

    let mut scheduler = Scheduler::new(config, Arc::clone(&queue));
    let lanes = registry.names();
    scheduler.start(&registry, move |_worker| lanes.clone())?;

    let clean = scheduler.wait();
    reporter.stop();

    if clean {
        Ok(())
    } else {
        anyhow::bail!("shutdown was not clean")
    }
}
