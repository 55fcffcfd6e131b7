//! Generic poll loop shared by every long-running role.
//!
//! ```text
//! POLL -> PULL -> DIFF_AGAINST_CHECKPOINT -> no work  -> SLEEP -> POLL
//!                                         -> new work -> PROCESS_EACH (checkpoint each) -> POLL
//! ```
//!
//! The builder-done signal is sampled at the top of a cycle, before pulling,
//! so the cycle that observes it also drains everything published before it.

use std::time::Duration;

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::io::clock::Sleeper;
use crate::io::sentinel::DoneSignal;

/// Extra drain passes allowed after the done signal when items keep failing.
const MAX_DRAIN_PASSES: u32 = 3;

/// One role's view of the shared state.
pub trait PollWorker {
    type Item;

    /// Bring the working tree up to date. Must not fail the loop.
    fn refresh(&mut self);

    /// Work not yet covered by this role's checkpoint, in processing order.
    fn pending(&mut self) -> Result<Vec<Self::Item>>;

    /// Do one unit of work and checkpoint it before returning `Ok`.
    fn process(&mut self, item: &Self::Item) -> Result<()>;

    fn describe(&self, item: &Self::Item) -> String;

    /// A worker that decides on its own that it is done (the builder).
    fn finished(&self) -> bool {
        false
    }
}

/// Done signal for workers that never wait on another role.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverDone;

impl DoneSignal for NeverDone {
    fn is_done(&self) -> bool {
        false
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopSettings {
    pub interval: Duration,
    /// Stop after this many cycles (`--once` is `Some(1)`).
    pub max_cycles: Option<u32>,
}

/// Reason why `run_poll_loop` stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopStop {
    /// The builder finished and the final drain pass completed.
    Drained,
    /// The worker reported it was finished.
    WorkerFinished,
    MaxCycles,
}

/// Summary of a loop invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopOutcome {
    pub cycles: u32,
    pub processed: u32,
    pub failed: u32,
    pub stop: LoopStop,
}

#[derive(Debug, Default)]
struct CycleResult {
    found: usize,
    processed: u32,
    failed: u32,
}

/// Poll until the builder is done (then drain), the worker finishes, or the
/// cycle limit is reached.
///
/// Processing errors are logged and retried on a later cycle; they never end
/// the loop. A failed item stops the rest of its batch so checkpoints keep
/// their order.
pub fn run_poll_loop<W, D, S>(
    worker: &mut W,
    done: &D,
    sleeper: &S,
    settings: &LoopSettings,
) -> Result<LoopOutcome>
where
    W: PollWorker,
    D: DoneSignal + ?Sized,
    S: Sleeper + ?Sized,
{
    let mut outcome = LoopOutcome {
        cycles: 0,
        processed: 0,
        failed: 0,
        stop: LoopStop::MaxCycles,
    };
    let mut drain_passes = 0u32;

    loop {
        let builder_done = done.is_done();
        let cycle = run_cycle(worker);
        outcome.cycles += 1;
        outcome.processed += cycle.processed;
        outcome.failed += cycle.failed;

        if worker.finished() {
            info!(cycles = outcome.cycles, "worker finished");
            outcome.stop = LoopStop::WorkerFinished;
            return Ok(outcome);
        }
        if builder_done {
            drain_passes += 1;
            if cycle.failed == 0 || drain_passes >= MAX_DRAIN_PASSES {
                if cycle.failed > 0 {
                    warn!(failed = cycle.failed, "giving up on items after final drain");
                }
                info!(
                    cycles = outcome.cycles,
                    processed = outcome.processed,
                    "builder done, drained"
                );
                outcome.stop = LoopStop::Drained;
                return Ok(outcome);
            }
        }
        if settings
            .max_cycles
            .is_some_and(|max| outcome.cycles >= max)
        {
            outcome.stop = LoopStop::MaxCycles;
            return Ok(outcome);
        }
        if cycle.found == 0 || cycle.failed > 0 {
            sleeper.sleep(settings.interval);
        }
    }
}

fn run_cycle<W: PollWorker>(worker: &mut W) -> CycleResult {
    worker.refresh();
    let items = match worker.pending() {
        Ok(items) => items,
        Err(err) => {
            warn!(err = %format!("{err:#}"), "failed to list pending work");
            return CycleResult {
                failed: 1,
                ..CycleResult::default()
            };
        }
    };
    let mut result = CycleResult {
        found: items.len(),
        ..CycleResult::default()
    };
    if items.is_empty() {
        debug!("no new work");
        return result;
    }
    for item in &items {
        let label = worker.describe(item);
        match worker.process(item) {
            Ok(()) => {
                info!(item = %label, "processed");
                result.processed += 1;
            }
            Err(err) => {
                warn!(item = %label, err = %format!("{err:#}"), "processing failed, will retry");
                result.failed += 1;
                break;
            }
        }
    }
    result
}
