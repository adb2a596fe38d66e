use crate::humanize::ByteSize;
use crate::task::{TaskOutcome, TaskResult};
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

/// Bookkeeping for one run, owned by the coordinating loop
///
/// `completed + skipped + failed + running + queued == total` holds after
/// every transition, and `running` never exceeds the pool's concurrency.
#[derive(Debug, Clone)]
pub struct PoolState {
    pub total: usize,
    pub queued: usize,
    pub running: usize,
    pub completed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub bytes: u64,
    started_at: Instant,
}

impl PoolState {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            queued: total,
            running: 0,
            completed: 0,
            skipped: 0,
            failed: 0,
            bytes: 0,
            started_at: Instant::now(),
        }
    }

    /// Move one task from queued to running
    pub fn launch(&mut self) {
        debug_assert!(self.queued > 0);
        self.queued -= 1;
        self.running += 1;
    }

    /// Move one task from running to its terminal bucket
    pub fn finish(&mut self, outcome: &TaskOutcome) {
        debug_assert!(self.running > 0);
        self.running -= 1;
        match outcome {
            TaskOutcome::Completed { bytes } => {
                self.completed += 1;
                self.bytes += bytes;
            }
            TaskOutcome::Skipped { .. } => self.skipped += 1,
            TaskOutcome::Failed(_) => self.failed += 1,
        }
    }

    pub fn started(&self) -> usize {
        self.total - self.queued
    }

    pub fn is_done(&self) -> bool {
        self.queued == 0 && self.running == 0
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn is_consistent(&self) -> bool {
        self.completed + self.skipped + self.failed + self.running + self.queued == self.total
    }
}

/// Aggregate outcome of a finished run
#[derive(Debug)]
pub struct RunSummary {
    pub total: usize,
    pub completed: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Bytes fetched by completed tasks
    pub bytes: u64,
    pub elapsed: Duration,
    /// Failed tasks in the order they finished
    pub failures: Vec<TaskResult>,
}

impl RunSummary {
    pub fn empty() -> Self {
        Self {
            total: 0,
            completed: 0,
            skipped: 0,
            failed: 0,
            bytes: 0,
            elapsed: Duration::ZERO,
            failures: Vec::new(),
        }
    }

    pub(crate) fn from_state(state: &PoolState, failures: Vec<TaskResult>) -> Self {
        Self {
            total: state.total,
            completed: state.completed,
            skipped: state.skipped,
            failed: state.failed,
            bytes: state.bytes,
            elapsed: state.elapsed(),
            failures,
        }
    }

    pub fn is_success(&self) -> bool {
        self.failed == 0
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} tasks: {} completed, {} skipped, {} failed ({} in {:.1}s)",
            self.total,
            self.completed,
            self.skipped,
            self.failed,
            ByteSize(self.bytes),
            self.elapsed.as_secs_f64()
        )
    }
}

/// How a call to `Orchestrator::run` ended
#[derive(Debug)]
pub enum RunOutcome {
    /// The operator declined the confirmation prompt; nothing was started
    Declined,
    Finished(RunSummary),
}

impl RunOutcome {
    pub fn summary(&self) -> Option<&RunSummary> {
        match self {
            RunOutcome::Declined => None,
            RunOutcome::Finished(summary) => Some(summary),
        }
    }
}
