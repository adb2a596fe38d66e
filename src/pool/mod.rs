//! Bounded-concurrency download pool
//!
//! [`Orchestrator::run`] takes an ordered list of tasks and executes them
//! through a [`TaskExecutor`](crate::executor::TaskExecutor) with at most
//! `concurrency` tasks in flight:
//!
//! 1. Optionally ask the operator to approve the run (declining starts nothing)
//! 2. Launch tasks in input order as slots free up, pausing `launch_delay`
//!    between launches so the server never sees a burst
//! 3. Collect each task's terminal state as it finishes, refreshing the
//!    progress line at least once per `progress_interval`
//! 4. Return a [`RunSummary`] once every task is completed, skipped or failed
//!
//! Failures stay local to their task under [`FailurePolicy::Isolate`]. Under
//! [`FailurePolicy::AbortOnFirstError`], and for errors that invalidate every
//! other task (a rejected session), the run is cancelled and in-flight tasks
//! are stopped before the error is returned.

mod confirm;
mod orchestrator;
mod progress;
mod state;

pub use confirm::{AutoConfirm, Confirm, StdinConfirm};
pub use orchestrator::Orchestrator;
pub use progress::{Progress, format_elapsed};
pub use state::{PoolState, RunOutcome, RunSummary};

use crate::task::TaskError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Smallest pause between two launches
pub const MIN_LAUNCH_DELAY: Duration = Duration::from_millis(200);

/// Longest allowed gap between two progress refreshes
pub const MAX_PROGRESS_INTERVAL: Duration = Duration::from_secs(1);

/// What to do when a task fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// Record the failure and keep going
    #[default]
    Isolate,
    /// Cancel the run on the first failed task
    #[serde(alias = "abort")]
    AbortOnFirstError,
}

/// Pool configuration
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub concurrency: usize,
    pub launch_delay: Duration,
    pub progress_interval: Duration,
    pub task_timeout: Option<Duration>,
    pub failure_policy: FailurePolicy,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            launch_delay: MIN_LAUNCH_DELAY,
            progress_interval: MAX_PROGRESS_INTERVAL,
            task_timeout: None,
            failure_policy: FailurePolicy::Isolate,
        }
    }
}

impl PoolConfig {
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    pub fn with_task_timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout = Some(timeout);
        self
    }

    pub(crate) fn effective_launch_delay(&self) -> Duration {
        self.launch_delay.max(MIN_LAUNCH_DELAY)
    }

    pub(crate) fn effective_progress_interval(&self) -> Duration {
        if self.progress_interval.is_zero() {
            MAX_PROGRESS_INTERVAL
        } else {
            self.progress_interval.min(MAX_PROGRESS_INTERVAL)
        }
    }
}

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("concurrency limit must be at least 1")]
    InvalidConcurrency,

    #[error("more than one task writes to {0}")]
    DuplicateDestination(PathBuf),

    #[error("confirmation prompt failed: {0}")]
    Prompt(#[from] std::io::Error),

    #[error("run aborted by task #{index} ({source_url}): {error}")]
    Aborted {
        index: usize,
        source_url: String,
        #[source]
        error: TaskError,
    },

    #[error("worker panicked: {0}")]
    WorkerPanicked(String),

    #[error("run cancelled")]
    Cancelled,
}
