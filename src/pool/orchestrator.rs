use super::confirm::{Confirm, StdinConfirm};
use super::progress::Progress;
use super::state::{PoolState, RunOutcome, RunSummary};
use super::{FailurePolicy, PoolConfig, PoolError};
use crate::executor::TaskExecutor;
use crate::task::{Task, TaskError, TaskOutcome, TaskResult};
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};

const CANCEL_GRACE: Duration = Duration::from_secs(2);

/// Runs task lists through an executor with bounded concurrency
pub struct Orchestrator {
    executor: Arc<dyn TaskExecutor>,
    config: PoolConfig,
    confirm: Arc<dyn Confirm>,
    progress: Mutex<Progress>,
}

impl Orchestrator {
    /// Orchestrator prompting on stdin and drawing progress on stderr
    pub fn new(executor: Arc<dyn TaskExecutor>, config: PoolConfig) -> Self {
        Self {
            executor,
            config,
            confirm: Arc::new(StdinConfirm),
            progress: Mutex::new(Progress::stderr()),
        }
    }

    pub fn with_confirm(mut self, confirm: impl Confirm + 'static) -> Self {
        self.confirm = Arc::new(confirm);
        self
    }

    pub fn with_progress(mut self, progress: Progress) -> Self {
        self.progress = Mutex::new(progress);
        self
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Execute every task once, at most `concurrency` at a time
    ///
    /// With `confirm` set the operator is asked first; declining returns
    /// [`RunOutcome::Declined`] without touching the executor.
    pub async fn run(
        &self,
        tasks: Vec<Task>,
        label: &str,
        confirm: bool,
    ) -> Result<RunOutcome, PoolError> {
        self.run_until_cancelled(tasks, label, confirm, CancellationToken::new())
            .await
    }

    /// Like [`run`](Self::run), stopping early with [`PoolError::Cancelled`]
    /// once `cancel` fires
    pub async fn run_until_cancelled(
        &self,
        tasks: Vec<Task>,
        label: &str,
        confirm: bool,
        cancel: CancellationToken,
    ) -> Result<RunOutcome, PoolError> {
        if self.config.concurrency == 0 {
            return Err(PoolError::InvalidConcurrency);
        }
        check_destinations(&tasks)?;

        if tasks.is_empty() {
            debug!(label, "No tasks to run");
            return Ok(RunOutcome::Finished(RunSummary::empty()));
        }

        if confirm && !self.ask(tasks.len()).await? {
            info!(label, total = tasks.len(), "Run declined by operator");
            return Ok(RunOutcome::Declined);
        }

        let span = info_span!(
            "pool_run",
            label,
            total = tasks.len(),
            concurrency = self.config.concurrency
        );
        let summary = self.drive(tasks, label, cancel).instrument(span).await?;
        Ok(RunOutcome::Finished(summary))
    }

    async fn ask(&self, count: usize) -> Result<bool, PoolError> {
        let confirm = Arc::clone(&self.confirm);
        let question = format!("Download these {count} files?");
        let answer = tokio::task::spawn_blocking(move || confirm.confirm(&question))
            .await
            .map_err(|e| PoolError::WorkerPanicked(e.to_string()))??;
        Ok(answer)
    }

    async fn drive(
        &self,
        tasks: Vec<Task>,
        label: &str,
        cancel: CancellationToken,
    ) -> Result<RunSummary, PoolError> {
        let concurrency = self.config.concurrency;
        let launch_delay = self.config.effective_launch_delay();
        let run_token = cancel.child_token();

        let mut state = PoolState::new(tasks.len());
        let mut pending: VecDeque<(usize, Task)> = tasks.into_iter().enumerate().collect();
        let mut workers: JoinSet<TaskResult> = JoinSet::new();
        let mut failures = Vec::new();

        let mut ticker = tokio::time::interval(self.config.effective_progress_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut next_launch = Instant::now();

        self.render(|progress| progress.header(label));
        info!(total = state.total, "Run started");

        while !state.is_done() {
            let can_launch = state.running < concurrency && !pending.is_empty();

            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    warn!(running = state.running, queued = state.queued, "Run cancelled");
                    stop(&run_token, &mut workers).await;
                    self.render(|progress| progress.finish(&state, concurrency));
                    return Err(PoolError::Cancelled);
                }

                Some(joined) = workers.join_next(), if !workers.is_empty() => {
                    let result = match joined {
                        Ok(result) => result,
                        Err(e) => {
                            stop(&run_token, &mut workers).await;
                            self.render(|progress| progress.finish(&state, concurrency));
                            return Err(PoolError::WorkerPanicked(e.to_string()));
                        }
                    };

                    state.finish(&result.outcome);
                    debug_assert!(state.is_consistent());
                    debug!(index = result.index, url = %result.task.source, outcome = %result.outcome, "Task finished");

                    if let TaskOutcome::Failed(err) = &result.outcome {
                        warn!(index = result.index, url = %result.task.source, error = %err, "Task failed");
                        if err.is_fatal() || self.config.failure_policy == FailurePolicy::AbortOnFirstError {
                            stop(&run_token, &mut workers).await;
                            self.render(|progress| progress.finish(&state, concurrency));
                            return Err(abort_error(result));
                        }
                        failures.push(result);
                    }
                }

                _ = ticker.tick() => {
                    self.render(|progress| progress.update(&state, concurrency));
                }

                _ = tokio::time::sleep_until(next_launch), if can_launch => {
                    if let Some((index, task)) = pending.pop_front() {
                        state.launch();
                        debug!(index, url = %task.source, running = state.running, "Task launched");
                        workers.spawn(execute_one(
                            Arc::clone(&self.executor),
                            index,
                            task,
                            run_token.child_token(),
                            self.config.task_timeout,
                        ));
                        next_launch = Instant::now() + launch_delay;
                    }
                }
            }
        }

        self.render(|progress| progress.finish(&state, concurrency));
        let summary = RunSummary::from_state(&state, failures);
        info!(
            completed = summary.completed,
            skipped = summary.skipped,
            failed = summary.failed,
            elapsed_ms = summary.elapsed.as_millis() as u64,
            "Run finished"
        );
        Ok(summary)
    }

    fn render(&self, draw: impl FnOnce(&mut Progress)) {
        match self.progress.lock() {
            Ok(mut progress) => draw(&mut progress),
            Err(poisoned) => draw(&mut poisoned.into_inner()),
        }
    }
}

async fn execute_one(
    executor: Arc<dyn TaskExecutor>,
    index: usize,
    task: Task,
    cancel: CancellationToken,
    timeout: Option<Duration>,
) -> TaskResult {
    let attempt = executor.execute(&task, &cancel);
    let result = match timeout {
        Some(limit) => tokio::time::timeout(limit, attempt)
            .await
            .unwrap_or(Err(TaskError::TimedOut(limit))),
        None => attempt.await,
    };

    TaskResult {
        index,
        task,
        outcome: result.into(),
    }
}

/// Signal in-flight tasks to stop, give them `CANCEL_GRACE` to clean up,
/// then abort whatever is left
async fn stop(token: &CancellationToken, workers: &mut JoinSet<TaskResult>) {
    token.cancel();
    let drained = tokio::time::timeout(CANCEL_GRACE, async {
        while workers.join_next().await.is_some() {}
    })
    .await;
    if drained.is_err() {
        warn!(remaining = workers.len(), "Workers ignored cancellation, aborting");
        workers.shutdown().await;
    }
}

fn abort_error(result: TaskResult) -> PoolError {
    let TaskResult { index, task, outcome } = result;
    let error = match outcome {
        TaskOutcome::Failed(err) => err,
        _ => TaskError::Cancelled,
    };
    PoolError::Aborted {
        index,
        source_url: task.source,
        error,
    }
}

fn check_destinations(tasks: &[Task]) -> Result<(), PoolError> {
    let mut seen = HashSet::with_capacity(tasks.len());
    for task in tasks {
        if !seen.insert(task.destination.as_path()) {
            return Err(PoolError::DuplicateDestination(task.destination.clone()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::AutoConfirm;
    use crate::task::Transfer;
    use async_trait::async_trait;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Sleeps for a fixed time, tracking how many calls overlap
    #[derive(Default)]
    struct SleepyExecutor {
        delay: Duration,
        calls: AtomicUsize,
        active: AtomicUsize,
        peak: AtomicUsize,
        order: Mutex<Vec<String>>,
        fail_on: Option<&'static str>,
        unauthorized_on: Option<&'static str>,
        cancelled: AtomicUsize,
    }

    impl SleepyExecutor {
        fn new(delay: Duration) -> Self {
            Self {
                delay,
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl TaskExecutor for SleepyExecutor {
        async fn execute(
            &self,
            task: &Task,
            cancel: &CancellationToken,
        ) -> Result<Transfer, TaskError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.order.lock().unwrap().push(task.source.clone());
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);

            let finished = tokio::select! {
                _ = tokio::time::sleep(self.delay) => true,
                _ = cancel.cancelled() => false,
            };
            self.active.fetch_sub(1, Ordering::SeqCst);

            if !finished {
                self.cancelled.fetch_add(1, Ordering::SeqCst);
                return Err(TaskError::Cancelled);
            }
            if self.unauthorized_on == Some(task.source.as_str()) {
                return Err(TaskError::Unauthorized {
                    url: task.source.clone(),
                    status: 401,
                });
            }
            if self.fail_on == Some(task.source.as_str()) {
                return Err(TaskError::SizeMismatch {
                    path: task.destination.clone(),
                    expected: 10,
                    actual: 3,
                });
            }
            Ok(Transfer::Fetched { bytes: 10 })
        }
    }

    fn tasks(count: usize) -> Vec<Task> {
        (0..count)
            .map(|i| Task::new(format!("task-{i}"), PathBuf::from(format!("/out/{i}.tif"))))
            .collect()
    }

    fn orchestrator(executor: Arc<SleepyExecutor>, config: PoolConfig) -> Orchestrator {
        Orchestrator::new(executor, config)
            .with_confirm(AutoConfirm(true))
            .with_progress(Progress::hidden())
    }

    fn finished(outcome: RunOutcome) -> RunSummary {
        match outcome {
            RunOutcome::Finished(summary) => summary,
            RunOutcome::Declined => panic!("run was declined"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_seven_tasks_three_slots_take_three_rounds() {
        let executor = Arc::new(SleepyExecutor::new(Duration::from_secs(1)));
        let pool = orchestrator(executor.clone(), PoolConfig::default().with_concurrency(3));

        let started = Instant::now();
        let summary = finished(pool.run(tasks(7), "test", false).await.unwrap());
        let elapsed = started.elapsed();

        assert_eq!(summary.completed, 7);
        assert_eq!(summary.failed, 0);
        assert_eq!(summary.skipped, 0);
        assert_eq!(summary.bytes, 70);
        assert!(elapsed >= Duration::from_millis(2900), "elapsed {elapsed:?}");
        assert!(elapsed < Duration::from_millis(3600), "elapsed {elapsed:?}");
        assert_eq!(executor.peak.load(Ordering::SeqCst), 3);
    }

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_progress_refreshes_every_second_while_busy() {
        let executor = Arc::new(SleepyExecutor::new(Duration::from_secs(1)));
        let buf = SharedBuf::default();
        let pool = Orchestrator::new(executor, PoolConfig::default().with_concurrency(1))
            .with_confirm(AutoConfirm(true))
            .with_progress(Progress::to_writer(buf.clone()));

        let started = Instant::now();
        let summary = finished(pool.run(tasks(3), "progress", false).await.unwrap());
        let elapsed = started.elapsed();
        assert_eq!(summary.completed, 3);
        assert!(elapsed >= Duration::from_secs(3), "elapsed {elapsed:?}");

        let text = String::from_utf8(buf.0.lock().unwrap().clone()).unwrap();
        let counts: Vec<usize> = text
            .split('\r')
            .skip(1)
            .filter_map(|line| line.split("started").nth(1)?.split_whitespace().next()?.parse().ok())
            .collect();

        let min_updates = elapsed.as_secs() as usize;
        assert!(counts.len() >= min_updates, "{} updates in {elapsed:?}", counts.len());
        assert!(counts.windows(2).all(|w| w[0] <= w[1]), "{counts:?}");
        assert!(counts.first() < counts.last(), "{counts:?}");
        assert_eq!(counts.last(), Some(&3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_active_tasks_never_exceed_limit() {
        for limit in [1, 2, 5] {
            let executor = Arc::new(SleepyExecutor::new(Duration::from_millis(700)));
            let pool = orchestrator(executor.clone(), PoolConfig::default().with_concurrency(limit));

            let summary = finished(pool.run(tasks(12), "limit", false).await.unwrap());

            assert_eq!(summary.completed, 12);
            assert_eq!(executor.calls.load(Ordering::SeqCst), 12);
            assert!(executor.peak.load(Ordering::SeqCst) <= limit);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_tasks_start_in_input_order() {
        let executor = Arc::new(SleepyExecutor::new(Duration::from_millis(300)));
        let pool = orchestrator(executor.clone(), PoolConfig::default().with_concurrency(2));

        finished(pool.run(tasks(5), "order", false).await.unwrap());

        let order = executor.order.lock().unwrap().clone();
        let expected: Vec<String> = (0..5).map(|i| format!("task-{i}")).collect();
        assert_eq!(order, expected);
    }

    #[tokio::test]
    async fn test_empty_task_list_is_a_no_op() {
        let executor = Arc::new(SleepyExecutor::new(Duration::from_secs(1)));
        let pool = orchestrator(executor.clone(), PoolConfig::default())
            .with_confirm(AutoConfirm(false));

        let summary = finished(pool.run(Vec::new(), "empty", true).await.unwrap());

        assert_eq!(summary.total, 0);
        assert_eq!(executor.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_declined_confirmation_runs_nothing() {
        let executor = Arc::new(SleepyExecutor::new(Duration::from_millis(1)));
        let pool = orchestrator(executor.clone(), PoolConfig::default())
            .with_confirm(AutoConfirm(false));

        let outcome = pool.run(tasks(4), "declined", true).await.unwrap();

        assert!(matches!(outcome, RunOutcome::Declined));
        assert_eq!(executor.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_isolated_failure_does_not_stop_the_run() {
        let mut executor = SleepyExecutor::new(Duration::from_millis(500));
        executor.fail_on = Some("task-1");
        let executor = Arc::new(executor);
        let pool = orchestrator(executor.clone(), PoolConfig::default().with_concurrency(2));

        let summary = finished(pool.run(tasks(4), "isolate", false).await.unwrap());

        assert_eq!(summary.completed, 3);
        assert_eq!(summary.failed, 1);
        assert!(!summary.is_success());
        assert_eq!(summary.failures.len(), 1);
        assert_eq!(summary.failures[0].index, 1);
        assert!(summary.failures[0].outcome.error().unwrap().is_verification());
    }

    #[tokio::test(start_paused = true)]
    async fn test_strict_policy_aborts_and_cancels_in_flight() {
        let mut executor = SleepyExecutor::new(Duration::from_millis(500));
        executor.fail_on = Some("task-0");
        let executor = Arc::new(executor);
        let config = PoolConfig::default()
            .with_concurrency(3)
            .with_failure_policy(FailurePolicy::AbortOnFirstError);
        let pool = orchestrator(executor.clone(), config);

        let err = pool.run(tasks(6), "strict", false).await.unwrap_err();

        match err {
            PoolError::Aborted { index, error, .. } => {
                assert_eq!(index, 0);
                assert!(error.is_verification());
            }
            other => panic!("unexpected error: {other}"),
        }
        // task-1 and task-2 were in flight when task-0 failed; nothing after them started
        assert_eq!(executor.calls.load(Ordering::SeqCst), 3);
        assert_eq!(executor.active.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_session_aborts_even_when_isolating() {
        let mut executor = SleepyExecutor::new(Duration::from_millis(500));
        executor.unauthorized_on = Some("task-2");
        let executor = Arc::new(executor);
        let pool = orchestrator(executor.clone(), PoolConfig::default().with_concurrency(1));

        let err = pool.run(tasks(5), "fatal", false).await.unwrap_err();

        assert!(matches!(err, PoolError::Aborted { index: 2, .. }));
        assert_eq!(executor.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_task_timeout_fails_the_task() {
        let executor = Arc::new(SleepyExecutor::new(Duration::from_secs(10)));
        let config = PoolConfig::default()
            .with_concurrency(2)
            .with_task_timeout(Duration::from_secs(2));
        let pool = orchestrator(executor.clone(), config);

        let summary = finished(pool.run(tasks(2), "timeout", false).await.unwrap());

        assert_eq!(summary.failed, 2);
        assert!(matches!(
            summary.failures[0].outcome.error(),
            Some(TaskError::TimedOut(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_external_cancel_stops_the_run() {
        let executor = Arc::new(SleepyExecutor::new(Duration::from_secs(5)));
        let pool = orchestrator(executor.clone(), PoolConfig::default().with_concurrency(2));
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let err = pool
            .run_until_cancelled(tasks(4), "cancel", false, cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, PoolError::Cancelled));
        assert_eq!(executor.calls.load(Ordering::SeqCst), 2);
        assert_eq!(executor.cancelled.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_duplicate_destinations_are_rejected() {
        let executor = Arc::new(SleepyExecutor::new(Duration::from_millis(1)));
        let pool = orchestrator(executor.clone(), PoolConfig::default());
        let list = vec![
            Task::new("a", "/out/same.tif"),
            Task::new("b", "/out/same.tif"),
        ];

        let err = pool.run(list, "dupes", false).await.unwrap_err();

        assert!(matches!(err, PoolError::DuplicateDestination(_)));
        assert_eq!(executor.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_zero_concurrency_is_rejected() {
        let executor = Arc::new(SleepyExecutor::new(Duration::from_millis(1)));
        let pool = orchestrator(executor, PoolConfig::default().with_concurrency(0));

        let err = pool.run(tasks(1), "zero", false).await.unwrap_err();
        assert!(matches!(err, PoolError::InvalidConcurrency));
    }
}
