//! Scheduler for level-by-level parallel task execution.
//!
//! The `ParallelScheduler` runs the groups produced by the dependency
//! analyzer in ascending level order. A level only starts once every task
//! of the previous level has returned. Tasks inside a level run
//! concurrently on a bounded [`WorkerPool`], except for one-task levels
//! which run inline.

use crate::core::dag::{DependencyAnalyzer, ParallelGroup};
use crate::core::task::{BatchId, BatchResult, ExecutionMode, Task, TaskResult};
use crate::orchestration::pool::WorkerPool;
use crate::orchestration::resolver::{ExecutionRequest, ExecutorResolver};
use crate::util::panic_message;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Default number of concurrent workers per batch.
pub const DEFAULT_MAX_WORKERS: usize = 4;

/// Default per-task timeout.
pub const DEFAULT_TASK_TIMEOUT: Duration = Duration::from_secs(300);

/// Events emitted by the scheduler while a batch runs.
///
/// Sent with `try_send`; a full or closed channel drops the event.
#[derive(Debug, Clone, PartialEq)]
pub enum SchedulerEvent {
    /// A level is about to be dispatched.
    LevelStarted {
        batch_id: BatchId,
        level: usize,
        tasks: usize,
    },
    /// A task in the batch produced its result.
    TaskFinished {
        batch_id: BatchId,
        level: usize,
        result: TaskResult,
    },
    /// Fail-fast stopped the batch after a level with failures.
    Aborted {
        batch_id: BatchId,
        level: usize,
        failed: usize,
    },
    /// The batch finished, either by running every level or by aborting.
    BatchComplete {
        batch_id: BatchId,
        state: BatchState,
        total: usize,
        successful: usize,
        failed: usize,
    },
}

/// Lifecycle of one batch.
///
/// `Pending -> RunningLevel(0) -> ... -> RunningLevel(n) -> Done`, or
/// `RunningLevel(i) -> Aborted(i)` when fail-fast trips.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatchState {
    Pending,
    RunningLevel(usize),
    Aborted(usize),
    Done,
}

impl BatchState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, BatchState::Aborted(_) | BatchState::Done)
    }
}

/// Knobs for one batch execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionOptions {
    /// Worker pool size for multi-task levels. Zero is treated as one.
    pub max_workers: usize,
    /// How long to wait for a single task before reporting it timed out.
    pub timeout_per_task: Duration,
    /// Stop after the first level that has any failure.
    pub fail_fast: bool,
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        Self {
            max_workers: DEFAULT_MAX_WORKERS,
            timeout_per_task: DEFAULT_TASK_TIMEOUT,
            fail_fast: false,
        }
    }
}

impl ExecutionOptions {
    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_per_task = timeout;
        self
    }

    pub fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }
}

/// How a batch will be run.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionPlan {
    /// Dependency levels, in ascending order.
    Leveled(Vec<ParallelGroup>),
    /// Every task in one unordered level-0 group. Used when analysis is
    /// disabled or the batch has a cycle.
    Flat(ParallelGroup),
}

impl ExecutionPlan {
    pub fn mode(&self) -> ExecutionMode {
        match self {
            ExecutionPlan::Leveled(_) => ExecutionMode::Leveled,
            ExecutionPlan::Flat(_) => ExecutionMode::Flat,
        }
    }

    pub fn groups(&self) -> &[ParallelGroup] {
        match self {
            ExecutionPlan::Leveled(groups) => groups,
            ExecutionPlan::Flat(group) => std::slice::from_ref(group),
        }
    }

    pub fn task_count(&self) -> usize {
        self.groups().iter().map(ParallelGroup::len).sum()
    }
}

/// Runs task batches against executors from an [`ExecutorResolver`].
///
/// # Example
///
/// ```ignore
/// let scheduler = ParallelScheduler::new(resolver, ExecutionOptions::default());
/// let batch = scheduler.execute_tasks(&tasks, true).await;
/// assert_eq!(batch.total, batch.successful + batch.failed);
/// ```
pub struct ParallelScheduler {
    resolver: Arc<ExecutorResolver>,
    options: ExecutionOptions,
    event_tx: Option<mpsc::Sender<SchedulerEvent>>,
}

impl ParallelScheduler {
    /// Create a new scheduler.
    ///
    /// # Arguments
    ///
    /// * `resolver` - Source of executors, shared with the workers
    /// * `options` - Options used by [`ParallelScheduler::execute_tasks`]
    pub fn new(resolver: Arc<ExecutorResolver>, options: ExecutionOptions) -> Self {
        Self {
            resolver,
            options,
            event_tx: None,
        }
    }

    /// Attach a channel that receives [`SchedulerEvent`]s.
    pub fn with_events(mut self, event_tx: mpsc::Sender<SchedulerEvent>) -> Self {
        self.event_tx = Some(event_tx);
        self
    }

    pub fn options(&self) -> &ExecutionOptions {
        &self.options
    }

    pub fn resolver(&self) -> &Arc<ExecutorResolver> {
        &self.resolver
    }

    // ========== Planning ==========

    /// Decide how a batch will run.
    ///
    /// With analysis enabled the batch is split into dependency levels. If
    /// analysis is disabled, or the batch contains a cycle, the plan is a
    /// single flat group of every task.
    pub async fn plan(&self, tasks: &[Task], enable_dependency_analysis: bool) -> ExecutionPlan {
        if tasks.is_empty() {
            return ExecutionPlan::Leveled(Vec::new());
        }

        if !enable_dependency_analysis {
            debug!(tasks = tasks.len(), "Dependency analysis disabled, running flat");
            return ExecutionPlan::Flat(ParallelGroup::new(0, tasks.to_vec()));
        }

        let grouped = {
            let registry = self.resolver.registry().read().await;
            DependencyAnalyzer::with_registry(&registry).group_parallel_tasks(tasks)
        };

        match grouped {
            Ok(groups) => ExecutionPlan::Leveled(groups),
            Err(e) => {
                warn!(error = %e, "Dependency analysis failed, falling back to flat execution");
                ExecutionPlan::Flat(ParallelGroup::new(0, tasks.to_vec()))
            }
        }
    }

    // ========== Execution ==========

    /// Plan a batch and run it with the scheduler's own options.
    pub async fn execute_tasks(
        &self,
        tasks: &[Task],
        enable_dependency_analysis: bool,
    ) -> BatchResult {
        let plan = self.plan(tasks, enable_dependency_analysis).await;
        self.execute_plan(&plan, &self.options).await
    }

    /// Run either kind of plan.
    pub async fn execute_plan(&self, plan: &ExecutionPlan, options: &ExecutionOptions) -> BatchResult {
        self.run_batch(plan.groups(), options, plan.mode()).await
    }

    /// Run pre-computed groups in ascending level order.
    ///
    /// Per-task problems never fail the call; they show up as failed or
    /// timed-out results in the returned batch.
    pub async fn execute(&self, groups: &[ParallelGroup], options: &ExecutionOptions) -> BatchResult {
        self.run_batch(groups, options, ExecutionMode::Leveled).await
    }

    async fn run_batch(
        &self,
        groups: &[ParallelGroup],
        options: &ExecutionOptions,
        mode: ExecutionMode,
    ) -> BatchResult {
        let batch_id = BatchId::new();
        let start = Instant::now();
        let mut state = BatchState::Pending;
        let mut results: Vec<TaskResult> = Vec::new();

        let mut ordered: Vec<&ParallelGroup> = groups.iter().filter(|g| !g.is_empty()).collect();
        ordered.sort_by_key(|g| g.level);

        info!(
            batch = %batch_id.short(),
            levels = ordered.len(),
            mode = ?mode,
            "Starting batch"
        );

        // Created on the first multi-task level and reused after that.
        let mut pool: Option<WorkerPool> = None;

        for group in ordered {
            state = BatchState::RunningLevel(group.level);
            info!(
                batch = %batch_id.short(),
                level = group.level,
                tasks = group.len(),
                "Dispatching level"
            );
            self.emit(SchedulerEvent::LevelStarted {
                batch_id,
                level: group.level,
                tasks: group.len(),
            });

            let level_results = if let [task] = group.tasks.as_slice() {
                let result =
                    run_task(Arc::clone(&self.resolver), task.clone(), options.timeout_per_task).await;
                self.finish_task(batch_id, group.level, &result);
                vec![result]
            } else {
                let pool = pool.get_or_insert_with(|| WorkerPool::new(options.max_workers));
                for task in &group.tasks {
                    pool.submit(
                        &task.namespace,
                        run_task(Arc::clone(&self.resolver), task.clone(), options.timeout_per_task),
                    );
                }

                let mut level_results = Vec::with_capacity(group.len());
                while let Some(result) = pool.next_completed().await {
                    self.finish_task(batch_id, group.level, &result);
                    level_results.push(result);
                }
                level_results
            };

            let failed = level_results.iter().filter(|r| !r.success()).count();
            results.extend(level_results);

            if failed > 0 && options.fail_fast {
                state = BatchState::Aborted(group.level);
                warn!(
                    batch = %batch_id.short(),
                    level = group.level,
                    failed,
                    "Level had failures, stopping batch"
                );
                self.emit(SchedulerEvent::Aborted {
                    batch_id,
                    level: group.level,
                    failed,
                });
                break;
            }
        }

        let aborted_at_level = match state {
            BatchState::Aborted(level) => Some(level),
            _ => {
                state = BatchState::Done;
                None
            }
        };

        let batch = BatchResult::from_results(batch_id, results, start.elapsed(), mode, aborted_at_level);

        info!(
            batch = %batch_id.short(),
            total = batch.total,
            successful = batch.successful,
            failed = batch.failed,
            duration_ms = batch.duration.as_millis() as u64,
            state = ?state,
            "Batch complete"
        );
        self.emit(SchedulerEvent::BatchComplete {
            batch_id,
            state,
            total: batch.total,
            successful: batch.successful,
            failed: batch.failed,
        });

        batch
    }

    fn finish_task(&self, batch_id: BatchId, level: usize, result: &TaskResult) {
        debug!(
            namespace = %result.namespace,
            status = %result.status,
            duration_ms = result.duration.as_millis() as u64,
            "Task finished"
        );
        self.emit(SchedulerEvent::TaskFinished {
            batch_id,
            level,
            result: result.clone(),
        });
    }

    fn emit(&self, event: SchedulerEvent) {
        if let Some(tx) = &self.event_tx {
            if tx.try_send(event).is_err() {
                debug!("Scheduler event dropped");
            }
        }
    }
}

/// Resolve and run one task, bounded by `timeout`.
///
/// The executor runs on its own spawned task. On timeout the scheduler
/// stops waiting and cancels the request token; the spawned work is left
/// to finish or notice the cancellation on its own.
async fn run_task(resolver: Arc<ExecutorResolver>, task: Task, timeout: Duration) -> TaskResult {
    let started_at = Utc::now();
    let start = Instant::now();
    let namespace = task.namespace;

    let Some((executor, resource_payload)) = resolver.resolve_with_payload(&namespace).await else {
        return TaskResult::failed(
            &namespace,
            format!("no executor available for {}", namespace),
            start.elapsed(),
            started_at,
        );
    };

    let cancel = CancellationToken::new();
    let request = ExecutionRequest {
        namespace: namespace.clone(),
        payload: task.payload,
        resource_payload,
        metadata: task.metadata,
        cancel: cancel.clone(),
    };

    let handle = tokio::spawn(async move { executor.run(request).await });

    match tokio::time::timeout(timeout, handle).await {
        Ok(Ok(output)) if output.success => {
            TaskResult::succeeded(&namespace, output.output, start.elapsed(), started_at)
        }
        Ok(Ok(output)) => TaskResult::failed(
            &namespace,
            output
                .error
                .unwrap_or_else(|| "executor reported failure".to_string()),
            start.elapsed(),
            started_at,
        ),
        Ok(Err(join_err)) => {
            let error = if join_err.is_panic() {
                format!("executor panicked: {}", panic_message(&*join_err.into_panic()))
            } else {
                format!("executor task did not complete: {}", join_err)
            };
            TaskResult::failed(&namespace, error, start.elapsed(), started_at)
        }
        Err(_) => {
            cancel.cancel();
            warn!(namespace = %namespace, timeout = ?timeout, "Task timed out, detaching");
            TaskResult::timed_out(&namespace, timeout, started_at)
        }
    }
}
