//! Bounded worker pool for running tasks of one batch.
//!
//! The `WorkerPool` caps how many submitted futures run at once with a
//! semaphore. Every submission is spawned right away, but it waits for a
//! permit before doing any work. The pool is created once per batch and
//! reused for each group the batch runs.

use crate::core::task::TaskResult;
use crate::util::panic_message;
use chrono::Utc;
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error};

/// Runs task futures with at most `max_workers` in flight.
///
/// # Example
///
/// ```ignore
/// let mut pool = WorkerPool::new(4);
/// pool.submit("skill:a", async { /* ... */ });
/// while let Some(result) = pool.next_completed().await {
///     println!("{} {}", result.namespace, result.status);
/// }
/// ```
#[derive(Debug)]
pub struct WorkerPool {
    /// Permits handed to running submissions.
    semaphore: Arc<Semaphore>,
    /// Maximum number of submissions running at once.
    max_workers: usize,
    /// Spawned submissions that have not been collected yet.
    in_flight: JoinSet<TaskResult>,
}

impl WorkerPool {
    /// Create a pool with the given capacity.
    ///
    /// # Arguments
    ///
    /// * `max_workers` - Maximum concurrent submissions, raised to 1 if zero
    pub fn new(max_workers: usize) -> Self {
        let max_workers = max_workers.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(max_workers)),
            max_workers,
            in_flight: JoinSet::new(),
        }
    }

    /// Submit a task future to the pool.
    ///
    /// The future starts once a permit is free. If it panics, a failed
    /// result is produced for `namespace` instead.
    pub fn submit<F>(&mut self, namespace: &str, work: F)
    where
        F: Future<Output = TaskResult> + Send + 'static,
    {
        let semaphore = Arc::clone(&self.semaphore);
        let namespace = namespace.to_string();

        self.in_flight.spawn(async move {
            let _permit = match semaphore.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    return TaskResult::failed(
                        &namespace,
                        "worker pool closed",
                        std::time::Duration::ZERO,
                        Utc::now(),
                    );
                }
            };

            let started_at = Utc::now();
            let start = Instant::now();
            debug!(namespace = %namespace, "Worker picked up task");

            match AssertUnwindSafe(work).catch_unwind().await {
                Ok(result) => result,
                Err(panic) => {
                    let message = panic_message(&*panic);
                    error!(namespace = %namespace, panic = %message, "Task panicked");
                    TaskResult::failed(
                        &namespace,
                        format!("task panicked: {}", message),
                        start.elapsed(),
                        started_at,
                    )
                }
            }
        });
    }

    /// Wait for the next submission to finish, in completion order.
    ///
    /// Returns `None` once nothing is in flight.
    pub async fn next_completed(&mut self) -> Option<TaskResult> {
        loop {
            match self.in_flight.join_next().await? {
                Ok(result) => return Some(result),
                // Panics are caught inside the submission, so this is only
                // reached if the runtime cancels the task.
                Err(e) => error!(error = %e, "Worker task did not complete"),
            }
        }
    }

    /// Wait for every in-flight submission and return their results.
    pub async fn drain(&mut self) -> Vec<TaskResult> {
        let mut results = Vec::with_capacity(self.in_flight.len());
        while let Some(result) = self.next_completed().await {
            results.push(result);
        }
        results
    }

    /// Number of submissions not yet collected.
    pub fn active_count(&self) -> usize {
        self.in_flight.len()
    }

    /// Check if a new submission would start without waiting.
    pub fn has_capacity(&self) -> bool {
        self.semaphore.available_permits() > 0
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }
}
