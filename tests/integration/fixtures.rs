//! Test fixtures for integration tests.
//!
//! Provides helpers for:
//! - Building registries of skill resources
//! - A recording executor whose behavior is scripted through payloads
//! - Predefined task sets (independent, diamond, cycle)
//! - A harness wiring registry, resolver and scheduler together

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde_json::{json, Value};
use tokio::sync::{mpsc, RwLock};

use weave::orchestration::{
    ExecutionOptions, ExecutionRequest, ExecutorOutput, ExecutorResolver, ExecutorTable,
    FnExecutor, ParallelScheduler, SchedulerEvent,
};
use weave::{Registry, Resource, ResourceKind, Task};

/// Create a skill resource with the given name.
pub fn skill(name: &str) -> Resource {
    Resource::new(ResourceKind::Skill, name)
}

/// Namespace of the skill with the given name.
pub fn ns(name: &str) -> String {
    format!("skill:{}", name)
}

/// Create a task targeting the skill with the given name.
pub fn test_task(name: &str) -> Task {
    Task::new(&ns(name))
}

/// Create a task that depends on the named skills.
pub fn task_after(name: &str, deps: &[&str]) -> Task {
    deps.iter()
        .fold(test_task(name), |task, dep| task.depends_on(&ns(dep)))
}

/// Create a set of predefined independent tasks named `t0..tN`.
pub fn independent_tasks(count: usize) -> Vec<Task> {
    (0..count).map(|i| test_task(&format!("t{}", i))).collect()
}

/// Names used by [`independent_tasks`].
pub fn independent_names(count: usize) -> Vec<String> {
    (0..count).map(|i| format!("t{}", i)).collect()
}

/// Create a diamond-shaped task set.
///
/// ```text
///   a   b   c
///    \ / \ /
///     d   e
///      \ /
///       f
/// ```
pub fn diamond_tasks() -> Vec<Task> {
    vec![
        test_task("a"),
        test_task("b"),
        test_task("c"),
        task_after("d", &["a", "b"]),
        task_after("e", &["b", "c"]),
        task_after("f", &["d", "e"]),
    ]
}

/// Create a three-task cycle: a -> b -> c -> a
pub fn cycle_tasks() -> Vec<Task> {
    vec![
        task_after("a", &["b"]),
        task_after("b", &["c"]),
        task_after("c", &["a"]),
    ]
}

// ============================================================================
// Scripted payloads
// ============================================================================

/// Succeed after sleeping.
pub fn sleep_payload(ms: u64) -> Value {
    json!({ "sleep_ms": ms })
}

/// Report failure with the given message.
pub fn fail_payload(message: &str) -> Value {
    json!({ "fail": message })
}

/// Wait until the request is cancelled.
pub fn hang_payload() -> Value {
    json!({ "hang": true })
}

/// Panic inside the executor.
pub fn panic_payload() -> Value {
    json!({ "panic": true })
}

/// One executor invocation.
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub namespace: String,
    pub started: Instant,
    pub finished: Instant,
}

/// Records every executor invocation and tracks peak concurrency.
#[derive(Clone, Default)]
pub struct RunLog {
    records: Arc<Mutex<Vec<RunRecord>>>,
    active: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl RunLog {
    /// Run a request according to its payload.
    ///
    /// The task payload wins; the resource payload is used when the task
    /// payload is null.
    pub async fn run(&self, request: ExecutionRequest) -> ExecutorOutput {
        let script = if request.payload.is_null() {
            request.resource_payload.clone()
        } else {
            request.payload.clone()
        };

        let started = Instant::now();
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        if let Some(ms) = script.get("sleep_ms").and_then(Value::as_u64) {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }

        let output = if script.get("hang").is_some() {
            request.cancel.cancelled().await;
            ExecutorOutput::failure("cancelled")
        } else if let Some(message) = script.get("fail").and_then(Value::as_str) {
            ExecutorOutput::failure(message)
        } else {
            ExecutorOutput::success(json!({ "ran": request.namespace }))
        };

        self.active.fetch_sub(1, Ordering::SeqCst);
        self.records.lock().unwrap().push(RunRecord {
            namespace: request.namespace.clone(),
            started,
            finished: Instant::now(),
        });

        if script.get("panic").is_some() {
            panic!("scripted panic in {}", request.namespace);
        }

        output
    }

    pub fn records(&self) -> Vec<RunRecord> {
        self.records.lock().unwrap().clone()
    }

    pub fn record(&self, namespace: &str) -> Option<RunRecord> {
        self.records()
            .into_iter()
            .find(|r| r.namespace == namespace)
    }

    /// Namespaces in the order their executors finished.
    pub fn finished_order(&self) -> Vec<String> {
        let mut records = self.records();
        records.sort_by_key(|r| r.finished);
        records.into_iter().map(|r| r.namespace).collect()
    }

    /// True if `first` finished before `second` started.
    pub fn ran_before(&self, first: &str, second: &str) -> bool {
        match (self.record(first), self.record(second)) {
            (Some(a), Some(b)) => a.finished <= b.started,
            _ => false,
        }
    }

    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn run_count(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    /// How many times each namespace ran.
    pub fn counts(&self) -> HashMap<String, usize> {
        let mut counts = HashMap::new();
        for record in self.records() {
            *counts.entry(record.namespace).or_insert(0) += 1;
        }
        counts
    }
}

/// An executor table that builds a recording executor for every kind.
pub fn recording_table(log: &RunLog) -> ExecutorTable {
    let mut table = ExecutorTable::new();
    for kind in ResourceKind::ALL {
        let log = log.clone();
        table.register(kind, move |_resource: &Resource| {
            let log = log.clone();
            Ok(FnExecutor::new(move |request: ExecutionRequest| {
                let log = log.clone();
                async move { log.run(request).await }
            })
            .into_executor())
        });
    }
    table
}

/// Test harness wiring a registry, resolver and scheduler together.
pub struct SchedulerHarness {
    pub registry: Arc<RwLock<Registry>>,
    pub resolver: Arc<ExecutorResolver>,
    pub scheduler: ParallelScheduler,
    pub log: RunLog,
    pub event_rx: mpsc::Receiver<SchedulerEvent>,
}

impl SchedulerHarness {
    /// Create a harness with the given resources registered.
    pub fn new(resources: Vec<Resource>, options: ExecutionOptions) -> Self {
        let mut registry = Registry::new();
        for resource in resources {
            registry.register(resource, false);
        }
        let registry = Arc::new(RwLock::new(registry));

        let log = RunLog::default();
        let resolver = Arc::new(ExecutorResolver::new(
            Arc::clone(&registry),
            recording_table(&log),
        ));

        let (event_tx, event_rx) = mpsc::channel(1024);
        let scheduler = ParallelScheduler::new(Arc::clone(&resolver), options).with_events(event_tx);

        Self {
            registry,
            resolver,
            scheduler,
            log,
            event_rx,
        }
    }

    /// Create a harness with plain skills registered under the given names.
    pub fn with_skills<S: AsRef<str>>(names: &[S], options: ExecutionOptions) -> Self {
        Self::new(
            names.iter().map(|n| skill(n.as_ref())).collect(),
            options,
        )
    }

    /// Collect every event emitted so far.
    pub fn drain_events(&mut self) -> Vec<SchedulerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.event_rx.try_recv() {
            events.push(event);
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diamond_tasks_shape() {
        let tasks = diamond_tasks();
        assert_eq!(tasks.len(), 6);
        assert_eq!(
            tasks[5].explicit_dependencies,
            vec![ns("d"), ns("e")]
        );
    }

    #[tokio::test]
    async fn test_run_log_records_runs() {
        let log = RunLog::default();
        let request = ExecutionRequest {
            namespace: ns("x"),
            payload: Value::Null,
            resource_payload: Value::Null,
            metadata: Default::default(),
            cancel: Default::default(),
        };
        let output = log.run(request).await;
        assert!(output.success);
        assert_eq!(log.run_count(), 1);
        assert_eq!(log.peak_concurrency(), 1);
    }
}
