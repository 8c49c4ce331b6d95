//! Task and result data model.
//!
//! Tasks are ephemeral requests to invoke a registered resource. The
//! scheduler turns each attempted task into a [`TaskResult`] and rolls a
//! batch of them up into a [`BatchResult`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use uuid::Uuid;

/// A single request to invoke a resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Namespace of the resource this task invokes.
    pub namespace: String,
    /// Caller-supplied request content.
    #[serde(default)]
    pub payload: serde_json::Value,
    /// Namespaces this task waits on, on top of the resource's own.
    #[serde(default)]
    pub explicit_dependencies: Vec<String>,
    /// Opaque pass-through bag.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl Task {
    /// Create a task with an empty payload.
    pub fn new(namespace: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            payload: serde_json::Value::Null,
            explicit_dependencies: Vec::new(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    /// Add an explicit dependency. Duplicates are ignored.
    pub fn depends_on(mut self, namespace: &str) -> Self {
        if !self.explicit_dependencies.iter().any(|d| d == namespace) {
            self.explicit_dependencies.push(namespace.to_string());
        }
        self
    }

    pub fn with_metadata(mut self, key: &str, value: &str) -> Self {
        self.metadata.insert(key.to_string(), value.to_string());
        self
    }
}

/// Terminal state of an attempted task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// The executor reported success.
    Succeeded,
    /// Resolution failed, the executor reported failure, or it panicked.
    Failed,
    /// The scheduler stopped waiting. The work itself may still be running.
    TimedOut,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Succeeded => write!(f, "succeeded"),
            TaskStatus::Failed => write!(f, "failed"),
            TaskStatus::TimedOut => write!(f, "timed out"),
        }
    }
}

/// Outcome of one attempted task.
///
/// Created once by the scheduler and never mutated afterwards. The same
/// shape is produced whether the task ran inline or on the worker pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub namespace: String,
    pub status: TaskStatus,
    /// Executor output, present on success.
    pub output: Option<serde_json::Value>,
    /// Failure description, present unless the task succeeded.
    pub error: Option<String>,
    /// How long the scheduler waited. Equals the configured timeout for
    /// timed-out tasks.
    #[serde(with = "duration_millis")]
    pub duration: Duration,
    pub started_at: DateTime<Utc>,
}

impl TaskResult {
    pub fn succeeded(
        namespace: &str,
        output: Option<serde_json::Value>,
        duration: Duration,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            namespace: namespace.to_string(),
            status: TaskStatus::Succeeded,
            output,
            error: None,
            duration,
            started_at,
        }
    }

    pub fn failed(
        namespace: &str,
        error: impl Into<String>,
        duration: Duration,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            namespace: namespace.to_string(),
            status: TaskStatus::Failed,
            output: None,
            error: Some(error.into()),
            duration,
            started_at,
        }
    }

    pub fn timed_out(namespace: &str, timeout: Duration, started_at: DateTime<Utc>) -> Self {
        Self {
            namespace: namespace.to_string(),
            status: TaskStatus::TimedOut,
            output: None,
            error: Some(format!("task timed out after {:?}", timeout)),
            duration: timeout,
            started_at,
        }
    }

    pub fn success(&self) -> bool {
        self.status == TaskStatus::Succeeded
    }
}

/// Unique identifier for one scheduling call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchId(pub Uuid);

impl BatchId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Return first 8 characters of the UUID for display.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for BatchId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for BatchId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which execution path produced a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Dependency levels were computed and run in order.
    Leveled,
    /// All tasks ran as one unordered group.
    Flat,
}

/// Aggregate outcome of a scheduling call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchResult {
    pub batch_id: BatchId,
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    /// Wall-clock time across the whole call.
    #[serde(with = "duration_millis")]
    pub duration: Duration,
    pub results: Vec<TaskResult>,
    pub mode: ExecutionMode,
    /// Set when fail-fast stopped the batch after this level.
    pub aborted_at_level: Option<usize>,
}

impl BatchResult {
    /// Roll up task results. Counts are derived, so `total == successful + failed`.
    pub fn from_results(
        batch_id: BatchId,
        results: Vec<TaskResult>,
        duration: Duration,
        mode: ExecutionMode,
        aborted_at_level: Option<usize>,
    ) -> Self {
        let total = results.len();
        let successful = results.iter().filter(|r| r.success()).count();
        Self {
            batch_id,
            total,
            successful,
            failed: total - successful,
            duration,
            results,
            mode,
            aborted_at_level,
        }
    }

    /// An empty leveled batch.
    pub fn empty(batch_id: BatchId) -> Self {
        Self::from_results(batch_id, Vec::new(), Duration::ZERO, ExecutionMode::Leveled, None)
    }

    pub fn timed_out(&self) -> usize {
        self.results
            .iter()
            .filter(|r| r.status == TaskStatus::TimedOut)
            .count()
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed == 0
    }

    /// Find the first result for a namespace.
    pub fn result_for(&self, namespace: &str) -> Option<&TaskResult> {
        self.results.iter().find(|r| r.namespace == namespace)
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}
