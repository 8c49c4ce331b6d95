//! weave: a resource registry and dependency-aware parallel task scheduler.
//!
//! Resources are registered under `kind:name` namespaces. A batch of tasks
//! targeting those namespaces is split into dependency levels and run
//! level by level, with each level's tasks running concurrently.

pub mod config;
pub mod core;
pub mod error;
pub mod log;
pub mod orchestration;
pub mod registry;
pub mod util;

pub use config::{Config, SchedulerConfig};
pub use crate::core::{
    BatchId, BatchResult, DependencyAnalyzer, DependencyGraph, ExecutionMode, ParallelGroup,
    Resource, ResourceKind, SourceTier, Task, TaskResult, TaskStatus,
};
pub use error::{Error, Result};
pub use orchestration::{
    BatchState, ExecutionOptions, ExecutionPlan, ExecutionRequest, Executor, ExecutorOutput,
    ExecutorResolver, ExecutorTable, FnExecutor, ParallelScheduler, SchedulerEvent, WorkerPool,
};
pub use registry::{ListFilter, Registry, RegistryStats};
