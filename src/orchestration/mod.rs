//! Orchestration layer for running task batches.
//!
//! This module turns tasks into results: the resolver finds an executor
//! for each namespace, the pool bounds how many run at once, and the
//! scheduler drives a batch level by level.

mod pool;
mod resolver;
pub mod scheduler;

pub use pool::WorkerPool;
pub use resolver::{
    ExecutionRequest, Executor, ExecutorConstructor, ExecutorOutput, ExecutorResolver,
    ExecutorTable, FnExecutor,
};
pub use scheduler::{
    BatchState, ExecutionOptions, ExecutionPlan, ParallelScheduler, SchedulerEvent,
};
