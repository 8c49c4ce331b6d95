//! Core domain models for weave.
//!
//! This module contains the data structures shared by every layer:
//! resources, tasks and their results, and the per-batch dependency graph.

pub mod dag;
pub mod resource;
pub mod task;

pub use dag::{DependencyAnalyzer, DependencyGraph, ParallelGroup};
pub use resource::{namespace, parse_namespace, Resource, ResourceKind, SourceTier, MAX_PRIORITY};
pub use task::{BatchId, BatchResult, ExecutionMode, Task, TaskResult, TaskStatus};
