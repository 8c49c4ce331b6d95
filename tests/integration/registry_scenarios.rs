//! Registry and resolver tests.
//!
//! These tests cover priority-based conflict resolution, dependency
//! queries over registered resources, executor caching across batches,
//! and scheduler options loaded from a config file.

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::sync::RwLock;

use weave::orchestration::{ExecutorResolver, ParallelScheduler};
use weave::registry::ListFilter;
use weave::{Config, Registry, Resource, ResourceKind, SourceTier};

use crate::fixtures::{ns, recording_table, skill, test_task, RunLog, SchedulerHarness};

/// Test: Priority override
/// Given skill:foo registered at priority 10
/// When a project-tier skill:foo arrives at priority 50
/// Then it replaces the original, and a later equal-priority copy is rejected
#[test]
fn test_priority_override_and_equal_rejection() {
    let mut registry = Registry::new();

    assert!(registry.register(
        skill("foo").with_priority(10).with_description("builtin"),
        false
    ));
    assert!(registry.register(
        skill("foo")
            .with_priority(50)
            .with_source(SourceTier::Project)
            .with_description("project"),
        false
    ));
    assert!(!registry.register(
        skill("foo")
            .with_priority(50)
            .with_source(SourceTier::User)
            .with_description("user"),
        false
    ));

    let stored = registry.get("skill:foo").unwrap();
    assert_eq!(stored.priority, 50);
    assert_eq!(stored.source_tier, SourceTier::Project);
    assert_eq!(stored.description.as_deref(), Some("project"));
    assert_eq!(registry.len(), 1);
}

/// Test: Registration is idempotent under same or lower priority
/// Given a registered resource
/// When the same definition is registered again, or a lower one
/// Then the registry is unchanged
#[test]
fn test_register_is_idempotent() {
    let mut registry = Registry::new();
    let original = skill("foo").with_priority(20).with_dependency(ns("bar"));
    registry.register(original.clone(), false);

    assert!(!registry.register(original.clone(), false));
    assert!(!registry.register(skill("foo").with_priority(5), false));

    assert_eq!(registry.get("skill:foo"), Some(&original));
    assert_eq!(registry.reverse_dependents("skill:bar"), vec!["skill:foo"]);
    assert_eq!(registry.stats().total_edges, 1);
}

/// Test: Tiers and kinds
/// Given resources across kinds and tiers
/// When listing with filters and reading stats
/// Then the indexes agree with the primary map
#[test]
fn test_listing_and_stats_across_tiers() {
    let mut registry = Registry::new();
    registry.register(skill("review"), false);
    registry.register(skill("lint").with_source(SourceTier::User), false);
    registry.register(
        Resource::new(ResourceKind::Command, "deploy")
            .with_source(SourceTier::Project)
            .with_dependencies([ns("review"), ns("lint")]),
        false,
    );
    registry.register(Resource::new(ResourceKind::Hook, "pre-commit").disabled(), false);

    assert_eq!(registry.list(&ListFilter::kind(ResourceKind::Skill)).len(), 2);
    assert_eq!(registry.list(&ListFilter::source(SourceTier::Project)).len(), 1);
    assert_eq!(registry.list(&ListFilter::default().enabled_only()).len(), 3);

    let stats = registry.stats();
    assert_eq!(stats.total, 4);
    assert_eq!(stats.by_kind.values().sum::<usize>(), 4);
    assert_eq!(stats.by_source.values().sum::<usize>(), 4);
    assert_eq!(stats.with_dependencies, 1);
    assert_eq!(stats.total_edges, 2);

    assert_eq!(
        registry.resolve_dependency_order("command:deploy"),
        vec!["skill:review", "skill:lint", "command:deploy"]
    );
    assert!(registry.validate_dependencies().is_empty());
    assert!(registry.check_cycles().is_empty());
}

/// Test: Registry cycles and dangling edges
/// Given a registry with a cycle and a missing dependency
/// When it is checked
/// Then both are reported without errors
#[test]
fn test_registry_diagnostics() {
    let mut registry = Registry::new();
    registry.register(skill("a").with_dependency(ns("b")), false);
    registry.register(skill("b").with_dependencies([ns("a"), ns("missing")]), false);

    let cycles = registry.check_cycles();
    assert_eq!(cycles.len(), 1);
    assert_eq!(cycles[0].first(), cycles[0].last());

    let problems = registry.validate_dependencies();
    assert_eq!(problems.len(), 1);
    assert!(problems[0].contains("skill:b"));
    assert!(problems[0].contains("skill:missing"));
}

/// Test: Executor cache across batches
/// Given a scheduler that runs the same namespace twice
/// When both batches finish
/// Then one executor was built and cached
#[tokio::test]
async fn test_executor_is_cached_across_batches() {
    let harness = SchedulerHarness::with_skills(&["a"], Default::default());

    harness.scheduler.execute_tasks(&[test_task("a")], true).await;
    harness.scheduler.execute_tasks(&[test_task("a")], true).await;

    assert_eq!(harness.resolver.cached_count().await, 1);
    assert_eq!(harness.log.counts().get(&ns("a")), Some(&2));
}

/// Test: Re-registration takes effect after invalidation
/// Given a cached executor for a resource that is then disabled
/// When the cache entry is invalidated
/// Then the next batch can no longer resolve it
#[tokio::test]
async fn test_invalidate_after_registry_change() {
    let harness = SchedulerHarness::with_skills(&["a"], Default::default());
    let first = harness.scheduler.execute_tasks(&[test_task("a")], true).await;
    assert_eq!(first.successful, 1);

    harness.registry.write().await.set_enabled("skill:a", false);
    assert!(harness.resolver.invalidate("skill:a").await);

    let second = harness.scheduler.execute_tasks(&[test_task("a")], true).await;
    assert_eq!(second.failed, 1);
}

/// Test: Scheduler options from config
/// Given a weave.toml with a [scheduler] table
/// When it is loaded and turned into execution options
/// Then the scheduler runs with those options
#[tokio::test]
async fn test_scheduler_from_config_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("weave.toml");
    std::fs::write(
        &path,
        "[scheduler]\nmax_workers = 2\ntimeout_secs = 5\nfail_fast = true\n",
    )
    .unwrap();

    let config = Config::load_from(&path).unwrap();
    let options = config.scheduler.execution_options();
    assert_eq!(options.max_workers, 2);
    assert_eq!(options.timeout_per_task, Duration::from_secs(5));
    assert!(options.fail_fast);

    let mut registry = Registry::new();
    registry.register(skill("a"), false);
    let log = RunLog::default();
    let resolver = ExecutorResolver::new(Arc::new(RwLock::new(registry)), recording_table(&log));
    let scheduler = ParallelScheduler::new(Arc::new(resolver), options);

    let batch = scheduler
        .execute_tasks(&[test_task("a")], config.scheduler.dependency_analysis)
        .await;
    assert_eq!(batch.successful, 1);
    assert_eq!(scheduler.options().max_workers, 2);
}
